//! Sync-to-async bridging engine.
//!
//! All protocol I/O in this crate runs on one cooperative scheduler: a
//! current-thread tokio runtime owned by a dedicated background thread.
//! Synchronous callers submit futures through [`Engine`] from any thread and
//! either block for the result, hand over a callback, or schedule recurring
//! work. Blocking callers wait on a plain channel, never on anything internal
//! to the scheduler, so they cannot deadlock the engine thread.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::runtime::{Builder, Handle};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::error::EngineError;

/// How long `shutdown` waits for the engine thread to wind down.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

pub struct Engine {
    handle: Handle,
    running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Engine {
    /// Build the runtime and park it on a named background thread.
    pub fn new() -> Result<Self, EngineError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| EngineError::Failed(error.to_string()))?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("toyhub-engine".into())
            .spawn(move || {
                // Drives every task spawned through the handle until shutdown.
                runtime.block_on(async move {
                    let _ = shutdown_rx.await;
                });
                debug!("engine thread exiting");
            })
            .map_err(|error| EngineError::Failed(error.to_string()))?;

        Ok(Self {
            handle,
            running: Arc::new(AtomicBool::new(true)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn ensure_running(&self) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::NotReady)
        }
    }

    /// Run a future on the engine thread and block until it completes.
    ///
    /// With `timeout: None` this waits indefinitely. On timeout the task is
    /// left running; its eventual result is discarded.
    pub fn call<T, F>(&self, task: F, timeout: Option<Duration>) -> Result<T, EngineError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_running()?;
        let (tx, rx) = mpsc::channel();
        self.handle.spawn(async move {
            let _ = tx.send(task.await);
        });
        let outcome = match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|error| match error {
                mpsc::RecvTimeoutError::Timeout => EngineError::Timeout,
                mpsc::RecvTimeoutError::Disconnected => {
                    EngineError::Failed("task finished without a result".into())
                }
            }),
            None => rx
                .recv()
                .map_err(|_| EngineError::Failed("task finished without a result".into())),
        };
        outcome
    }

    /// Run several futures concurrently and block until all complete.
    ///
    /// Each task is spawned separately so one dying task cannot take the rest
    /// of the batch with it; outcomes come back in input order. The timeout is
    /// shared: if it elapses, the whole batch is abandoned.
    pub fn call_parallel<T, F>(
        &self,
        tasks: Vec<F>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Result<T, EngineError>>, EngineError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_running()?;
        let (tx, rx) = mpsc::channel();
        self.handle.spawn(async move {
            let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
            let outcomes: Vec<Result<T, EngineError>> = join_all(handles)
                .await
                .into_iter()
                .map(|joined| joined.map_err(|error| EngineError::Failed(error.to_string())))
                .collect();
            let _ = tx.send(outcomes);
        });
        match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|error| match error {
                mpsc::RecvTimeoutError::Timeout => EngineError::Timeout,
                mpsc::RecvTimeoutError::Disconnected => {
                    EngineError::Failed("batch finished without a result".into())
                }
            }),
            None => rx
                .recv()
                .map_err(|_| EngineError::Failed("batch finished without a result".into())),
        }
    }

    /// Run a future on the engine thread and deliver its outcome to `callback`.
    ///
    /// Returns immediately. The callback runs on the engine thread and is
    /// invoked exactly once: with the result, with [`EngineError::Timeout`] if
    /// the deadline elapsed, or with [`EngineError::NotReady`] if the engine
    /// is already gone.
    pub fn call_with_callback<T, F, C>(&self, task: F, callback: C, timeout: Option<Duration>)
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(Result<T, EngineError>) + Send + 'static,
    {
        if self.ensure_running().is_err() {
            callback(Err(EngineError::NotReady));
            return;
        }
        self.handle.spawn(async move {
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, task)
                    .await
                    .map_err(|_| EngineError::Timeout),
                None => Ok(task.await),
            };
            callback(outcome);
        });
    }

    /// Run freshly-built work at a fixed interval until cancelled.
    ///
    /// A failed iteration is logged and does not stop the schedule. The handle
    /// stops future iterations; an iteration already in flight finishes.
    pub fn schedule_recurring<F, Fut>(
        &self,
        mut task: F,
        interval: Duration,
    ) -> Result<RecurringTask, EngineError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.ensure_running()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let wakeup = Arc::new(Notify::new());
        let flag = cancelled.clone();
        let notify = wakeup.clone();
        self.handle.spawn(async move {
            loop {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(error) = task().await {
                    warn!("recurring task iteration failed: {error:#}");
                }
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
        Ok(RecurringTask { cancelled, wakeup })
    }

    /// Stop the scheduler and join its thread with a bounded wait. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let deadline = Instant::now() + SHUTDOWN_WAIT;
            while !thread.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                warn!("engine thread did not stop within {SHUTDOWN_WAIT:?}");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cancellation handle returned by [`Engine::schedule_recurring`].
pub struct RecurringTask {
    cancelled: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
}

impl RecurringTask {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Permit wakes the loop even if it is not parked in the sleep yet.
        self.wakeup.notify_one();
    }
}
