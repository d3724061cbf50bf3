//! End-to-end hub behavior: registry, communication loop, lifecycle edges.

mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use common::{MockDevice, MockScanner};
use toyhub::{Error, HubConfig, ToyController, ToyHub};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn temp_cache_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("toyhub-hub-test-{tag}-{}", std::process::id()));
    path.push("models.json");
    path
}

/// Poll until `condition` holds or the deadline passes.
fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Discover, assign a model and connect a single mock toy.
fn connect_one(hub: &ToyHub, model: &str) -> Arc<ToyController> {
    let mut toys = hub.discover_toys_blocking(Duration::from_secs(1)).unwrap();
    assert_eq!(toys.len(), 1);
    toys[0].model_name = model.to_string();
    let mut outcomes = hub.connect_toys_blocking(&toys, CONNECT_TIMEOUT).unwrap();
    outcomes.remove(0).unwrap()
}

#[test]
fn queued_commands_reach_the_toy_through_the_loop() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let toy = connect_one(&hub, "Lush");
    assert!(hub.is_running());

    let (tx, rx) = mpsc::channel();
    toy.intensity1(
        15,
        Some(Box::new(move |acknowledged| {
            let _ = tx.send(acknowledged);
        })),
    );
    assert!(rx.recv_timeout(Duration::from_secs(3)).unwrap());
    assert!(device
        .written_commands()
        .contains(&"Vibrate:15;".to_string()));

    hub.shutdown();
}

#[test]
fn registration_forces_an_immediate_battery_poll() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();

    device.script_response("81;");
    let _toy = connect_one(&hub, "Lush");

    let (tx, rx) = mpsc::channel::<HashMap<String, Option<u8>>>();
    hub.set_on_battery_update(Some(Arc::new(move |levels| {
        let _ = tx.send(levels);
    })));

    let levels = rx.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(levels.get("AA:01"), Some(&Some(81)));

    hub.shutdown();
}

#[test]
fn pattern_playback_drives_the_toy() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let toy = connect_one(&hub, "Lush");

    toy.set_pattern(
        vec![toyhub::PatternSegment::new(60_000, 12, 0)],
        true,
        true,
    );
    assert!(wait_for(
        || device.written_commands().contains(&"Vibrate:12;".to_string()),
        Duration::from_secs(3),
    ));

    // Pausing silences the toy exactly once.
    assert!(toy.toggle_pause());
    assert!(wait_for(
        || device.written_commands().contains(&"Vibrate:0;".to_string()),
        Duration::from_secs(3),
    ));

    hub.shutdown();
}

#[test]
fn manual_commands_pause_a_running_pattern() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let toy = connect_one(&hub, "Lush");

    toy.set_pattern(vec![toyhub::PatternSegment::new(60_000, 8, 0)], true, true);
    assert!(wait_for(|| toy.get_pattern_time() > 0, Duration::from_secs(2)));

    toy.intensity1(3, None);
    assert!(toy.is_paused());
    let frozen = toy.get_pattern_time();
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(toy.get_pattern_time(), frozen);

    hub.shutdown();
}

#[test]
fn blocked_toys_reject_manual_commands() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let toy = connect_one(&hub, "Lush");

    assert!(toy.toggle_block());
    let (tx, rx) = mpsc::channel();
    toy.intensity1(
        10,
        Some(Box::new(move |acknowledged| {
            let _ = tx.send(acknowledged);
        })),
    );
    // Rejected synchronously, without a transport write.
    assert!(!rx.recv_timeout(Duration::from_millis(200)).unwrap());
    assert!(!toy.is_paused());

    assert!(!toy.toggle_block());
    hub.shutdown();
}

#[test]
fn model_updates_persist_the_intent_even_when_rejected() {
    let cache_path = temp_cache_path("model-update");
    let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(
        MockScanner::new(vec![device.clone()]),
        HubConfig {
            cache_path: Some(cache_path.clone()),
            default_model: String::new(),
        },
    )
    .unwrap();
    let toy = connect_one(&hub, "Lush");

    // A valid update changes the session and the cache.
    hub.update_model_name("AA:01", "Nora").unwrap();
    assert_eq!(toy.model_name(), "Nora");

    // An invalid update is rejected but the cache keeps the intent.
    let error = hub.update_model_name("AA:01", "Toaster").unwrap_err();
    assert!(matches!(error, Error::Validation { .. }));
    assert_eq!(toy.model_name(), "Nora");

    let contents = std::fs::read_to_string(&cache_path).unwrap();
    let entries: HashMap<String, String> = serde_json::from_str(&contents).unwrap();
    assert_eq!(entries.get("LVS-A").map(String::as_str), Some("Toaster"));

    assert!(matches!(
        hub.update_model_name("AA:99", "Lush"),
        Err(Error::UnknownToy(_))
    ));

    hub.shutdown();
    let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
}

#[test]
fn cached_models_fill_in_on_rediscovery() {
    let cache_path = temp_cache_path("rediscovery");
    let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
    let config = HubConfig {
        cache_path: Some(cache_path.clone()),
        default_model: String::new(),
    };

    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), config.clone()).unwrap();
    let _toy = connect_one(&hub, "Lush");
    hub.shutdown();

    let hub = ToyHub::new(MockScanner::new(vec![device]), config).unwrap();
    let toys = hub.discover_toys_blocking(Duration::from_secs(1)).unwrap();
    assert_eq!(toys[0].model_name, "Lush");
    hub.shutdown();
    let _ = std::fs::remove_dir_all(cache_path.parent().unwrap());
}

#[test]
fn connected_toys_are_not_rediscovered() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let _toy = connect_one(&hub, "Lush");

    let toys = hub.discover_toys_blocking(Duration::from_secs(1)).unwrap();
    assert!(toys.is_empty());

    hub.shutdown();
}

#[test]
fn callback_discovery_and_connect_mirror_the_blocking_path() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();

    let (tx, rx) = mpsc::channel();
    hub.discover_toys_callback(
        move |outcome| {
            let _ = tx.send(outcome);
        },
        Duration::from_secs(1),
    );
    let mut toys = rx.recv_timeout(Duration::from_secs(3)).unwrap().unwrap();
    assert_eq!(toys.len(), 1);
    toys[0].model_name = "Lush".to_string();

    let (tx, rx) = mpsc::channel();
    hub.connect_toys_callback(
        &toys,
        move |outcome| {
            let _ = tx.send(outcome);
        },
        CONNECT_TIMEOUT,
    );
    let outcomes = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_ok());
    assert!(device.connected_now());

    hub.shutdown();
}

#[test]
fn unexpected_disconnects_recover_and_drain_queued_commands() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let toy = connect_one(&hub, "Lush");

    let disconnects = Arc::new(AtomicUsize::new(0));
    let reconnects = Arc::new(AtomicUsize::new(0));
    let disconnect_counter = disconnects.clone();
    let reconnect_counter = reconnects.clone();
    hub.set_on_disconnect(Some(Arc::new(move |_id: &str| {
        disconnect_counter.fetch_add(1, Ordering::SeqCst);
    })));
    hub.set_on_reconnection_success(Some(Arc::new(move |_id: &str| {
        reconnect_counter.fetch_add(1, Ordering::SeqCst);
    })));

    device.fire_disconnect();
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(!toy.connected());

    // A command issued while the toy is away queues instead of dropping.
    let (tx, rx) = mpsc::channel();
    toy.intensity1(
        9,
        Some(Box::new(move |acknowledged| {
            let _ = tx.send(acknowledged);
        })),
    );

    // Grace period is one second; the queued command drains after that.
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    assert!(toy.connected());
    assert!(device.written_commands().contains(&"Vibrate:9;".to_string()));

    hub.shutdown();
}

#[test]
fn failed_reconnects_give_the_toy_up() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let _toy = connect_one(&hub, "Lush");

    let failures = Arc::new(AtomicUsize::new(0));
    let failure_counter = failures.clone();
    hub.set_on_reconnection_failure(Some(Arc::new(move |_id: &str| {
        failure_counter.fetch_add(1, Ordering::SeqCst);
    })));

    device.set_refuse_connect(true);
    device.fire_disconnect();

    assert!(wait_for(
        || failures.load(Ordering::SeqCst) == 1,
        Duration::from_secs(5),
    ));
    assert!(matches!(
        hub.update_model_name("AA:01", "Lush"),
        Err(Error::UnknownToy(_))
    ));

    hub.shutdown();
}

#[test]
fn power_off_notifies_exactly_once_and_unregisters() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    let _toy = connect_one(&hub, "Lush");

    let power_offs = Arc::new(AtomicUsize::new(0));
    let counter = power_offs.clone();
    hub.set_on_power_off(Some(Arc::new(move |_id: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    device.emit_notification(b"PowerOff;");
    assert_eq!(power_offs.load(Ordering::SeqCst), 1);
    assert!(matches!(
        hub.update_model_name("AA:01", "Lush"),
        Err(Error::UnknownToy(_))
    ));

    // The background teardown finishes and nothing fires a second time.
    assert!(wait_for(
        || !device.connected_now(),
        Duration::from_secs(3),
    ));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(power_offs.load(Ordering::SeqCst), 1);

    hub.shutdown();
}

#[test]
fn the_loop_stops_with_the_last_toy() {
    let device = MockDevice::new("LVS-A", "AA:01");
    let hub = ToyHub::new(MockScanner::new(vec![device.clone()]), HubConfig::default()).unwrap();
    assert!(!hub.is_running());

    let _toy = connect_one(&hub, "Lush");
    assert!(hub.is_running());

    let results = hub
        .disconnect_toys_blocking(&["AA:01".to_string()], Duration::from_secs(5))
        .unwrap();
    assert!(results[0].is_ok());
    assert!(!hub.is_running());
    assert!(!device.connected_now());

    // Unknown ids fail in place without affecting the batch shape.
    let results = hub
        .disconnect_toys_blocking(&["AA:99".to_string()], Duration::from_secs(5))
        .unwrap();
    assert!(matches!(results[0], Err(Error::UnknownToy(_))));

    hub.shutdown();
}
