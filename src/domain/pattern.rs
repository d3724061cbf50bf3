//! Pattern playback state machine.
//!
//! A pattern is an ordered list of timed intensity segments. The player keeps
//! the elapsed-time accounting (frozen while paused), the pause/block flags
//! and the per-channel dedup state, and tells the controller what to send on
//! each tick. It performs no I/O itself.

use std::time::Instant;

/// One pattern step: hold the given intensities for `duration_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSegment {
    pub duration_ms: u64,
    pub intensity1: i32,
    pub intensity2: i32,
}

impl PatternSegment {
    pub fn new(duration_ms: u64, intensity1: i32, intensity2: i32) -> Self {
        Self {
            duration_ms,
            intensity1,
            intensity2,
        }
    }
}

/// What the controller should do for the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing to send this frame.
    Idle,
    /// First frame in a paused/blocked state: silence the toy once.
    SendStop,
    /// Send the channels whose target changed since the last transmission.
    SetLevels {
        intensity1: Option<i32>,
        intensity2: Option<i32>,
    },
}

#[derive(Debug)]
pub struct PatternPlayer {
    segments: Vec<PatternSegment>,
    wraparound: bool,
    paused: bool,
    blocked: bool,
    /// Elapsed pattern time committed so far, excluding the running segment.
    elapsed_ms: u64,
    /// Wall-clock start of the running stretch; `None` while paused or idle.
    segment_start: Option<Instant>,
    last_sent: (Option<i32>, Option<i32>),
    stop_latched: bool,
}

impl Default for PatternPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternPlayer {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            wraparound: true,
            paused: false,
            blocked: false,
            elapsed_ms: 0,
            segment_start: None,
            last_sent: (None, None),
            stop_latched: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn has_pattern(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Replace the pattern atomically. With `reset_time` false the elapsed
    /// position carries over and is reinterpreted against the new segments.
    ///
    /// Returns true when the caller must issue a stop command (the new
    /// pattern is empty, leaving the toy under manual control only).
    pub fn set_pattern(
        &mut self,
        segments: Vec<PatternSegment>,
        wraparound: bool,
        reset_time: bool,
    ) -> bool {
        self.segments = segments;
        self.wraparound = wraparound;
        if reset_time {
            self.restart();
        }
        self.segments.is_empty()
    }

    fn restart(&mut self) {
        self.elapsed_ms = 0;
        self.segment_start = Some(Instant::now());
    }

    /// Pause <-> resume. Pausing freezes the elapsed accounting and clears a
    /// block; the two flags are never both set. Returns the new pause state.
    pub fn toggle_pause(&mut self) -> bool {
        if !self.paused {
            self.set_paused(true);
            self.blocked = false;
            true
        } else {
            self.set_paused(false);
            false
        }
    }

    /// Block <-> unblock. Blocking clears a pause; the pattern clock keeps
    /// running but nothing is sent. Returns the new block state.
    pub fn toggle_block(&mut self) -> bool {
        if !self.blocked {
            self.blocked = true;
            self.set_paused(false);
            true
        } else {
            self.blocked = false;
            false
        }
    }

    /// A manual command while a pattern is running pauses playback so the
    /// next tick does not immediately overwrite the manual level.
    pub fn pause_for_manual(&mut self) {
        if self.has_pattern() && !self.paused && !self.blocked {
            self.set_paused(true);
        }
    }

    fn set_paused(&mut self, paused: bool) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;
        if paused {
            if let Some(start) = self.segment_start.take() {
                self.elapsed_ms += start.elapsed().as_millis() as u64;
            }
        } else {
            self.segment_start = Some(Instant::now());
        }
    }

    /// Elapsed pattern time in milliseconds. Frozen while paused; zero while
    /// no pattern has ever been started.
    pub fn pattern_time(&self) -> u64 {
        if self.paused {
            return self.elapsed_ms;
        }
        match self.segment_start {
            Some(start) => self.elapsed_ms + start.elapsed().as_millis() as u64,
            None => 0,
        }
    }

    /// Intensities at pattern position `time_ms`. Wraparound patterns repeat
    /// with period = total duration; finite patterns return (0, 0) at and
    /// past their end, as do empty and zero-length patterns.
    pub fn values_at(&self, time_ms: u64) -> (i32, i32) {
        if self.segments.is_empty() {
            return (0, 0);
        }
        let total: u64 = self.segments.iter().map(|s| s.duration_ms).sum();
        if total == 0 {
            return (0, 0);
        }
        let position = if self.wraparound {
            time_ms % total
        } else if time_ms >= total {
            return (0, 0);
        } else {
            time_ms
        };
        let mut elapsed = 0u64;
        for segment in &self.segments {
            if position < elapsed + segment.duration_ms {
                return (segment.intensity1, segment.intensity2);
            }
            elapsed += segment.duration_ms;
        }
        match self.segments.last() {
            Some(segment) => (segment.intensity1, segment.intensity2),
            None => (0, 0),
        }
    }

    /// Advance one frame.
    pub fn tick(&mut self) -> TickAction {
        if self.segments.is_empty() {
            return TickAction::Idle;
        }
        if self.paused || self.blocked {
            if self.stop_latched {
                return TickAction::Idle;
            }
            self.stop_latched = true;
            self.last_sent = (None, None);
            return TickAction::SendStop;
        }
        self.stop_latched = false;

        let (intensity1, intensity2) = self.values_at(self.pattern_time());
        let send1 = (self.last_sent.0 != Some(intensity1)).then_some(intensity1);
        let send2 = (self.last_sent.1 != Some(intensity2)).then_some(intensity2);
        if send1.is_some() {
            self.last_sent.0 = Some(intensity1);
        }
        if send2.is_some() {
            self.last_sent.1 = Some(intensity2);
        }
        if send1.is_none() && send2.is_none() {
            TickAction::Idle
        } else {
            TickAction::SetLevels {
                intensity1: send1,
                intensity2: send2,
            }
        }
    }
}
