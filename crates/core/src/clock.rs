//! Fixed-rate simulation clock and tick arithmetic.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Simulation tick rate (20 TPS => 50 ms per tick).
pub const TICKS_PER_SECOND: u32 = 20;

/// Milliseconds spanned by a single tick.
pub const TICK_INTERVAL_MS: u64 = 1_000 / TICKS_PER_SECOND as u64;

/// Wall-clock duration of a single tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(TICK_INTERVAL_MS);

/// Fixed tick counter type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

/// Wall-clock duration spanned by `ticks` whole ticks.
pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_millis(ticks * TICK_INTERVAL_MS)
}

/// Whole ticks contained in `elapsed`, rounding down.
pub fn duration_to_ticks(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64 / TICK_INTERVAL_MS
}

/// Ticks spanned by `seconds` of wall-clock time.
pub fn seconds_to_ticks(seconds: u64) -> u64 {
    seconds * TICKS_PER_SECOND as u64
}

/// A tick value as an orderable point on the server timeline.
///
/// Arithmetic returns new values; a timestamp never mutates in place.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ServerTimestamp(pub u64);

impl ServerTimestamp {
    /// Timestamp of the given tick.
    pub fn from_tick(tick: SimTick) -> Self {
        Self(tick.0)
    }

    /// The tick this timestamp refers to.
    pub fn tick(self) -> SimTick {
        SimTick(self.0)
    }

    /// A timestamp `ticks` ticks later.
    pub fn plus_ticks(self, ticks: u64) -> Self {
        Self(self.0 + ticks)
    }

    /// A timestamp `seconds` wall-clock seconds later.
    pub fn plus_seconds(self, seconds: u64) -> Self {
        Self(self.0 + seconds_to_ticks(seconds))
    }
}

/// Authoritative simulation clock.
///
/// Owned by the simulation task; snapshot [`SimTick`] values cross threads,
/// the clock itself does not. Tick scheduling is level-triggered: a stalled
/// scheduler sees [`GameClock::should_tick`] stay true until it has caught up
/// on every owed tick, and the catch-up-vs-drop policy belongs to the caller.
#[derive(Debug)]
pub struct GameClock {
    started: Option<Instant>,
    last_frame: Option<Instant>,
    delta_seconds: f64,
    tick: SimTick,
}

impl GameClock {
    /// A clock that has not been started yet.
    pub fn new() -> Self {
        Self {
            started: None,
            last_frame: None,
            delta_seconds: 0.0,
            tick: SimTick::ZERO,
        }
    }

    /// Begin the monotonic reference point. Calls after the first are ignored.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    fn start_at(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
            self.last_frame = Some(now);
        }
    }

    /// Recompute the frame delta; call once per scheduler iteration.
    ///
    /// Returns the seconds elapsed since the previous call.
    pub fn advance_frame(&mut self) -> f64 {
        self.advance_frame_at(Instant::now())
    }

    fn advance_frame_at(&mut self, now: Instant) -> f64 {
        let last = self.last_frame.replace(now).unwrap_or(now);
        self.delta_seconds = now.saturating_duration_since(last).as_secs_f64();
        self.delta_seconds
    }

    /// Seconds between the two most recent frames.
    pub fn delta_seconds(&self) -> f64 {
        self.delta_seconds
    }

    /// The tick the simulation is currently on.
    pub fn current_tick(&self) -> SimTick {
        self.tick
    }

    /// Current tick as a timeline point.
    pub fn timestamp(&self) -> ServerTimestamp {
        ServerTimestamp::from_tick(self.tick)
    }

    /// Whether the scheduler owes the world at least one tick.
    pub fn should_tick(&self) -> bool {
        self.should_tick_at(Instant::now())
    }

    fn should_tick_at(&self, now: Instant) -> bool {
        let Some(started) = self.started else {
            return false;
        };
        duration_to_ticks(now.saturating_duration_since(started)) > self.tick.0
    }

    /// Apply exactly one tick.
    pub fn tick(&mut self) {
        self.tick = self.tick.advance(1);
    }

    /// Non-negative sleep budget until the next tick comes due.
    pub fn ms_until_next_tick(&self) -> u64 {
        self.ms_until_next_tick_at(Instant::now())
    }

    fn ms_until_next_tick_at(&self, now: Instant) -> u64 {
        let Some(started) = self.started else {
            return 0;
        };
        let due = (self.tick.0 + 1) * TICK_INTERVAL_MS;
        let elapsed = now.saturating_duration_since(started).as_millis() as u64;
        due.saturating_sub(elapsed)
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self::new()
    }
}
