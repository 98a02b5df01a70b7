//! Shared time source for the frame loop and the audio device.

use std::{cell::Cell, fmt, rc::Rc, time::Instant};

/// Monotonic time in seconds since the clock's epoch.
pub trait Clock {
    fn now(&self) -> f64;
}

/// One clock handed to every component that needs time.
pub type SharedClock = Rc<dyn Clock>;

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Rc::new(Self::start())
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time_seconds: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.time_seconds.set(0.0);
    }

    pub fn advance(&self, delta: f64) {
        self.time_seconds
            .set((self.time_seconds.get() + delta).max(0.0));
    }

    pub fn set(&self, time_seconds: f64) {
        self.time_seconds.set(time_seconds.max(0.0));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.time_seconds.get()
    }
}

impl fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").field("now", &self.now()).finish()
    }
}

/// Converts frame timestamps into a whole number of fixed-rate logic ticks.
///
/// The elapsed time fed in per frame is capped so a stalled host (e.g. a
/// backgrounded window) does not trigger a long catch-up burst.
#[derive(Debug, Clone)]
pub struct TickAccumulator {
    tick_seconds: f64,
    max_ticks_per_frame: u32,
    last_time: Option<f64>,
    accumulated: f64,
}

impl TickAccumulator {
    pub fn new(tick_rate_hz: u32, max_ticks_per_frame: u32) -> Self {
        Self {
            tick_seconds: 1.0 / tick_rate_hz.max(1) as f64,
            max_ticks_per_frame: max_ticks_per_frame.max(1),
            last_time: None,
            accumulated: 0.0,
        }
    }

    /// Returns how many ticks are due at `now`.
    pub fn advance(&mut self, now: f64) -> u32 {
        if let Some(previous) = self.last_time {
            let cap = self.max_ticks_per_frame as f64 * self.tick_seconds;
            self.accumulated += (now - previous).clamp(0.0, cap);
        }
        self.last_time = Some(now);

        let mut ticks = 0;
        while self.accumulated >= self.tick_seconds && ticks < self.max_ticks_per_frame {
            self.accumulated -= self.tick_seconds;
            ticks += 1;
        }
        ticks
    }

    pub fn reset(&mut self) {
        self.last_time = None;
        self.accumulated = 0.0;
    }
}
