use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Shared cooperative cancellation flag.
///
/// Loops check it once per iteration; signal handlers call [`RunFlag::stop`].
#[derive(Debug, Clone)]
pub struct RunFlag {
    running: Arc<AtomicBool>,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Time left in a cycle of length `period` after `elapsed` of work.
///
/// Overrunning cycles get zero, never a negative duration.
pub fn sleep_budget(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Wall-clock fixed-period scheduler for polling loops.
#[derive(Debug, Clone, Copy)]
pub struct FixedRate {
    period: Duration,
}

impl FixedRate {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn from_hz(rate_hz: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1))))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts timing one cycle.
    pub fn begin(&self) -> CycleTimer {
        CycleTimer {
            period: self.period,
            started: Instant::now(),
        }
    }
}

/// Measures one loop iteration and sleeps out the rest of its period.
#[derive(Debug)]
pub struct CycleTimer {
    period: Duration,
    started: Instant,
}

impl CycleTimer {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        sleep_budget(self.period, self.elapsed())
    }

    /// Sleeps for the remainder of the period and returns how long that was.
    pub fn finish(self) -> Duration {
        let pause = self.remaining();
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        pause
    }
}

/// Lets an event through at most once per `period`.
#[derive(Debug, Clone)]
pub struct Throttle {
    period: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Returns `true` and records `now` if the previous accepted event is at
    /// least one period old.
    pub fn ready_at(&mut self, now: Instant) -> bool {
        let ready = self
            .last
            .map(|last| now.saturating_duration_since(last) >= self.period)
            .unwrap_or(true);
        if ready {
            self.last = Some(now);
        }
        ready
    }

    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }
}
