//! Playback progress over a history range

use chrono::{DateTime, Duration, Utc};

/// Number of progress steps over the whole range
const STEPS: i64 = 100;

/// Converts simulated market time into a 0-100 percentage, reporting only
/// when the clock crosses the next hundredth of the range or reaches the end.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    step: Duration,
    next: DateTime<Utc>,
}

impl ProgressTracker {
    /// Track progress from `start` to `stop`
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        let step = (stop - start) / STEPS as i32;
        // ranges shorter than a hundred microseconds would never advance
        let step = step.max(Duration::microseconds(1));

        Self {
            start,
            stop,
            step,
            next: start + step,
        }
    }

    /// Width of one percent
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Feed the simulated clock. Returns the new percentage when a boundary
    /// was crossed.
    pub fn on_market_time(&mut self, now: DateTime<Utc>) -> Option<u8> {
        if now < self.next && now < self.stop {
            return None;
        }

        let elapsed = (now - self.start).num_microseconds().unwrap_or(i64::MAX);
        let step = self.step.num_microseconds().unwrap_or(i64::MAX).max(1);
        let steps = (elapsed.max(0) / step).saturating_add(1);

        self.next = self.start + self.step * steps.min(i32::MAX as i64) as i32;
        Some(steps.clamp(0, STEPS) as u8)
    }

    /// Progress to report once playback finished
    pub fn finish(&self) -> u8 {
        STEPS as u8
    }
}
