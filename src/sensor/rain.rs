//! Rain accumulation from a cumulative tip counter.
//!
//! The gauge only knows how many times the bucket has tipped since the
//! device powered up. Turning that into a rate needs the previous count and
//! the time between reads, so this state must live as long as the process.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

// ---

/// Millimetres of rain per bucket tip.
pub const MM_PER_TIP: f64 = 0.2794;

/// The running total starts over after this long.
pub const RESET_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainSample {
    /// Millimetres per second since the previous read.
    pub rate_mm_s: f64,
    /// Millimetres since the start of the current window.
    pub total_mm: f64,
}

#[derive(Debug, Default)]
pub struct RainGauge {
    last: Option<(u64, Instant)>,
    total_mm: f64,
    window_start: Option<Instant>,
}

impl RainGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current tip counter observed at `now`.
    ///
    /// The first call after construction only sets the baseline and reports
    /// a rate of zero. A counter lower than the previous one means the device
    /// reset; it becomes the new baseline.
    pub fn record(&mut self, tips: u64, now: Instant) -> RainSample {
        // ---
        let window_start = *self.window_start.get_or_insert(now);
        if now.duration_since(window_start) >= RESET_AFTER {
            info!(total_mm = self.total_mm, "Resetting daily rain total");
            self.total_mm = 0.0;
            self.window_start = Some(now);
        }

        let rate_mm_s = match self.last {
            Some((prev_tips, prev_at)) if tips >= prev_tips => {
                let mm = (tips - prev_tips) as f64 * MM_PER_TIP;
                self.total_mm += mm;
                let elapsed = now.duration_since(prev_at).as_secs_f64();
                if elapsed > 0.0 {
                    mm / elapsed
                } else {
                    0.0
                }
            }
            Some((prev_tips, _)) => {
                debug!(prev_tips, tips, "Rain tip counter went backwards, rebasing");
                0.0
            }
            None => 0.0,
        };

        self.last = Some((tips, now));
        RainSample {
            rate_mm_s,
            total_mm: self.total_mm,
        }
    }

    pub fn total_mm(&self) -> f64 {
        self.total_mm
    }

    /// The last tip count seen, `None` before the first read.
    pub fn last_tips(&self) -> Option<u64> {
        self.last.map(|(tips, _)| tips)
    }
}
