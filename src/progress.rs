//! Best-effort progress counters and ETA for a running job
//!
//! Nothing here has a correctness role; it only feeds log lines and events.

use std::time::{Duration, Instant};

/// Fetched/total counters for the current run
#[derive(Debug, Clone)]
pub struct ProgressState {
    fetched: u64,
    total: u64,
    start_time: Instant,
}

impl ProgressState {
    /// Start tracking a run that has `total` items to fetch
    pub fn new(total: u64) -> Self {
        Self {
            fetched: 0,
            total,
            start_time: Instant::now(),
        }
    }

    /// Count one more fetched item
    pub fn record_fetched(&mut self) {
        self.fetched += 1;
    }

    /// Items fetched so far
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    /// Items this run has to fetch
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Estimated time until all items are fetched
    pub fn eta(&self) -> Option<Duration> {
        estimate_remaining(self.start_time.elapsed(), self.fetched, self.total)
    }

    /// ETA rounded to whole minutes
    pub fn eta_minutes(&self) -> Option<u64> {
        self.eta().map(|eta| (eta.as_secs_f64() / 60.0).round() as u64)
    }

    /// Human-readable progress line
    pub fn summary_line(&self) -> String {
        match self.eta_minutes() {
            Some(minutes) => format!(
                "fetched {} of {}, about {}m remaining",
                self.fetched, self.total, minutes
            ),
            None => format!("fetched {} of {}", self.fetched, self.total),
        }
    }
}

/// Average time per fetched item multiplied by the items left
///
/// Returns `None` until at least one item has been fetched.
pub fn estimate_remaining(elapsed: Duration, fetched: u64, total: u64) -> Option<Duration> {
    if fetched == 0 {
        return None;
    }
    let remaining = total.saturating_sub(fetched);
    let per_item = elapsed.as_secs_f64() / fetched as f64;
    Some(Duration::from_secs_f64(per_item * remaining as f64))
}
