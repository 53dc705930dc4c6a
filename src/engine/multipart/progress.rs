//! Progress aggregation across concurrent part transfers
//!
//! Each part reports its own cumulative byte count. The aggregator sums them
//! under a lock and invokes the caller's callback at most once per throttle
//! window, plus once unconditionally from [`ProgressAggregator::finish`].
//! Reported totals never exceed the declared total.

use crate::types::ProgressFn;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct ProgressState {
    parts: HashMap<usize, u64>,
    last_emit: Option<Instant>,
}

pub(crate) struct ProgressAggregator {
    state: Mutex<ProgressState>,
    callback: Option<ProgressFn>,
    total: u64,
    interval: Duration,
}

impl ProgressAggregator {
    pub(crate) fn new(callback: Option<ProgressFn>, total: u64, interval: Duration) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                parts: HashMap::new(),
                last_emit: None,
            }),
            callback,
            total,
            interval,
        }
    }

    /// Record that part `index` has written `written` bytes so far
    pub(crate) fn update(&self, index: usize, written: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.parts.insert(index, written);

        let Some(callback) = &self.callback else {
            return;
        };

        let now = Instant::now();
        let due = state
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return;
        }
        state.last_emit = Some(now);

        // Emitted under the lock so reports stay monotonic
        callback(self.capped(&state), self.total);
    }

    /// Emit the final total regardless of the throttle window
    pub(crate) fn finish(&self) {
        let Some(callback) = &self.callback else {
            return;
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_emit = Some(Instant::now());
        callback(self.capped(&state), self.total);
    }

    /// Sum of all parts, capped at the declared total
    pub(crate) fn written(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.capped(&state)
    }

    fn capped(&self, state: &ProgressState) -> u64 {
        let sum: u64 = state.parts.values().sum();
        if self.total > 0 { sum.min(self.total) } else { sum }
    }
}
