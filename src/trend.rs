use crate::snapshot::TrendSample;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug, Default)]
struct TrendState {
    last_recorded: Option<i64>,
    window: VecDeque<TrendSample>,
}

/// Rolling window of one metric, sampled at most once per interval no matter
/// how often `observe` is called.
#[derive(Debug)]
pub struct TrendRecorder {
    interval_secs: i64,
    capacity: usize,
    state: Mutex<TrendState>,
}

impl TrendRecorder {
    pub fn new(interval_secs: u64, capacity: usize) -> Self {
        Self {
            interval_secs: interval_secs as i64,
            capacity,
            state: Mutex::new(TrendState {
                last_recorded: None,
                window: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Returns whether the value was recorded.
    pub fn observe(&self, value: f64, now_unix: i64) -> bool {
        let mut state = self.state.lock();
        if let Some(last) = state.last_recorded {
            if now_unix - last < self.interval_secs {
                return false;
            }
        }

        while state.window.len() >= self.capacity {
            state.window.pop_front();
        }
        state.window.push_back(TrendSample {
            value,
            timestamp: now_unix,
        });
        state.last_recorded = Some(now_unix);
        true
    }

    /// Copy of the window, oldest first.
    pub fn samples(&self) -> Vec<TrendSample> {
        self.state.lock().window.iter().copied().collect()
    }
}
