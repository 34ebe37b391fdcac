use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use dropkit_protocol::ChunkProgress;

/// Callback invoked once per completed chunk.
pub type ProgressCallback = Arc<dyn Fn(&ChunkProgress) + Send + Sync>;

/// Registered progress listeners.
#[derive(Default)]
pub(crate) struct ProgressListeners {
    callbacks: RwLock<Vec<ProgressCallback>>,
}

impl ProgressListeners {
    pub(crate) fn add(&self, callback: ProgressCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Calls every listener registered at the time of the call.
    ///
    /// The lock is released before any callback runs, so a listener may
    /// register more listeners or tear the coordinator down.
    pub(crate) fn notify(&self, progress: &ChunkProgress) {
        let callbacks: Vec<ProgressCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for cb in &callbacks {
            cb(progress);
        }
    }

    pub(crate) fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Throughput over a sliding time window, used for speed and ETA display.
///
/// Each sample is the number of bytes finished since the previous one.
pub struct SpeedCalculator {
    window: Duration,
    capacity: usize,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl SpeedCalculator {
    /// `window` defaults to 5 s and `capacity` to 100 retained samples.
    pub fn new(window: Option<Duration>, capacity: Option<usize>) -> Self {
        Self {
            window: window.unwrap_or(Duration::from_secs(5)),
            capacity: capacity.unwrap_or(100).max(2),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn add_sample(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push_back((now, bytes));
        while let Some(&(at, _)) = samples.front() {
            let expired = now.duration_since(at) > self.window;
            if expired || samples.len() > self.capacity {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second across the retained samples; 0 until two samples
    /// with distinct timestamps exist.
    pub fn bytes_per_second(&self) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(&(first, _)), Some(&(last, _))) = (samples.front(), samples.back()) else {
            return 0.0;
        };
        let elapsed = last.duration_since(first).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        // The first sample marks the window start, its bytes predate it.
        let bytes: u64 = samples.iter().skip(1).map(|&(_, b)| b).sum();
        bytes as f64 / elapsed
    }

    /// Time left for `remaining_bytes` at the current speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        match self.bytes_per_second() {
            speed if speed > 0.0 => Some(Duration::from_secs_f64(remaining_bytes as f64 / speed)),
            _ => None,
        }
    }

    pub fn reset(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
