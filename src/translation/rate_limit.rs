/*!
 * Sliding-window admission control.
 *
 * One limiter instance is shared by every translation in the process. Each
 * admitted request leaves a timestamp; a request is admitted while fewer than
 * `max_requests` timestamps fall inside the trailing window.
 */

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;

/// Admission gate placed in front of provider calls
#[async_trait]
pub trait AdmissionControl: Send + Sync + Debug {
    /// Whether a request could be admitted right now
    fn can_admit(&self) -> bool;

    /// How long until a slot frees up; zero when one is free
    fn wait_time(&self) -> Duration;

    /// Suspend until a slot is free, then claim it
    async fn await_admission(&self);
}

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    /// Requests allowed per window; `None` admits everything
    max_requests: Option<usize>,
    /// Length of the trailing window
    window: Duration,
    /// Admission times inside the window, oldest first
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Allow `max_requests` requests per `window`
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: Some(max_requests.max(1)),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// A limiter that never blocks
    pub fn unlimited() -> Self {
        Self {
            max_requests: None,
            window: Duration::ZERO,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Build from an optional per-window limit; `None` or zero disables limiting
    pub fn from_limit(limit: Option<u32>, window: Duration) -> Self {
        match limit {
            Some(limit) if limit > 0 => Self::new(limit as usize, window),
            _ => Self::unlimited(),
        }
    }

    /// Number of admissions inside the current window
    pub fn recent_count(&self) -> usize {
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, Instant::now());
        timestamps.len()
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_locked(&self, timestamps: &VecDeque<Instant>, now: Instant) -> Duration {
        match (self.max_requests, timestamps.front()) {
            (Some(max), Some(oldest)) if timestamps.len() >= max => {
                (*oldest + self.window).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        }
    }

    /// Claim a slot if one is free, otherwise report how long to wait.
    ///
    /// Pruning, the capacity check and recording happen under one lock so
    /// concurrent callers cannot both take the last slot.
    fn try_admit(&self) -> Result<(), Duration> {
        let Some(max) = self.max_requests else {
            return Ok(());
        };

        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);

        if timestamps.len() < max {
            timestamps.push_back(now);
            Ok(())
        } else {
            Err(self.wait_locked(&timestamps, now))
        }
    }
}

#[async_trait]
impl AdmissionControl for SlidingWindowLimiter {
    fn can_admit(&self) -> bool {
        let Some(max) = self.max_requests else {
            return true;
        };
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, Instant::now());
        timestamps.len() < max
    }

    fn wait_time(&self) -> Duration {
        if self.max_requests.is_none() {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        self.prune(&mut timestamps, now);
        self.wait_locked(&timestamps, now)
    }

    async fn await_admission(&self) {
        loop {
            match self.try_admit() {
                Ok(()) => return,
                Err(wait) => {
                    debug!("Rate limit reached, waiting {:?} for admission", wait);
                    // A zero wait means the oldest slot expires this instant
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}
