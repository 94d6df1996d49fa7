//! Request budget for the Azure DevOps REST API.
//!
//! Azure DevOps throttles clients per sliding window. The limiter below
//! approximates that with a fixed window: once `max_requests` calls have been
//! granted, the next caller waits until `window` has passed since the window
//! opened, then a fresh window starts. It only has to keep the sync under
//! quota, not maximise throughput.
//!
//! See <https://learn.microsoft.com/en-us/azure/devops/integrate/concepts/rate-limits>.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Requests granted per window when nothing else is configured.
pub const DEFAULT_MAX_REQUESTS: u32 = 200;

/// Window length when nothing else is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(500);

#[derive(Debug)]
struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window limiter; call [`RateLimiter::acquire`] right before every request.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    // Held across the wait so a reset can never race with another acquire.
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(Window {
                count: 0,
                started: Instant::now(),
            }),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more request fits in the budget and books it.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        if state.count >= self.max_requests {
            let elapsed = state.started.elapsed();
            if elapsed < self.window {
                let wait = self.window - elapsed;
                warn!(
                    wait_secs = wait.as_secs_f64(),
                    max_requests = self.max_requests,
                    "Request budget exhausted, waiting for the rate-limit window to reset"
                );
                sleep(wait).await;
            }
            state.count = 0;
            state.started = Instant::now();
            debug!("Rate-limit window reset");
        }

        state.count += 1;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}
