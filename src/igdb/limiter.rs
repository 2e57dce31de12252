//! Client-side throttling for one remote source.
//!
//! Two mechanisms, both blocking the calling task:
//! - avoidance: once more than `threshold` calls land in the current window,
//!   every further call in that window waits `avoidance_wait` first
//! - recovery: an HTTP 429 waits `recovery_wait` and retries, up to
//!   `max_attempts` attempts in total

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::config::RateLimitConfig;
use crate::error::RemoteError;

#[derive(Debug)]
struct WindowState {
  started: Instant,
  calls: u32,
  avoiding: bool,
}

/// Rate limiter owned by the client of one remote source.
#[derive(Debug)]
pub struct RateLimiter {
  name: String,
  config: RateLimitConfig,
  state: Mutex<WindowState>,
}

impl RateLimiter {
  pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
    Self {
      name: name.into(),
      config,
      state: Mutex::new(WindowState {
        started: Instant::now(),
        calls: 0,
        avoiding: false,
      }),
    }
  }

  /// Whether calls are currently being delayed.
  pub fn in_avoidance(&self) -> bool {
    self.state().avoiding
  }

  // Counter updates are not atomic with the sleep; throttling is approximate.
  fn state(&self) -> MutexGuard<'_, WindowState> {
    self
      .state
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Count one call against the window, sleeping if in avoidance mode.
  pub async fn acquire(&self) {
    let wait = {
      let mut state = self.state();
      let now = Instant::now();

      if now.duration_since(state.started) >= self.config.window() {
        state.started = now;
        state.calls = 0;
        if state.avoiding {
          state.avoiding = false;
          info!(source = %self.name, "Leaving rate-limit avoidance mode");
        }
      }

      state.calls += 1;
      if state.calls > self.config.threshold {
        if !state.avoiding {
          state.avoiding = true;
          warn!(
            source = %self.name,
            calls = state.calls,
            window_secs = self.config.window_secs,
            wait_ms = self.config.avoidance_wait_ms,
            "Entering rate-limit avoidance mode"
          );
        }
        Some(self.config.avoidance_wait())
      } else {
        None
      }
    };

    if let Some(wait) = wait {
      sleep(wait).await;
    }
  }

  /// Run `op` under the limiter, retrying on HTTP 429.
  ///
  /// Errors other than rate limiting are logged and returned as-is.
  pub async fn execute<T, F, Fut>(&self, endpoint: &str, mut op: F) -> Result<T, RemoteError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
  {
    let max_attempts = self.config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
      self.acquire().await;

      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_rate_limited() && attempt < max_attempts => {
          warn!(
            source = %self.name,
            endpoint,
            attempt,
            max_attempts,
            wait_ms = self.config.recovery_wait_ms,
            "Rate limited, retrying after recovery wait"
          );
          sleep(self.config.recovery_wait()).await;
          attempt += 1;
        }
        Err(e) if e.is_rate_limited() => {
          error!(source = %self.name, endpoint, attempt, "Rate limited, giving up");
          return Err(e);
        }
        Err(e) => {
          error!(source = %self.name, endpoint, error = %e, "Remote request failed");
          return Err(e);
        }
      }
    }
  }
}
