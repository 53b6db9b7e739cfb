//! Controller configuration.

use std::time::Duration;

/// Tunables for the extraction controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay between status polls once the progress feed has failed.
    ///
    /// Default: 5 seconds.
    pub poll_interval: Duration,

    /// Status polls allowed before the job is marked as timed out. At least
    /// one poll is always made; zero is treated as one.
    ///
    /// Default: 60 (five minutes at the default interval).
    pub max_poll_attempts: u32,

    /// Largest PDF accepted for upload, in bytes.
    ///
    /// Default: 10 MiB, matching the server's limit.
    pub max_upload_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ControllerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.max_poll_attempts = attempts.max(1);
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Upper bound on how long polling can run before giving up.
    pub fn polling_budget(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts.max(1)
    }
}

/// Render a poll interval for log and error text, e.g. `5s`, `1.5s`, `250ms`.
pub fn format_interval(interval: Duration) -> String {
    let millis = interval.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{:.1}s", interval.as_secs_f64())
    }
}
