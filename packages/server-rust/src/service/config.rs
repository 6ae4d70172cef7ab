use std::time::Duration;

/// Dispatch engine configuration.
///
/// Fixed at startup: the pool is never resized while the manager runs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of workers in the pool.
    pub worker_count: usize,
    /// Capacity of the pending-request queue. Submissions beyond it are rejected.
    pub queue_capacity: usize,
    /// Default caller-side wait for a response, in milliseconds.
    pub request_timeout_ms: u64,
    /// How long `shutdown` waits for the dispatcher and workers to exit, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    /// Smallest accepted `request_timeout_ms`.
    pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

    /// Checks the bounds every running manager relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first field that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count", "must be larger than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity", "must be larger than 0"));
        }
        if self.request_timeout_ms <= Self::MIN_REQUEST_TIMEOUT_MS {
            return Err(ConfigError::Invalid(
                "request_timeout_ms",
                "must be larger than 100",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_count: 20,
            queue_capacity: 2000,
            request_timeout_ms: 10_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field has a value outside its accepted range.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
