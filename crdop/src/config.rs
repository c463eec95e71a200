//! Engine configuration.

use std::time::Duration;

/// Settings passed to [`crate::ReconcileEngine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    request_timeout: Duration,
    max_concurrent_operations: usize,
    poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_concurrent_operations: 64,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Zero is treated as one.
    pub fn with_max_concurrent_operations(mut self, max: usize) -> Self {
        self.max_concurrent_operations = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound for a single store call. Expiry is reported as `Transient`.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Operations admitted for their key that may run at the same time. Never zero.
    pub fn max_concurrent_operations(&self) -> usize {
        self.max_concurrent_operations
    }

    /// Interval between reads while waiting for a resource.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let config = EngineConfig::default().with_max_concurrent_operations(0);
        assert_eq!(config.max_concurrent_operations(), 1);
    }

    #[test]
    fn test_setters() {
        let config = EngineConfig::default()
            .with_request_timeout(Duration::from_millis(250))
            .with_max_concurrent_operations(4)
            .with_poll_interval(Duration::from_millis(5));
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_concurrent_operations(), 4);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
    }
}
