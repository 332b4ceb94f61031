use std::time::Duration;

/// Configures timeouts, retry behavior and long-request polling.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Fixed pause between attempts when `delay_before_retry` is set.
    pub retry_interval_ms: u64,
    /// Whether to pause `retry_interval_ms` before resending a failed request.
    pub delay_before_retry: bool,
    /// Base delay of the long-request poll loop in milliseconds.
    pub poll_delay_ms: u64,
    /// Upper bound for the poll delay in milliseconds.
    pub max_poll_delay_ms: u64,
    /// Multiplicative growth applied to the poll delay on every iteration.
    pub poll_delay_factor: f64,
    /// Largest response body accepted, in bytes.
    pub max_content_length: usize,
    /// Optional overall deadline for one long request. `None` polls until a
    /// terminal status is reached.
    pub poll_deadline_ms: Option<u64>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 300_000,
            max_retries: 1,
            retry_interval_ms: 500,
            delay_before_retry: false,
            poll_delay_ms: 2_000,
            max_poll_delay_ms: 10_000,
            poll_delay_factor: 1.5,
            max_content_length: 20 * 1024 * 1024,
            poll_deadline_ms: None,
        }
    }
}

impl ClientOptions {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub(crate) fn poll_deadline(&self) -> Option<Duration> {
        self.poll_deadline_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::ClientOptions;

    #[test]
    fn defaults_match_service_protocol() {
        let options = ClientOptions::default();
        assert_eq!(options.max_retries, 1);
        assert!(!options.delay_before_retry);
        assert_eq!(options.poll_delay_ms, 2_000);
        assert_eq!(options.max_poll_delay_ms, 10_000);
        assert_eq!(options.poll_delay_factor, 1.5);
        assert_eq!(options.max_content_length, 20 * 1024 * 1024);
        assert_eq!(options.poll_deadline(), None);
    }
}
