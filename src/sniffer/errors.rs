//! Error types and retry policies for the stream supervisor

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Errors raised while opening a pending-transaction subscription
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Endpoint URL could not be used at all
    InvalidEndpoint(String),
    /// Transport-level connection failure
    Connect { endpoint: String, message: String },
    /// Connected, but the subscription request was refused
    Handshake { endpoint: String, message: String },
    /// Handshake did not complete in time
    Timeout { endpoint: String, timeout_ms: u64 },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEndpoint(url) => write!(f, "Invalid streaming endpoint: {}", url),
            Self::Connect { endpoint, message } => {
                write!(f, "Stream connection error: {} (endpoint: {})", message, endpoint)
            }
            Self::Handshake { endpoint, message } => {
                write!(f, "Subscription rejected: {} (endpoint: {})", message, endpoint)
            }
            Self::Timeout {
                endpoint,
                timeout_ms,
            } => write!(f, "Handshake timed out after {}ms (endpoint: {})", timeout_ms, endpoint),
        }
    }
}

impl std::error::Error for StreamError {}

/// Exponential backoff with jitter for retry logic
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current_attempt: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy
    pub fn new(initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            current_attempt: 0,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Get the next backoff duration with jitter (±20%)
    pub fn next_backoff(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.current_attempt).unwrap_or(u64::MAX);
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        self.current_attempt = self.current_attempt.saturating_add(1);

        let jitter = backoff_ms / 5;
        if jitter == 0 {
            return Duration::from_millis(backoff_ms);
        }
        let low = backoff_ms - jitter;
        let high = backoff_ms.saturating_add(jitter);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Get current attempt number
    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let mut backoff = ExponentialBackoff::new(100, 5000);

        let delay1 = backoff.next_backoff();
        assert!(delay1.as_millis() >= 80 && delay1.as_millis() <= 120);

        let delay2 = backoff.next_backoff();
        assert!(delay2.as_millis() >= 160 && delay2.as_millis() <= 240);
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        let delay3 = backoff.next_backoff();
        assert!(delay3.as_millis() >= 80 && delay3.as_millis() <= 120);
    }

    #[test]
    fn test_backoff_max_limit_and_no_overflow() {
        let mut backoff = ExponentialBackoff::new(1000, 5000);
        for _ in 0..100 {
            let delay = backoff.next_backoff();
            assert!(delay.as_millis() <= 6000);
        }
    }

    #[test]
    fn test_tiny_backoff_has_no_jitter() {
        let mut backoff = ExponentialBackoff::new(1, 4);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(2));
    }
}
