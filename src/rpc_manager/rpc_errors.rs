use thiserror::Error;

/// RPC Manager error types
///
/// Every network round trip made by the engine resolves into one of these.
/// Classification drives recovery: endpoint faults rotate the request-response
/// endpoint, nonce conflicts invalidate the allocator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcManagerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Response could not be decoded into the expected shape
    #[error("Malformed response: {message} (endpoint: {endpoint})")]
    MalformedResponse { endpoint: String, message: String },

    /// Submitted sequence number disagrees with the network
    #[error("Nonce conflict: {message} (endpoint: {endpoint})")]
    NonceConflict { endpoint: String, message: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result alias for RPC operations
pub type RpcResult<T> = Result<T, RpcManagerError>;

/// JSON-RPC error code used by several providers for request quota exhaustion
const LIMIT_EXCEEDED_CODE: i64 = -32005;

impl RpcManagerError {
    /// Check if this error is retryable.
    ///
    /// True exactly for faults of the endpoint rather than the request, which
    /// is also the rotation rule for the request-response pool.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcManagerError::Transport { .. } => true,
            RpcManagerError::Timeout { .. } => true,
            RpcManagerError::RateLimitExceeded { .. } => true,
            RpcManagerError::MalformedResponse { .. } => true,

            RpcManagerError::NonceConflict { .. } => false,
            RpcManagerError::InsufficientFunds { .. } => false,
            RpcManagerError::Configuration(_) => false,

            // Retry on server errors (5xx)
            RpcManagerError::RpcResponse { code, .. } => {
                matches!(code, Some(c) if (500..600).contains(c))
            }
        }
    }

    /// Endpoint-side throttling
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RpcManagerError::RateLimitExceeded { .. })
    }

    pub fn is_nonce_conflict(&self) -> bool {
        matches!(self, RpcManagerError::NonceConflict { .. })
    }

    /// Endpoint that produced this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcManagerError::Transport { endpoint, .. } => Some(endpoint),
            RpcManagerError::Timeout { endpoint, .. } => Some(endpoint),
            RpcManagerError::RateLimitExceeded { endpoint } => Some(endpoint),
            RpcManagerError::RpcResponse { endpoint, .. } => Some(endpoint),
            RpcManagerError::MalformedResponse { endpoint, .. } => Some(endpoint),
            RpcManagerError::NonceConflict { endpoint, .. } => Some(endpoint),
            RpcManagerError::InsufficientFunds { endpoint } => Some(endpoint),
            RpcManagerError::Configuration(_) => None,
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            RpcManagerError::Transport { .. } => "transport",
            RpcManagerError::Timeout { .. } => "timeout",
            RpcManagerError::RateLimitExceeded { .. } => "rate_limited",
            RpcManagerError::RpcResponse { .. } => "rpc_response",
            RpcManagerError::MalformedResponse { .. } => "malformed",
            RpcManagerError::NonceConflict { .. } => "nonce_conflict",
            RpcManagerError::InsufficientFunds { .. } => "insufficient_funds",
            RpcManagerError::Configuration(_) => "configuration",
        }
    }

    /// Classify a JSON-RPC error object returned by an endpoint.
    ///
    /// Node implementations disagree on codes, so the message text is the
    /// primary signal, as with the client error strings of other chains.
    pub fn classify(endpoint: &str, code: Option<i64>, message: &str) -> Self {
        let msg = message.to_lowercase();
        let endpoint = endpoint.to_string();

        if msg.contains("nonce too low")
            || msg.contains("nonce too high")
            || msg.contains("invalid nonce")
            || msg.contains("nonce has already been used")
            || msg.contains("already known")
            || msg.contains("replacement transaction underpriced")
        {
            RpcManagerError::NonceConflict {
                endpoint,
                message: message.to_string(),
            }
        } else if msg.contains("insufficient funds") {
            RpcManagerError::InsufficientFunds { endpoint }
        } else if code == Some(LIMIT_EXCEEDED_CODE)
            || msg.contains("rate limit")
            || msg.contains("too many requests")
            || msg.contains("429")
            || msg.contains("request limit")
        {
            RpcManagerError::RateLimitExceeded { endpoint }
        } else if msg.contains("timeout") || msg.contains("timed out") {
            RpcManagerError::Timeout {
                endpoint,
                timeout_ms: 0,
            }
        } else {
            RpcManagerError::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }

    /// Map a failed HTTP exchange onto the taxonomy
    pub fn from_transport(endpoint: &str, err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            RpcManagerError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms,
            }
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            RpcManagerError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
            }
        } else {
            RpcManagerError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Map a non-success HTTP status onto the taxonomy
    pub fn from_http_status(endpoint: &str, status: u16, body: &str) -> Self {
        if status == 429 {
            RpcManagerError::RateLimitExceeded {
                endpoint: endpoint.to_string(),
            }
        } else {
            RpcManagerError::RpcResponse {
                endpoint: endpoint.to_string(),
                message: format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
                code: Some(status as i64),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(RpcManagerError::Transport {
            endpoint: "test".to_string(),
            message: "connection failed".to_string(),
        }
        .is_retryable());

        assert!(RpcManagerError::Timeout {
            endpoint: "test".to_string(),
            timeout_ms: 5000,
        }
        .is_retryable());

        assert!(!RpcManagerError::Configuration("test".to_string()).is_retryable());
        assert!(!RpcManagerError::NonceConflict {
            endpoint: "test".to_string(),
            message: "nonce too low".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn test_classify_nonce_conflicts() {
        for msg in [
            "nonce too low: next nonce 9, tx nonce 8",
            "Nonce too high",
            "already known",
            "replacement transaction underpriced",
        ] {
            let err = RpcManagerError::classify("https://rpc", Some(-32000), msg);
            assert!(err.is_nonce_conflict(), "{} should be a nonce conflict", msg);
        }
    }

    #[test]
    fn test_classify_rate_limit() {
        let by_code = RpcManagerError::classify("https://rpc", Some(-32005), "limit exceeded");
        assert!(by_code.is_rate_limited());

        let by_text = RpcManagerError::classify("https://rpc", None, "Too Many Requests");
        assert!(by_text.is_rate_limited());

        let by_status = RpcManagerError::from_http_status("https://rpc", 429, "slow down");
        assert!(by_status.is_rate_limited());
    }

    #[test]
    fn test_classify_insufficient_funds_and_fallback() {
        let err = RpcManagerError::classify(
            "https://rpc",
            Some(-32000),
            "insufficient funds for gas * price + value",
        );
        assert_eq!(
            err,
            RpcManagerError::InsufficientFunds {
                endpoint: "https://rpc".to_string()
            }
        );

        let other = RpcManagerError::classify("https://rpc", Some(-32602), "invalid argument 0");
        assert!(matches!(other, RpcManagerError::RpcResponse { code: Some(-32602), .. }));
        assert!(!other.is_retryable());
    }

    #[test]
    fn test_error_endpoint() {
        let err = RpcManagerError::Timeout {
            endpoint: "https://test.com".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.endpoint(), Some("https://test.com"));

        let config_err = RpcManagerError::Configuration("test".to_string());
        assert_eq!(config_err.endpoint(), None);
    }

    #[test]
    fn test_server_errors_retryable() {
        let err = RpcManagerError::from_http_status("https://rpc", 503, "unavailable");
        assert!(err.is_retryable());
        let err = RpcManagerError::from_http_status("https://rpc", 400, "bad request");
        assert!(!err.is_retryable());
    }
}
