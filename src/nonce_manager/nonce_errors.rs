use crate::rpc_manager::RpcManagerError;
use thiserror::Error;

/// Nonce allocator errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NonceError {
    /// Refreshing the sequence number from the network failed. The allocator
    /// stays `Unknown`; the next allocation tries again.
    #[error("Nonce resync failed: {0}")]
    Resync(#[source] RpcManagerError),
}

/// Result alias for nonce operations
pub type NonceResult<T> = Result<T, NonceError>;

impl NonceError {
    /// The underlying endpoint error
    pub fn rpc_error(&self) -> &RpcManagerError {
        match self {
            NonceError::Resync(inner) => inner,
        }
    }
}

impl From<RpcManagerError> for NonceError {
    fn from(err: RpcManagerError) -> Self {
        NonceError::Resync(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resync_error_exposes_endpoint_error() {
        let err = NonceError::from(RpcManagerError::RateLimitExceeded {
            endpoint: "https://rpc".to_string(),
        });
        assert!(err.rpc_error().is_rate_limited());
        assert_eq!(err.rpc_error().endpoint(), Some("https://rpc"));
        assert!(err.to_string().starts_with("Nonce resync failed"));
    }
}
