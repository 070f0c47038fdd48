//! Nonce Manager Module
//!
//! Sequence number allocation for the single treasury account.

// Submodules
pub mod allocator;
pub mod nonce_errors;

// Re-exports for convenience
pub use allocator::{AccountNonceAllocator, NonceState};
pub use nonce_errors::{NonceError, NonceResult};
