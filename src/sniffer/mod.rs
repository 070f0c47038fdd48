//! Pending-transaction sniffer
//!
//! Watches the mempool through the current streaming endpoint, samples and
//! filters what it sees, and hands qualifying observations to the submission
//! pipeline as strikes.

// Sniffer components
pub mod errors; // StreamError, ExponentialBackoff
pub mod prefilter; // sampling admission + opportunity predicate
pub mod supervisor; // connect/subscribe/stall/close state machine

// Re-export commonly used types
pub use errors::{ExponentialBackoff, StreamError};
pub use prefilter::{MinValuePredicate, OpportunityPredicate, SamplingFilter};
pub use supervisor::{StreamState, StreamSupervisor, SupervisorConfig, SupervisorSnapshot};
