//! Structured logging and pipeline context

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Structured logger for submission lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
}

impl StructuredLogger {
    pub fn new(context_id: String) -> Self {
        Self { context_id }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_candidate_matched(&self, hash: &B256, to: Option<&Address>, value_eth: f64) {
        tracing::debug!(
            context_id = %self.context_id,
            candidate = %hash,
            to = ?to,
            value_eth = %value_eth,
            "Candidate matched"
        );
    }

    pub fn log_submission_attempt(&self, kind: &str, to: &Address, value_eth: f64, nonce: u64) {
        tracing::info!(
            context_id = %self.context_id,
            kind = %kind,
            to = %to,
            value_eth = %value_eth,
            nonce = %nonce,
            "Submitting transaction"
        );
    }

    pub fn log_submission_accepted(&self, hash: &B256, endpoint: &str) {
        tracing::info!(
            context_id = %self.context_id,
            tx_hash = %hash,
            endpoint = %endpoint,
            "Transaction accepted"
        );
    }

    pub fn log_confirmation(&self, hash: &B256, success: bool, block: Option<u64>, latency_ms: u64) {
        if success {
            tracing::info!(
                context_id = %self.context_id,
                tx_hash = %hash,
                block = ?block,
                latency_ms = %latency_ms,
                "Transaction confirmed"
            );
        } else {
            tracing::warn!(
                context_id = %self.context_id,
                tx_hash = %hash,
                block = ?block,
                latency_ms = %latency_ms,
                "Transaction reverted"
            );
        }
    }

    pub fn log_submission_failure(&self, hash: Option<&B256>, reason: &str, latency_ms: u64) {
        tracing::warn!(
            context_id = %self.context_id,
            tx_hash = ?hash,
            reason = %reason,
            latency_ms = %latency_ms,
            "Submission failed"
        );
    }

    pub fn log_nonce_operation(&self, operation: &str, nonce: Option<u64>, success: bool) {
        tracing::debug!(
            context_id = %self.context_id,
            operation = %operation,
            nonce = ?nonce,
            success = %success,
            "Nonce operation"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            message = %message,
            "Warning"
        );
    }
}

/// Execution context carried through one submission or request
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Unique request ID
    pub request_id: String,

    /// Trace ID shared by parent and child contexts
    pub trace_id: String,

    pub span_id: String,

    pub parent_span_id: Option<String>,

    /// Operation name
    pub operation: String,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    pub logger: StructuredLogger,
}

impl PipelineContext {
    /// Create a new pipeline context
    pub fn new(operation: &str) -> Self {
        let request_id = Uuid::new_v4().to_string();

        Self {
            request_id: request_id.clone(),
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            operation: operation.to_string(),
            timestamp: Utc::now(),
            logger: StructuredLogger::new(request_id),
        }
    }

    /// Create a child context, e.g. one withdrawal leg of a request
    pub fn child(&self, operation: &str) -> Self {
        Self {
            request_id: self.request_id.clone(),
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            timestamp: Utc::now(),
            logger: self.logger.clone(),
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new("default")
    }
}
