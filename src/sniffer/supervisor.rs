//! Lifecycle supervisor for the pending-transaction subscription
//!
//! Manages:
//! - Connecting to the current streaming endpoint and subscribing
//! - Heartbeat liveness: silence longer than the stall threshold tears the
//!   session down and rotates to the next endpoint
//! - Transport close: rotate, wait the fixed reconnect delay, reconnect
//! - Connect failures: rotate, back off exponentially, reconnect
//! - Admission sampling, descriptor lookup, predicate, strike hand-off
//!
//! The supervisor loops until its shutdown signal fires. Candidate
//! evaluations run on their own tasks so a lookup or confirmation wait never
//! blocks the receive loop. At most `MAX_INFLIGHT_EVALUATIONS` lookups run at
//! once; hashes arriving past that are shed.

use super::errors::ExponentialBackoff;
use super::prefilter::{OpportunityPredicate, SamplingFilter};
use crate::metrics::metrics;
use crate::rpc_manager::{ChainRpc, EndpointKind, EndpointPool};
use crate::streaming::{PendingTxStream, StreamConnector, StreamEvent};
use crate::structured_logging::PipelineContext;
use crate::submission::{CreditRule, Submitter};
use crate::types::{wei_to_eth_f64, FeePolicy, TransferIntent};
use alloy::primitives::{Address, B256, U256};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Bound on concurrent descriptor lookups
pub const MAX_INFLIGHT_EVALUATIONS: usize = 64;

/// Subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum StreamState {
    /// Opening a subscription on the current endpoint
    Connecting = 0,
    /// Receiving pending transactions
    Subscribed = 1,
    /// Liveness check fired; rotating
    Stalled = 2,
    /// Transport closed or connect failed; waiting to reconnect
    Closed = 3,
    /// Shutdown signal received
    Stopped = 4,
}

impl From<u8> for StreamState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Subscribed,
            2 => Self::Stalled,
            3 => Self::Closed,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Silence after which a subscription is considered dead
    pub stall_threshold: Duration,
    pub liveness_check_interval: Duration,
    /// Wait after a transport close before reconnecting
    pub reconnect_delay: Duration,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Strike destination
    pub router: Address,
    /// Strike amount in wei
    pub strike_value: U256,
    pub strike_fees: FeePolicy,
    /// Ledger credit per confirmed strike
    pub strike_credit_usd: f64,
}

/// Counters for status and tests
#[derive(Debug, Default)]
pub struct SupervisorStats {
    pub connects: AtomicU64,
    pub connect_failures: AtomicU64,
    pub closes: AtomicU64,
    pub stalls: AtomicU64,
    pub seen: AtomicU64,
    pub admitted: AtomicU64,
    /// Admitted but dropped because the lookup bound was reached
    pub shed: AtomicU64,
    pub matched: AtomicU64,
    pub strikes_confirmed: AtomicU64,
}

/// Point-in-time copy of `SupervisorStats`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SupervisorSnapshot {
    pub connects: u64,
    pub connect_failures: u64,
    pub closes: u64,
    pub stalls: u64,
    pub seen: u64,
    pub admitted: u64,
    pub shed: u64,
    pub matched: u64,
    pub strikes_confirmed: u64,
}

impl SupervisorStats {
    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            seen: self.seen.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            strikes_confirmed: self.strikes_confirmed.load(Ordering::Relaxed),
        }
    }
}

/// Why a subscription session ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Stalled,
    Closed(Option<String>),
    Shutdown,
}

pub struct StreamSupervisor {
    config: SupervisorConfig,
    pool: Arc<EndpointPool>,
    connector: Arc<dyn StreamConnector>,
    rpc: Arc<dyn ChainRpc>,
    submitter: Arc<dyn Submitter>,
    predicate: Arc<dyn OpportunityPredicate>,
    sampler: SamplingFilter,
    state: AtomicU8,
    /// Last qualifying observation
    heartbeat: Mutex<Instant>,
    /// Bumped on every subscribe; evaluations from older sessions do not
    /// count toward the current session's liveness
    session_epoch: AtomicU64,
    evaluations: Arc<Semaphore>,
    stats: SupervisorStats,
}

impl StreamSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SupervisorConfig,
        pool: Arc<EndpointPool>,
        connector: Arc<dyn StreamConnector>,
        rpc: Arc<dyn ChainRpc>,
        submitter: Arc<dyn Submitter>,
        predicate: Arc<dyn OpportunityPredicate>,
        sampler: SamplingFilter,
    ) -> Self {
        Self {
            config,
            pool,
            connector,
            rpc,
            submitter,
            predicate,
            sampler,
            state: AtomicU8::new(StreamState::Connecting as u8),
            heartbeat: Mutex::new(Instant::now()),
            session_epoch: AtomicU64::new(0),
            evaluations: Arc::new(Semaphore::new(MAX_INFLIGHT_EVALUATIONS)),
            stats: SupervisorStats::default(),
        }
    }

    /// Get current state
    pub fn state(&self) -> StreamState {
        StreamState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new_state: StreamState) {
        self.state.store(new_state as u8, Ordering::Release);
        debug!("Stream supervisor state changed to {:?}", new_state);
    }

    pub fn stats(&self) -> SupervisorSnapshot {
        self.stats.snapshot()
    }

    fn touch_heartbeat(&self) {
        *self.heartbeat.lock() = Instant::now();
    }

    fn since_heartbeat(&self) -> Duration {
        self.heartbeat.lock().elapsed()
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff =
            ExponentialBackoff::new(self.config.backoff_initial_ms, self.config.backoff_max_ms);
        let m = metrics();

        info!(
            stall_threshold_ms = self.config.stall_threshold.as_millis() as u64,
            sampling_rate = self.sampler.rate(),
            "Stream supervisor started"
        );

        while !*shutdown.borrow() {
            self.set_state(StreamState::Connecting);
            let endpoint = self.pool.current(EndpointKind::Streaming).clone();

            let connected = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.connector.connect(&endpoint) => result,
            };

            let stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                    m.stream_connect_failures.inc();
                    self.set_state(StreamState::Closed);
                    self.pool.advance(EndpointKind::Streaming);

                    let delay = backoff.next_backoff();
                    warn!(
                        endpoint = %endpoint.url,
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Stream connect failed"
                    );
                    if !sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            backoff.reset();
            self.stats.connects.fetch_add(1, Ordering::Relaxed);
            m.stream_connects.inc();
            // A fresh session gets a full stall window
            self.session_epoch.fetch_add(1, Ordering::AcqRel);
            self.touch_heartbeat();
            self.set_state(StreamState::Subscribed);
            info!(endpoint = %endpoint.url, "Stream subscribed");

            match self.clone().session(stream, &mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Stalled => {
                    self.stats.stalls.fetch_add(1, Ordering::Relaxed);
                    m.stream_stalls.inc();
                    self.set_state(StreamState::Stalled);
                    warn!(
                        endpoint = %endpoint.url,
                        silent_ms = self.since_heartbeat().as_millis() as u64,
                        "Stream stalled, rotating"
                    );
                    self.pool.advance(EndpointKind::Streaming);
                }
                SessionEnd::Closed(reason) => {
                    self.stats.closes.fetch_add(1, Ordering::Relaxed);
                    m.stream_closes.inc();
                    self.set_state(StreamState::Closed);
                    warn!(
                        endpoint = %endpoint.url,
                        reason = reason.as_deref().unwrap_or("none"),
                        reconnect_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "Stream closed"
                    );
                    self.pool.advance(EndpointKind::Streaming);
                    if !sleep_or_shutdown(self.config.reconnect_delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(StreamState::Stopped);
        info!("Stream supervisor stopped");
    }

    /// Pump one subscription until it stalls, closes, or shutdown fires
    async fn session(
        self: Arc<Self>,
        mut stream: Box<dyn PendingTxStream>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut liveness = tokio::time::interval(self.config.liveness_check_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        liveness.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return SessionEnd::Shutdown,
                _ = liveness.tick() => {
                    if self.since_heartbeat() > self.config.stall_threshold {
                        return SessionEnd::Stalled;
                    }
                }
                event = stream.next_event() => match event {
                    StreamEvent::PendingTransaction(hash) => self.on_pending(hash),
                    StreamEvent::Closed(reason) => return SessionEnd::Closed(reason),
                },
            }
        }
    }

    fn on_pending(self: &Arc<Self>, hash: B256) {
        self.stats.seen.fetch_add(1, Ordering::Relaxed);
        metrics().candidates_seen.inc();

        if !self.sampler.admit() {
            return;
        }
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);
        metrics().candidates_admitted.inc();

        let permit = match Arc::clone(&self.evaluations).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats.shed.fetch_add(1, Ordering::Relaxed);
                debug!(candidate = %hash, "Evaluation bound reached, shedding");
                return;
            }
        };
        let epoch = self.session_epoch.load(Ordering::Acquire);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.evaluate(hash, epoch, permit).await });
    }

    /// Fetch, judge and possibly strike on one admitted hash observed during
    /// session `epoch`
    async fn evaluate(&self, hash: B256, epoch: u64, permit: OwnedSemaphorePermit) {
        let descriptor = match self.rpc.transaction_by_hash(hash).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return,
            Err(e) => {
                self.pool.rotate_on_error(&e);
                debug!(candidate = %hash, error = %e, "Descriptor lookup failed");
                return;
            }
        };

        if !self.predicate.is_opportunity(&descriptor) {
            return;
        }
        // The bound covers lookups, not confirmation waits
        drop(permit);

        if self.session_epoch.load(Ordering::Acquire) == epoch {
            self.touch_heartbeat();
        }
        self.stats.matched.fetch_add(1, Ordering::Relaxed);
        metrics().candidates_matched.inc();

        let ctx = PipelineContext::new("strike");
        ctx.logger.log_candidate_matched(
            &descriptor.hash,
            descriptor.to.as_ref(),
            wei_to_eth_f64(descriptor.value),
        );

        let intent = TransferIntent::strike(
            self.config.router,
            self.config.strike_value,
            self.config.strike_fees,
        );
        let outcome = self
            .submitter
            .submit(
                &ctx,
                intent,
                CreditRule::Strike {
                    usd: self.config.strike_credit_usd,
                },
            )
            .await;

        if outcome.is_success() {
            self.stats.strikes_confirmed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Sleep for `delay`; false if shutdown fired first
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
