//! Test Utilities Module
//!
//! In-memory stand-ins for the chain, the streaming transport and the
//! submission pipeline, so allocator, pipeline and supervisor behavior can be
//! tested deterministically without a network.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::ledger::AccountingLedger;
use crate::nonce_manager::AccountNonceAllocator;
use crate::rpc_manager::{ChainRpc, Endpoint, EndpointPool, RpcManagerError, RpcResult};
use crate::sniffer::errors::StreamError;
use crate::streaming::{PendingTxStream, StreamConnector, StreamEvent};
use crate::structured_logging::PipelineContext;
use crate::submission::{CreditRule, PipelineConfig, SubmissionOutcome, SubmissionPipeline, Submitter};
use crate::tx_builder::{FeeDefaults, TxBuilder};
use crate::types::{TransferIntent, TxDescriptor, TxReceipt};
use crate::wallet::SigningIdentity;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Well-known development key (first account of the default test mnemonic)
pub const TEST_SECRET: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Address derived from `TEST_SECRET`
pub fn test_address() -> Address {
    Address::new([
        0xf3, 0x9f, 0xd6, 0xe5, 0x1a, 0xad, 0x88, 0xf6, 0xf4, 0xce, 0x6a, 0xb8, 0x82, 0x72, 0x79,
        0xcf, 0xff, 0xb9, 0x22, 0x66,
    ])
}

/// Identity for `TEST_SECRET` on chain 8453
pub fn test_identity() -> SigningIdentity {
    match SigningIdentity::from_secret(TEST_SECRET, 8453) {
        Ok(identity) => identity,
        Err(e) => panic!("test key must parse: {}", e),
    }
}

/// What the mock chain reports for a broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptPlan {
    Success,
    Revert,
    /// Never included
    Never,
}

/// A transaction accepted by `MockChainRpc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub hash: B256,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
}

#[derive(Default)]
struct ChainState {
    /// Lowest nonce the chain will still accept
    floor: u64,
    used: HashSet<u64>,
    nonce_queries: usize,
    nonce_delay: Duration,
    failures: HashMap<&'static str, VecDeque<RpcManagerError>>,
    receipt_script: VecDeque<ReceiptPlan>,
    receipts: HashMap<B256, ReceiptPlan>,
    receipt_polls: usize,
    sent: Vec<SentTx>,
    descriptors: HashMap<B256, TxDescriptor>,
    descriptor_lookups: usize,
    lookup_delay: Duration,
    balance: U256,
    base_fee: u128,
}

/// Scriptable in-memory chain.
///
/// Broadcasts are decoded, checked for nonce reuse and recorded. The reported
/// transaction count is the floor or one past the highest accepted nonce,
/// whichever is larger. Hashes are keccak256 of the raw envelope.
pub struct MockChainRpc {
    state: Mutex<ChainState>,
}

impl Default for MockChainRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                balance: U256::from(10u64) * U256::from(1_000_000_000_000_000_000u128),
                base_fee: 1_000_000_000,
                ..Default::default()
            }),
        }
    }

    /// Move the chain's sequence floor, e.g. to model an out-of-band sender
    pub fn set_network_nonce(&self, nonce: u64) {
        self.state.lock().floor = nonce;
    }

    pub fn set_nonce_delay(&self, delay: Duration) {
        self.state.lock().nonce_delay = delay;
    }

    /// Latency added to every descriptor lookup
    pub fn set_lookup_delay(&self, delay: Duration) {
        self.state.lock().lookup_delay = delay;
    }

    pub fn nonce_queries(&self) -> usize {
        self.state.lock().nonce_queries
    }

    /// Make the next call of `method` fail with `err`
    pub fn fail_next(&self, method: &'static str, err: RpcManagerError) {
        self.state
            .lock()
            .failures
            .entry(method)
            .or_default()
            .push_back(err);
    }

    /// Receipt behavior for the next accepted broadcast (default: success)
    pub fn script_receipt(&self, plan: ReceiptPlan) {
        self.state.lock().receipt_script.push_back(plan);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    pub fn receipt_polls(&self) -> usize {
        self.state.lock().receipt_polls
    }

    pub fn insert_descriptor(&self, descriptor: TxDescriptor) {
        self.state
            .lock()
            .descriptors
            .insert(descriptor.hash, descriptor);
    }

    pub fn descriptor_lookups(&self) -> usize {
        self.state.lock().descriptor_lookups
    }

    pub fn set_balance(&self, balance: U256) {
        self.state.lock().balance = balance;
    }

    fn take_failure(&self, method: &'static str) -> RpcResult<()> {
        match self
            .state
            .lock()
            .failures
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn pending_count(state: &ChainState) -> u64 {
        let next_used = state.used.iter().max().map(|n| n + 1).unwrap_or(0);
        state.floor.max(next_used)
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn transaction_count(&self, _address: Address) -> RpcResult<u64> {
        let delay = {
            let mut state = self.state.lock();
            state.nonce_queries += 1;
            state.nonce_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.take_failure("transaction_count")?;
        Ok(Self::pending_count(&self.state.lock()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> RpcResult<B256> {
        self.take_failure("send_raw_transaction")?;

        let envelope = TxEnvelope::decode_2718(&mut &raw[..]).map_err(|e| {
            RpcManagerError::RpcResponse {
                endpoint: "mock".to_string(),
                message: format!("rlp: {}", e),
                code: Some(-32602),
            }
        })?;
        let nonce = envelope.nonce();
        let hash = keccak256(raw);

        let mut state = self.state.lock();
        if nonce < state.floor || state.used.contains(&nonce) {
            return Err(RpcManagerError::classify(
                "mock",
                Some(-32000),
                &format!("nonce too low: next nonce {}, tx nonce {}", Self::pending_count(&state), nonce),
            ));
        }

        state.used.insert(nonce);
        state.balance = state.balance.saturating_sub(envelope.value());
        let plan = state
            .receipt_script
            .pop_front()
            .unwrap_or(ReceiptPlan::Success);
        state.receipts.insert(hash, plan);
        state.sent.push(SentTx {
            hash,
            nonce,
            to: envelope.to(),
            value: envelope.value(),
        });
        Ok(hash)
    }

    async fn transaction_by_hash(&self, hash: B256) -> RpcResult<Option<TxDescriptor>> {
        let delay = {
            let mut state = self.state.lock();
            state.descriptor_lookups += 1;
            state.lookup_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.take_failure("transaction_by_hash")?;
        Ok(self.state.lock().descriptors.get(&hash).cloned())
    }

    async fn transaction_receipt(&self, hash: B256) -> RpcResult<Option<TxReceipt>> {
        self.take_failure("transaction_receipt")?;
        let mut state = self.state.lock();
        state.receipt_polls += 1;
        let receipt = match state.receipts.get(&hash) {
            Some(ReceiptPlan::Success) => Some(true),
            Some(ReceiptPlan::Revert) => Some(false),
            Some(ReceiptPlan::Never) | None => None,
        };
        Ok(receipt.map(|success| TxReceipt {
            tx_hash: hash,
            success,
            block_number: Some(1),
            gas_used: Some(21_000),
        }))
    }

    async fn balance(&self, _address: Address) -> RpcResult<U256> {
        self.take_failure("balance")?;
        Ok(self.state.lock().balance)
    }

    async fn latest_base_fee(&self) -> RpcResult<u128> {
        self.take_failure("latest_base_fee")?;
        Ok(self.state.lock().base_fee)
    }
}

#[derive(Default)]
struct ConnectorState {
    failures: VecDeque<StreamError>,
    sessions: Vec<mpsc::UnboundedSender<StreamEvent>>,
    connected: Vec<String>,
    attempts: usize,
}

/// Streaming transport whose sessions are fed by the test.
///
/// Each successful connect opens a new session, numbered from zero. A
/// session stays silent until events are pushed to it.
#[derive(Default)]
pub struct MockStreamConnector {
    state: Mutex<ConnectorState>,
}

impl MockStreamConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next connect attempt fail
    pub fn fail_next(&self, err: StreamError) {
        self.state.lock().failures.push_back(err);
    }

    /// Deliver an event on session `session`
    pub fn push(&self, session: usize, event: StreamEvent) {
        let state = self.state.lock();
        match state.sessions.get(session) {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => panic!("no session {} (have {})", session, state.sessions.len()),
        }
    }

    /// URLs of successful connects, in order
    pub fn connected(&self) -> Vec<String> {
        self.state.lock().connected.clone()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

#[async_trait]
impl PendingTxStream for MockStream {
    async fn next_event(&mut self) -> StreamEvent {
        self.rx.recv().await.unwrap_or(StreamEvent::Closed(None))
    }
}

#[async_trait]
impl StreamConnector for MockStreamConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn PendingTxStream>, StreamError> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.sessions.push(tx);
        state.connected.push(endpoint.url.clone());
        Ok(Box::new(MockStream { rx }))
    }
}

/// Submitter that records intents instead of touching a chain
#[derive(Default)]
pub struct RecordingSubmitter {
    intents: Mutex<Vec<TransferIntent>>,
    outcomes: Mutex<VecDeque<SubmissionOutcome>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome for the next submission (default: confirmed success)
    pub fn script(&self, outcome: SubmissionOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn intents(&self) -> Vec<TransferIntent> {
        self.intents.lock().clone()
    }
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn submit(
        &self,
        _ctx: &PipelineContext,
        intent: TransferIntent,
        _credit: CreditRule,
    ) -> SubmissionOutcome {
        let mut intents = self.intents.lock();
        intents.push(intent);
        let seq = intents.len() as u64;
        drop(intents);

        self.outcomes.lock().pop_front().unwrap_or(SubmissionOutcome::ConfirmedSuccess {
            tx_hash: keccak256(seq.to_be_bytes()),
        })
    }
}

/// A pipeline wired to a `MockChainRpc`, with handles to its parts
pub struct TestRig {
    pub pipeline: Arc<SubmissionPipeline>,
    pub rpc: Arc<MockChainRpc>,
    pub pool: Arc<EndpointPool>,
    pub nonces: Arc<AccountNonceAllocator>,
    pub ledger: Arc<AccountingLedger>,
}

/// Pipeline with a short confirmation window (500ms, polled every 50ms)
pub fn test_pipeline() -> TestRig {
    let rpc = Arc::new(MockChainRpc::new());
    let pool = match EndpointPool::new(
        vec!["http://rpc0.test", "http://rpc1.test"],
        vec!["ws://ws0.test", "ws://ws1.test"],
    ) {
        Ok(pool) => Arc::new(pool),
        Err(e) => panic!("static endpoint lists are valid: {}", e),
    };
    let identity = test_identity();
    let nonces = Arc::new(AccountNonceAllocator::new(rpc.clone(), identity.address()));
    let ledger = Arc::new(AccountingLedger::new());
    let pipeline = Arc::new(SubmissionPipeline::new(
        rpc.clone(),
        pool.clone(),
        nonces.clone(),
        TxBuilder::new(identity, FeeDefaults::default()),
        ledger.clone(),
        PipelineConfig {
            confirmation_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
        },
    ));
    TestRig {
        pipeline,
        rpc,
        pool,
        nonces,
        ledger,
    }
}
