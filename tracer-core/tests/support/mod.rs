//! In-memory test doubles for the engine's external collaborators: a
//! scripted EVM that replays a recorded observer-callback sequence, and a
//! map-backed world state.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use alloy_consensus::{SignableTransaction, TxLegacy};
use alloy_primitives::{Address, Bytes, TxKind, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use parking_lot::Mutex;

use tracer_core::{
    evm::{
        CallKind, CallResult, EvmExecutor, EvmMessage, EvmTracer, ExecutionContext,
        ExecutionResult, Revision, StackView, StatusCode,
    },
    executor::TraceEnvironment,
    state::StateView,
    types::{Block, BlockWithHash, Transaction},
    TraceError,
};

/// Map-backed world state; doubles as both the anchored snapshot and the
/// live intra-block state handed to tracer callbacks.
#[derive(Clone, Debug, Default)]
pub struct MockState {
    pub accounts: BTreeMap<Address, MockAccount>,
    pub original_storage: BTreeMap<(Address, B256), B256>,
    pub current_storage: BTreeMap<(Address, B256), B256>,
    pub touched: BTreeSet<Address>,
}

#[derive(Clone, Debug, Default)]
pub struct MockAccount {
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
}

impl MockState {
    pub fn with_account(mut self, address: Address, account: MockAccount) -> Self {
        self.accounts.insert(address, account);
        self
    }

    pub fn with_touched(mut self, address: Address) -> Self {
        self.touched.insert(address);
        self
    }

    pub fn with_storage(mut self, address: Address, key: B256, original: B256, current: B256) -> Self {
        self.original_storage.insert((address, key), original);
        self.current_storage.insert((address, key), current);
        self
    }
}

impl StateView for MockState {
    fn exists(&self, address: Address) -> bool {
        self.accounts.contains_key(&address)
    }

    fn balance(&self, address: Address) -> U256 {
        self.accounts.get(&address).map(|a| a.balance).unwrap_or_default()
    }

    fn nonce(&self, address: Address) -> u64 {
        self.accounts.get(&address).map(|a| a.nonce).unwrap_or_default()
    }

    fn code(&self, address: Address) -> Bytes {
        self.accounts.get(&address).map(|a| a.code.clone()).unwrap_or_default()
    }

    fn original_storage(&self, address: Address, key: B256) -> B256 {
        self.original_storage.get(&(address, key)).copied().unwrap_or_default()
    }

    fn current_storage(&self, address: Address, key: B256) -> B256 {
        self.current_storage.get(&(address, key)).copied().unwrap_or_default()
    }

    fn touched(&self) -> BTreeSet<Address> {
        self.touched.clone()
    }
}

/// One recorded observer event.
#[derive(Clone, Debug)]
pub enum Event {
    Start { msg: EvmMessage, code: Bytes },
    Step { pc: usize, stack: Vec<U256>, gas_left: i64, memory: Vec<u8> },
    Precompile { gas: i64, result: CallResult },
    End { result: CallResult },
}

/// The full callback sequence and outcome of one `EvmExecutor::call`.
#[derive(Clone, Debug)]
pub struct Script {
    pub events: Vec<Event>,
    pub outcome: ExecutionResult,
    /// Live intra-block state passed to every callback of this call.
    pub state: MockState,
}

impl Script {
    pub fn new(events: Vec<Event>, outcome: ExecutionResult, state: MockState) -> Self {
        Self { events, outcome, state }
    }

    pub fn pre_check_failure(error: &str) -> Self {
        Self {
            events: Vec::new(),
            outcome: ExecutionResult {
                pre_check_error: Some(error.to_string()),
                ..Default::default()
            },
            state: MockState::default(),
        }
    }
}

/// Scripted EVM: replays recorded callback sequences, one script per call.
pub struct MockEvm {
    scripts: VecDeque<Script>,
    pub resets: usize,
}

impl MockEvm {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self { scripts: scripts.into(), resets: 0 }
    }
}

#[async_trait]
impl EvmExecutor for MockEvm {
    async fn call(
        &mut self,
        _block: &Block,
        _tx: &Transaction,
        _refund: bool,
        _gas_bailout: bool,
        tracers: &mut [&mut dyn EvmTracer],
    ) -> ExecutionResult {
        let script = self.scripts.pop_front().expect("no script left for call");
        if script.outcome.pre_check_error.is_some() {
            return script.outcome;
        }

        let mut frames: Vec<(EvmMessage, Bytes)> = Vec::new();
        for event in &script.events {
            match event {
                Event::Start { msg, code } => {
                    for tracer in tracers.iter_mut() {
                        tracer.on_execution_start(Revision::Shanghai, msg, code);
                    }
                    frames.push((msg.clone(), code.clone()));
                }
                Event::Step { pc, stack, gas_left, memory } => {
                    let (msg, code) = frames.last().expect("step outside of a frame");
                    let context = ExecutionContext {
                        depth: msg.depth,
                        gas_left: *gas_left,
                        recipient: msg.recipient,
                        memory,
                        code,
                    };
                    for tracer in tracers.iter_mut() {
                        tracer.on_instruction_start(*pc, StackView::new(stack), &context, &script.state);
                    }
                }
                Event::Precompile { gas, result } => {
                    for tracer in tracers.iter_mut() {
                        tracer.on_precompiled_run(result, *gas, &script.state);
                    }
                }
                Event::End { result } => {
                    for tracer in tracers.iter_mut() {
                        tracer.on_execution_end(result, &script.state);
                    }
                    frames.pop();
                }
            }
        }

        let settlement = CallResult {
            status: script.outcome.status,
            gas_left: script.outcome.gas_left,
            data: script.outcome.data.clone(),
        };
        for tracer in tracers.iter_mut() {
            tracer.on_reward_granted(&settlement, &script.state);
        }

        script.outcome
    }

    fn reset(&mut self) {
        self.resets += 1;
    }
}

/// Environment handing out one batch of scripts per `evm_at`.
pub struct MockEnv {
    pub state: MockState,
    batches: Mutex<VecDeque<Vec<Script>>>,
    pub reward: Option<U256>,
}

impl MockEnv {
    pub fn new(state: MockState, batches: Vec<Vec<Script>>, reward: Option<U256>) -> Self {
        Self { state, batches: Mutex::new(batches.into()), reward }
    }
}

#[async_trait]
impl TraceEnvironment for MockEnv {
    type State = MockState;
    type Evm = MockEvm;

    async fn state_at(&self, _block_number: u64) -> Result<MockState, TraceError> {
        Ok(self.state.clone())
    }

    async fn evm_at(&self, _block_number: u64) -> Result<MockEvm, TraceError> {
        let batch = self.batches.lock().pop_front().unwrap_or_default();
        Ok(MockEvm::new(batch))
    }

    async fn block_reward(&self, _block: &Block) -> Result<Option<U256>, TraceError> {
        Ok(self.reward)
    }
}

/// Builds a signed legacy transaction with a throwaway key; the recovered
/// sender is real.
pub fn signed_transaction(nonce: u64, to: Address) -> Transaction {
    let signer = PrivateKeySigner::random();
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 1,
        gas_limit: 100_000,
        to: TxKind::Call(to),
        value: U256::ZERO,
        input: Bytes::new(),
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).expect("signing");
    Transaction::new(TxLegacy::into_signed(tx, signature).into())
}

pub fn block_of(number: u64, beneficiary: Address, transactions: Vec<Transaction>) -> Block {
    let mut block = Block::default();
    block.header.number = number;
    block.header.beneficiary = beneficiary;
    block.transactions = transactions;
    block
}

pub fn block_with_hash(hash_byte: u8, block: Block) -> BlockWithHash {
    BlockWithHash { hash: B256::repeat_byte(hash_byte), block }
}

pub fn call_message(
    kind: CallKind,
    depth: i32,
    gas: i64,
    sender: Address,
    recipient: Address,
) -> EvmMessage {
    EvmMessage {
        kind,
        is_static: false,
        depth,
        gas,
        recipient,
        sender,
        code_address: recipient,
        input: Bytes::new(),
        value: U256::ZERO,
    }
}

pub fn success(gas_left: i64, data: Bytes) -> CallResult {
    CallResult { status: StatusCode::Success, gas_left, data }
}

pub fn success_outcome(gas_left: i64, data: Bytes) -> ExecutionResult {
    ExecutionResult { pre_check_error: None, data, gas_left, status: StatusCode::Success }
}
