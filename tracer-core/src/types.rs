//! Trace data model and its JSON projection.
//!
//! The types here mirror the public wire format of the `trace_*` API family:
//! a hierarchical per-opcode log ([`VmTrace`]), a flat tree of call/create
//! frames ([`Trace`]) and a per-account before/after diff ([`StateDiff`]).
//! Field names and the null-vs-omitted split follow the OpenEthereum wire
//! format as served by rpcdaemon; object keys are declared in the order
//! those servers emit them.

use std::collections::BTreeMap;
use std::fmt;

use alloy_consensus::{transaction::SignerRecoverable, Header, TxEnvelope};
use alloy_primitives::{hex, Address, Bytes, B256, U256};
use serde::{
    de::Deserializer,
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};

use crate::error::TraceError;

/// Renders a 256-bit value as a minimal-nibble hex quantity (`0x0` for zero).
pub fn to_quantity(value: U256) -> String {
    format!("0x{value:x}")
}

/// Renders a 256-bit value as a zero-padded 64-nibble hex word.
pub fn to_padded_word(value: U256) -> String {
    format!("0x{}", hex::encode(B256::from(value)))
}

fn serialize_gas<S: Serializer>(gas: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{gas:x}"))
}

fn serialize_value<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_quantity(*value))
}

/// Selects which of the three co-produced traces a request wants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceConfig {
    pub vm_trace: bool,
    pub trace: bool,
    pub state_diff: bool,
}

impl TraceConfig {
    /// Configuration used by `trace_block` and `trace_transaction`.
    pub const fn trace_only() -> Self {
        Self { vm_trace: false, trace: true, state_diff: false }
    }

    /// All three traces enabled.
    pub const fn all() -> Self {
        Self { vm_trace: true, trace: true, state_diff: true }
    }
}

impl<'de> Deserialize<'de> for TraceConfig {
    /// Parses the wire form: a JSON array of strings, any subset of
    /// `"vmTrace"`, `"trace"` and `"stateDiff"`.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<String>::deserialize(deserializer)?;
        Ok(Self {
            vm_trace: entries.iter().any(|e| e == "vmTrace"),
            trace: entries.iter().any(|e| e == "trace"),
            state_diff: entries.iter().any(|e| e == "stateDiff"),
        })
    }
}

impl fmt::Display for TraceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vmTrace: {} trace: {} stateDiff: {}",
            self.vm_trace, self.trace, self.state_diff
        )
    }
}

/// Hierarchical per-opcode execution log of one EVM frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VmTrace {
    /// Code executed in this frame.
    pub code: Bytes,
    /// Executed opcodes, in step order.
    pub ops: Vec<TraceOp>,
}

/// One executed opcode inside a [`VmTrace`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceOp {
    /// Gas charged for this op. Provisional until the next instruction (or
    /// the frame exit) resolves it; for call sites the forwarded portion is
    /// subtracted when the callee frame starts.
    #[serde(rename = "cost")]
    pub gas_cost: i64,
    #[serde(rename = "ex")]
    pub trace_ex: TraceEx,
    /// Dotted-prefixed index of this op within the transaction.
    pub idx: String,
    #[serde(rename = "op")]
    pub op_name: String,
    pub pc: u64,
    /// Trace of the sub-context this op initiated, if any.
    pub sub: Option<Box<VmTrace>>,
    #[serde(skip)]
    pub op_code: u8,
    #[serde(skip)]
    pub depth: i32,
    /// Gas forwarded to a precompile, delivered out of band.
    #[serde(skip)]
    pub precompiled_call_gas: Option<i64>,
    /// Gas cap computed for CALL/DELEGATECALL/STATICCALL sites.
    #[serde(skip)]
    pub call_gas_cap: Option<i64>,
}

/// Post-execution effects of one op.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceEx {
    #[serde(rename = "mem")]
    pub memory: Option<TraceMemory>,
    /// Words the op pushed, bottom-to-top.
    #[serde(rename = "push")]
    pub stack: Vec<String>,
    #[serde(rename = "store")]
    pub storage: Option<TraceStorage>,
    /// Gas left after the op executed.
    pub used: i64,
}

/// Memory slice written or read by an op, hex-dumped post-execution.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceMemory {
    pub data: String,
    #[serde(rename = "off")]
    pub offset: u64,
    #[serde(skip)]
    pub len: u64,
}

/// Storage slot written by an SSTORE, as padded hex words.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceStorage {
    pub key: String,
    #[serde(rename = "val")]
    pub value: String,
}

/// One frame of the call/create trace tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trace {
    pub action: Action,
    #[serde(rename = "blockHash", skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<B256>,
    #[serde(rename = "blockNumber", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "result")]
    pub trace_result: Option<TraceResult>,
    #[serde(rename = "subtraces")]
    pub sub_traces: usize,
    #[serde(rename = "traceAddress")]
    pub trace_address: Vec<usize>,
    #[serde(rename = "transactionHash", skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    #[serde(rename = "transactionPosition", skip_serializing_if = "Option::is_none")]
    pub transaction_position: Option<u64>,
    #[serde(rename = "type")]
    pub trace_type: String,
}

/// Frame action: a call/create, or the synthetic block reward.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Action {
    Call(TraceAction),
    Reward(RewardAction),
}

/// Inputs of a call or create frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceAction {
    #[serde(rename = "callType", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    pub from: Address,
    #[serde(serialize_with = "serialize_gas")]
    pub gas: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(serialize_with = "serialize_value")]
    pub value: U256,
}

/// Synthetic action of a block/uncle reward frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RewardAction {
    pub author: Address,
    #[serde(rename = "rewardType")]
    pub reward_type: String,
    #[serde(serialize_with = "serialize_value")]
    pub value: U256,
}

/// Outcome of a successful call or create frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,
    #[serde(rename = "gasUsed", serialize_with = "serialize_gas")]
    pub gas_used: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Bytes>,
}

/// A 256-bit value rendered as a hex quantity in diff entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity(pub U256);

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_quantity(self.0))
    }
}

impl From<U256> for Quantity {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

/// Four-way before/after encoding of one account component.
///
/// Wire form: `"="`, `{"+": to}`, `{"-": from}` or `{"*": {"from", "to"}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DiffValue<T> {
    #[default]
    Same,
    Added(T),
    Removed(T),
    Changed {
        from: T,
        to: T,
    },
}

impl<T: Serialize> Serialize for DiffValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DiffValue::Same => serializer.serialize_str("="),
            DiffValue::Added(to) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("+", to)?;
                map.end()
            }
            DiffValue::Removed(from) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("-", from)?;
                map.end()
            }
            DiffValue::Changed { from, to } => {
                #[derive(Serialize)]
                struct FromTo<'a, T> {
                    from: &'a T,
                    to: &'a T,
                }
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("*", &FromTo { from, to })?;
                map.end()
            }
        }
    }
}

/// Before/after diff of one touched account.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StateDiffEntry {
    pub balance: DiffValue<Quantity>,
    pub code: DiffValue<Bytes>,
    pub nonce: DiffValue<Quantity>,
    pub storage: BTreeMap<B256, DiffValue<B256>>,
}

/// Per-account diffs of one transaction. Absent key means unchanged account.
pub type StateDiff = BTreeMap<Address, StateDiffEntry>;

/// A signed transaction plus the replay metadata the engine needs.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub inner: TxEnvelope,
    /// Sender, if already known; recovered from the signature otherwise.
    pub from: Option<Address>,
    /// Position within the enclosing block, if the transaction is part of one.
    pub transaction_index: Option<usize>,
}

impl Transaction {
    pub fn new(inner: TxEnvelope) -> Self {
        Self { inner, from: None, transaction_index: None }
    }

    pub fn hash(&self) -> B256 {
        *self.inner.tx_hash()
    }

    /// Returns the sender, recovering it from the signature when absent.
    pub fn recover_sender(&mut self) -> Result<Address, TraceError> {
        if let Some(from) = self.from {
            return Ok(from);
        }
        let from = self
            .inner
            .recover_signer()
            .map_err(|_| TraceError::SenderRecovery { hash: self.hash() })?;
        self.from = Some(from);
        Ok(from)
    }
}

impl From<TxEnvelope> for Transaction {
    fn from(inner: TxEnvelope) -> Self {
        Self::new(inner)
    }
}

/// Block carrier for replay: header, body and ommer headers.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub ommers: Vec<Header>,
}

/// A block together with its known hash.
#[derive(Clone, Debug, Default)]
pub struct BlockWithHash {
    pub hash: B256,
    pub block: Block,
}

/// One hypothetical call bundled with its per-call trace selection.
#[derive(Clone, Debug)]
pub struct TraceCall {
    pub transaction: Transaction,
    pub trace_config: TraceConfig,
}

/// The traces produced for one executed transaction.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceCallTraces {
    /// Return data of the top-level call.
    pub output: Bytes,
    #[serde(rename = "stateDiff")]
    pub state_diff: Option<StateDiff>,
    pub trace: Vec<Trace>,
    #[serde(rename = "transactionHash", skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<B256>,
    #[serde(rename = "vmTrace")]
    pub vm_trace: Option<VmTrace>,
}

/// Result of tracing one transaction or hypothetical call.
///
/// A pre-check failure leaves `traces` empty and is reported out of band;
/// the JSON projection is that of [`TraceCallTraces`] alone.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TraceCallResult {
    #[serde(flatten)]
    pub traces: TraceCallTraces,
    #[serde(skip)]
    pub pre_check_error: Option<String>,
}

/// Result of a `trace_calls` batch: serializes as the array of trace sets.
#[derive(Clone, Debug, Default)]
pub struct TraceManyCallResult {
    pub traces: Vec<TraceCallTraces>,
    /// First pre-check failure, prefixed with the index of the failing call.
    pub pre_check_error: Option<String>,
}

impl Serialize for TraceManyCallResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.traces.serialize(serializer)
    }
}
