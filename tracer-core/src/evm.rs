//! Interfaces to the EVM host.
//!
//! The engine does not execute EVM semantics itself: an external interpreter
//! drives the [`EvmTracer`] observer callbacks defined here, and an external
//! [`EvmExecutor`] applies transactions against the world state. Only the
//! shapes of those collaborators are fixed by this module.

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{
    state::StateView,
    types::{Block, Transaction},
};

/// EVM rule revisions, in activation order.
///
/// Keys the opcode-name tables of [`crate::opcode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Revision {
    Frontier = 0,
    Homestead,
    TangerineWhistle,
    SpuriousDragon,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
    Berlin,
    London,
    Paris,
    Shanghai,
}

impl Revision {
    /// Number of known revisions.
    pub const COUNT: usize = Revision::Shanghai as usize + 1;

    /// All revisions, oldest first.
    pub const ALL: [Revision; Revision::COUNT] = [
        Revision::Frontier,
        Revision::Homestead,
        Revision::TangerineWhistle,
        Revision::SpuriousDragon,
        Revision::Byzantium,
        Revision::Constantinople,
        Revision::Petersburg,
        Revision::Istanbul,
        Revision::Berlin,
        Revision::London,
        Revision::Paris,
        Revision::Shanghai,
    ];
}

/// How a frame was entered. Static calls are regular calls carrying
/// [`EvmMessage::is_static`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Call,
    DelegateCall,
    CallCode,
    Create,
    Create2,
}

/// Terminal status of a frame or transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusCode {
    #[default]
    Success,
    Revert,
    OutOfGas,
    UndefinedInstruction,
    InvalidInstruction,
    StackOverflow,
    StackUnderflow,
    BadJumpDestination,
    /// Any other exceptional halt.
    Failure,
}

impl StatusCode {
    pub const fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// The message that created an EVM frame.
#[derive(Clone, Debug)]
pub struct EvmMessage {
    pub kind: CallKind,
    /// Set when the frame executes under the STATIC flag.
    pub is_static: bool,
    /// Nesting level; the top-level transaction frame is 0.
    pub depth: i32,
    /// Gas supplied at frame entry.
    pub gas: i64,
    /// Account whose storage the frame runs against.
    pub recipient: Address,
    pub sender: Address,
    /// Account the executed code was loaded from. Differs from `recipient`
    /// for DELEGATECALL and CALLCODE.
    pub code_address: Address,
    pub input: Bytes,
    pub value: U256,
}

/// Result of a frame exit or of the settled top-level call.
#[derive(Clone, Debug, Default)]
pub struct CallResult {
    pub status: StatusCode,
    pub gas_left: i64,
    pub data: Bytes,
}

/// Operand stack at an instruction boundary; `peek(0)` is the top.
///
/// Out-of-range peeks answer zero so observers stay panic-free on
/// malformed (about-to-underflow) frames.
#[derive(Clone, Copy, Debug)]
pub struct StackView<'a> {
    slots: &'a [U256],
}

impl<'a> StackView<'a> {
    /// Wraps a bottom-to-top slice of stack words.
    pub fn new(slots: &'a [U256]) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The word `depth` positions below the top.
    pub fn peek(&self, depth: usize) -> U256 {
        if depth < self.slots.len() {
            self.slots[self.slots.len() - 1 - depth]
        } else {
            U256::ZERO
        }
    }
}

/// Interpreter state visible at an instruction boundary.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionContext<'a> {
    /// Depth of the executing frame.
    pub depth: i32,
    /// Gas remaining before the instruction is charged.
    pub gas_left: i64,
    /// Recipient of the executing frame.
    pub recipient: Address,
    /// Current frame memory.
    pub memory: &'a [u8],
    /// Code of the executing frame.
    pub code: &'a [u8],
}

/// Observer attached to the interpreter.
///
/// Callbacks are invoked synchronously on the EVM worker, in interpreter
/// step order, and must not suspend. All methods default to no-ops so a
/// tracer only implements the events it cares about.
#[auto_impl(&mut, Box)]
pub trait EvmTracer: Send {
    /// A new frame is being entered.
    fn on_execution_start(&mut self, _rev: Revision, _msg: &EvmMessage, _code: &[u8]) {}

    /// Invoked immediately before each instruction.
    fn on_instruction_start(
        &mut self,
        _pc: usize,
        _stack: StackView<'_>,
        _context: &ExecutionContext<'_>,
        _state: &dyn StateView,
    ) {
    }

    /// The current frame is exiting.
    fn on_execution_end(&mut self, _result: &CallResult, _state: &dyn StateView) {}

    /// The frame was a precompile; `gas` is the amount forwarded to it.
    fn on_precompiled_run(&mut self, _result: &CallResult, _gas: i64, _state: &dyn StateView) {}

    /// Invoked once per top-level trace after the EVM has settled.
    fn on_reward_granted(&mut self, _result: &CallResult, _state: &dyn StateView) {}
}

/// Outcome of [`EvmExecutor::call`].
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    /// Failure detected before EVM execution began (signature, nonce,
    /// balance, intrinsic gas). No traces are produced when set.
    pub pre_check_error: Option<String>,
    /// Return data of the top-level call.
    pub data: Bytes,
    pub gas_left: i64,
    pub status: StatusCode,
}

/// External transaction executor: applies a transaction against the world
/// state, driving the attached tracers through the [`EvmTracer`] callbacks.
#[async_trait]
pub trait EvmExecutor: Send {
    /// Executes `tx` in the context of `block`. Internal host failures are
    /// surfaced through [`ExecutionResult::pre_check_error`].
    async fn call(
        &mut self,
        block: &Block,
        tx: &Transaction,
        refund: bool,
        gas_bailout: bool,
        tracers: &mut [&mut dyn EvmTracer],
    ) -> ExecutionResult;

    /// Clears warm state between independent hypothetical calls.
    fn reset(&mut self);
}
