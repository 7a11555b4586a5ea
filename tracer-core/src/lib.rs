//! Transaction-Replay Tracing Engine
//!
//! Re-executes historical transactions (or whole blocks) of an
//! EVM-compatible chain against a read-through world state and emits three
//! independent, co-produced traces:
//!
//! - **vmTrace** — hierarchical per-opcode log with pre/post stack, memory
//!   slices and storage effects
//! - **trace** — a tree of call/create frames with gas accounting,
//!   sub-trace addressing and per-frame error classification
//! - **stateDiff** — per-account before/after diffs over balance, nonce,
//!   code and touched storage slots
//!
//! The engine never executes EVM semantics itself: the interpreter, the
//! world-state reader and the consensus reward function are external
//! collaborators whose interfaces live in [`evm`], [`state`] and
//! [`executor`]. Tracers observe the interpreter through the
//! [`evm::EvmTracer`] callbacks and never each other.
//!
//! ## Modules
//!
//! - [`executor`]: request orchestration (block replay, tracer dispatch)
//! - [`tracers`]: the vmTrace, call-frame, state-diff and intra-block tracers
//! - [`state`]: world-state view trait and the per-request shadow state
//! - [`opcode`]: opcode classification and revision-keyed name tables
//! - [`types`]: trace data model and its JSON projection
//! - [`evm`]: interfaces to the external EVM host

pub mod error;
pub use error::*;
pub mod evm;
pub use evm::*;
pub mod executor;
pub use executor::*;
pub mod opcode;
pub mod state;
pub use state::*;
pub mod tracers;
pub use tracers::*;
pub mod types;
pub use types::*;
