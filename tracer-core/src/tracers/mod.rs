//! The four tracers driven by the observer callbacks.
//!
//! Tracers never call each other: each one independently observes the
//! interpreter through [`crate::evm::EvmTracer`] and owns its output until
//! the executor harvests it after the terminal callback.

mod call_trace;
mod intra_block;
mod state_diff;
mod vm_trace;

pub use call_trace::TraceTracer;
pub use intra_block::IntraBlockStateTracer;
pub use state_diff::StateDiffTracer;
pub use vm_trace::VmTraceTracer;
