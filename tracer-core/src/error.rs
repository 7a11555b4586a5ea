//! Errors surfaced by the trace executor.

use alloy_primitives::B256;
use thiserror::Error;

/// Errors that can occur while setting up or driving a trace request.
///
/// Execution-level failures (exceptional EVM halts) are never reported here;
/// they are folded into the produced traces by the individual tracers.
/// Pre-check failures travel on [`crate::evm::ExecutionResult::pre_check_error`].
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to recover sender for transaction {hash}")]
    SenderRecovery {
        /// Hash of the transaction whose signature could not be recovered
        hash: B256,
    },

    #[error("world state unavailable at block {block_number}: {reason}")]
    StateUnavailable {
        block_number: u64,
        reason: String,
    },

    #[error("EVM executor unavailable at block {block_number}: {reason}")]
    EvmUnavailable {
        block_number: u64,
        reason: String,
    },

    #[error("chain configuration error: {0}")]
    ChainConfig(String),
}
