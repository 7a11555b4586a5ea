//! Trace request orchestration.
//!
//! [`TraceCallExecutor`] owns no chain state of its own: it opens a
//! read-through world-state view through a [`TraceEnvironment`], replays the
//! relevant block prefix to warm the per-request shadow, attaches the
//! requested tracer subset to the target execution and harvests their
//! outputs. Each request owns its shadow, its tracer instances and its EVM
//! executor; requests share nothing.

use std::sync::Arc;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    error::TraceError,
    evm::{EvmExecutor, EvmTracer},
    state::{StateAddresses, StateView},
    tracers::{IntraBlockStateTracer, StateDiffTracer, TraceTracer, VmTraceTracer},
    types::{
        Action, Block, BlockWithHash, RewardAction, Trace, TraceCall, TraceCallResult,
        TraceCallTraces, TraceConfig, TraceManyCallResult, Transaction,
    },
};

/// External collaborators a trace request consumes: anchored world-state
/// views, EVM executors and the consensus reward function.
#[async_trait]
pub trait TraceEnvironment: Send + Sync {
    type State: StateView;
    type Evm: EvmExecutor;

    /// Read-only world state as of the end of `block_number`.
    async fn state_at(&self, block_number: u64) -> Result<Self::State, TraceError>;

    /// EVM executor anchored at the same point.
    async fn evm_at(&self, block_number: u64) -> Result<Self::Evm, TraceError>;

    /// Miner reward for the block, `None` when the chain's consensus pays
    /// none (non-ethash chains produce no reward frame).
    async fn block_reward(&self, block: &Block) -> Result<Option<U256>, TraceError>;
}

/// Replays historical transactions with tracers attached and assembles the
/// per-request results.
pub struct TraceCallExecutor<E> {
    env: E,
}

impl<E: TraceEnvironment> TraceCallExecutor<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    /// Traces every transaction of the block with the call-frame tracer and
    /// appends the synthetic reward frame, all annotated with block and
    /// transaction positions.
    pub async fn trace_block(
        &self,
        block_with_hash: &BlockWithHash,
    ) -> Result<Vec<Trace>, TraceError> {
        let block = &block_with_hash.block;
        let results = self
            .trace_block_transactions(block, TraceConfig::trace_only())
            .await?;

        let mut traces = Vec::new();
        for (position, result) in results.iter().enumerate() {
            let transaction_hash = block.transactions[position].hash();
            for call_trace in &result.traces.trace {
                let mut trace = call_trace.clone();
                annotate(
                    &mut trace,
                    block_with_hash.hash,
                    block.header.number,
                    Some((position as u64, transaction_hash)),
                );
                traces.push(trace);
            }
        }

        if let Some(reward) = self.env.block_reward(block).await? {
            let mut trace = Trace {
                action: Action::Reward(RewardAction {
                    author: block.header.beneficiary,
                    reward_type: "block".to_string(),
                    value: reward,
                }),
                block_hash: None,
                block_number: None,
                error: None,
                trace_result: None,
                sub_traces: 0,
                trace_address: Vec::new(),
                transaction_hash: None,
                transaction_position: None,
                trace_type: "reward".to_string(),
            };
            annotate(&mut trace, block_with_hash.hash, block.header.number, None);
            traces.push(trace);
        }

        Ok(traces)
    }

    /// Replays all transactions of the block in order against a shadow
    /// anchored at `block_number - 1`, attaching the requested tracer subset
    /// to each, and returns one result per transaction.
    pub async fn trace_block_transactions(
        &self,
        block: &Block,
        config: TraceConfig,
    ) -> Result<Vec<TraceCallResult>, TraceError> {
        let block_number = block.header.number;
        info!(
            block_number,
            transactions = block.transactions.len(),
            %config,
            "tracing block transactions"
        );

        let base_block_number = block_number.saturating_sub(1);
        let initial = Arc::new(self.env.state_at(base_block_number).await?);
        let shadow = Arc::new(StateAddresses::new(initial.clone()));
        let mut evm = self.env.evm_at(base_block_number).await?;
        let mut ibs_tracer = IntraBlockStateTracer::new(shadow.clone());

        let mut results = Vec::with_capacity(block.transactions.len());
        for (index, transaction) in block.transactions.iter().enumerate() {
            let mut transaction = transaction.clone();
            transaction.recover_sender()?;

            let mut result = TraceCallResult::default();
            result.traces.transaction_hash = Some(transaction.hash());

            let mut vm_tracer = config.vm_trace.then(|| VmTraceTracer::new(Some(index)));
            let mut call_tracer = config.trace.then(|| TraceTracer::new(initial.clone()));
            let mut diff_tracer = config.state_diff.then(|| StateDiffTracer::new(shadow.clone()));

            let execution = {
                let mut tracers: Vec<&mut dyn EvmTracer> = Vec::with_capacity(4);
                if let Some(tracer) = vm_tracer.as_mut() {
                    tracers.push(tracer);
                }
                if let Some(tracer) = call_tracer.as_mut() {
                    tracers.push(tracer);
                }
                if let Some(tracer) = diff_tracer.as_mut() {
                    tracers.push(tracer);
                }
                tracers.push(&mut ibs_tracer);
                evm.call(block, &transaction, true, true, &mut tracers).await
            };

            if let Some(error) = execution.pre_check_error {
                result.pre_check_error = Some(error);
            } else {
                result.traces.output = execution.data;
            }
            result.traces.vm_trace = vm_tracer.map(VmTraceTracer::into_vm_trace);
            if let Some(tracer) = call_tracer {
                result.traces.trace = tracer.into_traces();
            }
            result.traces.state_diff = diff_tracer.map(StateDiffTracer::into_state_diff);
            results.push(result);
        }

        Ok(results)
    }

    /// Executes a hypothetical call on top of the block, with the shadow
    /// anchored at the block itself.
    pub async fn trace_call(
        &self,
        block: &Block,
        call: Transaction,
        config: TraceConfig,
    ) -> Result<TraceCallResult, TraceError> {
        self.execute(
            block.header.number,
            block,
            call,
            block.transactions.len(),
            None,
            config,
        )
        .await
    }

    /// Sequentially executes independent hypothetical calls against a single
    /// shadow anchored at the block. The executor's warm state is reset
    /// between calls; the first pre-check failure aborts the batch.
    pub async fn trace_calls(
        &self,
        block: &Block,
        calls: Vec<TraceCall>,
    ) -> Result<TraceManyCallResult, TraceError> {
        let block_number = block.header.number;
        debug!(block_number, calls = calls.len(), "tracing call batch");

        let initial = Arc::new(self.env.state_at(block_number).await?);
        let shadow = Arc::new(StateAddresses::new(initial.clone()));
        let mut evm = self.env.evm_at(block_number).await?;
        let mut ibs_tracer = IntraBlockStateTracer::new(shadow.clone());

        let mut result = TraceManyCallResult::default();
        for (index, call) in calls.into_iter().enumerate() {
            let TraceCall { transaction, trace_config } = call;

            let mut traces = TraceCallTraces::default();
            let mut vm_tracer = trace_config.vm_trace.then(|| VmTraceTracer::new(Some(index)));
            let mut call_tracer = trace_config.trace.then(|| TraceTracer::new(initial.clone()));
            let mut diff_tracer = trace_config
                .state_diff
                .then(|| StateDiffTracer::new(shadow.clone()));

            let execution = {
                let mut tracers: Vec<&mut dyn EvmTracer> = Vec::with_capacity(4);
                if let Some(tracer) = vm_tracer.as_mut() {
                    tracers.push(tracer);
                }
                if let Some(tracer) = call_tracer.as_mut() {
                    tracers.push(tracer);
                }
                if let Some(tracer) = diff_tracer.as_mut() {
                    tracers.push(tracer);
                }
                tracers.push(&mut ibs_tracer);
                evm.call(block, &transaction, true, true, &mut tracers).await
            };

            if let Some(error) = execution.pre_check_error {
                result.pre_check_error =
                    Some(format!("first run for txIndex {index} error: {error}"));
                result.traces.clear();
                break;
            }

            traces.output = execution.data;
            traces.vm_trace = vm_tracer.map(VmTraceTracer::into_vm_trace);
            if let Some(tracer) = call_tracer {
                traces.trace = tracer.into_traces();
            }
            traces.state_diff = diff_tracer.map(StateDiffTracer::into_state_diff);
            result.traces.push(traces);

            evm.reset();
        }

        Ok(result)
    }

    /// Traces one historical transaction, priming the intra-block state by
    /// replaying its predecessors first. Returned frames carry block and
    /// transaction annotations.
    pub async fn trace_transaction(
        &self,
        block_with_hash: &BlockWithHash,
        transaction: Transaction,
    ) -> Result<Vec<Trace>, TraceError> {
        let block = &block_with_hash.block;
        let index = transaction.transaction_index.unwrap_or_default();
        let transaction_hash = transaction.hash();

        let result = self
            .execute(
                block.header.number.saturating_sub(1),
                block,
                transaction,
                index,
                Some(index),
                TraceConfig::trace_only(),
            )
            .await?;

        let mut traces = Vec::with_capacity(result.traces.trace.len());
        for call_trace in &result.traces.trace {
            let mut trace = call_trace.clone();
            annotate(
                &mut trace,
                block_with_hash.hash,
                block.header.number,
                Some((index as u64, transaction_hash)),
            );
            traces.push(trace);
        }
        Ok(traces)
    }

    /// Shared execution path: replays the first `replay_count` transactions
    /// of the block with only the intra-block tracer attached, resets the
    /// executor's warm state, then runs the target transaction with the
    /// requested tracers.
    async fn execute(
        &self,
        base_block_number: u64,
        block: &Block,
        mut transaction: Transaction,
        replay_count: usize,
        vm_index: Option<usize>,
        config: TraceConfig,
    ) -> Result<TraceCallResult, TraceError> {
        debug!(
            base_block_number,
            replay_count,
            %config,
            "executing trace request"
        );

        let initial = Arc::new(self.env.state_at(base_block_number).await?);
        let shadow = Arc::new(StateAddresses::new(initial.clone()));
        let mut evm = self.env.evm_at(base_block_number).await?;
        let mut ibs_tracer = IntraBlockStateTracer::new(shadow.clone());

        for prior in block.transactions.iter().take(replay_count) {
            let mut prior = prior.clone();
            prior.recover_sender()?;
            let mut tracers: Vec<&mut dyn EvmTracer> = vec![&mut ibs_tracer];
            let _ = evm.call(block, &prior, true, true, &mut tracers).await;
        }
        evm.reset();

        if transaction.from.is_none() {
            transaction.recover_sender()?;
        }

        let mut result = TraceCallResult::default();
        let mut vm_tracer = config.vm_trace.then(|| VmTraceTracer::new(vm_index));
        let mut call_tracer = config.trace.then(|| TraceTracer::new(initial.clone()));
        let mut diff_tracer = config.state_diff.then(|| StateDiffTracer::new(shadow.clone()));

        let execution = {
            let mut tracers: Vec<&mut dyn EvmTracer> = Vec::with_capacity(4);
            if let Some(tracer) = vm_tracer.as_mut() {
                tracers.push(tracer);
            }
            if let Some(tracer) = call_tracer.as_mut() {
                tracers.push(tracer);
            }
            if let Some(tracer) = diff_tracer.as_mut() {
                tracers.push(tracer);
            }
            tracers.push(&mut ibs_tracer);
            evm.call(block, &transaction, true, true, &mut tracers).await
        };

        if let Some(error) = execution.pre_check_error {
            result.pre_check_error = Some(error);
        } else {
            result.traces.output = execution.data;
        }
        result.traces.vm_trace = vm_tracer.map(VmTraceTracer::into_vm_trace);
        if let Some(tracer) = call_tracer {
            result.traces.trace = tracer.into_traces();
        }
        result.traces.state_diff = diff_tracer.map(StateDiffTracer::into_state_diff);

        Ok(result)
    }
}

/// Attaches block-level context to a frame produced by a per-transaction
/// tracer.
fn annotate(
    trace: &mut Trace,
    block_hash: B256,
    block_number: u64,
    transaction: Option<(u64, B256)>,
) {
    trace.block_hash = Some(block_hash);
    trace.block_number = Some(block_number);
    if let Some((position, hash)) = transaction {
        trace.transaction_position = Some(position);
        trace.transaction_hash = Some(hash);
    }
}
