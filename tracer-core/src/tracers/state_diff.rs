//! Per-account before/after diff builder.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use tracing::trace;

use crate::{
    evm::{CallResult, EvmMessage, EvmTracer, ExecutionContext, Revision, StackView},
    opcode::op,
    state::{StateAddresses, StateView},
    types::{DiffValue, StateDiff, StateDiffEntry},
};

/// Computes the per-account state diff of one transaction.
///
/// SSTORE-touched keys are recorded live during execution; the actual
/// before/after comparison runs once at settlement, using the shared shadow
/// for the "before" side and the live intra-block state for the "after"
/// side. The shadow has already absorbed the effects of earlier
/// transactions in the block, so each transaction diffs against a
/// consistent pre-image.
pub struct StateDiffTracer<S> {
    state_diff: StateDiff,
    shadow: Arc<StateAddresses<S>>,
    diff_storage: BTreeMap<Address, BTreeSet<B256>>,
}

impl<S: StateView> StateDiffTracer<S> {
    pub fn new(shadow: Arc<StateAddresses<S>>) -> Self {
        Self {
            state_diff: StateDiff::new(),
            shadow,
            diff_storage: BTreeMap::new(),
        }
    }

    /// Consumes the tracer, returning the finished diff.
    pub fn into_state_diff(self) -> StateDiff {
        self.state_diff
    }
}

impl<S: StateView> EvmTracer for StateDiffTracer<S> {
    fn on_execution_start(&mut self, _rev: Revision, msg: &EvmMessage, _code: &[u8]) {
        trace!(
            depth = msg.depth,
            recipient = %msg.recipient,
            exists = self.shadow.exists(msg.recipient),
            "state diff: execution start"
        );
    }

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        _state: &dyn StateView,
    ) {
        let op_code = context.code.get(pc).copied().unwrap_or(op::STOP);
        if op_code == op::SSTORE {
            let key = B256::from(stack.peek(0));
            self.diff_storage
                .entry(context.recipient)
                .or_default()
                .insert(key);
        }
    }

    fn on_reward_granted(&mut self, _result: &CallResult, state: &dyn StateView) {
        let touched = state.touched();
        trace!(touched = touched.len(), "state diff: settlement");

        for address in touched {
            let initial_exists = self.shadow.exists(address);
            let exists = state.exists(address);
            let keys = self.diff_storage.get(&address).cloned().unwrap_or_default();

            if initial_exists {
                let initial_balance = self.shadow.balance(address);
                let initial_code = self.shadow.code(address);
                let initial_nonce = self.shadow.nonce(address);
                if exists {
                    let mut entry = StateDiffEntry::default();
                    let mut changed = false;

                    let final_balance = state.balance(address);
                    if initial_balance != final_balance {
                        changed = true;
                        entry.balance = DiffValue::Changed {
                            from: initial_balance.into(),
                            to: final_balance.into(),
                        };
                    }
                    let final_code = state.code(address);
                    if initial_code != final_code {
                        changed = true;
                        entry.code = DiffValue::Changed { from: initial_code, to: final_code };
                    }
                    let final_nonce = state.nonce(address);
                    if initial_nonce != final_nonce {
                        changed = true;
                        entry.nonce = DiffValue::Changed {
                            from: initial_nonce.into(),
                            to: final_nonce.into(),
                        };
                    }
                    for key in keys {
                        let original = state.original_storage(address, key);
                        let current = state.current_storage(address, key);
                        if original != current {
                            changed = true;
                            entry
                                .storage
                                .insert(key, DiffValue::Changed { from: original, to: current });
                        }
                    }
                    if changed {
                        self.state_diff.insert(address, entry);
                    }
                } else {
                    let mut entry = StateDiffEntry {
                        balance: DiffValue::Removed(initial_balance.into()),
                        code: DiffValue::Removed(initial_code),
                        nonce: DiffValue::Removed(initial_nonce.into()),
                        storage: BTreeMap::new(),
                    };
                    for key in keys {
                        entry
                            .storage
                            .insert(key, DiffValue::Removed(state.original_storage(address, key)));
                    }
                    self.state_diff.insert(address, entry);
                }
            } else if exists {
                let balance = state.balance(address);
                let code = state.code(address);
                let nonce = state.nonce(address);
                let mut entry = StateDiffEntry {
                    balance: DiffValue::Added(balance.into()),
                    code: DiffValue::Added(code.clone()),
                    nonce: DiffValue::Added(nonce.into()),
                    storage: BTreeMap::new(),
                };
                // an account that briefly existed with no interesting state
                // is not a diff; any touched slot cancels the elision
                let mut dust = balance.is_zero() && code.is_empty() && nonce == 0;
                for key in keys {
                    entry
                        .storage
                        .insert(key, DiffValue::Added(state.current_storage(address, key)));
                    dust = false;
                }
                if !dust {
                    self.state_diff.insert(address, entry);
                }
            }
        }
    }
}
