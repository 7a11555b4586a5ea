//! Shadow-state advancement between transactions.

use std::sync::Arc;

use tracing::trace;

use crate::{
    evm::{CallResult, EvmTracer},
    state::{StateAddresses, StateView},
};

/// Mirrors `(balance, nonce, code)` of every touched account into the
/// shared shadow after each transaction, so the next transaction's
/// state-diff computation sees the prior transactions' effects as its
/// baseline.
pub struct IntraBlockStateTracer<S> {
    shadow: Arc<StateAddresses<S>>,
}

impl<S: StateView> IntraBlockStateTracer<S> {
    pub fn new(shadow: Arc<StateAddresses<S>>) -> Self {
        Self { shadow }
    }
}

impl<S: StateView> EvmTracer for IntraBlockStateTracer<S> {
    fn on_reward_granted(&mut self, _result: &CallResult, state: &dyn StateView) {
        let touched = state.touched();
        trace!(touched = touched.len(), "intra-block state: advancing shadow");

        for address in touched {
            self.shadow.set_balance(address, state.balance(address));
            self.shadow.set_nonce(address, state.nonce(address));
            self.shadow.set_code(address, state.code(address));
        }
    }
}
