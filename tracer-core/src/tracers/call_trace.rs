//! Call/create frame tree builder.

use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use tracing::trace;

use crate::{
    evm::{CallKind, CallResult, EvmMessage, EvmTracer, Revision, StatusCode},
    state::StateView,
    types::{Action, Trace, TraceAction, TraceResult},
};

/// Builds the flat vector of call/create frames of one transaction.
///
/// Frames are stored in entry order; `index_stack` identifies the current
/// call ancestry, which is how `trace_address` and `subtraces` are assigned
/// at the moment a child frame is entered.
pub struct TraceTracer<S> {
    traces: Vec<Trace>,
    initial: Arc<S>,
    index_stack: Vec<usize>,
    start_gas: Vec<i64>,
    current_depth: i32,
    initial_gas: i64,
    created: HashSet<Address>,
}

impl<S: StateView> TraceTracer<S> {
    /// `initial` is the world state the trace request is anchored at; it
    /// backs the create-vs-call classification.
    pub fn new(initial: Arc<S>) -> Self {
        Self {
            traces: Vec::new(),
            initial,
            index_stack: Vec::new(),
            start_gas: Vec::new(),
            current_depth: 0,
            initial_gas: 0,
            created: HashSet::new(),
        }
    }

    /// Consumes the tracer, returning the finished frames in entry order.
    pub fn into_traces(self) -> Vec<Trace> {
        self.traces
    }

    /// Folds an exceptional halt into the frame: the error string replaces
    /// the result.
    fn apply_error(trace: &mut Trace, status: StatusCode) {
        let message = match status {
            StatusCode::Revert => "Reverted",
            StatusCode::OutOfGas | StatusCode::StackOverflow => "Out of gas",
            StatusCode::UndefinedInstruction | StatusCode::InvalidInstruction => "Bad instruction",
            StatusCode::StackUnderflow => "Stack underflow",
            StatusCode::BadJumpDestination => "Bad jump destination",
            StatusCode::Success | StatusCode::Failure => "",
        };
        trace.error = Some(message.to_string());
        trace.trace_result = None;
    }
}

impl<S: StateView> EvmTracer for TraceTracer<S> {
    fn on_execution_start(&mut self, _rev: Revision, msg: &EvmMessage, code: &[u8]) {
        self.current_depth = msg.depth;

        // existence test instead of msg.kind: tolerates hosts that do not
        // report the call kind reliably for nested creates
        let create = !self.initial.exists(msg.recipient)
            && !self.created.contains(&msg.recipient)
            && msg.recipient != msg.code_address;

        self.start_gas.push(msg.gas);

        let mut action = TraceAction {
            call_type: None,
            from: msg.sender,
            gas: msg.gas,
            init: None,
            input: None,
            to: None,
            value: msg.value,
        };
        let mut result = TraceResult::default();

        if create {
            self.created.insert(msg.recipient);
            action.init = Some(Bytes::copy_from_slice(code));
            result.code = Some(Bytes::new());
            result.address = Some(msg.recipient);
        } else {
            result.output = Some(Bytes::new());
            action.input = Some(msg.input.clone());
            action.to = Some(msg.recipient);
            match msg.kind {
                CallKind::Call => {
                    action.call_type =
                        Some(if msg.is_static { "staticcall" } else { "call" }.to_string());
                }
                CallKind::DelegateCall => {
                    action.call_type = Some("delegatecall".to_string());
                    // the frame runs the delegate's code in the caller's
                    // context: from is the recipient, to the code address
                    action.to = Some(msg.code_address);
                    action.from = msg.recipient;
                }
                CallKind::CallCode => {
                    action.call_type = Some("callcode".to_string());
                }
                CallKind::Create | CallKind::Create2 => {}
            }
        }

        let mut frame = Trace {
            action: Action::Call(action),
            block_hash: None,
            block_number: None,
            error: None,
            trace_result: Some(result),
            sub_traces: 0,
            trace_address: Vec::new(),
            transaction_hash: None,
            transaction_position: None,
            trace_type: if create { "create" } else { "call" }.to_string(),
        };

        let index = self.traces.len();
        if msg.depth > 0 {
            if let Some(&parent) = self.index_stack.last() {
                let calling = &mut self.traces[parent];
                frame.trace_address = calling.trace_address.clone();
                frame.trace_address.push(calling.sub_traces);
                calling.sub_traces += 1;
            }
        } else {
            self.initial_gas = msg.gas;
        }

        trace!(
            depth = msg.depth,
            create,
            gas = msg.gas,
            sender = %msg.sender,
            recipient = %msg.recipient,
            "call trace: execution start"
        );

        self.traces.push(frame);
        self.index_stack.push(index);
    }

    fn on_execution_end(&mut self, result: &CallResult, _state: &dyn StateView) {
        let Some(index) = self.index_stack.pop() else {
            return;
        };
        let start_gas = self.start_gas.pop().unwrap_or_default();
        let trace = &mut self.traces[index];

        if self.current_depth > 0 {
            if let Some(trace_result) = trace.trace_result.as_mut() {
                if trace_result.code.is_some() {
                    trace_result.code = Some(result.data.clone());
                } else if trace_result.output.is_some() {
                    trace_result.output = Some(result.data.clone());
                }
            }
        }
        self.current_depth -= 1;

        match result.status {
            StatusCode::Success => {
                if let Some(trace_result) = trace.trace_result.as_mut() {
                    trace_result.gas_used = start_gas - result.gas_left;
                }
            }
            status => Self::apply_error(trace, status),
        }

        trace!(
            status = ?result.status,
            start_gas,
            gas_left = result.gas_left,
            "call trace: execution end"
        );
    }

    fn on_reward_granted(&mut self, result: &CallResult, _state: &dyn StateView) {
        // post-settlement result of the top-level call, charged against the
        // gas supplied at transaction entry
        let initial_gas = self.initial_gas;
        let Some(trace) = self.traces.first_mut() else {
            return;
        };

        match result.status {
            StatusCode::Success => {
                if let Some(trace_result) = trace.trace_result.as_mut() {
                    trace_result.gas_used = initial_gas - result.gas_left;
                    if !result.data.is_empty() {
                        if trace_result.code.is_some() {
                            trace_result.code = Some(result.data.clone());
                        } else if trace_result.output.is_some() {
                            trace_result.output = Some(result.data.clone());
                        }
                    }
                }
            }
            status => Self::apply_error(trace, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use std::collections::{BTreeMap, BTreeSet};

    #[derive(Default)]
    struct TestState {
        existing: BTreeMap<Address, U256>,
    }

    impl StateView for TestState {
        fn exists(&self, address: Address) -> bool {
            self.existing.contains_key(&address)
        }

        fn balance(&self, address: Address) -> U256 {
            self.existing.get(&address).copied().unwrap_or_default()
        }

        fn nonce(&self, _address: Address) -> u64 {
            0
        }

        fn code(&self, _address: Address) -> Bytes {
            Bytes::new()
        }

        fn original_storage(&self, _address: Address, _key: B256) -> B256 {
            B256::ZERO
        }

        fn current_storage(&self, _address: Address, _key: B256) -> B256 {
            B256::ZERO
        }

        fn touched(&self) -> BTreeSet<Address> {
            BTreeSet::new()
        }
    }

    fn existing_state(addresses: &[Address]) -> Arc<TestState> {
        let mut state = TestState::default();
        for address in addresses {
            state.existing.insert(*address, U256::from(1));
        }
        Arc::new(state)
    }

    fn call_message(
        depth: i32,
        gas: i64,
        sender: Address,
        recipient: Address,
        kind: CallKind,
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

    fn success(gas_left: i64, data: Bytes) -> CallResult {
        CallResult { status: StatusCode::Success, gas_left, data }
    }

    #[test]
    fn test_trace_address_assignment() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let c = Address::repeat_byte(0x0c);
        let state = existing_state(&[a, b, c]);
        let mut tracer = TraceTracer::new(state.clone());

        tracer.on_execution_start(
            Revision::Shanghai,
            &call_message(0, 1000, a, b, CallKind::Call),
            &[],
        );
        // two children entered in order
        tracer.on_execution_start(
            Revision::Shanghai,
            &call_message(1, 500, b, c, CallKind::Call),
            &[],
        );
        tracer.on_execution_end(&success(400, Bytes::new()), &*state);
        tracer.on_execution_start(
            Revision::Shanghai,
            &call_message(1, 300, b, c, CallKind::Call),
            &[],
        );
        tracer.on_execution_end(&success(200, Bytes::new()), &*state);
        tracer.on_execution_end(&success(100, Bytes::new()), &*state);
        tracer.on_reward_granted(&success(100, Bytes::new()), &*state);

        let traces = tracer.into_traces();
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[0].trace_address, Vec::<usize>::new());
        assert_eq!(traces[0].sub_traces, 2);
        assert_eq!(traces[1].trace_address, vec![0]);
        assert_eq!(traces[2].trace_address, vec![1]);
    }

    #[test]
    fn test_delegatecall_swaps_from_and_to() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let c = Address::repeat_byte(0x0c);
        let state = existing_state(&[a, b, c]);
        let mut tracer = TraceTracer::new(state.clone());

        tracer.on_execution_start(
            Revision::Shanghai,
            &call_message(0, 1000, a, b, CallKind::Call),
            &[],
        );
        let mut inner = call_message(1, 500, b, b, CallKind::DelegateCall);
        inner.code_address = c;
        tracer.on_execution_start(Revision::Shanghai, &inner, &[]);
        tracer.on_execution_end(&success(400, Bytes::new()), &*state);
        tracer.on_execution_end(&success(100, Bytes::new()), &*state);
        tracer.on_reward_granted(&success(100, Bytes::new()), &*state);

        let traces = tracer.into_traces();
        let Action::Call(action) = &traces[1].action else {
            panic!("expected call action");
        };
        assert_eq!(action.call_type.as_deref(), Some("delegatecall"));
        assert_eq!(action.from, b);
        assert_eq!(action.to, Some(c));
    }

    #[test]
    fn test_error_mapping_drops_result() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let state = existing_state(&[a, b]);
        let mut tracer = TraceTracer::new(state.clone());

        tracer.on_execution_start(
            Revision::Shanghai,
            &call_message(0, 1000, a, b, CallKind::Call),
            &[],
        );
        tracer.on_execution_end(
            &CallResult { status: StatusCode::OutOfGas, gas_left: 0, data: Bytes::new() },
            &*state,
        );

        let traces = tracer.into_traces();
        assert_eq!(traces[0].error.as_deref(), Some("Out of gas"));
        assert!(traces[0].trace_result.is_none());
    }

    #[test]
    fn test_create_classification_by_existence() {
        let a = Address::repeat_byte(0x0a);
        let fresh = Address::repeat_byte(0xf0);
        let state = existing_state(&[a]);
        let mut tracer = TraceTracer::new(state.clone());

        let mut msg = call_message(0, 1000, a, fresh, CallKind::Create2);
        msg.code_address = Address::ZERO;
        let init_code = [0x60, 0x00];
        tracer.on_execution_start(Revision::Shanghai, &msg, &init_code);
        tracer.on_execution_end(&success(500, Bytes::from_static(&[0xfe])), &*state);
        tracer.on_reward_granted(&success(500, Bytes::new()), &*state);

        let traces = tracer.into_traces();
        assert_eq!(traces[0].trace_type, "create");
        let Action::Call(action) = &traces[0].action else {
            panic!("expected call action");
        };
        assert_eq!(action.init, Some(Bytes::copy_from_slice(&init_code)));
        assert!(action.call_type.is_none());
        assert!(action.to.is_none());
        let result = traces[0].trace_result.as_ref().unwrap();
        assert_eq!(result.address, Some(fresh));
        assert_eq!(result.gas_used, 500);
        assert!(result.output.is_none());
    }

    #[test]
    fn test_reward_overwrites_top_frame_output() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let state = existing_state(&[a, b]);
        let mut tracer = TraceTracer::new(state.clone());

        tracer.on_execution_start(
            Revision::Shanghai,
            &call_message(0, 1000, a, b, CallKind::Call),
            &[],
        );
        tracer.on_execution_end(&success(400, Bytes::new()), &*state);
        tracer.on_reward_granted(&success(370, Bytes::from_static(&[0x01, 0x02])), &*state);

        let traces = tracer.into_traces();
        let result = traces[0].trace_result.as_ref().unwrap();
        // settlement recharges against the transaction's initial gas
        assert_eq!(result.gas_used, 1000 - 370);
        assert_eq!(result.output, Some(Bytes::from_static(&[0x01, 0x02])));
    }
}
