//! Per-opcode trace builder.

use alloy_primitives::{hex, Bytes};
use tracing::trace;

use crate::{
    evm::{CallResult, EvmMessage, EvmTracer, ExecutionContext, Revision, StackView, StatusCode},
    opcode::{self, op, NameTable},
    state::StateView,
    types::{to_padded_word, to_quantity, TraceEx, TraceMemory, TraceOp, TraceStorage, VmTrace},
};

/// A frame whose [`VmTrace`] is still being appended to.
struct VmFrame {
    trace: VmTrace,
    /// Index of the op in the parent frame that initiated this one.
    calling_op: Option<usize>,
}

/// Builds the hierarchical per-opcode trace of one transaction.
///
/// Gas per op is not known at instruction start (the interpreter has not
/// charged yet); each op's cost is resolved at the next instruction start or
/// at frame exit, and call sites subtract the gas observed entering the
/// callee. This is why the tracer keeps reentrant per-frame stacks.
pub struct VmTraceTracer {
    vm_trace: VmTrace,
    frames: Vec<VmFrame>,
    start_gas: Vec<i64>,
    index_prefix: Vec<String>,
    transaction_index: Option<usize>,
    names: Option<&'static NameTable>,
}

impl VmTraceTracer {
    /// `transaction_index` prefixes op indices for block-level traces; pass
    /// `None` for standalone hypothetical calls.
    pub fn new(transaction_index: Option<usize>) -> Self {
        Self {
            vm_trace: VmTrace::default(),
            frames: Vec::new(),
            start_gas: Vec::new(),
            index_prefix: Vec::new(),
            transaction_index,
            names: None,
        }
    }

    /// Consumes the tracer, returning the finished root trace.
    pub fn into_vm_trace(self) -> VmTrace {
        self.vm_trace
    }

    fn finalize_terminal_op(frame: &mut VmFrame, start_gas: i64, result: &CallResult) {
        if frame.trace.ops.is_empty() {
            return;
        }
        // an empty contract "call" (a lone STOP) produces no trace
        if frame.trace.ops.len() == 1 && frame.trace.ops[0].op_code == op::STOP {
            frame.trace.ops.clear();
            return;
        }
        let Some(trace_op) = frame.trace.ops.last_mut() else {
            return;
        };
        match result.status {
            StatusCode::OutOfGas => {
                trace_op.trace_ex.used = result.gas_left;
                trace_op.gas_cost -= result.gas_left;
            }
            StatusCode::UndefinedInstruction => {
                trace_op.trace_ex.used = trace_op.gas_cost;
                trace_op.gas_cost = start_gas - trace_op.gas_cost;
                trace_op.trace_ex.used -= trace_op.gas_cost;
            }
            _ => {
                trace_op.gas_cost -= result.gas_left;
                trace_op.trace_ex.used = result.gas_left;
            }
        }
    }
}

/// Hex-dumps the captured memory operand; a zero-length operand is dropped.
fn fill_memory(mut memory: TraceMemory, frame_memory: &[u8]) -> Option<TraceMemory> {
    if memory.len == 0 {
        return None;
    }
    let start = memory.offset as usize;
    let len = memory.len as usize;
    let mut data = vec![0u8; len];
    if start < frame_memory.len() {
        let available = (frame_memory.len() - start).min(len);
        data[..available].copy_from_slice(&frame_memory[start..start + available]);
    }
    memory.data = format!("0x{}", hex::encode(data));
    Some(memory)
}

/// The words the op pushed, bottom-to-top, as minimal hex.
fn copy_stack(op_code: u8, stack: StackView<'_>) -> Vec<String> {
    let count = opcode::pushed_count(op_code).min(stack.len());
    (0..count)
        .rev()
        .map(|depth| to_quantity(stack.peek(depth)))
        .collect()
}

impl EvmTracer for VmTraceTracer {
    fn on_execution_start(&mut self, rev: Revision, msg: &EvmMessage, code: &[u8]) {
        if self.names.is_none() {
            self.names = Some(opcode::name_table(rev));
        }

        self.start_gas.push(msg.gas);

        if msg.depth == 0 {
            let prefix = match self.transaction_index {
                Some(index) => format!("{index}-"),
                None => String::new(),
            };
            self.index_prefix.push(prefix);
            self.frames.push(VmFrame {
                trace: VmTrace { code: Bytes::copy_from_slice(code), ops: Vec::new() },
                calling_op: None,
            });
        } else {
            let parent_prefix = self.index_prefix.last().cloned().unwrap_or_default();
            let parent = self.frames.last_mut();
            let calling_op = parent
                .as_ref()
                .and_then(|frame| frame.trace.ops.len().checked_sub(1));

            let prefix = match calling_op {
                Some(index) => format!("{parent_prefix}{index}-"),
                None => parent_prefix,
            };

            if let (Some(parent), Some(index)) = (parent, calling_op) {
                // gas left after the op two before this frame, used to cap
                // the gas forwarded to the callee
                let prior_used = index
                    .checked_sub(1)
                    .map(|prior| parent.trace.ops[prior].trace_ex.used);
                let trace_op = &mut parent.trace.ops[index];
                if matches!(trace_op.op_code, op::CALL | op::DELEGATECALL | op::STATICCALL) {
                    if let Some(used) = prior_used {
                        trace_op.call_gas_cap = Some(used - msg.gas);
                    }
                    trace_op.depth = msg.depth;
                    // cost attributed to the call site excludes forwarded gas
                    trace_op.gas_cost -= msg.gas;
                }
            }

            self.index_prefix.push(prefix);
            self.frames.push(VmFrame {
                trace: VmTrace { code: Bytes::copy_from_slice(code), ops: Vec::new() },
                calling_op,
            });
        }

        trace!(
            depth = msg.depth,
            gas = msg.gas,
            recipient = %msg.recipient,
            sender = %msg.sender,
            "vm trace: execution start"
        );
    }

    fn on_instruction_start(
        &mut self,
        pc: usize,
        stack: StackView<'_>,
        context: &ExecutionContext<'_>,
        _state: &dyn StateView,
    ) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let op_code = context.code.get(pc).copied().unwrap_or(op::STOP);

        if let Some(trace_op) = frame.trace.ops.last_mut() {
            if let Some(precompiled_gas) = trace_op.precompiled_call_gas {
                trace_op.gas_cost -= precompiled_gas;
            } else if trace_op.depth == context.depth {
                trace_op.gas_cost -= context.gas_left;
            }
            trace_op.trace_ex.used = context.gas_left;
            if let Some(memory) = trace_op.trace_ex.memory.take() {
                trace_op.trace_ex.memory = fill_memory(memory, context.memory);
            }
            trace_op.trace_ex.stack = copy_stack(trace_op.op_code, stack);
        }

        let prefix = self.index_prefix.last().map(String::as_str).unwrap_or("");
        let idx = format!("{prefix}{}", frame.trace.ops.len());
        let names = self.names.unwrap_or_else(|| opcode::name_table(Revision::Shanghai));
        let op_name = opcode::opcode_label(names, op_code);

        let mut trace_op = TraceOp {
            gas_cost: context.gas_left,
            trace_ex: TraceEx::default(),
            idx,
            // rpcdaemon compatibility
            op_name: if op_name == "KECCAK256" { "SHA3".to_string() } else { op_name },
            pc: pc as u64,
            sub: None,
            op_code,
            depth: context.depth,
            precompiled_call_gas: None,
            call_gas_cap: None,
        };
        trace_op.trace_ex.memory = opcode::memory_operand(op_code, &stack);
        if op_code == op::SSTORE {
            trace_op.trace_ex.storage = Some(TraceStorage {
                key: to_padded_word(stack.peek(0)),
                value: to_padded_word(stack.peek(1)),
            });
        }
        frame.trace.ops.push(trace_op);
    }

    fn on_precompiled_run(&mut self, _result: &CallResult, gas: i64, _state: &dyn StateView) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if let Some(trace_op) = frame.trace.ops.last_mut() {
            trace_op.precompiled_call_gas = Some(gas);
            trace_op.sub = Some(Box::new(VmTrace::default()));
        }
    }

    fn on_execution_end(&mut self, result: &CallResult, _state: &dyn StateView) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        let start_gas = self.start_gas.pop().unwrap_or_default();
        self.index_prefix.pop();

        trace!(
            status = ?result.status,
            start_gas,
            gas_left = result.gas_left,
            "vm trace: execution end"
        );

        Self::finalize_terminal_op(&mut frame, start_gas, result);

        match self.frames.last_mut() {
            Some(parent) => {
                if let Some(index) = frame.calling_op {
                    parent.trace.ops[index].sub = Some(Box::new(frame.trace));
                }
            }
            None => self.vm_trace = frame.trace,
        }
    }
}
