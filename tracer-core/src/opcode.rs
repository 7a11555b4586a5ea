//! Opcode classification and revision-keyed name tables.
//!
//! The classifier answers two questions the vmTrace tracer needs at every
//! instruction boundary: how many stack entries an op produces, and which
//! memory slice it will read or write. Name tables mirror the interpreter's
//! revision-keyed tables; opcodes not yet activated in a revision have no
//! name and render through [`opcode_label`]'s "not defined" form.

use std::sync::LazyLock;

use alloy_primitives::U256;

use crate::{
    evm::{Revision, StackView},
    types::TraceMemory,
};

/// Canonical opcode values.
pub mod op {
    pub const STOP: u8 = 0x00;
    pub const ADD: u8 = 0x01;
    pub const MUL: u8 = 0x02;
    pub const SUB: u8 = 0x03;
    pub const DIV: u8 = 0x04;
    pub const SDIV: u8 = 0x05;
    pub const MOD: u8 = 0x06;
    pub const SMOD: u8 = 0x07;
    pub const ADDMOD: u8 = 0x08;
    pub const MULMOD: u8 = 0x09;
    pub const EXP: u8 = 0x0a;
    pub const SIGNEXTEND: u8 = 0x0b;
    pub const LT: u8 = 0x10;
    pub const GT: u8 = 0x11;
    pub const SLT: u8 = 0x12;
    pub const SGT: u8 = 0x13;
    pub const EQ: u8 = 0x14;
    pub const ISZERO: u8 = 0x15;
    pub const AND: u8 = 0x16;
    pub const OR: u8 = 0x17;
    pub const XOR: u8 = 0x18;
    pub const NOT: u8 = 0x19;
    pub const BYTE: u8 = 0x1a;
    pub const SHL: u8 = 0x1b;
    pub const SHR: u8 = 0x1c;
    pub const SAR: u8 = 0x1d;
    pub const KECCAK256: u8 = 0x20;
    pub const ADDRESS: u8 = 0x30;
    pub const BALANCE: u8 = 0x31;
    pub const ORIGIN: u8 = 0x32;
    pub const CALLER: u8 = 0x33;
    pub const CALLVALUE: u8 = 0x34;
    pub const CALLDATALOAD: u8 = 0x35;
    pub const CALLDATASIZE: u8 = 0x36;
    pub const CALLDATACOPY: u8 = 0x37;
    pub const CODESIZE: u8 = 0x38;
    pub const CODECOPY: u8 = 0x39;
    pub const GASPRICE: u8 = 0x3a;
    pub const EXTCODESIZE: u8 = 0x3b;
    pub const EXTCODECOPY: u8 = 0x3c;
    pub const RETURNDATASIZE: u8 = 0x3d;
    pub const RETURNDATACOPY: u8 = 0x3e;
    pub const EXTCODEHASH: u8 = 0x3f;
    pub const BLOCKHASH: u8 = 0x40;
    pub const COINBASE: u8 = 0x41;
    pub const TIMESTAMP: u8 = 0x42;
    pub const NUMBER: u8 = 0x43;
    pub const PREVRANDAO: u8 = 0x44;
    pub const GASLIMIT: u8 = 0x45;
    pub const CHAINID: u8 = 0x46;
    pub const SELFBALANCE: u8 = 0x47;
    pub const BASEFEE: u8 = 0x48;
    pub const POP: u8 = 0x50;
    pub const MLOAD: u8 = 0x51;
    pub const MSTORE: u8 = 0x52;
    pub const MSTORE8: u8 = 0x53;
    pub const SLOAD: u8 = 0x54;
    pub const SSTORE: u8 = 0x55;
    pub const JUMP: u8 = 0x56;
    pub const JUMPI: u8 = 0x57;
    pub const PC: u8 = 0x58;
    pub const MSIZE: u8 = 0x59;
    pub const GAS: u8 = 0x5a;
    pub const JUMPDEST: u8 = 0x5b;
    pub const PUSH0: u8 = 0x5f;
    pub const PUSH1: u8 = 0x60;
    pub const PUSH32: u8 = 0x7f;
    pub const DUP1: u8 = 0x80;
    pub const DUP16: u8 = 0x8f;
    pub const SWAP1: u8 = 0x90;
    pub const SWAP16: u8 = 0x9f;
    pub const LOG0: u8 = 0xa0;
    pub const LOG4: u8 = 0xa4;
    pub const CREATE: u8 = 0xf0;
    pub const CALL: u8 = 0xf1;
    pub const CALLCODE: u8 = 0xf2;
    pub const RETURN: u8 = 0xf3;
    pub const DELEGATECALL: u8 = 0xf4;
    pub const CREATE2: u8 = 0xf5;
    pub const STATICCALL: u8 = 0xfa;
    pub const REVERT: u8 = 0xfd;
    pub const INVALID: u8 = 0xfe;
    pub const SELFDESTRUCT: u8 = 0xff;
}

/// Number of stack entries the op *produces* (not consumes).
///
/// DUPn and SWAPn report `n + 1`: the duplicated value plus the positions
/// the op leaves rewritten.
pub fn pushed_count(op_code: u8) -> usize {
    match op_code {
        op::PUSH0 | op::PUSH1..=op::PUSH32 => 1,
        op::DUP1..=op::DUP16 => (op_code - op::DUP1) as usize + 2,
        op::SWAP1..=op::SWAP16 => (op_code - op::SWAP1) as usize + 2,
        // arithmetic, bitwise, comparison and hash ops
        op::ADD
        | op::MUL
        | op::SUB
        | op::DIV
        | op::SDIV
        | op::MOD
        | op::SMOD
        | op::ADDMOD
        | op::MULMOD
        | op::EXP
        | op::SIGNEXTEND
        | op::LT
        | op::GT
        | op::SLT
        | op::SGT
        | op::EQ
        | op::ISZERO
        | op::AND
        | op::OR
        | op::XOR
        | op::NOT
        | op::BYTE
        | op::SHL
        | op::SHR
        | op::SAR
        | op::KECCAK256
        // environment and block getters
        | op::ADDRESS
        | op::BALANCE
        | op::ORIGIN
        | op::CALLER
        | op::CALLVALUE
        | op::CALLDATALOAD
        | op::CALLDATASIZE
        | op::CODESIZE
        | op::GASPRICE
        | op::EXTCODESIZE
        | op::EXTCODEHASH
        | op::RETURNDATASIZE
        | op::BLOCKHASH
        | op::COINBASE
        | op::TIMESTAMP
        | op::NUMBER
        | op::PREVRANDAO
        | op::GASLIMIT
        | op::CHAINID
        | op::SELFBALANCE
        | op::BASEFEE
        | op::SLOAD
        | op::MLOAD
        | op::PC
        | op::MSIZE
        | op::GAS
        // sub-context initiators leave the status word
        | op::CALL
        | op::CALLCODE
        | op::DELEGATECALL
        | op::STATICCALL
        | op::CREATE
        | op::CREATE2 => 1,
        _ => 0,
    }
}

/// Memory slice the op is about to read or write, if any.
///
/// CREATE/CREATE2 report the `(0, 0)` sentinel: sub-frame output lands in
/// memory but its size is unknown until the frame returns.
pub fn memory_operand(op_code: u8, stack: &StackView<'_>) -> Option<TraceMemory> {
    fn low(value: U256) -> u64 {
        value.as_limbs()[0]
    }

    let (offset, len) = match op_code {
        op::MSTORE | op::MLOAD => (low(stack.peek(0)), 32),
        op::MSTORE8 => (low(stack.peek(0)), 1),
        op::RETURNDATACOPY | op::CALLDATACOPY | op::CODECOPY => {
            (low(stack.peek(0)), low(stack.peek(2)))
        }
        op::STATICCALL | op::DELEGATECALL => (low(stack.peek(4)), low(stack.peek(5))),
        op::CALL | op::CALLCODE => (low(stack.peek(5)), low(stack.peek(6))),
        op::CREATE | op::CREATE2 => (0, 0),
        _ => return None,
    };
    Some(TraceMemory { data: String::new(), offset, len })
}

/// Opcode-name table for one revision; `None` marks unassigned opcodes.
pub type NameTable = [Option<&'static str>; 256];

/// Revision the opcode became part of the instruction set in.
fn introduced_in(op_code: u8) -> Revision {
    match op_code {
        op::DELEGATECALL => Revision::Homestead,
        op::RETURNDATASIZE | op::RETURNDATACOPY | op::STATICCALL | op::REVERT => {
            Revision::Byzantium
        }
        op::SHL | op::SHR | op::SAR | op::EXTCODEHASH | op::CREATE2 => Revision::Constantinople,
        op::CHAINID | op::SELFBALANCE => Revision::Istanbul,
        op::BASEFEE => Revision::London,
        op::PUSH0 => Revision::Shanghai,
        _ => Revision::Frontier,
    }
}

fn latest_names() -> NameTable {
    const PUSH: [&str; 32] = [
        "PUSH1", "PUSH2", "PUSH3", "PUSH4", "PUSH5", "PUSH6", "PUSH7", "PUSH8", "PUSH9",
        "PUSH10", "PUSH11", "PUSH12", "PUSH13", "PUSH14", "PUSH15", "PUSH16", "PUSH17",
        "PUSH18", "PUSH19", "PUSH20", "PUSH21", "PUSH22", "PUSH23", "PUSH24", "PUSH25",
        "PUSH26", "PUSH27", "PUSH28", "PUSH29", "PUSH30", "PUSH31", "PUSH32",
    ];
    const DUP: [&str; 16] = [
        "DUP1", "DUP2", "DUP3", "DUP4", "DUP5", "DUP6", "DUP7", "DUP8", "DUP9", "DUP10",
        "DUP11", "DUP12", "DUP13", "DUP14", "DUP15", "DUP16",
    ];
    const SWAP: [&str; 16] = [
        "SWAP1", "SWAP2", "SWAP3", "SWAP4", "SWAP5", "SWAP6", "SWAP7", "SWAP8", "SWAP9",
        "SWAP10", "SWAP11", "SWAP12", "SWAP13", "SWAP14", "SWAP15", "SWAP16",
    ];
    const LOG: [&str; 5] = ["LOG0", "LOG1", "LOG2", "LOG3", "LOG4"];

    let mut names: NameTable = [None; 256];
    names[op::STOP as usize] = Some("STOP");
    names[op::ADD as usize] = Some("ADD");
    names[op::MUL as usize] = Some("MUL");
    names[op::SUB as usize] = Some("SUB");
    names[op::DIV as usize] = Some("DIV");
    names[op::SDIV as usize] = Some("SDIV");
    names[op::MOD as usize] = Some("MOD");
    names[op::SMOD as usize] = Some("SMOD");
    names[op::ADDMOD as usize] = Some("ADDMOD");
    names[op::MULMOD as usize] = Some("MULMOD");
    names[op::EXP as usize] = Some("EXP");
    names[op::SIGNEXTEND as usize] = Some("SIGNEXTEND");
    names[op::LT as usize] = Some("LT");
    names[op::GT as usize] = Some("GT");
    names[op::SLT as usize] = Some("SLT");
    names[op::SGT as usize] = Some("SGT");
    names[op::EQ as usize] = Some("EQ");
    names[op::ISZERO as usize] = Some("ISZERO");
    names[op::AND as usize] = Some("AND");
    names[op::OR as usize] = Some("OR");
    names[op::XOR as usize] = Some("XOR");
    names[op::NOT as usize] = Some("NOT");
    names[op::BYTE as usize] = Some("BYTE");
    names[op::SHL as usize] = Some("SHL");
    names[op::SHR as usize] = Some("SHR");
    names[op::SAR as usize] = Some("SAR");
    names[op::KECCAK256 as usize] = Some("KECCAK256");
    names[op::ADDRESS as usize] = Some("ADDRESS");
    names[op::BALANCE as usize] = Some("BALANCE");
    names[op::ORIGIN as usize] = Some("ORIGIN");
    names[op::CALLER as usize] = Some("CALLER");
    names[op::CALLVALUE as usize] = Some("CALLVALUE");
    names[op::CALLDATALOAD as usize] = Some("CALLDATALOAD");
    names[op::CALLDATASIZE as usize] = Some("CALLDATASIZE");
    names[op::CALLDATACOPY as usize] = Some("CALLDATACOPY");
    names[op::CODESIZE as usize] = Some("CODESIZE");
    names[op::CODECOPY as usize] = Some("CODECOPY");
    names[op::GASPRICE as usize] = Some("GASPRICE");
    names[op::EXTCODESIZE as usize] = Some("EXTCODESIZE");
    names[op::EXTCODECOPY as usize] = Some("EXTCODECOPY");
    names[op::RETURNDATASIZE as usize] = Some("RETURNDATASIZE");
    names[op::RETURNDATACOPY as usize] = Some("RETURNDATACOPY");
    names[op::EXTCODEHASH as usize] = Some("EXTCODEHASH");
    names[op::BLOCKHASH as usize] = Some("BLOCKHASH");
    names[op::COINBASE as usize] = Some("COINBASE");
    names[op::TIMESTAMP as usize] = Some("TIMESTAMP");
    names[op::NUMBER as usize] = Some("NUMBER");
    names[op::PREVRANDAO as usize] = Some("PREVRANDAO");
    names[op::GASLIMIT as usize] = Some("GASLIMIT");
    names[op::CHAINID as usize] = Some("CHAINID");
    names[op::SELFBALANCE as usize] = Some("SELFBALANCE");
    names[op::BASEFEE as usize] = Some("BASEFEE");
    names[op::POP as usize] = Some("POP");
    names[op::MLOAD as usize] = Some("MLOAD");
    names[op::MSTORE as usize] = Some("MSTORE");
    names[op::MSTORE8 as usize] = Some("MSTORE8");
    names[op::SLOAD as usize] = Some("SLOAD");
    names[op::SSTORE as usize] = Some("SSTORE");
    names[op::JUMP as usize] = Some("JUMP");
    names[op::JUMPI as usize] = Some("JUMPI");
    names[op::PC as usize] = Some("PC");
    names[op::MSIZE as usize] = Some("MSIZE");
    names[op::GAS as usize] = Some("GAS");
    names[op::JUMPDEST as usize] = Some("JUMPDEST");
    names[op::PUSH0 as usize] = Some("PUSH0");
    for (i, name) in PUSH.iter().copied().enumerate() {
        names[op::PUSH1 as usize + i] = Some(name);
    }
    for (i, name) in DUP.iter().copied().enumerate() {
        names[op::DUP1 as usize + i] = Some(name);
    }
    for (i, name) in SWAP.iter().copied().enumerate() {
        names[op::SWAP1 as usize + i] = Some(name);
    }
    for (i, name) in LOG.iter().copied().enumerate() {
        names[op::LOG0 as usize + i] = Some(name);
    }
    names[op::CREATE as usize] = Some("CREATE");
    names[op::CALL as usize] = Some("CALL");
    names[op::CALLCODE as usize] = Some("CALLCODE");
    names[op::RETURN as usize] = Some("RETURN");
    names[op::DELEGATECALL as usize] = Some("DELEGATECALL");
    names[op::CREATE2 as usize] = Some("CREATE2");
    names[op::STATICCALL as usize] = Some("STATICCALL");
    names[op::REVERT as usize] = Some("REVERT");
    names[op::INVALID as usize] = Some("INVALID");
    names[op::SELFDESTRUCT as usize] = Some("SELFDESTRUCT");
    names
}

static NAME_TABLES: LazyLock<[NameTable; Revision::COUNT]> = LazyLock::new(|| {
    let latest = latest_names();
    std::array::from_fn(|i| {
        let rev = Revision::ALL[i];
        let mut table = latest;
        for op_code in 0..=u8::MAX {
            if introduced_in(op_code) > rev {
                table[op_code as usize] = None;
            }
        }
        if rev < Revision::Paris {
            table[op::PREVRANDAO as usize] = Some("DIFFICULTY");
        }
        table
    })
});

/// The process-wide read-only name table for a revision.
pub fn name_table(rev: Revision) -> &'static NameTable {
    &NAME_TABLES[rev as usize]
}

/// Display name of an opcode; unknown opcodes render as
/// `opcode 0x<hex> not defined` with a single nibble for values below 16.
pub fn opcode_label(names: &NameTable, op_code: u8) -> String {
    match names[op_code as usize] {
        Some(name) => name.to_string(),
        None => format!("opcode 0x{op_code:x} not defined"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pushed_count() {
        assert_eq!(pushed_count(op::PUSH1), 1);
        assert_eq!(pushed_count(op::PUSH32), 1);
        assert_eq!(pushed_count(op::PUSH0), 1);
        assert_eq!(pushed_count(op::DUP1), 2);
        assert_eq!(pushed_count(op::DUP16), 17);
        assert_eq!(pushed_count(op::SWAP1), 2);
        assert_eq!(pushed_count(op::SWAP16), 17);
        assert_eq!(pushed_count(op::CALL), 1);
        assert_eq!(pushed_count(op::CREATE2), 1);
        assert_eq!(pushed_count(op::SSTORE), 0);
        assert_eq!(pushed_count(op::JUMPDEST), 0);
        assert_eq!(pushed_count(op::LOG0), 0);
        assert_eq!(pushed_count(op::RETURN), 0);
    }

    #[test]
    fn test_memory_operand_layouts() {
        // stack bottom-to-top; peeks address from the top
        let slots: Vec<U256> = (1..=8u64).map(U256::from).collect();
        let stack = StackView::new(&slots);

        let mstore = memory_operand(op::MSTORE, &stack).unwrap();
        assert_eq!((mstore.offset, mstore.len), (8, 32));

        let mstore8 = memory_operand(op::MSTORE8, &stack).unwrap();
        assert_eq!((mstore8.offset, mstore8.len), (8, 1));

        let calldatacopy = memory_operand(op::CALLDATACOPY, &stack).unwrap();
        assert_eq!((calldatacopy.offset, calldatacopy.len), (8, 6));

        let staticcall = memory_operand(op::STATICCALL, &stack).unwrap();
        assert_eq!((staticcall.offset, staticcall.len), (4, 3));

        let call = memory_operand(op::CALL, &stack).unwrap();
        assert_eq!((call.offset, call.len), (3, 2));

        let create = memory_operand(op::CREATE2, &stack).unwrap();
        assert_eq!((create.offset, create.len), (0, 0));

        assert!(memory_operand(op::ADD, &stack).is_none());
    }

    #[test]
    fn test_name_tables_are_revision_keyed() {
        let frontier = name_table(Revision::Frontier);
        let homestead = name_table(Revision::Homestead);
        let paris = name_table(Revision::Paris);

        assert_eq!(frontier[op::DELEGATECALL as usize], None);
        assert_eq!(homestead[op::DELEGATECALL as usize], Some("DELEGATECALL"));
        assert_eq!(homestead[op::PREVRANDAO as usize], Some("DIFFICULTY"));
        assert_eq!(paris[op::PREVRANDAO as usize], Some("PREVRANDAO"));
        assert_eq!(paris[op::PUSH0 as usize], None);
        assert_eq!(
            name_table(Revision::Shanghai)[op::PUSH0 as usize],
            Some("PUSH0")
        );
    }

    #[test]
    fn test_unknown_opcode_label() {
        let names = name_table(Revision::Shanghai);
        assert_eq!(opcode_label(names, op::KECCAK256), "KECCAK256");
        assert_eq!(opcode_label(names, 0x0c), "opcode 0xc not defined");
        assert_eq!(opcode_label(names, 0xef), "opcode 0xef not defined");
    }
}
