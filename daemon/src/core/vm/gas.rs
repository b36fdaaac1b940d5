//! Flat gas schedule, one static cost per opcode plus a few dynamic parts
//! charged by the handlers themselves.

use primitive_types::U256;

use super::opcode::*;

pub const ZERO: u64 = 0;
pub const BASE: u64 = 2;
pub const VERYLOW: u64 = 3;
pub const LOW: u64 = 5;
pub const MID: u64 = 8;
pub const HIGH: u64 = 10;

pub const JUMPDEST_COST: u64 = 1;
pub const BALANCE_COST: u64 = 400;
pub const EXTCODESIZE_COST: u64 = 700;
pub const SLOAD_COST: u64 = 200;
pub const SSTORE_COST: u64 = 5000;
pub const SHA3_COST: u64 = 30;
pub const SHA3_WORD_COST: u64 = 6;
pub const COPY_WORD_COST: u64 = 3;
pub const LOG_COST: u64 = 375;
pub const LOG_TOPIC_COST: u64 = 375;
pub const LOG_DATA_COST: u64 = 8;
pub const EXP_COST: u64 = 10;
pub const EXP_BYTE_COST: u64 = 50;
pub const CALL_COST: u64 = 700;
pub const CALL_VALUE_COST: u64 = 9000;
pub const MEMORY_WORD_COST: u64 = 3;

/// Static portion of an opcode's cost; dynamic parts (copies, hashing,
/// logs, memory growth) are charged inside the handlers. Unknown opcodes
/// cost nothing here, the dispatch loop rejects them anyway.
pub fn static_cost(opcode: u8) -> u64 {
    match opcode {
        STOP | RETURN | REVERT => ZERO,
        ADDRESS | ORIGIN | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE
        | RETURNDATASIZE | COINBASE | TIMESTAMP | NUMBER | GASLIMIT | CHAINID | POP | PC
        | MSIZE | GAS => BASE,
        ADD | SUB | LT | GT | SLT | SGT | EQ | ISZERO | AND | OR | XOR | NOT | BYTE | SHL
        | SHR | SAR | CALLDATALOAD | MLOAD | MSTORE | MSTORE8 | CALLDATACOPY | CODECOPY
        | RETURNDATACOPY => VERYLOW,
        MUL | DIV | SDIV | MOD | SMOD | SIGNEXTEND => LOW,
        ADDMOD | MULMOD | JUMP => MID,
        JUMPI => HIGH,
        EXP => EXP_COST,
        SHA3 => SHA3_COST,
        BALANCE => BALANCE_COST,
        EXTCODESIZE => EXTCODESIZE_COST,
        SLOAD => SLOAD_COST,
        SSTORE => SSTORE_COST,
        JUMPDEST => JUMPDEST_COST,
        CALL => CALL_COST,
        op if (PUSH1..=PUSH32).contains(&op) => VERYLOW,
        op if (DUP1..=DUP16).contains(&op) => VERYLOW,
        op if (SWAP1..=SWAP16).contains(&op) => VERYLOW,
        op if (LOG0..=LOG4).contains(&op) => LOG_COST,
        _ => ZERO,
    }
}

/// Cost of copying `len` bytes to or from memory.
pub fn copy_cost(len: usize) -> u64 {
    COPY_WORD_COST * words(len)
}

/// Dynamic part of the SHA3 cost, per word hashed.
pub fn sha3_cost(len: usize) -> u64 {
    SHA3_WORD_COST * words(len)
}

/// Dynamic part of a LOG: per-topic and per-byte charges.
pub fn log_cost(topics: usize, len: usize) -> u64 {
    LOG_TOPIC_COST * topics as u64 + LOG_DATA_COST * len as u64
}

/// Dynamic EXP cost, scaling with the byte length of the exponent.
pub fn exp_cost(exponent: U256) -> u64 {
    let bits = exponent.bits() as u64;
    EXP_BYTE_COST * bits.div_ceil(8)
}

pub fn words(len: usize) -> u64 {
    (len as u64).div_ceil(32)
}
