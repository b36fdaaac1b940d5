//! The 256-bit word virtual machine.
//!
//! Bytecode executes against the world state under a per-frame gas budget.
//! The dispatch loop fetches one opcode byte at a time, charges its static
//! cost, then runs the handler; handlers charge any dynamic part (copies,
//! hashing, memory growth) themselves. Sub-calls recurse through the same
//! loop with their own frame and their own world-state snapshot, so a
//! failing callee leaves no trace beyond the gas it burned.

use bytes::Bytes;
use ember_common::{crypto::Address, transaction::Log};
use log::trace;
use primitive_types::U256;

use crate::core::{error::VmError, state::WorldState};

pub mod frame;
pub mod gas;
pub mod i256;
pub mod memory;
pub mod opcode;
pub mod stack;

mod instructions;
#[cfg(test)]
mod tests;

pub use frame::CallFrame;

/// Nested calls beyond this depth fail immediately.
pub const CALL_DEPTH_LIMIT: usize = 1024;

// Memory offsets and sizes above this are treated as unpayable
const OFFSET_CEILING: u64 = u32::MAX as u64;

/// Block-level execution context.
#[derive(Clone, Debug)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
}

/// Transaction-wide execution context. Per-frame values (contract address,
/// caller, call value) live on the frame instead.
#[derive(Clone, Debug)]
pub struct Environment {
    pub origin: Address,
    pub gas_price: u64,
    pub block: BlockEnv,
    pub chain_id: u64,
}

/// How a frame ended.
#[derive(Debug)]
pub enum VmOutcome {
    Success {
        gas_used: u64,
        output: Bytes,
        logs: Vec<Log>,
    },
    /// REVERT: failure with return data preserved and unused gas returned.
    Revert {
        gas_used: u64,
        output: Bytes,
    },
    /// Exceptional halt: the frame's entire gas budget is consumed.
    Halt {
        error: VmError,
        gas_used: u64,
    },
}

impl VmOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VmOutcome::Success { .. })
    }

    pub fn gas_used(&self) -> u64 {
        match self {
            VmOutcome::Success { gas_used, .. } => *gas_used,
            VmOutcome::Revert { gas_used, .. } => *gas_used,
            VmOutcome::Halt { gas_used, .. } => *gas_used,
        }
    }
}

pub struct Vm<'a> {
    state: &'a mut WorldState,
    env: &'a Environment,
    depth: usize,
}

impl<'a> Vm<'a> {
    pub fn new(state: &'a mut WorldState, env: &'a Environment) -> Self {
        Self {
            state,
            env,
            depth: 0,
        }
    }

    /// Run a frame to completion.
    pub fn execute(&mut self, frame: &mut CallFrame) -> VmOutcome {
        match self.run_frame(frame) {
            Ok(()) if frame.reverted => VmOutcome::Revert {
                gas_used: frame.gas_used(),
                output: frame.output.clone(),
            },
            Ok(()) => VmOutcome::Success {
                gas_used: frame.gas_used(),
                output: frame.output.clone(),
                logs: std::mem::take(&mut frame.logs),
            },
            Err(error) => VmOutcome::Halt {
                error,
                gas_used: frame.gas_limit(),
            },
        }
    }

    fn run_frame(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        while !frame.stopped && frame.pc < frame.code.len() {
            let op = frame.code[frame.pc];
            frame.pc += 1;
            frame.charge_gas(gas::static_cost(op))?;
            if log::log_enabled!(log::Level::Trace) {
                trace!(
                    "pc {} op {} gas {}/{}",
                    frame.pc - 1,
                    opcode::name(op),
                    frame.gas_used(),
                    frame.gas_limit()
                );
            }
            self.step(frame, op)?;
        }
        // running off the end of the code is a plain stop
        frame.stopped = true;
        Ok(())
    }

    fn step(&mut self, frame: &mut CallFrame, op: u8) -> Result<(), VmError> {
        use opcode::*;

        match op {
            STOP => {
                frame.stopped = true;
                Ok(())
            }
            ADD => self.op_add(frame),
            MUL => self.op_mul(frame),
            SUB => self.op_sub(frame),
            DIV => self.op_div(frame),
            SDIV => self.op_sdiv(frame),
            MOD => self.op_mod(frame),
            SMOD => self.op_smod(frame),
            ADDMOD => self.op_addmod(frame),
            MULMOD => self.op_mulmod(frame),
            EXP => self.op_exp(frame),
            SIGNEXTEND => self.op_signextend(frame),
            LT => self.op_lt(frame),
            GT => self.op_gt(frame),
            SLT => self.op_slt(frame),
            SGT => self.op_sgt(frame),
            EQ => self.op_eq(frame),
            ISZERO => self.op_iszero(frame),
            AND => self.op_and(frame),
            OR => self.op_or(frame),
            XOR => self.op_xor(frame),
            NOT => self.op_not(frame),
            BYTE => self.op_byte(frame),
            SHL => self.op_shl(frame),
            SHR => self.op_shr(frame),
            SAR => self.op_sar(frame),
            SHA3 => self.op_sha3(frame),
            ADDRESS => self.op_address(frame),
            BALANCE => self.op_balance(frame),
            ORIGIN => self.op_origin(frame),
            CALLER => self.op_caller(frame),
            CALLVALUE => self.op_callvalue(frame),
            CALLDATALOAD => self.op_calldataload(frame),
            CALLDATASIZE => self.op_calldatasize(frame),
            CALLDATACOPY => self.op_calldatacopy(frame),
            CODESIZE => self.op_codesize(frame),
            CODECOPY => self.op_codecopy(frame),
            GASPRICE => self.op_gasprice(frame),
            EXTCODESIZE => self.op_extcodesize(frame),
            RETURNDATASIZE => self.op_returndatasize(frame),
            RETURNDATACOPY => self.op_returndatacopy(frame),
            COINBASE => self.op_coinbase(frame),
            TIMESTAMP => self.op_timestamp(frame),
            NUMBER => self.op_number(frame),
            GASLIMIT => self.op_gaslimit(frame),
            CHAINID => self.op_chainid(frame),
            POP => frame.stack.pop().map(|_| ()),
            MLOAD => self.op_mload(frame),
            MSTORE => self.op_mstore(frame),
            MSTORE8 => self.op_mstore8(frame),
            SLOAD => self.op_sload(frame),
            SSTORE => self.op_sstore(frame),
            JUMP => self.op_jump(frame),
            JUMPI => self.op_jumpi(frame),
            PC => self.op_pc(frame),
            MSIZE => self.op_msize(frame),
            GAS => self.op_gas(frame),
            JUMPDEST => Ok(()),
            CALL => self.op_call(frame),
            RETURN => self.op_return(frame),
            REVERT => self.op_revert(frame),
            op if (PUSH1..=PUSH32).contains(&op) => {
                self.op_push(frame, push_size(op))
            }
            op if (DUP1..=DUP16).contains(&op) => frame.stack.dup((op - DUP1) as usize + 1),
            op if (SWAP1..=SWAP16).contains(&op) => frame.stack.swap((op - SWAP1) as usize + 1),
            op if (LOG0..=LOG4).contains(&op) => self.op_log(frame, (op - LOG0) as usize),
            other => Err(VmError::InvalidOpcode(other)),
        }
    }
}

/// Clamp a stack word used as a memory offset or size. Anything beyond the
/// ceiling could never be paid for and fails as out-of-gas.
pub(crate) fn as_usize(value: U256) -> Result<usize, VmError> {
    if value > U256::from(OFFSET_CEILING) {
        return Err(VmError::OutOfGas);
    }
    Ok(value.low_u64() as usize)
}
