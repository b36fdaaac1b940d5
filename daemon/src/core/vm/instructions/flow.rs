//! Control flow: jumps, halting opcodes and the program-counter probes.

use bytes::Bytes;
use primitive_types::U256;

use crate::core::{
    error::VmError,
    vm::{as_usize, frame::CallFrame, Vm},
};

impl Vm<'_> {
    /// JUMP: the destination must be a JUMPDEST byte that is real code.
    pub(crate) fn op_jump(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let dest = frame.stack.pop()?;
        self.jump_to(frame, dest)
    }

    pub(crate) fn op_jumpi(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let dest = frame.stack.pop()?;
        let condition = frame.stack.pop()?;
        if condition.is_zero() {
            return Ok(());
        }
        self.jump_to(frame, dest)
    }

    fn jump_to(&mut self, frame: &mut CallFrame, dest: U256) -> Result<(), VmError> {
        if dest > U256::from(u32::MAX) {
            return Err(VmError::InvalidJump(usize::MAX));
        }
        let dest = dest.low_u64() as usize;
        if !frame.is_valid_jumpdest(dest) {
            return Err(VmError::InvalidJump(dest));
        }
        frame.pc = dest;
        Ok(())
    }

    // The dispatch loop has already advanced past the opcode byte
    pub(crate) fn op_pc(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(frame.pc - 1))
    }

    pub(crate) fn op_gas(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(frame.gas_remaining()))
    }

    /// RETURN: set the frame output to a memory range and halt with success.
    pub(crate) fn op_return(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.output = self.read_output(frame)?;
        frame.stopped = true;
        Ok(())
    }

    /// REVERT: same as RETURN but the frame fails, preserving the output.
    pub(crate) fn op_revert(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.output = self.read_output(frame)?;
        frame.stopped = true;
        frame.reverted = true;
        Ok(())
    }

    fn read_output(&mut self, frame: &mut CallFrame) -> Result<Bytes, VmError> {
        let offset = frame.stack.pop()?;
        let size = as_usize(frame.stack.pop()?)?;
        if size == 0 {
            return Ok(Bytes::new());
        }
        let offset = as_usize(offset)?;
        frame.charge_gas(frame.memory.expansion_cost(offset + size))?;
        frame.memory.resize(offset + size);
        Ok(Bytes::from(frame.memory.read(offset, size)))
    }
}
