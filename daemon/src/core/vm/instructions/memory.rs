//! Linear memory opcodes and the memory-range hash.

use primitive_types::U256;
use sha3::{Digest, Keccak256};

use crate::core::{
    error::VmError,
    vm::{as_usize, frame::CallFrame, gas, Vm},
};

impl Vm<'_> {
    pub(crate) fn op_mload(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let offset = as_usize(frame.stack.pop()?)?;
        frame.charge_gas(frame.memory.expansion_cost(offset + 32))?;
        frame.memory.resize(offset + 32);
        let value = frame.memory.load_word(offset);
        frame.stack.push(value)
    }

    pub(crate) fn op_mstore(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let offset = as_usize(frame.stack.pop()?)?;
        let value = frame.stack.pop()?;
        frame.charge_gas(frame.memory.expansion_cost(offset + 32))?;
        frame.memory.resize(offset + 32);
        frame.memory.store_word(offset, value);
        Ok(())
    }

    pub(crate) fn op_mstore8(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let offset = as_usize(frame.stack.pop()?)?;
        let value = frame.stack.pop()?;
        frame.charge_gas(frame.memory.expansion_cost(offset + 1))?;
        frame.memory.resize(offset + 1);
        frame.memory.store_byte(offset, value);
        Ok(())
    }

    pub(crate) fn op_msize(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(frame.memory.len()))
    }

    /// SHA3: Keccak-256 over a memory range.
    pub(crate) fn op_sha3(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let offset = frame.stack.pop()?;
        let size = as_usize(frame.stack.pop()?)?;
        frame.charge_gas(gas::sha3_cost(size))?;

        let digest: [u8; 32] = if size == 0 {
            Keccak256::digest([]).into()
        } else {
            let offset = as_usize(offset)?;
            frame.charge_gas(frame.memory.expansion_cost(offset + size))?;
            frame.memory.resize(offset + size);
            Keccak256::digest(frame.memory.read(offset, size)).into()
        };
        frame.stack.push(U256::from_big_endian(&digest))
    }
}
