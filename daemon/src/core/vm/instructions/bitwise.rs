//! Comparison, bitwise and shift opcodes. Shifts of 256 or more yield zero,
//! except SAR which saturates on the sign bit.

use primitive_types::U256;
use std::cmp::Ordering;

use crate::core::{
    error::VmError,
    vm::{frame::CallFrame, i256, Vm},
};

fn bool_word(condition: bool) -> U256 {
    if condition {
        U256::one()
    } else {
        U256::zero()
    }
}

impl Vm<'_> {
    pub(crate) fn op_lt(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(bool_word(a < b))
    }

    pub(crate) fn op_gt(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(bool_word(a > b))
    }

    pub(crate) fn op_slt(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame
            .stack
            .push(bool_word(i256::i256_cmp(a, b) == Ordering::Less))
    }

    pub(crate) fn op_sgt(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame
            .stack
            .push(bool_word(i256::i256_cmp(a, b) == Ordering::Greater))
    }

    pub(crate) fn op_eq(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(bool_word(a == b))
    }

    pub(crate) fn op_iszero(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        frame.stack.push(bool_word(a.is_zero()))
    }

    pub(crate) fn op_and(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(a & b)
    }

    pub(crate) fn op_or(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(a | b)
    }

    pub(crate) fn op_xor(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(a ^ b)
    }

    pub(crate) fn op_not(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        frame.stack.push(!a)
    }

    // BYTE: index 0 selects the most significant byte
    pub(crate) fn op_byte(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let index = frame.stack.pop()?;
        let value = frame.stack.pop()?;
        let result = if index >= U256::from(32) {
            U256::zero()
        } else {
            let le_index = 31 - index.low_u64() as usize;
            U256::from(value.byte(le_index))
        };
        frame.stack.push(result)
    }

    pub(crate) fn op_shl(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let shift = frame.stack.pop()?;
        let value = frame.stack.pop()?;
        let result = if shift >= U256::from(256) {
            U256::zero()
        } else {
            value << shift.low_u64() as usize
        };
        frame.stack.push(result)
    }

    pub(crate) fn op_shr(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let shift = frame.stack.pop()?;
        let value = frame.stack.pop()?;
        let result = if shift >= U256::from(256) {
            U256::zero()
        } else {
            value >> shift.low_u64() as usize
        };
        frame.stack.push(result)
    }

    pub(crate) fn op_sar(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let shift = frame.stack.pop()?;
        let value = frame.stack.pop()?;
        frame.stack.push(i256::sar(shift, value))
    }
}
