//! Arithmetic opcodes. Everything wraps modulo 2^256; division and modulo
//! by zero yield zero instead of trapping.

use primitive_types::{U256, U512};

use crate::core::{
    error::VmError,
    vm::{frame::CallFrame, gas, i256, Vm},
};

impl Vm<'_> {
    pub(crate) fn op_add(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(a.overflowing_add(b).0)
    }

    pub(crate) fn op_mul(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(a.overflowing_mul(b).0)
    }

    pub(crate) fn op_sub(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(a.overflowing_sub(b).0)
    }

    pub(crate) fn op_div(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        let result = if b.is_zero() { U256::zero() } else { a / b };
        frame.stack.push(result)
    }

    pub(crate) fn op_sdiv(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(i256::i256_div(a, b))
    }

    pub(crate) fn op_mod(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        let result = if b.is_zero() { U256::zero() } else { a % b };
        frame.stack.push(result)
    }

    pub(crate) fn op_smod(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        frame.stack.push(i256::i256_mod(a, b))
    }

    // (a + b) % n computed in 512 bits so the intermediate sum cannot wrap
    pub(crate) fn op_addmod(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        let n = frame.stack.pop()?;
        let result = if n.is_zero() {
            U256::zero()
        } else {
            let wide = (U512::from(a) + U512::from(b)) % U512::from(n);
            U256::try_from(wide).unwrap_or_default()
        };
        frame.stack.push(result)
    }

    pub(crate) fn op_mulmod(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let a = frame.stack.pop()?;
        let b = frame.stack.pop()?;
        let n = frame.stack.pop()?;
        let result = if n.is_zero() {
            U256::zero()
        } else {
            let wide = (U512::from(a) * U512::from(b)) % U512::from(n);
            U256::try_from(wide).unwrap_or_default()
        };
        frame.stack.push(result)
    }

    // base^exp mod 2^256 by square-and-multiply
    pub(crate) fn op_exp(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let base = frame.stack.pop()?;
        let exponent = frame.stack.pop()?;
        frame.charge_gas(gas::exp_cost(exponent))?;
        frame.stack.push(base.overflowing_pow(exponent).0)
    }

    pub(crate) fn op_signextend(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let byte_index = frame.stack.pop()?;
        let value = frame.stack.pop()?;

        // byte index 31 or above already covers the whole word
        let result = if byte_index >= U256::from(31) {
            value
        } else {
            let bit_index = 8 * byte_index.low_u64() as usize + 7;
            let mask = (U256::one() << (bit_index + 1)) - U256::one();
            if value.bit(bit_index) {
                value | !mask
            } else {
                value & mask
            }
        };
        frame.stack.push(result)
    }
}
