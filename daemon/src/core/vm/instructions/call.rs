//! CALL: run another contract in a child frame.
//!
//! The child executes under its own world-state snapshot. A reverting or
//! halting child is rolled back completely; the caller only sees the gas it
//! consumed, a 0 on the stack, and the child's return data for REVERT.

use bytes::Bytes;
use ember_common::crypto::Address;
use primitive_types::U256;

use crate::core::{
    error::VmError,
    vm::{as_usize, frame::CallFrame, gas, Vm, VmOutcome, CALL_DEPTH_LIMIT},
};

impl Vm<'_> {
    pub(crate) fn op_call(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let gas_requested = frame.stack.pop()?;
        let to = Address::from_word(frame.stack.pop()?);
        let value = frame.stack.pop()?;
        let in_offset = frame.stack.pop()?;
        let in_size = as_usize(frame.stack.pop()?)?;
        let out_offset = frame.stack.pop()?;
        let out_size = as_usize(frame.stack.pop()?)?;

        if !value.is_zero() {
            frame.charge_gas(gas::CALL_VALUE_COST)?;
        }

        // expand for both the argument and the return ranges up front
        let in_offset = if in_size == 0 { 0 } else { as_usize(in_offset)? };
        let out_offset = if out_size == 0 { 0 } else { as_usize(out_offset)? };
        if in_size > 0 {
            frame.charge_gas(frame.memory.expansion_cost(in_offset + in_size))?;
            frame.memory.resize(in_offset + in_size);
        }
        if out_size > 0 {
            frame.charge_gas(frame.memory.expansion_cost(out_offset + out_size))?;
            frame.memory.resize(out_offset + out_size);
        }

        let calldata = if in_size == 0 {
            Bytes::new()
        } else {
            Bytes::from(frame.memory.read(in_offset, in_size))
        };

        if self.depth >= CALL_DEPTH_LIMIT {
            frame.return_data = Bytes::new();
            return frame.stack.push(U256::zero());
        }

        // reserve gas for the child, returning whatever it leaves unused
        let gas_given = if gas_requested > U256::from(frame.gas_remaining()) {
            frame.gas_remaining()
        } else {
            gas_requested.low_u64()
        };
        frame.charge_gas(gas_given)?;

        let snapshot = self.state.snapshot();

        // an unpayable value transfer fails the call, not the caller
        if !value.is_zero() {
            let moved = self
                .state
                .sub_balance(frame.contract_address, value)
                .and_then(|_| self.state.add_balance(to, value));
            if moved.is_err() {
                let _ = self.state.revert(snapshot);
                frame.refund_gas(gas_given);
                frame.return_data = Bytes::new();
                return frame.stack.push(U256::zero());
            }
        }

        let code = self.state.get_code(&to);
        let mut child = CallFrame::new(to, frame.contract_address, value, code, calldata, gas_given);

        self.depth += 1;
        let outcome = self.execute(&mut child);
        self.depth -= 1;

        frame.refund_gas(gas_given - outcome.gas_used());

        match outcome {
            VmOutcome::Success { output, mut logs, .. } => {
                let _ = self.state.commit(snapshot);
                frame.logs.append(&mut logs);
                if out_size > 0 {
                    let n = output.len().min(out_size);
                    frame.memory.write(out_offset, &output[..n]);
                }
                frame.return_data = output;
                frame.stack.push(U256::one())
            }
            VmOutcome::Revert { output, .. } => {
                let _ = self.state.revert(snapshot);
                if out_size > 0 {
                    let n = output.len().min(out_size);
                    frame.memory.write(out_offset, &output[..n]);
                }
                frame.return_data = output;
                frame.stack.push(U256::zero())
            }
            VmOutcome::Halt { .. } => {
                let _ = self.state.revert(snapshot);
                frame.return_data = Bytes::new();
                frame.stack.push(U256::zero())
            }
        }
    }
}
