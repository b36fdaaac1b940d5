//! Persistent storage opcodes, reading and writing the executing
//! contract's own slots.

use crate::core::{
    error::VmError,
    vm::{frame::CallFrame, Vm},
};

impl Vm<'_> {
    pub(crate) fn op_sload(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let key = frame.stack.pop()?;
        let value = self.state.get_storage(&frame.contract_address, &key);
        frame.stack.push(value)
    }

    pub(crate) fn op_sstore(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let key = frame.stack.pop()?;
        let value = frame.stack.pop()?;
        self.state.set_storage(frame.contract_address, key, value);
        Ok(())
    }
}
