//! Stack data movement plus the calldata, code and return-data views.
//! Every copy into memory zero-pads where the source runs out.

use primitive_types::U256;

use crate::core::{
    error::VmError,
    vm::{as_usize, frame::CallFrame, gas, Vm},
};

impl Vm<'_> {
    /// PUSHn: load the next `size` code bytes as a big-endian word. A push
    /// whose data would run past the end of the code fails the frame.
    pub(crate) fn op_push(&mut self, frame: &mut CallFrame, size: usize) -> Result<(), VmError> {
        let start = frame.pc;
        let end = start + size;
        if end > frame.code.len() {
            return Err(VmError::TruncatedPush);
        }
        let value = U256::from_big_endian(&frame.code[start..end]);
        frame.pc = end;
        frame.stack.push(value)
    }

    /// CALLDATALOAD: 32 bytes from calldata at the given offset,
    /// right-padded with zeroes beyond the buffer.
    pub(crate) fn op_calldataload(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let offset = frame.stack.pop()?;
        let mut word = [0u8; 32];
        if offset <= U256::from(u32::MAX) {
            let offset = offset.low_u64() as usize;
            for (i, slot) in word.iter_mut().enumerate() {
                *slot = frame.calldata.get(offset + i).copied().unwrap_or(0);
            }
        }
        frame.stack.push(U256::from_big_endian(&word))
    }

    pub(crate) fn op_calldatasize(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(frame.calldata.len()))
    }

    pub(crate) fn op_calldatacopy(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let dest = frame.stack.pop()?;
        let offset = frame.stack.pop()?;
        let size = frame.stack.pop()?;
        let calldata = frame.calldata.clone();
        self.copy_to_memory(frame, dest, offset, size, &calldata)
    }

    pub(crate) fn op_codesize(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(frame.code.len()))
    }

    pub(crate) fn op_codecopy(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let dest = frame.stack.pop()?;
        let offset = frame.stack.pop()?;
        let size = frame.stack.pop()?;
        let code = frame.code.clone();
        self.copy_to_memory(frame, dest, offset, size, &code)
    }

    pub(crate) fn op_returndatasize(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(frame.return_data.len()))
    }

    pub(crate) fn op_returndatacopy(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let dest = frame.stack.pop()?;
        let offset = frame.stack.pop()?;
        let size = frame.stack.pop()?;
        let return_data = frame.return_data.clone();
        self.copy_to_memory(frame, dest, offset, size, &return_data)
    }

    // Shared zero-padded copy with expansion and per-word charges
    fn copy_to_memory(
        &mut self,
        frame: &mut CallFrame,
        dest: U256,
        offset: U256,
        size: U256,
        src: &[u8],
    ) -> Result<(), VmError> {
        let size = as_usize(size)?;
        if size == 0 {
            return Ok(());
        }
        let dest = as_usize(dest)?;
        frame.charge_gas(gas::copy_cost(size))?;
        frame.charge_gas(frame.memory.expansion_cost(dest + size))?;
        frame.memory.resize(dest + size);

        // a source offset beyond the buffer copies pure zero padding
        let src_offset = if offset > U256::from(u32::MAX) {
            src.len()
        } else {
            offset.low_u64() as usize
        };
        frame.memory.write_padded(dest, src, src_offset, size);
        Ok(())
    }
}
