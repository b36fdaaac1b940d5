//! LOG0 through LOG4: append a log record to the frame. Logs of a frame
//! that later fails are dropped together with its other effects.

use bytes::Bytes;
use ember_common::transaction::Log;

use crate::core::{
    error::VmError,
    vm::{as_usize, frame::CallFrame, gas, Vm},
};

impl Vm<'_> {
    pub(crate) fn op_log(&mut self, frame: &mut CallFrame, topic_count: usize) -> Result<(), VmError> {
        let offset = frame.stack.pop()?;
        let size = as_usize(frame.stack.pop()?)?;
        let mut topics = Vec::with_capacity(topic_count);
        for _ in 0..topic_count {
            topics.push(frame.stack.pop()?);
        }

        frame.charge_gas(gas::log_cost(topic_count, size))?;
        let data = if size == 0 {
            Bytes::new()
        } else {
            let offset = as_usize(offset)?;
            frame.charge_gas(frame.memory.expansion_cost(offset + size))?;
            frame.memory.resize(offset + size);
            Bytes::from(frame.memory.read(offset, size))
        };

        frame.logs.push(Log {
            address: frame.contract_address,
            topics,
            data,
        });
        Ok(())
    }
}
