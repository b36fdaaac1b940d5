//! Execution environment probes: frame identity, transaction context and
//! block context.

use ember_common::crypto::Address;
use primitive_types::U256;

use crate::core::{
    error::VmError,
    vm::{frame::CallFrame, Vm},
};

impl Vm<'_> {
    pub(crate) fn op_address(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(frame.contract_address.to_word())
    }

    pub(crate) fn op_balance(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let address = Address::from_word(frame.stack.pop()?);
        let balance = self.state.get_balance(&address);
        frame.stack.push(balance)
    }

    pub(crate) fn op_origin(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(self.env.origin.to_word())
    }

    pub(crate) fn op_caller(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(frame.caller.to_word())
    }

    pub(crate) fn op_callvalue(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(frame.value)
    }

    pub(crate) fn op_gasprice(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(self.env.gas_price))
    }

    pub(crate) fn op_extcodesize(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        let address = Address::from_word(frame.stack.pop()?);
        let size = self.state.get_code(&address).len();
        frame.stack.push(U256::from(size))
    }

    pub(crate) fn op_coinbase(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(self.env.block.coinbase.to_word())
    }

    pub(crate) fn op_timestamp(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(self.env.block.timestamp))
    }

    pub(crate) fn op_number(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(self.env.block.number))
    }

    pub(crate) fn op_gaslimit(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(self.env.block.gas_limit))
    }

    pub(crate) fn op_chainid(&mut self, frame: &mut CallFrame) -> Result<(), VmError> {
        frame.stack.push(U256::from(self.env.chain_id))
    }
}
