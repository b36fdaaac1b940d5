use bytes::Bytes;
use ember_common::{crypto::Address, transaction::Log};
use primitive_types::U256;

use super::{memory::Memory, opcode, stack::Stack};
use crate::core::error::VmError;

/// One execution frame: the top-level transaction frame or a sub-call.
///
/// The frame owns its stack, memory, gas budget and log buffer. World state
/// access goes through the VM so that sub-call isolation is enforced by
/// snapshots, never by the frame itself.
pub struct CallFrame {
    pub contract_address: Address,
    pub caller: Address,
    pub value: U256,
    pub code: Bytes,
    pub calldata: Bytes,
    pub pc: usize,
    pub stack: Stack,
    pub memory: Memory,
    pub return_data: Bytes,
    pub output: Bytes,
    pub stopped: bool,
    pub reverted: bool,
    pub logs: Vec<Log>,
    gas_limit: u64,
    gas_used: u64,
    // Byte offsets that JUMP/JUMPI may target
    valid_jumpdests: Vec<bool>,
}

impl CallFrame {
    pub fn new(
        contract_address: Address,
        caller: Address,
        value: U256,
        code: Bytes,
        calldata: Bytes,
        gas_limit: u64,
    ) -> Self {
        let valid_jumpdests = analyze_jumpdests(&code);
        Self {
            contract_address,
            caller,
            value,
            code,
            calldata,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            return_data: Bytes::new(),
            output: Bytes::new(),
            stopped: false,
            reverted: false,
            logs: Vec::new(),
            gas_limit,
            gas_used: 0,
            valid_jumpdests,
        }
    }

    pub fn charge_gas(&mut self, amount: u64) -> Result<(), VmError> {
        let next = self.gas_used.checked_add(amount).ok_or(VmError::OutOfGas)?;
        if next > self.gas_limit {
            return Err(VmError::OutOfGas);
        }
        self.gas_used = next;
        Ok(())
    }

    /// Return gas reserved for a sub-call that went unused.
    pub fn refund_gas(&mut self, amount: u64) {
        self.gas_used = self.gas_used.saturating_sub(amount);
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn gas_remaining(&self) -> u64 {
        self.gas_limit - self.gas_used
    }

    /// True only for a JUMPDEST byte that is real code, not PUSH data.
    pub fn is_valid_jumpdest(&self, dest: usize) -> bool {
        self.valid_jumpdests.get(dest).copied().unwrap_or(false)
    }
}

// Scan the code once, skipping PUSH immediates, and mark every JUMPDEST
// byte that is reachable as an instruction.
fn analyze_jumpdests(code: &[u8]) -> Vec<bool> {
    let mut valid = vec![false; code.len()];
    let mut i = 0;
    while i < code.len() {
        let byte = code[i];
        if byte == opcode::JUMPDEST {
            valid[i] = true;
        }
        i += 1 + opcode::push_size(byte);
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_code(code: &[u8]) -> CallFrame {
        CallFrame::new(
            Address::zero(),
            Address::zero(),
            U256::zero(),
            Bytes::copy_from_slice(code),
            Bytes::new(),
            100_000,
        )
    }

    #[test]
    fn test_jumpdest_analysis_skips_push_data() {
        // PUSH2 0x5b5b JUMPDEST
        let frame = frame_with_code(&[0x61, 0x5b, 0x5b, 0x5b]);
        assert!(!frame.is_valid_jumpdest(1));
        assert!(!frame.is_valid_jumpdest(2));
        assert!(frame.is_valid_jumpdest(3));
        assert!(!frame.is_valid_jumpdest(100));
    }

    #[test]
    fn test_gas_accounting() {
        let mut frame = frame_with_code(&[]);
        frame.charge_gas(40_000).unwrap();
        assert_eq!(frame.gas_remaining(), 60_000);
        assert_eq!(frame.charge_gas(70_000), Err(VmError::OutOfGas));
        // a failed charge must not consume anything
        assert_eq!(frame.gas_used(), 40_000);
        frame.refund_gas(10_000);
        assert_eq!(frame.gas_used(), 30_000);
    }
}
