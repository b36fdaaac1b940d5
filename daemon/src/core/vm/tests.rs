use bytes::Bytes;
use ember_common::crypto::Address;
use primitive_types::U256;
use proptest::prelude::*;

use super::{BlockEnv, CallFrame, Environment, Vm, VmOutcome};
use crate::core::{error::VmError, state::WorldState};

fn test_env() -> Environment {
    Environment {
        origin: Address::new([0xaa; 20]),
        gas_price: 1,
        block: BlockEnv {
            number: 7,
            timestamp: 1_700_000_000,
            coinbase: Address::new([0xbb; 20]),
            gas_limit: 30_000_000,
        },
        chain_id: 1337,
    }
}

fn contract() -> Address {
    Address::new([0xcc; 20])
}

fn run_code(code: &[u8]) -> (VmOutcome, WorldState) {
    run_code_with(code, &[], WorldState::new())
}

fn run_code_with(code: &[u8], calldata: &[u8], mut state: WorldState) -> (VmOutcome, WorldState) {
    let env = test_env();
    let mut frame = CallFrame::new(
        contract(),
        Address::new([0xdd; 20]),
        U256::zero(),
        Bytes::copy_from_slice(code),
        Bytes::copy_from_slice(calldata),
        1_000_000,
    );
    let outcome = {
        let mut vm = Vm::new(&mut state, &env);
        vm.execute(&mut frame)
    };
    (outcome, state)
}

// Run code that ends with RETURN of a 32 byte word and read that word
fn run_for_word(code: &[u8]) -> U256 {
    let (outcome, _) = run_code(code);
    match outcome {
        VmOutcome::Success { output, .. } => {
            assert_eq!(output.len(), 32, "expected a full word of output");
            U256::from_big_endian(&output)
        }
        other => panic!("execution failed: {:?}", other),
    }
}

// PUSH32 both operands, run `op`, MSTORE the result and RETURN it
fn binary_op_code(op: u8, a: U256, b: U256) -> Vec<u8> {
    let mut code = Vec::new();
    code.push(0x7f);
    code.extend_from_slice(&b.to_big_endian());
    code.push(0x7f);
    code.extend_from_slice(&a.to_big_endian());
    code.push(op);
    // MSTORE at 0, RETURN 32 bytes
    code.extend_from_slice(&[0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3]);
    code
}

fn run_binary_op(op: u8, a: U256, b: U256) -> U256 {
    run_for_word(&binary_op_code(op, a, b))
}

#[test]
fn test_stop_and_empty_code() {
    let (outcome, _) = run_code(&[0x00]);
    assert!(outcome.is_success());

    // running off the end of the code is a stop as well
    let (outcome, _) = run_code(&[0x60, 0x01]);
    assert!(outcome.is_success());
}

#[test]
fn test_add_wraps() {
    assert_eq!(
        run_binary_op(0x01, U256::MAX, U256::one()),
        U256::zero()
    );
    assert_eq!(
        run_binary_op(0x01, U256::from(2), U256::from(3)),
        U256::from(5)
    );
}

#[test]
fn test_sub_wraps() {
    assert_eq!(
        run_binary_op(0x03, U256::zero(), U256::one()),
        U256::MAX
    );
}

#[test]
fn test_division_by_zero_yields_zero() {
    assert_eq!(
        run_binary_op(0x04, U256::from(10), U256::zero()),
        U256::zero()
    );
    assert_eq!(
        run_binary_op(0x06, U256::from(10), U256::zero()),
        U256::zero()
    );
    assert_eq!(
        run_binary_op(0x04, U256::from(10), U256::from(3)),
        U256::from(3)
    );
}

#[test]
fn test_exp() {
    assert_eq!(
        run_binary_op(0x0a, U256::from(2), U256::from(10)),
        U256::from(1024)
    );
    // anything to the power zero is one
    assert_eq!(
        run_binary_op(0x0a, U256::zero(), U256::zero()),
        U256::one()
    );
}

#[test]
fn test_shifts_of_256_or_more() {
    // SHL/SHR: value shifted by 256 collapses to zero
    assert_eq!(
        run_binary_op(0x1b, U256::from(256), U256::one()),
        U256::zero()
    );
    assert_eq!(
        run_binary_op(0x1c, U256::from(256), U256::MAX),
        U256::zero()
    );
    // SAR of a negative value saturates to all ones
    assert_eq!(run_binary_op(0x1d, U256::from(256), U256::MAX), U256::MAX);
}

#[test]
fn test_comparisons() {
    assert_eq!(
        run_binary_op(0x10, U256::from(1), U256::from(2)),
        U256::one()
    );
    assert_eq!(
        run_binary_op(0x11, U256::from(1), U256::from(2)),
        U256::zero()
    );
    // SLT: -1 < 1
    assert_eq!(run_binary_op(0x12, U256::MAX, U256::one()), U256::one());
}

#[test]
fn test_byte_opcode() {
    // byte 31 of 0x..ff is 0xff
    assert_eq!(
        run_binary_op(0x1a, U256::from(31), U256::from(0xff)),
        U256::from(0xff)
    );
    assert_eq!(
        run_binary_op(0x1a, U256::from(32), U256::from(0xff)),
        U256::zero()
    );
}

#[test]
fn test_mstore_mload_roundtrip() {
    // PUSH1 42 PUSH1 0 MSTORE PUSH1 0 MLOAD MSTORE+RETURN
    let code = [
        0x60, 0x2a, 0x60, 0x00, 0x52, // MSTORE(0, 42)
        0x60, 0x00, 0x51, // MLOAD(0)
        0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ];
    assert_eq!(run_for_word(&code), U256::from(42));
}

#[test]
fn test_mload_of_untouched_memory_is_zero() {
    // reading far past the high-water mark returns zeroes
    let code = [0x61, 0x01, 0x00, 0x51, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    assert_eq!(run_for_word(&code), U256::zero());
}

#[test]
fn test_calldataload_pads_with_zeroes() {
    // CALLDATALOAD(0) with 2 bytes of calldata: right-padded
    let code = [0x60, 0x00, 0x35, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    let (outcome, _) = run_code_with(&code, &[0x12, 0x34], WorldState::new());
    match outcome {
        VmOutcome::Success { output, .. } => {
            let word = U256::from_big_endian(&output);
            let mut expected = [0u8; 32];
            expected[0] = 0x12;
            expected[1] = 0x34;
            assert_eq!(word, U256::from_big_endian(&expected));
        }
        other => panic!("execution failed: {:?}", other),
    }
}

#[test]
fn test_sstore_and_sload() {
    // SSTORE(1, 99) then return SLOAD(1)
    let code = [
        0x60, 0x63, 0x60, 0x01, 0x55, // SSTORE
        0x60, 0x01, 0x54, // SLOAD
        0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ];
    let (outcome, state) = run_code(&code);
    assert!(outcome.is_success());
    assert_eq!(
        state.get_storage(&contract(), &U256::from(1)),
        U256::from(99)
    );
}

#[test]
fn test_sstore_zero_clears_slot() {
    let mut state = WorldState::new();
    state.set_storage(contract(), U256::zero(), U256::from(5));

    // SSTORE(0, 0)
    let code = [0x60, 0x00, 0x60, 0x00, 0x55, 0x00];
    let (outcome, state) = run_code_with(&code, &[], state);
    assert!(outcome.is_success());
    assert_eq!(state.get_storage(&contract(), &U256::zero()), U256::zero());
    assert!(state
        .account(&contract())
        .map(|a| a.storage.is_empty())
        .unwrap_or(true));
}

#[test]
fn test_jump_to_jumpdest() {
    // PUSH1 4 JUMP INVALID JUMPDEST PUSH1 1 ... return 1
    let code = [
        0x60, 0x04, 0x56, // JUMP over the bad byte
        0xfe, // would be invalid
        0x5b, 0x60, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ];
    assert_eq!(run_for_word(&code), U256::one());
}

#[test]
fn test_jump_into_push_data_is_invalid() {
    // PUSH2 0x005b JUMP: offset 2 holds a 0x5b byte, but it is push data
    let code = [0x61, 0x00, 0x5b, 0x60, 0x02, 0x56, 0x00];
    let (outcome, _) = run_code(&code);
    match outcome {
        VmOutcome::Halt { error, .. } => assert_eq!(error, VmError::InvalidJump(2)),
        other => panic!("expected invalid jump, got {:?}", other),
    }
}

#[test]
fn test_jumpi_not_taken_falls_through() {
    // JUMPI with zero condition continues; return 7
    let code = [
        0x60, 0x00, // condition 0
        0x60, 0x0b, // dest 11
        0x57, // JUMPI, not taken
        0x60, 0x07, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ];
    assert_eq!(run_for_word(&code), U256::from(7));
}

#[test]
fn test_push32_at_end_of_code_fails() {
    let (outcome, _) = run_code(&[0x7f]);
    match outcome {
        VmOutcome::Halt { error, .. } => assert_eq!(error, VmError::TruncatedPush),
        other => panic!("expected truncated push, got {:?}", other),
    }
}

#[test]
fn test_unknown_opcode_halts() {
    let (outcome, _) = run_code(&[0xfe]);
    match outcome {
        VmOutcome::Halt { error, .. } => assert_eq!(error, VmError::InvalidOpcode(0xfe)),
        other => panic!("expected invalid opcode, got {:?}", other),
    }
}

#[test]
fn test_stack_underflow_halts() {
    let (outcome, _) = run_code(&[0x01]);
    match outcome {
        VmOutcome::Halt { error, .. } => assert_eq!(error, VmError::StackUnderflow),
        other => panic!("expected underflow, got {:?}", other),
    }
}

#[test]
fn test_out_of_gas_consumes_frame_budget() {
    let env = test_env();
    let mut state = WorldState::new();
    // an infinite loop: JUMPDEST PUSH1 0 JUMP
    let mut frame = CallFrame::new(
        contract(),
        Address::zero(),
        U256::zero(),
        Bytes::from_static(&[0x5b, 0x60, 0x00, 0x56]),
        Bytes::new(),
        500,
    );
    let outcome = {
        let mut vm = Vm::new(&mut state, &env);
        vm.execute(&mut frame)
    };
    match outcome {
        VmOutcome::Halt { error, gas_used } => {
            assert_eq!(error, VmError::OutOfGas);
            assert_eq!(gas_used, 500);
        }
        other => panic!("expected out of gas, got {:?}", other),
    }
}

#[test]
fn test_revert_preserves_output_and_unused_gas() {
    // MSTORE(0, 0x2a) REVERT(0, 32)
    let code = [0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xfd];
    let (outcome, _) = run_code(&code);
    match outcome {
        VmOutcome::Revert { gas_used, output } => {
            assert!(gas_used < 1_000_000, "revert must not burn the full budget");
            assert_eq!(U256::from_big_endian(&output), U256::from(0x2a));
        }
        other => panic!("expected revert, got {:?}", other),
    }
}

#[test]
fn test_environment_probes() {
    // CHAINID
    let code = [0x46, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    assert_eq!(run_for_word(&code), U256::from(1337));

    // NUMBER
    let code = [0x43, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    assert_eq!(run_for_word(&code), U256::from(7));

    // CALLER
    let code = [0x33, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];
    assert_eq!(run_for_word(&code), Address::new([0xdd; 20]).to_word());
}

#[test]
fn test_log_emission() {
    // LOG1 over two bytes of memory with topic 5
    let code = [
        0x60, 0xab, 0x60, 0x00, 0x53, // MSTORE8(0, 0xab)
        0x60, 0x05, // topic
        0x60, 0x01, // size
        0x60, 0x00, // offset
        0xa1, // LOG1
        0x00,
    ];
    let (outcome, _) = run_code(&code);
    match outcome {
        VmOutcome::Success { logs, .. } => {
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].address, contract());
            assert_eq!(logs[0].topics, vec![U256::from(5)]);
            assert_eq!(logs[0].data.to_vec(), vec![0xab]);
        }
        other => panic!("execution failed: {:?}", other),
    }
}

#[test]
fn test_sub_call_revert_is_isolated() {
    let mut state = WorldState::new();
    let callee = Address::new([0x11; 20]);
    // callee: SSTORE(0, 1) then REVERT(0, 0)
    state.set_code(
        callee,
        Bytes::from_static(&[0x60, 0x01, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd]),
    );

    // caller: CALL(gas=50000, callee, value=0, in=0/0, out=0/0), store the
    // result word and return it
    let mut code = vec![
        0x60, 0x00, // out size
        0x60, 0x00, // out offset
        0x60, 0x00, // in size
        0x60, 0x00, // in offset
        0x60, 0x00, // value
        0x73, // PUSH20 callee
    ];
    code.extend_from_slice(callee.as_bytes());
    code.extend_from_slice(&[
        0x61, 0xc3, 0x50, // PUSH2 50000
        0xf1, // CALL
        0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ]);

    let (outcome, state) = run_code_with(&code, &[], state);
    match outcome {
        VmOutcome::Success { output, .. } => {
            // the call failed, so it pushed 0
            assert_eq!(U256::from_big_endian(&output), U256::zero());
        }
        other => panic!("execution failed: {:?}", other),
    }
    // and the callee's storage write was rolled back
    assert_eq!(state.get_storage(&callee, &U256::zero()), U256::zero());
}

#[test]
fn test_sub_call_success_commits_and_returns_data() {
    let mut state = WorldState::new();
    let callee = Address::new([0x22; 20]);
    // callee: SSTORE(0, 7); RETURN the stored word
    state.set_code(
        callee,
        Bytes::from_static(&[
            0x60, 0x07, 0x60, 0x00, 0x55, // SSTORE(0, 7)
            0x60, 0x07, 0x60, 0x00, 0x52, // MSTORE(0, 7)
            0x60, 0x20, 0x60, 0x00, 0xf3, // RETURN(0, 32)
        ]),
    );

    // caller: CALL with out buffer at 0..32, then return that buffer
    let mut code = vec![
        0x60, 0x20, // out size
        0x60, 0x00, // out offset
        0x60, 0x00, // in size
        0x60, 0x00, // in offset
        0x60, 0x00, // value
        0x73, // PUSH20 callee
    ];
    code.extend_from_slice(callee.as_bytes());
    code.extend_from_slice(&[
        0x62, 0x01, 0x00, 0x00, // PUSH3 gas
        0xf1, // CALL
        0x50, // POP the success flag
        0x60, 0x20, 0x60, 0x00, 0xf3,
    ]);

    let (outcome, state) = run_code_with(&code, &[], state);
    match outcome {
        VmOutcome::Success { output, .. } => {
            assert_eq!(U256::from_big_endian(&output), U256::from(7));
        }
        other => panic!("execution failed: {:?}", other),
    }
    assert_eq!(state.get_storage(&callee, &U256::zero()), U256::from(7));
}

#[test]
fn test_call_transfers_value() {
    let mut state = WorldState::new();
    state.add_balance(contract(), U256::from(1000)).unwrap();
    let receiver = Address::new([0x33; 20]);

    // CALL(gas=0, receiver, value=250, no data)
    let mut code = vec![
        0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // out/in
        0x60, 0xfa, // value 250
        0x73,
    ];
    code.extend_from_slice(receiver.as_bytes());
    code.extend_from_slice(&[0x60, 0x00, 0xf1, 0x00]);

    let (outcome, state) = run_code_with(&code, &[], state);
    assert!(outcome.is_success());
    assert_eq!(state.get_balance(&receiver), U256::from(250));
    assert_eq!(state.get_balance(&contract()), U256::from(750));
}

proptest! {
    #[test]
    fn prop_add_matches_wrapping_arithmetic(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        let a = U256::from_big_endian(&a);
        let b = U256::from_big_endian(&b);
        prop_assert_eq!(run_binary_op(0x01, a, b), a.overflowing_add(b).0);
    }

    #[test]
    fn prop_mul_matches_wrapping_arithmetic(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        let a = U256::from_big_endian(&a);
        let b = U256::from_big_endian(&b);
        prop_assert_eq!(run_binary_op(0x02, a, b), a.overflowing_mul(b).0);
    }

    #[test]
    fn prop_div_never_traps(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        let a = U256::from_big_endian(&a);
        let b = U256::from_big_endian(&b);
        let expected = if b.is_zero() { U256::zero() } else { a / b };
        prop_assert_eq!(run_binary_op(0x04, a, b), expected);
    }
}
