//! Transaction executor: validation, gas accounting and the call/create
//! branch around a single VM run.
//!
//! The whole execution sits inside one world-state snapshot. On success the
//! snapshot commits; on failure it reverts and only the gas debit and the
//! nonce increment are re-applied, so a failing transaction costs its gas
//! and nothing else.

use bytes::Bytes;
use ember_common::{
    config::{
        TX_CREATE_GAS_COST, TX_DATA_NON_ZERO_GAS_COST, TX_DATA_ZERO_GAS_COST, TX_GAS_COST,
    },
    crypto::{derive_contract_address, Address},
    transaction::{Log, Transaction},
};
use log::{debug, trace};
use primitive_types::U256;

use crate::core::{
    error::{ExecutorError, VmError},
    state::WorldState,
    vm::{CallFrame, Environment, Vm, VmOutcome},
};

/// Result of a successfully admitted execution. `status` is false when the
/// VM reverted or halted; the block still includes the transaction and its
/// receipt in that case.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub status: bool,
    pub gas_used: u64,
    pub return_data: Bytes,
    pub logs: Vec<Log>,
    pub contract_address: Option<Address>,
    pub error: Option<ExecutorError>,
}

/// Gas charged before the first VM instruction runs: a flat base plus a
/// per-byte charge on the payload.
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    let base = if tx.is_creation() {
        TX_CREATE_GAS_COST
    } else {
        TX_GAS_COST
    };
    let data: u64 = tx
        .data
        .iter()
        .map(|byte| {
            if *byte == 0 {
                TX_DATA_ZERO_GAS_COST
            } else {
                TX_DATA_NON_ZERO_GAS_COST
            }
        })
        .sum();
    base + data
}

/// Check a transaction against the current state without executing it.
pub fn validate(state: &WorldState, tx: &Transaction) -> Result<(), ExecutorError> {
    let account_nonce = state.get_nonce(&tx.from);
    if tx.nonce != account_nonce {
        return Err(ExecutorError::InvalidNonce {
            tx_nonce: tx.nonce,
            account_nonce,
        });
    }

    let intrinsic = intrinsic_gas(tx);
    if tx.gas_limit < intrinsic {
        return Err(ExecutorError::GasLimitTooLow {
            gas_limit: tx.gas_limit,
            intrinsic,
        });
    }

    let balance = state.get_balance(&tx.from);
    let upfront = tx.upfront_cost();
    if balance < upfront {
        return Err(ExecutorError::InsufficientBalance {
            need: upfront,
            have: balance,
        });
    }

    Ok(())
}

/// Execute one transaction against the world state.
///
/// An `Err` means the transaction failed validation and has no effect at
/// all. An `Ok` with `status == false` means the execution itself failed:
/// the state changes were rolled back but the sender still paid for the gas
/// consumed and its nonce advanced.
pub fn execute(
    state: &mut WorldState,
    env: &Environment,
    tx: &Transaction,
) -> Result<ExecutionOutcome, ExecutorError> {
    validate(state, tx)?;

    let sender = tx.from;
    let nonce_before = state.get_nonce(&sender);
    let intrinsic = intrinsic_gas(tx);
    let gas_cost = U256::from(tx.gas_limit) * U256::from(tx.gas_price);

    let snapshot = state.snapshot();

    // debit the full gas allowance up front, refund the unused part later
    debit(state, sender, gas_cost);
    state.increment_nonce(sender);

    let result = match &tx.to {
        Some(to) => execute_call(state, env, tx, *to, intrinsic),
        None => execute_create(state, env, tx, nonce_before, intrinsic),
    };

    match result {
        Ok((outcome_gas, return_data, logs, contract_address)) => {
            let gas_used = intrinsic + outcome_gas;
            refund(state, sender, tx, gas_used);
            if let Err(err) = state.commit(snapshot) {
                debug!("snapshot commit failed: {}", err);
            }
            trace!("{} used {} gas", tx, gas_used);
            Ok(ExecutionOutcome {
                status: true,
                gas_used,
                return_data,
                logs,
                contract_address,
                error: None,
            })
        }
        Err(failure) => {
            let gas_used = intrinsic + failure.gas_used;
            if let Err(err) = state.revert(snapshot) {
                debug!("snapshot revert failed: {}", err);
            }
            // the sender still pays for consumed gas and burns the nonce;
            // validation already guaranteed it can cover the debit
            debit(state, sender, U256::from(gas_used) * U256::from(tx.gas_price));
            state.increment_nonce(sender);
            debug!(
                "transaction from {} failed: {} ({} gas)",
                sender, failure.error, gas_used
            );
            Ok(ExecutionOutcome {
                status: false,
                gas_used,
                return_data: failure.return_data,
                logs: Vec::new(),
                contract_address: None,
                error: Some(failure.error),
            })
        }
    }
}

// Execution failure inside the snapshot: how much gas the VM consumed and
// why it stopped.
struct ExecutionFailure {
    error: ExecutorError,
    gas_used: u64,
    return_data: Bytes,
}

type ExecutionSuccess = (u64, Bytes, Vec<Log>, Option<Address>);

fn execute_call(
    state: &mut WorldState,
    env: &Environment,
    tx: &Transaction,
    to: Address,
    intrinsic: u64,
) -> Result<ExecutionSuccess, ExecutionFailure> {
    transfer(state, tx.from, to, tx.value)?;

    let code = state.get_code(&to);
    if code.is_empty() {
        // plain transfer: no VM run, zero execution gas
        return Ok((0, Bytes::new(), Vec::new(), None));
    }

    let mut frame = CallFrame::new(
        to,
        tx.from,
        tx.value,
        code,
        tx.data.clone(),
        tx.gas_limit - intrinsic,
    );
    run_vm(state, env, &mut frame).map(|(gas, output, logs)| (gas, output, logs, None))
}

fn execute_create(
    state: &mut WorldState,
    env: &Environment,
    tx: &Transaction,
    nonce_before: u64,
    intrinsic: u64,
) -> Result<ExecutionSuccess, ExecutionFailure> {
    let address = derive_contract_address(&tx.from, nonce_before);
    if state.contains(&address) {
        return Err(ExecutionFailure {
            error: ExecutorError::AccountCollision(address),
            gas_used: 0,
            return_data: Bytes::new(),
        });
    }

    // materialize the new account before running its init code
    state.set_nonce(address, 1);
    transfer(state, tx.from, address, tx.value)?;

    let mut frame = CallFrame::new(
        address,
        tx.from,
        tx.value,
        tx.data.clone(),
        Bytes::new(),
        tx.gas_limit - intrinsic,
    );
    let (gas, output, logs) = run_vm(state, env, &mut frame)?;

    // the init code's return data becomes the contract's runtime code
    state.set_code(address, output);
    Ok((gas, Bytes::new(), logs, Some(address)))
}

fn run_vm(
    state: &mut WorldState,
    env: &Environment,
    frame: &mut CallFrame,
) -> Result<(u64, Bytes, Vec<Log>), ExecutionFailure> {
    let outcome = {
        let mut vm = Vm::new(state, env);
        vm.execute(frame)
    };
    match outcome {
        VmOutcome::Success {
            gas_used,
            output,
            logs,
        } => Ok((gas_used, output, logs)),
        VmOutcome::Revert { gas_used, output } => Err(ExecutionFailure {
            error: ExecutorError::Vm(VmError::Revert),
            gas_used,
            return_data: output,
        }),
        VmOutcome::Halt { error, gas_used } => Err(ExecutionFailure {
            error: ExecutorError::Vm(error),
            gas_used,
            return_data: Bytes::new(),
        }),
    }
}

fn transfer(
    state: &mut WorldState,
    from: Address,
    to: Address,
    value: U256,
) -> Result<(), ExecutionFailure> {
    if value.is_zero() {
        return Ok(());
    }
    state
        .sub_balance(from, value)
        .and_then(|_| state.add_balance(to, value))
        .map_err(|err| ExecutionFailure {
            error: ExecutorError::State(err),
            gas_used: 0,
            return_data: Bytes::new(),
        })
}

// Balance debits inside the snapshot; validation guarantees they hold.
fn debit(state: &mut WorldState, sender: Address, amount: U256) {
    if let Err(err) = state.sub_balance(sender, amount) {
        debug!("gas debit failed for {}: {}", sender, err);
    }
}

fn refund(state: &mut WorldState, sender: Address, tx: &Transaction, gas_used: u64) {
    let unused = tx.gas_limit - gas_used;
    if unused > 0 {
        let amount = U256::from(unused) * U256::from(tx.gas_price);
        if let Err(err) = state.add_balance(sender, amount) {
            debug!("gas refund failed for {}: {}", sender, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vm::BlockEnv;

    fn alice() -> Address {
        Address::new([1u8; 20])
    }

    fn bob() -> Address {
        Address::new([2u8; 20])
    }

    fn env() -> Environment {
        Environment {
            origin: alice(),
            gas_price: 1,
            block: BlockEnv {
                number: 1,
                timestamp: 1_700_000_000,
                coinbase: Address::new([9u8; 20]),
                gas_limit: 30_000_000,
            },
            chain_id: 1337,
        }
    }

    fn funded_state(balance: u64) -> WorldState {
        let mut state = WorldState::new();
        state.add_balance(alice(), U256::from(balance)).unwrap();
        state
    }

    fn transfer_tx(value: u64, gas_limit: u64, nonce: u64) -> Transaction {
        Transaction {
            from: alice(),
            to: Some(bob()),
            value: U256::from(value),
            gas_limit,
            gas_price: 1,
            nonce,
            data: Bytes::new(),
        }
    }

    // Wrap runtime code in init code that returns it via CODECOPY
    fn deployer(runtime: &[u8]) -> Bytes {
        let len = runtime.len() as u8;
        let mut init = vec![
            0x60, len, // PUSH1 len
            0x60, 0x0c, // PUSH1 offset of runtime inside this code
            0x60, 0x00, // PUSH1 dest
            0x39, // CODECOPY
            0x60, len, // PUSH1 len
            0x60, 0x00, // PUSH1 0
            0xf3, // RETURN
        ];
        init.extend_from_slice(runtime);
        Bytes::from(init)
    }

    #[test]
    fn test_plain_transfer() {
        let mut state = funded_state(1_000_000);
        let tx = transfer_tx(500, 21_000, 0);

        let outcome = execute(&mut state, &env(), &tx).unwrap();
        assert!(outcome.status);
        assert_eq!(outcome.gas_used, 21_000);
        assert_eq!(state.get_balance(&bob()), U256::from(500));
        assert_eq!(
            state.get_balance(&alice()),
            U256::from(1_000_000 - 500 - 21_000)
        );
        assert_eq!(state.get_nonce(&alice()), 1);
        // no dangling snapshot
        assert_eq!(state.snapshot_depth(), 0);
    }

    #[test]
    fn test_invalid_nonce_rejected() {
        let mut state = funded_state(1_000_000);
        let tx = transfer_tx(1, 21_000, 5);
        let err = execute(&mut state, &env(), &tx).unwrap_err();
        assert_eq!(
            err,
            ExecutorError::InvalidNonce {
                tx_nonce: 5,
                account_nonce: 0
            }
        );
        // a rejected transaction has no effect at all
        assert_eq!(state.get_balance(&alice()), U256::from(1_000_000));
        assert_eq!(state.get_nonce(&alice()), 0);
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let mut state = funded_state(10_000);
        let tx = transfer_tx(1, 21_000, 0);
        let err = execute(&mut state, &env(), &tx).unwrap_err();
        assert!(matches!(err, ExecutorError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_gas_limit_below_intrinsic_rejected() {
        let mut state = funded_state(1_000_000);
        let tx = transfer_tx(1, 20_999, 0);
        let err = execute(&mut state, &env(), &tx).unwrap_err();
        assert!(matches!(err, ExecutorError::GasLimitTooLow { .. }));
    }

    #[test]
    fn test_create_deploys_runtime_code() {
        let mut state = funded_state(10_000_000);
        // runtime: STOP
        let tx = Transaction {
            from: alice(),
            to: None,
            value: U256::zero(),
            gas_limit: 200_000,
            gas_price: 1,
            nonce: 0,
            data: deployer(&[0x00]),
        };

        let outcome = execute(&mut state, &env(), &tx).unwrap();
        assert!(outcome.status);
        let address = outcome.contract_address.expect("creation must yield an address");
        assert_eq!(address, derive_contract_address(&alice(), 0));
        assert_eq!(state.get_code(&address).to_vec(), vec![0x00]);
        assert_eq!(state.get_nonce(&address), 1);
    }

    #[test]
    fn test_create_collision_fails_but_charges_gas() {
        let mut state = funded_state(10_000_000);
        let address = derive_contract_address(&alice(), 0);
        state.add_balance(address, U256::from(1)).unwrap();

        let tx = Transaction {
            from: alice(),
            to: None,
            value: U256::zero(),
            gas_limit: 100_000,
            gas_price: 1,
            nonce: 0,
            data: Bytes::new(),
        };

        let outcome = execute(&mut state, &env(), &tx).unwrap();
        assert!(!outcome.status);
        assert!(matches!(
            outcome.error,
            Some(ExecutorError::AccountCollision(_))
        ));
        // sender paid the intrinsic gas and burned the nonce
        assert_eq!(state.get_nonce(&alice()), 1);
        assert_eq!(
            state.get_balance(&alice()),
            U256::from(10_000_000 - 53_000)
        );
        // the occupying account was not disturbed
        assert_eq!(state.get_balance(&address), U256::from(1));
        assert_eq!(state.get_code(&address).len(), 0);
    }

    #[test]
    fn test_reverting_init_code_leaves_no_account() {
        let mut state = funded_state(10_000_000);
        // init code: REVERT(0, 0)
        let tx = Transaction {
            from: alice(),
            to: None,
            value: U256::from(5),
            gas_limit: 100_000,
            gas_price: 1,
            nonce: 0,
            data: Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xfd]),
        };
        let expected_address = derive_contract_address(&alice(), 0);

        let outcome = execute(&mut state, &env(), &tx).unwrap();
        assert!(!outcome.status);
        assert!(!state.contains(&expected_address), "no account may remain");
        assert_eq!(state.get_nonce(&alice()), 1);
        // value came back, only gas was spent
        let spent = U256::from(10_000_000) - state.get_balance(&alice());
        assert_eq!(spent, U256::from(outcome.gas_used));
        assert!(outcome.gas_used < 100_000);
    }

    #[test]
    fn test_revert_isolation_on_call() {
        let mut state = funded_state(10_000_000);
        let contract = Address::new([7u8; 20]);
        // SSTORE(0, 42) then REVERT(0, 0)
        state.set_code(
            contract,
            Bytes::from_static(&[0x60, 0x2a, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd]),
        );

        let tx = Transaction {
            from: alice(),
            to: Some(contract),
            value: U256::zero(),
            gas_limit: 100_000,
            gas_price: 1,
            nonce: 0,
            data: Bytes::new(),
        };

        let outcome = execute(&mut state, &env(), &tx).unwrap();
        assert!(!outcome.status);
        // slot 0 stays untouched, nonce advanced, some gas consumed
        assert_eq!(state.get_storage(&contract, &U256::zero()), U256::zero());
        assert_eq!(state.get_nonce(&alice()), 1);
        assert!(outcome.gas_used > 21_000 && outcome.gas_used < 100_000);
    }

    #[test]
    fn test_execute_then_revert_restores_world() {
        let mut state = funded_state(1_000_000);
        let root_before = state.state_root();

        let outer = state.snapshot();
        let tx = transfer_tx(500, 21_000, 0);
        execute(&mut state, &env(), &tx).unwrap();
        state.revert(outer).unwrap();

        assert_eq!(state.state_root(), root_before);
    }

    #[test]
    fn test_counter_contract_counts_to_three() {
        let mut state = funded_state(100_000_000);
        let contract = Address::new([0x42; 20]);
        // dispatch on the leading four calldata bytes: 1 increments slot 0,
        // 2 returns it
        state.set_code(
            contract,
            Bytes::from_static(&[
                0x60, 0x00, 0x35, 0x60, 0xe0, 0x1c, // selector
                0x80, 0x63, 0x00, 0x00, 0x00, 0x01, 0x14, 0x60, 0x1b, 0x57,
                0x80, 0x63, 0x00, 0x00, 0x00, 0x02, 0x14, 0x60, 0x26, 0x57,
                0x00,
                0x5b, 0x60, 0x00, 0x54, 0x60, 0x01, 0x01, 0x60, 0x00, 0x55, 0x00,
                0x5b, 0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
            ]),
        );

        let call = |nonce: u64, selector: u8| Transaction {
            from: alice(),
            to: Some(contract),
            value: U256::zero(),
            gas_limit: 100_000,
            gas_price: 1,
            nonce,
            data: Bytes::from(vec![0x00, 0x00, 0x00, selector]),
        };

        for nonce in 0..3 {
            let outcome = execute(&mut state, &env(), &call(nonce, 1)).unwrap();
            assert!(outcome.status);
        }

        let outcome = execute(&mut state, &env(), &call(3, 2)).unwrap();
        assert!(outcome.status);
        assert_eq!(outcome.return_data.len(), 32);
        assert_eq!(U256::from_big_endian(&outcome.return_data), U256::from(3));
    }

    #[test]
    fn test_call_to_empty_account_uses_intrinsic_gas_only() {
        let mut state = funded_state(1_000_000);
        let tx = Transaction {
            from: alice(),
            to: Some(bob()),
            value: U256::zero(),
            gas_limit: 50_000,
            gas_price: 1,
            nonce: 0,
            data: Bytes::from_static(&[0x01, 0x00]),
        };
        let outcome = execute(&mut state, &env(), &tx).unwrap();
        assert!(outcome.status);
        // 21000 base + one non-zero byte + one zero byte
        assert_eq!(outcome.gas_used, 21_000 + 16 + 4);
    }
}
