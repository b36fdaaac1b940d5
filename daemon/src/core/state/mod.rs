//! World state: the address-keyed account map behind every execution.
//!
//! Snapshots follow the delta-layer pattern: every mutation appends an undo
//! entry to a journal, a snapshot records the journal length, and reverting
//! replays the tail of the journal in reverse. Reverting or committing a
//! snapshot invalidates every snapshot opened after it, so ids can be
//! reused across transactions.

use bytes::Bytes;
use ember_common::{
    account::Account,
    crypto::{hash, Address, Hash},
    encoding::{Encodable, Writer},
};
use log::trace;
use primitive_types::U256;
use std::collections::{hash_map::Entry, HashMap, HashSet};

use crate::core::error::StateError;

/// Position in the snapshot stack. Only the deepest ids stay valid; a revert
/// or commit of id N invalidates every id >= N.
pub type SnapshotId = usize;

// Undo record for one mutation
#[derive(Debug)]
enum JournalEntry {
    AccountCreated {
        address: Address,
    },
    BalanceChanged {
        address: Address,
        prev: U256,
    },
    NonceChanged {
        address: Address,
        prev: u64,
    },
    CodeChanged {
        address: Address,
        prev: Bytes,
    },
    StorageChanged {
        address: Address,
        key: U256,
        prev: U256,
    },
}

#[derive(Default)]
pub struct WorldState {
    accounts: HashMap<Address, Account>,
    journal: Vec<JournalEntry>,
    snapshots: Vec<usize>,
    // Addresses mutated since the last drain, for write-through persistence
    touched: HashSet<Address>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }

    // Accounts are created lazily on their first mutating touch
    fn ensure_account(&mut self, address: Address) -> &mut Account {
        self.touched.insert(address);
        match self.accounts.entry(address) {
            Entry::Vacant(entry) => {
                self.journal.push(JournalEntry::AccountCreated { address });
                entry.insert(Account::new())
            }
            Entry::Occupied(entry) => entry.into_mut(),
        }
    }

    pub fn get_balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let account = self.ensure_account(address);
        let prev = account.balance;
        let next = prev.checked_add(amount).ok_or(StateError::BalanceOverflow)?;
        account.balance = next;
        self.journal.push(JournalEntry::BalanceChanged { address, prev });
        Ok(())
    }

    pub fn sub_balance(&mut self, address: Address, amount: U256) -> Result<(), StateError> {
        let account = self.ensure_account(address);
        let prev = account.balance;
        let next = prev
            .checked_sub(amount)
            .ok_or(StateError::InsufficientBalance {
                need: amount,
                have: prev,
            })?;
        account.balance = next;
        self.journal.push(JournalEntry::BalanceChanged { address, prev });
        Ok(())
    }

    pub fn get_nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        let account = self.ensure_account(address);
        let prev = account.nonce;
        account.nonce = nonce;
        self.journal.push(JournalEntry::NonceChanged { address, prev });
    }

    pub fn increment_nonce(&mut self, address: Address) {
        let next = self.get_nonce(&address) + 1;
        self.set_nonce(address, next);
    }

    pub fn get_code(&self, address: &Address) -> Bytes {
        self.accounts
            .get(address)
            .map(|a| a.code.clone())
            .unwrap_or_default()
    }

    pub fn set_code(&mut self, address: Address, code: Bytes) {
        let account = self.ensure_account(address);
        let prev = std::mem::replace(&mut account.code, code);
        self.journal.push(JournalEntry::CodeChanged { address, prev });
    }

    /// Returns zero for unset slots.
    pub fn get_storage(&self, address: &Address, key: &U256) -> U256 {
        self.accounts
            .get(address)
            .and_then(|a| a.storage.get(key).copied())
            .unwrap_or_default()
    }

    /// Storing zero deletes the slot: a zero-valued slot and an absent slot
    /// are indistinguishable.
    pub fn set_storage(&mut self, address: Address, key: U256, value: U256) {
        let account = self.ensure_account(address);
        let prev = if value.is_zero() {
            account.storage.remove(&key).unwrap_or_default()
        } else {
            account.storage.insert(key, value).unwrap_or_default()
        };
        self.journal.push(JournalEntry::StorageChanged { address, key, prev });
    }

    /// Open a restore point. Snapshots nest LIFO.
    pub fn snapshot(&mut self) -> SnapshotId {
        let id = self.snapshots.len();
        self.snapshots.push(self.journal.len());
        trace!("snapshot {} opened at journal length {}", id, self.journal.len());
        id
    }

    /// Restore the world exactly to the state at `id`'s creation and
    /// invalidate every snapshot with an id >= `id`.
    pub fn revert(&mut self, id: SnapshotId) -> Result<(), StateError> {
        let target = *self
            .snapshots
            .get(id)
            .ok_or(StateError::SnapshotNotFound(id))?;
        trace!("reverting snapshot {} to journal length {}", id, target);

        while self.journal.len() > target {
            if let Some(entry) = self.journal.pop() {
                self.undo(entry);
            }
        }
        self.snapshots.truncate(id);
        Ok(())
    }

    /// Discard the checkpoint, keeping all mutations. Outer snapshots can
    /// still revert past this point.
    pub fn commit(&mut self, id: SnapshotId) -> Result<(), StateError> {
        if id >= self.snapshots.len() {
            return Err(StateError::SnapshotNotFound(id));
        }
        self.snapshots.truncate(id);
        Ok(())
    }

    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }

    fn undo(&mut self, entry: JournalEntry) {
        match entry {
            JournalEntry::AccountCreated { address } => {
                self.accounts.remove(&address);
            }
            JournalEntry::BalanceChanged { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.balance = prev;
                }
            }
            JournalEntry::NonceChanged { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.nonce = prev;
                }
            }
            JournalEntry::CodeChanged { address, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    account.code = prev;
                }
            }
            JournalEntry::StorageChanged { address, key, prev } => {
                if let Some(account) = self.accounts.get_mut(&address) {
                    if prev.is_zero() {
                        account.storage.remove(&key);
                    } else {
                        account.storage.insert(key, prev);
                    }
                }
            }
        }
    }

    /// Deterministic commitment to the current state: the content hash of
    /// all accounts in ascending address order. Two nodes holding the same
    /// accounts agree on this root bit for bit.
    pub fn state_root(&self) -> Hash {
        let mut addresses: Vec<&Address> = self.accounts.keys().collect();
        addresses.sort();

        let mut writer = Writer::new();
        writer.write_list(|w| {
            for address in addresses {
                let account = &self.accounts[address];
                w.write_list(|w| {
                    w.write_bytes(address.as_bytes());
                    account.encode(w);
                });
            }
        });
        hash(&writer.finish())
    }

    /// Drain the set of addresses mutated since the last drain.
    pub fn drain_touched(&mut self) -> Vec<Address> {
        self.touched.drain().collect()
    }

    /// Install an account wholesale, bypassing the journal. Only used while
    /// loading genesis allocations or replaying persisted state, never
    /// inside snapshot-protected execution.
    pub fn put_account(&mut self, address: Address, account: Account) {
        self.touched.insert(address);
        self.accounts.insert(address, account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([n; 20])
    }

    #[test]
    fn test_lazy_account_creation() {
        let mut state = WorldState::new();
        assert_eq!(state.get_balance(&addr(1)), U256::zero());
        assert!(!state.contains(&addr(1)));

        state.add_balance(addr(1), U256::from(10)).unwrap();
        assert!(state.contains(&addr(1)));
        assert_eq!(state.get_balance(&addr(1)), U256::from(10));
    }

    #[test]
    fn test_sub_balance_fails_when_insufficient() {
        let mut state = WorldState::new();
        state.add_balance(addr(1), U256::from(5)).unwrap();
        let err = state.sub_balance(addr(1), U256::from(6)).unwrap_err();
        assert_eq!(
            err,
            StateError::InsufficientBalance {
                need: U256::from(6),
                have: U256::from(5)
            }
        );
        // failed sub must leave the balance untouched
        assert_eq!(state.get_balance(&addr(1)), U256::from(5));
    }

    #[test]
    fn test_storage_zero_deletes_slot() {
        let mut state = WorldState::new();
        state.set_storage(addr(1), U256::from(1), U256::from(42));
        assert_eq!(state.get_storage(&addr(1), &U256::from(1)), U256::from(42));

        state.set_storage(addr(1), U256::from(1), U256::zero());
        assert_eq!(state.get_storage(&addr(1), &U256::from(1)), U256::zero());
        assert!(state.account(&addr(1)).unwrap().storage.is_empty());
    }

    #[test]
    fn test_snapshot_revert_restores_exactly() {
        let mut state = WorldState::new();
        state.add_balance(addr(1), U256::from(100)).unwrap();
        state.set_storage(addr(1), U256::from(0), U256::from(7));
        let root_before = state.state_root();

        let id = state.snapshot();
        state.sub_balance(addr(1), U256::from(30)).unwrap();
        state.increment_nonce(addr(1));
        state.set_storage(addr(1), U256::from(0), U256::zero());
        state.set_code(addr(2), Bytes::from_static(b"\x60\x00"));
        state.revert(id).unwrap();

        assert_eq!(state.state_root(), root_before);
        assert_eq!(state.get_balance(&addr(1)), U256::from(100));
        assert_eq!(state.get_nonce(&addr(1)), 0);
        assert_eq!(state.get_storage(&addr(1), &U256::from(0)), U256::from(7));
        assert!(!state.contains(&addr(2)));
    }

    #[test]
    fn test_commit_keeps_mutations() {
        let mut state = WorldState::new();
        let id = state.snapshot();
        state.add_balance(addr(1), U256::from(1)).unwrap();
        state.commit(id).unwrap();
        assert_eq!(state.get_balance(&addr(1)), U256::from(1));
        assert_eq!(state.snapshot_depth(), 0);
    }

    #[test]
    fn test_nested_snapshots_revert_outer() {
        let mut state = WorldState::new();
        state.add_balance(addr(1), U256::from(10)).unwrap();

        let outer = state.snapshot();
        state.add_balance(addr(1), U256::from(1)).unwrap();
        let inner = state.snapshot();
        state.add_balance(addr(1), U256::from(2)).unwrap();
        state.commit(inner).unwrap();

        // inner committed, outer revert still rolls everything back
        state.revert(outer).unwrap();
        assert_eq!(state.get_balance(&addr(1)), U256::from(10));
    }

    #[test]
    fn test_revert_invalidates_deeper_snapshots() {
        let mut state = WorldState::new();
        let outer = state.snapshot();
        let inner = state.snapshot();
        state.revert(outer).unwrap();
        assert_eq!(
            state.revert(inner),
            Err(StateError::SnapshotNotFound(inner))
        );
        // ids are reusable after the revert
        let again = state.snapshot();
        assert_eq!(again, outer);
    }

    #[test]
    fn test_snapshot_commit_is_noop_on_observable_state() {
        let mut state = WorldState::new();
        state.add_balance(addr(3), U256::from(9)).unwrap();
        let root = state.state_root();
        let id = state.snapshot();
        state.commit(id).unwrap();
        assert_eq!(state.state_root(), root);
    }

    #[test]
    fn test_unknown_snapshot() {
        let mut state = WorldState::new();
        assert_eq!(state.revert(0), Err(StateError::SnapshotNotFound(0)));
        assert_eq!(state.commit(3), Err(StateError::SnapshotNotFound(3)));
    }

    #[test]
    fn test_state_root_ignores_insertion_order() {
        let mut a = WorldState::new();
        a.add_balance(addr(1), U256::from(1)).unwrap();
        a.add_balance(addr(2), U256::from(2)).unwrap();

        let mut b = WorldState::new();
        b.add_balance(addr(2), U256::from(2)).unwrap();
        b.add_balance(addr(1), U256::from(1)).unwrap();

        assert_eq!(a.state_root(), b.state_root());
    }
}
