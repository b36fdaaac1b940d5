//! Pending transaction pool with nonce-aware gating.
//!
//! Entries live in one of two buckets. Pending holds transactions whose
//! nonce lines up with the sender's next expected nonce, so they are
//! eligible for the next block. Queued holds transactions parked behind a
//! nonce gap; they promote to pending the moment the gap closes, either by
//! a new admission or by a mined block advancing the account nonce.

use ember_common::{
    config::ChainConfig,
    crypto::{Address, Hash, Hashable},
    transaction::Transaction,
};
use indexmap::IndexMap;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::PoolError;

/// One admitted transaction with its pool bookkeeping.
#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub transaction: Arc<Transaction>,
    pub hash: Hash,
    /// Unix seconds at admission, for age-based eviction
    pub arrival: u64,
    /// Admission sequence number; lower arrived earlier
    pub priority: u64,
}

impl PoolEntry {
    pub fn sender(&self) -> Address {
        self.transaction.from
    }

    pub fn nonce(&self) -> u64 {
        self.transaction.nonce
    }

    pub fn gas_price(&self) -> u64 {
        self.transaction.gas_price
    }

    pub fn gas_limit(&self) -> u64 {
        self.transaction.gas_limit
    }
}

pub struct Mempool {
    // Ready for inclusion, keyed by hash in admission order
    pending: IndexMap<Hash, PoolEntry>,
    // Parked behind a nonce gap
    queued: IndexMap<Hash, PoolEntry>,
    // Last known on-chain nonce per sender, fed by the chain manager
    base_nonces: HashMap<Address, u64>,
    next_priority: u64,
    min_gas_price: u64,
    block_gas_limit: u64,
    max_pool_size: usize,
    max_account_transactions: usize,
    transaction_timeout: u64,
}

impl Mempool {
    pub fn new(config: &ChainConfig) -> Self {
        Self {
            pending: IndexMap::new(),
            queued: IndexMap::new(),
            base_nonces: HashMap::new(),
            next_priority: 0,
            min_gas_price: config.min_gas_price,
            block_gas_limit: config.gas_limit,
            max_pool_size: config.max_pool_size,
            max_account_transactions: config.max_account_transactions,
            transaction_timeout: config.transaction_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.queued.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.pending.contains_key(hash) || self.queued.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&PoolEntry> {
        self.pending.get(hash).or_else(|| self.queued.get(hash))
    }

    fn sender_entry_count(&self, sender: &Address) -> usize {
        self.pending
            .values()
            .chain(self.queued.values())
            .filter(|e| e.sender() == *sender)
            .count()
    }

    // Next nonce the pool expects from this sender: the on-chain nonce plus
    // the sender's consecutive pending transactions.
    fn expected_nonce(&self, sender: &Address, account_nonce: u64) -> u64 {
        account_nonce
            + self
                .pending
                .values()
                .filter(|e| e.sender() == *sender)
                .count() as u64
    }

    /// Admit a transaction. `account_nonce` is the sender's current
    /// on-chain nonce as seen by the caller.
    pub fn add_transaction(
        &mut self,
        transaction: Transaction,
        account_nonce: u64,
        now: u64,
    ) -> Result<Hash, PoolError> {
        if transaction.gas_price < self.min_gas_price {
            return Err(PoolError::GasPriceTooLow {
                price: transaction.gas_price,
                minimum: self.min_gas_price,
            });
        }
        if transaction.gas_limit > self.block_gas_limit {
            return Err(PoolError::GasLimitTooHigh {
                limit: transaction.gas_limit,
                maximum: self.block_gas_limit,
            });
        }
        if transaction.gas_limit == 0 {
            return Err(PoolError::ZeroGasLimit);
        }
        if transaction.from.is_zero() {
            return Err(PoolError::MissingSender);
        }

        let hash = transaction.hash();
        if self.contains(&hash) {
            return Err(PoolError::Duplicate(hash));
        }

        let sender = transaction.from;
        if self.sender_entry_count(&sender) >= self.max_account_transactions {
            return Err(PoolError::AccountLimitExceeded(sender));
        }

        self.base_nonces.insert(sender, account_nonce);
        let expected = self.expected_nonce(&sender, account_nonce);
        if transaction.nonce < expected {
            return Err(PoolError::StaleNonce {
                nonce: transaction.nonce,
                expected,
            });
        }

        let entry = PoolEntry {
            transaction: Arc::new(transaction),
            hash: hash.clone(),
            arrival: now,
            priority: self.next_priority,
        };
        self.next_priority += 1;

        if entry.nonce() == expected {
            trace!("transaction {} admitted as pending", hash);
            self.pending.insert(hash.clone(), entry);
            self.promote_ready(&sender, account_nonce);
        } else {
            trace!(
                "transaction {} queued (nonce {}, expected {})",
                hash,
                entry.nonce(),
                expected
            );
            self.queued.insert(hash.clone(), entry);
        }

        self.enforce_capacity();
        Ok(hash)
    }

    /// Remove entries, typically after block inclusion, then try to promote
    /// queued transactions of the affected senders.
    pub fn remove_transactions(&mut self, hashes: &[Hash]) {
        let mut senders = Vec::new();
        for hash in hashes {
            let removed = self
                .pending
                .shift_remove(hash)
                .or_else(|| self.queued.shift_remove(hash));
            if let Some(entry) = removed {
                senders.push(entry.sender());
            }
        }
        for sender in senders {
            if let Some(base) = self.base_nonces.get(&sender).copied() {
                self.promote_ready(&sender, base);
            }
        }
    }

    /// Tell the pool a sender's on-chain nonce moved (a block was mined or
    /// unwound), dropping stale entries and promoting whatever became ready.
    pub fn update_account_nonce(&mut self, sender: Address, account_nonce: u64) {
        self.base_nonces.insert(sender, account_nonce);

        // entries below the account nonce can never execute again
        let stale: Vec<Hash> = self
            .pending
            .values()
            .chain(self.queued.values())
            .filter(|e| e.sender() == sender && e.nonce() < account_nonce)
            .map(|e| e.hash.clone())
            .collect();
        for hash in &stale {
            self.pending.shift_remove(hash);
            self.queued.shift_remove(hash);
        }
        if !stale.is_empty() {
            debug!("dropped {} stale transactions of {}", stale.len(), sender);
        }

        self.promote_ready(&sender, account_nonce);
    }

    // Move queued entries of `sender` into pending while their nonces form
    // an unbroken run from the expected nonce.
    fn promote_ready(&mut self, sender: &Address, account_nonce: u64) {
        loop {
            let expected = self.expected_nonce(sender, account_nonce);
            let ready = self
                .queued
                .values()
                .find(|e| e.sender() == *sender && e.nonce() == expected)
                .map(|e| e.hash.clone());

            match ready {
                Some(hash) => {
                    if let Some(entry) = self.queued.shift_remove(&hash) {
                        trace!("promoted transaction {} to pending", hash);
                        self.pending.insert(hash, entry);
                    }
                }
                None => break,
            }
        }
    }

    /// Take back a transaction displaced by a reorg. Admission checks were
    /// already passed once, so only duplicates are refused; the sender's
    /// base nonce is lowered to let the entry become pending again.
    pub fn reinject(&mut self, transaction: Transaction, now: u64) {
        let hash = transaction.hash();
        if self.contains(&hash) {
            return;
        }
        let sender = transaction.from;
        let base = self
            .base_nonces
            .get(&sender)
            .copied()
            .unwrap_or(transaction.nonce)
            .min(transaction.nonce);
        self.base_nonces.insert(sender, base);

        let entry = PoolEntry {
            transaction: Arc::new(transaction),
            hash: hash.clone(),
            arrival: now,
            priority: self.next_priority,
        };
        self.next_priority += 1;

        let expected = self.expected_nonce(&sender, base);
        if entry.nonce() == expected {
            self.pending.insert(hash, entry);
            self.promote_ready(&sender, base);
        } else {
            self.queued.insert(hash, entry);
        }
        self.enforce_capacity();
    }

    /// Pending entries ordered by gas price (descending), ties broken by
    /// arrival priority (ascending), cut off at the block gas limit.
    pub fn transactions_for_block(&self, block_gas_limit: u64) -> Vec<PoolEntry> {
        let mut entries: Vec<&PoolEntry> = self.pending.values().collect();
        entries.sort_by(|a, b| {
            b.gas_price()
                .cmp(&a.gas_price())
                .then(a.priority.cmp(&b.priority))
        });

        let mut selected = Vec::new();
        let mut cumulative_gas = 0u64;
        for entry in entries {
            if cumulative_gas + entry.gas_limit() > block_gas_limit {
                break;
            }
            cumulative_gas += entry.gas_limit();
            selected.push(entry.clone());
        }
        selected
    }

    /// Evict entries whose age exceeds the configured timeout.
    pub fn remove_old_transactions(&mut self, now: u64) -> usize {
        let timeout = self.transaction_timeout;
        let expired: Vec<Hash> = self
            .pending
            .values()
            .chain(self.queued.values())
            .filter(|e| now.saturating_sub(e.arrival) > timeout)
            .map(|e| e.hash.clone())
            .collect();

        for hash in &expired {
            self.pending.shift_remove(hash);
            self.queued.shift_remove(hash);
        }
        if !expired.is_empty() {
            debug!("evicted {} expired transactions", expired.len());
        }
        expired.len()
    }

    // Shrink back to capacity by dropping the globally lowest gas price,
    // oldest arrival first among equals.
    fn enforce_capacity(&mut self) {
        while self.len() > self.max_pool_size {
            let victim = self
                .pending
                .values()
                .chain(self.queued.values())
                .min_by(|a, b| {
                    a.gas_price()
                        .cmp(&b.gas_price())
                        .then(a.priority.cmp(&b.priority))
                })
                .map(|e| (e.hash.clone(), e.sender(), e.nonce()));

            if let Some((hash, sender, nonce)) = victim {
                debug!("pool full, evicting transaction {}", hash);
                let was_pending = self.pending.shift_remove(&hash).is_some();
                self.queued.shift_remove(&hash);

                // evicting a pending entry breaks the sender's nonce run;
                // everything behind it is queued again
                if was_pending {
                    self.demote_after(&sender, nonce);
                }
            } else {
                break;
            }
        }
    }

    fn demote_after(&mut self, sender: &Address, nonce: u64) {
        let followers: Vec<Hash> = self
            .pending
            .values()
            .filter(|e| e.sender() == *sender && e.nonce() > nonce)
            .map(|e| e.hash.clone())
            .collect();
        for hash in followers {
            if let Some(entry) = self.pending.shift_remove(&hash) {
                self.queued.insert(hash, entry);
            }
        }
    }
}
