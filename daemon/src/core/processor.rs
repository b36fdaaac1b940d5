//! Block processor: turns pool transactions into a signed block, and checks
//! received blocks against the same rules.
//!
//! The processor is stateless apart from the chain configuration. The chain
//! manager owns the world state, pool and consensus, and lends them to the
//! processor per call.

use bytes::Bytes;
use ember_common::{
    block::{receipts_root, transactions_root, Block, BlockHeader},
    config::ChainConfig,
    crypto::{Address, Hash, Hashable},
    transaction::{Receipt, Transaction},
};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::core::{
    consensus::Poa,
    error::{BlockchainError, ChainError, ConsensusError, ExecutorError},
    executor,
    mempool::Mempool,
    state::WorldState,
    vm::{BlockEnv, Environment},
};

/// A freshly produced block with everything the chain manager needs to
/// persist it and prune the pool.
pub struct ProducedBlock {
    pub block: Block,
    pub receipts: Vec<Receipt>,
    /// Hashes of included transactions
    pub included: Vec<Hash>,
    /// Hashes that failed pre-state validation and should leave the pool
    pub dropped: Vec<Hash>,
}

pub struct BlockProcessor {
    config: ChainConfig,
}

impl BlockProcessor {
    pub fn new(config: ChainConfig) -> Self {
        Self { config }
    }

    fn environment(&self, number: u64, timestamp: u64, coinbase: Address) -> Environment {
        Environment {
            origin: Address::zero(),
            gas_price: 0,
            block: BlockEnv {
                number,
                timestamp,
                coinbase,
                gas_limit: self.config.gas_limit,
            },
            chain_id: self.config.chain_id,
        }
    }

    /// Assemble, execute and sign a block on top of `parent`.
    ///
    /// Transactions come from the pool ordered by gas price; execution
    /// failures stay in the block with a failed receipt, while transactions
    /// that no longer pass validation are dropped. The whole run sits in
    /// one snapshot that commits only after the header is signed.
    pub fn create_block(
        &self,
        state: &mut WorldState,
        mempool: &Mempool,
        consensus: &Poa,
        parent: &BlockHeader,
        timestamp: u64,
    ) -> Result<ProducedBlock, BlockchainError> {
        let number = parent.number + 1;
        let parent_hash = parent.hash();
        let validator = consensus
            .expected_validator(number)
            .ok_or(ConsensusError::NoActiveValidator)?;

        let snapshot = state.snapshot();

        let entries = mempool.transactions_for_block(self.config.gas_limit);
        let mut transactions: Vec<Transaction> = Vec::new();
        let mut receipts: Vec<Receipt> = Vec::new();
        let mut included: Vec<Hash> = Vec::new();
        let mut dropped: Vec<Hash> = Vec::new();
        // the gas budget reserves each transaction's full limit
        let mut reserved_gas = 0u64;
        let mut gas_used = 0u64;

        for entry in entries {
            if reserved_gas + entry.gas_limit() > self.config.gas_limit {
                break;
            }

            let mut env = self.environment(number, timestamp, validator);
            env.origin = entry.transaction.from;
            env.gas_price = entry.gas_price();

            match executor::execute(state, &env, &entry.transaction) {
                Ok(outcome) => {
                    reserved_gas += entry.gas_limit();
                    gas_used += outcome.gas_used;
                    receipts.push(Receipt {
                        tx_hash: entry.hash.clone(),
                        block_number: number,
                        gas_used: outcome.gas_used,
                        cumulative_gas_used: gas_used,
                        contract_address: outcome.contract_address,
                        logs: outcome.logs,
                        status: outcome.status,
                    });
                    included.push(entry.hash.clone());
                    transactions.push((*entry.transaction).clone());
                }
                Err(err) => {
                    // stale or unpayable: out of the pool, not into the block
                    debug!("dropping transaction {}: {}", entry.hash, err);
                    dropped.push(entry.hash.clone());
                }
            }
        }

        let mut header = BlockHeader {
            parent_hash,
            number,
            timestamp,
            state_root: state.state_root(),
            transactions_root: transactions_root(&transactions),
            receipts_root: receipts_root(&receipts),
            validator,
            signature: Bytes::new(),
            gas_limit: self.config.gas_limit,
            gas_used,
            extra_data: Bytes::new(),
        };
        consensus.sign_header(&mut header)?;

        state.commit(snapshot)?;

        info!(
            "produced block {} with {} transactions ({} gas)",
            number,
            transactions.len(),
            gas_used
        );
        Ok(ProducedBlock {
            block: Block::new(header, transactions),
            receipts,
            included,
            dropped,
        })
    }

    /// Structural validation of a received block against its parent. These
    /// checks hold on any branch; they do not touch world state.
    pub fn validate_structure(
        &self,
        block: &Block,
        parent: &BlockHeader,
        consensus: &Poa,
        now: u64,
    ) -> Result<(), BlockchainError> {
        let header = &block.header;

        if header.number != parent.number + 1 {
            return Err(ChainError::BlockNumberMismatch {
                number: header.number,
                parent: parent.number,
            }
            .into());
        }
        if header.parent_hash != parent.hash() {
            return Err(ChainError::UnknownParent(header.parent_hash.clone()).into());
        }
        if header.gas_limit != self.config.gas_limit {
            return Err(ChainError::GasLimitMismatch {
                expected: self.config.gas_limit,
                actual: header.gas_limit,
            }
            .into());
        }

        consensus.validate_header(header, parent, now)?;

        let limit_sum: u64 = block.transactions.iter().map(|tx| tx.gas_limit).sum();
        if header.gas_used > header.gas_limit || header.gas_used > limit_sum {
            return Err(ChainError::GasUsedMismatch {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit.min(limit_sum),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for tx in &block.transactions {
            if !seen.insert(tx.hash()) {
                return Err(ChainError::DuplicateTransaction(tx.hash()).into());
            }
        }

        if transactions_root(&block.transactions) != header.transactions_root {
            return Err(ChainError::TxRootMismatch.into());
        }

        Ok(())
    }

    /// Pre-state validation of every transaction in a block that is about
    /// to extend the canonical chain: nonces must line up per sender and
    /// balances must cover the upfront cost.
    pub fn validate_pre_state(
        &self,
        block: &Block,
        state: &WorldState,
    ) -> Result<(), BlockchainError> {
        let mut expected_nonces: HashMap<_, u64> = HashMap::new();
        for tx in &block.transactions {
            let expected = expected_nonces
                .get(&tx.from)
                .copied()
                .unwrap_or_else(|| state.get_nonce(&tx.from));
            if tx.nonce != expected {
                warn!(
                    "block {} carries out-of-order nonce for {}",
                    block.number(),
                    tx.from
                );
                return Err(ExecutorError::InvalidNonce {
                    tx_nonce: tx.nonce,
                    account_nonce: expected,
                }
                .into());
            }
            expected_nonces.insert(tx.from, expected + 1);

            let balance = state.get_balance(&tx.from);
            if balance < tx.upfront_cost() {
                return Err(ExecutorError::InsufficientBalance {
                    need: tx.upfront_cost(),
                    have: balance,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Apply a validated extend-block to the world state. Individual
    /// execution failures keep the block valid; only the receipts differ.
    pub fn apply_block(
        &self,
        state: &mut WorldState,
        block: &Block,
    ) -> Result<Vec<Receipt>, BlockchainError> {
        let snapshot = state.snapshot();
        let mut receipts = Vec::new();
        let mut gas_used = 0u64;

        for tx in &block.transactions {
            let mut env =
                self.environment(block.number(), block.header.timestamp, block.header.validator);
            env.origin = tx.from;
            env.gas_price = tx.gas_price;

            match executor::execute(state, &env, tx) {
                Ok(outcome) => {
                    gas_used += outcome.gas_used;
                    receipts.push(Receipt {
                        tx_hash: tx.hash(),
                        block_number: block.number(),
                        gas_used: outcome.gas_used,
                        cumulative_gas_used: gas_used,
                        contract_address: outcome.contract_address,
                        logs: outcome.logs,
                        status: outcome.status,
                    });
                }
                Err(err) => {
                    // pre-state validation should have caught this
                    warn!("transaction in block {} failed: {}", block.number(), err);
                }
            }
        }

        state.commit(snapshot)?;
        Ok(receipts)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}
