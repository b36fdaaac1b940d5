use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::Address;

// Intrinsic gas charged per call transaction
pub const TX_GAS_COST: u64 = 21_000;
// Intrinsic gas charged per contract creating transaction
pub const TX_CREATE_GAS_COST: u64 = 53_000;
// Gas cost for each zero byte of transaction data
pub const TX_DATA_ZERO_GAS_COST: u64 = 4;
// Gas cost for each non zero byte of transaction data
pub const TX_DATA_NON_ZERO_GAS_COST: u64 = 16;

// A received block's timestamp may run at most this far ahead of local time
pub const MAX_TIMESTAMP_DRIFT: u64 = 60;

/// Chain parameters shared by every node of a network.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Identifies the chain inside the execution environment
    pub chain_id: u64,
    /// Minimum parent-child timestamp spacing in seconds
    pub block_time: u64,
    /// Per-block gas limit, identical across all produced blocks
    pub gas_limit: u64,
    /// Ordered initial authority set
    pub validators: Vec<Address>,
    /// Pool admission floor
    pub min_gas_price: u64,
    /// Pool capacity bounds
    pub max_pool_size: usize,
    pub max_account_transactions: usize,
    /// Pool entry age-out in seconds
    pub transaction_timeout: u64,
    /// Missed-block count that deactivates a validator
    pub inactivity_threshold: u64,
    /// Timestamp of the genesis block
    pub genesis_timestamp: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            block_time: 5,
            gas_limit: 30_000_000,
            validators: Vec::new(),
            min_gas_price: 1,
            max_pool_size: 4096,
            max_account_transactions: 64,
            transaction_timeout: 3600,
            inactivity_threshold: 10,
            genesis_timestamp: 0,
        }
    }
}

/// One account allocation inside the genesis file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisAccount {
    pub balance: U256,
    pub nonce: u64,
    /// Runtime code as a hex string
    pub code: Option<String>,
    /// Pre-set storage slots
    pub storage: BTreeMap<U256, U256>,
}

/// Root structure of a genesis JSON file: the chain configuration plus the
/// initial account allocation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenesisFile {
    pub config: ChainConfig,
    #[serde(default)]
    pub alloc: BTreeMap<Address, GenesisAccount>,
}
