//! Persistent storage boundary: an opaque key-value mapping with prefix
//! iteration. The chain issues operations sequentially and awaits each, so
//! providers are free to suspend at this interface.

use async_trait::async_trait;
use ember_common::crypto::{Address, Hash};
use primitive_types::U256;

use crate::core::error::StorageError;

mod memory;
mod sled_store;

pub use memory::MemoryStorage;
pub use sled_store::SledStorage;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// All key/value pairs whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        (**self).put(key, value).await
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        (**self).delete(key).await
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        (**self).scan_prefix(prefix).await
    }
}

/// ASCII key scheme of the chain store.
pub mod keys {
    use super::*;

    pub const CHAIN_TIP: &[u8] = b"chainTip";
    pub const CHAIN_TIP_NUMBER: &[u8] = b"chainTipNumber";

    pub fn block(hash: &Hash) -> Vec<u8> {
        format!("block:{}", hash).into_bytes()
    }

    pub fn block_by_number(number: u64) -> Vec<u8> {
        format!("blockByNumber:{}", number).into_bytes()
    }

    pub fn header(hash: &Hash) -> Vec<u8> {
        format!("header:{}", hash).into_bytes()
    }

    /// Per-block metadata record (the receipts of the block).
    pub fn metadata(hash: &Hash) -> Vec<u8> {
        format!("metadata:{}", hash).into_bytes()
    }

    pub fn transaction(hash: &Hash) -> Vec<u8> {
        format!("transaction:{}", hash).into_bytes()
    }

    /// Hash of the block a transaction was included in.
    pub fn tx_block(hash: &Hash) -> Vec<u8> {
        format!("txBlock:{}", hash).into_bytes()
    }

    /// Index of a transaction inside its block.
    pub fn tx_index(hash: &Hash) -> Vec<u8> {
        format!("txIndex:{}", hash).into_bytes()
    }

    pub fn account(address: &Address) -> Vec<u8> {
        format!("account:{}", address).into_bytes()
    }

    pub fn storage_slot(address: &Address, slot: &U256) -> Vec<u8> {
        format!("storage:{}:{}", address, hex::encode(slot.to_big_endian())).into_bytes()
    }

    pub fn storage_prefix(address: &Address) -> Vec<u8> {
        format!("storage:{}:", address).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_key_scheme() {
        let hash = Hash::zero();
        assert!(keys::block(&hash).starts_with(b"block:"));
        assert_eq!(keys::block_by_number(42), b"blockByNumber:42".to_vec());

        let address = Address::from_str("0101010101010101010101010101010101010101").unwrap();
        let key = keys::storage_slot(&address, &U256::from(255));
        let text = String::from_utf8(key).unwrap();
        assert!(text.starts_with("storage:0101010101010101010101010101010101010101:"));
        assert!(text.ends_with("ff"));
    }
}
