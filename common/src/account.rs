use bytes::Bytes;
use primitive_types::U256;
use std::collections::BTreeMap;

use crate::{
    crypto::hash,
    encoding::{Encodable, Reader, ReaderError, Writer},
};

pub type Nonce = u64;

/// An account as held by the world state.
///
/// Accounts are created lazily on their first balance, nonce, code or
/// storage touch. A storage slot holding zero is equivalent to the slot
/// being absent, so zero values are never stored in the map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub nonce: Nonce,
    pub balance: U256,
    pub code: Bytes,
    pub storage: BTreeMap<U256, U256>,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    // An account that was never touched beyond its default values
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty() && self.storage.is_empty()
    }

    /// Persistent record form: [nonce, balance, code]. Storage slots live
    /// under their own keys in the store and are not part of this record.
    pub fn to_store_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_list(|w| {
            w.write_u64(self.nonce);
            w.write_uint(self.balance);
            w.write_bytes(&self.code);
        });
        writer.finish()
    }

    pub fn from_store_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        let mut list = reader.read_list()?;
        let nonce = list.read_u64()?;
        let balance = list.read_uint()?;
        let code = Bytes::from(list.read_bytes()?);
        list.expect_end()?;
        reader.expect_end()?;

        Ok(Self {
            nonce,
            balance,
            code,
            storage: BTreeMap::new(),
        })
    }
}

impl Encodable for Account {
    // Canonical form used by the state commitment and the account store:
    // [nonce, balance, code_hash, [[key, value], ...]] with storage slots
    // in ascending key order.
    fn encode(&self, writer: &mut Writer) {
        writer.write_list(|w| {
            w.write_u64(self.nonce);
            w.write_uint(self.balance);
            w.write_bytes(hash(&self.code).as_bytes());
            w.write_list(|w| {
                for (key, value) in &self.storage {
                    w.write_list(|w| {
                        w.write_uint(*key);
                        w.write_uint(*value);
                    });
                }
            });
        });
    }
}
