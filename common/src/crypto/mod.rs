use crate::encoding::{Encodable, Reader, ReaderError, Writer};
use blake3::hash as blake3_hash;
use primitive_types::U256;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

pub const HASH_SIZE: usize = 32; // 32 bytes / 256 bits
pub const ADDRESS_SIZE: usize = 20;

#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash::new([0; HASH_SIZE])
    }

    pub const fn max() -> Self {
        Hash::new([u8::MAX; HASH_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; HASH_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| "Invalid hash")?;
        Ok(Hash::new(bytes))
    }
}

// Hash a byte array using the blake3 algorithm
#[inline(always)]
pub fn hash(value: &[u8]) -> Hash {
    let result: [u8; HASH_SIZE] = blake3_hash(value).into();
    Hash(result)
}

impl std::hash::Hash for Hash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        Hash::from_str(hex.trim_start_matches("0x")).map_err(SerdeError::custom)
    }
}

impl Encodable for Hash {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }
}

impl Hash {
    pub fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes()?;
        let bytes: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|_| ReaderError::InvalidSize)?;
        Ok(Hash::new(bytes))
    }
}

/// A 20-byte account identifier.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub const fn zero() -> Self {
        Address::new([0; ADDRESS_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    // Zero-extended 256-bit view, as seen on the VM stack
    pub fn to_word(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    // Truncate a word to its low 20 bytes
    pub fn from_word(word: U256) -> Self {
        let bytes: [u8; 32] = word.to_big_endian();
        let mut out = [0u8; ADDRESS_SIZE];
        out.copy_from_slice(&bytes[12..]);
        Address(out)
    }

    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_SIZE] = slice.try_into().ok()?;
        Some(Address(bytes))
    }
}

impl FromStr for Address {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| "Invalid address")?;
        Ok(Address::new(bytes))
    }
}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", &self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'a> Deserialize<'a> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        let hex = String::deserialize(deserializer)?;
        Address::from_str(&hex).map_err(SerdeError::custom)
    }
}

impl Encodable for Address {
    fn encode(&self, writer: &mut Writer) {
        writer.write_bytes(&self.0);
    }
}

impl Address {
    pub fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes()?;
        Address::from_slice(&bytes).ok_or(ReaderError::InvalidSize)
    }
}

pub trait Hashable: Encodable {
    #[inline(always)]
    fn hash(&self) -> Hash {
        let bytes = self.to_bytes();
        hash(&bytes)
    }
}

/// Compute the deterministic address of a created contract.
///
/// Formula: address = blake3(sender || nonce_be_minimal)[12..32]
///
/// The nonce is the sender's account nonce before the creating transaction
/// increments it, encoded as its minimal-length big-endian bytes (empty for
/// zero). Two nodes executing the same transaction derive the same address.
pub fn derive_contract_address(sender: &Address, nonce: u64) -> Address {
    let nonce_bytes = nonce.to_be_bytes();
    let start = nonce_bytes
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(nonce_bytes.len());

    let mut data = Vec::with_capacity(ADDRESS_SIZE + 8);
    data.extend_from_slice(sender.as_bytes());
    data.extend_from_slice(&nonce_bytes[start..]);

    let digest = hash(&data);
    let mut out = [0u8; ADDRESS_SIZE];
    out.copy_from_slice(&digest.as_bytes()[12..]);
    Address::new(out)
}
