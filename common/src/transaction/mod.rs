use bytes::Bytes;
use primitive_types::U256;
use std::fmt::{Display, Error as FmtError, Formatter};

use crate::{
    crypto::{Address, Hash, Hashable},
    encoding::{Decodable, Encodable, Reader, ReaderError, Writer},
};

/// A transfer, contract call or contract creation.
///
/// `to == None` marks a creation; the payload is then the init code whose
/// return data becomes the deployed runtime code. The transaction's identity
/// is the content hash of its canonical encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub nonce: u64,
    pub data: Bytes,
}

impl Transaction {
    pub fn is_creation(&self) -> bool {
        self.to.is_none()
    }

    // Maximum the sender can be charged up front: value + gas_limit * gas_price.
    // Saturates instead of wrapping so an absurd value still fails the
    // balance check rather than slipping past it.
    pub fn upfront_cost(&self) -> U256 {
        self.value
            .saturating_add(U256::from(self.gas_limit) * U256::from(self.gas_price))
    }
}

impl Encodable for Transaction {
    // Fields in order: from, to (empty string for creations), value,
    // gasLimit, gasPrice, nonce, data
    fn encode(&self, writer: &mut Writer) {
        writer.write_list(|w| {
            w.write_bytes(self.from.as_bytes());
            match &self.to {
                Some(to) => w.write_bytes(to.as_bytes()),
                None => w.write_bytes(&[]),
            }
            w.write_uint(self.value);
            w.write_u64(self.gas_limit);
            w.write_u64(self.gas_price);
            w.write_u64(self.nonce);
            w.write_bytes(&self.data);
        });
    }
}

impl Decodable for Transaction {
    fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let mut list = reader.read_list()?;
        let from = Address::decode(&mut list)?;
        let to_bytes = list.read_bytes()?;
        let to = if to_bytes.is_empty() {
            None
        } else {
            Some(Address::from_slice(&to_bytes).ok_or(ReaderError::InvalidSize)?)
        };
        let value = list.read_uint()?;
        let gas_limit = list.read_u64()?;
        let gas_price = list.read_u64()?;
        let nonce = list.read_u64()?;
        let data = Bytes::from(list.read_bytes()?);
        list.expect_end()?;

        Ok(Self {
            from,
            to,
            value,
            gas_limit,
            gas_price,
            nonce,
            data,
        })
    }
}

impl Hashable for Transaction {}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match &self.to {
            Some(to) => write!(
                f,
                "Transaction[{} -> {}, value {}, nonce {}]",
                self.from, to, self.value, self.nonce
            ),
            None => write!(
                f,
                "Transaction[{} -> create, value {}, nonce {}]",
                self.from, self.value, self.nonce
            ),
        }
    }
}

/// A log record emitted during execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<U256>,
    pub data: Bytes,
}

impl Encodable for Log {
    fn encode(&self, writer: &mut Writer) {
        writer.write_list(|w| {
            w.write_bytes(self.address.as_bytes());
            w.write_list(|w| {
                for topic in &self.topics {
                    w.write_uint(*topic);
                }
            });
            w.write_bytes(&self.data);
        });
    }
}

impl Decodable for Log {
    fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let mut list = reader.read_list()?;
        let address = Address::decode(&mut list)?;
        let mut topics = Vec::new();
        let mut topics_list = list.read_list()?;
        while topics_list.has_more() {
            topics.push(topics_list.read_uint()?);
        }
        let data = Bytes::from(list.read_bytes()?);
        list.expect_end()?;

        Ok(Self {
            address,
            topics,
            data,
        })
    }
}

/// The structured result of one transaction inside a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_number: u64,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    // Set for successful creations only
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
    pub status: bool,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status
    }
}

impl Encodable for Receipt {
    fn encode(&self, writer: &mut Writer) {
        writer.write_list(|w| {
            w.write_bytes(self.tx_hash.as_bytes());
            w.write_u64(self.block_number);
            w.write_u64(self.gas_used);
            w.write_u64(self.cumulative_gas_used);
            match &self.contract_address {
                Some(addr) => w.write_bytes(addr.as_bytes()),
                None => w.write_bytes(&[]),
            }
            w.write_list(|w| {
                for log in &self.logs {
                    log.encode(w);
                }
            });
            w.write_u64(self.status as u64);
        });
    }
}

impl Decodable for Receipt {
    fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let mut list = reader.read_list()?;
        let tx_hash = Hash::decode(&mut list)?;
        let block_number = list.read_u64()?;
        let gas_used = list.read_u64()?;
        let cumulative_gas_used = list.read_u64()?;
        let addr_bytes = list.read_bytes()?;
        let contract_address = if addr_bytes.is_empty() {
            None
        } else {
            Some(Address::from_slice(&addr_bytes).ok_or(ReaderError::InvalidSize)?)
        };
        let mut logs = Vec::new();
        let mut logs_list = list.read_list()?;
        while logs_list.has_more() {
            logs.push(Log::decode(&mut logs_list)?);
        }
        let status = list.read_u64()? != 0;
        list.expect_end()?;

        Ok(Self {
            tx_hash,
            block_number,
            gas_used,
            cumulative_gas_used,
            contract_address,
            logs,
            status,
        })
    }
}
