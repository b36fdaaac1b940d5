use bytes::Bytes;
use std::fmt::{Display, Error as FmtError, Formatter};

use crate::{
    crypto::{hash, Address, Hash, Hashable},
    encoding::{Decodable, Encodable, Reader, ReaderError, Writer},
    transaction::{Receipt, Transaction},
};

/// Block header, immutable once signed.
///
/// `parent_hash` is the content hash of the parent header; `state_root`,
/// `transactions_root` and `receipts_root` commit to the post-state, the
/// transaction list and the receipt list respectively. The signature is
/// derived from the header bytes with the signature field left empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: Hash,
    pub number: u64,
    pub timestamp: u64,
    pub state_root: Hash,
    pub transactions_root: Hash,
    pub receipts_root: Hash,
    pub validator: Address,
    pub signature: Bytes,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub extra_data: Bytes,
}

impl BlockHeader {
    /// Header bytes with the signature field emptied, the input to signing.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = Bytes::new();
        unsigned.to_bytes()
    }
}

impl Encodable for BlockHeader {
    fn encode(&self, writer: &mut Writer) {
        writer.write_list(|w| {
            w.write_bytes(self.parent_hash.as_bytes());
            w.write_u64(self.number);
            w.write_u64(self.timestamp);
            w.write_bytes(self.state_root.as_bytes());
            w.write_bytes(self.transactions_root.as_bytes());
            w.write_bytes(self.receipts_root.as_bytes());
            w.write_bytes(self.validator.as_bytes());
            w.write_bytes(&self.signature);
            w.write_u64(self.gas_limit);
            w.write_u64(self.gas_used);
            w.write_bytes(&self.extra_data);
        });
    }
}

impl Decodable for BlockHeader {
    fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let mut list = reader.read_list()?;
        let parent_hash = Hash::decode(&mut list)?;
        let number = list.read_u64()?;
        let timestamp = list.read_u64()?;
        let state_root = Hash::decode(&mut list)?;
        let transactions_root = Hash::decode(&mut list)?;
        let receipts_root = Hash::decode(&mut list)?;
        let validator = Address::decode(&mut list)?;
        let signature = Bytes::from(list.read_bytes()?);
        let gas_limit = list.read_u64()?;
        let gas_used = list.read_u64()?;
        let extra_data = Bytes::from(list.read_bytes()?);
        list.expect_end()?;

        Ok(Self {
            parent_hash,
            number,
            timestamp,
            state_root,
            transactions_root,
            receipts_root,
            validator,
            signature,
            gas_limit,
            gas_used,
            extra_data,
        })
    }
}

impl Hashable for BlockHeader {}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "BlockHeader[number {}, validator {}, gas {}/{}]",
            self.number, self.validator, self.gas_used, self.gas_limit
        )
    }
}

/// A header with its ordered transactions. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    // Block identity is the header hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }
}

impl Encodable for Block {
    fn encode(&self, writer: &mut Writer) {
        writer.write_list(|w| {
            self.header.encode(w);
            w.write_list(|w| {
                for tx in &self.transactions {
                    tx.encode(w);
                }
            });
        });
    }
}

impl Decodable for Block {
    fn decode(reader: &mut Reader) -> Result<Self, ReaderError> {
        let mut list = reader.read_list()?;
        let header = BlockHeader::decode(&mut list)?;
        let mut transactions = Vec::new();
        let mut txs_list = list.read_list()?;
        while txs_list.has_more() {
            transactions.push(Transaction::decode(&mut txs_list)?);
        }
        list.expect_end()?;

        Ok(Self {
            header,
            transactions,
        })
    }
}

/// Commitment to an ordered transaction list. A pure function of its input:
/// recomputing over the same transactions yields the same hash bit for bit.
pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    let mut writer = Writer::new();
    writer.write_list(|w| {
        for tx in transactions {
            tx.encode(w);
        }
    });
    hash(&writer.finish())
}

/// Commitment to an ordered receipt list.
pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    let mut writer = Writer::new();
    writer.write_list(|w| {
        for receipt in receipts {
            receipt.encode(w);
        }
    });
    hash(&writer.finish())
}
