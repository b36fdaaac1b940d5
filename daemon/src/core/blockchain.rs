//! Chain manager: genesis bootstrap, block append with fork choice, shallow
//! reorg, pool pruning and write-through persistence.
//!
//! The manager is the single owner of world state, pool and consensus.
//! Every mutation funnels through it from one logical execution context;
//! storage I/O is issued sequentially and awaited at each step.

use bytes::Bytes;
use ember_common::{
    account::Account,
    block::{receipts_root, transactions_root, Block, BlockHeader},
    config::{ChainConfig, GenesisFile},
    crypto::{Address, Hash, Hashable},
    encoding::{Decodable, Encodable, Reader, Writer},
    time::now_secs,
    transaction::{Receipt, Transaction},
};
use log::{debug, info};
use primitive_types::U256;
use std::collections::HashSet;
use std::str::FromStr;

use crate::core::{
    consensus::{ForkChoice, Poa},
    error::{BlockchainError, ChainError, StorageError},
    mempool::Mempool,
    processor::BlockProcessor,
    state::WorldState,
    storage::{keys, Storage},
};

pub struct Blockchain<S: Storage> {
    config: ChainConfig,
    state: WorldState,
    mempool: Mempool,
    consensus: Poa,
    processor: BlockProcessor,
    storage: S,
    tip_hash: Hash,
    tip_header: BlockHeader,
}

impl<S: Storage> Blockchain<S> {
    /// Bootstrap from storage if a chain tip exists there, otherwise create
    /// and persist the genesis block described by the genesis file.
    pub async fn new(genesis: GenesisFile, storage: S) -> Result<Self, BlockchainError> {
        let config = genesis.config.clone();
        if config.validators.is_empty() {
            return Err(ChainError::EmptyValidatorSet.into());
        }

        let mempool = Mempool::new(&config);
        let consensus = Poa::new(&config);
        let processor = BlockProcessor::new(config.clone());

        let mut chain = Self {
            config,
            state: WorldState::new(),
            mempool,
            consensus,
            processor,
            storage,
            tip_hash: Hash::zero(),
            tip_header: BlockHeader {
                parent_hash: Hash::zero(),
                number: 0,
                timestamp: 0,
                state_root: Hash::zero(),
                transactions_root: Hash::zero(),
                receipts_root: Hash::zero(),
                validator: Address::zero(),
                signature: Bytes::new(),
                gas_limit: 0,
                gas_used: 0,
                extra_data: Bytes::new(),
            },
        };

        let stored_tip = chain.storage.get(keys::CHAIN_TIP).await?;
        match stored_tip {
            Some(raw) => {
                let tip_hash = decode_hash(keys::CHAIN_TIP, &raw)?;
                chain.load_existing(tip_hash).await?;
            }
            None => chain.bootstrap_genesis(&genesis).await?,
        }

        // replay observed blocks so liveness accounting matches the chain
        for number in 1..=chain.tip_header.number {
            if let Some(header) = chain.header_by_number(number).await? {
                chain.consensus.update_validator_state(number, &header.validator);
            }
        }

        Ok(chain)
    }

    async fn bootstrap_genesis(&mut self, genesis: &GenesisFile) -> Result<(), BlockchainError> {
        for (address, alloc) in &genesis.alloc {
            let mut account = Account::new();
            account.balance = alloc.balance;
            account.nonce = alloc.nonce;
            if let Some(code) = &alloc.code {
                let raw = hex::decode(code.trim_start_matches("0x"))
                    .map_err(|e| StorageError::Corrupted {
                        key: "genesis code".into(),
                        reason: e.to_string(),
                    })?;
                account.code = Bytes::from(raw);
            }
            for (key, value) in &alloc.storage {
                if !value.is_zero() {
                    account.storage.insert(*key, *value);
                }
            }
            self.state.put_account(*address, account);
        }

        let header = BlockHeader {
            parent_hash: Hash::zero(),
            number: 0,
            timestamp: self.config.genesis_timestamp,
            state_root: self.state.state_root(),
            transactions_root: transactions_root(&[]),
            receipts_root: receipts_root(&[]),
            validator: self.config.validators[0],
            signature: Bytes::new(),
            gas_limit: self.config.gas_limit,
            gas_used: 0,
            extra_data: Bytes::new(),
        };
        let genesis_block = Block::new(header, Vec::new());

        info!("created genesis block {}", genesis_block.hash());
        self.persist_block(&genesis_block, &[], true).await?;
        self.persist_state().await?;
        self.tip_hash = genesis_block.hash();
        self.tip_header = genesis_block.header;
        Ok(())
    }

    async fn load_existing(&mut self, tip_hash: Hash) -> Result<(), BlockchainError> {
        let header = self
            .header_by_hash(&tip_hash)
            .await?
            .ok_or_else(|| ChainError::UnknownParent(tip_hash.clone()))?;

        // rebuild the world state from the persisted account records
        for (key, value) in self.storage.scan_prefix(b"account:").await? {
            let address = parse_address_key(&key, "account:")?;
            let account = Account::from_store_bytes(&value)?;
            self.state.put_account(address, account);
        }
        for (key, value) in self.storage.scan_prefix(b"storage:").await? {
            let (address, slot) = parse_storage_key(&key)?;
            let slot_value = decode_uint(&key, &value)?;
            if let Some(account) = self.state.account(&address) {
                let mut account = account.clone();
                account.storage.insert(slot, slot_value);
                self.state.put_account(address, account);
            }
        }
        self.state.drain_touched();

        info!("loaded chain tip {} at height {}", tip_hash, header.number);
        self.tip_hash = tip_hash;
        self.tip_header = header;
        Ok(())
    }

    /// Admit a transaction into the pool.
    pub fn submit_transaction(&mut self, transaction: Transaction) -> Result<Hash, BlockchainError> {
        let account_nonce = self.state.get_nonce(&transaction.from);
        let hash = self
            .mempool
            .add_transaction(transaction, account_nonce, now_secs())?;
        Ok(hash)
    }

    /// Produce, persist and adopt the next block. `timestamp` overrides the
    /// clock for deterministic production.
    pub async fn produce_block(
        &mut self,
        timestamp: Option<u64>,
    ) -> Result<Block, BlockchainError> {
        let timestamp = timestamp
            .unwrap_or_else(now_secs)
            .max(self.tip_header.timestamp + self.config.block_time);

        let produced = self.processor.create_block(
            &mut self.state,
            &self.mempool,
            &self.consensus,
            &self.tip_header,
            timestamp,
        )?;

        self.persist_block(&produced.block, &produced.receipts, true).await?;
        self.persist_state().await?;

        self.consensus
            .update_validator_state(produced.block.number(), &produced.block.header.validator);

        self.mempool.remove_transactions(&produced.included);
        self.mempool.remove_transactions(&produced.dropped);
        for sender in produced
            .block
            .transactions
            .iter()
            .map(|tx| tx.from)
            .collect::<HashSet<_>>()
        {
            let nonce = self.state.get_nonce(&sender);
            self.mempool.update_account_nonce(sender, nonce);
        }

        self.tip_hash = produced.block.hash();
        self.tip_header = produced.block.header.clone();
        Ok(produced.block)
    }

    /// Append a block received from outside. Extends, ignores or reorgs per
    /// fork choice; ignored blocks are still stored as side blocks so a
    /// longer branch can win later.
    pub async fn add_block(&mut self, block: Block) -> Result<ForkChoice, BlockchainError> {
        let hash = block.hash();
        if self.block_by_hash(&hash).await?.is_some() {
            return Err(ChainError::AlreadyKnown(hash).into());
        }

        let parent = self
            .header_by_hash(&block.header.parent_hash)
            .await?
            .ok_or_else(|| ChainError::UnknownParent(block.header.parent_hash.clone()))?;

        self.processor
            .validate_structure(&block, &parent, &self.consensus, now_secs())?;

        let choice = self
            .consensus
            .should_reorg(&block.header, &self.tip_header, &self.tip_hash);

        match choice {
            ForkChoice::Extend => {
                self.processor.validate_pre_state(&block, &self.state)?;
                let receipts = self.processor.apply_block(&mut self.state, &block)?;
                self.persist_block(&block, &receipts, true).await?;
                self.persist_state().await?;
                self.adopt_block(&block);
            }
            ForkChoice::Ignore => {
                debug!("storing side block {} at height {}", hash, block.number());
                self.persist_block(&block, &[], false).await?;
            }
            ForkChoice::Reorg => {
                self.persist_block(&block, &[], false).await?;
                self.reorg_to(block.clone()).await?;
            }
        }
        Ok(choice)
    }

    // Adopt an extend-block: liveness accounting, pool pruning, new tip.
    fn adopt_block(&mut self, block: &Block) {
        self.consensus
            .update_validator_state(block.number(), &block.header.validator);

        let hashes: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash()).collect();
        self.mempool.remove_transactions(&hashes);
        for sender in block
            .transactions
            .iter()
            .map(|tx| tx.from)
            .collect::<HashSet<_>>()
        {
            let nonce = self.state.get_nonce(&sender);
            self.mempool.update_account_nonce(sender, nonce);
        }

        self.tip_hash = block.hash();
        self.tip_header = block.header.clone();
    }

    /// Shallow reorg onto the branch ending in `new_tip`: walk back to the
    /// common ancestor, return the displaced transactions to the pool, then
    /// adopt the new branch block by block.
    async fn reorg_to(&mut self, new_tip: Block) -> Result<(), BlockchainError> {
        // collect the new branch back to where it meets the canonical chain
        let mut branch = vec![new_tip.clone()];
        let mut cursor = new_tip.header.parent_hash.clone();
        let ancestor_number = loop {
            let block = self
                .block_by_hash(&cursor)
                .await?
                .ok_or_else(|| ChainError::UnknownParent(cursor.clone()))?;
            let canonical = self.hash_by_number(block.number()).await?;
            if canonical.as_ref() == Some(&block.hash()) || block.number() == 0 {
                break block.number();
            }
            cursor = block.header.parent_hash.clone();
            branch.push(block);
        };
        branch.reverse();

        info!(
            "reorg: adopting branch of {} blocks from height {} (old tip {})",
            branch.len(),
            ancestor_number + 1,
            self.tip_header.number
        );

        // displaced canonical blocks give their transactions back to the pool
        for number in (ancestor_number + 1)..=self.tip_header.number {
            if let Some(hash) = self.hash_by_number(number).await? {
                if let Some(displaced) = self.block_by_hash(&hash).await? {
                    for tx in displaced.transactions {
                        self.mempool.reinject(tx, now_secs());
                    }
                }
            }
        }

        // adopt the new branch in order
        for block in &branch {
            self.storage
                .put(&keys::block_by_number(block.number()), block.hash().as_bytes().to_vec())
                .await?;
            self.adopt_block(block);
        }

        self.storage
            .put(keys::CHAIN_TIP, self.tip_hash.as_bytes().to_vec())
            .await?;
        self.storage
            .put(
                keys::CHAIN_TIP_NUMBER,
                self.tip_header.number.to_string().into_bytes(),
            )
            .await?;
        Ok(())
    }

    /// Evict pool entries older than the configured timeout.
    pub fn expire_pool(&mut self) -> usize {
        self.mempool.remove_old_transactions(now_secs())
    }

    async fn persist_block(
        &mut self,
        block: &Block,
        receipts: &[Receipt],
        canonical: bool,
    ) -> Result<(), BlockchainError> {
        let hash = block.hash();

        self.storage
            .put(&keys::block(&hash), block.to_bytes())
            .await?;
        self.storage
            .put(&keys::header(&hash), block.header.to_bytes())
            .await?;
        if !receipts.is_empty() {
            self.storage
                .put(&keys::metadata(&hash), encode_receipts(receipts))
                .await?;
        }

        for (index, tx) in block.transactions.iter().enumerate() {
            let tx_hash = tx.hash();
            self.storage
                .put(&keys::transaction(&tx_hash), tx.to_bytes())
                .await?;
            self.storage
                .put(&keys::tx_block(&tx_hash), hash.as_bytes().to_vec())
                .await?;
            self.storage
                .put(&keys::tx_index(&tx_hash), index.to_string().into_bytes())
                .await?;
        }

        if canonical {
            self.storage
                .put(&keys::block_by_number(block.number()), hash.as_bytes().to_vec())
                .await?;
            self.storage
                .put(keys::CHAIN_TIP, hash.as_bytes().to_vec())
                .await?;
            self.storage
                .put(keys::CHAIN_TIP_NUMBER, block.number().to_string().into_bytes())
                .await?;
        }
        Ok(())
    }

    // Write accounts touched since the last block through to storage
    async fn persist_state(&mut self) -> Result<(), BlockchainError> {
        for address in self.state.drain_touched() {
            match self.state.account(&address) {
                Some(account) => {
                    let account = account.clone();
                    self.storage
                        .put(&keys::account(&address), account.to_store_bytes())
                        .await?;

                    // reconcile the persisted slots with the live ones
                    let prefix = keys::storage_prefix(&address);
                    for (key, _) in self.storage.scan_prefix(&prefix).await? {
                        let (_, slot) = parse_storage_key(&key)?;
                        if !account.storage.contains_key(&slot) {
                            self.storage.delete(&key).await?;
                        }
                    }
                    for (slot, value) in &account.storage {
                        let mut writer = Writer::new();
                        writer.write_uint(*value);
                        self.storage
                            .put(&keys::storage_slot(&address, slot), writer.finish())
                            .await?;
                    }
                }
                None => {
                    self.storage.delete(&keys::account(&address)).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, BlockchainError> {
        match self.storage.get(&keys::block(hash)).await? {
            Some(raw) => Ok(Some(Block::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn header_by_hash(&self, hash: &Hash) -> Result<Option<BlockHeader>, BlockchainError> {
        match self.storage.get(&keys::header(hash)).await? {
            Some(raw) => Ok(Some(BlockHeader::from_bytes(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn hash_by_number(&self, number: u64) -> Result<Option<Hash>, BlockchainError> {
        match self.storage.get(&keys::block_by_number(number)).await? {
            Some(raw) => Ok(Some(decode_hash(&keys::block_by_number(number), &raw)?)),
            None => Ok(None),
        }
    }

    pub async fn block_by_number(&self, number: u64) -> Result<Option<Block>, BlockchainError> {
        match self.hash_by_number(number).await? {
            Some(hash) => self.block_by_hash(&hash).await,
            None => Ok(None),
        }
    }

    pub async fn header_by_number(
        &self,
        number: u64,
    ) -> Result<Option<BlockHeader>, BlockchainError> {
        match self.hash_by_number(number).await? {
            Some(hash) => self.header_by_hash(&hash).await,
            None => Ok(None),
        }
    }

    pub async fn receipts_by_block(&self, hash: &Hash) -> Result<Vec<Receipt>, BlockchainError> {
        match self.storage.get(&keys::metadata(hash)).await? {
            Some(raw) => Ok(decode_receipts(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn tip_hash(&self) -> &Hash {
        &self.tip_hash
    }

    pub fn tip_header(&self) -> &BlockHeader {
        &self.tip_header
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn consensus(&self) -> &Poa {
        &self.consensus
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}

fn encode_receipts(receipts: &[Receipt]) -> Vec<u8> {
    let mut writer = Writer::new();
    writer.write_list(|w| {
        for receipt in receipts {
            receipt.encode(w);
        }
    });
    writer.finish()
}

fn decode_receipts(raw: &[u8]) -> Result<Vec<Receipt>, BlockchainError> {
    let mut reader = Reader::new(raw);
    let mut list = reader.read_list()?;
    let mut receipts = Vec::new();
    while list.has_more() {
        receipts.push(Receipt::decode(&mut list)?);
    }
    Ok(receipts)
}

fn decode_hash(key: &[u8], raw: &[u8]) -> Result<Hash, BlockchainError> {
    let bytes: [u8; 32] = raw.try_into().map_err(|_| StorageError::Corrupted {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: "expected 32 bytes".into(),
    })?;
    Ok(Hash::new(bytes))
}

fn decode_uint(key: &[u8], raw: &[u8]) -> Result<U256, BlockchainError> {
    let mut reader = Reader::new(raw);
    reader.read_uint().map_err(|_| {
        StorageError::Corrupted {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: "expected an encoded integer".into(),
        }
        .into()
    })
}

fn parse_address_key(key: &[u8], prefix: &str) -> Result<Address, BlockchainError> {
    let text = String::from_utf8_lossy(key);
    let hex_part = text.strip_prefix(prefix).ok_or_else(|| StorageError::Corrupted {
        key: text.clone().into_owned(),
        reason: "missing prefix".into(),
    })?;
    Address::from_str(hex_part).map_err(|reason| {
        StorageError::Corrupted {
            key: text.into_owned(),
            reason: reason.into(),
        }
        .into()
    })
}

// storage:<40 hex address>:<64 hex slot>
fn parse_storage_key(key: &[u8]) -> Result<(Address, U256), BlockchainError> {
    let text = String::from_utf8_lossy(key);
    let corrupted = |reason: &str| StorageError::Corrupted {
        key: text.clone().into_owned(),
        reason: reason.into(),
    };

    let rest = text.strip_prefix("storage:").ok_or_else(|| corrupted("missing prefix"))?;
    let (addr_part, slot_part) = rest.split_once(':').ok_or_else(|| corrupted("missing slot"))?;
    let address = Address::from_str(addr_part).map_err(|_| corrupted("bad address"))?;
    let raw = hex::decode(slot_part).map_err(|_| corrupted("bad slot"))?;
    if raw.len() != 32 {
        return Err(corrupted("bad slot length").into());
    }
    Ok((address, U256::from_big_endian(&raw)))
}
