//! Proof-of-authority consensus: an ordered validator set rotating in
//! round-robin over block numbers, with liveness accounting that benches
//! validators who keep missing their slots.

use bytes::Bytes;
use ember_common::{
    block::BlockHeader,
    config::{ChainConfig, MAX_TIMESTAMP_DRIFT},
    crypto::{hash, Address, Hash},
};
use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::core::error::ConsensusError;

/// Fork-choice decision for a block arriving on top of the current tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkChoice {
    /// The block extends the tip directly.
    Extend,
    /// Not an improvement (or ambiguous sibling); keep the current chain.
    Ignore,
    /// The block is ahead of the tip on another branch; adopt that branch.
    Reorg,
}

/// A member of the authority set.
#[derive(Debug, Clone)]
pub struct Validator {
    pub address: Address,
    pub active: bool,
    pub missed_blocks: u64,
    pub last_block_number: u64,
}

impl Validator {
    fn new(address: Address) -> Self {
        Self {
            address,
            active: true,
            missed_blocks: 0,
            last_block_number: 0,
        }
    }
}

pub struct Poa {
    // Insertion order is rotation order
    validators: IndexMap<Address, Validator>,
    inactivity_threshold: u64,
    block_time: u64,
}

impl Poa {
    pub fn new(config: &ChainConfig) -> Self {
        let mut validators = IndexMap::new();
        for address in &config.validators {
            validators.insert(*address, Validator::new(*address));
        }
        Self {
            validators,
            inactivity_threshold: config.inactivity_threshold,
            block_time: config.block_time,
        }
    }

    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    pub fn validator(&self, address: &Address) -> Option<&Validator> {
        self.validators.get(address)
    }

    fn active_validators(&self) -> Vec<&Validator> {
        self.validators
            .values()
            .filter(|v| v.active && v.missed_blocks < self.inactivity_threshold)
            .collect()
    }

    /// The validator expected to produce block `number`, by round-robin
    /// over the active set.
    pub fn expected_validator(&self, number: u64) -> Option<Address> {
        let active = self.active_validators();
        if active.is_empty() {
            return None;
        }
        let index = (number % active.len() as u64) as usize;
        Some(active[index].address)
    }

    pub fn add_validator(&mut self, address: Address) -> Result<(), ConsensusError> {
        if self.validators.contains_key(&address) {
            return Err(ConsensusError::DuplicateValidator(address));
        }
        info!("validator {} added to the authority set", address);
        self.validators.insert(address, Validator::new(address));
        Ok(())
    }

    pub fn remove_validator(&mut self, address: &Address) -> Result<(), ConsensusError> {
        if self.validators.shift_remove(address).is_none() {
            return Err(ConsensusError::UnknownValidator(*address));
        }
        info!("validator {} removed from the authority set", address);
        Ok(())
    }

    /// Produce the header signature: the content hash of the header bytes
    /// with an empty signature field. Deterministic and header-bound, which
    /// is all this design asks of it.
    pub fn sign_header(&self, header: &mut BlockHeader) -> Result<(), ConsensusError> {
        if !self.validators.contains_key(&header.validator) {
            return Err(ConsensusError::UnknownValidator(header.validator));
        }
        let digest = hash(&header.unsigned_bytes());
        header.signature = Bytes::copy_from_slice(digest.as_bytes());
        Ok(())
    }

    /// Enforce validator identity, timestamp rules and signature presence
    /// for a received header.
    pub fn validate_header(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
        now: u64,
    ) -> Result<(), ConsensusError> {
        match self.expected_validator(header.number) {
            Some(expected) if expected == header.validator => {}
            Some(expected) => {
                return Err(ConsensusError::WrongValidator {
                    expected,
                    actual: header.validator,
                })
            }
            None => return Err(ConsensusError::NoActiveValidator),
        }

        if header.timestamp <= parent.timestamp
            || header.timestamp - parent.timestamp < self.block_time
        {
            return Err(ConsensusError::TimestampTooEarly {
                timestamp: header.timestamp,
                parent: parent.timestamp,
                spacing: self.block_time,
            });
        }
        if header.timestamp > now + MAX_TIMESTAMP_DRIFT {
            return Err(ConsensusError::TimestampTooLate {
                timestamp: header.timestamp,
                now,
            });
        }

        if header.signature.is_empty() {
            return Err(ConsensusError::MissingSignature);
        }

        Ok(())
    }

    /// Liveness accounting on a newly observed block: the producer is
    /// refreshed, and whoever should have produced the block but did not
    /// moves one step closer to deactivation.
    pub fn update_validator_state(&mut self, number: u64, producer: &Address) {
        let expected = self.expected_validator(number);

        if let Some(validator) = self.validators.get_mut(producer) {
            validator.last_block_number = number;
            validator.missed_blocks = 0;
        } else {
            debug!("block {} produced by unknown validator {}", number, producer);
        }

        if let Some(expected) = expected {
            if expected != *producer {
                let threshold = self.inactivity_threshold;
                if let Some(missed) = self.validators.get_mut(&expected) {
                    missed.missed_blocks += 1;
                    if missed.missed_blocks >= threshold && missed.active {
                        missed.active = false;
                        warn!(
                            "validator {} deactivated after {} missed blocks",
                            expected, missed.missed_blocks
                        );
                    }
                }
            }
        }
    }

    /// Fork choice for `new` against the current `tip` (whose header hash
    /// is `tip_hash`). A reorg caller still has to locate the common
    /// ancestor itself.
    pub fn should_reorg(&self, new: &BlockHeader, tip: &BlockHeader, tip_hash: &Hash) -> ForkChoice {
        if new.parent_hash == *tip_hash {
            return ForkChoice::Extend;
        }
        if new.number <= tip.number {
            return ForkChoice::Ignore;
        }
        if new.number == tip.number + 1 {
            // same height as an extend but a different parent: ambiguous
            return ForkChoice::Ignore;
        }
        ForkChoice::Reorg
    }

    pub fn block_time(&self) -> u64 {
        self.block_time
    }
}
