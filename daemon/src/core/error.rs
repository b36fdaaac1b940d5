use ember_common::{
    crypto::{Address, Hash},
    encoding::ReaderError,
};
use primitive_types::U256;
use thiserror::Error;

/// World state failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: U256, have: U256 },

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Snapshot {0} not found")]
    SnapshotNotFound(usize),
}

/// Failures raised inside a VM execution frame. All of them end the frame;
/// `Revert` is the only one carrying return data back to the caller.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum VmError {
    #[error("Out of gas")]
    OutOfGas,

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Stack overflow")]
    StackOverflow,

    #[error("Invalid jump destination {0}")]
    InvalidJump(usize),

    #[error("Invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),

    #[error("Push data runs past end of code")]
    TruncatedPush,

    #[error("Execution reverted")]
    Revert,
}

/// Transaction-level failures. All are recoverable: a failing transaction
/// never poisons the surrounding block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Invalid nonce: transaction has {tx_nonce}, account is at {account_nonce}")]
    InvalidNonce { tx_nonce: u64, account_nonce: u64 },

    #[error("Insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: U256, have: U256 },

    #[error("Gas limit {gas_limit} below intrinsic cost {intrinsic}")]
    GasLimitTooLow { gas_limit: u64, intrinsic: u64 },

    #[error("Account already exists at contract address {0}")]
    AccountCollision(Address),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Pool admission failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Transaction {0} already in pool")]
    Duplicate(Hash),

    #[error("Stale nonce {nonce}, expected at least {expected}")]
    StaleNonce { nonce: u64, expected: u64 },

    #[error("Sender {0} reached its pool transaction limit")]
    AccountLimitExceeded(Address),

    #[error("Gas price {price} below minimum {minimum}")]
    GasPriceTooLow { price: u64, minimum: u64 },

    #[error("Gas limit {limit} above block gas limit {maximum}")]
    GasLimitTooHigh { limit: u64, maximum: u64 },

    #[error("Gas limit must be greater than zero")]
    ZeroGasLimit,

    #[error("Transaction has no sender")]
    MissingSender,
}

/// Consensus failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Unknown validator {0}")]
    UnknownValidator(Address),

    #[error("Validator {0} already registered")]
    DuplicateValidator(Address),

    #[error("Wrong validator: block signed by {actual}, expected {expected}")]
    WrongValidator { expected: Address, actual: Address },

    #[error("Timestamp {timestamp} too early (parent {parent}, spacing {spacing})")]
    TimestampTooEarly {
        timestamp: u64,
        parent: u64,
        spacing: u64,
    },

    #[error("Timestamp {timestamp} too far in the future (now {now})")]
    TimestampTooLate { timestamp: u64, now: u64 },

    #[error("Header is missing its signature")]
    MissingSignature,

    #[error("No active validator available")]
    NoActiveValidator,
}

/// Structural block and chain failures. Unlike per-transaction failures,
/// these reject the whole block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Unknown parent {0}")]
    UnknownParent(Hash),

    #[error("Block number {number} does not follow parent {parent}")]
    BlockNumberMismatch { number: u64, parent: u64 },

    #[error("Transactions root mismatch")]
    TxRootMismatch,

    #[error("Gas used {gas_used} inconsistent with limit {gas_limit}")]
    GasUsedMismatch { gas_used: u64, gas_limit: u64 },

    #[error("Block gas limit {actual} does not match chain config {expected}")]
    GasLimitMismatch { expected: u64, actual: u64 },

    #[error("Duplicate transaction {0} in block")]
    DuplicateTransaction(Hash),

    #[error("Block {0} already known")]
    AlreadyKnown(Hash),

    #[error("Genesis configuration has no validators")]
    EmptyValidatorSet,
}

/// Persistent storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupted record under key {key}: {reason}")]
    Corrupted { key: String, reason: String },
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Umbrella error for everything the chain manager surfaces to callers.
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Decoding error: {0}")]
    Decode(#[from] ReaderError),
}
