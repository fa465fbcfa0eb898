use thiserror::Error;

use crate::address::Address;
use crate::fee_config::FeeCategory;

/// Result alias used across the core crate.
pub type Result<T, E = TollError> = std::result::Result<T, E>;

/// Canonical error type exposed by the protocol core.
///
/// Every variant carries the offending account and/or amount so an operator
/// can decide whether to retry, reconfigure or abandon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TollError {
    /// A derived address or recipient does not match the registered configuration.
    #[error("config mismatch on {account}: {reason}")]
    ConfigMismatch { account: Address, reason: String },

    /// A claim asks for more than the category accumulator holds.
    #[error("claim of {requested} exceeds unclaimed {category} fees ({available})")]
    InsufficientUnclaimedBalance {
        category: FeeCategory,
        requested: u64,
        available: u64,
    },

    /// A debit exceeds the spendable balance of an account.
    #[error("account {account} holds {available}, operation needs {requested}")]
    InsufficientFunds {
        account: Address,
        requested: u64,
        available: u64,
    },

    /// Creation against a key that already holds a record.
    #[error("account {account} is already initialized")]
    AlreadyInitialized { account: Address },

    /// The operation never committed (e.g. its ordering token expired); safe to retry.
    #[error("transient submission failure: {reason}")]
    TransientSubmissionFailure { reason: String },

    #[error("malformed address {input:?}: {reason}")]
    MalformedAddress { input: String, reason: String },

    #[error("operation on {account} requires a signature from {required}")]
    Unauthorized { account: Address, required: Address },

    #[error("invalid signature from {signer}")]
    InvalidSignature { signer: Address },

    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: u64, reason: &'static str },

    #[error("invalid ui amount {input:?}: {reason}")]
    InvalidUiAmount { input: String, reason: &'static str },

    #[error("invalid fee configuration: {0}")]
    InvalidFeeConfig(String),

    #[error("arithmetic overflow in {0}")]
    MathOverflow(&'static str),

    #[error("unknown account {account}")]
    UnknownAccount { account: Address },

    /// The exact same signed operation was already applied.
    #[error("operation {id} was already applied")]
    DuplicateOperation { id: String },

    #[error("codec error: {0}")]
    Codec(String),
}

impl TollError {
    /// Only transient submission failures may be resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TollError::TransientSubmissionFailure { .. })
    }

    /// Short category name reported to operators.
    pub fn kind(&self) -> &'static str {
        match self {
            TollError::ConfigMismatch { .. } => "ConfigMismatch",
            TollError::InsufficientUnclaimedBalance { .. } => "InsufficientUnclaimedBalance",
            TollError::InsufficientFunds { .. } => "InsufficientFunds",
            TollError::AlreadyInitialized { .. } => "AlreadyInitialized",
            TollError::TransientSubmissionFailure { .. } => "TransientSubmissionFailure",
            TollError::MalformedAddress { .. } => "MalformedAddress",
            TollError::Unauthorized { .. } => "Unauthorized",
            TollError::InvalidSignature { .. } => "InvalidSignature",
            TollError::InvalidAmount { .. } => "InvalidAmount",
            TollError::InvalidUiAmount { .. } => "InvalidUiAmount",
            TollError::InvalidFeeConfig(_) => "InvalidFeeConfig",
            TollError::MathOverflow(_) => "MathOverflow",
            TollError::UnknownAccount { .. } => "UnknownAccount",
            TollError::DuplicateOperation { .. } => "DuplicateOperation",
            TollError::Codec(_) => "Codec",
        }
    }

    pub(crate) fn mismatch(account: Address, reason: impl Into<String>) -> Self {
        TollError::ConfigMismatch {
            account,
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TollError {
    fn from(err: std::io::Error) -> Self {
        TollError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for TollError {
    fn from(err: serde_json::Error) -> Self {
        TollError::Codec(err.to_string())
    }
}
