use thiserror::Error;

use crate::coin::Outpoint;

/// Coarse classification of a [`SendError`], one per failure family a caller
/// may want to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    AddressMismatch,
    InsufficientFunds,
    BuildError,
    SigningError,
    FinalizeError,
    ProtocolError,
    Collaborator,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("no receivers specified")]
    NoReceivers,

    #[error("invalid receivers: {0}")]
    MalformedReceivers(String),

    #[error("invalid amount ({amount}), must be greater than dust {dust}")]
    BelowDust { amount: u64, dust: u64 },

    #[error("total amount overflows")]
    AmountOverflow,

    #[error("invalid receiver address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid receiver address '{address}': must be associated with the connected service provider")]
    AddressMismatch { address: String },

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("build failed: {0}")]
    Build(String),

    #[error("signing input {index} failed: {reason}")]
    Signing { index: usize, reason: String },

    #[error("finalizing input {index} failed: {reason}")]
    Finalize { index: usize, reason: String },

    #[error("round protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("explorer: {0}")]
    Explorer(#[source] anyhow::Error),

    #[error("wallet: {0}")]
    Wallet(#[source] anyhow::Error),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::NoReceivers
            | SendError::MalformedReceivers(_)
            | SendError::BelowDust { .. }
            | SendError::AmountOverflow
            | SendError::InvalidAddress { .. } => ErrorKind::InvalidInput,
            SendError::AddressMismatch { .. } => ErrorKind::AddressMismatch,
            SendError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            SendError::Build(_) => ErrorKind::BuildError,
            SendError::Signing { .. } => ErrorKind::SigningError,
            SendError::Finalize { .. } => ErrorKind::FinalizeError,
            SendError::Protocol(_) => ErrorKind::ProtocolError,
            SendError::Explorer(_) | SendError::Wallet(_) => ErrorKind::Collaborator,
        }
    }
}

/// Failures of the register / claim / settle exchange with the coordinator.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("register payment rejected: {0}")]
    RegisterRejected(#[source] anyhow::Error),

    #[error("claim payment rejected: {0}")]
    ClaimRejected(#[source] anyhow::Error),

    #[error("round event subscription failed: {0}")]
    Subscribe(#[source] anyhow::Error),

    #[error("forfeit submission rejected: {0}")]
    FinalizeRejected(#[source] anyhow::Error),

    #[error("coordinator asked to forfeit unregistered coin {0}")]
    UnexpectedForfeit(Outpoint),

    #[error("round failed: {0}")]
    RoundFailed(String),

    #[error("round stream closed before a terminal event")]
    StreamClosed,

    #[error("timed out after {0:?} waiting for round completion")]
    TimedOut(std::time::Duration),

    #[error("wait for round completion cancelled")]
    Cancelled,

    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: &'static str },
}

pub type Result<T, E = SendError> = std::result::Result<T, E>;
