//! Engine Errors
//!
//! Every failure maps to exactly one [`ErrorKind`]. A call that returns an
//! error has changed nothing.

use message_bridge::ChannelError;
use serde::Serialize;
use stake_types::{Amount, ConfigError, Pubkey};
use thiserror::Error;

use crate::{auth::Permission, oracle::RecordStatus, pause::Operation, unstake::RequestState};

/// Error taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Malformed or unauthorized input
    ValidationFailure,
    /// Soft anomaly in oracle data
    SanityFailure,
    /// Entity not in the state the operation needs
    StateConflict,
    /// Cap, balance or liquidity limit hit
    ResourceExhausted,
    /// Parameter outside its documented range
    ConfigurationError,
}

/// Staking engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakeError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("{caller} lacks {permission:?} permission")]
    Unauthorized {
        caller: Pubkey,
        permission: Permission,
    },

    #[error("Sequence {got} does not exceed stream head {head}")]
    NonMonotonicSequence { got: u64, head: u64 },

    #[error("Exit owes {owed}, below minimum {minimum}")]
    BelowMinimum { owed: Amount, minimum: Amount },

    #[error("Unknown oracle record {0}")]
    UnknownRecord(u64),

    #[error("Unknown unstake request {0}")]
    UnknownRequest(u64),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Snapshot delta {delta} exceeds sanity bound (baseline {baseline})")]
    SanityBoundExceeded { delta: i128, baseline: Amount },

    #[error("Oracle record {id} is {status:?}")]
    InvalidRecordState { id: u64, status: RecordStatus },

    #[error("Oracle record {0} is still awaiting resolution")]
    OutstandingRecord(u64),

    #[error("Block {height} of oracle record {id} is not final yet")]
    NotFinal { id: u64, height: u64 },

    #[error("Unstake request {0} is not allocated")]
    NotAllocated(u64),

    #[error("Unstake request {id} claimable at block {eligible_block}, current block {current}")]
    TooEarly {
        id: u64,
        eligible_block: u64,
        current: u64,
    },

    #[error("Unstake request {id} is {state:?}")]
    InvalidRequestState { id: u64, state: RequestState },

    #[error("{0:?} is paused")]
    Paused(Operation),

    #[error("Supply cap exceeded: supply would reach {resulting}, cap is {cap}")]
    SupplyCapExceeded { resulting: Amount, cap: Amount },

    #[error("Insufficient balance: have {available}, need {requested}")]
    InsufficientBalance {
        available: Amount,
        requested: Amount,
    },

    #[error("Nothing to claim")]
    NothingToClaim,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StakeError {
    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            StakeError::InvalidAmount(_)
            | StakeError::Unauthorized { .. }
            | StakeError::NonMonotonicSequence { .. }
            | StakeError::BelowMinimum { .. }
            | StakeError::UnknownRecord(_)
            | StakeError::UnknownRequest(_)
            | StakeError::MalformedPayload(_) => ErrorKind::ValidationFailure,

            StakeError::SanityBoundExceeded { .. } => ErrorKind::SanityFailure,

            StakeError::InvalidRecordState { .. }
            | StakeError::OutstandingRecord(_)
            | StakeError::NotFinal { .. }
            | StakeError::NotAllocated(_)
            | StakeError::TooEarly { .. }
            | StakeError::InvalidRequestState { .. }
            | StakeError::Paused(_) => ErrorKind::StateConflict,

            StakeError::SupplyCapExceeded { .. }
            | StakeError::InsufficientBalance { .. }
            | StakeError::NothingToClaim
            | StakeError::ArithmeticOverflow => ErrorKind::ResourceExhausted,

            StakeError::Channel(e) => match e {
                ChannelError::AlreadyClaimed { .. } => ErrorKind::StateConflict,
                ChannelError::ProofInvalid { .. } | ChannelError::WrongDomain { .. } => {
                    ErrorKind::ValidationFailure
                }
                ChannelError::NonceOverflow(_) => ErrorKind::ResourceExhausted,
            },

            StakeError::Config(_) => ErrorKind::ConfigurationError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stake_types::Domain;

    #[test]
    fn test_kinds() {
        assert_eq!(
            StakeError::TooEarly {
                id: 1,
                eligible_block: 10,
                current: 5
            }
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            StakeError::from(ChannelError::AlreadyClaimed {
                origin: Domain::L2,
                nonce: 1
            })
            .kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            StakeError::SupplyCapExceeded {
                resulting: 2,
                cap: 1
            }
            .kind(),
            ErrorKind::ResourceExhausted
        );
    }
}
