//! Channel Errors

use stake_types::Domain;
use thiserror::Error;

/// Message channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("message {nonce} from {origin} already claimed")]
    AlreadyClaimed { origin: Domain, nonce: u64 },

    #[error("invalid proof for message {nonce} from {origin}: {reason}")]
    ProofInvalid {
        origin: Domain,
        nonce: u64,
        reason: String,
    },

    #[error("message from {origin} cannot be claimed on {receiver}")]
    WrongDomain { origin: Domain, receiver: Domain },

    #[error("nonce space exhausted on {0}")]
    NonceOverflow(Domain),
}
