//! Message types and digests

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use stake_types::Domain;

/// Lifecycle of a message as seen by the domain that holds it
#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
)]
pub enum MessageStatus {
    Sent,
    Claimed,
}

/// A message emitted by one domain for the other
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CrossDomainMessage {
    /// Per-origin monotonically increasing nonce
    pub nonce: u64,
    /// Domain that sent the message
    pub origin: Domain,
    /// Opaque instruction bytes
    pub payload: Vec<u8>,
    /// Sent on the origin outbox, Claimed once delivered
    pub status: MessageStatus,
}

impl CrossDomainMessage {
    pub fn new(origin: Domain, nonce: u64, payload: Vec<u8>) -> Self {
        Self {
            nonce,
            origin,
            payload,
            status: MessageStatus::Sent,
        }
    }

    /// Digest that proofs commit to
    pub fn digest(&self) -> [u8; 32] {
        message_digest(self.origin, self.nonce, &self.payload)
    }
}

/// Compute the digest of `(origin, nonce, payload)`
pub fn message_digest(origin: Domain, nonce: u64, payload: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"l2-stake/message/v1");
    hasher.update(&[origin.tag()]);
    hasher.update(&nonce.to_le_bytes());
    hasher.update(&(payload.len() as u64).to_le_bytes());
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_binds_every_field() {
        let base = message_digest(Domain::L1, 1, b"abc");
        assert_ne!(base, message_digest(Domain::L2, 1, b"abc"));
        assert_ne!(base, message_digest(Domain::L1, 2, b"abc"));
        assert_ne!(base, message_digest(Domain::L1, 1, b"abd"));
        assert_eq!(base, CrossDomainMessage::new(Domain::L1, 1, b"abc".to_vec()).digest());
    }
}
