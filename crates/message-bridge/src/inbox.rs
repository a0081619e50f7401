//! Inbox - replay protection for delivered messages
//!
//! `(origin, nonce)` is the only key that matters. Payload interpretation is
//! left to whoever owns the inbox.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stake_types::Domain;

use crate::{error::ChannelError, message::CrossDomainMessage};

/// Record of a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub origin: Domain,
    pub nonce: u64,
    /// Digest of the claimed message
    pub digest: [u8; 32],
    /// Local height at which the claim landed
    pub claimed_at: u64,
    /// Set when the payload could never be applied and the message was
    /// consumed without effect
    pub dispatch_error: Option<String>,
}

impl ClaimReceipt {
    /// Whether the payload took effect
    pub fn applied(&self) -> bool {
        self.dispatch_error.is_none()
    }
}

/// Claimed messages for one receiving domain
pub struct Inbox {
    /// Domain receiving messages
    domain: Domain,
    /// Claimed messages keyed by (origin, nonce)
    claimed: BTreeMap<(Domain, u64), ClaimReceipt>,
}

impl Inbox {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            claimed: BTreeMap::new(),
        }
    }

    /// Domain this inbox receives for
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Check that a message may be claimed here and has not been yet
    pub fn check_claimable(&self, message: &CrossDomainMessage) -> Result<(), ChannelError> {
        if message.origin == self.domain {
            return Err(ChannelError::WrongDomain {
                origin: message.origin,
                receiver: self.domain,
            });
        }
        if self.claimed.contains_key(&(message.origin, message.nonce)) {
            return Err(ChannelError::AlreadyClaimed {
                origin: message.origin,
                nonce: message.nonce,
            });
        }
        Ok(())
    }

    /// Mark a message claimed. Fails if it already was.
    pub fn mark_claimed(
        &mut self,
        message: &CrossDomainMessage,
        height: u64,
    ) -> Result<ClaimReceipt, ChannelError> {
        self.insert(message, height, None)
    }

    /// Consume a message whose payload can never be applied, keeping the
    /// reason on its receipt. Fails if it was already claimed.
    pub fn mark_failed(
        &mut self,
        message: &CrossDomainMessage,
        height: u64,
        reason: String,
    ) -> Result<ClaimReceipt, ChannelError> {
        self.insert(message, height, Some(reason))
    }

    fn insert(
        &mut self,
        message: &CrossDomainMessage,
        height: u64,
        dispatch_error: Option<String>,
    ) -> Result<ClaimReceipt, ChannelError> {
        self.check_claimable(message)?;

        let receipt = ClaimReceipt {
            origin: message.origin,
            nonce: message.nonce,
            digest: message.digest(),
            claimed_at: height,
            dispatch_error,
        };
        self.claimed
            .insert((message.origin, message.nonce), receipt.clone());

        Ok(receipt)
    }

    /// Check whether a message was claimed
    pub fn is_claimed(&self, origin: Domain, nonce: u64) -> bool {
        self.claimed.contains_key(&(origin, nonce))
    }

    /// Look up a claim receipt
    pub fn receipt(&self, origin: Domain, nonce: u64) -> Option<&ClaimReceipt> {
        self.claimed.get(&(origin, nonce))
    }

    /// All receipts
    pub fn receipts(&self) -> impl Iterator<Item = &ClaimReceipt> {
        self.claimed.values()
    }

    /// Load previously persisted receipts
    pub fn restore(&mut self, receipts: Vec<ClaimReceipt>) {
        for receipt in receipts {
            self.claimed.insert((receipt.origin, receipt.nonce), receipt);
        }
    }

    /// Number of claimed messages
    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    /// Check if nothing was claimed yet
    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_at_most_once() {
        let mut inbox = Inbox::new(Domain::L1);
        let message = CrossDomainMessage::new(Domain::L2, 4, vec![1, 2]);

        assert!(inbox.mark_claimed(&message, 10).is_ok());
        assert!(inbox.is_claimed(Domain::L2, 4));
        assert_eq!(
            inbox.mark_claimed(&message, 11),
            Err(ChannelError::AlreadyClaimed {
                origin: Domain::L2,
                nonce: 4
            })
        );
        assert_eq!(inbox.receipt(Domain::L2, 4).unwrap().claimed_at, 10);
    }

    #[test]
    fn test_failed_claim_consumes_nonce() {
        let mut inbox = Inbox::new(Domain::L1);
        let message = CrossDomainMessage::new(Domain::L2, 7, vec![3]);

        let receipt = inbox
            .mark_failed(&message, 12, "insufficient balance".to_string())
            .unwrap();
        assert!(!receipt.applied());
        assert!(inbox.is_claimed(Domain::L2, 7));
        assert!(matches!(
            inbox.mark_claimed(&message, 13),
            Err(ChannelError::AlreadyClaimed { .. })
        ));
    }

    #[test]
    fn test_out_of_order_claims() {
        let mut inbox = Inbox::new(Domain::L1);
        for nonce in [5, 2, 9, 1] {
            let message = CrossDomainMessage::new(Domain::L2, nonce, vec![]);
            assert!(inbox.mark_claimed(&message, 0).is_ok());
        }
        assert_eq!(inbox.len(), 4);
    }

    #[test]
    fn test_own_messages_rejected() {
        let mut inbox = Inbox::new(Domain::L1);
        let message = CrossDomainMessage::new(Domain::L1, 1, vec![]);
        assert!(matches!(
            inbox.mark_claimed(&message, 0),
            Err(ChannelError::WrongDomain { .. })
        ));
    }
}
