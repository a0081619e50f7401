//! Delivery proofs
//!
//! A proof authenticates that `(origin, nonce, payload)` really left the
//! origin outbox. Here that is an ed25519 signature by the origin's attester
//! key over the message digest. Anything that can answer the same question
//! (light client, multisig committee) can stand in through [`ProofVerifier`].

use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use stake_types::Domain;

use crate::{error::ChannelError, message::message_digest, CrossDomainMessage};

/// Proof that a message was sent by its origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProof {
    /// Attester signature over the message digest (64 bytes)
    pub signature: Vec<u8>,
}

/// Checks delivery proofs
pub trait ProofVerifier: Send + Sync {
    /// Verify that `proof` authenticates `(origin, nonce, payload)`
    fn verify(
        &self,
        origin: Domain,
        nonce: u64,
        payload: &[u8],
        proof: &MessageProof,
    ) -> Result<(), ChannelError>;
}

/// Signs outbox messages on behalf of one domain
pub struct Attester {
    domain: Domain,
    key: SigningKey,
}

impl Attester {
    pub fn new(domain: Domain, key: SigningKey) -> Self {
        Self { domain, key }
    }

    /// Domain this attester speaks for
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Public half, for verifiers on the counterpart
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Produce a proof for a message sent by this domain
    pub fn attest(&self, message: &CrossDomainMessage) -> Result<MessageProof, ChannelError> {
        if message.origin != self.domain {
            return Err(ChannelError::WrongDomain {
                origin: message.origin,
                receiver: self.domain,
            });
        }
        let signature = self.key.sign(&message.digest());
        Ok(MessageProof {
            signature: signature.to_bytes().to_vec(),
        })
    }
}

/// Verifies attester signatures, one trusted key per origin domain
#[derive(Default, Clone)]
pub struct AttestationVerifier {
    keys: HashMap<Domain, VerifyingKey>,
}

impl AttestationVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key` for messages from `domain`
    pub fn with_key(mut self, domain: Domain, key: VerifyingKey) -> Self {
        self.keys.insert(domain, key);
        self
    }
}

impl ProofVerifier for AttestationVerifier {
    fn verify(
        &self,
        origin: Domain,
        nonce: u64,
        payload: &[u8],
        proof: &MessageProof,
    ) -> Result<(), ChannelError> {
        let invalid = |reason: &str| ChannelError::ProofInvalid {
            origin,
            nonce,
            reason: reason.to_string(),
        };

        let key = self
            .keys
            .get(&origin)
            .ok_or_else(|| invalid("no attester key for origin"))?;

        let bytes: [u8; 64] = proof
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| invalid("signature must be 64 bytes"))?;
        let signature = Signature::from_bytes(&bytes);

        key.verify(&message_digest(origin, nonce, payload), &signature)
            .map_err(|_| invalid("signature does not match"))
    }
}
