//! Message Bridge - exactly-once delivery between L1 and L2
//!
//! Handles every cross-domain effect the staking engines produce:
//! - Outbox: assigns per-domain nonces and emits send events
//! - Inbox: replay protection keyed by (origin domain, nonce)
//! - Proofs: origin attestations over message digests
//! - Relayer: watches one domain's send events and delivers to the other
//!
//! Delivery order is never assumed. A message is claimable any time after it
//! is sent, and at most once.

pub mod error;
pub mod inbox;
pub mod message;
pub mod outbox;
pub mod proof;
pub mod relayer;

pub use error::ChannelError;
pub use inbox::{ClaimReceipt, Inbox};
pub use message::{message_digest, CrossDomainMessage, MessageStatus};
pub use outbox::Outbox;
pub use proof::{AttestationVerifier, Attester, MessageProof, ProofVerifier};
pub use relayer::{DeliveryError, MessageSink, MessageSource, Relayer, RelayerConfig};
