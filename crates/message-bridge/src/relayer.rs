//! Relayer - the off-protocol actor that carries messages across
//!
//! Watches one domain's send events, attaches an origin proof and claims the
//! message on the counterpart. It never assumes ordering: failures are
//! retried on the next tick, and an `AlreadyClaimed` answer counts as
//! delivered.
//!
//! Whether a message still needs relaying is decided by the counterpart's
//! inbox, not by the origin's acknowledgement. The two domains are saved
//! separately, so an origin may remember an acknowledgement for a claim the
//! counterpart lost in a crash.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use stake_types::Domain;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{message::CrossDomainMessage, proof::Attester, MessageProof};

/// Why a delivery did not land
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("message already claimed")]
    AlreadyClaimed,

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Receiving end of a relay (the counterpart domain)
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Claim a message with its proof
    async fn deliver(
        &self,
        message: CrossDomainMessage,
        proof: MessageProof,
    ) -> Result<(), DeliveryError>;

    /// Whether the message is recorded as claimed here
    fn is_claimed(&self, origin: Domain, nonce: u64) -> bool;
}

/// Sending end of a relay (the origin domain's outbox)
pub trait MessageSource: Send + Sync {
    /// Live send events
    fn subscribe(&self) -> broadcast::Receiver<CrossDomainMessage>;

    /// Messages not yet acknowledged
    fn pending(&self) -> Vec<CrossDomainMessage>;

    /// Every message with nonce `from` and above, acknowledged or not
    fn messages_from(&self, from: u64) -> Vec<CrossDomainMessage>;

    /// Record that a message was claimed on the counterpart
    fn acknowledge(&self, nonce: u64);
}

/// Relayer configuration
#[derive(Clone, Debug)]
pub struct RelayerConfig {
    /// How often the backlog is retried
    pub retry_interval_ms: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1_000,
        }
    }
}

/// Relays messages from one domain to the other
pub struct Relayer {
    source: Arc<dyn MessageSource>,
    sink: Arc<dyn MessageSink>,
    attester: Attester,
    config: RelayerConfig,
    /// Every nonce below this is claimed on the counterpart
    settled_below: AtomicU64,
}

impl Relayer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
        attester: Attester,
        config: RelayerConfig,
    ) -> Self {
        Self {
            source,
            sink,
            attester,
            config,
            settled_below: AtomicU64::new(1),
        }
    }

    /// Relay a single message. Returns true if it is now claimed on the
    /// counterpart.
    pub async fn relay(&self, message: CrossDomainMessage) -> bool {
        let nonce = message.nonce;
        let proof = match self.attester.attest(&message) {
            Ok(proof) => proof,
            Err(e) => {
                tracing::error!("Cannot attest message {}: {}", nonce, e);
                return false;
            }
        };

        match self.sink.deliver(message, proof).await {
            Ok(()) | Err(DeliveryError::AlreadyClaimed) => {
                self.source.acknowledge(nonce);
                tracing::debug!("Relayed {} message {}", self.attester.domain(), nonce);
                true
            }
            Err(DeliveryError::Rejected(reason)) => {
                tracing::warn!(
                    "{} message {} not delivered, will retry: {}",
                    self.attester.domain(),
                    nonce,
                    reason
                );
                false
            }
        }
    }

    /// Relay every message the counterpart has not claimed, whatever the
    /// origin believes. Returns how many landed.
    pub async fn catch_up(&self) -> usize {
        let origin = self.attester.domain();
        let start = self.settled_below.load(Ordering::Acquire);
        let mut settled = start;
        let mut landed = 0;

        for message in self.source.messages_from(start) {
            let nonce = message.nonce;
            let claimed = if self.sink.is_claimed(origin, nonce) {
                self.source.acknowledge(nonce);
                true
            } else if self.relay(message).await {
                landed += 1;
                true
            } else {
                false
            };
            if claimed && nonce == settled {
                settled += 1;
            }
        }

        self.settled_below.fetch_max(settled, Ordering::AcqRel);
        landed
    }

    /// Run until the origin's event channel closes
    pub async fn run(self: Arc<Self>) {
        let mut events = self.source.subscribe();
        let mut retry = tokio::time::interval(Duration::from_millis(self.config.retry_interval_ms));

        tracing::info!("Relayer for {} messages started", self.attester.domain());
        self.catch_up().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(message) => {
                        self.relay(message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Relayer lagged {} events, catching up from backlog", n);
                        self.catch_up().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = retry.tick() => {
                    self.catch_up().await;
                }
            }
        }

        tracing::info!("Relayer for {} messages stopped", self.attester.domain());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inbox::Inbox, outbox::Outbox, proof::AttestationVerifier, ChannelError, ProofVerifier,
    };
    use ed25519_dalek::SigningKey;
    use parking_lot::Mutex;
    use rand::rngs::OsRng;

    struct OutboxSource(Mutex<Outbox>);

    impl MessageSource for OutboxSource {
        fn subscribe(&self) -> broadcast::Receiver<CrossDomainMessage> {
            self.0.lock().subscribe()
        }

        fn pending(&self) -> Vec<CrossDomainMessage> {
            self.0.lock().pending()
        }

        fn messages_from(&self, from: u64) -> Vec<CrossDomainMessage> {
            self.0.lock().messages_from(from)
        }

        fn acknowledge(&self, nonce: u64) {
            self.0.lock().acknowledge(nonce);
        }
    }

    struct InboxSink {
        inbox: Mutex<Inbox>,
        verifier: AttestationVerifier,
        reject_all: bool,
    }

    #[async_trait]
    impl MessageSink for InboxSink {
        async fn deliver(
            &self,
            message: CrossDomainMessage,
            proof: MessageProof,
        ) -> Result<(), DeliveryError> {
            if self.reject_all {
                return Err(DeliveryError::Rejected("paused".to_string()));
            }
            self.verifier
                .verify(message.origin, message.nonce, &message.payload, &proof)
                .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
            self.inbox
                .lock()
                .mark_claimed(&message, 0)
                .map(|_| ())
                .map_err(|e| match e {
                    ChannelError::AlreadyClaimed { .. } => DeliveryError::AlreadyClaimed,
                    other => DeliveryError::Rejected(other.to_string()),
                })
        }

        fn is_claimed(&self, origin: Domain, nonce: u64) -> bool {
            self.inbox.lock().is_claimed(origin, nonce)
        }
    }

    fn setup(reject_all: bool) -> (Arc<OutboxSource>, Arc<InboxSink>, Relayer) {
        let attester = Attester::new(Domain::L2, SigningKey::generate(&mut OsRng));
        let verifier = AttestationVerifier::new().with_key(Domain::L2, attester.verifying_key());
        let source = Arc::new(OutboxSource(Mutex::new(Outbox::new(Domain::L2))));
        let sink = Arc::new(InboxSink {
            inbox: Mutex::new(Inbox::new(Domain::L1)),
            verifier,
            reject_all,
        });
        let relayer = Relayer::new(
            source.clone(),
            sink.clone(),
            attester,
            RelayerConfig::default(),
        );
        (source, sink, relayer)
    }

    #[tokio::test]
    async fn test_catch_up_delivers_backlog() {
        let (source, sink, relayer) = setup(false);
        source.0.lock().send(vec![1]).unwrap();
        source.0.lock().send(vec![2]).unwrap();

        assert_eq!(relayer.catch_up().await, 2);
        assert_eq!(sink.inbox.lock().len(), 2);
        assert!(source.0.lock().pending().is_empty());

        // Nothing left to do
        assert_eq!(relayer.catch_up().await, 0);
    }

    #[tokio::test]
    async fn test_already_claimed_counts_as_delivered() {
        let (source, sink, relayer) = setup(false);
        source.0.lock().send(vec![1]).unwrap();
        let message = source.0.lock().get(1).unwrap().clone();
        sink.inbox.lock().mark_claimed(&message, 0).unwrap();

        assert!(relayer.relay(message).await);
        assert!(source.0.lock().pending().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledged_but_unclaimed_is_relayed() {
        let (source, sink, relayer) = setup(false);
        source.0.lock().send(vec![1]).unwrap();
        source.0.lock().send(vec![2]).unwrap();

        // The origin remembers an acknowledgement the counterpart never kept
        source.0.lock().acknowledge(1);
        assert_eq!(source.0.lock().pending().len(), 1);

        assert_eq!(relayer.catch_up().await, 2);
        assert!(sink.inbox.lock().is_claimed(Domain::L2, 1));
        assert!(sink.inbox.lock().is_claimed(Domain::L2, 2));
        assert_eq!(relayer.catch_up().await, 0);
    }

    #[tokio::test]
    async fn test_claimed_on_sink_is_acknowledged_without_delivery() {
        let (source, sink, relayer) = setup(true);
        source.0.lock().send(vec![1]).unwrap();
        let message = source.0.lock().get(1).unwrap().clone();
        sink.inbox.lock().mark_claimed(&message, 0).unwrap();

        // The sink rejects every delivery, so only the inbox check can settle it
        assert_eq!(relayer.catch_up().await, 0);
        assert!(source.0.lock().pending().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_stays_pending() {
        let (source, sink, relayer) = setup(true);
        source.0.lock().send(vec![1]).unwrap();

        assert_eq!(relayer.catch_up().await, 0);
        assert_eq!(source.0.lock().pending().len(), 1);
        assert!(sink.inbox.lock().is_empty());
    }
}
