//! Outbox - records and announces messages sent by this domain

use std::collections::BTreeMap;

use stake_types::Domain;
use tokio::sync::broadcast;

use crate::{
    error::ChannelError,
    message::{CrossDomainMessage, MessageStatus},
};

/// Capacity of the send event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Messages sent by one domain, in nonce order
pub struct Outbox {
    /// Domain this outbox belongs to
    domain: Domain,
    /// Nonce the next message will get
    next_nonce: u64,
    /// Every message ever sent (append-only)
    messages: BTreeMap<u64, CrossDomainMessage>,
    /// Send events for relaying actors
    events: broadcast::Sender<CrossDomainMessage>,
}

impl Outbox {
    /// Create an empty outbox; nonces start at 1
    pub fn new(domain: Domain) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            domain,
            next_nonce: 1,
            messages: BTreeMap::new(),
            events,
        }
    }

    /// Domain this outbox sends from
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Check that `count` more messages can be sent
    pub fn check_capacity(&self, count: usize) -> Result<(), ChannelError> {
        self.next_nonce
            .checked_add(count as u64)
            .map(|_| ())
            .ok_or(ChannelError::NonceOverflow(self.domain))
    }

    /// Record a message and emit its send event
    pub fn send(&mut self, payload: Vec<u8>) -> Result<u64, ChannelError> {
        let nonce = self.next_nonce;
        self.next_nonce = nonce
            .checked_add(1)
            .ok_or(ChannelError::NonceOverflow(self.domain))?;

        let message = CrossDomainMessage::new(self.domain, nonce, payload);
        self.messages.insert(nonce, message.clone());

        // No subscribers is fine; the relayer catches up from the stored messages
        let _ = self.events.send(message);

        tracing::debug!("{} outbox sent message {}", self.domain, nonce);

        Ok(nonce)
    }

    /// Subscribe to send events
    pub fn subscribe(&self) -> broadcast::Receiver<CrossDomainMessage> {
        self.events.subscribe()
    }

    /// Look up a sent message
    pub fn get(&self, nonce: u64) -> Option<&CrossDomainMessage> {
        self.messages.get(&nonce)
    }

    /// Messages not yet acknowledged as claimed on the counterpart
    pub fn pending(&self) -> Vec<CrossDomainMessage> {
        self.messages
            .values()
            .filter(|m| m.status == MessageStatus::Sent)
            .cloned()
            .collect()
    }

    /// Messages with nonce `from` and above, acknowledged or not
    pub fn messages_from(&self, from: u64) -> Vec<CrossDomainMessage> {
        self.messages.range(from..).map(|(_, m)| m.clone()).collect()
    }

    /// Mark a message as claimed on the counterpart. Returns false if the
    /// nonce is unknown or already acknowledged.
    pub fn acknowledge(&mut self, nonce: u64) -> bool {
        match self.messages.get_mut(&nonce) {
            Some(message) if message.status == MessageStatus::Sent => {
                message.status = MessageStatus::Claimed;
                true
            }
            _ => false,
        }
    }

    /// All messages in nonce order
    pub fn messages(&self) -> impl Iterator<Item = &CrossDomainMessage> {
        self.messages.values()
    }

    /// Load previously persisted messages
    pub fn restore(&mut self, messages: Vec<CrossDomainMessage>) {
        for message in messages {
            if message.origin != self.domain {
                tracing::warn!(
                    "Skipping persisted message {} from {} in {} outbox",
                    message.nonce,
                    message.origin,
                    self.domain
                );
                continue;
            }
            self.next_nonce = self.next_nonce.max(message.nonce.saturating_add(1));
            self.messages.insert(message.nonce, message);
        }
    }

    /// Nonce the next message will get
    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    /// Number of messages sent
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if nothing was sent yet
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
