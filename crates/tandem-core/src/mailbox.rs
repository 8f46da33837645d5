//! Correlated reply delivery for WAIT.
//!
//! A WAIT suspends its own round until the message keyed by
//! `(channel id, protocol, seq)` arrives. Each key owns a one-shot slot, so
//! rounds on different channels wait independently and a reply that beats its
//! WAIT (the counterparty answered before the local SEND returned) is buffered
//! rather than lost.
//!
//! Only keys a round has asked for are buffered: SEND registers the reply key
//! with [`Mailbox::expect`] before the request leaves. Replies nobody expects,
//! including late replies to a WAIT that already timed out, are dropped.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tandem_proto::{ChannelId, ClientActionMessage, ProtocolName};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{InvariantError, StepError, TransportError};

/// Key a reply is matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Correlation {
    /// Channel the round runs on
    pub channel_id: ChannelId,
    /// Protocol of the round
    pub protocol: ProtocolName,
    /// Sequence number the reply carries
    pub seq: u32,
}

impl Correlation {
    /// Key an inbound message would satisfy.
    pub fn of(message: &ClientActionMessage) -> Self {
        Self { channel_id: message.channel_id, protocol: message.protocol, seq: message.seq }
    }

    /// Key for the reply to `message`, which arrives two sequence numbers on.
    pub fn reply_to(message: &ClientActionMessage) -> Self {
        Self { seq: message.seq + 2, ..Self::of(message) }
    }
}

#[derive(Debug)]
enum Slot {
    Expected,
    Waiting(oneshot::Sender<ClientActionMessage>),
    Arrived(ClientActionMessage),
}

/// Pending WAITs and early arrivals.
#[derive(Debug, Default)]
pub struct Mailbox {
    slots: Mutex<HashMap<Correlation, Slot>>,
}

impl Mailbox {
    /// Empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `message` to the round waiting for it, or buffer it if its key is
    /// expected.
    ///
    /// Returns whether a waiting round took the message. A buffered message
    /// replaces any earlier buffered message for the same key.
    pub fn deliver(&self, message: ClientActionMessage) -> bool {
        let key = Correlation::of(&message);
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.remove(&key) {
            Some(Slot::Waiting(waiter)) => waiter.send(message).is_ok(),
            Some(Slot::Expected | Slot::Arrived(_)) => {
                debug!(
                    channel = %key.channel_id,
                    protocol = %key.protocol,
                    seq = key.seq,
                    "buffered"
                );
                slots.insert(key, Slot::Arrived(message));
                false
            },
            None => {
                debug!(
                    channel = %key.channel_id,
                    protocol = %key.protocol,
                    seq = key.seq,
                    "dropping unexpected reply"
                );
                false
            },
        }
    }

    /// Register `key` as a reply this executor is about to ask for.
    ///
    /// Any arrival already buffered for `key` is stale and dropped, so a
    /// reply from an earlier, failed round cannot satisfy the new WAIT. A
    /// waiter already registered is left alone.
    pub fn expect(&self, key: Correlation) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(slots.get(&key), Some(Slot::Waiting(_))) {
            slots.insert(key, Slot::Expected);
        }
    }

    /// Stop expecting `key`, dropping anything buffered for it. Waiters are
    /// left alone.
    pub fn forget(&self, key: Correlation) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(slots.get(&key), Some(Slot::Waiting(_))) {
            slots.remove(&key);
        }
    }

    /// Suspend until the message for `key` arrives or `timeout` elapses.
    pub async fn wait(
        &self,
        key: Correlation,
        timeout: Duration,
    ) -> Result<ClientActionMessage, StepError> {
        let receiver = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.remove(&key) {
                Some(Slot::Arrived(message)) => return Ok(message),
                Some(Slot::Waiting(waiter)) if !waiter.is_closed() => {
                    slots.insert(key, Slot::Waiting(waiter));
                    return Err(InvariantError::DuplicateWait {
                        channel: key.channel_id,
                        protocol: key.protocol,
                        seq: key.seq,
                    }
                    .into());
                },
                Some(Slot::Expected | Slot::Waiting(_)) | None => {},
            }
            let (sender, receiver) = oneshot::channel();
            slots.insert(key, Slot::Waiting(sender));
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
                if matches!(slots.get(&key), Some(Slot::Waiting(_))) {
                    slots.remove(&key);
                }
                Err(TransportError::Timeout {
                    channel: key.channel_id,
                    protocol: key.protocol,
                    seq: key.seq,
                    timeout,
                }
                .into())
            },
        }
    }

    /// Number of keys expected, waited on or holding a buffered arrival.
    pub fn pending(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
