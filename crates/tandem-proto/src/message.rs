//! The network envelope exchanged between the two parties of a round.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::{
    address::{Address, AppInstanceId, ChannelId},
    payloads::Payload,
    signature::PartySignature,
};

/// Protocols the two parties can run against a channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize_repr, Deserialize_repr,
)]
#[repr(u8)]
pub enum ProtocolName {
    /// Open the channel: agree on participants and an empty free balance
    Setup = 0,
    /// Install an application, moving value from free balance into it
    Install = 1,
    /// Replace an installed application's state
    Update = 2,
    /// Remove an application, paying its final split back to free balance
    Uninstall = 3,
    /// Install an application through an intermediary (three parties)
    InstallMetachannelApp = 4,
}

impl ProtocolName {
    /// Every protocol, in wire order.
    pub const ALL: [Self; 5] =
        [Self::Setup, Self::Install, Self::Update, Self::Uninstall, Self::InstallMetachannelApp];

    /// Stable lowercase name used in logs and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Install => "install",
            Self::Update => "update",
            Self::Uninstall => "uninstall",
            Self::InstallMetachannelApp => "install-metachannel-app",
        }
    }
}

impl fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol round message.
///
/// # Protocol Flow
///
/// The initiator builds the envelope at `seq = 0` and runs its own pipeline.
/// Each outbound message carries `seq + 1`, so the responder starts its
/// pipeline at `seq = 1` and replies with `seq = 2`, which the initiator
/// consumes in its WAIT step.
///
/// `from` and `to` are always written from the sender's point of view. The
/// responder swaps them before computing its proposal so both sides reason
/// about "self" and "counterparty" the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientActionMessage {
    /// Protocol being run
    pub protocol: ProtocolName,

    /// Round sequence number
    pub seq: u32,

    /// Sender address
    pub from: Address,

    /// Recipient address
    pub to: Address,

    /// Channel this round mutates
    pub channel_id: ChannelId,

    /// Application instance the round targets, where applicable
    pub app_id: Option<AppInstanceId>,

    /// Protocol-specific parameters
    pub payload: Payload,

    /// Sender's signature over the round's operation digest
    pub signature: Option<PartySignature>,
}

impl ClientActionMessage {
    /// Build an unsigned envelope at `seq = 0`.
    pub fn new(
        protocol: ProtocolName,
        from: Address,
        to: Address,
        channel_id: ChannelId,
        payload: Payload,
    ) -> Self {
        Self { protocol, seq: 0, from, to, channel_id, app_id: None, payload, signature: None }
    }

    /// Attach the targeted application instance.
    #[must_use]
    pub fn with_app(mut self, app_id: AppInstanceId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    /// Exchange `from` and `to`.
    pub fn swap_parties(&mut self) {
        std::mem::swap(&mut self.from, &mut self.to);
    }
}
