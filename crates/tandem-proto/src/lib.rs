//! Wire format for the Tandem channel protocols.
//!
//! Two parties negotiate changes to a shared off-chain ledger by exchanging
//! [`ClientActionMessage`] envelopes. Each envelope names the protocol being
//! run, the round sequence number, both party addresses and the channel the
//! round applies to, plus a protocol-specific [`Payload`].
//!
//! Envelopes travel as length-prefixed CBOR frames (see [`frame`]). The frame
//! prefix is a 4-byte big-endian length so a reader can bound its allocation
//! before touching the payload.
//!
//! This crate holds no protocol logic and no signing code. Signatures appear
//! only as opaque [`PartySignature`] envelopes; verification lives in
//! `tandem-core`.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod errors;
pub mod frame;
pub mod message;
pub mod payloads;
pub mod signature;

pub use address::{Address, AppInstanceId, ChannelId, Digest};
pub use errors::{ProtocolError, Result};
pub use message::{ClientActionMessage, ProtocolName};
pub use payloads::{
    AppInterface, InstallData, MetachannelInstallData, Payload, PeerBalance, Terms, UninstallData,
    UpdateData,
};
pub use signature::PartySignature;
