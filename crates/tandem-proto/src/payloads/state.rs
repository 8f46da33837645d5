//! UPDATE and UNINSTALL parameters.

use serde::{Deserialize, Serialize};

use super::app::PeerBalance;
use crate::address::Digest;

/// UPDATE parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateData {
    /// New encoded application state
    pub encoded_app_state: Vec<u8>,

    /// Expected SHA-256 of `encoded_app_state`, checked when present
    pub app_state_hash: Option<Digest>,

    /// Local nonce the update commits at.
    ///
    /// A local caller may leave this empty; the initiator resolves it to the
    /// current nonce plus one while holding the channel and writes it into the
    /// outbound message. A responder requires it to be present.
    pub local_nonce: Option<u64>,
}

impl UpdateData {
    /// Update to `encoded_app_state` with the nonce resolved by the initiator.
    pub fn new(encoded_app_state: impl Into<Vec<u8>>) -> Self {
        Self {
            encoded_app_state: encoded_app_state.into(),
            app_state_hash: None,
            local_nonce: None,
        }
    }
}

/// UNINSTALL parameters.
///
/// The payout may differ from the install-time allocation (a game outcome,
/// say) but must total exactly the value the app holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallData {
    /// Final per-party payout
    pub peer_amounts: Vec<PeerBalance>,
}
