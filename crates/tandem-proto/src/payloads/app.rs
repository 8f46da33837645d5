//! Application description and install parameters.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Amount owed to one party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerBalance {
    /// Party address
    pub address: Address,
    /// Amount in the channel's base unit
    pub balance: u64,
}

impl PeerBalance {
    /// Construct a balance entry.
    pub const fn new(address: Address, balance: u64) -> Self {
        Self { address, balance }
    }
}

/// Deposit terms fixed at install time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terms {
    /// Asset kind (0 = native value, 1 = token)
    pub asset_type: u8,
    /// Upper bound on the total the app may distribute
    pub limit: u64,
    /// Token contract for token assets, zero otherwise
    pub token: Address,
}

/// Reference to an application's on-chain validity rules.
///
/// The engine never evaluates these; they identify the rules a dispute would
/// be adjudicated against and therefore feed the app instance id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInterface {
    /// Contract implementing the rules
    pub address: Address,
    /// ABI encoding of the application state
    pub state_encoding: String,
    /// Selector of the action-application function
    pub apply_action: [u8; 4],
    /// Selector of the outcome-resolution function
    pub resolve: [u8; 4],
    /// Selector of the turn-taker function
    pub turn_taker: [u8; 4],
    /// Selector of the terminal-state predicate
    pub is_state_terminal: [u8; 4],
}

/// INSTALL parameters.
///
/// # Protocol Flow
///
/// 1. Initiator proposes the app with each party's allocation
/// 2. Both sides debit their free balance by exactly that allocation
/// 3. Both sign the install operation and commit the new app instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallData {
    /// Deposit terms
    pub terms: Terms,
    /// Application rules
    pub app: AppInterface,
    /// Dispute timeout in blocks
    pub timeout: u64,
    /// First party's allocation
    pub peer_a: PeerBalance,
    /// Second party's allocation
    pub peer_b: PeerBalance,
    /// Key the first party uses to sign app state
    pub key_a: Address,
    /// Key the second party uses to sign app state
    pub key_b: Address,
    /// Initial encoded application state
    pub encoded_app_state: Vec<u8>,
}

/// Three-party install parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetachannelInstallData {
    /// Party both ends share a channel with
    pub intermediary: Address,
    /// The install being proposed end to end
    pub install: InstallData,
}
