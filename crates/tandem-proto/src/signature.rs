//! Signature envelope carried in round messages.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// A party's signature over an operation digest.
///
/// Carries the signer's 32-byte verifying key next to the 64-byte signature.
/// The signer's address is derived from the key, so a verifier can recover
/// who signed without an out-of-band key directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySignature {
    /// Signer's verifying key
    pub public_key: [u8; 32],

    /// Raw signature bytes
    pub signature: Vec<u8>,
}

impl PartySignature {
    /// Address derived from the carried verifying key.
    pub fn signer(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }
}
