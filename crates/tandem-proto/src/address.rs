//! Fixed-size identifiers: party addresses, channel ids, digests.
//!
//! All identifiers render as `0x`-prefixed lowercase hex and order by their
//! raw bytes. Byte order and hex order agree, so "lexicographic comparison of
//! addresses" means the same thing whichever representation a caller holds.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::errors::ProtocolError;

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:expr, $kind:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Size in bytes
            pub const LEN: usize = $len;

            /// Construct from raw bytes
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Raw bytes
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let mut out = [0u8; $len];
                hex::decode_to_slice(digits, &mut out).map_err(|e| ProtocolError::InvalidHex {
                    kind: $kind,
                    reason: e.to_string(),
                })?;
                Ok(Self(out))
            }
        }
    };
}

hex_id!(
    /// A party's address: the first 20 bytes of SHA-256 over its verifying key.
    Address,
    20,
    "address"
);

hex_id!(
    /// Identifier of a two-party channel (the shared on-chain multisig address).
    ChannelId,
    20,
    "channel id"
);

hex_id!(
    /// SHA-256 digest.
    Digest,
    32,
    "digest"
);

impl Digest {
    /// SHA-256 of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// SHA-256 over the concatenation of `parts`.
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }
}

impl Address {
    /// Derive an address from a 32-byte public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let hash = Digest::of(public_key);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash.0[..20]);
        Self(out)
    }
}

/// Content-derived identifier of an installed application instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppInstanceId(pub Digest);

impl fmt::Display for AppInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for AppInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppInstanceId({})", self.0)
    }
}
