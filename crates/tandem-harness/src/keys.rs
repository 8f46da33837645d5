//! Deterministic key material.
//!
//! Every key in a test run comes from one seed, so a failing run can be
//! replayed exactly.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::crypto::LocalSigner;
use tandem_proto::ChannelId;

/// Stream of Ed25519 secrets drawn from a seeded ChaCha generator.
#[derive(Debug, Clone)]
pub struct SeededKeys {
    rng: ChaCha8Rng,
}

impl SeededKeys {
    /// Start the stream at `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed) }
    }

    /// Next 32-byte secret.
    pub fn next_secret(&mut self) -> [u8; 32] {
        let mut secret = [0u8; 32];
        self.rng.fill_bytes(&mut secret);
        secret
    }

    /// Signer for the next secret.
    pub fn next_signer(&mut self) -> LocalSigner {
        LocalSigner::from_secret(self.next_secret())
    }

    /// Random channel identifier.
    pub fn next_channel_id(&mut self) -> ChannelId {
        let mut id = [0u8; 20];
        self.rng.fill_bytes(&mut id);
        ChannelId(id)
    }
}
