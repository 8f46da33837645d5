//! Signing capability and counterparty signature recovery.
//!
//! The engine never manages keys. It consumes a [`Signer`] that can name its
//! own address and sign a digest. [`LocalSigner`] wraps an in-process Ed25519
//! key for tests and single-process deployments.
//!
//! Ed25519 has no public-key recovery, so a [`PartySignature`] carries the
//! verifying key. Recovery derives the address from that key and verifies the
//! signature over the digest; both must hold for the signature to count.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use tandem_proto::{Address, Digest, PartySignature};

use crate::error::{ProtocolViolation, SignerError};

/// A capability that signs operation digests on behalf of one party.
pub trait Signer: Send + Sync {
    /// Address this capability signs as.
    fn address(&self) -> Address;

    /// Sign a 32-byte operation digest.
    fn sign(&self, digest: &Digest) -> Result<PartySignature, SignerError>;
}

/// Ed25519 key held in memory.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    /// Wrap an existing signing key.
    pub fn new(key: SigningKey) -> Self {
        let address = Address::from_public_key(&key.verifying_key().to_bytes());
        Self { key, address }
    }

    /// Build from 32 secret bytes.
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&secret))
    }

    /// Verifying key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner").field("address", &self.address).finish_non_exhaustive()
    }
}

impl Signer for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, digest: &Digest) -> Result<PartySignature, SignerError> {
        let signature = self.key.sign(digest.as_bytes());
        Ok(PartySignature {
            public_key: self.key.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        })
    }
}

/// Recover the signer of `signature` over `digest`.
///
/// Fails if the key or signature bytes are malformed, or if the signature does
/// not verify over `digest`.
pub fn recover_signer(
    signature: &PartySignature,
    digest: &Digest,
) -> Result<Address, ProtocolViolation> {
    let key = VerifyingKey::from_bytes(&signature.public_key)
        .map_err(|e| ProtocolViolation::MalformedSignature(e.to_string()))?;
    let sig = Signature::from_slice(&signature.signature)
        .map_err(|e| ProtocolViolation::MalformedSignature(e.to_string()))?;

    key.verify_strict(digest.as_bytes(), &sig)
        .map_err(|_| ProtocolViolation::DigestMismatch { digest: *digest })?;

    Ok(signature.signer())
}

/// Check that `signature` was produced by `expected` over `digest`.
///
/// The signer identity is checked first so a signature from the wrong party
/// reports [`ProtocolViolation::SignerMismatch`] even if it verifies.
pub fn verify_counterparty(
    signature: &PartySignature,
    digest: &Digest,
    expected: Address,
) -> Result<(), ProtocolViolation> {
    let claimed = signature.signer();
    if claimed != expected {
        return Err(ProtocolViolation::SignerMismatch { expected, actual: claimed });
    }
    recover_signer(signature, digest).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(byte: u8) -> LocalSigner {
        LocalSigner::from_secret([byte; 32])
    }

    #[test]
    fn sign_then_recover_yields_signer_address() {
        let alice = signer(1);
        let digest = Digest::of(b"operation");
        let sig = alice.sign(&digest).unwrap();
        assert_eq!(recover_signer(&sig, &digest).unwrap(), alice.address());
    }

    #[test]
    fn different_digest_is_rejected() {
        let alice = signer(1);
        let sig = alice.sign(&Digest::of(b"one")).unwrap();
        let other = Digest::of(b"two");
        assert_eq!(
            verify_counterparty(&sig, &other, alice.address()),
            Err(ProtocolViolation::DigestMismatch { digest: other })
        );
    }

    #[test]
    fn wrong_signer_is_rejected_before_verification() {
        let alice = signer(1);
        let bob = signer(2);
        let digest = Digest::of(b"operation");
        let sig = bob.sign(&digest).unwrap();
        assert_eq!(
            verify_counterparty(&sig, &digest, alice.address()),
            Err(ProtocolViolation::SignerMismatch {
                expected: alice.address(),
                actual: bob.address()
            })
        );
    }

    #[test]
    fn truncated_signature_is_malformed() {
        let alice = signer(1);
        let digest = Digest::of(b"operation");
        let mut sig = alice.sign(&digest).unwrap();
        sig.signature.truncate(10);
        assert!(matches!(
            recover_signer(&sig, &digest),
            Err(ProtocolViolation::MalformedSignature(_))
        ));
    }

    #[test]
    fn swapped_key_changes_recovered_address() {
        let alice = signer(1);
        let bob = signer(2);
        let digest = Digest::of(b"operation");
        let mut sig = alice.sign(&digest).unwrap();
        sig.public_key = bob.public_key();
        // Claims to be bob, but bob's key does not verify alice's signature.
        assert!(matches!(
            verify_counterparty(&sig, &digest, bob.address()),
            Err(ProtocolViolation::DigestMismatch { .. })
        ));
    }
}
