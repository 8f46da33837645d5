//! Signature validation under tampering.
//!
//! A round commits only if the counterparty's signature was made by the
//! counterparty over the digest computed locally. Every other case must fail
//! at SIGN_VALIDATE and leave the validating party's store untouched.

use std::time::Duration;

use tandem_core::{
    ExecutorConfig, ResponseStatus, StepError,
    crypto::{LocalSigner, Signer},
    error::{ProtocolViolation, TransportError},
};
use tandem_harness::TwoParties;
use tandem_proto::{AppInstanceId, Digest};

const SIGN_VALIDATE_INITIATOR: usize = 5;

fn config() -> ExecutorConfig {
    ExecutorConfig { wait_timeout: Duration::from_millis(500), ..ExecutorConfig::default() }
}

async fn installed(seed: u64) -> (TwoParties, AppInstanceId) {
    let parties = TwoParties::with_config(seed, config()).unwrap();
    parties.setup().await.unwrap();
    parties.fund(10, 5).await.unwrap();
    let app_id = parties.install(2, 2).await.unwrap().app_id.unwrap();
    (parties, app_id)
}

#[tokio::test(start_paused = true)]
async fn forged_initiator_signature_is_rejected_by_responder() {
    let (mut parties, app_id) = installed(10).await;
    let (alice_before, bob_before) = parties.states().await;
    parties.bob.drain_responses();

    let forger = parties.alice.signer();
    parties.network.intercept(move |mut message| {
        if message.seq == 1 {
            message.signature = forger.sign(&Digest::of(b"some other operation")).ok();
        }
        Some(message)
    });

    let err = parties.update(app_id, vec![1]).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err.source, StepError::Transport(TransportError::Timeout { .. })));

    let report = parties.bob.next_response().await.unwrap();
    assert!(
        matches!(
            &report.status,
            ResponseStatus::Failed { reason } if reason.contains("does not cover")
        ),
        "{report:?}"
    );

    let (alice_after, bob_after) = parties.states().await;
    assert_eq!(alice_after, alice_before);
    assert_eq!(bob_after, bob_before);
}

#[tokio::test]
async fn reply_signed_by_stranger_is_rejected() {
    let (parties, app_id) = installed(11).await;
    let (alice_before, _) = parties.states().await;

    let stranger = LocalSigner::from_secret([0x66; 32]);
    parties.network.intercept(move |mut message| {
        if message.seq == 2 {
            if let Some(signature) = message.signature.as_mut() {
                signature.public_key = stranger.public_key();
            }
        }
        Some(message)
    });

    let err = parties.update(app_id, vec![1]).await.unwrap_err();
    assert_eq!(err.step, SIGN_VALIDATE_INITIATOR);
    assert!(matches!(
        err.source,
        StepError::Protocol(ProtocolViolation::SignerMismatch { expected, .. })
            if expected == parties.bob.address()
    ));
    assert!(!err.is_retryable());
    assert_eq!(parties.states().await.0, alice_before);
}

#[tokio::test]
async fn unsigned_reply_is_rejected() {
    let (parties, app_id) = installed(12).await;
    let (alice_before, _) = parties.states().await;

    parties.network.intercept(|mut message| {
        if message.seq == 2 {
            message.signature = None;
        }
        Some(message)
    });

    let err = parties.update(app_id, vec![1]).await.unwrap_err();
    assert_eq!(err.step, SIGN_VALIDATE_INITIATOR);
    assert_eq!(err.source, StepError::Protocol(ProtocolViolation::MissingSignature));
    assert_eq!(parties.states().await.0, alice_before);
}

#[tokio::test]
async fn committed_signatures_verify_over_the_stored_digest() {
    let (parties, _) = installed(13).await;
    let commitment = parties.alice.executor.latest_commitment(parties.channel_id).unwrap().unwrap();
    assert_eq!(commitment.digest, commitment.operation.digest());
    for signature in &commitment.signatures {
        tandem_core::crypto::recover_signer(signature, &commitment.digest).unwrap();
    }
}
