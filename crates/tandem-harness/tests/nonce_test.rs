//! UPDATE nonce discipline.
//!
//! An update commits only at exactly one past the committed local nonce.
//! Stale and skipped nonces are rejected before anything is signed or sent.

use std::time::Duration;

use tandem_core::{
    ExecutorConfig, StepError,
    error::{ProtocolViolation, TransportError},
};
use tandem_harness::TwoParties;
use tandem_proto::{AppInstanceId, ClientActionMessage, Payload, ProtocolName, UpdateData};

async fn installed(seed: u64) -> (TwoParties, AppInstanceId) {
    let config =
        ExecutorConfig { wait_timeout: Duration::from_millis(500), ..ExecutorConfig::default() };
    let parties = TwoParties::with_config(seed, config).unwrap();
    parties.setup().await.unwrap();
    parties.fund(10, 5).await.unwrap();
    let app_id = parties.install(2, 2).await.unwrap().app_id.unwrap();
    (parties, app_id)
}

fn update_at(parties: &TwoParties, app_id: AppInstanceId, nonce: u64) -> ClientActionMessage {
    let data = UpdateData { local_nonce: Some(nonce), ..UpdateData::new(vec![9]) };
    ClientActionMessage::new(
        ProtocolName::Update,
        parties.alice.address(),
        parties.bob.address(),
        parties.channel_id,
        Payload::Update(data),
    )
    .with_app(app_id)
}

#[tokio::test]
async fn stale_and_skipped_nonces_are_rejected_locally() {
    let (parties, app_id) = installed(20).await;
    parties.update(app_id, vec![1]).await.unwrap();
    let (before, _) = parties.states().await;
    let sent = parties.network.sent().len();

    for nonce in [1, 2, 4] {
        let err = parties.alice.executor.execute(update_at(&parties, app_id, nonce)).await;
        let err = err.unwrap_err();
        assert_eq!(err.step, 0);
        assert_eq!(
            err.source,
            StepError::Protocol(ProtocolViolation::NonceMismatch {
                app: app_id,
                expected: 3,
                actual: nonce
            })
        );
    }

    assert_eq!(parties.states().await.0, before);
    assert_eq!(parties.network.sent().len(), sent);

    parties.alice.executor.execute(update_at(&parties, app_id, 3)).await.unwrap();
    let (alice, bob) = parties.states().await;
    assert_eq!(alice, bob);
    assert_eq!(alice.unwrap().app(&app_id).unwrap().local_nonce, 3);
}

#[tokio::test(start_paused = true)]
async fn responder_rejects_rewritten_nonce() {
    let (mut parties, app_id) = installed(21).await;
    let (alice_before, bob_before) = parties.states().await;
    parties.bob.drain_responses();

    parties.network.intercept(|mut message| {
        if let Payload::Update(data) = &mut message.payload {
            data.local_nonce = Some(1);
        }
        Some(message)
    });

    let err = parties.update(app_id, vec![1]).await.unwrap_err();
    assert!(matches!(err.source, StepError::Transport(TransportError::Timeout { .. })));

    let report = parties.bob.next_response().await.unwrap();
    assert_eq!(report.protocol, ProtocolName::Update);
    assert_ne!(report.status, tandem_core::ResponseStatus::Completed);
    assert_eq!(parties.states().await, (alice_before, bob_before));
}

#[tokio::test(start_paused = true)]
async fn lost_request_can_be_retried() {
    let (parties, app_id) = installed(22).await;

    parties.network.intercept(|message| if message.seq == 1 { None } else { Some(message) });
    let err = parties.update(app_id, vec![1]).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.step, 4);

    parties.network.clear_intercept();
    parties.update(app_id, vec![1]).await.unwrap();
    let (alice, bob) = parties.states().await;
    assert_eq!(alice, bob);
    assert_eq!(alice.unwrap().app(&app_id).unwrap().local_nonce, 2);
}

#[tokio::test]
async fn unknown_app_is_rejected() {
    let (parties, _) = installed(23).await;
    let ghost = AppInstanceId(tandem_proto::Digest::of(b"ghost"));
    let err = parties.update(ghost, vec![1]).await.unwrap_err();
    assert_eq!(err.source, StepError::Protocol(ProtocolViolation::UnknownApp(ghost)));
}
