//! Default opcode handlers.
//!
//! [`InstructionExecutor::new`](crate::executor::InstructionExecutor::new)
//! installs one of these per opcode. Each can be replaced with
//! [`MiddlewareRegistry::register`](crate::middleware::MiddlewareRegistry::register)
//! or extended with `chain`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tandem_proto::{Address, ClientActionMessage, Digest, Payload};
use tokio::time::Instant;
use tracing::debug;

use crate::{
    channel::ChannelState,
    context::{Context, InternalMessage},
    crypto::{Signer, verify_counterparty},
    error::{InvariantError, ProtocolViolation, StepError, TransportError},
    flow::Role,
    mailbox::{Correlation, Mailbox},
    middleware::Handler,
    operation::{Commitment, ProtocolOperation},
    proposer,
    store::ChannelEntry,
    transport::Transport,
};

/// PROPOSE: compute the candidate state and its operation.
///
/// An initiator's UPDATE without a local nonce gets one here, resolved against
/// the locked channel state and written back into the round message so the
/// responder sees it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposeHandler;

#[async_trait]
impl Handler for ProposeHandler {
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        resolve_local_nonce(&mut message.client_message, channel.state())?;

        let proposal = proposer::propose(&message.client_message, channel.state())?;
        let operation = ProtocolOperation::generate(&proposal)?;
        debug!(
            protocol = %message.protocol,
            channel = %message.channel_id(),
            digest = %operation.digest(),
            "proposed"
        );

        let results = &mut context.intermediate_results;
        results.proposal = Some(proposal);
        results.operation = Some(operation);
        Ok(())
    }
}

fn resolve_local_nonce(
    message: &mut ClientActionMessage,
    state: Option<&ChannelState>,
) -> Result<(), ProtocolViolation> {
    if message.seq != 0 {
        return Ok(());
    }
    let app_id = message.app_id;
    let Payload::Update(data) = &mut message.payload else {
        return Ok(());
    };
    if data.local_nonce.is_some() {
        return Ok(());
    }
    // Unknown apps fall through to the proposer, which reports them.
    let current = app_id.and_then(|id| state.and_then(|s| s.app(&id))).map(|app| app.local_nonce);
    if let Some(current) = current {
        data.local_nonce = Some(current.checked_add(1).ok_or(ProtocolViolation::Overflow)?);
    }
    Ok(())
}

/// SIGN: sign the operation digest as the round's local party.
pub struct SignHandler {
    signer: Arc<dyn Signer>,
}

impl SignHandler {
    /// Sign with `signer`.
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl Handler for SignHandler {
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        _channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        let local = message.client_message.from;
        let signer = self.signer.address();
        if signer != local {
            return Err(InvariantError::NotLocalParty { signer, local }.into());
        }

        let digest = context.operation()?.digest();
        let signature = self.signer.sign(&digest)?;
        context.intermediate_results.signature = Some(signature);
        Ok(())
    }
}

/// SIGN_VALIDATE: accept the counterparty's signature only if it was made by
/// the counterparty over the locally computed digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignValidateHandler;

#[async_trait]
impl Handler for SignValidateHandler {
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        _channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        let digest = context.operation()?.digest();
        let received = context.last_received()?;
        let signature = received.signature.clone().ok_or(ProtocolViolation::MissingSignature)?;

        verify_counterparty(&signature, &digest, message.client_message.to)?;
        context.intermediate_results.counterparty_signature = Some(signature);
        Ok(())
    }
}

/// SEND: hand the last outbox message to transport.
pub struct SendHandler {
    transport: Arc<dyn Transport>,
    mailbox: Arc<Mailbox>,
}

impl SendHandler {
    /// Send through `transport`, registering the expected reply with
    /// `mailbox`.
    pub fn new(transport: Arc<dyn Transport>, mailbox: Arc<Mailbox>) -> Self {
        Self { transport, mailbox }
    }
}

#[async_trait]
impl Handler for SendHandler {
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        _channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        let results = &context.intermediate_results;
        let outbound = results.outbox.last().cloned().ok_or(InvariantError::EmptyOutbox)?;

        // Only the initiator waits for an answer to what it sends.
        let awaited = (Role::for_seq(message.seq()) == Some(Role::Initiator))
            .then(|| Correlation::reply_to(&message.client_message));
        if let Some(key) = awaited {
            self.mailbox.expect(key);
        }
        if let Err(error) = self.transport.send(outbound).await {
            if let Some(key) = awaited {
                self.mailbox.forget(key);
            }
            return Err(error.into());
        }
        Ok(())
    }
}

/// WAIT: suspend the round until the counterparty's reply arrives.
///
/// A reply signed by the counterparty over some other digest answers an
/// earlier round on the same key; it is skipped and the wait continues until
/// the original deadline.
pub struct WaitHandler {
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

impl WaitHandler {
    /// Wait on `mailbox` for at most `timeout`.
    pub fn new(mailbox: Arc<Mailbox>, timeout: Duration) -> Self {
        Self { mailbox, timeout }
    }
}

#[async_trait]
impl Handler for WaitHandler {
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        _channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        let key = Correlation::reply_to(&message.client_message);
        let digest = context.operation()?.digest();
        let counterparty = message.client_message.to;
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match self.mailbox.wait(key, remaining).await {
                Ok(reply) => reply,
                Err(StepError::Transport(TransportError::Timeout {
                    channel,
                    protocol,
                    seq,
                    ..
                })) => {
                    let timeout = self.timeout;
                    return Err(TransportError::Timeout { channel, protocol, seq, timeout }.into());
                },
                Err(error) => return Err(error),
            };
            if is_stale(&reply, &digest, counterparty) {
                debug!(channel = %key.channel_id, protocol = %key.protocol, "skipping stale reply");
                continue;
            }
            context.intermediate_results.inbox.push(reply);
            return Ok(());
        }
    }
}

fn is_stale(reply: &ClientActionMessage, digest: &Digest, counterparty: Address) -> bool {
    reply.signature.as_ref().is_some_and(|signature| {
        matches!(
            verify_counterparty(signature, digest, counterparty),
            Err(ProtocolViolation::DigestMismatch { .. })
        )
    })
}

/// COMMIT: stage the proposal and its mutually signed commitment.
///
/// The staged state lands in the store once the round finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitHandler;

#[async_trait]
impl Handler for CommitHandler {
    async fn handle(
        &self,
        _message: &mut InternalMessage,
        context: &mut Context,
        channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        let proposal = context.proposal()?.clone();
        let commitment = Commitment::new(
            proposal.protocol,
            context.operation()?.clone(),
            context.signature()?.clone(),
            context.counterparty_signature()?.clone(),
        );
        channel.stage(proposal.state, Some(commitment));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::{Address, AppInstanceId, ChannelId, Digest, ProtocolName, UpdateData};

    use super::*;
    use crate::{
        crypto::LocalSigner,
        store::{ChannelStore, MemoryStorage},
    };

    const CHANNEL: ChannelId = ChannelId([4; 20]);

    async fn empty_entry() -> tokio::sync::OwnedMutexGuard<ChannelEntry> {
        let store = ChannelStore::open(Arc::new(MemoryStorage::new())).unwrap();
        store.lock(CHANNEL).await
    }

    fn setup_message(from: Address, to: Address) -> InternalMessage {
        InternalMessage::new(ClientActionMessage::new(
            ProtocolName::Setup,
            from,
            to,
            CHANNEL,
            Payload::Setup,
        ))
    }

    #[tokio::test]
    async fn sign_refuses_foreign_party() {
        let alice = Arc::new(LocalSigner::from_secret([1; 32]));
        let mallory = Address([0xee; 20]);
        let mut message = setup_message(mallory, alice.address());
        let mut context = Context::default();
        let mut entry = empty_entry().await;

        ProposeHandler.handle(&mut message, &mut context, &mut entry).await.unwrap();
        let err = SignHandler::new(Arc::clone(&alice) as Arc<dyn Signer>)
            .handle(&mut message, &mut context, &mut entry)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StepError::Invariant(InvariantError::NotLocalParty {
                signer: alice.address(),
                local: mallory
            })
        );
    }

    #[tokio::test]
    async fn validate_rejects_unsigned_reply() {
        let alice = LocalSigner::from_secret([1; 32]);
        let bob = LocalSigner::from_secret([2; 32]);
        let mut message = setup_message(alice.address(), bob.address());
        let mut context = Context::default();
        let mut entry = empty_entry().await;

        ProposeHandler.handle(&mut message, &mut context, &mut entry).await.unwrap();
        context.intermediate_results.inbox.push(message.client_message.clone());
        let err =
            SignValidateHandler.handle(&mut message, &mut context, &mut entry).await.unwrap_err();
        assert_eq!(err, StepError::Protocol(ProtocolViolation::MissingSignature));
    }

    #[tokio::test]
    async fn commit_requires_both_signatures() {
        let alice = Arc::new(LocalSigner::from_secret([1; 32]));
        let bob = LocalSigner::from_secret([2; 32]);
        let mut message = setup_message(alice.address(), bob.address());
        let mut context = Context::default();
        let mut entry = empty_entry().await;

        ProposeHandler.handle(&mut message, &mut context, &mut entry).await.unwrap();
        SignHandler::new(alice).handle(&mut message, &mut context, &mut entry).await.unwrap();
        let err = CommitHandler.handle(&mut message, &mut context, &mut entry).await.unwrap_err();
        assert_eq!(err, StepError::Invariant(InvariantError::MissingCounterpartySignature));
        assert!(!entry.is_staged());
    }

    struct Refuse;

    #[async_trait]
    impl Transport for Refuse {
        async fn send(&self, _: ClientActionMessage) -> Result<(), TransportError> {
            Err(TransportError::Send("unreachable".to_owned()))
        }
    }

    fn signed_reply(
        message: &InternalMessage,
        signer: &LocalSigner,
        digest: &Digest,
    ) -> ClientActionMessage {
        let mut reply = message.client_message.clone();
        reply.seq = 2;
        reply.signature = Some(signer.sign(digest).unwrap());
        reply
    }

    #[tokio::test]
    async fn failed_send_leaves_nothing_expected() {
        let alice = LocalSigner::from_secret([1; 32]);
        let bob = LocalSigner::from_secret([2; 32]);
        let mut message = setup_message(alice.address(), bob.address());
        let mut context = Context::default();
        context.intermediate_results.outbox.push(message.client_message.clone());
        let mut entry = empty_entry().await;

        let mailbox = Arc::new(Mailbox::new());
        let err = SendHandler::new(Arc::new(Refuse), Arc::clone(&mailbox))
            .handle(&mut message, &mut context, &mut entry)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Transport(TransportError::Send(_))));
        assert_eq!(mailbox.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_skips_reply_for_an_earlier_digest() {
        let alice = LocalSigner::from_secret([1; 32]);
        let bob = LocalSigner::from_secret([2; 32]);
        let mut message = setup_message(alice.address(), bob.address());
        let mut context = Context::default();
        let mut entry = empty_entry().await;
        ProposeHandler.handle(&mut message, &mut context, &mut entry).await.unwrap();
        let digest = context.operation().unwrap().digest();

        let mailbox = Arc::new(Mailbox::new());
        let key = Correlation::reply_to(&message.client_message);
        mailbox.expect(key);
        mailbox.deliver(signed_reply(&message, &bob, &Digest::of(b"earlier round")));
        let current = signed_reply(&message, &bob, &digest);

        let wait = WaitHandler::new(Arc::clone(&mailbox), Duration::from_secs(1));
        let (waited, ()) = tokio::join!(wait.handle(&mut message, &mut context, &mut entry), async {
            tokio::task::yield_now().await;
            mailbox.deliver(current.clone());
        });
        waited.unwrap();
        assert_eq!(context.intermediate_results.inbox, vec![current]);
        assert_eq!(mailbox.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_stale_replies_time_out() {
        let alice = LocalSigner::from_secret([1; 32]);
        let bob = LocalSigner::from_secret([2; 32]);
        let mut message = setup_message(alice.address(), bob.address());
        let mut context = Context::default();
        let mut entry = empty_entry().await;
        ProposeHandler.handle(&mut message, &mut context, &mut entry).await.unwrap();

        let mailbox = Arc::new(Mailbox::new());
        mailbox.expect(Correlation::reply_to(&message.client_message));
        mailbox.deliver(signed_reply(&message, &bob, &Digest::of(b"earlier round")));

        let timeout = Duration::from_millis(200);
        let err = WaitHandler::new(mailbox, timeout)
            .handle(&mut message, &mut context, &mut entry)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Transport(TransportError::Timeout { seq: 2, timeout: t, .. }) if t == timeout
        ));
        assert!(context.intermediate_results.inbox.is_empty());
    }

    #[test]
    fn responder_nonce_is_left_alone() {
        let mut msg = ClientActionMessage::new(
            ProtocolName::Update,
            Address([1; 20]),
            Address([2; 20]),
            CHANNEL,
            Payload::Update(UpdateData::new(vec![1])),
        )
        .with_app(AppInstanceId(Digest::of(b"app")));
        msg.seq = 1;
        resolve_local_nonce(&mut msg, None).unwrap();
        assert!(matches!(&msg.payload, Payload::Update(d) if d.local_nonce.is_none()));
    }
}
