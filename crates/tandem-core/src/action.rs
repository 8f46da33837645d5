//! The round interpreter.
//!
//! An [`ActionExecution`] walks one flow for one round. It holds the channel
//! lock from the first step to the last, runs inline transforms directly and
//! dispatches opcodes through the middleware registry. The instruction pointer
//! only moves forward; the only branch is failure.
//!
//! # Atomicity
//!
//! COMMIT stages; it does not write. After the last step succeeds the staged
//! commit is persisted and installed. Any failure before that discards the
//! staged commit, so the store ends exactly as it began. Messages already
//! handed to transport are not recalled.

use tandem_proto::ClientActionMessage;
use tracing::{debug, info, warn};

use crate::{
    context::{Context, InternalMessage},
    error::{ExecutionError, InvariantError, StepError},
    flow::{self, Flow, Instruction, Transform},
    middleware::MiddlewareRegistry,
    proposer::StateProposal,
    store::ChannelStore,
};

/// One round of one protocol, ready to run.
#[derive(Debug)]
pub struct ActionExecution {
    flow: Flow,
    message: InternalMessage,
    context: Context,
}

impl ActionExecution {
    /// Build the round `message` starts.
    ///
    /// Fails if no flow exists for the message's protocol and sequence.
    pub fn new(message: ClientActionMessage) -> Result<Self, ExecutionError> {
        let (protocol, seq) = (message.protocol, message.seq);
        let Some(flow) = flow::flow(protocol, seq) else {
            let source = if flow::flow(protocol, 0).is_none() {
                InvariantError::UnsupportedProtocol(protocol)
            } else {
                InvariantError::NoFlow { protocol, seq }
            };
            return Err(ExecutionError { step: 0, seq, protocol, source: source.into() });
        };

        let context = Context::for_message(&message);
        Ok(Self { flow, message: InternalMessage::new(message), context })
    }

    /// Flow the round runs.
    pub fn flow(&self) -> Flow {
        self.flow
    }

    /// Run every step and return the proposal the round committed.
    ///
    /// The returned proposal matches the durable state only because COMMIT
    /// ran; a registry whose COMMIT handler stages nothing still returns the
    /// proposal while leaving the store unchanged.
    pub async fn run_all(
        mut self,
        middleware: &MiddlewareRegistry,
        store: &ChannelStore,
    ) -> Result<StateProposal, ExecutionError> {
        let mut entry = match store.lock_round(self.message.channel_id(), self.flow.role()).await {
            Ok(entry) => entry,
            Err(violation) => return Err(self.fail(0, violation.into())),
        };
        let steps = self.flow.steps();

        for (index, instruction) in steps.iter().enumerate() {
            self.message.step = index;
            let outcome = match *instruction {
                Instruction::Inline(transform) => {
                    self.message.opcode = None;
                    debug!(
                        protocol = %self.message.protocol,
                        seq = self.message.seq(),
                        step = index,
                        %instruction,
                        "inline"
                    );
                    run_inline(transform, &mut self.message, &mut self.context)
                },
                Instruction::Op(opcode) => {
                    let (message, context) = (&mut self.message, &mut self.context);
                    middleware.dispatch(opcode, message, context, &mut entry).await
                },
            };

            if let Err(source) = outcome {
                entry.discard();
                return Err(self.fail(index, source));
            }
        }

        let last = steps.len().saturating_sub(1);
        let Some(proposal) = self.context.intermediate_results.proposal.take() else {
            entry.discard();
            return Err(self.fail(last, InvariantError::MissingProposal.into()));
        };

        match entry.apply(store.storage()) {
            Ok(applied) => {
                info!(
                    protocol = %self.message.protocol,
                    seq = self.message.seq(),
                    channel = %self.message.channel_id(),
                    applied,
                    "round complete"
                );
                Ok(proposal)
            },
            Err(error) => Err(self.fail(last, error.into())),
        }
    }

    fn fail(&self, step: usize, source: StepError) -> ExecutionError {
        let error = ExecutionError {
            step,
            seq: self.message.seq(),
            protocol: self.message.protocol,
            source,
        };
        warn!(channel = %self.message.channel_id(), %error, "round failed");
        error
    }
}

fn run_inline(
    transform: Transform,
    message: &mut InternalMessage,
    context: &mut Context,
) -> Result<(), StepError> {
    match transform {
        Transform::SwapParties => message.client_message.swap_parties(),
        Transform::ComposeReply => {
            let mut reply = message.client_message.clone();
            reply.seq = message.seq() + 1;
            reply.signature = Some(context.signature()?.clone());
            context.intermediate_results.outbox.push(reply);
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tandem_proto::{Address, ChannelId, Payload, ProtocolName};

    use super::*;
    use crate::{
        channel::ChannelState,
        error::ProtocolViolation,
        flow::Opcode,
        handlers::{CommitHandler, ProposeHandler},
        middleware::handler_fn,
        store::MemoryStorage,
    };

    const A: Address = Address([0x0a; 20]);
    const B: Address = Address([0x0b; 20]);
    const CHANNEL: ChannelId = ChannelId([6; 20]);

    fn setup(seq: u32) -> ClientActionMessage {
        let mut msg = ClientActionMessage::new(ProtocolName::Setup, A, B, CHANNEL, Payload::Setup);
        msg.seq = seq;
        msg
    }

    fn store() -> ChannelStore {
        ChannelStore::open(Arc::new(MemoryStorage::new())).unwrap()
    }

    /// Registry whose capabilities are stand-ins: SIGN and SIGN_VALIDATE fill
    /// placeholder signatures, SEND and WAIT do nothing.
    fn loopback_registry() -> MiddlewareRegistry {
        let placeholder = tandem_proto::PartySignature { public_key: [0; 32], signature: vec![] };
        let mut registry = MiddlewareRegistry::new();
        registry.register(Opcode::Propose, ProposeHandler);
        let sig = placeholder.clone();
        registry.register(
            Opcode::Sign,
            handler_fn(move |_, cx, _| {
                cx.intermediate_results.signature = Some(sig.clone());
                Ok(())
            }),
        );
        registry.register(
            Opcode::SignValidate,
            handler_fn(move |_, cx, _| {
                cx.intermediate_results.counterparty_signature = Some(placeholder.clone());
                Ok(())
            }),
        );
        registry.register(Opcode::Send, handler_fn(|_, _, _| Ok(())));
        registry.register(Opcode::Wait, handler_fn(|_, _, _| Ok(())));
        registry.register(Opcode::Commit, CommitHandler);
        registry
    }

    #[tokio::test]
    async fn successful_round_applies_commit() {
        let store = store();
        let action = ActionExecution::new(setup(0)).unwrap();
        let proposal = action.run_all(&loopback_registry(), &store).await.unwrap();
        assert_eq!(proposal.state, ChannelState::new(CHANNEL, A, B));
        assert_eq!(store.snapshot(CHANNEL).await, Some(proposal.state));
        assert_eq!(store.storage().load_commitments(CHANNEL).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_reports_step_and_leaves_store_untouched() {
        let store = store();
        let mut registry = loopback_registry();
        registry.register(
            Opcode::SignValidate,
            handler_fn(|_, _, _| Err(ProtocolViolation::MissingSignature.into())),
        );

        let err =
            ActionExecution::new(setup(0)).unwrap().run_all(&registry, &store).await.unwrap_err();
        assert_eq!(err.step, 5);
        assert_eq!(err.seq, 0);
        assert_eq!(err.protocol, ProtocolName::Setup);
        assert_eq!(err.source, StepError::Protocol(ProtocolViolation::MissingSignature));
        assert_eq!(
            err.to_string(),
            "step 5 at seq 0 of protocol setup failed: \
             protocol violation: counterparty message is unsigned"
        );
        assert_eq!(store.snapshot(CHANNEL).await, None);
    }

    #[tokio::test]
    async fn responder_swaps_parties_before_proposing() {
        let store = store();
        let action = ActionExecution::new(setup(1)).unwrap();
        assert_eq!(action.flow().steps()[0], Instruction::Inline(Transform::SwapParties));
        let proposal = action.run_all(&loopback_registry(), &store).await.unwrap();
        assert_eq!(proposal.state.participants(), (A, B));
    }

    #[tokio::test]
    async fn compose_reply_carries_signature_and_next_seq() {
        let mut message = InternalMessage::new(setup(0));
        let mut context = Context::default();
        assert_eq!(
            run_inline(Transform::ComposeReply, &mut message, &mut context),
            Err(StepError::Invariant(InvariantError::MissingSignature))
        );

        let sig = tandem_proto::PartySignature { public_key: [1; 32], signature: vec![2] };
        context.intermediate_results.signature = Some(sig.clone());
        run_inline(Transform::ComposeReply, &mut message, &mut context).unwrap();
        let reply = &context.intermediate_results.outbox[0];
        assert_eq!(reply.seq, 1);
        assert_eq!(reply.signature, Some(sig));
    }

    #[test]
    fn unknown_sequence_and_protocol_are_rejected() {
        let err = ActionExecution::new(setup(2)).unwrap_err();
        assert_eq!(
            err.source,
            StepError::Invariant(InvariantError::NoFlow { protocol: ProtocolName::Setup, seq: 2 })
        );

        let mut meta = setup(0);
        meta.protocol = ProtocolName::InstallMetachannelApp;
        let err = ActionExecution::new(meta).unwrap_err();
        assert_eq!(
            err.source,
            StepError::Invariant(InvariantError::UnsupportedProtocol(
                ProtocolName::InstallMetachannelApp
            ))
        );
    }
}
