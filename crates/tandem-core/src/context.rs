//! Per-round scratch state.
//!
//! An [`ActionExecution`](crate::action::ActionExecution) owns one
//! [`InternalMessage`] and one [`Context`] for its lifetime. Handlers read and
//! write them in place; nothing here is ever persisted.

use tandem_proto::{ChannelId, ClientActionMessage, PartySignature, ProtocolName};

use crate::{
    error::InvariantError, flow::Opcode, operation::ProtocolOperation, proposer::StateProposal,
};

/// The round message plus the step currently being dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalMessage {
    /// Protocol being run
    pub protocol: ProtocolName,
    /// Index of the current step
    pub step: usize,
    /// Opcode being dispatched, `None` while an inline transform runs
    pub opcode: Option<Opcode>,
    /// Envelope, with `from` always naming the local party once the flow
    /// has run its party swap
    pub client_message: ClientActionMessage,
}

impl InternalMessage {
    /// Wrap an envelope at step 0.
    pub fn new(client_message: ClientActionMessage) -> Self {
        Self { protocol: client_message.protocol, step: 0, opcode: None, client_message }
    }

    /// Round sequence number.
    pub fn seq(&self) -> u32 {
        self.client_message.seq
    }

    /// Channel the round mutates.
    pub fn channel_id(&self) -> ChannelId {
        self.client_message.channel_id
    }
}

/// Results accumulated by the steps of one round.
#[derive(Debug, Clone, Default)]
pub struct IntermediateResults {
    /// Messages queued for SEND
    pub outbox: Vec<ClientActionMessage>,
    /// Messages received from the counterparty
    pub inbox: Vec<ClientActionMessage>,
    /// Candidate next state from PROPOSE
    pub proposal: Option<StateProposal>,
    /// Operation derived from the proposal
    pub operation: Option<ProtocolOperation>,
    /// Local signature over the operation digest
    pub signature: Option<PartySignature>,
    /// Counterparty signature, set once SIGN_VALIDATE accepts it
    pub counterparty_signature: Option<PartySignature>,
}

/// Scratch state shared by every handler of a round.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Step outputs
    pub intermediate_results: IntermediateResults,
}

impl Context {
    /// Context for a round triggered by `message`.
    ///
    /// Rounds past seq 0 are started by a counterparty message, which becomes
    /// the first inbox entry.
    pub fn for_message(message: &ClientActionMessage) -> Self {
        let mut context = Self::default();
        if message.seq > 0 {
            context.intermediate_results.inbox.push(message.clone());
        }
        context
    }

    /// Proposal from PROPOSE.
    pub fn proposal(&self) -> Result<&StateProposal, InvariantError> {
        self.intermediate_results.proposal.as_ref().ok_or(InvariantError::MissingProposal)
    }

    /// Operation from PROPOSE.
    pub fn operation(&self) -> Result<&ProtocolOperation, InvariantError> {
        self.intermediate_results.operation.as_ref().ok_or(InvariantError::MissingOperation)
    }

    /// Local signature from SIGN.
    pub fn signature(&self) -> Result<&PartySignature, InvariantError> {
        self.intermediate_results.signature.as_ref().ok_or(InvariantError::MissingSignature)
    }

    /// Counterparty signature from SIGN_VALIDATE.
    pub fn counterparty_signature(&self) -> Result<&PartySignature, InvariantError> {
        self.intermediate_results
            .counterparty_signature
            .as_ref()
            .ok_or(InvariantError::MissingCounterpartySignature)
    }

    /// Most recent counterparty message.
    pub fn last_received(&self) -> Result<&ClientActionMessage, InvariantError> {
        self.intermediate_results.inbox.last().ok_or(InvariantError::EmptyInbox)
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::{Address, Payload};

    use super::*;

    fn setup(seq: u32) -> ClientActionMessage {
        let mut msg = ClientActionMessage::new(
            ProtocolName::Setup,
            Address([1; 20]),
            Address([2; 20]),
            ChannelId([3; 20]),
            Payload::Setup,
        );
        msg.seq = seq;
        msg
    }

    #[test]
    fn initiator_context_starts_empty() {
        let context = Context::for_message(&setup(0));
        assert_eq!(context.last_received(), Err(InvariantError::EmptyInbox));
    }

    #[test]
    fn responder_context_holds_trigger() {
        let context = Context::for_message(&setup(1));
        assert_eq!(context.last_received().map(|m| m.seq), Ok(1));
    }

    #[test]
    fn missing_results_are_invariant_failures() {
        let context = Context::default();
        assert_eq!(context.proposal().err(), Some(InvariantError::MissingProposal));
        assert_eq!(context.operation().err(), Some(InvariantError::MissingOperation));
        assert_eq!(context.signature().err(), Some(InvariantError::MissingSignature));
    }
}
