//! Pure state-transition proposers.
//!
//! One function per protocol computes the candidate next [`ChannelState`]
//! from the current durable state and the round message. Nothing here touches
//! the store: the candidate travels through SIGN and SIGN_VALIDATE inside the
//! round context and only reaches the store at COMMIT.
//!
//! Every proposer is deterministic in the message and the current state, and
//! every non-setup transition is checked for value conservation before it is
//! returned. Because participants are stored in canonical order, initiator and
//! responder compute byte-identical candidates for the same round.

mod install;
mod setup;
mod uninstall;
mod update;

use tandem_proto::{AppInstanceId, ClientActionMessage, ProtocolName};

use crate::{
    channel::ChannelState,
    error::{InvariantError, ProtocolViolation, StepError},
};

/// Candidate outcome of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateProposal {
    /// Protocol that produced the candidate
    pub protocol: ProtocolName,
    /// Candidate next state of the channel
    pub state: ChannelState,
    /// App instance the round installed, updated or removed
    pub app_id: Option<AppInstanceId>,
}

/// Compute the candidate next state for `message` against `current`.
///
/// `current` is `None` when the channel has never been set up.
pub fn propose(
    message: &ClientActionMessage,
    current: Option<&ChannelState>,
) -> Result<StateProposal, StepError> {
    let protocol = message.protocol;
    if protocol == ProtocolName::Setup {
        let state = setup::propose(message, current)?;
        return Ok(StateProposal { protocol, state, app_id: None });
    }

    let before = existing(message, current)?;
    let (state, app_id) = match protocol {
        ProtocolName::Install => install::propose(message, before)?,
        ProtocolName::Update => update::propose(message, before)?,
        ProtocolName::Uninstall => uninstall::propose(message, before)?,
        ProtocolName::Setup | ProtocolName::InstallMetachannelApp => {
            return Err(InvariantError::UnsupportedProtocol(protocol).into());
        },
    };

    let (total_before, total_after) = (before.total_value(), state.total_value());
    if total_before != total_after {
        return Err(ProtocolViolation::ConservationViolated {
            before: total_before,
            after: total_after,
        }
        .into());
    }

    Ok(StateProposal { protocol, state, app_id: Some(app_id) })
}

/// The channel a non-setup round targets, with both envelope parties checked.
fn existing<'a>(
    message: &ClientActionMessage,
    current: Option<&'a ChannelState>,
) -> Result<&'a ChannelState, ProtocolViolation> {
    let state = current.ok_or(ProtocolViolation::UnknownChannel(message.channel_id))?;
    for party in [message.from, message.to] {
        if !state.is_participant(party) {
            return Err(ProtocolViolation::NotParticipant { party, channel: message.channel_id });
        }
    }
    if message.from == message.to {
        return Err(ProtocolViolation::MalformedPayload(
            "round must run between two distinct parties".to_owned(),
        ));
    }
    Ok(state)
}

fn wrong_payload(message: &ClientActionMessage) -> ProtocolViolation {
    ProtocolViolation::MalformedPayload(format!(
        "{} round carries a {} payload",
        message.protocol,
        message.payload.kind()
    ))
}

fn required_app(message: &ClientActionMessage) -> Result<AppInstanceId, ProtocolViolation> {
    message.app_id.ok_or_else(|| {
        ProtocolViolation::MalformedPayload(format!(
            "{} round names no app instance",
            message.protocol
        ))
    })
}

#[cfg(test)]
mod tests {
    use tandem_proto::{Address, ChannelId, Payload, PeerBalance, UpdateData};

    use super::*;

    const A: Address = Address([0x0a; 20]);
    const B: Address = Address([0x0b; 20]);
    const STRANGER: Address = Address([0x0c; 20]);
    const CHANNEL: ChannelId = ChannelId([7; 20]);

    fn funded() -> ChannelState {
        ChannelState::new(CHANNEL, A, B)
            .with_free_balance(PeerBalance::new(A, 10), PeerBalance::new(B, 5))
    }

    #[test]
    fn non_setup_round_requires_channel() {
        let msg = ClientActionMessage::new(
            ProtocolName::Update,
            A,
            B,
            CHANNEL,
            Payload::Update(UpdateData::new(vec![])),
        );
        assert_eq!(
            propose(&msg, None),
            Err(StepError::Protocol(ProtocolViolation::UnknownChannel(CHANNEL)))
        );
    }

    #[test]
    fn stranger_cannot_run_a_round() {
        let state = funded();
        let msg = ClientActionMessage::new(
            ProtocolName::Update,
            STRANGER,
            B,
            CHANNEL,
            Payload::Update(UpdateData::new(vec![])),
        );
        assert_eq!(
            propose(&msg, Some(&state)),
            Err(StepError::Protocol(ProtocolViolation::NotParticipant {
                party: STRANGER,
                channel: CHANNEL
            }))
        );
    }

    #[test]
    fn metachannel_install_is_unsupported() {
        let state = funded();
        let msg = ClientActionMessage::new(
            ProtocolName::InstallMetachannelApp,
            A,
            B,
            CHANNEL,
            Payload::Setup,
        );
        assert_eq!(
            propose(&msg, Some(&state)),
            Err(StepError::Invariant(InvariantError::UnsupportedProtocol(
                ProtocolName::InstallMetachannelApp
            )))
        );
    }
}
