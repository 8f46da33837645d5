//! SETUP: open a channel with an empty free balance.

use tandem_proto::{ClientActionMessage, Payload};

use super::wrong_payload;
use crate::{channel::ChannelState, error::ProtocolViolation};

pub(super) fn propose(
    message: &ClientActionMessage,
    current: Option<&ChannelState>,
) -> Result<ChannelState, ProtocolViolation> {
    if current.is_some() {
        return Err(ProtocolViolation::ChannelExists(message.channel_id));
    }
    if !matches!(message.payload, Payload::Setup) {
        return Err(wrong_payload(message));
    }
    if message.from == message.to {
        return Err(ProtocolViolation::MalformedPayload(
            "channel requires two distinct parties".to_owned(),
        ));
    }
    Ok(ChannelState::new(message.channel_id, message.from, message.to))
}

#[cfg(test)]
mod tests {
    use tandem_proto::{Address, ChannelId, ProtocolName};

    use super::*;

    const A: Address = Address([0x0a; 20]);
    const B: Address = Address([0x0b; 20]);

    fn setup(from: Address, to: Address) -> ClientActionMessage {
        ClientActionMessage::new(ProtocolName::Setup, from, to, ChannelId([1; 20]), Payload::Setup)
    }

    #[test]
    fn both_directions_propose_the_same_state() {
        assert_eq!(propose(&setup(A, B), None), propose(&setup(B, A), None));
    }

    #[test]
    fn existing_channel_is_rejected() {
        let existing = ChannelState::new(ChannelId([1; 20]), A, B);
        assert_eq!(
            propose(&setup(A, B), Some(&existing)),
            Err(ProtocolViolation::ChannelExists(ChannelId([1; 20])))
        );
    }

    #[test]
    fn self_channel_is_rejected() {
        assert!(matches!(propose(&setup(A, A), None), Err(ProtocolViolation::MalformedPayload(_))));
    }
}
