//! UPDATE: replace an app's encoded state at the next local nonce.

use tandem_proto::{AppInstanceId, ClientActionMessage, Digest, Payload};

use super::{required_app, wrong_payload};
use crate::{channel::ChannelState, error::ProtocolViolation};

pub(super) fn propose(
    message: &ClientActionMessage,
    state: &ChannelState,
) -> Result<(ChannelState, AppInstanceId), ProtocolViolation> {
    let Payload::Update(data) = &message.payload else {
        return Err(wrong_payload(message));
    };
    let app_id = required_app(message)?;
    let app = state.app(&app_id).ok_or(ProtocolViolation::UnknownApp(app_id))?;

    let actual = Digest::of(&data.encoded_app_state);
    if let Some(expected) = data.app_state_hash {
        if expected != actual {
            return Err(ProtocolViolation::StateHashMismatch { expected, actual });
        }
    }

    let expected = app.local_nonce.checked_add(1).ok_or(ProtocolViolation::Overflow)?;
    let nonce = data.local_nonce.ok_or_else(|| {
        ProtocolViolation::MalformedPayload("update carries no local nonce".to_owned())
    })?;
    if nonce != expected {
        return Err(ProtocolViolation::NonceMismatch { app: app_id, expected, actual: nonce });
    }

    let mut next = state.clone();
    if let Some(app) = next.app_instances.get_mut(&app_id) {
        app.encoded_state.clone_from(&data.encoded_app_state);
        app.local_nonce = nonce;
    }
    Ok((next, app_id))
}
