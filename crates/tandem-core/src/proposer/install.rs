//! INSTALL: move value from free balance into a new app instance.
//!
//! The app instance id is derived from the install's content (channel,
//! participants, signing keys, app rules, terms, timeout and the free balance
//! `unique_id` after increment), so two installs of the same app never collide.

use tandem_proto::{
    Address, AppInstanceId, ChannelId, ClientActionMessage, Digest, InstallData, Payload,
};

use super::wrong_payload;
use crate::{
    channel::{Allocation, AppInstance, ChannelState, FreeBalance},
    error::ProtocolViolation,
    operation::Encoder,
};

const APP_ID_DOMAIN: &[u8] = b"tandem/app/v1";

pub(super) fn propose(
    message: &ClientActionMessage,
    state: &ChannelState,
) -> Result<(ChannelState, AppInstanceId), ProtocolViolation> {
    let Payload::Install(data) = &message.payload else {
        return Err(wrong_payload(message));
    };

    let allocation = Allocation::new(data.peer_a, data.peer_b);
    let allocated = allocation.total();
    if allocated > u128::from(data.terms.limit) {
        return Err(ProtocolViolation::TermsExceeded { allocated, limit: data.terms.limit });
    }

    let balances = state.free_balance.balances.debit(&allocation)?;
    let unique_id =
        state.free_balance.unique_id.checked_add(1).ok_or(ProtocolViolation::Overflow)?;

    let signing_keys = if data.peer_b.address < data.peer_a.address {
        (data.key_b, data.key_a)
    } else {
        (data.key_a, data.key_b)
    };

    let id = app_instance_id(state.channel_id, &allocation, signing_keys, data, unique_id);
    if state.app_instances.contains_key(&id) {
        return Err(ProtocolViolation::AppExists(id));
    }

    let mut next = state.clone();
    next.free_balance = FreeBalance { balances, unique_id };
    next.app_instances.insert(
        id,
        AppInstance {
            id,
            app: data.app.clone(),
            terms: data.terms,
            timeout: data.timeout,
            allocation,
            signing_keys,
            encoded_state: data.encoded_app_state.clone(),
            local_nonce: 1,
            dependency_nonce: state.dependency_nonce,
            unique_id,
        },
    );
    Ok((next, id))
}

fn app_instance_id(
    channel_id: ChannelId,
    allocation: &Allocation,
    signing_keys: (Address, Address),
    data: &InstallData,
    unique_id: u64,
) -> AppInstanceId {
    let (first, second) = allocation.parties();
    let bytes = Encoder::new()
        .bytes_raw(APP_ID_DOMAIN)
        .bytes_raw(channel_id.as_bytes())
        .address(&first)
        .address(&second)
        .address(&signing_keys.0)
        .address(&signing_keys.1)
        .app_interface(&data.app)
        .terms(&data.terms)
        .u64(data.timeout)
        .u64(unique_id)
        .finish();
    AppInstanceId(Digest::of(&bytes))
}
