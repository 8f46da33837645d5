//! UNINSTALL: remove an app and credit its final payout to free balance.

use tandem_proto::{AppInstanceId, ClientActionMessage, Payload};

use super::{required_app, wrong_payload};
use crate::{
    channel::{Allocation, ChannelState},
    error::ProtocolViolation,
};

pub(super) fn propose(
    message: &ClientActionMessage,
    state: &ChannelState,
) -> Result<(ChannelState, AppInstanceId), ProtocolViolation> {
    let Payload::Uninstall(data) = &message.payload else {
        return Err(wrong_payload(message));
    };
    let app_id = required_app(message)?;
    let app = state.app(&app_id).ok_or(ProtocolViolation::UnknownApp(app_id))?;

    let [a, b] = data.peer_amounts.as_slice() else {
        return Err(ProtocolViolation::MalformedPayload(format!(
            "payout names {} parties, expected 2",
            data.peer_amounts.len()
        )));
    };
    let payout = Allocation::new(*a, *b);

    let (payout_total, held) = (payout.total(), app.allocation.total());
    if payout_total != held {
        return Err(ProtocolViolation::PayoutMismatch { payout: payout_total, held });
    }

    let balances = state.free_balance.balances.credit(&payout)?;
    let dependency_nonce =
        state.dependency_nonce.checked_add(1).ok_or(ProtocolViolation::Overflow)?;

    let mut next = state.clone();
    next.free_balance.balances = balances;
    next.app_instances.remove(&app_id);
    next.dependency_nonce = dependency_nonce;
    Ok((next, app_id))
}
