//! Canonical encoding of proposed commitments.
//!
//! Both parties sign the digest of a [`ProtocolOperation`] independently, so
//! the encoding must be byte-identical on both sides given the same proposed
//! state. It therefore depends only on the proposed
//! [`ChannelState`](crate::channel::ChannelState), which is stored in
//! canonical party order, and never on who initiated the round.
//!
//! The encoding is a hand-rolled, fixed-layout byte string rather than CBOR so
//! it cannot drift with serializer versions:
//!
//! ```text
//! "tandem/op/v1" | kind (u8) | channel id (20) | kind-specific fields
//! ```
//!
//! Integers are big-endian `u64`; variable-length fields are prefixed with a
//! `u32` length.

use serde::{Deserialize, Serialize};
use tandem_proto::{
    Address, AppInstanceId, AppInterface, ChannelId, Digest, PartySignature, ProtocolName, Terms,
};

use crate::{
    channel::Allocation,
    error::{InvariantError, ProtocolViolation, StepError},
    proposer::StateProposal,
};

const DOMAIN: &[u8] = b"tandem/op/v1";

/// A proposed, on-chain-enforceable commitment for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolOperation {
    /// Channel opened with an empty free balance
    Setup {
        /// Channel
        channel_id: ChannelId,
        /// Free balance after setup
        free_balance: Allocation,
        /// Free balance unique id
        unique_id: u64,
    },
    /// App installed, free balance debited
    Install {
        /// Channel
        channel_id: ChannelId,
        /// New app instance
        app_id: AppInstanceId,
        /// App rules
        app: AppInterface,
        /// Deposit terms
        terms: Terms,
        /// Dispute timeout
        timeout: u64,
        /// Value moved into the app
        allocation: Allocation,
        /// Free balance after install
        free_balance: Allocation,
        /// Free balance unique id after install
        unique_id: u64,
        /// Channel dependency nonce
        dependency_nonce: u64,
    },
    /// App state replaced
    Update {
        /// Channel
        channel_id: ChannelId,
        /// App instance
        app_id: AppInstanceId,
        /// SHA-256 of the new encoded state
        app_state_hash: Digest,
        /// New local nonce
        local_nonce: u64,
        /// Dispute timeout
        timeout: u64,
        /// Channel dependency nonce the update is valid under
        dependency_nonce: u64,
    },
    /// App removed, payout credited to free balance
    Uninstall {
        /// Channel
        channel_id: ChannelId,
        /// Removed app instance
        app_id: AppInstanceId,
        /// Free balance after uninstall
        free_balance: Allocation,
        /// Channel dependency nonce after uninstall
        dependency_nonce: u64,
    },
}

impl ProtocolOperation {
    /// Derive the operation for a proposal.
    pub fn generate(proposal: &StateProposal) -> Result<Self, StepError> {
        let state = &proposal.state;
        let channel_id = state.channel_id;

        let op = match proposal.protocol {
            ProtocolName::Setup => Self::Setup {
                channel_id,
                free_balance: state.free_balance.balances,
                unique_id: state.free_balance.unique_id,
            },
            ProtocolName::Install => {
                let app_id = required_app(proposal)?;
                let app = state.app(&app_id).ok_or(ProtocolViolation::UnknownApp(app_id))?;
                Self::Install {
                    channel_id,
                    app_id,
                    app: app.app.clone(),
                    terms: app.terms,
                    timeout: app.timeout,
                    allocation: app.allocation,
                    free_balance: state.free_balance.balances,
                    unique_id: state.free_balance.unique_id,
                    dependency_nonce: state.dependency_nonce,
                }
            },
            ProtocolName::Update => {
                let app_id = required_app(proposal)?;
                let app = state.app(&app_id).ok_or(ProtocolViolation::UnknownApp(app_id))?;
                Self::Update {
                    channel_id,
                    app_id,
                    app_state_hash: Digest::of(&app.encoded_state),
                    local_nonce: app.local_nonce,
                    timeout: app.timeout,
                    dependency_nonce: state.dependency_nonce,
                }
            },
            ProtocolName::Uninstall => Self::Uninstall {
                channel_id,
                app_id: required_app(proposal)?,
                free_balance: state.free_balance.balances,
                dependency_nonce: state.dependency_nonce,
            },
            ProtocolName::InstallMetachannelApp => {
                return Err(InvariantError::UnsupportedProtocol(proposal.protocol).into());
            },
        };
        Ok(op)
    }

    /// Channel the operation applies to.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::Setup { channel_id, .. }
            | Self::Install { channel_id, .. }
            | Self::Update { channel_id, .. }
            | Self::Uninstall { channel_id, .. } => *channel_id,
        }
    }

    /// Deterministic byte encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.bytes_raw(DOMAIN);
        match self {
            Self::Setup { channel_id, free_balance, unique_id } => {
                enc.u8(0).bytes_raw(&channel_id.0).allocation(free_balance).u64(*unique_id);
            },
            Self::Install {
                channel_id,
                app_id,
                app,
                terms,
                timeout,
                allocation,
                free_balance,
                unique_id,
                dependency_nonce,
            } => {
                enc.u8(1)
                    .bytes_raw(&channel_id.0)
                    .bytes_raw(&app_id.0.0)
                    .app_interface(app)
                    .terms(terms)
                    .u64(*timeout)
                    .allocation(allocation)
                    .allocation(free_balance)
                    .u64(*unique_id)
                    .u64(*dependency_nonce);
            },
            Self::Update {
                channel_id,
                app_id,
                app_state_hash,
                local_nonce,
                timeout,
                dependency_nonce,
            } => {
                enc.u8(2)
                    .bytes_raw(&channel_id.0)
                    .bytes_raw(&app_id.0.0)
                    .bytes_raw(&app_state_hash.0)
                    .u64(*local_nonce)
                    .u64(*timeout)
                    .u64(*dependency_nonce);
            },
            Self::Uninstall { channel_id, app_id, free_balance, dependency_nonce } => {
                enc.u8(3)
                    .bytes_raw(&channel_id.0)
                    .bytes_raw(&app_id.0.0)
                    .allocation(free_balance)
                    .u64(*dependency_nonce);
            },
        }
        enc.finish()
    }

    /// SHA-256 of [`Self::canonical_bytes`]; the value both parties sign.
    pub fn digest(&self) -> Digest {
        Digest::of(&self.canonical_bytes())
    }
}

fn required_app(proposal: &StateProposal) -> Result<AppInstanceId, StepError> {
    proposal.app_id.ok_or_else(|| {
        ProtocolViolation::MalformedPayload(format!("{} proposal has no app id", proposal.protocol))
            .into()
    })
}

/// A mutually signed operation: dispute evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Protocol that produced it
    pub protocol: ProtocolName,
    /// The signed operation
    pub operation: ProtocolOperation,
    /// Digest both signatures cover
    pub digest: Digest,
    /// Both signatures, ordered by signer address
    pub signatures: [PartySignature; 2],
}

impl Commitment {
    /// Pair an operation with both parties' signatures.
    pub fn new(
        protocol: ProtocolName,
        operation: ProtocolOperation,
        a: PartySignature,
        b: PartySignature,
    ) -> Self {
        let digest = operation.digest();
        let signatures = if b.signer() < a.signer() { [b, a] } else { [a, b] };
        Self { protocol, operation, digest, signatures }
    }

    /// Channel the commitment applies to.
    pub fn channel_id(&self) -> ChannelId {
        self.operation.channel_id()
    }

    /// Signer addresses in canonical order.
    pub fn signers(&self) -> [Address; 2] {
        [self.signatures[0].signer(), self.signatures[1].signer()]
    }
}

/// Builder for the canonical byte layout.
pub(crate) struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    pub(crate) fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Fixed-size field, no length prefix.
    pub(crate) fn bytes_raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Variable-size field with `u32` length prefix.
    pub(crate) fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(v);
        self
    }

    pub(crate) fn address(&mut self, v: &Address) -> &mut Self {
        self.bytes_raw(&v.0)
    }

    pub(crate) fn allocation(&mut self, v: &Allocation) -> &mut Self {
        self.address(&v.first.address)
            .u64(v.first.balance)
            .address(&v.second.address)
            .u64(v.second.balance)
    }

    pub(crate) fn terms(&mut self, v: &Terms) -> &mut Self {
        self.u8(v.asset_type).u64(v.limit).address(&v.token)
    }

    pub(crate) fn app_interface(&mut self, v: &AppInterface) -> &mut Self {
        self.address(&v.address)
            .bytes(v.state_encoding.as_bytes())
            .bytes_raw(&v.apply_action)
            .bytes_raw(&v.resolve)
            .bytes_raw(&v.turn_taker)
            .bytes_raw(&v.is_state_terminal)
    }

    pub(crate) fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use tandem_proto::PeerBalance;

    use super::*;
    use crate::channel::{AppInstance, ChannelState};

    fn setup_op(a: Address, b: Address) -> ProtocolOperation {
        let state = ChannelState::new(ChannelId([5; 20]), a, b);
        ProtocolOperation::generate(&StateProposal {
            protocol: ProtocolName::Setup,
            state,
            app_id: None,
        })
        .unwrap()
    }

    #[test]
    fn setup_encoding_independent_of_party_order() {
        let a = Address([0x01; 20]);
        let b = Address([0xf0; 20]);
        assert_eq!(setup_op(a, b).canonical_bytes(), setup_op(b, a).canonical_bytes());
    }

    #[test]
    fn setup_encoding_layout() {
        let op = setup_op(Address([0x01; 20]), Address([0x02; 20]));
        let bytes = op.canonical_bytes();
        // domain + kind + channel + 2 * (address + u64) + unique id
        assert_eq!(bytes.len(), DOMAIN.len() + 1 + 20 + 2 * (20 + 8) + 8);
        assert!(bytes.starts_with(DOMAIN));
        assert_eq!(bytes[DOMAIN.len()], 0);
        assert_eq!(hex::encode(&bytes[DOMAIN.len() + 1..DOMAIN.len() + 21]), "05".repeat(20));
    }

    #[test]
    fn balances_change_digest() {
        let a = Address([0x01; 20]);
        let b = Address([0x02; 20]);
        let state = ChannelState::new(ChannelId([5; 20]), a, b);
        let funded =
            state.clone().with_free_balance(PeerBalance::new(a, 1), PeerBalance::new(b, 0));

        let d1 = ProtocolOperation::generate(&StateProposal {
            protocol: ProtocolName::Setup,
            state,
            app_id: None,
        })
        .unwrap()
        .digest();
        let d2 = ProtocolOperation::generate(&StateProposal {
            protocol: ProtocolName::Setup,
            state: funded,
            app_id: None,
        })
        .unwrap()
        .digest();
        assert_ne!(d1, d2);
    }

    #[test]
    fn update_binds_channel_dependency_nonce() {
        let (a, b) = (Address([0x01; 20]), Address([0x02; 20]));
        let app_id = AppInstanceId(Digest::of(b"counter"));
        let mut state = ChannelState::new(ChannelId([5; 20]), a, b);
        state.app_instances.insert(
            app_id,
            AppInstance {
                id: app_id,
                app: AppInterface {
                    address: Address([0xc0; 20]),
                    state_encoding: "tuple(uint64 count)".to_owned(),
                    apply_action: [1; 4],
                    resolve: [2; 4],
                    turn_taker: [3; 4],
                    is_state_terminal: [4; 4],
                },
                terms: Terms { asset_type: 0, limit: 4, token: Address::default() },
                timeout: 100,
                allocation: Allocation::new(PeerBalance::new(a, 2), PeerBalance::new(b, 2)),
                signing_keys: (a, b),
                encoded_state: vec![0; 8],
                local_nonce: 2,
                dependency_nonce: 0,
                unique_id: 1,
            },
        );

        let update_digest = |state: &ChannelState| {
            ProtocolOperation::generate(&StateProposal {
                protocol: ProtocolName::Update,
                state: state.clone(),
                app_id: Some(app_id),
            })
            .unwrap()
            .digest()
        };
        let before = update_digest(&state);
        state.dependency_nonce = 7;
        assert_ne!(update_digest(&state), before);
    }

    #[test]
    fn update_without_app_id_is_malformed() {
        let state = ChannelState::new(ChannelId([5; 20]), Address([1; 20]), Address([2; 20]));
        let err = ProtocolOperation::generate(&StateProposal {
            protocol: ProtocolName::Update,
            state,
            app_id: None,
        })
        .unwrap_err();
        assert!(matches!(err, StepError::Protocol(ProtocolViolation::MalformedPayload(_))));
    }

    #[test]
    fn metachannel_has_no_operation() {
        let state = ChannelState::new(ChannelId([5; 20]), Address([1; 20]), Address([2; 20]));
        let err = ProtocolOperation::generate(&StateProposal {
            protocol: ProtocolName::InstallMetachannelApp,
            state,
            app_id: None,
        })
        .unwrap_err();
        assert_eq!(
            err,
            StepError::Invariant(InvariantError::UnsupportedProtocol(
                ProtocolName::InstallMetachannelApp
            ))
        );
    }
}
