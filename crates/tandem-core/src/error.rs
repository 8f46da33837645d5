//! Error types for the execution engine.
//!
//! Failures fall into three families with different handling:
//!
//! - [`ProtocolViolation`]: the counterparty (or the caller) asked for
//!   something the protocol forbids. Fatal to the round, never retried.
//! - [`TransportError`]: a SEND or WAIT could not complete. The round may be
//!   started over from scratch since nothing durable has changed.
//! - [`InvariantError`]: a step found the round in a state an earlier step
//!   should have prevented. A programming defect; fatal.
//!
//! Every failure inside a round is wrapped in [`ExecutionError`], which names
//! the step index, the round sequence and the protocol that failed.

use std::time::Duration;

use tandem_proto::{Address, AppInstanceId, ChannelId, Digest, ProtocolName};
use thiserror::Error;

use crate::flow::Opcode;

/// The protocol was violated by a message or a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Signature recovered to someone other than the expected counterparty
    #[error("signature recovered to {actual}, expected {expected}")]
    SignerMismatch {
        /// Address the round expected
        expected: Address,
        /// Address the signature recovered to
        actual: Address,
    },

    /// Signature does not verify over the locally computed digest
    #[error("signature does not cover operation digest {digest}")]
    DigestMismatch {
        /// Digest the local side computed
        digest: Digest,
    },

    /// Signature bytes or key are not well formed
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Counterparty message arrived without a signature
    #[error("counterparty message is unsigned")]
    MissingSignature,

    /// Update nonce is not exactly one past the committed nonce
    #[error("app {app}: expected local nonce {expected}, got {actual}")]
    NonceMismatch {
        /// App instance being updated
        app: AppInstanceId,
        /// Committed nonce plus one
        expected: u64,
        /// Nonce carried by the request
        actual: u64,
    },

    /// A party cannot cover a debit from free balance
    #[error("{party} holds {available}, needs {required}")]
    InsufficientBalance {
        /// Party being debited
        party: Address,
        /// Free balance held
        available: u64,
        /// Amount requested
        required: u64,
    },

    /// Channel total changed across a transition
    #[error("channel value not conserved: {before} before, {after} after")]
    ConservationViolated {
        /// Total before the transition
        before: u128,
        /// Total after the transition
        after: u128,
    },

    /// Uninstall payout differs from the value the app holds
    #[error("payout totals {payout}, app holds {held}")]
    PayoutMismatch {
        /// Sum of the requested payout
        payout: u128,
        /// Sum of the app allocation
        held: u128,
    },

    /// Install allocation exceeds the terms' limit
    #[error("allocation {allocated} exceeds terms limit {limit}")]
    TermsExceeded {
        /// Sum of the requested allocation
        allocated: u128,
        /// Limit set by the terms
        limit: u64,
    },

    /// SETUP for a channel that already exists
    #[error("channel {0} already exists")]
    ChannelExists(ChannelId),

    /// Counterparty started a round while a local round on the channel was
    /// in flight
    #[error("channel {0} had a locally initiated round in flight")]
    ConcurrentRound(ChannelId),

    /// Round targets a channel that was never set up
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    /// Round targets an app that is not installed
    #[error("unknown app instance {0}")]
    UnknownApp(AppInstanceId),

    /// INSTALL derives an id that is already installed
    #[error("app instance {0} already installed")]
    AppExists(AppInstanceId),

    /// Address is not one of the channel's two participants
    #[error("{party} is not a participant of channel {channel}")]
    NotParticipant {
        /// Offending address
        party: Address,
        /// Channel checked
        channel: ChannelId,
    },

    /// Expected state hash does not match the encoded state
    #[error("state hash {actual} does not match expected {expected}")]
    StateHashMismatch {
        /// Hash the request claimed
        expected: Digest,
        /// Hash of the encoded state
        actual: Digest,
    },

    /// Arithmetic on balances overflowed
    #[error("balance arithmetic overflowed")]
    Overflow,

    /// Payload does not fit the protocol
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// SEND or WAIT could not complete.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transport refused or failed to deliver
    #[error("send failed: {0}")]
    Send(String),

    /// No correlated message arrived in time
    #[error("no reply for {protocol} seq {seq} on channel {channel} within {timeout:?}")]
    Timeout {
        /// Channel awaited
        channel: ChannelId,
        /// Protocol awaited
        protocol: ProtocolName,
        /// Sequence awaited
        seq: u32,
        /// Configured timeout
        timeout: Duration,
    },

    /// Delivery side went away while waiting
    #[error("transport closed")]
    Closed,
}

/// A step found state an earlier step should have produced missing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantError {
    /// No proposal in context
    #[error("no proposed state transition in context")]
    MissingProposal,

    /// No operation in context
    #[error("no protocol operation in context")]
    MissingOperation,

    /// No local signature in context
    #[error("no local signature in context")]
    MissingSignature,

    /// No counterparty signature in context
    #[error("no validated counterparty signature in context")]
    MissingCounterpartySignature,

    /// No inbound message to validate
    #[error("inbox is empty")]
    EmptyInbox,

    /// No outbound message to send
    #[error("outbox is empty")]
    EmptyOutbox,

    /// No handler registered for an opcode
    #[error("no handler registered for {0:?}")]
    NoHandler(Opcode),

    /// No flow for a protocol and sequence
    #[error("no flow for {protocol} at seq {seq}")]
    NoFlow {
        /// Protocol requested
        protocol: ProtocolName,
        /// Sequence requested
        seq: u32,
    },

    /// Protocol has no executable flow
    #[error("protocol {0} has no executable flow")]
    UnsupportedProtocol(ProtocolName),

    /// A second WAIT registered for the same correlation key
    #[error("a round is already waiting on {protocol} seq {seq} for channel {channel}")]
    DuplicateWait {
        /// Channel
        channel: ChannelId,
        /// Protocol
        protocol: ProtocolName,
        /// Sequence
        seq: u32,
    },

    /// Signing capability is not the round's local party
    #[error("signer {signer} is not the round's local party {local}")]
    NotLocalParty {
        /// Address of the configured signer
        signer: Address,
        /// Address the round runs as
        local: Address,
    },
}

/// Persistence backend failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend I/O or transaction failure
    #[error("storage backend: {0}")]
    Backend(String),

    /// Stored bytes could not be encoded or decoded
    #[error("storage codec: {0}")]
    Codec(String),
}

/// Signing capability failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The capability declined or failed to sign
    #[error("signing failed: {0}")]
    Failed(String),
}

/// On-chain boundary failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Transaction reverted
    #[error("reverted: {0}")]
    Reverted(String),

    /// Chain endpoint not reachable
    #[error("chain unavailable: {0}")]
    Unavailable(String),

    /// Nothing to submit
    #[error("no commitment recorded for channel {0}")]
    NoCommitment(ChannelId),

    /// Commitment store could not be read
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure of a single pipeline step.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    /// Protocol violation
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Transport failure
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Internal invariant failure
    #[error("internal invariant failure: {0}")]
    Invariant(#[from] InvariantError),

    /// Persistence failure at commit
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Signing failure
    #[error("signer failure: {0}")]
    Signer(#[from] SignerError),
}

/// Coarse classification of a [`StepError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`ProtocolViolation`]
    ProtocolViolation,
    /// See [`TransportError`]
    TransportFailure,
    /// See [`InvariantError`]
    InternalInvariantFailure,
    /// See [`StorageError`]
    Storage,
    /// See [`SignerError`]
    Signer,
}

impl StepError {
    /// Classification used for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::ProtocolViolation,
            Self::Transport(_) => ErrorKind::TransportFailure,
            Self::Invariant(_) => ErrorKind::InternalInvariantFailure,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Signer(_) => ErrorKind::Signer,
        }
    }
}

/// A round failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("step {step} at seq {seq} of protocol {protocol} failed: {source}")]
pub struct ExecutionError {
    /// Index of the failing pipeline step
    pub step: usize,
    /// Round sequence number
    pub seq: u32,
    /// Protocol being run
    pub protocol: ProtocolName,
    /// Underlying cause
    pub source: StepError,
}

impl ExecutionError {
    /// Classification of the underlying cause.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Whether starting the whole round over may succeed.
    ///
    /// Only transport failures qualify. Nothing durable changes before COMMIT,
    /// so a fresh round starts from the same state.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransportFailure
    }
}
