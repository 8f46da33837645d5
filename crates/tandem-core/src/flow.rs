//! Static protocol flow table.
//!
//! A flow is the ordered list of steps one party runs for one round of a
//! protocol. Steps are plain data: either an [`Opcode`] dispatched through the
//! middleware registry, or an inline [`Transform`] applied synchronously to the
//! round's message.
//!
//! # Roles
//!
//! ```text
//! Initiator (seq 0)                    Responder (seq 1)
//! ────────────────                     ────────────────
//! PROPOSE                              swap parties
//! SIGN                                 PROPOSE
//! compose reply                        SIGN_VALIDATE
//! SEND ─────────── seq 1 ────────────▶ SIGN
//! WAIT ◀────────── seq 2 ───────────── compose reply
//! SIGN_VALIDATE                        SEND
//! COMMIT                               COMMIT
//! ```
//!
//! COMMIT is always the terminal step, so a round that fails anywhere leaves
//! the durable store untouched.

use std::fmt;

use tandem_proto::ProtocolName;

/// Pipeline step kinds dispatched through the middleware registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    /// Compute the candidate next state and its operation
    Propose,
    /// Sign the operation digest with the local capability
    Sign,
    /// Verify the counterparty's signature against the local digest
    SignValidate,
    /// Hand the outbox message to transport
    Send,
    /// Suspend until the correlated reply arrives
    Wait,
    /// Stage the proposed state for the store
    Commit,
}

impl Opcode {
    /// Every opcode.
    pub const ALL: [Self; 6] =
        [Self::Propose, Self::Sign, Self::SignValidate, Self::Send, Self::Wait, Self::Commit];

    /// Upper-case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Propose => "PROPOSE",
            Self::Sign => "SIGN",
            Self::SignValidate => "SIGN_VALIDATE",
            Self::Send => "SEND",
            Self::Wait => "WAIT",
            Self::Commit => "COMMIT",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure transforms run inline, without middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Exchange `from` and `to` so the responder reasons from its own side
    SwapParties,
    /// Queue a copy of the round message, addressed to the counterparty and
    /// carrying the local signature, at `seq + 1`
    ComposeReply,
}

/// One element of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Dispatch through the middleware registry
    Op(Opcode),
    /// Apply synchronously
    Inline(Transform),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Op(op) => op.fmt(f),
            Self::Inline(Transform::SwapParties) => f.write_str("swap-parties"),
            Self::Inline(Transform::ComposeReply) => f.write_str("compose-reply"),
        }
    }
}

/// Which side of a round a party runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Role {
    /// Starts the round locally at seq 0
    Initiator = 0,
    /// Runs in response to the initiator's message at seq 1
    Responder = 1,
}

impl Role {
    /// Role that runs a pipeline at `seq`, if any.
    pub fn for_seq(seq: u32) -> Option<Self> {
        match seq {
            0 => Some(Self::Initiator),
            1 => Some(Self::Responder),
            _ => None,
        }
    }

    /// Sequence number the role's pipeline starts at.
    pub fn seq(self) -> u32 {
        self as u32
    }
}

const INITIATOR: &[Instruction] = &[
    Instruction::Op(Opcode::Propose),
    Instruction::Op(Opcode::Sign),
    Instruction::Inline(Transform::ComposeReply),
    Instruction::Op(Opcode::Send),
    Instruction::Op(Opcode::Wait),
    Instruction::Op(Opcode::SignValidate),
    Instruction::Op(Opcode::Commit),
];

const RESPONDER: &[Instruction] = &[
    Instruction::Inline(Transform::SwapParties),
    Instruction::Op(Opcode::Propose),
    Instruction::Op(Opcode::SignValidate),
    Instruction::Op(Opcode::Sign),
    Instruction::Inline(Transform::ComposeReply),
    Instruction::Op(Opcode::Send),
    Instruction::Op(Opcode::Commit),
];

/// A validated, static pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow {
    protocol: ProtocolName,
    role: Role,
    steps: &'static [Instruction],
}

impl Flow {
    /// Protocol the flow runs.
    pub fn protocol(&self) -> ProtocolName {
        self.protocol
    }

    /// Role the flow runs as.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Ordered steps.
    pub fn steps(&self) -> &'static [Instruction] {
        self.steps
    }
}

/// Look up the flow for `protocol` at `seq`.
///
/// Returns `None` for sequences with no pipeline (seq 2 is consumed by WAIT)
/// and for protocols without an executable flow.
pub fn flow(protocol: ProtocolName, seq: u32) -> Option<Flow> {
    let role = Role::for_seq(seq)?;
    match protocol {
        ProtocolName::Setup
        | ProtocolName::Install
        | ProtocolName::Update
        | ProtocolName::Uninstall => {
            let steps = match role {
                Role::Initiator => INITIATOR,
                Role::Responder => RESPONDER,
            };
            Some(Flow { protocol, role, steps })
        },
        ProtocolName::InstallMetachannelApp => None,
    }
}

/// Whether `steps` ends in exactly one COMMIT.
pub fn commits_last(steps: &[Instruction]) -> bool {
    let commits = steps.iter().filter(|s| **s == Instruction::Op(Opcode::Commit)).count();
    commits == 1 && steps.last() == Some(&Instruction::Op(Opcode::Commit))
}
