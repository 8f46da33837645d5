//! Tandem protocol execution engine
//!
//! Runs the two-party negotiation rounds (SETUP, INSTALL, UPDATE, UNINSTALL)
//! that move a state channel from one mutually signed state to the next.
//!
//! # Architecture
//!
//! A round is a static pipeline of steps (see [`flow`]). Each step is either
//! an inline transform on the round message or an opcode dispatched through
//! the [`middleware`] registry, whose handlers carry every external
//! capability: signing, transport, storage staging. The engine itself holds
//! no keys and opens no sockets.
//!
//! The [`action`] interpreter runs one pipeline while holding its channel's
//! lock. Candidate states come from pure [`proposer`]s and are committed only
//! after both signatures over the canonical [`operation`] digest have been
//! validated, and only once the whole pipeline has succeeded.
//!
//! The [`executor`] is the entry point: one method per protocol, plus
//! [`executor::InstructionExecutor::receive`] for messages arriving from the
//! counterparty.
//!
//! # Components
//!
//! - [`channel`]: Channel, free balance and app instance data model
//! - [`proposer`]: Pure state-transition proposers
//! - [`operation`]: Canonical operation encoding and commitments
//! - [`crypto`]: Signing capability and signature recovery
//! - [`flow`]: Opcodes and the static flow table
//! - [`context`]: Per-round scratch state
//! - [`middleware`]: Handler registry and observers
//! - [`handlers`]: Default opcode handlers
//! - [`mailbox`]: Correlated reply delivery for WAIT
//! - [`store`]: Per-channel locked store and persistence backends
//! - [`action`]: The round interpreter
//! - [`executor`]: The instruction executor
//! - [`transport`]: Transport abstraction
//! - [`chain`]: On-chain boundary
//! - [`config`]: Executor configuration
//! - [`error`]: Error taxonomy

pub mod action;
pub mod chain;
pub mod channel;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod flow;
pub mod handlers;
pub mod mailbox;
pub mod middleware;
pub mod operation;
pub mod proposer;
pub mod store;
pub mod transport;

pub use config::ExecutorConfig;
pub use error::{ExecutionError, StepError};
pub use executor::{InstructionExecutor, Response, ResponseSink, ResponseStatus};
