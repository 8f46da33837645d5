//! Test harness for Tandem protocol rounds.
//!
//! Two ways to connect executors:
//!
//! - [`LocalNetwork`] routes envelopes between executors in the same process,
//!   with an interception hook for dropping or rewriting messages in flight.
//! - [`SimTransport`] moves length-prefixed CBOR frames over turmoil's
//!   simulated TCP, so rounds can be run under latency, loss and partitions.
//!
//! [`TwoParties`] wires two executors with seeded keys onto a
//! [`LocalNetwork`] and exposes one helper per protocol.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixture;
pub mod keys;
pub mod network;
pub mod sim_transport;
pub mod sink;

pub use fixture::{Party, TwoParties, counter_app};
pub use keys::SeededKeys;
pub use network::LocalNetwork;
pub use sim_transport::{SimTransport, serve};
pub use sink::ChannelResponseSink;
