//! Tandem node.
//!
//! Wires the engine to durable storage and runs a two-party channel
//! lifecycle from the command line.
//!
//! # Components
//!
//! - [`storage::RedbStorage`]: channel state and commitment history in redb
//! - [`demo`]: SETUP, funding, INSTALL, UPDATEs and UNINSTALL between two
//!   in-process parties linked by tokio channels

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod demo;
pub mod error;
pub mod storage;

pub use demo::{DemoConfig, DemoReport};
pub use error::NodeError;
pub use storage::RedbStorage;
