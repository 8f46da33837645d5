//! Transport abstraction for round messages.
//!
//! The engine never opens sockets. SEND hands an envelope to a [`Transport`];
//! whatever carries it to the counterparty (an in-memory network in tests, a
//! framed TCP link, a relay service) is expected to call
//! [`InstructionExecutor::receive`](crate::executor::InstructionExecutor::receive)
//! on the other side.
//!
//! Delivery, retries and peer discovery are the transport's business. A send
//! that fails surfaces as a [`TransportError`] and aborts the round before
//! COMMIT.

use async_trait::async_trait;
use tandem_proto::ClientActionMessage;

use crate::error::TransportError;

/// Outbound half of a message transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver `message` to `message.to`.
    ///
    /// Returns once the transport has accepted the message. Acceptance is not
    /// delivery: the round learns the counterparty got it only when the reply
    /// arrives at WAIT.
    async fn send(&self, message: ClientActionMessage) -> Result<(), TransportError>;
}
