//! Response sink backed by a tokio channel.

use tandem_core::{Response, ResponseSink};
use tokio::sync::mpsc;

/// Forwards every completion report to an unbounded channel.
///
/// Reports sent after the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelResponseSink {
    tx: mpsc::UnboundedSender<Response>,
}

impl ChannelResponseSink {
    /// Sink plus the receiver its reports arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResponseSink for ChannelResponseSink {
    fn send_response(&self, response: Response) {
        let _ = self.tx.send(response);
    }
}
