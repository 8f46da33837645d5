//! Middleware dispatch.
//!
//! The registry maps each [`Opcode`] to an ordered list of [`Handler`]s and
//! keeps a separate list of cross-cutting [`Observer`]s that see every
//! dispatch. Handlers carry the capabilities (signing, transport, storage
//! staging); observers carry logging, metrics and test recorders.
//!
//! Dispatching an opcode with no handler is an
//! [`InvariantError::NoHandler`]: the engine has no built-in fallback.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    context::{Context, InternalMessage},
    error::{InvariantError, StepError},
    flow::Opcode,
    store::ChannelEntry,
};

/// A step implementation.
///
/// Handlers receive the round message, the round context and the locked
/// channel entry. They may mutate any of the three and may fail; the first
/// failure aborts the round.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run the step.
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        channel: &mut ChannelEntry,
    ) -> Result<(), StepError>;
}

/// [`Handler`] backed by a synchronous closure.
pub struct FnHandler<F>(F);

/// Wrap a synchronous closure as a [`Handler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut InternalMessage, &mut Context, &mut ChannelEntry) -> Result<(), StepError>
        + Send
        + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut InternalMessage, &mut Context, &mut ChannelEntry) -> Result<(), StepError>
        + Send
        + Sync,
{
    async fn handle(
        &self,
        message: &mut InternalMessage,
        context: &mut Context,
        channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        (self.0)(message, context, channel)
    }
}

/// Sees every opcode dispatch without taking part in it.
pub trait Observer: Send + Sync {
    /// Before the first handler runs.
    fn on_dispatch(&self, _message: &InternalMessage) {}

    /// After the last handler ran, or the first one failed.
    fn on_complete(&self, _message: &InternalMessage, _outcome: Result<(), &StepError>) {}
}

/// Logs every dispatch through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_dispatch(&self, message: &InternalMessage) {
        debug!(
            protocol = %message.protocol,
            seq = message.seq(),
            step = message.step,
            opcode = ?message.opcode,
            channel = %message.channel_id(),
            "dispatch"
        );
    }

    fn on_complete(&self, message: &InternalMessage, outcome: Result<(), &StepError>) {
        if let Err(error) = outcome {
            warn!(
                protocol = %message.protocol,
                seq = message.seq(),
                step = message.step,
                opcode = ?message.opcode,
                %error,
                "handler failed"
            );
        }
    }
}

/// Opcode dispatch table plus cross-cutting observers.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    handlers: HashMap<Opcode, Vec<Arc<dyn Handler>>>,
    observers: Vec<Arc<dyn Observer>>,
}

impl MiddlewareRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` as the only handler for `opcode`, replacing any
    /// existing ones.
    pub fn register(&mut self, opcode: Opcode, handler: impl Handler + 'static) {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        self.handlers.insert(opcode, vec![handler]);
    }

    /// Append `handler` after the existing handlers for `opcode`.
    pub fn chain(&mut self, opcode: Opcode, handler: impl Handler + 'static) {
        self.handlers.entry(opcode).or_default().push(Arc::new(handler));
    }

    /// Add a cross-cutting observer.
    pub fn observe(&mut self, observer: impl Observer + 'static) {
        self.observers.push(Arc::new(observer));
    }

    /// Number of handlers registered for `opcode`.
    pub fn handler_count(&self, opcode: Opcode) -> usize {
        self.handlers.get(&opcode).map_or(0, Vec::len)
    }

    /// Run every handler for `opcode` in registration order.
    pub async fn dispatch(
        &self,
        opcode: Opcode,
        message: &mut InternalMessage,
        context: &mut Context,
        channel: &mut ChannelEntry,
    ) -> Result<(), StepError> {
        let handlers = match self.handlers.get(&opcode) {
            Some(handlers) if !handlers.is_empty() => handlers,
            _ => return Err(InvariantError::NoHandler(opcode).into()),
        };

        message.opcode = Some(opcode);
        for observer in &self.observers {
            observer.on_dispatch(message);
        }

        let mut outcome = Ok(());
        for handler in handlers {
            outcome = handler.handle(message, context, channel).await;
            if outcome.is_err() {
                break;
            }
        }

        for observer in &self.observers {
            observer.on_complete(message, outcome.as_ref().map(|_| ()));
        }
        outcome
    }
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self.handlers.iter().map(|(op, h)| (*op, h.len())).collect();
        counts.sort();
        f.debug_struct("MiddlewareRegistry")
            .field("handlers", &counts)
            .field("observers", &self.observers.len())
            .finish()
    }
}
