//! In-process message routing.
//!
//! [`LocalNetwork`] is the [`Transport`] every executor in a test shares.
//! A send looks the recipient up by address and hands the envelope to its
//! [`InstructionExecutor::receive`]. Delivery happens before `send` returns,
//! which exercises the mailbox path where a reply beats its WAIT.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use async_trait::async_trait;
use tandem_core::{InstructionExecutor, error::TransportError, transport::Transport};
use tandem_proto::{Address, ClientActionMessage};
use tracing::debug;

type Interceptor = dyn Fn(ClientActionMessage) -> Option<ClientActionMessage> + Send + Sync;

/// Address-routed in-memory network.
#[derive(Default)]
pub struct LocalNetwork {
    routes: RwLock<HashMap<Address, InstructionExecutor>>,
    interceptor: RwLock<Option<Arc<Interceptor>>>,
    sent: Mutex<Vec<ClientActionMessage>>,
}

impl LocalNetwork {
    /// Empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Route messages addressed to `executor` to it.
    pub fn attach(&self, executor: InstructionExecutor) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.insert(executor.address(), executor);
    }

    /// Remove every route.
    ///
    /// Attached executors hold the network as their transport, so routes
    /// must be cleared for their storage to be released.
    pub fn detach_all(&self) {
        self.routes.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Pass every message through `hook` before delivery.
    ///
    /// Returning `None` drops the message; returning a different message
    /// delivers that instead. The sender sees a successful send either way.
    pub fn intercept(
        &self,
        hook: impl Fn(ClientActionMessage) -> Option<ClientActionMessage> + Send + Sync + 'static,
    ) {
        let hook: Arc<Interceptor> = Arc::new(hook);
        *self.interceptor.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Deliver messages unmodified again.
    pub fn clear_intercept(&self) {
        *self.interceptor.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Every message handed to the network, before interception.
    pub fn sent(&self) -> Vec<ClientActionMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn route(&self, to: Address) -> Option<InstructionExecutor> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).get(&to).cloned()
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn send(&self, message: ClientActionMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(message.clone());

        let hook = self.interceptor.read().unwrap_or_else(PoisonError::into_inner).clone();
        let message = match hook {
            Some(hook) => {
                let (protocol, seq) = (message.protocol, message.seq);
                let Some(message) = hook(message) else {
                    debug!(%protocol, seq, "message dropped in flight");
                    return Ok(());
                };
                message
            },
            None => message,
        };

        let target = self
            .route(message.to)
            .ok_or_else(|| TransportError::Send(format!("no route to {}", message.to)))?;
        target.receive(message);
        Ok(())
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("LocalNetwork")
            .field("routes", &routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
