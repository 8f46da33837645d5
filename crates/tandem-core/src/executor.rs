//! The instruction executor.
//!
//! [`InstructionExecutor`] is the engine's root: it owns the channel store,
//! the WAIT mailbox and the middleware registry, and exposes one entry point
//! per protocol plus [`InstructionExecutor::receive`] for inbound messages.
//!
//! # Protocol Flow
//!
//! ```text
//! local call ──▶ run_*_protocol ──▶ ActionExecution (seq 0) ──▶ SEND
//!                                                                 │
//!   counterparty transport ──▶ receive ──┬─ seq 1: spawn responder round
//!                                        └─ seq 2: deliver to mailbox ──▶ WAIT
//! ```
//!
//! Every finished round, successful or not, is reported to the
//! [`ResponseSink`].

use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicUsize, Ordering},
};

use tandem_proto::{
    Address, AppInstanceId, ChannelId, ClientActionMessage, Digest, InstallData,
    MetachannelInstallData, Payload, PeerBalance, ProtocolName, UninstallData, UpdateData,
};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{
    action::ActionExecution,
    chain::{ChainClient, Receipt},
    channel::ChannelState,
    config::ExecutorConfig,
    crypto::Signer,
    error::{ChainError, ExecutionError, StorageError},
    flow::{self, Opcode, Role},
    handlers::{
        CommitHandler, ProposeHandler, SendHandler, SignHandler, SignValidateHandler, WaitHandler,
    },
    mailbox::Mailbox,
    middleware::{Handler, MiddlewareRegistry, Observer, TracingObserver},
    operation::Commitment,
    proposer::StateProposal,
    store::{ChannelStore, Storage},
    transport::Transport,
};

/// Outcome of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The round committed
    Completed,
    /// The round failed; the store is unchanged
    Failed {
        /// Rendered [`ExecutionError`]
        reason: String,
    },
}

/// Completion report for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Protocol run
    pub protocol: ProtocolName,
    /// Channel the round targeted
    pub channel_id: ChannelId,
    /// Sequence the round started at
    pub seq: u32,
    /// How it ended
    pub status: ResponseStatus,
}

/// Receives completion reports.
pub trait ResponseSink: Send + Sync {
    /// Called once per finished round.
    fn send_response(&self, response: Response);
}

struct Inner {
    config: ExecutorConfig,
    address: Address,
    store: ChannelStore,
    mailbox: Arc<Mailbox>,
    middleware: RwLock<Arc<MiddlewareRegistry>>,
    sink: Arc<dyn ResponseSink>,
    responders: Arc<InFlight>,
}

/// Responder rounds spawned by `receive` and not yet finished.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(in_flight))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs protocol rounds for one party.
///
/// Cheap to clone; clones share the store, mailbox and registry.
#[derive(Clone)]
pub struct InstructionExecutor {
    inner: Arc<Inner>,
}

impl InstructionExecutor {
    /// Build an executor with the default handlers wired to `signer` and
    /// `transport`, loading existing channels from `storage`.
    pub fn new(
        config: ExecutorConfig,
        signer: Arc<dyn Signer>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ResponseSink>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, StorageError> {
        let address = signer.address();
        let mailbox = Arc::new(Mailbox::new());

        let mut registry = MiddlewareRegistry::new();
        registry.register(Opcode::Propose, ProposeHandler);
        registry.register(Opcode::Sign, SignHandler::new(signer));
        registry.register(Opcode::SignValidate, SignValidateHandler);
        registry.register(Opcode::Send, SendHandler::new(transport, Arc::clone(&mailbox)));
        let wait = WaitHandler::new(Arc::clone(&mailbox), config.wait_timeout);
        registry.register(Opcode::Wait, wait);
        registry.register(Opcode::Commit, CommitHandler);
        registry.observe(TracingObserver);

        let store = ChannelStore::open(storage)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                address,
                store,
                mailbox,
                middleware: RwLock::new(Arc::new(registry)),
                sink,
                responders: Arc::default(),
            }),
        })
    }

    /// Address this executor acts as.
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Replace the handlers for `opcode` with `handler`.
    ///
    /// Rounds already running keep the registry they started with.
    pub fn register(&self, opcode: Opcode, handler: impl Handler + 'static) {
        self.update_middleware(|registry| registry.register(opcode, handler));
    }

    /// Run `handler` after the existing handlers for `opcode`.
    pub fn chain(&self, opcode: Opcode, handler: impl Handler + 'static) {
        self.update_middleware(|registry| registry.chain(opcode, handler));
    }

    /// Add a cross-cutting observer.
    pub fn observe(&self, observer: impl Observer + 'static) {
        self.update_middleware(|registry| registry.observe(observer));
    }

    fn update_middleware(&self, update: impl FnOnce(&mut MiddlewareRegistry)) {
        let mut current = self.inner.middleware.write().unwrap_or_else(PoisonError::into_inner);
        update(Arc::make_mut(&mut current));
    }

    fn middleware(&self) -> Arc<MiddlewareRegistry> {
        let current = self.inner.middleware.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    /// Open `channel_id` with `to`.
    pub async fn run_setup_protocol(
        &self,
        to: Address,
        channel_id: ChannelId,
    ) -> Result<StateProposal, ExecutionError> {
        self.execute(self.initial(ProtocolName::Setup, to, channel_id, Payload::Setup)).await
    }

    /// Install an app described by `data`.
    pub async fn run_install_protocol(
        &self,
        to: Address,
        channel_id: ChannelId,
        data: InstallData,
    ) -> Result<StateProposal, ExecutionError> {
        let message = self.initial(ProtocolName::Install, to, channel_id, Payload::Install(data));
        self.execute(message).await
    }

    /// Move `app_id` to `encoded_app_state` at the next local nonce.
    ///
    /// When `app_state_hash` is given, both sides check it against the
    /// SHA-256 of the new state.
    pub async fn run_update_protocol(
        &self,
        to: Address,
        channel_id: ChannelId,
        app_id: AppInstanceId,
        encoded_app_state: Vec<u8>,
        app_state_hash: Option<Digest>,
    ) -> Result<StateProposal, ExecutionError> {
        let data = UpdateData { encoded_app_state, app_state_hash, local_nonce: None };
        let message = self
            .initial(ProtocolName::Update, to, channel_id, Payload::Update(data))
            .with_app(app_id);
        self.execute(message).await
    }

    /// Remove `app_id`, paying out `peer_amounts` to free balance.
    pub async fn run_uninstall_protocol(
        &self,
        to: Address,
        channel_id: ChannelId,
        app_id: AppInstanceId,
        peer_amounts: Vec<PeerBalance>,
    ) -> Result<StateProposal, ExecutionError> {
        let payload = Payload::Uninstall(UninstallData { peer_amounts });
        let message =
            self.initial(ProtocolName::Uninstall, to, channel_id, payload).with_app(app_id);
        self.execute(message).await
    }

    /// Install through an intermediary.
    ///
    /// The three-party flow is not defined; the round fails without touching
    /// the store and the failure is reported like any other.
    pub async fn run_install_metachannel_app_protocol(
        &self,
        to: Address,
        channel_id: ChannelId,
        data: MetachannelInstallData,
    ) -> Result<StateProposal, ExecutionError> {
        let payload = Payload::InstallMetachannelApp(data);
        let message = self.initial(ProtocolName::InstallMetachannelApp, to, channel_id, payload);
        self.execute(message).await
    }

    /// Run the round an inbound message starts (seq 1 and up).
    pub async fn dispatch_received_message(
        &self,
        message: ClientActionMessage,
    ) -> Result<StateProposal, ExecutionError> {
        self.execute(message).await
    }

    /// Route an inbound message.
    ///
    /// A message that opens a responder round is run on its own task;
    /// everything else is a reply for a WAIT. Messages for another address
    /// and inbound seq-0 messages, which only a local caller may start, are
    /// dropped.
    pub fn receive(&self, message: ClientActionMessage) {
        if message.to != self.inner.address {
            warn!(to = %message.to, local = %self.inner.address, "dropping misaddressed message");
            return;
        }

        let role = Role::for_seq(message.seq);
        if role == Some(Role::Initiator) {
            warn!(
                protocol = %message.protocol,
                from = %message.from,
                channel = %message.channel_id,
                "dropping inbound initiator message"
            );
            return;
        }

        if role == Some(Role::Responder) && flow::flow(message.protocol, message.seq).is_some() {
            let guard = InFlightGuard::enter(&self.inner.responders);
            let executor = self.clone();
            tokio::spawn(async move {
                // Outcome already reported to the sink.
                let _ = executor.dispatch_received_message(message).await;
                // `idle` callers expect this handle gone once the count drops.
                drop(executor);
                drop(guard);
            });
        } else {
            debug!(
                protocol = %message.protocol,
                seq = message.seq,
                channel = %message.channel_id,
                "reply received"
            );
            self.inner.mailbox.deliver(message);
        }
    }

    /// Wait until every responder round spawned by [`Self::receive`] has
    /// finished and released its handle on this executor.
    pub async fn idle(&self) {
        let responders = &self.inner.responders;
        loop {
            let notified = responders.idle.notified();
            if responders.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Run `message` as a round and report the outcome.
    pub async fn execute(
        &self,
        message: ClientActionMessage,
    ) -> Result<StateProposal, ExecutionError> {
        let (protocol, channel_id, seq) = (message.protocol, message.channel_id, message.seq);

        let result = match ActionExecution::new(message) {
            Ok(action) => action.run_all(&self.middleware(), &self.inner.store).await,
            Err(error) => Err(error),
        };

        let status = match &result {
            Ok(_) => ResponseStatus::Completed,
            Err(error) => ResponseStatus::Failed { reason: error.to_string() },
        };
        self.inner.sink.send_response(Response { protocol, channel_id, seq, status });
        result
    }

    fn initial(
        &self,
        protocol: ProtocolName,
        to: Address,
        channel_id: ChannelId,
        payload: Payload,
    ) -> ClientActionMessage {
        ClientActionMessage::new(protocol, self.inner.address, to, channel_id, payload)
    }

    /// Committed state of `channel_id`, once any in-flight round on it ends.
    pub async fn channel(&self, channel_id: ChannelId) -> Option<ChannelState> {
        self.inner.store.snapshot(channel_id).await
    }

    /// Replace a channel's state with externally observed state, such as
    /// confirmed deposits.
    pub async fn import_channel(&self, state: ChannelState) -> Result<(), StorageError> {
        self.inner.store.import(state).await
    }

    /// Commitment history of `channel_id`, oldest first.
    pub fn commitments(&self, channel_id: ChannelId) -> Result<Vec<Commitment>, StorageError> {
        self.inner.store.storage().load_commitments(channel_id)
    }

    /// Most recent commitment of `channel_id`.
    pub fn latest_commitment(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Commitment>, StorageError> {
        Ok(self.commitments(channel_id)?.pop())
    }

    /// Hand the latest commitment of `channel_id` to the chain.
    pub async fn submit_latest_commitment(
        &self,
        channel_id: ChannelId,
        client: &dyn ChainClient,
    ) -> Result<Receipt, ChainError> {
        let commitment =
            self.latest_commitment(channel_id)?.ok_or(ChainError::NoCommitment(channel_id))?;
        client.submit(&commitment).await
    }
}

impl std::fmt::Debug for InstructionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionExecutor")
            .field("address", &self.inner.address)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}
