//! Two parties sharing a channel over a [`LocalNetwork`].

use std::sync::Arc;

use tandem_core::{
    ExecutionError, ExecutorConfig, InstructionExecutor, Response,
    channel::ChannelState,
    crypto::LocalSigner,
    error::StorageError,
    proposer::StateProposal,
    store::{MemoryStorage, Storage},
    transport::Transport,
};
use tandem_proto::{
    Address, AppInstanceId, AppInterface, ChannelId, InstallData, PeerBalance, Terms,
};
use tokio::sync::mpsc;

use crate::{keys::SeededKeys, network::LocalNetwork, sink::ChannelResponseSink};

/// One side of the fixture.
#[derive(Debug)]
pub struct Party {
    /// The party's engine
    pub executor: InstructionExecutor,
    /// Secret the party signs with
    pub secret: [u8; 32],
    responses: mpsc::UnboundedReceiver<Response>,
}

impl Party {
    fn new(
        config: ExecutorConfig,
        secret: [u8; 32],
        network: &Arc<LocalNetwork>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, StorageError> {
        let (sink, responses) = ChannelResponseSink::new();
        let transport: Arc<dyn Transport> = Arc::<LocalNetwork>::clone(network);
        let executor = InstructionExecutor::new(
            config,
            Arc::new(LocalSigner::from_secret(secret)),
            transport,
            Arc::new(sink),
            storage,
        )?;
        network.attach(executor.clone());
        Ok(Self { executor, secret, responses })
    }

    /// Address the party signs as.
    pub fn address(&self) -> Address {
        self.executor.address()
    }

    /// Fresh signer over the party's key.
    pub fn signer(&self) -> LocalSigner {
        LocalSigner::from_secret(self.secret)
    }

    /// Next completion report, waiting for it if necessary.
    pub async fn next_response(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Completion reports already delivered.
    pub fn drain_responses(&mut self) -> Vec<Response> {
        let mut out = Vec::new();
        while let Ok(response) = self.responses.try_recv() {
            out.push(response);
        }
        out
    }
}

/// Alice and Bob, one channel between them.
///
/// Alice initiates every helper round.
#[derive(Debug)]
pub struct TwoParties {
    /// Network both executors are attached to
    pub network: Arc<LocalNetwork>,
    /// Initiating party
    pub alice: Party,
    /// Responding party
    pub bob: Party,
    /// Channel the helpers operate on
    pub channel_id: ChannelId,
}

impl TwoParties {
    /// Parties with keys and channel id drawn from `seed`.
    pub fn new(seed: u64) -> Result<Self, StorageError> {
        Self::with_config(seed, ExecutorConfig::default())
    }

    /// Parties running with `config`, each on in-memory storage.
    pub fn with_config(seed: u64, config: ExecutorConfig) -> Result<Self, StorageError> {
        Self::with_storage(
            seed,
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
        )
    }

    /// Parties persisting to the given backends.
    pub fn with_storage(
        seed: u64,
        config: ExecutorConfig,
        alice_storage: Arc<dyn Storage>,
        bob_storage: Arc<dyn Storage>,
    ) -> Result<Self, StorageError> {
        let mut keys = SeededKeys::new(seed);
        let network = LocalNetwork::new();
        let alice = Party::new(config.clone(), keys.next_secret(), &network, alice_storage)?;
        let bob = Party::new(config, keys.next_secret(), &network, bob_storage)?;
        Ok(Self { network, alice, bob, channel_id: keys.next_channel_id() })
    }

    /// Run SETUP on the fixture channel.
    pub async fn setup(&self) -> Result<StateProposal, ExecutionError> {
        self.alice.executor.run_setup_protocol(self.bob.address(), self.channel_id).await
    }

    /// Credit both parties' free balance on both sides, as if deposits had
    /// been observed on chain.
    pub async fn fund(&self, alice: u64, bob: u64) -> Result<ChannelState, StorageError> {
        let (a, b) = (self.alice.address(), self.bob.address());
        let state = self
            .alice
            .executor
            .channel(self.channel_id)
            .await
            .unwrap_or_else(|| ChannelState::new(self.channel_id, a, b))
            .with_free_balance(PeerBalance::new(a, alice), PeerBalance::new(b, bob));

        self.alice.executor.import_channel(state.clone()).await?;
        self.bob.executor.import_channel(state.clone()).await?;
        Ok(state)
    }

    /// Install [`counter_app`] with the given deposits.
    pub async fn install(
        &self,
        alice_deposit: u64,
        bob_deposit: u64,
    ) -> Result<StateProposal, ExecutionError> {
        let (a, b) = (self.alice.address(), self.bob.address());
        let data = counter_app(a, b, alice_deposit, bob_deposit);
        self.alice.executor.run_install_protocol(self.bob.address(), self.channel_id, data).await
    }

    /// Move `app_id` to `state`.
    pub async fn update(
        &self,
        app_id: AppInstanceId,
        state: impl Into<Vec<u8>>,
    ) -> Result<StateProposal, ExecutionError> {
        self.alice
            .executor
            .run_update_protocol(self.bob.address(), self.channel_id, app_id, state.into(), None)
            .await
    }

    /// Uninstall `app_id`, paying out the given amounts.
    pub async fn uninstall(
        &self,
        app_id: AppInstanceId,
        alice_payout: u64,
        bob_payout: u64,
    ) -> Result<StateProposal, ExecutionError> {
        let payout = vec![
            PeerBalance::new(self.alice.address(), alice_payout),
            PeerBalance::new(self.bob.address(), bob_payout),
        ];
        self.alice
            .executor
            .run_uninstall_protocol(self.bob.address(), self.channel_id, app_id, payout)
            .await
    }

    /// Both parties' committed view of the fixture channel.
    pub async fn states(&self) -> (Option<ChannelState>, Option<ChannelState>) {
        let alice = self.alice.executor.channel(self.channel_id).await;
        let bob = self.bob.executor.channel(self.channel_id).await;
        (alice, bob)
    }
}

/// Install parameters for a counter app holding the two deposits.
///
/// The app state is a big-endian `u64` counter starting at zero.
pub fn counter_app(a: Address, b: Address, deposit_a: u64, deposit_b: u64) -> InstallData {
    InstallData {
        terms: Terms {
            asset_type: 0,
            limit: deposit_a.saturating_add(deposit_b),
            token: Address::default(),
        },
        app: AppInterface {
            address: Address([0xc0; 20]),
            state_encoding: "tuple(uint64 count)".to_owned(),
            apply_action: [0x11, 0x22, 0x33, 0x44],
            resolve: [0x55, 0x66, 0x77, 0x88],
            turn_taker: [0x99, 0xaa, 0xbb, 0xcc],
            is_state_terminal: [0xdd, 0xee, 0xff, 0x00],
        },
        timeout: 100,
        peer_a: PeerBalance::new(a, deposit_a),
        peer_b: PeerBalance::new(b, deposit_b),
        key_a: a,
        key_b: b,
        encoded_app_state: 0u64.to_be_bytes().to_vec(),
    }
}
