//! Channel lifecycle between two in-process parties.
//!
//! Alice and Bob each run their own [`InstructionExecutor`]. Their transports
//! are the two ends of a pair of tokio channels, with one task per party
//! pumping inbound envelopes into [`InstructionExecutor::receive`].
//!
//! ```text
//! alice ── PeerLink ──▶ bob inbox ──▶ pump ──▶ bob.receive
//!   ▲                                              │
//!   └── alice.receive ◀── pump ◀── alice inbox ◀── PeerLink
//! ```
//!
//! With a data directory each party persists to its own redb file, and a
//! rerun with the same seed resumes the channel instead of opening it again.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tandem_core::{
    ExecutorConfig, InstructionExecutor, Response, ResponseSink, ResponseStatus,
    channel::ChannelState,
    crypto::LocalSigner,
    error::TransportError,
    store::{MemoryStorage, Storage},
    transport::Transport,
};
use tandem_proto::{
    Address, AppInterface, ChannelId, ClientActionMessage, Digest, InstallData, PeerBalance, Terms,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

use crate::{error::NodeError, storage::RedbStorage};

/// Demo parameters.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// WAIT timeout for both parties
    pub wait_timeout: Duration,
    /// Seed for both keys and the channel id
    pub seed: u64,
    /// Number of UPDATE rounds
    pub moves: u64,
    /// Directory for the parties' redb files; in memory when absent
    pub data_dir: Option<PathBuf>,
    /// Free balance each party is funded with when the channel opens
    pub funding: (u64, u64),
    /// Amount each party stakes in the app
    pub stake: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            seed: 1,
            moves: 5,
            data_dir: None,
            funding: (10, 5),
            stake: 2,
        }
    }
}

/// Where the channel ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    /// Channel the demo ran on
    pub channel_id: ChannelId,
    /// Alice's address
    pub alice: Address,
    /// Bob's address
    pub bob: Address,
    /// Free balance of Alice and Bob after UNINSTALL
    pub free_balance: (u64, u64),
    /// Commitments Alice holds for the channel
    pub commitments: usize,
    /// Whether Bob's committed state matches Alice's
    pub converged: bool,
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "channel  {}", self.channel_id)?;
        writeln!(f, "alice    {}  free balance {}", self.alice, self.free_balance.0)?;
        writeln!(f, "bob      {}  free balance {}", self.bob, self.free_balance.1)?;
        write!(f, "commitments {}, converged {}", self.commitments, self.converged)
    }
}

struct PeerLink(mpsc::UnboundedSender<ClientActionMessage>);

#[async_trait]
impl Transport for PeerLink {
    async fn send(&self, message: ClientActionMessage) -> Result<(), TransportError> {
        self.0.send(message).map_err(|_| TransportError::Closed)
    }
}

struct LogSink(&'static str);

impl ResponseSink for LogSink {
    fn send_response(&self, response: Response) {
        let Response { protocol, channel_id, seq, status } = response;
        match status {
            ResponseStatus::Completed => {
                info!(party = self.0, %protocol, seq, channel = %channel_id, "round completed");
            },
            ResponseStatus::Failed { reason } => {
                warn!(
                    party = self.0,
                    %protocol,
                    seq,
                    channel = %channel_id,
                    %reason,
                    "round failed"
                );
            },
        }
    }
}

fn storage(dir: Option<&Path>, party: &str) -> Result<Arc<dyn Storage>, NodeError> {
    let Some(dir) = dir else {
        return Ok(Arc::new(MemoryStorage::new()));
    };
    std::fs::create_dir_all(dir)?;
    Ok(Arc::new(RedbStorage::open(dir.join(format!("{party}.redb")))?))
}

fn pump(
    executor: InstructionExecutor,
    mut inbox: mpsc::UnboundedReceiver<ClientActionMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            executor.receive(message);
        }
    })
}

fn secret(rng: &mut ChaCha8Rng) -> [u8; 32] {
    let mut secret = [0u8; 32];
    rng.fill_bytes(&mut secret);
    secret
}

fn counter_install(a: Address, b: Address, stake: u64) -> InstallData {
    InstallData {
        terms: Terms { asset_type: 0, limit: stake.saturating_mul(2), token: Address::default() },
        app: AppInterface {
            address: Address([0xc0; 20]),
            state_encoding: "tuple(uint64 count)".to_owned(),
            apply_action: [0x01, 0x02, 0x03, 0x04],
            resolve: [0x05, 0x06, 0x07, 0x08],
            turn_taker: [0x09, 0x0a, 0x0b, 0x0c],
            is_state_terminal: [0x0d, 0x0e, 0x0f, 0x10],
        },
        timeout: 100,
        peer_a: PeerBalance::new(a, stake),
        peer_b: PeerBalance::new(b, stake),
        key_a: a,
        key_b: b,
        encoded_app_state: 0u64.to_be_bytes().to_vec(),
    }
}

/// Run SETUP (unless the channel was restored), funding, INSTALL,
/// `config.moves` UPDATEs and an UNINSTALL paying the whole app to Alice.
pub async fn run(config: &DemoConfig) -> Result<DemoReport, NodeError> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let (alice_secret, bob_secret) = (secret(&mut rng), secret(&mut rng));
    let mut id = [0u8; 20];
    rng.fill_bytes(&mut id);
    let channel_id = ChannelId(id);

    let executor_config =
        ExecutorConfig { wait_timeout: config.wait_timeout, ..ExecutorConfig::default() };
    let (to_alice, alice_inbox) = mpsc::unbounded_channel();
    let (to_bob, bob_inbox) = mpsc::unbounded_channel();
    let dir = config.data_dir.as_deref();

    let alice = InstructionExecutor::new(
        executor_config.clone(),
        Arc::new(LocalSigner::from_secret(alice_secret)),
        Arc::new(PeerLink(to_bob)),
        Arc::new(LogSink("alice")),
        storage(dir, "alice")?,
    )?;
    let bob = InstructionExecutor::new(
        executor_config,
        Arc::new(LocalSigner::from_secret(bob_secret)),
        Arc::new(PeerLink(to_alice)),
        Arc::new(LogSink("bob")),
        storage(dir, "bob")?,
    )?;
    let pumps = [pump(alice.clone(), alice_inbox), pump(bob.clone(), bob_inbox)];

    let result = lifecycle(config, &alice, &bob, channel_id).await;
    for pump in pumps {
        pump.abort();
        // Cancelled; the pump's executor handle is gone once this resolves.
        let _ = pump.await;
    }
    alice.idle().await;
    bob.idle().await;
    result
}

async fn lifecycle(
    config: &DemoConfig,
    alice: &InstructionExecutor,
    bob: &InstructionExecutor,
    channel_id: ChannelId,
) -> Result<DemoReport, NodeError> {
    let (a, b) = (alice.address(), bob.address());

    if alice.channel(channel_id).await.is_none() {
        alice.run_setup_protocol(b, channel_id).await?;
        let funded = ChannelState::new(channel_id, a, b).with_free_balance(
            PeerBalance::new(a, config.funding.0),
            PeerBalance::new(b, config.funding.1),
        );
        alice.import_channel(funded.clone()).await?;
        bob.import_channel(funded).await?;
        info!(channel = %channel_id, "channel opened and funded");
    } else {
        info!(channel = %channel_id, "resuming stored channel");
    }

    let install = counter_install(a, b, config.stake);
    let app_id = alice
        .run_install_protocol(b, channel_id, install)
        .await?
        .app_id
        .ok_or(NodeError::MissingApp)?;

    for count in 1..=config.moves {
        let state = count.to_be_bytes().to_vec();
        let hash = Digest::of(&state);
        alice.run_update_protocol(b, channel_id, app_id, state, Some(hash)).await?;
    }

    let payout = vec![PeerBalance::new(a, config.stake.saturating_mul(2)), PeerBalance::new(b, 0)];
    let settled = alice.run_uninstall_protocol(b, channel_id, app_id, payout).await?.state;
    let converged = bob.channel(channel_id).await.as_ref() == Some(&settled);

    Ok(DemoReport {
        channel_id,
        alice: a,
        bob: b,
        free_balance: (
            settled.free_balance_of(a).unwrap_or_default(),
            settled.free_balance_of(b).unwrap_or_default(),
        ),
        commitments: alice.commitments(channel_id)?.len(),
        converged,
    })
}
