//! SETUP across turmoil's simulated network.
//!
//! Each party runs on its own simulated host and exchanges length-prefixed
//! CBOR frames over TCP, with latency on every link.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tandem_core::{
    ExecutorConfig, InstructionExecutor, Response, ResponseSink, ResponseStatus,
    crypto::{LocalSigner, Signer},
    error::StorageError,
    store::MemoryStorage,
};
use tandem_harness::{ChannelResponseSink, SeededKeys, SimTransport, serve};
use tandem_proto::Address;

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Response>>>);

impl ResponseSink for Recorder {
    fn send_response(&self, response: Response) {
        self.0.lock().unwrap().push(response);
    }
}

fn executor(
    secret: [u8; 32],
    peer: (Address, &str),
    sink: Arc<dyn ResponseSink>,
) -> Result<InstructionExecutor, StorageError> {
    executor_with(ExecutorConfig::default(), secret, peer, sink)
}

fn executor_with(
    config: ExecutorConfig,
    secret: [u8; 32],
    peer: (Address, &str),
    sink: Arc<dyn ResponseSink>,
) -> Result<InstructionExecutor, StorageError> {
    let transport = SimTransport::new(HashMap::from([(peer.0, peer.1.to_owned())]), &config);
    InstructionExecutor::new(
        config,
        Arc::new(LocalSigner::from_secret(secret)),
        Arc::new(transport),
        sink,
        Arc::new(MemoryStorage::new()),
    )
}

#[test]
fn setup_over_simulated_tcp() {
    let mut keys = SeededKeys::new(40);
    let (alice_secret, bob_secret) = (keys.next_secret(), keys.next_secret());
    let alice = LocalSigner::from_secret(alice_secret).address();
    let bob = LocalSigner::from_secret(bob_secret).address();
    let channel = keys.next_channel_id();
    let bob_reports = Recorder::default();

    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(60))
        .min_message_latency(Duration::from_millis(20))
        .max_message_latency(Duration::from_millis(50))
        .build();

    let reports = bob_reports.clone();
    sim.host("bob", move || {
        let reports = reports.clone();
        async move {
            let exec = executor(bob_secret, (alice, "alice"), Arc::new(reports))?;
            serve(exec).await?;
            Ok(())
        }
    });

    let reports = bob_reports.clone();
    sim.client("alice", async move {
        let (sink, _responses) = ChannelResponseSink::new();
        let exec = executor(alice_secret, (bob, "bob"), Arc::new(sink))?;
        tokio::spawn(serve(exec.clone()));

        let proposal = exec.run_setup_protocol(bob, channel).await?;
        let mut parties = [alice, bob];
        parties.sort();
        assert_eq!(proposal.state.participants(), (parties[0], parties[1]));
        assert_eq!(exec.channel(channel).await, Some(proposal.state));
        assert_eq!(exec.commitments(channel)?.len(), 1);

        // The responder commits after its reply is on the wire.
        while reports.0.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    });

    sim.run().unwrap();

    let reports = bob_reports.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].seq, 1);
    assert_eq!(reports[0].status, ResponseStatus::Completed);
}

#[test]
fn unreachable_peer_fails_the_send_step() {
    let mut keys = SeededKeys::new(41);
    let secret = keys.next_secret();
    let nobody = keys.next_signer().address();
    let channel = keys.next_channel_id();

    let mut sim = turmoil::Builder::new().build();
    sim.client("alice", async move {
        let (sink, _responses) = ChannelResponseSink::new();
        let exec = executor(secret, (Address([0xee; 20]), "nowhere"), Arc::new(sink))?;

        let err = exec.run_setup_protocol(nobody, channel).await.unwrap_err();
        assert_eq!(err.step, 3);
        assert!(err.is_retryable());
        assert_eq!(exec.channel(channel).await, None);
        Ok(())
    });
    sim.run().unwrap();
}

#[test]
fn configured_frame_limit_bounds_sends() {
    let mut keys = SeededKeys::new(42);
    let (alice_secret, bob_secret) = (keys.next_secret(), keys.next_secret());
    let alice = LocalSigner::from_secret(alice_secret).address();
    let bob = LocalSigner::from_secret(bob_secret).address();
    let channel = keys.next_channel_id();
    let bob_reports = Recorder::default();

    let mut sim = turmoil::Builder::new().build();
    let reports = bob_reports.clone();
    sim.host("bob", move || {
        let reports = reports.clone();
        async move {
            let exec = executor(bob_secret, (alice, "alice"), Arc::new(reports))?;
            serve(exec).await?;
            Ok(())
        }
    });

    sim.client("alice", async move {
        let (sink, _responses) = ChannelResponseSink::new();
        let config = ExecutorConfig { max_frame_size: 16, ..ExecutorConfig::default() };
        let exec = executor_with(config, alice_secret, (bob, "bob"), Arc::new(sink))?;

        let err = exec.run_setup_protocol(bob, channel).await.unwrap_err();
        assert_eq!(err.step, 3);
        assert!(err.is_retryable());
        assert_eq!(exec.channel(channel).await, None);
        Ok(())
    });
    sim.run().unwrap();

    assert!(bob_reports.0.lock().unwrap().is_empty());
}
