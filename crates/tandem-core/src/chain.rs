//! On-chain boundary.
//!
//! The engine knows nothing about contracts. It can hand a mutually signed
//! [`Commitment`] to a [`ChainClient`] and read back what the chain last saw
//! for a channel; everything else (dispute windows, adjudication, nonce
//! registries) lives behind the client.

use async_trait::async_trait;
use tandem_proto::{ChannelId, Digest};

use crate::{error::ChainError, operation::Commitment};

/// Receipt for a submitted commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Hash of the transaction that carried the commitment
    pub transaction_hash: Digest,
}

/// Last state the chain recorded for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OnChainStatus {
    /// Dependency nonce the chain holds
    pub dependency_nonce: u64,
    /// Whether a dispute is open
    pub in_dispute: bool,
    /// Digest of the last commitment the chain accepted
    pub last_digest: Option<Digest>,
}

/// Client for the channel's on-chain contracts.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit the canonical operation bytes together with both signatures.
    async fn submit(&self, commitment: &Commitment) -> Result<Receipt, ChainError>;

    /// What the chain last recorded for `channel_id`.
    async fn query(&self, channel_id: ChannelId) -> Result<OnChainStatus, ChainError>;
}
