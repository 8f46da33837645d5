//! Off-chain state store.
//!
//! Channels live in an arena of per-channel entries, each behind its own async
//! mutex. A round locks its channel for its whole lifetime, WAIT included, so
//! two rounds on one channel run one after the other while rounds on other
//! channels proceed untouched.
//!
//! Both parties initiating on one channel at once would otherwise each hold
//! their own lock waiting for a reply the other cannot send. A responder round
//! therefore refuses a channel on which a local initiator round held the lock
//! at any point while the responder was queued; both initiators time out and
//! neither side commits the other's proposal late.
//!
//! COMMIT never writes the store directly. It stages the candidate state on the
//! locked [`ChannelEntry`]; the interpreter applies the staged commit only
//! after the final step succeeds and discards it on any failure. Applying
//! persists through [`Storage`] first and swaps the in-memory state second, so
//! a storage failure leaves both untouched.

use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tandem_proto::ChannelId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    channel::ChannelState,
    error::{ProtocolViolation, StorageError},
    flow::Role,
    operation::Commitment,
};

/// Durable persistence for channel state and commitments.
///
/// Implementations must apply [`Storage::commit`] atomically: either the new
/// state and its commitment are both durable, or neither is.
pub trait Storage: Send + Sync {
    /// Persist `state`, replacing the channel's previous state, and append
    /// `commitment` to its history if present.
    fn commit(
        &self,
        state: &ChannelState,
        commitment: Option<&Commitment>,
    ) -> Result<(), StorageError>;

    /// Every persisted channel.
    fn load_channels(&self) -> Result<Vec<ChannelState>, StorageError>;

    /// Commitment history of one channel, oldest first.
    fn load_commitments(&self, channel_id: ChannelId) -> Result<Vec<Commitment>, StorageError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    channels: HashMap<ChannelId, ChannelState>,
    commitments: HashMap<ChannelId, Vec<Commitment>>,
}

/// [`Storage`] held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn commit(
        &self,
        state: &ChannelState,
        commitment: Option<&Commitment>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.channels.insert(state.channel_id, state.clone());
        if let Some(commitment) = commitment {
            inner.commitments.entry(state.channel_id).or_default().push(commitment.clone());
        }
        Ok(())
    }

    fn load_channels(&self) -> Result<Vec<ChannelState>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.channels.values().cloned().collect())
    }

    fn load_commitments(&self, channel_id: ChannelId) -> Result<Vec<Commitment>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.commitments.get(&channel_id).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
struct StagedCommit {
    state: ChannelState,
    commitment: Option<Commitment>,
}

/// One channel's slot in the store, handed to handlers while locked.
#[derive(Debug)]
pub struct ChannelEntry {
    channel_id: ChannelId,
    state: Option<ChannelState>,
    staged: Option<StagedCommit>,
}

impl ChannelEntry {
    fn new(channel_id: ChannelId, state: Option<ChannelState>) -> Self {
        Self { channel_id, state, staged: None }
    }

    /// Channel the entry holds.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Committed state, `None` before SETUP.
    pub fn state(&self) -> Option<&ChannelState> {
        self.state.as_ref()
    }

    /// Stage `state` to replace the committed state when the round succeeds.
    pub fn stage(&mut self, state: ChannelState, commitment: Option<Commitment>) {
        self.staged = Some(StagedCommit { state, commitment });
    }

    /// Whether a commit is staged.
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }

    /// Drop any staged commit. Returns whether one was staged.
    pub fn discard(&mut self) -> bool {
        self.staged.take().is_some()
    }

    /// Persist and install the staged commit, if any.
    ///
    /// On error the committed state is unchanged and the staged commit is
    /// dropped.
    pub(crate) fn apply(&mut self, storage: &dyn Storage) -> Result<bool, StorageError> {
        let Some(staged) = self.staged.take() else {
            return Ok(false);
        };
        storage.commit(&staged.state, staged.commitment.as_ref())?;
        self.state = Some(staged.state);
        Ok(true)
    }

    /// Replace the committed state outright, bypassing any round.
    pub(crate) fn import(
        &mut self,
        state: ChannelState,
        storage: &dyn Storage,
    ) -> Result<(), StorageError> {
        storage.commit(&state, None)?;
        self.staged = None;
        self.state = Some(state);
        Ok(())
    }
}

struct Slot {
    entry: Arc<AsyncMutex<ChannelEntry>>,
    initiating: AtomicBool,
    initiations: AtomicU64,
}

impl Slot {
    fn new(channel_id: ChannelId, state: Option<ChannelState>) -> Arc<Self> {
        Arc::new(Self {
            entry: Arc::new(AsyncMutex::new(ChannelEntry::new(channel_id, state))),
            initiating: AtomicBool::new(false),
            initiations: AtomicU64::new(0),
        })
    }
}

/// Channel lock held by a running round.
pub struct RoundGuard {
    entry: OwnedMutexGuard<ChannelEntry>,
    initiator: Option<Arc<Slot>>,
}

impl Deref for RoundGuard {
    type Target = ChannelEntry;

    fn deref(&self) -> &ChannelEntry {
        &self.entry
    }
}

impl DerefMut for RoundGuard {
    fn deref_mut(&mut self) -> &mut ChannelEntry {
        &mut self.entry
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        if let Some(slot) = &self.initiator {
            slot.initiating.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for RoundGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundGuard")
            .field("entry", &*self.entry)
            .field("initiator", &self.initiator.is_some())
            .finish()
    }
}

/// Arena of per-channel locked entries over a [`Storage`] backend.
pub struct ChannelStore {
    entries: Mutex<HashMap<ChannelId, Arc<Slot>>>,
    storage: Arc<dyn Storage>,
}

impl ChannelStore {
    /// Open the store, loading every channel the backend holds.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self, StorageError> {
        let entries = storage
            .load_channels()?
            .into_iter()
            .map(|state| (state.channel_id, Slot::new(state.channel_id, Some(state))))
            .collect();
        Ok(Self { entries: Mutex::new(entries), storage })
    }

    fn slot(&self, channel_id: ChannelId) -> Arc<Slot> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(channel_id).or_insert_with(|| Slot::new(channel_id, None)))
    }

    /// Lock one channel, creating an empty entry if it is unknown.
    ///
    /// The guard is owned so it can be held across the awaits of a round.
    pub async fn lock(&self, channel_id: ChannelId) -> OwnedMutexGuard<ChannelEntry> {
        let slot = self.slot(channel_id);
        Arc::clone(&slot.entry).lock_owned().await
    }

    /// Lock one channel for a round run as `role`.
    ///
    /// A responder is refused if a local initiator round held the channel
    /// when it arrived or took the channel while it was queued.
    pub async fn lock_round(
        &self,
        channel_id: ChannelId,
        role: Role,
    ) -> Result<RoundGuard, ProtocolViolation> {
        let slot = self.slot(channel_id);
        match role {
            Role::Initiator => {
                let entry = Arc::clone(&slot.entry).lock_owned().await;
                slot.initiations.fetch_add(1, Ordering::AcqRel);
                slot.initiating.store(true, Ordering::Release);
                Ok(RoundGuard { entry, initiator: Some(slot) })
            },
            Role::Responder => {
                let seen = slot.initiations.load(Ordering::Acquire);
                let busy = slot.initiating.load(Ordering::Acquire);
                let entry = Arc::clone(&slot.entry).lock_owned().await;
                if busy || slot.initiations.load(Ordering::Acquire) != seen {
                    return Err(ProtocolViolation::ConcurrentRound(channel_id));
                }
                Ok(RoundGuard { entry, initiator: None })
            },
        }
    }

    /// Committed state of a channel, waiting for any in-flight round on it.
    pub async fn snapshot(&self, channel_id: ChannelId) -> Option<ChannelState> {
        let entry = {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(&entries.get(&channel_id)?.entry)
        };
        let guard = entry.lock().await;
        guard.state().cloned()
    }

    /// Replace a channel's state with externally observed state.
    pub async fn import(&self, state: ChannelState) -> Result<(), StorageError> {
        let mut entry = self.lock(state.channel_id).await;
        entry.import(state, self.storage.as_ref())
    }

    /// Persistence backend.
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.entries.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("ChannelStore").field("channels", &channels).finish_non_exhaustive()
    }
}
