//! Durable [`Storage`] on redb.
//!
//! # Tables
//!
//! ```text
//! channels     channel id (20 bytes)              -> CBOR(ChannelState)
//! commitments  channel id ++ index (u64, BE)      -> CBOR(Commitment)
//! heads        channel id (20 bytes)              -> next commitment index
//! ```
//!
//! The big-endian index keeps a channel's commitments contiguous and in
//! append order, so history is a single range scan. Every
//! [`Storage::commit`] is one write transaction.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Serialize, de::DeserializeOwned};
use tandem_core::{
    channel::ChannelState, error::StorageError, operation::Commitment, store::Storage,
};
use tandem_proto::ChannelId;

const CHANNELS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("channels");
const COMMITMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("commitments");
const HEADS: TableDefinition<&[u8], u64> = TableDefinition::new("heads");

/// Channel state and commitment history in a redb file.
pub struct RedbStorage {
    db: Database,
}

impl RedbStorage {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path).map_err(backend)?;
        Ok(Self { db })
    }
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}

fn commitment_key(channel_id: ChannelId, index: u64) -> [u8; 28] {
    let mut key = [0u8; 28];
    key[..20].copy_from_slice(channel_id.as_bytes());
    key[20..].copy_from_slice(&index.to_be_bytes());
    key
}

fn backend(error: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(error.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| StorageError::Codec(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::de::from_reader(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}

impl Storage for RedbStorage {
    fn commit(
        &self,
        state: &ChannelState,
        commitment: Option<&Commitment>,
    ) -> Result<(), StorageError> {
        let id = state.channel_id;
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut channels = txn.open_table(CHANNELS).map_err(backend)?;
            let value = encode(state)?;
            channels.insert(id.as_bytes().as_slice(), value.as_slice()).map_err(backend)?;

            if let Some(commitment) = commitment {
                let mut heads = txn.open_table(HEADS).map_err(backend)?;
                let index = heads
                    .get(id.as_bytes().as_slice())
                    .map_err(backend)?
                    .map_or(0, |head| head.value());
                let mut commitments = txn.open_table(COMMITMENTS).map_err(backend)?;
                let (key, value) = (commitment_key(id, index), encode(commitment)?);
                commitments.insert(key.as_slice(), value.as_slice()).map_err(backend)?;
                heads.insert(id.as_bytes().as_slice(), index + 1).map_err(backend)?;
            }
        }
        txn.commit().map_err(backend)
    }

    fn load_channels(&self) -> Result<Vec<ChannelState>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = match txn.open_table(CHANNELS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(backend(e)),
        };

        let mut out = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (_, value) = entry.map_err(backend)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    fn load_commitments(&self, channel_id: ChannelId) -> Result<Vec<Commitment>, StorageError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = match txn.open_table(COMMITMENTS) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(backend(e)),
        };

        let start = commitment_key(channel_id, 0);
        let end = commitment_key(channel_id, u64::MAX);
        let mut out = Vec::new();
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(backend)? {
            let (_, value) = entry.map_err(backend)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }
}
