//! A single `u64` value overwritten in place across two alternating checksummed [Blob]s.
//!
//! # Format
//!
//! Each slot holds one record:
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 |10 |11 |12 |13 |14 |15 |16 |17 |18 |19 |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! |        Version (u64)          |          Value (u64)          |  CRC32 (u32)  |
//! +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! [Metadata::put] always overwrites the slot that does not hold the latest record, so a
//! write torn by a crash only ever damages the older copy. On [Metadata::init] the valid
//! record with the highest version wins. Storage used is constant regardless of how often
//! the value changes.

use crate::storage::{Blob, Error as SError, Storage};
use bytes::{Buf, BufMut};
use thiserror::Error;
use tracing::{debug, warn};

const BLOB_NAMES: [&[u8]; 2] = [b"left", b"right"];

/// Size of a record.
const RECORD_SIZE: usize = 20;

/// Errors that can occur when interacting with [Metadata].
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] SError),
}

/// A durable value stored in two alternating slots.
pub struct Metadata<B: Blob> {
    blobs: [B; 2],

    /// Slot holding the latest record.
    latest: usize,
    version: u64,
    value: u64,
}

impl<B: Blob> Metadata<B> {
    /// Read the record in `blob`, discarding it if it is torn or fails its checksum.
    async fn verify(blob: &B, len: u64) -> Result<Option<(u64, u64)>, Error> {
        if len == 0 {
            return Ok(None);
        }
        if len != RECORD_SIZE as u64 {
            warn!(len, "invalid record size: ignoring slot");
            return Ok(None);
        }
        let buf = blob.read_at(vec![0u8; RECORD_SIZE], 0).await?;
        let mut record = &buf[..];
        let version = record.get_u64();
        let value = record.get_u64();
        let stored = record.get_u32();
        let computed = crc32fast::hash(&buf[..RECORD_SIZE - 4]);
        if stored != computed {
            warn!(stored, computed, "checksum mismatch: ignoring slot");
            return Ok(None);
        }
        Ok(Some((version, value)))
    }

    /// Open the value stored in `partition`. A missing value reads as 0.
    pub async fn init<S: Storage<Blob = B>>(storage: &S, partition: &str) -> Result<Self, Error> {
        let (left, left_len) = storage.open(partition, BLOB_NAMES[0]).await?;
        let (right, right_len) = storage.open(partition, BLOB_NAMES[1]).await?;
        let left_record = Self::verify(&left, left_len).await?;
        let right_record = Self::verify(&right, right_len).await?;

        let (latest, (version, value)) = match (left_record, right_record) {
            (Some(l), Some(r)) if r.0 > l.0 => (1, r),
            (Some(l), _) => (0, l),
            (None, Some(r)) => (1, r),
            (None, None) => (1, (0, 0)),
        };
        debug!(slot = latest, version, value, "metadata initialized");
        Ok(Self {
            blobs: [left, right],
            latest,
            version,
            value,
        })
    }

    /// The latest durable value.
    pub fn get(&self) -> u64 {
        self.value
    }

    /// Durably replace the value.
    ///
    /// On failure the previous value remains the latest record.
    pub async fn put(&mut self, value: u64) -> Result<(), Error> {
        let target = 1 - self.latest;
        let version = self.version + 1;
        let mut buf = Vec::with_capacity(RECORD_SIZE);
        buf.put_u64(version);
        buf.put_u64(value);
        buf.put_u32(crc32fast::hash(&buf));

        let blob = &self.blobs[target];
        blob.write_at(buf, 0).await?;
        blob.resize(RECORD_SIZE as u64).await?;
        blob.sync().await?;

        self.latest = target;
        self.version = version;
        self.value = value;
        Ok(())
    }

    /// Sync both slots.
    pub async fn sync(&self) -> Result<(), Error> {
        for blob in self.blobs.iter() {
            blob.sync().await?;
        }
        Ok(())
    }
}
