//! An append-only log of checksummed items stored in a single [Blob].
//!
//! # Format
//!
//! ```text
//! +---+---+---+---+---+---+---+---+---+---+---+---+
//! | 0 | 1 | 2 | 3 |    ...    | n | +1| +2| +3| +4|
//! +---+---+---+---+---+---+---+---+---+---+---+---+
//! |   Size (u32)  |   Data    |    CRC32 (u32)    |
//! +---+---+---+---+---+---+---+---+---+---+---+---+
//! ```
//!
//! Items are only considered committed once [Journal::commit] returns, which writes and syncs
//! the item in one step. On [Journal::init], a trailing item that is incomplete or fails its
//! checksum (for example, after a crash mid-write) is truncated away. A crash can only tear the
//! last item, so an invalid item followed by a valid one is reported as [Error::Corrupted]
//! instead.

use crate::storage::{Blob, Error as SError, Storage};
use bytes::{BufMut, Bytes};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the blob holding the journal within its partition.
const BLOB_NAME: &[u8] = b"journal";

/// Bytes of framing around each item (size prefix and checksum suffix).
const FRAME_OVERHEAD: usize = 8;

/// Errors that can occur when interacting with the [Journal].
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] SError),
    #[error("blob too large: {0}")]
    BlobTooLarge(u64),
    #[error("item too large: {0}")]
    ItemTooLarge(usize),
    #[error("invalid item at offset {0} is followed by valid items")]
    Corrupted(u64),
}

/// An append-only, checksummed log.
pub struct Journal<B: Blob> {
    blob: B,

    /// Length of the blob covered by committed items.
    size: u64,

    /// Items recovered during [Journal::init].
    items: Vec<Bytes>,
}

impl<B: Blob> Journal<B> {
    /// Open the journal in `partition`, truncating any partially written trailing item.
    ///
    /// The recovered items are available via [Journal::take_items]. Returns [Error::Corrupted]
    /// if an invalid item is not the last one.
    pub async fn init<S: Storage<Blob = B>>(storage: &S, partition: &str) -> Result<Self, Error> {
        let (blob, len) = storage.open(partition, BLOB_NAME).await?;
        let size: usize = len.try_into().map_err(|_| Error::BlobTooLarge(len))?;
        let data = blob.read_at(vec![0u8; size], 0).await?;

        // Parse items until the end of the blob or the first invalid frame
        let mut items = Vec::new();
        let mut cursor = 0usize;
        while let Some((next, item)) = Self::parse(&data, cursor) {
            items.push(item);
            cursor = next;
        }

        // Remove any trailing garbage
        if cursor != size {
            let next = Self::frame_end(&data, cursor);
            if next.is_some_and(|next| Self::parse(&data, next).is_some()) {
                return Err(Error::Corrupted(cursor as u64));
            }
            warn!(
                new_size = cursor,
                old_size = size,
                "corruption detected: truncating journal"
            );
            blob.resize(cursor as u64).await?;
            blob.sync().await?;
        }
        debug!(items = items.len(), size = cursor, "journal initialized");

        Ok(Self {
            blob,
            size: cursor as u64,
            items,
        })
    }

    /// Parse the item starting at `offset`, returning the offset of the next item.
    fn parse(data: &[u8], offset: usize) -> Option<(usize, Bytes)> {
        let header = data.get(offset..offset.checked_add(4)?)?;
        let len = u32::from_be_bytes(header.try_into().ok()?) as usize;
        let start = offset + 4;
        let end = start.checked_add(len)?;
        let item = data.get(start..end)?;
        let stored = data.get(end..end.checked_add(4)?)?;
        let stored = u32::from_be_bytes(stored.try_into().ok()?);
        if crc32fast::hash(item) != stored {
            return None;
        }
        Some((end + 4, Bytes::copy_from_slice(item)))
    }

    /// Offset just past the item starting at `offset`, if its frame lies within `data`.
    fn frame_end(data: &[u8], offset: usize) -> Option<usize> {
        let header = data.get(offset..offset.checked_add(4)?)?;
        let len = u32::from_be_bytes(header.try_into().ok()?) as usize;
        let end = offset.checked_add(4 + 4)?.checked_add(len)?;
        (end <= data.len()).then_some(end)
    }

    /// Take the items recovered during initialization (in commit order).
    pub fn take_items(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.items)
    }

    /// Durably append `item`.
    ///
    /// If the write or sync fails, the blob is resized back to its previous length so that a
    /// later commit does not land behind a torn item.
    pub async fn commit(&mut self, item: &[u8]) -> Result<(), Error> {
        let len: u32 = item
            .len()
            .try_into()
            .map_err(|_| Error::ItemTooLarge(item.len()))?;
        let mut buf = Vec::with_capacity(item.len() + FRAME_OVERHEAD);
        buf.put_u32(len);
        buf.put_slice(item);
        buf.put_u32(crc32fast::hash(item));
        let framed = buf.len() as u64;

        let result = match self.blob.write_at(buf, self.size).await {
            Ok(()) => self.blob.sync().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(?err, size = self.size, "commit failed: rolling back");
            if let Err(rollback) = self.blob.resize(self.size).await {
                warn!(?rollback, "rollback failed");
            }
            return Err(err.into());
        }

        self.size += framed;
        Ok(())
    }

    /// Length of the journal in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Sync the underlying blob.
    pub async fn sync(&self) -> Result<(), Error> {
        self.blob.sync().await.map_err(Error::Storage)
    }

    /// Sync and close the journal.
    pub async fn close(self) -> Result<(), Error> {
        self.sync().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{faulty, memory};
    use shorthash_macros::test_traced;

    const PARTITION: &str = "journal_test";

    #[test_traced]
    async fn test_commit_and_replay() {
        let storage = memory::Storage::default();
        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        assert!(journal.take_items().is_empty());

        journal.commit(b"first").await.unwrap();
        journal.commit(b"").await.unwrap();
        journal.commit(b"third item").await.unwrap();
        assert_eq!(journal.size(), (5 + 0 + 10 + 3 * FRAME_OVERHEAD) as u64);
        journal.close().await.unwrap();

        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        let items = journal.take_items();
        assert_eq!(
            items,
            vec![
                Bytes::from_static(b"first"),
                Bytes::new(),
                Bytes::from_static(b"third item"),
            ]
        );
    }

    #[test_traced]
    async fn test_truncates_torn_tail() {
        let storage = memory::Storage::default();
        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        journal.commit(b"kept").await.unwrap();
        let size = journal.size();
        drop(journal);

        // Simulate a crash that left half of an item behind
        let mut content = storage.content(PARTITION, BLOB_NAME).unwrap();
        content.extend_from_slice(&[0, 0, 0, 9, b'p', b'a', b'r']);
        storage.overwrite(PARTITION, BLOB_NAME, content);

        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        assert_eq!(journal.take_items(), vec![Bytes::from_static(b"kept")]);
        assert_eq!(journal.size(), size);
        assert_eq!(
            storage.content(PARTITION, BLOB_NAME).unwrap().len() as u64,
            size
        );

        // New commits land directly after the last valid item
        journal.commit(b"next").await.unwrap();
        drop(journal);
        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        assert_eq!(
            journal.take_items(),
            vec![Bytes::from_static(b"kept"), Bytes::from_static(b"next")]
        );
    }

    #[test_traced]
    async fn test_checksum_mismatch_in_last_item_truncates() {
        let storage = memory::Storage::default();
        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        journal.commit(b"one").await.unwrap();
        journal.commit(b"two").await.unwrap();
        drop(journal);

        // Flip a byte inside the last item
        let mut content = storage.content(PARTITION, BLOB_NAME).unwrap();
        let second = 3 + FRAME_OVERHEAD + 4;
        content[second] ^= 0xff;
        storage.overwrite(PARTITION, BLOB_NAME, content);

        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        assert_eq!(journal.take_items(), vec![Bytes::from_static(b"one")]);
        assert_eq!(journal.size(), (3 + FRAME_OVERHEAD) as u64);
    }

    #[test_traced]
    async fn test_checksum_mismatch_before_valid_item_is_corruption() {
        let storage = memory::Storage::default();
        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        journal.commit(b"one").await.unwrap();
        journal.commit(b"two").await.unwrap();
        journal.commit(b"three").await.unwrap();
        drop(journal);

        // Flip a byte inside the second item
        let mut content = storage.content(PARTITION, BLOB_NAME).unwrap();
        let second = 3 + FRAME_OVERHEAD + 4;
        content[second] ^= 0xff;
        storage.overwrite(PARTITION, BLOB_NAME, content.clone());

        assert!(matches!(
            Journal::init(&storage, PARTITION).await,
            Err(Error::Corrupted(offset)) if offset == (3 + FRAME_OVERHEAD) as u64
        ));

        // Nothing was truncated
        assert_eq!(storage.content(PARTITION, BLOB_NAME).unwrap(), content);
    }

    #[test_traced]
    async fn test_failed_commit_rolls_back() {
        let storage = faulty::Storage::new(memory::Storage::default());
        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        journal.commit(b"before").await.unwrap();
        let size = journal.size();

        storage.fail(true);
        assert!(matches!(
            journal.commit(b"during").await,
            Err(Error::Storage(SError::WriteFailed))
        ));
        assert_eq!(journal.size(), size);

        storage.fail(false);
        journal.commit(b"after").await.unwrap();
        drop(journal);

        let mut journal = Journal::init(&storage, PARTITION).await.unwrap();
        assert_eq!(
            journal.take_items(),
            vec![Bytes::from_static(b"before"), Bytes::from_static(b"after")]
        );
    }
}
