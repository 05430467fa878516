//! Abstract partitioned blob storage used to persist the registry.
//!
//! A [Storage] opens named [Blob]s inside a partition. Blobs support positional reads and
//! writes, resizing, and an explicit [Blob::sync] that makes all prior writes durable. Data
//! that was written but not synced may be lost if the process crashes.

use std::{future::Future, io::Error as IoError};
use thiserror::Error;

pub mod disk;
#[cfg(test)]
pub(crate) mod faulty;
pub mod memory;

/// Errors that can occur when interacting with [Storage] or a [Blob].
#[derive(Error, Debug)]
pub enum Error {
    #[error("partition name invalid, must only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    PartitionNameInvalid(String),
    #[error("partition creation failed: {0}")]
    PartitionCreationFailed(String),
    #[error("partition missing: {0}")]
    PartitionMissing(String),
    #[error("blob open failed: {0}/{1} error: {2}")]
    BlobOpenFailed(String, String, IoError),
    #[error("blob missing: {0}/{1}")]
    BlobMissing(String, String),
    #[error("blob resize failed: {0}/{1} error: {2}")]
    BlobResizeFailed(String, String, IoError),
    #[error("blob sync failed: {0}/{1} error: {2}")]
    BlobSyncFailed(String, String, IoError),
    #[error("blob insufficient length")]
    BlobInsufficientLength,
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("read failed")]
    ReadFailed,
    #[error("write failed")]
    WriteFailed,
}

/// Interface to open and remove [Blob]s.
pub trait Storage: Clone + Send + Sync + 'static {
    /// The readable/writeable buffer opened by this storage.
    type Blob: Blob;

    /// Open an existing blob in a given partition or create a new one, returning
    /// the blob and its length.
    fn open(
        &self,
        partition: &str,
        name: &[u8],
    ) -> impl Future<Output = Result<(Self::Blob, u64), Error>> + Send;

    /// Remove a blob from a given partition.
    ///
    /// If no `name` is provided, the entire partition is removed.
    fn remove(
        &self,
        partition: &str,
        name: Option<&[u8]>,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Interface to read and write to a blob.
///
/// Cloning a blob shares the underlying handle.
#[allow(clippy::len_without_is_empty)]
pub trait Blob: Clone + Send + Sync + 'static {
    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Returns [Error::BlobInsufficientLength] if the blob ends before `buf` is full.
    fn read_at(
        &self,
        buf: Vec<u8>,
        offset: u64,
    ) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Write `buf` to the blob at the given offset.
    fn write_at(&self, buf: Vec<u8>, offset: u64)
        -> impl Future<Output = Result<(), Error>> + Send;

    /// Resize the blob to the given length.
    ///
    /// If the length is greater than the current length, the blob is extended with zeros.
    fn resize(&self, len: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Ensure all pending data is durably persisted.
    fn sync(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Reject partition names that cannot be safely mapped to a directory.
pub fn validate_partition_name(partition: &str) -> Result<(), Error> {
    if partition.is_empty()
        || partition
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || ['_', '-'].contains(&c)))
    {
        return Err(Error::PartitionNameInvalid(partition.into()));
    }
    Ok(())
}
