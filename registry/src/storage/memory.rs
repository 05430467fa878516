//! In-memory [Storage] that only retains synced data across re-opens.

use super::{validate_partition_name, Error};
use shorthash_words::hex;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

type Partition = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory storage, primarily used in tests.
///
/// Each [Blob] buffers writes locally and publishes its content to the shared partitions on
/// [crate::storage::Blob::sync], so dropping a blob without syncing behaves like a crash.
#[derive(Clone, Default)]
pub struct Storage {
    partitions: Arc<Mutex<BTreeMap<String, Partition>>>,
}

impl Storage {
    /// Overwrite the persisted content of a blob, bypassing any open handles.
    ///
    /// Used to simulate torn writes and on-disk corruption.
    pub fn overwrite(&self, partition: &str, name: &[u8], content: Vec<u8>) {
        let mut partitions = self.partitions.lock().unwrap();
        partitions
            .entry(partition.into())
            .or_default()
            .insert(name.into(), content);
    }

    /// Return the persisted content of a blob, if any.
    pub fn content(&self, partition: &str, name: &[u8]) -> Option<Vec<u8>> {
        let partitions = self.partitions.lock().unwrap();
        partitions.get(partition)?.get(name).cloned()
    }
}

impl super::Storage for Storage {
    type Blob = Blob;

    async fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        validate_partition_name(partition)?;

        let mut partitions = self.partitions.lock().unwrap();
        let content = partitions
            .entry(partition.into())
            .or_default()
            .entry(name.into())
            .or_default()
            .clone();
        let len = content.len() as u64;
        Ok((
            Blob::new(self.partitions.clone(), partition.into(), name, content),
            len,
        ))
    }

    async fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        validate_partition_name(partition)?;

        let mut partitions = self.partitions.lock().unwrap();
        match name {
            Some(name) => {
                partitions
                    .get_mut(partition)
                    .ok_or(Error::PartitionMissing(partition.into()))?
                    .remove(name)
                    .ok_or(Error::BlobMissing(partition.into(), hex(name)))?;
            }
            None => {
                partitions
                    .remove(partition)
                    .ok_or(Error::PartitionMissing(partition.into()))?;
            }
        }
        Ok(())
    }
}

/// A blob held in memory.
#[derive(Clone)]
pub struct Blob {
    partitions: Arc<Mutex<BTreeMap<String, Partition>>>,
    partition: String,
    name: Vec<u8>,
    content: Arc<RwLock<Vec<u8>>>,
}

impl Blob {
    fn new(
        partitions: Arc<Mutex<BTreeMap<String, Partition>>>,
        partition: String,
        name: &[u8],
        content: Vec<u8>,
    ) -> Self {
        Self {
            partitions,
            partition,
            name: name.into(),
            content: Arc::new(RwLock::new(content)),
        }
    }
}

impl super::Blob for Blob {
    async fn read_at(&self, mut buf: Vec<u8>, offset: u64) -> Result<Vec<u8>, Error> {
        let offset: usize = offset.try_into().map_err(|_| Error::OffsetOverflow)?;
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OffsetOverflow)?;
        let content = self.content.read().unwrap();
        if end > content.len() {
            return Err(Error::BlobInsufficientLength);
        }
        buf.copy_from_slice(&content[offset..end]);
        Ok(buf)
    }

    async fn write_at(&self, buf: Vec<u8>, offset: u64) -> Result<(), Error> {
        let offset: usize = offset.try_into().map_err(|_| Error::OffsetOverflow)?;
        let end = offset
            .checked_add(buf.len())
            .ok_or(Error::OffsetOverflow)?;
        let mut content = self.content.write().unwrap();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(&buf);
        Ok(())
    }

    async fn resize(&self, len: u64) -> Result<(), Error> {
        let len: usize = len.try_into().map_err(|_| Error::OffsetOverflow)?;
        let mut content = self.content.write().unwrap();
        content.resize(len, 0);
        Ok(())
    }

    async fn sync(&self) -> Result<(), Error> {
        let content = self.content.read().unwrap().clone();
        let mut partitions = self.partitions.lock().unwrap();
        let partition = partitions
            .get_mut(&self.partition)
            .ok_or(Error::PartitionMissing(self.partition.clone()))?;
        partition.insert(self.name.clone(), content);
        Ok(())
    }
}
