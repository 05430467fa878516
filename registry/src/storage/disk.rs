//! [Storage] backed by the local filesystem.
//!
//! Each partition is a directory below [Config::storage_directory] and each blob a file named
//! by the hex encoding of its name. Positional I/O runs on Tokio's blocking pool.

use super::{validate_partition_name, Error};
use shorthash_words::hex;
use std::{fs::File, io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::{fs, sync::Mutex, task};

/// Configuration for [Storage].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding all partitions.
    pub storage_directory: PathBuf,
}

impl Config {
    pub fn new(storage_directory: PathBuf) -> Self {
        Self { storage_directory }
    }
}

/// Filesystem storage.
#[derive(Clone)]
pub struct Storage {
    lock: Arc<Mutex<()>>,
    cfg: Config,
}

impl Storage {
    pub fn new(cfg: Config) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            cfg,
        }
    }
}

impl super::Storage for Storage {
    type Blob = Blob;

    async fn open(&self, partition: &str, name: &[u8]) -> Result<(Blob, u64), Error> {
        validate_partition_name(partition)?;

        // Acquire the filesystem lock
        let _guard = self.lock.lock().await;

        // Create the partition directory, if it does not exist
        let directory = self.cfg.storage_directory.join(partition);
        fs::create_dir_all(&directory)
            .await
            .map_err(|_| Error::PartitionCreationFailed(partition.into()))?;

        // Open the file in read-write mode, create if it does not exist
        let path = directory.join(hex(name));
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| Error::BlobOpenFailed(partition.into(), hex(name), e))?;
        let len = file.metadata().await.map_err(|_| Error::ReadFailed)?.len();

        // Convert to a blocking std::fs::File to use positional IO
        let file = file.into_std().await;
        Ok((Blob::new(partition.into(), name, file), len))
    }

    async fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        validate_partition_name(partition)?;

        // Acquire the filesystem lock
        let _guard = self.lock.lock().await;

        let path = self.cfg.storage_directory.join(partition);
        if let Some(name) = name {
            fs::remove_file(path.join(hex(name)))
                .await
                .map_err(|_| Error::BlobMissing(partition.into(), hex(name)))?;
        } else {
            fs::remove_dir_all(path)
                .await
                .map_err(|_| Error::PartitionMissing(partition.into()))?;
        }
        Ok(())
    }
}

/// A file opened by [Storage].
#[derive(Clone)]
pub struct Blob {
    partition: String,
    name: Vec<u8>,
    file: Arc<File>,
}

impl Blob {
    fn new(partition: String, name: &[u8], file: File) -> Self {
        Self {
            partition,
            name: name.into(),
            file: Arc::new(file),
        }
    }
}

impl super::Blob for Blob {
    async fn read_at(&self, mut buf: Vec<u8>, offset: u64) -> Result<Vec<u8>, Error> {
        let file = self.file.clone();
        task::spawn_blocking(move || {
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileExt;
                file.read_exact_at(&mut buf, offset).map_err(|e| {
                    if e.kind() == ErrorKind::UnexpectedEof {
                        Error::BlobInsufficientLength
                    } else {
                        Error::ReadFailed
                    }
                })?;
            }
            #[cfg(windows)]
            {
                use std::os::windows::fs::FileExt;
                let mut read = 0;
                while read < buf.len() {
                    let n = file
                        .seek_read(&mut buf[read..], offset + read as u64)
                        .map_err(|_| Error::ReadFailed)?;
                    if n == 0 {
                        return Err(Error::BlobInsufficientLength);
                    }
                    read += n;
                }
            }
            Ok(buf)
        })
        .await
        .map_err(|_| Error::ReadFailed)?
    }

    async fn write_at(&self, buf: Vec<u8>, offset: u64) -> Result<(), Error> {
        let file = self.file.clone();
        task::spawn_blocking(move || {
            #[cfg(unix)]
            {
                use std::os::unix::fs::FileExt;
                file.write_all_at(&buf, offset)
                    .map_err(|_| Error::WriteFailed)?;
            }
            #[cfg(windows)]
            {
                use std::os::windows::fs::FileExt;
                let mut written = 0;
                while written < buf.len() {
                    let n = file
                        .seek_write(&buf[written..], offset + written as u64)
                        .map_err(|_| Error::WriteFailed)?;
                    written += n;
                }
            }
            Ok(())
        })
        .await
        .map_err(|_| Error::WriteFailed)?
    }

    async fn resize(&self, len: u64) -> Result<(), Error> {
        let file = self.file.clone();
        let partition = self.partition.clone();
        let name = self.name.clone();
        task::spawn_blocking(move || {
            file.set_len(len)
                .map_err(|e| Error::BlobResizeFailed(partition, hex(&name), e))
        })
        .await
        .map_err(|_| Error::WriteFailed)?
    }

    async fn sync(&self) -> Result<(), Error> {
        let file = self.file.clone();
        let partition = self.partition.clone();
        let name = self.name.clone();
        task::spawn_blocking(move || {
            file.sync_all()
                .map_err(|e| Error::BlobSyncFailed(partition, hex(&name), e))
        })
        .await
        .map_err(|_| {
            Error::BlobSyncFailed(
                self.partition.clone(),
                hex(&self.name),
                std::io::Error::other("join error"),
            )
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::run_storage_tests;
    use rand::{Rng as _, SeedableRng};
    use shorthash_macros::test_traced;
    use std::env;

    #[test_traced]
    async fn test_storage() {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let storage_directory =
            env::temp_dir().join(format!("shorthash_storage_{}", rng.gen::<u64>()));
        let storage = Storage::new(Config::new(storage_directory.clone()));
        run_storage_tests(storage).await;
        let _ = std::fs::remove_dir_all(storage_directory);
    }
}
