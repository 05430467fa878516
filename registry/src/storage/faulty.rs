//! [Storage] wrapper that fails writes on demand.

use super::Error;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Wraps another [super::Storage] and fails `write_at` and `sync` while faults are enabled.
///
/// A failing `write_at` still applies the first half of the buffer to model a torn write.
#[derive(Clone)]
pub(crate) struct Storage<S: super::Storage> {
    inner: S,
    failing: Arc<AtomicBool>,
}

impl<S: super::Storage> Storage<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl<S: super::Storage> super::Storage for Storage<S> {
    type Blob = Blob<S::Blob>;

    async fn open(&self, partition: &str, name: &[u8]) -> Result<(Self::Blob, u64), Error> {
        let (blob, len) = self.inner.open(partition, name).await?;
        Ok((
            Blob {
                inner: blob,
                failing: self.failing.clone(),
            },
            len,
        ))
    }

    async fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        self.inner.remove(partition, name).await
    }
}

#[derive(Clone)]
pub(crate) struct Blob<B: super::Blob> {
    inner: B,
    failing: Arc<AtomicBool>,
}

impl<B: super::Blob> super::Blob for Blob<B> {
    async fn read_at(&self, buf: Vec<u8>, offset: u64) -> Result<Vec<u8>, Error> {
        self.inner.read_at(buf, offset).await
    }

    async fn write_at(&self, mut buf: Vec<u8>, offset: u64) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            buf.truncate(buf.len() / 2);
            self.inner.write_at(buf, offset).await?;
            return Err(Error::WriteFailed);
        }
        self.inner.write_at(buf, offset).await
    }

    async fn resize(&self, len: u64) -> Result<(), Error> {
        self.inner.resize(len).await
    }

    async fn sync(&self) -> Result<(), Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::WriteFailed);
        }
        self.inner.sync().await
    }
}
