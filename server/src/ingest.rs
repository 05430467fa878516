//! Feed addresses from a [Feed] to an [Assigner], block by block.
//!
//! # Ordering
//!
//! Collision outcomes depend on the order in which addresses arrive, so addresses are assigned
//! strictly in block order and, within a block, in transaction order (`from` before `to`).
//! Genesis allocations are assigned (in ascending address order) before block 0, and only when
//! the persisted cursor is 0.
//!
//! # Durability
//!
//! The cursor is advanced only after every address of a block has been committed. A restart
//! resumes from the persisted cursor and re-assigns the addresses of a partially ingested block,
//! which is a no-op for addresses that were already committed.

use crate::feed::{self, Block, Feed};
use shorthash_assigner::{Assigner, Assignment};
use shorthash_registry::storage::Storage;
use shorthash_words::Address;
use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during ingestion.
#[derive(Debug, Error)]
pub enum Error {
    #[error("feed error: {0}")]
    Feed(#[from] feed::Error),
    #[error("assigner error: {0}")]
    Assigner(#[from] shorthash_assigner::Error),
    #[error("registry error: {0}")]
    Registry(#[from] shorthash_registry::Error),
}

impl Error {
    /// Whether ingestion must stop. Other errors are retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Feed(_) => false,
            Error::Assigner(err) => err.is_fatal(),
            Error::Registry(err) => err.is_fatal(),
        }
    }
}

/// Configuration for [IngestionState].
#[derive(Clone, Debug)]
pub struct Config {
    /// Accounts to assign before block 0.
    pub genesis: Vec<Address>,

    /// Time to wait before polling for a new block once caught up.
    pub poll_interval: Duration,

    /// Delay before the first retry of a failed request.
    pub retry_initial: Duration,

    /// Upper bound on the delay between retries.
    pub retry_max: Duration,

    /// Stop once this block has been ingested.
    pub stop_at: Option<u64>,
}

/// Result of a single [IngestionState::step].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The block with this number was ingested.
    Ingested(u64),

    /// No new block is available.
    CaughtUp,

    /// The configured stopping block has been ingested.
    Stopped,
}

/// Tracks the next block to ingest.
pub struct IngestionState<S: Storage, F: Feed> {
    cursor: u64,
    latest: Option<u64>,
    assigner: Assigner<S>,
    feed: F,
    cfg: Config,
}

impl<S: Storage, F: Feed> IngestionState<S, F> {
    /// Resume from the cursor persisted in the assigner's registry.
    pub async fn init(assigner: Assigner<S>, feed: F, cfg: Config) -> Self {
        let cursor = assigner.registry().current_block_cursor().await;
        info!(cursor, genesis = cfg.genesis.len(), "resuming ingestion");
        Self {
            cursor,
            latest: None,
            assigner,
            feed,
            cfg,
        }
    }

    /// Next block to ingest.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Run `op` until it succeeds or fails with a fatal error, backing off exponentially.
    async fn retry<T, Fut>(&self, what: &'static str, mut op: impl FnMut() -> Fut) -> Result<T, Error>
    where
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut delay = self.cfg.retry_initial;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(what, ?err, ?delay, "transient failure");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.cfg.retry_max);
                }
            }
        }
    }

    async fn assign(&self, address: &Address) -> Result<(), Error> {
        let assignment = self
            .retry("assign", || async move {
                self.assigner.assign(address).await.map_err(Error::from)
            })
            .await?;
        if let Assignment::Resolved { displaced, .. } = &assignment {
            debug!(
                address = %address,
                displaced = %displaced.address(),
                "lengthened shorthashes"
            );
        }
        Ok(())
    }

    /// Assign the genesis allocations if no block has been ingested yet.
    pub async fn ingest_genesis(&self) -> Result<(), Error> {
        if self.cursor != 0 || self.cfg.genesis.is_empty() {
            return Ok(());
        }
        for address in self.cfg.genesis.iter() {
            self.assign(address).await?;
        }
        info!(accounts = self.cfg.genesis.len(), "ingested genesis");
        Ok(())
    }

    async fn ingest_block(&mut self, block: Block) -> Result<(), Error> {
        let mut addresses = 0;
        for transaction in block.transactions.iter() {
            for value in transaction.addresses() {
                let address: Address = match value.parse() {
                    Ok(address) => address,
                    Err(err) => {
                        warn!(block = block.number, value, ?err, "skipping malformed address");
                        continue;
                    }
                };
                self.assign(&address).await?;
                addresses += 1;
            }
        }

        let next = block.number + 1;
        let registry = self.assigner.registry();
        self.retry("advance cursor", || async move {
            registry.advance_cursor(next).await.map_err(Error::from)
        })
        .await?;
        self.cursor = next;
        debug!(block = block.number, addresses, "ingested block");
        Ok(())
    }

    /// Ingest the next block, if one is available.
    pub async fn step(&mut self) -> Result<Progress, Error> {
        if let Some(stop_at) = self.cfg.stop_at {
            if self.cursor > stop_at {
                return Ok(Progress::Stopped);
            }
        }

        // Only poll for the latest block once every known block is ingested
        if !matches!(self.latest, Some(latest) if self.cursor <= latest) {
            let feed = &self.feed;
            let latest = self
                .retry("latest block", || async move {
                    feed.latest_block().await.map_err(Error::from)
                })
                .await?;
            self.latest = Some(latest);
            if self.cursor > latest {
                return Ok(Progress::CaughtUp);
            }
        }

        let number = self.cursor;
        let feed = &self.feed;
        let block = self
            .retry("block", || async move {
                feed.block(number).await.map_err(Error::from)
            })
            .await?;
        self.ingest_block(block).await?;
        Ok(Progress::Ingested(number))
    }

    /// Ingest blocks until the stopping block is reached or a fatal error occurs.
    pub async fn run(mut self) -> Result<(), Error> {
        self.ingest_genesis().await?;
        loop {
            match self.step().await? {
                Progress::Ingested(_) => tokio::task::yield_now().await,
                Progress::CaughtUp => tokio::time::sleep(self.cfg.poll_interval).await,
                Progress::Stopped => {
                    info!(cursor = self.cursor, "reached stopping block");
                    return Ok(());
                }
            }
        }
    }
}
