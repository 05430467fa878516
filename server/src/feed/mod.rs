//! Sources of addresses to ingest.
//!
//! A [Feed] supplies blocks in increasing order. [rpc::Client] reads them from an Ethereum
//! JSON-RPC endpoint and [genesis] reads the accounts allocated before the first block.

use std::future::Future;
use thiserror::Error;

pub mod genesis;
pub mod rpc;

/// Errors that can occur when reading from a [Feed].
#[derive(Debug, Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("block {0} not available")]
    MissingBlock(u64),
    #[error("could not read genesis: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse genesis: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid genesis allocation: {0}")]
    InvalidGenesis(String),
}

/// A transaction, reduced to the addresses it touches.
///
/// Values are kept as supplied by the feed and parsed during ingestion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl Transaction {
    /// The non-empty addresses of the transaction, `from` before `to`.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        [self.from.as_deref(), self.to.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

/// A block and its transactions, in block order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub transactions: Vec<Transaction>,
}

/// Interface to a chain that can be read block by block.
pub trait Feed: Send + Sync + 'static {
    /// Number of the latest block available.
    fn latest_block(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Fetch block `number`.
    fn block(&self, number: u64) -> impl Future<Output = Result<Block, Error>> + Send;
}
