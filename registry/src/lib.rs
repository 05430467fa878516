//! Persist shorthash assignments, reserved prefixes, and the ingestion cursor.
//!
//! The [Registry] holds every committed [Account] (indexed by shorthash, by address, and by
//! display prefix), the set of reserved prefixes that may never be assigned, and the next block
//! to ingest. Every mutation of accounts or reserved prefixes is a single transaction: it is
//! validated against the current view, written to a checksummed [journal] as one item, synced,
//! and only then applied to the in-memory view. A crash at any point leaves either the state
//! before or after the transaction. The cursor is kept apart from the journal in fixed-size
//! [metadata] slots that are overwritten in place.
//!
//! # Invariants
//!
//! Before any transaction is written, the registry checks that it preserves:
//!
//! * each address has at most one account and each shorthash belongs to exactly one account;
//! * no account's shorthash is a prefix of another account's word sequence;
//! * no assigned shorthash is a reserved prefix.
//!
//! Transactions that would break one of these are refused with a fatal [Error].
//!
//! # Concurrency
//!
//! [Registry] is a cheaply cloneable handle. Reads take a shared lock for the duration of a
//! single lookup. Writers serialize on the journal and only take the exclusive lock to swap in
//! the result of a durable transaction, so readers never observe a partial transaction.
//!
//! # Example
//!
//! ```rust
//! use shorthash_registry::{storage::memory, Account, Config, Registry};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let registry = Registry::init(memory::Storage::default(), Config::new("registry"))
//!     .await
//!     .unwrap();
//!
//! let address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
//! registry
//!     .commit_new_account(Account::new(address, 2).unwrap())
//!     .await
//!     .unwrap();
//!
//! let account = registry.lookup_by_address(&address).await.unwrap();
//! assert_eq!(account.shorthash().to_string(), "slender survey");
//! # });
//! ```

use prometheus_client::registry::Registry as PrometheusRegistry;
use shorthash_words::{Address, Prefix, WordSequence, MIN_SHORTHASH_WORDS, SEQUENCE_LENGTH};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub mod journal;
pub mod metadata;
pub mod operation;
mod registry;
pub use registry::Registry;
pub mod storage;

/// Errors that can occur when interacting with the [Registry].
#[derive(Debug, Error)]
pub enum Error {
    #[error("journal error: {0}")]
    Journal(#[from] journal::Error),
    #[error("metadata error: {0}")]
    Metadata(#[from] metadata::Error),
    #[error("words error: {0}")]
    Words(#[from] shorthash_words::Error),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("journal item {0} cannot be applied: {1}")]
    Corrupted(usize, Box<Error>),
    #[error("invalid shorthash length: {0}")]
    InvalidShorthashLength(usize),
    #[error("{0} accounts matched the candidate set")]
    AmbiguousCandidates(usize),
    #[error("duplicate address: {0}")]
    DuplicateAddress(Address),
    #[error("duplicate shorthash: {0}")]
    DuplicateShorthash(Prefix),
    #[error("unknown address: {0}")]
    UnknownAddress(Address),
    #[error("shorthash is reserved: {0}")]
    ReservedShorthash(Prefix),
    #[error("shorthash of {0} is a prefix of the words of {1}")]
    PrefixConflict(Address, Address),
    #[error("replacement for {0} was built for {1}")]
    AddressMismatch(Address, Address),
    #[error("cursor regression: {current} -> {next}")]
    CursorRegression { current: u64, next: u64 },
}

impl Error {
    /// Whether the error signals a broken invariant (or corrupted state) rather than a
    /// failure to reach storage.
    ///
    /// Non-fatal errors leave the registry unchanged and the operation may be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Journal(journal::Error::Corrupted(_)) => true,
            Error::Journal(_) | Error::Metadata(_) => false,
            _ => true,
        }
    }
}

/// Configuration for the [Registry].
#[derive(Clone)]
pub struct Config {
    /// The [storage::Storage] partition holding the journal and cursor.
    pub partition: String,

    /// Registry to record metrics in.
    pub metrics: Arc<Mutex<PrometheusRegistry>>,
}

impl Config {
    /// Create a configuration for `partition` with a fresh metrics registry.
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            metrics: Arc::new(Mutex::new(PrometheusRegistry::default())),
        }
    }
}

/// A committed shorthash assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    address: Address,
    words: WordSequence,
    shorthash: Prefix,
}

impl Account {
    /// Build the account of `address` whose shorthash is the first `length` words of its
    /// sequence.
    pub fn new(address: Address, length: usize) -> Result<Self, Error> {
        if !(MIN_SHORTHASH_WORDS..=SEQUENCE_LENGTH).contains(&length) {
            return Err(Error::InvalidShorthashLength(length));
        }
        let words = WordSequence::from_address(&address);
        let shorthash = words.prefix(length)?;
        Ok(Self {
            address,
            words,
            shorthash,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn words(&self) -> &WordSequence {
        &self.words
    }

    pub fn shorthash(&self) -> &Prefix {
        &self.shorthash
    }

    /// The first two words of the sequence.
    pub fn display_prefix(&self) -> Prefix {
        self.words.display_prefix()
    }

    /// The last two words of the sequence.
    pub fn display_suffix(&self) -> Prefix {
        self.words.display_suffix()
    }
}
