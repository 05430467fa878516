use crate::{
    journal::Journal,
    metadata::Metadata,
    operation::{self, Operation},
    storage::Storage,
    Account, Config, Error,
};
use async_lock::{Mutex, RwLock};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use shorthash_words::{Address, Prefix, Word, SEQUENCE_LENGTH, WORD_BITS};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, info};

/// Largest dictionary index, used to bound range scans over word sequences.
const MAX_WORD: Word = (1 << WORD_BITS) - 1;

/// The in-memory view rebuilt from the journal.
#[derive(Default)]
struct State {
    /// Accounts keyed by shorthash.
    accounts: BTreeMap<Prefix, Account>,

    /// Shorthash of each address.
    addresses: HashMap<Address, Prefix>,

    /// Full word sequence of each account, for prefix range scans.
    sequences: BTreeMap<[Word; SEQUENCE_LENGTH], Address>,

    /// Shorthashes grouped by display prefix.
    displays: BTreeMap<Prefix, BTreeSet<Prefix>>,

    /// Prefixes that may never be assigned.
    reserved: BTreeSet<Prefix>,

    /// Next block to ingest.
    cursor: u64,
}

/// Effect of a transaction that has not yet been applied, used during validation.
#[derive(Default)]
struct Pending {
    removed: HashSet<Address>,
    put: Vec<Account>,
    reserved: BTreeSet<Prefix>,
}

impl State {
    fn account(&self, address: &Address) -> Option<&Account> {
        self.addresses
            .get(address)
            .and_then(|shorthash| self.accounts.get(shorthash))
    }

    /// Addresses of accounts whose word sequence starts with `prefix`.
    fn extensions<'a>(&'a self, prefix: &Prefix) -> impl Iterator<Item = &'a Address> + 'a {
        let mut low = [0; SEQUENCE_LENGTH];
        let mut high = [MAX_WORD; SEQUENCE_LENGTH];
        low[..prefix.len()].copy_from_slice(prefix.words());
        high[..prefix.len()].copy_from_slice(prefix.words());
        self.sequences
            .range(low..=high)
            .map(|(_, address)| address)
    }

    /// Verify that applying `operations` in order preserves the registry invariants.
    fn check(&self, operations: &[Operation]) -> Result<(), Error> {
        let mut pending = Pending::default();
        for operation in operations {
            match operation {
                Operation::Reserve(prefix) => {
                    pending.reserved.insert(prefix.clone());
                }
                Operation::Remove(address) => {
                    let exists = self.addresses.contains_key(address)
                        && !pending.removed.contains(address);
                    if !exists {
                        return Err(Error::UnknownAddress(*address));
                    }
                    pending.removed.insert(*address);
                }
                Operation::Put { address, length } => {
                    let account = Account::new(*address, *length as usize)?;
                    let live = self.addresses.contains_key(address)
                        && !pending.removed.contains(address);
                    if live || pending.put.iter().any(|a| a.address() == address) {
                        return Err(Error::DuplicateAddress(*address));
                    }
                    let taken = self
                        .accounts
                        .get(account.shorthash())
                        .is_some_and(|a| !pending.removed.contains(a.address()));
                    if taken
                        || pending
                            .put
                            .iter()
                            .any(|a| a.shorthash() == account.shorthash())
                    {
                        return Err(Error::DuplicateShorthash(account.shorthash().clone()));
                    }
                    pending.put.push(account);
                }
            }
        }

        // No assigned shorthash may be reserved
        for account in pending.put.iter() {
            if self.reserved.contains(account.shorthash())
                || pending.reserved.contains(account.shorthash())
            {
                return Err(Error::ReservedShorthash(account.shorthash().clone()));
            }
        }
        for prefix in pending.reserved.iter() {
            if let Some(account) = self.accounts.get(prefix) {
                if !pending.removed.contains(account.address()) {
                    return Err(Error::ReservedShorthash(prefix.clone()));
                }
            }
        }

        // No shorthash may be a prefix of another account's words
        for account in pending.put.iter() {
            let address = account.address();
            for other in pending.put.iter().filter(|a| a.address() != address) {
                if account.shorthash().is_prefix_of(other.words()) {
                    return Err(Error::PrefixConflict(*address, *other.address()));
                }
            }
            let live = |other: &Address| other != address && !pending.removed.contains(other);
            if let Some(other) = self.extensions(account.shorthash()).find(|a| live(*a)) {
                return Err(Error::PrefixConflict(*address, *other));
            }
            for candidate in account.words().candidates() {
                if let Some(other) = self.accounts.get(&candidate) {
                    if live(other.address()) {
                        return Err(Error::PrefixConflict(*other.address(), *address));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply operations previously accepted by [State::check].
    fn apply(&mut self, operations: Vec<Operation>) {
        for operation in operations {
            match operation {
                Operation::Reserve(prefix) => {
                    self.reserved.insert(prefix);
                }
                Operation::Remove(address) => {
                    let Some(shorthash) = self.addresses.remove(&address) else {
                        continue;
                    };
                    if let Some(account) = self.accounts.remove(&shorthash) {
                        self.sequences.remove(account.words().words());
                        let display = account.display_prefix();
                        if let Some(group) = self.displays.get_mut(&display) {
                            group.remove(&shorthash);
                            if group.is_empty() {
                                self.displays.remove(&display);
                            }
                        }
                    }
                }
                Operation::Put { address, length } => {
                    // Checked before the transaction was written
                    let Ok(account) = Account::new(address, length as usize) else {
                        continue;
                    };
                    let shorthash = account.shorthash().clone();
                    self.addresses.insert(address, shorthash.clone());
                    self.sequences.insert(*account.words().words(), address);
                    self.displays
                        .entry(account.display_prefix())
                        .or_default()
                        .insert(shorthash.clone());
                    self.accounts.insert(shorthash, account);
                }
            }
        }
    }
}

struct Metrics {
    accounts: Gauge,
    reserved: Gauge,
    cursor: Gauge,
    transactions: Counter,
    lookups: Counter,
}

impl Metrics {
    fn init(cfg: &Config) -> Self {
        let metrics = Self {
            accounts: Gauge::default(),
            reserved: Gauge::default(),
            cursor: Gauge::default(),
            transactions: Counter::default(),
            lookups: Counter::default(),
        };
        let mut registry = cfg.metrics.lock().unwrap();
        let registry = registry.sub_registry_with_prefix("registry");
        registry.register(
            "accounts",
            "Number of committed accounts",
            metrics.accounts.clone(),
        );
        registry.register(
            "reserved",
            "Number of reserved prefixes",
            metrics.reserved.clone(),
        );
        registry.register("cursor", "Next block to ingest", metrics.cursor.clone());
        registry.register(
            "transactions",
            "Number of committed transactions",
            metrics.transactions.clone(),
        );
        registry.register("lookups", "Number of lookups served", metrics.lookups.clone());
        metrics
    }

    fn update(&self, state: &State) {
        self.accounts.set(state.accounts.len() as i64);
        self.reserved.set(state.reserved.len() as i64);
        self.cursor.set(state.cursor as i64);
    }
}

struct Inner<S: Storage> {
    storage: S,
    partition: String,
    state: RwLock<State>,
    journal: Mutex<Journal<S::Blob>>,
    cursor: Mutex<Metadata<S::Blob>>,
    metrics: Metrics,
}

/// Persistent store of shorthash assignments.
///
/// See the [crate] documentation for the guarantees each operation provides.
pub struct Registry<S: Storage> {
    inner: Arc<Inner<S>>,
}

impl<S: Storage> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Storage> Registry<S> {
    /// Open the registry, rebuilding the in-memory view by replaying the journal and
    /// reading the cursor.
    ///
    /// Returns [Error::Corrupted] if a journal item cannot be decoded or would violate an
    /// invariant when applied.
    pub async fn init(storage: S, cfg: Config) -> Result<Self, Error> {
        let mut journal = Journal::init(&storage, &cfg.partition).await?;
        let cursor = Metadata::init(&storage, &cfg.partition).await?;
        let mut state = State {
            cursor: cursor.get(),
            ..State::default()
        };
        for (index, item) in journal.take_items().into_iter().enumerate() {
            let operations = operation::decode(item)
                .and_then(|operations| state.check(&operations).map(|_| operations))
                .map_err(|err| Error::Corrupted(index, Box::new(err)))?;
            state.apply(operations);
        }
        info!(
            accounts = state.accounts.len(),
            reserved = state.reserved.len(),
            cursor = state.cursor,
            "registry initialized"
        );

        let metrics = Metrics::init(&cfg);
        metrics.update(&state);
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                partition: cfg.partition,
                state: RwLock::new(state),
                journal: Mutex::new(journal),
                cursor: Mutex::new(cursor),
                metrics,
            }),
        })
    }

    /// Validate, persist, and apply a transaction.
    async fn commit(&self, operations: Vec<Operation>) -> Result<(), Error> {
        // Only one transaction may be between validation and application at a time
        let mut journal = self.inner.journal.lock().await;
        self.inner.state.read().await.check(&operations)?;
        journal.commit(&operation::encode(&operations)).await?;

        let mut state = self.inner.state.write().await;
        state.apply(operations);
        self.inner.metrics.transactions.inc();
        self.inner.metrics.update(&state);
        Ok(())
    }

    /// Return the account of `address`, if any.
    pub async fn lookup_by_address(&self, address: &Address) -> Option<Account> {
        self.inner.metrics.lookups.inc();
        self.inner.state.read().await.account(address).cloned()
    }

    /// Return the account whose shorthash equals one of `candidates`, if any.
    ///
    /// Callers must only supply prefixes of a single word sequence. Because no shorthash may
    /// be a prefix of another account's words, at most one account can match: more than one
    /// match means the registry is corrupted and [Error::AmbiguousCandidates] is returned.
    pub async fn lookup_by_candidates(
        &self,
        candidates: &[Prefix],
    ) -> Result<Option<Account>, Error> {
        self.inner.metrics.lookups.inc();
        let state = self.inner.state.read().await;
        let mut matched = candidates
            .iter()
            .filter_map(|candidate| state.accounts.get(candidate));
        let Some(first) = matched.next() else {
            return Ok(None);
        };
        let extra = matched.count();
        if extra > 0 {
            return Err(Error::AmbiguousCandidates(extra + 1));
        }
        Ok(Some(first.clone()))
    }

    /// Return the account with exactly this shorthash, if any.
    pub async fn lookup_by_shorthash(&self, shorthash: &Prefix) -> Option<Account> {
        self.inner.metrics.lookups.inc();
        self.inner.state.read().await.accounts.get(shorthash).cloned()
    }

    /// Return all accounts whose first two words equal `prefix`, ordered by shorthash.
    pub async fn lookup_by_display_prefix(&self, prefix: &Prefix) -> Vec<Account> {
        self.inner.metrics.lookups.inc();
        let state = self.inner.state.read().await;
        let Some(group) = state.displays.get(prefix) else {
            return Vec::new();
        };
        group
            .iter()
            .filter_map(|shorthash| state.accounts.get(shorthash).cloned())
            .collect()
    }

    /// Whether `candidate` is reserved.
    pub async fn is_reserved(&self, candidate: &Prefix) -> bool {
        self.inner.state.read().await.reserved.contains(candidate)
    }

    /// Reserve every prefix in `candidates`. Already reserved prefixes are skipped and, if
    /// nothing is new, nothing is written.
    pub async fn reserve_all(
        &self,
        candidates: impl IntoIterator<Item = Prefix>,
    ) -> Result<(), Error> {
        let fresh: BTreeSet<_> = {
            let state = self.inner.state.read().await;
            candidates
                .into_iter()
                .filter(|p| !state.reserved.contains(p))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }
        self.commit(fresh.into_iter().map(Operation::Reserve).collect())
            .await
    }

    /// Insert the account of a previously unseen address.
    pub async fn commit_new_account(&self, account: Account) -> Result<(), Error> {
        debug!(address = %account.address(), shorthash = %account.shorthash(), "committing account");
        self.commit(vec![Operation::Put {
            address: *account.address(),
            length: account.shorthash().len() as u8,
        }])
        .await
    }

    /// Atomically replace the account of `old` with `displaced` (its lengthened shorthash),
    /// insert `incoming`, and reserve `reserved`.
    pub async fn commit_replace(
        &self,
        old: &Address,
        displaced: Account,
        incoming: Account,
        reserved: impl IntoIterator<Item = Prefix>,
    ) -> Result<(), Error> {
        if displaced.address() != old {
            return Err(Error::AddressMismatch(*old, *displaced.address()));
        }
        debug!(
            displaced = %displaced.address(),
            displaced_shorthash = %displaced.shorthash(),
            incoming = %incoming.address(),
            incoming_shorthash = %incoming.shorthash(),
            "committing replacement"
        );

        // Skip prefixes that are already reserved
        let mut operations = {
            let state = self.inner.state.read().await;
            reserved
                .into_iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .filter(|p| !state.reserved.contains(p))
                .map(Operation::Reserve)
                .collect::<Vec<_>>()
        };
        operations.push(Operation::Remove(*old));
        operations.push(Operation::Put {
            address: *displaced.address(),
            length: displaced.shorthash().len() as u8,
        });
        operations.push(Operation::Put {
            address: *incoming.address(),
            length: incoming.shorthash().len() as u8,
        });
        self.commit(operations).await
    }

    /// Next block to ingest.
    pub async fn current_block_cursor(&self) -> u64 {
        self.inner.state.read().await.cursor
    }

    /// Persist `next` as the next block to ingest. The cursor never moves backwards.
    ///
    /// The cursor is overwritten in place rather than journaled, so its storage does not grow
    /// with the number of blocks ingested.
    pub async fn advance_cursor(&self, next: u64) -> Result<(), Error> {
        let mut cursor = self.inner.cursor.lock().await;
        let current = cursor.get();
        if next < current {
            return Err(Error::CursorRegression { current, next });
        }
        if next == current {
            return Ok(());
        }
        cursor.put(next).await?;

        let mut state = self.inner.state.write().await;
        state.cursor = next;
        self.inner.metrics.update(&state);
        Ok(())
    }

    /// Number of committed accounts.
    pub async fn accounts(&self) -> usize {
        self.inner.state.read().await.accounts.len()
    }

    /// Number of reserved prefixes.
    pub async fn reserved(&self) -> usize {
        self.inner.state.read().await.reserved.len()
    }

    /// Return all reserved prefixes in order.
    pub async fn reserved_prefixes(&self) -> Vec<Prefix> {
        self.inner
            .state
            .read()
            .await
            .reserved
            .iter()
            .cloned()
            .collect()
    }

    /// Return every account, ordered by shorthash.
    pub async fn snapshot(&self) -> Vec<Account> {
        self.inner
            .state
            .read()
            .await
            .accounts
            .values()
            .cloned()
            .collect()
    }

    /// Sync the journal and cursor. Other handles remain usable.
    pub async fn close(self) -> Result<(), Error> {
        self.inner.journal.lock().await.sync().await?;
        self.inner.cursor.lock().await.sync().await?;
        Ok(())
    }

    /// Remove all persisted data.
    pub async fn destroy(self) -> Result<(), Error> {
        let _journal = self.inner.journal.lock().await;
        let _cursor = self.inner.cursor.lock().await;
        self.inner
            .storage
            .remove(&self.inner.partition, None)
            .await
            .map_err(|err| Error::Journal(err.into()))
    }
}
