//! Assign each address the shortest unambiguous prefix of its word sequence.
//!
//! # Overview
//!
//! When an address is first seen, the [Assigner] looks for a committed account whose shorthash
//! is a prefix of the new address' [WordSequence]. Because no shorthash may be a prefix of
//! another account's words, there is at most one such account.
//!
//! * If there is none, the address receives the shortest prefix (of at least
//!   [shorthash_words::MIN_SHORTHASH_WORDS] words) that is not reserved.
//! * If there is one, both sequences are compared word by word. With `k` the length of their
//!   common run, each address receives its first `k + 1` words and every prefix of the common
//!   run (lengths `1..=k`) is reserved so that it is never handed to a third address. The
//!   rewrite of the existing account, the new account, and the reservations are committed as
//!   one transaction.
//!
//! Shorthashes are never shortened: the reserved set only grows and accounts are only
//! lengthened.
//!
//! # Concurrency
//!
//! The lookup, decision, and commit of [Assigner::assign] form one critical section guarded by
//! a mutex, so concurrent calls never decide against a stale view of the registry. Readers of the
//! underlying [Registry] are not blocked by the critical section.
//!
//! # Example
//!
//! ```rust
//! use shorthash_assigner::{Assigner, Assignment};
//! use shorthash_registry::{storage::memory, Config, Registry};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let cfg = Config::new("assigner");
//! let metrics = cfg.metrics.clone();
//! let registry = Registry::init(memory::Storage::default(), cfg).await.unwrap();
//! let assigner = Assigner::new(registry, metrics);
//!
//! let first = "0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb41".parse().unwrap();
//! let second = "0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb42".parse().unwrap();
//! assigner.assign(&first).await.unwrap();
//! match assigner.assign(&second).await.unwrap() {
//!     Assignment::Resolved { incoming, displaced, reserved } => {
//!         assert_eq!(incoming.shorthash().len(), 14);
//!         assert_eq!(displaced.shorthash().len(), 14);
//!         assert_eq!(reserved.len(), 13);
//!     }
//!     _ => unreachable!(),
//! }
//! # });
//! ```

use async_lock::Mutex;
use prometheus_client::{metrics::counter::Counter, registry::Registry as PrometheusRegistry};
use shorthash_registry::{storage::Storage, Account, Registry};
use shorthash_words::{Address, Prefix, WordSequence, SEQUENCE_LENGTH};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur when assigning a shorthash.
#[derive(Debug, Error)]
pub enum Error {
    #[error("registry error: {0}")]
    Registry(#[from] shorthash_registry::Error),
    #[error("words error: {0}")]
    Words(#[from] shorthash_words::Error),
    #[error("every candidate of {0} is reserved")]
    Exhausted(Address),
    #[error("{0} and {1} have identical word sequences")]
    IdenticalWords(Address, Address),
    #[error("resolved shorthash is reserved: {0}")]
    ReservedResolution(Prefix),
}

impl Error {
    /// Whether the error signals corrupted state. Fatal errors must stop all further assignment.
    ///
    /// Non-fatal errors leave the registry unchanged, and the call may be retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Registry(err) => err.is_fatal(),
            _ => true,
        }
    }
}

/// The outcome of [Assigner::assign].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Assignment {
    /// The address was already assigned.
    Existing(Account),

    /// The address did not collide with any account.
    Fresh(Account),

    /// The address collided with an existing account and both were lengthened.
    Resolved {
        incoming: Account,
        displaced: Account,
        reserved: Vec<Prefix>,
    },
}

impl Assignment {
    /// The account of the assigned address.
    pub fn account(&self) -> &Account {
        match self {
            Assignment::Existing(account) | Assignment::Fresh(account) => account,
            Assignment::Resolved { incoming, .. } => incoming,
        }
    }
}

struct Metrics {
    assigned: Counter,
    conflicts: Counter,
    duplicates: Counter,
}

/// Assigns shorthashes to addresses and commits them to a [Registry].
pub struct Assigner<S: Storage> {
    registry: Registry<S>,
    lock: Mutex<()>,
    metrics: Metrics,
}

impl<S: Storage> Assigner<S> {
    /// Create an assigner committing to `registry` and recording metrics in `metrics`.
    pub fn new(registry: Registry<S>, metrics: Arc<StdMutex<PrometheusRegistry>>) -> Self {
        let assigned = Counter::default();
        let conflicts = Counter::default();
        let duplicates = Counter::default();
        {
            let mut metrics = metrics.lock().unwrap();
            let metrics = metrics.sub_registry_with_prefix("assigner");
            metrics.register(
                "assigned",
                "Number of addresses assigned a shorthash",
                assigned.clone(),
            );
            metrics.register(
                "conflicts",
                "Number of collisions resolved",
                conflicts.clone(),
            );
            metrics.register(
                "duplicates",
                "Number of already assigned addresses seen again",
                duplicates.clone(),
            );
        }
        Self {
            registry,
            lock: Mutex::new(()),
            metrics: Metrics {
                assigned,
                conflicts,
                duplicates,
            },
        }
    }

    /// The registry assignments are committed to.
    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    /// Assign `address` a shorthash, if it does not have one yet.
    pub async fn assign(&self, address: &Address) -> Result<Assignment, Error> {
        let _guard = self.lock.lock().await;
        let result = self.decide(address).await;
        if let Err(err) = &result {
            if err.is_fatal() {
                error!(%address, ?err, "assignment failed");
            }
        }
        result
    }

    async fn decide(&self, address: &Address) -> Result<Assignment, Error> {
        if let Some(account) = self.registry.lookup_by_address(address).await {
            self.metrics.duplicates.inc();
            return Ok(Assignment::Existing(account));
        }

        let words = WordSequence::from_address(address);
        let candidates: Vec<_> = words.candidates().collect();
        let Some(existing) = self.registry.lookup_by_candidates(&candidates).await? else {
            return self.fresh(address, candidates).await;
        };
        self.resolve(address, &words, existing).await
    }

    /// Commit the shortest candidate that is not reserved.
    async fn fresh(&self, address: &Address, candidates: Vec<Prefix>) -> Result<Assignment, Error> {
        for candidate in candidates {
            if self.registry.is_reserved(&candidate).await {
                continue;
            }
            let account = Account::new(*address, candidate.len())?;
            self.registry.commit_new_account(account.clone()).await?;
            self.metrics.assigned.inc();
            debug!(%address, shorthash = %account.shorthash(), "assigned");
            return Ok(Assignment::Fresh(account));
        }
        Err(Error::Exhausted(*address))
    }

    /// Lengthen `existing` and the incoming address past their common run.
    async fn resolve(
        &self,
        address: &Address,
        words: &WordSequence,
        existing: Account,
    ) -> Result<Assignment, Error> {
        let common = words.common_run(existing.words());
        if common == SEQUENCE_LENGTH {
            return Err(Error::IdenticalWords(*existing.address(), *address));
        }

        let length = common + 1;
        let incoming = Account::new(*address, length)?;
        let displaced = Account::new(*existing.address(), length)?;
        for shorthash in [incoming.shorthash(), displaced.shorthash()] {
            if self.registry.is_reserved(shorthash).await {
                return Err(Error::ReservedResolution(shorthash.clone()));
            }
        }
        let reserved = (1..=common)
            .map(|len| words.prefix(len))
            .collect::<Result<Vec<_>, _>>()?;

        self.registry
            .commit_replace(
                existing.address(),
                displaced.clone(),
                incoming.clone(),
                reserved.clone(),
            )
            .await?;
        self.metrics.assigned.inc();
        self.metrics.conflicts.inc();
        info!(
            %address,
            displaced = %existing.address(),
            common,
            previous = %existing.shorthash(),
            shorthash = %incoming.shorthash(),
            "resolved collision"
        );
        Ok(Assignment::Resolved {
            incoming,
            displaced,
            reserved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::join;
    use prometheus_client::encoding::text::encode;
    use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
    use shorthash_macros::test_traced;
    use shorthash_registry::{storage::memory, Config};
    use shorthash_words::{ADDRESS_LENGTH, MIN_SHORTHASH_WORDS};
    use std::collections::{BTreeSet, HashMap};

    const PARTITION: &str = "assigner_test";

    const FIRST: &str = "0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb41";
    const SECOND: &str = "0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb42";
    const THIRD: &str = "0xb979f6f0b2a8d6d14f8e69ee5de64e27a7c3eb43";

    fn address(s: &str) -> Address {
        s.parse().unwrap()
    }

    /// `FIRST` with byte `index` inverted.
    fn variant(index: usize) -> Address {
        let mut bytes = *address(FIRST).as_bytes();
        bytes[index] ^= 0xff;
        Address::new(bytes)
    }

    async fn setup(storage: memory::Storage) -> Assigner<memory::Storage> {
        let cfg = Config::new(PARTITION);
        let metrics = cfg.metrics.clone();
        let registry = Registry::init(storage, cfg).await.unwrap();
        Assigner::new(registry, metrics)
    }

    /// Verify uniqueness, prefix freedom, reserved exclusion, and that every reserved prefix is
    /// shared by at least two accounts.
    async fn check_invariants<S: Storage>(registry: &Registry<S>) {
        let accounts = registry.snapshot().await;
        let reserved = registry.reserved_prefixes().await;

        let shorthashes: BTreeSet<_> = accounts.iter().map(|a| a.shorthash().clone()).collect();
        assert_eq!(shorthashes.len(), accounts.len());
        for account in accounts.iter() {
            assert!(account.shorthash().len() >= MIN_SHORTHASH_WORDS);
            assert!(account.shorthash().is_prefix_of(account.words()));
            assert!(!reserved.contains(account.shorthash()));
            for other in accounts.iter().filter(|o| o.address() != account.address()) {
                assert!(
                    !account.shorthash().is_prefix_of(other.words()),
                    "{} is a prefix of the words of {}",
                    account.shorthash(),
                    other.address()
                );
            }
        }
        for prefix in reserved.iter() {
            let sharing = accounts
                .iter()
                .filter(|a| prefix.is_prefix_of(a.words()))
                .count();
            assert!(sharing >= 2, "{} is reserved but not shared", prefix);
        }
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut result = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let item = rest.remove(i);
            for mut permutation in permutations(&rest) {
                permutation.insert(0, item.clone());
                result.push(permutation);
            }
        }
        result
    }

    #[test_traced]
    async fn test_fresh() {
        let assigner = setup(memory::Storage::default()).await;
        let assignment = assigner.assign(&address(FIRST)).await.unwrap();
        let Assignment::Fresh(account) = assignment else {
            panic!("unexpected assignment: {:?}", assignment);
        };
        assert_eq!(account.shorthash().to_string(), "damp supreme");
        assert_eq!(
            assigner.registry().lookup_by_address(&address(FIRST)).await,
            Some(account)
        );
    }

    #[test_traced]
    async fn test_idempotent() {
        let assigner = setup(memory::Storage::default()).await;
        let first = assigner.assign(&address(FIRST)).await.unwrap();
        let snapshot = assigner.registry().snapshot().await;

        let again = assigner.assign(&address(FIRST)).await.unwrap();
        assert_eq!(again, Assignment::Existing(first.account().clone()));
        assert_eq!(assigner.registry().snapshot().await, snapshot);
        assert_eq!(assigner.registry().reserved().await, 0);
    }

    #[test_traced]
    async fn test_collision() {
        let assigner = setup(memory::Storage::default()).await;
        assigner.assign(&address(FIRST)).await.unwrap();
        let assignment = assigner.assign(&address(SECOND)).await.unwrap();
        let Assignment::Resolved {
            incoming,
            displaced,
            reserved,
        } = assignment
        else {
            panic!("unexpected assignment: {:?}", assignment);
        };

        // The sequences share 13 words, so each shorthash is 14 words long
        assert_eq!(
            displaced.shorthash().to_string(),
            "damp supreme journey menu pull virtual include hat saddle offer polar include mansion kit"
        );
        assert_eq!(
            incoming.shorthash().to_string(),
            "damp supreme journey menu pull virtual include hat saddle offer polar include mansion road"
        );
        assert_eq!(reserved.len(), 13);
        assert_eq!(reserved[0].to_string(), "damp");
        for (i, prefix) in reserved.iter().enumerate() {
            assert_eq!(prefix.len(), i + 1);
            assert!(assigner.registry().is_reserved(prefix).await);
        }

        let registry = assigner.registry();
        assert_eq!(
            registry.lookup_by_address(&address(FIRST)).await,
            Some(displaced)
        );
        assert_eq!(
            registry.lookup_by_address(&address(SECOND)).await,
            Some(incoming)
        );
        assert_eq!(
            registry
                .lookup_by_display_prefix(&"damp supreme".parse().unwrap())
                .await
                .len(),
            2
        );
        check_invariants(registry).await;
    }

    #[test_traced]
    async fn test_minimal_after_reservation() {
        let assigner = setup(memory::Storage::default()).await;
        assigner.assign(&address(FIRST)).await.unwrap();
        assigner.assign(&address(SECOND)).await.unwrap();

        // Shares only "damp", which is reserved, so two words suffice
        let assignment = assigner.assign(&variant(2)).await.unwrap();
        assert!(matches!(assignment, Assignment::Fresh(_)));
        assert_eq!(assignment.account().shorthash().to_string(), "damp chalk");

        // Shares five reserved words, so the sixth disambiguates
        let assignment = assigner.assign(&variant(8)).await.unwrap();
        assert!(matches!(assignment, Assignment::Fresh(_)));
        assert_eq!(
            assignment.account().shorthash().to_string(),
            "damp supreme journey menu pull crucial"
        );

        // Every shorter candidate is reserved
        let words = assignment.account().words();
        for len in MIN_SHORTHASH_WORDS..assignment.account().shorthash().len() {
            assert!(
                assigner
                    .registry()
                    .is_reserved(&words.prefix(len).unwrap())
                    .await
            );
        }
        check_invariants(assigner.registry()).await;
    }

    #[test_traced]
    async fn test_all_orderings() {
        let addresses = vec![
            ("first", address(FIRST)),
            ("second", address(SECOND)),
            ("byte2", variant(2)),
            ("byte8", variant(8)),
            ("byte10", variant(10)),
        ];
        let expected: HashMap<_, _> = [
            ("first", 14),
            ("second", 14),
            ("byte2", 2),
            ("byte8", 6),
            ("byte10", 8),
        ]
        .into_iter()
        .collect();

        // Every order of arrival settles on the same assignments
        for ordering in permutations(&addresses) {
            let assigner = setup(memory::Storage::default()).await;
            for (_, address) in ordering.iter() {
                assigner.assign(address).await.unwrap();
                check_invariants(assigner.registry()).await;
            }
            for (name, address) in addresses.iter() {
                let account = assigner
                    .registry()
                    .lookup_by_address(address)
                    .await
                    .unwrap();
                assert_eq!(account.shorthash().len(), expected[name], "{}", name);
            }
            assert_eq!(assigner.registry().reserved().await, 13);
        }
    }

    #[test_traced]
    async fn test_three_siblings() {
        // All three share 13 words and differ pairwise at the 14th
        let addresses = vec![address(FIRST), address(SECOND), address(THIRD)];
        for ordering in permutations(&addresses) {
            let assigner = setup(memory::Storage::default()).await;
            for address in ordering.iter() {
                assigner.assign(address).await.unwrap();
                check_invariants(assigner.registry()).await;
            }
            for address in addresses.iter() {
                let account = assigner
                    .registry()
                    .lookup_by_address(address)
                    .await
                    .unwrap();
                assert_eq!(account.shorthash().len(), 14, "{}", address);
            }
            let reserved = assigner.registry().reserved_prefixes().await;
            assert_eq!(reserved.len(), 13);
            assert!(reserved.iter().all(|prefix| prefix.len() <= 13));
        }
    }

    #[test_traced]
    async fn test_random_batches() {
        for seed in 0..4 {
            let mut rng = StdRng::seed_from_u64(seed);
            let assigner = setup(memory::Storage::default()).await;
            let mut addresses: Vec<Address> = Vec::new();
            let mut reserved = BTreeSet::new();
            for _ in 0..200 {
                // Most addresses copy a leading run of bytes from an earlier one
                let mut bytes = [0u8; ADDRESS_LENGTH];
                rng.fill_bytes(&mut bytes);
                if !addresses.is_empty() && rng.gen_bool(0.75) {
                    let source = addresses[rng.gen_range(0..addresses.len())];
                    let shared = rng.gen_range(1..ADDRESS_LENGTH);
                    bytes[..shared].copy_from_slice(&source.as_bytes()[..shared]);
                }
                let address = Address::new(bytes);

                // Revisit an earlier address from time to time
                let address = if !addresses.is_empty() && rng.gen_bool(0.1) {
                    addresses[rng.gen_range(0..addresses.len())]
                } else {
                    address
                };
                let assignment = assigner.assign(&address).await.unwrap();
                if let Assignment::Fresh(account) = &assignment {
                    for len in MIN_SHORTHASH_WORDS..account.shorthash().len() {
                        let prefix = account.words().prefix(len).unwrap();
                        assert!(assigner.registry().is_reserved(&prefix).await);
                    }
                }
                if !addresses.contains(&address) {
                    addresses.push(address);
                }

                // The reserved set only grows
                let current: BTreeSet<_> = assigner
                    .registry()
                    .reserved_prefixes()
                    .await
                    .into_iter()
                    .collect();
                assert!(current.is_superset(&reserved));
                reserved = current;
            }
            check_invariants(assigner.registry()).await;
            assert_eq!(assigner.registry().accounts().await, addresses.len());
        }
    }

    #[test_traced]
    async fn test_restart() {
        let storage = memory::Storage::default();
        let assigner = setup(storage.clone()).await;
        assigner.assign(&address(FIRST)).await.unwrap();
        assigner.assign(&address(SECOND)).await.unwrap();
        let snapshot = assigner.registry().snapshot().await;
        drop(assigner);

        let assigner = setup(storage).await;
        assert_eq!(assigner.registry().snapshot().await, snapshot);
        assert!(matches!(
            assigner.assign(&address(SECOND)).await.unwrap(),
            Assignment::Existing(_)
        ));

        // Reservations survive the restart
        let assignment = assigner.assign(&variant(8)).await.unwrap();
        assert_eq!(assignment.account().shorthash().len(), 6);
        check_invariants(assigner.registry()).await;
    }

    #[test_traced]
    async fn test_concurrent_assign() {
        let assigner = setup(memory::Storage::default()).await;
        let left = [address(FIRST), variant(8), variant(2)];
        let right = [address(SECOND), variant(10), address(FIRST)];
        let run = |addresses: [Address; 3]| {
            let assigner = &assigner;
            async move {
                for address in addresses {
                    assigner.assign(&address).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }
        };
        join!(run(left), run(right));

        check_invariants(assigner.registry()).await;
        assert_eq!(assigner.registry().accounts().await, 5);
    }

    #[test_traced]
    async fn test_exhausted() {
        let assigner = setup(memory::Storage::default()).await;
        let words = WordSequence::from_address(&address(FIRST));
        assigner
            .registry()
            .reserve_all(words.candidates())
            .await
            .unwrap();

        let err = assigner.assign(&address(FIRST)).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::Exhausted(_)));
        assert_eq!(assigner.registry().accounts().await, 0);
    }

    #[test_traced]
    async fn test_metrics() {
        let cfg = Config::new(PARTITION);
        let metrics = cfg.metrics.clone();
        let registry = Registry::init(memory::Storage::default(), cfg)
            .await
            .unwrap();
        let assigner = Assigner::new(registry, metrics.clone());
        assigner.assign(&address(FIRST)).await.unwrap();
        assigner.assign(&address(SECOND)).await.unwrap();
        assigner.assign(&address(SECOND)).await.unwrap();

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.lock().unwrap()).unwrap();
        assert!(buffer.contains("assigner_assigned_total 2"));
        assert!(buffer.contains("assigner_conflicts_total 1"));
        assert!(buffer.contains("assigner_duplicates_total 1"));
        assert!(buffer.contains("registry_accounts 2"));
    }
}
