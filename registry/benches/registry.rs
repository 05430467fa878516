use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use shorthash_registry::{storage::memory, Account, Config, Registry};
use shorthash_words::{Address, ADDRESS_LENGTH};
use std::time::{Duration, Instant};
use tokio::runtime::Builder;

const ACCOUNTS: usize = 1_000;

fn accounts(seed: u64) -> Vec<Account> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..ACCOUNTS)
        .map(|_| {
            let mut bytes = [0u8; ADDRESS_LENGTH];
            rng.fill_bytes(&mut bytes);
            Account::new(Address::new(bytes), 6).unwrap()
        })
        .collect()
}

fn benchmark_commit(c: &mut Criterion) {
    let runtime = Builder::new_current_thread().build().unwrap();
    let accounts = accounts(0);
    c.bench_function(
        &format!("{}/commit accounts={}", module_path!(), ACCOUNTS),
        |b| {
            b.iter_custom(|iters| {
                let mut duration = Duration::ZERO;
                for _ in 0..iters {
                    duration += runtime.block_on(async {
                        let registry =
                            Registry::init(memory::Storage::default(), Config::new("bench"))
                                .await
                                .unwrap();
                        let start = Instant::now();
                        for account in accounts.iter() {
                            registry.commit_new_account(account.clone()).await.unwrap();
                        }
                        start.elapsed()
                    });
                }
                duration
            });
        },
    );
}

fn benchmark_lookup(c: &mut Criterion) {
    let runtime = Builder::new_current_thread().build().unwrap();
    let accounts = accounts(1);
    let registry = runtime.block_on(async {
        let registry = Registry::init(memory::Storage::default(), Config::new("bench"))
            .await
            .unwrap();
        for account in accounts.iter() {
            registry.commit_new_account(account.clone()).await.unwrap();
        }
        registry
    });
    c.bench_function(
        &format!("{}/lookup accounts={}", module_path!(), ACCOUNTS),
        |b| {
            b.iter(|| {
                runtime.block_on(async {
                    for account in accounts.iter() {
                        let candidates: Vec<_> = account.words().candidates().collect();
                        registry.lookup_by_candidates(&candidates).await.unwrap();
                    }
                })
            });
        },
    );
}

criterion_group!(benches, benchmark_commit, benchmark_lookup);
criterion_main!(benches);
