use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use shorthash_words::{Address, WordSequence, ADDRESS_LENGTH};
use std::hint::black_box;

fn benchmark_from_address(c: &mut Criterion) {
    let mut sampler = StdRng::seed_from_u64(0);
    let mut bytes = [0u8; ADDRESS_LENGTH];
    sampler.fill_bytes(&mut bytes);
    let address = Address::new(bytes);
    c.bench_function(&format!("{}/from_address", module_path!()), |b| {
        b.iter(|| WordSequence::from_address(black_box(&address)));
    });
}

fn benchmark_checksummed(c: &mut Criterion) {
    let mut sampler = StdRng::seed_from_u64(1);
    let mut bytes = [0u8; ADDRESS_LENGTH];
    sampler.fill_bytes(&mut bytes);
    let address = Address::new(bytes);
    c.bench_function(&format!("{}/checksummed", module_path!()), |b| {
        b.iter(|| black_box(&address).checksummed());
    });
}

criterion_group!(benches, benchmark_from_address, benchmark_checksummed);
criterion_main!(benches);
