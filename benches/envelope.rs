use chirpgram::defaults::PAYLOAD_CAPACITY;
use chirpgram::envelope::{MAX_PLAINTEXT_LEN, decrypt, encrypt, encrypt_with_iv};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const PASSWORD: &str = "password";

/// Plaintext sizes worth comparing: ping, a short call, a full envelope.
fn sizes() -> [usize; 3] {
    [0, 16, MAX_PLAINTEXT_LEN]
}

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");
    // Key derivation dominates; fewer samples keep the run short.
    group.sample_size(20);

    for size in sizes() {
        let plaintext = vec![b'A'; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &plaintext, |b, p| {
            b.iter(|| encrypt(black_box(p), black_box(PASSWORD)))
        });
    }
    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt");
    group.sample_size(20);

    for size in sizes() {
        let Ok(envelope) = encrypt_with_iv(&vec![b'A'; size], PASSWORD, &[0x5a; 16]) else {
            eprintln!("Skipping {}: plaintext does not fit", size);
            continue;
        };
        // The modem hands back its whole payload buffer.
        let mut payload = envelope.into_bytes();
        payload.resize(PAYLOAD_CAPACITY, 0);

        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, p| {
            b.iter(|| decrypt(black_box(p), black_box(PASSWORD)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encrypt, bench_decrypt);
criterion_main!(benches);
