use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use sealmail_envelope::armor;
use sealmail_envelope::{CipherText, CryptoEngine, KeyPair, KeyStrength};

fn bench_engine(c: &mut Criterion) {
    let e = CryptoEngine::new();
    let pair = KeyPair::generate(KeyStrength::Rsa2048).unwrap();
    let body = "x".repeat(1024);

    let k = e.generate_session_key().unwrap();
    let ct = e.symmetric_encrypt(&body, &k).unwrap();
    let wk = e.wrap_key(&k, &pair.public).unwrap();
    let sig = e.sign(&body, &pair.private).unwrap();

    // One tag character changed
    let mut raw = ct.as_str().to_owned();
    let at = raw.len() - 4;
    let swap = if &raw[at..at + 1] == "A" { "B" } else { "A" };
    raw.replace_range(at..at + 1, swap);
    let tampered = CipherText::new(raw);

    c.bench_function("symmetric_encrypt_1k", |b| {
        b.iter(|| e.symmetric_encrypt(black_box(&body), &k).unwrap())
    });
    c.bench_function("symmetric_decrypt_valid", |b| {
        b.iter(|| e.symmetric_decrypt(black_box(&ct), &k).unwrap())
    });
    c.bench_function("symmetric_decrypt_tampered", |b| {
        b.iter(|| black_box(e.symmetric_decrypt(black_box(&tampered), &k).err()))
    });
    c.bench_function("wrap_key", |b| b.iter(|| e.wrap_key(black_box(&k), &pair.public).unwrap()));
    c.bench_function("unwrap_key", |b| b.iter(|| e.unwrap_key(black_box(&wk), &pair.private).unwrap()));
    c.bench_function("sign_1k", |b| b.iter(|| e.sign(black_box(&body), &pair.private).unwrap()));
    c.bench_function("verify_1k", |b| {
        b.iter(|| e.verify(black_box(&body), &sig, &pair.public).unwrap())
    });

    let text = armor::encode_encrypted("alice@example.com", &wk, &ct);
    c.bench_function("parse_encrypted", |b| b.iter(|| armor::parse(black_box(&text)).unwrap()));
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_engine
}
criterion_main!(benches);
