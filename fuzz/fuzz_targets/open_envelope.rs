#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use sealmail_envelope::{armor, CryptoEngine, KeyPair, KeyStrength};

static KEYPAIR: Lazy<KeyPair> = Lazy::new(|| KeyPair::generate(KeyStrength::Rsa2048).unwrap());

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(block) = armor::decode_encrypted(text) else {
        return;
    };

    let engine = CryptoEngine::new();
    if let Ok(key) = engine.unwrap_key(&block.wrapped_key, &KEYPAIR.private) {
        let _ = engine.symmetric_decrypt(&block.content, &key);
    }
});
