#![no_main]

use libfuzzer_sys::fuzz_target;
use sealmail_envelope::armor;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = armor::parse(text);
    let _ = armor::is_encrypted_envelope(text);
    let _ = armor::is_signed_envelope(text);

    // Canonical form is a fixed point.
    if let Ok(Some(signed)) = armor::decode_signed(text) {
        let canonical = signed.canonical_payload();
        assert_eq!(armor::canonicalize(&canonical), canonical);
    }
});
