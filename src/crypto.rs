//! Crypto engine: session keys, AES-256-GCM content encryption,
//! RSA-OAEP key wrapping and RSA PKCS#1 v1.5 signatures.
//!
//! Opaque outputs (all standard padded base64):
//!   CipherText  = base64(nonce[12] || aes_gcm_ct || tag[16])
//!   WrappedKey  = base64(rsa_oaep_sha256(session_key[32]))
//!   Signature   = base64(rsassa_pkcs1v15_sha256(message))

use core::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::keys::{PrivateKey, PublicKey};

pub const SESSION_KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 12;
pub const TAG_BYTES: usize = 16;

/// Bound into every content encryption as associated data.
const CONTENT_AAD: &[u8] = b"sealmail|content|v1";

// ---------------------------------------------------------------------------
// Session key
// ---------------------------------------------------------------------------

/// Single-use AES-256 key. Never persisted, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_BYTES]);

impl SessionKey {
    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; SESSION_KEY_BYTES] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    fn as_bytes(&self) -> &[u8; SESSION_KEY_BYTES] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Opaque text values carried by the envelope
// ---------------------------------------------------------------------------

macro_rules! opaque_text {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(encoded: impl Into<String>) -> Self {
                Self(encoded.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_text!(
    /// Encrypted message content.
    CipherText
);
opaque_text!(
    /// Session key encrypted under a recipient public key.
    WrappedKey
);
opaque_text!(
    /// Detached signature over a message.
    Signature
);

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Stateless cryptographic transforms. Cheap to copy; needs no synchronization.
#[derive(Clone, Copy, Debug, Default)]
pub struct CryptoEngine;

impl CryptoEngine {
    pub fn new() -> Self {
        Self
    }

    /// Fresh random 256-bit session key.
    pub fn generate_session_key(&self) -> Result<SessionKey, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; SESSION_KEY_BYTES]);
        getrandom::getrandom(&mut bytes[..])
            .map_err(|e| CryptoError::Crypto(format!("rng: {}", e)))?;
        Ok(SessionKey(*bytes))
    }

    /// Encrypt text under `key` with a fresh nonce.
    pub fn symmetric_encrypt(&self, plaintext: &str, key: &SessionKey) -> Result<CipherText, CryptoError> {
        let mut nonce = [0u8; NONCE_BYTES];
        getrandom::getrandom(&mut nonce).map_err(|e| CryptoError::Crypto(format!("rng: {}", e)))?;

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| CryptoError::Crypto("bad session key length".into()))?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: plaintext.as_bytes(), aad: CONTENT_AAD },
            )
            .map_err(|_| CryptoError::Crypto("content encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_BYTES + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(CipherText(STANDARD.encode(out)))
    }

    /// Authenticate and decrypt. Any failure, including non-UTF-8 plaintext, is `DecryptionFailed`.
    pub fn symmetric_decrypt(&self, ciphertext: &CipherText, key: &SessionKey) -> Result<String, CryptoError> {
        let data = STANDARD
            .decode(ciphertext.as_str().as_bytes())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if data.len() < NONCE_BYTES + TAG_BYTES {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce, sealed) = data.split_at(NONCE_BYTES);

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::DecryptionFailed)?;
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: CONTENT_AAD })
            .map_err(|_| CryptoError::DecryptionFailed)?;
        String::from_utf8(plain).map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Encrypt the session key to a recipient (RSA-OAEP, SHA-256).
    pub fn wrap_key(&self, key: &SessionKey, recipient: &PublicKey) -> Result<WrappedKey, CryptoError> {
        let wrapped = recipient
            .rsa()
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
            .map_err(|e| CryptoError::Crypto(format!("key wrap: {}", e)))?;
        Ok(WrappedKey(STANDARD.encode(wrapped)))
    }

    /// Recover a session key. Wrong key, tampering and bad encoding all give `UnwrapFailed`.
    pub fn unwrap_key(&self, wrapped: &WrappedKey, recipient: &PrivateKey) -> Result<SessionKey, CryptoError> {
        let data = STANDARD
            .decode(wrapped.as_str().as_bytes())
            .map_err(|_| CryptoError::UnwrapFailed)?;
        let raw = Zeroizing::new(
            recipient
                .rsa()
                .decrypt(Oaep::new::<Sha256>(), &data)
                .map_err(|_| CryptoError::UnwrapFailed)?,
        );
        SessionKey::from_slice(&raw).ok_or(CryptoError::UnwrapFailed)
    }

    /// Sign the UTF-8 bytes of `message`.
    pub fn sign(&self, message: &str, signer: &PrivateKey) -> Result<Signature, CryptoError> {
        let digest = Sha256::digest(message.as_bytes());
        let sig = signer
            .rsa()
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| CryptoError::Crypto(format!("sign: {}", e)))?;
        Ok(Signature(STANDARD.encode(sig)))
    }

    /// `Ok(false)` when the signature does not match; `Err` only when verification cannot run
    /// (signature not base64, or not the size of the signer's modulus).
    pub fn verify(&self, message: &str, signature: &Signature, signer: &PublicKey) -> Result<bool, CryptoError> {
        let sig = STANDARD
            .decode(signature.as_str().as_bytes())
            .map_err(|e| CryptoError::Crypto(format!("signature encoding: {}", e)))?;
        if sig.len() != signer.rsa().size() {
            return Err(CryptoError::Crypto(format!(
                "signature is {} bytes, expected {}",
                sig.len(),
                signer.rsa().size()
            )));
        }
        let digest = Sha256::digest(message.as_bytes());
        Ok(signer
            .rsa()
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &sig)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyPair, KeyStrength};
    use once_cell::sync::Lazy;

    static ALICE: Lazy<KeyPair> = Lazy::new(|| KeyPair::generate(KeyStrength::Rsa2048).unwrap());
    static BOB: Lazy<KeyPair> = Lazy::new(|| KeyPair::generate(KeyStrength::Rsa2048).unwrap());

    #[test]
    fn session_keys_are_fresh() {
        let e = CryptoEngine::new();
        let a = e.generate_session_key().unwrap();
        let b = e.generate_session_key().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn session_key_debug_is_redacted() {
        let k = CryptoEngine::new().generate_session_key().unwrap();
        assert_eq!(format!("{:?}", k), "SessionKey(..)");
    }

    #[test]
    fn symmetric_nonce_is_random() {
        let e = CryptoEngine::new();
        let k = e.generate_session_key().unwrap();
        let c1 = e.symmetric_encrypt("same", &k).unwrap();
        let c2 = e.symmetric_encrypt("same", &k).unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn symmetric_wrong_key_fails() {
        let e = CryptoEngine::new();
        let k1 = e.generate_session_key().unwrap();
        let k2 = e.generate_session_key().unwrap();
        let ct = e.symmetric_encrypt("secret", &k1).unwrap();
        assert_eq!(e.symmetric_decrypt(&ct, &k2), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn symmetric_short_or_garbled_input_fails() {
        let e = CryptoEngine::new();
        let k = e.generate_session_key().unwrap();
        for bad in ["", "AAAA", "!!!not-base64!!!"] {
            assert_eq!(
                e.symmetric_decrypt(&CipherText::new(bad), &k),
                Err(CryptoError::DecryptionFailed),
                "input {:?}",
                bad
            );
        }
    }

    #[test]
    fn wrap_unwrap_matching_pair() {
        let e = CryptoEngine::new();
        let k = e.generate_session_key().unwrap();
        let w = e.wrap_key(&k, &ALICE.public).unwrap();
        assert_eq!(e.unwrap_key(&w, &ALICE.private).unwrap(), k);
    }

    #[test]
    fn unwrap_with_other_private_key_fails() {
        let e = CryptoEngine::new();
        let k = e.generate_session_key().unwrap();
        let w = e.wrap_key(&k, &ALICE.public).unwrap();
        assert_eq!(e.unwrap_key(&w, &BOB.private), Err(CryptoError::UnwrapFailed));
        assert_eq!(
            e.unwrap_key(&WrappedKey::new("bm9wZQ=="), &ALICE.private),
            Err(CryptoError::UnwrapFailed)
        );
    }

    #[test]
    fn sign_verify_matrix() {
        let e = CryptoEngine::new();
        let sig = e.sign("hello", &ALICE.private).unwrap();
        assert_eq!(e.verify("hello", &sig, &ALICE.public), Ok(true));
        assert_eq!(e.verify("hellp", &sig, &ALICE.public), Ok(false));
        assert_eq!(e.verify("hello", &sig, &BOB.public), Ok(false));
    }

    #[test]
    fn verify_malformed_signature_is_an_error() {
        let e = CryptoEngine::new();
        assert!(matches!(
            e.verify("hello", &Signature::new("***"), &ALICE.public),
            Err(CryptoError::Crypto(_))
        ));
        assert!(matches!(
            e.verify("hello", &Signature::new("AAAA"), &ALICE.public),
            Err(CryptoError::Crypto(_))
        ));
    }
}
