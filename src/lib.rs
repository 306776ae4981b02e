//! # sealmail-envelope
//!
//! Hybrid RSA + AES-256-GCM message envelopes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sealmail_envelope::{armor, CryptoEngine, KeyPair, KeyStrength};
//!
//! let alice = KeyPair::generate(KeyStrength::Rsa2048).unwrap();
//! let engine = CryptoEngine::new();
//!
//! let session = engine.generate_session_key().unwrap();
//! let content = engine.symmetric_encrypt("hello", &session).unwrap();
//! let wrapped = engine.wrap_key(&session, &alice.public).unwrap();
//! let text = armor::encode_encrypted("alice", &wrapped, &content);
//!
//! let block = armor::decode_encrypted(&text).unwrap();
//! let key = engine.unwrap_key(&block.wrapped_key, &alice.private).unwrap();
//! assert_eq!(engine.symmetric_decrypt(&block.content, &key).unwrap(), "hello");
//! ```
//!
//! ## Security Properties
//!
//! - **Authenticated content**: AES-256-GCM; tampered content never decrypts
//! - **Uniform errors**: decryption and unwrap failures carry no detail
//! - **Fresh session keys**: one random key and nonce per message, zeroized on drop
//! - **Signature verdicts are values**: `verify` returns `Ok(false)` on mismatch
//!
//! ## What's NOT Provided
//!
//! - Key storage (see `sealmail-keystore`)
//! - Certificate chains, revocation or key pinning
//! - Passphrase protection of private keys

#![deny(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/sealmail-envelope/0.1.0")]

mod error;

pub mod armor;
pub mod crypto;
pub mod keys;

pub use armor::{EncryptedBlock, Envelope, EnvelopeKind, SignatureBlock, SignedText};
pub use crypto::{CipherText, CryptoEngine, SessionKey, Signature, WrappedKey};
pub use error::{CryptoError, MalformedEnvelope};
pub use keys::{KeyPair, KeyStrength, PrivateKey, PublicKey, MIN_KEY_BITS};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
