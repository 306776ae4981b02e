//! # Sealmail Keystore
//!
//! Per-identity RSA key storage and the secure mail pipeline.
//!
//! Built on top of `sealmail-envelope` for the crypto engine and the
//! envelope text format.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sealmail_keystore::*;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let ks = Arc::new(KeyStore::new(
//!     Arc::new(InMemoryBackend::new()),
//!     Arc::new(TracingAuditSink),
//! ));
//! let alice = Identity::new("alice@example.com").unwrap();
//! ks.generate(&alice, 2048).await.unwrap();
//!
//! let mailer = SecureMailer::new(ks);
//! let text = mailer
//!     .prepare_outgoing(&alice, &alice, "hello", SendOptions::encrypted_and_signed())
//!     .await
//!     .unwrap();
//! let msg = mailer.process_incoming(&text, &alice).await;
//! assert_eq!(msg.display_content, "hello");
//! assert!(msg.signature_valid);
//! # });
//! ```

pub mod audit;
pub mod error;
pub mod keystore;
pub mod mailer;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use audit::{AuditAction, AuditEvent, AuditSinkSync, FileAuditSink, InMemoryAuditSink, TracingAuditSink};
pub use error::{ErrorKind, KeystoreError, MailError};
pub use keystore::KeyStore;
pub use mailer::{ProcessedMessage, SecureMailer, SendOptions, SignatureStatus};
pub use storage::{FileBackend, InMemoryBackend, StorageBackend};
pub use types::{Identity, KeyHalf, KeyStatus, KeyStrength};

pub use sealmail_envelope::{KeyPair, PrivateKey, PublicKey};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
