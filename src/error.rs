//! Error types for the crypto engine and the envelope codec.

use thiserror::Error;

/// Failures of the cryptographic primitives.
///
/// `DecryptionFailed` and `UnwrapFailed` are deliberately uniform: they never
/// say which check failed (bad tag, bad padding, wrong key, bad encoding).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Content could not be authenticated and decrypted with the given key.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The wrapped session key could not be recovered with the given private key.
    #[error("session key unwrap failed")]
    UnwrapFailed,

    /// Key material could not be decoded or is unacceptable.
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// The operation could not run at all (RNG failure, malformed signature, ...).
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// The envelope text is missing a marker or a required labeled field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed envelope: {0}")]
pub struct MalformedEnvelope(pub String);

impl MalformedEnvelope {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
