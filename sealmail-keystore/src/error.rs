//! Error types for the keystore and the mail pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use sealmail_envelope::{CryptoError, MalformedEnvelope};

use crate::types::{Identity, KeyHalf};

// ---------------------------------------------------------------------------
// Keystore error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum KeystoreError {
    /// The half is absent, unreadable or does not parse.
    #[error("no {half} key for {identity}")]
    KeyNotFound { identity: Identity, half: KeyHalf },

    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Key generation could not run.
    #[error(transparent)]
    Crypto(CryptoError),
}

impl KeystoreError {
    pub(crate) fn not_found(identity: &Identity, half: KeyHalf) -> Self {
        Self::KeyNotFound { identity: identity.clone(), half }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::InvalidKeyEncoding(_) => ErrorKind::InvalidKeyEncoding,
            Self::StorageError(_) => ErrorKind::StorageError,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::Crypto(e) => crypto_kind(e),
        }
    }
}

impl From<CryptoError> for KeystoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::InvalidKeyEncoding(msg) => Self::InvalidKeyEncoding(msg),
            other => Self::Crypto(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Mail pipeline error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MailError {
    /// Raised before any crypto runs; no envelope text is produced.
    #[error("no usable key for recipient {0}")]
    RecipientKeyMissing(Identity),

    /// Raised before any crypto runs; no envelope text is produced.
    #[error("no private key for sender {0}")]
    SenderKeyMissing(Identity),

    #[error(transparent)]
    Keystore(#[from] KeystoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Envelope(#[from] MalformedEnvelope),
}

impl MailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RecipientKeyMissing(_) => ErrorKind::RecipientKeyMissing,
            Self::SenderKeyMissing(_) => ErrorKind::SenderKeyMissing,
            Self::Keystore(e) => e.kind(),
            Self::Crypto(e) => crypto_kind(e),
            Self::Envelope(_) => ErrorKind::MalformedEnvelope,
        }
    }
}

fn crypto_kind(e: &CryptoError) -> ErrorKind {
    match e {
        CryptoError::DecryptionFailed => ErrorKind::DecryptionFailed,
        CryptoError::UnwrapFailed => ErrorKind::UnwrapFailed,
        CryptoError::InvalidKeyEncoding(_) => ErrorKind::InvalidKeyEncoding,
        CryptoError::Crypto(_) => ErrorKind::CryptoError,
    }
}

// ---------------------------------------------------------------------------
// Flat error kind
// ---------------------------------------------------------------------------

/// Error category stored alongside a processed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyNotFound,
    InvalidKeyEncoding,
    StorageError,
    InvalidParameter,
    DecryptionFailed,
    UnwrapFailed,
    CryptoError,
    MalformedEnvelope,
    RecipientKeyMissing,
    SenderKeyMissing,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyNotFound => "KeyNotFound",
            Self::InvalidKeyEncoding => "InvalidKeyEncoding",
            Self::StorageError => "StorageError",
            Self::InvalidParameter => "InvalidParameter",
            Self::DecryptionFailed => "DecryptionFailed",
            Self::UnwrapFailed => "UnwrapFailed",
            Self::CryptoError => "CryptoError",
            Self::MalformedEnvelope => "MalformedEnvelope",
            Self::RecipientKeyMissing => "RecipientKeyMissing",
            Self::SenderKeyMissing => "SenderKeyMissing",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
