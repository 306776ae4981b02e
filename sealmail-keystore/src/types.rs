//! Core types: Identity, KeyHalf, KeyStatus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KeystoreError;

pub use sealmail_envelope::KeyStrength;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Name of a key-pair owner, usually an email address.
///
/// Only used as a lookup key; deliverability is never checked.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Surrounding whitespace is dropped. Empty names and control characters are rejected.
    pub fn new(name: impl AsRef<str>) -> Result<Self, KeystoreError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(KeystoreError::InvalidParameter("identity is empty".into()));
        }
        if name.chars().any(char::is_control) {
            return Err(KeystoreError::InvalidParameter(
                "identity contains control characters".into(),
            ));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form: `[A-Za-z0-9-.@+_]` kept, every other byte `%XX`.
    pub fn file_stem(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for b in self.0.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'@' | b'+' | b'_') {
                out.push(b as char);
            } else {
                out.push_str(&format!("%{:02X}", b));
            }
        }
        out
    }

    /// Inverse of [`Identity::file_stem`]. `None` for names this crate did not write.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let bytes = stem.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        Self::new(String::from_utf8(out).ok()?).ok()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = KeystoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for Identity {
    type Error = KeystoreError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Key halves
// ---------------------------------------------------------------------------

/// Which half of a key pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyHalf {
    Public,
    Private,
}

impl KeyHalf {
    pub const BOTH: [KeyHalf; 2] = [KeyHalf::Public, KeyHalf::Private];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyHalf::Public => "public",
            KeyHalf::Private => "private",
        }
    }
}

impl fmt::Display for KeyHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which halves are stored and readable for one identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub has_public: bool,
    pub has_private: bool,
}

impl KeyStatus {
    /// Both halves present.
    pub fn is_complete(&self) -> bool {
        self.has_public && self.has_private
    }

    pub fn is_empty(&self) -> bool {
        !self.has_public && !self.has_private
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.has_public, self.has_private) {
            (true, true) => "key pair",
            (true, false) => "public key only",
            (false, true) => "private key only",
            (false, false) => "no keys",
        };
        f.write_str(label)
    }
}
