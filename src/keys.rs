//! RSA key pairs and their encodings.
//!
//! Encodings:
//!   export/import  = base64(DER SubjectPublicKeyInfo)
//!   on disk        = PEM SPKI (public), PEM PKCS#8 (private)
//!   fingerprint    = SHA-256(DER SPKI), hex, colon-grouped by 2 bytes

use core::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand_core::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Smallest modulus accepted from imported key material.
pub const MIN_KEY_BITS: usize = 2048;

// ---------------------------------------------------------------------------
// Key strength
// ---------------------------------------------------------------------------

/// Supported RSA modulus sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum KeyStrength {
    #[default]
    Rsa2048,
    Rsa4096,
}

impl KeyStrength {
    pub const fn bits(self) -> usize {
        match self {
            KeyStrength::Rsa2048 => 2048,
            KeyStrength::Rsa4096 => 4096,
        }
    }

    /// Map a requested bit count onto a supported strength.
    pub fn from_bits(bits: usize) -> Option<Self> {
        match bits {
            2048 => Some(KeyStrength::Rsa2048),
            4096 => Some(KeyStrength::Rsa4096),
            _ => None,
        }
    }
}

impl fmt::Display for KeyStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RSA-{}", self.bits())
    }
}

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// An RSA public key. Freely shareable.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    pub fn bits(&self) -> usize {
        self.inner.size() * 8
    }

    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.inner
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Self::checked(inner)
    }

    pub fn to_pem(&self) -> Result<String, CryptoError> {
        self.inner
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))
    }

    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let inner = RsaPublicKey::from_public_key_pem(pem.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Self::checked(inner)
    }

    /// Canonical shareable form: base64 of the DER SubjectPublicKeyInfo.
    pub fn export(&self) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.to_der()?))
    }

    /// Inverse of [`PublicKey::export`]. Surrounding and embedded whitespace is ignored
    /// so blobs survive being pasted across wrapped lines.
    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(CryptoError::InvalidKeyEncoding("empty key".into()));
        }
        let der = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| CryptoError::InvalidKeyEncoding(format!("base64: {}", e)))?;
        Self::from_der(&der)
    }

    /// SHA-256 fingerprint of the DER encoding, for out-of-band comparison.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        let digest = Sha256::digest(self.to_der()?);
        let groups: Vec<String> = digest.chunks(2).map(hex::encode).collect();
        Ok(groups.join(":"))
    }

    pub(crate) fn rsa(&self) -> &RsaPublicKey {
        &self.inner
    }

    fn checked(inner: RsaPublicKey) -> Result<Self, CryptoError> {
        let key = Self { inner };
        if key.bits() < MIN_KEY_BITS {
            return Err(CryptoError::InvalidKeyEncoding(format!(
                "{}-bit modulus is below the {}-bit minimum",
                key.bits(),
                MIN_KEY_BITS
            )));
        }
        Ok(key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey").field("bits", &self.bits()).finish()
    }
}

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// An RSA private key. Zeroized on drop; `Debug` never prints key material.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    pub fn bits(&self) -> usize {
        self.inner.size() * 8
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.to_public_key(),
        }
    }

    pub fn to_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.inner
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))
    }

    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        Ok(Self { inner })
    }

    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.inner
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Key pair
// ---------------------------------------------------------------------------

/// Public and private halves belonging to one identity.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh pair from the OS RNG. Slow for 4096 bits; run it off async threads.
    pub fn generate(strength: KeyStrength) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, strength.bits())
            .map_err(|e| CryptoError::Crypto(format!("key generation: {}", e)))?;
        let public = private.to_public_key();
        Ok(Self {
            public: PublicKey { inner: public },
            private: PrivateKey { inner: private },
        })
    }

    /// True if `public` is the public half of `private`.
    pub fn is_consistent(&self) -> bool {
        self.private.public_key() == self.public
    }
}
