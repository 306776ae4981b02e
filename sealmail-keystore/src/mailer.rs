//! The secure mail pipeline: sealing outgoing text and unwinding incoming envelopes.
//!
//! Outgoing order is encrypt, then sign: the signature covers the armored
//! encrypted block exactly as transmitted. Incoming processing is driven by
//! the envelope text alone and never fails; every fault is reported inside
//! the returned [`ProcessedMessage`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use sealmail_envelope::armor::{self, SignedText};
use sealmail_envelope::{CryptoEngine, MalformedEnvelope, PrivateKey, PublicKey};

use crate::error::{ErrorKind, KeystoreError, MailError};
use crate::keystore::KeyStore;
use crate::types::Identity;

// ---------------------------------------------------------------------------
// Request and result types
// ---------------------------------------------------------------------------

/// Which layers to apply to an outgoing message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub encrypt: bool,
    pub sign: bool,
}

impl SendOptions {
    pub fn new(encrypt: bool, sign: bool) -> Self {
        Self { encrypt, sign }
    }

    pub fn encrypted() -> Self {
        Self::new(true, false)
    }

    pub fn signed() -> Self {
        Self::new(false, true)
    }

    pub fn encrypted_and_signed() -> Self {
        Self::new(true, true)
    }
}

/// Outcome of checking a signature block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    #[default]
    NotSigned,
    Valid,
    /// Verification ran and the signature does not match.
    Invalid,
    /// The signer's public key is not in the keystore.
    SignerKeyUnknown,
    /// The signature field is malformed or the signer's key could not be read.
    Unverifiable,
}

/// Result of processing one incoming message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessedMessage {
    pub original_envelope_text: String,
    /// Fully unwound text, or a description of the failure. Never raw ciphertext.
    pub display_content: String,
    pub was_encrypted: bool,
    pub was_signed: bool,
    /// Meaningful only if `was_signed`.
    pub signature_valid: bool,
    pub signature_status: SignatureStatus,
    pub signer_identity: Option<String>,
    /// Advisory timestamp from the signature block, as transmitted.
    pub signed_at: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl ProcessedMessage {
    fn new(text: &str) -> Self {
        Self {
            original_envelope_text: text.to_owned(),
            display_content: String::new(),
            was_encrypted: false,
            was_signed: false,
            signature_valid: false,
            signature_status: SignatureStatus::NotSigned,
            signer_identity: None,
            signed_at: None,
            error_kind: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_kind.is_none()
    }

    /// Explanation of the signature verdict for display, if there is one.
    pub fn signature_note(&self) -> Option<&'static str> {
        match self.signature_status {
            SignatureStatus::NotSigned => None,
            SignatureStatus::Valid => Some("signature verified"),
            SignatureStatus::Invalid => Some("signature does not match the message"),
            SignatureStatus::SignerKeyUnknown => Some("could not verify, signer's key unknown"),
            SignatureStatus::Unverifiable => Some("signature could not be checked"),
        }
    }

    fn record_signature(&mut self, signed: &SignedText, status: SignatureStatus) {
        self.was_signed = true;
        self.signature_status = status;
        self.signature_valid = status == SignatureStatus::Valid;
        self.signer_identity = Some(signed.block.signer.clone());
        self.signed_at = signed.block.timestamp.clone();
    }

    fn fail(mut self, err: &MailError) -> Self {
        self.error_kind = Some(err.kind());
        self.display_content = format!("Error processing message: {}", err);
        self
    }
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

/// Combines the keystore, the crypto engine and the envelope codec.
#[derive(Clone)]
pub struct SecureMailer {
    keystore: Arc<KeyStore>,
    engine: CryptoEngine,
}

impl SecureMailer {
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        Self {
            keystore,
            engine: CryptoEngine::new(),
        }
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Build the text to transmit. Fails as a whole; never returns a partially processed envelope.
    ///
    /// With neither option set the plaintext is returned untouched.
    pub async fn prepare_outgoing(
        &self,
        sender: &Identity,
        recipient: &Identity,
        plaintext: &str,
        options: SendOptions,
    ) -> Result<String, MailError> {
        // All keys are resolved before any crypto runs.
        let recipient_key = if options.encrypt {
            Some(self.recipient_public(recipient).await?)
        } else {
            None
        };
        let sender_key = if options.sign {
            Some(self.sender_private(sender).await?)
        } else {
            None
        };

        let mut current = plaintext.to_owned();

        if let Some(key) = recipient_key {
            let session = self.engine.generate_session_key()?;
            let content = self.engine.symmetric_encrypt(&current, &session)?;
            let wrapped = self.engine.wrap_key(&session, &key)?;
            current = armor::encode_encrypted(recipient.as_str(), &wrapped, &content);
            debug!(%sender, %recipient, "message encrypted");
        }

        if let Some(key) = sender_key {
            let signature = self.engine.sign(&armor::canonicalize(&current), &key)?;
            current = armor::encode_signed(&current, sender.as_str(), &signature, &Utc::now());
            debug!(%sender, "message signed");
        }

        Ok(current)
    }

    async fn recipient_public(&self, recipient: &Identity) -> Result<PublicKey, MailError> {
        match self.keystore.load_public(recipient).await {
            Ok(key) => Ok(key),
            Err(KeystoreError::KeyNotFound { .. }) => Err(MailError::RecipientKeyMissing(recipient.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn sender_private(&self, sender: &Identity) -> Result<PrivateKey, MailError> {
        match self.keystore.load_private(sender).await {
            Ok(key) => Ok(key),
            Err(KeystoreError::KeyNotFound { .. }) => Err(MailError::SenderKeyMissing(sender.clone())),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Incoming
    // -----------------------------------------------------------------------

    /// Unwind an incoming envelope for `recipient`.
    ///
    /// An outer signature is checked first, over the text it covers. That text
    /// is then decrypted if it is an encrypted block. A signature block found
    /// inside decrypted text is checked when there was no outer one. Text
    /// without a complete signature block is treated as unsigned.
    pub async fn process_incoming(&self, text: &str, recipient: &Identity) -> ProcessedMessage {
        let mut msg = ProcessedMessage::new(text);

        let outer = match signature_of(text) {
            Ok(outer) => outer,
            Err(e) => {
                msg.was_signed = true;
                warn!(%recipient, error = %e, "unreadable signature block");
                return msg.fail(&MailError::from(e));
            }
        };

        let body = match &outer {
            Some(signed) => {
                let status = self.verify(signed).await;
                msg.record_signature(signed, status);
                signed.payload.clone()
            }
            None => text.to_owned(),
        };

        if !armor::is_encrypted_envelope(&body) {
            msg.display_content = body;
            return msg;
        }

        msg.was_encrypted = true;
        let plaintext = match self.decrypt(&body, recipient).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(%recipient, kind = %e.kind(), "message could not be decrypted");
                return msg.fail(&e);
            }
        };

        if outer.is_none() {
            match signature_of(&plaintext) {
                Ok(Some(inner)) => {
                    let status = self.verify(&inner).await;
                    msg.record_signature(&inner, status);
                    msg.display_content = inner.payload;
                    return msg;
                }
                Ok(None) => {}
                Err(e) => {
                    msg.was_signed = true;
                    return msg.fail(&MailError::from(e));
                }
            }
        }

        msg.display_content = plaintext;
        msg
    }

    /// Process each message independently; one failure never affects the others.
    pub async fn process_batch<I, S>(&self, messages: I, recipient: &Identity) -> Vec<ProcessedMessage>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for text in messages {
            out.push(self.process_incoming(text.as_ref(), recipient).await);
        }
        out
    }

    async fn decrypt(&self, body: &str, recipient: &Identity) -> Result<String, MailError> {
        let block = armor::decode_encrypted(body)?;
        if let Some(addressed) = block.recipient.as_deref() {
            if addressed != recipient.as_str() {
                debug!(%recipient, addressed, "envelope addressed to another identity");
            }
        }
        let private = match self.keystore.load_private(recipient).await {
            Ok(key) => key,
            Err(KeystoreError::KeyNotFound { .. }) => {
                return Err(MailError::RecipientKeyMissing(recipient.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let session = self.engine.unwrap_key(&block.wrapped_key, &private)?;
        Ok(self.engine.symmetric_decrypt(&block.content, &session)?)
    }

    async fn verify(&self, signed: &SignedText) -> SignatureStatus {
        let Ok(signer) = Identity::new(&signed.block.signer) else {
            return SignatureStatus::SignerKeyUnknown;
        };
        let key = match self.keystore.load_public(&signer).await {
            Ok(key) => key,
            Err(KeystoreError::KeyNotFound { .. }) => {
                debug!(%signer, "signer's public key unknown");
                return SignatureStatus::SignerKeyUnknown;
            }
            Err(e) => {
                warn!(%signer, error = %e, "signer's public key unavailable");
                return SignatureStatus::Unverifiable;
            }
        };
        match self.engine.verify(&signed.canonical_payload(), &signed.block.signature, &key) {
            Ok(true) => SignatureStatus::Valid,
            Ok(false) => {
                warn!(%signer, "signature does not match");
                SignatureStatus::Invalid
            }
            Err(e) => {
                warn!(%signer, error = %e, "signature could not be verified");
                SignatureStatus::Unverifiable
            }
        }
    }
}

/// The trailing signature block of `text`, if it carries a complete one.
fn signature_of(text: &str) -> Result<Option<SignedText>, MalformedEnvelope> {
    if armor::is_signed_envelope(text) {
        armor::decode_signed(text)
    } else {
        Ok(None)
    }
}
