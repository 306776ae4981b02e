//! Envelope text armor.
//!
//! Encrypted block:
//!   -----BEGIN ENCRYPTED MESSAGE-----
//!   Recipient: <identity>
//!   Wrapped-Key: <base64>
//!   Content: <base64>
//!   -----END ENCRYPTED MESSAGE-----
//!
//! Signature block, appended after a blank line to the text it signs:
//!   -----BEGIN DIGITAL SIGNATURE-----
//!   Sender: <identity>
//!   Signature: <base64>
//!   Timestamp: <RFC 2822 date>
//!   -----END DIGITAL SIGNATURE-----
//!
//! Markers must occupy a whole line. Parsing tolerates CRLF, trailing
//! whitespace and trailing blank lines. The signed bytes are the
//! [`canonicalize`]d text before the signature block.

use chrono::{DateTime, FixedOffset, Utc};

use crate::crypto::{CipherText, Signature, WrappedKey};
use crate::error::MalformedEnvelope;

pub const ENCRYPTED_BEGIN: &str = "-----BEGIN ENCRYPTED MESSAGE-----";
pub const ENCRYPTED_END: &str = "-----END ENCRYPTED MESSAGE-----";
pub const SIGNATURE_BEGIN: &str = "-----BEGIN DIGITAL SIGNATURE-----";
pub const SIGNATURE_END: &str = "-----END DIGITAL SIGNATURE-----";

/// Blank line between a non-empty payload and its signature block.
const SIGNATURE_SEPARATOR: &str = "\n\n";

pub const LABEL_RECIPIENT: &str = "Recipient";
pub const LABEL_WRAPPED_KEY: &str = "Wrapped-Key";
pub const LABEL_CONTENT: &str = "Content";
pub const LABEL_SENDER: &str = "Sender";
pub const LABEL_SIGNATURE: &str = "Signature";
pub const LABEL_TIMESTAMP: &str = "Timestamp";

// ---------------------------------------------------------------------------
// Decoded shapes
// ---------------------------------------------------------------------------

/// Fields of an encrypted block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlock {
    pub recipient: Option<String>,
    pub wrapped_key: WrappedKey,
    pub content: CipherText,
}

/// Fields of a signature block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureBlock {
    pub signer: String,
    pub signature: Signature,
    /// Advisory only; not covered by the signature.
    pub timestamp: Option<String>,
}

impl SignatureBlock {
    pub fn signed_at(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc2822(t).ok())
    }
}

/// A signature block split from the text it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedText {
    /// Everything before the signature block, as transmitted.
    pub payload: String,
    pub block: SignatureBlock,
}

impl SignedText {
    /// The text the signature covers.
    pub fn canonical_payload(&self) -> String {
        canonicalize(&self.payload)
    }
}

/// Which layers an envelope carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Plain,
    Encrypted,
    Signed,
    Both,
}

/// A fully parsed envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Plain(String),
    Encrypted(EncryptedBlock),
    Signed {
        payload: String,
        signature: SignatureBlock,
    },
    /// Encrypted block signed as a unit; `payload` is the signed text of the block.
    Both {
        encrypted: EncryptedBlock,
        payload: String,
        signature: SignatureBlock,
    },
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Plain(_) => EnvelopeKind::Plain,
            Envelope::Encrypted(_) => EnvelopeKind::Encrypted,
            Envelope::Signed { .. } => EnvelopeKind::Signed,
            Envelope::Both { .. } => EnvelopeKind::Both,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode_encrypted(recipient: &str, wrapped_key: &WrappedKey, content: &CipherText) -> String {
    let mut out = String::with_capacity(
        ENCRYPTED_BEGIN.len() + ENCRYPTED_END.len() + recipient.len()
            + wrapped_key.as_str().len() + content.as_str().len() + 64,
    );
    out.push_str(ENCRYPTED_BEGIN);
    out.push('\n');
    push_field(&mut out, LABEL_RECIPIENT, recipient);
    push_field(&mut out, LABEL_WRAPPED_KEY, wrapped_key.as_str());
    push_field(&mut out, LABEL_CONTENT, content.as_str());
    out.push_str(ENCRYPTED_END);
    out
}

/// Append a signature block to `base`. The caller must have signed `canonicalize(base)`.
pub fn encode_signed(base: &str, signer: &str, signature: &Signature, timestamp: &DateTime<Utc>) -> String {
    let mut out = String::with_capacity(base.len() + signature.as_str().len() + 160);
    if !base.is_empty() {
        out.push_str(base);
        out.push_str(SIGNATURE_SEPARATOR);
    }
    out.push_str(SIGNATURE_BEGIN);
    out.push('\n');
    push_field(&mut out, LABEL_SENDER, signer);
    push_field(&mut out, LABEL_SIGNATURE, signature.as_str());
    push_field(&mut out, LABEL_TIMESTAMP, &timestamp.to_rfc2822());
    out.push_str(SIGNATURE_END);
    out
}

/// Signed form of `text`: trailing whitespace stripped from every line,
/// lines joined with `\n`, trailing blank lines removed.
pub fn canonicalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    let keep = out.trim_end_matches('\n').len();
    out.truncate(keep);
    out
}

fn push_field(out: &mut String, label: &str, value: &str) {
    out.push_str(label);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

// ---------------------------------------------------------------------------
// Structural detection
// ---------------------------------------------------------------------------

/// A BEGIN ENCRYPTED marker line followed later by its END marker line.
pub fn is_encrypted_envelope(text: &str) -> bool {
    has_block(text, ENCRYPTED_BEGIN, ENCRYPTED_END)
}

/// A BEGIN SIGNATURE marker line followed later by its END marker line.
pub fn is_signed_envelope(text: &str) -> bool {
    has_block(text, SIGNATURE_BEGIN, SIGNATURE_END)
}

fn has_block(text: &str, begin: &str, end: &str) -> bool {
    let mut saw_begin = false;
    for line in lines(text) {
        if line.text == begin {
            saw_begin = true;
        } else if saw_begin && line.text == end {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode the first encrypted block in `text`. Text outside the block is ignored.
pub fn decode_encrypted(text: &str) -> Result<EncryptedBlock, MalformedEnvelope> {
    let all: Vec<Line<'_>> = lines(text).collect();
    let start = all
        .iter()
        .position(|l| l.text == ENCRYPTED_BEGIN)
        .ok_or_else(|| MalformedEnvelope::new("missing BEGIN ENCRYPTED MESSAGE marker"))?;
    let len = all[start + 1..]
        .iter()
        .position(|l| l.text == ENCRYPTED_END)
        .ok_or_else(|| MalformedEnvelope::new("missing END ENCRYPTED MESSAGE marker"))?;

    let mut fields = Fields::parse(&all[start + 1..start + 1 + len])?;
    Ok(EncryptedBlock {
        recipient: fields.take(LABEL_RECIPIENT),
        wrapped_key: WrappedKey::new(fields.require(LABEL_WRAPPED_KEY)?),
        content: CipherText::new(fields.require(LABEL_CONTENT)?),
    })
}

/// Split off the last signature block. `Ok(None)` when the text is unsigned.
pub fn decode_signed(text: &str) -> Result<Option<SignedText>, MalformedEnvelope> {
    let all: Vec<Line<'_>> = lines(text).collect();
    let Some(start) = all.iter().rposition(|l| l.text == SIGNATURE_BEGIN) else {
        return Ok(None);
    };
    let len = all[start + 1..]
        .iter()
        .position(|l| l.text == SIGNATURE_END)
        .ok_or_else(|| MalformedEnvelope::new("missing END DIGITAL SIGNATURE marker"))?;
    let end = start + 1 + len;

    if all[end + 1..].iter().any(|l| !l.text.is_empty()) {
        return Err(MalformedEnvelope::new("content after signature block"));
    }

    let mut fields = Fields::parse(&all[start + 1..end])?;
    let block = SignatureBlock {
        signer: fields.require(LABEL_SENDER)?,
        signature: Signature::new(fields.require(LABEL_SIGNATURE)?),
        timestamp: fields.take(LABEL_TIMESTAMP),
    };
    let before = &text[..all[start].offset];
    let payload = before
        .strip_suffix(SIGNATURE_SEPARATOR)
        .or_else(|| before.strip_suffix("\r\n\r\n"))
        .unwrap_or(before);
    Ok(Some(SignedText {
        payload: payload.to_owned(),
        block,
    }))
}

/// Parse every layer of an envelope without touching any key.
///
/// Text without a complete signature block is never treated as signed.
pub fn parse(text: &str) -> Result<Envelope, MalformedEnvelope> {
    let signed = if is_signed_envelope(text) { decode_signed(text)? } else { None };
    match signed {
        Some(SignedText { payload, block }) => {
            if is_encrypted_envelope(&payload) {
                Ok(Envelope::Both {
                    encrypted: decode_encrypted(&payload)?,
                    payload,
                    signature: block,
                })
            } else {
                Ok(Envelope::Signed { payload, signature: block })
            }
        }
        None if is_encrypted_envelope(text) => Ok(Envelope::Encrypted(decode_encrypted(text)?)),
        None => Ok(Envelope::Plain(text.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Line scanner
// ---------------------------------------------------------------------------

struct Line<'a> {
    /// Byte offset of the raw line within the input.
    offset: usize,
    /// Line with surrounding whitespace and line ending removed.
    text: &'a str,
}

fn lines(text: &str) -> impl Iterator<Item = Line<'_>> {
    let mut offset = 0usize;
    text.split_inclusive('\n').map(move |raw| {
        let line = Line { offset, text: raw.trim() };
        offset += raw.len();
        line
    })
}

/// `Label: value` pairs of one block, in order.
struct Fields(Vec<(String, String)>);

impl Fields {
    fn parse(block: &[Line<'_>]) -> Result<Self, MalformedEnvelope> {
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(block.len());
        for line in block.iter().filter(|l| !l.text.is_empty()) {
            let (label, value) = line
                .text
                .split_once(':')
                .ok_or_else(|| MalformedEnvelope::new(format!("unlabeled line in block: {:.32}", line.text)))?;
            let label = label.trim();
            if pairs.iter().any(|(l, _)| l == label) {
                return Err(MalformedEnvelope::new(format!("duplicate {} field", label)));
            }
            pairs.push((label.to_owned(), value.trim().to_owned()));
        }
        Ok(Self(pairs))
    }

    fn take(&mut self, label: &str) -> Option<String> {
        let idx = self.0.iter().position(|(l, _)| l == label)?;
        let (_, value) = self.0.remove(idx);
        (!value.is_empty()).then_some(value)
    }

    fn require(&mut self, label: &str) -> Result<String, MalformedEnvelope> {
        self.take(label)
            .ok_or_else(|| MalformedEnvelope::new(format!("missing {} field", label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 0).unwrap()
    }

    fn sample_encrypted() -> String {
        encode_encrypted("alice@example.com", &WrappedKey::new("V1JBUA=="), &CipherText::new("Q09OVEVOVA=="))
    }

    #[test]
    fn encrypted_layout_is_exact() {
        assert_eq!(
            sample_encrypted(),
            "-----BEGIN ENCRYPTED MESSAGE-----\n\
             Recipient: alice@example.com\n\
             Wrapped-Key: V1JBUA==\n\
             Content: Q09OVEVOVA==\n\
             -----END ENCRYPTED MESSAGE-----"
        );
    }

    #[test]
    fn encrypted_roundtrip() {
        let block = decode_encrypted(&sample_encrypted()).unwrap();
        assert_eq!(block.recipient.as_deref(), Some("alice@example.com"));
        assert_eq!(block.wrapped_key.as_str(), "V1JBUA==");
        assert_eq!(block.content.as_str(), "Q09OVEVOVA==");
    }

    #[test]
    fn signed_layout_and_roundtrip() {
        let text = encode_signed("hello\nworld", "bob@example.com", &Signature::new("U0lH"), &ts());
        assert!(text.starts_with("hello\nworld\n\n-----BEGIN DIGITAL SIGNATURE-----\nSender: bob@example.com\n"));
        assert!(text.ends_with("-----END DIGITAL SIGNATURE-----"));

        let signed = decode_signed(&text).unwrap().unwrap();
        assert_eq!(signed.payload, "hello\nworld");
        assert_eq!(signed.block.signer, "bob@example.com");
        assert_eq!(signed.block.signature.as_str(), "U0lH");
        assert_eq!(signed.block.signed_at().unwrap(), ts());
    }

    #[test]
    fn signed_empty_payload() {
        let text = encode_signed("", "bob", &Signature::new("U0lH"), &ts());
        assert!(text.starts_with(SIGNATURE_BEGIN));
        assert_eq!(decode_signed(&text).unwrap().unwrap().payload, "");
    }

    #[test]
    fn tolerates_crlf_and_trailing_whitespace() {
        let text = sample_encrypted().replace('\n', "  \r\n") + "\r\n\r\n";
        assert!(is_encrypted_envelope(&text));
        let block = decode_encrypted(&text).unwrap();
        assert_eq!(block.content.as_str(), "Q09OVEVOVA==");

        let signed = encode_signed("line one\nline two", "bob", &Signature::new("U0lH"), &ts());
        let mangled = signed.replace('\n', " \r\n") + "\r\n";
        let back = decode_signed(&mangled).unwrap().unwrap();
        assert_eq!(back.canonical_payload(), "line one\nline two");
    }

    #[test]
    fn signed_payload_keeps_original_text() {
        let base = "line with trailing spaces   \r\nnext\n\n";
        let text = encode_signed(base, "bob", &Signature::new("U0lH"), &ts());
        let signed = decode_signed(&text).unwrap().unwrap();
        assert_eq!(signed.payload, base);
        assert_eq!(signed.canonical_payload(), "line with trailing spaces\nnext");
    }

    #[test]
    fn unterminated_signature_marker_parses_as_plain() {
        let text = format!("see below\n{}\nno end marker here", SIGNATURE_BEGIN);
        assert!(!is_signed_envelope(&text));
        assert_eq!(parse(&text).unwrap(), Envelope::Plain(text.clone()));
    }

    #[test]
    fn markers_must_be_whole_lines() {
        let inline = format!("see {} and {}", ENCRYPTED_BEGIN, ENCRYPTED_END);
        assert!(!is_encrypted_envelope(&inline));
        assert!(!is_signed_envelope("quoting -----BEGIN DIGITAL SIGNATURE----- inline"));
    }

    #[test]
    fn end_before_begin_is_not_a_block() {
        let text = format!("{}\n{}", ENCRYPTED_END, ENCRYPTED_BEGIN);
        assert!(!is_encrypted_envelope(&text));
    }

    #[test]
    fn missing_markers_or_fields_are_malformed() {
        assert!(decode_encrypted("just text").is_err());

        let unterminated = format!("{}\nWrapped-Key: a\nContent: b\n", ENCRYPTED_BEGIN);
        assert!(decode_encrypted(&unterminated).is_err());

        let no_content = format!("{}\nWrapped-Key: a\n{}", ENCRYPTED_BEGIN, ENCRYPTED_END);
        let err = decode_encrypted(&no_content).unwrap_err();
        assert!(err.0.contains("Content"));

        let no_sig = format!("body\n\n{}\nSender: bob\n{}", SIGNATURE_BEGIN, SIGNATURE_END);
        assert!(decode_signed(&no_sig).is_err());
    }

    #[test]
    fn recipient_and_timestamp_are_optional() {
        let text = format!("{}\nWrapped-Key: a\nContent: b\n{}", ENCRYPTED_BEGIN, ENCRYPTED_END);
        assert_eq!(decode_encrypted(&text).unwrap().recipient, None);

        let text = format!("x\n\n{}\nSender: bob\nSignature: c2ln\n{}", SIGNATURE_BEGIN, SIGNATURE_END);
        let signed = decode_signed(&text).unwrap().unwrap();
        assert_eq!(signed.block.timestamp, None);
        assert_eq!(signed.block.signed_at(), None);
    }

    #[test]
    fn duplicate_and_unlabeled_lines_are_malformed() {
        let dup = format!("{}\nWrapped-Key: a\nWrapped-Key: b\nContent: c\n{}", ENCRYPTED_BEGIN, ENCRYPTED_END);
        assert!(decode_encrypted(&dup).unwrap_err().0.contains("duplicate"));

        let junk = format!("{}\nWrapped-Key: a\nnonsense\nContent: c\n{}", ENCRYPTED_BEGIN, ENCRYPTED_END);
        assert!(decode_encrypted(&junk).is_err());
    }

    #[test]
    fn unknown_labels_are_ignored() {
        let text = format!(
            "{}\nVersion: 1\nWrapped-Key: a\nContent: c\n{}",
            ENCRYPTED_BEGIN, ENCRYPTED_END
        );
        assert_eq!(decode_encrypted(&text).unwrap().content.as_str(), "c");
    }

    #[test]
    fn unsigned_text_decodes_to_none() {
        assert_eq!(decode_signed("plain body").unwrap(), None);
    }

    #[test]
    fn trailing_content_after_signature_is_malformed() {
        let text = encode_signed("body", "bob", &Signature::new("U0lH"), &ts()) + "\nappended";
        assert!(is_signed_envelope(&text));
        assert!(decode_signed(&text).is_err());
    }

    #[test]
    fn last_signature_block_wins() {
        let inner = encode_signed("body", "carol", &Signature::new("SU5ORVI="), &ts());
        let outer = encode_signed(&inner, "dave", &Signature::new("T1VURVI="), &ts());
        let signed = decode_signed(&outer).unwrap().unwrap();
        assert_eq!(signed.block.signer, "dave");
        assert_eq!(signed.payload, inner);
    }

    #[test]
    fn parse_classifies_all_four_kinds() {
        let enc = sample_encrypted();
        let both = encode_signed(&enc, "bob", &Signature::new("U0lH"), &ts());
        let signed = encode_signed("hi", "bob", &Signature::new("U0lH"), &ts());

        assert_eq!(parse("hello").unwrap().kind(), EnvelopeKind::Plain);
        assert_eq!(parse(&enc).unwrap().kind(), EnvelopeKind::Encrypted);
        assert_eq!(parse(&signed).unwrap().kind(), EnvelopeKind::Signed);

        match parse(&both).unwrap() {
            Envelope::Both { encrypted, payload, signature } => {
                assert_eq!(encrypted.content.as_str(), "Q09OVEVOVA==");
                assert_eq!(payload, enc);
                assert_eq!(signature.signer, "bob");
            }
            other => panic!("expected Both, got {:?}", other),
        }
    }

    #[test]
    fn canonical_form() {
        assert_eq!(canonicalize("a  \r\nb\t\n\n\n"), "a\nb");
        assert_eq!(canonicalize("\n\nx"), "\n\nx");
        assert_eq!(canonicalize(""), "");
    }

    proptest! {
        #[test]
        fn encrypted_fields_roundtrip(
            recipient in "[a-z0-9._%+-]{1,20}@[a-z0-9.-]{1,20}",
            wrapped in "[A-Za-z0-9+/]{4,200}={0,2}",
            content in "[A-Za-z0-9+/]{4,400}={0,2}",
        ) {
            let text = encode_encrypted(&recipient, &WrappedKey::new(wrapped.clone()), &CipherText::new(content.clone()));
            let block = decode_encrypted(&text).unwrap();
            prop_assert_eq!(block.recipient, Some(recipient));
            prop_assert_eq!(block.wrapped_key.into_string(), wrapped);
            prop_assert_eq!(block.content.into_string(), content);
        }

        #[test]
        fn signed_payload_is_base(base in "[ -~\r\n]{0,300}") {
            let text = encode_signed(&base, "bob", &Signature::new("U0lH"), &ts());
            let signed = decode_signed(&text).unwrap().unwrap();
            prop_assert_eq!(signed.canonical_payload(), canonicalize(&base));
            prop_assert_eq!(signed.payload, base);
        }
    }
}
