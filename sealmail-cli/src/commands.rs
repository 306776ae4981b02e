//! Subcommand implementations. Input and output are injected so commands run in tests.

use std::error::Error;
use std::io::{Read, Write};
use std::sync::Arc;

use sealmail_envelope::armor::{self, Envelope, EnvelopeKind};
use sealmail_keystore::{Identity, KeyStatus, KeyStore, SecureMailer, SendOptions};

use crate::config::Config;
use crate::Command;

type CmdResult = Result<(), Box<dyn Error>>;

pub async fn run(cmd: Command, config: &Config, input: &mut impl Read, out: &mut impl Write) -> CmdResult {
    let ks = Arc::new(config.open_keystore()?);
    tracing::debug!(keys_dir = %config.keys_dir.display(), "keystore opened");

    match cmd {
        Command::Keygen { identity, bits } => cmd_keygen(&ks, &identity, bits, out).await,
        Command::Status { identity: Some(identity) } => cmd_status(&ks, &identity, out).await,
        Command::Status { identity: None } | Command::List => cmd_list(&ks, out).await,
        Command::Export { identity } => cmd_export(&ks, &identity, out).await,
        Command::Import { identity, blob } => cmd_import(&ks, &identity, &blob, input, out).await,
        Command::Delete { identity } => cmd_delete(&ks, &identity, out).await,
        Command::Seal { from, to, encrypt, sign } => {
            let options = SendOptions::new(encrypt, sign);
            cmd_seal(SecureMailer::new(ks), &from, &to, options, input, out).await
        }
        Command::Open { recipient, json } => cmd_open(SecureMailer::new(ks), &recipient, json, input, out).await,
        Command::Inspect => cmd_inspect(input, out),
    }
}

fn read_all(input: &mut impl Read) -> Result<String, Box<dyn Error>> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    Ok(text)
}

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

async fn cmd_keygen(ks: &KeyStore, identity: &str, bits: usize, out: &mut impl Write) -> CmdResult {
    let id = Identity::new(identity)?;
    let pair = ks.generate(&id, bits).await?;
    writeln!(out, "Generated RSA-{} key pair for {}", bits, id)?;
    writeln!(out, "Fingerprint: {}", pair.public.fingerprint()?)?;
    Ok(())
}

async fn cmd_status(ks: &KeyStore, identity: &str, out: &mut impl Write) -> CmdResult {
    let id = Identity::new(identity)?;
    let status = ks.status(&id).await?;
    print_status(ks, &id, status, out).await
}

async fn cmd_list(ks: &KeyStore, out: &mut impl Write) -> CmdResult {
    let all = ks.list().await?;
    if all.is_empty() {
        writeln!(out, "No keys stored")?;
    }
    for (id, status) in all {
        print_status(ks, &id, status, out).await?;
    }
    Ok(())
}

async fn print_status(ks: &KeyStore, id: &Identity, status: KeyStatus, out: &mut impl Write) -> CmdResult {
    writeln!(out, "{}: {}", id, status)?;
    if status.has_public {
        let key = ks.load_public(id).await?;
        writeln!(out, "  RSA-{}  {}", key.bits(), key.fingerprint()?)?;
    }
    Ok(())
}

async fn cmd_export(ks: &KeyStore, identity: &str, out: &mut impl Write) -> CmdResult {
    let id = Identity::new(identity)?;
    writeln!(out, "{}", ks.export_public(&id).await?)?;
    Ok(())
}

async fn cmd_import(
    ks: &KeyStore,
    identity: &str,
    blob: &str,
    input: &mut impl Read,
    out: &mut impl Write,
) -> CmdResult {
    let id = Identity::new(identity)?;
    let blob = if blob == "-" { read_all(input)? } else { blob.to_owned() };
    let key = ks.import_public(&id, &blob).await?;
    writeln!(out, "Imported public key for {}", id)?;
    writeln!(out, "Fingerprint: {}", key.fingerprint()?)?;
    Ok(())
}

async fn cmd_delete(ks: &KeyStore, identity: &str, out: &mut impl Write) -> CmdResult {
    let id = Identity::new(identity)?;
    if ks.delete(&id).await? {
        writeln!(out, "Deleted keys for {}", id)?;
    } else {
        writeln!(out, "No keys stored for {}", id)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn cmd_seal(
    mailer: SecureMailer,
    from: &str,
    to: &str,
    options: SendOptions,
    input: &mut impl Read,
    out: &mut impl Write,
) -> CmdResult {
    let sender = Identity::new(from)?;
    let recipient = Identity::new(to)?;
    let plaintext = read_all(input)?;
    let text = mailer.prepare_outgoing(&sender, &recipient, &plaintext, options).await?;
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    Ok(())
}

async fn cmd_open(
    mailer: SecureMailer,
    recipient: &str,
    json: bool,
    input: &mut impl Read,
    out: &mut impl Write,
) -> CmdResult {
    let recipient = Identity::new(recipient)?;
    let text = read_all(input)?;
    let msg = mailer.process_incoming(&text, &recipient).await;

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&msg)?)?;
        return Ok(());
    }
    if !msg.is_ok() {
        return Err(msg.display_content.into());
    }

    if msg.was_encrypted {
        eprintln!("Encrypted: yes");
    }
    if let Some(note) = msg.signature_note() {
        let signer = msg.signer_identity.as_deref().unwrap_or("unknown");
        eprintln!("Signed by {}: {}", signer, note);
    }
    writeln!(out, "{}", msg.display_content)?;
    Ok(())
}

fn cmd_inspect(input: &mut impl Read, out: &mut impl Write) -> CmdResult {
    let text = read_all(input)?;
    let envelope = armor::parse(&text)?;

    let kind = match envelope.kind() {
        EnvelopeKind::Plain => "plain text",
        EnvelopeKind::Encrypted => "encrypted",
        EnvelopeKind::Signed => "signed",
        EnvelopeKind::Both => "encrypted and signed",
    };
    writeln!(out, "Envelope:     {}", kind)?;

    let (encrypted, signature) = match &envelope {
        Envelope::Plain(_) => (None, None),
        Envelope::Encrypted(block) => (Some(block), None),
        Envelope::Signed { signature, .. } => (None, Some(signature)),
        Envelope::Both { encrypted, signature, .. } => (Some(encrypted), Some(signature)),
    };
    if let Some(block) = encrypted {
        writeln!(out, "Recipient:    {}", block.recipient.as_deref().unwrap_or("(not stated)"))?;
        writeln!(out, "Wrapped key:  {} base64 chars", block.wrapped_key.as_str().len())?;
        writeln!(out, "Content:      {} base64 chars", block.content.as_str().len())?;
    }
    if let Some(sig) = signature {
        writeln!(out, "Signer:       {}", sig.signer)?;
        writeln!(out, "Signature:    {} base64 chars", sig.signature.as_str().len())?;
        match sig.signed_at() {
            Some(at) => writeln!(out, "Signed at:    {}", at.to_rfc3339())?,
            None => writeln!(out, "Signed at:    (not stated)")?,
        }
    }
    Ok(())
}
