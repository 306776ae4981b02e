//! Two users with separate on-disk key directories exchanging mail.

use std::sync::Arc;

use sealmail_keystore::{
    ErrorKind, FileAuditSink, FileBackend, Identity, InMemoryAuditSink, KeyStore, SecureMailer,
    SendOptions, SignatureStatus,
};
use tempfile::TempDir;

struct User {
    _dir: TempDir,
    ks: Arc<KeyStore>,
    mailer: SecureMailer,
}

fn user() -> User {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileBackend::new(dir.path().join("keys")).unwrap());
    let ks = Arc::new(KeyStore::new(storage, Arc::new(InMemoryAuditSink::new())));
    User {
        _dir: dir,
        mailer: SecureMailer::new(ks.clone()),
        ks,
    }
}

fn id(s: &str) -> Identity {
    Identity::new(s).unwrap()
}

#[tokio::test]
async fn encrypted_mail_to_imported_key() {
    let alice = user();
    let bob = user();

    alice.ks.generate(&id("alice"), 2048).await.unwrap();
    let blob = alice.ks.export_public(&id("alice")).await.unwrap();
    bob.ks.import_public(&id("alice"), &blob).await.unwrap();
    assert!(!bob.ks.has_private(&id("alice")).await.unwrap());

    let text = bob
        .mailer
        .prepare_outgoing(&id("bob"), &id("alice"), "hello", SendOptions::encrypted())
        .await
        .unwrap();

    let msg = alice.mailer.process_incoming(&text, &id("alice")).await;
    assert_eq!(msg.display_content, "hello");
    assert!(msg.was_encrypted);
    assert!(!msg.was_signed);
    assert_eq!(msg.error_kind, None);
}

#[tokio::test]
async fn encrypted_and_signed_both_ways() {
    let alice = user();
    let bob = user();

    alice.ks.generate(&id("alice"), 2048).await.unwrap();
    bob.ks.generate(&id("bob"), 2048).await.unwrap();
    let alice_blob = alice.ks.export_public(&id("alice")).await.unwrap();
    let bob_blob = bob.ks.export_public(&id("bob")).await.unwrap();
    alice.ks.import_public(&id("bob"), &bob_blob).await.unwrap();
    bob.ks.import_public(&id("alice"), &alice_blob).await.unwrap();

    let text = alice
        .mailer
        .prepare_outgoing(&id("alice"), &id("bob"), "secret", SendOptions::encrypted_and_signed())
        .await
        .unwrap();
    let msg = bob.mailer.process_incoming(&text, &id("bob")).await;
    assert!(msg.was_encrypted);
    assert!(msg.was_signed);
    assert!(msg.signature_valid);
    assert_eq!(msg.display_content, "secret");

    // Transport rewrote line endings and padded lines.
    let mangled = text.replace('\n', "  \r\n");
    let msg = bob.mailer.process_incoming(&mangled, &id("bob")).await;
    assert!(msg.signature_valid);
    assert_eq!(msg.display_content, "secret");

    let reply = bob
        .mailer
        .prepare_outgoing(&id("bob"), &id("alice"), "got it", SendOptions::encrypted_and_signed())
        .await
        .unwrap();
    let msg = alice.mailer.process_incoming(&reply, &id("alice")).await;
    assert!(msg.signature_valid);
    assert_eq!(msg.display_content, "got it");
}

#[tokio::test]
async fn missing_keys_produce_no_output() {
    let alice = user();
    alice.ks.generate(&id("alice"), 2048).await.unwrap();

    let err = alice
        .mailer
        .prepare_outgoing(&id("alice"), &id("stranger"), "hello", SendOptions::encrypted())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecipientKeyMissing);

    let signed = alice
        .mailer
        .prepare_outgoing(&id("alice"), &id("stranger"), "hello", SendOptions::signed())
        .await
        .unwrap();
    let stranger = user();
    let msg = stranger.mailer.process_incoming(&signed, &id("stranger")).await;
    assert!(msg.was_signed);
    assert!(!msg.signature_valid);
    assert_eq!(msg.signature_status, SignatureStatus::SignerKeyUnknown);
    assert_eq!(msg.error_kind, None);
}

#[tokio::test]
async fn keys_survive_reopening_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let carol = id("carol@example.com");

    let fingerprint = {
        let ks = KeyStore::new(
            Arc::new(FileBackend::new(dir.path().join("keys")).unwrap()),
            Arc::new(FileAuditSink::new(&audit_path)),
        );
        let pair = ks.generate(&carol, 2048).await.unwrap();
        pair.public.fingerprint().unwrap()
    };

    let ks = KeyStore::new(
        Arc::new(FileBackend::new(dir.path().join("keys")).unwrap()),
        Arc::new(FileAuditSink::new(&audit_path)),
    );
    assert!(ks.exists(&carol).await.unwrap());
    assert_eq!(ks.load_public(&carol).await.unwrap().fingerprint().unwrap(), fingerprint);
    assert_eq!(ks.list().await.unwrap().len(), 1);

    assert!(ks.delete(&carol).await.unwrap());
    assert!(ks.list().await.unwrap().is_empty());

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert_eq!(audit.lines().count(), 2);
    assert!(!audit.contains("PRIVATE KEY"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_identities_in_parallel() {
    let shared = user();
    let names = ["u1", "u2", "u3", "u4"];

    let mut tasks = Vec::new();
    for name in names {
        let ks = shared.ks.clone();
        tasks.push(tokio::spawn(async move {
            ks.generate(&id(name), 2048).await.unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let listed: Vec<String> = shared
        .ks
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|(_, status)| status.is_complete())
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(listed, names);
}
