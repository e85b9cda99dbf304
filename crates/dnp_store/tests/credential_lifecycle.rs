//! End-to-end credential flows against a file-backed store.

use std::sync::Arc;

use dnp_crypto::{KdfParams, PhraseError};
use dnp_store::{
    load_credential, save_credential, EncryptedStore, FileKv, KeyManager, KeyVault, KvBackend,
    StoreError,
};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> (Arc<FileKv>, KeyManager, EncryptedStore) {
    let kv = Arc::new(FileKv::open(dir).unwrap());
    let vault = Arc::new(KeyVault::new());
    let km = KeyManager::new(vault.clone(), KdfParams::insecure_fast(), 8);
    let store = EncryptedStore::new(kv.clone(), vault);
    (kv, km, store)
}

#[test]
fn records_survive_recovery_under_new_passphrase() {
    let dir = tempdir().unwrap();
    let phrase = {
        let (kv, km, store) = open(dir.path());
        let created = km.create_credential("first passphrase").unwrap();
        save_credential(kv.as_ref(), &created.credential).unwrap();
        store.put("note_keep", &"remember the milk").unwrap();
        km.lock();
        created.recovery_phrase.expose().to_string()
    };

    let (kv, km, store) = open(dir.path());
    let cred = load_credential(kv.as_ref()).unwrap().unwrap();
    let fresh = km.recover(&phrase, "second passphrase", &cred).unwrap();
    save_credential(kv.as_ref(), &fresh).unwrap();
    km.lock();

    km.unlock("second passphrase", &fresh).unwrap();
    assert_eq!(
        store.get::<String>("note_keep").unwrap().as_deref(),
        Some("remember the milk")
    );
    assert!(matches!(
        km.unlock("first passphrase", &fresh),
        Err(StoreError::InvalidPassphrase)
    ));
}

#[test]
fn wrong_passphrase_then_put_has_no_active_key() {
    let dir = tempdir().unwrap();
    let (kv, km, store) = open(dir.path());
    let created = km.create_credential("right passphrase").unwrap();
    save_credential(kv.as_ref(), &created.credential).unwrap();
    km.lock();

    let err = km.unlock("wrong passphrase", &created.credential).unwrap_err();
    assert!(matches!(err, StoreError::InvalidPassphrase));
    assert!(matches!(store.put("note_1", &1u32), Err(StoreError::NoActiveKey)));
    assert!(kv.get("note_1").unwrap().is_none());
}

#[test]
fn sloppy_phrase_input_is_normalised() {
    let dir = tempdir().unwrap();
    let (_kv, km, _store) = open(dir.path());
    let created = km.create_credential("right passphrase").unwrap();
    km.lock();
    let sloppy = format!("  {}\n", created.recovery_phrase.expose().to_uppercase().replace(' ', "   "));
    km.recover(&sloppy, "another passphrase", &created.credential)
        .unwrap();
    assert!(km.is_unlocked());
}

#[test]
fn eleven_words_rejected_before_derivation() {
    let dir = tempdir().unwrap();
    let (_kv, km, _store) = open(dir.path());
    let created = km.create_credential("right passphrase").unwrap();
    let eleven: Vec<&str> = created.recovery_phrase.words().take(11).collect();
    let err = km
        .recover(&eleven.join(" "), "another passphrase", &created.credential)
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecoveryPhrase(PhraseError::Malformed(_))));
}
