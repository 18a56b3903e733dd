//! Store persistence across process lifetimes, including the MAC
//! mismatch failure mode.

use trella_identity::Identity;
use trella_store::{Store, StoreError};

#[test]
fn store_persistence() {
    trella_integration_tests::init_tracing();

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.store");

    let id = Identity::generate("John Doe").expect("generate");
    let modulus = id.public_key_bytes();
    {
        let store = Store::with_backing(&path, Some("Passwd"), Some("MacPasswd"));
        store.insert_identity(&id, true, id.name(), None);
        store.save().expect("save");
    }

    // A fresh store at the same path with the same passwords sees
    // the same identity, modulus intact, key usable.
    let store = Store::with_backing(&path, Some("Passwd"), Some("MacPasswd"));
    store.load().expect("load");
    let (_, back) = store
        .find_identity(Some("John Doe"), false, None, 0)
        .expect("identity present");
    assert_eq!(back.public_key_bytes(), modulus);
    assert!(back.has_private_key());

    // The wrong MAC password must fail the load outright.
    let wrong_mac = Store::with_backing(&path, Some("Passwd"), Some("NotTheMac"));
    assert!(matches!(wrong_mac.load(), Err(StoreError::MacMismatch)));

    // So must a missing MAC password.
    let no_mac = Store::with_backing(&path, Some("Passwd"), None);
    assert!(matches!(no_mac.load(), Err(StoreError::MacMismatch)));
}
