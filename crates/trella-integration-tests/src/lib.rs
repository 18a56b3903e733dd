//! Shared helpers for the end-to-end tests in `tests/`.

use std::sync::Arc;

use trella_identity::Identity;
use trella_store::Store;

/// Install a test tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A store holding one local identity with its private key.
pub fn store_with_local(name: &str) -> (Arc<Store>, Identity) {
    let store = Arc::new(Store::in_memory());
    let identity = Identity::generate(name).expect("generate identity");
    store.insert_identity(&identity, true, identity.name(), None);
    (store, identity)
}

/// Import `peer`'s certificate (no private key) into `store`, the
/// out-of-band trust provisioning the mutual-auth transfer expects.
pub fn trust_peer(store: &Store, peer: &Identity) {
    let der = peer.cert_der().expect("encode certificate");
    let copy = Identity::from_der(&der).expect("decode certificate");
    store.insert_identity(&copy, false, copy.name(), None);
}
