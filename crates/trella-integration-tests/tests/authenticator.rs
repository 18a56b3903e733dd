//! Challenge/response lifecycle: verify-once semantics and misses.

use trella_auth::{Authenticator, CHALLENGE_SIZE, RESPONSE_SIZE};

#[test]
fn challenge_respond_verify_once() {
    trella_integration_tests::init_tracing();

    let (store, local) = trella_integration_tests::store_with_local("John Doe");
    let auth = Authenticator::new(store);

    let chal = auth.challenge(&local, 60, 0x2).expect("challenge");
    assert_eq!(chal.len(), CHALLENGE_SIZE);

    let resp = auth.respond(&chal).expect("respond");
    assert_eq!(resp.len(), RESPONSE_SIZE);

    // First match returns the context, second returns nothing.
    assert_eq!(auth.verify(&resp), 0x2);
    assert_eq!(auth.verify(&resp), 0);

    // A random response never matches.
    let mut bogus = [0u8; RESPONSE_SIZE];
    trella_crypto::random::fill(&mut bogus);
    assert_eq!(auth.verify(&bogus), 0);
}
