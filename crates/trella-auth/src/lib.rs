//! # trella-auth
//!
//! Challenge/response authentication.
//!
//! A challenge is a random nonce RSA-sealed to the subject's public
//! key; the correct response is the SHA-1 digest of the nonce, which
//! only the holder of the matching private key can produce. Issued
//! challenges wait in a pending table with an expiry; a response is
//! honored exactly once, and expired entries are swept opportunistically
//! whenever a response is checked.
//!
//! The expiry clock counts seconds from an arbitrary process-local
//! epoch; only differences matter.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use sha1::{Digest, Sha1};
use trella_crypto::{random, DIGEST_SIZE};
use trella_identity::{Identity, CIPHERTEXT_SIZE, PLAINTEXT_SIZE};
use trella_store::Store;

/// Challenge size on the wire (one RSA block).
pub const CHALLENGE_SIZE: usize = CIPHERTEXT_SIZE;

/// Response size on the wire (one SHA-1 digest).
pub const RESPONSE_SIZE: usize = DIGEST_SIZE;

/// Error types for authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The challenge subject's public key rejected the nonce.
    #[error("challenge encryption failed: {0}")]
    Seal(#[source] trella_identity::IdentityError),

    /// No local identity with a private key is available to respond.
    #[error("no local identity with a private key")]
    NoLocalIdentity,

    /// The challenge could not be decrypted by the local identity.
    #[error("challenge decryption failed: {0}")]
    Unseal(#[source] trella_identity::IdentityError),

    /// The opaque context must be non-zero so a verified response can
    /// be told apart from a miss.
    #[error("challenge context must be non-zero")]
    ZeroContext,
}

pub type Result<T> = std::result::Result<T, AuthError>;

struct Pending {
    response: [u8; RESPONSE_SIZE],
    expires_at: u64,
    context: u64,
}

/// The authenticator: a pending-challenge table over a store.
///
/// The responder identity is the store's local identity, resolved at
/// construction time.
pub struct Authenticator {
    store: Arc<Store>,
    local: Option<Identity>,
    pending: Mutex<Vec<Pending>>,
    epoch: Instant,
}

impl Authenticator {
    /// Build an authenticator over `store`. The local identity (the
    /// store's first identity with a private key) becomes the
    /// responder.
    pub fn new(store: Arc<Store>) -> Self {
        let local = store.local_identity();
        Self {
            store,
            local,
            pending: Mutex::new(Vec::new()),
            epoch: Instant::now(),
        }
    }

    /// The store this authenticator resolves identities from.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The responder identity, when one exists.
    pub fn local_identity(&self) -> Option<&Identity> {
        self.local.as_ref()
    }

    /// Issue a challenge for `subject`.
    ///
    /// Draws a fresh [`PLAINTEXT_SIZE`]-byte nonce, records the
    /// expected response with `now + expire_secs` and the caller's
    /// `context`, and returns the RSA-sealed nonce
    /// ([`CHALLENGE_SIZE`] bytes). `context` must be non-zero:
    /// [`Authenticator::verify`] returns zero for a miss.
    pub fn challenge(
        &self,
        subject: &Identity,
        expire_secs: u64,
        context: u64,
    ) -> Result<Vec<u8>> {
        if context == 0 {
            return Err(AuthError::ZeroContext);
        }

        let mut nonce = [0u8; PLAINTEXT_SIZE];
        random::fill(&mut nonce);
        let mut response = [0u8; RESPONSE_SIZE];
        response.copy_from_slice(&Sha1::digest(nonce));

        let chal = subject.encrypt(&nonce).map_err(AuthError::Seal)?;

        self.lock_pending().push(Pending {
            response,
            expires_at: self.now() + expire_secs,
            context,
        });
        tracing::trace!(subject = ?subject.name(), expire_secs, "challenge issued");
        Ok(chal)
    }

    /// Answer a challenge addressed to the local identity.
    ///
    /// Decrypts the nonce and returns its SHA-1 digest
    /// ([`RESPONSE_SIZE`] bytes).
    pub fn respond(&self, chal: &[u8]) -> Result<[u8; RESPONSE_SIZE]> {
        let local = self.local.as_ref().ok_or(AuthError::NoLocalIdentity)?;
        let nonce = local.decrypt(chal).map_err(AuthError::Unseal)?;
        let mut response = [0u8; RESPONSE_SIZE];
        response.copy_from_slice(&Sha1::digest(&nonce));
        Ok(response)
    }

    /// Check a response against the pending table.
    ///
    /// Returns the context recorded at [`Authenticator::challenge`]
    /// time for the first match and removes the entry — a response
    /// verifies exactly once. Returns zero when nothing matches.
    /// Expired entries encountered during the walk are dropped; the
    /// sweep and the match decision happen under one lock.
    pub fn verify(&self, response: &[u8]) -> u64 {
        let now = self.now();
        let mut pending = self.lock_pending();

        let mut context = 0;
        pending.retain(|p| {
            if p.expires_at <= now {
                return false;
            }
            if context == 0 && p.response[..] == *response {
                context = p.context;
                return false;
            }
            true
        });
        context
    }

    /// Number of challenges awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<Pending>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator_with_local(name: &str) -> (Authenticator, Identity) {
        let store = Arc::new(Store::in_memory());
        let id = Identity::generate(name).expect("generate");
        store.insert_identity(&id, true, None, None);
        (Authenticator::new(store), id)
    }

    #[test]
    fn test_challenge_respond_verify() {
        let (auth, id) = authenticator_with_local("John Doe");
        let chal = auth.challenge(&id, 60, 0x2).expect("challenge");
        assert_eq!(chal.len(), CHALLENGE_SIZE);

        let resp = auth.respond(&chal).expect("respond");
        assert_eq!(resp.len(), RESPONSE_SIZE);

        assert_eq!(auth.verify(&resp), 0x2);
        // A response verifies exactly once.
        assert_eq!(auth.verify(&resp), 0);
    }

    #[test]
    fn test_random_response_misses() {
        let (auth, id) = authenticator_with_local("John Doe");
        let _chal = auth.challenge(&id, 60, 0x2).expect("challenge");
        let mut bogus = [0u8; RESPONSE_SIZE];
        random::fill(&mut bogus);
        assert_eq!(auth.verify(&bogus), 0);
        // The real challenge is still pending.
        assert_eq!(auth.pending_len(), 1);
    }

    #[test]
    fn test_expired_challenge_never_verifies() {
        let (auth, id) = authenticator_with_local("John Doe");
        let chal = auth.challenge(&id, 0, 0x7).expect("challenge");
        let resp = auth.respond(&chal).expect("respond");
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert_eq!(auth.verify(&resp), 0);
        assert_eq!(auth.pending_len(), 0);
    }

    #[test]
    fn test_zero_context_rejected() {
        let (auth, id) = authenticator_with_local("John Doe");
        assert!(matches!(
            auth.challenge(&id, 60, 0),
            Err(AuthError::ZeroContext)
        ));
    }

    #[test]
    fn test_respond_without_local_identity() {
        let auth = Authenticator::new(Arc::new(Store::in_memory()));
        assert!(matches!(
            auth.respond(&[0u8; CHALLENGE_SIZE]),
            Err(AuthError::NoLocalIdentity)
        ));
    }

    #[test]
    fn test_responder_needs_matching_key() {
        let (auth, _) = authenticator_with_local("Local");
        let stranger = Identity::generate("Stranger").expect("generate");
        let chal = auth.challenge(&stranger, 60, 0x3).expect("challenge");
        // The local identity cannot decrypt a nonce sealed to the
        // stranger's key.
        assert!(matches!(auth.respond(&chal), Err(AuthError::Unseal(_))));
    }
}
