//! # trella-store
//!
//! Secure storage for identities, session keys, and application
//! secrets.
//!
//! A [`Store`] holds an ordered list of entries, optionally backed by
//! an authenticated, encrypted archive file. The archive keeps the
//! PKCS#12 bag model: certificate bags with optional shrouded private
//! keys (written only when the entry's export flag is set),
//! session-key bags under the reserved friendly name `.KEYDATA.`, and
//! opaque secret bags. The archive password (encryption) and MAC
//! password (authentication) are independent; an archive written with
//! one combination fails to load under any other.
//!
//! ## Modules
//!
//! - [`entry`] — store entries and lookup filters
//! - [`archive`] — the on-disk authenticated container
//! - [`pem`] — PEM import/export of certificates
//! - [`envelope`] — sealed (and optionally signed) byte envelopes

pub mod archive;
pub mod entry;
pub mod envelope;
pub mod pem;
mod store;

pub use entry::{Entry, EntryKind, EntryType};
pub use store::Store;

/// Reserved friendly name identifying session-key bags.
pub const KEY_FRIENDLY: &str = ".KEYDATA.";

/// Error types for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has no backing path to load from or save to.
    #[error("no backing path configured")]
    NoBacking,

    /// Filesystem failure on the backing path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive MAC did not verify under the configured MAC
    /// password (including a missing-vs-present mismatch).
    #[error("archive MAC verification failed")]
    MacMismatch,

    /// The archive payload is encrypted and the configured password
    /// is absent or wrong.
    #[error("archive password missing or incorrect")]
    BadPassword,

    /// CBOR encode/decode failure in the archive or an envelope.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Structurally invalid archive contents.
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// An envelope was expected to carry a signature and does not.
    #[error("envelope carries no signature")]
    MissingSignature,

    /// Identity/certificate failure.
    #[error(transparent)]
    Identity(#[from] trella_identity::IdentityError),

    /// Session-cipher failure.
    #[error(transparent)]
    Crypto(#[from] trella_crypto::CryptoError),

    /// Private-key shrouding failure.
    #[error("PKCS#8 error: {0}")]
    Pkcs8(#[from] pkcs8::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
