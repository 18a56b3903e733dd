//! # trella-crypto
//!
//! Session-layer cryptography for the trella toolkit.
//!
//! The symmetric suite is fixed: Blowfish in OFB mode with a 16-byte
//! key and 8-byte IV, SHA-1 for integrity digests, PBKDF2-HMAC-SHA1
//! for password-derived keys. No algorithm negotiation happens
//! anywhere in the protocol.
//!
//! ## Modules
//!
//! - [`random`] — OS-backed cryptographic random bytes
//! - [`session`] — [`SessionKey`]: buffer encrypt/decrypt with
//!   prepended IV and appended integrity digest
//! - [`stream`] — streaming encrypt/decrypt/transfer over async
//!   readers and writers, with trailing-digest detection

pub mod random;
pub mod session;
pub mod stream;

pub use session::{CipherOpts, SessionKey};

/// Session key size in bytes (Blowfish key material).
pub const KEY_SIZE: usize = 16;

/// IV size in bytes (Blowfish block size).
pub const IV_SIZE: usize = 8;

/// Integrity digest size in bytes (SHA-1).
pub const DIGEST_SIZE: usize = 20;

/// Default PBKDF2 iteration count for password-derived keys.
pub const PBKDF2_ITERATIONS: u32 = 2048;

/// Default read-buffer size for the streaming transforms.
pub const READ_SIZE_DEFAULT: usize = 1024;

/// Error types for session cryptography.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The trailing integrity digest did not match the plaintext.
    #[error("integrity digest mismatch")]
    DigestMismatch,

    /// Input too short for the advertised IV/digest layout.
    #[error("ciphertext shorter than its IV/digest framing")]
    TruncatedInput,

    /// Empty or otherwise unusable input buffer.
    #[error("invalid input length: {0}")]
    InvalidLength(usize),

    /// Cipher construction rejected the key or IV.
    #[error("cipher initialization failed")]
    CipherInit,

    /// I/O failure in a streaming transform.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
