//! # trella-identity
//!
//! X.509 v3 identities: an RSA keypair bound to a certificate, with
//! the asymmetric operations the trust layer is built from.
//!
//! An [`Identity`] always carries a certificate; it carries the
//! matching private key only when created locally or imported with
//! key material. Public-key operations (encrypt, verify) need the
//! certificate alone; private-key operations (decrypt, sign) fail
//! with [`IdentityError::MissingPrivateKey`] otherwise.
//!
//! The asymmetric suite is fixed: RSA-1024 with public exponent
//! 65537, PKCS#1 v1.5 padding, SHA-1 digests, and
//! sha1WithRSAEncryption certificate signatures.

mod dn;
mod identity;

pub use dn::DnAttr;
pub use identity::Identity;

/// Public-key (RSA modulus) size in bytes.
pub const MODULUS_SIZE: usize = 128;

/// Fixed RSA public exponent.
pub const KEY_EXPONENT: u64 = 65537;

/// Maximum plaintext size for one RSA block (modulus less PKCS#1
/// v1.5 padding).
pub const PLAINTEXT_SIZE: usize = MODULUS_SIZE - 11;

/// Ciphertext size for [`Identity::encrypt`] / [`Identity::decrypt`].
pub const CIPHERTEXT_SIZE: usize = MODULUS_SIZE;

/// Signature size for [`Identity::sign`] / [`Identity::verify`].
pub const SIGNATURE_SIZE: usize = MODULUS_SIZE;

/// Default certificate validity window in seconds (30 days).
pub const EXPIRE_DEFAULT_SECS: u64 = 30 * 24 * 60 * 60;

/// Error types for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// ASN.1 encode/decode failure.
    #[error("certificate encoding error: {0}")]
    Der(#[from] der::Error),

    /// Public-key info encode/decode failure.
    #[error("public key encoding error: {0}")]
    Spki(#[from] spki::Error),

    /// RSA primitive failure (bad padding, wrong key, keygen).
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// Private-key serialization failure.
    #[error("PKCS#8 error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    /// Plaintext larger than one RSA block can hold.
    #[error("plaintext of {0} bytes exceeds the {PLAINTEXT_SIZE}-byte RSA block capacity")]
    PlaintextTooLarge(usize),

    /// Ciphertext is not exactly one RSA block.
    #[error("ciphertext must be exactly {CIPHERTEXT_SIZE} bytes")]
    BadCiphertextLength,

    /// The operation needs the private key and none is present.
    #[error("operation requires a private key")]
    MissingPrivateKey,

    /// A signature or certificate chain check failed.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The verifying certificate is past its notAfter date.
    #[error("certificate expired")]
    CertificateExpired,

    /// Certificate contents outside what this profile supports.
    #[error("malformed certificate: {0}")]
    Malformed(String),

    /// The system clock is before the Unix epoch.
    #[error("system clock error")]
    Clock,

    /// Sealed session-key material failed to decode.
    #[error("session key error: {0}")]
    Crypto(#[from] trella_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, IdentityError>;
