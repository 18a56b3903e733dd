//! Symmetric session keys.
//!
//! A [`SessionKey`] is 16 bytes of Blowfish key material, zeroized on
//! drop. Buffer-mode encryption produces the layout
//!
//! ```text
//! [ IV (8)? | OFB(plaintext) | OFB(SHA1(plaintext)) (20)? ]
//! ```
//!
//! where both the IV prefix and the digest suffix are optional and on
//! by default. OFB is length-preserving, so the ciphertext length is
//! exactly the plaintext length plus the enabled framing.

use blowfish::Blowfish;
use cipher::{InnerIvInit, KeyInit, StreamCipher};
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{random, CryptoError, Result, DIGEST_SIZE, IV_SIZE, KEY_SIZE, PBKDF2_ITERATIONS};

pub(crate) type BlowfishOfb = ofb::Ofb<Blowfish>;

/// IV/digest framing switches for encrypt and decrypt.
///
/// The same options must be used on both sides of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherOpts {
    /// Prepend (or expect) a fresh random IV.
    pub iv: bool,
    /// Append (or verify) an encrypted SHA-1 digest of the plaintext.
    pub digest: bool,
}

impl Default for CipherOpts {
    fn default() -> Self {
        Self {
            iv: true,
            digest: true,
        }
    }
}

impl CipherOpts {
    /// Framing without IV or digest: a pure keystream transform.
    pub const RAW: CipherOpts = CipherOpts {
        iv: false,
        digest: false,
    };

    /// Total framing overhead in bytes.
    pub fn overhead(&self) -> usize {
        (if self.iv { IV_SIZE } else { 0 }) + (if self.digest { DIGEST_SIZE } else { 0 })
    }
}

/// A symmetric session key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; KEY_SIZE],
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl SessionKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            key: random::bytes(),
        }
    }

    /// Build a key from existing key material.
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Build a key from a slice of exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = data
            .try_into()
            .map_err(|_| CryptoError::InvalidLength(data.len()))?;
        Ok(Self { key })
    }

    /// Derive a key from a password and a well-known salt using
    /// PBKDF2-HMAC-SHA1. Deterministic in (password, salt).
    pub fn from_password(password: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Self { key }
    }

    /// Export the raw key material.
    pub fn export(&self) -> [u8; KEY_SIZE] {
        self.key
    }

    /// Ciphertext size for a plaintext of `len` bytes under `opts`.
    pub fn encrypted_len(len: usize, opts: CipherOpts) -> usize {
        len + opts.overhead()
    }

    /// Plaintext size recovered from a ciphertext of `len` bytes, or
    /// an error if `len` cannot hold the framing. Zero recovered
    /// bytes is an error under every framing, mirroring
    /// [`SessionKey::encrypt_with`]'s rejection of empty plaintext.
    pub fn decrypted_len(len: usize, opts: CipherOpts) -> Result<usize> {
        len.checked_sub(opts.overhead())
            .filter(|&n| n > 0)
            .ok_or(CryptoError::TruncatedInput)
    }

    pub(crate) fn keystream(&self, iv: &[u8; IV_SIZE]) -> Result<BlowfishOfb> {
        let cipher =
            Blowfish::new_from_slice(&self.key).map_err(|_| CryptoError::CipherInit)?;
        let core = ofb::OfbCore::inner_iv_slice_init(cipher, iv)
            .map_err(|_| CryptoError::CipherInit)?;
        Ok(BlowfishOfb::from_core(core))
    }

    /// Encrypt `plain` with default framing (IV and digest).
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with(plain, CipherOpts::default())
    }

    /// Encrypt `plain` under the given framing options.
    ///
    /// A fresh random IV is drawn on every call when `opts.iv` is
    /// set; with it clear, the keystream starts from a zero IV.
    pub fn encrypt_with(&self, plain: &[u8], opts: CipherOpts) -> Result<Vec<u8>> {
        if plain.is_empty() {
            return Err(CryptoError::InvalidLength(0));
        }

        let iv = if opts.iv {
            random::bytes()
        } else {
            [0u8; IV_SIZE]
        };
        let mut cipher = self.keystream(&iv)?;

        let mut out = Vec::with_capacity(Self::encrypted_len(plain.len(), opts));
        if opts.iv {
            out.extend_from_slice(&iv);
        }

        let body = out.len();
        out.extend_from_slice(plain);
        if opts.digest {
            out.extend_from_slice(&Sha1::digest(plain));
        }
        cipher.apply_keystream(&mut out[body..]);

        Ok(out)
    }

    /// Decrypt with default framing (IV and digest).
    pub fn decrypt(&self, cipher_text: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with(cipher_text, CipherOpts::default())
    }

    /// Decrypt `cipher_text` under the given framing options.
    ///
    /// Fails with [`CryptoError::DigestMismatch`] when the trailing
    /// digest does not match the recovered plaintext, and with
    /// [`CryptoError::TruncatedInput`] when the input cannot hold the
    /// advertised framing.
    pub fn decrypt_with(&self, cipher_text: &[u8], opts: CipherOpts) -> Result<Vec<u8>> {
        Self::decrypted_len(cipher_text.len(), opts)?;

        let (iv, body) = if opts.iv {
            let mut iv = [0u8; IV_SIZE];
            iv.copy_from_slice(&cipher_text[..IV_SIZE]);
            (iv, &cipher_text[IV_SIZE..])
        } else {
            ([0u8; IV_SIZE], cipher_text)
        };

        let mut cipher = self.keystream(&iv)?;
        let mut plain = body.to_vec();
        cipher.apply_keystream(&mut plain);

        if opts.digest {
            let split = plain.len() - DIGEST_SIZE;
            let expected = Sha1::digest(&plain[..split]);
            if expected[..] != plain[split..] {
                return Err(CryptoError::DigestMismatch);
            }
            plain.truncate(split);
        }
        Ok(plain)
    }
}
