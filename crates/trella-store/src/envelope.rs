//! Sealed byte envelopes.
//!
//! An envelope carries data encrypted to a recipient and optionally
//! signed by a sender: a fresh session key sealed under the
//! recipient's public key, the payload under that session key, and
//! an optional SHA-1/RSA signature over the plaintext. The inverse
//! refuses to open when a signer is demanded and the signature is
//! absent or wrong.

use serde::{Deserialize, Serialize};
use trella_crypto::SessionKey;
use trella_identity::Identity;

use crate::{Result, StoreError};

#[derive(Serialize, Deserialize)]
struct Envelope {
    sealed_key: Vec<u8>,
    payload: Vec<u8>,
    signature: Option<Vec<u8>>,
}

/// Seal `data` to `recipient`, optionally signing as `signer`.
pub fn seal(data: &[u8], recipient: &Identity, signer: Option<&Identity>) -> Result<Vec<u8>> {
    let key = SessionKey::generate();
    let envelope = Envelope {
        sealed_key: recipient.seal_key(&key)?,
        payload: key.encrypt(data)?,
        signature: signer.map(|s| s.sign(data)).transpose()?,
    };
    let mut out = Vec::new();
    ciborium::into_writer(&envelope, &mut out)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(out)
}

/// Open an envelope as `recipient`; with `signer` given, also demand
/// and verify the signature.
pub fn open(data: &[u8], recipient: &Identity, signer: Option<&Identity>) -> Result<Vec<u8>> {
    let envelope: Envelope = ciborium::from_reader(data)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    let key = recipient.unseal_key(&envelope.sealed_key)?;
    let plain = key.decrypt(&envelope.payload)?;
    if let Some(signer) = signer {
        let signature = envelope
            .signature
            .as_deref()
            .ok_or(StoreError::MissingSignature)?;
        signer.verify(&plain, signature)?;
    }
    Ok(plain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_signed() {
        let id = Identity::generate("John Doe").expect("generate");
        let info = vec![6u8; 512];
        let envelope = seal(&info, &id, Some(&id)).expect("seal");
        let back = open(&envelope, &id, Some(&id)).expect("open");
        assert_eq!(back, info);
    }

    #[test]
    fn test_seal_open_unsigned() {
        let id = Identity::generate("John Doe").expect("generate");
        let envelope = seal(b"plain contents", &id, None).expect("seal");
        let back = open(&envelope, &id, None).expect("open");
        assert_eq!(back, b"plain contents");
    }

    #[test]
    fn test_unsigned_envelope_fails_signer_demand() {
        let id = Identity::generate("John Doe").expect("generate");
        let envelope = seal(b"contents", &id, None).expect("seal");
        assert!(matches!(
            open(&envelope, &id, Some(&id)),
            Err(StoreError::MissingSignature)
        ));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let sender = Identity::generate("Sender").expect("generate");
        let recipient = Identity::generate("Recipient").expect("generate");
        let impostor = Identity::generate("Impostor").expect("generate");
        let envelope = seal(b"contents", &recipient, Some(&sender)).expect("seal");
        assert!(open(&envelope, &recipient, Some(&impostor)).is_err());
        assert_eq!(
            open(&envelope, &recipient, Some(&sender)).expect("open"),
            b"contents"
        );
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        let recipient = Identity::generate("Recipient").expect("generate");
        let other = Identity::generate("Other").expect("generate");
        let envelope = seal(b"contents", &recipient, None).expect("seal");
        assert!(open(&envelope, &other, None).is_err());
    }
}
