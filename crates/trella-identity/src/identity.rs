//! Identity: an X.509 v3 certificate plus optional private key.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use der::asn1::{BitString, ObjectIdentifier, OctetString, UtcTime};
use der::{Decode, Encode};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, BasicConstraints, SubjectKeyIdentifier};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};

use trella_crypto::SessionKey;

use crate::dn::{self, DnAttr};
use crate::{
    IdentityError, Result, CIPHERTEXT_SIZE, EXPIRE_DEFAULT_SECS, KEY_EXPONENT, MODULUS_SIZE,
    PLAINTEXT_SIZE,
};

/// sha1WithRSAEncryption (PKCS#1).
const OID_SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
/// id-ce-subjectKeyIdentifier.
const OID_SUBJECT_KEY_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");
/// id-ce-authorityKeyIdentifier.
const OID_AUTHORITY_KEY_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.35");
/// id-ce-basicConstraints.
const OID_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

/// Fallback subject for identities created without a name.
const UNKNOWN_NAME: &str = "*Unknown*";

/// An identity: certificate plus optional private key.
///
/// Cloning clones the key material; the private key zeroizes on drop
/// inside the `rsa` crate.
#[derive(Clone)]
pub struct Identity {
    cert: Certificate,
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
    name: Option<String>,
    issuer_name: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("issuer", &self.issuer_name)
            .field("has_private_key", &self.private.is_some())
            .finish()
    }
}

impl Identity {
    /// Generate a fresh identity: a new RSA-1024 keypair bound to a
    /// self-signed certificate with the default validity window.
    pub fn generate(name: &str) -> Result<Self> {
        let subject = if name.is_empty() { UNKNOWN_NAME } else { name };
        let private = RsaPrivateKey::new(&mut OsRng, MODULUS_SIZE * 8)?;
        debug_assert_eq!(private.e(), &rsa::BigUint::from(KEY_EXPONENT));
        let public = RsaPublicKey::from(&private);

        let subject_name = dn::single_attr_name(DnAttr::CommonName, subject)?;
        let spki_der = public.to_public_key_der()?;
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())?;

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&[25])?,
            signature: signature_algorithm(),
            issuer: subject_name.clone(),
            validity: validity_window(EXPIRE_DEFAULT_SECS)?,
            subject: subject_name,
            subject_public_key_info: spki,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: None,
        };
        let cert = Certificate {
            tbs_certificate: tbs,
            signature_algorithm: signature_algorithm(),
            signature: BitString::from_bytes(&[])?,
        };

        let mut identity = Self {
            cert,
            public,
            private: Some(private),
            name: None,
            issuer_name: None,
        };
        // Self-sign: same path as cross-signing, with self as issuer.
        let issuer = identity.clone();
        issuer.sign_identity(&mut identity, EXPIRE_DEFAULT_SECS)?;
        tracing::debug!(subject, "generated identity");
        Ok(identity)
    }

    /// Reconstruct an identity from a parsed certificate and an
    /// optional private key (the import path).
    pub fn from_cert(cert: Certificate, private: Option<RsaPrivateKey>) -> Result<Self> {
        let spki_der = cert.tbs_certificate.subject_public_key_info.to_der()?;
        let public = RsaPublicKey::from_public_key_der(&spki_der)
            .map_err(|e| IdentityError::Malformed(format!("unsupported public key: {e}")))?;
        if public.size() != MODULUS_SIZE {
            return Err(IdentityError::Malformed(format!(
                "modulus is {} bytes, expected {MODULUS_SIZE}",
                public.size()
            )));
        }
        let mut identity = Self {
            cert,
            public,
            private,
            name: None,
            issuer_name: None,
        };
        identity.refresh_names();
        Ok(identity)
    }

    /// Parse an identity from DER certificate bytes.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Self::from_cert(Certificate::from_der(der)?, None)
    }

    /// Parse an identity from DER certificate bytes plus a private
    /// key recovered alongside it (the archive import path).
    pub fn from_der_parts(der: &[u8], private: Option<RsaPrivateKey>) -> Result<Self> {
        Self::from_cert(Certificate::from_der(der)?, private)
    }

    /// DER encoding of the certificate.
    pub fn cert_der(&self) -> Result<Vec<u8>> {
        Ok(self.cert.to_der()?)
    }

    /// The parsed certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    /// Subject common name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Issuer common name.
    pub fn issuer_name(&self) -> Option<&str> {
        self.issuer_name.as_deref()
    }

    /// Read a subject DN attribute.
    pub fn subject_attr(&self, attr: DnAttr) -> Option<String> {
        dn::get_attr(&self.cert.tbs_certificate.subject, attr)
    }

    /// Add or overwrite a subject DN attribute.
    ///
    /// The certificate signature is not refreshed; mutate names
    /// before signing.
    pub fn set_subject_attr(&mut self, attr: DnAttr, value: &str) -> Result<()> {
        dn::set_attr(&mut self.cert.tbs_certificate.subject, attr, value)?;
        self.refresh_names();
        Ok(())
    }

    /// Read an issuer DN attribute.
    pub fn issuer_attr(&self, attr: DnAttr) -> Option<String> {
        dn::get_attr(&self.cert.tbs_certificate.issuer, attr)
    }

    /// Add or overwrite an issuer DN attribute.
    pub fn set_issuer_attr(&mut self, attr: DnAttr, value: &str) -> Result<()> {
        dn::set_attr(&mut self.cert.tbs_certificate.issuer, attr, value)?;
        self.refresh_names();
        Ok(())
    }

    /// The public modulus, exactly [`MODULUS_SIZE`] bytes.
    pub fn public_key_bytes(&self) -> [u8; MODULUS_SIZE] {
        let n = self.public.n().to_bytes_be();
        let mut out = [0u8; MODULUS_SIZE];
        out[MODULUS_SIZE - n.len()..].copy_from_slice(&n);
        out
    }

    /// Whether the private key is present.
    pub fn has_private_key(&self) -> bool {
        self.private.is_some()
    }

    /// Drop the private key, keeping the certificate.
    pub fn strip_private_key(&mut self) {
        self.private = None;
    }

    /// The private key, when present. Exposed for archive shrouding;
    /// the key zeroizes on drop inside the `rsa` crate.
    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        self.private.as_ref()
    }

    /// The certificate's notAfter instant.
    pub fn expiration(&self) -> Result<SystemTime> {
        let not_after = time_to_duration(&self.cert.tbs_certificate.validity.not_after);
        Ok(UNIX_EPOCH + not_after)
    }

    /// RSA-encrypt one block of plaintext (PKCS#1 v1.5) to this
    /// identity's public key. Output is always [`CIPHERTEXT_SIZE`]
    /// bytes.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        if plain.is_empty() || plain.len() > PLAINTEXT_SIZE {
            return Err(IdentityError::PlaintextTooLarge(plain.len()));
        }
        Ok(self.public.encrypt(&mut OsRng, Pkcs1v15Encrypt, plain)?)
    }

    /// RSA-decrypt exactly one [`CIPHERTEXT_SIZE`]-byte block with
    /// this identity's private key.
    pub fn decrypt(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        if cipher.len() != CIPHERTEXT_SIZE {
            return Err(IdentityError::BadCiphertextLength);
        }
        let private = self.private.as_ref().ok_or(IdentityError::MissingPrivateKey)?;
        Ok(private.decrypt(Pkcs1v15Encrypt, cipher)?)
    }

    /// Sign `data`: SHA-1 digest, then RSA-sign the digest. The
    /// signature is [`crate::SIGNATURE_SIZE`] bytes.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let private = self.private.as_ref().ok_or(IdentityError::MissingPrivateKey)?;
        let digest = Sha1::digest(data);
        Ok(private.sign(Pkcs1v15Sign::new::<Sha1>(), &digest)?)
    }

    /// Verify a signature produced by [`Identity::sign`].
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let digest = Sha1::digest(data);
        self.public
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
            .map_err(|_| IdentityError::SignatureInvalid)
    }

    /// Cross-sign `subject`'s certificate with this identity.
    ///
    /// Clears any prior extensions, rewrites the validity window to
    /// `[now, now + expire_secs]`, sets the issuer to this subject
    /// name, adds subjectKeyIdentifier, authorityKeyIdentifier, and
    /// basicConstraints CA:true, then re-signs the certificate.
    pub fn sign_identity(&self, subject: &mut Identity, expire_secs: u64) -> Result<()> {
        let signer = self.private.as_ref().ok_or(IdentityError::MissingPrivateKey)?;

        let tbs = &mut subject.cert.tbs_certificate;
        tbs.validity = validity_window(expire_secs)?;
        tbs.issuer = self.cert.tbs_certificate.subject.clone();
        tbs.signature = signature_algorithm();

        let subject_key_id = spki_key_id(&tbs.subject_public_key_info)?;
        let authority_key_id = spki_key_id(&self.cert.tbs_certificate.subject_public_key_info)?;
        tbs.extensions = Some(vec![
            extension(
                OID_SUBJECT_KEY_ID,
                SubjectKeyIdentifier(OctetString::new(subject_key_id.as_slice())?).to_der()?,
            )?,
            extension(
                OID_AUTHORITY_KEY_ID,
                AuthorityKeyIdentifier {
                    key_identifier: Some(OctetString::new(authority_key_id.as_slice())?),
                    authority_cert_issuer: Some(vec![GeneralName::DirectoryName(
                        self.cert.tbs_certificate.issuer.clone(),
                    )]),
                    authority_cert_serial_number: Some(
                        self.cert.tbs_certificate.serial_number.clone(),
                    ),
                }
                .to_der()?,
            )?,
            extension(
                OID_BASIC_CONSTRAINTS,
                BasicConstraints {
                    ca: true,
                    path_len_constraint: None,
                }
                .to_der()?,
            )?,
        ]);

        let tbs_der = subject.cert.tbs_certificate.to_der()?;
        let digest = Sha1::digest(&tbs_der);
        let signature = signer.sign(Pkcs1v15Sign::new::<Sha1>(), &digest)?;
        subject.cert.signature_algorithm = signature_algorithm();
        subject.cert.signature = BitString::from_bytes(&signature)?;
        subject.refresh_names();
        Ok(())
    }

    /// Verify that this identity signed `subject`'s certificate.
    ///
    /// Fails with [`IdentityError::CertificateExpired`] when this
    /// identity's own certificate is past notAfter — an expired
    /// identity can never vouch for another, even with the right key.
    pub fn verify_identity(&self, subject: &Identity) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| IdentityError::Clock)?;
        let not_after = time_to_duration(&self.cert.tbs_certificate.validity.not_after);
        if not_after <= now {
            return Err(IdentityError::CertificateExpired);
        }

        let tbs_der = subject.cert.tbs_certificate.to_der()?;
        let digest = Sha1::digest(&tbs_der);
        let signature = subject
            .cert
            .signature
            .as_bytes()
            .ok_or_else(|| IdentityError::Malformed("unaligned signature bits".into()))?;
        self.public
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
            .map_err(|_| IdentityError::SignatureInvalid)
    }

    /// RSA-seal a session key to this identity's public key.
    ///
    /// The result is one [`CIPHERTEXT_SIZE`]-byte block carrying the
    /// raw key material — the key-file transfer payload.
    pub fn seal_key(&self, key: &SessionKey) -> Result<Vec<u8>> {
        self.encrypt(&key.export())
    }

    /// Recover a session key sealed with [`Identity::seal_key`].
    pub fn unseal_key(&self, data: &[u8]) -> Result<SessionKey> {
        let raw = self.decrypt(data)?;
        Ok(SessionKey::from_slice(&raw)?)
    }

    fn refresh_names(&mut self) {
        self.name = dn::get_attr(&self.cert.tbs_certificate.subject, DnAttr::CommonName);
        self.issuer_name = dn::get_attr(&self.cert.tbs_certificate.issuer, DnAttr::CommonName);
    }
}

fn signature_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: OID_SHA1_WITH_RSA,
        parameters: Some(der::asn1::AnyRef::NULL.into()),
    }
}

fn validity_window(expire_secs: u64) -> Result<Validity> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| IdentityError::Clock)?;
    let not_before = Duration::from_secs(now.as_secs());
    let not_after = not_before + Duration::from_secs(expire_secs);
    Ok(Validity {
        not_before: Time::UtcTime(UtcTime::from_unix_duration(not_before)?),
        not_after: Time::UtcTime(UtcTime::from_unix_duration(not_after)?),
    })
}

fn time_to_duration(time: &Time) -> Duration {
    match time {
        Time::UtcTime(t) => t.to_unix_duration(),
        Time::GeneralTime(t) => t.to_unix_duration(),
    }
}

/// SHA-1 key identifier over the subject public key bits.
fn spki_key_id(spki: &SubjectPublicKeyInfoOwned) -> Result<Vec<u8>> {
    let bits = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| IdentityError::Malformed("unaligned public key bits".into()))?;
    Ok(Sha1::digest(bits).to_vec())
}

fn extension(oid: ObjectIdentifier, value: Vec<u8>) -> Result<Extension> {
    Ok(Extension {
        extn_id: oid,
        critical: false,
        extn_value: OctetString::new(value)?,
    })
}
