//! The on-disk archive container.
//!
//! Layout (all CBOR):
//!
//! ```text
//! ArchiveFile {
//!     version: 2,
//!     salt:    [u8; 8],          // archive-key salt
//!     sealed:  bool,             // payload encrypted?
//!     payload: encrypted? CBOR(Vec<Bag>),
//!     mac:     Option<{ salt, HMAC-SHA1(payload) }>,
//! }
//! ```
//!
//! The archive key is PBKDF2-HMAC-SHA1 of the archive password; the
//! MAC key is PBKDF2-HMAC-SHA1 of the MAC password under its own
//! salt. The two passwords are independent and either may be absent.
//! Private keys appear only in certificate bags whose entry carried
//! the export flag, PKCS#8-shrouded under the archive password when
//! one is present.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use trella_crypto::{random, CryptoError, SessionKey, DIGEST_SIZE, PBKDF2_ITERATIONS};
use trella_identity::Identity;

use crate::entry::{Entry, EntryKind};
use crate::{Result, StoreError, KEY_FRIENDLY};

/// Current archive format version.
const VERSION: u8 = 2;

/// Salt length for both the archive key and the MAC key.
const SALT_SIZE: usize = 8;

type HmacSha1 = Hmac<Sha1>;

#[derive(Serialize, Deserialize)]
struct ArchiveFile {
    version: u8,
    salt: Vec<u8>,
    sealed: bool,
    payload: Vec<u8>,
    mac: Option<MacBlock>,
}

#[derive(Serialize, Deserialize)]
struct MacBlock {
    salt: Vec<u8>,
    digest: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
enum Bag {
    Certificate {
        cert: Vec<u8>,
        shrouded_key: Option<Vec<u8>>,
        friendly: Option<String>,
        id: Option<Vec<u8>>,
    },
    KeyData {
        key: Vec<u8>,
        id: Option<Vec<u8>>,
    },
    Secret {
        data: Vec<u8>,
        friendly: Option<String>,
        id: Option<Vec<u8>>,
    },
}

/// Serialize `entries` into archive bytes.
pub fn write(
    entries: &[Entry],
    passwd: Option<&str>,
    mac_passwd: Option<&str>,
) -> Result<Vec<u8>> {
    let mut bags = Vec::with_capacity(entries.len());
    for entry in entries {
        bags.push(to_bag(entry, passwd)?);
    }

    let mut plain = Vec::new();
    ciborium::into_writer(&bags, &mut plain)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let mut salt = vec![0u8; SALT_SIZE];
    random::fill(&mut salt);
    let (sealed, payload) = match passwd {
        Some(pw) => (true, SessionKey::from_password(pw, &salt).encrypt(&plain)?),
        None => (false, plain),
    };

    let mac = match mac_passwd {
        Some(pw) => {
            let mut mac_salt = vec![0u8; SALT_SIZE];
            random::fill(&mut mac_salt);
            let digest = mac_digest(pw, &mac_salt, &payload)?;
            Some(MacBlock {
                salt: mac_salt,
                digest,
            })
        }
        None => None,
    };

    let file = ArchiveFile {
        version: VERSION,
        salt,
        sealed,
        payload,
        mac,
    };
    let mut out = Vec::new();
    ciborium::into_writer(&file, &mut out)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(out)
}

/// Parse archive bytes back into entries, verifying the MAC and
/// decrypting the payload under the given passwords.
pub fn read(
    data: &[u8],
    passwd: Option<&str>,
    mac_passwd: Option<&str>,
) -> Result<Vec<Entry>> {
    let file: ArchiveFile = ciborium::from_reader(data)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    if file.version != VERSION {
        return Err(StoreError::Malformed(format!(
            "unsupported archive version {}",
            file.version
        )));
    }

    match (&file.mac, mac_passwd) {
        (Some(mac), Some(pw)) => {
            let expected = mac_digest(pw, &mac.salt, &file.payload)?;
            // HMAC output comparison; both sides are fixed-size
            // digests computed here, so a plain comparison is fine.
            if expected != mac.digest {
                return Err(StoreError::MacMismatch);
            }
        }
        (None, None) => {}
        _ => return Err(StoreError::MacMismatch),
    }

    let plain = if file.sealed {
        let pw = passwd.ok_or(StoreError::BadPassword)?;
        SessionKey::from_password(pw, &file.salt)
            .decrypt(&file.payload)
            .map_err(|e| match e {
                CryptoError::DigestMismatch | CryptoError::TruncatedInput => {
                    StoreError::BadPassword
                }
                other => StoreError::Crypto(other),
            })?
    } else {
        file.payload
    };

    let bags: Vec<Bag> = ciborium::from_reader(plain.as_slice())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    bags.into_iter().map(|bag| from_bag(bag, passwd)).collect()
}

fn mac_digest(passwd: &str, salt: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let mut key = [0u8; DIGEST_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha1>(passwd.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    let mut mac = <HmacSha1 as Mac>::new_from_slice(&key)
        .map_err(|_| StoreError::Malformed("HMAC key rejected".into()))?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn to_bag(entry: &Entry, passwd: Option<&str>) -> Result<Bag> {
    Ok(match &entry.kind {
        EntryKind::Identity {
            identity,
            export_key,
        } => Bag::Certificate {
            cert: identity.cert_der()?,
            shrouded_key: shroud_key(identity, *export_key, passwd)?,
            friendly: entry.friendly.clone(),
            id: entry.id.clone(),
        },
        EntryKind::SessionKey(key) => Bag::KeyData {
            key: key.export().to_vec(),
            id: entry.id.clone(),
        },
        EntryKind::Secret(data) => Bag::Secret {
            data: data.clone(),
            friendly: entry.friendly.clone(),
            id: entry.id.clone(),
        },
    })
}

fn from_bag(bag: Bag, passwd: Option<&str>) -> Result<Entry> {
    Ok(match bag {
        Bag::Certificate {
            cert,
            shrouded_key,
            friendly,
            id,
        } => {
            let private = match shrouded_key {
                Some(der) => Some(unshroud_key(&der, passwd)?),
                None => None,
            };
            let export_key = private.is_some();
            let identity = Identity::from_der_parts(&cert, private)?;
            Entry {
                kind: EntryKind::Identity {
                    identity,
                    export_key,
                },
                friendly,
                id,
            }
        }
        Bag::KeyData { key, id } => Entry {
            kind: EntryKind::SessionKey(SessionKey::from_slice(&key)?),
            friendly: Some(KEY_FRIENDLY.to_string()),
            id,
        },
        Bag::Secret { data, friendly, id } => Entry {
            kind: EntryKind::Secret(data),
            friendly,
            id,
        },
    })
}

fn unshroud_key(der: &[u8], passwd: Option<&str>) -> Result<RsaPrivateKey> {
    match passwd {
        Some(pw) => RsaPrivateKey::from_pkcs8_encrypted_der(der, pw.as_bytes())
            .map_err(|_| StoreError::BadPassword),
        None => RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| StoreError::Malformed(format!("key bag: {e}"))),
    }
}

fn shroud_key(
    identity: &Identity,
    export: bool,
    passwd: Option<&str>,
) -> Result<Option<Vec<u8>>> {
    if !export {
        return Ok(None);
    }
    let Some(private) = identity.private_key() else {
        return Ok(None);
    };
    let doc = match passwd {
        Some(pw) => private.to_pkcs8_encrypted_der(&mut OsRng, pw.as_bytes())?,
        None => private.to_pkcs8_der()?,
    };
    Ok(Some(doc.as_bytes().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<Entry> {
        let identity = Identity::generate("Archive Test").expect("generate");
        vec![
            Entry {
                kind: EntryKind::Identity {
                    identity,
                    export_key: true,
                },
                friendly: Some("Archive Test".into()),
                id: Some(b"1234".to_vec()),
            },
            Entry {
                kind: EntryKind::SessionKey(SessionKey::generate()),
                friendly: Some(KEY_FRIENDLY.into()),
                id: None,
            },
            Entry {
                kind: EntryKind::Secret(b"opaque".to_vec()),
                friendly: Some("Doe".into()),
                id: None,
            },
        ]
    }

    #[test]
    fn test_roundtrip_with_both_passwords() {
        let entries = sample_entries();
        let data = write(&entries, Some("Passwd"), Some("MacPasswd")).expect("write");
        let back = read(&data, Some("Passwd"), Some("MacPasswd")).expect("read");
        assert_eq!(back.len(), entries.len());
        let identity = back[0].identity().expect("identity entry");
        assert_eq!(identity.name(), Some("Archive Test"));
        assert!(identity.has_private_key());
        assert_eq!(
            back[1].session_key().expect("key entry").export(),
            entries[1].session_key().expect("key entry").export()
        );
        assert_eq!(back[2].secret(), Some(&b"opaque"[..]));
    }

    #[test]
    fn test_password_combinations_rejected() {
        let data = write(&sample_entries(), Some("Passwd"), Some("MacPasswd")).expect("write");
        assert!(matches!(
            read(&data, None, None),
            Err(StoreError::MacMismatch)
        ));
        assert!(matches!(
            read(&data, Some("Passwd"), None),
            Err(StoreError::MacMismatch)
        ));
        assert!(matches!(
            read(&data, None, Some("MacPasswd")),
            Err(StoreError::BadPassword)
        ));
        assert!(matches!(
            read(&data, Some("Passwd"), Some("WrongMac")),
            Err(StoreError::MacMismatch)
        ));
        assert!(matches!(
            read(&data, Some("Wrong"), Some("MacPasswd")),
            Err(StoreError::BadPassword)
        ));
    }

    #[test]
    fn test_null_passwords_roundtrip() {
        let data = write(&sample_entries(), None, None).expect("write");
        let back = read(&data, None, None).expect("read");
        assert_eq!(back.len(), 3);
        // A MAC password against a MAC-less archive must fail too.
        assert!(matches!(
            read(&data, None, Some("MacPasswd")),
            Err(StoreError::MacMismatch)
        ));
    }

    #[test]
    fn test_unexported_key_stays_private() {
        let identity = Identity::generate("No Export").expect("generate");
        let entries = vec![Entry {
            kind: EntryKind::Identity {
                identity,
                export_key: false,
            },
            friendly: None,
            id: None,
        }];
        let data = write(&entries, None, None).expect("write");
        let back = read(&data, None, None).expect("read");
        assert!(!back[0].identity().expect("identity").has_private_key());
    }
}
