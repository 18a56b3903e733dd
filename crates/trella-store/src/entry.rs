//! Store entries.

use trella_crypto::SessionKey;
use trella_identity::Identity;

/// The payload of one store entry.
#[derive(Debug, Clone)]
pub enum EntryKind {
    /// A certificate, optionally with its private key. `export_key`
    /// governs whether the key is serialized by the next save; an
    /// identity inserted without it is stored stripped.
    Identity {
        identity: Identity,
        export_key: bool,
    },
    /// Raw symmetric key material.
    SessionKey(SessionKey),
    /// Opaque application secret.
    Secret(Vec<u8>),
}

/// One entry: payload plus optional friendly name and id bytes.
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: EntryKind,
    pub friendly: Option<String>,
    pub id: Option<Vec<u8>>,
}

impl Entry {
    /// The contained identity, if this is an identity entry.
    pub fn identity(&self) -> Option<&Identity> {
        match &self.kind {
            EntryKind::Identity { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// The contained session key, if this is a key entry.
    pub fn session_key(&self) -> Option<&SessionKey> {
        match &self.kind {
            EntryKind::SessionKey(key) => Some(key),
            _ => None,
        }
    }

    /// The contained secret bytes, if this is a secret entry.
    pub fn secret(&self) -> Option<&[u8]> {
        match &self.kind {
            EntryKind::Secret(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Identity { .. } => EntryType::Identity,
            EntryKind::SessionKey(_) => EntryType::Key,
            EntryKind::Secret(_) => EntryType::Secret,
        }
    }
}

/// Entry-type filter for [`crate::Store::find_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Match any entry.
    All,
    /// Certificate entries.
    Identity,
    /// Session-key entries.
    Key,
    /// Secret entries.
    Secret,
}

impl EntryType {
    pub(crate) fn matches(self, entry: &Entry) -> bool {
        self == EntryType::All || self == entry.entry_type()
    }
}
