//! The store: an ordered entry list with an optional file backing.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use trella_crypto::SessionKey;
use trella_identity::Identity;

use crate::entry::{Entry, EntryKind, EntryType};
use crate::{archive, Result, StoreError, KEY_FRIENDLY};

/// Secure storage for identities, session keys, and secrets.
///
/// Entries keep insertion order. The *local identity* is the first
/// identity entry whose private key is present; everything that needs
/// "our own" credentials resolves it through
/// [`Store::local_identity`].
pub struct Store {
    path: Option<PathBuf>,
    passwd: Option<String>,
    mac_passwd: Option<String>,
    entries: Mutex<Vec<Entry>>,
}

impl Store {
    /// An in-memory store with no backing.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            passwd: None,
            mac_passwd: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// A store backed by an archive file. Neither password is
    /// required; each independently enables payload encryption and
    /// MAC authentication.
    pub fn with_backing(
        path: impl AsRef<Path>,
        passwd: Option<&str>,
        mac_passwd: Option<&str>,
    ) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            passwd: passwd.map(str::to_owned),
            mac_passwd: mac_passwd.map(str::to_owned),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Replace the current entries with the backing archive's
    /// contents. Fails on MAC mismatch or password mismatch without
    /// touching the archive.
    pub fn load(&self) -> Result<()> {
        let path = self.path.as_ref().ok_or(StoreError::NoBacking)?;
        let data = std::fs::read(path)?;
        let loaded = archive::read(&data, self.passwd.as_deref(), self.mac_passwd.as_deref())?;
        let mut entries = self.lock();
        *entries = loaded;
        tracing::debug!(path = %path.display(), count = entries.len(), "store loaded");
        Ok(())
    }

    /// Serialize the current entries to the backing archive.
    pub fn save(&self) -> Result<()> {
        let path = self.path.as_ref().ok_or(StoreError::NoBacking)?;
        let entries = self.lock();
        let data = archive::write(&entries, self.passwd.as_deref(), self.mac_passwd.as_deref())?;
        std::fs::write(path, data)?;
        tracing::debug!(path = %path.display(), count = entries.len(), "store saved");
        Ok(())
    }

    /// Drop all entries; with `remove_backing`, delete the archive
    /// file as well.
    pub fn reset(&self, remove_backing: bool) {
        self.lock().clear();
        if remove_backing {
            if let Some(path) = &self.path {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Insert an identity. Without `export_key`, the stored copy is
    /// stripped of its private key so the key can never reach the
    /// archive.
    pub fn insert_identity(
        &self,
        identity: &Identity,
        export_key: bool,
        friendly: Option<&str>,
        id: Option<&[u8]>,
    ) {
        let mut copy = identity.clone();
        if !export_key {
            copy.strip_private_key();
        }
        // New entries join at the head, so the newest keyed identity
        // is the local one.
        self.lock().insert(
            0,
            Entry {
                kind: EntryKind::Identity {
                    identity: copy,
                    export_key,
                },
                friendly: friendly.map(str::to_owned),
                id: id.map(<[u8]>::to_vec),
            },
        );
    }

    /// Remove an identity by public-modulus equality, so a
    /// re-imported copy of the "same" identity removes its twin.
    /// Returns whether an entry was removed.
    pub fn remove_identity(&self, identity: &Identity) -> bool {
        let modulus = identity.public_key_bytes();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| match e.identity() {
            Some(stored) => stored.public_key_bytes() != modulus,
            None => true,
        });
        entries.len() != before
    }

    /// Insert a session key under the reserved `.KEYDATA.` friendly
    /// name.
    pub fn insert_key(&self, key: &SessionKey, id: Option<&[u8]>) {
        self.lock().insert(
            0,
            Entry {
                kind: EntryKind::SessionKey(key.clone()),
                friendly: Some(KEY_FRIENDLY.to_string()),
                id: id.map(<[u8]>::to_vec),
            },
        );
    }

    /// Remove a session key by key-material equality.
    pub fn remove_key(&self, key: &SessionKey) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| match e.session_key() {
            Some(stored) => stored != key,
            None => true,
        });
        entries.len() != before
    }

    /// Insert an opaque secret.
    pub fn insert_secret(&self, data: &[u8], friendly: Option<&str>, id: Option<&[u8]>) {
        self.lock().insert(
            0,
            Entry {
                kind: EntryKind::Secret(data.to_vec()),
                friendly: friendly.map(str::to_owned),
                id: id.map(<[u8]>::to_vec),
            },
        );
    }

    /// Remove a secret by content equality.
    pub fn remove_secret(&self, data: &[u8]) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.secret() != Some(data));
        entries.len() != before
    }

    /// Find the next entry matching the filter, starting at index
    /// `start`. Returns the entry's index and a clone; resume an
    /// enumeration by passing `index + 1`.
    pub fn find_entry(
        &self,
        entry_type: EntryType,
        friendly: Option<&str>,
        id: Option<&[u8]>,
        start: usize,
    ) -> Option<(usize, Entry)> {
        let entries = self.lock();
        entries
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, e)| {
                entry_type.matches(e)
                    && friendly.map_or(true, |f| e.friendly.as_deref() == Some(f))
                    && id.map_or(true, |i| e.id.as_deref() == Some(i))
            })
            .map(|(i, e)| (i, e.clone()))
    }

    /// Find the next identity matching common name, key requirement,
    /// and public modulus, starting at index `start`.
    pub fn find_identity(
        &self,
        name: Option<&str>,
        require_key: bool,
        modulus: Option<&[u8]>,
        start: usize,
    ) -> Option<(usize, Identity)> {
        let entries = self.lock();
        entries
            .iter()
            .enumerate()
            .skip(start)
            .find_map(|(i, e)| {
                let identity = e.identity()?;
                if name.is_some_and(|n| identity.name() != Some(n)) {
                    return None;
                }
                if require_key && !identity.has_private_key() {
                    return None;
                }
                if modulus.is_some_and(|m| identity.public_key_bytes() != m) {
                    return None;
                }
                Some((i, identity.clone()))
            })
    }

    /// The local identity: the first identity entry holding a
    /// private key.
    pub fn local_identity(&self) -> Option<Identity> {
        self.find_identity(None, true, None, 0).map(|(_, id)| id)
    }

    /// Export a single identity as a standalone archive.
    pub fn export_identity(
        identity: &Identity,
        export_key: bool,
        passwd: Option<&str>,
        mac_passwd: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut copy = identity.clone();
        if !export_key {
            copy.strip_private_key();
        }
        let entry = Entry {
            kind: EntryKind::Identity {
                identity: copy,
                export_key,
            },
            friendly: identity.name().map(str::to_owned),
            id: None,
        };
        archive::write(std::slice::from_ref(&entry), passwd, mac_passwd)
    }

    /// Import the identity from a standalone archive written by
    /// [`Store::export_identity`].
    pub fn import_identity(
        data: &[u8],
        passwd: Option<&str>,
        mac_passwd: Option<&str>,
    ) -> Result<Identity> {
        let entries = archive::read(data, passwd, mac_passwd)?;
        entries
            .into_iter()
            .find_map(|e| match e.kind {
                EntryKind::Identity { identity, .. } => Some(identity),
                _ => None,
            })
            .ok_or_else(|| StoreError::Malformed("archive holds no identity".into()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
