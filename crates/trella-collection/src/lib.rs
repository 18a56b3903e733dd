//! # trella-collection
//!
//! The shared-file index: what this node advertises into the overlay.
//!
//! A [`Collection`] is fed by directory sources, each with an
//! extension filter and an owner label (the group a share belongs
//! to). [`Collection::rescan`] walks every source and reconciles the
//! index mark-and-sweep style: entries whose file still exists keep
//! their id, vanished files are dropped, new files are inserted at
//! the head. Data entries (in-memory blobs such as group key files)
//! never participate in the sweep.
//!
//! Entry ids are monotonically increasing and never reused within a
//! collection's lifetime; the overlay hands them out as transfer
//! refs.

mod glob;

pub use glob::glob_match;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One indexed item: a file on disk or an in-memory blob.
#[derive(Debug, Clone)]
pub struct Entry {
    id: u32,
    name: String,
    path: Option<PathBuf>,
    data: Option<Vec<u8>>,
    size: u64,
    label: Option<String>,
    rescanned: bool,
}

impl Entry {
    /// The stable id assigned at insert time.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The advertised name (file name, or blob name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backing file path for file entries.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The blob contents for data entries.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The owner label (group name for group shares, `None` for
    /// public entries).
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

struct Source {
    root: PathBuf,
    extensions: Option<String>,
    label: Option<String>,
}

struct Inner {
    sources: Vec<Source>,
    entries: Vec<Entry>,
    next_id: u32,
}

/// A collection of shared files and blobs.
pub struct Collection {
    inner: Mutex<Inner>,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// An empty collection with no sources.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sources: Vec::new(),
                entries: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Register a directory source. `extensions` is a
    /// semicolon-separated, case-insensitive list with the dot
    /// implied (`"txt;mp3"`); `None` admits every file. The source
    /// is picked up by the next [`Collection::rescan`].
    pub fn add_source(
        &self,
        root: impl AsRef<Path>,
        extensions: Option<&str>,
        label: Option<&str>,
    ) {
        self.lock().sources.push(Source {
            root: root.as_ref().to_path_buf(),
            extensions: extensions.map(str::to_owned),
            label: label.map(str::to_owned),
        });
    }

    /// Remove every source rooted at `root`. Entries it produced are
    /// swept by the next rescan.
    pub fn remove_source(&self, root: impl AsRef<Path>) {
        self.lock()
            .sources
            .retain(|s| s.root != root.as_ref());
    }

    /// Insert an in-memory blob entry and return its id. Blob
    /// entries survive rescans.
    pub fn add_data(&self, name: &str, data: Vec<u8>, label: Option<&str>) -> u32 {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let size = data.len() as u64;
        inner.entries.insert(
            0,
            Entry {
                id,
                name: name.to_owned(),
                path: None,
                data: Some(data),
                size,
                label: label.map(str::to_owned),
                rescanned: false,
            },
        );
        id
    }

    /// Remove one entry by id. Returns whether it existed.
    pub fn remove(&self, id: u32) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        inner.entries.len() != before
    }

    /// Rewalk every source and reconcile the index.
    ///
    /// Files that persisted keep their entry (and id); files that
    /// vanished lose theirs; new files join at the head. Unreadable
    /// directories are skipped silently; each file is visited at
    /// most once per pass.
    pub fn rescan(&self) {
        let mut inner = self.lock();
        let inner = &mut *inner;

        for entry in inner.entries.iter_mut() {
            entry.rescanned = false;
        }

        let mut by_path: HashMap<PathBuf, usize> = inner
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.path.clone().map(|p| (p, i)))
            .collect();

        let mut found: Vec<Entry> = Vec::new();
        for source in &inner.sources {
            for item in walkdir::WalkDir::new(&source.root)
                .follow_links(false)
                .into_iter()
                .filter_map(|r| r.ok())
            {
                if !item.file_type().is_file() {
                    continue;
                }
                let name = item.file_name().to_string_lossy().into_owned();
                if !extension_matches(&name, source.extensions.as_deref()) {
                    continue;
                }
                let Ok(meta) = item.metadata() else {
                    continue;
                };

                let path = item.path().to_path_buf();
                if let Some(&i) = by_path.get(&path) {
                    // Seen this pass already (overlapping sources), or
                    // carried over from the previous index.
                    if let Some(entry) = inner.entries.get_mut(i) {
                        if !entry.rescanned {
                            entry.rescanned = true;
                            entry.size = meta.len();
                        }
                    }
                    continue;
                }

                let id = inner.next_id;
                inner.next_id += 1;
                by_path.insert(path.clone(), usize::MAX);
                found.push(Entry {
                    id,
                    name,
                    path: Some(path),
                    data: None,
                    size: meta.len(),
                    label: source.label.clone(),
                    rescanned: true,
                });
            }
        }

        // Sweep file entries the walk did not confirm; blobs stay.
        inner
            .entries
            .retain(|e| e.path.is_none() || e.rescanned);

        // New files join at the head.
        for entry in found.into_iter().rev() {
            inner.entries.insert(0, entry);
        }

        tracing::debug!(count = inner.entries.len(), "collection rescanned");
    }

    /// Find the next entry whose name matches the glob `pattern`
    /// (`*`, `?`, `\` escape, case-insensitive), starting after the
    /// entry with id `after` (or from the head with `None`).
    ///
    /// Returns a clone; resume the enumeration by passing the
    /// returned entry's id.
    pub fn find(&self, pattern: &str, after: Option<u32>) -> Option<Entry> {
        let inner = self.lock();
        let start = match after {
            Some(id) => inner.entries.iter().position(|e| e.id == id)? + 1,
            None => 0,
        };
        inner.entries[start..]
            .iter()
            .find(|e| glob_match(&e.name, pattern))
            .cloned()
    }

    /// Look up an entry by id.
    pub fn find_by_id(&self, id: u32) -> Option<Entry> {
        self.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the collection holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Case-insensitive extension-list match with the dot implied.
fn extension_matches(name: &str, extensions: Option<&str>) -> bool {
    let Some(list) = extensions else {
        return true;
    };
    if list.is_empty() {
        return true;
    }
    list.split(';').filter(|ext| !ext.is_empty()).any(|ext| {
        name.len() > ext.len()
            && name.as_bytes()[name.len() - ext.len() - 1] == b'.'
            && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write file");
        path
    }

    #[test]
    fn test_extension_filter() {
        assert!(extension_matches("song.mp3", Some("mp3;ogg")));
        assert!(extension_matches("SONG.MP3", Some("mp3")));
        assert!(extension_matches("a.ogg", Some("mp3;ogg")));
        assert!(!extension_matches("notes.txt", Some("mp3;ogg")));
        assert!(!extension_matches("mp3", Some("mp3")));
        assert!(extension_matches("anything", None));
        assert!(extension_matches("anything", Some("")));
    }

    #[test]
    fn test_rescan_indexes_matching_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_file(dir.path(), "alpha.txt", b"alpha contents");
        write_file(dir.path(), "beta.mp3", b"nope");
        let sub = dir.path().join("nested");
        fs::create_dir(&sub).expect("mkdir");
        write_file(&sub, "gamma.txt", b"deep");

        let collect = Collection::new();
        collect.add_source(dir.path(), Some("txt"), None);
        collect.rescan();

        assert_eq!(collect.len(), 2);
        let alpha = collect.find("alpha*", None).expect("alpha");
        assert_eq!(alpha.name(), "alpha.txt");
        assert_eq!(alpha.size(), 14);
        assert!(collect.find("beta*", None).is_none());
    }

    #[test]
    fn test_rescan_preserves_ids_of_surviving_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let keep = write_file(dir.path(), "keep.txt", b"keep");
        write_file(dir.path(), "drop.txt", b"drop");

        let collect = Collection::new();
        collect.add_source(dir.path(), Some("txt"), None);
        collect.rescan();

        let keep_id = collect.find("keep.txt", None).expect("keep").id();
        fs::remove_file(dir.path().join("drop.txt")).expect("remove");
        write_file(dir.path(), "fresh.txt", b"fresh");
        collect.rescan();

        assert_eq!(collect.find("keep.txt", None).expect("keep").id(), keep_id);
        assert!(collect.find("drop.txt", None).is_none());
        let fresh = collect.find("fresh.txt", None).expect("fresh");
        assert_ne!(fresh.id(), keep_id);

        // Unchanged path, updated size.
        fs::write(&keep, b"keep but longer").expect("rewrite");
        collect.rescan();
        assert_eq!(collect.find("keep.txt", None).expect("keep").size(), 15);
    }

    #[test]
    fn test_data_entries_survive_rescan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let collect = Collection::new();
        collect.add_source(dir.path(), None, None);

        let id = collect.add_data("/secure/G/key", vec![1, 2, 3], Some("G"));
        collect.rescan();
        let entry = collect.find_by_id(id).expect("blob survives");
        assert_eq!(entry.data(), Some(&[1u8, 2, 3][..]));
        assert_eq!(entry.label(), Some("G"));
    }

    #[test]
    fn test_find_cursor_walks_matches() {
        let collect = Collection::new();
        let a = collect.add_data("one.txt", vec![1], None);
        let b = collect.add_data("two.txt", vec![2], None);
        collect.add_data("other.bin", vec![3], None);

        // Head insertion puts the newest first.
        let first = collect.find("*.txt", None).expect("first");
        assert_eq!(first.id(), b);
        let second = collect.find("*.txt", Some(first.id())).expect("second");
        assert_eq!(second.id(), a);
        assert!(collect.find("*.txt", Some(second.id())).is_none());
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let collect = Collection::new();
        collect.add_source("/definitely/not/here", None, None);
        collect.rescan();
        assert!(collect.is_empty());
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let collect = Collection::new();
        let a = collect.add_data("a", vec![], None);
        let b = collect.add_data("b", vec![], None);
        assert!(b > a);
        collect.remove(b);
        let c = collect.add_data("c", vec![], None);
        assert!(c > b);
    }
}
