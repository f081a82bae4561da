//! Persistent Cache Module
//!
//! Capacity-bounded digest → blob store on disk.
//!
//! Layout under the family root:
//!
//! ```text
//! <root>/v<version>/records/<digest>    evictable records
//! <root>/v<version>/retained/<digest>   records exempt from capacity eviction
//! <root>/v<version>/tmp/                staging area for uncommitted writes
//! ```
//!
//! Writes are staged in `tmp/` and committed with an atomic rename, so a record
//! is either fully visible or not at all. Access order is kept in memory and
//! mirrored to file mtimes, which rebuild it when the store is reopened.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::Disks;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

use crate::cache::{Digest, LruTracker};
use crate::error::{CacheError, Result};

/// Free space always left to the rest of the device.
pub const FREE_SPACE_RESERVE: u64 = 30 * 1024 * 1024;
/// Largest budget derived from free space.
pub const AUTO_CAPACITY_CEILING: u64 = 20 * 1024 * 1024;

const RECORDS_DIR: &str = "records";
const RETAINED_DIR: &str = "retained";
const STAGING_DIR: &str = "tmp";

/// Retries when the staging directory vanished under a concurrent `delete`.
const MAX_STAGING_RETRIES: usize = 2;

// == Options ==
/// How the byte budget of a store is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityHint {
    /// Use exactly this many bytes
    Explicit(u64),
    /// Derive from device free space, see [`auto_capacity`]
    Auto,
}

impl CapacityHint {
    /// Byte budget granted to a store rooted at `path`, which must exist.
    pub fn resolve(self, path: &Path) -> Result<u64> {
        match self {
            CapacityHint::Explicit(bytes) => Ok(bytes),
            CapacityHint::Auto => available_space(path).map(auto_capacity).ok_or_else(|| {
                CacheError::StorageUnavailable(format!(
                    "cannot determine free space of {}",
                    path.display()
                ))
            }),
        }
    }
}

/// Whether a record takes part in capacity eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    #[default]
    Normal,
    /// Never evicted for capacity; still removable explicitly
    Always,
}

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Committed,
    /// Another write for the same digest is in progress; nothing was written
    Busy,
    /// The store runs in disabled mode
    Disabled,
    /// Staging or commit failed; the write was aborted
    Failed,
}

// == Persistent Stats ==
#[derive(Debug, Clone, Default, Serialize)]
pub struct PersistentStats {
    pub enabled: bool,
    pub entries: usize,
    pub retained_entries: usize,
    pub size_bytes: u64,
    pub capacity_bytes: u64,
}

// == Capacity ==
/// Budget derived from `free_bytes`: keeps [`FREE_SPACE_RESERVE`] free and
/// never exceeds [`AUTO_CAPACITY_CEILING`].
pub fn auto_capacity(free_bytes: u64) -> u64 {
    free_bytes
        .saturating_sub(FREE_SPACE_RESERVE)
        .min(AUTO_CAPACITY_CEILING)
}

/// Free bytes on the device holding `path`.
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[derive(Debug, Clone, Copy)]
struct RecordMeta {
    size: u64,
    retention: Retention,
}

#[derive(Debug, Default)]
struct DiskIndex {
    records: HashMap<String, RecordMeta>,
    lru: LruTracker,
    total_size: u64,
}

impl DiskIndex {
    fn insert(&mut self, digest: &str, meta: RecordMeta) {
        if let Some(old) = self.records.insert(digest.to_string(), meta) {
            self.total_size -= old.size;
        }
        self.total_size += meta.size;
        self.lru.touch(digest);
    }

    fn forget(&mut self, digest: &str) -> Option<RecordMeta> {
        let meta = self.records.remove(digest)?;
        self.lru.remove(digest);
        self.total_size -= meta.size;
        Some(meta)
    }
}

struct DiskStore {
    root: PathBuf,
    records_dir: PathBuf,
    retained_dir: PathBuf,
    staging_dir: PathBuf,
    capacity: u64,
    index: Mutex<DiskIndex>,
    editors: Mutex<HashSet<String>>,
}

/// Exclusive right to write one digest, released on drop.
struct EditorGuard<'a> {
    editors: &'a Mutex<HashSet<String>>,
    digest: String,
}

impl<'a> EditorGuard<'a> {
    fn claim(editors: &'a Mutex<HashSet<String>>, digest: &Digest) -> Option<Self> {
        let digest = digest.as_str().to_string();
        if !editors.lock().insert(digest.clone()) {
            return None;
        }
        Some(Self { editors, digest })
    }
}

impl Drop for EditorGuard<'_> {
    fn drop(&mut self) {
        self.editors.lock().remove(&self.digest);
    }
}

impl DiskStore {
    fn open(family_root: &Path, version: u32, hint: CapacityHint) -> Result<Self> {
        fs::create_dir_all(family_root)?;

        let capacity = hint.resolve(family_root)?;
        if capacity == 0 {
            return Err(CacheError::StorageUnavailable(format!(
                "no space budget for {}",
                family_root.display()
            )));
        }

        let current = format!("v{version}");
        remove_stale_versions(family_root, &current);

        let root = family_root.join(&current);
        let store = Self {
            records_dir: root.join(RECORDS_DIR),
            retained_dir: root.join(RETAINED_DIR),
            staging_dir: root.join(STAGING_DIR),
            root,
            capacity,
            index: Mutex::new(DiskIndex::default()),
            editors: Mutex::new(HashSet::new()),
        };

        fs::create_dir_all(&store.records_dir)?;
        fs::create_dir_all(&store.retained_dir)?;
        // Leftovers of writes interrupted by a crash
        if store.staging_dir.exists() {
            fs::remove_dir_all(&store.staging_dir)?;
        }
        fs::create_dir_all(&store.staging_dir)?;

        store.rebuild_index()?;
        Ok(store)
    }

    fn rebuild_index(&self) -> Result<()> {
        let mut found = Vec::new();
        scan_records(&self.records_dir, Retention::Normal, &mut found)?;
        scan_records(&self.retained_dir, Retention::Always, &mut found)?;
        found.sort_by_key(|(mtime, ..)| *mtime);

        let mut index = self.index.lock();
        for (_, digest, meta) in found {
            if let Some(previous) = index.records.get(&digest).copied() {
                // A crash between commit and cleanup left two copies, keep the newest
                remove_file_quietly(&self.path_for(&digest, previous.retention));
            }
            index.insert(&digest, meta);
        }
        info!(
            path = %self.root.display(),
            entries = index.records.len(),
            size = index.total_size,
            capacity = self.capacity,
            "persistent cache opened"
        );
        self.trim_locked(&mut index);
        Ok(())
    }

    fn path_for(&self, digest: &str, retention: Retention) -> PathBuf {
        match retention {
            Retention::Normal => self.records_dir.join(digest),
            Retention::Always => self.retained_dir.join(digest),
        }
    }

    /// Creates a staging file, recreating the staging directory if needed.
    fn stage(&self) -> io::Result<NamedTempFile> {
        let mut retries = 0;
        loop {
            retries += 1;
            let attempt = fs::create_dir_all(&self.staging_dir).and_then(|_| {
                tempfile::Builder::new()
                    .prefix("stage")
                    .tempfile_in(&self.staging_dir)
            });
            match attempt {
                Ok(file) => return Ok(file),
                Err(err) if retries > MAX_STAGING_RETRIES => return Err(err),
                Err(err) => debug!("retrying staging after error: {err}"),
            }
        }
    }

    fn put(&self, digest: &Digest, bytes: &[u8], retention: Retention) -> PutOutcome {
        let Some(_editor) = EditorGuard::claim(&self.editors, digest) else {
            trace!(%digest, "write skipped, digest already being edited");
            return PutOutcome::Busy;
        };

        // Dropping an uncommitted NamedTempFile deletes it, which aborts the write
        let staged = match self.stage().and_then(|mut file| {
            file.write_all(bytes)?;
            file.flush()?;
            file.as_file().sync_all()?;
            Ok(file)
        }) {
            Ok(file) => file,
            Err(err) => {
                warn!(%digest, "aborting persistent write: {err}");
                return PutOutcome::Failed;
            }
        };

        let mut index = self.index.lock();
        let target = self.path_for(digest.as_str(), retention);
        if let Err(err) = staged.persist(&target) {
            warn!(%digest, "aborting persistent commit: {}", err.error);
            return PutOutcome::Failed;
        }
        let other = match retention {
            Retention::Normal => Retention::Always,
            Retention::Always => Retention::Normal,
        };
        remove_file_quietly(&self.path_for(digest.as_str(), other));

        index.insert(
            digest.as_str(),
            RecordMeta {
                size: bytes.len() as u64,
                retention,
            },
        );
        trace!(%digest, size = bytes.len(), "persistent record committed");
        self.trim_locked(&mut index);
        PutOutcome::Committed
    }

    fn get(&self, digest: &Digest) -> Option<Vec<u8>> {
        let retention = self.locate(digest)?;
        self.read_located(digest, retention)
    }

    /// Marks `digest` most recently used and returns where it lives.
    fn locate(&self, digest: &Digest) -> Option<Retention> {
        let mut index = self.index.lock();
        let meta = *index.records.get(digest.as_str())?;
        index.lru.touch(digest.as_str());
        Some(meta.retention)
    }

    /// Reads a record located without holding the index lock.
    ///
    /// A concurrent commit may have moved the record between `records/` and
    /// `retained/` in the meantime; only a record still indexed at the path
    /// that was read is forgotten.
    fn read_located(&self, digest: &Digest, retention: Retention) -> Option<Vec<u8>> {
        let path = self.path_for(digest.as_str(), retention);
        match read_snapshot(&path) {
            Ok(bytes) => {
                if let Err(err) = filetime::set_file_mtime(&path, FileTime::now()) {
                    trace!(%digest, "could not bump record mtime: {err}");
                }
                Some(bytes)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let current = {
                    let mut index = self.index.lock();
                    match index.records.get(digest.as_str()).map(|meta| meta.retention) {
                        Some(current) if current == retention => {
                            debug!(%digest, "record vanished from disk");
                            index.forget(digest.as_str());
                            return None;
                        }
                        current => current?,
                    }
                };
                trace!(%digest, ?current, "record moved by a concurrent write");
                self.read_located(digest, current)
            }
            Err(err) => {
                warn!(%digest, "failed to read persistent record: {err}");
                None
            }
        }
    }

    fn remove(&self, digest: &str) -> bool {
        let mut index = self.index.lock();
        match index.forget(digest) {
            Some(meta) => {
                remove_file_quietly(&self.path_for(digest, meta.retention));
                true
            }
            None => false,
        }
    }

    fn delete(&self) -> Result<()> {
        let mut index = self.index.lock();
        for dir in [&self.records_dir, &self.retained_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
        }
        *index = DiskIndex::default();
        info!(path = %self.root.display(), "persistent cache cleared");
        Ok(())
    }

    fn trim_locked(&self, index: &mut DiskIndex) {
        if index.total_size <= self.capacity {
            return;
        }

        let mut excess = index.total_size - self.capacity;
        let victims: Vec<String> = index
            .lru
            .iter_oldest()
            .filter(|digest| {
                index
                    .records
                    .get(*digest)
                    .is_some_and(|meta| meta.retention == Retention::Normal)
            })
            .take_while(|digest| {
                let fits = excess > 0;
                if let Some(meta) = index.records.get(*digest) {
                    excess = excess.saturating_sub(meta.size);
                }
                fits
            })
            .map(str::to_string)
            .collect();

        for digest in victims {
            if let Some(meta) = index.forget(&digest) {
                remove_file_quietly(&self.path_for(&digest, meta.retention));
                debug!(%digest, size = meta.size, "evicted persistent record");
            }
        }

        if index.total_size > self.capacity {
            warn!(
                size = index.total_size,
                capacity = self.capacity,
                "retained records alone exceed the persistent budget"
            );
        }
    }
}

// == Persistent Cache ==
/// Digest-addressed blob store with LRU eviction by total byte size.
///
/// Clones share the same store. A store that could not be opened runs in
/// disabled mode: every put is a no-op and every get a miss.
#[derive(Clone)]
pub struct PersistentCache {
    store: Option<Arc<DiskStore>>,
}

impl PersistentCache {
    // == Open ==
    /// Opens the store for `version` under `root`.
    ///
    /// Records written by any other version are deleted. Failure to open is
    /// logged and yields a disabled store.
    pub fn open(root: impl AsRef<Path>, version: u32, capacity: CapacityHint) -> Self {
        let root = root.as_ref();
        match DiskStore::open(root, version, capacity) {
            Ok(store) => Self {
                store: Some(Arc::new(store)),
            },
            Err(err) => {
                warn!(path = %root.display(), "persistent cache disabled: {err}");
                Self::disabled()
            }
        }
    }

    /// A store that never holds anything.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Directory holding this version's records.
    pub fn path(&self) -> Option<&Path> {
        self.store.as_deref().map(|store| store.root.as_path())
    }

    // == Put ==
    /// Stores an evictable record.
    pub fn put(&self, digest: &Digest, bytes: &[u8]) -> PutOutcome {
        self.put_with(digest, bytes, Retention::Normal)
    }

    /// Stores a record with the given retention, replacing any previous one.
    pub fn put_with(&self, digest: &Digest, bytes: &[u8], retention: Retention) -> PutOutcome {
        match &self.store {
            Some(store) => store.put(digest, bytes, retention),
            None => PutOutcome::Disabled,
        }
    }

    // == Get ==
    /// Reads a record, making it most recently used.
    pub fn get(&self, digest: &Digest) -> Option<Vec<u8>> {
        self.store.as_ref()?.get(digest)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.store
            .as_ref()
            .is_some_and(|store| store.index.lock().records.contains_key(digest.as_str()))
    }

    // == Remove ==
    pub fn remove(&self, digest: &Digest) -> bool {
        self.store
            .as_ref()
            .is_some_and(|store| store.remove(digest.as_str()))
    }

    /// Removes every record for which `matches` returns true.
    ///
    /// Records that cannot be read are left alone. Returns the number removed.
    pub fn remove_where(&self, mut matches: impl FnMut(&Digest, &[u8]) -> bool) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let candidates: Vec<(String, Retention)> = store
            .index
            .lock()
            .records
            .iter()
            .map(|(digest, meta)| (digest.clone(), meta.retention))
            .collect();

        let mut removed = 0;
        for (digest, retention) in candidates {
            let Ok(bytes) = read_snapshot(&store.path_for(&digest, retention)) else {
                continue;
            };
            let Some(parsed) = Digest::parse(&digest) else {
                continue;
            };
            if matches(&parsed, &bytes) && store.remove(&digest) {
                removed += 1;
            }
        }
        removed
    }

    // == Delete ==
    /// Deletes every record. The store stays usable afterwards.
    pub fn delete(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.delete(),
            None => Ok(()),
        }
    }

    /// Enforces the byte budget.
    pub fn trim(&self) {
        if let Some(store) = &self.store {
            let mut index = store.index.lock();
            store.trim_locked(&mut index);
        }
    }

    pub fn capacity(&self) -> u64 {
        self.store.as_ref().map_or(0, |store| store.capacity)
    }

    // == Stats ==
    pub fn stats(&self) -> PersistentStats {
        let Some(store) = &self.store else {
            return PersistentStats::default();
        };
        let index = store.index.lock();
        PersistentStats {
            enabled: true,
            entries: index.records.len(),
            retained_entries: index
                .records
                .values()
                .filter(|meta| meta.retention == Retention::Always)
                .count(),
            size_bytes: index.total_size,
            capacity_bytes: store.capacity,
        }
    }
}

/// Reads a whole record; the file handle is released when this returns.
fn read_snapshot(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn remove_file_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "failed to remove cache file: {err}");
        }
    }
}

fn remove_stale_versions(family_root: &Path, current: &str) {
    let Ok(entries) = fs::read_dir(family_root) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let is_version_dir = name.starts_with('v') && name[1..].bytes().all(|b| b.is_ascii_digit());
        if is_version_dir && name != current && entry.path().is_dir() {
            info!(stale = name, "removing records of another format version");
            if let Err(err) = fs::remove_dir_all(entry.path()) {
                warn!(stale = name, "failed to remove stale cache version: {err}");
            }
        }
    }
}

fn scan_records(
    dir: &Path,
    retention: Retention,
    found: &mut Vec<(SystemTime, String, RecordMeta)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name();
        let digest = name.to_str().and_then(Digest::parse);
        match digest {
            Some(digest) => found.push((
                metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                digest.as_str().to_string(),
                RecordMeta {
                    size: metadata.len(),
                    retention,
                },
            )),
            None => remove_file_quietly(&entry.path()),
        }
    }
    Ok(())
}
