//! Connection cache over sharded SQLite storage.
//!
//! The live client keeps writing, checkpointing and replacing these files while we
//! read them. Handles are opened lazily per file and dropped from the map as soon
//! as the watcher reports a replacement; the physical close waits for a grace
//! period and for every in-flight query holding the handle to finish.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use notify::event::{EventKind, ModifyKind};
use notify::Event;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, error, info, warn};

use crate::error::{ChatlogError, Result};
use crate::metrics::MetricsCollector;
use crate::schema::GroupSpec;
use crate::watcher::{FileGroup, FileMonitor, GroupCallback};

// Type alias for a shard's connection pool
pub type ShardPool = Pool<SqliteConnectionManager>;
pub type ShardConnection = PooledConnection<SqliteConnectionManager>;

const POOL_SIZE: u32 = 4;
const POOL_TIMEOUT: Duration = Duration::from_secs(10);

/// How shard files are opened
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Take a private copy first; needed where the client holds an exclusive lock
    pub copy_before_open: bool,
    /// Directory receiving the copies
    pub work_dir: PathBuf,
    /// Delay between invalidation and physical close
    pub close_grace: Duration,
    /// Watcher poll interval; `None` uses native notifications
    pub poll_interval: Option<Duration>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            copy_before_open: cfg!(windows),
            work_dir: std::env::temp_dir().join("chatlog"),
            close_grace: Duration::from_secs(5),
            poll_interval: None,
        }
    }
}

/// One open shard file
pub struct Shard {
    path: PathBuf,
    copy: Option<PathBuf>,
    pool: Option<ShardPool>,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("path", &self.path)
            .field("copy", &self.copy)
            .finish_non_exhaustive()
    }
}

impl Shard {
    fn open(path: &Path, options: &OpenOptions) -> Result<Self> {
        let copy = if options.copy_before_open {
            Some(temp_copy(path, &options.work_dir)?)
        } else {
            None
        };
        let open_path = copy.as_deref().unwrap_or(path);

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;

        // Fail fast on files that are not databases instead of inside the pool
        let probe = Connection::open_with_flags(open_path, flags)?;
        probe.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
        drop(probe);

        let manager = SqliteConnectionManager::file(open_path).with_flags(flags);
        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .min_idle(Some(0))
            .connection_timeout(POOL_TIMEOUT)
            .build(manager)?;

        Ok(Self {
            path: path.to_path_buf(),
            copy,
            pool: Some(pool),
        })
    }

    /// Path of the watched file (not of any private copy)
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a connection to this shard
    pub fn get(&self) -> Result<ShardConnection> {
        match &self.pool {
            Some(pool) => Ok(pool.get()?),
            None => Err(ChatlogError::Other(format!("shard closed: {}", self.path.display()))),
        }
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        // Connections must be gone before the copy can be removed
        drop(self.pool.take());
        if let Some(copy) = &self.copy {
            for file in [copy.clone(), wal_path(copy)] {
                if let Err(e) = fs::remove_file(&file) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!(path = %file.display(), error = %e, "Failed to remove shard copy");
                    }
                }
            }
        }
        debug!(path = %self.path.display(), "Shard closed");
    }
}

fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-wal");
    PathBuf::from(name)
}

/// Copy a shard (and its WAL, if any) into `work_dir` under a name unique to this open
fn temp_copy(path: &Path, work_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(work_dir)?;
    let stem = path
        .file_stem()
        .map_or_else(|| "shard".to_string(), |n| n.to_string_lossy().into_owned());
    let (file, target) = tempfile::Builder::new()
        .prefix(&format!("{stem}_"))
        .suffix(".db")
        .tempfile_in(work_dir)?
        .keep()
        .map_err(|e| e.error)?;
    drop(file);

    if let Err(e) = fs::copy(path, &target) {
        let _ = fs::remove_file(&target);
        return Err(e.into());
    }
    let wal = wal_path(path);
    if wal.is_file() {
        fs::copy(&wal, wal_path(&target))?;
    }
    debug!(source = %path.display(), copy = %target.display(), "Copied shard before opening");
    Ok(target)
}

#[derive(Default)]
struct Slots {
    shards: HashMap<PathBuf, Arc<Shard>>,
    /// Bumped on every invalidation of a path, cached or not
    generations: HashMap<PathBuf, u64>,
}

impl Slots {
    fn generation(&self, path: &Path) -> u64 {
        self.generations.get(path).copied().unwrap_or(0)
    }
}

/// Path→handle map shared with watcher callbacks
struct HandleMap {
    slots: RwLock<Slots>,
    close_grace: Duration,
    metrics: MetricsCollector,
}

impl HandleMap {
    /// Cached handle for `path`, or the generation an opener must still see at insert time
    fn lookup(&self, path: &Path) -> std::result::Result<Arc<Shard>, u64> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.shards.get(path).cloned().ok_or_else(|| slots.generation(path))
    }

    /// Cache `shard` unless `path` was invalidated after `generation` was read
    fn insert(&self, path: &Path, shard: Arc<Shard>, generation: u64) -> (Arc<Shard>, bool) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.generation(path) != generation {
            return (shard, false);
        }
        let cached = Arc::clone(slots.shards.entry(path.to_path_buf()).or_insert(shard));
        self.metrics.update_open_shards(slots.shards.len());
        (cached, true)
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).shards.len()
    }

    /// Remove the entry for `path` and schedule the old handle's close
    fn invalidate(&self, path: &Path) -> bool {
        let removed = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            *slots.generations.entry(path.to_path_buf()).or_insert(0) += 1;
            let removed = slots.shards.remove(path);
            self.metrics.update_open_shards(slots.shards.len());
            removed
        };

        let Some(shard) = removed else {
            return false;
        };
        self.metrics.record_invalidation();
        info!(path = %path.display(), grace_ms = self.close_grace.as_millis(), "Shard invalidated");
        schedule_close(shard, self.close_grace);
        true
    }

    fn clear(&self) {
        let drained: Vec<Arc<Shard>> = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            for generation in slots.generations.values_mut() {
                *generation += 1;
            }
            self.metrics.update_open_shards(0);
            slots.shards.drain().map(|(_, shard)| shard).collect()
        };
        drop(drained);
    }
}

/// Drop the map's reference after `grace`; in-flight holders keep the pool alive
/// until they finish, so the actual close happens at the later of the two.
fn schedule_close(shard: Arc<Shard>, grace: Duration) {
    if grace.is_zero() {
        drop(shard);
        return;
    }
    let path = shard.path().to_path_buf();
    let spawned = std::thread::Builder::new()
        .name("shard-close".to_string())
        .spawn(move || {
            std::thread::sleep(grace);
            debug!(path = %shard.path().display(), in_flight = Arc::strong_count(&shard) - 1, "Releasing invalidated shard");
            drop(shard);
        });
    if let Err(e) = spawned {
        // The shard moved into the failed closure and is dropped with it
        warn!(path = %path.display(), error = %e, "Could not spawn close thread; shard released immediately");
    }
}

/// Whether an event means the file behind a path was replaced or removed
fn is_replacement(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

/// Connection cache keyed by absolute shard path
pub struct DbManager {
    root: PathBuf,
    options: OpenOptions,
    monitor: FileMonitor,
    groups: RwLock<HashMap<String, Arc<FileGroup>>>,
    paths: Arc<RwLock<HashMap<String, Vec<PathBuf>>>>,
    handles: Arc<HandleMap>,
    metrics: MetricsCollector,
}

impl DbManager {
    /// Create a manager for one data directory; nothing is opened yet
    pub fn new(root: &Path, options: OpenOptions) -> Self {
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let handles = Arc::new(HandleMap {
            slots: RwLock::new(Slots::default()),
            close_grace: options.close_grace,
            metrics: MetricsCollector::default(),
        });
        Self {
            root,
            monitor: FileMonitor::new(options.poll_interval),
            options,
            groups: RwLock::new(HashMap::new()),
            paths: Arc::new(RwLock::new(HashMap::new())),
            handles,
            metrics: MetricsCollector::default(),
        }
    }

    /// Data directory root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a file group and wire its change events to cache invalidation
    pub fn add_group(&self, spec: &GroupSpec) -> Result<()> {
        let group = Arc::new(FileGroup::new(spec.name, &self.root, spec.pattern, spec.blacklist)?);

        let handles = Arc::clone(&self.handles);
        let paths = Arc::clone(&self.paths);
        let name = spec.name.to_string();
        group.add_callback(Arc::new(move |event: &Event| -> Result<()> {
            if !is_replacement(event) {
                return Ok(());
            }
            paths.write().unwrap_or_else(PoisonError::into_inner).remove(&name);
            for path in &event.paths {
                handles.invalidate(path);
            }
            Ok(())
        }));

        self.monitor.add_group(Arc::clone(&group));
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.name.to_string(), group);
        debug!(group = spec.name, pattern = spec.pattern, "File group registered");
        Ok(())
    }

    /// Subscribe an extra callback to a registered group
    pub fn add_callback(&self, name: &str, callback: GroupCallback) -> Result<()> {
        self.group(name)?.add_callback(callback);
        Ok(())
    }

    fn group(&self, name: &str) -> Result<Arc<FileGroup>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| ChatlogError::GroupNotFound(name.to_string()))
    }

    /// Whether a group with this name was registered
    pub fn has_group(&self, name: &str) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Files of a group, cached until the watcher reports a create, rename or remove
    pub fn get_path(&self, name: &str) -> Result<Vec<PathBuf>> {
        let group = self.group(name)?;
        if let Some(cached) = self.paths.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return Ok(cached.clone());
        }

        let files = group.list()?;
        if files.is_empty() {
            return Err(ChatlogError::NoMatchingFiles {
                path: self.root.display().to_string(),
                pattern: group.pattern().to_string(),
            });
        }
        self.paths
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), files.clone());
        Ok(files)
    }

    /// Every shard of a group that opens; failing files are logged and skipped
    pub fn get_connections(&self, name: &str) -> Result<Vec<Arc<Shard>>> {
        debug!(group_name = name, "Resolving shard connections");
        let files = self.get_path(name)?;

        let mut shards = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            match self.open_shard(name, file) {
                Ok(shard) => shards.push(shard),
                Err(e) => {
                    error!(group_name = name, file_index = index, file_path = %file.display(), error = %e, "Failed to open shard");
                    self.metrics.record_shard_open(name, false);
                }
            }
        }

        if shards.is_empty() {
            error!(group_name = name, total_files = files.len(), "All shards failed to open");
            return Err(ChatlogError::NoShardsAvailable(name.to_string()));
        }

        debug!(group_name = name, connected = shards.len(), total_files = files.len(), "Shard connections ready");
        Ok(shards)
    }

    /// The first shard of a group that opens
    pub fn get_connection(&self, name: &str) -> Result<Arc<Shard>> {
        self.get_connections(name)?
            .into_iter()
            .next()
            .ok_or_else(|| ChatlogError::NoShardsAvailable(name.to_string()))
    }

    /// Cached handle for `path` in group `group`, opening it on first access
    pub fn open_shard(&self, group: &str, path: &Path) -> Result<Arc<Shard>> {
        let generation = match self.handles.lookup(path) {
            Ok(shard) => return Ok(shard),
            Err(generation) => generation,
        };

        // Open outside the lock; a racing opener may win, in which case ours is dropped
        let shard = Arc::new(Shard::open(path, &self.options)?);
        self.metrics.record_shard_open(group, true);

        let (shard, cached) = self.handles.insert(path, shard, generation);
        if cached {
            debug!(group, path = %path.display(), "Shard opened");
        } else {
            // Invalidated while opening; serve this call, reopen on the next
            debug!(group, path = %path.display(), "Shard invalidated during open; not cached");
        }
        Ok(shard)
    }

    /// Drop the cached handle for `path`; returns whether one existed
    pub fn invalidate(&self, path: &Path) -> bool {
        self.handles.invalidate(path)
    }

    /// Feed an event through the file groups as the watcher would
    pub fn dispatch(&self, event: &Event) {
        self.monitor.dispatch(event);
    }

    /// Number of cached handles
    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    /// Start the background watcher for the data directory
    pub fn start(&self) -> Result<()> {
        self.monitor.start(&self.root)
    }

    /// Stop the background watcher
    pub fn stop(&self) {
        self.monitor.stop();
    }

    /// Stop watching and release every cached handle
    pub fn close(&self) {
        self.monitor.stop();
        self.handles.clear();
    }
}

impl Drop for DbManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")
            .unwrap();
    }

    #[test]
    fn test_wal_path() {
        assert_eq!(wal_path(Path::new("/a/b.db")), PathBuf::from("/a/b.db-wal"));
    }

    #[test]
    fn test_temp_copy_is_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let db = dir.path().join("MSG0.db");
        make_db(&db);

        let options = OpenOptions {
            copy_before_open: true,
            work_dir: work.clone(),
            close_grace: Duration::ZERO,
            poll_interval: None,
        };
        let shard = Shard::open(&db, &options).unwrap();
        let copy = shard.copy.clone().unwrap();
        assert!(copy.starts_with(&work));
        assert!(copy.is_file());
        let n: i64 = shard
            .get()
            .unwrap()
            .query_row("SELECT x FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);

        drop(shard);
        assert!(!copy.exists());
    }

    #[test]
    fn test_copies_of_one_file_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("MSG0.db");
        make_db(&db);

        let first = temp_copy(&db, &dir.path().join("work")).unwrap();
        let second = temp_copy(&db, &dir.path().join("work")).unwrap();
        assert_ne!(first, second);
        assert!(first.is_file() && second.is_file());
    }

    #[test]
    fn test_open_racing_invalidation_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MSG0.db");
        make_db(&path);
        let manager = DbManager::new(dir.path(), OpenOptions {
            copy_before_open: false,
            work_dir: dir.path().join("work"),
            close_grace: Duration::ZERO,
            poll_interval: None,
        });

        let generation = manager.handles.lookup(&path).unwrap_err();
        let shard = Arc::new(Shard::open(&path, &manager.options).unwrap());
        // The watcher fires before the opener gets the write lock
        assert!(!manager.invalidate(&path));
        let (_, cached) = manager.handles.insert(&path, shard, generation);
        assert!(!cached);
        assert_eq!(manager.open_count(), 0);

        let generation = manager.handles.lookup(&path).unwrap_err();
        let shard = Arc::new(Shard::open(&path, &manager.options).unwrap());
        let (_, cached) = manager.handles.insert(&path, shard, generation);
        assert!(cached);
        assert_eq!(manager.open_count(), 1);
    }

    #[test]
    fn test_replacement_events() {
        use notify::event::{AccessKind, CreateKind, RenameMode};
        assert!(is_replacement(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(is_replacement(&Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))));
        assert!(!is_replacement(&Event::new(EventKind::Access(AccessKind::Any))));
    }
}
