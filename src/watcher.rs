//! File group discovery and change notification.
//!
//! A [`FileGroup`] names the set of shard files below a root directory whose file
//! names match a pattern. A [`FileMonitor`] owns one background watcher for the root
//! and forwards every filesystem event to the callbacks of the groups it concerns.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use notify::{Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Result;

/// Callback invoked with each filesystem event touching a group
pub type GroupCallback = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// A named set of files matching one pattern below a root directory
pub struct FileGroup {
    name: String,
    root: PathBuf,
    pattern: Regex,
    pattern_str: String,
    blacklist: Vec<String>,
    callbacks: RwLock<Vec<GroupCallback>>,
}

impl std::fmt::Debug for FileGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGroup")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("pattern", &self.pattern_str)
            .field("blacklist", &self.blacklist)
            .finish_non_exhaustive()
    }
}

impl FileGroup {
    /// Create a group; only compiles the pattern, never touches the filesystem
    pub fn new(name: &str, root: &Path, pattern: &str, blacklist: &[&str]) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            root: root.to_path_buf(),
            pattern: Regex::new(pattern)?,
            pattern_str: pattern.to_string(),
            blacklist: blacklist.iter().map(ToString::to_string).collect(),
            callbacks: RwLock::new(Vec::new()),
        })
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory searched by [`FileGroup::list`]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pattern source text
    pub fn pattern(&self) -> &str {
        &self.pattern_str
    }

    /// Whether `path` names a member of this group
    pub fn matches(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.pattern.is_match(file_name) && !self.blacklist.iter().any(|b| b == file_name)
    }

    /// Every matching file below the root, sorted by path
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("data directory not found: {}", self.root.display()),
            )
            .into());
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(group = %self.name, error = %e, "Skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.matches(entry.path()))
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();
        Ok(files)
    }

    /// Register a change callback
    pub fn add_callback(&self, callback: GroupCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// Run every callback for `event`; failures are logged, not propagated
    pub fn notify(&self, event: &Event) {
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            if let Err(e) = callback(event) {
                warn!(group = %self.name, error = %e, "File group callback failed");
            }
        }
    }
}

type GroupList = Arc<RwLock<Vec<Arc<FileGroup>>>>;

/// Watches one data directory and dispatches events to file groups
pub struct FileMonitor {
    groups: GroupList,
    watcher: Mutex<Option<Box<dyn Watcher + Send>>>,
    poll_interval: Option<Duration>,
}

impl FileMonitor {
    /// Native notifications when `poll_interval` is `None`, polling otherwise
    pub fn new(poll_interval: Option<Duration>) -> Self {
        Self {
            groups: Arc::new(RwLock::new(Vec::new())),
            watcher: Mutex::new(None),
            poll_interval,
        }
    }

    /// Add a group to receive events
    pub fn add_group(&self, group: Arc<FileGroup>) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(group);
    }

    /// Deliver an event to every group owning one of its paths
    pub fn dispatch(&self, event: &Event) {
        dispatch_to(&self.groups, event);
    }

    /// Start watching `root` recursively; a no-op when already running
    pub fn start(&self, root: &Path) -> Result<()> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }

        let groups = Arc::clone(&self.groups);
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => dispatch_to(&groups, &event),
            Err(e) => warn!(error = %e, "Filesystem watcher error"),
        };

        let mut watcher: Box<dyn Watcher + Send> = match self.poll_interval {
            Some(interval) => {
                let config = notify::Config::default().with_poll_interval(interval);
                Box::new(PollWatcher::new(handler, config)?)
            }
            None => Box::new(RecommendedWatcher::new(handler, notify::Config::default())?),
        };
        watcher.watch(root, RecursiveMode::Recursive)?;

        info!(root = %root.display(), polling = self.poll_interval.is_some(), "File monitor started");
        *slot = Some(watcher);
        Ok(())
    }

    /// Stop watching; pending events already queued may still arrive
    pub fn stop(&self) {
        if self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            info!("File monitor stopped");
        }
    }

    /// Whether a watcher is running
    pub fn is_running(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn dispatch_to(groups: &GroupList, event: &Event) {
    let groups = groups.read().unwrap_or_else(PoisonError::into_inner).clone();
    for group in groups {
        if event.paths.iter().any(|p| group.matches(p)) {
            debug!(group = group.name(), kind = ?event.kind, "Dispatching file event");
            group.notify(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_list_filters_by_pattern_and_blacklist() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("Msg").join("Multi");
        std::fs::create_dir_all(&sub).unwrap();
        for name in ["message_0.db", "message_1.db", "message_fts.db", "contact.db", "message_0.db-wal"] {
            std::fs::write(sub.join(name), b"").unwrap();
        }

        let group = FileGroup::new("message", dir.path(), r"^message_.*\.db$", &["message_fts.db"]).unwrap();
        let files = group.list().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["message_0.db", "message_1.db"]);
    }

    #[test]
    fn test_dispatch_reaches_matching_group_only() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = FileMonitor::new(None);
        let hits = Arc::new(AtomicUsize::new(0));

        let messages = Arc::new(FileGroup::new("message", dir.path(), r"^MSG\d*\.db$", &[]).unwrap());
        let counter = Arc::clone(&hits);
        messages.add_callback(Arc::new(move |_: &Event| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let contacts = Arc::new(FileGroup::new("contact", dir.path(), r"^MicroMsg\.db$", &[]).unwrap());
        contacts.add_callback(Arc::new(|_: &Event| -> Result<()> { panic!("contact group must not be notified") }));

        monitor.add_group(messages);
        monitor.add_group(contacts);

        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(dir.path().join("MSG3.db"));
        monitor.dispatch(&event);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_group_does_not_touch_filesystem() {
        let group = FileGroup::new("message", Path::new("/definitely/not/here"), r"^x$", &[]);
        assert!(group.is_ok());
        assert!(group.unwrap().list().is_err());
    }
}
