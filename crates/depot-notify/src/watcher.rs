//! Polling filesystem watcher.
//!
//! A single background thread polls every watched path on a fixed interval,
//! compares what it finds against the state recorded by the previous poll,
//! and hands the resulting notifications to the dispatcher. No native OS
//! file-event API is involved: polling trades notification latency for
//! portability, and the [`NotificationDispatcher`] trait is the seam where
//! a native backend could be substituted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use depot_path::PathError;

use crate::dispatch::{NotificationDispatcher, ResourceListener, SimpleWatchDispatcher};
use crate::event::{Event, Kind, Notification};

/// Default delay between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Recorded observation of one watched path.
#[derive(Clone, Debug, Default)]
struct WatchState {
    /// Whether the path existed at the last observation.
    exists: bool,
    /// Last observed modification time of the path itself.
    last_modified: Option<SystemTime>,
    /// For directories: relative path of every known descendant and its
    /// modification time at the last observation.
    children: Option<HashMap<String, SystemTime>>,
    /// Newest descendant modification time seen, used to skip per-entry
    /// comparisons on unchanged polls.
    max_child_modified: Option<SystemTime>,
}

impl WatchState {
    /// Observe the current state of `file` without emitting anything.
    ///
    /// Registration captures a baseline so that content existing before the
    /// first listener arrived is not reported as newly created.
    fn capture(file: &Path) -> Self {
        let Ok(metadata) = fs::metadata(file) else {
            return Self::default();
        };
        let last_modified = metadata.modified().ok();
        if metadata.is_dir() {
            let children = walk(file);
            let max_child_modified = children.values().max().copied();
            Self {
                exists: true,
                last_modified,
                children: Some(children),
                max_child_modified,
            }
        } else {
            Self {
                exists: true,
                last_modified,
                children: None,
                max_child_modified: None,
            }
        }
    }
}

/// Outcome of polling one watch.
struct Poll {
    state: WatchState,
    notification: Option<Notification>,
}

/// Polling-based [`NotificationDispatcher`] over a store root directory.
///
/// One watch exists per distinct listener path; a watch whose listener set
/// becomes empty is pruned on the next cycle. All watches share a single
/// scheduled poll task, so thread usage stays constant regardless of watch
/// count. Dropping the watcher stops the poll thread.
pub struct PollingWatcher {
    inner: Arc<WatcherInner>,
    // Dropping the sender wakes and terminates the poll thread.
    _shutdown: mpsc::Sender<()>,
}

struct WatcherInner {
    root: PathBuf,
    dispatcher: SimpleWatchDispatcher,
    watches: Mutex<HashMap<String, WatchState>>,
}

impl PollingWatcher {
    /// Watcher over `root` polling at the default interval.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_interval(root, DEFAULT_POLL_INTERVAL)
    }

    /// Watcher over `root` with an explicit poll interval.
    #[must_use]
    pub fn with_interval(root: impl Into<PathBuf>, interval: Duration) -> Self {
        let inner = Arc::new(WatcherInner {
            root: root.into(),
            dispatcher: SimpleWatchDispatcher::new(),
            watches: Mutex::new(HashMap::new()),
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let poll_inner = Arc::clone(&inner);
        thread::spawn(move || {
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }
                poll_inner.poll_all();
            }
            tracing::debug!("polling watcher for {} stopped", poll_inner.root.display());
        });

        Self {
            inner,
            _shutdown: shutdown_tx,
        }
    }

    /// Number of live watches (test and diagnostics hook).
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.inner.watches.lock().unwrap().len()
    }
}

impl NotificationDispatcher for PollingWatcher {
    fn add_listener(
        &self,
        path: &str,
        listener: Arc<dyn ResourceListener>,
    ) -> Result<(), PathError> {
        let file = depot_path::to_host_path(Some(&self.inner.root), path)?;
        self.inner.dispatcher.add_listener(path, listener)?;
        self.inner
            .watches
            .lock()
            .unwrap()
            .entry(path.to_owned())
            .or_insert_with(|| WatchState::capture(&file));
        Ok(())
    }

    fn remove_listener(&self, path: &str, listener: &Arc<dyn ResourceListener>) -> bool {
        // The watch itself is pruned on the next poll cycle.
        self.inner.dispatcher.remove_listener(path, listener)
    }

    fn changed(&self, notification: Notification) {
        self.inner.dispatcher.propagate(&notification);
    }
}

impl WatcherInner {
    /// One poll cycle over every live watch.
    fn poll_all(&self) {
        // Snapshot paths and recorded state so the filesystem is never
        // touched while holding the registration lock.
        let snapshot: Vec<(String, WatchState)> = {
            let mut watches = self.watches.lock().unwrap();
            watches.retain(|path, _| self.dispatcher.has_listeners(path));
            watches
                .iter()
                .map(|(path, state)| (path.clone(), state.clone()))
                .collect()
        };

        for (path, state) in snapshot {
            let Ok(file) = depot_path::to_host_path(Some(&self.root), &path) else {
                continue;
            };
            let poll = poll_watch(&file, &path, &state);
            {
                let mut watches = self.watches.lock().unwrap();
                if let Some(recorded) = watches.get_mut(&path) {
                    *recorded = poll.state;
                }
            }
            if let Some(notification) = poll.notification {
                self.dispatcher.propagate(&notification);
            }
        }
    }
}

/// Poll one watch and compute its delta against the recorded state.
fn poll_watch(file: &Path, path: &str, state: &WatchState) -> Poll {
    let metadata = fs::metadata(file).ok();

    match metadata {
        None => {
            if !state.exists {
                return Poll {
                    state: state.clone(),
                    notification: None,
                };
            }
            // The node is gone; the event list is built from the recorded
            // child set since the directory can no longer be listed.
            let mut events = vec![Event::new("", Kind::Delete)];
            if let Some(children) = &state.children {
                let mut known: Vec<&String> = children.keys().collect();
                known.sort();
                for child in known {
                    events.push(Event::new(child.as_str(), Kind::Delete));
                }
            }
            Poll {
                state: WatchState::default(),
                notification: Some(Notification::new(path, Kind::Delete, events)),
            }
        }
        Some(metadata) if metadata.is_dir() => poll_directory(file, path, state, &metadata),
        Some(metadata) => poll_file(path, state, &metadata),
    }
}

/// Poll a plain resource: a newer timestamp means modified, appearance
/// after absence means created, an unchanged timestamp means nothing.
fn poll_file(path: &str, state: &WatchState, metadata: &fs::Metadata) -> Poll {
    let modified = metadata.modified().ok();
    let kind = if state.exists {
        let newer = match (state.last_modified, modified) {
            (Some(last), Some(now)) => now > last,
            (None, Some(_)) => true,
            _ => false,
        };
        if newer { Some(Kind::Modify) } else { None }
    } else {
        Some(Kind::Create)
    };

    Poll {
        state: WatchState {
            exists: true,
            last_modified: modified,
            children: None,
            max_child_modified: None,
        },
        notification: kind.map(|kind| {
            Notification::new(path, kind, vec![Event::new("", kind)])
        }),
    }
}

/// Poll a directory: decide its own kind from prior existence, then compute
/// the child delta from the recorded child set and a fresh listing.
fn poll_directory(file: &Path, path: &str, state: &WatchState, metadata: &fs::Metadata) -> Poll {
    let kind = if state.exists { Kind::Modify } else { Kind::Create };
    let previous = state.children.clone().unwrap_or_default();

    // When the directory entry itself is unchanged, a stat pass over the
    // recorded children decides whether a fresh listing is needed at all.
    // An addition anywhere in the subtree bumps either the directory's own
    // mtime or a recorded subdirectory's, so an unchanged scan with the
    // same newest-child mtime proves there is no delta to compute.
    if state.exists && metadata.modified().ok() == state.last_modified {
        let scan = scan_previous(file, &previous);
        if scan.removed.is_empty()
            && scan.modified.is_empty()
            && scan.max_modified == state.max_child_modified
        {
            return Poll {
                state: state.clone(),
                notification: None,
            };
        }
        let current = walk(file);
        return directory_delta(path, kind, metadata, &previous, current, scan);
    }

    // The fresh listing and the recorded-child scan are independent; run
    // them concurrently to bound poll latency on large directories.
    let (current, scan) = rayon::join(|| walk(file), || scan_previous(file, &previous));
    directory_delta(path, kind, metadata, &previous, current, scan)
}

/// Build the notification and replacement state for one directory delta.
fn directory_delta(
    path: &str,
    kind: Kind,
    metadata: &fs::Metadata,
    previous: &HashMap<String, SystemTime>,
    current: HashMap<String, SystemTime>,
    scan: PreviousScan,
) -> Poll {
    let mut created: Vec<&String> = current
        .iter()
        .filter(|(child, _)| !previous.contains_key(*child))
        .map(|(child, _)| child)
        .collect();
    created.sort();

    let unchanged =
        created.is_empty() && scan.removed.is_empty() && scan.modified.is_empty();
    let suppressed = kind == Kind::Modify && unchanged;

    let notification = if suppressed {
        None
    } else {
        let mut events = vec![Event::new("", kind)];
        for child in &created {
            events.push(Event::new(child.as_str(), Kind::Create));
        }
        for child in &scan.removed {
            events.push(Event::new(child.as_str(), Kind::Delete));
        }
        for child in &scan.modified {
            events.push(Event::new(child.as_str(), Kind::Modify));
        }
        Some(Notification::new(path, kind, events))
    };

    let max_child_modified = current.values().max().copied();
    Poll {
        state: WatchState {
            exists: true,
            last_modified: metadata.modified().ok(),
            children: Some(current),
            max_child_modified,
        },
        notification,
    }
}

/// What a stat pass over the previously recorded children found.
struct PreviousScan {
    /// Children that no longer exist.
    removed: Vec<String>,
    /// Children whose modification time moved forward.
    modified: Vec<String>,
    /// Newest modification time among the still-existing children.
    max_modified: Option<SystemTime>,
}

/// Stat every previously known child without listing the directory.
fn scan_previous(dir: &Path, previous: &HashMap<String, SystemTime>) -> PreviousScan {
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut max_modified = None;
    for (child, recorded) in previous {
        match fs::metadata(dir.join(child)) {
            Err(_) => removed.push(child.clone()),
            Ok(metadata) => {
                let now = metadata.modified().ok();
                if now.is_some_and(|now| now > *recorded) {
                    modified.push(child.clone());
                }
                if now > max_modified {
                    max_modified = now;
                }
            }
        }
    }
    removed.sort();
    modified.sort();
    PreviousScan {
        removed,
        modified,
        max_modified,
    }
}

/// Recursively list a directory as relative-path → mtime.
fn walk(dir: &Path) -> HashMap<String, SystemTime> {
    let mut children = HashMap::new();
    walk_into(dir, "", &mut children);
    children
}

fn walk_into(dir: &Path, prefix: &str, children: &mut HashMap<String, SystemTime>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let relative = join(prefix, &name);
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let is_dir = metadata.is_dir();
        children.insert(relative.clone(), modified);
        if is_dir {
            walk_into(&entry.path(), &relative, children);
        }
    }
}

/// Join a relative child name under a possibly-empty prefix.
fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}/{name}")
    }
}
