//! Filesystem-backed resource store.
//!
//! Resource paths map onto files under a single root directory. Writes are
//! staged to a sibling temporary file and published with an atomic rename,
//! so readers never observe partial content. A polling watcher over the
//! same root drives change notifications.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use depot_lock::{LockProvider, LockToken, MemoryLockProvider};
use depot_notify::{DEFAULT_POLL_INTERVAL, NotificationDispatcher, PollingWatcher};
use tempfile::NamedTempFile;

use crate::store::{Resource, ResourceKind, ResourceStore, ResourceWrite, StoreError};

/// [`ResourceStore`] over a directory on the host filesystem.
pub struct FsResourceStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    root: PathBuf,
    locks: Arc<dyn LockProvider>,
    watcher: Arc<PollingWatcher>,
}

impl std::fmt::Debug for FsResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsResourceStore")
            .field("root", &self.inner.root)
            .finish_non_exhaustive()
    }
}

impl FsResourceStore {
    /// Store over `root` with in-process locking and the default poll
    /// interval.
    ///
    /// # Errors
    ///
    /// Fails when `root` does not exist, is not a directory, or is not
    /// writable. A store over a broken root is never handed out.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_options(
            root,
            Arc::new(MemoryLockProvider::new()),
            DEFAULT_POLL_INTERVAL,
        )
    }

    /// Store over `root` with an explicit lock provider and poll interval.
    pub fn with_options(
        root: impl Into<PathBuf>,
        locks: Arc<dyn LockProvider>,
        poll_interval: Duration,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        let display = root.display().to_string();
        let meta = fs::metadata(&root).map_err(|e| StoreError::io(&display, e))?;
        if !meta.is_dir() {
            return Err(StoreError::io(
                &display,
                io::Error::new(io::ErrorKind::NotADirectory, "store root must be a directory"),
            ));
        }
        if meta.permissions().readonly() {
            return Err(StoreError::io(
                &display,
                io::Error::new(io::ErrorKind::PermissionDenied, "store root is not writable"),
            ));
        }
        let watcher = Arc::new(PollingWatcher::with_interval(&root, poll_interval));
        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                locks,
                watcher,
            }),
        })
    }

    /// Root directory backing this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// The watcher polling this store's root.
    #[must_use]
    pub fn watcher(&self) -> &PollingWatcher {
        &self.inner.watcher
    }
}

impl ResourceStore for FsResourceStore {
    fn get(&self, path: &str) -> Result<Box<dyn Resource>, StoreError> {
        Ok(Box::new(FsResource::resolve(
            &self.inner,
            depot_path::valid(path)?,
        )?))
    }

    fn lock_provider(&self) -> Arc<dyn LockProvider> {
        Arc::clone(&self.inner.locks)
    }

    fn dispatcher(&self) -> Arc<dyn NotificationDispatcher> {
        Arc::clone(&self.inner.watcher) as Arc<dyn NotificationDispatcher>
    }
}

/// Handle to one path inside an [`FsResourceStore`].
struct FsResource {
    inner: Arc<StoreInner>,
    path: String,
    file: PathBuf,
}

impl FsResource {
    fn resolve(inner: &Arc<StoreInner>, path: &str) -> Result<Self, StoreError> {
        let file = depot_path::to_host_path(Some(&inner.root), path)?;
        Ok(Self {
            inner: Arc::clone(inner),
            path: path.to_owned(),
            file,
        })
    }

    fn type_mismatch(&self, expected: ResourceKind, actual: ResourceKind) -> StoreError {
        StoreError::TypeMismatch {
            path: self.path.clone(),
            expected,
            actual,
        }
    }
}

impl Resource for FsResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn kind(&self) -> ResourceKind {
        match fs::metadata(&self.file) {
            Ok(meta) if meta.is_dir() => ResourceKind::Directory,
            Ok(_) => ResourceKind::Resource,
            Err(_) => ResourceKind::Undefined,
        }
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>, StoreError> {
        match self.kind() {
            ResourceKind::Directory => {
                Err(self.type_mismatch(ResourceKind::Resource, ResourceKind::Directory))
            }
            _ => match File::open(&self.file) {
                Ok(file) => Ok(Box::new(file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    Err(StoreError::NotFound(self.path.clone()))
                }
                Err(e) => Err(StoreError::io(&self.path, e)),
            },
        }
    }

    fn writer(&self) -> Result<Box<dyn ResourceWrite>, StoreError> {
        if self.kind() == ResourceKind::Directory {
            return Err(self.type_mismatch(ResourceKind::Resource, ResourceKind::Directory));
        }
        let parent = self.file.parent().unwrap_or(&self.inner.root);
        fs::create_dir_all(parent).map_err(|e| StoreError::io(&self.path, e))?;
        let temp =
            NamedTempFile::new_in(parent).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(Box::new(FsWriter {
            path: self.path.clone(),
            dest: self.file.clone(),
            temp: Some(temp),
        }))
    }

    fn file(&self) -> Result<PathBuf, StoreError> {
        match self.kind() {
            ResourceKind::Directory => {
                Err(self.type_mismatch(ResourceKind::Resource, ResourceKind::Directory))
            }
            ResourceKind::Resource => Ok(self.file.clone()),
            ResourceKind::Undefined => {
                if let Some(parent) = self.file.parent() {
                    fs::create_dir_all(parent).map_err(|e| StoreError::io(&self.path, e))?;
                }
                match OpenOptions::new().write(true).create_new(true).open(&self.file) {
                    Ok(_) => {}
                    // Lost the creation race, but the file now exists.
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                    Err(e) => return Err(StoreError::io(&self.path, e)),
                }
                Ok(self.file.clone())
            }
        }
    }

    fn dir(&self) -> Result<PathBuf, StoreError> {
        match self.kind() {
            ResourceKind::Resource => {
                Err(self.type_mismatch(ResourceKind::Directory, ResourceKind::Resource))
            }
            ResourceKind::Directory => Ok(self.file.clone()),
            ResourceKind::Undefined => {
                fs::create_dir_all(&self.file).map_err(|e| StoreError::io(&self.path, e))?;
                Ok(self.file.clone())
            }
        }
    }

    fn last_modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.file).and_then(|m| m.modified()).ok()
    }

    fn parent(&self) -> Option<Box<dyn Resource>> {
        let parent = depot_path::parent(&self.path)?;
        let res = Self::resolve(&self.inner, parent).ok()?;
        Some(Box::new(res))
    }

    fn child(&self, name: &str) -> Result<Box<dyn Resource>, StoreError> {
        let path = depot_path::join(&self.path, name)?;
        Ok(Box::new(Self::resolve(&self.inner, &path)?))
    }

    fn list(&self) -> Vec<Box<dyn Resource>> {
        let Ok(entries) = fs::read_dir(&self.file) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .collect();
        names.sort();
        names
            .iter()
            .filter_map(|name| {
                let path = depot_path::join(&self.path, name).ok()?;
                let res = Self::resolve(&self.inner, &path).ok()?;
                Some(Box::new(res) as Box<dyn Resource>)
            })
            .collect()
    }

    fn delete(&self) -> Result<bool, StoreError> {
        let result = match self.kind() {
            ResourceKind::Undefined => return Ok(true),
            ResourceKind::Directory => fs::remove_dir_all(&self.file),
            ResourceKind::Resource => fs::remove_file(&self.file),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn rename_to(&self, target: &str) -> Result<bool, StoreError> {
        let dest = Self::resolve(&self.inner, depot_path::valid(target)?)?;
        if self.kind() == ResourceKind::Undefined {
            return Ok(dest.kind() == ResourceKind::Undefined);
        }
        if let Some(parent) = dest.file.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(target, e))?;
        }
        if fs::rename(&self.file, &dest.file).is_ok() {
            return Ok(true);
        }
        // Some platforms refuse to rename over an existing destination.
        dest.delete()?;
        fs::rename(&self.file, &dest.file).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(true)
    }

    fn lock(&self) -> Result<LockToken, StoreError> {
        Ok(self.inner.locks.acquire(&self.path)?)
    }
}

/// Staged write publishing through a temporary sibling file.
struct FsWriter {
    path: String,
    dest: PathBuf,
    temp: Option<NamedTempFile>,
}

impl Write for FsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.temp.as_mut() {
            Some(temp) => temp.write(buf),
            None => Err(io::Error::other("resource writer already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.temp.as_mut() {
            Some(temp) => temp.flush(),
            None => Ok(()),
        }
    }
}

impl ResourceWrite for FsWriter {
    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(temp) = self.temp.take() {
            temp.persist(&self.dest)
                .map_err(|e| StoreError::io(&self.path, e.error))?;
        }
        Ok(())
    }
}

impl Drop for FsWriter {
    fn drop(&mut self) {
        if self.temp.is_some() {
            tracing::warn!(
                path = %self.path,
                "resource writer dropped without commit, discarding staged content"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_notify::{Kind, Notification, ResourceListener};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsResourceStore {
        FsResourceStore::new(dir.path()).unwrap()
    }

    #[test]
    fn test_new_requires_an_existing_writable_directory() {
        let dir = TempDir::new().unwrap();
        assert!(FsResourceStore::new(dir.path().join("missing")).is_err());

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(FsResourceStore::new(&file).is_err());

        assert!(FsResourceStore::new(dir.path()).is_ok());
    }

    #[test]
    fn test_handles_are_lazy_and_track_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let res = store.get("module/config.properties").unwrap();
        assert_eq!(res.kind(), ResourceKind::Undefined);
        assert_eq!(res.name(), "config.properties");
        assert!(!dir.path().join("module").exists());

        res.write(b"enabled=true\n").unwrap();
        assert_eq!(res.kind(), ResourceKind::Resource);
        assert_eq!(res.read_to_string().unwrap(), "enabled=true\n");

        let parent = res.parent().unwrap();
        assert_eq!(parent.path(), "module");
        assert_eq!(parent.kind(), ResourceKind::Directory);
        let names: Vec<String> =
            parent.list().iter().map(|r| r.name().to_owned()).collect();
        assert_eq!(names, vec!["config.properties"]);
    }

    #[test]
    fn test_root_handle_is_the_store_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let root = store.get("").unwrap();
        assert_eq!(root.kind(), ResourceKind::Directory);
        assert!(root.parent().is_none());
        assert!(matches!(
            root.writer(),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_get_rejects_traversal_and_absolute_paths() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(matches!(store.get("../escape"), Err(StoreError::Path(_))));
        assert!(matches!(store.get("a//b"), Err(StoreError::Path(_))));
        assert!(matches!(store.get("/etc/passwd"), Err(StoreError::Path(_))));
    }

    #[test]
    fn test_file_creates_placeholder_with_ancestors() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let res = store.get("a/b/c.txt").unwrap();

        let host = res.file().unwrap();
        assert!(host.is_file());
        assert_eq!(res.kind(), ResourceKind::Resource);
        // Second call is a no-op on the existing file.
        assert_eq!(res.file().unwrap(), host);
    }

    #[test]
    fn test_dir_creates_directory_and_rejects_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let d = store.get("workspaces/topp").unwrap();
        assert!(d.dir().unwrap().is_dir());
        assert_eq!(d.kind(), ResourceKind::Directory);

        let f = store.get("leaf.txt").unwrap();
        f.write(b"x").unwrap();
        assert!(matches!(f.dir(), Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(d.file(), Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(d.reader(), Err(StoreError::TypeMismatch { .. })));
    }

    #[test]
    fn test_read_of_missing_resource_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let res = store.get("missing.txt").unwrap();
        assert!(matches!(res.read(), Err(StoreError::NotFound(_))));
        assert!(res.last_modified().is_none());
    }

    #[test]
    fn test_writer_commit_replaces_content_atomically() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let res = store.get("styles/roads.sld").unwrap();
        res.write(b"one").unwrap();

        let mut writer = res.writer().unwrap();
        writer.write_all(b"two").unwrap();
        // Old content stays visible until the commit.
        assert_eq!(res.read_to_string().unwrap(), "one");
        writer.commit().unwrap();
        assert_eq!(res.read_to_string().unwrap(), "two");
    }

    #[test]
    fn test_writer_drop_discards_staged_content() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let res = store.get("styles/roads.sld").unwrap();
        res.write(b"keep").unwrap();

        let mut writer = res.writer().unwrap();
        writer.write_all(b"discard").unwrap();
        drop(writer);

        assert_eq!(res.read_to_string().unwrap(), "keep");
        let names: Vec<String> = store
            .get("styles")
            .unwrap()
            .list()
            .iter()
            .map(|r| r.name().to_owned())
            .collect();
        assert_eq!(names, vec!["roads.sld"]);
    }

    #[test]
    fn test_delete_is_recursive_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.get("styles/icons/city.png").unwrap().write(b"png").unwrap();
        store.get("styles/roads.sld").unwrap().write(b"sld").unwrap();

        let styles = store.get("styles").unwrap();
        assert!(styles.delete().unwrap());
        assert_eq!(styles.kind(), ResourceKind::Undefined);
        assert!(styles.delete().unwrap());
        assert!(store.remove("never-existed").unwrap());
    }

    #[test]
    fn test_rename_moves_and_replaces() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.get("a.txt").unwrap().write(b"payload").unwrap();
        store.get("b.txt").unwrap().write(b"old").unwrap();

        assert!(store.move_resource("a.txt", "b.txt").unwrap());
        assert_eq!(store.get("a.txt").unwrap().kind(), ResourceKind::Undefined);
        assert_eq!(store.get("b.txt").unwrap().read_to_string().unwrap(), "payload");
    }

    #[test]
    fn test_rename_of_absent_source() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        // Both absent is a no-op success.
        assert!(store.move_resource("ghost", "ghost2").unwrap());

        store.get("real.txt").unwrap().write(b"x").unwrap();
        assert!(!store.move_resource("ghost", "real.txt").unwrap());
        assert_eq!(store.get("real.txt").unwrap().read_to_string().unwrap(), "x");
    }

    #[test]
    fn test_rename_into_new_directory() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.get("loose.txt").unwrap().write(b"x").unwrap();
        assert!(store.move_resource("loose.txt", "archive/2024/loose.txt").unwrap());
        assert_eq!(
            store.get("archive/2024/loose.txt").unwrap().kind(),
            ResourceKind::Resource
        );
    }

    #[test]
    fn test_lock_serializes_access_per_path() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let res = store.get("config.properties").unwrap();
        let mut token = res.lock().unwrap();
        assert_eq!(token.key(), "config.properties");
        token.release();
        // Re-acquire after release goes through.
        drop(res.lock().unwrap());
    }

    struct Recorder(Mutex<mpsc::Sender<Notification>>);

    impl ResourceListener for Recorder {
        fn changed(&self, notification: &Notification) {
            let _ = self.0.lock().unwrap().send(notification.clone());
        }
    }

    #[test]
    fn test_store_writes_are_observed_by_watcher() {
        let dir = TempDir::new().unwrap();
        let store = FsResourceStore::with_options(
            dir.path(),
            Arc::new(MemoryLockProvider::new()),
            Duration::from_millis(25),
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        store
            .dispatcher()
            .add_listener("module", Arc::new(Recorder(Mutex::new(tx))))
            .unwrap();

        store
            .get("module/config.properties")
            .unwrap()
            .write(b"enabled=true\n")
            .unwrap();

        let notification = rx.recv_timeout(Duration::from_secs(5)).expect("notification");
        assert_eq!(notification.path, "module");
        assert_eq!(notification.kind, Kind::Create);
        assert!(notification.created().contains(&"config.properties"));
    }
}
