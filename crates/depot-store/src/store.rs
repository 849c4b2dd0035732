//! Resource and store traits, plus the no-op store used when no backing
//! directory is configured.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use depot_lock::{LockError, LockProvider, LockToken, NullLockProvider};
use depot_notify::{NotificationDispatcher, SimpleWatchDispatcher};
use depot_path::PathError;

/// What a resource path currently points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// A directory with children.
    Directory,
    /// A leaf with content.
    Resource,
    /// Nothing exists at the path yet.
    Undefined,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Directory => "directory",
            Self::Resource => "resource",
            Self::Undefined => "undefined",
        })
    }
}

/// Error raised by store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The resource path itself is malformed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Nothing exists at the path where content was required.
    #[error("resource not found: {0:?}")]
    NotFound(String),

    /// The path points at the wrong kind of node for the operation.
    #[error("resource {path:?} is a {actual}, expected a {expected}")]
    TypeMismatch {
        /// Offending resource path.
        path: String,
        /// Kind the operation needs.
        expected: ResourceKind,
        /// Kind actually found.
        actual: ResourceKind,
    },

    /// Underlying filesystem failure.
    #[error("i/o failure on {path:?}")]
    Io {
        /// Resource path the operation targeted.
        path: String,
        /// Host error.
        #[source]
        source: io::Error,
    },

    /// Lock acquisition failed.
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl StoreError {
    pub(crate) fn io(path: &str, source: io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// In-progress write to a resource.
///
/// Bytes go to a staging location; nothing is visible at the resource path
/// until [`commit`](Self::commit). Dropping an uncommitted writer discards
/// the staged content and leaves the previous content untouched.
pub trait ResourceWrite: Write + Send {
    /// Atomically publish the staged bytes as the new resource content.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Handle to a path inside a store.
///
/// Handles are cheap and never touch the backing storage on creation; a
/// handle may point at a directory, a content leaf, or nothing at all, and
/// the same handle can move between those states as the store changes
/// underneath it.
pub trait Resource: Send + Sync {
    /// Store-relative path of this resource.
    fn path(&self) -> &str;

    /// Last path segment.
    fn name(&self) -> &str {
        depot_path::name(self.path())
    }

    /// Current kind of the node at this path.
    fn kind(&self) -> ResourceKind;

    /// Open the content for reading.
    fn reader(&self) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Start a staged write of new content.
    fn writer(&self) -> Result<Box<dyn ResourceWrite>, StoreError>;

    /// Read the full content.
    fn read(&self) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::new();
        self.reader()?
            .read_to_end(&mut buf)
            .map_err(|e| StoreError::io(self.path(), e))?;
        Ok(buf)
    }

    /// Read the full content as UTF-8 text.
    fn read_to_string(&self) -> Result<String, StoreError> {
        String::from_utf8(self.read()?).map_err(|e| {
            StoreError::io(
                self.path(),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Replace the content with `contents` in one staged write.
    fn write(&self, contents: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.writer()?;
        writer
            .write_all(contents)
            .map_err(|e| StoreError::io(self.path(), e))?;
        writer.commit()
    }

    /// Host file for this resource, creating an empty file (and missing
    /// ancestors) when the path is undefined.
    fn file(&self) -> Result<PathBuf, StoreError>;

    /// Host directory for this resource, creating it (and missing
    /// ancestors) when the path is undefined.
    fn dir(&self) -> Result<PathBuf, StoreError>;

    /// When the node was last modified, if it exists.
    fn last_modified(&self) -> Option<SystemTime>;

    /// Handle to the parent path. `None` at the store root.
    fn parent(&self) -> Option<Box<dyn Resource>>;

    /// Handle to the named child path.
    fn child(&self, name: &str) -> Result<Box<dyn Resource>, StoreError>;

    /// Handles to the current children, sorted by name. Empty unless this
    /// is a directory.
    fn list(&self) -> Vec<Box<dyn Resource>>;

    /// Remove the node and everything beneath it. Returns `true` when the
    /// path no longer exists afterwards, including when it never did.
    fn delete(&self) -> Result<bool, StoreError>;

    /// Move this node to `target`, replacing anything already there.
    /// Returns `true` on success, `false` when there was nothing to move
    /// but the target exists.
    fn rename_to(&self, target: &str) -> Result<bool, StoreError>;

    /// Acquire the exclusive lock scoped to this path.
    fn lock(&self) -> Result<LockToken, StoreError>;
}

/// A tree of resources with locking and change notification.
pub trait ResourceStore: Send + Sync {
    /// Handle to the resource at `path`. Never touches backing storage.
    fn get(&self, path: &str) -> Result<Box<dyn Resource>, StoreError>;

    /// Remove the resource at `path`.
    fn remove(&self, path: &str) -> Result<bool, StoreError> {
        self.get(path)?.delete()
    }

    /// Move the resource at `path` to `target`.
    fn move_resource(&self, path: &str, target: &str) -> Result<bool, StoreError> {
        self.get(path)?.rename_to(target)
    }

    /// Lock provider guarding paths in this store.
    fn lock_provider(&self) -> Arc<dyn LockProvider>;

    /// Dispatcher for change notifications on this store.
    fn dispatcher(&self) -> Arc<dyn NotificationDispatcher>;
}

/// Store with no backing storage at all.
///
/// Every handle is undefined, reads fail, deletes trivially succeed.
/// Stands in wherever a [`ResourceStore`] is required before one has been
/// configured.
pub struct NullResourceStore {
    dispatcher: Arc<SimpleWatchDispatcher>,
}

impl NullResourceStore {
    /// New empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatcher: Arc::new(SimpleWatchDispatcher::new()),
        }
    }
}

impl Default for NullResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for NullResourceStore {
    fn get(&self, path: &str) -> Result<Box<dyn Resource>, StoreError> {
        Ok(Box::new(NullResource {
            path: depot_path::valid(path)?.to_owned(),
        }))
    }

    fn lock_provider(&self) -> Arc<dyn LockProvider> {
        Arc::new(NullLockProvider)
    }

    fn dispatcher(&self) -> Arc<dyn NotificationDispatcher> {
        Arc::clone(&self.dispatcher) as Arc<dyn NotificationDispatcher>
    }
}

/// Handle into a [`NullResourceStore`]: permanently undefined.
struct NullResource {
    path: String,
}

impl Resource for NullResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Undefined
    }

    fn reader(&self) -> Result<Box<dyn Read + Send>, StoreError> {
        Err(StoreError::NotFound(self.path.clone()))
    }

    fn writer(&self) -> Result<Box<dyn ResourceWrite>, StoreError> {
        Err(StoreError::NotFound(self.path.clone()))
    }

    fn file(&self) -> Result<PathBuf, StoreError> {
        Err(StoreError::NotFound(self.path.clone()))
    }

    fn dir(&self) -> Result<PathBuf, StoreError> {
        Err(StoreError::NotFound(self.path.clone()))
    }

    fn last_modified(&self) -> Option<SystemTime> {
        None
    }

    fn parent(&self) -> Option<Box<dyn Resource>> {
        let parent = depot_path::parent(&self.path)?;
        Some(Box::new(NullResource {
            path: parent.to_owned(),
        }))
    }

    fn child(&self, name: &str) -> Result<Box<dyn Resource>, StoreError> {
        Ok(Box::new(NullResource {
            path: depot_path::join(&self.path, name)?,
        }))
    }

    fn list(&self) -> Vec<Box<dyn Resource>> {
        Vec::new()
    }

    fn delete(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    fn rename_to(&self, target: &str) -> Result<bool, StoreError> {
        depot_path::valid(target)?;
        Ok(true)
    }

    fn lock(&self) -> Result<LockToken, StoreError> {
        Ok(NullLockProvider.acquire(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_null_store_handles_are_undefined() {
        let store = NullResourceStore::new();
        let res = store.get("module/config.properties").unwrap();
        assert_eq!(res.kind(), ResourceKind::Undefined);
        assert_eq!(res.name(), "config.properties");
        assert_eq!(res.path(), "module/config.properties");
        assert!(res.last_modified().is_none());
        assert!(res.list().is_empty());
    }

    #[test]
    fn test_null_store_reads_fail_and_deletes_succeed() {
        let store = NullResourceStore::new();
        let res = store.get("missing.txt").unwrap();
        assert!(matches!(res.read(), Err(StoreError::NotFound(_))));
        assert!(matches!(res.writer(), Err(StoreError::NotFound(_))));
        assert!(res.delete().unwrap());
        assert!(store.remove("missing.txt").unwrap());
        assert!(store.move_resource("a", "b").unwrap());
    }

    #[test]
    fn test_null_store_navigation() {
        let store = NullResourceStore::new();
        let res = store.get("styles/roads.sld").unwrap();
        let parent = res.parent().unwrap();
        assert_eq!(parent.path(), "styles");
        assert!(parent.parent().unwrap().parent().is_none());
        assert_eq!(res.child("x").unwrap().path(), "styles/roads.sld/x");
    }

    #[test]
    fn test_null_store_rejects_invalid_paths() {
        let store = NullResourceStore::new();
        assert!(store.get("../escape").is_err());
        assert!(store.get("/srv/other").is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ResourceKind::Directory.to_string(), "directory");
        assert_eq!(ResourceKind::Resource.to_string(), "resource");
        assert_eq!(ResourceKind::Undefined.to_string(), "undefined");
    }
}
