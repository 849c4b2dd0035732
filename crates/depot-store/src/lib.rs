//! Resource handles and stores for depot.
//!
//! A [`ResourceStore`] addresses a tree of configuration content through
//! forward-slash paths. [`Resource`] handles are lazy: obtaining one never
//! touches backing storage, and the same handle stays valid as the node it
//! points at is created, replaced, or removed.
//!
//! [`FsResourceStore`] maps paths onto a root directory on the host
//! filesystem, with staged atomic writes, per-path locking through a
//! [`depot_lock::LockProvider`], and change notification through a polling
//! [`depot_notify::PollingWatcher`]. [`NullResourceStore`] stands in when no
//! backing directory is configured.
//!
//! # Example
//!
//! ```no_run
//! use depot_store::{FsResourceStore, ResourceStore};
//!
//! # fn main() -> Result<(), depot_store::StoreError> {
//! let store = FsResourceStore::new("/srv/depot")?;
//! let config = store.get("module/config.properties")?;
//! config.write(b"enabled=true\n")?;
//! println!("{}", config.read_to_string()?);
//! # Ok(())
//! # }
//! ```

mod fs;
pub mod resources;
mod store;

pub use fs::FsResourceStore;
pub use store::{
    NullResourceStore, Resource, ResourceKind, ResourceStore, ResourceWrite, StoreError,
};
