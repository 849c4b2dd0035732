//! Polling change detection and notification fan-out for depot.
//!
//! Subscribers watch individual resources or whole subtrees of a shared
//! store without relying on native OS file-event APIs. The crate provides:
//!
//! - [`Kind`], [`Event`], [`Notification`]: the change model
//! - [`PollingWatcher`]: a single background scheduler polling every watched
//!   path on a fixed interval and computing deltas against recorded state
//! - [`SimpleWatchDispatcher`]: listener registry and the propagation
//!   algorithm that fans one raw change out to ancestor and descendant
//!   listeners
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use depot_notify::{NotificationDispatcher, Notification, PollingWatcher, ResourceListener};
//!
//! struct LogListener;
//! impl ResourceListener for LogListener {
//!     fn changed(&self, n: &Notification) {
//!         tracing::info!("{:?} {:?}", n.kind, n.path);
//!     }
//! }
//!
//! let watcher = PollingWatcher::new("/srv/depot");
//! watcher.add_listener("styles", Arc::new(LogListener)).unwrap();
//! ```

mod dispatch;
mod event;
mod watcher;

pub use dispatch::{NotificationDispatcher, ResourceListener, SimpleWatchDispatcher};
pub use event::{Event, Kind, Notification, timestamp_now};
pub use watcher::{DEFAULT_POLL_INTERVAL, PollingWatcher};
