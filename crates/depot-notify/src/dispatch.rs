//! Notification routing and fan-out.
//!
//! A raw notification describes one change at one watched path. The
//! dispatcher delivers it to listeners registered exactly there and then
//! derives the fan-out: delete events cascade down to previously-known
//! children, create events cascade up through newly-created ancestor
//! directories, and every change surfaces as a modify on the parent chain.
//!
//! Because the fan-out is derived locally, cooperating instances sharing a
//! store only need to exchange the single innermost notification; each side
//! reconstructs the ancestor and descendant deliveries on its own.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use depot_path::PathError;

use crate::event::{Event, Kind, Notification};

/// Receiver of change notifications for one watched path.
///
/// Each registration gets its own dispatch worker: callbacks never run on
/// the poll thread, notifications for one registration arrive in the order
/// they were dispatched, and panics are caught and logged per notification.
pub trait ResourceListener: Send + Sync {
    /// Called with each notification for the path the listener watches.
    fn changed(&self, notification: &Notification);
}

/// Registration and injection surface for change notifications.
///
/// This trait is the seam between change *detection* and change *delivery*:
/// the polling watcher is one implementation driver, and a platform-native
/// file-event backend could replace it without touching listener code.
pub trait NotificationDispatcher: Send + Sync {
    /// Register `listener` for notifications scoped to `path`.
    fn add_listener(
        &self,
        path: &str,
        listener: Arc<dyn ResourceListener>,
    ) -> Result<(), PathError>;

    /// Remove a previously registered listener. Returns `false` when the
    /// listener was not registered on `path`.
    fn remove_listener(&self, path: &str, listener: &Arc<dyn ResourceListener>) -> bool;

    /// Inject an externally-observed change (for example from a cluster
    /// peer) and fan it out exactly as a locally-detected one.
    ///
    /// Event paths in `notification` are relative to its path, with the
    /// empty path for the changed node itself.
    fn changed(&self, notification: Notification);
}

/// One registered listener and the sending half of its dispatch queue.
///
/// Dropping the registration closes the queue; the worker drains what is
/// already enqueued and exits.
struct Registration {
    listener: Arc<dyn ResourceListener>,
    queue: mpsc::Sender<Notification>,
}

/// Listener registry plus the propagation algorithm.
///
/// Used directly for injected notifications and by the polling watcher for
/// locally-detected ones.
#[derive(Default)]
pub struct SimpleWatchDispatcher {
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
}

impl SimpleWatchDispatcher {
    /// Empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any listener is registered exactly on `path`.
    #[must_use]
    pub fn has_listeners(&self, path: &str) -> bool {
        self.listeners
            .lock()
            .unwrap()
            .get(path)
            .is_some_and(|l| !l.is_empty())
    }

    /// Fan a raw notification out to every affected listener.
    pub fn propagate(&self, notification: &Notification) {
        // 1. Listeners exactly on the notification path.
        self.deliver(&notification.path, notification.kind, notification);

        // 2. A deleted directory also notifies listeners on its former
        //    children, scoped to each child path.
        if notification.kind == Kind::Delete {
            for event in &notification.events {
                if event.path.is_empty() {
                    continue;
                }
                let Ok(child) = depot_path::join(&notification.path, &event.path) else {
                    continue;
                };
                self.deliver(&child, Kind::Delete, notification);
            }
        }

        // 3. Create events mark paths that did not exist before this change;
        //    ancestors found in this set were created as a side effect of a
        //    deep path coming into existence.
        let mut created: HashSet<String> = notification
            .events
            .iter()
            .filter(|e| e.kind == Kind::Create && !e.path.is_empty())
            .filter_map(|e| depot_path::join(&notification.path, &e.path).ok())
            .collect();
        if notification.kind == Kind::Create {
            created.insert(notification.path.clone());
        }

        // 4. Walk the parent chain: newly-created ancestors hear a create
        //    and the walk continues; the first pre-existing ancestor hears a
        //    modify and the walk stops there.
        let mut ancestor = depot_path::parent(&notification.path);
        while let Some(path) = ancestor {
            let kind = if created.contains(path) {
                Kind::Create
            } else {
                Kind::Modify
            };
            self.deliver(path, kind, notification);
            if kind == Kind::Modify {
                break;
            }
            ancestor = depot_path::parent(path);
        }
    }

    /// Deliver a notification scoped to `path`, re-rooting the origin's
    /// event paths relative to it and dropping events outside its subtree.
    ///
    /// Delivery enqueues onto each registration's worker so a slow or
    /// panicking listener can stall neither the poll loop nor the other
    /// listeners, while one listener's notifications keep their order.
    fn deliver(&self, path: &str, kind: Kind, origin: &Notification) {
        // Snapshot under the lock so listeners may re-register from within
        // their own callbacks.
        let queues: Vec<mpsc::Sender<Notification>> = {
            let listeners = self.listeners.lock().unwrap();
            match listeners.get(path) {
                Some(targets) if !targets.is_empty() => {
                    targets.iter().map(|r| r.queue.clone()).collect()
                }
                _ => return,
            }
        };

        let events: Vec<Event> = origin
            .events
            .iter()
            .filter_map(|e| {
                let full = depot_path::join(&origin.path, &e.path).ok()?;
                let rel = depot_path::strip_prefix(&full, path)?;
                Some(Event::new(rel, e.kind))
            })
            .collect();
        let scoped = Notification {
            path: path.to_owned(),
            kind,
            timestamp: origin.timestamp,
            events,
        };

        for queue in queues {
            // A closed queue means the registration was just removed.
            let _ = queue.send(scoped.clone());
        }
    }
}

impl NotificationDispatcher for SimpleWatchDispatcher {
    fn add_listener(
        &self,
        path: &str,
        listener: Arc<dyn ResourceListener>,
    ) -> Result<(), PathError> {
        depot_path::valid(path)?;
        let (queue, worker_rx) = mpsc::channel::<Notification>();
        let worker_listener = Arc::clone(&listener);
        thread::spawn(move || {
            while let Ok(notification) = worker_rx.recv() {
                let result =
                    catch_unwind(AssertUnwindSafe(|| worker_listener.changed(&notification)));
                if result.is_err() {
                    tracing::error!(
                        "listener for {:?} panicked handling {:?} notification",
                        notification.path,
                        notification.kind
                    );
                }
            }
        });
        self.listeners
            .lock()
            .unwrap()
            .entry(path.to_owned())
            .or_default()
            .push(Registration { listener, queue });
        Ok(())
    }

    fn remove_listener(&self, path: &str, listener: &Arc<dyn ResourceListener>) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let Some(registered) = listeners.get_mut(path) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|r| !Arc::ptr_eq(&r.listener, listener));
        let removed = registered.len() < before;
        if registered.is_empty() {
            listeners.remove(path);
        }
        removed
    }

    fn changed(&self, notification: Notification) {
        self.propagate(&notification);
    }
}
