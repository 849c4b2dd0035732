//! Change notification value types.

use std::time::{SystemTime, UNIX_EPOCH};

/// Kind of change to a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    /// Resource was created.
    Create,
    /// Resource was removed.
    Delete,
    /// Resource content or directory membership changed.
    Modify,
}

/// One affected sub-path within a [`Notification`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Affected path, relative to the notification path. The empty path
    /// stands for the watched node itself.
    pub path: String,
    /// Kind of change at that path.
    pub kind: Kind,
}

impl Event {
    /// New event.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: Kind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// A change to a watched resource: the path, what happened to it, when it
/// was observed, and every sub-path affected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Watched path the notification is scoped to.
    pub path: String,
    /// What happened to the watched path itself.
    pub kind: Kind,
    /// Observation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Ordered list of affected sub-paths.
    pub events: Vec<Event>,
}

impl Notification {
    /// New notification observed now.
    #[must_use]
    pub fn new(path: impl Into<String>, kind: Kind, events: Vec<Event>) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp: timestamp_now(),
            events,
        }
    }

    /// Child event paths of the given kind. The watched node's own entry is
    /// the empty path; everything else is a child, including a child that
    /// happens to share the watched node's name.
    fn children_of_kind(&self, kind: Kind) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.kind == kind && !e.path.is_empty())
            .map(|e| e.path.as_str())
            .collect()
    }

    /// Child paths created in this delta.
    #[must_use]
    pub fn created(&self) -> Vec<&str> {
        self.children_of_kind(Kind::Create)
    }

    /// Child paths removed in this delta.
    #[must_use]
    pub fn removed(&self) -> Vec<&str> {
        self.children_of_kind(Kind::Delete)
    }

    /// Child paths modified in this delta.
    #[must_use]
    pub fn modified(&self) -> Vec<&str> {
        self.children_of_kind(Kind::Modify)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_variants_are_distinct() {
        assert_ne!(Kind::Create, Kind::Delete);
        assert_ne!(Kind::Delete, Kind::Modify);
        assert_ne!(Kind::Create, Kind::Modify);
    }

    #[test]
    fn test_delta_accessors_split_child_events() {
        let n = Notification::new(
            "styles",
            Kind::Modify,
            vec![
                Event::new("", Kind::Modify),
                Event::new("new.sld", Kind::Create),
                Event::new("old.sld", Kind::Delete),
                Event::new("roads.sld", Kind::Modify),
            ],
        );
        assert_eq!(n.created(), vec!["new.sld"]);
        assert_eq!(n.removed(), vec!["old.sld"]);
        assert_eq!(n.modified(), vec!["roads.sld"]);
    }

    #[test]
    fn test_delta_accessors_skip_self_entry() {
        let n = Notification::new("styles", Kind::Create, vec![Event::new("", Kind::Create)]);
        assert!(n.created().is_empty());
        assert!(n.removed().is_empty());
        assert!(n.modified().is_empty());
    }

    #[test]
    fn test_child_sharing_the_watched_name_is_counted() {
        // A child literally named like the watched node is still a child.
        let n = Notification::new(
            "styles",
            Kind::Modify,
            vec![
                Event::new("", Kind::Modify),
                Event::new("styles", Kind::Create),
            ],
        );
        assert_eq!(n.created(), vec!["styles"]);
    }

    #[test]
    fn test_timestamp_is_set() {
        let n = Notification::new("a", Kind::Modify, Vec::new());
        assert!(n.timestamp > 0);
    }
}
