//! Resource path algebra for depot.
//!
//! Resource paths are `/`-separated strings addressing locations inside a
//! store. The empty string is the store root (the "base" path). Paths never
//! contain `.` or `..` segments: construction from such segments is rejected
//! with [`PathError::Traversal`] rather than normalized, so a resource path
//! can never escape the store root.
//!
//! Host file paths are a separate representation. Conversion happens through
//! exactly two functions, [`to_host_path`] and [`to_resource_path`], so the
//! two conventions cannot drift apart. Absolute host paths are representable
//! as a resource path whose first segment is an atomic marker: `"/"` on
//! POSIX, a `"D:/"`-style drive prefix elsewhere.

use std::path::{Component, Path, PathBuf};

/// The base path: the store root itself.
pub const BASE: &str = "";

/// Error raised by path construction and conversion.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PathError {
    /// Path contains a `.` or `..` segment.
    #[error("invalid path {0:?}: traversal segments are not allowed")]
    Traversal(String),

    /// Path contains an empty segment (doubled or trailing separator).
    #[error("invalid path {0:?}: empty segment")]
    EmptySegment(String),

    /// Absolute path used where a store-relative path is required.
    #[error("invalid path {0:?}: absolute paths cannot address store content")]
    Absolute(String),

    /// Absolute path whose marker matches no filesystem root on this host.
    #[error("no filesystem root matches {0:?}")]
    UnknownRoot(String),

    /// Host path lies outside the store base directory.
    #[error("host path {path:?} is not under base {base:?}")]
    OutsideBase {
        /// The offending host path.
        path: PathBuf,
        /// The store base directory.
        base: PathBuf,
    },

    /// Host path contains a component with no resource-path equivalent.
    #[error("host path component {0:?} cannot be represented as a resource path")]
    Unrepresentable(String),
}

/// Path convention of a target platform.
///
/// Parameterizing absolute-path detection on the convention rather than the
/// host lets both conventions be tested from any machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    /// Absolute paths start with `/`.
    Posix,
    /// Absolute paths start with a `D:/`-style drive prefix.
    Windows,
}

impl Platform {
    /// The convention of the machine running this code.
    #[cfg(windows)]
    pub const HOST: Self = Self::Windows;
    /// The convention of the machine running this code.
    #[cfg(not(windows))]
    pub const HOST: Self = Self::Posix;
}

/// Check whether `path` is absolute under the given platform convention.
#[must_use]
pub fn is_absolute(path: &str, platform: Platform) -> bool {
    match platform {
        Platform::Posix => path.starts_with('/'),
        Platform::Windows => drive_marker_len(path).is_some(),
    }
}

/// Length of a leading `D:/` drive marker, if present.
fn drive_marker_len(path: &str) -> Option<usize> {
    let mut chars = path.chars();
    if chars.next()?.is_ascii_alphabetic() && chars.next()? == ':' && chars.next()? == '/' {
        Some(3)
    } else {
        None
    }
}

/// Length of a leading absolute marker under either convention.
fn marker_len(path: &str) -> Option<usize> {
    if path.starts_with('/') {
        Some(1)
    } else {
        drive_marker_len(path)
    }
}

/// Split a path into its segments.
///
/// A leading absolute marker (`"/"` or `"D:/"`) is preserved as a single
/// atomic first token rather than producing an empty segment. The base path
/// yields an empty list.
#[must_use]
pub fn names(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return Vec::new();
    }
    let (marker, rest) = match marker_len(path) {
        Some(len) => (Some(&path[..len]), &path[len..]),
        None => (None, path),
    };
    let mut segments: Vec<&str> = marker.into_iter().collect();
    if !rest.is_empty() {
        segments.extend(rest.split('/'));
    }
    segments
}

/// Validate a store-relative path, rejecting traversal and empty segments.
///
/// Returns the path unchanged on success so the check composes with `?`.
pub fn valid(path: &str) -> Result<&str, PathError> {
    for segment in names(path) {
        match segment {
            "." | ".." => return Err(PathError::Traversal(path.to_owned())),
            "" => return Err(PathError::EmptySegment(path.to_owned())),
            _ if marker_len(segment).is_some() => {
                return Err(PathError::Absolute(path.to_owned()));
            }
            _ => {}
        }
    }
    Ok(path)
}

/// Build a path from segments.
///
/// The inverse of [`names`]: `names(&path(segments)?) == segments` for any
/// traversal-free segment list. A leading absolute marker is joined without
/// inserting a separator after it.
pub fn path<'a, I>(segments: I) -> Result<String, PathError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            "." | ".." => return Err(PathError::Traversal(segment.to_owned())),
            "" => return Err(PathError::EmptySegment(String::new())),
            _ => {}
        }
        if i > 0 && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    Ok(out)
}

/// Join a relative name onto a base path.
pub fn join(base: &str, name: &str) -> Result<String, PathError> {
    valid(name)?;
    if base.is_empty() {
        Ok(name.to_owned())
    } else if name.is_empty() {
        Ok(base.to_owned())
    } else {
        Ok(format!("{base}/{name}"))
    }
}

/// Parent of a path.
///
/// Single-segment paths have the base path as their parent; the base path
/// itself has none.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    if path.is_empty() {
        return None;
    }
    Some(path.rfind('/').map_or(BASE, |i| &path[..i]))
}

/// Last segment of a path (the base path names itself as `""`).
#[must_use]
pub fn name(path: &str) -> &str {
    path.rfind('/').map_or(path, |i| &path[i + 1..])
}

/// File extension of the last segment, if any.
#[must_use]
pub fn extension(path: &str) -> Option<&str> {
    let last = name(path);
    match last.rfind('.') {
        Some(i) if i > 0 => Some(&last[i + 1..]),
        _ => None,
    }
}

/// Re-root `path` relative to `prefix`.
///
/// Returns `Some("")` when the two are equal, `Some(rest)` when `path` is a
/// strict descendant of `prefix`, and `None` otherwise. The base path is a
/// prefix of everything.
#[must_use]
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    if path == prefix {
        return Some(BASE);
    }
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
}

/// Filesystem roots of the host, used to resolve absolute markers.
#[cfg(not(windows))]
fn host_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("/")]
}

/// Filesystem roots of the host, used to resolve absolute markers.
#[cfg(windows)]
fn host_roots() -> Vec<PathBuf> {
    ('A'..='Z')
        .map(|drive| PathBuf::from(format!("{drive}:/")))
        .filter(|root| root.exists())
        .collect()
}

/// Convert a resource path to a host file path.
///
/// Absolute paths (under either convention) ignore `base` entirely; the
/// marker is matched against the host's filesystem roots case-insensitively
/// and the remaining segments are resolved under that root. Relative paths
/// require a `base` to resolve under.
pub fn to_host_path(base: Option<&Path>, path: &str) -> Result<PathBuf, PathError> {
    let segments = names(path);
    if let Some(marker) = segments.first().copied().filter(|s| marker_len(s).is_some()) {
        let root = host_roots()
            .into_iter()
            .find(|r| r.to_string_lossy().eq_ignore_ascii_case(marker))
            .ok_or_else(|| PathError::UnknownRoot(marker.to_owned()))?;
        let mut host = root;
        for segment in &segments[1..] {
            host.push(segment);
        }
        return Ok(host);
    }
    valid(path)?;
    let Some(base) = base else {
        // Relative path with nothing to resolve against stays relative.
        return Ok(segments.iter().collect());
    };
    let mut host = base.to_path_buf();
    for segment in segments {
        host.push(segment);
    }
    Ok(host)
}

/// Convert a host file path under `base` back to a resource path.
///
/// The inverse of [`to_host_path`] for store-relative paths. Fails when
/// `host` does not live under `base` or contains components (traversal,
/// non-UTF-8 names) that a resource path cannot express.
pub fn to_resource_path(base: &Path, host: &Path) -> Result<String, PathError> {
    let relative = host.strip_prefix(base).map_err(|_| PathError::OutsideBase {
        path: host.to_path_buf(),
        base: base.to_path_buf(),
    })?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                let name = name
                    .to_str()
                    .ok_or_else(|| PathError::Unrepresentable(format!("{component:?}")))?;
                segments.push(name);
            }
            Component::CurDir => {}
            other => return Err(PathError::Unrepresentable(format!("{other:?}"))),
        }
    }
    path(segments)
}
