//! Helpers layered over [`Resource`] handles: filtered and recursive
//! listing, bulk copies, and rename-by-copy for moves that have to cross a
//! store boundary.

use std::io::{self, Read};

use crate::store::{Resource, ResourceKind, StoreError};

/// List the children of `dir` that `accept` keeps, in name order, with each
/// directory immediately followed by its own (filtered) subtree when
/// `recursive` is set.
pub fn list_filtered(
    dir: &dyn Resource,
    accept: impl Fn(&dyn Resource) -> bool,
    recursive: bool,
) -> Vec<Box<dyn Resource>> {
    let mut out = Vec::new();
    collect(dir, &accept, recursive, &mut out);
    out
}

fn collect(
    dir: &dyn Resource,
    accept: &dyn Fn(&dyn Resource) -> bool,
    recursive: bool,
    out: &mut Vec<Box<dyn Resource>>,
) {
    for child in dir.list() {
        let mut nested = Vec::new();
        if recursive && child.kind() == ResourceKind::Directory {
            collect(child.as_ref(), accept, recursive, &mut nested);
        }
        if accept(child.as_ref()) {
            out.push(child);
        }
        out.append(&mut nested);
    }
}

/// Every resource beneath `dir`, depth-first in name order.
pub fn list_recursively(dir: &dyn Resource) -> Vec<Box<dyn Resource>> {
    list_filtered(dir, |_| true, true)
}

/// Keeps only directories. Usable directly as a filter for
/// [`list_filtered`].
pub fn directories(resource: &dyn Resource) -> bool {
    resource.kind() == ResourceKind::Directory
}

/// Filter keeping resources whose file extension is one of a fixed set,
/// compared case-insensitively.
pub struct ExtensionFilter {
    extensions: Vec<String>,
}

impl ExtensionFilter {
    /// Filter accepting the given extensions (without the leading dot).
    #[must_use]
    pub fn new(extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether `resource` carries one of the accepted extensions.
    #[must_use]
    pub fn matches(&self, resource: &dyn Resource) -> bool {
        depot_path::extension(resource.path()).is_some_and(|ext| {
            self.extensions
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(ext))
        })
    }
}

/// Stream `data` into `target` as one staged write.
pub fn copy_from(data: &mut dyn Read, target: &dyn Resource) -> Result<(), StoreError> {
    let mut writer = target.writer()?;
    io::copy(data, &mut writer).map_err(|e| StoreError::io(target.path(), e))?;
    writer.commit()
}

/// Copy `source` to `target`: content for a leaf, the whole subtree for a
/// directory. Existing content at `target` is replaced leaf by leaf.
pub fn copy(source: &dyn Resource, target: &dyn Resource) -> Result<(), StoreError> {
    match source.kind() {
        ResourceKind::Undefined => Err(StoreError::NotFound(source.path().to_owned())),
        ResourceKind::Resource => {
            let mut reader = source.reader()?;
            copy_from(reader.as_mut(), target)
        }
        ResourceKind::Directory => {
            target.dir()?;
            for child in source.list() {
                let into = target.child(child.name())?;
                copy(child.as_ref(), into.as_ref())?;
            }
            Ok(())
        }
    }
}

/// Move `source` to `target` by copying and then deleting the source.
///
/// Unlike [`Resource::rename_to`] this works across stores, but it is not
/// atomic: a failure partway leaves both trees partially populated.
pub fn rename_by_copy(source: &dyn Resource, target: &dyn Resource) -> Result<bool, StoreError> {
    copy(source, target)?;
    source.delete()
}
