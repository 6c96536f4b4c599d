//! Path resolution over the device's object tree.
//!
//! Paths are resolved by walking the tree one segment at a time: a child
//! listing plus a filename query per candidate, or a parent-object query for
//! `..`. Nothing is cached; every resolution reflects the device as it is.

use crate::codes::{ObjectFormat, ObjectPropertyCode};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{ObjectHandle, StorageId};

/// Read-only view of the object tree used by the resolver
pub trait ObjectTree {
    /// Handles of the direct children of `parent`, over all storages
    ///
    /// # Errors
    /// Returns the underlying session error
    fn children(&mut self, parent: ObjectHandle) -> Result<Vec<ObjectHandle>>;

    /// File name of an object
    ///
    /// # Errors
    /// Returns the underlying session error
    fn filename(&mut self, handle: ObjectHandle) -> Result<String>;

    /// Raw ParentObject property of an object
    ///
    /// # Errors
    /// Returns the underlying session error
    fn parent(&mut self, handle: ObjectHandle) -> Result<u32>;
}

impl ObjectTree for Session {
    fn children(&mut self, parent: ObjectHandle) -> Result<Vec<ObjectHandle>> {
        self.get_object_handles(StorageId::ALL, ObjectFormat::ANY, parent)
    }

    fn filename(&mut self, handle: ObjectHandle) -> Result<String> {
        self.get_object_string_property(handle, ObjectPropertyCode::OBJECT_FILENAME)
    }

    fn parent(&mut self, handle: ObjectHandle) -> Result<u32> {
        let parent = self.get_object_integer_property(handle, ObjectPropertyCode::PARENT_OBJECT)?;
        // ParentObject is a u32 property
        Ok(parent as u32)
    }
}

/// Storage-root conventions of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPolicy {
    /// Handle used as the root for listings and `..` at the top
    pub root: ObjectHandle,
    /// ParentObject values meaning "no parent"
    pub no_parent: Vec<u32>,
}

impl Default for RootPolicy {
    fn default() -> Self {
        Self {
            root: ObjectHandle::ROOT,
            no_parent: vec![0, ObjectHandle::ROOT.0],
        }
    }
}

/// Resolves slash-separated paths to object handles
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    policy: RootPolicy,
}

impl Resolver {
    /// Create a resolver with a custom root policy
    #[must_use]
    pub fn new(policy: RootPolicy) -> Self {
        Self { policy }
    }

    /// Root handle of the policy
    #[must_use]
    pub fn root(&self) -> ObjectHandle {
        self.policy.root
    }

    /// Resolve `path` starting at `start`.
    ///
    /// `.` and empty segments are skipped, `..` moves to the parent (and
    /// stays put at the root), and a leading `/` restarts at the root.
    ///
    /// # Errors
    /// Returns `PathNotFound` with the consumed prefix when a segment has no
    /// matching child, or the underlying session error
    pub fn resolve<T: ObjectTree + ?Sized>(
        &self,
        tree: &mut T,
        start: ObjectHandle,
        path: &str,
    ) -> Result<ObjectHandle> {
        let mut current = if path.starts_with('/') {
            self.policy.root
        } else {
            start
        };
        let mut consumed: Vec<&str> = Vec::new();

        for segment in path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => current = self.parent_of(tree, current)?,
                name => {
                    current = self.child_named(tree, current, name)?.ok_or_else(|| {
                        Error::PathNotFound {
                            prefix: consumed.join("/"),
                            segment: name.to_string(),
                        }
                    })?;
                }
            }
            consumed.push(segment);
        }
        tracing::trace!(path, handle = %current, "Resolved path");
        Ok(current)
    }

    fn parent_of<T: ObjectTree + ?Sized>(
        &self,
        tree: &mut T,
        handle: ObjectHandle,
    ) -> Result<ObjectHandle> {
        if handle == self.policy.root {
            return Ok(handle);
        }
        let parent = tree.parent(handle)?;
        if self.policy.no_parent.contains(&parent) {
            Ok(self.policy.root)
        } else {
            Ok(ObjectHandle(parent))
        }
    }

    fn child_named<T: ObjectTree + ?Sized>(
        &self,
        tree: &mut T,
        parent: ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectHandle>> {
        for child in tree.children(parent)? {
            if tree.filename(child)? == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }
}

/// Split a path into its parent directory and final segment.
///
/// # Example
///
/// ```
/// use mtp_core::resolver::split_parent;
///
/// assert_eq!(split_parent("Music/Album/track.mp3"), ("Music/Album", "track.mp3"));
/// assert_eq!(split_parent("/track.mp3"), ("/", "track.mp3"));
/// assert_eq!(split_parent("track.mp3"), ("", "track.mp3"));
/// ```
#[must_use]
pub fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}
