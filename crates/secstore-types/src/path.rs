//! Storage path validation and manipulation.
//!
//! A [`StoragePath`] is always held in normalized form:
//! - The root is `/`
//! - Every other path starts with `/` and has no trailing `/`
//! - Components are non-empty and never `.` or `..`
//! - No NUL bytes or backslashes anywhere
//!
//! Parsing accepts a missing leading slash and a single trailing slash and
//! normalizes both away. Everything else that violates the rules is rejected,
//! so a `StoragePath` can never escape the storage root.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum length in bytes of a normalized path.
pub const MAX_PATH_LEN: usize = 511;

/// Maximum length in bytes of a single path component.
pub const MAX_COMPONENT_LEN: usize = 255;

/// First component of the subtree kept for the store's own bookkeeping:
/// the meta journal and backend staging files live beneath it.
pub const RESERVED_COMPONENT: &str = ".secstore";

/// Characters that are forbidden anywhere in a path.
const FORBIDDEN_CHARS: &[char] = &['\0', '\\'];

/// A validated, normalized hierarchical path inside the storage namespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath(String);

impl StoragePath {
    /// The namespace root, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalize a path.
    ///
    /// # Examples
    ///
    /// ```
    /// use secstore_types::StoragePath;
    ///
    /// assert_eq!(StoragePath::parse("/app/config").unwrap().as_str(), "/app/config");
    /// assert_eq!(StoragePath::parse("app/config/").unwrap().as_str(), "/app/config");
    /// assert!(StoragePath::parse("/app/../etc").is_err());
    /// assert!(StoragePath::parse("").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let invalid = |reason: String| TypeError::InvalidPath {
            path: raw.to_string(),
            reason,
        };

        if raw.is_empty() {
            return Err(invalid("path must not be empty".into()));
        }

        for ch in FORBIDDEN_CHARS {
            if raw.contains(*ch) {
                return Err(invalid(format!("contains forbidden character: {ch:?}")));
            }
        }

        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        for component in trimmed.split('/') {
            if component.is_empty() {
                return Err(invalid("must not contain empty components".into()));
            }
            if component == "." || component == ".." {
                return Err(invalid(format!("must not contain {component:?} components")));
            }
            if component.len() > MAX_COMPONENT_LEN {
                return Err(invalid(format!(
                    "component exceeds {MAX_COMPONENT_LEN} bytes"
                )));
            }
        }

        let normalized = format!("/{trimmed}");
        if normalized.len() > MAX_PATH_LEN {
            return Err(invalid(format!("path exceeds {MAX_PATH_LEN} bytes")));
        }
        Ok(Self(normalized))
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the namespace root.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Iterate the components from the root down. The root has none.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components (0 for the root).
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Final component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Parent path, or `None` for the root.
    pub fn parent(&self) -> Option<StoragePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// All strict ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> Vec<StoragePath> {
        let mut out = Vec::with_capacity(self.depth());
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out
    }

    /// Append a relative path (one or more components) to this path.
    pub fn join(&self, relative: &str) -> Result<StoragePath, TypeError> {
        let relative = relative.trim_start_matches('/');
        if self.is_root() {
            Self::parse(relative)
        } else {
            Self::parse(&format!("{}/{}", self.0, relative))
        }
    }

    /// Prefix shared by every descendant of this path (`/` or `/a/b/`).
    pub fn child_prefix(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Returns `true` if `other` equals this path or lies beneath it.
    pub fn contains(&self, other: &StoragePath) -> bool {
        self == other || other.0.starts_with(&self.child_prefix())
    }

    /// Returns `true` if `other` lies strictly beneath this path.
    pub fn is_ancestor_of(&self, other: &StoragePath) -> bool {
        self != other && self.contains(other)
    }

    /// Returns `true` if the two subtrees share any path.
    pub fn overlaps(&self, other: &StoragePath) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Path of `self` relative to `ancestor`, without a leading slash.
    ///
    /// Returns `Some("")` when the two are equal and `None` when `ancestor`
    /// does not contain `self`.
    pub fn relative_to(&self, ancestor: &StoragePath) -> Option<&str> {
        if self == ancestor {
            return Some("");
        }
        self.0.strip_prefix(&ancestor.child_prefix())
    }

    /// Move this path from under `from` to the same position under `to`.
    ///
    /// Returns `None` if `from` does not contain `self` or the result would
    /// be malformed (for example too long).
    pub fn rebase(&self, from: &StoragePath, to: &StoragePath) -> Option<StoragePath> {
        let rel = self.relative_to(from)?;
        if rel.is_empty() {
            return Some(to.clone());
        }
        to.join(rel).ok()
    }

    /// Returns `true` if this path's first component is `component`.
    pub fn is_under_component(&self, component: &str) -> bool {
        self.components().next() == Some(component)
    }
}

impl fmt::Debug for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoragePath({})", self.0)
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for StoragePath {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for StoragePath {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.0
    }
}

impl std::borrow::Borrow<str> for StoragePath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for StoragePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
