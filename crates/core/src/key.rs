//! Hierarchical entity keys
//!
//! A key is a non-empty path of `(kind, id_or_name)` elements. Every element
//! but the last names an ancestor; the last element names the entity itself.
//!
//! ## Ordering
//!
//! Keys compare lexicographically over their path. Within an element the
//! kind compares first, then the terminal: numeric ids sort before string
//! names. A key sorts immediately before all of its descendants.
//!
//! ## Completeness
//!
//! A terminal id of `0` marks an *incomplete* key. Incomplete keys may be
//! handed to `Put` (an id is allocated before the write) but never address
//! a stored entity.

use crate::limits::Limits;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pseudo-property naming the entity key in filters and sort orders
pub const KEY_PROPERTY: &str = "__key__";

/// Terminal identifier of a path element
///
/// Variant order matters: derived `Ord` places every `Id` before every `Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdOrName {
    /// Numeric id (`0` = not yet allocated)
    Id(i64),
    /// String name
    Name(String),
}

impl IdOrName {
    /// True for the unallocated id `0`
    pub fn is_incomplete(&self) -> bool {
        matches!(self, IdOrName::Id(0))
    }

    /// Numeric id, if this is an id
    pub fn as_id(&self) -> Option<i64> {
        match self {
            IdOrName::Id(id) => Some(*id),
            IdOrName::Name(_) => None,
        }
    }

    /// Name, if this is a name
    pub fn as_name(&self) -> Option<&str> {
        match self {
            IdOrName::Id(_) => None,
            IdOrName::Name(name) => Some(name),
        }
    }
}

impl From<i64> for IdOrName {
    fn from(id: i64) -> Self {
        IdOrName::Id(id)
    }
}

impl From<&str> for IdOrName {
    fn from(name: &str) -> Self {
        IdOrName::Name(name.to_string())
    }
}

impl From<String> for IdOrName {
    fn from(name: String) -> Self {
        IdOrName::Name(name)
    }
}

/// One `(kind, id_or_name)` step of a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    /// Entity kind
    pub kind: String,
    /// Id or name within the kind
    pub id: IdOrName,
}

impl PathElement {
    /// Create a path element
    pub fn new(kind: impl Into<String>, id: impl Into<IdOrName>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            IdOrName::Id(id) => write!(f, "{}({})", self.kind, id),
            IdOrName::Name(name) => write!(f, "{}({:?})", self.kind, name),
        }
    }
}

/// Entity key
///
/// # Examples
///
/// ```
/// use mantle_core::Key;
///
/// let parent = Key::with_id("Person", 7);
/// let child = parent.child("Address", "home");
/// assert!(parent < child);
/// assert_eq!(child.parent(), Some(parent.clone()));
/// assert!(child.has_ancestor(&parent));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<PathElement>", into = "Vec<PathElement>")]
pub struct Key {
    path: Vec<PathElement>,
}

impl TryFrom<Vec<PathElement>> for Key {
    type Error = KeyError;

    fn try_from(path: Vec<PathElement>) -> Result<Self, Self::Error> {
        Key::from_path(path)
    }
}

impl From<Key> for Vec<PathElement> {
    fn from(key: Key) -> Self {
        key.path
    }
}

impl Key {
    /// Create a root key
    pub fn new(kind: impl Into<String>, id: impl Into<IdOrName>) -> Self {
        Self {
            path: vec![PathElement::new(kind, id)],
        }
    }

    /// Create a root key with a numeric id
    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self::new(kind, IdOrName::Id(id))
    }

    /// Create a root key with a string name
    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, IdOrName::Name(name.into()))
    }

    /// Create an incomplete root key (id to be allocated on put)
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self::new(kind, IdOrName::Id(0))
    }

    /// Build a key from a full path
    ///
    /// # Errors
    ///
    /// Returns `KeyError::EmptyPath` if `path` is empty.
    pub fn from_path(path: Vec<PathElement>) -> Result<Self, KeyError> {
        if path.is_empty() {
            return Err(KeyError::EmptyPath);
        }
        Ok(Self { path })
    }

    /// Key of a child entity under this key
    pub fn child(&self, kind: impl Into<String>, id: impl Into<IdOrName>) -> Self {
        let mut path = self.path.clone();
        path.push(PathElement::new(kind, id));
        Self { path }
    }

    /// Incomplete child key under this key
    pub fn incomplete_child(&self, kind: impl Into<String>) -> Self {
        self.child(kind, IdOrName::Id(0))
    }

    /// Full path, root first
    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    /// Ancestor elements (everything but the terminal element)
    pub fn ancestors(&self) -> &[PathElement] {
        &self.path[..self.path.len() - 1]
    }

    fn terminal(&self) -> &PathElement {
        // `path` is non-empty by construction
        &self.path[self.path.len() - 1]
    }

    /// Kind of the entity this key names
    pub fn kind(&self) -> &str {
        &self.terminal().kind
    }

    /// Terminal id or name
    pub fn id_or_name(&self) -> &IdOrName {
        &self.terminal().id
    }

    /// Terminal numeric id, if any
    pub fn id(&self) -> Option<i64> {
        self.terminal().id.as_id()
    }

    /// Terminal name, if any
    pub fn name(&self) -> Option<&str> {
        self.terminal().id.as_name()
    }

    /// Parent key, `None` for root keys
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Root key of this key's entity group
    pub fn root(&self) -> Key {
        Self {
            path: vec![self.path[0].clone()],
        }
    }

    /// True unless the terminal id is the unallocated `0`
    pub fn is_complete(&self) -> bool {
        !self.terminal().id.is_incomplete()
    }

    /// Copy of this key with the terminal id replaced
    pub fn with_allocated_id(&self, id: i64) -> Key {
        let mut path = self.path.clone();
        let last = path.len() - 1;
        path[last].id = IdOrName::Id(id);
        Self { path }
    }

    /// True if `ancestor` is this key or one of its ancestors
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.path.starts_with(&ancestor.path)
    }

    /// Validate this key against default limits
    pub fn validate(&self) -> Result<(), KeyError> {
        self.validate_with_limits(&Limits::default())
    }

    /// Validate this key
    ///
    /// Rules:
    /// - path depth within `max_path_depth`
    /// - kinds non-empty, within `max_kind_bytes`, not of the reserved form `__*__`
    /// - names non-empty and within `max_name_bytes`
    /// - ids non-negative; ancestor ids strictly positive
    pub fn validate_with_limits(&self, limits: &Limits) -> Result<(), KeyError> {
        if self.path.len() > limits.max_path_depth {
            return Err(KeyError::TooDeep {
                actual: self.path.len(),
                max: limits.max_path_depth,
            });
        }
        let last = self.path.len() - 1;
        for (i, element) in self.path.iter().enumerate() {
            validate_kind(&element.kind, limits)?;
            match &element.id {
                IdOrName::Id(id) if *id < 0 => return Err(KeyError::NegativeId(*id)),
                IdOrName::Id(0) if i != last => return Err(KeyError::IncompleteAncestor),
                IdOrName::Id(_) => {}
                IdOrName::Name(name) => {
                    if name.is_empty() {
                        return Err(KeyError::EmptyName);
                    }
                    if name.len() > limits.max_name_bytes {
                        return Err(KeyError::NameTooLong {
                            actual: name.len(),
                            max: limits.max_name_bytes,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", element)?;
        }
        Ok(())
    }
}

/// True for kinds of the reserved `__name__` form
pub fn is_reserved_kind(kind: &str) -> bool {
    kind.len() >= 4 && kind.starts_with("__") && kind.ends_with("__")
}

fn validate_kind(kind: &str, limits: &Limits) -> Result<(), KeyError> {
    if kind.is_empty() {
        return Err(KeyError::EmptyKind);
    }
    if kind.len() > limits.max_kind_bytes {
        return Err(KeyError::KindTooLong {
            actual: kind.len(),
            max: limits.max_kind_bytes,
        });
    }
    if is_reserved_kind(kind) {
        return Err(KeyError::ReservedKind(kind.to_string()));
    }
    Ok(())
}

/// Key validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key path has no elements
    #[error("Key path cannot be empty")]
    EmptyPath,

    /// A path element has an empty kind
    #[error("Key kind cannot be empty")]
    EmptyKind,

    /// Kind uses the reserved `__*__` form
    #[error("Key kind '{0}' is reserved")]
    ReservedKind(String),

    /// Kind exceeds maximum length
    #[error("Key kind too long: {actual} bytes exceeds maximum {max}")]
    KindTooLong {
        /// Actual kind length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// A path element has an empty name
    #[error("Key name cannot be empty")]
    EmptyName,

    /// Name exceeds maximum length
    #[error("Key name too long: {actual} bytes exceeds maximum {max}")]
    NameTooLong {
        /// Actual name length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Ids must not be negative
    #[error("Key id cannot be negative: {0}")]
    NegativeId(i64),

    /// Only the terminal element may be incomplete
    #[error("Ancestor key elements must be complete")]
    IncompleteAncestor,

    /// Path exceeds maximum depth
    #[error("Key path too deep: {actual} elements exceeds maximum {max}")]
    TooDeep {
        /// Actual depth
        actual: usize,
        /// Maximum allowed depth
        max: usize,
    },
}

impl KeyError {
    /// Stable reason code
    pub fn reason_code(&self) -> &'static str {
        match self {
            KeyError::EmptyPath => "empty_path",
            KeyError::EmptyKind => "empty_kind",
            KeyError::ReservedKind(_) => "reserved_kind",
            KeyError::KindTooLong { .. } => "kind_too_long",
            KeyError::EmptyName => "empty_name",
            KeyError::NameTooLong { .. } => "name_too_long",
            KeyError::NegativeId(_) => "negative_id",
            KeyError::IncompleteAncestor => "incomplete_ancestor",
            KeyError::TooDeep { .. } => "path_too_deep",
        }
    }
}
