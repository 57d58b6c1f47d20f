//! Entity identifiers.
//!
//! The platform keys entities by a 32-bit integer which callers carry as its
//! decimal string. Bindings and nested entities use `<parent>/<child>` where
//! the child is either another integer id or a name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Delimiter between the parent and child halves of a composite id.
pub const COMPOSITE_DELIMITER: char = '/';

/// Platform-assigned entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i32);

impl EntityId {
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for EntityId {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i32>()
            .map(Self)
            .map_err(|e| Error::malformed_id(s, format!("not a 32-bit integer: {e}")))
    }
}

/// Parse an entity id held as a string in a desired-state record.
pub fn parse_entity_id(raw: &str) -> Result<i32> {
    raw.parse::<EntityId>().map(EntityId::get)
}

/// Parse an optional entity id field, treating the empty string as unset.
pub fn parse_optional_id(raw: Option<&str>) -> Result<Option<i32>> {
    match raw {
        None | Some("") => Ok(None),
        Some(s) => parse_entity_id(s).map(Some),
    }
}

/// `<parent-id>/<child-id-or-name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    pub parent: i32,
    pub child: String,
}

impl CompositeId {
    pub fn new(parent: i32, child: impl Into<String>) -> Self {
        Self {
            parent,
            child: child.into(),
        }
    }

    /// Parse the child half as an integer id (`<int>/<int>` form).
    pub fn child_id(&self) -> Result<i32> {
        self.child
            .parse::<i32>()
            .map_err(|_| Error::malformed_id(self.to_string(), "child part is not an integer id"))
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{COMPOSITE_DELIMITER}{}", self.parent, self.child)
    }
}

impl FromStr for CompositeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (parent, child) = s
            .split_once(COMPOSITE_DELIMITER)
            .ok_or_else(|| Error::malformed_id(s, "expected `<parent>/<child>`"))?;
        if child.is_empty() {
            return Err(Error::malformed_id(s, "child part is empty"));
        }
        if child.contains(COMPOSITE_DELIMITER) {
            return Err(Error::malformed_id(s, "too many `/` delimiters"));
        }
        let parent = parent
            .parse::<i32>()
            .map_err(|_| Error::malformed_id(s, "parent part is not an integer id"))?;
        Ok(Self::new(parent, child))
    }
}
