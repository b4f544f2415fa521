//! Case-insensitive package and group identifiers.
//!
//! Registries compare names without regard to case but display the casing
//! the publisher chose; both forms are kept.

use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Package identifier with case-insensitive equality
#[derive(Debug, Clone)]
pub struct PackageName {
    /// Casing as written by the declaring file or registry
    original: String,
    /// Lowercased comparison key
    key: String,
}

impl PackageName {
    pub fn new(name: &str) -> Self {
        Self {
            original: name.to_string(),
            key: name.to_lowercase(),
        }
    }

    /// The user-visible casing
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// The lowercased comparison key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replace the visible casing, keeping the identity
    pub fn with_casing_of(&self, canonical: &PackageName) -> Self {
        debug_assert_eq!(self.key, canonical.key);
        canonical.clone()
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PackageName {}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl From<&str> for PackageName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(PackageName::new(&s))
    }
}

/// Dependency group identifier, case-insensitive like package names
#[derive(Debug, Clone)]
pub struct GroupName {
    original: String,
    key: String,
}

impl GroupName {
    pub fn new(name: &str) -> Self {
        Self {
            original: name.to_string(),
            key: name.to_lowercase(),
        }
    }

    /// The default group every dependency file has
    pub fn main() -> Self {
        Self::new("Main")
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl PartialEq for GroupName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for GroupName {}

impl Hash for GroupName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
