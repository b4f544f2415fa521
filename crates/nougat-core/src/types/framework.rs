//! Target-framework restriction algebra.
//!
//! Restrictions form a lattice under intersection (`and`) and union (`or`)
//! with `NoRestriction` as the top element. Dependency filtering only needs
//! the set of frameworks a restriction represents, so the algebra is kept
//! in that normal form rather than as a formula tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A target framework moniker ("net48", "netstandard2.0", "net6.0")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Framework(String);

impl Framework {
    pub fn new(moniker: &str) -> Self {
        Self(moniker.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Framework {
    fn from(moniker: &str) -> Self {
        Self::new(moniker)
    }
}

/// Which target frameworks a dependency edge applies to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameworkRestrictions {
    /// Applies everywhere
    NoRestriction,
    /// Applies only to the listed frameworks
    Restricted(BTreeSet<Framework>),
}

impl FrameworkRestrictions {
    /// Restriction covering exactly the given frameworks
    pub fn restricted<I>(frameworks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Framework>,
    {
        FrameworkRestrictions::Restricted(frameworks.into_iter().map(Into::into).collect())
    }

    pub fn is_no_restriction(&self) -> bool {
        matches!(self, FrameworkRestrictions::NoRestriction)
    }

    /// The frameworks this restriction represents; `None` means all of them
    pub fn represented_frameworks(&self) -> Option<&BTreeSet<Framework>> {
        match self {
            FrameworkRestrictions::NoRestriction => None,
            FrameworkRestrictions::Restricted(set) => Some(set),
        }
    }

    /// Lattice meet: frameworks represented by both restrictions
    pub fn and(&self, other: &FrameworkRestrictions) -> FrameworkRestrictions {
        match (self, other) {
            (FrameworkRestrictions::NoRestriction, r) => r.clone(),
            (r, FrameworkRestrictions::NoRestriction) => r.clone(),
            (FrameworkRestrictions::Restricted(a), FrameworkRestrictions::Restricted(b)) => {
                FrameworkRestrictions::Restricted(a.intersection(b).cloned().collect())
            }
        }
    }

    /// Lattice join: frameworks represented by either restriction
    pub fn or(&self, other: &FrameworkRestrictions) -> FrameworkRestrictions {
        match (self, other) {
            (FrameworkRestrictions::NoRestriction, _)
            | (_, FrameworkRestrictions::NoRestriction) => FrameworkRestrictions::NoRestriction,
            (FrameworkRestrictions::Restricted(a), FrameworkRestrictions::Restricted(b)) => {
                FrameworkRestrictions::Restricted(a.union(b).cloned().collect())
            }
        }
    }

    /// Whether the represented framework sets overlap
    pub fn intersects(&self, other: &FrameworkRestrictions) -> bool {
        match (self.represented_frameworks(), other.represented_frameworks()) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a.intersection(b).next().is_some(),
        }
    }
}

impl fmt::Display for FrameworkRestrictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameworkRestrictions::NoRestriction => f.write_str("no restriction"),
            FrameworkRestrictions::Restricted(set) => {
                let monikers: Vec<&str> = set.iter().map(|fw| fw.as_str()).collect();
                write!(f, "{}", monikers.join(", "))
            }
        }
    }
}

/// Restriction as declared in install settings: explicit, or left for the
/// project file scan to decide
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameworkRestrictionsMode {
    Explicit(FrameworkRestrictions),
    AutoDetect,
}

impl FrameworkRestrictionsMode {
    /// The effective restriction; auto-detect resolves to no restriction
    /// until a project scan narrows it
    pub fn restrictions(&self) -> FrameworkRestrictions {
        match self {
            FrameworkRestrictionsMode::Explicit(r) => r.clone(),
            FrameworkRestrictionsMode::AutoDetect => FrameworkRestrictions::NoRestriction,
        }
    }
}

impl Default for FrameworkRestrictionsMode {
    fn default() -> Self {
        FrameworkRestrictionsMode::AutoDetect
    }
}
