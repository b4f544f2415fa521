//! Dependency edges as declared by a package.

use serde::{Deserialize, Serialize};

use super::framework::FrameworkRestrictions;
use super::name::PackageName;
use super::version::VersionRequirement;

/// One declared dependency: name, admissible versions, and the target
/// frameworks the edge applies to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: PackageName,
    pub requirement: VersionRequirement,
    pub restrictions: FrameworkRestrictions,
}

impl Dependency {
    pub fn new(name: &str, requirement: VersionRequirement) -> Self {
        Self {
            name: PackageName::new(name),
            requirement,
            restrictions: FrameworkRestrictions::NoRestriction,
        }
    }

    /// Restrict the edge to specific target frameworks
    pub fn restricted_to(mut self, restrictions: FrameworkRestrictions) -> Self {
        self.restrictions = restrictions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SemVer, VersionRequirement};

    #[test]
    fn test_dependency_defaults_to_no_restriction() {
        let dep = Dependency::new(
            "FSharp.Core",
            VersionRequirement::minimum(SemVer::new(4, 0, 0)),
        );

        assert!(dep.restrictions.is_no_restriction());
        assert_eq!(dep.name, PackageName::new("fsharp.core"));
    }
}
