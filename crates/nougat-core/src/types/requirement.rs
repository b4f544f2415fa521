//! Package requirements: the constraints on the resolver's frontier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::framework::FrameworkRestrictionsMode;
use super::name::PackageName;
use super::source::PackageSource;
use super::version::{SemVer, VersionRequirement};

/// Version selection policy in the absence of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResolverStrategy {
    /// Prefer the lowest matching version
    Min,
    /// Prefer the highest matching version
    Max,
}

/// Per-requirement install settings carried into the resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstallSettings {
    pub framework_restrictions: FrameworkRestrictionsMode,
}

impl InstallSettings {
    pub fn with_restrictions(mode: FrameworkRestrictionsMode) -> Self {
        Self {
            framework_restrictions: mode,
        }
    }
}

/// Where a requirement came from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Parent {
    /// Declared directly in the dependency file
    RootFile,
    /// Introduced by an explored package
    Package {
        name: PackageName,
        version: SemVer,
        source: PackageSource,
    },
}

impl Parent {
    pub fn is_root(&self) -> bool {
        matches!(self, Parent::RootFile)
    }

    /// The source of the parent package, if any
    pub fn package_source(&self) -> Option<&PackageSource> {
        match self {
            Parent::RootFile => None,
            Parent::Package { source, .. } => Some(source),
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::RootFile => f.write_str("dependency file"),
            Parent::Package { name, version, .. } => write!(f, "{} {}", name, version),
        }
    }
}

/// One constraint on the resolution frontier.
///
/// The `graph` holds the requirements on the ancestor path; it both guards
/// against cycles and scopes conflict sets during backtracking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageRequirement {
    pub name: PackageName,
    pub version_requirement: VersionRequirement,
    pub resolver_strategy_for_direct: Option<ResolverStrategy>,
    pub resolver_strategy_for_transitives: Option<ResolverStrategy>,
    pub parent: Parent,
    pub graph: BTreeSet<PackageRequirement>,
    pub sources: Vec<PackageSource>,
    pub settings: InstallSettings,
    pub transitive_prereleases: bool,
    pub is_cli_tool: bool,
}

impl PackageRequirement {
    /// A root requirement as the dependency file declares it
    pub fn root(name: &str, version_requirement: VersionRequirement) -> Self {
        Self {
            name: PackageName::new(name),
            version_requirement,
            resolver_strategy_for_direct: None,
            resolver_strategy_for_transitives: None,
            parent: Parent::RootFile,
            graph: BTreeSet::new(),
            sources: vec![PackageSource::nuget_org()],
            settings: InstallSettings::default(),
            transitive_prereleases: false,
            is_cli_tool: false,
        }
    }

    /// Root requirements have depth 0, each explored edge adds one
    pub fn depth(&self) -> usize {
        self.graph.len()
    }

    /// Whether this requirement was declared at the root
    pub fn is_root(&self) -> bool {
        self.parent.is_root()
    }
}

impl fmt::Display for PackageRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version_requirement)
    }
}
