//! Package records produced during exploration and resolution.

use serde::{Deserialize, Serialize};

use super::dependency::Dependency;
use super::name::PackageName;
use super::requirement::InstallSettings;
use super::source::PackageSource;
use super::version::SemVer;

/// Authoritative per-version record as reported by a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDetails {
    pub name: PackageName,
    pub source: PackageSource,
    pub download_link: String,
    pub license_url: Option<String>,
    pub unlisted: bool,
    pub direct_dependencies: Vec<Dependency>,
}

/// A package pinned to one version within a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub name: PackageName,
    pub version: SemVer,
    /// Direct dependencies after framework-restriction filtering
    pub dependencies: Vec<Dependency>,
    pub unlisted: bool,
    pub is_runtime_dependency: bool,
    pub is_cli_tool: bool,
    pub settings: InstallSettings,
    pub source: PackageSource,
}

/// A candidate version together with where it can be fetched.
///
/// `assumed_version` marks versions no feed reported but a pinned
/// requirement demands; they are tried anyway so local-only pins resolve.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionCache {
    pub version: SemVer,
    pub sources: Vec<PackageSource>,
    pub assumed_version: bool,
}

impl VersionCache {
    pub fn reported(version: SemVer, sources: Vec<PackageSource>) -> Self {
        Self {
            version,
            sources,
            assumed_version: false,
        }
    }

    pub fn assumed(version: SemVer, sources: Vec<PackageSource>) -> Self {
        Self {
            version,
            sources,
            assumed_version: true,
        }
    }
}
