//! Core data types for dependency resolution.
//!
//! All types here are plain data: they carry no behaviour beyond
//! constraint matching and combination, and no I/O.

mod dependency;
mod framework;
mod name;
mod package;
mod requirement;
mod source;
mod version;

pub use dependency::Dependency;
pub use framework::{Framework, FrameworkRestrictions, FrameworkRestrictionsMode};
pub use name::{GroupName, PackageName};
pub use package::{PackageDetails, ResolvedPackage, VersionCache};
pub use requirement::{InstallSettings, PackageRequirement, Parent, ResolverStrategy};
pub use source::PackageSource;
pub use version::{Bound, PreReleaseStatus, SemVer, VersionError, VersionRange, VersionRequirement};
