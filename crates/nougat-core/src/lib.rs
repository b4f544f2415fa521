//! # nougat-core
//!
//! Core types and utilities shared across all Nougat crates.
//!
//! This crate provides:
//! - SemVer and VersionRequirement types with prerelease policies
//! - Framework restriction algebra for target-framework filtering
//! - PackageRequirement and ResolvedPackage types for resolution
//! - NougatError enum for unified error handling
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types (SemVer, PackageRequirement, etc.)
//! - `error`: Error types and result aliases

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{NougatError, NougatResult};
pub use types::{
    Dependency, Framework, FrameworkRestrictions, FrameworkRestrictionsMode, GroupName,
    InstallSettings, PackageDetails, PackageName, PackageRequirement, PackageSource, Parent,
    PreReleaseStatus, ResolvedPackage, ResolverStrategy, SemVer, VersionCache, VersionRange,
    VersionRequirement,
};
