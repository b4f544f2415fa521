//! Dependency resolution engine for Nougat
//!
//! This crate implements backtracking dependency resolution over remote
//! package feeds with framework-restriction filtering, conflict
//! memoization, and a prioritized asynchronous prefetch pipeline.

pub mod candidates;
pub mod conflicts;
pub mod filters;
pub mod frontier;
pub mod machine;
pub mod oracle;
pub mod queue;

// Re-export main types
pub use conflicts::ConflictTracker;
pub use machine::{ConflictInfo, PackageFilter, Resolution, Resolver, ResolverConfig, UpdateMode};
pub use oracle::{OracleSession, PackageOracle};
pub use queue::{WorkHandle, WorkPriority, WorkQueue};

use nougat_core::NougatError;

/// Result type for resolver operations
pub type ResolverResult<T> = Result<T, NougatError>;
