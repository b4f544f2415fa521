//! Semantic version and version requirement types.
//!
//! Provides SemVer, VersionRange and VersionRequirement types following the
//! semantic versioning specification, extended with the prerelease policies
//! used during resolution.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Semantic version (major.minor.patch-prerelease+build)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

/// Version parsing and validation errors
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Invalid version format: {input}")]
    InvalidFormat { input: String },

    #[error("Invalid number in version: {component}")]
    InvalidNumber { component: String },
}

impl SemVer {
    /// Create a new version without prerelease or build metadata
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Create a prerelease version
    pub fn prerelease(major: u64, minor: u64, patch: u64, tag: &str) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Some(tag.to_string()),
            build: None,
        }
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// First dot-separated identifier of the prerelease tag ("beta" for "beta.2")
    pub fn prerelease_label(&self) -> Option<&str> {
        self.prerelease
            .as_deref()
            .map(|tag| tag.split('.').next().unwrap_or(tag))
    }
}

/// Compare dot-separated prerelease identifiers: numeric identifiers compare
/// numerically and sort below alphanumeric ones, per the semver rules
fn cmp_prerelease_tags(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less, // fewer identifiers first
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(n), Ok(m)) => n.cmp(&m),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl FromStr for SemVer {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fn tag(text: &str) -> Option<String> {
            if text.is_empty() {
                None
            } else {
                Some(text.to_string())
            }
        }

        let text = s.trim();

        // the numeric core runs until the first suffix marker
        let core_end = text.find(|c| c == '-' || c == '+').unwrap_or(text.len());
        let (core, suffix) = text.split_at(core_end);

        let mut numbers = core.split('.').map(|part| {
            part.parse::<u64>().map_err(|_| VersionError::InvalidNumber {
                component: part.to_string(),
            })
        });

        let major = match numbers.next() {
            Some(parsed) => parsed?,
            None => {
                return Err(VersionError::InvalidFormat {
                    input: text.to_string(),
                })
            }
        };
        // registries list one- and two-part versions too
        let minor = numbers.next().transpose()?.unwrap_or(0);
        let patch = numbers.next().transpose()?.unwrap_or(0);
        if numbers.next().is_some() {
            return Err(VersionError::InvalidFormat {
                input: text.to_string(),
            });
        }

        // a '-' suffix opens the prerelease tag, a '+' anywhere after the
        // core opens build metadata
        let (prerelease, build) = match suffix.as_bytes().first() {
            None => (None, None),
            Some(b'+') => (None, tag(&suffix[1..])),
            Some(_) => match suffix[1..].split_once('+') {
                Some((pre, meta)) => (tag(pre), tag(meta)),
                None => (tag(&suffix[1..]), None),
            },
        };

        Ok(SemVer {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.prerelease {
            write!(f, "-{}", tag)?;
        }
        if let Some(meta) = &self.build {
            write!(f, "+{}", meta)?;
        }
        Ok(())
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        // build metadata carries no ordering weight; a tagged build sorts
        // below the release it leads up to
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (Some(a), Some(b)) => cmp_prerelease_tags(a, b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    }
}

/// Whether a range endpoint is part of the range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bound {
    Including,
    Excluding,
}

/// Predicate over versions
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VersionRange {
    /// >= v
    Minimum(SemVer),
    /// > v
    GreaterThan(SemVer),
    /// <= v
    Maximum(SemVer),
    /// < v
    LessThan(SemVer),
    /// = v
    Specific(SemVer),
    /// == v, silencing every other constraint on the same package
    OverrideAll(SemVer),
    /// bounded interval
    Range {
        from_bound: Bound,
        from: SemVer,
        to: SemVer,
        to_bound: Bound,
    },
}

impl VersionRange {
    /// Check whether a version satisfies this range, ignoring prerelease policy
    pub fn fits(&self, version: &SemVer) -> bool {
        match self {
            VersionRange::Minimum(v) => version >= v,
            VersionRange::GreaterThan(v) => version > v,
            VersionRange::Maximum(v) => version <= v,
            VersionRange::LessThan(v) => version < v,
            VersionRange::Specific(v) => version == v,
            VersionRange::OverrideAll(v) => version == v,
            VersionRange::Range {
                from_bound,
                from,
                to,
                to_bound,
            } => {
                let lower = match from_bound {
                    Bound::Including => version >= from,
                    Bound::Excluding => version > from,
                };
                let upper = match to_bound {
                    Bound::Including => version <= to,
                    Bound::Excluding => version < to,
                };
                lower && upper
            }
        }
    }

    /// Check whether this range is a superset of another.
    ///
    /// Used for duplicate compression and closed-requirement subsumption.
    /// Conservative: unknown case pairs report false.
    pub fn includes(&self, other: &VersionRange) -> bool {
        use VersionRange::*;

        if self == other {
            return true;
        }

        match (self, other) {
            (Minimum(v1), Minimum(v2)) => v1 <= v2,
            (Minimum(v1), GreaterThan(v2)) => v1 <= v2,
            (Minimum(v1), Specific(v2)) | (Minimum(v1), OverrideAll(v2)) => v1 <= v2,
            (Minimum(v1), Range { from, .. }) => v1 <= from,
            (GreaterThan(v1), GreaterThan(v2)) => v1 <= v2,
            (GreaterThan(v1), Specific(v2)) | (GreaterThan(v1), OverrideAll(v2)) => v1 < v2,
            (Maximum(v1), Maximum(v2)) => v1 >= v2,
            (Maximum(v1), LessThan(v2)) => v1 >= v2,
            (Maximum(v1), Specific(v2)) | (Maximum(v1), OverrideAll(v2)) => v1 >= v2,
            (LessThan(v1), LessThan(v2)) => v1 >= v2,
            (LessThan(v1), Specific(v2)) | (LessThan(v1), OverrideAll(v2)) => v1 > v2,
            (Range { .. }, Specific(v2)) | (Range { .. }, OverrideAll(v2)) => self.fits(v2),
            (
                Range {
                    from_bound: fb1,
                    from: f1,
                    to: t1,
                    to_bound: tb1,
                },
                Range {
                    from_bound: fb2,
                    from: f2,
                    to: t2,
                    to_bound: tb2,
                },
            ) => {
                let lower_ok = f1 < f2 || (f1 == f2 && (*fb1 == Bound::Including || *fb2 == Bound::Excluding));
                let upper_ok = t1 > t2 || (t1 == t2 && (*tb1 == Bound::Including || *tb2 == Bound::Excluding));
                lower_ok && upper_ok
            }
            _ => false,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Minimum(v) => write!(f, ">= {}", v),
            VersionRange::GreaterThan(v) => write!(f, "> {}", v),
            VersionRange::Maximum(v) => write!(f, "<= {}", v),
            VersionRange::LessThan(v) => write!(f, "< {}", v),
            VersionRange::Specific(v) => write!(f, "= {}", v),
            VersionRange::OverrideAll(v) => write!(f, "== {}", v),
            VersionRange::Range {
                from_bound,
                from,
                to,
                to_bound,
            } => {
                match from_bound {
                    Bound::Including => write!(f, ">= {}", from)?,
                    Bound::Excluding => write!(f, "> {}", from)?,
                }
                match to_bound {
                    Bound::Including => write!(f, " <= {}", to),
                    Bound::Excluding => write!(f, " < {}", to),
                }
            }
        }
    }
}

/// Which prerelease versions a requirement admits
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PreReleaseStatus {
    /// Stable versions only
    No,
    /// Any prerelease
    All,
    /// Only prereleases whose first tag identifier is listed
    Concrete(Vec<String>),
}

impl PreReleaseStatus {
    /// Check whether a prerelease label is admitted by this policy
    pub fn admits(&self, label: &str) -> bool {
        match self {
            PreReleaseStatus::No => false,
            PreReleaseStatus::All => true,
            PreReleaseStatus::Concrete(labels) => labels.iter().any(|l| l == label),
        }
    }
}

/// A version range together with a prerelease policy
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionRequirement {
    pub range: VersionRange,
    pub prereleases: PreReleaseStatus,
}

impl VersionRequirement {
    pub fn new(range: VersionRange, prereleases: PreReleaseStatus) -> Self {
        Self { range, prereleases }
    }

    /// Any stable release (>= 0.0.0, no prereleases)
    pub fn all_releases() -> Self {
        Self::new(VersionRange::Minimum(SemVer::new(0, 0, 0)), PreReleaseStatus::No)
    }

    /// Any version at all, prereleases included
    pub fn no_restriction() -> Self {
        Self::new(VersionRange::Minimum(SemVer::new(0, 0, 0)), PreReleaseStatus::All)
    }

    /// Pin to exactly one version
    pub fn specific(version: SemVer) -> Self {
        Self::new(VersionRange::Specific(version), PreReleaseStatus::No)
    }

    /// Pin to exactly one version and silence all other constraints on the name
    pub fn override_all(version: SemVer) -> Self {
        Self::new(VersionRange::OverrideAll(version), PreReleaseStatus::No)
    }

    /// At least the given version
    pub fn minimum(version: SemVer) -> Self {
        Self::new(VersionRange::Minimum(version), PreReleaseStatus::No)
    }

    /// Check whether a version satisfies this requirement.
    ///
    /// A prerelease version fits only if the policy admits its label,
    /// `allow_transitive_prereleases` is set, or the range itself pins an
    /// equal prerelease version.
    pub fn in_range(&self, version: &SemVer, allow_transitive_prereleases: bool) -> bool {
        if !self.range.fits(version) {
            return false;
        }

        match &version.prerelease {
            None => true,
            Some(_) => {
                allow_transitive_prereleases
                    || version
                        .prerelease_label()
                        .map(|label| self.prereleases.admits(label))
                        .unwrap_or(false)
                    || self.pins_prerelease(version)
            }
        }
    }

    /// A Specific/OverrideAll range naming a prerelease admits that exact version
    fn pins_prerelease(&self, version: &SemVer) -> bool {
        match &self.range {
            VersionRange::Specific(v) | VersionRange::OverrideAll(v) => {
                v.is_prerelease() && v == version
            }
            _ => false,
        }
    }

    /// True for == ranges that silence every other constraint on the name
    pub fn is_global_override(&self) -> bool {
        matches!(self.range, VersionRange::OverrideAll(_))
    }

    /// True for ranges pinning a single version
    pub fn is_specific(&self) -> bool {
        matches!(
            self.range,
            VersionRange::Specific(_) | VersionRange::OverrideAll(_)
        )
    }

    /// The pinned version for specific/override ranges
    pub fn pinned_version(&self) -> Option<&SemVer> {
        match &self.range {
            VersionRange::Specific(v) | VersionRange::OverrideAll(v) => Some(v),
            _ => None,
        }
    }

    /// Check whether this requirement's range is a superset of another's
    pub fn includes(&self, other: &VersionRequirement) -> bool {
        self.range.includes(&other.range)
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.range)?;
        match &self.prereleases {
            PreReleaseStatus::No => Ok(()),
            PreReleaseStatus::All => write!(f, " prerelease"),
            PreReleaseStatus::Concrete(labels) => write!(f, " ({})", labels.join(",")),
        }
    }
}
