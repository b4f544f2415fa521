//! Candidate version selection.
//!
//! Produces the ordered sequence of versions the state machine will try for
//! a chosen requirement, honouring the resolver strategy, prerelease
//! fallback rules and global-override semantics. All functions here are
//! pure; the machine supplies the listed versions it fetched.

use nougat_core::{
    PackageRequirement, PackageSource, PreReleaseStatus, SemVer, ResolverStrategy, VersionCache,
    VersionRequirement,
};

/// The outcome of candidate selection for one requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSelection {
    /// Versions to try, in trial order
    pub versions: Vec<VersionCache>,
    /// All other constraints on this name must be ignored during matching
    pub global_override: bool,
    /// Candidates only appeared after admitting prereleases; a failing
    /// search should be retried in relaxed mode
    pub try_relaxed: bool,
}

/// Pick the resolver strategy for the current requirement.
///
/// A root requirement that is the only constraint on its name follows the
/// direct-dependency policy; otherwise the same-name requirements are
/// consulted depth-first with a left-biased fold of their transitive
/// overrides.
pub fn resolver_strategy_for(
    current: &PackageRequirement,
    same_name: &[&PackageRequirement],
    global_direct: Option<ResolverStrategy>,
    global_transitive: Option<ResolverStrategy>,
) -> ResolverStrategy {
    if current.is_root() && same_name.len() <= 1 {
        return current
            .resolver_strategy_for_direct
            .or(global_direct)
            .unwrap_or(ResolverStrategy::Max);
    }

    let mut sorted: Vec<&&PackageRequirement> = same_name.iter().collect();
    sorted.sort_by_key(|req| {
        (
            req.depth(),
            req.resolver_strategy_for_transitives != global_transitive,
            req.resolver_strategy_for_transitives != Some(ResolverStrategy::Max),
        )
    });

    sorted
        .iter()
        .fold(None, |acc: Option<ResolverStrategy>, req| {
            acc.or(req.resolver_strategy_for_transitives)
        })
        .or(global_transitive)
        .unwrap_or(ResolverStrategy::Max)
}

/// Order listed versions by strategy and prepend the preferred prefix.
///
/// Preferred versions (pins, locked versions, last known good) always come
/// first; duplicates are removed from the strategy-sorted tail.
pub fn order_candidates(
    strategy: ResolverStrategy,
    listed: Vec<(SemVer, Vec<PackageSource>)>,
    preferred: &[(SemVer, Vec<PackageSource>)],
) -> Vec<VersionCache> {
    let mut ordered = listed;
    match strategy {
        ResolverStrategy::Max => ordered.sort_by(|a, b| b.0.cmp(&a.0)),
        ResolverStrategy::Min => ordered.sort_by(|a, b| a.0.cmp(&b.0)),
    }

    let mut candidates: Vec<VersionCache> = preferred
        .iter()
        .map(|(v, sources)| VersionCache::reported(v.clone(), sources.clone()))
        .collect();

    for (version, sources) in ordered {
        if candidates.iter().all(|c| c.version != version) {
            candidates.push(VersionCache::reported(version, sources));
        }
    }

    candidates
}

/// Sources for a synthesized pin: the parent's source first, then the
/// requirement's own, de-duplicated; with no parent source the
/// requirement's own sources go local feeds first and nuget.org last
fn assumed_sources(current: &PackageRequirement) -> Vec<PackageSource> {
    match current.parent.package_source() {
        Some(parent_source) => {
            let mut sources = vec![parent_source.clone()];
            for source in &current.sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
            sources
        }
        None => {
            let mut sources = current.sources.clone();
            sources.sort_by_key(|s| (!s.is_local_feed, s.is_nuget_org()));
            sources
        }
    }
}

fn all_in_range(
    requirements: &[&PackageRequirement],
    version: &SemVer,
    allow_prereleases: bool,
) -> bool {
    requirements
        .iter()
        .all(|req| req.version_requirement.in_range(version, allow_prereleases))
}

/// Prerelease policy for the all-prereleases fallback: root requirements
/// keep their declared policy unless they are plain "any release"
fn fallback_policy(req: &PackageRequirement) -> PreReleaseStatus {
    if req.is_root() && req.version_requirement != VersionRequirement::all_releases() {
        req.version_requirement.prereleases.clone()
    } else {
        PreReleaseStatus::All
    }
}

fn fits_with_policy(req: &PackageRequirement, policy: &PreReleaseStatus, version: &SemVer) -> bool {
    if !req.version_requirement.range.fits(version) {
        return false;
    }
    match version.prerelease_label() {
        None => true,
        Some(label) => policy.admits(label),
    }
}

/// Select the candidate versions for the current requirement.
///
/// `same_name_open` is the set of open requirements sharing the name
/// (including `current`); `prior` is the step's earlier candidate list for
/// the name, if any; `listed` must already be in trial order.
pub fn select_candidates(
    current: &PackageRequirement,
    same_name_open: &[&PackageRequirement],
    prior: Option<&(Vec<VersionCache>, bool)>,
    listed: &[VersionCache],
    relax: bool,
) -> CandidateSelection {
    match prior {
        Some((versions, true)) => CandidateSelection {
            versions: versions.clone(),
            global_override: true,
            try_relaxed: false,
        },
        Some((versions, false)) => narrow_prior_candidates(current, versions, relax),
        None => first_candidates(current, same_name_open, listed),
    }
}

/// First visit of a name: filter the listed versions by every open
/// requirement, with the pinned-version and prerelease fallbacks
fn first_candidates(
    current: &PackageRequirement,
    same_name_open: &[&PackageRequirement],
    listed: &[VersionCache],
) -> CandidateSelection {
    let global_override = current.version_requirement.is_global_override();

    if let Some(pinned) = current.version_requirement.pinned_version() {
        let matching: Vec<VersionCache> = listed
            .iter()
            .filter(|cache| &cache.version == pinned)
            .cloned()
            .collect();

        let versions = if matching.is_empty() {
            vec![VersionCache::assumed(
                pinned.clone(),
                assumed_sources(current),
            )]
        } else {
            matching
        };

        return CandidateSelection {
            versions,
            global_override,
            try_relaxed: false,
        };
    }

    let filtered: Vec<VersionCache> = listed
        .iter()
        .filter(|cache| all_in_range(same_name_open, &cache.version, false))
        .cloned()
        .collect();

    if !filtered.is_empty() {
        return CandidateSelection {
            versions: filtered,
            global_override,
            try_relaxed: false,
        };
    }

    // fallback (a): a transitive-prerelease window admits everything
    if !current.is_root() && current.transitive_prereleases {
        let widened: Vec<VersionCache> = listed
            .iter()
            .filter(|cache| all_in_range(same_name_open, &cache.version, true))
            .cloned()
            .collect();
        if !widened.is_empty() {
            return CandidateSelection {
                versions: widened,
                global_override,
                try_relaxed: false,
            };
        }
    }

    // fallback (b): nothing but prereleases exists, admit them per policy
    if !listed.is_empty() && listed.iter().all(|cache| cache.version.is_prerelease()) {
        let policies: Vec<(&PackageRequirement, PreReleaseStatus)> = same_name_open
            .iter()
            .map(|&req| (req, fallback_policy(req)))
            .collect();

        let admitted: Vec<VersionCache> = listed
            .iter()
            .filter(|cache| {
                policies
                    .iter()
                    .all(|entry| fits_with_policy(entry.0, &entry.1, &cache.version))
            })
            .cloned()
            .collect();

        return CandidateSelection {
            versions: admitted,
            global_override,
            try_relaxed: false,
        };
    }

    CandidateSelection {
        versions: Vec::new(),
        global_override,
        try_relaxed: false,
    }
}

/// A later requirement narrows the candidate list a prior step computed
fn narrow_prior_candidates(
    current: &PackageRequirement,
    versions: &[VersionCache],
    relax: bool,
) -> CandidateSelection {
    // a root parent keeps prereleases shut, deeper edges leave them open
    let allow_prereleases = !current.is_root();

    let narrowed: Vec<VersionCache> = versions
        .iter()
        .filter(|cache| {
            current
                .version_requirement
                .in_range(&cache.version, allow_prereleases)
        })
        .cloned()
        .collect();

    if !narrowed.is_empty() {
        return CandidateSelection {
            versions: narrowed,
            global_override: false,
            try_relaxed: false,
        };
    }

    let widened: Vec<VersionCache> = versions
        .iter()
        .filter(|cache| current.version_requirement.in_range(&cache.version, true))
        .cloned()
        .collect();

    CandidateSelection {
        try_relaxed: !relax && !widened.is_empty(),
        versions: widened,
        global_override: false,
    }
}
