//! The resolver state machine.
//!
//! A backtracking search driven by an explicit stack of prior decisions
//! instead of native recursion, dispatching on a three-valued stage
//! discriminator. `ResolverStep` snapshots are immutable; the caches and
//! histories accumulate across the whole search.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use nougat_core::{
    Dependency, FrameworkRestrictions, FrameworkRestrictionsMode, GroupName, InstallSettings,
    NougatError, NougatResult, PackageName, PackageRequirement, Parent, ResolvedPackage,
    ResolverStrategy, SemVer, VersionCache,
};

use crate::candidates::{order_candidates, resolver_strategy_for, select_candidates, CandidateSelection};
use crate::conflicts::{self, ConflictTracker};
use crate::filters::{filter_by_restrictions, find_first_incompatibility};
use crate::frontier::calc_open_requirements;
use crate::oracle::{task_timeout_from_env, OracleSession, PackageOracle};
use crate::queue::{worker_count_from_env, WorkQueue};

use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests;

/// Restricts which packages an update run is allowed to touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageFilter {
    Exact(PackageName),
}

impl PackageFilter {
    pub fn exact(name: &str) -> Self {
        PackageFilter::Exact(PackageName::new(name))
    }

    pub fn matches(&self, name: &PackageName) -> bool {
        match self {
            PackageFilter::Exact(wanted) => wanted == name,
        }
    }
}

/// What kind of run this is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateMode {
    Install,
    UpdateAll,
    UpdateGroup(GroupName),
    UpdateFiltered(GroupName, PackageFilter),
}

/// Immutable snapshot of one search position
#[derive(Debug, Clone)]
pub struct ResolverStep {
    /// Second-pass toggle loosening prerelease admission
    pub relax: bool,
    /// Candidate lists per name, with the global-override marker
    pub filtered_versions: HashMap<PackageName, (Vec<VersionCache>, bool)>,
    /// Packages pinned so far on this path
    pub current_resolution: BTreeMap<PackageName, ResolvedPackage>,
    /// Requirements already answered on this path
    pub closed_requirements: BTreeSet<PackageRequirement>,
    /// The frontier
    pub open_requirements: BTreeSet<PackageRequirement>,
}

impl ResolverStep {
    fn initial(relax: bool, roots: &[PackageRequirement]) -> Self {
        Self {
            relax,
            filtered_versions: HashMap::new(),
            current_resolution: BTreeMap::new(),
            closed_requirements: BTreeSet::new(),
            open_requirements: roots.iter().cloned().collect(),
        }
    }
}

/// A structured explanation of why resolution failed
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    /// The step at which the dead end was hit
    pub step: ResolverStep,
    /// The requirements that cannot be satisfied together
    pub requirement_set: BTreeSet<PackageRequirement>,
    /// The requirement that triggered the dead end
    pub requirement: PackageRequirement,
    /// Versions the feeds reported for the triggering name
    pub available_versions: Vec<SemVer>,
    /// The strict pass rejected prerelease-only candidates; retrying in
    /// relaxed mode may succeed
    pub try_relaxed: bool,
}

impl ConflictInfo {
    /// Render the user-facing report
    pub fn report(&self) -> String {
        // requirements on the triggering name still in scope belong in the
        // report even when the fused conflict set does not carry them
        let mut requirements = self.requirement_set.clone();
        for req in self
            .step
            .open_requirements
            .iter()
            .chain(self.step.closed_requirements.iter())
        {
            if req.name == self.requirement.name {
                requirements.insert(req.clone());
            }
        }

        conflicts::render_conflict_report(
            &self.step.current_resolution,
            &requirements,
            &self.requirement,
            &self.available_versions,
        )
    }
}

/// The outcome of a resolver run plus the non-fatal errors gathered along
/// the way
#[derive(Debug)]
pub struct Resolution {
    outcome: Outcome,
    errors: Vec<NougatError>,
}

#[derive(Debug)]
enum Outcome {
    Resolved(BTreeMap<PackageName, ResolvedPackage>),
    Conflict(Box<ConflictInfo>),
}

impl Resolution {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Resolved(_))
    }

    /// The resolved model, if resolution succeeded
    pub fn packages(&self) -> Option<&BTreeMap<PackageName, ResolvedPackage>> {
        match &self.outcome {
            Outcome::Resolved(packages) => Some(packages),
            Outcome::Conflict(_) => None,
        }
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        match &self.outcome {
            Outcome::Resolved(_) => None,
            Outcome::Conflict(info) => Some(info),
        }
    }

    /// Errors captured during the search without failing it
    pub fn errors(&self) -> &[NougatError] {
        &self.errors
    }

    /// Unwrap the model; a conflict becomes a structural error carrying
    /// the rendered report together with the accumulated errors
    pub fn into_packages(self) -> NougatResult<BTreeMap<PackageName, ResolvedPackage>> {
        match self.outcome {
            Outcome::Resolved(packages) => Ok(packages),
            Outcome::Conflict(info) => {
                let mut report = info.report();
                for error in &self.errors {
                    report.push('\n');
                    report.push_str(&error.to_string());
                }
                Err(NougatError::ResolutionConflict { report })
            }
        }
    }
}

/// Rewrite dependency names to the canonical casing bound in the
/// resolution; names compare case-insensitively but the user-visible
/// casing is the resolved package's
pub fn cleanup_names(
    mut resolution: BTreeMap<PackageName, ResolvedPackage>,
) -> BTreeMap<PackageName, ResolvedPackage> {
    let canonical: Vec<PackageName> = resolution.values().map(|p| p.name.clone()).collect();

    for package in resolution.values_mut() {
        for dependency in &mut package.dependencies {
            if let Some(name) = canonical.iter().find(|n| **n == dependency.name) {
                dependency.name = dependency.name.with_casing_of(name);
            }
        }
    }

    resolution
}

/// Resolver configuration, read from the environment once at entry
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub worker_count: usize,
    pub task_timeout: Duration,
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        Self {
            worker_count: worker_count_from_env(),
            task_timeout: task_timeout_from_env(),
        }
    }
}

/// The resolver entry point
pub struct Resolver {
    oracle: Arc<dyn PackageOracle>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(oracle: Arc<dyn PackageOracle>) -> Self {
        Self::with_config(oracle, ResolverConfig::from_env())
    }

    pub fn with_config(oracle: Arc<dyn PackageOracle>, config: ResolverConfig) -> Self {
        Self { oracle, config }
    }

    /// Resolve the given root requirements to one version per package.
    ///
    /// The work queue and its cancellation source are released on exit
    /// regardless of how the search ends. A strict-pass conflict caused
    /// only by prerelease admission is retried once in relaxed mode.
    #[allow(clippy::too_many_arguments)]
    pub async fn resolve(
        &self,
        group: GroupName,
        global_direct: Option<ResolverStrategy>,
        global_transitive: Option<ResolverStrategy>,
        global_restrictions: FrameworkRestrictions,
        root_requirements: Vec<PackageRequirement>,
        update_mode: UpdateMode,
    ) -> NougatResult<Resolution> {
        let cancel = CancellationToken::new();
        let queue = WorkQueue::start(self.config.worker_count, cancel.clone());
        let session = Arc::new(OracleSession::new(
            self.oracle.clone(),
            queue,
            group.clone(),
            self.config.task_timeout,
        ));

        let package_filter = match &update_mode {
            UpdateMode::UpdateFiltered(filter_group, filter) if *filter_group == group => {
                Some(filter.clone())
            }
            _ => None,
        };

        let mut search = Search {
            session: session.clone(),
            tracker: ConflictTracker::new(),
            explored: HashMap::new(),
            errors: Vec::new(),
            global_direct,
            global_transitive,
            global_restrictions,
            package_filter,
            try_relaxed: false,
        };

        let result = Self::run_with_retry(&mut search, &root_requirements).await;

        // cleanup runs unconditionally; it cannot fail, and queue errors
        // surfacing through pending handles are already accounted for
        session.shutdown();
        cancel.cancel();

        let outcome = result?;
        for error in &search.errors {
            warn!(%error, "non-fatal error during resolution");
        }

        Ok(Resolution {
            outcome,
            errors: search.errors,
        })
    }

    async fn run_with_retry(
        search: &mut Search,
        roots: &[PackageRequirement],
    ) -> NougatResult<Outcome> {
        let strict = search.run(roots, false).await?;

        match &strict {
            Outcome::Conflict(info) if info.try_relaxed => {
                debug!("strict resolution failed on prerelease admission, retrying relaxed");
                search.tracker.clear();
                search.try_relaxed = false;
                search.run(roots, true).await
            }
            _ => Ok(strict),
        }
    }
}

/// Per-trial flags of one decision level
#[derive(Debug, Clone, Copy, Default)]
struct StepFlags {
    ready: bool,
    use_unlisted: bool,
    has_unlisted: bool,
    first_trial: bool,
    unlisted_search: bool,
}

/// One decision level: the step it works on, the requirement being
/// answered, and the candidate versions still to try
#[derive(Debug)]
struct Level {
    step: ResolverStep,
    requirement: PackageRequirement,
    all_versions: Vec<VersionCache>,
    remaining: VecDeque<VersionCache>,
    listed_versions: Vec<SemVer>,
    global_override: bool,
    flags: StepFlags,
    conflicts: BTreeSet<PackageRequirement>,
}

enum Stage {
    Step(ResolverStep),
    Outer,
    Inner,
}

/// Mutable search state shared across decision levels
struct Search {
    session: Arc<OracleSession>,
    tracker: ConflictTracker,
    explored: HashMap<(PackageName, SemVer), ResolvedPackage>,
    errors: Vec<NougatError>,
    global_direct: Option<ResolverStrategy>,
    global_transitive: Option<ResolverStrategy>,
    global_restrictions: FrameworkRestrictions,
    package_filter: Option<PackageFilter>,
    try_relaxed: bool,
}

impl Search {
    /// The main Step/Outer/Inner loop
    async fn run(&mut self, roots: &[PackageRequirement], relax: bool) -> NougatResult<Outcome> {
        let mut stack: Vec<Level> = Vec::new();
        let mut current: Option<Level> = None;
        let mut stage = Stage::Step(ResolverStep::initial(relax, roots));
        let mut final_conflict: Option<ConflictInfo> = None;

        loop {
            stage = match stage {
                Stage::Step(step) => {
                    if step.open_requirements.is_empty() {
                        return Ok(Outcome::Resolved(cleanup_names(step.current_resolution)));
                    }

                    let requirement = match conflicts::get_current_requirement(
                        self.package_filter.as_ref(),
                        &step.open_requirements,
                        &self.tracker,
                    ) {
                        Some(req) => req.clone(),
                        None => {
                            return Err(NougatError::InvariantViolation {
                                message: "open requirements vanished mid-step".to_string(),
                            })
                        }
                    };

                    let replayed = self.tracker.get_conflicts(
                        &step.open_requirements,
                        &step.closed_requirements,
                        &step.filtered_versions,
                        &requirement,
                    );

                    if !replayed.is_empty() {
                        // a remembered dead end replays: short-circuit back
                        trace!(package = %requirement.name, "replaying known conflict");
                        if final_conflict.is_none() {
                            final_conflict =
                                Some(self.conflict_info(&step, &replayed, &requirement, Vec::new()));
                        }
                        match fuse_conflicts(&mut stack, &replayed) {
                            Some(level) => {
                                current = Some(level);
                                Stage::Inner
                            }
                            None => {
                                let info = final_conflict.take().ok_or_else(missing_level)?;
                                return Ok(Outcome::Conflict(Box::new(info)));
                            }
                        }
                    } else {
                        let (selection, listed_versions) = self.select(&step, &requirement).await?;
                        current = Some(Level {
                            remaining: selection.versions.iter().cloned().collect(),
                            all_versions: selection.versions,
                            listed_versions,
                            global_override: selection.global_override,
                            step,
                            requirement,
                            flags: StepFlags::default(),
                            conflicts: BTreeSet::new(),
                        });
                        Stage::Outer
                    }
                }

                Stage::Outer => {
                    let level = current.as_mut().ok_or_else(missing_level)?;
                    if level.flags.ready {
                        // this level is exhausted: remember the conflict and
                        // jump back to the nearest involved decision
                        let mut conflict_set = level.conflicts.clone();
                        conflict_set.insert(level.requirement.clone());

                        self.tracker.boost_conflicts(
                            &level.step.filtered_versions,
                            &level.requirement,
                            &conflict_set,
                        );

                        if final_conflict.is_none() {
                            final_conflict = Some(self.conflict_info(
                                &level.step,
                                &conflict_set,
                                &level.requirement,
                                level.listed_versions.clone(),
                            ));
                        }

                        match fuse_conflicts(&mut stack, &conflict_set) {
                            Some(level) => {
                                current = Some(level);
                                Stage::Inner
                            }
                            None => {
                                let info = final_conflict.take().ok_or_else(missing_level)?;
                                return Ok(Outcome::Conflict(Box::new(info)));
                            }
                        }
                    } else {
                        level.flags = StepFlags {
                            ready: true,
                            first_trial: true,
                            ..StepFlags::default()
                        };
                        level.remaining = level.all_versions.iter().cloned().collect();
                        Stage::Inner
                    }
                }

                Stage::Inner => {
                    let level = current.as_mut().ok_or_else(missing_level)?;

                    let keep_looping = !level.remaining.is_empty()
                        && (level.flags.first_trial || level.conflicts.is_empty());

                    if !keep_looping {
                        if level.flags.has_unlisted
                            && !level.flags.use_unlisted
                            && !level.flags.unlisted_search
                        {
                            // second pass admitting unlisted candidates
                            level.flags.use_unlisted = true;
                            level.flags.unlisted_search = true;
                            level.remaining = level.all_versions.iter().cloned().collect();
                            Stage::Inner
                        } else {
                            Stage::Outer
                        }
                    } else {
                        level.flags.first_trial = false;
                        match level.remaining.pop_front() {
                            None => Stage::Inner,
                            Some(cache) => {
                                match self.explore(&level.requirement, &cache).await? {
                                    None => {
                                        // exploration error was captured;
                                        // reject the candidate and move on
                                        Stage::Inner
                                    }
                                    Some(resolved) => {
                                        if resolved.unlisted && !level.flags.use_unlisted {
                                            if !level.flags.has_unlisted {
                                                trace!(
                                                    package = %resolved.name,
                                                    version = %resolved.version,
                                                    "skipping unlisted candidate"
                                                );
                                            }
                                            level.flags.has_unlisted = true;
                                            Stage::Inner
                                        } else if let Some(incompatible) =
                                            self.first_incompatibility(&level.step, &resolved)
                                        {
                                            let conflicting = requirement_from_dependency(
                                                &incompatible,
                                                &resolved,
                                                &level.requirement,
                                            );
                                            level.conflicts.insert(level.requirement.clone());
                                            level.conflicts.insert(conflicting);
                                            Stage::Inner
                                        } else {
                                            let next = self.accept(level, &cache, resolved)?;
                                            final_conflict = None;
                                            stack.push(current.take().ok_or_else(missing_level)?);
                                            Stage::Step(next)
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            };
        }
    }

    /// Build the next step after accepting a candidate version
    fn accept(
        &mut self,
        level: &Level,
        cache: &VersionCache,
        resolved: ResolvedPackage,
    ) -> NougatResult<ResolverStep> {
        let mut next = level.step.clone();
        next.filtered_versions.insert(
            level.requirement.name.clone(),
            (vec![cache.clone()], level.global_override),
        );
        next.current_resolution
            .insert(resolved.name.clone(), resolved.clone());
        next.closed_requirements.insert(level.requirement.clone());
        next.open_requirements = calc_open_requirements(
            &resolved,
            &self.global_restrictions,
            &level.requirement,
            &level.step.open_requirements,
            &level.step.closed_requirements,
        );

        if next.open_requirements == level.step.open_requirements {
            return Err(NougatError::InvariantViolation {
                message: format!(
                    "open requirements did not change after resolving {} {}",
                    resolved.name, resolved.version
                ),
            });
        }

        Ok(next)
    }

    /// Candidate selection for a requirement, fetching the version listing
    /// when this is the first visit of the name
    async fn select(
        &mut self,
        step: &ResolverStep,
        requirement: &PackageRequirement,
    ) -> NougatResult<(CandidateSelection, Vec<SemVer>)> {
        let same_name: Vec<&PackageRequirement> = step
            .open_requirements
            .iter()
            .filter(|req| req.name == requirement.name)
            .collect();

        let prior = step.filtered_versions.get(&requirement.name);

        let (listed, listed_versions) = match prior {
            Some((versions, _)) => (
                Vec::new(),
                versions.iter().map(|c| c.version.clone()).collect(),
            ),
            None => {
                let strategy = resolver_strategy_for(
                    requirement,
                    &same_name,
                    self.global_direct,
                    self.global_transitive,
                );
                let listing = self
                    .session
                    .versions_blocking(&requirement.sources, &requirement.name)
                    .await?;
                let preferred = self.session.preferred_versions(
                    strategy,
                    &requirement.sources,
                    &requirement.name,
                );
                let ordered = order_candidates(strategy, listing, &preferred);
                let versions = ordered.iter().map(|c| c.version.clone()).collect();
                (ordered, versions)
            }
        };

        let selection = select_candidates(requirement, &same_name, prior, &listed, step.relax);
        if selection.try_relaxed {
            self.try_relaxed = true;
        }

        Ok((selection, listed_versions))
    }

    /// Fetch (or recall) the resolved record for one candidate version.
    ///
    /// Source failures are captured into the error list and reject the
    /// candidate instead of poisoning the search; timeouts stay fatal.
    async fn explore(
        &mut self,
        requirement: &PackageRequirement,
        cache: &VersionCache,
    ) -> NougatResult<Option<ResolvedPackage>> {
        let key = (requirement.name.clone(), cache.version.clone());
        if let Some(found) = self.explored.get(&key) {
            return Ok(Some(found.clone()));
        }

        let details = match self
            .session
            .details_blocking(&cache.sources, &requirement.name, &cache.version)
            .await
        {
            Ok(details) => details,
            Err(error) if error.is_recoverable() => {
                debug!(
                    package = %requirement.name,
                    version = %cache.version,
                    %error,
                    "exploration failed, rejecting candidate"
                );
                self.errors.push(error);
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        self.session
            .prefetch_dependencies(&requirement.sources, &details);

        let restrictions = requirement
            .settings
            .framework_restrictions
            .restrictions()
            .and(&self.global_restrictions);
        let dependencies = filter_by_restrictions(&restrictions, &details.direct_dependencies);

        let resolved = ResolvedPackage {
            name: details.name.clone(),
            version: cache.version.clone(),
            dependencies,
            unlisted: details.unlisted,
            is_runtime_dependency: false,
            is_cli_tool: requirement.is_cli_tool,
            settings: InstallSettings::with_restrictions(FrameworkRestrictionsMode::Explicit(
                restrictions,
            )),
            source: details.source,
        };

        self.explored.insert(key, resolved.clone());
        Ok(Some(resolved))
    }

    /// Check the freshly explored package's dependencies against every
    /// package already pinned on this path; names under a global override
    /// are exempt from matching
    fn first_incompatibility(
        &self,
        step: &ResolverStep,
        resolved: &ResolvedPackage,
    ) -> Option<Dependency> {
        for package in step.current_resolution.values() {
            let overridden = step
                .filtered_versions
                .get(&package.name)
                .map(|(_, global_override)| *global_override)
                .unwrap_or(false);
            if overridden {
                continue;
            }

            if let Some(dependency) = find_first_incompatibility(
                &step.open_requirements,
                &step.closed_requirements,
                &resolved.dependencies,
                package,
            ) {
                return Some(dependency.clone());
            }
        }
        None
    }

    fn conflict_info(
        &self,
        step: &ResolverStep,
        conflict_set: &BTreeSet<PackageRequirement>,
        requirement: &PackageRequirement,
        listed_versions: Vec<SemVer>,
    ) -> ConflictInfo {
        // fall back to the step's candidate list when the dead end was hit
        // before a fresh listing happened
        let available_versions = if listed_versions.is_empty() {
            step.filtered_versions
                .get(&requirement.name)
                .map(|(versions, _)| versions.iter().map(|c| c.version.clone()).collect())
                .unwrap_or_default()
        } else {
            listed_versions
        };

        ConflictInfo {
            step: step.clone(),
            requirement_set: conflict_set.clone(),
            requirement: requirement.clone(),
            available_versions,
            try_relaxed: self.try_relaxed,
        }
    }
}

fn missing_level() -> NougatError {
    NougatError::InvariantViolation {
        message: "stage entered without a current decision level".to_string(),
    }
}

/// Jump back to the nearest prior decision involved in the conflict: pop
/// levels until one whose requirement name lies in the union of the
/// conflicting names and their ancestor names
fn fuse_conflicts(
    stack: &mut Vec<Level>,
    conflict_set: &BTreeSet<PackageRequirement>,
) -> Option<Level> {
    let names: BTreeSet<&PackageName> = conflict_set
        .iter()
        .flat_map(|req| {
            std::iter::once(&req.name).chain(req.graph.iter().map(|ancestor| &ancestor.name))
        })
        .collect();

    while let Some(level) = stack.pop() {
        if names.contains(&level.requirement.name) {
            return Some(level);
        }
    }

    None
}

/// The requirement a conflicting dependency edge would have become; used
/// to scope the conflict for fusion and reporting
fn requirement_from_dependency(
    dependency: &Dependency,
    explored: &ResolvedPackage,
    current: &PackageRequirement,
) -> PackageRequirement {
    let mut graph = current.graph.clone();
    graph.insert(current.clone());

    PackageRequirement {
        name: dependency.name.clone(),
        version_requirement: dependency.requirement.clone(),
        resolver_strategy_for_direct: current.resolver_strategy_for_direct,
        resolver_strategy_for_transitives: current.resolver_strategy_for_transitives,
        parent: Parent::Package {
            name: explored.name.clone(),
            version: explored.version.clone(),
            source: explored.source.clone(),
        },
        graph,
        sources: current.sources.clone(),
        settings: InstallSettings::with_restrictions(FrameworkRestrictionsMode::Explicit(
            dependency.restrictions.clone(),
        )),
        transitive_prereleases: current.transitive_prereleases,
        is_cli_tool: false,
    }
}
