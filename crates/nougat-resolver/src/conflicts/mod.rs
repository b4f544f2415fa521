//! Conflict memoization and requirement prioritization.
//!
//! Dead ends are remembered so the search never replays them, and names
//! that keep conflicting are boosted to the front of requirement selection
//! to front-load the most constrained decisions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;

use tracing::warn;

use nougat_core::{PackageName, PackageRequirement, ResolvedPackage, SemVer, VersionCache};

use crate::machine::PackageFilter;

/// A remembered dead end: a requirement set that cannot be satisfied, and
/// optionally the candidate list that was active when it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownConflict {
    pub requirements: BTreeSet<PackageRequirement>,
    pub selected: Option<(Vec<VersionCache>, bool)>,
}

/// Mutable conflict state accumulated across the whole search
#[derive(Debug)]
pub struct ConflictTracker {
    known_conflicts: Vec<KnownConflict>,
    conflict_history: HashMap<PackageName, usize>,
    last_warning: Instant,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self {
            known_conflicts: Vec::new(),
            conflict_history: HashMap::new(),
            last_warning: Instant::now(),
        }
    }

    /// Forget everything; used when the search restarts in relaxed mode
    pub fn clear(&mut self) {
        self.known_conflicts.clear();
        self.conflict_history.clear();
        self.last_warning = Instant::now();
    }

    /// Negative priority adjustment for names with conflict history
    pub fn boost(&self, name: &PackageName) -> i64 {
        self.conflict_history
            .get(name)
            .map(|count| -(*count as i64))
            .unwrap_or(0)
    }

    /// Check whether the current step replays a remembered dead end.
    ///
    /// Requirements whose graph passes through the current one are out of
    /// scope: the current decision can still change them.
    pub fn get_conflicts(
        &self,
        open: &BTreeSet<PackageRequirement>,
        closed: &BTreeSet<PackageRequirement>,
        filtered_versions: &HashMap<PackageName, (Vec<VersionCache>, bool)>,
        current: &PackageRequirement,
    ) -> BTreeSet<PackageRequirement> {
        let in_scope: BTreeSet<&PackageRequirement> = open
            .iter()
            .filter(|req| !req.graph.contains(current))
            .chain(closed.iter())
            .collect();

        let mut replayed = BTreeSet::new();
        for known in &self.known_conflicts {
            let applies = match &known.selected {
                None => true,
                Some(selected) => known
                    .requirements
                    .iter()
                    .next()
                    .and_then(|req| filtered_versions.get(&req.name))
                    .map(|active| active == selected)
                    .unwrap_or(false),
            };

            if applies && known.requirements.iter().all(|req| in_scope.contains(req)) {
                replayed.extend(known.requirements.iter().cloned());
            }
        }

        replayed
    }

    /// Record a fresh conflict and bump the history of the current name.
    ///
    /// Persistent re-conflicts surface a progress warning at most every
    /// ten seconds.
    pub fn boost_conflicts(
        &mut self,
        filtered_versions: &HashMap<PackageName, (Vec<VersionCache>, bool)>,
        current: &PackageRequirement,
        conflicts: &BTreeSet<PackageRequirement>,
    ) {
        *self.conflict_history.entry(current.name.clone()).or_insert(0) += 1;

        let selected = conflicts
            .iter()
            .next()
            .and_then(|req| filtered_versions.get(&req.name))
            .cloned();

        let known = KnownConflict {
            requirements: conflicts.clone(),
            selected,
        };

        let is_new = !self.known_conflicts.contains(&known);
        if is_new {
            self.known_conflicts.push(known);
        } else if self.last_warning.elapsed().as_secs() >= 10 {
            warn!(
                package = %current.name,
                "Resolving is taking longer than expected; still exploring alternatives"
            );
            self.last_warning = Instant::now();
        }
    }
}

impl Default for ConflictTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Pick the next requirement to work on.
///
/// The minimum of a composite ordering: update-filter matches first, then
/// global overrides and pins, root requirements, conflict boost,
/// shallowest depth, and finally the requirement's own total order.
pub fn get_current_requirement<'a>(
    package_filter: Option<&PackageFilter>,
    open: &'a BTreeSet<PackageRequirement>,
    tracker: &ConflictTracker,
) -> Option<&'a PackageRequirement> {
    open.iter().min_by_key(|req| {
        (
            !package_filter.map(|f| f.matches(&req.name)).unwrap_or(false),
            !req.version_requirement.is_global_override(),
            !req.version_requirement.is_specific(),
            !req.is_root(),
            tracker.boost(&req.name),
            req.depth(),
            *req,
        )
    })
}

/// Render the user-facing conflict report.
pub fn render_conflict_report(
    resolved: &BTreeMap<PackageName, ResolvedPackage>,
    conflicts: &BTreeSet<PackageRequirement>,
    triggering: &PackageRequirement,
    available_versions: &[SemVer],
) -> String {
    let mut report = String::from("There was a version conflict during package resolution.\n");

    if !resolved.is_empty() {
        report.push_str("  Resolved packages:\n");
        for package in resolved.values() {
            report.push_str(&format!("   - {} {}\n", package.name, package.version));
        }
    }

    report.push_str(&format!("  Could not resolve package {}:\n", triggering.name));

    let needs_prereleases = conflicts
        .iter()
        .any(|req| req.transitive_prereleases)
        || triggering.transitive_prereleases;

    let mut requested: Vec<&PackageRequirement> = conflicts.iter().collect();
    if !conflicts.contains(triggering) {
        requested.push(triggering);
    }
    for req in requested {
        if req.name != triggering.name {
            continue;
        }
        report.push_str(&format!(
            "   - {} requested: {}\n",
            req.parent, req.version_requirement
        ));
    }

    if needs_prereleases {
        report.push_str("   (the conflict requires prerelease versions)\n");
    }

    if available_versions.is_empty() {
        report.push_str("   No versions available.\n");
    } else {
        let listed: Vec<String> = available_versions.iter().map(|v| v.to_string()).collect();
        report.push_str(&format!("   Available versions: {}\n", listed.join(", ")));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use nougat_core::{PackageSource, VersionRequirement};

    fn req(name: &str, min: SemVer) -> PackageRequirement {
        PackageRequirement::root(name, VersionRequirement::minimum(min))
    }

    #[test]
    fn test_boost_counts_conflicts() {
        let mut tracker = ConflictTracker::new();
        let current = req("X", SemVer::new(1, 0, 0));
        let filtered = HashMap::new();

        let mut conflicts = BTreeSet::new();
        conflicts.insert(current.clone());

        assert_eq!(tracker.boost(&current.name), 0);

        tracker.boost_conflicts(&filtered, &current, &conflicts);
        tracker.boost_conflicts(&filtered, &current, &conflicts);
        tracker.boost_conflicts(&filtered, &current, &conflicts);

        assert_eq!(tracker.boost(&current.name), -3);
    }

    #[test]
    fn test_boosted_name_selected_first() {
        let mut tracker = ConflictTracker::new();
        let troubled = req("Xyz", SemVer::new(1, 0, 0));
        let calm = req("Abc", SemVer::new(1, 0, 0));

        let mut open = BTreeSet::new();
        open.insert(troubled.clone());
        open.insert(calm.clone());

        // name order picks Abc while no conflicts are recorded
        assert_eq!(
            get_current_requirement(None, &open, &tracker),
            Some(&calm)
        );

        let mut conflicts = BTreeSet::new();
        conflicts.insert(troubled.clone());
        for _ in 0..3 {
            tracker.boost_conflicts(&HashMap::new(), &troubled, &conflicts);
        }

        assert_eq!(
            get_current_requirement(None, &open, &tracker),
            Some(&troubled)
        );
    }

    #[test]
    fn test_pins_selected_before_ranges() {
        let tracker = ConflictTracker::new();
        let ranged = req("Abc", SemVer::new(1, 0, 0));
        let pinned = PackageRequirement::root(
            "Zzz",
            VersionRequirement::specific(SemVer::new(1, 0, 0)),
        );

        let mut open = BTreeSet::new();
        open.insert(ranged);
        open.insert(pinned.clone());

        assert_eq!(
            get_current_requirement(None, &open, &tracker),
            Some(&pinned)
        );
    }

    #[test]
    fn test_filter_match_wins() {
        let tracker = ConflictTracker::new();
        let a = req("Abc", SemVer::new(1, 0, 0));
        let b = req("Target", SemVer::new(1, 0, 0));

        let mut open = BTreeSet::new();
        open.insert(a);
        open.insert(b.clone());

        let filter = PackageFilter::exact("Target");
        assert_eq!(
            get_current_requirement(Some(&filter), &open, &tracker),
            Some(&b)
        );
    }

    #[test]
    fn test_replay_detection() {
        let mut tracker = ConflictTracker::new();

        let a = req("A", SemVer::new(2, 0, 0));
        let b = req("B", SemVer::new(1, 0, 0));
        let current = req("C", SemVer::new(1, 0, 0));

        let mut conflicts = BTreeSet::new();
        conflicts.insert(a.clone());
        conflicts.insert(b.clone());
        tracker.boost_conflicts(&HashMap::new(), &current, &conflicts);

        let mut open = BTreeSet::new();
        open.insert(a.clone());
        let mut closed = BTreeSet::new();
        closed.insert(b.clone());

        let replayed = tracker.get_conflicts(&open, &closed, &HashMap::new(), &current);
        assert_eq!(replayed, conflicts);

        // a missing member means the dead end cannot replay
        let open = BTreeSet::new();
        let replayed = tracker.get_conflicts(&open, &closed, &HashMap::new(), &current);
        assert!(replayed.is_empty());
    }

    #[test]
    fn test_replay_skips_requirements_scoped_under_current() {
        let mut tracker = ConflictTracker::new();

        let current = req("C", SemVer::new(1, 0, 0));
        let mut dependent = req("A", SemVer::new(2, 0, 0));
        dependent.graph.insert(current.clone());

        let mut conflicts = BTreeSet::new();
        conflicts.insert(dependent.clone());
        tracker.boost_conflicts(&HashMap::new(), &current, &conflicts);

        let mut open = BTreeSet::new();
        open.insert(dependent);

        // the dependent requirement descends from current, so the dead end
        // is not fixed yet and must not replay
        let replayed = tracker.get_conflicts(&open, &BTreeSet::new(), &HashMap::new(), &current);
        assert!(replayed.is_empty());
    }

    #[test]
    fn test_replay_respects_selected_versions() {
        let mut tracker = ConflictTracker::new();

        let a = req("A", SemVer::new(2, 0, 0));
        let current = req("C", SemVer::new(1, 0, 0));

        let cached = vec![VersionCache::reported(
            SemVer::new(2, 0, 0),
            vec![PackageSource::nuget_org()],
        )];
        let mut filtered = HashMap::new();
        filtered.insert(a.name.clone(), (cached.clone(), false));

        let mut conflicts = BTreeSet::new();
        conflicts.insert(a.clone());
        tracker.boost_conflicts(&filtered, &current, &conflicts);

        let mut open = BTreeSet::new();
        open.insert(a.clone());

        // same candidate list: replays
        let replayed = tracker.get_conflicts(&open, &BTreeSet::new(), &filtered, &current);
        assert_eq!(replayed.len(), 1);

        // different candidate list: stale dead end
        let mut other = HashMap::new();
        other.insert(
            a.name.clone(),
            (
                vec![VersionCache::reported(
                    SemVer::new(3, 0, 0),
                    vec![PackageSource::nuget_org()],
                )],
                false,
            ),
        );
        let replayed = tracker.get_conflicts(&open, &BTreeSet::new(), &other, &current);
        assert!(replayed.is_empty());
    }

    #[test]
    fn test_conflict_report_text() {
        let mut resolved = BTreeMap::new();
        let a = ResolvedPackage {
            name: PackageName::new("A"),
            version: SemVer::new(1, 0, 0),
            dependencies: Vec::new(),
            unlisted: false,
            is_runtime_dependency: true,
            is_cli_tool: false,
            settings: Default::default(),
            source: PackageSource::nuget_org(),
        };
        resolved.insert(a.name.clone(), a);

        let triggering = PackageRequirement::root(
            "C",
            VersionRequirement::minimum(SemVer::new(2, 0, 0)),
        );
        let mut conflicts = BTreeSet::new();
        conflicts.insert(triggering.clone());

        let report = render_conflict_report(
            &resolved,
            &conflicts,
            &triggering,
            &[SemVer::new(1, 0, 0), SemVer::new(1, 5, 0)],
        );

        assert!(report.contains("Could not resolve package C"));
        assert!(report.contains("A 1.0.0"));
        assert!(report.contains(">= 2.0.0"));
        assert!(report.contains("Available versions: 1.0.0, 1.5.0"));

        let report = render_conflict_report(&resolved, &conflicts, &triggering, &[]);
        assert!(report.contains("No versions available."));
    }
}
