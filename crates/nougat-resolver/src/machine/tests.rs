//! Resolver scenarios driven through an in-memory oracle.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use nougat_core::{
    Dependency, FrameworkRestrictions, GroupName, NougatResult, PackageDetails, PackageName,
    PackageRequirement, PackageSource, PreReleaseStatus, ResolverStrategy, SemVer, VersionRange,
    VersionRequirement,
};

use crate::machine::{cleanup_names, Resolution, Resolver, ResolverConfig, UpdateMode};
use crate::oracle::{PackageOracle, VersionListing};

/// Feed double serving a fixed package universe
#[derive(Debug, Clone, Default)]
struct InMemoryOracle {
    versions: HashMap<PackageName, Vec<SemVer>>,
    dependencies: HashMap<(PackageName, SemVer), Vec<Dependency>>,
    unlisted: HashSet<(PackageName, SemVer)>,
}

impl InMemoryOracle {
    fn new() -> Self {
        Self::default()
    }

    /// Register a version with its dependencies
    fn with(mut self, name: &str, version: &str, deps: &[(&str, VersionRequirement)]) -> Self {
        let version = semver(version);
        let package = PackageName::new(name);
        self.versions
            .entry(package.clone())
            .or_default()
            .push(version.clone());
        self.dependencies.insert(
            (package, version),
            deps.iter()
                .map(|(dep, req)| Dependency::new(dep, req.clone()))
                .collect(),
        );
        self
    }

    /// Register a version the feed reports but refuses to give details for
    fn with_broken(mut self, name: &str, version: &str) -> Self {
        self.versions
            .entry(PackageName::new(name))
            .or_default()
            .push(semver(version));
        self
    }

    fn mark_unlisted(mut self, name: &str, version: &str) -> Self {
        self.unlisted
            .insert((PackageName::new(name), semver(version)));
        self
    }
}

#[async_trait]
impl PackageOracle for InMemoryOracle {
    async fn get_versions(
        &self,
        sources: &[PackageSource],
        _group: &GroupName,
        name: &PackageName,
    ) -> NougatResult<VersionListing> {
        Ok(self
            .versions
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .map(|v| (v.clone(), sources.to_vec()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get_preferred_versions(
        &self,
        _strategy: ResolverStrategy,
        _sources: &[PackageSource],
        _group: &GroupName,
        _name: &PackageName,
    ) -> VersionListing {
        Vec::new()
    }

    async fn get_package_details(
        &self,
        sources: &[PackageSource],
        _group: &GroupName,
        name: &PackageName,
        version: &SemVer,
    ) -> NougatResult<PackageDetails> {
        let key = (name.clone(), version.clone());
        let dependencies = self.dependencies.get(&key).cloned().ok_or_else(|| {
            nougat_core::NougatError::details_unavailable(
                name.to_string(),
                version.to_string(),
                "version is not served by this feed",
            )
        })?;

        // the registry reports the canonical casing it has on record
        let canonical = self
            .versions
            .get_key_value(name)
            .map(|(stored, _)| stored.clone())
            .unwrap_or_else(|| name.clone());

        Ok(PackageDetails {
            name: canonical,
            source: sources
                .first()
                .cloned()
                .unwrap_or_else(PackageSource::nuget_org),
            download_link: format!("https://example.org/{}/{}", name, version),
            license_url: None,
            unlisted: self.unlisted.contains(&key),
            direct_dependencies: dependencies,
        })
    }
}

fn semver(s: &str) -> SemVer {
    SemVer::from_str(s).unwrap()
}

fn at_least(v: &str) -> VersionRequirement {
    VersionRequirement::minimum(semver(v))
}

fn less_than(v: &str) -> VersionRequirement {
    VersionRequirement::new(VersionRange::LessThan(semver(v)), PreReleaseStatus::No)
}

fn exactly(v: &str) -> VersionRequirement {
    VersionRequirement::specific(semver(v))
}

fn any() -> VersionRequirement {
    VersionRequirement::all_releases()
}

fn root(name: &str, requirement: VersionRequirement) -> PackageRequirement {
    PackageRequirement::root(name, requirement)
}

fn test_config() -> ResolverConfig {
    ResolverConfig {
        worker_count: 2,
        task_timeout: Duration::from_secs(5),
    }
}

fn resolve(oracle: InMemoryOracle, roots: Vec<PackageRequirement>) -> Resolution {
    resolve_with_strategy(oracle, roots, None, None)
}

fn resolve_with_strategy(
    oracle: InMemoryOracle,
    roots: Vec<PackageRequirement>,
    direct: Option<ResolverStrategy>,
    transitive: Option<ResolverStrategy>,
) -> Resolution {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let resolver = Resolver::with_config(Arc::new(oracle), test_config());
        resolver
            .resolve(
                GroupName::main(),
                direct,
                transitive,
                FrameworkRestrictions::NoRestriction,
                roots,
                UpdateMode::Install,
            )
            .await
            .unwrap()
    })
}

fn resolved_version(resolution: &Resolution, name: &str) -> SemVer {
    resolution
        .packages()
        .unwrap_or_else(|| {
            panic!(
                "expected a successful resolution, got conflict:\n{}",
                resolution.conflict().map(|c| c.report()).unwrap_or_default()
            )
        })
        .get(&PackageName::new(name))
        .unwrap_or_else(|| panic!("package {} missing from resolution", name))
        .version
        .clone()
}

#[test]
fn test_trivial_resolution_picks_highest() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .with("A", "1.1.0", &[]);

    let resolution = resolve(oracle, vec![root("A", at_least("1.0.0"))]);

    assert!(resolution.is_ok());
    assert_eq!(resolved_version(&resolution, "A"), semver("1.1.0"));
    assert!(resolution.errors().is_empty());
}

#[test]
fn test_min_strategy_picks_lowest() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .with("A", "1.1.0", &[]);

    let resolution = resolve_with_strategy(
        oracle,
        vec![root("A", at_least("1.0.0"))],
        Some(ResolverStrategy::Min),
        Some(ResolverStrategy::Min),
    );

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
}

#[test]
fn test_transitive_pin() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[("B", at_least("1.0.0"))])
        .with("A", "2.0.0", &[("B", at_least("1.0.0"))])
        .with("B", "1.0.0", &[])
        .with("B", "2.0.0", &[]);

    let resolution = resolve(
        oracle,
        vec![root("A", at_least("1.0.0")), root("B", exactly("2.0.0"))],
    );

    assert_eq!(resolved_version(&resolution, "A"), semver("2.0.0"));
    assert_eq!(resolved_version(&resolution, "B"), semver("2.0.0"));
}

#[test]
fn test_conflict_names_the_contested_package() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[("C", at_least("2.0.0"))])
        .with("B", "1.0.0", &[("C", less_than("2.0.0"))])
        .with("C", "1.0.0", &[])
        .with("C", "2.0.0", &[]);

    let resolution = resolve(
        oracle,
        vec![root("A", exactly("1.0.0")), root("B", exactly("1.0.0"))],
    );

    assert!(!resolution.is_ok());
    let conflict = resolution.conflict().unwrap();
    assert_eq!(conflict.requirement.name, PackageName::new("C"));

    let report = conflict.report();
    assert!(report.contains("Could not resolve package C"));
    assert!(report.contains(">= 2.0.0"));
    assert!(report.contains("< 2.0.0"));
}

#[test]
fn test_conflict_with_no_versions_available() {
    let oracle = InMemoryOracle::new().with("B", "1.0.0", &[]);

    let resolution = resolve(oracle, vec![root("A", at_least("1.0.0"))]);

    assert!(!resolution.is_ok());
    let report = resolution.conflict().unwrap().report();
    assert!(report.contains("Could not resolve package A"));
    assert!(report.contains("No versions available."));
}

#[test]
fn test_prerelease_only_package_resolves() {
    let oracle = InMemoryOracle::new().with("A", "1.0.0-beta", &[]);

    let resolution = resolve(oracle, vec![root("A", any())]);

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0-beta"));
}

#[test]
fn test_transitive_prerelease_window() {
    // A's prerelease opens the window for B's prerelease-only versions
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0-rc", &[("B", at_least("1.0.0"))])
        .with("B", "2.0.0-beta", &[]);

    let mut a = root("A", VersionRequirement::no_restriction());
    a.transitive_prereleases = true;

    let resolution = resolve(oracle, vec![a]);

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0-rc"));
    assert_eq!(resolved_version(&resolution, "B"), semver("2.0.0-beta"));
}

#[test]
fn test_backtracking_over_multiple_levels() {
    // the Max-first choice A@2 pins C@1, which B@2 cannot live with; the
    // search must back out of A entirely
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[("C", at_least("2.0.0"))])
        .with("A", "2.0.0", &[("C", exactly("1.0.0"))])
        .with("B", "2.0.0", &[("C", at_least("2.0.0"))])
        .with("C", "1.0.0", &[])
        .with("C", "2.0.0", &[]);

    let resolution = resolve(
        oracle,
        vec![root("A", at_least("1.0.0")), root("B", at_least("1.0.0"))],
    );

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
    assert_eq!(resolved_version(&resolution, "B"), semver("2.0.0"));
    assert_eq!(resolved_version(&resolution, "C"), semver("2.0.0"));
}

#[test]
fn test_unlisted_versions_admitted_on_second_pass() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .mark_unlisted("A", "1.0.0");

    let resolution = resolve(oracle, vec![root("A", any())]);

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
    let packages = resolution.packages().unwrap();
    assert!(packages.get(&PackageName::new("A")).unwrap().unlisted);
}

#[test]
fn test_listed_version_preferred_over_unlisted() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .with("A", "2.0.0", &[])
        .mark_unlisted("A", "2.0.0");

    let resolution = resolve(oracle, vec![root("A", any())]);

    // 2.0.0 is skipped in the strict pass and 1.0.0 still matches
    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
}

#[test]
fn test_global_override_silences_downstream_constraints() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .with("A", "2.0.0", &[])
        .with("B", "1.0.0", &[("A", at_least("2.0.0"))]);

    let resolution = resolve(
        oracle,
        vec![
            root("A", VersionRequirement::override_all(semver("1.0.0"))),
            root("B", at_least("1.0.0")),
        ],
    );

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
    assert_eq!(resolved_version(&resolution, "B"), semver("1.0.0"));
}

#[test]
fn test_pinned_version_missing_from_feed_is_assumed() {
    let oracle = InMemoryOracle::new().with("A", "1.0.0", &[]);

    // 3.0.0 is not listed anywhere; the pin synthesizes it and the details
    // fetch fails, which the search captures as a non-fatal error
    let resolution = resolve(oracle, vec![root("A", exactly("3.0.0"))]);

    assert!(!resolution.is_ok());
    assert!(!resolution.errors().is_empty());
}

#[test]
fn test_cyclic_dependencies_terminate() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[("B", at_least("1.0.0"))])
        .with("B", "1.0.0", &[("A", at_least("1.0.0"))]);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let resolution = rt.block_on(async {
        let resolver = Resolver::with_config(Arc::new(oracle), test_config());
        tokio::time::timeout(
            Duration::from_secs(10),
            resolver.resolve(
                GroupName::main(),
                None,
                None,
                FrameworkRestrictions::NoRestriction,
                vec![root("A", at_least("1.0.0"))],
                UpdateMode::Install,
            ),
        )
        .await
        .expect("cyclic graph must terminate")
        .unwrap()
    });

    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
    assert_eq!(resolved_version(&resolution, "B"), semver("1.0.0"));
}

#[test]
fn test_self_dependency_terminates() {
    let oracle = InMemoryOracle::new().with("A", "1.0.0", &[("A", at_least("0.5.0"))]);

    let resolution = resolve(oracle, vec![root("A", at_least("1.0.0"))]);
    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
}

#[test]
fn test_broken_version_is_rejected_not_fatal() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .with_broken("A", "2.0.0");

    let resolution = resolve(oracle, vec![root("A", at_least("1.0.0"))]);

    // 2.0.0 is tried first, fails, and 1.0.0 wins with a recorded warning
    assert_eq!(resolved_version(&resolution, "A"), semver("1.0.0"));
    assert_eq!(resolution.errors().len(), 1);
}

#[test]
fn test_dependency_names_take_registry_casing() {
    let oracle = InMemoryOracle::new()
        .with("NUnit", "3.0.0", &[])
        .with("A", "1.0.0", &[("nunit", at_least("1.0.0"))]);

    let resolution = resolve(oracle, vec![root("a", at_least("1.0.0"))]);

    let packages = resolution.packages().unwrap();
    let a = packages.get(&PackageName::new("A")).unwrap();
    assert_eq!(a.dependencies[0].name.as_str(), "NUnit");
    assert!(packages.contains_key(&PackageName::new("nUnIt")));
}

#[test]
fn test_two_runs_agree() {
    let build = || {
        InMemoryOracle::new()
            .with("A", "1.0.0", &[("C", at_least("1.0.0"))])
            .with("A", "2.0.0", &[("C", at_least("1.5.0"))])
            .with("B", "1.0.0", &[("C", less_than("2.0.0"))])
            .with("C", "1.0.0", &[])
            .with("C", "1.8.0", &[])
            .with("C", "2.1.0", &[])
    };
    let roots = || vec![root("A", at_least("1.0.0")), root("B", at_least("1.0.0"))];

    let first = resolve(build(), roots());
    let second = resolve(build(), roots());

    assert_eq!(first.packages(), second.packages());
}

#[test]
fn test_update_filtered_mode_resolves() {
    let oracle = InMemoryOracle::new()
        .with("A", "1.0.0", &[])
        .with("B", "1.0.0", &[]);

    let rt = tokio::runtime::Runtime::new().unwrap();
    let resolution = rt.block_on(async {
        let resolver = Resolver::with_config(Arc::new(oracle), test_config());
        resolver
            .resolve(
                GroupName::main(),
                None,
                None,
                FrameworkRestrictions::NoRestriction,
                vec![root("A", any()), root("B", any())],
                UpdateMode::UpdateFiltered(GroupName::main(), crate::machine::PackageFilter::exact("B")),
            )
            .await
            .unwrap()
    });

    assert!(resolution.is_ok());
    assert_eq!(resolution.packages().unwrap().len(), 2);
}

#[test]
fn test_cleanup_names_is_idempotent() {
    let oracle = InMemoryOracle::new()
        .with("Alpha", "1.0.0", &[])
        .with("Beta", "1.0.0", &[("ALPHA", at_least("1.0.0"))]);

    let resolution = resolve(oracle, vec![root("beta", any()), root("alpha", any())]);
    let packages = resolution.packages().unwrap().clone();

    let once = cleanup_names(packages.clone());
    let twice = cleanup_names(once.clone());
    assert_eq!(once, twice);
    assert_eq!(packages, once);
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    /// A small random universe: names from a fixed pool, versions with
    /// random dependency edges pointing at other pooled names
    fn arb_universe() -> impl Strategy<Value = (InMemoryOracle, Vec<PackageRequirement>)> {
        let names = ["pa", "pb", "pc", "pd"];

        // per package: up to three versions, each with up to two edges
        prop::collection::vec(
            (
                0usize..names.len(),
                1u64..4,
                prop::collection::vec((0usize..names.len(), 1u64..3), 0..3),
            ),
            1..10,
        )
        .prop_map(move |entries| {
            let mut oracle = InMemoryOracle::new();
            let mut seen = HashSet::new();

            for (name_index, major, edges) in entries {
                let name = names[name_index];
                let version = format!("{}.0.0", major);
                if !seen.insert((name_index, major)) {
                    continue;
                }

                let deps: Vec<(&str, VersionRequirement)> = edges
                    .into_iter()
                    .filter(|(target, _)| *target != name_index)
                    .map(|(target, min)| {
                        (names[target], at_least(&format!("{}.0.0", min)))
                    })
                    .collect();

                oracle = oracle.with(name, &version, &deps);
            }

            // roots ask for every name that has at least one version
            let roots = oracle
                .versions
                .keys()
                .map(|name| root(name.as_str(), at_least("1.0.0")))
                .collect();

            (oracle, roots)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        // Properties: uniqueness by construction of the map, closure of
        // dependencies, and soundness of every recorded requirement
        #[test]
        fn resolutions_are_sound_and_closed((oracle, roots) in arb_universe()) {
            let resolution = resolve(oracle, roots.clone());

            if let Some(packages) = resolution.packages() {
                // every root requirement is answered in range
                for requirement in &roots {
                    let package = packages.get(&requirement.name);
                    prop_assert!(package.is_some(), "root {} unresolved", requirement.name);
                    prop_assert!(requirement
                        .version_requirement
                        .in_range(&package.unwrap().version, false));
                }

                // closure and soundness over the recorded dependency edges
                for package in packages.values() {
                    for dependency in &package.dependencies {
                        let target = packages.get(&dependency.name);
                        prop_assert!(
                            target.is_some(),
                            "dependency {} of {} missing from resolution",
                            dependency.name,
                            package.name
                        );
                        prop_assert!(
                            dependency.requirement.in_range(&target.unwrap().version, true),
                            "dependency {} {} not satisfied by {}",
                            dependency.name,
                            dependency.requirement,
                            target.unwrap().version
                        );
                    }
                }
            }
        }

        // Property: identical inputs resolve identically
        #[test]
        fn resolution_is_deterministic((oracle, roots) in arb_universe()) {
            let first = resolve(oracle.clone(), roots.clone());
            let second = resolve(oracle, roots);

            prop_assert_eq!(first.packages(), second.packages());
            prop_assert_eq!(first.is_ok(), second.is_ok());
        }

        // Property: rewriting dependency names to their resolved casing is
        // idempotent, whatever casing the declarations used
        #[test]
        fn cleanup_names_is_idempotent_for_any_casing(
            entries in prop::collection::vec(("[a-zA-Z]{2,8}", 1u64..9), 1..6),
        ) {
            use std::collections::BTreeMap;
            use nougat_core::{InstallSettings, ResolvedPackage};

            let mut resolution = BTreeMap::new();
            let names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();

            for (index, (name, major)) in entries.iter().enumerate() {
                // each package depends on the next name, declared in
                // uppercase regardless of the registered casing
                let dep_name = names[(index + 1) % names.len()].to_uppercase();
                let package = ResolvedPackage {
                    name: PackageName::new(name),
                    version: SemVer::new(*major, 0, 0),
                    dependencies: vec![Dependency::new(&dep_name, at_least("1.0.0"))],
                    unlisted: false,
                    is_runtime_dependency: true,
                    is_cli_tool: false,
                    settings: InstallSettings::default(),
                    source: PackageSource::nuget_org(),
                };
                resolution.insert(package.name.clone(), package);
            }

            let once = cleanup_names(resolution);
            let twice = cleanup_names(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
