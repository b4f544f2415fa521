//! Dependency-set filtering under framework restrictions.

use std::collections::BTreeSet;

use nougat_core::{Dependency, FrameworkRestrictions, PackageRequirement, ResolvedPackage};

/// Keep the dependencies whose target frameworks overlap the effective
/// restriction.
///
/// Checking represented-framework overlap instead of canonicalizing the
/// combined restriction keeps the filter cheap while preserving
/// forward-non-compatibility matching.
pub fn filter_by_restrictions(
    restriction: &FrameworkRestrictions,
    dependencies: &[Dependency],
) -> Vec<Dependency> {
    if restriction.is_no_restriction() {
        return dependencies.to_vec();
    }

    dependencies
        .iter()
        .filter(|dep| restriction.intersects(&dep.restrictions))
        .cloned()
        .collect()
}

/// Find the first dependency of an exploration that an already-resolved
/// package fails to satisfy.
///
/// Prerelease admission follows the transitive-prerelease flags of the
/// requirements currently in scope for the resolved package's name.
pub fn find_first_incompatibility<'a>(
    open: &BTreeSet<PackageRequirement>,
    closed: &BTreeSet<PackageRequirement>,
    dependencies: &'a [Dependency],
    resolved: &ResolvedPackage,
) -> Option<&'a Dependency> {
    let allow_prereleases = open
        .iter()
        .chain(closed.iter())
        .any(|req| req.name == resolved.name && req.transitive_prereleases);

    dependencies
        .iter()
        .filter(|dep| dep.name == resolved.name)
        .find(|dep| {
            !dep.requirement
                .in_range(&resolved.version, allow_prereleases)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nougat_core::{
        InstallSettings, PackageName, PackageSource, SemVer, VersionRequirement,
    };

    fn resolved(name: &str, version: SemVer) -> ResolvedPackage {
        ResolvedPackage {
            name: PackageName::new(name),
            version,
            dependencies: Vec::new(),
            unlisted: false,
            is_runtime_dependency: true,
            is_cli_tool: false,
            settings: InstallSettings::default(),
            source: PackageSource::nuget_org(),
        }
    }

    #[test]
    fn test_no_restriction_keeps_everything() {
        let deps = vec![
            Dependency::new("A", VersionRequirement::all_releases()),
            Dependency::new("B", VersionRequirement::all_releases()).restricted_to(
                FrameworkRestrictions::restricted(["net48"]),
            ),
        ];

        let kept = filter_by_restrictions(&FrameworkRestrictions::NoRestriction, &deps);
        assert_eq!(kept, deps);
    }

    #[test]
    fn test_filter_drops_disjoint_frameworks() {
        let deps = vec![
            Dependency::new("A", VersionRequirement::all_releases()).restricted_to(
                FrameworkRestrictions::restricted(["net48"]),
            ),
            Dependency::new("B", VersionRequirement::all_releases()).restricted_to(
                FrameworkRestrictions::restricted(["net6.0"]),
            ),
            Dependency::new("C", VersionRequirement::all_releases()),
        ];

        let restriction = FrameworkRestrictions::restricted(["net6.0"]);
        let kept = filter_by_restrictions(&restriction, &deps);

        let names: Vec<&str> = kept.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_filter_result_is_subset() {
        let deps = vec![
            Dependency::new("A", VersionRequirement::all_releases()).restricted_to(
                FrameworkRestrictions::restricted(["netstandard2.0"]),
            ),
        ];

        let restriction = FrameworkRestrictions::restricted(["net48"]);
        let kept = filter_by_restrictions(&restriction, &deps);
        assert!(kept.iter().all(|d| deps.contains(d)));
    }

    #[test]
    fn test_incompatibility_detection() {
        let open = BTreeSet::new();
        let closed = BTreeSet::new();

        let deps = vec![
            Dependency::new("B", VersionRequirement::minimum(SemVer::new(1, 0, 0))),
            Dependency::new("A", VersionRequirement::minimum(SemVer::new(2, 0, 0))),
        ];

        let package = resolved("A", SemVer::new(1, 5, 0));
        let incompatible = find_first_incompatibility(&open, &closed, &deps, &package);

        assert_eq!(incompatible.map(|d| d.name.as_str()), Some("A"));

        let package = resolved("A", SemVer::new(2, 1, 0));
        assert!(find_first_incompatibility(&open, &closed, &deps, &package).is_none());
    }

    #[test]
    fn test_incompatibility_honours_transitive_prereleases() {
        let mut open = BTreeSet::new();
        let mut req = PackageRequirement::root(
            "A",
            VersionRequirement::minimum(SemVer::new(0, 0, 0)),
        );
        req.transitive_prereleases = true;
        open.insert(req);

        let closed = BTreeSet::new();
        let deps = vec![Dependency::new(
            "A",
            VersionRequirement::minimum(SemVer::new(1, 0, 0)),
        )];

        // 2.0.0-beta only fits when the in-scope requirement opens prereleases
        let package = resolved("A", SemVer::prerelease(2, 0, 0, "beta"));
        assert!(find_first_incompatibility(&open, &closed, &deps, &package).is_none());

        let open = BTreeSet::new();
        assert!(find_first_incompatibility(&open, &closed, &deps, &package).is_some());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use nougat_core::VersionRequirement;
    use proptest::prelude::*;

    fn arb_restriction() -> impl Strategy<Value = FrameworkRestrictions> {
        prop_oneof![
            Just(FrameworkRestrictions::NoRestriction),
            prop::collection::btree_set("net[4-8][0-9]?", 1..4).prop_map(|set| {
                FrameworkRestrictions::restricted(set.iter().map(|s| s.as_str()))
            }),
        ]
    }

    fn arb_deps() -> impl Strategy<Value = Vec<Dependency>> {
        prop::collection::vec(
            ("[a-z]{2,6}", arb_restriction()).prop_map(|(name, restriction)| {
                Dependency::new(&name, VersionRequirement::all_releases())
                    .restricted_to(restriction)
            }),
            0..6,
        )
    }

    proptest! {
        // Property: filtering with no restriction is the identity
        #[test]
        fn no_restriction_is_identity(deps in arb_deps()) {
            let kept = filter_by_restrictions(&FrameworkRestrictions::NoRestriction, &deps);
            prop_assert_eq!(kept, deps);
        }

        // Property: the result is a subset, and a dependency survives iff
        // its represented frameworks intersect the restriction's
        #[test]
        fn filter_keeps_exactly_the_intersecting(
            restriction in arb_restriction(),
            deps in arb_deps(),
        ) {
            let kept = filter_by_restrictions(&restriction, &deps);

            for dep in &kept {
                prop_assert!(deps.contains(dep));
            }
            for dep in &deps {
                let should_survive = restriction.intersects(&dep.restrictions);
                prop_assert_eq!(kept.contains(dep), should_survive);
            }
        }
    }
}
