//! Open-requirement frontier computation.
//!
//! After a package is explored, its declared dependencies are merged with
//! the residual frontier: duplicates are compressed, framework restrictions
//! are narrowed and propagated, and requirements already answered by the
//! current path are dropped.

use std::collections::BTreeSet;

use nougat_core::{
    Dependency, FrameworkRestrictions, FrameworkRestrictionsMode, InstallSettings,
    PackageRequirement, Parent, ResolvedPackage,
};

/// Compress duplicate dependency entries on the same name.
///
/// Entries sharing a prerelease policy merge their framework restrictions
/// by union and keep the wider version range; otherwise the later
/// occurrence wins.
fn compress_dependencies(dependencies: &[Dependency]) -> Vec<Dependency> {
    let mut compressed: Vec<Dependency> = Vec::with_capacity(dependencies.len());

    for dep in dependencies {
        match compressed.iter_mut().find(|d| d.name == dep.name) {
            None => compressed.push(dep.clone()),
            Some(existing) => {
                if existing.requirement.prereleases == dep.requirement.prereleases {
                    let merged_restrictions = existing.restrictions.or(&dep.restrictions);
                    let range = if existing.requirement.includes(&dep.requirement) {
                        existing.requirement.clone()
                    } else {
                        dep.requirement.clone()
                    };
                    existing.requirement = range;
                    existing.restrictions = merged_restrictions;
                } else {
                    *existing = dep.clone();
                }
            }
        }
    }

    compressed
}

/// Narrow a dependency edge's restriction by the explored package's own
/// restriction and the global one; an explicit no-restriction result falls
/// back to the package's restriction.
fn effective_restrictions(
    edge: &FrameworkRestrictions,
    package: &FrameworkRestrictions,
    global: &FrameworkRestrictions,
) -> FrameworkRestrictions {
    let combined = edge.and(package).and(global);
    if combined.is_no_restriction() {
        package.clone()
    } else {
        combined
    }
}

/// A closed requirement answers a new one when their restrictions are
/// identical and the closed range subsumes the new range
fn closed_subsumes(closed: &PackageRequirement, new_req: &PackageRequirement) -> bool {
    closed.name == new_req.name
        && closed.settings.framework_restrictions == new_req.settings.framework_restrictions
        && (closed.version_requirement == new_req.version_requirement
            || closed.version_requirement.includes(&new_req.version_requirement)
            || closed.version_requirement.is_global_override())
}

fn open_duplicates(open: &PackageRequirement, new_req: &PackageRequirement) -> bool {
    open.name == new_req.name
        && open.settings.framework_restrictions == new_req.settings.framework_restrictions
        && (open.version_requirement == new_req.version_requirement
            || open.version_requirement.is_global_override())
}

/// Compute the next open-requirement frontier after exploring a package.
///
/// `satisfied` is the requirement the exploration answered; the result is
/// the residual open set united with the explored package's surviving
/// dependencies.
pub fn calc_open_requirements(
    explored: &ResolvedPackage,
    global_restrictions: &FrameworkRestrictions,
    satisfied: &PackageRequirement,
    open: &BTreeSet<PackageRequirement>,
    closed: &BTreeSet<PackageRequirement>,
) -> BTreeSet<PackageRequirement> {
    let package_restrictions = explored.settings.framework_restrictions.restrictions();
    let explored_is_prerelease = explored.version.is_prerelease();

    let mut child_graph = satisfied.graph.clone();
    child_graph.insert(satisfied.clone());

    let new_requirements = compress_dependencies(&explored.dependencies)
        .into_iter()
        .map(|dep| {
            let restrictions = effective_restrictions(
                &dep.restrictions,
                &package_restrictions,
                global_restrictions,
            );

            PackageRequirement {
                name: dep.name,
                version_requirement: dep.requirement,
                resolver_strategy_for_direct: satisfied.resolver_strategy_for_direct,
                resolver_strategy_for_transitives: satisfied.resolver_strategy_for_transitives,
                parent: Parent::Package {
                    name: explored.name.clone(),
                    version: explored.version.clone(),
                    source: explored.source.clone(),
                },
                graph: child_graph.clone(),
                sources: satisfied.sources.clone(),
                settings: InstallSettings::with_restrictions(FrameworkRestrictionsMode::Explicit(
                    restrictions,
                )),
                transitive_prereleases: satisfied.transitive_prereleases && explored_is_prerelease,
                is_cli_tool: false,
            }
        })
        // the frontier never re-creates the requirement it came from
        .filter(|new_req| new_req != satisfied)
        .filter(|new_req| !closed.iter().any(|c| closed_subsumes(c, new_req)))
        .filter(|new_req| !open.iter().any(|o| open_duplicates(o, new_req)));

    let mut frontier: BTreeSet<PackageRequirement> = new_requirements.collect();
    for residual in open {
        if residual != satisfied {
            frontier.insert(residual.clone());
        }
    }

    frontier
}
