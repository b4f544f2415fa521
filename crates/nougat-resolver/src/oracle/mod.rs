//! The injected package oracle and its request plumbing.
//!
//! The resolver never performs I/O itself: version listings and package
//! details come from an injected [`PackageOracle`], executed on the work
//! queue. Requests are memoized in concurrent maps so concurrent
//! resolvers and the prefetch pipeline share one outstanding request per
//! key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use nougat_core::{
    GroupName, NougatError, NougatResult, PackageDetails, PackageName, PackageSource,
    ResolverStrategy, SemVer, VersionRequirement,
};

use crate::queue::{WorkHandle, WorkPriority, WorkQueue};

/// Environment variable overriding the blocking-wait timeout (milliseconds)
pub const TASK_TIMEOUT_ENV: &str = "PAKET_RESOLVER_TASK_TIMEOUT";

/// Default blocking-wait timeout
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Versions of a package together with the sources that reported them
pub type VersionListing = Vec<(SemVer, Vec<PackageSource>)>;

/// The remote interface the resolver consumes.
///
/// Implementations are expected to be pure from the resolver's view:
/// repeated calls with the same arguments return the same answer within
/// one resolution.
#[async_trait]
pub trait PackageOracle: Send + Sync {
    /// List the versions of a package across the given sources
    async fn get_versions(
        &self,
        sources: &[PackageSource],
        group: &GroupName,
        name: &PackageName,
    ) -> NougatResult<VersionListing>;

    /// Versions to try first (pinned, locked, last known good); always
    /// prepended to the strategy-sorted list
    fn get_preferred_versions(
        &self,
        strategy: ResolverStrategy,
        sources: &[PackageSource],
        group: &GroupName,
        name: &PackageName,
    ) -> VersionListing;

    /// The authoritative record for one version of a package
    async fn get_package_details(
        &self,
        sources: &[PackageSource],
        group: &GroupName,
        name: &PackageName,
        version: &SemVer,
    ) -> NougatResult<PackageDetails>;
}

type VersionsKey = (Vec<PackageSource>, PackageName);
type DetailsKey = (Vec<PackageSource>, PackageName, SemVer);

/// One resolver invocation's view of the oracle: the work queue, the
/// request memo tables, and the blocking-wait discipline
pub struct OracleSession {
    oracle: Arc<dyn PackageOracle>,
    queue: Arc<WorkQueue>,
    group: GroupName,
    timeout: Duration,
    versions_memo: DashMap<VersionsKey, WorkHandle<VersionListing>>,
    details_memo: DashMap<DetailsKey, WorkHandle<PackageDetails>>,
}

impl OracleSession {
    pub fn new(
        oracle: Arc<dyn PackageOracle>,
        queue: Arc<WorkQueue>,
        group: GroupName,
        timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            queue,
            group,
            timeout,
            versions_memo: DashMap::new(),
            details_memo: DashMap::new(),
        }
    }

    pub fn group(&self) -> &GroupName {
        &self.group
    }

    /// Preferred versions are local data; no queueing involved
    pub fn preferred_versions(
        &self,
        strategy: ResolverStrategy,
        sources: &[PackageSource],
        name: &PackageName,
    ) -> VersionListing {
        self.oracle
            .get_preferred_versions(strategy, sources, &self.group, name)
    }

    /// Submit (or join) a list-versions request
    pub fn request_versions(
        &self,
        priority: WorkPriority,
        sources: &[PackageSource],
        name: &PackageName,
    ) -> WorkHandle<VersionListing> {
        let key = (sources.to_vec(), name.clone());
        self.versions_memo
            .entry(key)
            .or_insert_with(|| {
                let oracle = self.oracle.clone();
                let group = self.group.clone();
                let sources = sources.to_vec();
                let name = name.clone();
                self.queue.add_work(priority, async move {
                    oracle.get_versions(&sources, &group, &name).await
                })
            })
            .clone()
    }

    /// Submit (or join) a get-details request
    pub fn request_details(
        &self,
        priority: WorkPriority,
        sources: &[PackageSource],
        name: &PackageName,
        version: &SemVer,
    ) -> WorkHandle<PackageDetails> {
        let key = (sources.to_vec(), name.clone(), version.clone());
        self.details_memo
            .entry(key)
            .or_insert_with(|| {
                let oracle = self.oracle.clone();
                let group = self.group.clone();
                let sources = sources.to_vec();
                let name = name.clone();
                let version = version.clone();
                self.queue.add_work(priority, async move {
                    oracle
                        .get_package_details(&sources, &group, &name, &version)
                        .await
                })
            })
            .clone()
    }

    /// Block on a version listing, raising its priority
    pub async fn versions_blocking(
        &self,
        sources: &[PackageSource],
        name: &PackageName,
    ) -> NougatResult<VersionListing> {
        let handle = self.request_versions(WorkPriority::BlockingWork, sources, name);
        self.await_blocking(name, sources, &handle).await
    }

    /// Block on package details, raising their priority
    pub async fn details_blocking(
        &self,
        sources: &[PackageSource],
        name: &PackageName,
        version: &SemVer,
    ) -> NougatResult<PackageDetails> {
        let handle = self.request_details(WorkPriority::BlockingWork, sources, name, version);
        self.await_blocking(name, sources, &handle).await
    }

    /// The blocking consumption discipline: an already-completed handle
    /// returns immediately; otherwise the request is bumped to
    /// BlockingWork and awaited up to the configured timeout. A handle
    /// that timed out before is not waited on again.
    async fn await_blocking<T: Clone>(
        &self,
        name: &PackageName,
        sources: &[PackageSource],
        handle: &WorkHandle<T>,
    ) -> NougatResult<T> {
        if let Some(result) = handle.try_result() {
            return result;
        }

        if handle.timed_out_before() {
            return Err(NougatError::NotWaitingAgain {
                package: name.to_string(),
            });
        }

        handle.try_reprioritize(true, WorkPriority::BlockingWork);

        match tokio::time::timeout(self.timeout, handle.task()).await {
            Ok(result) => result,
            Err(_) => {
                handle.mark_timed_out();
                Err(NougatError::RequestTimeout {
                    package: name.to_string(),
                    sources: sources.iter().map(|s| s.url.clone()).collect(),
                    waited_secs: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Prefetch the dependencies of a freshly explored package: list
    /// versions in the background, then pull details for the two
    /// representative versions plus a few more speculative ones
    pub fn prefetch_dependencies(self: &Arc<Self>, sources: &[PackageSource], details: &PackageDetails) {
        for dep in &details.direct_dependencies {
            let handle = self.request_versions(WorkPriority::BackgroundWork, sources, &dep.name);
            handle.try_reprioritize(true, WorkPriority::LikelyRequired);

            let session = self.clone();
            let name = dep.name.clone();
            let requirement = dep.requirement.clone();
            tokio::spawn(async move {
                match handle.task().await {
                    Ok(listing) => session.prefetch_details(&name, &requirement, &listing),
                    Err(error) => {
                        debug!(package = %name, %error, "version prefetch failed");
                    }
                }
            });
        }
    }

    fn prefetch_details(
        &self,
        name: &PackageName,
        requirement: &VersionRequirement,
        listing: &VersionListing,
    ) {
        let mut versions = listing.clone();
        versions.sort_by(|a, b| b.0.cmp(&a.0));

        // the first version in range with prereleases admitted, and the
        // first strictly in range, are where the search will look first
        let loose = versions.iter().find(|(v, _)| requirement.in_range(v, true));
        let strict = versions.iter().find(|(v, _)| requirement.in_range(v, false));

        let mut representatives: Vec<&(SemVer, Vec<PackageSource>)> = Vec::new();
        for candidate in [loose, strict].into_iter().flatten() {
            if !representatives.iter().any(|(v, _)| v == &candidate.0) {
                representatives.push(candidate);
            }
        }

        for (version, sources) in &representatives {
            self.request_details(WorkPriority::LikelyRequired, sources, name, version);
        }

        let mut speculative = 0;
        for (version, sources) in &versions {
            if speculative >= 10 {
                break;
            }
            if !requirement.in_range(version, true) {
                continue;
            }
            if representatives.iter().any(|(v, _)| v == version) {
                continue;
            }
            self.request_details(WorkPriority::MightBeRequired, sources, name, version);
            speculative += 1;
        }
    }

    /// Shut the queue down, failing everything still pending
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

/// Blocking-wait timeout from the environment, with a warning on invalid
/// values
pub fn task_timeout_from_env() -> Duration {
    match std::env::var(TASK_TIMEOUT_ENV) {
        Err(_) => DEFAULT_TASK_TIMEOUT,
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(millis) if millis > 0 => Duration::from_millis(millis),
            _ => {
                warn!(
                    value = %raw,
                    "Invalid {} value, using default of {}ms",
                    TASK_TIMEOUT_ENV,
                    DEFAULT_TASK_TIMEOUT.as_millis()
                );
                DEFAULT_TASK_TIMEOUT
            }
        },
    }
}
