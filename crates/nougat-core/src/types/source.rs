//! Package origin descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a package can be fetched from: a remote feed or a local directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageSource {
    pub url: String,
    pub is_local_feed: bool,
}

const NUGET_ORG_URL: &str = "https://api.nuget.org/v3/index.json";

impl PackageSource {
    /// A remote feed
    pub fn remote(url: &str) -> Self {
        Self {
            url: url.to_string(),
            is_local_feed: false,
        }
    }

    /// A directory feed on the local machine
    pub fn local(path: &str) -> Self {
        Self {
            url: path.to_string(),
            is_local_feed: true,
        }
    }

    /// The default public feed
    pub fn nuget_org() -> Self {
        Self::remote(NUGET_ORG_URL)
    }

    pub fn is_nuget_org(&self) -> bool {
        self.url == NUGET_ORG_URL
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
