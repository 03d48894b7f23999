//! Wire-level client for the verification service ("the hub").
//!
//! Pure request/response plumbing; resilience (breaker, backoff,
//! scheduling) lives in [`crate::Hub`].

use std::collections::BTreeMap;

use reqwest::Url;
use scandium_model::{RiskProfile, ScanResults};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected hub response: {0}")]
    Protocol(String),
}

#[derive(Clone, Debug)]
pub struct HubUrl {
    base_url: Url,
}

impl HubUrl {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join("/j_spring_security_check")
    }

    pub fn current_version_url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join("/api/current-version")
    }

    pub fn code_locations_url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join("/api/codelocations")
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default)]
    pub total_count: u64,
    pub items: Vec<T>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub href: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Meta {
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.rel == rel)
            .map(|link| link.href.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub rel: String,
    pub href: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    pub name: String,
    #[serde(default)]
    pub mapped_project_version: Option<String>,
    #[serde(rename = "_meta")]
    pub meta: Meta,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVersion {
    #[serde(default)]
    pub version_name: Option<String>,
    #[serde(rename = "_meta")]
    pub meta: Meta,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfileResponse {
    #[serde(default)]
    pub categories: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatusResponse {
    pub overall_status: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub status: String,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(rename = "_meta")]
    pub meta: Meta,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentVersion {
    pub version: String,
}

/// The stage a fetched scan is in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchedScan {
    InProgress,
    Failed,
    Complete(ScanResults),
}

/// Scan summary statuses the hub reports as terminal failures.
const FAILURE_STATUSES: [&str; 6] = [
    "ERROR",
    "CANCELLED",
    "ERROR_SCANNING",
    "ERROR_SAVING_SCAN_DATA",
    "ERROR_MATCHING",
    "ERROR_BUILDING_BOM",
];

/// Classify a scan summary status into a stage.
pub fn summary_stage(status: &str) -> SummaryStage {
    if status == "COMPLETE" {
        SummaryStage::Complete
    } else if FAILURE_STATUSES.contains(&status) {
        SummaryStage::Failed
    } else {
        SummaryStage::InProgress
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryStage {
    InProgress,
    Failed,
    Complete,
}

const PAGE_LIMIT: u64 = 500;

pub struct HubClient {
    client: reqwest::Client,
    url: HubUrl,
    user: String,
    password: String,
}

impl HubClient {
    pub fn new(base_url: Url, user: impl Into<String>, password: impl Into<String>) -> Result<Self, Error> {
        // session auth is cookie based
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self {
            client,
            url: HubUrl::new(base_url),
            user: user.into(),
            password: password.into(),
        })
    }

    pub async fn login(&self) -> Result<(), Error> {
        self.client
            .post(self.url.login_url()?)
            .form(&[("j_username", &self.user), ("j_password", &self.password)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn current_version(&self) -> Result<String, Error> {
        let version: CurrentVersion = self
            .client
            .get(self.url.current_version_url()?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(version.version)
    }

    /// All code locations the hub knows, fetched page by page.
    pub async fn list_all_code_locations(&self) -> Result<Vec<CodeLocation>, Error> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page: Page<CodeLocation> = self
                .client
                .get(self.url.code_locations_url()?)
                .query(&[("limit", PAGE_LIMIT), ("offset", offset)])
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let count = page.items.len() as u64;
            all.extend(page.items);
            offset += count;
            if count < PAGE_LIMIT {
                break;
            }
        }
        Ok(all)
    }

    /// Code locations whose name matches exactly.
    pub async fn find_code_locations(&self, name: &str) -> Result<Vec<CodeLocation>, Error> {
        let page: Page<CodeLocation> = self
            .client
            .get(self.url.code_locations_url()?)
            .query(&[("q", format!("name:{name}"))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // the q parameter matches prefixes; keep exact matches only
        Ok(page.items.into_iter().filter(|cl| cl.name == name).collect())
    }

    pub async fn get_project_version(&self, href: &str) -> Result<ProjectVersion, Error> {
        Ok(self.get_json(href).await?)
    }

    pub async fn get_risk_profile(&self, href: &str) -> Result<RiskProfileResponse, Error> {
        Ok(self.get_json(href).await?)
    }

    pub async fn get_policy_status(&self, href: &str) -> Result<PolicyStatusResponse, Error> {
        Ok(self.get_json(href).await?)
    }

    pub async fn get_scan_summaries(&self, href: &str) -> Result<Vec<ScanSummary>, Error> {
        let page: Page<ScanSummary> = self.get_json(href).await?;
        Ok(page.items)
    }

    pub async fn delete_code_location(&self, href: &str) -> Result<(), Error> {
        self.client.delete(href).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn delete_project_version(&self, href: &str) -> Result<(), Error> {
        self.client.delete(href).send().await?.error_for_status()?;
        Ok(())
    }

    /// Fetch the full state of a scan by name: code location, project
    /// version, scan summary, and (when complete) risk profile and policy
    /// status.
    ///
    /// `Ok(None)` means the hub has no usable record yet, which is an
    /// expected race, not an error.
    pub async fn fetch_scan(&self, name: &str) -> Result<Option<FetchedScan>, Error> {
        let locations = self.find_code_locations(name).await?;
        let location = match locations.as_slice() {
            [] => return Ok(None),
            [location] => location,
            [location, ..] => {
                log::warn!(
                    "found {} code locations named {name}, using the first",
                    locations.len()
                );
                location
            }
        };

        let scans_link = location
            .meta
            .link("scans")
            .ok_or_else(|| Error::Protocol(format!("code location {name} has no scans link")))?;
        let summaries = self.get_scan_summaries(scans_link).await?;
        let summary = match summaries.as_slice() {
            [] => return Ok(None),
            [summary] => summary,
            [summary, ..] => {
                log::warn!(
                    "found {} scan summaries for {name}, using the first",
                    summaries.len()
                );
                summary
            }
        };

        match summary_stage(&summary.status) {
            SummaryStage::InProgress => Ok(Some(FetchedScan::InProgress)),
            SummaryStage::Failed => Ok(Some(FetchedScan::Failed)),
            SummaryStage::Complete => {
                let version_href = location.mapped_project_version.as_deref().ok_or_else(|| {
                    Error::Protocol(format!("code location {name} has no mapped project version"))
                })?;
                let version = self.get_project_version(version_href).await?;

                let risk_link = version.meta.link("riskProfile").ok_or_else(|| {
                    Error::Protocol(format!("project version for {name} has no riskProfile link"))
                })?;
                let policy_link = version.meta.link("policy-status").ok_or_else(|| {
                    Error::Protocol(format!("project version for {name} has no policy-status link"))
                })?;

                let risk = self.get_risk_profile(risk_link).await?;
                let policy = self.get_policy_status(policy_link).await?;

                Ok(Some(FetchedScan::Complete(ScanResults {
                    policy_status: policy.overall_status,
                    risk_profile: RiskProfile {
                        categories: risk.categories,
                    },
                    scan_summary_status: summary.status.clone(),
                    // not every hub version exposes it, so its absence is
                    // not a protocol error
                    components_href: version.meta.link("components").map(String::from),
                    updated_at: policy.updated_at.or_else(|| summary.updated_at.clone()),
                })))
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, href: &str) -> Result<T, Error> {
        Ok(self
            .client
            .get(href)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}
