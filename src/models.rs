use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Career-page provider, detected from the career URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Greenhouse,
    Lever,
    Ashby,
    Workday,
    SmartRecruiters,
    Custom,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Greenhouse => "greenhouse",
            SourceType::Lever => "lever",
            SourceType::Ashby => "ashby",
            SourceType::Workday => "workday",
            SourceType::SmartRecruiters => "smartrecruiters",
            SourceType::Custom => "custom",
        }
    }

    /// Total: anything unrecognised is `Custom`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "greenhouse" => SourceType::Greenhouse,
            "lever" => SourceType::Lever,
            "ashby" => SourceType::Ashby,
            "workday" => SourceType::Workday,
            "smartrecruiters" => SourceType::SmartRecruiters,
            _ => SourceType::Custom,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyMetadata {
    pub description: Option<String>,
    pub headquarters: Option<String>,
    pub founded_year: Option<i32>,
    pub revenue_estimate: Option<String>,
    pub funding_stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub career_url: String,
    pub source_type: SourceType,
    pub active: bool,
    pub metadata: CompanyMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One posting as returned by an adapter or the heuristic crawler.
/// Never stored as-is; folded into a `JobListing` by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedJob {
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub location: Option<String>,
    pub remote: bool,
    pub department: Option<String>,
    pub description: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    New,
    Viewed,
    Applied,
    Dismissed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Viewed => "viewed",
            JobStatus::Applied => "applied",
            JobStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(JobStatus::New),
            "viewed" => Ok(JobStatus::Viewed),
            "applied" => Ok(JobStatus::Applied),
            "dismissed" => Ok(JobStatus::Dismissed),
            other => Err(format!(
                "Unknown job status '{}'. Expected one of: new, viewed, applied, dismissed",
                other
            )),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Persisted posting, unique on (company_id, external_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListing {
    pub id: i64,
    pub company_id: i64,
    pub company_name: Option<String>, // denormalized for display
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub location: Option<String>,
    pub remote: bool,
    pub department: Option<String>,
    pub description: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: JobStatus,
    pub match_score: Option<u8>,
}

impl JobListing {
    /// View of the stored row in the shape the scoring engine consumes.
    pub fn as_parsed(&self) -> ParsedJob {
        ParsedJob {
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            location: self.location.clone(),
            remote: self.remote,
            department: self.department.clone(),
            description: self.description.clone(),
            posted_at: self.posted_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Running,
    Success,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Running => "running",
            CrawlStatus::Success => "success",
            CrawlStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(CrawlStatus::Running),
            "success" => Some(CrawlStatus::Success),
            "failed" => Some(CrawlStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlLog {
    pub id: i64,
    pub company_id: i64,
    pub company_name: Option<String>,
    pub status: CrawlStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub jobs_found: u32,
    pub new_jobs: u32,
    pub error: Option<String>,
}

/// Per-user scoring input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobProfile {
    pub keywords: Vec<String>,
    pub titles: Vec<String>,
    pub locations: Vec<String>,
    pub exclude_titles: Vec<String>,
    pub exclude_locations: Vec<String>,
    pub remote_only: bool,
}

impl JobProfile {
    /// True when at least one scoring preference is set. Exclusion lists
    /// alone do not count.
    pub fn has_preferences(&self) -> bool {
        has_entries(&self.keywords)
            || has_entries(&self.titles)
            || has_entries(&self.locations)
            || self.remote_only
    }
}

/// True when the list holds at least one non-blank entry.
pub(crate) fn has_entries(list: &[String]) -> bool {
    list.iter().any(|entry| !entry.trim().is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub company_id: i64,
    pub company_name: String,
    pub status: CrawlStatus,
    pub jobs_found: u32,
    pub new_jobs: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCompany {
    pub company_id: i64,
    pub company_name: String,
    pub source_type: SourceType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCrawlResult {
    pub results: Vec<CrawlResult>,
    pub total_found: u32,
    pub total_new: u32,
    pub skipped: Vec<SkippedCompany>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescoreSummary {
    pub processed: usize,
    pub updated: usize,
}
