use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::info;

use super::{fetch_json, SourceAdapter};
use crate::error::{Result, ScoutError};
use crate::models::{ParsedJob, SourceType};
use crate::text::{html_to_text, looks_remote, non_empty, parse_timestamp};

const ASHBY_API_URL: &str = "https://api.ashbyhq.com/posting-api/job-board";

static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)api\.ashbyhq\.com/posting-api/job-board/([^/?#]+)",
        r"(?i)jobs\.ashbyhq\.com/([^/?#]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid ashby pattern"))
    .collect()
});

#[derive(Debug, Deserialize)]
struct AshbyBoard {
    #[serde(default)]
    jobs: Vec<AshbyJob>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AshbyJob {
    id: String,
    title: String,
    job_url: Option<String>,
    location: Option<String>,
    department: Option<String>,
    team: Option<String>,
    is_remote: Option<bool>,
    #[serde(default = "listed_by_default")]
    is_listed: bool,
    description_plain: Option<String>,
    description_html: Option<String>,
    published_at: Option<String>,
}

fn listed_by_default() -> bool {
    true
}

pub struct AshbyAdapter {
    client: reqwest::Client,
}

impl AshbyAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for AshbyAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Ashby
    }

    fn extract_token(&self, career_url: &str) -> Option<String> {
        TOKEN_PATTERNS
            .iter()
            .filter_map(|re| re.captures(career_url))
            .find_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
    }

    async fn parse(&self, career_url: &str) -> Result<Vec<ParsedJob>> {
        let token = self
            .extract_token(career_url)
            .ok_or_else(|| ScoutError::InvalidUrl(career_url.to_string()))?;
        let url = format!("{}/{}", ASHBY_API_URL, token);

        let board: AshbyBoard = fetch_json(&self.client, &url, SourceType::Ashby, &token).await?;
        let jobs = into_parsed_jobs(board, &token);
        info!(token = %token, jobs = jobs.len(), "Fetched Ashby board");
        Ok(jobs)
    }
}

fn into_parsed_jobs(board: AshbyBoard, token: &str) -> Vec<ParsedJob> {
    board
        .jobs
        .into_iter()
        .filter(|job| job.is_listed)
        .map(|job| {
            let location = non_empty(job.location);
            let remote = job.is_remote.unwrap_or(false)
                || location.as_deref().is_some_and(looks_remote);
            let description = non_empty(job.description_plain)
                .or_else(|| non_empty(job.description_html.map(|h| html_to_text(&h))));
            let url = job
                .job_url
                .unwrap_or_else(|| format!("https://jobs.ashbyhq.com/{}/{}", token, job.id));

            ParsedJob {
                external_id: job.id,
                title: job.title.trim().to_string(),
                url,
                location,
                remote,
                department: non_empty(job.department).or(non_empty(job.team)),
                description,
                posted_at: job.published_at.and_then(|ts| parse_timestamp(&ts)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> AshbyAdapter {
        AshbyAdapter::new(reqwest::Client::new())
    }

    #[test]
    fn test_extract_token_url_shapes() {
        let a = adapter();
        assert_eq!(a.extract_token("https://jobs.ashbyhq.com/linear"), Some("linear".into()));
        assert_eq!(
            a.extract_token("https://jobs.ashbyhq.com/Ramp/5c1e-uuid?utm_source=x"),
            Some("Ramp".into())
        );
        assert_eq!(
            a.extract_token("https://api.ashbyhq.com/posting-api/job-board/notion"),
            Some("notion".into())
        );
        assert_eq!(a.extract_token("https://jobs.ashbyhq.com/"), None);
        assert_eq!(a.extract_token("https://boards.greenhouse.io/acme"), None);
    }

    #[test]
    fn test_into_parsed_jobs_skips_unlisted() {
        let raw = r#"{
            "jobs": [
                {
                    "id": "a1",
                    "title": "Data Engineer",
                    "jobUrl": "https://jobs.ashbyhq.com/acme/a1",
                    "location": "New York",
                    "department": "Data",
                    "isRemote": true,
                    "isListed": true,
                    "descriptionHtml": "<p>Pipelines</p>",
                    "publishedAt": "2024-04-02T09:00:00.000+00:00"
                },
                {
                    "id": "a2",
                    "title": "Secret Role",
                    "isListed": false
                },
                {
                    "id": "a3",
                    "title": "Recruiter",
                    "team": "People"
                }
            ]
        }"#;
        let board: AshbyBoard = serde_json::from_str(raw).unwrap();
        let jobs = into_parsed_jobs(board, "acme");

        assert_eq!(jobs.len(), 2);
        assert!(jobs[0].remote);
        assert_eq!(jobs[0].description.as_deref(), Some("Pipelines"));
        assert!(jobs[0].posted_at.is_some());

        assert_eq!(jobs[1].external_id, "a3");
        assert_eq!(jobs[1].url, "https://jobs.ashbyhq.com/acme/a3");
        assert_eq!(jobs[1].department.as_deref(), Some("People"));
    }
}
