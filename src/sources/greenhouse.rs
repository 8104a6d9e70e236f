use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::info;

use super::{fetch_json, SourceAdapter};
use crate::error::{Result, ScoutError};
use crate::models::{ParsedJob, SourceType};
use crate::text::{html_to_text, looks_remote, non_empty, parse_timestamp};

const GREENHOUSE_API_URL: &str = "https://boards-api.greenhouse.io/v1/boards";

static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Embedded board: boards.greenhouse.io/embed/job_board?for=acme
        r"(?i)greenhouse\.io/embed/job_board/?\?(?:[^#]*&)?for=([A-Za-z0-9_-]+)",
        // API URL pasted directly
        r"(?i)boards-api\.greenhouse\.io/v1/boards/([A-Za-z0-9_-]+)",
        // Hosted board: boards.greenhouse.io/acme, job-boards.eu.greenhouse.io/acme
        r"(?i)(?:job-)?boards(?:\.eu)?\.greenhouse\.io/([A-Za-z0-9_-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid greenhouse pattern"))
    .collect()
});

#[derive(Debug, Deserialize)]
struct GreenhouseBoard {
    #[serde(default)]
    jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    id: u64,
    title: String,
    absolute_url: String,
    location: Option<GreenhouseName>,
    #[serde(default)]
    departments: Vec<GreenhouseName>,
    content: Option<String>,
    first_published: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseName {
    name: Option<String>,
}

pub struct GreenhouseAdapter {
    client: reqwest::Client,
}

impl GreenhouseAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for GreenhouseAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Greenhouse
    }

    fn extract_token(&self, career_url: &str) -> Option<String> {
        TOKEN_PATTERNS
            .iter()
            .filter_map(|re| re.captures(career_url))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .find(|token| !token.eq_ignore_ascii_case("embed"))
    }

    async fn parse(&self, career_url: &str) -> Result<Vec<ParsedJob>> {
        let token = self
            .extract_token(career_url)
            .ok_or_else(|| ScoutError::InvalidUrl(career_url.to_string()))?;
        let url = format!("{}/{}/jobs?content=true", GREENHOUSE_API_URL, token);

        let board: GreenhouseBoard =
            fetch_json(&self.client, &url, SourceType::Greenhouse, &token).await?;
        let jobs = into_parsed_jobs(board);
        info!(token = %token, jobs = jobs.len(), "Fetched Greenhouse board");
        Ok(jobs)
    }
}

fn into_parsed_jobs(board: GreenhouseBoard) -> Vec<ParsedJob> {
    board
        .jobs
        .into_iter()
        .map(|job| {
            let location = non_empty(job.location.and_then(|l| l.name));
            let remote = location.as_deref().is_some_and(looks_remote);
            let department = non_empty(job.departments.into_iter().find_map(|d| d.name));
            let description = non_empty(job.content.map(|c| html_to_text(&c)));
            let posted_at = job
                .first_published
                .or(job.updated_at)
                .and_then(|ts| parse_timestamp(&ts));

            ParsedJob {
                external_id: job.id.to_string(),
                title: job.title.trim().to_string(),
                url: job.absolute_url,
                location,
                remote,
                department,
                description,
                posted_at,
            }
        })
        .collect()
}
