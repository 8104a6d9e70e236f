use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::info;

use super::{fetch_json, SourceAdapter};
use crate::error::{Result, ScoutError};
use crate::models::{ParsedJob, SourceType};
use crate::text::{looks_remote, non_empty};

const LEVER_API_URL: &str = "https://api.lever.co/v0/postings";

static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)api\.lever\.co/v0/postings/([A-Za-z0-9_.-]+)",
        r"(?i)jobs\.lever\.co/([A-Za-z0-9_.-]+)",
        r"(?i)//([A-Za-z0-9_-]+)\.lever\.co(?:/|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid lever pattern"))
    .collect()
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeverPosting {
    id: String,
    text: String,
    hosted_url: String,
    #[serde(default)]
    categories: LeverCategories,
    description_plain: Option<String>,
    created_at: Option<i64>,
    workplace_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LeverCategories {
    location: Option<String>,
    team: Option<String>,
    department: Option<String>,
}

pub struct LeverAdapter {
    client: reqwest::Client,
}

impl LeverAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceAdapter for LeverAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::Lever
    }

    fn extract_token(&self, career_url: &str) -> Option<String> {
        TOKEN_PATTERNS
            .iter()
            .filter_map(|re| re.captures(career_url))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .find(|token| !matches!(token.to_lowercase().as_str(), "jobs" | "api" | "www"))
    }

    async fn parse(&self, career_url: &str) -> Result<Vec<ParsedJob>> {
        let token = self
            .extract_token(career_url)
            .ok_or_else(|| ScoutError::InvalidUrl(career_url.to_string()))?;
        let url = format!("{}/{}?mode=json", LEVER_API_URL, token);

        let postings: Vec<LeverPosting> =
            fetch_json(&self.client, &url, SourceType::Lever, &token).await?;
        let jobs = into_parsed_jobs(postings);
        info!(token = %token, jobs = jobs.len(), "Fetched Lever board");
        Ok(jobs)
    }
}

fn into_parsed_jobs(postings: Vec<LeverPosting>) -> Vec<ParsedJob> {
    postings
        .into_iter()
        .map(|posting| {
            let location = non_empty(posting.categories.location);
            let remote = posting
                .workplace_type
                .as_deref()
                .is_some_and(|w| w.eq_ignore_ascii_case("remote"))
                || location.as_deref().is_some_and(looks_remote);
            let department =
                non_empty(posting.categories.department).or(non_empty(posting.categories.team));

            ParsedJob {
                external_id: posting.id,
                title: posting.text.trim().to_string(),
                url: posting.hosted_url,
                location,
                remote,
                department,
                description: non_empty(posting.description_plain),
                // Lever reports epoch milliseconds
                posted_at: posting.created_at.and_then(DateTime::<Utc>::from_timestamp_millis),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> LeverAdapter {
        LeverAdapter::new(reqwest::Client::new())
    }

    #[test]
    fn test_extract_token_url_shapes() {
        let a = adapter();
        assert_eq!(a.extract_token("https://jobs.lever.co/netflix"), Some("netflix".into()));
        assert_eq!(
            a.extract_token("https://jobs.lever.co/plaid/0b1c-uuid/apply"),
            Some("plaid".into())
        );
        assert_eq!(
            a.extract_token("https://api.lever.co/v0/postings/kraken?mode=json"),
            Some("kraken".into())
        );
        assert_eq!(a.extract_token("https://acme.lever.co/"), Some("acme".into()));
        assert_eq!(a.extract_token("https://jobs.lever.co/"), None);
        assert_eq!(a.extract_token("https://acme.com/careers"), None);
    }

    #[test]
    fn test_into_parsed_jobs_maps_fields() {
        let raw = r#"[
            {
                "id": "5f2c-aaaa",
                "text": "Platform Engineer",
                "hostedUrl": "https://jobs.lever.co/acme/5f2c-aaaa",
                "categories": {"location": "Berlin", "team": "Infra", "commitment": "Full-time"},
                "descriptionPlain": "Keep the lights on.",
                "createdAt": 1714560000000,
                "workplaceType": "remote"
            },
            {
                "id": "5f2c-bbbb",
                "text": "Designer",
                "hostedUrl": "https://jobs.lever.co/acme/5f2c-bbbb"
            }
        ]"#;
        let postings: Vec<LeverPosting> = serde_json::from_str(raw).unwrap();
        let jobs = into_parsed_jobs(postings);

        assert_eq!(jobs[0].external_id, "5f2c-aaaa");
        assert_eq!(jobs[0].location.as_deref(), Some("Berlin"));
        assert!(jobs[0].remote);
        assert_eq!(jobs[0].department.as_deref(), Some("Infra"));
        assert_eq!(
            jobs[0].posted_at.map(|d| d.timestamp()),
            Some(1_714_560_000)
        );

        assert_eq!(jobs[1].location, None);
        assert!(!jobs[1].remote);
        assert_eq!(jobs[1].description, None);
        assert_eq!(jobs[1].posted_at, None);
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_parse_unknown_board_is_not_found() {
        let err = adapter()
            .parse("https://jobs.lever.co/this-board-should-not-exist-4242")
            .await
            .unwrap_err();
        assert!(matches!(err, ScoutError::BoardNotFound { .. }));
    }
}
