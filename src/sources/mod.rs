//! Provider adapters for job boards with a public read API.

mod ashby;
mod greenhouse;
mod lever;

pub use ashby::AshbyAdapter;
pub use greenhouse::GreenhouseAdapter;
pub use lever::LeverAdapter;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{Result, ScoutError};
use crate::models::{ParsedJob, SourceType};

const USER_AGENT: &str = concat!("scout/", env!("CARGO_PKG_VERSION"));
const API_TIMEOUT_SECS: u64 = 30;

/// Domain fragments that identify each provider in a career-page URL.
const SOURCE_PATTERNS: &[(SourceType, &[&str])] = &[
    (SourceType::Greenhouse, &["greenhouse.io"]),
    (SourceType::Lever, &["lever.co"]),
    (SourceType::Ashby, &["ashbyhq.com"]),
    (SourceType::Workday, &["myworkdayjobs.com", "workday.com"]),
    (SourceType::SmartRecruiters, &["smartrecruiters.com"]),
];

/// Detect the provider behind a career URL, defaulting to `Custom`.
///
/// Only the host is compared, and only on whole labels, so `clever.com`
/// or a provider domain inside a query string stays `Custom`.
pub fn detect_source_type(career_url: &str) -> SourceType {
    let Some(host) = url_host(career_url) else {
        return SourceType::Custom;
    };
    SOURCE_PATTERNS
        .iter()
        .find(|(_, domains)| {
            domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
        })
        .map(|(source, _)| *source)
        .unwrap_or(SourceType::Custom)
}

fn url_host(career_url: &str) -> Option<String> {
    let trimmed = career_url.trim();
    let parsed = Url::parse(trimmed).or_else(|_| Url::parse(&format!("https://{}", trimmed)));
    parsed
        .ok()?
        .host_str()
        .map(|h| h.trim_end_matches('.').to_lowercase())
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Pull the board token out of a career URL, or `None` if the URL does
    /// not have a recognised shape.
    fn extract_token(&self, career_url: &str) -> Option<String>;

    /// Fetch and normalise every open posting on the board.
    async fn parse(&self, career_url: &str) -> Result<Vec<ParsedJob>>;
}

/// Immutable lookup from source type to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the Greenhouse, Lever and Ashby adapters sharing one client.
    pub fn with_default_adapters() -> Result<Self> {
        let client = create_api_client()?;
        Ok(Self::empty()
            .with_adapter(Arc::new(GreenhouseAdapter::new(client.clone())))
            .with_adapter(Arc::new(LeverAdapter::new(client.clone())))
            .with_adapter(Arc::new(AshbyAdapter::new(client))))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.source_type(), adapter);
        self
    }

    pub fn has_parser(&self, source: &str) -> bool {
        self.get_parser(source).is_some()
    }

    pub fn get_parser(&self, source: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.get(SourceType::parse(source))
    }

    pub fn get(&self, source: SourceType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&source).cloned()
    }
}

pub fn create_api_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(API_TIMEOUT_SECS))
        .build()?;
    Ok(client)
}

/// GET a provider endpoint and decode its JSON body. A 404 is reported as
/// a missing board; any other non-2xx keeps the status and body text.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    source: SourceType,
    token: &str,
) -> Result<T> {
    debug!(source = %source, url, "Fetching job board");
    let response = client.get(url).send().await?;
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ScoutError::board_not_found(source.as_str(), token));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(ScoutError::upstream(
            source.as_str(),
            format!("HTTP {} for board '{}': {}", status, token, snippet.trim()),
        ));
    }

    Ok(response.json::<T>().await?)
}
