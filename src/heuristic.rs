//! Career-page crawling for sites without a provider API.
//!
//! A page is rendered in the browser, then postings are pulled out of the
//! HTML in two passes: embedded JSON-LD `JobPosting` blocks first, and only
//! if there are none, selector heuristics. Within the heuristic pass the
//! first container selector that yields any posting wins; results from
//! different selectors are never merged.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};
use url::Url;

use crate::browser::PageRenderer;
use crate::error::Result;
use crate::models::ParsedJob;
use crate::text::{html_to_text, looks_remote, non_empty, parse_timestamp};

/// Selectors for elements that look like one job listing, most specific first.
const JOB_CONTAINER_SELECTORS: &[&str] = &[
    "[data-job-id]",
    "[data-posting-id]",
    ".job-listing",
    ".job-item",
    ".job-card",
    ".job-posting",
    ".job-opening",
    ".opening",
    ".posting",
    ".position",
    ".vacancy",
    ".career-item",
    "li[class*='job']",
    "div[class*='job-']",
    "a[href*='/jobs/']",
    "a[href*='/job/']",
    "a[href*='/careers/']",
    "a[href*='/positions/']",
    "a[href*='/openings/']",
];

const TITLE_SELECTORS: &[&str] = &[
    ".job-title",
    "[class*='job-title']",
    ".posting-title",
    ".title",
    "h2",
    "h3",
    "h4",
    "h5",
    "a",
];

const LOCATION_SELECTORS: &[&str] = &[
    ".job-location",
    ".location",
    "[class*='location']",
    "[data-location]",
    ".city",
];

/// Link texts that are site navigation rather than postings.
const SKIP_PHRASES: &[&str] = &[
    "about us",
    "contact",
    "privacy",
    "terms of",
    "cookie",
    "log in",
    "login",
    "sign in",
    "sign up",
    "our team",
    "our story",
    "our culture",
    "life at",
    "blog",
    "view all",
    "see all",
    "all jobs",
    "all openings",
    "search jobs",
    "learn more",
    "read more",
    "back to",
];

const MIN_TITLE_CHARS: usize = 3;
const MAX_TITLE_CHARS: usize = 150;
const MAX_LOCATION_CHARS: usize = 100;

fn compile(selectors: &[&str]) -> Vec<Selector> {
    selectors
        .iter()
        .map(|s| Selector::parse(s).expect("valid built-in selector"))
        .collect()
}

static CONTAINERS: LazyLock<Vec<Selector>> = LazyLock::new(|| compile(JOB_CONTAINER_SELECTORS));
static TITLES: LazyLock<Vec<Selector>> = LazyLock::new(|| compile(TITLE_SELECTORS));
static LOCATIONS: LazyLock<Vec<Selector>> = LazyLock::new(|| compile(LOCATION_SELECTORS));
static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid link selector"));
static JSON_LD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("script[type='application/ld+json']").expect("valid json-ld selector")
});

static SKIP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let alternatives = SKIP_PHRASES
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)(?:^|\W)(?:{})(?:\W|$)", alternatives)).expect("valid skip pattern")
});

/// URL shapes that carry a numeric posting id, tried in order.
static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)/jobs?/(\d{3,})",
        r"(?i)/positions?/(\d{3,})",
        r"(?i)/openings?/(\d{3,})",
        r"(?i)/careers?/(\d{3,})",
        r"(?i)[?&](?:gh_jid|job_?id|posting_?id|id)=(\d+)",
        r"/(\d{5,})(?:[/?#]|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid id pattern"))
    .collect()
});

pub struct HeuristicCrawler {
    renderer: Arc<dyn PageRenderer>,
}

impl HeuristicCrawler {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }

    /// Render the career page and extract postings. Navigation and render
    /// failures propagate; finding nothing is a valid empty result.
    pub async fn crawl(&self, career_url: &str) -> Result<Vec<ParsedJob>> {
        let html = self.renderer.render(career_url).await?;
        let jobs = extract_jobs(&html, career_url);
        info!(url = career_url, jobs = jobs.len(), "Heuristic crawl finished");
        Ok(jobs)
    }

    /// Close the shared browser. The next `crawl` relaunches it.
    pub async fn shutdown_browser(&self) {
        self.renderer.shutdown().await;
    }
}

pub fn extract_jobs(html: &str, page_url: &str) -> Vec<ParsedJob> {
    let document = Html::parse_document(html);

    let structured = extract_structured_jobs(&document, page_url);
    if !structured.is_empty() {
        debug!(jobs = structured.len(), "Using structured job data");
        return structured;
    }

    extract_listing_jobs(&document, page_url)
}

// --- Pass 1: JSON-LD ---

fn extract_structured_jobs(document: &Html, page_url: &str) -> Vec<ParsedJob> {
    let mut values = Vec::new();
    for script in document.select(&JSON_LD) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => values.push(value),
            Err(e) => debug!(error = %e, "Skipping malformed JSON-LD block"),
        }
    }
    let mut postings = Vec::new();
    for value in &values {
        collect_postings(value, &mut postings);
    }

    postings
        .into_iter()
        .filter_map(|posting| posting_to_job(posting, page_url))
        .enumerate()
        .map(|(index, (job, link))| with_external_id(job, link.as_deref(), index))
        .collect()
}

fn collect_postings<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_postings(item, out)),
        Value::Object(map) => {
            if is_job_posting(value) {
                out.push(value);
            }
            if let Some(graph) = map.get("@graph") {
                collect_postings(graph, out);
            }
        }
        _ => {}
    }
}

fn is_job_posting(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t.eq_ignore_ascii_case("JobPosting"),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|t| t.eq_ignore_ascii_case("JobPosting"))),
        _ => false,
    }
}

/// Map one JSON-LD posting. Returns the job (id still blank) and its own
/// link, if it had one.
fn posting_to_job(posting: &Value, page_url: &str) -> Option<(ParsedJob, Option<String>)> {
    let title = string_field(posting, "title").or_else(|| string_field(posting, "name"))?;
    let link = string_field(posting, "url").and_then(|href| resolve_link(page_url, &href));

    let location = posting.get("jobLocation").and_then(compose_location);
    let telecommute = string_field(posting, "jobLocationType")
        .is_some_and(|t| t.eq_ignore_ascii_case("TELECOMMUTE"));
    let remote = telecommute || location.as_deref().is_some_and(looks_remote);

    let job = ParsedJob {
        external_id: String::new(),
        title,
        url: link.clone().unwrap_or_else(|| page_url.to_string()),
        location,
        remote,
        department: None,
        description: non_empty(string_field(posting, "description").map(|d| html_to_text(&d))),
        posted_at: string_field(posting, "datePosted").and_then(|d| parse_timestamp(&d)),
    };
    Some((job, link))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    non_empty(value.get(key).and_then(Value::as_str).map(str::to_string))
}

/// `jobLocation` may be a Place, a list of Places, or a bare string.
fn compose_location(value: &Value) -> Option<String> {
    let mut parts: Vec<String> = match value {
        Value::Array(places) => places.iter().filter_map(compose_place).collect(),
        other => compose_place(other).into_iter().collect(),
    };
    parts.dedup();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn compose_place(place: &Value) -> Option<String> {
    if let Some(s) = place.as_str() {
        return non_empty(Some(s.to_string()));
    }
    let address = place.get("address")?;
    if let Some(s) = address.as_str() {
        return non_empty(Some(s.to_string()));
    }

    let country = address.get("addressCountry").and_then(|c| match c {
        Value::String(s) => Some(s.clone()),
        other => other.get("name").and_then(Value::as_str).map(str::to_string),
    });
    let parts: Vec<String> = [
        string_field(address, "addressLocality"),
        string_field(address, "addressRegion"),
        non_empty(country),
    ]
    .into_iter()
    .flatten()
    .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

// --- Pass 2: selector heuristics ---

fn extract_listing_jobs(document: &Html, page_url: &str) -> Vec<ParsedJob> {
    for (selector, name) in CONTAINERS.iter().zip(JOB_CONTAINER_SELECTORS) {
        let mut jobs = Vec::new();
        let mut seen_urls = HashSet::new();

        for element in document.select(selector) {
            let Some(title) = element_title(element) else {
                continue;
            };
            if SKIP_PATTERN.is_match(&title) {
                continue;
            }

            let link = element_link(element).and_then(|href| resolve_link(page_url, &href));
            if let Some(url) = &link {
                if !seen_urls.insert(url.clone()) {
                    continue;
                }
            }

            let location = element_location(element);
            let remote =
                location.as_deref().is_some_and(looks_remote) || looks_remote(&title);
            let job = ParsedJob {
                external_id: String::new(),
                title,
                url: link.clone().unwrap_or_else(|| page_url.to_string()),
                location,
                remote,
                department: None,
                description: None,
                posted_at: None,
            };
            let index = jobs.len();
            jobs.push(with_external_id(job, link.as_deref(), index));
        }

        if !jobs.is_empty() {
            debug!(selector = *name, jobs = jobs.len(), "Matched listing selector");
            return jobs;
        }
    }
    Vec::new()
}

fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sane_title(text: String) -> Option<String> {
    let len = text.chars().count();
    (MIN_TITLE_CHARS..=MAX_TITLE_CHARS).contains(&len).then_some(text)
}

fn element_title(element: ElementRef) -> Option<String> {
    let from_children = TITLES.iter().find_map(|selector| {
        element
            .select(selector)
            .map(element_text)
            .find_map(sane_title)
    });
    if from_children.is_some() {
        return from_children;
    }

    if element.value().name() == "a" {
        return sane_title(element_text(element));
    }
    None
}

fn element_link(element: ElementRef) -> Option<String> {
    if element.value().name() == "a" {
        if let Some(href) = element.value().attr("href") {
            return Some(href.to_string());
        }
    }
    element
        .select(&LINK)
        .find_map(|a| a.value().attr("href"))
        .map(str::to_string)
}

fn element_location(element: ElementRef) -> Option<String> {
    LOCATIONS.iter().find_map(|selector| {
        element
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty() && text.chars().count() <= MAX_LOCATION_CHARS)
    })
}

/// Resolve `href` against the page URL. Fragment-only, script and mail
/// links are not postings.
fn resolve_link(page_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
    {
        return None;
    }
    let base = Url::parse(page_url).ok()?;
    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}

// --- External ids ---

fn with_external_id(mut job: ParsedJob, link: Option<&str>, index: usize) -> ParsedJob {
    job.external_id = generate_external_id(link, &job.title, index);
    job
}

/// Stable id for a posting: a numeric id from the URL when one is present,
/// else a hash of the URL, else a hash of title and position.
pub fn generate_external_id(url: Option<&str>, title: &str, index: usize) -> String {
    if let Some(url) = url {
        let numeric = ID_PATTERNS
            .iter()
            .find_map(|re| re.captures(url).and_then(|c| c.get(1)))
            .map(|m| m.as_str().to_string());
        if let Some(id) = numeric {
            return id;
        }
        return format!("url-{}", short_hash(url));
    }
    format!("title-{}", short_hash(&format!("{}#{}", title.to_lowercase(), index)))
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::ScoutError;

    const PAGE: &str = "https://acme.example/careers";

    #[test]
    fn test_json_ld_single_posting() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {
                "@context": "https://schema.org",
                "@type": "JobPosting",
                "title": "Backend Engineer",
                "url": "/careers/jobs/48213",
                "description": "<p>Rust &amp; Postgres</p>",
                "datePosted": "2024-02-10",
                "jobLocation": {
                    "@type": "Place",
                    "address": {
                        "addressLocality": "Austin",
                        "addressRegion": "TX",
                        "addressCountry": {"@type": "Country", "name": "US"}
                    }
                }
            }
            </script></head><body><div class="job-card"><h3>Ignored Heuristic Job</h3></div></body></html>"#;

        let jobs = extract_jobs(html, PAGE);
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.title, "Backend Engineer");
        assert_eq!(job.url, "https://acme.example/careers/jobs/48213");
        assert_eq!(job.external_id, "48213");
        assert_eq!(job.location.as_deref(), Some("Austin, TX, US"));
        assert!(!job.remote);
        assert_eq!(job.description.as_deref(), Some("Rust & Postgres"));
        assert!(job.posted_at.is_some());
    }

    #[test]
    fn test_json_ld_graph_and_array() {
        let html = r#"
            <script type="application/ld+json">
            {"@graph": [
                {"@type": "Organization", "name": "Acme"},
                {"@type": "JobPosting", "title": "SRE", "jobLocationType": "TELECOMMUTE"}
            ]}
            </script>
            <script type="application/ld+json">
            [{"@type": ["JobPosting"], "title": "Designer", "jobLocation": {"address": "Remote, Europe"}}]
            </script>
            <script type="application/ld+json">{ not json</script>"#;

        let jobs = extract_jobs(html, PAGE);
        let titles: Vec<_> = jobs.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["SRE", "Designer"]);
        assert!(jobs[0].remote);
        assert_eq!(jobs[0].url, PAGE);
        assert!(jobs[0].external_id.starts_with("title-"));
        assert!(jobs[1].remote);
        assert_eq!(jobs[1].location.as_deref(), Some("Remote, Europe"));
    }

    #[test]
    fn test_heuristic_first_matching_selector_wins() {
        let html = r#"<html><body>
            <ul>
              <li class="job-item">
                <a href="/careers/jobs/1001"><h3>Senior Rust Engineer</h3></a>
                <span class="location">Remote, US</span>
              </li>
              <li class="job-item">
                <a href="jobs/1002"><h3>Staff Data Engineer</h3></a>
                <span class="location">Berlin, Germany</span>
              </li>
              <li class="job-item">
                <a href="/careers/jobs/1001"><h3>Senior Rust Engineer</h3></a>
              </li>
            </ul>
            <a href="/careers/jobs/9999">Should Not Appear</a>
        </body></html>"#;

        let jobs = extract_jobs(html, PAGE);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].title, "Senior Rust Engineer");
        assert_eq!(jobs[0].url, "https://acme.example/careers/jobs/1001");
        assert_eq!(jobs[0].external_id, "1001");
        assert_eq!(jobs[0].location.as_deref(), Some("Remote, US"));
        assert!(jobs[0].remote);
        assert_eq!(jobs[1].url, "https://acme.example/jobs/1002");
        assert!(!jobs[1].remote);
        assert!(jobs.iter().all(|j| j.title != "Should Not Appear"));
    }

    #[test]
    fn test_heuristic_skips_navigation_links() {
        let html = r#"<body>
            <a href="/careers/about">About Us</a>
            <a href="/careers/privacy">Privacy Policy</a>
            <a href="/careers/contact">Contact</a>
            <a href="/careers/engineering-manager">Engineering Manager</a>
            <a href="/careers/x">ab</a>
        </body>"#;

        let jobs = extract_jobs(html, PAGE);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Engineering Manager");
        assert!(jobs[0].external_id.starts_with("url-"));
    }

    #[test]
    fn test_heuristic_without_links_uses_title_hash() {
        let html = r#"<div class="opening"><h4>Warehouse Associate</h4></div>
                      <div class="opening"><h4>Warehouse Associate</h4></div>"#;
        let jobs = extract_jobs(html, PAGE);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].url, PAGE);
        assert_ne!(jobs[0].external_id, jobs[1].external_id);
        assert!(jobs[0].external_id.starts_with("title-"));
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert!(extract_jobs("<html><body><p>We are not hiring.</p></body></html>", PAGE).is_empty());
    }

    #[test]
    fn test_generate_external_id_patterns() {
        assert_eq!(
            generate_external_id(Some("https://x.com/jobs/123456/apply"), "t", 0),
            "123456"
        );
        assert_eq!(
            generate_external_id(Some("https://x.com/apply?gh_jid=778899"), "t", 0),
            "778899"
        );
        assert_eq!(
            generate_external_id(Some("https://x.com/en/role/4455667"), "t", 0),
            "4455667"
        );
        let hashed = generate_external_id(Some("https://x.com/roles/platform"), "t", 0);
        assert!(hashed.starts_with("url-"));
        assert_eq!(hashed, generate_external_id(Some("https://x.com/roles/platform"), "other", 3));
        assert_ne!(
            generate_external_id(None, "Engineer", 0),
            generate_external_id(None, "Engineer", 1)
        );
    }

    #[test]
    fn test_resolve_link_rejects_non_navigable() {
        assert_eq!(resolve_link(PAGE, "#top"), None);
        assert_eq!(resolve_link(PAGE, "javascript:void(0)"), None);
        assert_eq!(resolve_link(PAGE, "mailto:jobs@acme.example"), None);
        assert_eq!(
            resolve_link(PAGE, "https://other.example/job/1#apply"),
            Some("https://other.example/job/1".to_string())
        );
    }

    struct FixtureRenderer(&'static str);

    #[async_trait]
    impl PageRenderer for FixtureRenderer {
        async fn render(&self, _url: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
        async fn shutdown(&self) {}
    }

    struct FailingRenderer;

    #[async_trait]
    impl PageRenderer for FailingRenderer {
        async fn render(&self, url: &str) -> Result<String> {
            Err(ScoutError::upstream("browser", format!("Navigation to {} timed out after 30s", url)))
        }
        async fn shutdown(&self) {}
    }

    #[tokio::test]
    async fn test_crawl_uses_renderer_output() {
        let crawler = HeuristicCrawler::new(Arc::new(FixtureRenderer(
            r#"<div class="job-card"><h2>Support Lead</h2><a href="/jobs/31337">Apply</a></div>"#,
        )));
        let jobs = crawler.crawl(PAGE).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].external_id, "31337");
    }

    #[tokio::test]
    async fn test_crawl_propagates_render_failure() {
        let crawler = HeuristicCrawler::new(Arc::new(FailingRenderer));
        let err = crawler.crawl(PAGE).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
