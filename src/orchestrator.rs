//! Runs crawls: picks an adapter or the page crawler per company, stores
//! and scores postings, and keeps the crawl audit log.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::config::CrawlSettings;
use crate::db::Database;
use crate::error::{Result, ScoutError};
use crate::heuristic::HeuristicCrawler;
use crate::models::{
    BatchCrawlResult, Company, CrawlLog, CrawlResult, CrawlStatus, ParsedJob, RescoreSummary,
    SkippedCompany,
};
use crate::scoring::{score, score_batch, score_breakdown, ScoreBreakdown};
use crate::sources::AdapterRegistry;

pub struct CrawlOrchestrator {
    db: Arc<Database>,
    registry: AdapterRegistry,
    crawler: HeuristicCrawler,
    settings: CrawlSettings,
    // One crawl at a time per process; a second caller fails fast.
    crawl_lock: Semaphore,
}

impl CrawlOrchestrator {
    pub fn new(
        db: Arc<Database>,
        registry: AdapterRegistry,
        crawler: HeuristicCrawler,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            db,
            registry,
            crawler,
            settings,
            crawl_lock: Semaphore::new(1),
        }
    }

    /// Crawl one company owned by `user_id`.
    ///
    /// Crawl failures come back as a `failed` result with a matching log
    /// row. Only lock contention, an unknown company and storage errors
    /// before the crawl starts are returned as `Err`.
    pub async fn crawl_company(&self, user_id: i64, company_id: i64) -> Result<CrawlResult> {
        self.recover_stale_crawls()?;
        let _permit = self.try_lock()?;

        let company = self
            .db
            .get_company(user_id, company_id)?
            .ok_or(ScoutError::CompanyNotFound(company_id))?;

        Ok(self.crawl_one(user_id, &company).await)
    }

    /// Crawl every active company of `user_id`, in name order.
    ///
    /// With `api_only`, companies without a provider adapter are skipped
    /// and reported instead of going through the browser.
    pub async fn crawl_all_companies(&self, user_id: i64, api_only: bool) -> Result<BatchCrawlResult> {
        self.recover_stale_crawls()?;
        let _permit = self.try_lock()?;

        let mut batch = BatchCrawlResult::default();
        let mut queue = Vec::new();
        for company in self.db.list_companies(user_id, true)? {
            if api_only && self.registry.get(company.source_type).is_none() {
                batch.skipped.push(SkippedCompany {
                    company_id: company.id,
                    company_name: company.name.clone(),
                    source_type: company.source_type,
                });
            } else {
                queue.push(company);
            }
        }

        let browser_involved = queue
            .iter()
            .any(|c| self.registry.get(c.source_type).is_none());
        let delay = self.settings.company_delay(browser_involved);
        let restart_every = self.settings.browser_restart_interval;

        info!(
            user_id,
            companies = queue.len(),
            skipped = batch.skipped.len(),
            browser_involved,
            "Starting batch crawl"
        );

        for (index, company) in queue.iter().enumerate() {
            if index > 0 {
                if browser_involved && restart_every > 0 && index % restart_every == 0 {
                    info!(after = index, "Restarting browser");
                    self.crawler.shutdown_browser().await;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let result = self.crawl_one(user_id, company).await;
            if result.status == CrawlStatus::Success {
                batch.total_found += result.jobs_found;
                batch.total_new += result.new_jobs;
            }
            batch.results.push(result);
        }

        self.crawler.shutdown_browser().await;

        info!(
            user_id,
            crawled = batch.results.len(),
            total_found = batch.total_found,
            total_new = batch.total_new,
            "Batch crawl finished"
        );
        Ok(batch)
    }

    pub fn get_crawl_logs(
        &self,
        user_id: i64,
        company_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CrawlLog>> {
        self.db.list_crawl_logs(user_id, company_id, limit)
    }

    /// Re-score every stored listing of `user_id` against the current
    /// profile, writing only rows whose score changed.
    pub fn recalculate_match_scores(&self, user_id: i64) -> Result<RescoreSummary> {
        let profile = self.db.get_profile(user_id)?;
        let batch_size = self.settings.recalc_batch_size.max(1);
        let mut summary = RescoreSummary::default();
        let mut after_id = 0;

        loop {
            let page = self.db.list_listings_page(user_id, after_id, batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            for listing in &page {
                let new_score = score(&listing.as_parsed(), profile.as_ref());
                summary.processed += 1;
                if listing.match_score != Some(new_score) {
                    self.db.update_listing_score(listing.id, new_score)?;
                    summary.updated += 1;
                }
            }
            debug!(processed = summary.processed, "Rescored batch");

            if page.len() < batch_size {
                break;
            }
        }

        info!(
            user_id,
            processed = summary.processed,
            updated = summary.updated,
            "Match scores recalculated"
        );
        Ok(summary)
    }

    /// Per-category explanation of a stored listing's score.
    pub fn explain_score(&self, user_id: i64, job_id: i64) -> Result<ScoreBreakdown> {
        let listing = self
            .db
            .get_job_listing(user_id, job_id)?
            .ok_or(ScoutError::JobNotFound(job_id))?;
        let profile = self.db.get_profile(user_id)?;
        Ok(score_breakdown(&listing.as_parsed(), profile.as_ref()))
    }

    /// Fail `running` logs left behind by a crashed process.
    pub fn recover_stale_crawls(&self) -> Result<usize> {
        let minutes = self.settings.stale_after_minutes;
        let now = Utc::now();
        let cutoff = now - ChronoDuration::minutes(minutes);
        let message = format!(
            "Crawl timed out: still running after {} minutes, the process likely crashed",
            minutes
        );
        let recovered = self.db.fail_stale_crawl_logs(cutoff, &message, now)?;
        if recovered > 0 {
            warn!(recovered, "Marked stale crawls as failed");
        }
        Ok(recovered)
    }

    fn try_lock(&self) -> Result<SemaphorePermit<'_>> {
        self.crawl_lock
            .try_acquire()
            .map_err(|_| ScoutError::CrawlInProgress)
    }

    /// Crawl a single company and close its log. Never fails: every error
    /// ends up in the returned result.
    async fn crawl_one(&self, user_id: i64, company: &Company) -> CrawlResult {
        let log_id = match self.db.create_crawl_log(company.id, Utc::now()) {
            Ok(id) => id,
            Err(e) => {
                error!(company_id = company.id, error = %e, "Could not open crawl log");
                return CrawlResult::failed(company, e.to_string());
            }
        };
        info!(
            company_id = company.id,
            company = %company.name,
            source = %company.source_type,
            "Crawling company"
        );

        let (result, log_error) = match self.run_crawl(user_id, company).await {
            Ok((jobs_found, new_jobs)) => {
                info!(company_id = company.id, jobs_found, new_jobs, "Crawl succeeded");
                (
                    CrawlResult {
                        company_id: company.id,
                        company_name: company.name.clone(),
                        status: CrawlStatus::Success,
                        jobs_found,
                        new_jobs,
                        error: None,
                    },
                    None,
                )
            }
            Err(e) => {
                warn!(company_id = company.id, error = %e, "Crawl failed");
                let message = e.to_string();
                (CrawlResult::failed(company, message.clone()), Some(message))
            }
        };

        if let Err(e) = self.db.finish_crawl_log(
            log_id,
            result.status,
            result.jobs_found,
            result.new_jobs,
            log_error.as_deref(),
            Utc::now(),
        ) {
            error!(log_id, error = %e, "Could not close crawl log");
        }
        result
    }

    async fn run_crawl(&self, user_id: i64, company: &Company) -> Result<(u32, u32)> {
        let profile = self.db.get_profile(user_id)?;
        let jobs = self.fetch_postings(company).await?;
        let scores = score_batch(&jobs, profile.as_ref());

        let listings = jobs.iter().map(|job| (job, scores.get(&job.external_id).copied()));
        let new_jobs = self.db.upsert_listings(company.id, listings, Utc::now())?;
        Ok((jobs.len() as u32, new_jobs))
    }

    async fn fetch_postings(&self, company: &Company) -> Result<Vec<ParsedJob>> {
        match self.registry.get(company.source_type) {
            Some(adapter) => adapter.parse(&company.career_url).await,
            None => self.crawler.crawl(&company.career_url).await,
        }
    }
}

impl CrawlResult {
    fn failed(company: &Company, error: String) -> Self {
        Self {
            company_id: company.id,
            company_name: company.name.clone(),
            status: CrawlStatus::Failed,
            jobs_found: 0,
            new_jobs: 0,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::PageRenderer;
    use crate::models::{CompanyMetadata, JobProfile, JobStatus, SourceType};
    use crate::sources::SourceAdapter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const USER: i64 = 1;

    fn posting(id: &str, title: &str) -> ParsedJob {
        ParsedJob {
            external_id: id.to_string(),
            title: title.to_string(),
            url: format!("https://boards.greenhouse.io/acme/jobs/{}", id),
            location: Some("Remote, US".to_string()),
            remote: true,
            department: None,
            description: None,
            posted_at: None,
        }
    }

    struct StaticAdapter {
        jobs: Mutex<Vec<ParsedJob>>,
        fail_with: Option<String>,
    }

    impl StaticAdapter {
        fn serving(jobs: Vec<ParsedJob>) -> Arc<Self> {
            Arc::new(Self {
                jobs: Mutex::new(jobs),
                fail_with: None,
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                jobs: Mutex::new(Vec::new()),
                fail_with: Some(message.to_string()),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_type(&self) -> SourceType {
            SourceType::Greenhouse
        }

        fn extract_token(&self, _career_url: &str) -> Option<String> {
            Some("acme".to_string())
        }

        async fn parse(&self, _career_url: &str) -> Result<Vec<ParsedJob>> {
            match &self.fail_with {
                Some(message) => Err(ScoutError::upstream(SourceType::Greenhouse.as_str(), message)),
                None => Ok(self.jobs.lock().unwrap().clone()),
            }
        }
    }

    /// Blocks inside `parse` until released.
    struct GatedAdapter {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SourceAdapter for GatedAdapter {
        fn source_type(&self) -> SourceType {
            SourceType::Greenhouse
        }

        fn extract_token(&self, _career_url: &str) -> Option<String> {
            Some("acme".to_string())
        }

        async fn parse(&self, _career_url: &str) -> Result<Vec<ParsedJob>> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(vec![posting("1", "Engineer")])
        }
    }

    #[derive(Default)]
    struct CountingRenderer {
        renders: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl PageRenderer for CountingRenderer {
        async fn render(&self, url: &str) -> Result<String> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(ScoutError::upstream("browser", "Navigation failed"));
            }
            Ok(r#"<div class="job-card"><h2>Field Technician</h2><a href="/jobs/70001">Apply</a></div>"#
                .to_string())
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn quiet_settings() -> CrawlSettings {
        CrawlSettings {
            api_delay_ms: 0,
            browser_delay_ms: 0,
            ..CrawlSettings::default()
        }
    }

    fn setup(
        adapter: Arc<dyn SourceAdapter>,
        settings: CrawlSettings,
    ) -> (CrawlOrchestrator, Arc<Database>, Arc<CountingRenderer>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let renderer = Arc::new(CountingRenderer::default());
        let orchestrator = CrawlOrchestrator::new(
            Arc::clone(&db),
            AdapterRegistry::empty().with_adapter(adapter),
            HeuristicCrawler::new(renderer.clone()),
            settings,
        );
        (orchestrator, db, renderer)
    }

    fn add_company(db: &Database, name: &str, url: &str) -> Company {
        db.create_company(USER, name, url, &CompanyMetadata::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_crawl_company_counts_new_and_existing() {
        let jobs = vec![
            posting("101", "Backend Engineer"),
            posting("102", "Frontend Engineer"),
            posting("103", "Designer"),
        ];
        let (orchestrator, db, _) = setup(StaticAdapter::serving(jobs.clone()), quiet_settings());
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");
        db.upsert_listing(company.id, &jobs[0], None, Utc::now()).unwrap();

        let result = orchestrator.crawl_company(USER, company.id).await.unwrap();
        assert_eq!(result.status, CrawlStatus::Success);
        assert_eq!(result.jobs_found, 3);
        assert_eq!(result.new_jobs, 2);
        assert_eq!(db.count_listings(company.id).unwrap(), 3);

        let logs = orchestrator.get_crawl_logs(USER, Some(company.id), 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, CrawlStatus::Success);
        assert_eq!(logs[0].jobs_found, 3);
        assert_eq!(logs[0].new_jobs, 2);
        assert!(logs[0].completed_at.is_some());
        assert!(logs[0].error.is_none());

        // No profile yet, so everything gets the neutral score
        let stored = db.get_listing_by_key(company.id, "103").unwrap().unwrap();
        assert_eq!(stored.match_score, Some(50));
    }

    #[tokio::test]
    async fn test_recrawl_is_idempotent_and_keeps_status() {
        let jobs = vec![posting("1", "Engineer"), posting("2", "Analyst")];
        let (orchestrator, db, _) = setup(StaticAdapter::serving(jobs), quiet_settings());
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");

        orchestrator.crawl_company(USER, company.id).await.unwrap();
        let before = db.get_listing_by_key(company.id, "1").unwrap().unwrap();
        db.set_job_status(USER, before.id, JobStatus::Applied).unwrap();

        let second = orchestrator.crawl_company(USER, company.id).await.unwrap();
        assert_eq!(second.jobs_found, 2);
        assert_eq!(second.new_jobs, 0);
        assert_eq!(db.count_listings(company.id).unwrap(), 2);

        let after = db.get_listing_by_key(company.id, "1").unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Applied);
        assert_eq!(after.first_seen_at, before.first_seen_at);
        assert!(after.last_seen_at >= before.last_seen_at);
    }

    #[tokio::test]
    async fn test_adapter_failure_becomes_failed_log() {
        let (orchestrator, db, _) = setup(StaticAdapter::failing("HTTP 500"), quiet_settings());
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");

        let result = orchestrator.crawl_company(USER, company.id).await.unwrap();
        assert_eq!(result.status, CrawlStatus::Failed);
        assert_eq!(result.jobs_found, 0);
        let message = result.error.unwrap();
        assert!(message.contains("HTTP 500"));

        let logs = orchestrator.get_crawl_logs(USER, Some(company.id), 10).unwrap();
        assert_eq!(logs[0].status, CrawlStatus::Failed);
        assert_eq!(logs[0].error.as_deref(), Some(message.as_str()));
        assert!(logs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_or_foreign_company_is_not_found() {
        let (orchestrator, db, _) = setup(StaticAdapter::serving(vec![]), quiet_settings());
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");

        let err = orchestrator.crawl_company(2, company.id).await.unwrap_err();
        assert!(matches!(err, ScoutError::CompanyNotFound(id) if id == company.id));
        let err = orchestrator.crawl_company(USER, 9999).await.unwrap_err();
        assert!(matches!(err, ScoutError::CompanyNotFound(9999)));
        assert!(orchestrator.get_crawl_logs(USER, None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_crawl_is_rejected_while_one_runs() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let adapter = Arc::new(GatedAdapter {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        });
        let (orchestrator, db, _) = setup(adapter, quiet_settings());
        let orchestrator = Arc::new(orchestrator);
        let gated = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");
        let custom = add_company(&db, "Bolt", "https://bolt.example/careers");

        let running = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            let id = gated.id;
            async move { orchestrator.crawl_company(USER, id).await }
        });
        started.notified().await;

        let err = orchestrator.crawl_company(USER, custom.id).await.unwrap_err();
        assert!(matches!(err, ScoutError::CrawlInProgress));
        let err = orchestrator.crawl_all_companies(USER, false).await.unwrap_err();
        assert!(matches!(err, ScoutError::CrawlInProgress));
        // Rejected calls leave no trace in the audit log
        assert!(orchestrator
            .get_crawl_logs(USER, Some(custom.id), 10)
            .unwrap()
            .is_empty());

        release.notify_one();
        let first = running.await.unwrap().unwrap();
        assert_eq!(first.status, CrawlStatus::Success);

        let next = orchestrator.crawl_company(USER, custom.id).await.unwrap();
        assert_eq!(next.status, CrawlStatus::Success);
    }

    #[tokio::test]
    async fn test_stale_running_logs_are_failed_before_crawling() {
        let (orchestrator, db, _) = setup(StaticAdapter::serving(vec![]), quiet_settings());
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");
        let stale = db
            .create_crawl_log(company.id, Utc::now() - ChronoDuration::hours(2))
            .unwrap();
        let recent = db
            .create_crawl_log(company.id, Utc::now() - ChronoDuration::minutes(1))
            .unwrap();

        orchestrator.crawl_company(USER, company.id).await.unwrap();

        let stale = db.get_crawl_log(stale).unwrap().unwrap();
        assert_eq!(stale.status, CrawlStatus::Failed);
        assert!(stale.error.unwrap().contains("timed out"));
        assert!(stale.completed_at.is_some());

        let recent = db.get_crawl_log(recent).unwrap().unwrap();
        assert_eq!(recent.status, CrawlStatus::Running);

        assert_eq!(orchestrator.recover_stale_crawls().unwrap(), 0);
    }

    fn batch_fixture(
        settings: CrawlSettings,
    ) -> (CrawlOrchestrator, Arc<Database>, Arc<CountingRenderer>) {
        let adapter = StaticAdapter::serving(vec![posting("1", "Engineer"), posting("2", "Analyst")]);
        let (orchestrator, db, renderer) = setup(adapter, settings);
        add_company(&db, "Zeta", "https://boards.greenhouse.io/zeta");
        add_company(&db, "Alpha", "https://alpha.example/careers");
        // Lever has no adapter registered here, so it falls back to the page crawler
        add_company(&db, "Mid", "https://jobs.lever.co/mid");
        add_company(&db, "Broken", "https://broken.example/careers");
        let dormant = add_company(&db, "Dormant", "https://dormant.example/careers");
        db.set_company_active(USER, dormant.id, false).unwrap();
        (orchestrator, db, renderer)
    }

    #[tokio::test]
    async fn test_batch_isolates_failures_and_orders_by_name() {
        let settings = CrawlSettings {
            browser_restart_interval: 2,
            ..quiet_settings()
        };
        let (orchestrator, _db, renderer) = batch_fixture(settings);

        let batch = orchestrator.crawl_all_companies(USER, false).await.unwrap();
        let names: Vec<_> = batch.results.iter().map(|r| r.company_name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Broken", "Mid", "Zeta"]);

        assert_eq!(batch.results[1].status, CrawlStatus::Failed);
        assert!(batch.results[1].error.is_some());
        assert!(batch
            .results
            .iter()
            .filter(|r| r.company_name != "Broken")
            .all(|r| r.status == CrawlStatus::Success));

        assert_eq!(batch.total_found, 4);
        assert_eq!(batch.total_new, 4);
        assert!(batch.skipped.is_empty());

        assert_eq!(renderer.renders.load(Ordering::SeqCst), 3);
        // One restart before the third company plus the final close
        assert_eq!(renderer.shutdowns.load(Ordering::SeqCst), 2);

        let logs = orchestrator.get_crawl_logs(USER, None, 10).unwrap();
        assert_eq!(logs.len(), 4);
        assert!(logs.iter().all(|l| l.status != CrawlStatus::Running));
    }

    #[tokio::test]
    async fn test_batch_api_only_skips_browser_companies() {
        let (orchestrator, _db, renderer) = batch_fixture(quiet_settings());

        let batch = orchestrator.crawl_all_companies(USER, true).await.unwrap();
        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].company_name, "Zeta");
        assert_eq!(batch.total_new, 2);

        let skipped: Vec<_> = batch.skipped.iter().map(|s| s.company_name.as_str()).collect();
        assert_eq!(skipped, vec!["Alpha", "Broken", "Mid"]);
        assert_eq!(batch.skipped[2].source_type, SourceType::Lever);
        assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recalculate_only_writes_changed_scores() {
        let settings = CrawlSettings {
            recalc_batch_size: 1,
            ..quiet_settings()
        };
        let adapter = StaticAdapter::serving(vec![
            posting("1", "Rust Engineer"),
            posting("2", "Designer"),
            posting("3", "Rust Developer"),
        ]);
        let (orchestrator, db, _) = setup(adapter, settings);
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");
        orchestrator.crawl_company(USER, company.id).await.unwrap();

        let profile = JobProfile {
            keywords: vec!["rust".to_string()],
            ..Default::default()
        };
        db.save_profile(USER, &profile).unwrap();

        let summary = orchestrator.recalculate_match_scores(USER).unwrap();
        assert_eq!(summary, RescoreSummary { processed: 3, updated: 3 });
        let designer = db.get_listing_by_key(company.id, "2").unwrap().unwrap();
        assert_eq!(designer.match_score, Some(0));

        let again = orchestrator.recalculate_match_scores(USER).unwrap();
        assert_eq!(again, RescoreSummary { processed: 3, updated: 0 });

        // Other users' listings are untouched
        assert_eq!(
            orchestrator.recalculate_match_scores(2).unwrap(),
            RescoreSummary::default()
        );
    }

    #[tokio::test]
    async fn test_explain_score_for_stored_listing() {
        let (orchestrator, db, _) =
            setup(StaticAdapter::serving(vec![posting("1", "Rust Engineer")]), quiet_settings());
        let company = add_company(&db, "Acme", "https://boards.greenhouse.io/acme");
        orchestrator.crawl_company(USER, company.id).await.unwrap();
        db.save_profile(
            USER,
            &JobProfile {
                remote_only: true,
                ..Default::default()
            },
        )
        .unwrap();

        let listing = db.get_listing_by_key(company.id, "1").unwrap().unwrap();
        let breakdown = orchestrator.explain_score(USER, listing.id).unwrap();
        assert_eq!(breakdown.total, 100);
        assert_eq!(breakdown.categories[0].category, "remote");

        let err = orchestrator.explain_score(2, listing.id).unwrap_err();
        assert!(matches!(err, ScoutError::JobNotFound(_)));
    }
}
