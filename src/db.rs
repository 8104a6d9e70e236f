use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, ScoutError};
use crate::models::{
    Company, CompanyMetadata, CrawlLog, CrawlStatus, JobListing, JobProfile, JobStatus,
    ParsedJob, SourceType,
};
use crate::sources::detect_source_type;

const LISTING_COLUMNS: &str = "j.id, j.company_id, c.name, j.external_id, j.title, j.url,
    j.location, j.remote, j.department, j.description, j.posted_at,
    j.first_seen_at, j.last_seen_at, j.status, j.match_score";

const COMPANY_COLUMNS: &str = "id, user_id, name, career_url, source_type, active,
    description, headquarters, founded_year, revenue_estimate, funding_stage,
    created_at, updated_at";

const CRAWL_LOG_COLUMNS: &str = "l.id, l.company_id, c.name, l.status, l.started_at,
    l.completed_at, l.jobs_found, l.new_jobs, l.error";

/// SQLite-backed store for companies, listings, crawl logs and profiles.
///
/// The connection sits behind a mutex so the store can be shared between
/// async tasks; every method holds the lock only for its own statements.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self::from_connection(conn)?;
        db.init()?;
        Ok(db)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn init(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                career_url TEXT NOT NULL,
                source_type TEXT NOT NULL DEFAULT 'custom',
                active INTEGER NOT NULL DEFAULT 1,
                description TEXT,
                headquarters TEXT,
                founded_year INTEGER,
                revenue_estimate TEXT,
                funding_stage TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_listings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                location TEXT,
                remote INTEGER NOT NULL DEFAULT 0,
                department TEXT,
                description TEXT,
                posted_at TEXT,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new' CHECK (status IN ('new', 'viewed', 'applied', 'dismissed')),
                match_score INTEGER,
                UNIQUE (company_id, external_id)
            );

            CREATE TABLE IF NOT EXISTS crawl_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
                status TEXT NOT NULL CHECK (status IN ('running', 'success', 'failed')),
                started_at TEXT NOT NULL,
                completed_at TEXT,
                jobs_found INTEGER NOT NULL DEFAULT 0,
                new_jobs INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );

            CREATE TABLE IF NOT EXISTS job_profiles (
                user_id INTEGER PRIMARY KEY,
                keywords TEXT NOT NULL DEFAULT '[]',
                titles TEXT NOT NULL DEFAULT '[]',
                locations TEXT NOT NULL DEFAULT '[]',
                exclude_titles TEXT NOT NULL DEFAULT '[]',
                exclude_locations TEXT NOT NULL DEFAULT '[]',
                remote_only INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_companies_user ON companies(user_id, active);
            CREATE INDEX IF NOT EXISTS idx_listings_company ON job_listings(company_id);
            CREATE INDEX IF NOT EXISTS idx_listings_status ON job_listings(status);
            CREATE INDEX IF NOT EXISTS idx_crawl_logs_company ON crawl_logs(company_id);
            CREATE INDEX IF NOT EXISTS idx_crawl_logs_status ON crawl_logs(status, started_at);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_listings'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(ScoutError::config(
                "Database not initialized. Run 'scout init' first.",
            ));
        }
        Ok(())
    }

    // --- Company operations ---

    pub fn create_company(
        &self,
        user_id: i64,
        name: &str,
        career_url: &str,
        metadata: &CompanyMetadata,
    ) -> Result<Company> {
        let now = Utc::now();
        let source_type = detect_source_type(career_url);
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO companies (user_id, name, career_url, source_type, description,
                    headquarters, founded_year, revenue_estimate, funding_stage, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    user_id,
                    name,
                    career_url,
                    source_type.as_str(),
                    metadata.description,
                    metadata.headquarters,
                    metadata.founded_year,
                    metadata.revenue_estimate,
                    metadata.funding_stage,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_company(user_id, id)?
            .ok_or(ScoutError::CompanyNotFound(id))
    }

    pub fn get_company(&self, user_id: i64, company_id: i64) -> Result<Option<Company>> {
        let sql = format!(
            "SELECT {} FROM companies WHERE id = ?1 AND user_id = ?2",
            COMPANY_COLUMNS
        );
        let company = self
            .conn()
            .query_row(&sql, params![company_id, user_id], Self::row_to_company)
            .optional()?;
        Ok(company)
    }

    /// Companies of one user in stable name order.
    pub fn list_companies(&self, user_id: i64, active_only: bool) -> Result<Vec<Company>> {
        let mut sql = format!("SELECT {} FROM companies WHERE user_id = ?1", COMPANY_COLUMNS);
        if active_only {
            sql.push_str(" AND active = 1");
        }
        sql.push_str(" ORDER BY name COLLATE NOCASE, id");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([user_id], Self::row_to_company)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Change the career URL. The source type is re-detected only when the
    /// URL actually changes.
    pub fn update_company_url(&self, user_id: i64, company_id: i64, career_url: &str) -> Result<Company> {
        let company = self
            .get_company(user_id, company_id)?
            .ok_or(ScoutError::CompanyNotFound(company_id))?;
        if company.career_url != career_url {
            self.conn().execute(
                "UPDATE companies SET career_url = ?1, source_type = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    career_url,
                    detect_source_type(career_url).as_str(),
                    Utc::now(),
                    company_id
                ],
            )?;
        }
        self.get_company(user_id, company_id)?
            .ok_or(ScoutError::CompanyNotFound(company_id))
    }

    pub fn set_company_active(&self, user_id: i64, company_id: i64, active: bool) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE companies SET active = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
            params![active, Utc::now(), company_id, user_id],
        )?;
        if changed == 0 {
            return Err(ScoutError::CompanyNotFound(company_id));
        }
        Ok(())
    }

    /// Deletes the company together with its listings and crawl logs.
    pub fn delete_company(&self, user_id: i64, company_id: i64) -> Result<()> {
        let changed = self.conn().execute(
            "DELETE FROM companies WHERE id = ?1 AND user_id = ?2",
            params![company_id, user_id],
        )?;
        if changed == 0 {
            return Err(ScoutError::CompanyNotFound(company_id));
        }
        Ok(())
    }

    fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
        let source: String = row.get(4)?;
        Ok(Company {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            career_url: row.get(3)?,
            source_type: SourceType::parse(&source),
            active: row.get(5)?,
            metadata: CompanyMetadata {
                description: row.get(6)?,
                headquarters: row.get(7)?,
                founded_year: row.get(8)?,
                revenue_estimate: row.get(9)?,
                funding_stage: row.get(10)?,
            },
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    // --- Profile operations ---

    pub fn get_profile(&self, user_id: i64) -> Result<Option<JobProfile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT keywords, titles, locations, exclude_titles, exclude_locations, remote_only
                 FROM job_profiles WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(JobProfile {
                        keywords: json_list(row, 0)?,
                        titles: json_list(row, 1)?,
                        locations: json_list(row, 2)?,
                        exclude_titles: json_list(row, 3)?,
                        exclude_locations: json_list(row, 4)?,
                        remote_only: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    pub fn save_profile(&self, user_id: i64, profile: &JobProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO job_profiles (user_id, keywords, titles, locations, exclude_titles,
                exclude_locations, remote_only, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id) DO UPDATE SET
                keywords = excluded.keywords,
                titles = excluded.titles,
                locations = excluded.locations,
                exclude_titles = excluded.exclude_titles,
                exclude_locations = excluded.exclude_locations,
                remote_only = excluded.remote_only,
                updated_at = excluded.updated_at",
            params![
                user_id,
                serde_json::to_string(&profile.keywords)?,
                serde_json::to_string(&profile.titles)?,
                serde_json::to_string(&profile.locations)?,
                serde_json::to_string(&profile.exclude_titles)?,
                serde_json::to_string(&profile.exclude_locations)?,
                profile.remote_only,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    // --- Job listing operations ---

    /// Insert or refresh a crawl's postings keyed by (company_id, external_id).
    ///
    /// An existing row gets its mutable fields, score and `last_seen_at`
    /// updated; `status` and `first_seen_at` are left alone. All rows are
    /// written in one transaction, so a failure part way leaves none of
    /// them. Returns the number of newly inserted rows.
    pub fn upsert_listings<'a, I>(&self, company_id: i64, listings: I, now: DateTime<Utc>) -> Result<u32>
    where
        I: IntoIterator<Item = (&'a ParsedJob, Option<u8>)>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for (job, score) in listings {
            if upsert_listing_row(&tx, company_id, job, score, now)? {
                inserted += 1;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    #[cfg(test)]
    pub fn upsert_listing(
        &self,
        company_id: i64,
        job: &ParsedJob,
        score: Option<u8>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.upsert_listings(company_id, [(job, score)], now)? == 1)
    }

    #[cfg(test)]
    pub fn get_listing_by_key(&self, company_id: i64, external_id: &str) -> Result<Option<JobListing>> {
        let sql = format!(
            "SELECT {} FROM job_listings j JOIN companies c ON j.company_id = c.id
             WHERE j.company_id = ?1 AND j.external_id = ?2",
            LISTING_COLUMNS
        );
        let listing = self
            .conn()
            .query_row(&sql, params![company_id, external_id], Self::row_to_listing)
            .optional()?;
        Ok(listing)
    }

    pub fn get_job_listing(&self, user_id: i64, job_id: i64) -> Result<Option<JobListing>> {
        let sql = format!(
            "SELECT {} FROM job_listings j JOIN companies c ON j.company_id = c.id
             WHERE j.id = ?1 AND c.user_id = ?2",
            LISTING_COLUMNS
        );
        let listing = self
            .conn()
            .query_row(&sql, params![job_id, user_id], Self::row_to_listing)
            .optional()?;
        Ok(listing)
    }

    /// Keyset page of a user's listings, ordered by id, starting after `after_id`.
    pub fn list_listings_page(&self, user_id: i64, after_id: i64, limit: usize) -> Result<Vec<JobListing>> {
        let sql = format!(
            "SELECT {} FROM job_listings j JOIN companies c ON j.company_id = c.id
             WHERE c.user_id = ?1 AND j.id > ?2
             ORDER BY j.id
             LIMIT ?3",
            LISTING_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, after_id, limit as i64], Self::row_to_listing)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_job_listings(
        &self,
        user_id: i64,
        status: Option<JobStatus>,
        min_score: Option<u8>,
        limit: usize,
    ) -> Result<Vec<JobListing>> {
        let sql = format!(
            "SELECT {} FROM job_listings j JOIN companies c ON j.company_id = c.id
             WHERE c.user_id = ?1
               AND (?2 IS NULL OR j.status = ?2)
               AND (?3 IS NULL OR j.match_score >= ?3)
             ORDER BY j.match_score IS NULL, j.match_score DESC, j.last_seen_at DESC
             LIMIT ?4",
            LISTING_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![user_id, status.map(|s| s.as_str()), min_score, limit as i64],
            Self::row_to_listing,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn update_listing_score(&self, listing_id: i64, score: u8) -> Result<()> {
        self.conn().execute(
            "UPDATE job_listings SET match_score = ?1 WHERE id = ?2",
            params![score, listing_id],
        )?;
        Ok(())
    }

    /// User-driven lifecycle change; crawls never call this.
    pub fn set_job_status(&self, user_id: i64, job_id: i64, status: JobStatus) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE job_listings SET status = ?1
             WHERE id = ?2 AND company_id IN (SELECT id FROM companies WHERE user_id = ?3)",
            params![status.as_str(), job_id, user_id],
        )?;
        if changed == 0 {
            return Err(ScoutError::JobNotFound(job_id));
        }
        Ok(())
    }

    pub fn count_listings(&self, company_id: i64) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM job_listings WHERE company_id = ?1",
            [company_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<JobListing> {
        let status: String = row.get(13)?;
        Ok(JobListing {
            id: row.get(0)?,
            company_id: row.get(1)?,
            company_name: row.get(2)?,
            external_id: row.get(3)?,
            title: row.get(4)?,
            url: row.get(5)?,
            location: row.get(6)?,
            remote: row.get(7)?,
            department: row.get(8)?,
            description: row.get(9)?,
            posted_at: row.get(10)?,
            first_seen_at: row.get(11)?,
            last_seen_at: row.get(12)?,
            status: status
                .parse()
                .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(13, Type::Text, e.into()))?,
            match_score: row.get(14)?,
        })
    }

    // --- Crawl log operations ---

    pub fn create_crawl_log(&self, company_id: i64, started_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO crawl_logs (company_id, status, started_at) VALUES (?1, 'running', ?2)",
            params![company_id, started_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Moves a running log to its terminal state. Only `running` rows are
    /// touched, so a log is closed at most once.
    pub fn finish_crawl_log(
        &self,
        log_id: i64,
        status: CrawlStatus,
        jobs_found: u32,
        new_jobs: u32,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE crawl_logs SET status = ?1, jobs_found = ?2, new_jobs = ?3, error = ?4,
                completed_at = ?5
             WHERE id = ?6 AND status = 'running'",
            params![status.as_str(), jobs_found, new_jobs, error, completed_at, log_id],
        )?;
        Ok(())
    }

    /// Force-fails every `running` log started before `cutoff`. Safe to run
    /// repeatedly; returns the number of rows changed.
    pub fn fail_stale_crawl_logs(
        &self,
        cutoff: DateTime<Utc>,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE crawl_logs SET status = 'failed', error = ?1, completed_at = ?2
             WHERE status = 'running' AND started_at < ?3",
            params![message, now, cutoff],
        )?;
        Ok(changed)
    }

    pub fn get_crawl_log(&self, log_id: i64) -> Result<Option<CrawlLog>> {
        let sql = format!(
            "SELECT {} FROM crawl_logs l JOIN companies c ON l.company_id = c.id WHERE l.id = ?1",
            CRAWL_LOG_COLUMNS
        );
        let log = self
            .conn()
            .query_row(&sql, [log_id], Self::row_to_crawl_log)
            .optional()?;
        Ok(log)
    }

    pub fn list_crawl_logs(
        &self,
        user_id: i64,
        company_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CrawlLog>> {
        let sql = format!(
            "SELECT {} FROM crawl_logs l JOIN companies c ON l.company_id = c.id
             WHERE c.user_id = ?1 AND (?2 IS NULL OR l.company_id = ?2)
             ORDER BY l.started_at DESC, l.id DESC
             LIMIT ?3",
            CRAWL_LOG_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, company_id, limit as i64], Self::row_to_crawl_log)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn row_to_crawl_log(row: &rusqlite::Row) -> rusqlite::Result<CrawlLog> {
        let status: String = row.get(3)?;
        let status = CrawlStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown crawl status '{}'", status).into(),
            )
        })?;
        Ok(CrawlLog {
            id: row.get(0)?,
            company_id: row.get(1)?,
            company_name: row.get(2)?,
            status,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            jobs_found: row.get(6)?,
            new_jobs: row.get(7)?,
            error: row.get(8)?,
        })
    }
}

fn json_list(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Returns `true` when a new row was inserted.
fn upsert_listing_row(
    conn: &Connection,
    company_id: i64,
    job: &ParsedJob,
    score: Option<u8>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM job_listings WHERE company_id = ?1 AND external_id = ?2",
            params![company_id, job.external_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE job_listings SET title = ?1, url = ?2, location = ?3, remote = ?4,
                    department = ?5, description = ?6, posted_at = ?7, match_score = ?8,
                    last_seen_at = ?9
                 WHERE id = ?10",
                params![
                    job.title,
                    job.url,
                    job.location,
                    job.remote,
                    job.department,
                    job.description,
                    job.posted_at,
                    score,
                    now,
                    id
                ],
            )?;
            Ok(false)
        }
        None => {
            conn.execute(
                "INSERT INTO job_listings (company_id, external_id, title, url, location, remote,
                    department, description, posted_at, first_seen_at, last_seen_at, status, match_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, 'new', ?11)",
                params![
                    company_id,
                    job.external_id,
                    job.title,
                    job.url,
                    job.location,
                    job.remote,
                    job.department,
                    job.description,
                    job.posted_at,
                    now,
                    score
                ],
            )?;
            Ok(true)
        }
    }
}
