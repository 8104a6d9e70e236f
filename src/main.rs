use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use scout::browser::{BrowserManager, PageRenderer};
use scout::config::Settings;
use scout::db::Database;
use scout::heuristic::HeuristicCrawler;
use scout::models::{CompanyMetadata, CrawlStatus, JobProfile, JobStatus};
use scout::orchestrator::CrawlOrchestrator;
use scout::sources::AdapterRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Job discovery - crawl career pages and rank postings against your profile")]
struct Cli {
    /// Path to config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Act on behalf of this user
    #[arg(long, global = true, default_value = "1")]
    user: i64,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage tracked companies
    Company {
        #[command(subcommand)]
        command: CompanyCommands,
    },

    /// Manage the job profile used for scoring
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Crawl career pages for new postings
    Crawl {
        /// Only crawl this company
        #[arg(short, long)]
        company: Option<i64>,

        /// Skip companies that would need the browser
        #[arg(long)]
        api_only: bool,
    },

    /// Show recent crawl runs
    Logs {
        /// Filter by company ID
        #[arg(short, long)]
        company: Option<i64>,

        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Browse discovered postings
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Recompute match scores after a profile change
    Rescore,
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// Track a company by its career page URL
    Add {
        /// Company name
        name: String,

        /// Career page URL
        url: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        headquarters: Option<String>,

        #[arg(long)]
        founded: Option<i32>,

        #[arg(long)]
        revenue: Option<String>,

        #[arg(long)]
        funding: Option<String>,
    },

    /// List tracked companies
    List {
        /// Include inactive companies
        #[arg(short, long)]
        all: bool,
    },

    /// Change a company's career page URL
    SetUrl {
        /// Company ID
        id: i64,

        /// New career page URL
        url: String,
    },

    /// Stop tracking a company and drop its postings
    Remove {
        /// Company ID
        id: i64,
    },

    /// Include a company in batch crawls
    Activate {
        /// Company ID
        id: i64,
    },

    /// Exclude a company from batch crawls
    Deactivate {
        /// Company ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Replace the job profile
    Set {
        /// Keyword to look for in title, description and department (repeatable)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Desired job title (repeatable)
        #[arg(short, long = "title")]
        titles: Vec<String>,

        /// Preferred location (repeatable)
        #[arg(short, long = "location")]
        locations: Vec<String>,

        /// Title fragment that rules a posting out (repeatable)
        #[arg(long = "exclude-title")]
        exclude_titles: Vec<String>,

        /// Location that rules a posting out (repeatable)
        #[arg(long = "exclude-location")]
        exclude_locations: Vec<String>,

        /// Only remote postings score on the remote category
        #[arg(long)]
        remote_only: bool,
    },

    /// Show the current job profile
    Show,
}

#[derive(Subcommand)]
enum JobCommands {
    /// List postings, best matches first
    List {
        /// Filter by status (new, viewed, applied, dismissed)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Minimum match score
        #[arg(short, long)]
        min_score: Option<u8>,

        /// Number of postings to show
        #[arg(short, long, default_value = "25")]
        limit: usize,
    },

    /// Show posting details and its score breakdown
    Show {
        /// Job ID
        id: i64,
    },

    /// Update the status of a posting
    Status {
        /// Job ID
        id: i64,

        /// New status (new, viewed, applied, dismissed)
        status: JobStatus,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("scout=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scout=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_database(settings: &Settings) -> Result<Arc<Database>> {
    let path = settings.database_path();
    let db = Database::open(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(db))
}

fn build_orchestrator(
    db: Arc<Database>,
    settings: &Settings,
) -> Result<(CrawlOrchestrator, Arc<BrowserManager>)> {
    let registry = AdapterRegistry::with_default_adapters().context("Failed to set up HTTP client")?;
    let browser = Arc::new(BrowserManager::new(settings.webdriver_url.as_str()));
    let crawler = HeuristicCrawler::new(browser.clone());
    let orchestrator = CrawlOrchestrator::new(db, registry, crawler, settings.crawl.clone());
    Ok((orchestrator, browser))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load(&config_path)?;
    let db = open_database(&settings)?;
    let user = cli.user;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", settings.database_path().display());
        }

        Commands::Company { command } => {
            db.ensure_initialized()?;
            match command {
                CompanyCommands::Add {
                    name,
                    url,
                    description,
                    headquarters,
                    founded,
                    revenue,
                    funding,
                } => {
                    let metadata = CompanyMetadata {
                        description,
                        headquarters,
                        founded_year: founded,
                        revenue_estimate: revenue,
                        funding_stage: funding,
                    };
                    let company = db.create_company(user, &name, &url, &metadata)?;
                    println!(
                        "Added company #{} '{}' (source: {})",
                        company.id, company.name, company.source_type
                    );
                }

                CompanyCommands::List { all } => {
                    let companies = db.list_companies(user, !all)?;
                    if companies.is_empty() {
                        println!("No companies found.");
                    } else {
                        println!(
                            "{:<6} {:<7} {:<16} {:<24} {:<9} {:<40}",
                            "ID", "ACTIVE", "SOURCE", "NAME", "POSTINGS", "CAREER URL"
                        );
                        println!("{}", "-".repeat(106));
                        for company in companies {
                            let postings = db.count_listings(company.id)?;
                            println!(
                                "{:<6} {:<7} {:<16} {:<24} {:<9} {:<40}",
                                company.id,
                                if company.active { "yes" } else { "no" },
                                company.source_type,
                                truncate(&company.name, 22),
                                postings,
                                truncate(&company.career_url, 40)
                            );
                        }
                    }
                }

                CompanyCommands::SetUrl { id, url } => {
                    let company = db.update_company_url(user, id, &url)?;
                    println!(
                        "Company #{} now crawls {} (source: {})",
                        company.id, company.career_url, company.source_type
                    );
                }

                CompanyCommands::Remove { id } => {
                    db.delete_company(user, id)?;
                    println!("Removed company #{} and its postings.", id);
                }

                CompanyCommands::Activate { id } => {
                    db.set_company_active(user, id, true)?;
                    println!("Company #{} is active.", id);
                }

                CompanyCommands::Deactivate { id } => {
                    db.set_company_active(user, id, false)?;
                    println!("Company #{} is inactive.", id);
                }
            }
        }

        Commands::Profile { command } => {
            db.ensure_initialized()?;
            match command {
                ProfileCommands::Set {
                    keywords,
                    titles,
                    locations,
                    exclude_titles,
                    exclude_locations,
                    remote_only,
                } => {
                    let profile = JobProfile {
                        keywords,
                        titles,
                        locations,
                        exclude_titles,
                        exclude_locations,
                        remote_only,
                    };
                    db.save_profile(user, &profile)?;
                    println!("Profile saved. Run 'scout rescore' to update existing scores.");
                }

                ProfileCommands::Show => match db.get_profile(user)? {
                    Some(profile) => {
                        println!("Keywords:          {}", join_or_dash(&profile.keywords));
                        println!("Titles:            {}", join_or_dash(&profile.titles));
                        println!("Locations:         {}", join_or_dash(&profile.locations));
                        println!("Exclude titles:    {}", join_or_dash(&profile.exclude_titles));
                        println!("Exclude locations: {}", join_or_dash(&profile.exclude_locations));
                        println!("Remote only:       {}", if profile.remote_only { "yes" } else { "no" });
                    }
                    None => {
                        println!("No profile set. All postings score a neutral 50.");
                    }
                },
            }
        }

        Commands::Crawl { company, api_only } => {
            db.ensure_initialized()?;
            let (orchestrator, browser) = build_orchestrator(Arc::clone(&db), &settings)?;

            match company {
                Some(company_id) => {
                    let outcome = orchestrator.crawl_company(user, company_id).await;
                    browser.shutdown().await;
                    let result = outcome?;
                    match result.status {
                        CrawlStatus::Success => println!(
                            "{}: {} postings found, {} new",
                            result.company_name, result.jobs_found, result.new_jobs
                        ),
                        _ => println!(
                            "{}: crawl failed: {}",
                            result.company_name,
                            result.error.unwrap_or_default()
                        ),
                    }
                }
                None => {
                    let batch = orchestrator.crawl_all_companies(user, api_only).await?;
                    if batch.results.is_empty() && batch.skipped.is_empty() {
                        println!("No active companies to crawl.");
                    } else {
                        println!("{:<6} {:<24} {:<8} {:>6} {:>6}  {}", "ID", "COMPANY", "STATUS", "FOUND", "NEW", "ERROR");
                        println!("{}", "-".repeat(80));
                        for result in &batch.results {
                            println!(
                                "{:<6} {:<24} {:<8} {:>6} {:>6}  {}",
                                result.company_id,
                                truncate(&result.company_name, 22),
                                result.status,
                                result.jobs_found,
                                result.new_jobs,
                                truncate(result.error.as_deref().unwrap_or(""), 40)
                            );
                        }
                        println!("\nTotal: {} postings found, {} new", batch.total_found, batch.total_new);
                        if !batch.skipped.is_empty() {
                            println!("\nSkipped (no API adapter):");
                            for skipped in &batch.skipped {
                                println!(
                                    "  #{} - {} ({})",
                                    skipped.company_id, skipped.company_name, skipped.source_type
                                );
                            }
                        }
                    }
                }
            }
        }

        Commands::Logs { company, limit } => {
            db.ensure_initialized()?;
            let (orchestrator, _) = build_orchestrator(Arc::clone(&db), &settings)?;
            let logs = orchestrator.get_crawl_logs(user, company, limit)?;
            if logs.is_empty() {
                println!("No crawls recorded.");
            } else {
                println!("{:<6} {:<20} {:<8} {:<17} {:>6} {:>6}  {}", "ID", "COMPANY", "STATUS", "STARTED", "FOUND", "NEW", "ERROR");
                println!("{}", "-".repeat(90));
                for log in logs {
                    println!(
                        "{:<6} {:<20} {:<8} {:<17} {:>6} {:>6}  {}",
                        log.id,
                        truncate(&log.company_name.unwrap_or_default(), 18),
                        log.status,
                        log.started_at.format("%Y-%m-%d %H:%M"),
                        log.jobs_found,
                        log.new_jobs,
                        truncate(log.error.as_deref().unwrap_or(""), 40)
                    );
                }
            }
        }

        Commands::Jobs { command } => {
            db.ensure_initialized()?;
            match command {
                JobCommands::List {
                    status,
                    min_score,
                    limit,
                } => {
                    let jobs = db.list_job_listings(user, status, min_score, limit)?;
                    if jobs.is_empty() {
                        println!("No postings found.");
                    } else {
                        println!("{:<6} {:>5} {:<10} {:<32} {:<18} {:<20}", "ID", "SCORE", "STATUS", "TITLE", "COMPANY", "LOCATION");
                        println!("{}", "-".repeat(94));
                        for job in jobs {
                            let score = job
                                .match_score
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| "-".to_string());
                            let location = match (&job.location, job.remote) {
                                (Some(location), _) => location.clone(),
                                (None, true) => "Remote".to_string(),
                                (None, false) => String::new(),
                            };
                            println!(
                                "{:<6} {:>5} {:<10} {:<32} {:<18} {:<20}",
                                job.id,
                                score,
                                job.status,
                                truncate(&job.title, 30),
                                truncate(&job.company_name.unwrap_or_default(), 16),
                                truncate(&location, 20)
                            );
                        }
                    }
                }

                JobCommands::Show { id } => {
                    let job = db
                        .get_job_listing(user, id)?
                        .ok_or_else(|| anyhow!("Job #{} not found", id))?;
                    let (orchestrator, _) = build_orchestrator(Arc::clone(&db), &settings)?;
                    let breakdown = orchestrator.explain_score(user, id)?;

                    println!("Job #{}", job.id);
                    println!("Title: {}", job.title);
                    if let Some(company) = &job.company_name {
                        println!("Company: {}", company);
                    }
                    println!("Status: {}", job.status);
                    println!("URL: {}", job.url);
                    if let Some(location) = &job.location {
                        println!("Location: {}", location);
                    }
                    if job.remote {
                        println!("Remote: yes");
                    }
                    if let Some(department) = &job.department {
                        println!("Department: {}", department);
                    }
                    if let Some(posted) = job.posted_at {
                        println!("Posted: {}", posted.format("%Y-%m-%d"));
                    }
                    println!("First seen: {}", job.first_seen_at.format("%Y-%m-%d %H:%M"));
                    println!("Last seen: {}", job.last_seen_at.format("%Y-%m-%d %H:%M"));

                    println!("\n--- Match: {} ---", breakdown.total);
                    for category in &breakdown.categories {
                        println!(
                            "  {:<11} {:>3}/{:<3} {}",
                            category.category, category.earned, category.possible, category.detail
                        );
                    }

                    if let Some(description) = &job.description {
                        println!("\n--- Description ---");
                        for line in textwrap::wrap(description, 80) {
                            println!("{}", line);
                        }
                    }
                }

                JobCommands::Status { id, status } => {
                    db.set_job_status(user, id, status)?;
                    println!("Job #{} marked {}.", id, status);
                }
            }
        }

        Commands::Rescore => {
            db.ensure_initialized()?;
            let (orchestrator, _) = build_orchestrator(Arc::clone(&db), &settings)?;
            let summary = orchestrator.recalculate_match_scores(user)?;
            println!(
                "Rescored {} postings, {} changed.",
                summary.processed, summary.updated
            );
        }
    }

    Ok(())
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
