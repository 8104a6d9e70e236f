//! Relevance scoring of a posting against a user's job profile.
//!
//! Only categories the user actually set contribute to the possible
//! points, so a keywords-only profile is scored purely on keywords.
//! The total is `earned / possible` as a rounded percentage.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::models::{has_entries, JobProfile, ParsedJob};
use crate::text::contains_word;

pub const NEUTRAL_SCORE: u8 = 50;

const TITLE_WEIGHT: u32 = 40;
const KEYWORD_WEIGHT: u32 = 30;
const POINTS_PER_KEYWORD: u32 = 10;
const LOCATION_WEIGHT: u32 = 20;
const REMOTE_WEIGHT: u32 = 10;

/// Profile title words this short are ignored for partial title credit.
const MIN_TITLE_WORD_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub earned: u32,
    pub possible: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub total: u8,
    pub earned: u32,
    pub possible: u32,
    pub categories: Vec<CategoryScore>,
}

impl ScoreBreakdown {
    fn neutral(detail: &str) -> Self {
        Self {
            total: NEUTRAL_SCORE,
            earned: 0,
            possible: 0,
            categories: vec![CategoryScore {
                category: "profile".to_string(),
                earned: 0,
                possible: 0,
                detail: detail.to_string(),
            }],
        }
    }
}

pub fn score(job: &ParsedJob, profile: Option<&JobProfile>) -> u8 {
    score_breakdown(job, profile).total
}

/// Score every job, keyed by external id.
pub fn score_batch(jobs: &[ParsedJob], profile: Option<&JobProfile>) -> HashMap<String, u8> {
    jobs.iter()
        .map(|job| (job.external_id.clone(), score(job, profile)))
        .collect()
}

pub fn score_breakdown(job: &ParsedJob, profile: Option<&JobProfile>) -> ScoreBreakdown {
    let Some(profile) = profile else {
        return ScoreBreakdown::neutral("No job profile set; using neutral score");
    };

    let exclusion = exclusion_reason(job, profile);
    if !profile.has_preferences() && exclusion.is_none() {
        return ScoreBreakdown::neutral("Job profile has no preferences; using neutral score");
    }

    let mut categories = Vec::new();
    if has_entries(&profile.titles) {
        categories.push(score_title(job, &profile.titles));
    }
    if has_entries(&profile.keywords) {
        categories.push(score_keywords(job, &profile.keywords));
    }
    if has_entries(&profile.locations) {
        if let Some(location) = job.location.as_deref().filter(|l| !l.trim().is_empty()) {
            categories.push(score_location(location, &profile.locations));
        }
    }
    if profile.remote_only {
        categories.push(score_remote(job));
    }

    let earned: u32 = categories.iter().map(|c| c.earned).sum();
    let possible: u32 = categories.iter().map(|c| c.possible).sum();

    if let Some(reason) = exclusion {
        categories.push(CategoryScore {
            category: "exclusions".to_string(),
            earned: 0,
            possible: 0,
            detail: reason,
        });
        return ScoreBreakdown {
            total: 0,
            earned,
            possible,
            categories,
        };
    }

    if possible == 0 {
        let mut neutral = ScoreBreakdown::neutral("No preference applies to this job; using neutral score");
        neutral.categories.splice(0..0, categories);
        return neutral;
    }

    let total = ((earned as f64 / possible as f64) * 100.0).round().clamp(0.0, 100.0) as u8;
    ScoreBreakdown {
        total,
        earned,
        possible,
        categories,
    }
}

fn score_title(job: &ParsedJob, titles: &[String]) -> CategoryScore {
    let job_title = job.title.to_lowercase();

    let full = titles
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty() && job_title.contains(&t.to_lowercase()));
    if let Some(hit) = full {
        return CategoryScore {
            category: "title".to_string(),
            earned: TITLE_WEIGHT,
            possible: TITLE_WEIGHT,
            detail: format!("Title contains \"{}\"", hit),
        };
    }

    // Partial credit: share of the profile title's words found in the job title.
    let mut best: Option<(u32, usize, usize, &str)> = None;
    for wanted in titles {
        let words: Vec<&str> = wanted
            .split_whitespace()
            .filter(|w| w.chars().count() >= MIN_TITLE_WORD_CHARS)
            .collect();
        if words.is_empty() {
            continue;
        }
        let matched = words.iter().filter(|w| contains_word(&job.title, w)).count();
        let points = TITLE_WEIGHT * matched as u32 / words.len() as u32;
        if best.map_or(true, |(p, ..)| points > p) {
            best = Some((points, matched, words.len(), wanted.as_str()));
        }
    }

    match best {
        Some((points, matched, total, wanted)) if points > 0 => CategoryScore {
            category: "title".to_string(),
            earned: points,
            possible: TITLE_WEIGHT,
            detail: format!("{}/{} words of \"{}\" in title", matched, total, wanted.trim()),
        },
        _ => CategoryScore {
            category: "title".to_string(),
            earned: 0,
            possible: TITLE_WEIGHT,
            detail: "No title match".to_string(),
        },
    }
}

fn score_keywords(job: &ParsedJob, keywords: &[String]) -> CategoryScore {
    let haystack = [
        Some(job.title.as_str()),
        job.description.as_deref(),
        job.department.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase();

    let mut seen = HashSet::new();
    let matched: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .filter(|k| haystack.contains(&k.to_lowercase()))
        .collect();

    let earned = (matched.len() as u32 * POINTS_PER_KEYWORD).min(KEYWORD_WEIGHT);
    let detail = if matched.is_empty() {
        "No keywords matched".to_string()
    } else {
        format!("Matched: {}", matched.join(", "))
    };
    CategoryScore {
        category: "keywords".to_string(),
        earned,
        possible: KEYWORD_WEIGHT,
        detail,
    }
}

fn score_location(location: &str, preferred: &[String]) -> CategoryScore {
    let hit = preferred.iter().map(|p| p.trim()).find(|p| contains_word(location, p));
    CategoryScore {
        category: "location".to_string(),
        earned: if hit.is_some() { LOCATION_WEIGHT } else { 0 },
        possible: LOCATION_WEIGHT,
        detail: match hit {
            Some(p) => format!("\"{}\" matches {}", location, p),
            None => format!("\"{}\" is not a preferred location", location),
        },
    }
}

fn score_remote(job: &ParsedJob) -> CategoryScore {
    CategoryScore {
        category: "remote".to_string(),
        earned: if job.remote { REMOTE_WEIGHT } else { 0 },
        possible: REMOTE_WEIGHT,
        detail: if job.remote {
            "Remote position".to_string()
        } else {
            "Not remote".to_string()
        },
    }
}

fn exclusion_reason(job: &ParsedJob, profile: &JobProfile) -> Option<String> {
    let job_title = job.title.to_lowercase();
    if let Some(t) = profile
        .exclude_titles
        .iter()
        .map(|t| t.trim())
        .find(|t| !t.is_empty() && job_title.contains(&t.to_lowercase()))
    {
        return Some(format!("Title matches excluded \"{}\"", t));
    }

    let location = job.location.as_deref()?;
    profile
        .exclude_locations
        .iter()
        .map(|l| l.trim())
        .find(|l| contains_word(location, l))
        .map(|l| format!("Location matches excluded \"{}\"", l))
}
