//! Job discovery pipeline: crawl company career pages, store postings and
//! score them against each user's job profile.

pub mod browser;
pub mod config;
pub mod db;
pub mod error;
pub mod heuristic;
pub mod models;
pub mod orchestrator;
pub mod scoring;
pub mod sources;
pub mod text;

pub use error::{Result, ScoutError};
