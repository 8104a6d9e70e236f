use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoutError>;

#[derive(Error, Debug)]
pub enum ScoutError {
    /// Company does not exist or belongs to another user.
    #[error("Company #{0} not found")]
    CompanyNotFound(i64),

    #[error("Job #{0} not found")]
    JobNotFound(i64),

    /// The provider answered 404 for the board token.
    #[error("{source_name} board '{token}' not found")]
    BoardNotFound { source_name: String, token: String },

    /// Provider API answered non-2xx, or the page could not be rendered.
    #[error("{source_name} request failed: {message}")]
    Upstream { source_name: String, message: String },

    #[error("A crawl is already in progress. Try again when it finishes.")]
    CrawlInProgress,

    #[error("Could not extract a board token from '{0}'")]
    InvalidUrl(String),

    #[error("Browser error: {0}")]
    Browser(#[from] thirtyfour::error::WebDriverError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScoutError {
    pub fn upstream(source_name: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Upstream {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn board_not_found(source_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self::BoardNotFound {
            source_name: source_name.into(),
            token: token.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
