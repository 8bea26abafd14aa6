//! Bibfetch: bibliographic metadata scrapers for a Tellico-compatible catalog
//!
//! This crate implements a family of single-purpose data-source pipelines:
//! each one queries a comic/movie/book database (or a local Griffith SQLite
//! collection), extracts metadata fields with regular expressions or SQL, and
//! prints the result as a Tellico XML document on standard output.

pub mod config;
pub mod extract;
pub mod fetch;
pub mod image;
pub mod output;
pub mod sources;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for bibfetch operations
#[derive(Debug, Error)]
pub enum BibError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error(
        "Network error while getting HTML content.\n\
         The search site at {host} cannot be reached: {message}"
    )]
    PrimarySourceUnreachable { host: String, message: String },

    #[error("Collection database not found at {}", path.display())]
    MissingDatabase { path: PathBuf },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for bibfetch operations
pub type Result<T> = std::result::Result<T, BibError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Settings;
pub use fetch::{Fallback, FetchSession};
pub use output::TellicoDoc;
