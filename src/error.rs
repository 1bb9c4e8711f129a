//! Error types for watchcow

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchcowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Installer error: {0}")]
    Installer(String),

    #[error("Icon error: {0}")]
    Icon(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Package generation error: {0}")]
    Generate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Tracing error: {0}")]
    Tracing(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub type Result<T> = std::result::Result<T, WatchcowError>;
