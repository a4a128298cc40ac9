use crate::clients::ApiError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("Notion API error: {0}")]
    Api(#[from] ApiError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("resource {0} not found or not shared with integration")]
    NotFoundOrNotShared(String),

    #[error("Invalid Notion URL: {0}")]
    InvalidUrl(String),

    #[error("path {0} escapes the vault")]
    UnsafePath(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication failed")]
    Authentication,

    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for upstream answers meaning "no such object of this kind".
    pub fn is_not_found_or_wrong_kind(&self) -> bool {
        matches!(self, Error::Api(api) if api.is_not_found_or_wrong_kind())
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Api(ApiError::RateLimited { .. }))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
