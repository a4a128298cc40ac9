use super::types::{Block, Database, Page, PaginatedList, SearchFilter, SearchResult, User};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failure reported by the upstream workspace API.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status} {code}: {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// 404, `object_not_found` and `validation_error` all mean the id does not
    /// name an object of the requested kind.
    pub fn is_not_found_or_wrong_kind(&self) -> bool {
        match self {
            ApiError::Status { status, code, .. } => {
                *status == 404 || code == "object_not_found" || code == "validation_error"
            }
            _ => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
            || matches!(self, ApiError::Status { code, .. } if code == "unauthorized")
    }
}

/// Raw page-at-a-time access to the workspace. Pagination, throttling and
/// kind detection live in [`super::RateLimitedClient`].
#[async_trait]
pub trait NotionApi: Send + Sync {
    async fn get_current_user(&self) -> ApiResult<User>;

    async fn get_page(&self, page_id: &str) -> ApiResult<Page>;

    async fn get_database(&self, database_id: &str) -> ApiResult<Database>;

    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> ApiResult<PaginatedList<Page>>;

    async fn get_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> ApiResult<PaginatedList<Block>>;

    async fn search(
        &self,
        filter: SearchFilter,
        cursor: Option<&str>,
    ) -> ApiResult<PaginatedList<SearchResult>>;
}
