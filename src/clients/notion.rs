use super::api::{ApiError, ApiResult, NotionApi};
use super::types::{Block, Database, Page, PaginatedList, SearchFilter, SearchResult, User};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    default_on_request_failure, default_on_request_success, policies::ExponentialBackoff,
    RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

pub const NOTION_API_BASE: &str = "https://api.notion.com/v1";
pub const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries transport failures and 5xx answers. Throttling is left to
/// [`super::RateLimitedClient`], which shares one backoff window across callers.
struct TransientExceptThrottle;

impl RetryableStrategy for TransientExceptThrottle {
    fn handle(
        &self,
        res: &std::result::Result<reqwest::Response, reqwest_middleware::Error>,
    ) -> Option<Retryable> {
        match res {
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => None,
            Ok(response) => default_on_request_success(response),
            Err(err) => default_on_request_failure(err),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
    filter: SearchFilterBody,
}

#[derive(Debug, Serialize)]
struct SearchFilterBody {
    property: &'static str,
    value: &'static str,
}

/// HTTP client for the Notion REST API.
#[derive(Debug)]
pub struct NotionClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl NotionClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, NOTION_API_BASE)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
        headers.insert("Notion-Version", HeaderValue::from_static(NOTION_VERSION));

        let base_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(500), Duration::from_secs(10))
            .build_with_max_retries(3);

        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                retry_policy,
                TransientExceptThrottle,
            ))
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    async fn make_request<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        let url = self.url(endpoint);
        debug!("Making Notion API request: GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn make_post_request<T: DeserializeOwned, B: Serialize + std::fmt::Debug>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ApiResult<T> {
        let url = self.url(endpoint);
        debug!("Making Notion API request: POST {} {:?}", url, body);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| parse_retry_after(v, Utc::now()));
            debug!("Notion API throttled, retry after {:?}", retry_after);
            return Err(ApiError::RateLimited { retry_after });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!("Notion API error: {} - {}", status, text);
            let body: ErrorBody = serde_json::from_str(&text).unwrap_or(ErrorBody {
                code: String::new(),
                message: text.clone(),
            });
            return Err(ApiError::Status {
                status: status.as_u16(),
                code: body.code,
                message: body.message,
            });
        }

        let deserializer = &mut serde_json::Deserializer::from_str(&text);
        serde_path_to_error::deserialize(deserializer).map_err(|e| {
            error!("Failed to parse Notion response: {}", e);
            ApiError::Decode(e.to_string())
        })
    }
}

/// `Retry-After` is either delta-seconds or an HTTP-date. Anything else means 1s.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Duration {
    let value = value.trim();
    if value.is_empty() {
        return Duration::from_secs(1);
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => (at.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
        Err(_) => Duration::from_secs(1),
    }
}

fn cursor_query(cursor: Option<&str>) -> String {
    match cursor {
        Some(cursor) => format!(
            "page_size={}&start_cursor={}",
            PAGE_SIZE,
            urlencoding::encode(cursor)
        ),
        None => format!("page_size={}", PAGE_SIZE),
    }
}

#[async_trait]
impl NotionApi for NotionClient {
    async fn get_current_user(&self) -> ApiResult<User> {
        let user: User = self.make_request("users/me").await?;
        debug!("connected to Notion as: {:?} ({})", user.name, user.id);
        Ok(user)
    }

    async fn get_page(&self, page_id: &str) -> ApiResult<Page> {
        self.make_request(&format!("pages/{}", page_id)).await
    }

    async fn get_database(&self, database_id: &str) -> ApiResult<Database> {
        self.make_request(&format!("databases/{}", database_id))
            .await
    }

    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> ApiResult<PaginatedList<Page>> {
        let body = QueryBody {
            page_size: PAGE_SIZE,
            start_cursor: cursor,
        };
        self.make_post_request(&format!("databases/{}/query", database_id), &body)
            .await
    }

    async fn get_block_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> ApiResult<PaginatedList<Block>> {
        self.make_request(&format!(
            "blocks/{}/children?{}",
            block_id,
            cursor_query(cursor)
        ))
        .await
    }

    async fn search(
        &self,
        filter: SearchFilter,
        cursor: Option<&str>,
    ) -> ApiResult<PaginatedList<SearchResult>> {
        let body = SearchBody {
            page_size: PAGE_SIZE,
            start_cursor: cursor,
            filter: SearchFilterBody {
                property: "object",
                value: filter.as_str(),
            },
        };
        self.make_post_request("search", &body).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();

        assert_eq!(parse_retry_after("", now), Duration::from_secs(1));
        assert_eq!(parse_retry_after("7", now), Duration::from_secs(7));
        assert_eq!(
            parse_retry_after("Sat, 01 Jun 2024 10:00:05 GMT", now),
            Duration::from_secs(5)
        );
        assert_eq!(
            parse_retry_after("Sat, 01 Jun 2024 09:59:00 GMT", now),
            Duration::ZERO
        );
        assert_eq!(parse_retry_after("soon", now), Duration::from_secs(1));
    }

    #[test]
    fn test_cursor_query() {
        assert_eq!(cursor_query(None), "page_size=100");
        assert_eq!(
            cursor_query(Some("a b")),
            "page_size=100&start_cursor=a%20b"
        );
    }

    #[test]
    fn test_search_body_shape() {
        let body = SearchBody {
            page_size: PAGE_SIZE,
            start_cursor: None,
            filter: SearchFilterBody {
                property: "object",
                value: SearchFilter::Database.as_str(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["filter"]["value"], "database");
        assert!(json.get("start_cursor").is_none());
    }

    #[tokio::test]
    async fn test_client_builds_with_token() {
        let client = NotionClient::with_base_url("secret_abc", "http://localhost:1/v1/").unwrap();
        assert_eq!(client.url("/pages/x"), "http://localhost:1/v1/pages/x");
        assert!(NotionClient::new("bad\ntoken").is_err());
    }
}
