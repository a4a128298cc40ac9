pub mod api;
pub mod notion;
pub mod rate_limit;
pub mod types;
pub mod url;

pub use api::{ApiError, ApiResult, NotionApi};
pub use notion::NotionClient;
pub use rate_limit::{DetectedResource, RateLimitedClient, ResourceKind};
pub use url::{ids_equal, normalize_id, parse_notion_url, ParsedId};
