use crate::clients::{parse_notion_url, NotionApi, NotionClient, RateLimitedClient};
use crate::config::{AppConfig, ConfigLoader};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const WRITE_PROBE: &str = ".notion-vault-write-test";

/// One line of `validate` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub check: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl CheckResult {
    pub fn pass(check: impl Into<String>, message: Option<String>) -> Self {
        Self {
            check: check.into(),
            passed: true,
            message,
        }
    }

    pub fn fail(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            passed: false,
            message: Some(message.into()),
        }
    }

    pub fn line(&self) -> String {
        let mark = if self.passed { "[PASS]" } else { "[FAIL]" };
        match &self.message {
            Some(message) => format!("{} {}: {}", mark, self.check, message),
            None => format!("{} {}", mark, self.check),
        }
    }
}

/// Every check `validate` runs, in order. Stops early only when the config
/// file cannot be read at all.
pub async fn run_checks(config_path: &Path, cancel: CancellationToken) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if !config_path.exists() {
        results.push(CheckResult::fail(
            "Config file exists",
            format!("cannot access {}", config_path.display()),
        ));
        return results;
    }
    results.push(CheckResult::pass("Config file exists", None));

    let config = match ConfigLoader::read(config_path) {
        Ok(config) => config,
        Err(e) => {
            results.push(CheckResult::fail("Config file valid", e.to_string()));
            return results;
        }
    };
    match config.validate() {
        Ok(()) => results.push(CheckResult::pass("Config file valid", None)),
        Err(e) => results.push(CheckResult::fail("Config file valid", e.to_string())),
    }

    if config.notion_token.trim().is_empty() {
        results.push(CheckResult::fail(
            "NOTION_TOKEN set",
            "NOTION_TOKEN environment variable is not set",
        ));
    } else {
        results.push(CheckResult::pass("NOTION_TOKEN set", None));
        match NotionClient::new(&config.notion_token) {
            Ok(client) => {
                let client: Arc<dyn NotionApi> = Arc::new(client);
                let api = RateLimitedClient::new(client, cancel);
                results.extend(check_upstream(&config, &api).await);
            }
            Err(e) => results.push(CheckResult::fail("Notion API accessible", e.to_string())),
        }
    }

    results.push(check_vault(&config.vault_path()));
    results.push(check_state_dir(&config.state_path()));
    results
}

/// Credentials, then every root (concurrently), then discovery.
pub async fn check_upstream(config: &AppConfig, api: &RateLimitedClient) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match api.get_current_user().await {
        Ok(user) => results.push(CheckResult::pass(
            "Notion API accessible",
            Some(format!(
                "connected as {:?}",
                user.name.unwrap_or_else(|| "integration".to_string())
            )),
        )),
        Err(e) => {
            results.push(CheckResult::fail(
                "Notion API accessible",
                format!("failed to connect: {}", e),
            ));
            return results;
        }
    }

    let roots = stream::iter(config.sync.roots.iter().enumerate())
        .map(|(idx, root)| async move {
            let check = format!(
                "Root {} accessible ({})",
                idx + 1,
                root.name.as_deref().unwrap_or(&root.url)
            );
            let parsed = match parse_notion_url(&root.url) {
                Ok(parsed) => parsed,
                Err(e) => return CheckResult::fail(check, e.to_string()),
            };
            match api.detect_resource_type(&parsed.id).await {
                Ok(found) => CheckResult::pass(
                    check,
                    Some(format!("{} {:?}", found.kind.as_str(), found.title)),
                ),
                Err(e) => CheckResult::fail(check, e.to_string()),
            }
        })
        .buffered(config.concurrency())
        .collect::<Vec<_>>()
        .await;
    results.extend(roots);

    if config.sync.discover_workspace_roots {
        match api.discover_workspace_roots().await {
            Ok(found) => results.push(CheckResult::pass(
                "Workspace discovery",
                Some(format!("found {} top-level resources", found.len())),
            )),
            Err(e) => results.push(CheckResult::fail("Workspace discovery", e.to_string())),
        }
    }

    results
}

/// The vault directory exists (or can be made) and accepts a file.
pub fn check_vault(vault: &Path) -> CheckResult {
    const CHECK: &str = "Vault path writable";
    if let Err(e) = std::fs::create_dir_all(vault) {
        return CheckResult::fail(CHECK, format!("cannot create {}: {}", vault.display(), e));
    }
    let probe = vault.join(WRITE_PROBE);
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckResult::pass(CHECK, Some(vault.display().to_string()))
        }
        Err(e) => CheckResult::fail(CHECK, format!("cannot write to {}: {}", vault.display(), e)),
    }
}

pub fn check_state_dir(state_file: &Path) -> CheckResult {
    const CHECK: &str = "State directory";
    let Some(dir) = state_file.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return CheckResult::pass(CHECK, Some("working directory".to_string()));
    };
    match std::fs::create_dir_all(dir) {
        Ok(()) => CheckResult::pass(CHECK, Some(dir.display().to_string())),
        Err(e) => CheckResult::fail(CHECK, format!("cannot create {}: {}", dir.display(), e)),
    }
}

/// "3 minutes ago", "2 days ago", "just now".
pub fn format_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    let (value, unit) = match secs {
        s if s < 60 => return "just now".to_string(),
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s => (s / 86_400, "day"),
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{} {}{} ago", value, unit, plural)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_check_lines() {
        assert_eq!(CheckResult::pass("A", None).line(), "[PASS] A");
        assert_eq!(CheckResult::fail("B", "nope").line(), "[FAIL] B: nope");
    }

    #[test]
    fn test_vault_and_state_checks() {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");

        assert!(check_vault(&vault).passed);
        assert!(vault.is_dir());
        assert!(!vault.join(WRITE_PROBE).exists());

        let state = dir.path().join("nested/state/state.json");
        assert!(check_state_dir(&state).passed);
        assert!(dir.path().join("nested/state").is_dir());
        assert!(check_state_dir(Path::new("state.json")).passed);
    }

    #[tokio::test]
    async fn test_missing_config_stops_early() {
        let dir = TempDir::new().unwrap();
        let results = run_checks(&dir.path().join("absent.yaml"), CancellationToken::new()).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[test]
    fn test_format_ago() {
        let now = Utc::now();
        assert_eq!(format_ago(now, now), "just now");
        assert_eq!(format_ago(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(format_ago(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_ago(now - Duration::days(2), now), "2 days ago");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
