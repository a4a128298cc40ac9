use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

pub const DEFAULT_ATTACHMENT_FOLDER: &str = "attachments";
pub const DEFAULT_DATE_FORMAT: &str = "%d-%m-%Y";
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const MAX_CONCURRENCY: usize = 20;
pub const TOKEN_ENV_VAR: &str = "NOTION_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub options: Options,

    /// Read from the environment, never from the file.
    #[serde(skip)]
    pub notion_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub roots: Vec<RootConfig>,
    #[serde(default)]
    pub discover_workspace_roots: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RootConfig {
    #[serde(default)]
    pub url: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub vault_path: String,
    pub attachment_folder: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options {
    pub download_attachments: Option<bool>,
    pub concurrency: Option<usize>,
    pub dates: Option<DatesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatesConfig {
    pub transform_empty_datetime_to_date: Option<bool>,
    pub date_format: Option<String>,
    pub link_daily_notes: Option<bool>,
    pub daily_note_path_prefix: Option<String>,
}

/// Date options with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateSettings {
    pub transform_empty_datetime_to_date: bool,
    pub date_format: String,
    pub link_daily_notes: bool,
    pub daily_note_path_prefix: String,
}

impl Default for DateSettings {
    fn default() -> Self {
        DatesConfig::default().resolve()
    }
}

impl DatesConfig {
    pub fn resolve(&self) -> DateSettings {
        DateSettings {
            transform_empty_datetime_to_date: self.transform_empty_datetime_to_date.unwrap_or(true),
            date_format: self
                .date_format
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
            link_daily_notes: self.link_daily_notes.unwrap_or(false),
            daily_note_path_prefix: self.daily_note_path_prefix.clone().unwrap_or_default(),
        }
    }
}

/// The subset of configuration whose change invalidates every previous
/// output. Field order is fixed so the serialized form is canonical.
#[derive(Debug, Serialize)]
struct SyncSensitive<'a> {
    download_attachments: bool,
    attachment_folder: &'a str,
    dates: DateSettings,
}

impl AppConfig {
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        let mut problems = Vec::new();

        if self.sync.roots.is_empty() && !self.sync.discover_workspace_roots {
            problems.push(
                "either sync.roots or sync.discover_workspace_roots is required".to_string(),
            );
        }

        for (idx, root) in self.sync.roots.iter().enumerate() {
            if root.url.trim().is_empty() {
                problems.push(format!("root {}: url is required", idx + 1));
            }
        }

        if self.output.vault_path.trim().is_empty() {
            problems.push("output.vault_path is required".to_string());
        }

        if self.state.file.trim().is_empty() {
            problems.push("state.file is required".to_string());
        }

        if let Some(concurrency) = self.options.concurrency {
            if concurrency == 0 || concurrency > MAX_CONCURRENCY {
                problems.push(format!(
                    "options.concurrency must be between 1 and {}",
                    MAX_CONCURRENCY
                ));
            }
        }

        if self.notion_token.trim().is_empty() {
            problems.push(format!("{} environment variable is required", TOKEN_ENV_VAR));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems.join("; ")))
        }
    }

    pub fn vault_path(&self) -> PathBuf {
        PathBuf::from(&self.output.vault_path)
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.state.file)
    }

    pub fn attachment_folder(&self) -> &str {
        self.output
            .attachment_folder
            .as_deref()
            .map(|f| f.trim_matches('/'))
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_ATTACHMENT_FOLDER)
    }

    pub fn download_attachments(&self) -> bool {
        self.options.download_attachments.unwrap_or(true)
    }

    pub fn concurrency(&self) -> usize {
        self.options
            .concurrency
            .unwrap_or(DEFAULT_CONCURRENCY)
            .clamp(1, MAX_CONCURRENCY)
    }

    pub fn date_settings(&self) -> DateSettings {
        self.options.dates.clone().unwrap_or_default().resolve()
    }

    /// SHA-256 over the canonical JSON of the sync-sensitive options.
    pub fn fingerprint(&self) -> String {
        let sensitive = SyncSensitive {
            download_attachments: self.download_attachments(),
            attachment_folder: self.attachment_folder(),
            dates: self.date_settings(),
        };
        // Serializing plain strings and bools cannot fail.
        let canonical = serde_json::to_vec(&sensitive).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}
