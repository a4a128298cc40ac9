use super::models::{AppConfig, TOKEN_ENV_VAR};
use crate::{Error, Result};
use config::{Config, File, FileFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

pub struct ConfigLoader;

impl ConfigLoader {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "notion-vault", "notion-vault")
            .ok_or_else(|| Error::Other("Could not determine user directories".to_string()))
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join(DEFAULT_CONFIG_FILE))
    }

    /// An explicit path wins; otherwise `config.yaml` in the working
    /// directory, then the per-user config directory.
    pub fn resolve_path(explicit: Option<&str>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(PathBuf::from(path));
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Ok(local);
        }

        match Self::get_default_config_path() {
            Ok(path) if path.exists() => Ok(path),
            _ => Ok(local),
        }
    }

    /// Parses the file and picks up the token from the environment (and
    /// `.env`) without validating.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(Error::Other(format!(
                "Configuration file {} not found",
                path.display()
            )));
        }

        if let Err(e) = dotenvy::dotenv() {
            debug!("no .env file loaded: {}", e);
        }

        let mut config: AppConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .build()?
            .try_deserialize()?;

        config.notion_token = std::env::var(TOKEN_ENV_VAR).unwrap_or_default();

        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let path = path.as_ref();
        let config = Self::read(path)?;

        config.validate()?;

        debug!(
            "config: {} roots, discovery {}, vault {}",
            config.sync.roots.len(),
            config.sync.discover_workspace_roots,
            config.output.vault_path
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"sync:
  roots:
    - url: https://www.notion.so/acme/Hello-World-1e567c00aaaabbbbccccddddeeeeffff
      name: Hello
  discover_workspace_roots: false
output:
  vault_path: ./vault
  attachment_folder: files
state:
  file: ./state.json
options:
  download_attachments: false
  dates:
    date_format: "%Y-%m-%d"
    link_daily_notes: true
"#
        )
        .unwrap();

        let config = ConfigLoader::read(&path).unwrap();
        assert_eq!(config.sync.roots.len(), 1);
        assert_eq!(config.sync.roots[0].name.as_deref(), Some("Hello"));
        assert_eq!(config.attachment_folder(), "files");
        assert!(!config.download_attachments());

        let dates = config.date_settings();
        assert_eq!(dates.date_format, "%Y-%m-%d");
        assert!(dates.link_daily_notes);
        assert!(dates.transform_empty_datetime_to_date);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::read(dir.path().join("nope.yaml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = ConfigLoader::resolve_path(Some("/tmp/custom.yaml")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom.yaml"));
    }
}
