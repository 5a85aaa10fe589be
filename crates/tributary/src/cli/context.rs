//! Shared setup for commands: home directory, config file and database.

use super::error::HelpfulError;
use std::path::{Path, PathBuf};
use tributary::config::TributaryConfig;
use tributary::tributary_db::TributaryDb;
use tributary::TributaryError;

pub struct CliContext {
    pub home: PathBuf,
    pub config_path: PathBuf,
    pub config: TributaryConfig,
}

impl CliContext {
    /// Load `config_override` or `$TRIBUTARY_HOME/config.toml`, defaults if absent.
    pub fn load(config_override: Option<&Path>) -> anyhow::Result<Self> {
        let home = tributary_logging::tributary_home()?;
        let config_path = config_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join("config.toml"));

        let config = TributaryConfig::load_or_default(&config_path).map_err(|e| match e {
            TributaryError::TomlParse(details) => {
                anyhow::Error::from(HelpfulError::config_parse(&config_path, &details.to_string()))
            }
            other => other.into(),
        })?;

        Ok(Self {
            config: config.resolve_paths(&home),
            home,
            config_path,
        })
    }

    pub async fn open_db(&self) -> anyhow::Result<TributaryDb> {
        let path = &self.config.database_path;
        TributaryDb::open(path)
            .await
            .map_err(|e| HelpfulError::database_open(path, &e.to_string()).into())
    }

    /// `explicit` wins over the configured output root.
    pub fn output_root(&self, explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.config.output_root.clone())
            .ok_or_else(|| HelpfulError::no_output_root().into())
    }
}

/// Single-threaded runtime for one command.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
