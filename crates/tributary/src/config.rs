//! Application configuration, loaded from `$TRIBUTARY_HOME/config.toml`.

use crate::error::Result;
use crate::reconcile::RemovalPolicy;
use crate::signature::Position;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TributaryConfig {
    /// SQLite state database. Relative paths resolve against the home dir.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Where generated documents are written. No documents without it.
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    /// What happens to records that are no longer enumerated.
    #[serde(default)]
    pub removal_policy: RemovalPolicy,

    /// Per-call timeout for remote requests.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Environment variable holding the remote credential.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    #[serde(default)]
    pub signature: SignatureSettings,

    #[serde(default)]
    pub watch: WatchSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSettings {
    #[serde(default)]
    pub position: Position,
    /// Source kind label written into signatures.
    #[serde(default = "default_source_kind")]
    pub source_kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tributary.sqlite3")
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_credential_env() -> String {
    "TRIBUTARY_REMOTE_TOKEN".to_string()
}

fn default_source_kind() -> String {
    "remote-drive".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    2
}

impl Default for SignatureSettings {
    fn default() -> Self {
        Self {
            position: Position::default(),
            source_kind: default_source_kind(),
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for TributaryConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            output_root: None,
            removal_policy: RemovalPolicy::default(),
            signature: SignatureSettings::default(),
            remote_timeout_secs: default_remote_timeout(),
            credential_env: default_credential_env(),
            watch: WatchSettings::default(),
        }
    }
}

impl TributaryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolve relative paths in the config against `home`.
    pub fn resolve_paths(mut self, home: &Path) -> Self {
        if self.database_path.is_relative() {
            self.database_path = home.join(&self.database_path);
        }
        if let Some(root) = self.output_root.take() {
            self.output_root = Some(if root.is_relative() { home.join(root) } else { root });
        }
        self
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.watch.poll_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TributaryConfig::default();
        assert_eq!(config.removal_policy, RemovalPolicy::MarkStale);
        assert_eq!(config.signature.position, Position::End);
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
        assert!(config.output_root.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TributaryConfig = toml::from_str(
            r#"
            removal_policy = "hard-delete"
            output_root = "docs"

            [signature]
            position = "start"
            "#,
        )
        .unwrap();

        assert_eq!(config.removal_policy, RemovalPolicy::HardDelete);
        assert_eq!(config.signature.position, Position::Start);
        assert_eq!(config.signature.source_kind, "remote-drive");
        assert_eq!(config.watch.debounce_ms, 500);
    }

    #[test]
    fn test_save_load_roundtrip_and_resolve() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("conf").join("config.toml");
        let mut config = TributaryConfig::default();
        config.output_root = Some(PathBuf::from("out"));
        config.save(&path).unwrap();

        let loaded = TributaryConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let resolved = loaded.resolve_paths(tmp.path());
        assert_eq!(resolved.database_path, tmp.path().join("tributary.sqlite3"));
        assert_eq!(resolved.output_root, Some(tmp.path().join("out")));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "removal_policy = \"shred\"").unwrap();
        assert!(TributaryConfig::load(&path).is_err());
        assert_eq!(
            TributaryConfig::load_or_default(&tmp.path().join("missing.toml")).unwrap(),
            TributaryConfig::default()
        );
    }
}
