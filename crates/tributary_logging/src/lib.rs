//! Tracing setup for Tributary binaries.
//!
//! Logs go to two places: a size-rotated file under `$TRIBUTARY_HOME/logs`
//! and stderr. Library crates only emit events; installing the subscriber is
//! the binary's job.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "tributary=info,tributary_db=info";
const HOME_ENV: &str = "TRIBUTARY_HOME";

/// Rotation limits for the log file.
#[derive(Debug, Clone, Copy)]
pub struct Rotation {
    pub max_files: usize,
    pub max_bytes: u64,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Logging options chosen by the binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the full filter to stderr instead of warnings only.
    pub verbose: bool,
}

/// Install the global subscriber.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to prepare log directory")?;
    let file_writer = SharedRollingWriter::open(&log_dir, config.app_name, Rotation::default())
        .with_context(|| format!("Failed to open log file for {}", config.app_name))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    Ok(())
}

/// Tributary home directory: `$TRIBUTARY_HOME` or `~/.tributary`.
pub fn tributary_home() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        if !override_path.trim().is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".tributary"))
        .ok_or_else(|| anyhow!("Could not determine home directory; set {HOME_ENV}"))
}

/// `~/.tributary/logs`
pub fn logs_dir() -> Result<PathBuf> {
    Ok(tributary_home()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir()?;
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only file that rolls `name.log` to `name.log.1`, `name.log.2`, ...
/// once it would exceed `max_bytes`.
struct RollingFile {
    dir: PathBuf,
    stem: String,
    rotation: Rotation,
    file: Option<File>,
    written: u64,
}

impl RollingFile {
    fn open(dir: &Path, name: &str, rotation: Rotation) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut rolling = Self {
            dir: dir.to_path_buf(),
            stem: sanitize_name(name),
            rotation: Rotation {
                max_files: rotation.max_files.max(1),
                ..rotation
            },
            file: None,
            written: 0,
        };
        rolling.reopen()?;
        if rolling.written > rolling.rotation.max_bytes {
            rolling.roll()?;
        }
        Ok(rolling)
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn archived_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.stem, index))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let keep = self.rotation.max_files.saturating_sub(1);
        if keep == 0 {
            fs::remove_file(self.active_path()).or_else(ignore_missing)?;
            return self.reopen();
        }

        fs::remove_file(self.archived_path(keep)).or_else(ignore_missing)?;
        for index in (1..keep).rev() {
            let from = self.archived_path(index);
            if from.exists() {
                fs::rename(&from, self.archived_path(index + 1))?;
            }
        }
        let active = self.active_path();
        if active.exists() {
            fs::rename(active, self.archived_path(1))?;
        }
        self.reopen()
    }
}

fn ignore_missing(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound {
        Ok(())
    } else {
        Err(err)
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.rotation.max_bytes {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing out handles to one shared rolling file.
#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl SharedRollingWriter {
    fn open(dir: &Path, name: &str, rotation: Rotation) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(dir, name, rotation)?)),
        })
    }
}

struct RollingHandle {
    inner: Arc<Mutex<RollingFile>>,
}

impl RollingHandle {
    fn with<T>(&self, f: impl FnOnce(&mut RollingFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut guard)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = RollingHandle;

    fn make_writer(&'a self) -> Self::Writer {
        RollingHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for RollingHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with(|file| file.flush())
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "tributary".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("tributary cli"), "tributary_cli");
        assert_eq!(sanitize_name(""), "tributary");
    }

    #[test]
    fn test_rolls_when_full() {
        let tmp = TempDir::new().unwrap();
        let rotation = Rotation {
            max_files: 3,
            max_bytes: 16,
        };
        let mut file = RollingFile::open(tmp.path(), "app", rotation).unwrap();

        for _ in 0..4 {
            file.write_all(b"0123456789abcd\n").unwrap();
        }
        file.flush().unwrap();

        assert!(tmp.path().join("app.log").exists());
        assert!(tmp.path().join("app.log.1").exists());
        assert!(tmp.path().join("app.log.2").exists());
        assert!(!tmp.path().join("app.log.3").exists());
    }

    #[test]
    fn test_single_file_rotation_truncates() {
        let tmp = TempDir::new().unwrap();
        let rotation = Rotation {
            max_files: 1,
            max_bytes: 8,
        };
        let mut file = RollingFile::open(tmp.path(), "solo", rotation).unwrap();
        file.write_all(b"first!!\n").unwrap();
        file.write_all(b"second\n").unwrap();
        file.flush().unwrap();

        let contents = fs::read_to_string(tmp.path().join("solo.log")).unwrap();
        assert_eq!(contents, "second\n");
        assert!(!tmp.path().join("solo.log.1").exists());
    }
}
