//! Signed documents generated under the output root.
//!
//! Layout is `<root>/<workspace>/<config>/<folder path>/<name>`. The key
//! (the same path relative to the root, `/`-separated) is what provenance
//! records are stored under. When two items would land on the same key
//! (same name, or names that only differ by case or sanitized characters),
//! the later one gets a suffix derived from its remote id.

use crate::error::Result;
use crate::signature::{generate_signature, insert_signature, Position};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tributary_db::{LocalRecord, ScrapeConfig};

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Output key for an item found at `folder_path`.
pub(crate) fn document_key(config: &ScrapeConfig, folder_path: &str, name: &str) -> String {
    let mut segments = vec![sanitize(&config.workspace), sanitize(&config.name)];
    segments.extend(
        folder_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(sanitize),
    );
    segments.push(sanitize(name));
    segments.join("/")
}

/// `key` with a short hash of `remote_id` ahead of its extension.
pub(crate) fn disambiguate(key: &str, remote_id: &str) -> String {
    let hex = blake3::hash(remote_id.as_bytes()).to_hex();
    let tag = &hex.as_str()[..8];
    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, key),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}~{tag}.{ext}"),
        _ => format!("{file}~{tag}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

/// Which remote item owns each output key during a run.
///
/// Keys compare case-insensitively.
#[derive(Debug, Default)]
pub(crate) struct KeyClaims {
    owners: HashMap<String, String>,
}

impl KeyClaims {
    /// Seed with the keys stored records already point at.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a LocalRecord>) -> Self {
        let mut claims = Self::default();
        for record in records {
            if let Some(key) = &record.output_path {
                claims.owners.insert(fold(key), record.remote_id.clone());
            }
        }
        claims
    }

    /// Key for `remote_id` given the key its location maps to.
    ///
    /// An item keeps a suffixed key it already holds, so keys stay stable
    /// across runs.
    pub fn claim(&mut self, base: String, remote_id: &str, current: Option<&str>) -> String {
        let alternate = disambiguate(&base, remote_id);
        let key = if current == Some(alternate.as_str()) {
            alternate
        } else if self.owner(&base).map_or(true, |owner| owner == remote_id) {
            base
        } else {
            alternate
        };
        self.owners.insert(fold(&key), remote_id.to_string());
        key
    }

    /// Drop `remote_id`'s claim on `key`, if it holds one.
    pub fn release(&mut self, key: &str, remote_id: &str) {
        let folded = fold(key);
        if self.owners.get(&folded).map(String::as_str) == Some(remote_id) {
            self.owners.remove(&folded);
        }
    }

    fn owner(&self, key: &str) -> Option<&str> {
        self.owners.get(&fold(key)).map(String::as_str)
    }
}

fn fold(key: &str) -> String {
    key.to_lowercase()
}

pub(crate) fn absolute(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |path, seg| path.join(seg))
}

/// Remote content with a signature block naming its source.
pub(crate) fn signed_document(
    content: &[u8],
    source_id: &str,
    source_kind: &str,
    position: Position,
) -> Result<String> {
    let text = String::from_utf8_lossy(content);
    let signature = generate_signature(source_id, source_kind)?;
    insert_signature(&text, &signature, position)
}

/// Write via a temp file in the same directory, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&temp_path, contents).await?;
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

/// `None` when there is no file at `path`.
pub(crate) async fn read_if_present(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Returns false when there was nothing to remove.
pub(crate) async fn remove_if_present(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
