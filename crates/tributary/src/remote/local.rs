//! A local directory exposed as a remote tree.
//!
//! Ids are paths relative to the base directory with `/` separators; the
//! base directory itself is `.`. The version token is `<mtime_ms>-<size>`,
//! so any write to a file shows up as a changed item.

use super::{Page, RemoteError, RemoteItem, RemoteResult, RemoteTreeProvider};
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};
use tributary_db::{ItemKind, PermissionRecord, RevisionRecord};
use walkdir::WalkDir;

pub const ROOT_ID: &str = ".";

pub struct LocalDirProvider {
    base: PathBuf,
    label: String,
    page_size: usize,
}

impl LocalDirProvider {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let label = base.display().to_string();
        Self {
            base,
            label,
            page_size: 200,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn resolve(&self, id: &str) -> RemoteResult<PathBuf> {
        if id == ROOT_ID || id.is_empty() {
            return Ok(self.base.clone());
        }
        let rel = Path::new(id);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(RemoteError::not_found(id));
        }
        Ok(self.base.join(rel))
    }

    fn id_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.base) {
            Ok(rel) if rel.as_os_str().is_empty() => ROOT_ID.to_string(),
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.display().to_string(),
        }
    }

    fn describe(&self, id: &str, path: &Path) -> RemoteResult<RemoteItem> {
        let meta = std::fs::metadata(path).map_err(|e| map_io(id, e))?;
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| map_io(id, e))?;
        let kind = if meta.is_dir() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        let size = (kind == ItemKind::File).then_some(meta.len());
        let version = match size {
            Some(size) => format!("{}-{}", modified.timestamp_millis(), size),
            None => modified.timestamp_millis().to_string(),
        };

        let name = if id == ROOT_ID {
            self.base
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| ROOT_ID.to_string())
        } else {
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| id.to_string())
        };

        let parent_ids = if id == ROOT_ID {
            Vec::new()
        } else {
            vec![path
                .parent()
                .map(|p| self.id_for(p))
                .unwrap_or_else(|| ROOT_ID.to_string())]
        };

        Ok(RemoteItem {
            id: id.to_string(),
            kind,
            mime_type: (kind == ItemKind::File).then(|| guess_mime(&name).to_string()),
            name,
            parent_ids,
            modified_at: modified,
            version,
            size,
            properties: None,
        })
    }
}

fn map_io(id: &str, err: io::Error) -> RemoteError {
    if err.kind() == io::ErrorKind::NotFound {
        RemoteError::not_found(id)
    } else {
        RemoteError::transient(id, err.to_string())
    }
}

fn guess_mime(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") | Some("log") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("yaml") | Some("yml") => "application/x-yaml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[async_trait::async_trait]
impl RemoteTreeProvider for LocalDirProvider {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> RemoteResult<Page> {
        let dir = self.resolve(folder_id)?;
        if !dir.is_dir() {
            return Err(RemoteError::not_found(folder_id));
        }
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::transient(folder_id, format!("bad page token {token}")))?,
            None => 0,
        };

        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                RemoteError::transient(folder_id, format!("listing {}: {}", dir.display(), e))
            })?;
            if is_hidden(&entry.file_name().to_string_lossy()) {
                continue;
            }
            entries.push(entry.into_path());
        }

        let end = (offset + self.page_size).min(entries.len());
        let mut items = Vec::with_capacity(end.saturating_sub(offset));
        for path in entries.get(offset..end).unwrap_or_default() {
            let id = self.id_for(path);
            match self.describe(&id, path) {
                Ok(item) => items.push(item),
                // Removed between listing and stat
                Err(RemoteError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(Page {
            items,
            next_page_token: (end < entries.len()).then(|| end.to_string()),
        })
    }

    async fn get_item(&self, id: &str) -> RemoteResult<RemoteItem> {
        let path = self.resolve(id)?;
        self.describe(id, &path)
    }

    async fn get_permissions(&self, id: &str) -> RemoteResult<Vec<PermissionRecord>> {
        let path = self.resolve(id)?;
        let meta = std::fs::metadata(&path).map_err(|e| map_io(id, e))?;
        let role = if meta.permissions().readonly() {
            "reader"
        } else {
            "writer"
        };
        Ok(vec![PermissionRecord {
            permission_id: "local-owner".into(),
            role: role.into(),
            principal_type: "user".into(),
            principal: std::env::var("USER").ok(),
        }])
    }

    async fn get_revisions(&self, id: &str) -> RemoteResult<Vec<RevisionRecord>> {
        let item = self.get_item(id).await?;
        Ok(vec![RevisionRecord {
            revision_id: item.version.clone(),
            modified_at: item.modified_at,
            size: item.size,
            author: None,
        }])
    }

    async fn get_content(&self, id: &str) -> RemoteResult<Vec<u8>> {
        let path = self.resolve(id)?;
        tokio::fs::read(&path).await.map_err(|e| map_io(id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("notes/deep")).unwrap();
        std::fs::write(tmp.path().join("notes/a.md"), "# A\n[[b]]").unwrap();
        std::fs::write(tmp.path().join("notes/deep/b.txt"), "bee").unwrap();
        std::fs::write(tmp.path().join("top.json"), "{}").unwrap();
        std::fs::write(tmp.path().join(".hidden"), "x").unwrap();
        tmp
    }

    #[tokio::test]
    async fn test_lists_sorted_non_hidden_children() {
        let tmp = tree();
        let provider = LocalDirProvider::new(tmp.path());

        let page = provider.list_children(ROOT_ID, None).await.unwrap();
        let ids: Vec<_> = page.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["notes", "top.json"]);
        assert!(page.items[0].is_folder());
        assert_eq!(page.items[1].mime_type.as_deref(), Some("application/json"));
        assert_eq!(page.items[1].parent_ids, vec!["."]);

        let nested = provider.list_children("notes", None).await.unwrap();
        let ids: Vec<_> = nested.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["notes/a.md", "notes/deep"]);
        assert_eq!(nested.items[0].parent_ids, vec!["notes"]);
    }

    #[tokio::test]
    async fn test_paging() {
        let tmp = tree();
        let provider = LocalDirProvider::new(tmp.path()).with_page_size(1);
        let first = provider.list_children(ROOT_ID, None).await.unwrap();
        assert_eq!(first.items.len(), 1);
        let token = first.next_page_token.unwrap();
        let second = provider.list_children(ROOT_ID, Some(&token)).await.unwrap();
        assert_eq!(second.items[0].id, "top.json");
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_version_tracks_writes() {
        let tmp = tree();
        let provider = LocalDirProvider::new(tmp.path());
        let before = provider.get_item("notes/a.md").await.unwrap();
        std::fs::write(tmp.path().join("notes/a.md"), "# A, longer now").unwrap();
        let after = provider.get_item("notes/a.md").await.unwrap();
        assert_ne!(before.version, after.version);
        assert_eq!(
            provider.get_content("notes/a.md").await.unwrap(),
            b"# A, longer now".to_vec()
        );
    }

    #[tokio::test]
    async fn test_missing_and_escaping_ids() {
        let tmp = tree();
        let provider = LocalDirProvider::new(tmp.path());
        assert!(matches!(
            provider.get_item("nope.md").await,
            Err(RemoteError::NotFound { .. })
        ));
        assert!(matches!(
            provider.get_content("../etc/passwd").await,
            Err(RemoteError::NotFound { .. })
        ));
        assert_eq!(provider.get_item(ROOT_ID).await.unwrap().kind, ItemKind::Folder);
    }
}
