//! Deterministic in-memory remote tree.
//!
//! Children are listed in insertion order and paged by offset tokens. Every
//! call is recorded, and failures can be injected per operation and id,
//! which is what the reconciliation tests lean on.

use super::{Page, RemoteError, RemoteItem, RemoteResult, RemoteTreeProvider};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tributary_db::{ItemKind, PermissionRecord, RevisionRecord};

/// Provider operation, for call accounting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Item,
    Permissions,
    Revisions,
    Content,
    Thumbnail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub id: String,
}

struct Node {
    item: RemoteItem,
    content: Vec<u8>,
    thumbnail: Option<Vec<u8>>,
    permissions: Vec<PermissionRecord>,
    revisions: Vec<RevisionRecord>,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    children: HashMap<String, Vec<String>>,
    failures: HashMap<(Op, String), RemoteError>,
    calls: Vec<Call>,
    clock: i64,
}

impl State {
    /// Monotonic fake clock so modification times are reproducible.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_default()
            + Duration::seconds(self.clock)
    }
}

pub struct InMemoryTree {
    label: String,
    page_size: usize,
    state: Mutex<State>,
}

impl InMemoryTree {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            page_size: 100,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_folder(&self, id: &str, name: &str, parents: &[&str], version: &str) {
        self.insert(id, name, parents, version, ItemKind::Folder, None, Vec::new());
    }

    pub fn add_file(&self, id: &str, name: &str, parents: &[&str], version: &str, content: &str) {
        let mime = if name.ends_with(".md") {
            "text/markdown"
        } else if name.ends_with(".txt") {
            "text/plain"
        } else {
            "application/octet-stream"
        };
        self.insert(
            id,
            name,
            parents,
            version,
            ItemKind::File,
            Some(mime.to_string()),
            content.as_bytes().to_vec(),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        id: &str,
        name: &str,
        parents: &[&str],
        version: &str,
        kind: ItemKind,
        mime_type: Option<String>,
        content: Vec<u8>,
    ) {
        let mut state = self.state();
        let at = state.tick();
        let size = (kind == ItemKind::File).then_some(content.len() as u64);
        let item = RemoteItem {
            id: id.to_string(),
            kind,
            name: name.to_string(),
            parent_ids: parents.iter().map(|p| p.to_string()).collect(),
            modified_at: at,
            version: version.to_string(),
            mime_type,
            size,
            properties: Some(serde_json::json!({ "label": name })),
        };
        let node = Node {
            item,
            content,
            thumbnail: None,
            permissions: vec![PermissionRecord {
                permission_id: format!("{id}-owner"),
                role: "owner".into(),
                principal_type: "user".into(),
                principal: Some("owner@example.com".into()),
            }],
            revisions: vec![RevisionRecord {
                revision_id: version.to_string(),
                modified_at: at,
                size,
                author: Some("owner@example.com".into()),
            }],
        };
        state.nodes.insert(id.to_string(), node);
        for parent in parents {
            state
                .children
                .entry(parent.to_string())
                .or_default()
                .push(id.to_string());
        }
    }

    /// Give an item a new version (and modification time).
    pub fn touch(&self, id: &str, version: &str) {
        let mut state = self.state();
        let at = state.tick();
        if let Some(node) = state.nodes.get_mut(id) {
            node.item.version = version.to_string();
            node.item.modified_at = at;
            node.revisions.push(RevisionRecord {
                revision_id: version.to_string(),
                modified_at: at,
                size: node.item.size,
                author: Some("owner@example.com".into()),
            });
        }
    }

    pub fn set_content(&self, id: &str, version: &str, content: &str) {
        {
            let mut state = self.state();
            if let Some(node) = state.nodes.get_mut(id) {
                node.content = content.as_bytes().to_vec();
                node.item.size = Some(content.len() as u64);
            }
        }
        self.touch(id, version);
    }

    pub fn set_thumbnail(&self, id: &str, bytes: &[u8]) {
        if let Some(node) = self.state().nodes.get_mut(id) {
            node.thumbnail = Some(bytes.to_vec());
        }
    }

    /// Link an existing item under an additional parent.
    pub fn add_parent(&self, id: &str, parent: &str) {
        let mut state = self.state();
        if let Some(node) = state.nodes.get_mut(id) {
            node.item.parent_ids.push(parent.to_string());
        }
        state
            .children
            .entry(parent.to_string())
            .or_default()
            .push(id.to_string());
    }

    pub fn remove(&self, id: &str) {
        let mut state = self.state();
        state.nodes.remove(id);
        state.children.remove(id);
        for children in state.children.values_mut() {
            children.retain(|child| child != id);
        }
    }

    pub fn fail(&self, op: Op, id: &str, error: RemoteError) {
        self.state().failures.insert((op, id.to_string()), error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    /// Record the call, then apply any injected failure or a missing node.
    fn enter(&self, op: Op, id: &str) -> RemoteResult<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(Call {
            op,
            id: id.to_string(),
        });
        if let Some(err) = state.failures.get(&(op, id.to_string())) {
            return Err(err.clone());
        }
        if !state.nodes.contains_key(id) {
            return Err(RemoteError::not_found(id));
        }
        Ok(state)
    }
}

fn node<'a>(state: &'a State, id: &str) -> RemoteResult<&'a Node> {
    state.nodes.get(id).ok_or_else(|| RemoteError::not_found(id))
}

#[async_trait::async_trait]
impl RemoteTreeProvider for InMemoryTree {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> RemoteResult<Page> {
        let state = self.enter(Op::List, folder_id)?;
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::transient(folder_id, format!("bad page token {token}")))?,
            None => 0,
        };

        let ids = state.children.get(folder_id).cloned().unwrap_or_default();
        let end = (offset + self.page_size).min(ids.len());
        let items = ids
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| state.nodes.get(id).map(|n| n.item.clone()))
            .collect();
        let next_page_token = (end < ids.len()).then(|| end.to_string());

        Ok(Page {
            items,
            next_page_token,
        })
    }

    async fn get_item(&self, id: &str) -> RemoteResult<RemoteItem> {
        let state = self.enter(Op::Item, id)?;
        Ok(node(&state, id)?.item.clone())
    }

    async fn get_permissions(&self, id: &str) -> RemoteResult<Vec<PermissionRecord>> {
        let state = self.enter(Op::Permissions, id)?;
        Ok(node(&state, id)?.permissions.clone())
    }

    async fn get_revisions(&self, id: &str) -> RemoteResult<Vec<RevisionRecord>> {
        let state = self.enter(Op::Revisions, id)?;
        Ok(node(&state, id)?.revisions.clone())
    }

    async fn get_content(&self, id: &str) -> RemoteResult<Vec<u8>> {
        let state = self.enter(Op::Content, id)?;
        Ok(node(&state, id)?.content.clone())
    }

    async fn get_thumbnail(&self, id: &str) -> RemoteResult<Option<Vec<u8>>> {
        let state = self.enter(Op::Thumbnail, id)?;
        Ok(node(&state, id)?.thumbnail.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pagination_follows_tokens() {
        let tree = InMemoryTree::new("mem").with_page_size(2);
        tree.add_folder("r", "Root", &[], "1");
        for i in 0..5 {
            tree.add_file(&format!("f{i}"), &format!("f{i}.md"), &["r"], "1", "x");
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = tree.list_children("r", token.as_deref()).await.unwrap();
            seen.extend(page.items.into_iter().map(|i| i.id));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["f0", "f1", "f2", "f3", "f4"]);
        assert_eq!(tree.count(Op::List), 3);
    }

    #[tokio::test]
    async fn test_injected_failures_and_missing_ids() {
        let tree = InMemoryTree::new("mem");
        tree.add_file("x", "x.md", &[], "1", "body");
        tree.fail(Op::Content, "x", RemoteError::transient("x", "503"));

        assert!(matches!(
            tree.get_content("x").await,
            Err(RemoteError::Transient { .. })
        ));
        assert_eq!(tree.get_permissions("x").await.unwrap().len(), 1);
        assert_eq!(
            tree.get_item("nope").await.unwrap_err(),
            RemoteError::not_found("nope")
        );

        tree.clear_failures();
        assert_eq!(tree.get_content("x").await.unwrap(), b"body".to_vec());
    }

    #[tokio::test]
    async fn test_touch_bumps_version_and_revisions() {
        let tree = InMemoryTree::new("mem");
        tree.add_file("x", "x.md", &[], "v1", "body");
        let before = tree.get_item("x").await.unwrap();
        tree.touch("x", "v2");
        let after = tree.get_item("x").await.unwrap();

        assert_eq!(after.version, "v2");
        assert!(after.modified_at > before.modified_at);
        assert_eq!(tree.get_revisions("x").await.unwrap().len(), 2);
    }
}
