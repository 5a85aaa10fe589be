//! Breadth-first enumeration of a config's roots.

use crate::cancel::CancelToken;
use crate::remote::{RemoteError, RemoteItem, RemoteResult, RemoteTreeProvider};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use tributary_db::{join_path, ErrorPhase, RunError, ScrapeConfig};

/// An item plus the materialized path of the folder it was found in.
#[derive(Debug, Clone)]
pub(crate) struct Discovered {
    pub item: RemoteItem,
    pub folder_path: String,
}

#[derive(Debug, Default)]
pub(crate) struct Enumeration {
    /// Parents always precede their children.
    pub items: Vec<Discovered>,
    pub errors: Vec<RunError>,
    pub truncated: bool,
    pub cancelled: bool,
}

impl Enumeration {
    /// Everything reachable was listed, so absence means removal.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && !self.truncated && !self.cancelled
    }

    fn error(&mut self, item_id: &str, err: RemoteError) {
        warn!(item_id, error = %err, "Enumeration failed");
        self.errors.push(RunError {
            item_id: item_id.to_string(),
            phase: ErrorPhase::Enumerate,
            message: err.to_string(),
        });
    }
}

/// Run a provider call under the configured timeout.
pub(crate) async fn bounded<T>(
    id: &str,
    timeout: Duration,
    call: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::transient(
            id,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

/// Walk the roots, visiting each id at most once, up to `max_results` items.
///
/// Roots are not items themselves; their names seed the materialized paths.
pub(crate) async fn enumerate(
    remote: &dyn RemoteTreeProvider,
    config: &ScrapeConfig,
    timeout: Duration,
    cancel: &CancelToken,
) -> Enumeration {
    let mut out = Enumeration::default();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, String)> = VecDeque::new();
    let cap = config.max_results as usize;

    for root_id in &config.root_folder_ids {
        if !visited.insert(root_id.clone()) {
            continue;
        }
        match bounded(root_id, timeout, remote.get_item(root_id)).await {
            Ok(root) if root.is_folder() => {
                queue.push_back((root.id.clone(), join_path("", &root.name)));
            }
            Ok(_) => out.error(root_id, RemoteError::transient(root_id, "root is not a folder")),
            Err(err) => out.error(root_id, err),
        }
    }

    'folders: while let Some((folder_id, folder_path)) = queue.pop_front() {
        let mut page_token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                out.cancelled = true;
                break 'folders;
            }

            let page = match bounded(
                &folder_id,
                timeout,
                remote.list_children(&folder_id, page_token.as_deref()),
            )
            .await
            {
                Ok(page) => page,
                Err(err) => {
                    out.error(&folder_id, err);
                    break;
                }
            };

            for child in page.items {
                if visited.contains(&child.id) {
                    continue;
                }
                if out.items.len() >= cap {
                    out.truncated = true;
                    break 'folders;
                }
                visited.insert(child.id.clone());
                if child.is_folder() && config.include_subfolders {
                    queue.push_back((child.id.clone(), join_path(&folder_path, &child.name)));
                }
                out.items.push(Discovered {
                    item: child,
                    folder_path: folder_path.clone(),
                });
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
    }

    debug!(
        config = %config.name,
        items = out.items.len(),
        errors = out.errors.len(),
        truncated = out.truncated,
        "Enumeration finished"
    );
    out
}
