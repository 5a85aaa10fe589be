//! Keeps the backlink index current while documents change on disk.
//!
//! A [`DirectoryPoller`] turns directory scans into [`WatchEvent`]s, which
//! queue up in a [`Debouncer`]. The debouncer is a small state machine:
//!
//! ```text
//! Idle --push--> PendingFlush(deadline) --poll past deadline--> Flushing
//!   ^                 |  push: deadline moves out                  |
//!   +-----------------+------------- finish_flush -----------------+
//! ```
//!
//! Events arriving while a batch is being applied stay queued and start a
//! new pending window once the flush finishes. On shutdown the queue is
//! drained and applied exactly once.

use crate::backlinks::BacklinkMaintainer;
use crate::cancel::CancelToken;
use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Changed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Changed,
        }
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Removed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    PendingFlush { deadline: Instant },
    Flushing,
}

/// Coalesces events per path until the queue has been quiet for `delay`.
#[derive(Debug)]
pub struct Debouncer {
    state: DebounceState,
    queue: BTreeMap<PathBuf, WatchEventKind>,
    delay: Duration,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            state: DebounceState::Idle,
            queue: BTreeMap::new(),
            delay,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue an event. The latest event for a path wins.
    pub fn push(&mut self, event: WatchEvent, now: Instant) {
        self.queue.insert(event.path, event.kind);
        match self.state {
            DebounceState::Idle | DebounceState::PendingFlush { .. } => {
                self.state = DebounceState::PendingFlush {
                    deadline: now + self.delay,
                };
            }
            DebounceState::Flushing => {}
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::PendingFlush { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Take the batch once the deadline has passed. The caller applies it
    /// and then calls [`Self::finish_flush`].
    pub fn poll(&mut self, now: Instant) -> Option<Vec<WatchEvent>> {
        match self.state {
            DebounceState::PendingFlush { deadline } if now >= deadline => {
                self.state = DebounceState::Flushing;
                Some(self.take_queue())
            }
            _ => None,
        }
    }

    pub fn finish_flush(&mut self, now: Instant) {
        if self.state != DebounceState::Flushing {
            return;
        }
        self.state = if self.queue.is_empty() {
            DebounceState::Idle
        } else {
            DebounceState::PendingFlush {
                deadline: now + self.delay,
            }
        };
    }

    /// Everything still queued, regardless of deadline. Leaves the debouncer idle.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        self.state = DebounceState::Idle;
        self.take_queue()
    }

    fn take_queue(&mut self) -> Vec<WatchEvent> {
        std::mem::take(&mut self.queue)
            .into_iter()
            .map(|(path, kind)| WatchEvent { path, kind })
            .collect()
    }
}

/// Files the backlink index cares about.
fn is_document(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("md") | Some("markdown") | Some("txt")
    )
}

/// Detects document changes by comparing successive scans.
pub struct DirectoryPoller {
    root: PathBuf,
    seen: HashMap<PathBuf, (Option<SystemTime>, u64)>,
}

impl DirectoryPoller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seen: HashMap::new(),
        }
    }

    /// Events since the previous scan. The first scan reports every document.
    pub fn scan(&mut self) -> Vec<WatchEvent> {
        let mut current = HashMap::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(root = %self.root.display(), error = %err, "Watch scan error");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_document(entry.path()) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => {
                    current.insert(entry.into_path(), (meta.modified().ok(), meta.len()));
                }
                Err(err) => {
                    debug!(path = %entry.path().display(), error = %err, "Skipping unreadable entry");
                }
            }
        }

        let mut events: Vec<WatchEvent> = current
            .iter()
            .filter(|(path, stamp)| self.seen.get(*path) != Some(*stamp))
            .map(|(path, _)| WatchEvent::changed(path.clone()))
            .collect();
        events.extend(
            self.seen
                .keys()
                .filter(|path| !current.contains_key(*path))
                .map(|path| WatchEvent::removed(path.clone())),
        );
        events.sort_by(|a, b| a.path.cmp(&b.path));

        self.seen = current;
        events
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    pub debounce: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub flushes: u64,
    pub documents_indexed: u64,
    pub documents_removed: u64,
    pub failures: u64,
}

async fn apply_batch(maintainer: &BacklinkMaintainer, batch: Vec<WatchEvent>, stats: &mut WatchStats) {
    stats.flushes += 1;
    for event in batch {
        let outcome = match event.kind {
            WatchEventKind::Changed => maintainer.update_backlinks_from_content(&event.path).await,
            WatchEventKind::Removed => maintainer.remove_document(&event.path).await,
        };
        match (outcome, event.kind) {
            (Ok(_), WatchEventKind::Changed) => stats.documents_indexed += 1,
            (Ok(_), WatchEventKind::Removed) => stats.documents_removed += 1,
            (Err(err), _) => {
                stats.failures += 1;
                warn!(path = %event.path.display(), error = %err, "Failed to re-index document");
            }
        }
    }
}

/// Poll the maintainer's root until `cancel` fires, re-indexing changed
/// documents in debounced batches.
pub async fn run_watch(
    maintainer: &BacklinkMaintainer,
    options: WatchOptions,
    cancel: CancelToken,
) -> Result<WatchStats> {
    let mut poller = DirectoryPoller::new(maintainer.root());
    let mut debouncer = Debouncer::new(options.debounce);
    let mut stats = WatchStats::default();
    let mut ticker = tokio::time::interval(options.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        root = %maintainer.root().display(),
        poll_ms = options.poll_interval.as_millis() as u64,
        debounce_ms = options.debounce.as_millis() as u64,
        "Watching for document changes"
    );

    while !cancel.is_cancelled() {
        let deadline = debouncer.deadline();
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                for event in poller.scan() {
                    debouncer.push(event, now);
                }
            }
            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {}
        }

        if let Some(batch) = debouncer.poll(Instant::now()) {
            debug!(events = batch.len(), "Flushing watch batch");
            apply_batch(maintainer, batch, &mut stats).await;
            debouncer.finish_flush(Instant::now());
        }
    }

    // Pick up anything written since the last tick before draining.
    let now = Instant::now();
    for event in poller.scan() {
        debouncer.push(event, now);
    }
    let remaining = debouncer.drain();
    if !remaining.is_empty() {
        debug!(events = remaining.len(), "Draining watch queue on shutdown");
        apply_batch(maintainer, remaining, &mut stats).await;
    }

    info!(
        flushes = stats.flushes,
        indexed = stats.documents_indexed,
        removed = stats.documents_removed,
        failures = stats.failures,
        "Watch stopped"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    const DELAY: Duration = Duration::from_millis(100);

    #[test]
    fn test_debounce_transitions() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(DELAY);
        assert_eq!(d.state(), DebounceState::Idle);
        assert!(d.poll(t0 + DELAY * 10).is_none());

        d.push(WatchEvent::changed("a.md"), t0);
        assert_eq!(d.deadline(), Some(t0 + DELAY));

        // trailing edge: a second event pushes the deadline out
        d.push(WatchEvent::changed("b.md"), t0 + DELAY / 2);
        assert!(d.poll(t0 + DELAY).is_none());

        let batch = d.poll(t0 + DELAY * 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(d.state(), DebounceState::Flushing);

        d.finish_flush(t0 + DELAY * 2);
        assert_eq!(d.state(), DebounceState::Idle);
    }

    #[test]
    fn test_events_during_flush_start_new_window() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(DELAY);
        d.push(WatchEvent::changed("a.md"), t0);
        d.poll(t0 + DELAY).unwrap();

        d.push(WatchEvent::removed("b.md"), t0 + DELAY);
        assert_eq!(d.state(), DebounceState::Flushing);

        d.finish_flush(t0 + DELAY * 2);
        assert_eq!(d.deadline(), Some(t0 + DELAY * 3));
        assert_eq!(d.poll(t0 + DELAY * 3).unwrap(), vec![WatchEvent::removed("b.md")]);
    }

    #[test]
    fn test_latest_event_per_path_wins_and_drain_empties() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(DELAY);
        d.push(WatchEvent::changed("a.md"), t0);
        d.push(WatchEvent::removed("a.md"), t0);
        assert_eq!(d.pending(), 1);

        assert_eq!(d.drain(), vec![WatchEvent::removed("a.md")]);
        assert_eq!(d.state(), DebounceState::Idle);
        assert!(d.drain().is_empty());
    }

    #[test]
    fn test_poller_reports_changes_and_removals() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.md");
        let b = tmp.path().join("sub").join("b.md");
        std::fs::create_dir_all(b.parent().unwrap()).unwrap();
        std::fs::write(&a, "[[b]]").unwrap();
        std::fs::write(&b, "plain").unwrap();
        std::fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "x").unwrap();

        let mut poller = DirectoryPoller::new(tmp.path());
        assert_eq!(
            poller.scan(),
            vec![WatchEvent::changed(a.clone()), WatchEvent::changed(b.clone())]
        );
        assert!(poller.scan().is_empty());

        std::fs::write(&a, "[[b]] and [[c]]").unwrap();
        filetime::set_file_mtime(&a, filetime::FileTime::from_unix_time(2_000_000_000, 0)).unwrap();
        std::fs::remove_file(&b).unwrap();
        assert_eq!(
            poller.scan(),
            vec![WatchEvent::changed(a), WatchEvent::removed(b)]
        );
    }

    #[tokio::test]
    async fn test_run_watch_indexes_and_drains_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.md"), "see [[b]]").unwrap();

        let maintainer = Arc::new(BacklinkMaintainer::in_memory(tmp.path()));
        let cancel = CancelToken::new();
        let options = WatchOptions {
            poll_interval: Duration::from_millis(20),
            debounce: Duration::from_millis(30),
        };

        let task = {
            let maintainer = maintainer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { run_watch(&maintainer, options, cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(maintainer.backlinks("b").await, vec!["a".to_string()]);

        std::fs::write(tmp.path().join("c.md"), "[[b]]").unwrap();
        cancel.cancel();
        let stats = task.await.unwrap().unwrap();

        assert_eq!(maintainer.backlinks("b").await.len(), 2);
        assert!(stats.documents_indexed >= 2);
        assert_eq!(stats.failures, 0);
    }
}
