//! Watch implements the local filesystem watcher: OS-level notifications on the Devfile path
//! and the working directory, debounced into batched callbacks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, trace, warn};

use crate::{IgnoreMatcher, Result};

/// DebounceWindow is how long a quiet period must last before a batch of source events is
/// flushed as a single [`WatchEvent::SourcesModified`].
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// SourceChange is a single debounced batch of source-tree changes, relative to the working
/// directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceChange {
    /// Deleted lists paths removed since the previous batch.
    pub deleted: Vec<PathBuf>,
    /// Modified lists paths created or overwritten since the previous batch.
    pub modified: Vec<PathBuf>,
}

/// WatchEvent is a single event the watcher loop surfaces to its consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// DevfileModified indicates the Devfile itself changed.
    DevfileModified,
    /// SourcesModified is a debounced batch of source-tree changes.
    SourcesModified(SourceChange),
    /// Status carries a new status tag observed on the cluster-side status record.
    Status(String),
}

#[derive(Clone, Copy, Debug)]
enum SourceEventKind {
    Modified,
    Removed,
}

enum RawEvent {
    Devfile,
    Source { path: PathBuf, kind: SourceEventKind },
}

/// LocalWatcher drives the Devfile-path and working-directory watches described in the design:
/// two OS-level notification channels, a debounce timer, and an ignore filter, emitting
/// [`WatchEvent`]s on a channel for the orchestrator to act on.
pub struct LocalWatcher {
    devfile_path: PathBuf,
    wd: PathBuf,
    ignore: IgnoreMatcher,
}

impl LocalWatcher {
    /// New constructs a watcher for the given Devfile path and working directory.
    pub fn new(devfile_path: impl Into<PathBuf>, wd: impl Into<PathBuf>, ignore: IgnoreMatcher) -> Self {
        Self {
            devfile_path: devfile_path.into(),
            wd: wd.into(),
            ignore,
        }
    }

    /// Run drives the watch loop until `cancel` fires. `tx` receives batched [`WatchEvent`]s;
    /// `status_events` is a side-channel fed by the cluster-side spec watcher (§4.6), merged in
    /// verbatim as [`WatchEvent::Status`].
    #[instrument(skip_all, fields(devfile = %self.devfile_path.display(), wd = %self.wd.display()))]
    pub async fn run(
        self,
        tx: mpsc::UnboundedSender<WatchEvent>,
        mut status_events: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<RawEvent>();

        let _devfile_watcher = spawn_devfile_watcher(&self.devfile_path, raw_tx.clone())?;
        let _sources_watcher = spawn_sources_watcher(&self.wd, raw_tx)?;

        let mut deleted: HashSet<PathBuf> = HashSet::new();
        let mut modified: HashSet<PathBuf> = HashSet::new();
        let mut armed = false;
        let debounce = tokio::time::sleep(DEBOUNCE_WINDOW);
        tokio::pin!(debounce);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    trace!("local watcher cancelled");
                    return Ok(());
                }
                Some(raw) = raw_rx.recv() => {
                    match raw {
                        RawEvent::Devfile => {
                            if tx.send(WatchEvent::DevfileModified).is_err() {
                                return Ok(());
                            }
                        }
                        RawEvent::Source { path, kind } => {
                            let rel = path.strip_prefix(&self.wd).unwrap_or(&path).to_path_buf();
                            if rel.as_os_str().is_empty() {
                                continue;
                            }
                            if self.ignore.matches(&rel, path.is_dir()) {
                                trace!(path = %rel.display(), "dropping ignored event");
                                continue;
                            }
                            match kind {
                                SourceEventKind::Modified => {
                                    deleted.remove(&rel);
                                    modified.insert(rel);
                                }
                                SourceEventKind::Removed => {
                                    modified.remove(&rel);
                                    deleted.insert(rel);
                                }
                            }
                            debounce.as_mut().reset(Instant::now() + DEBOUNCE_WINDOW);
                            armed = true;
                        }
                    }
                }
                Some(status) = status_events.recv() => {
                    if tx.send(WatchEvent::Status(status)).is_err() {
                        return Ok(());
                    }
                }
                () = &mut debounce, if armed => {
                    armed = false;
                    let change = SourceChange {
                        deleted: deleted.drain().collect(),
                        modified: modified.drain().collect(),
                    };
                    if tx.send(WatchEvent::SourcesModified(change)).is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn spawn_devfile_watcher(
    path: &Path,
    tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Modify(_) | EventKind::Remove(_)) => {
            let _ = tx.send(RawEvent::Devfile);
        }
        Ok(_) => {}
        Err(err) => warn!(%err, "devfile watcher error"),
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn spawn_sources_watcher(
    wd: &Path,
    tx: mpsc::UnboundedSender<RawEvent>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let Some(kind) = classify(&event.kind) else {
                return;
            };
            for path in event.paths {
                let _ = tx.send(RawEvent::Source { path, kind });
            }
        }
        Err(err) => warn!(%err, "sources watcher error"),
    })?;
    watcher.watch(wd, RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Classify maps notify's platform event taxonomy onto close-write/delete semantics. Renames
/// are treated as delete-then-create of the affected path, per the design notes.
fn classify(kind: &EventKind) -> Option<SourceEventKind> {
    use notify::event::{ModifyKind, RenameMode};
    match kind {
        EventKind::Create(_) => Some(SourceEventKind::Modified),
        EventKind::Modify(ModifyKind::Data(_)) => Some(SourceEventKind::Modified),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(SourceEventKind::Modified),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(SourceEventKind::Removed),
        EventKind::Remove(_) => Some(SourceEventKind::Removed),
        _ => None,
    }
}
