//! Orchestrator drives the process-level lifecycle: the first archive-and-apply, the controller
//! manager, the local watcher loop, and teardown on signal.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use syncfs::{build_archive, IgnoreMatcher, LocalWatcher};
use syncfs::watch::WatchEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{reconcile, records, watch, Context, Result};

/// ArchivePath is where the local side writes the transfer tarball, relative to the working
/// directory.
const ARCHIVE_PATH: &str = ".odo/complete.tar";

/// Options carries the orchestrator's startup configuration, gathered from the CLI.
pub struct Options {
    /// Namespace the spec/status records and derived objects live in.
    pub namespace: String,
    /// Component is the Devfile component name this process targets.
    pub component: String,
    /// Wd is the working directory the Devfile and sources are read from.
    pub wd: PathBuf,
    /// DevfilePath is the Devfile's location, usually `<wd>/devfile.yaml`.
    pub devfile_path: PathBuf,
    /// DefaultImage backs any Devfile container that omits an image.
    pub default_image: Option<String>,
}

/// Run performs the full startup sequence, then blocks until `cancel` fires, at which point it
/// tears down the spec record and waits for the cascade before returning.
pub async fn run(client: kube::Client, opts: Options, cancel: CancellationToken) -> Result<()> {
    std::fs::create_dir_all(opts.wd.join(".odo"))?;

    let ctx = Arc::new(Context {
        client: client.clone(),
        namespace: opts.namespace.clone(),
        component: opts.component.clone(),
        default_image: opts.default_image.clone(),
        cancel: cancel.clone(),
    });

    let manager_cancel = cancel.clone();
    let manager_ctx = ctx.clone();
    tokio::spawn(async move {
        let _ = manager_cancel;
        reconcile::controller(manager_ctx).await;
    });

    let ignore = IgnoreMatcher::load(&opts.wd)?;
    let archive_dest = opts.wd.join(ARCHIVE_PATH);
    let mod_time = build_archive(&opts.wd, &archive_dest, &ignore)?;
    info!(mod_time, "built initial archive");

    records::create_spec(&client, &opts.namespace, &opts.component, &opts.devfile_path, mod_time).await?;
    info!("applied initial spec record");

    let (status_tx, status_rx) = mpsc::unbounded_channel();
    spawn_status_forwarder(client.clone(), opts.namespace.clone(), status_tx, cancel.clone());

    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
    let local_watcher = LocalWatcher::new(opts.devfile_path.clone(), opts.wd.clone(), ignore);
    let watcher_cancel = cancel.clone();
    let watcher_handle = tokio::spawn(local_watcher.run(watch_tx, status_rx, watcher_cancel));

    let mut last_mod_time = mod_time;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = watch_rx.recv() => {
                match event {
                    Some(event) => last_mod_time = handle_event(&client, &opts, event, last_mod_time).await?,
                    None => break,
                }
            }
        }
    }

    watcher_handle.abort();
    teardown(&opts.namespace).await
}

/// HandleEvent reacts to a single local-watcher event and returns the mod-time token the next
/// spec re-apply should carry (unchanged unless the archive was just rebuilt).
async fn handle_event(
    client: &kube::Client,
    opts: &Options,
    event: WatchEvent,
    last_mod_time: i64,
) -> Result<i64> {
    match event {
        WatchEvent::DevfileModified => {
            info!("devfile modified, re-applying spec record");
            records::create_spec(client, &opts.namespace, &opts.component, &opts.devfile_path, last_mod_time).await?;
            Ok(last_mod_time)
        }
        WatchEvent::SourcesModified(change) => {
            if !change.modified.is_empty() {
                let names: Vec<_> = change.modified.iter().map(|p| p.display().to_string()).collect();
                info!(files = %names.join(", "), "files modified");
            }
            if !change.deleted.is_empty() {
                let names: Vec<_> = change.deleted.iter().map(|p| p.display().to_string()).collect();
                info!(files = %names.join(", "), "files deleted");
            }
            let ignore = IgnoreMatcher::load(&opts.wd)?;
            let archive_dest = opts.wd.join(ARCHIVE_PATH);
            let mod_time = build_archive(&opts.wd, &archive_dest, &ignore)?;
            records::create_spec(client, &opts.namespace, &opts.component, &opts.devfile_path, mod_time).await?;
            Ok(mod_time)
        }
        WatchEvent::Status(status) => {
            info!(status, "new status");
            Ok(last_mod_time)
        }
    }
}

/// SpawnStatusForwarder bridges the cluster-side status watcher onto the local watcher's
/// status-events channel, so devfile/source and status updates interleave through one loop.
fn spawn_status_forwarder(
    client: kube::Client,
    namespace: String,
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        use futures::StreamExt;
        let stream = watch::status_updates(client, &namespace);
        tokio::pin!(stream);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(record)) => {
                            if tx.send(record.status).is_err() {
                                return;
                            }
                        }
                        Some(Err(err)) => warn!(%err, "status watch error"),
                        None => return,
                    }
                }
            }
        }
    });
}

/// Teardown deletes the spec record using a detached client untouched by the process-wide
/// cancellation, so the cascade-delete wait can complete after shutdown begins.
async fn teardown(namespace: &str) -> Result<()> {
    info!("shutting down, deleting spec record");
    let config = kube::Config::infer().await?;
    let client = kube::client::ClientBuilder::try_from(config)?.build();
    records::delete_spec_and_wait(&client, namespace).await?;
    info!("spec record and owned objects removed");
    Ok(())
}

/// DevfilePath resolves the Devfile location for a working directory, honoring an explicit
/// override.
pub fn devfile_path(wd: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit.map(Path::to_path_buf).unwrap_or_else(|| wd.join("devfile.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devfile_path_defaults_under_the_working_directory() {
        let wd = Path::new("/work");
        assert_eq!(devfile_path(wd, None), Path::new("/work/devfile.yaml"));
    }

    #[test]
    fn devfile_path_honors_an_explicit_override() {
        let wd = Path::new("/work");
        let explicit = Path::new("/elsewhere/my-devfile.yaml");
        assert_eq!(devfile_path(wd, Some(explicit)), explicit);
    }
}
