//! Request coalescing
//!
//! At most one network transfer runs per normalized source key. The first
//! caller for a key becomes the leader and downloads into a private temp
//! artifact; concurrent callers become followers, wait for the leader to
//! signal completion, then copy the artifact to their own destination.
//!
//! Bookkeeping is tied to [`CallHandle`]: dropping a handle releases its
//! reference on every exit path, including cancellation and dropped futures.
//! The table entry and its temp artifact are removed once the last handle is
//! gone and the call has completed.

use crate::error::{Error, Result};
use crate::types::{ProgressFn, TransferPath};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const COPY_CHUNK: usize = 64 * 1024;

/// What the leader learned, shared with every follower
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TransferSummary {
    pub(crate) bytes_written: u64,
    pub(crate) size: u64,
    pub(crate) format: Option<String>,
    pub(crate) path: TransferPath,
    pub(crate) source_url: String,
}

pub(crate) type CallOutcome = std::result::Result<TransferSummary, Arc<Error>>;

/// Shared record for one leader and its followers
pub(crate) struct InflightCall {
    temp_path: PathBuf,
    completion: watch::Sender<Option<CallOutcome>>,
}

impl InflightCall {
    fn is_complete(&self) -> bool {
        self.completion.borrow().is_some()
    }

    /// Record the outcome; only the first call has any effect
    fn complete(&self, outcome: CallOutcome) {
        self.completion.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
    }
}

struct Slot {
    call: Arc<InflightCall>,
    refs: usize,
}

/// Table of in-flight calls keyed by normalized source URL
pub(crate) struct Coalescer {
    temp_dir: PathBuf,
    calls: Mutex<HashMap<String, Slot>>,
}

impl Coalescer {
    pub(crate) fn new(temp_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Join the call for `key`, creating it (as leader) if none exists
    pub(crate) fn acquire(self: &Arc<Self>, key: &str) -> CallHandle {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());

        let (call, is_leader) = match calls.get_mut(key) {
            Some(slot) => {
                slot.refs += 1;
                (Arc::clone(&slot.call), false)
            }
            None => {
                let (completion, _) = watch::channel(None);
                let call = Arc::new(InflightCall {
                    temp_path: self
                        .temp_dir
                        .join(format!("{:016x}.inflight", rand::random::<u64>())),
                    completion,
                });
                calls.insert(
                    key.to_string(),
                    Slot {
                        call: Arc::clone(&call),
                        refs: 1,
                    },
                );
                (call, true)
            }
        };

        CallHandle {
            coalescer: Arc::clone(self),
            key: key.to_string(),
            call,
            is_leader,
        }
    }

    fn release(&self, key: &str, call: &Arc<InflightCall>) {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let Some(slot) = calls.get_mut(key) else {
            return;
        };
        // A newer call may own the key if ours was already removed
        if !Arc::ptr_eq(&slot.call, call) {
            return;
        }

        slot.refs = slot.refs.saturating_sub(1);
        if slot.refs == 0 && slot.call.is_complete() {
            calls.remove(key);
            drop(calls);
            remove_artifact(&call.temp_path);
        }
    }

    /// Number of keys with an in-flight or not-yet-released call
    pub(crate) fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove inflight artifact"),
    }
}

/// One caller's reference to an [`InflightCall`]
pub(crate) struct CallHandle {
    coalescer: Arc<Coalescer>,
    key: String,
    call: Arc<InflightCall>,
    is_leader: bool,
}

impl CallHandle {
    pub(crate) fn is_leader(&self) -> bool {
        self.is_leader
    }

    /// Private artifact the leader writes into
    pub(crate) fn temp_path(&self) -> &Path {
        &self.call.temp_path
    }

    /// Signal completion to all followers (leader only)
    pub(crate) fn complete(&self, outcome: CallOutcome) {
        debug_assert!(self.is_leader, "only the leader completes a call");
        self.call.complete(outcome);
    }

    /// Wait for the leader's outcome, or for `cancel`
    pub(crate) async fn wait(&self, cancel: &CancellationToken) -> Result<CallOutcome> {
        let mut rx = self.call.completion.subscribe();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = rx.wait_for(Option::is_some) => {
                outcome.map(|slot| (*slot).clone())
            }
        };
        match outcome {
            Ok(Some(outcome)) => Ok(outcome),
            _ => Err(Error::Other("inflight call closed without an outcome".into())),
        }
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        // A leader dropped mid-transfer must not strand its followers
        if self.is_leader && !self.call.is_complete() {
            self.call.complete(Err(Arc::new(Error::Cancelled)));
        }
        self.coalescer.release(&self.key, &self.call);
    }
}

/// How a caller's destination is produced from the shared artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CopyMode {
    /// Independent copy that never shares the artifact's inode
    Private,
    /// Hard link when no progress is reported, falling back to a copy
    ///
    /// Linked destinations share one inode with the artifact and with
    /// every other linked caller, so an in-place edit of one shows in all.
    LinkWhenQuiet,
}

/// Copy a completed artifact to a caller's destination
///
/// The copy is staged next to `dest` and renamed over it only once
/// complete, so a failure leaves any existing `dest` untouched. With a
/// callback the copy is streamed in 64 KiB chunks reporting
/// `(copied, total)`.
pub(crate) async fn materialize(
    src: &Path,
    dest: &Path,
    progress: Option<&ProgressFn>,
    total: u64,
    mode: CopyMode,
) -> Result<u64> {
    materialize_with(src, dest, progress, total, mode, |src, dest| async move {
        tokio::fs::hard_link(src, dest).await
    })
    .await
}

async fn materialize_with<L, Fut>(
    src: &Path,
    dest: &Path,
    progress: Option<&ProgressFn>,
    total: u64,
    mode: CopyMode,
    link: L,
) -> Result<u64>
where
    L: FnOnce(PathBuf, PathBuf) -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let staging = staging_path(dest);
    let result = match fill(src, &staging, progress, total, mode, link).await {
        Ok(copied) => tokio::fs::rename(&staging, dest)
            .await
            .map(|()| copied)
            .map_err(Error::from),
        Err(e) => Err(e),
    };
    if result.is_err() {
        crate::utils::remove_quietly(&staging).await;
    }
    result
}

async fn fill<L, Fut>(
    src: &Path,
    staging: &Path,
    progress: Option<&ProgressFn>,
    total: u64,
    mode: CopyMode,
    link: L,
) -> Result<u64>
where
    L: FnOnce(PathBuf, PathBuf) -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    if mode == CopyMode::LinkWhenQuiet && progress.is_none() {
        match link(src.to_path_buf(), staging.to_path_buf()).await {
            Ok(()) => return Ok(tokio::fs::metadata(staging).await?.len()),
            Err(e) => {
                tracing::debug!(
                    src = %src.display(),
                    dest = %staging.display(),
                    error = %e,
                    "Hard link failed, falling back to copy"
                );
            }
        }
    }
    stream_copy(src, staging, progress, total).await
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download".into());
    name.push(format!(".{:08x}.partial", rand::random::<u32>()));
    dest.with_file_name(name)
}

async fn stream_copy(
    src: &Path,
    dest: &Path,
    progress: Option<&ProgressFn>,
    total: u64,
) -> Result<u64> {
    let mut input = tokio::fs::File::open(src).await?;
    let mut output = tokio::fs::File::create(dest).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;

    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
        copied += n as u64;
        if let Some(progress) = progress {
            progress(copied, total.max(copied));
        }
    }
    output.flush().await?;

    if copied == 0 {
        if let Some(progress) = progress {
            progress(0, total);
        }
    }
    Ok(copied)
}
