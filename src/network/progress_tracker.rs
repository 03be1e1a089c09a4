//! Progress tracking for the header download.
//!
//! `DownloadProgressTracker` is the default `DownloadListener`. It counts
//! downloaded blocks, logs progress as the remaining count shrinks, and
//! exposes an awaitable "done" signal that blocking startup waits on.

use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tracing::info;

/// Receives chain download progress from the peer network.
pub trait DownloadListener: Send + Sync {
    /// The download began with `blocks_left` blocks to fetch.
    fn on_chain_download_started(&self, blocks_left: u32);

    /// A block at `height` arrived and `blocks_left` remain.
    fn on_block_downloaded(&self, height: u32, blocks_left: u32);

    /// The chain is caught up.
    fn on_download_done(&self) {}
}

#[derive(Debug)]
struct ProgressState {
    original_blocks_left: Option<u32>,
    highest_height: u32,
    blocks_downloaded: u64,
    last_logged_percent: u32,
    started_at: Option<Instant>,
}

/// Default download listener with an awaitable completion signal.
#[derive(Debug)]
pub struct DownloadProgressTracker {
    state: Mutex<ProgressState>,
    done: watch::Sender<bool>,
}

impl Default for DownloadProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadProgressTracker {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: Mutex::new(ProgressState {
                original_blocks_left: None,
                highest_height: 0,
                blocks_downloaded: 0,
                last_logged_percent: 0,
                started_at: None,
            }),
            done,
        }
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Resolve once the download has finished.
    pub async fn await_done(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn stats(&self) -> DownloadStats {
        let state = self.lock();
        DownloadStats {
            original_blocks_left: state.original_blocks_left.unwrap_or(0),
            highest_height: state.highest_height,
            blocks_downloaded: state.blocks_downloaded,
            done: self.is_done(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn done_download(&self) {
        if self.done.send_replace(true) {
            return;
        }
        let state = self.lock();
        let elapsed = state
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        info!(
            "Chain download done: {} blocks in {:.1}s, height {}",
            state.blocks_downloaded, elapsed, state.highest_height
        );
    }
}

impl DownloadListener for DownloadProgressTracker {
    fn on_chain_download_started(&self, blocks_left: u32) {
        {
            let mut state = self.lock();
            state.original_blocks_left = Some(blocks_left);
            state.started_at = Some(Instant::now());
        }
        if blocks_left == 0 {
            self.done_download();
        } else {
            info!("Downloading block chain of size {}", blocks_left);
        }
    }

    fn on_block_downloaded(&self, height: u32, blocks_left: u32) {
        {
            let mut state = self.lock();
            state.blocks_downloaded += 1;
            state.highest_height = state.highest_height.max(height);

            // Log every whole percent of the original backlog.
            if let Some(total) = state.original_blocks_left.filter(|total| *total > 0) {
                let fetched = total.saturating_sub(blocks_left);
                let percent = (u64::from(fetched) * 100 / u64::from(total)) as u32;
                if percent > state.last_logged_percent {
                    info!(
                        "Chain download {}% done with {} blocks to go, height {}",
                        percent, blocks_left, height
                    );
                    state.last_logged_percent = percent;
                }
            }
        }
        if blocks_left == 0 {
            self.done_download();
        }
    }

    fn on_download_done(&self) {
        self.done_download();
    }
}

/// Snapshot of download progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadStats {
    pub original_blocks_left: u32,
    pub highest_height: u32,
    pub blocks_downloaded: u64,
    pub done: bool,
}

impl DownloadStats {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} blocks downloaded, height {}{}",
            self.blocks_downloaded,
            self.original_blocks_left,
            self.highest_height,
            if self.done { " (done)" } else { "" }
        )
    }
}

/// Fans download progress out to several listeners.
pub struct DownloadListeners(pub Vec<Arc<dyn DownloadListener>>);

impl DownloadListener for DownloadListeners {
    fn on_chain_download_started(&self, blocks_left: u32) {
        for listener in &self.0 {
            listener.on_chain_download_started(blocks_left);
        }
    }

    fn on_block_downloaded(&self, height: u32, blocks_left: u32) {
        for listener in &self.0 {
            listener.on_block_downloaded(height, blocks_left);
        }
    }

    fn on_download_done(&self) {
        for listener in &self.0 {
            listener.on_download_done();
        }
    }
}
