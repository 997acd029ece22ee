//! Progress subscription.
//!
//! The channel loop publishes every decoded `DownloadProgress` to one
//! observer. Observers are called from the channel thread, so they must be
//! cheap and must not block; forwarding into an `mpsc::Sender` is the usual
//! way to hand snapshots to another thread.

use dlworker_protocol::DownloadProgress;
use std::sync::mpsc::Sender;

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &DownloadProgress);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _progress: &DownloadProgress) {}
}

impl ProgressObserver for Sender<DownloadProgress> {
    fn on_progress(&self, progress: &DownloadProgress) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(progress.clone());
    }
}
