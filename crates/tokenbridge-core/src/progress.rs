//! Progress state published to UI subscribers
//!
//! There is one active [`ProgressRecord`] per operation. It lives in a
//! `tokio::sync::watch` channel: subscribers always see the latest record
//! and never a backlog, so a subscriber that falls behind skips straight to
//! the newest state instead of holding up anyone else.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of the transfer in progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Files in the current operation
    pub total_files: usize,
    /// Zero-based index of the file being transferred
    pub current_file_index: usize,
    /// Percent complete for the current file, 0-100
    pub current_progress: u8,
    /// Name of the current file
    pub file_name: String,
    /// `ceil(file_size_bytes / chunk size)`
    pub expected_chunks: u64,
    /// Chunks received so far for the current file
    pub received_chunks: u64,
    /// Size of the current file in bytes
    pub file_size_bytes: u64,
    /// Set once the operation failed
    pub error: bool,
}

/// Number of nominal chunks a file of `size_bytes` is delivered in
pub fn expected_chunks(size_bytes: u64, chunk_size_bytes: u64) -> u64 {
    if chunk_size_bytes == 0 {
        return 0;
    }
    size_bytes.div_ceil(chunk_size_bytes)
}

/// Percent of `expected` covered by `received`, capped at 100
pub fn percent(received: u64, expected: u64) -> u8 {
    if expected == 0 {
        return if received > 0 { 100 } else { 0 };
    }
    let scaled = (u128::from(received) * 100) / u128::from(expected);
    scaled.min(100) as u8
}

/// Publish/subscribe holder for the active [`ProgressRecord`]
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Arc<watch::Sender<ProgressRecord>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    /// Reporter holding an empty record
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(ProgressRecord::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Copy of the current record
    pub fn current(&self) -> ProgressRecord {
        self.sender.borrow().clone()
    }

    /// Receiver for callers that prefer to await changes themselves
    pub fn watch(&self) -> watch::Receiver<ProgressRecord> {
        self.sender.subscribe()
    }

    /// Register `callback`. It receives the current record right away and
    /// then the latest record after every mutation, until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    ///
    /// Deliveries go through a watch channel, so mutations that land
    /// between two polls of the subscriber task merge into one callback
    /// carrying the latest record. Callers that need every intermediate
    /// value must yield between mutations.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, mut callback: F) -> Subscription
    where
        F: FnMut(&ProgressRecord) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let record = receiver.borrow_and_update().clone();
                callback(&record);
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        });
        Subscription { handle }
    }

    /// Apply an arbitrary mutation
    pub fn update(&self, mutate: impl FnOnce(&mut ProgressRecord)) {
        self.sender.send_modify(mutate);
    }

    /// Reset for a new operation over `total_files` files
    pub fn begin_operation(&self, total_files: usize) {
        self.sender.send_replace(ProgressRecord {
            total_files,
            ..ProgressRecord::default()
        });
    }

    /// Point the record at a new file; progress restarts at zero
    pub fn begin_file(&self, index: usize, file_name: &str, size_bytes: u64, chunk_size_bytes: u64) {
        self.sender.send_modify(|record| {
            record.current_file_index = index;
            record.file_name = file_name.to_string();
            record.file_size_bytes = size_bytes;
            record.expected_chunks = expected_chunks(size_bytes, chunk_size_bytes);
            record.received_chunks = 0;
            record.current_progress = 0;
        });
    }

    /// Record one more chunk; progress never moves backwards
    pub fn record_chunk(&self, received_bytes: u64) -> u8 {
        let mut progress = 0;
        self.sender.send_modify(|record| {
            record.received_chunks += 1;
            let next = percent(received_bytes, record.file_size_bytes);
            record.current_progress = record.current_progress.max(next);
            progress = record.current_progress;
        });
        progress
    }

    /// Mark the current file finished
    pub fn complete_file(&self) {
        self.sender.send_modify(|record| record.current_progress = 100);
    }

    /// Flag the operation as failed
    pub fn fail(&self) {
        self.sender.send_modify(|record| record.error = true);
    }
}

/// Handle returned by [`ProgressReporter::subscribe`]
#[must_use = "dropping a subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stop deliveries to this subscriber
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn expected_chunks_rounds_up() {
        assert_eq!(expected_chunks(2_500_000, 1024 * 1024), 3);
        assert_eq!(expected_chunks(1024 * 1024, 1024 * 1024), 1);
        assert_eq!(expected_chunks(0, 1024 * 1024), 0);
    }

    #[test]
    fn percent_is_capped() {
        assert_eq!(percent(50, 100), 50);
        assert_eq!(percent(150, 100), 100);
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(5, 0), 100);
    }

    #[test]
    fn record_chunk_never_lowers_progress() {
        let reporter = ProgressReporter::new();
        reporter.begin_operation(1);
        reporter.begin_file(0, "a.txt", 100, 10);
        assert_eq!(reporter.record_chunk(60), 60);
        assert_eq!(reporter.record_chunk(40), 60);
        assert_eq!(reporter.current().received_chunks, 2);
    }

    #[tokio::test]
    async fn subscriber_gets_current_then_updates() {
        let reporter = ProgressReporter::new();
        reporter.begin_operation(2);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = reporter.subscribe(move |record| {
            let _ = tx.send(record.clone());
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.total_files, 2);

        reporter.begin_file(1, "b.pdf", 10, 10);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.file_name, "b.pdf");
        assert_eq!(second.current_file_index, 1);

        subscription.unsubscribe();
        tokio::task::yield_now().await;
        reporter.fail();
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mutations_between_polls_arrive_as_latest_record() {
        let reporter = ProgressReporter::new();
        reporter.begin_operation(1);
        reporter.begin_file(0, "c.bin", 40, 10);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = reporter.subscribe(move |record| {
            let _ = tx.send(record.current_progress);
        });
        assert_eq!(rx.recv().await.unwrap(), 0);

        for received in [10, 20, 30] {
            reporter.record_chunk(received);
        }
        assert_eq!(rx.recv().await.unwrap(), 75);

        reporter.record_chunk(40);
        assert_eq!(rx.recv().await.unwrap(), 100);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
