//! File transfer tracking
//!
//! The server is a relay: chunk payloads are forwarded to the recipient and
//! never persisted. What the registry keeps is the transfer metadata and the
//! set of received chunk indexes, which is the authoritative "all chunks
//! seen" boundary that drives FILE_COMPLETE.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Transfers older than this are swept and both endpoints notified
pub const FILE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// An in-flight chunked relay between two nicknames
pub struct FileTransfer {
    /// Client-chosen id carried on every FILE_CHUNK frame
    pub file_id: String,
    pub filename: String,
    pub filesize: u64,
    pub sender: String,
    pub recipient: String,
    pub total_chunks: u32,
    pub started_at: Instant,
    received: Mutex<HashSet<u32>>,
}

impl FileTransfer {
    pub fn new(
        file_id: String,
        filename: String,
        filesize: u64,
        sender: String,
        recipient: String,
        total_chunks: u32,
    ) -> Self {
        Self {
            file_id,
            filename,
            filesize,
            sender,
            recipient,
            total_chunks,
            started_at: Instant::now(),
            received: Mutex::new(HashSet::new()),
        }
    }

    /// Record a chunk index (duplicates overwrite) and report whether every
    /// chunk has now been seen
    pub async fn record_chunk(&self, chunk_num: u32) -> bool {
        let mut received = self.received.lock().await;
        received.insert(chunk_num);
        received.len() as u32 == self.total_chunks
    }

    pub async fn is_complete(&self) -> bool {
        self.received.lock().await.len() as u32 == self.total_chunks
    }

    /// Completion fraction in percent
    pub async fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        self.received.lock().await.len() as f64 / self.total_chunks as f64 * 100.0
    }
}

/// Registry of in-flight transfers, keyed by file id
pub struct TransferManager {
    transfers: RwLock<HashMap<String, Arc<FileTransfer>>>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, transfer: Arc<FileTransfer>) {
        let mut transfers = self.transfers.write().await;
        transfers.insert(transfer.file_id.clone(), transfer);
    }

    pub async fn get(&self, file_id: &str) -> Option<Arc<FileTransfer>> {
        self.transfers.read().await.get(file_id).cloned()
    }

    pub async fn remove(&self, file_id: &str) -> Option<Arc<FileTransfer>> {
        self.transfers.write().await.remove(file_id)
    }

    /// Remove and return every transfer older than `timeout`
    pub async fn remove_stale(&self, timeout: Duration) -> Vec<Arc<FileTransfer>> {
        let mut transfers = self.transfers.write().await;
        let stale_ids: Vec<String> = transfers
            .values()
            .filter(|t| t.started_at.elapsed() > timeout)
            .map(|t| t.file_id.clone())
            .collect();

        stale_ids
            .into_iter()
            .filter_map(|id| transfers.remove(&id))
            .collect()
    }
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(file_id: &str, total_chunks: u32) -> Arc<FileTransfer> {
        Arc::new(FileTransfer::new(
            file_id.to_string(),
            "a.bin".to_string(),
            16384,
            "alice".to_string(),
            "bob".to_string(),
            total_chunks,
        ))
    }

    #[tokio::test]
    async fn completes_when_all_chunks_seen() {
        let t = transfer("f1", 3);
        assert!(!t.record_chunk(0).await);
        assert!(!t.record_chunk(1).await);
        assert!(!t.is_complete().await);
        assert!(t.record_chunk(2).await);
        assert!(t.is_complete().await);
    }

    #[tokio::test]
    async fn duplicate_chunks_count_once() {
        let t = transfer("f1", 2);
        assert!(!t.record_chunk(0).await);
        assert!(!t.record_chunk(0).await);
        assert!(!t.is_complete().await);
        assert!(t.record_chunk(1).await);
    }

    #[tokio::test]
    async fn progress_tracks_received_fraction() {
        let t = transfer("f1", 4);
        assert_eq!(t.progress().await, 0.0);
        t.record_chunk(0).await;
        t.record_chunk(1).await;
        assert_eq!(t.progress().await, 50.0);
    }

    #[tokio::test]
    async fn registry_insert_get_remove() {
        let manager = TransferManager::new();
        manager.insert(transfer("f1", 2)).await;

        assert!(manager.get("f1").await.is_some());
        assert!(manager.get("f2").await.is_none());

        manager.remove("f1").await;
        assert!(manager.get("f1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_sweep_removes_only_old_transfers() {
        let manager = TransferManager::new();
        manager.insert(transfer("old", 2)).await;

        tokio::time::advance(FILE_TRANSFER_TIMEOUT + Duration::from_secs(1)).await;
        manager.insert(transfer("fresh", 2)).await;

        let stale = manager.remove_stale(FILE_TRANSFER_TIMEOUT).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].file_id, "old");
        assert!(manager.get("old").await.is_none());
        assert!(manager.get("fresh").await.is_some());
    }
}
