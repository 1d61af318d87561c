//! Periodic cleanup of stale resources
//!
//! One timer drives two sweeps: file transfers nobody finished, and rooms
//! that have sat empty since long after their creation. The task stops when
//! the server's shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::protocol::Message;
use crate::server::chat_server::ChatServer;
use crate::server::transfer_manager::FILE_TRANSFER_TIMEOUT;

/// Interval between cleanup passes
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// How long a room may sit empty before it is removed
pub const EMPTY_ROOM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Run the cleanup loop until shutdown
pub(crate) async fn run(server: Arc<ChatServer>, shutdown: CancellationToken) {
    let start = Instant::now() + CLEANUP_INTERVAL;
    let mut tick = tokio::time::interval_at(start, CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                sweep_stale_transfers(&server).await;
                sweep_empty_rooms(&server).await;
            }
        }
    }
}

/// Remove transfers older than [`FILE_TRANSFER_TIMEOUT`], notify both
/// endpoints that are still connected, and release the sender's budget.
async fn sweep_stale_transfers(server: &ChatServer) {
    for transfer in server.transfers.remove_stale(FILE_TRANSFER_TIMEOUT).await {
        warn!(
            file_id = %transfer.file_id,
            filename = %transfer.filename,
            "cleaning up stale file transfer"
        );

        let notice = format!("File transfer timed out: {}", transfer.filename);
        if let Some(sender) = server.get_client(&transfer.sender).await {
            sender.send(Message::error(&transfer.sender, notice.clone()));
        }
        if let Some(recipient) = server.get_client(&transfer.recipient).await {
            recipient.send(Message::error(&transfer.recipient, notice.clone()));
        }

        server.rate_limiter.remove_transfer(&transfer.sender).await;
    }
}

/// Remove rooms with no members created more than [`EMPTY_ROOM_TIMEOUT`] ago
async fn sweep_empty_rooms(server: &ChatServer) {
    let Some(cutoff) = Instant::now().checked_sub(EMPTY_ROOM_TIMEOUT) else {
        return;
    };
    for room in server.room_manager.remove_empty_since(cutoff).await {
        info!(room = %room.id, name = %room.name, "cleaning up empty room");
    }
}
