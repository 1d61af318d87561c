//! Per-connection session handling
//!
//! Each accepted socket gets two cooperating tasks: a read loop that frames,
//! decodes, stamps, and dispatches inbound lines, and a write loop that
//! drains the session's bounded outbound queue and emits keep-alives. The
//! session's cancellation token ties the two together: whichever side dies
//! first cancels the other.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{codec, Message, UserStatus, MAX_FRAME_SIZE};
use crate::server::chat_server::ChatServer;

pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(60);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Server-side state of one live TCP connection
pub struct Session {
    /// Stable session id, minted on accept
    pub id: String,
    pub remote_addr: SocketAddr,
    /// Empty until CONNECT succeeds
    nickname: RwLock<String>,
    status: RwLock<UserStatus>,
    rooms: RwLock<HashSet<String>>,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session plus the receiving end of its outbound queue
    pub fn new(remote_addr: SocketAddr) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            remote_addr,
            nickname: RwLock::new(String::new()),
            status: RwLock::new(UserStatus::Active),
            rooms: RwLock::new(HashSet::new()),
            outbound: tx,
            cancel: CancellationToken::new(),
        });
        (session, rx)
    }

    pub async fn nickname(&self) -> String {
        self.nickname.read().await.clone()
    }

    pub async fn set_nickname(&self, nickname: &str) {
        *self.nickname.write().await = nickname.to_string();
    }

    pub async fn is_registered(&self) -> bool {
        !self.nickname.read().await.is_empty()
    }

    pub async fn status(&self) -> UserStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: UserStatus) {
        *self.status.write().await = status;
    }

    pub async fn add_room(&self, room_id: &str) {
        self.rooms.write().await.insert(room_id.to_string());
    }

    pub async fn remove_room(&self, room_id: &str) {
        self.rooms.write().await.remove(room_id);
    }

    pub async fn in_room(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains(room_id)
    }

    pub async fn room_ids(&self) -> Vec<String> {
        self.rooms.read().await.iter().cloned().collect()
    }

    /// Enqueue a message for delivery. Never blocks: a full queue drops the
    /// message with a warning so one slow consumer cannot stall a fan-out.
    pub fn send(&self, msg: Message) {
        match self.outbound.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    peer = %self.remote_addr,
                    kind = %msg.kind,
                    "outbound queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Signal both loops to stop. Idempotent; the write loop flushes queued
    /// frames before the socket drops.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Drive one connection to completion: spawn the write loop, run the read
/// loop, and tear both down when either side finishes.
pub async fn run(
    server: Arc<ChatServer>,
    session: Arc<Session>,
    stream: TcpStream,
    outbound_rx: mpsc::Receiver<Message>,
) {
    let (read_half, write_half) = stream.into_split();

    let writer = tokio::spawn(write_loop(
        outbound_rx,
        write_half,
        session.cancel.clone(),
        session.remote_addr,
    ));

    read_loop(&server, &session, read_half).await;

    session.close();
    let _ = writer.await;
}

async fn read_loop(server: &Arc<ChatServer>, session: &Arc<Session>, read_half: OwnedReadHalf) {
    let mut lines = FramedRead::new(
        read_half,
        LinesCodec::new_with_max_length(MAX_FRAME_SIZE),
    );

    loop {
        let next = tokio::select! {
            _ = session.cancel.cancelled() => break,
            next = timeout(READ_TIMEOUT, lines.next()) => next,
        };

        // The deadline re-arms on every pass; an idle peer is disconnected.
        let frame = match next {
            Err(_) => {
                info!(peer = %session.remote_addr, "read deadline expired");
                break;
            }
            Ok(None) => {
                debug!(peer = %session.remote_addr, "connection closed by peer");
                break;
            }
            Ok(Some(frame)) => frame,
        };

        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(peer = %session.remote_addr, "oversize frame, skipping");
                continue;
            }
            Err(LinesCodecError::Io(err)) => {
                warn!(peer = %session.remote_addr, error = %err, "read error");
                break;
            }
        };

        let mut msg = match codec::decode(&line) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(peer = %session.remote_addr, error = %err, "dropping frame");
                continue;
            }
        };

        // The session-bound nickname is the trusted sender identity.
        msg.sender = session.nickname().await;
        msg.timestamp = Utc::now();

        if let Err(err) = server.handle_message(session, msg).await {
            warn!(peer = %session.remote_addr, error = %err, "message rejected");
            session.send(Message::error(session.nickname().await, err.message()));
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<Message>,
    mut writer: OwnedWriteHalf,
    cancel: CancellationToken,
    peer: SocketAddr,
) {
    let start = tokio::time::Instant::now() + KEEPALIVE_INTERVAL;
    let mut keepalive = tokio::time::interval_at(start, KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => match maybe {
                None => break,
                Some(msg) => {
                    if write_frame(&mut writer, &msg, peer).await.is_err() {
                        cancel.cancel();
                        return;
                    }
                }
            },
            _ = keepalive.tick() => {
                if write_frame(&mut writer, &Message::ack(), peer).await.is_err() {
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    // Drain whatever was queued before the close so parting frames (shutdown
    // notices, final ERRORs) still reach the wire.
    while let Ok(msg) = rx.try_recv() {
        if write_frame(&mut writer, &msg, peer).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    msg: &Message,
    peer: SocketAddr,
) -> std::io::Result<()> {
    let bytes = match codec::encode(msg) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(peer = %peer, error = %err, "failed to encode message, skipping");
            return Ok(());
        }
    };

    match timeout(WRITE_TIMEOUT, writer.write_all(&bytes)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            warn!(peer = %peer, error = %err, "write error");
            Err(err)
        }
        Err(_) => {
            warn!(peer = %peer, "write deadline expired");
            Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline expired",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn addr() -> SocketAddr {
        "127.0.0.1:45000".parse().unwrap()
    }

    #[tokio::test]
    async fn session_starts_unregistered_and_active() {
        let (session, _rx) = Session::new(addr());
        assert!(!session.is_registered().await);
        assert_eq!(session.status().await, UserStatus::Active);
        assert!(session.room_ids().await.is_empty());

        session.set_nickname("alice").await;
        assert!(session.is_registered().await);
        assert_eq!(session.nickname().await, "alice");
    }

    #[tokio::test]
    async fn room_set_tracks_membership() {
        let (session, _rx) = Session::new(addr());
        session.add_room("room_1").await;
        session.add_room("room_2").await;
        assert!(session.in_room("room_1").await);

        session.remove_room("room_1").await;
        assert!(!session.in_room("room_1").await);
        assert_eq!(session.room_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn send_preserves_fifo_order() {
        let (session, mut rx) = Session::new(addr());
        session.send(Message::broadcast("a", "first"));
        session.send(Message::broadcast("a", "second"));

        assert_eq!(rx.recv().await.unwrap().content, "first");
        assert_eq!(rx.recv().await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (session, mut rx) = Session::new(addr());
        for i in 0..OUTBOUND_QUEUE_CAPACITY + 10 {
            session.send(Message::broadcast("a", format!("m{}", i)));
        }

        // The overflow was dropped, not queued
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, OUTBOUND_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _rx) = Session::new(addr());
        assert!(!session.is_closed());
        session.close();
        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_a_noop() {
        let (session, rx) = Session::new(addr());
        drop(rx);
        session.send(Message::new(MessageType::Ack));
    }
}
