//! Server orchestrator: accept loop, registries, dispatch, and shutdown
//!
//! The orchestrator owns the nickname registry and every other process-wide
//! registry. All dispatch is an exhaustive match on the message type, with a
//! nested match on the room action for ROOM frames. No registry lock is ever
//! held across a broadcast fan-out or an I/O operation: membership is
//! snapshotted first, then delivered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ChatError, Result};
use crate::protocol::{Message, MessageType, RoomAction, UserStatus};
use crate::server::cleanup;
use crate::server::connection_handler::{self, Session};
use crate::server::rate_limiter::{RateLimiter, SWEEP_INTERVAL};
use crate::server::room_manager::RoomManager;
use crate::server::transfer_manager::{FileTransfer, TransferManager};
use crate::server::validator;

/// Budget for draining connection tasks during graceful shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between the shutdown announcement and closing the sessions, so the
/// write loops get a chance to flush the notice
const SHUTDOWN_FLUSH_GRACE: Duration = Duration::from_millis(100);

/// The chat server
pub struct ChatServer {
    config: ServerConfig,
    /// nickname -> session; the write guard doubles as the registration
    /// mutex, making the taken-check and insert atomic
    clients: RwLock<HashMap<String, Arc<Session>>>,
    pub(crate) room_manager: RoomManager,
    pub(crate) transfers: TransferManager,
    pub(crate) rate_limiter: RateLimiter,
    shutdown: CancellationToken,
    connections: TaskTracker,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            clients: RwLock::new(HashMap::new()),
            room_manager: RoomManager::new(),
            transfers: TransferManager::new(),
            rate_limiter: RateLimiter::new(),
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        })
    }

    /// Bind the configured port and serve until shutdown.
    ///
    /// Only the bind itself is fatal; every later failure is contained in
    /// the session it belongs to.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()).await.map_err(|err| {
            ChatError::network(format!(
                "failed to listen on port {}: {}",
                self.config.port, err
            ))
        })?;
        info!(port = %self.config.port, "server started");

        let server = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_signal().await;
            server.shutdown().await;
        });

        self.serve(listener).await
    }

    /// Accept connections on an already-bound listener until shutdown.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        tokio::spawn(cleanup::run(Arc::clone(self), self.shutdown.clone()));

        let server = Arc::clone(self);
        tokio::spawn(async move { server.rate_sweep_loop().await });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            error!(error = %err, "error accepting connection");
                            continue;
                        }
                    };

                    // Admission is checked before the session is spawned;
                    // a rejected socket is simply dropped.
                    if let Err(err) = self.rate_limiter.try_add_connection(addr.ip()).await {
                        warn!(peer = %addr, reason = err.message(), "connection rejected");
                        continue;
                    }

                    let server = Arc::clone(self);
                    self.connections.spawn(async move {
                        server.handle_connection(stream, addr).await;
                    });
                }
            }
        }
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        info!(peer = %addr, "new connection");

        let (session, outbound_rx) = Session::new(addr);
        connection_handler::run(Arc::clone(&self), Arc::clone(&session), stream, outbound_rx)
            .await;

        self.unregister_client(&session).await;
        self.rate_limiter.remove_connection(addr.ip()).await;
        debug!(peer = %addr, "connection finished");
    }

    /// Look up a registered client by nickname
    pub async fn get_client(&self, nickname: &str) -> Option<Arc<Session>> {
        self.clients.read().await.get(nickname).cloned()
    }

    /// Look up an in-flight file transfer by file id
    pub async fn transfer(&self, file_id: &str) -> Option<Arc<FileTransfer>> {
        self.transfers.get(file_id).await
    }

    async fn snapshot_clients(&self) -> Vec<Arc<Session>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Deliver a message to every registered session except `exclude`,
    /// skipping invisible users that are not the message's sender.
    pub async fn broadcast_message(&self, msg: &Message, exclude: &str) {
        for client in self.snapshot_clients().await {
            let nickname = client.nickname().await;
            if nickname == exclude {
                continue;
            }
            if client.status().await == UserStatus::Invisible && msg.sender != nickname {
                continue;
            }
            client.send(msg.clone());
        }
    }

    /// Broadcast the `"<nickname>:<STATUS>"` user list, omitting invisible
    /// users. Produced on connect, disconnect, and status change.
    pub async fn broadcast_user_list(&self) {
        let mut users = Vec::new();
        for client in self.snapshot_clients().await {
            if client.status().await != UserStatus::Invisible {
                users.push(format!(
                    "{}:{}",
                    client.nickname().await,
                    client.status().await
                ));
            }
        }
        self.broadcast_message(&Message::user_list(users), "").await;
    }

    /// Deliver a message to every member of a room, skipping invisible
    /// members that are not the sender. Membership is snapshotted under the
    /// room lock and the lock released before any delivery.
    pub async fn broadcast_to_room(&self, room_id: &str, msg: &Message) {
        let Some(room) = self.room_manager.get(room_id).await else {
            return;
        };

        for member in room.members().await {
            let Some(client) = self.get_client(&member).await else {
                continue;
            };
            if client.status().await == UserStatus::Invisible && member != msg.sender {
                continue;
            }
            client.send(msg.clone());
        }
    }

    /// Dispatch one inbound message.
    ///
    /// The returned error, if any, is surfaced to the offending session as
    /// an ERROR frame by the read loop; it never terminates the session.
    pub async fn handle_message(&self, session: &Arc<Session>, msg: Message) -> Result<()> {
        debug!(kind = %msg.kind, sender = %msg.sender, "handling message");

        if msg.kind != MessageType::Connect && !session.is_registered().await {
            return Err(ChatError::unauthorized(
                "you must register a nickname before sending messages",
            ));
        }

        match msg.kind {
            MessageType::Connect => self.handle_connect(session, &msg).await,
            MessageType::Text => self.handle_text(session, msg).await,
            MessageType::Status => self.handle_status(session, &msg).await,
            MessageType::Room => self.handle_room(session, &msg).await,
            MessageType::Invite => self.handle_invite(session, &msg).await,
            MessageType::InviteResp => self.handle_invite_resp(session, &msg).await,
            MessageType::File => self.handle_file_init(session, msg).await,
            MessageType::FileChunk => self.handle_file_chunk(session, msg).await,
            MessageType::Disconnect => {
                session.close();
                Ok(())
            }
            MessageType::FileComplete
            | MessageType::UserList
            | MessageType::Error
            | MessageType::Ack => Err(ChatError::validation(format!(
                "unknown message type: {}",
                msg.kind
            ))),
        }
    }

    async fn handle_connect(&self, session: &Arc<Session>, msg: &Message) -> Result<()> {
        if session.is_registered().await {
            return Err(ChatError::duplicate("already registered"));
        }

        let nickname = msg.content.as_str();
        if let Err(err) = self.register_client(session, nickname).await {
            session.send(Message::error(nickname, err.message()));
            session.close();
            return Ok(());
        }

        session.send(Message::text("Server", nickname, "Connected successfully"));
        session.send(Message::text(
            "Server",
            nickname,
            format!("Welcome to the chat, {}!", nickname),
        ));
        self.broadcast_message(
            &Message::broadcast("Server", format!("{} has joined the chat", nickname)),
            nickname,
        )
        .await;
        self.broadcast_user_list().await;

        info!(nickname = %nickname, peer = %session.remote_addr, "client registered");
        Ok(())
    }

    async fn register_client(&self, session: &Arc<Session>, nickname: &str) -> Result<()> {
        validator::validate_nickname(nickname)?;

        let mut clients = self.clients.write().await;
        if clients.contains_key(nickname) {
            return Err(ChatError::duplicate(format!(
                "nickname '{}' is already taken",
                nickname
            )));
        }
        session.set_nickname(nickname).await;
        clients.insert(nickname.to_string(), Arc::clone(session));
        Ok(())
    }

    /// Remove a session from every registry it appears in and announce the
    /// departure. Safe to call for sessions that never registered.
    async fn unregister_client(&self, session: &Arc<Session>) {
        let nickname = session.nickname().await;
        if nickname.is_empty() {
            return;
        }

        {
            let mut clients = self.clients.write().await;
            // Identity check: a session whose CONNECT lost the nickname race
            // must not evict the legitimate holder.
            match clients.get(&nickname) {
                Some(existing) if Arc::ptr_eq(existing, session) => {
                    clients.remove(&nickname);
                }
                _ => return,
            }
        }

        for room in self.room_manager.list_for(&nickname).await {
            room.remove_member(&nickname).await;
            let mut note = Message::text(
                "Server",
                "",
                format!("{} has disconnected from the room", nickname),
            );
            note.room = room.id.clone();
            self.broadcast_to_room(&room.id, &note).await;
        }

        self.broadcast_message(
            &Message::broadcast("Server", format!("{} has left the chat", nickname)),
            "",
        )
        .await;
        self.broadcast_user_list().await;

        self.rate_limiter.remove_user(&nickname).await;
        info!(nickname = %nickname, "client unregistered");
    }

    async fn handle_text(&self, session: &Arc<Session>, msg: Message) -> Result<()> {
        self.rate_limiter.can_send_message(&msg.sender).await?;
        validator::validate_message(&msg.content)?;

        if (msg.recipient == "*" || msg.recipient.is_empty()) && msg.room.is_empty() {
            self.broadcast_message(&msg, "").await;
        } else if !msg.room.is_empty() {
            let room = self
                .room_manager
                .get(&msg.room)
                .await
                .ok_or_else(|| ChatError::not_found("Room not found"))?;
            if !room.is_member(&msg.sender).await {
                return Err(ChatError::unauthorized(
                    "You are not a member of this room",
                ));
            }
            self.broadcast_to_room(&msg.room, &msg).await;
        } else {
            let recipient = self.get_client(&msg.recipient).await.ok_or_else(|| {
                ChatError::not_found(format!("User {} not found", msg.recipient))
            })?;
            recipient.send(msg.clone());
            // Echo the private message back to its sender
            session.send(msg);
        }
        Ok(())
    }

    async fn handle_status(&self, session: &Arc<Session>, msg: &Message) -> Result<()> {
        let status = msg
            .status
            .ok_or_else(|| ChatError::validation("missing status"))?;

        session.set_status(status).await;
        self.broadcast_user_list().await;

        self.broadcast_message(
            &Message::broadcast("Server", format!("{} is now {}", msg.sender, status)),
            &msg.sender,
        )
        .await;
        Ok(())
    }

    async fn handle_room(&self, session: &Arc<Session>, msg: &Message) -> Result<()> {
        let action = msg
            .action
            .ok_or_else(|| ChatError::validation("missing room action"))?;

        match action {
            RoomAction::Create => {
                self.rate_limiter.can_create_room(&msg.sender).await?;
                let name = validator::validate_room_name(&msg.content)?;

                let room = self.room_manager.create(name, &msg.sender).await;
                session.add_room(&room.id).await;
                self.rate_limiter.add_room(&msg.sender).await;

                session.send(Message::room_action(
                    RoomAction::Create,
                    &room.id,
                    format!("Room '{}' created successfully", room.name),
                ));
                info!(room = %room.id, creator = %msg.sender, "room created");
            }

            RoomAction::Join => {
                // Accepting an invitation is the only join path; a bare JOIN
                // of an existing room is deliberately a silent no-op.
                self.room_manager
                    .get(&msg.room)
                    .await
                    .ok_or_else(|| ChatError::not_found("Room not found"))?;
            }

            RoomAction::Leave => {
                let room = self
                    .room_manager
                    .get(&msg.room)
                    .await
                    .ok_or_else(|| ChatError::not_found("Room not found"))?;

                room.remove_member(&msg.sender).await;
                session.remove_room(&msg.room).await;
                if room.creator == msg.sender {
                    self.rate_limiter.remove_room(&msg.sender).await;
                }

                session.send(Message::room_action(
                    RoomAction::LeaveConfirm,
                    &room.id,
                    room.name.clone(),
                ));

                let mut note = Message::text(
                    "Server",
                    "",
                    format!("{} has left the room", msg.sender),
                );
                note.room = msg.room.clone();
                self.broadcast_to_room(&msg.room, &note).await;
            }

            RoomAction::Members => {
                let room = self
                    .room_manager
                    .get(&msg.room)
                    .await
                    .ok_or_else(|| ChatError::not_found("Room not found"))?;
                if !room.is_member(&msg.sender).await {
                    return Err(ChatError::unauthorized(
                        "You are not a member of this room",
                    ));
                }

                let mut entries = Vec::new();
                for member in room.members().await {
                    let status = match self.get_client(&member).await {
                        Some(client) => client.status().await.to_string(),
                        None => "offline".to_string(),
                    };
                    entries.push(format!("{} ({})", member, status));
                }

                let mut room_info = format!("Room '{}'", room.name);
                let description = room.description().await;
                if !description.is_empty() {
                    room_info = format!("{} (Topic: {})", room_info, description);
                }

                session.send(Message::room_action(
                    RoomAction::Members,
                    &room.id,
                    format!("{} members: {}", room_info, entries.join(", ")),
                ));
            }

            RoomAction::Kick => {
                let room = self
                    .room_manager
                    .get(&msg.room)
                    .await
                    .ok_or_else(|| ChatError::not_found("Room not found"))?;
                if room.creator != msg.sender {
                    return Err(ChatError::unauthorized(
                        "Only the room creator can kick members",
                    ));
                }
                if !room.is_member(&msg.recipient).await {
                    return Err(ChatError::not_found(format!(
                        "{} is not a member of this room",
                        msg.recipient
                    )));
                }
                if msg.recipient == msg.sender {
                    return Err(ChatError::unauthorized("You cannot kick yourself"));
                }

                room.remove_member(&msg.recipient).await;

                if let Some(kicked) = self.get_client(&msg.recipient).await {
                    kicked.remove_room(&msg.room).await;
                    kicked.send(Message::room_action(
                        RoomAction::LeaveConfirm,
                        &room.id,
                        format!("You have been kicked from room '{}'", room.name),
                    ));
                }

                let mut note = Message::text(
                    "Server",
                    "",
                    format!(
                        "{} has been kicked from the room by {}",
                        msg.recipient, msg.sender
                    ),
                );
                note.room = msg.room.clone();
                self.broadcast_to_room(&msg.room, &note).await;

                session.send(Message::text(
                    "Server",
                    &msg.sender,
                    format!("{} has been kicked from the room", msg.recipient),
                ));
            }

            RoomAction::Delete => {
                let room = self
                    .room_manager
                    .get(&msg.room)
                    .await
                    .ok_or_else(|| ChatError::not_found("Room not found"))?;
                if room.creator != msg.sender {
                    return Err(ChatError::unauthorized(
                        "Only the room creator can delete the room",
                    ));
                }

                let mut note = Message::text(
                    "Server",
                    "",
                    format!("Room '{}' has been deleted by the creator", room.name),
                );
                note.room = msg.room.clone();
                self.broadcast_to_room(&msg.room, &note).await;

                for member in room.members().await {
                    if let Some(client) = self.get_client(&member).await {
                        client.remove_room(&msg.room).await;
                        client.send(Message::room_action(
                            RoomAction::LeaveConfirm,
                            &room.id,
                            format!("Room '{}' has been deleted", room.name),
                        ));
                    }
                }

                self.room_manager.remove(&msg.room).await;
                self.rate_limiter.remove_room(&room.creator).await;

                session.send(Message::text(
                    "Server",
                    &msg.sender,
                    format!("Room '{}' has been deleted", room.name),
                ));
                info!(room = %room.id, "room deleted");
            }

            RoomAction::Topic => {
                let room = self
                    .room_manager
                    .get(&msg.room)
                    .await
                    .ok_or_else(|| ChatError::not_found("Room not found"))?;
                if !room.is_member(&msg.sender).await {
                    return Err(ChatError::unauthorized(
                        "You must be a member to set the room topic",
                    ));
                }

                room.set_description(&msg.content).await;

                let mut note = Message::text(
                    "Server",
                    "",
                    format!("{} set the room topic to: {}", msg.sender, msg.content),
                );
                note.room = msg.room.clone();
                self.broadcast_to_room(&msg.room, &note).await;

                session.send(Message::text("Server", &msg.sender, "Room topic updated"));
            }

            // Client-side actions with no server behavior
            RoomAction::Msg | RoomAction::LeaveConfirm => {}
        }
        Ok(())
    }

    async fn handle_invite(&self, session: &Arc<Session>, msg: &Message) -> Result<()> {
        let room = self
            .room_manager
            .get(&msg.room)
            .await
            .ok_or_else(|| ChatError::not_found("Room not found"))?;
        if !room.is_member(&msg.sender).await {
            return Err(ChatError::unauthorized(
                "You are not a member of this room",
            ));
        }

        let recipient = self.get_client(&msg.recipient).await.ok_or_else(|| {
            ChatError::not_found(format!("User {} not found", msg.recipient))
        })?;

        room.invite(&msg.recipient).await;

        recipient.send(Message {
            sender: msg.sender.clone(),
            recipient: msg.recipient.clone(),
            room: msg.room.clone(),
            content: format!("{} invited you to join room '{}'", msg.sender, room.name),
            ..Message::new(MessageType::Invite)
        });

        session.send(Message::text(
            "Server",
            &msg.sender,
            format!("Invitation sent to {}", msg.recipient),
        ));
        Ok(())
    }

    async fn handle_invite_resp(&self, session: &Arc<Session>, msg: &Message) -> Result<()> {
        let room = self
            .room_manager
            .get(&msg.room)
            .await
            .ok_or_else(|| ChatError::not_found("Room no longer exists"))?;

        if msg.content == "accept" && room.is_invited(&msg.sender).await {
            room.add_member(&msg.sender).await;
            session.add_room(&room.id).await;

            let description = room.description().await;
            let room_info = if description.is_empty() {
                room.name.clone()
            } else {
                format!("{} - Topic: {}", room.name, description)
            };
            session.send(Message::room_action(RoomAction::Join, &room.id, room_info));

            let mut note = Message::text(
                "Server",
                "",
                format!("{} has joined the room", msg.sender),
            );
            note.room = room.id.clone();
            self.broadcast_to_room(&room.id, &note).await;
        } else if msg.content == "decline" {
            room.revoke_invite(&msg.sender).await;
            session.send(Message::text("Server", &msg.sender, "Invitation declined"));
        }
        Ok(())
    }

    async fn handle_file_init(&self, _session: &Arc<Session>, msg: Message) -> Result<()> {
        self.rate_limiter.can_start_transfer(&msg.sender).await?;
        validator::validate_filename(&msg.filename)?;
        validator::validate_file_size(msg.filesize)?;

        let recipient = self.get_client(&msg.recipient).await.ok_or_else(|| {
            ChatError::not_found(format!("User {} not found", msg.recipient))
        })?;

        let transfer = Arc::new(FileTransfer::new(
            msg.file_id.clone(),
            msg.filename.clone(),
            msg.filesize,
            msg.sender.clone(),
            msg.recipient.clone(),
            msg.total_chunks,
        ));
        self.transfers.insert(transfer).await;
        self.rate_limiter.add_transfer(&msg.sender).await;

        info!(
            file_id = %msg.file_id,
            from = %msg.sender,
            to = %msg.recipient,
            "file transfer initiated"
        );
        recipient.send(msg);
        Ok(())
    }

    async fn handle_file_chunk(&self, session: &Arc<Session>, msg: Message) -> Result<()> {
        // Chunks for unknown transfers are dropped silently so a torn-down
        // transfer does not turn every straggler chunk into an ERROR storm.
        let Some(transfer) = self.transfers.get(&msg.file_id).await else {
            debug!(file_id = %msg.file_id, "chunk for unknown transfer, dropping");
            return Ok(());
        };

        let complete = transfer.record_chunk(msg.chunk_num).await;

        // Payloads are relayed, never retained; a vanished recipient just
        // means the bytes are dropped while the index set keeps counting.
        if let Some(recipient) = self.get_client(&transfer.recipient).await {
            recipient.send(msg.clone());
        }

        if complete && self.transfers.remove(&transfer.file_id).await.is_some() {
            let done = Message {
                file_id: transfer.file_id.clone(),
                filename: transfer.filename.clone(),
                ..Message::new(MessageType::FileComplete)
            };
            if let Some(recipient) = self.get_client(&transfer.recipient).await {
                recipient.send(done.clone());
            }
            session.send(done);

            self.rate_limiter.remove_transfer(&transfer.sender).await;
            info!(file_id = %transfer.file_id, "file transfer complete");
        }
        Ok(())
    }

    async fn rate_sweep_loop(self: Arc<Self>) {
        let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
        let mut tick = tokio::time::interval_at(start, SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => self.rate_limiter.sweep_idle().await,
            }
        }
    }

    /// Graceful shutdown: announce, flush, close every session, drain
    /// connection tasks within [`SHUTDOWN_TIMEOUT`], then stop the accept
    /// loop and the background sweeps.
    pub async fn shutdown(&self) {
        info!("shutting down server");

        self.broadcast_message(
            &Message::broadcast("Server", "Server is shutting down"),
            "",
        )
        .await;
        tokio::time::sleep(SHUTDOWN_FLUSH_GRACE).await;

        for session in self.snapshot_clients().await {
            session.close();
        }

        self.connections.close();
        if timeout(SHUTDOWN_TIMEOUT, self.connections.wait())
            .await
            .is_err()
        {
            warn!("shutdown timeout exceeded, forcing shutdown");
        }

        self.shutdown.cancel();
        info!("server shutdown complete");
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
