//! End-to-end scenarios against a live server on an ephemeral port.
//!
//! Each test boots a cold server, speaks the wire protocol through real TCP
//! sockets, and asserts on the exact frames a client would see.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use palaver::{ChatServer, Message, MessageType, RoomAction, ServerConfig};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to listen before deciding a frame was (correctly) never sent
const SILENCE_WINDOW: Duration = Duration::from_millis(500);

async fn start_server() -> (Arc<ChatServer>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = ChatServer::new(ServerConfig::default());
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });

    (server, addr)
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Connect and complete the registration handshake
    async fn register(addr: SocketAddr, nickname: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send_json(&format!(
                r#"{{"type":"CONNECT","content":"{}"}}"#,
                nickname
            ))
            .await;
        let ack = client.recv().await;
        assert_eq!(ack.kind, MessageType::Text);
        assert_eq!(ack.content, "Connected successfully");
        client
    }

    async fn send_json(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Read one frame, failing the test after [`RECV_TIMEOUT`]
    async fn recv(&mut self) -> Message {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a frame")
            .expect("read failed");
        assert!(n > 0, "connection closed while a frame was expected");
        serde_json::from_str(line.trim_end()).expect("server sent malformed frame")
    }

    /// Read frames until one matches, discarding keep-alives and chatter
    async fn recv_until<F: Fn(&Message) -> bool>(&mut self, pred: F) -> Message {
        timeout(RECV_TIMEOUT, async {
            loop {
                let msg = self.recv().await;
                if pred(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for a matching frame")
    }

    /// Assert that no frame at all arrives within the silence window
    async fn expect_silence(&mut self) {
        let mut line = String::new();
        match timeout(SILENCE_WINDOW, self.reader.read_line(&mut line)).await {
            Err(_) => {}
            Ok(Ok(0)) => panic!("connection closed unexpectedly"),
            Ok(Ok(_)) => panic!("unexpected frame: {}", line.trim_end()),
            Ok(Err(err)) => panic!("read failed: {}", err),
        }
    }

    /// Assert the server closes this connection
    async fn expect_closed(&mut self) {
        loop {
            let mut line = String::new();
            let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for the server to close the socket")
                .expect("read failed");
            if n == 0 {
                return;
            }
        }
    }
}

// A claimed nickname and an invalid one are both refused with an ERROR
// and a closed socket, while the original holder is untouched.
#[tokio::test]
async fn registration_collision() {
    let (_server, addr) = start_server().await;

    let mut alice = TestClient::register(addr, "alice").await;

    let mut impostor = TestClient::connect(addr).await;
    impostor
        .send_json(r#"{"type":"CONNECT","content":"alice"}"#)
        .await;
    let err = impostor.recv().await;
    assert_eq!(err.kind, MessageType::Error);
    assert_eq!(err.error, "nickname 'alice' is already taken");
    impostor.expect_closed().await;

    let mut shorty = TestClient::connect(addr).await;
    shorty.send_json(r#"{"type":"CONNECT","content":"al"}"#).await;
    let err = shorty.recv().await;
    assert_eq!(err.error, "nickname must be at least 3 characters long");
    shorty.expect_closed().await;

    // alice is still registered and reachable
    alice
        .send_json(r#"{"type":"TEXT","recipient":"alice","content":"self"}"#)
        .await;
    let echo = alice.recv_until(|m| m.content == "self").await;
    assert_eq!(echo.kind, MessageType::Text);
}

// Broadcasts skip invisible recipients but not the sender, and the
// user list hides invisible users.
#[tokio::test]
async fn broadcast_excludes_invisible_recipients() {
    let (_server, addr) = start_server().await;

    let mut alice = TestClient::register(addr, "alice").await;
    let mut bob = TestClient::register(addr, "bob").await;
    let mut carol = TestClient::register(addr, "carol").await;

    // Everything bob will ever see arrives before his status change; drain
    // through carol's join so silence afterwards is meaningful.
    bob.recv_until(|m| m.users.contains(&"carol:ACTIVE".to_string()))
        .await;

    bob.send_json(r#"{"type":"STATUS","status":"INVISIBLE"}"#).await;

    // Status propagation reaches the visible users
    let list = carol
        .recv_until(|m| {
            m.kind == MessageType::UserList && !m.users.iter().any(|u| u.starts_with("bob:"))
        })
        .await;
    let mut users = list.users.clone();
    users.sort();
    assert_eq!(users, vec!["alice:ACTIVE", "carol:ACTIVE"]);
    alice
        .recv_until(|m| {
            m.kind == MessageType::UserList && !m.users.iter().any(|u| u.starts_with("bob:"))
        })
        .await;

    alice
        .send_json(r#"{"type":"TEXT","recipient":"*","content":"hi"}"#)
        .await;

    let got = carol.recv_until(|m| m.content == "hi").await;
    assert_eq!(got.kind, MessageType::Text);
    assert_eq!(got.sender, "alice");

    // Invisible bob must receive nothing at all
    bob.expect_silence().await;
}

// Room creation, invitation, acceptance, and a creator kick.
#[tokio::test]
async fn room_kick_by_creator() {
    let (_server, addr) = start_server().await;

    let mut alice = TestClient::register(addr, "alice").await;
    let mut bob = TestClient::register(addr, "bob").await;

    alice
        .send_json(r#"{"type":"ROOM","action":"CREATE","content":"proj"}"#)
        .await;
    let created = alice
        .recv_until(|m| m.action == Some(RoomAction::Create))
        .await;
    assert_eq!(created.content, "Room 'proj' created successfully");
    let room_id = created.room.clone();
    assert!(room_id.starts_with("room_"));

    alice
        .send_json(&format!(
            r#"{{"type":"INVITE","recipient":"bob","room":"{}"}}"#,
            room_id
        ))
        .await;
    let invite = bob.recv_until(|m| m.kind == MessageType::Invite).await;
    assert_eq!(invite.sender, "alice");
    assert_eq!(invite.room, room_id);

    bob.send_json(&format!(
        r#"{{"type":"INVITE_RESP","room":"{}","content":"accept"}}"#,
        room_id
    ))
    .await;
    let joined = bob.recv_until(|m| m.action == Some(RoomAction::Join)).await;
    assert_eq!(joined.room, room_id);

    alice
        .send_json(&format!(
            r#"{{"type":"ROOM","action":"KICK","room":"{}","recipient":"bob"}}"#,
            room_id
        ))
        .await;

    let kicked = bob
        .recv_until(|m| m.action == Some(RoomAction::LeaveConfirm))
        .await;
    assert_eq!(kicked.room, room_id);
    assert_eq!(kicked.content, "You have been kicked from room 'proj'");

    alice
        .recv_until(|m| m.content == "bob has been kicked from the room")
        .await;
}

// File transfer relay: init frame, both chunks, then exactly one
// FILE_COMPLETE on each side and the transfer record gone.
#[tokio::test]
async fn file_transfer_relay_and_completion() {
    let (server, addr) = start_server().await;

    let mut alice = TestClient::register(addr, "alice").await;
    let mut bob = TestClient::register(addr, "bob").await;

    alice
        .send_json(
            r#"{"type":"FILE","recipient":"bob","file_id":"f1","filename":"a.bin","filesize":16384,"total_chunks":2}"#,
        )
        .await;
    let init = bob.recv_until(|m| m.kind == MessageType::File).await;
    assert_eq!(init.file_id, "f1");
    assert_eq!(init.filename, "a.bin");
    assert_eq!(init.sender, "alice");

    use base64::Engine as _;
    let chunk = base64::engine::general_purpose::STANDARD.encode(vec![0xabu8; 8192]);
    for chunk_num in [0u32, 1] {
        alice
            .send_json(&format!(
                r#"{{"type":"FILE_CHUNK","file_id":"f1","chunk_num":{},"total_chunks":2,"data":"{}"}}"#,
                chunk_num, chunk
            ))
            .await;
        let got = bob.recv_until(|m| m.kind == MessageType::FileChunk).await;
        assert_eq!(got.chunk_num, chunk_num);
        assert_eq!(got.data.len(), 8192);
    }

    let done = bob
        .recv_until(|m| m.kind == MessageType::FileComplete)
        .await;
    assert_eq!(done.file_id, "f1");
    alice
        .recv_until(|m| m.kind == MessageType::FileComplete)
        .await;

    // A subsequent lookup of the transfer must fail
    assert!(server.transfer("f1").await.is_none());
}

// Every connected client hears the shutdown notice
// before its socket closes.
#[tokio::test]
async fn shutdown_announces_then_closes() {
    let (server, addr) = start_server().await;

    let mut clients = Vec::new();
    for nickname in ["alice", "bob", "carol"] {
        clients.push(TestClient::register(addr, nickname).await);
    }

    let shutdown = tokio::spawn(async move { server.shutdown().await });

    for client in &mut clients {
        client
            .recv_until(|m| m.content == "Server is shutting down")
            .await;
        client.expect_closed().await;
    }

    timeout(Duration::from_secs(10), shutdown)
        .await
        .expect("shutdown did not finish in time")
        .unwrap();
}

// Oversize and malformed frames are skipped, not fatal.
#[tokio::test]
async fn bad_frames_do_not_kill_the_session() {
    let (_server, addr) = start_server().await;

    let mut alice = TestClient::register(addr, "alice").await;

    alice.send_json("this is not json").await;
    let huge = format!(
        r#"{{"type":"TEXT","recipient":"*","content":"{}"}}"#,
        "x".repeat(1024 * 1024 + 1)
    );
    alice.send_json(&huge).await;

    // The session is still alive and routing
    alice
        .send_json(r#"{"type":"TEXT","recipient":"alice","content":"still here"}"#)
        .await;
    alice.recv_until(|m| m.content == "still here").await;
}

// Messages sent before registration draw an ERROR, not a disconnect.
#[tokio::test]
async fn text_before_connect_is_refused() {
    let (_server, addr) = start_server().await;

    let mut client = TestClient::connect(addr).await;
    client
        .send_json(r#"{"type":"TEXT","recipient":"*","content":"hello?"}"#)
        .await;
    let err = client.recv().await;
    assert_eq!(err.kind, MessageType::Error);
    assert_eq!(
        err.error,
        "you must register a nickname before sending messages"
    );

    // The socket is still open for a proper CONNECT
    client
        .send_json(r#"{"type":"CONNECT","content":"dave"}"#)
        .await;
    let ack = client.recv().await;
    assert_eq!(ack.content, "Connected successfully");
}
