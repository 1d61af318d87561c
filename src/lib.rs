//! Palaver - Multi-User TCP Chat Server
//!
//! A chat server speaking newline-delimited JSON over plain TCP. Clients
//! register a nickname on a persistent connection and then broadcast,
//! message each other privately, run invitation-only rooms, change presence
//! status, and relay files chunk-by-chunk through the server.
//!
//! ## Architecture
//!
//! - **Accept loop**: admission-checks each socket against the connection
//!   budgets, then spawns a session.
//! - **Session** (two tasks per connection): a read loop that frames,
//!   decodes, stamps, and dispatches, and a write loop that drains a bounded
//!   outbound queue and emits keep-alives.
//! - **Registries**: nickname -> session, room id -> room, file id ->
//!   transfer, each behind its own fine-grained lock.
//! - **Cleanup**: a periodic task sweeps stale file transfers and
//!   long-abandoned empty rooms.
//! - **Shutdown**: SIGINT/SIGTERM triggers an announcement, a bounded drain,
//!   and a clean exit.
//!
//! ## Example
//!
//! ```rust,ignore
//! use palaver::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ChatServer::new(ServerConfig::default());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use error::{ChatError, Result};
pub use protocol::{Message, MessageType, RoomAction, UserStatus};
pub use server::{ChatServer, Session};
