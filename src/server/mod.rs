//! Server-side components: orchestrator, sessions, registries, and sweeps

pub mod chat_server;
pub mod cleanup;
pub mod connection_handler;
pub mod rate_limiter;
pub mod room_manager;
pub mod transfer_manager;
pub mod validator;

pub use chat_server::ChatServer;
pub use connection_handler::Session;
pub use rate_limiter::RateLimiter;
pub use room_manager::{Room, RoomManager};
pub use transfer_manager::{FileTransfer, TransferManager};
