//! Rate limiting: connection admission, message rate, room and transfer budgets
//!
//! The four budgets live behind four independent locks so that checks on one
//! budget never contend with another. Every failed check returns the
//! human-readable reason the caller puts into an ERROR frame; only connection
//! admission closes the socket.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ChatError, Result};

pub const MAX_CONNECTIONS: usize = 100;
pub const MAX_CONNECTIONS_PER_IP: usize = 5;
pub const MESSAGES_PER_SECOND: u32 = 10;
pub const ROOMS_PER_USER: usize = 5;
pub const FILE_TRANSFERS_PER_USER: usize = 3;

/// How long a per-nickname message-rate entry may sit idle before the sweep
/// evicts it
pub const RATE_ENTRY_IDLE: Duration = Duration::from_secs(5 * 60);

/// Interval between idle-entry sweeps
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct ConnectionCounts {
    total: usize,
    by_ip: HashMap<IpAddr, usize>,
}

struct MessageWindow {
    messages: u32,
    last_reset: Instant,
}

/// Process-wide rate limiter
pub struct RateLimiter {
    connections: Mutex<ConnectionCounts>,
    message_rates: Mutex<HashMap<String, MessageWindow>>,
    rooms_per_user: Mutex<HashMap<String, usize>>,
    transfers_per_user: Mutex<HashMap<String, usize>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(ConnectionCounts::default()),
            message_rates: Mutex::new(HashMap::new()),
            rooms_per_user: Mutex::new(HashMap::new()),
            transfers_per_user: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a new connection, counting it if allowed.
    ///
    /// The check and the increment happen under one lock, so two racing
    /// accepts cannot both squeeze into the last slot.
    pub async fn try_add_connection(&self, ip: IpAddr) -> Result<()> {
        let mut counts = self.connections.lock().await;

        if counts.total >= MAX_CONNECTIONS {
            return Err(ChatError::rate_limit(format!(
                "server has reached maximum connection limit ({})",
                MAX_CONNECTIONS
            )));
        }

        let per_ip = counts.by_ip.entry(ip).or_insert(0);
        if *per_ip >= MAX_CONNECTIONS_PER_IP {
            return Err(ChatError::rate_limit(format!(
                "IP {} has reached maximum connection limit ({})",
                ip, MAX_CONNECTIONS_PER_IP
            )));
        }

        *per_ip += 1;
        counts.total += 1;
        Ok(())
    }

    /// Release a connection slot
    pub async fn remove_connection(&self, ip: IpAddr) {
        let mut counts = self.connections.lock().await;
        counts.total = counts.total.saturating_sub(1);
        if let Some(count) = counts.by_ip.get_mut(&ip) {
            if *count <= 1 {
                counts.by_ip.remove(&ip);
            } else {
                *count -= 1;
            }
        }
    }

    /// Check the per-nickname message budget, counting the message if allowed.
    ///
    /// The window resets lazily once a full second has elapsed since the
    /// last reset.
    pub async fn can_send_message(&self, nickname: &str) -> Result<()> {
        let mut rates = self.message_rates.lock().await;
        let window = rates.entry(nickname.to_string()).or_insert(MessageWindow {
            messages: 0,
            last_reset: Instant::now(),
        });

        if window.last_reset.elapsed() >= Duration::from_secs(1) {
            window.messages = 0;
            window.last_reset = Instant::now();
        }

        if window.messages >= MESSAGES_PER_SECOND {
            return Err(ChatError::rate_limit(format!(
                "message rate limit exceeded ({} messages per second)",
                MESSAGES_PER_SECOND
            )));
        }

        window.messages += 1;
        Ok(())
    }

    /// Check the per-nickname owned-room budget
    pub async fn can_create_room(&self, nickname: &str) -> Result<()> {
        let rooms = self.rooms_per_user.lock().await;
        if rooms.get(nickname).copied().unwrap_or(0) >= ROOMS_PER_USER {
            return Err(ChatError::rate_limit(format!(
                "room creation limit exceeded ({} rooms per user)",
                ROOMS_PER_USER
            )));
        }
        Ok(())
    }

    /// Count a newly created room against its creator
    pub async fn add_room(&self, nickname: &str) {
        let mut rooms = self.rooms_per_user.lock().await;
        *rooms.entry(nickname.to_string()).or_insert(0) += 1;
    }

    /// Release one owned-room slot (creator left or deleted the room)
    pub async fn remove_room(&self, nickname: &str) {
        let mut rooms = self.rooms_per_user.lock().await;
        if let Some(count) = rooms.get_mut(nickname) {
            if *count <= 1 {
                rooms.remove(nickname);
            } else {
                *count -= 1;
            }
        }
    }

    /// Check the per-nickname concurrent-transfer budget
    pub async fn can_start_transfer(&self, nickname: &str) -> Result<()> {
        let transfers = self.transfers_per_user.lock().await;
        if transfers.get(nickname).copied().unwrap_or(0) >= FILE_TRANSFERS_PER_USER {
            return Err(ChatError::rate_limit(format!(
                "file transfer limit exceeded ({} concurrent transfers per user)",
                FILE_TRANSFERS_PER_USER
            )));
        }
        Ok(())
    }

    /// Count a newly initiated transfer against its sender
    pub async fn add_transfer(&self, nickname: &str) {
        let mut transfers = self.transfers_per_user.lock().await;
        *transfers.entry(nickname.to_string()).or_insert(0) += 1;
    }

    /// Release one transfer slot (completion, timeout cleanup, or disconnect)
    pub async fn remove_transfer(&self, nickname: &str) {
        let mut transfers = self.transfers_per_user.lock().await;
        if let Some(count) = transfers.get_mut(nickname) {
            if *count <= 1 {
                transfers.remove(nickname);
            } else {
                *count -= 1;
            }
        }
    }

    /// Drop every budget entry for a nickname (disconnect cleanup)
    pub async fn remove_user(&self, nickname: &str) {
        self.message_rates.lock().await.remove(nickname);
        self.rooms_per_user.lock().await.remove(nickname);
        self.transfers_per_user.lock().await.remove(nickname);
    }

    /// Evict message-rate entries idle for longer than [`RATE_ENTRY_IDLE`]
    pub async fn sweep_idle(&self) {
        let mut rates = self.message_rates.lock().await;
        rates.retain(|_, window| window.last_reset.elapsed() <= RATE_ENTRY_IDLE);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
