//! Room management: membership, invitations, topics, and room lifecycle

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::id;

struct RoomState {
    members: HashSet<String>,
    invitations: HashSet<String>,
    description: String,
}

/// A private chat room
///
/// The registry lock and each room's internal lock are separate; callers
/// snapshot what they need under the room lock and release it before any
/// fan-out.
pub struct Room {
    /// Server-minted id, `room_<unix-nanos>_<16 hex>`
    pub id: String,
    pub name: String,
    /// Nickname of the creator; the only user allowed to kick or delete
    pub creator: String,
    pub created_at: Instant,
    state: RwLock<RoomState>,
}

impl Room {
    fn new(name: String, creator: String) -> Self {
        let mut members = HashSet::new();
        members.insert(creator.clone());
        Self {
            id: id::generate("room"),
            name,
            creator,
            created_at: Instant::now(),
            state: RwLock::new(RoomState {
                members,
                invitations: HashSet::new(),
                description: String::new(),
            }),
        }
    }

    /// Add a member, consuming any pending invitation for that nickname
    pub async fn add_member(&self, nickname: &str) {
        let mut state = self.state.write().await;
        state.members.insert(nickname.to_string());
        state.invitations.remove(nickname);
    }

    pub async fn remove_member(&self, nickname: &str) {
        let mut state = self.state.write().await;
        state.members.remove(nickname);
    }

    pub async fn is_member(&self, nickname: &str) -> bool {
        self.state.read().await.members.contains(nickname)
    }

    pub async fn member_count(&self) -> usize {
        self.state.read().await.members.len()
    }

    /// Snapshot of the member nicknames
    pub async fn members(&self) -> Vec<String> {
        self.state.read().await.members.iter().cloned().collect()
    }

    pub async fn invite(&self, nickname: &str) {
        let mut state = self.state.write().await;
        state.invitations.insert(nickname.to_string());
    }

    pub async fn is_invited(&self, nickname: &str) -> bool {
        self.state.read().await.invitations.contains(nickname)
    }

    /// Drop a pending invitation (decline path)
    pub async fn revoke_invite(&self, nickname: &str) {
        let mut state = self.state.write().await;
        state.invitations.remove(nickname);
    }

    pub async fn set_description(&self, description: &str) {
        let mut state = self.state.write().await;
        state.description = description.to_string();
    }

    pub async fn description(&self) -> String {
        self.state.read().await.description.clone()
    }
}

/// Registry of all rooms, keyed by room id
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Create a room with the creator as its sole member
    pub async fn create(&self, name: &str, creator: &str) -> Arc<Room> {
        let room = Arc::new(Room::new(name.to_string(), creator.to_string()));
        let mut rooms = self.rooms.write().await;
        rooms.insert(room.id.clone(), Arc::clone(&room));
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn remove(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.write().await.remove(room_id)
    }

    /// All rooms the nickname is currently a member of
    pub async fn list_for(&self, nickname: &str) -> Vec<Arc<Room>> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut member_of = Vec::new();
        for room in rooms {
            if room.is_member(nickname).await {
                member_of.push(room);
            }
        }
        member_of
    }

    /// Rooms that have sat empty since before `cutoff`; removed from the
    /// registry and returned
    pub async fn remove_empty_since(&self, cutoff: Instant) -> Vec<Arc<Room>> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut stale = Vec::new();
        for room in rooms {
            if room.member_count().await == 0 && room.created_at <= cutoff {
                stale.push(room);
            }
        }

        let mut registry = self.rooms.write().await;
        for room in &stale {
            registry.remove(&room.id);
        }
        stale
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
