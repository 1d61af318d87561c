//! Wire message types for the chat protocol
//!
//! Every frame on the wire is one `Message` serialized as a single JSON
//! object. The record is deliberately flat: FILE and FILE_CHUNK frames are
//! forwarded to the recipient unchanged, and decoding fills omitted fields
//! with their zero values, both of which a per-variant enum would make
//! awkward. Dispatch still gets compiler-checked coverage by matching on
//! [`MessageType`] (and [`RoomAction`] for ROOM frames).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The discriminant of a wire message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    File,
    FileChunk,
    FileComplete,
    Status,
    Room,
    Invite,
    InviteResp,
    UserList,
    Error,
    Connect,
    Disconnect,
    Ack,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Text => "TEXT",
            MessageType::File => "FILE",
            MessageType::FileChunk => "FILE_CHUNK",
            MessageType::FileComplete => "FILE_COMPLETE",
            MessageType::Status => "STATUS",
            MessageType::Room => "ROOM",
            MessageType::Invite => "INVITE",
            MessageType::InviteResp => "INVITE_RESP",
            MessageType::UserList => "USER_LIST",
            MessageType::Error => "ERROR",
            MessageType::Connect => "CONNECT",
            MessageType::Disconnect => "DISCONNECT",
            MessageType::Ack => "ACK",
        };
        f.write_str(name)
    }
}

/// Presence status of a registered user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Busy,
    Invisible,
}

impl Default for UserStatus {
    fn default() -> Self {
        UserStatus::Active
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Busy => "BUSY",
            UserStatus::Invisible => "INVISIBLE",
        };
        f.write_str(name)
    }
}

/// Sub-action of a ROOM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomAction {
    Create,
    Join,
    Leave,
    LeaveConfirm,
    Msg,
    Members,
    Kick,
    Delete,
    Topic,
}

impl fmt::Display for RoomAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomAction::Create => "CREATE",
            RoomAction::Join => "JOIN",
            RoomAction::Leave => "LEAVE",
            RoomAction::LeaveConfirm => "LEAVE_CONFIRM",
            RoomAction::Msg => "MSG",
            RoomAction::Members => "MEMBERS",
            RoomAction::Kick => "KICK",
            RoomAction::Delete => "DELETE",
            RoomAction::Topic => "TOPIC",
        };
        f.write_str(name)
    }
}

/// A message in the chat protocol
///
/// `type`, `sender`, and `timestamp` are always present on the wire; every
/// other field is omitted when it holds its zero value and defaults to that
/// zero value on decode. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub sender: String,
    /// Empty or `"*"` for broadcast, a nickname for private delivery
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipient: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<UserStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RoomAction>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub filesize: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub chunk_num: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default = "unix_epoch")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_zero_u64(n: &u64) -> bool {
    *n == 0
}

fn is_zero_u32(n: &u32) -> bool {
    *n == 0
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Message {
    /// Create an empty message of the given type, stamped with the current time
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            sender: String::new(),
            recipient: String::new(),
            room: String::new(),
            content: String::new(),
            status: None,
            action: None,
            filename: String::new(),
            filesize: 0,
            file_id: String::new(),
            chunk_num: 0,
            total_chunks: 0,
            data: Vec::new(),
            users: Vec::new(),
            timestamp: Utc::now(),
            error: String::new(),
        }
    }

    /// Create a text message addressed to a single recipient
    pub fn text(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            content: content.into(),
            ..Self::new(MessageType::Text)
        }
    }

    /// Create a text message addressed to everyone
    pub fn broadcast(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::text(sender, "*", content)
    }

    /// Create an error message from the server
    pub fn error(recipient: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            sender: "Server".to_string(),
            recipient: recipient.into(),
            error: error.into(),
            ..Self::new(MessageType::Error)
        }
    }

    /// Create a user-list message (`"<nickname>:<STATUS>"` entries)
    pub fn user_list(users: Vec<String>) -> Self {
        Self {
            users,
            ..Self::new(MessageType::UserList)
        }
    }

    /// Create a keep-alive message
    pub fn ack() -> Self {
        Self::new(MessageType::Ack)
    }

    /// Create a ROOM frame with the given action and room id
    pub fn room_action(
        action: RoomAction,
        room: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            action: Some(action),
            room: room.into(),
            content: content.into(),
            ..Self::new(MessageType::Room)
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
