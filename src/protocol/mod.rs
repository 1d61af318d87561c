//! Wire protocol: message taxonomy and the line codec

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, DecodeError, MAX_FRAME_SIZE};
pub use messages::{Message, MessageType, RoomAction, UserStatus};
