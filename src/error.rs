//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
///
/// The `message()` text is what goes on the wire inside an ERROR frame; the
/// `Display` form carries the category and is used for logging.
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Invalid nickname, room name, message body, filename, or file size
    Validation(String),
    /// A rate budget was exhausted
    RateLimit(String),
    /// Unknown recipient, room, or file transfer
    NotFound(String),
    /// Nickname already taken
    Duplicate(String),
    /// Action not permitted for this sender
    Unauthorized(String),
    /// A tracked resource went stale
    Timeout(String),
    /// Encode/decode failure or other internal fault
    Internal(String),
    /// Socket-level failure
    Network(String),
}

impl ChatError {
    /// Get the human-readable message without the category prefix
    pub fn message(&self) -> &str {
        match self {
            ChatError::Validation(msg) => msg,
            ChatError::RateLimit(msg) => msg,
            ChatError::NotFound(msg) => msg,
            ChatError::Duplicate(msg) => msg,
            ChatError::Unauthorized(msg) => msg,
            ChatError::Timeout(msg) => msg,
            ChatError::Internal(msg) => msg,
            ChatError::Network(msg) => msg,
        }
    }

    /// Create a validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        ChatError::Validation(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limit<T: Into<String>>(msg: T) -> Self {
        ChatError::RateLimit(msg.into())
    }

    /// Create a not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::NotFound(msg.into())
    }

    /// Create a duplicate error
    pub fn duplicate<T: Into<String>>(msg: T) -> Self {
        ChatError::Duplicate(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        ChatError::Unauthorized(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ChatError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ChatError::RateLimit(msg) => write!(f, "Rate limit exceeded: {}", msg),
            ChatError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ChatError::Duplicate(msg) => write!(f, "Duplicate: {}", msg),
            ChatError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ChatError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Internal(format!("JSON error: {}", err))
    }
}
