//! Input validation for client-supplied names, bodies, and file metadata
//!
//! All checks are pure and deterministic; each returns the human-readable
//! reason that goes back to the client in an ERROR frame.

use crate::error::{ChatError, Result};

pub const MIN_NICKNAME_LENGTH: usize = 3;
pub const MAX_NICKNAME_LENGTH: usize = 20;
pub const MIN_ROOM_NAME_LENGTH: usize = 3;
pub const MAX_ROOM_NAME_LENGTH: usize = 30;
pub const MAX_MESSAGE_SIZE: usize = 4096;
pub const MAX_FILENAME_LENGTH: usize = 255;
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Validate a nickname: 3-20 characters from `[A-Za-z0-9_-]`.
pub fn validate_nickname(nickname: &str) -> Result<()> {
    if nickname.len() < MIN_NICKNAME_LENGTH {
        return Err(ChatError::validation(format!(
            "nickname must be at least {} characters long",
            MIN_NICKNAME_LENGTH
        )));
    }
    if nickname.len() > MAX_NICKNAME_LENGTH {
        return Err(ChatError::validation(format!(
            "nickname cannot exceed {} characters",
            MAX_NICKNAME_LENGTH
        )));
    }
    if !nickname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ChatError::validation(
            "nickname can only contain letters, numbers, underscores, and hyphens",
        ));
    }
    Ok(())
}

/// Validate a room name and return it with surrounding whitespace trimmed:
/// 3-30 characters from `[A-Za-z0-9_\- ]`.
pub fn validate_room_name(room_name: &str) -> Result<&str> {
    let room_name = room_name.trim();

    if room_name.len() < MIN_ROOM_NAME_LENGTH {
        return Err(ChatError::validation(format!(
            "room name must be at least {} characters long",
            MIN_ROOM_NAME_LENGTH
        )));
    }
    if room_name.len() > MAX_ROOM_NAME_LENGTH {
        return Err(ChatError::validation(format!(
            "room name cannot exceed {} characters",
            MAX_ROOM_NAME_LENGTH
        )));
    }
    if !room_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ')
    {
        return Err(ChatError::validation(
            "room name can only contain letters, numbers, underscores, hyphens, and spaces",
        ));
    }
    Ok(room_name)
}

/// Validate a message body: non-empty, at most 4096 bytes.
pub fn validate_message(content: &str) -> Result<()> {
    if content.is_empty() {
        return Err(ChatError::validation("message cannot be empty"));
    }
    if content.len() > MAX_MESSAGE_SIZE {
        return Err(ChatError::validation(format!(
            "message cannot exceed {} characters",
            MAX_MESSAGE_SIZE
        )));
    }
    Ok(())
}

/// Validate a filename: non-empty, at most 255 bytes, no path separators,
/// no parent-directory references, no leading dot.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        return Err(ChatError::validation("filename cannot be empty"));
    }
    if filename.len() > MAX_FILENAME_LENGTH {
        return Err(ChatError::validation(format!(
            "filename cannot exceed {} characters",
            MAX_FILENAME_LENGTH
        )));
    }
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(ChatError::validation(
            "filename cannot contain path separators or parent directory references",
        ));
    }
    if filename.starts_with('.') {
        return Err(ChatError::validation("hidden files are not allowed"));
    }
    Ok(())
}

/// Validate a file size: positive, at most 100 MiB.
pub fn validate_file_size(size: u64) -> Result<()> {
    if size == 0 {
        return Err(ChatError::validation("file size must be positive"));
    }
    if size > MAX_FILE_SIZE {
        return Err(ChatError::validation(format!(
            "file size cannot exceed {} bytes",
            MAX_FILE_SIZE
        )));
    }
    Ok(())
}
