use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("value is too short (min {min}, got {got})")]
    TooShort { min: usize, got: usize },
    #[error("value is too long (max {max}, got {got})")]
    TooLong { max: usize, got: usize },
}

/// Maximum accepted length of a chat message body, in bytes.
pub const MAX_MESSAGE_CONTENT_LEN: usize = 2000;

/// Maximum accepted length of a post comment, in bytes.
pub const MAX_COMMENT_CONTENT_LEN: usize = 1000;

/// Message bodies may be empty (an attachment-only message is valid); only
/// the upper bound is enforced here.
pub fn validate_message_content(content: &str) -> Result<(), ValidationError> {
    let len = content.len();
    if len > MAX_MESSAGE_CONTENT_LEN {
        return Err(ValidationError::TooLong {
            max: MAX_MESSAGE_CONTENT_LEN,
            got: len,
        });
    }
    Ok(())
}

pub fn validate_comment_content(content: &str) -> Result<(), ValidationError> {
    let len = content.len();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > MAX_COMMENT_CONTENT_LEN {
        return Err(ValidationError::TooLong {
            max: MAX_COMMENT_CONTENT_LEN,
            got: len,
        });
    }
    Ok(())
}
