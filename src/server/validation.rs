use crate::server::response::ApiError;
use crate::types::MAX_MESSAGE_LEN;

const MAX_CHANNEL_NAME_LEN: usize = 80;
const MAX_USER_NAME_LEN: usize = 64;

pub fn validate_channel_name(name: &str) -> Result<(), ApiError> {
    let bare = name.strip_prefix('#').unwrap_or(name);
    if bare.is_empty() {
        return Err(ApiError::bad_request("Channel name cannot be empty"));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Channel name cannot exceed {MAX_CHANNEL_NAME_LEN} characters"
        )));
    }
    if !bare
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::bad_request(
            "Channel name can only contain alphanumeric characters, hyphens, and underscores",
        ));
    }
    Ok(())
}

pub fn validate_user_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("Name cannot be empty"));
    }
    if name.len() > MAX_USER_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Name cannot exceed {MAX_USER_NAME_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_message_content(content: &str) -> Result<(), ApiError> {
    if content.is_empty() {
        return Err(ApiError::bad_request("Message content cannot be empty"));
    }
    if content.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::bad_request(format!(
            "Message content cannot exceed {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(())
}
