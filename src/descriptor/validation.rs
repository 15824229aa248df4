use super::CharacterDescriptor;
use crate::wire::MAX_STRING_LEN;
use std::fmt;

/// Longest accepted companion name, in bytes
pub const MAX_NAME_LEN: usize = 256;

/// Longest accepted value for any other descriptor field, in bytes.
///
/// Matches the wire string limit so every valid descriptor can be broadcast.
pub const MAX_FIELD_LEN: usize = MAX_STRING_LEN;

/// Validation errors for CharacterDescriptor
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorError {
    EmptyName,
    NameTooLong(usize),
    /// `field` is `len` bytes (for `extra`, its JSON encoding)
    FieldTooLong { field: &'static str, len: usize },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::EmptyName => write!(f, "descriptor name is required"),
            DescriptorError::NameTooLong(len) => {
                write!(f, "descriptor name is {} bytes, limit is {}", len, MAX_NAME_LEN)
            }
            DescriptorError::FieldTooLong { field, len } => {
                write!(f, "descriptor {} is {} bytes, limit is {}", field, len, MAX_FIELD_LEN)
            }
        }
    }
}

impl std::error::Error for DescriptorError {}

/// Validates a descriptor before it is bound to an agent.
///
/// Rules:
/// - `name` must contain at least one non-whitespace character
/// - `name` must fit in [`MAX_NAME_LEN`] bytes
/// - `short_name`, `description`, `skin_url` and the JSON encoding of
///   `extra` must each fit in [`MAX_FIELD_LEN`] bytes
///
/// Field contents are otherwise opaque and never inspected.
pub fn validate(descriptor: &CharacterDescriptor) -> Result<(), DescriptorError> {
    if descriptor.name.trim().is_empty() {
        return Err(DescriptorError::EmptyName);
    }

    if descriptor.name.len() > MAX_NAME_LEN {
        return Err(DescriptorError::NameTooLong(descriptor.name.len()));
    }

    check_field("short_name", descriptor.short_name.len())?;
    check_field("description", descriptor.description.len())?;
    check_field("skin_url", descriptor.skin_url.len())?;

    // A map of plain JSON values always serializes
    let extra_len = serde_json::to_string(&descriptor.extra).map_or(0, |json| json.len());
    check_field("extra", extra_len)?;

    Ok(())
}

fn check_field(field: &'static str, len: usize) -> Result<(), DescriptorError> {
    if len > MAX_FIELD_LEN {
        return Err(DescriptorError::FieldTooLong { field, len });
    }
    Ok(())
}
