//! Child name validation

use crate::error::StoreError;
use crate::types::MAX_NAME_LEN;

/// Reject names that cannot be a single path component.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(StoreError::NameTooLong(name.len()));
    }
    Ok(())
}
