use crate::error::VectorStoreError;

const MAX_COLLECTION_NAME_LEN: usize = 64;

/// Collection names map to Qdrant collections and PostgreSQL table suffixes,
/// so only `[A-Za-z0-9_-]{1,64}` is accepted.
pub fn validate_collection_name(name: &str) -> Result<(), VectorStoreError> {
    if name.is_empty() || name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(VectorStoreError::InvalidCollection(format!(
            "'{name}' must be 1-{MAX_COLLECTION_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(VectorStoreError::InvalidCollection(format!(
            "'{name}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}
