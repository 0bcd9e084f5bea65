use crate::ConvertError;

/// Encode a task id as a big-endian sled key.
///
/// Big-endian keeps sled's iteration order aligned with numeric order.
pub fn task_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decode a big-endian sled key back into a task id.
pub fn task_id_from_key(key: &[u8]) -> std::result::Result<u64, ConvertError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| ConvertError::InvalidLength(key.len()))?;
    Ok(u64::from_be_bytes(bytes))
}
