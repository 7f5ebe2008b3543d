//! Encoding and decoding of state documents

use crate::backend::{BackendError, BackendResult};
use crate::state::StateFile;

/// Decode a stored document. Empty or whitespace-only input means no state.
pub fn decode(bytes: &[u8]) -> BackendResult<Option<StateFile>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(bytes)
        .map(Some)
        .map_err(|e| BackendError::Refresh(format!("Failed to decode state: {}", e)))
}

/// Encode a state for storage
pub fn encode(state: &StateFile) -> BackendResult<Vec<u8>> {
    let mut body = serde_json::to_vec_pretty(state)
        .map_err(|e| BackendError::Write(format!("Failed to encode state: {}", e)))?;
    body.push(b'\n');
    Ok(body)
}
