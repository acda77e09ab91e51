//! Receive Loop
//!
//! Accumulates reads from a connected endpoint until a caller-supplied parser
//! recognizes a complete message. Framing is entirely up to the parser.

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::EndpointError;

/// Read `chunk_len` bytes at a time, appending to a buffer, until `parse`
/// returns a value for the accumulated bytes.
///
/// # Returns
///
/// * `Ok(Some(T))` - The parser accepted the buffer
/// * `Ok(None)` - The peer closed the stream (or `chunk_len` is 0) before the
///   parser accepted the buffer
/// * `Err(EndpointError)` - A read failed
pub fn receive_until<T, F>(endpoint: &Endpoint, chunk_len: usize, mut parse: F) -> Result<Option<T>, EndpointError>
where
    F: FnMut(&[u8]) -> Option<T>,
{
    let mut buffer = Vec::new();
    loop {
        let chunk = endpoint.read(chunk_len)?;
        if chunk.is_empty() {
            debug!(buffered = buffer.len(), "stream ended before a complete message");
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk);
        if let Some(message) = parse(&buffer) {
            return Ok(Some(message));
        }
    }
}
