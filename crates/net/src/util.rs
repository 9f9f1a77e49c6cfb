use reqwest::Response;
use tracing::warn;

use crate::error::{Error, Result};

/// Reads a response body chunk by chunk, refusing to buffer more than
/// `max_size` bytes. The connection is dropped as soon as the cap is hit,
/// so an oversized body never sits in memory.
pub async fn read_body_with_max(mut res: Response, max_size: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = res.chunk().await? {
        if body.len() + chunk.len() > max_size {
            return Err(Error::validation(format!(
                "response body exceeds {max_size} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Checks the advertised Content-Length against the cap before any body
/// bytes are pulled. Unknown length is allowed through with a warning; the
/// chunked reader still enforces the cap on the actual bytes.
pub fn check_content_length(res: &Response, max_size: usize) -> Result<()> {
    match res.content_length() {
        Some(len) if len > max_size as u64 => Err(Error::validation(format!(
            "advertised content-length {len} exceeds {max_size} bytes"
        ))),
        Some(_) => Ok(()),
        None => {
            warn!(url = %res.url(), "response has no content-length, reading under byte cap");
            Ok(())
        }
    }
}
