//! Cover image handling
//!
//! Covers are downloaded with the plain client (never through the proxy
//! chain), base64-encoded, and identified by a content hash so the same
//! image fetched twice gets the same id.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use reqwest::header::REFERER;
use sha2::{Digest, Sha256};
use tracing::debug;

/// A downloaded image ready for the `<images>` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    /// Generated identifier, e.g. `3a51…9c.jpeg`
    pub id: String,
    /// base64 payload
    pub data: String,
}

/// Encodes raw image bytes into a [`CoverImage`]
pub fn encode(bytes: &[u8], extension: &str) -> CoverImage {
    let digest = hex::encode(Sha256::digest(bytes));
    CoverImage {
        id: format!("{}.{}", &digest[..32], extension),
        data: STANDARD.encode(bytes),
    }
}

/// Decodes a base64 payload back to raw bytes
pub fn decode(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data).ok()
}

/// Downloads an image; any failure, or an empty body, is `None`
pub fn fetch(client: &Client, url: &str) -> Option<CoverImage> {
    debug!("downloading image {}", url);
    let response = client
        .get(url.trim())
        .header(REFERER, "")
        .send()
        .ok()?;
    if !response.status().is_success() {
        debug!("image at {} does not exist", url.trim());
        return None;
    }
    let bytes = response.bytes().ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(encode(&bytes, "jpeg"))
}
