//! Susurrus Protocol -- envelope wire types, topic blooms, mail request codec.
//!
//! Envelopes travel as a 4-byte big-endian length prefix + serde JSON.
//! The decrypted mail request payload is fixed-width binary (72 bytes).

pub mod codec;
pub mod envelope;
pub mod overlay;
pub mod request;

pub use codec::EnvelopeCodec;
pub use envelope::{bloom_filter_match, bloom_from_topic, full_node_bloom, Envelope, Topic};
pub use overlay::{Overlay, OverlayError, RelayHooks};
pub use request::{bloom_from_received_message, MailRequest, RequestError};

/// Bloom fingerprint width in bytes (512 bits).
pub const BLOOM_FILTER_SIZE: usize = 64;

/// Decrypted mail request payload width: two big-endian u32 bounds + bloom.
pub const REQUEST_PAYLOAD_SIZE: usize = 8 + BLOOM_FILTER_SIZE;

/// Widest admissible request window in seconds (one day).
pub const MAX_REQUEST_RANGE_SECS: u32 = 24 * 3600;

/// Maximum framed envelope size: 1 MB.
pub const MAX_ENVELOPE_SIZE: usize = 1024 * 1024;

/// Opaque overlay peer identifier.
pub type PeerId = Vec<u8>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("envelope too large: {size} bytes (max {max})")]
    EnvelopeTooLarge { size: usize, max: usize },
    #[error("truncated envelope frame")]
    TruncatedFrame,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
