//! Mail request payload -- the 72-byte plaintext a peer sends to ask for
//! archived envelopes.
//!
//! Layout: `[lower:be-u32 | upper:be-u32 | bloom:64]`. Bounds are seconds
//! since epoch; the bloom masks topics. Validation enforces ordering and
//! the one-day window cap.

use crate::envelope::full_node_bloom;
use crate::{BLOOM_FILTER_SIZE, MAX_REQUEST_RANGE_SECS, REQUEST_PAYLOAD_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("invalid payload size: {0} bytes (expected 72)")]
    InvalidSize(usize),
    #[error("invalid bounds: lower {lower} > upper {upper}")]
    BoundsOutOfOrder { lower: u32, upper: u32 },
    #[error("window too wide: {span}s (max 86400s)")]
    WindowTooWide { span: u32 },
    #[error("Undersized p2p request")]
    UndersizedRequest,
    #[error("Undersized bloom filter in p2p request")]
    UndersizedBloom,
}

/// A validated request for a time-bounded, topic-filtered archive slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRequest {
    pub lower: u32,
    pub upper: u32,
    pub bloom: [u8; BLOOM_FILTER_SIZE],
}

impl MailRequest {
    pub fn new(lower: u32, upper: u32, bloom: [u8; BLOOM_FILTER_SIZE]) -> Self {
        Self { lower, upper, bloom }
    }

    /// Parse and validate a decrypted request payload.
    ///
    /// Accepts iff the payload is exactly 72 bytes, `lower <= upper`, and
    /// the window spans at most one day. The signer of the carrying
    /// envelope is deliberately not consulted; knowing the symmetric
    /// password is the only gate.
    pub fn parse(payload: &[u8]) -> Result<Self, RequestError> {
        if payload.len() != REQUEST_PAYLOAD_SIZE {
            return Err(RequestError::InvalidSize(payload.len()));
        }

        let lower = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let upper = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

        if lower > upper {
            return Err(RequestError::BoundsOutOfOrder { lower, upper });
        }
        if upper - lower > MAX_REQUEST_RANGE_SECS {
            return Err(RequestError::WindowTooWide { span: upper - lower });
        }

        let mut bloom = [0u8; BLOOM_FILTER_SIZE];
        bloom.copy_from_slice(&payload[8..REQUEST_PAYLOAD_SIZE]);
        Ok(Self { lower, upper, bloom })
    }

    /// Encode to the 72-byte wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(REQUEST_PAYLOAD_SIZE);
        out.extend_from_slice(&self.lower.to_be_bytes());
        out.extend_from_slice(&self.upper.to_be_bytes());
        out.extend_from_slice(&self.bloom);
        out
    }
}

/// Extract the bloom mask from a raw request payload.
///
/// A bare 8-byte `[lower|upper]` payload carries no bloom and means
/// "all topics" -- the full-node bloom is returned for it.
pub fn bloom_from_received_message(
    payload: &[u8],
) -> Result<[u8; BLOOM_FILTER_SIZE], RequestError> {
    if payload.len() < 8 {
        return Err(RequestError::UndersizedRequest);
    }
    if payload.len() == 8 {
        return Ok(full_node_bloom());
    }
    if payload.len() < REQUEST_PAYLOAD_SIZE {
        return Err(RequestError::UndersizedBloom);
    }
    let mut bloom = [0u8; BLOOM_FILTER_SIZE];
    bloom.copy_from_slice(&payload[8..REQUEST_PAYLOAD_SIZE]);
    Ok(bloom)
}
