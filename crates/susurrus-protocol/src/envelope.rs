//! Envelope type and the topic bloom fingerprint.
//!
//! An envelope is the overlay's unit of gossip traffic. This crate only
//! cares about the plaintext header fields (expiry, ttl, topic) and the
//! opaque payload bytes; decryption is the overlay's business.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::EnvelopeCodec;
use crate::{ProtocolError, BLOOM_FILTER_SIZE};

/// A fixed 4-byte topic tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic(pub [u8; 4]);

/// An ephemeral, timestamped unit of overlay traffic.
///
/// `expiry` and `ttl` are in seconds; the envelope's birth time is
/// `expiry - ttl`. `data` is the (usually encrypted) payload, carried as
/// base64 on the wire. `nonce` is the proof-of-work counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub expiry: u32,
    pub ttl: u32,
    pub topic: Topic,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub nonce: u64,
}

impl Envelope {
    pub fn new(expiry: u32, ttl: u32, topic: Topic, data: Vec<u8>) -> Self {
        Self {
            expiry,
            ttl,
            topic,
            data,
            nonce: 0,
        }
    }

    /// Earliest instant at which this envelope existed: `expiry - ttl`.
    pub fn birth(&self) -> u32 {
        self.expiry.saturating_sub(self.ttl)
    }

    /// Content identifier: SHA-256 over the canonical field encoding.
    /// Covers the nonce, so sealing changes the hash.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.expiry.to_be_bytes());
        hasher.update(self.ttl.to_be_bytes());
        hasher.update(self.topic.0);
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(&self.data);
        hasher.finalize().into()
    }

    /// Canonical wire bytes: length prefix + JSON, exactly as transmitted.
    pub fn to_wire(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::new();
        codec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Parse an envelope from its canonical wire bytes.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut codec = EnvelopeCodec;
        let mut buf = BytesMut::from(bytes);
        codec.decode(&mut buf)?.ok_or(ProtocolError::TruncatedFrame)
    }

    /// Approximate encoded size, used as the proof-of-work divisor.
    fn size(&self) -> usize {
        4 + 4 + 4 + 8 + self.data.len()
    }

    /// Proof of work: `2^(leading zero bits of hash) / (size * ttl)`.
    pub fn pow(&self) -> f64 {
        let hash = self.hash();
        let mut zeros = 0u32;
        for b in hash {
            if b == 0 {
                zeros += 8;
            } else {
                zeros += b.leading_zeros();
                break;
            }
        }
        let ttl = self.ttl.max(1) as f64;
        2f64.powi(zeros as i32) / (self.size() as f64 * ttl)
    }

    /// Mine the nonce until `pow()` reaches `target`.
    pub fn seal(&mut self, target: f64) {
        while self.pow() < target {
            self.nonce = self.nonce.wrapping_add(1);
        }
    }
}

/// Bloom fingerprint of a topic: 3 bits set out of 512.
///
/// Bit j's index is `topic[j]`, shifted into the upper 256 bits when bit j
/// of `topic[3]` is set.
pub fn bloom_from_topic(topic: &Topic) -> [u8; BLOOM_FILTER_SIZE] {
    let mut bloom = [0u8; BLOOM_FILTER_SIZE];
    for j in 0..3 {
        let mut index = topic.0[j] as usize;
        if topic.0[3] & (1 << j) != 0 {
            index += 256;
        }
        bloom[index / 8] |= 1 << (index % 8);
    }
    bloom
}

/// Subset containment: every bit set in `sample` is also set in `filter`.
pub fn bloom_filter_match(filter: &[u8], sample: &[u8]) -> bool {
    if filter.len() != BLOOM_FILTER_SIZE || sample.len() != BLOOM_FILTER_SIZE {
        return false;
    }
    filter.iter().zip(sample.iter()).all(|(f, s)| f & s == *s)
}

/// The bloom that matches every topic (all bits set).
pub fn full_node_bloom() -> [u8; BLOOM_FILTER_SIZE] {
    [0xFF; BLOOM_FILTER_SIZE]
}

/// Serialize/deserialize Vec<u8> as base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
