//! Overlay capability traits.
//!
//! The relay never speaks to peers itself -- it consumes the transport as
//! a small capability set and is driven back through [`RelayHooks`].
//! Tests substitute a fake overlay; production injects the real one.

use std::sync::Arc;

use crate::envelope::{bloom_from_topic, Envelope, Topic};
use crate::{PeerId, BLOOM_FILTER_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("request decryption failed: {0}")]
    Decrypt(String),
    #[error("unknown symmetric key: {0}")]
    UnknownKey(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("peer send failed: {0}")]
    Send(String),
}

/// Callbacks the overlay drives into the relay: every observed envelope is
/// archived, and p2p request envelopes are handed to `deliver_mail`.
pub trait RelayHooks: Send + Sync {
    fn archive(&self, env: &Envelope);
    fn deliver_mail(&self, peer: &PeerId, request: &Envelope);
}

/// The capability set the relay requires from the overlay transport.
pub trait Overlay: Send + Sync {
    /// Install `server` as the recipient of archive and request callbacks.
    fn register_server(&self, server: Arc<dyn RelayHooks>);

    /// Derive a symmetric key from `password`; returns an opaque key id.
    fn add_sym_key_from_password(&self, password: &str) -> Result<String, OverlayError>;

    /// Validate and decrypt a request envelope with a previously derived key.
    fn decrypt_request(&self, key_id: &str, request: &Envelope) -> Result<Vec<u8>, OverlayError>;

    /// Deliver an envelope to a specific peer, bypassing gossip.
    fn send_p2p_direct(&self, peer: &PeerId, env: &Envelope) -> Result<(), OverlayError>;

    /// Fingerprint function for topics. The canonical algorithm lives in
    /// this crate; overlays normally keep the default.
    fn bloom_from_topic(&self, topic: &Topic) -> [u8; BLOOM_FILTER_SIZE] {
        bloom_from_topic(topic)
    }

    /// Publish the floor for proof-of-work accepted from the overlay.
    fn set_minimum_pow(&self, pow: f64) -> Result<(), OverlayError>;
}
