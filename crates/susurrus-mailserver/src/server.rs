//! The mail server: archive every envelope the overlay observes, replay a
//! time-bounded, topic-filtered slice on request.
//!
//! The overlay drives this type through [`RelayHooks`]; outbound traffic
//! goes back through the injected [`Overlay`] capability set. Runtime
//! errors never propagate out of the callbacks -- the relay stays
//! serviceable after transient failures.

use std::path::Path;
use std::sync::Arc;

use susurrus_protocol::{
    bloom_filter_match, bloom_from_topic, Envelope, MailRequest, Overlay, OverlayError, PeerId,
    RelayHooks,
};
use susurrus_store::{ArchiveKey, ArchiveStore, SledArchive, StoreError};

use crate::config::MailServerSection;
use crate::rate_limit::RateLimiter;

#[derive(Debug, thiserror::Error)]
pub enum MailServerError {
    #[error("directory not provided")]
    DirectoryNotProvided,
    #[error("password not provided")]
    PasswordNotProvided,
    #[error("open DB: {0}")]
    OpenDb(StoreError),
    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),
}

/// Offline-message relay for one overlay node.
pub struct MailServer {
    db: Arc<dyn ArchiveStore>,
    overlay: Arc<dyn Overlay>,
    key_id: String,
    limiter: Option<RateLimiter>,
    minimum_pow: f64,
}

impl std::fmt::Debug for MailServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailServer")
            .field("key_id", &self.key_id)
            .field("minimum_pow", &self.minimum_pow)
            .finish_non_exhaustive()
    }
}

impl MailServer {
    /// Validate the config, open the archive, derive the symmetric request
    /// key, and start the rate limiter if one is configured.
    ///
    /// Must be called from within a tokio runtime (the limiter janitor is
    /// spawned here).
    pub fn init(
        overlay: Arc<dyn Overlay>,
        config: &MailServerSection,
    ) -> Result<Self, MailServerError> {
        if config.data_dir.is_empty() {
            return Err(MailServerError::DirectoryNotProvided);
        }
        if config.password.is_empty() {
            return Err(MailServerError::PasswordNotProvided);
        }

        let db = SledArchive::open(Path::new(&config.data_dir)).map_err(MailServerError::OpenDb)?;
        let key_id = overlay.add_sym_key_from_password(&config.password)?;
        let limiter = config.rate_limit().map(RateLimiter::new);
        overlay.set_minimum_pow(config.minimum_pow)?;

        tracing::info!(
            data_dir = config.data_dir.as_str(),
            rate_limited = limiter.is_some(),
            minimum_pow = config.minimum_pow,
            "mail server ready"
        );

        Ok(Self {
            db: Arc::new(db),
            overlay,
            key_id,
            limiter,
            minimum_pow: config.minimum_pow,
        })
    }

    /// Stop the janitor and flush the archive. Safe to call repeatedly.
    pub fn close(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.stop();
        }
        if let Err(e) = self.db.flush() {
            tracing::error!("flushing archive on close: {e}");
        }
    }

    /// Whether a rate limiter is installed.
    pub fn limiter_active(&self) -> bool {
        self.limiter.is_some()
    }

    /// Handle to the underlying archive.
    pub fn archive_store(&self) -> Arc<dyn ArchiveStore> {
        self.db.clone()
    }

    /// Persist an observed envelope. Best-effort: the overlay's delivery
    /// path must not be failed by storage trouble, so errors are logged
    /// and swallowed.
    pub fn archive(&self, env: &Envelope) {
        let key = ArchiveKey::new(env.birth(), &env.hash());
        match env.to_wire() {
            Ok(bytes) => {
                if let Err(e) = self.db.put(&key, &bytes) {
                    tracing::error!(
                        key = %hex::encode(key.as_bytes()),
                        "archiving envelope failed: {e}"
                    );
                }
            }
            Err(e) => tracing::error!("serializing envelope for archive failed: {e}"),
        }
    }

    /// Handle a p2p mail request from `peer`.
    ///
    /// Malformed, under-powered, unauthenticated, or rate-limited requests
    /// are dropped without signaling the peer. The request envelope's
    /// signer is deliberately not checked -- knowledge of the symmetric
    /// password is the only gate.
    pub fn deliver_mail(&self, peer: &PeerId, request: &Envelope) {
        if self.minimum_pow > 0.0 && request.pow() < self.minimum_pow {
            tracing::debug!(
                peer = %hex::encode(peer),
                pow = request.pow(),
                "request below PoW floor, dropped"
            );
            return;
        }

        let payload = match self.overlay.decrypt_request(&self.key_id, request) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(peer = %hex::encode(peer), "request decryption failed: {e}");
                return;
            }
        };

        if !self.manage_peer_limits(peer) {
            tracing::debug!(peer = %hex::encode(peer), "rate limited, request dropped");
            return;
        }

        let request = match MailRequest::parse(&payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %hex::encode(peer), "malformed mail request: {e}");
                return;
            }
        };

        self.process_request(Some(peer), request.lower, request.upper, &request.bloom);
    }

    /// Admission check against the rate limiter. Registers the peer's
    /// cooldown window on admission; a missing limiter admits everyone.
    pub fn manage_peer_limits(&self, peer: &PeerId) -> bool {
        match &self.limiter {
            None => true,
            Some(limiter) => {
                if limiter.exceeds(peer) {
                    false
                } else {
                    limiter.register(peer);
                    true
                }
            }
        }
    }

    /// Scan `[lower, upper]` and hand every bloom-matched envelope to the
    /// peer, in ascending `(birth, hash)` order.
    ///
    /// With `peer == None` (test path) matches are returned instead of
    /// delivered. A send failure aborts this request only; an undecodable
    /// archived value is skipped.
    pub fn process_request(
        &self,
        peer: Option<&PeerId>,
        lower: u32,
        upper: u32,
        bloom: &[u8],
    ) -> Vec<Envelope> {
        let lo = ArchiveKey::range_start(lower);
        let hi = ArchiveKey::range_end(upper);
        let mut mail = Vec::new();
        let mut delivered = 0usize;

        for entry in self.db.range(&lo, &hi) {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    tracing::error!("archive scan failed: {e}");
                    break;
                }
            };

            let env = match Envelope::from_wire(&value) {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(
                        key = %hex::encode(&key),
                        "undecodable archived envelope, skipping: {e}"
                    );
                    continue;
                }
            };

            if !bloom_filter_match(bloom, &bloom_from_topic(&env.topic)) {
                continue;
            }

            match peer {
                Some(peer) => {
                    if let Err(e) = self.overlay.send_p2p_direct(peer, &env) {
                        tracing::error!(
                            peer = %hex::encode(peer),
                            "direct send failed, aborting request: {e}"
                        );
                        break;
                    }
                    delivered += 1;
                }
                None => mail.push(env),
            }
        }

        if let Some(peer) = peer {
            tracing::debug!(
                peer = %hex::encode(peer),
                delivered,
                lower,
                upper,
                "mail request served"
            );
        }
        mail
    }
}

impl RelayHooks for MailServer {
    fn archive(&self, env: &Envelope) {
        MailServer::archive(self, env);
    }

    fn deliver_mail(&self, peer: &PeerId, request: &Envelope) {
        MailServer::deliver_mail(self, peer, request);
    }
}
