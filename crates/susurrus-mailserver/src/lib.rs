//! Susurrus MailServer -- offline-message relay for the gossip overlay.
//!
//! Archives every envelope the overlay observes and, on an authenticated
//! peer request, re-emits a time-bounded, topic-filtered slice of the
//! archive back to that peer. Integration tests and embedding hosts reach
//! the internals through these modules.

pub mod config;
pub mod rate_limit;
pub mod server;

pub use config::{MailServerSection, RelayConfig, TimeSourceSection};
pub use rate_limit::RateLimiter;
pub use server::{MailServer, MailServerError};
