//! Susurrus TimeSource -- consensus wall clock derived from NTP servers.
//!
//! Independently-clocked nodes must agree on envelope expiry and request
//! windows, so the relay keeps `offset = consensus_wall - local_wall` and
//! refreshes it on a two-rate schedule: fast after a failed refresh, slow
//! after a successful one. `now()` never touches the network.
//!
//! The per-server query is injected, so tests drive the aggregation with a
//! response table instead of real NTP traffic.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{broadcast, mpsc};

/// Default NTP server pool.
pub const DEFAULT_NTP_SERVERS: [&str; 4] = [
    "0.pool.ntp.org",
    "1.pool.ntp.org",
    "2.pool.ntp.org",
    "3.pool.ntp.org",
];

/// Default number of queries that may fail per refresh.
pub const DEFAULT_ALLOWED_FAILURES: usize = 2;

/// Default refresh interval after a failed refresh.
pub const DEFAULT_FAST_SYNC_PERIOD: Duration = Duration::from_secs(2 * 60);

/// Default refresh interval after a successful refresh.
pub const DEFAULT_SLOW_SYNC_PERIOD: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum TimeSourceError {
    #[error("update offset failed")]
    UpdateOffset,
    #[error("ntp query failed: {0}")]
    Query(String),
}

/// Future returned by a single NTP query.
pub type QueryFuture = Pin<Box<dyn Future<Output = Result<TimeDelta, TimeSourceError>> + Send>>;

/// Injected per-server query: host -> reported clock offset.
pub type TimeQuery = Arc<dyn Fn(String) -> QueryFuture + Send + Sync>;

/// The production query, backed by the rsntp async client.
pub fn ntp_query() -> TimeQuery {
    Arc::new(|server: String| -> QueryFuture {
        Box::pin(async move {
            let client = rsntp::AsyncSntpClient::new();
            let result = client
                .synchronize(&server)
                .await
                .map_err(|e| TimeSourceError::Query(e.to_string()))?;
            let secs = result.clock_offset().as_secs_f64();
            Ok(TimeDelta::microseconds((secs * 1e6) as i64))
        })
    })
}

/// Query every server in parallel and aggregate the reported offsets.
///
/// Fails when more than `allowed_failures` queries error, or when every
/// query errors regardless of the budget. Otherwise returns the median of
/// the successful offsets; an even count takes the mean of the two middle
/// values, truncated toward zero.
pub async fn compute_offset(
    query: &TimeQuery,
    servers: &[String],
    allowed_failures: usize,
) -> Result<TimeDelta, TimeSourceError> {
    let (tx, mut rx) = mpsc::channel(servers.len().max(1));
    for server in servers {
        let query = query.clone();
        let tx = tx.clone();
        let server = server.clone();
        tokio::spawn(async move {
            let _ = tx.send(query(server).await).await;
        });
    }
    drop(tx);

    let mut offsets = Vec::with_capacity(servers.len());
    let mut failures = 0usize;
    while let Some(result) = rx.recv().await {
        match result {
            Ok(offset) => offsets.push(offset),
            Err(e) => {
                tracing::warn!("ntp query failed: {e}");
                failures += 1;
            }
        }
    }

    if failures > allowed_failures || failures == servers.len() {
        return Err(TimeSourceError::UpdateOffset);
    }

    offsets.sort();
    let mid = offsets.len() / 2;
    if offsets.len() % 2 == 1 {
        Ok(offsets[mid])
    } else {
        let a = offsets[mid - 1].num_nanoseconds().unwrap_or_default();
        let b = offsets[mid].num_nanoseconds().unwrap_or_default();
        Ok(TimeDelta::nanoseconds((a + b) / 2))
    }
}

/// Runtime configuration for [`NtpTimeSource`].
#[derive(Debug, Clone)]
pub struct TimeSourceConfig {
    pub servers: Vec<String>,
    pub allowed_failures: usize,
    pub fast_sync_period: Duration,
    pub slow_sync_period: Duration,
}

impl Default for TimeSourceConfig {
    fn default() -> Self {
        Self {
            servers: DEFAULT_NTP_SERVERS.iter().map(|s| s.to_string()).collect(),
            allowed_failures: DEFAULT_ALLOWED_FAILURES,
            fast_sync_period: DEFAULT_FAST_SYNC_PERIOD,
            slow_sync_period: DEFAULT_SLOW_SYNC_PERIOD,
        }
    }
}

/// Consensus clock: local wall clock plus the last agreed offset.
pub struct NtpTimeSource {
    servers: Vec<String>,
    allowed_failures: usize,
    time_query: TimeQuery,
    fast_sync_period: Duration,
    slow_sync_period: Duration,
    /// Signed offset in nanoseconds; zero until the first successful refresh.
    offset_nanos: AtomicI64,
}

impl NtpTimeSource {
    /// Build with the production NTP query.
    pub fn new(config: TimeSourceConfig) -> Self {
        Self::with_query(config, ntp_query())
    }

    /// Build with an injected query (tests, simulations).
    pub fn with_query(config: TimeSourceConfig, time_query: TimeQuery) -> Self {
        Self {
            servers: config.servers,
            allowed_failures: config.allowed_failures,
            time_query,
            fast_sync_period: config.fast_sync_period,
            slow_sync_period: config.slow_sync_period,
            offset_nanos: AtomicI64::new(0),
        }
    }

    /// Current consensus wall clock. Never blocks on the network.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + TimeDelta::nanoseconds(self.offset_nanos.load(Ordering::Relaxed))
    }

    /// The last agreed offset.
    pub fn offset(&self) -> TimeDelta {
        TimeDelta::nanoseconds(self.offset_nanos.load(Ordering::Relaxed))
    }

    /// Run one refresh. A failure leaves the previous offset intact.
    pub async fn update_offset(&self) -> Result<(), TimeSourceError> {
        let offset = compute_offset(&self.time_query, &self.servers, self.allowed_failures).await?;
        self.offset_nanos
            .store(offset.num_nanoseconds().unwrap_or_default(), Ordering::Relaxed);
        tracing::debug!(offset_ms = offset.num_milliseconds(), "clock offset updated");
        Ok(())
    }
}

/// Run the refresh loop until shutdown.
///
/// After each refresh: wait `fast_sync_period` if it failed, otherwise
/// `slow_sync_period`.
pub async fn run_sync_loop(source: Arc<NtpTimeSource>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let period = match source.update_offset().await {
            Ok(()) => source.slow_sync_period,
            Err(e) => {
                tracing::warn!("clock refresh failed, retrying at fast period: {e}");
                source.fast_sync_period
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.recv() => {
                tracing::info!("timesource shutting down");
                return;
            }
        }
    }
}
