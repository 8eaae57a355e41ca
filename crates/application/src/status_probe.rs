use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::status::entity::{PeerStatus, parse_dump};
use ports::secondary::tunnel_daemon_port::TunnelDaemonPort;

/// Read-only view of which peers are currently connected.
///
/// Never fails: an unreachable daemon, missing privilege or a timeout all
/// yield an empty map, and callers treat a missing key as "unknown".
pub struct StatusProbe {
    daemon: Arc<dyn TunnelDaemonPort>,
    timeout: Duration,
}

impl StatusProbe {
    pub fn new(daemon: Arc<dyn TunnelDaemonPort>, timeout: Duration) -> Self {
        Self { daemon, timeout }
    }

    /// Status of every peer the daemon reports, keyed by public key.
    pub async fn peer_statuses(&self) -> HashMap<String, PeerStatus> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.peer_statuses_at(now).await
    }

    pub async fn peer_statuses_at(&self, now: u64) -> HashMap<String, PeerStatus> {
        match tokio::time::timeout(self.timeout, self.daemon.dump()).await {
            Ok(Ok(dump)) => parse_dump(&dump, now),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "peer status unavailable");
                HashMap::new()
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.timeout, "peer status query timed out");
                HashMap::new()
            }
        }
    }
}

/// Status for `public_key`, or [`PeerStatus::unknown`] when absent.
pub fn status_of(statuses: &HashMap<String, PeerStatus>, public_key: &str) -> PeerStatus {
    statuses
        .get(public_key)
        .copied()
        .unwrap_or_else(PeerStatus::unknown)
}
