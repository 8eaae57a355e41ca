use std::collections::HashMap;

use serde::Serialize;

/// A peer counts as online while its last handshake is younger than this.
pub const ONLINE_WINDOW_SECS: u64 = 180;

/// Live status of one peer, keyed elsewhere by public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    /// Seconds since the Unix epoch; `None` if no handshake ever happened.
    pub last_handshake: Option<u64>,
    pub online: bool,
}

impl PeerStatus {
    /// Classify a handshake timestamp against `now`.
    ///
    /// The window is half-open: 179 seconds old is online, 180 is offline.
    pub fn classify(last_handshake: Option<u64>, now: u64) -> Self {
        let online = last_handshake.is_some_and(|ts| now.saturating_sub(ts) < ONLINE_WINDOW_SECS);
        Self {
            last_handshake,
            online,
        }
    }

    /// Status reported for peers the daemon has no record of.
    pub fn unknown() -> Self {
        Self {
            last_handshake: None,
            online: false,
        }
    }
}

/// Parse a `wg show <iface> dump` listing.
///
/// The first line describes the interface itself and is skipped. Each
/// remaining tab-separated line is one peer: column 0 is the public key,
/// column 4 the latest handshake (`0` for never). Lines with fewer than
/// five columns are ignored.
pub fn parse_dump(dump: &str, now: u64) -> HashMap<String, PeerStatus> {
    dump.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 5 || cols[0].is_empty() {
                return None;
            }
            let handshake = cols[4].trim().parse::<u64>().ok().filter(|ts| *ts > 0);
            Some((cols[0].to_string(), PeerStatus::classify(handshake, now)))
        })
        .collect()
}
