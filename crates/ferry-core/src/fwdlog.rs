//! Per-bundle forwarding log
//!
//! The log records every forwarding attempt of a bundle, one entry per
//! attempt. The latest entry for a link is the authoritative state of the
//! (bundle, link) pair. Only the state field of an entry is ever updated in
//! place; action and custody timer spec are fixed when the entry is added.

use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::eid::EndpointId;

/// What a forwarding attempt does with the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForwardAction {
    /// Hand the bundle on; the local copy may be released once transmitted
    Forward,
    /// Send a copy and keep the local one
    Copy,
}

impl fmt::Display for ForwardAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForwardAction::Forward => "FORWARD",
            ForwardAction::Copy => "COPY",
        })
    }
}

/// State of a forwarding attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForwardingState {
    TransmitPending,
    InFlight,
    Transmitted,
    TransmitFailed,
    Cancelled,
    CustodyTimeout,
}

impl ForwardingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForwardingState::TransmitPending => "TRANSMIT_PENDING",
            ForwardingState::InFlight => "IN_FLIGHT",
            ForwardingState::Transmitted => "TRANSMITTED",
            ForwardingState::TransmitFailed => "TRANSMIT_FAILED",
            ForwardingState::Cancelled => "CANCELLED",
            ForwardingState::CustodyTimeout => "CUSTODY_TIMEOUT",
        }
    }
}

impl fmt::Display for ForwardingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custody retransmission timer configuration
///
/// The timeout is `base + lifetime * lifetime_pct / 100`, capped at `limit`
/// unless `limit` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyTimerSpec {
    pub base: Duration,
    pub lifetime_pct: u32,
    pub limit: Duration,
}

impl Default for CustodyTimerSpec {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30 * 60),
            lifetime_pct: 25,
            limit: Duration::ZERO,
        }
    }
}

impl CustodyTimerSpec {
    pub fn new(base: Duration, lifetime_pct: u32, limit: Duration) -> Self {
        Self {
            base,
            lifetime_pct,
            limit,
        }
    }

    /// Timeout for the given bundle
    pub fn timeout_for(&self, bundle: &Bundle) -> Duration {
        let lifetime = bundle.lifetime().to_std().unwrap_or(Duration::ZERO);
        let share = lifetime
            .checked_mul(self.lifetime_pct)
            .map_or(Duration::MAX, |scaled| scaled / 100);
        let timeout = self.base.saturating_add(share);

        if self.limit.is_zero() {
            timeout
        } else {
            timeout.min(self.limit)
        }
    }
}

impl fmt::Display for CustodyTimerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[base {}s pct {} limit {}s]",
            self.base.as_secs(),
            self.lifetime_pct,
            self.limit.as_secs()
        )
    }
}

/// One forwarding attempt of a bundle on a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingInfo {
    pub link_name: String,
    pub remote_eid: EndpointId,
    pub action: ForwardAction,
    pub state: ForwardingState,
    pub custody_spec: CustodyTimerSpec,
    pub timestamp: DateTime<Utc>,
}

/// Ordered history of forwarding attempts for one bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardingLog {
    entries: Vec<ForwardingInfo>,
}

impl ForwardingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new attempt on a link
    pub fn add_entry(
        &mut self,
        link_name: impl Into<String>,
        remote_eid: EndpointId,
        action: ForwardAction,
        state: ForwardingState,
        custody_spec: CustodyTimerSpec,
    ) {
        self.entries.push(ForwardingInfo {
            link_name: link_name.into(),
            remote_eid,
            action,
            state,
            custody_spec,
            timestamp: Utc::now(),
        });
    }

    /// The latest attempt on the named link
    pub fn latest_entry(&self, link_name: &str) -> Option<&ForwardingInfo> {
        self.entries.iter().rev().find(|e| e.link_name == link_name)
    }

    /// State of the latest attempt on the named link
    pub fn latest_state(&self, link_name: &str) -> Option<ForwardingState> {
        self.latest_entry(link_name).map(|e| e.state)
    }

    /// Update the state of the latest attempt on the named link
    ///
    /// Returns false if the link has no entry.
    pub fn update(&mut self, link_name: &str, state: ForwardingState) -> bool {
        match self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.link_name == link_name)
        {
            Some(entry) => {
                entry.state = state;
                entry.timestamp = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Count links whose latest entry matches one of the states and actions
    ///
    /// An empty slice matches everything.
    pub fn get_count(&self, states: &[ForwardingState], actions: &[ForwardAction]) -> usize {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut count = 0;

        for entry in self.entries.iter().rev() {
            if !seen.insert(entry.link_name.as_str()) {
                continue;
            }
            if (states.is_empty() || states.contains(&entry.state))
                && (actions.is_empty() || actions.contains(&entry.action))
            {
                count += 1;
            }
        }

        count
    }

    pub fn entries(&self) -> &[ForwardingInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Human-readable listing, one entry per line
    pub fn dump(&self) -> String {
        let mut out = format!("forwarding log ({} entries):\n", self.entries.len());
        for e in &self.entries {
            let _ = writeln!(
                out,
                "\t{} -> {} [{}] {} {} at {}",
                e.link_name,
                e.remote_eid,
                e.action,
                e.state,
                e.custody_spec,
                e.timestamp.to_rfc3339()
            );
        }
        out
    }
}
