//! Control-plane events and the event queue
//!
//! Every state change in the control plane happens while one [`BundleEvent`]
//! is being processed. Convergence layers, timers and the console only talk
//! to the control plane by posting events.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::bundle::{BundleId, BundleRef};
use crate::contact::ContactRef;
use crate::eid::EndpointIdPattern;
use crate::link::{LinkRef, LinkState};
use crate::route::RouteEntry;

/// Why a contact or link event happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactReason {
    NoInfo,
    /// Requested by the operator or configuration
    User,
    /// Idle timeout
    Idle,
    /// Session broke
    Broken,
    /// Retry after a broken contact
    Reconnect,
    /// Found by discovery
    Discovery,
    /// Driven by a contact schedule
    Schedule,
    /// Daemon shutting down
    Shutdown,
}

impl fmt::Display for ContactReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContactReason::NoInfo => "no additional info",
            ContactReason::User => "user action",
            ContactReason::Idle => "idle connection",
            ContactReason::Broken => "connection broken",
            ContactReason::Reconnect => "re-establishing connection",
            ContactReason::Discovery => "link discovery",
            ContactReason::Schedule => "scheduled contact",
            ContactReason::Shutdown => "daemon shutdown",
        })
    }
}

/// Why a bundle was deleted
///
/// Every deletion carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeletionReason {
    NoAdditionalInfo,
    LifetimeExpired,
    Forwarded,
    /// Downstream node accepted custody
    CustodyAccepted,
    /// Delivered to every matching local registration
    Delivered,
    Cancelled,
    DepletedStorage,
    NoRoute,
    NoTimelyContact,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeletionReason::NoAdditionalInfo => "no additional information",
            DeletionReason::LifetimeExpired => "lifetime expired",
            DeletionReason::Forwarded => "forwarded",
            DeletionReason::CustodyAccepted => "custody accepted downstream",
            DeletionReason::Delivered => "delivered",
            DeletionReason::Cancelled => "transmission cancelled",
            DeletionReason::DepletedStorage => "depleted storage",
            DeletionReason::NoRoute => "no known route",
            DeletionReason::NoTimelyContact => "no timely contact",
        })
    }
}

/// Where a received bundle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Peer,
    Application,
    Store,
    Admin,
}

/// Typed control-plane events
#[derive(Debug, Clone)]
pub enum BundleEvent {
    BundleReceived {
        bundle: BundleRef,
        source: EventSource,
        /// Link the bundle arrived on, for peer receptions
        link_name: Option<String>,
    },
    BundleTransmitted {
        bundle: BundleRef,
        link: LinkRef,
        bytes_sent: u64,
    },
    BundleTransmitFailed {
        bundle: BundleRef,
        link: LinkRef,
    },
    BundleSendCancelled {
        bundle: BundleRef,
        link: LinkRef,
    },
    BundleExpired {
        bundle: BundleRef,
    },
    BundleNotNeeded {
        bundle: BundleRef,
    },
    BundleInjected {
        bundle: BundleRef,
    },
    CustodyTimeout {
        bundle: BundleRef,
        link_name: String,
    },
    CustodySignal {
        bundle_id: BundleId,
        succeeded: bool,
    },
    ContactUp {
        contact: ContactRef,
    },
    ContactDown {
        contact: ContactRef,
        reason: ContactReason,
    },
    LinkCreated {
        link: LinkRef,
        reason: ContactReason,
    },
    LinkDeleted {
        link: LinkRef,
        reason: ContactReason,
    },
    LinkAvailable {
        link: LinkRef,
        reason: ContactReason,
    },
    LinkUnavailable {
        link: LinkRef,
        reason: ContactReason,
    },
    LinkStateChangeRequest {
        link: LinkRef,
        state: LinkState,
        reason: ContactReason,
    },
    RegistrationAdded {
        regid: u32,
        endpoint: EndpointIdPattern,
    },
    RegistrationRemoved {
        regid: u32,
    },
    RouteAdd {
        entry: RouteEntry,
    },
    RouteDel {
        dest: EndpointIdPattern,
        /// Only remove the route through this link, if set
        link_name: Option<String>,
    },
    RerouteTimeout {
        link: LinkRef,
        generation: u64,
    },
    Shutdown,
}

impl BundleEvent {
    /// Stable name for logs
    pub fn name(&self) -> &'static str {
        match self {
            BundleEvent::BundleReceived { .. } => "BUNDLE_RECEIVED",
            BundleEvent::BundleTransmitted { .. } => "BUNDLE_TRANSMITTED",
            BundleEvent::BundleTransmitFailed { .. } => "BUNDLE_TRANSMIT_FAILED",
            BundleEvent::BundleSendCancelled { .. } => "BUNDLE_SEND_CANCELLED",
            BundleEvent::BundleExpired { .. } => "BUNDLE_EXPIRED",
            BundleEvent::BundleNotNeeded { .. } => "BUNDLE_NOT_NEEDED",
            BundleEvent::BundleInjected { .. } => "BUNDLE_INJECTED",
            BundleEvent::CustodyTimeout { .. } => "CUSTODY_TIMEOUT",
            BundleEvent::CustodySignal { .. } => "CUSTODY_SIGNAL",
            BundleEvent::ContactUp { .. } => "CONTACT_UP",
            BundleEvent::ContactDown { .. } => "CONTACT_DOWN",
            BundleEvent::LinkCreated { .. } => "LINK_CREATED",
            BundleEvent::LinkDeleted { .. } => "LINK_DELETED",
            BundleEvent::LinkAvailable { .. } => "LINK_AVAILABLE",
            BundleEvent::LinkUnavailable { .. } => "LINK_UNAVAILABLE",
            BundleEvent::LinkStateChangeRequest { .. } => "LINK_STATE_CHANGE_REQUEST",
            BundleEvent::RegistrationAdded { .. } => "REGISTRATION_ADDED",
            BundleEvent::RegistrationRemoved { .. } => "REGISTRATION_REMOVED",
            BundleEvent::RouteAdd { .. } => "ROUTE_ADD",
            BundleEvent::RouteDel { .. } => "ROUTE_DEL",
            BundleEvent::RerouteTimeout { .. } => "REROUTE_TIMEOUT",
            BundleEvent::Shutdown => "SHUTDOWN",
        }
    }

    /// The bundle this event concerns, if any
    pub fn bundle(&self) -> Option<&BundleRef> {
        match self {
            BundleEvent::BundleReceived { bundle, .. }
            | BundleEvent::BundleTransmitted { bundle, .. }
            | BundleEvent::BundleTransmitFailed { bundle, .. }
            | BundleEvent::BundleSendCancelled { bundle, .. }
            | BundleEvent::BundleExpired { bundle }
            | BundleEvent::BundleNotNeeded { bundle }
            | BundleEvent::BundleInjected { bundle }
            | BundleEvent::CustodyTimeout { bundle, .. } => Some(bundle),
            _ => None,
        }
    }
}

impl fmt::Display for BundleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bundle() {
            Some(bundle) => write!(f, "{} (bundle {})", self.name(), bundle.id()),
            None => f.write_str(self.name()),
        }
    }
}

/// Observations published by the daemon
///
/// Read-only; nothing published here feeds back into event processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonNotification {
    BundleDelivered {
        bundle_id: BundleId,
        regid: u32,
        timestamp: DateTime<Utc>,
    },
    BundleDeleted {
        bundle_id: BundleId,
        reason: DeletionReason,
        timestamp: DateTime<Utc>,
    },
    LinkStateChanged {
        link_name: String,
        state: LinkState,
        timestamp: DateTime<Utc>,
    },
}

struct QueueInner {
    events: Mutex<VecDeque<BundleEvent>>,
    notify: Notify,
}

/// Multi-producer, single-consumer event queue
///
/// Cloning yields another producer handle to the same queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                events: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Append an event
    pub fn post(&self, event: BundleEvent) {
        self.inner.events.lock().push_back(event);
        self.inner.notify.notify_one();
    }

    /// Put an event ahead of everything already queued
    pub fn post_at_head(&self, event: BundleEvent) {
        self.inner.events.lock().push_front(event);
        self.inner.notify.notify_one();
    }

    /// Take the next event without waiting
    pub fn try_next(&self) -> Option<BundleEvent> {
        self.inner.events.lock().pop_front()
    }

    /// Wait for the next event
    pub async fn next(&self) -> BundleEvent {
        loop {
            if let Some(event) = self.try_next() {
                return event;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.events.lock().is_empty()
    }

    /// Names of queued events, head first
    pub fn pending_names(&self) -> Vec<&'static str> {
        self.inner.events.lock().iter().map(|e| e.name()).collect()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue").field("len", &self.len()).finish()
    }
}
