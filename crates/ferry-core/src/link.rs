//! Links and the link state machine
//!
//! A [`Link`] is a durable, named route to a neighbor. It owns at most one
//! [`Contact`] at a time and moves through the states of [`LinkState`].
//! Links are never freed while the process runs; deletion only marks them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::bundle::BundleList;
use crate::contact::{Contact, ContactRef};
use crate::eid::EndpointId;
use crate::error::LinkError;
use crate::traits::ConvergenceLayer;

/// Shared handle to a link
pub type LinkRef = Arc<Link>;

/// When a link becomes available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// Available immediately and opened right away
    AlwaysOn,
    /// Available immediately, opened on first use
    OnDemand,
    /// Availability driven by an external schedule
    Scheduled,
    /// Created by convergence-layer discovery
    Opportunistic,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::AlwaysOn => "ALWAYSON",
            LinkType::OnDemand => "ONDEMAND",
            LinkType::Scheduled => "SCHEDULED",
            LinkType::Opportunistic => "OPPORTUNISTIC",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    Unavailable,
    Available,
    Opening,
    Open,
    Busy,
}

impl LinkState {
    /// Check whether the transition `self -> to` is legal
    pub fn can_transition_to(self, to: LinkState) -> bool {
        use LinkState::*;

        match (self, to) {
            (_, Unavailable) => true,
            (Unavailable, Available) => true,
            (Available | Unavailable, Opening) => true,
            (Opening | Busy | Unavailable, Open) => true,
            (Open, Busy) => true,
            (Available | Opening | Open | Busy, Available)
            | (Opening | Open | Busy, Opening)
            | (Available | Open, Open)
            | (Unavailable | Available | Opening | Busy, Busy) => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Unavailable => "UNAVAILABLE",
            LinkState::Available => "AVAILABLE",
            LinkState::Opening => "OPENING",
            LinkState::Open => "OPEN",
            LinkState::Busy => "BUSY",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configurable link parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Maximum wire length of a bundle, 0 for unlimited
    pub mtu: u64,
    /// Initial retry interval after a broken contact
    pub min_retry_interval: Duration,
    /// Upper bound for the doubled retry interval
    pub max_retry_interval: Duration,
    /// How long a down link may hold queued bundles before they are rerouted
    pub potential_downtime: Duration,
    /// Close an idle contact after this long
    pub idle_close_time: Option<Duration>,
    /// Whether the convergence layer provides reliable delivery
    pub reliable: bool,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            mtu: 0,
            min_retry_interval: Duration::from_secs(5),
            max_retry_interval: Duration::from_secs(600),
            potential_downtime: Duration::from_secs(30),
            idle_close_time: None,
            reliable: false,
        }
    }
}

impl LinkParams {
    pub fn with_mtu(mut self, mtu: u64) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_retry_intervals(mut self, min: Duration, max: Duration) -> Self {
        self.min_retry_interval = min;
        self.max_retry_interval = max;
        self
    }

    pub fn with_potential_downtime(mut self, downtime: Duration) -> Self {
        self.potential_downtime = downtime;
        self
    }

    pub fn with_idle_close_time(mut self, idle: Duration) -> Self {
        self.idle_close_time = Some(idle);
        self
    }

    pub fn with_reliable(mut self, reliable: bool) -> Self {
        self.reliable = reliable;
        self
    }

    /// Check parameter consistency
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.min_retry_interval.is_zero() {
            return Err(LinkError::InvalidParams(
                "min_retry_interval must be nonzero".into(),
            ));
        }
        if self.max_retry_interval.is_zero() {
            return Err(LinkError::InvalidParams(
                "max_retry_interval must be nonzero".into(),
            ));
        }
        if self.min_retry_interval > self.max_retry_interval {
            return Err(LinkError::InvalidParams(format!(
                "min_retry_interval {:?} exceeds max_retry_interval {:?}",
                self.min_retry_interval, self.max_retry_interval
            )));
        }
        Ok(())
    }
}

/// Cumulative and current per-link statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Bundles currently queued (delayed-send queue or convergence layer)
    pub bundles_queued: u64,
    pub bytes_queued: u64,
    /// Bundles handed to the convergence layer and not yet resolved
    pub bundles_inflight: u64,
    pub bytes_inflight: u64,
    pub bundles_transmitted: u64,
    pub bytes_transmitted: u64,
    pub bundles_cancelled: u64,
    /// Contacts that came up
    pub contacts: u64,
    /// Open attempts
    pub contact_attempts: u64,
}

impl fmt::Display for LinkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} contact_attempts -- {} contacts -- {} bundles_transmitted -- \
             {} bytes_transmitted -- {} bundles_queued -- {} bytes_queued -- \
             {} bundles_inflight -- {} bytes_inflight -- {} bundles_cancelled",
            self.contact_attempts,
            self.contacts,
            self.bundles_transmitted,
            self.bytes_transmitted,
            self.bundles_queued,
            self.bytes_queued,
            self.bundles_inflight,
            self.bytes_inflight,
            self.bundles_cancelled,
        )
    }
}

struct LinkInner {
    state: LinkState,
    retry_interval: Duration,
    contact: Option<ContactRef>,
    deleted: bool,
}

/// A named route to a neighbor
pub struct Link {
    name: String,
    link_type: LinkType,
    nexthop: String,
    remote_eid: EndpointId,
    params: LinkParams,
    clayer: Arc<dyn ConvergenceLayer>,
    inner: Mutex<LinkInner>,
    cl_info: Mutex<Option<Box<dyn Any + Send + Sync>>>,
    stats: Mutex<LinkStats>,
    queue: BundleList,
    inflight: BundleList,
}

impl Link {
    /// Create a link in the UNAVAILABLE state
    pub fn new(
        name: impl Into<String>,
        link_type: LinkType,
        clayer: Arc<dyn ConvergenceLayer>,
        nexthop: impl Into<String>,
        remote_eid: EndpointId,
        params: LinkParams,
    ) -> LinkRef {
        let name = name.into();
        let queue = BundleList::new(format!("{} queue", name));
        let inflight = BundleList::new(format!("{} inflight", name));
        let retry_interval = params.min_retry_interval;

        Arc::new(Self {
            name,
            link_type,
            nexthop: nexthop.into(),
            remote_eid,
            params,
            clayer,
            inner: Mutex::new(LinkInner {
                state: LinkState::Unavailable,
                retry_interval,
                contact: None,
                deleted: false,
            }),
            cl_info: Mutex::new(None),
            stats: Mutex::new(LinkStats::default()),
            queue,
            inflight,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn nexthop(&self) -> &str {
        &self.nexthop
    }

    pub fn remote_eid(&self) -> &EndpointId {
        &self.remote_eid
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    pub fn clayer(&self) -> &Arc<dyn ConvergenceLayer> {
        &self.clayer
    }

    /// The delayed-send queue
    ///
    /// Holds bundles accepted for this link until they are transmitted or
    /// cancelled.
    pub fn queue(&self) -> &BundleList {
        &self.queue
    }

    /// Bundles currently handed to the convergence layer
    pub fn inflight(&self) -> &BundleList {
        &self.inflight
    }

    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    /// Move to a new state
    ///
    /// Illegal transitions are logged and refused without mutation.
    pub fn set_state(&self, new_state: LinkState) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        let old_state = inner.state;

        if !old_state.can_transition_to(new_state) {
            error!(
                link = %self.name,
                from = %old_state,
                to = %new_state,
                "illegal link state transition"
            );
            return Err(LinkError::IllegalTransition {
                from: old_state,
                to: new_state,
            });
        }

        debug!(link = %self.name, from = %old_state, to = %new_state, "link state change");
        inner.state = new_state;
        Ok(())
    }

    /// OPEN or BUSY
    pub fn is_open(&self) -> bool {
        matches!(self.state(), LinkState::Open | LinkState::Busy)
    }

    pub fn is_opening(&self) -> bool {
        self.state() == LinkState::Opening
    }

    pub fn is_busy(&self) -> bool {
        self.state() == LinkState::Busy
    }

    /// Any state other than UNAVAILABLE
    pub fn is_available(&self) -> bool {
        self.state() != LinkState::Unavailable
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.lock().deleted
    }

    pub fn set_deleted(&self) {
        self.inner.lock().deleted = true;
    }

    /// The current contact, if any
    pub fn contact(&self) -> Option<ContactRef> {
        self.inner.lock().contact.clone()
    }

    pub fn retry_interval(&self) -> Duration {
        self.inner.lock().retry_interval
    }

    pub fn reset_retry_interval(&self) {
        self.inner.lock().retry_interval = self.params.min_retry_interval;
    }

    /// Return the current retry interval and double it for the next attempt
    pub fn backoff_retry_interval(&self) -> Duration {
        let mut inner = self.inner.lock();
        let current = inner.retry_interval;
        inner.retry_interval = (current * 2).min(self.params.max_retry_interval);
        current
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.lock().clone()
    }

    pub fn update_stats(&self, f: impl FnOnce(&mut LinkStats)) {
        f(&mut self.stats.lock());
    }

    /// Store convergence-layer state on the link, returning any previous value
    pub fn set_cl_info(
        &self,
        info: Box<dyn Any + Send + Sync>,
    ) -> Option<Box<dyn Any + Send + Sync>> {
        self.cl_info.lock().replace(info)
    }

    pub fn take_cl_info(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.cl_info.lock().take()
    }

    pub fn has_cl_info(&self) -> bool {
        self.cl_info.lock().is_some()
    }

    /// Open a contact on this link
    ///
    /// Requires AVAILABLE. Moves to OPENING, creates the contact and hands it
    /// to the convergence layer, which later signals contact-up.
    pub fn open(self: &Arc<Self>) -> Result<(), LinkError> {
        let contact = {
            let mut inner = self.inner.lock();

            if inner.deleted {
                error!(link = %self.name, "open requested on deleted link");
                return Err(LinkError::Deleted);
            }
            if inner.state != LinkState::Available {
                error!(link = %self.name, state = %inner.state, "open requested on link that is not available");
                return Err(LinkError::NotAvailable(inner.state));
            }
            if inner.contact.is_some() {
                error!(link = %self.name, "open requested on link that already has a contact");
                return Err(LinkError::ContactExists);
            }

            inner.state = LinkState::Opening;
            let contact = Contact::new(self);
            inner.contact = Some(contact.clone());
            contact
        };

        self.update_stats(|s| s.contact_attempts += 1);
        debug!(link = %self.name, "opening contact");

        if let Err(e) = self.clayer.open_contact(&contact) {
            warn!(link = %self.name, error = %e, "convergence layer failed to open contact");
            let mut inner = self.inner.lock();
            inner.contact = None;
            inner.state = LinkState::Unavailable;
            return Err(LinkError::ClRejected(e.to_string()));
        }

        Ok(())
    }

    /// Close the current contact
    ///
    /// The link's reference to the contact is always released. State changes
    /// are left to the caller.
    pub fn close(&self) -> Result<(), LinkError> {
        let Some(contact) = self.contact() else {
            error!(link = %self.name, "close requested on link with no contact");
            return Err(LinkError::NoContact);
        };

        debug!(link = %self.name, "closing contact");
        self.clayer.close_contact(&contact);

        let cleared = !contact.has_cl_info();
        self.inner.lock().contact = None;

        if !cleared {
            error!(link = %self.name, "convergence layer left contact state after close");
            return Err(LinkError::ClInfoNotCleared);
        }

        Ok(())
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {} {} {}]",
            self.name,
            self.nexthop,
            self.remote_eid,
            self.link_type,
            self.state()
        )
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("type", &self.link_type)
            .field("nexthop", &self.nexthop)
            .field("remote_eid", &self.remote_eid)
            .field("clayer", &self.clayer.name())
            .field("state", &inner.state)
            .field("has_contact", &inner.contact.is_some())
            .field("deleted", &inner.deleted)
            .finish()
    }
}
