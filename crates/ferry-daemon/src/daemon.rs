//! The single-consumer control-plane event loop
//!
//! [`Daemon`] owns every control-plane component and processes one
//! [`BundleEvent`] at a time to completion. For each event the daemon first
//! applies its own bookkeeping (pending list, forwarding log outcomes, link
//! states, timers) and then hands the event to the router.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ferry_core::{
    Bundle, BundleEvent, BundleId, BundleIdAllocator, BundleList, BundleRef, BundleStore,
    ContactRef, ContactReason, DaemonNotification, DeletionReason, EndpointId, EventQueue,
    EventSource, ForwardAction, ForwardingState, LinkRef, LinkState, LinkType, TimerHandle,
    TimerService,
};
use ferry_routing::{BundleActions, DaemonActions, TableBasedRouter};
use ferry_storage::InMemoryBundleStore;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::DaemonConfig;
use crate::contact_manager::ContactManager;
use crate::error::DaemonResult;
use crate::registration::RegistrationTable;
use crate::timers::TokioTimers;

/// Control-plane context: links, routes, pending bundles and timers
pub struct Daemon {
    config: DaemonConfig,
    events: EventQueue,
    pending: Arc<BundleList>,
    store: Arc<dyn BundleStore>,
    actions: Arc<DaemonActions>,
    router: TableBasedRouter,
    contacts: ContactManager,
    registrations: RegistrationTable,
    timers: Arc<dyn TimerService>,
    notifier: broadcast::Sender<DaemonNotification>,
    ids: Arc<BundleIdAllocator>,
    expiration_timers: HashMap<BundleId, TimerHandle>,
    custody_timers: HashMap<BundleId, Vec<(String, TimerHandle)>>,
    retry_timers: HashMap<String, TimerHandle>,
    idle_timers: HashMap<String, TimerHandle>,
    shutdown: bool,
}

impl Daemon {
    /// Assemble a daemon from its collaborators
    ///
    /// `timers` must post into `events`.
    pub fn new(
        config: DaemonConfig,
        store: Arc<dyn BundleStore>,
        timers: Arc<dyn TimerService>,
        events: EventQueue,
    ) -> Self {
        for warning in config.validate() {
            warn!(%warning, "daemon configuration");
        }

        let (notifier, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let pending = Arc::new(BundleList::new("pending"));

        let actions = Arc::new(
            DaemonActions::new(store.clone(), pending.clone(), config.actions.clone())
                .with_notifier(notifier.clone()),
        );
        let router = TableBasedRouter::new(
            config.router.clone(),
            actions.clone(),
            pending.clone(),
            timers.clone(),
            events.clone(),
        );

        let last_id = store
            .bundles()
            .ok()
            .and_then(|bundles| bundles.iter().map(|b| b.id()).max());
        let ids = Arc::new(match last_id {
            Some(last) => BundleIdAllocator::starting_after(last),
            None => BundleIdAllocator::new(),
        });

        info!(local_eid = %config.local_eid, "daemon created");

        Self {
            contacts: ContactManager::new(events.clone()),
            registrations: RegistrationTable::new(),
            config,
            events,
            pending,
            store,
            actions,
            router,
            timers,
            notifier,
            ids,
            expiration_timers: HashMap::new(),
            custody_timers: HashMap::new(),
            retry_timers: HashMap::new(),
            idle_timers: HashMap::new(),
            shutdown: false,
        }
    }

    /// In-memory store and tokio timers on the current runtime
    pub fn in_memory(config: DaemonConfig) -> DaemonResult<Self> {
        let events = EventQueue::new();
        let timers = Arc::new(TokioTimers::from_current(events.clone())?);
        Ok(Self::new(
            config,
            Arc::new(InMemoryBundleStore::new()),
            timers,
            events,
        ))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Producer handle for convergence layers and the console
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn contact_manager(&self) -> &ContactManager {
        &self.contacts
    }

    pub fn router(&self) -> &TableBasedRouter {
        &self.router
    }

    pub fn actions(&self) -> &Arc<DaemonActions> {
        &self.actions
    }

    pub fn pending(&self) -> &Arc<BundleList> {
        &self.pending
    }

    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.store
    }

    pub fn registrations(&self) -> &RegistrationTable {
        &self.registrations
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Observe deliveries, deletions and link state changes
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonNotification> {
        self.notifier.subscribe()
    }

    /// Allocate an id and post a locally generated bundle
    pub fn inject(
        &self,
        source: EndpointId,
        dest: EndpointId,
        payload: impl Into<bytes::Bytes>,
    ) -> BundleRef {
        let bundle = Bundle::new(self.ids.next_id(), source, dest)
            .with_payload(payload)
            .into_ref();
        self.events.post(BundleEvent::BundleInjected {
            bundle: bundle.clone(),
        });
        bundle
    }

    /// Allocate the next local bundle id
    pub fn next_bundle_id(&self) -> BundleId {
        self.ids.next_id()
    }

    /// Shared id allocator, for convergence layers that build received bundles
    pub fn id_allocator(&self) -> Arc<BundleIdAllocator> {
        self.ids.clone()
    }

    /// Post every stored bundle as received from the store
    ///
    /// Used at startup so bundles persisted by a previous run are routed
    /// again. Returns the number of bundles posted.
    pub fn load_from_store(&self) -> DaemonResult<usize> {
        let bundles = self.store.bundles()?;
        info!(count = bundles.len(), "reloading bundles from store");

        for bundle in &bundles {
            self.events.post(BundleEvent::BundleReceived {
                bundle: bundle.clone(),
                source: EventSource::Store,
                link_name: None,
            });
        }
        Ok(bundles.len())
    }

    /// Process events until a shutdown event has been handled
    pub async fn run(&mut self) {
        info!("daemon event loop started");
        while !self.shutdown {
            let event = self.events.next().await;
            self.process_event(event);
        }
        info!("daemon event loop stopped");
    }

    /// Process every queued event, including any posted while processing
    ///
    /// Returns the number of events handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while !self.shutdown
            && let Some(event) = self.events.try_next()
        {
            self.process_event(event);
            handled += 1;
        }
        handled
    }

    /// Handle one event to completion
    #[instrument(skip(self, event), fields(event = event.name()))]
    pub fn process_event(&mut self, event: BundleEvent) {
        trace!(%event, "processing event");

        let route = match &event {
            BundleEvent::BundleReceived { bundle, source, .. } => {
                self.handle_bundle_received(bundle, *source)
            }
            BundleEvent::BundleTransmitted {
                bundle,
                link,
                bytes_sent,
            } => {
                self.handle_bundle_transmitted(bundle, link, *bytes_sent);
                true
            }
            BundleEvent::BundleTransmitFailed { bundle, link } => {
                bundle
                    .fwdlog()
                    .update(link.name(), ForwardingState::TransmitFailed);
                self.actions.transmission_done(bundle, link, None);
                true
            }
            BundleEvent::BundleSendCancelled { bundle, link } => {
                debug!(bundle_id = bundle.id().0, link = %link.name(), "send cancelled");
                true
            }
            BundleEvent::BundleExpired { bundle } => {
                self.handle_bundle_expired(bundle);
                false
            }
            BundleEvent::BundleNotNeeded { bundle } => {
                self.delete_bundle(bundle, DeletionReason::NoAdditionalInfo);
                false
            }
            BundleEvent::BundleInjected { bundle } => {
                self.actions.inject_bundle(bundle);
                self.schedule_expiration(bundle);
                true
            }
            BundleEvent::CustodyTimeout { bundle, link_name } => {
                self.handle_custody_timeout(bundle, link_name)
            }
            BundleEvent::CustodySignal {
                bundle_id,
                succeeded,
            } => self.handle_custody_signal(*bundle_id, *succeeded),
            BundleEvent::ContactUp { contact } => self.handle_contact_up(contact),
            BundleEvent::ContactDown { contact, reason } => {
                self.handle_contact_down(contact, *reason)
            }
            BundleEvent::LinkCreated { link, .. } => {
                debug!(link = %link, "link created event");
                true
            }
            BundleEvent::LinkDeleted { link, .. } => {
                self.handle_link_deleted(link);
                true
            }
            BundleEvent::LinkAvailable { link, reason } => {
                self.handle_link_available(link, *reason)
            }
            BundleEvent::LinkUnavailable { link, reason } => {
                self.handle_link_unavailable(link, *reason);
                true
            }
            BundleEvent::LinkStateChangeRequest {
                link,
                state,
                reason,
            } => {
                self.handle_link_state_change_request(link, *state, *reason);
                false
            }
            BundleEvent::RegistrationAdded { regid, endpoint } => {
                match self.registrations.add(*regid, endpoint.clone()) {
                    Ok(()) => self.deliver_pending(*regid),
                    Err(e) => warn!(error = %e, "registration refused"),
                }
                false
            }
            BundleEvent::RegistrationRemoved { regid } => {
                if self.registrations.remove(*regid).is_none() {
                    warn!(regid, "no such registration");
                }
                false
            }
            BundleEvent::RouteAdd { .. }
            | BundleEvent::RouteDel { .. }
            | BundleEvent::RerouteTimeout { .. } => true,
            BundleEvent::Shutdown => {
                self.handle_shutdown();
                false
            }
        };

        if route {
            self.router.handle_event(&event);
        }

        if let BundleEvent::LinkDeleted { link, .. } = &event {
            self.reroute_orphans(link);
        }
    }

    fn handle_bundle_received(&mut self, bundle: &BundleRef, source: EventSource) -> bool {
        info!(
            bundle_id = bundle.id().0,
            source = %bundle.source(),
            dest = %bundle.dest(),
            ?source,
            "bundle received"
        );

        if bundle.is_expired() {
            info!(bundle_id = bundle.id().0, "bundle expired on arrival");
            // a bundle that was never stored still needs its deletion recorded
            if source != EventSource::Store {
                self.pending.push_back(bundle.clone());
            }
            self.delete_bundle(bundle, DeletionReason::LifetimeExpired);
            return false;
        }

        if source != EventSource::Store {
            self.actions.store_add(bundle);
        }
        if !self.pending.contains(bundle) {
            self.pending.push_back(bundle.clone());
        }
        self.schedule_expiration(bundle);

        if self.deliver_locally(bundle) {
            return false;
        }
        true
    }

    fn handle_bundle_transmitted(&mut self, bundle: &BundleRef, link: &LinkRef, bytes_sent: u64) {
        let entry = {
            let mut log = bundle.fwdlog();
            if !log.update(link.name(), ForwardingState::Transmitted) {
                warn!(bundle_id = bundle.id().0, link = %link.name(), "transmitted bundle has no forwarding entry");
            }
            log.latest_entry(link.name())
                .map(|e| (e.action, e.custody_spec))
        };

        info!(bundle_id = bundle.id().0, link = %link.name(), bytes_sent, "bundle transmitted");
        self.actions.transmission_done(bundle, link, Some(bytes_sent));
        self.schedule_idle_close(link);

        if !self.pending.contains(bundle) {
            return;
        }
        self.actions.store_update(bundle);

        let Some((action, custody_spec)) = entry else {
            return;
        };

        if bundle.custody_requested() {
            let timeout = custody_spec.timeout_for(bundle);
            debug!(bundle_id = bundle.id().0, link = %link.name(), timeout_secs = timeout.as_secs(), "scheduling custody timer");
            let handle = self.timers.schedule(
                timeout,
                BundleEvent::CustodyTimeout {
                    bundle: bundle.clone(),
                    link_name: link.name().to_string(),
                },
            );
            self.custody_timers
                .entry(bundle.id())
                .or_default()
                .push((link.name().to_string(), handle));
        } else if action == ForwardAction::Forward {
            self.delete_bundle(bundle, DeletionReason::Forwarded);
        }
    }

    fn handle_bundle_expired(&mut self, bundle: &BundleRef) {
        if !self.pending.contains(bundle) {
            trace!(bundle_id = bundle.id().0, "expired bundle no longer pending");
            return;
        }

        info!(bundle_id = bundle.id().0, "bundle expired");
        for link in self.contacts.links() {
            let in_flight =
                bundle.fwdlog().latest_state(link.name()) == Some(ForwardingState::InFlight);
            if in_flight || link.queue().contains(bundle) {
                self.actions.cancel_bundle(bundle, &link);
            }
        }

        self.delete_bundle(bundle, DeletionReason::LifetimeExpired);
    }

    fn handle_custody_timeout(&mut self, bundle: &BundleRef, link_name: &str) -> bool {
        if let Some(timers) = self.custody_timers.get_mut(&bundle.id()) {
            timers.retain(|(name, _)| name != link_name);
            if timers.is_empty() {
                self.custody_timers.remove(&bundle.id());
            }
        }

        if !self.pending.contains(bundle) {
            return false;
        }

        warn!(bundle_id = bundle.id().0, link = link_name, "custody timeout");
        bundle
            .fwdlog()
            .update(link_name, ForwardingState::CustodyTimeout);
        true
    }

    fn handle_custody_signal(&mut self, bundle_id: BundleId, succeeded: bool) -> bool {
        let Some(bundle) = self.pending.find(bundle_id) else {
            debug!(bundle_id = bundle_id.0, "custody signal for unknown bundle");
            return false;
        };

        if !succeeded {
            self.cancel_custody_timers(bundle_id);
            return true;
        }

        info!(bundle_id = bundle_id.0, "custody accepted downstream");
        self.delete_bundle(&bundle, DeletionReason::CustodyAccepted);
        false
    }

    fn handle_contact_up(&mut self, contact: &ContactRef) -> bool {
        let Some(link) = contact.link() else {
            warn!(link = contact.link_name(), "contact up for a dropped link");
            return false;
        };

        if link.is_deleted() {
            debug!(link = %link.name(), "contact up on deleted link");
            return false;
        }
        match link.contact() {
            Some(current) if Arc::ptr_eq(&current, contact) => {}
            _ => {
                warn!(link = %link.name(), "stale contact up ignored");
                return false;
            }
        }

        if link.state() != LinkState::Open && link.set_state(LinkState::Open).is_err() {
            return false;
        }

        info!(link = %link.name(), "contact up");
        link.reset_retry_interval();
        link.update_stats(|s| s.contacts += 1);
        self.cancel_retry_timer(&link);
        self.notify_link_state(&link);
        self.actions.resume_link_queue(&link);
        true
    }

    fn handle_contact_down(&mut self, contact: &ContactRef, reason: ContactReason) -> bool {
        let Some(link) = contact.link() else {
            return false;
        };

        match link.contact() {
            Some(current) if !Arc::ptr_eq(&current, contact) => {
                warn!(link = %link.name(), "stale contact down ignored");
                return false;
            }
            Some(_) => {
                if let Err(e) = link.close() {
                    error!(link = %link.name(), error = %e, "error closing contact");
                }
            }
            None => {}
        }

        info!(link = %link.name(), %reason, "contact down");
        self.actions.contact_lost(&link);
        self.settle_closed_link(&link, reason);
        true
    }

    /// Pick the state of a link whose contact just went away
    fn settle_closed_link(&mut self, link: &LinkRef, reason: ContactReason) {
        let _ = link.set_state(LinkState::Unavailable);

        if link.is_deleted() || reason == ContactReason::Shutdown || self.shutdown {
            self.notify_link_state(link);
            return;
        }

        match (link.link_type(), reason) {
            (LinkType::OnDemand, ContactReason::Idle | ContactReason::User) => {
                let _ = link.set_state(LinkState::Available);
            }
            (LinkType::AlwaysOn | LinkType::OnDemand, _) => {
                let delay = link.backoff_retry_interval();
                debug!(link = %link.name(), delay_secs = delay.as_secs(), "scheduling reconnect");
                let handle = self.timers.schedule(
                    delay,
                    BundleEvent::LinkAvailable {
                        link: link.clone(),
                        reason: ContactReason::Reconnect,
                    },
                );
                if let Some(old) = self.retry_timers.insert(link.name().to_string(), handle) {
                    old.cancel();
                }
            }
            _ => {}
        }

        self.notify_link_state(link);
    }

    fn handle_link_deleted(&mut self, link: &LinkRef) {
        self.cancel_retry_timer(link);

        for bundle in link.queue().snapshot() {
            bundle
                .fwdlog()
                .update(link.name(), ForwardingState::Cancelled);
        }
        self.actions.contact_lost(link);
    }

    /// Route bundles stranded on a deleted link's queue
    fn reroute_orphans(&mut self, link: &LinkRef) {
        let orphans = link.queue().snapshot();
        link.queue().clear();

        for bundle in orphans {
            if self.pending.contains(&bundle) {
                self.router.forward_to_matching(&bundle, None);
            }
        }
    }

    fn handle_link_available(&mut self, link: &LinkRef, reason: ContactReason) -> bool {
        if link.is_deleted() {
            return false;
        }
        if reason == ContactReason::Reconnect {
            self.retry_timers.remove(link.name());
        }

        if link.state() == LinkState::Unavailable {
            if link.set_state(LinkState::Available).is_err() {
                return false;
            }
            self.notify_link_state(link);
        }

        if link.link_type() == LinkType::AlwaysOn && link.contact().is_none() {
            self.open_or_retry(link);
        }
        true
    }

    /// Open the link, scheduling a reconnect if the convergence layer refuses
    fn open_or_retry(&mut self, link: &LinkRef) {
        self.actions.open_link(link);
        if link.state() == LinkState::Unavailable && !link.is_deleted() {
            self.settle_closed_link(link, ContactReason::Broken);
        }
    }

    fn handle_link_unavailable(&mut self, link: &LinkRef, reason: ContactReason) {
        info!(link = %link.name(), %reason, "link unavailable");
        if link.contact().is_some() {
            self.actions.close_link(link);
            self.actions.contact_lost(link);
        } else {
            let _ = link.set_state(LinkState::Unavailable);
        }
        self.notify_link_state(link);
    }

    fn handle_link_state_change_request(
        &mut self,
        link: &LinkRef,
        state: LinkState,
        reason: ContactReason,
    ) {
        debug!(link = %link.name(), requested = %state, current = %link.state(), %reason, "link state change request");
        if link.is_deleted() {
            return;
        }

        if reason == ContactReason::Idle {
            self.idle_timers.remove(link.name());
            if !Self::link_is_idle(link) {
                trace!(link = %link.name(), "link busy again, idle close skipped");
                return;
            }
        }

        match state {
            LinkState::Open if link.is_busy() => {
                if link.set_state(LinkState::Open).is_ok() {
                    self.actions.resume_link_queue(link);
                    self.router.check_next_hop(link);
                }
            }
            LinkState::Open => {
                if link.state() == LinkState::Unavailable {
                    let _ = link.set_state(LinkState::Available);
                }
                self.open_or_retry(link);
            }
            LinkState::Unavailable | LinkState::Available
                if link.is_open() || link.is_opening() =>
            {
                self.actions.close_link(link);
                self.actions.contact_lost(link);
                self.settle_closed_link(link, reason);
            }
            LinkState::Unavailable => {
                let _ = link.set_state(LinkState::Unavailable);
                self.notify_link_state(link);
            }
            LinkState::Available => {
                if link.state() == LinkState::Unavailable {
                    self.events.post(BundleEvent::LinkAvailable {
                        link: link.clone(),
                        reason,
                    });
                }
            }
            LinkState::Busy => {
                let _ = link.set_state(LinkState::Busy);
            }
            LinkState::Opening => {
                error!(link = %link.name(), "OPENING cannot be requested directly");
            }
        }
    }

    fn handle_shutdown(&mut self) {
        info!("daemon shutting down");
        self.shutdown = true;

        for link in self.contacts.links() {
            if link.is_open() || link.is_opening() {
                self.actions.close_link(&link);
                self.actions.contact_lost(&link);
            }
        }

        for (_, handle) in self.expiration_timers.drain() {
            handle.cancel();
        }
        for (_, timers) in self.custody_timers.drain() {
            for (_, handle) in timers {
                handle.cancel();
            }
        }
        for (_, handle) in self.retry_timers.drain().chain(self.idle_timers.drain()) {
            handle.cancel();
        }
    }

    /// Arm the idle close timer of an on-demand link with nothing left to send
    fn schedule_idle_close(&mut self, link: &LinkRef) {
        let Some(idle) = link.params().idle_close_time else {
            return;
        };
        if link.link_type() != LinkType::OnDemand || !Self::link_is_idle(link) {
            return;
        }

        trace!(link = %link.name(), idle_secs = idle.as_secs(), "scheduling idle close");
        let handle = self.timers.schedule(
            idle,
            BundleEvent::LinkStateChangeRequest {
                link: link.clone(),
                state: LinkState::Available,
                reason: ContactReason::Idle,
            },
        );
        if let Some(old) = self.idle_timers.insert(link.name().to_string(), handle) {
            old.cancel();
        }
    }

    fn link_is_idle(link: &LinkRef) -> bool {
        link.queue().is_empty() && link.inflight().is_empty()
    }

    /// Deliver to matching registrations
    ///
    /// Returns true if the bundle was addressed to this node and has been
    /// consumed.
    fn deliver_locally(&mut self, bundle: &BundleRef) -> bool {
        let regids = self.registrations.matching(bundle.dest());
        for regid in &regids {
            info!(bundle_id = bundle.id().0, regid, "bundle delivered");
            let _ = self.notifier.send(DaemonNotification::BundleDelivered {
                bundle_id: bundle.id(),
                regid: *regid,
                timestamp: Utc::now(),
            });
        }

        if !regids.is_empty() && self.is_local(bundle.dest()) {
            self.delete_bundle(bundle, DeletionReason::Delivered);
            return true;
        }
        false
    }

    /// Deliver pending bundles matching a newly added registration
    fn deliver_pending(&mut self, regid: u32) {
        let Some(registration) = self.registrations.get(regid) else {
            return;
        };

        for bundle in self.pending.snapshot() {
            if registration.endpoint.matches(bundle.dest()) {
                self.deliver_locally(&bundle);
            }
        }
    }

    fn is_local(&self, eid: &EndpointId) -> bool {
        match self.config.local_eid.service_wildcard() {
            Some(pattern) => pattern.matches(eid) || *eid == self.config.local_eid,
            None => *eid == self.config.local_eid,
        }
    }

    fn schedule_expiration(&mut self, bundle: &BundleRef) {
        if self.expiration_timers.contains_key(&bundle.id()) {
            return;
        }

        let Some(delay) = bundle.time_to_expiration(Utc::now()) else {
            trace!(bundle_id = bundle.id().0, "bundle never expires");
            return;
        };
        let handle = self.timers.schedule(
            delay,
            BundleEvent::BundleExpired {
                bundle: bundle.clone(),
            },
        );
        self.expiration_timers.insert(bundle.id(), handle);
    }

    fn cancel_custody_timers(&mut self, id: BundleId) {
        if let Some(timers) = self.custody_timers.remove(&id) {
            for (_, handle) in timers {
                handle.cancel();
            }
        }
    }

    fn cancel_retry_timer(&mut self, link: &LinkRef) {
        if let Some(handle) = self.retry_timers.remove(link.name()) {
            handle.cancel();
        }
    }

    fn delete_bundle(&mut self, bundle: &BundleRef, reason: DeletionReason) -> bool {
        if let Some(handle) = self.expiration_timers.remove(&bundle.id()) {
            handle.cancel();
        }
        self.cancel_custody_timers(bundle.id());
        self.actions.delete_bundle(bundle, reason, true)
    }

    fn notify_link_state(&self, link: &LinkRef) {
        let _ = self.notifier.send(DaemonNotification::LinkStateChanged {
            link_name: link.name().to_string(),
            state: link.state(),
            timestamp: Utc::now(),
        });
    }
}
