//! Table-based router
//!
//! Consumes control-plane events one at a time, matches bundles against the
//! route table and issues every effect through [`BundleActions`].
//!
//! ## Reroute timers
//!
//! When a contact goes down with bundles still on the link's delayed-send
//! queue, a one-shot timer is armed for the link's potential downtime. If it
//! fires before the link comes back, every queued bundle is cancelled and the
//! resulting send-cancelled events route each bundle again.

use std::collections::HashMap;
use std::sync::Arc;

use ferry_core::{
    BundleEvent, BundleList, BundleRef, ContactReason, EndpointIdPattern, EventQueue,
    ForwardingState, LinkRef, LinkType, RouteEntry, TimerHandle, TimerService,
};
use tracing::{debug, info, trace, warn};

use crate::actions::BundleActions;
use crate::config::RouterConfig;
use crate::dupcache::DupCache;
use crate::error::RouteResult;
use crate::policy::{DefaultPolicy, RoutingPolicy};
use crate::route_table::RouteTable;

struct RerouteTimer {
    handle: TimerHandle,
    generation: u64,
}

/// Router driven by a static or dynamically maintained route table
pub struct TableBasedRouter {
    config: RouterConfig,
    actions: Arc<dyn BundleActions>,
    pending: Arc<BundleList>,
    timers: Arc<dyn TimerService>,
    events: EventQueue,
    policy: Box<dyn RoutingPolicy>,
    route_table: RouteTable,
    dupcache: DupCache,
    reroute_timers: HashMap<String, RerouteTimer>,
    next_generation: u64,
}

impl TableBasedRouter {
    pub fn new(
        config: RouterConfig,
        actions: Arc<dyn BundleActions>,
        pending: Arc<BundleList>,
        timers: Arc<dyn TimerService>,
        events: EventQueue,
    ) -> Self {
        for warning in config.validate() {
            warn!(%warning, "router configuration");
        }

        Self {
            dupcache: DupCache::new(config.dupcache_size),
            config,
            actions,
            pending,
            timers,
            events,
            policy: Box::new(DefaultPolicy),
            route_table: RouteTable::new("static"),
            reroute_timers: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Replace the forwarding policy
    pub fn with_policy(mut self, policy: impl RoutingPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.route_table
    }

    /// Whether a reroute timer is armed for the link
    pub fn has_reroute_timer(&self, link_name: &str) -> bool {
        self.reroute_timers.contains_key(link_name)
    }

    pub fn reroute_timer_count(&self) -> usize {
        self.reroute_timers.len()
    }

    /// Process one control-plane event
    pub fn handle_event(&mut self, event: &BundleEvent) {
        trace!(event = event.name(), "router handling event");

        match event {
            BundleEvent::BundleReceived { bundle, .. } | BundleEvent::BundleInjected { bundle } => {
                self.handle_new_bundle(bundle);
            }
            BundleEvent::BundleTransmitFailed { bundle, link } => {
                debug!(bundle_id = bundle.id().0, link = %link.name(), "transmit failed, re-routing");
                self.route_if_pending(bundle);
            }
            BundleEvent::BundleSendCancelled { bundle, link } => {
                self.handle_bundle_cancelled(bundle, link);
            }
            BundleEvent::CustodyTimeout { bundle, link_name } => {
                debug!(bundle_id = bundle.id().0, link = %link_name, "custody timeout, re-routing");
                self.route_if_pending(bundle);
            }
            BundleEvent::CustodySignal {
                bundle_id,
                succeeded: false,
            } => {
                if let Some(bundle) = self.pending.find(*bundle_id) {
                    debug!(bundle_id = bundle_id.0, "custody refused, re-routing");
                    self.forward_to_matching(&bundle, None);
                }
            }
            BundleEvent::ContactUp { contact } => {
                if let Some(link) = contact.link() {
                    self.handle_contact_up(&link);
                }
            }
            BundleEvent::ContactDown { contact, reason } => {
                if let Some(link) = contact.link() {
                    self.handle_contact_down(&link, *reason);
                }
            }
            BundleEvent::LinkCreated { link, .. } => {
                self.add_nexthop_route(link);
            }
            BundleEvent::LinkAvailable { link, reason } => {
                self.handle_link_available(link, *reason);
            }
            BundleEvent::LinkDeleted { link, .. } => {
                self.route_table.del_entries_for_nexthop(link);
                self.cancel_reroute_timer(link);
            }
            BundleEvent::RouteAdd { entry } => {
                if let Err(e) = self.add_route(entry.clone()) {
                    warn!(error = %e, "route add refused");
                }
            }
            BundleEvent::RouteDel { dest, link_name } => self.del_route(dest, link_name.as_deref()),
            BundleEvent::RerouteTimeout { link, generation } => {
                self.handle_reroute_timeout(link, *generation);
            }
            _ => {}
        }
    }

    /// Received and injected bundles share one duplicate cache
    fn handle_new_bundle(&mut self, bundle: &BundleRef) {
        if self.dupcache.is_duplicate(bundle) {
            info!(bundle_id = bundle.id().0, "ignoring duplicate bundle");
            self.events.post_at_head(BundleEvent::BundleNotNeeded {
                bundle: bundle.clone(),
            });
            return;
        }

        self.forward_to_matching(bundle, None);
    }

    fn handle_bundle_cancelled(&mut self, bundle: &BundleRef, link: &LinkRef) {
        if bundle.is_expired() {
            debug!(bundle_id = bundle.id().0, "cancelled bundle expired, not re-routing");
            return;
        }
        debug!(bundle_id = bundle.id().0, link = %link.name(), "send cancelled, re-routing");
        self.route_if_pending(bundle);
    }

    fn handle_contact_up(&mut self, link: &LinkRef) {
        if link.is_deleted() {
            debug!(link = %link.name(), "ignoring contact up on deleted link");
            return;
        }

        self.add_nexthop_route(link);
        self.check_next_hop(link);
        self.cancel_reroute_timer(link);
    }

    fn handle_contact_down(&mut self, link: &LinkRef, reason: ContactReason) {
        if link.queue().is_empty() || self.reroute_timers.contains_key(link.name()) {
            return;
        }

        let delay = link.params().potential_downtime;
        let generation = self.next_generation;
        self.next_generation += 1;

        debug!(
            link = %link.name(),
            %reason,
            queued = link.queue().len(),
            delay_secs = delay.as_secs(),
            "scheduling reroute timer"
        );

        let handle = self.timers.schedule(
            delay,
            BundleEvent::RerouteTimeout {
                link: link.clone(),
                generation,
            },
        );
        self.reroute_timers
            .insert(link.name().to_string(), RerouteTimer { handle, generation });
    }

    fn handle_link_available(&mut self, link: &LinkRef, reason: ContactReason) {
        self.add_nexthop_route(link);

        if self.config.open_discovered_links
            && !link.is_open()
            && link.link_type() == LinkType::Opportunistic
            && reason == ContactReason::Discovery
        {
            info!(link = %link.name(), "opening discovered link");
            self.actions.open_link(link);
            return;
        }

        self.check_next_hop(link);
    }

    fn handle_reroute_timeout(&mut self, link: &LinkRef, generation: u64) {
        match self.reroute_timers.get(link.name()) {
            Some(timer) if timer.generation == generation => {
                self.reroute_timers.remove(link.name());
            }
            _ => {
                trace!(link = %link.name(), generation, "ignoring stale reroute timer");
                return;
            }
        }

        self.reroute_bundles(link);
    }

    fn cancel_reroute_timer(&mut self, link: &LinkRef) {
        if let Some(timer) = self.reroute_timers.remove(link.name()) {
            debug!(link = %link.name(), "cancelling reroute timer");
            timer.handle.cancel();
        }
    }

    fn route_if_pending(&self, bundle: &BundleRef) {
        if !self.pending.contains(bundle) {
            trace!(bundle_id = bundle.id().0, "bundle no longer pending");
            return;
        }
        self.forward_to_matching(bundle, None);
    }

    /// Cancel every bundle on the link's delayed-send queue
    ///
    /// Returns the number of cancel actions issued.
    pub fn reroute_bundles(&self, link: &LinkRef) -> usize {
        let queued = link.queue().snapshot();
        info!(link = %link.name(), count = queued.len(), "rerouting queued bundles");

        for bundle in &queued {
            self.actions.cancel_bundle(bundle, link);
        }
        queued.len()
    }

    /// Add a route and route every pending bundle again
    pub fn add_route(&self, entry: RouteEntry) -> RouteResult<()> {
        self.route_table.add_entry(entry)?;
        self.reroute_all_bundles();
        Ok(())
    }

    /// Remove one route, or every route for the destination when no link is named
    pub fn del_route(&self, dest: &EndpointIdPattern, link_name: Option<&str>) {
        match link_name {
            Some(name) => {
                if let Err(e) = self.route_table.del_entry(dest, name) {
                    warn!(error = %e, "route delete failed");
                }
            }
            None => {
                self.route_table.del_entries(dest);
            }
        }
    }

    /// Run every pending bundle through the route table again
    pub fn reroute_all_bundles(&self) -> usize {
        let bundles = self.pending.snapshot();
        debug!(count = bundles.len(), "rerouting all pending bundles");

        bundles
            .iter()
            .map(|b| self.forward_to_matching(b, None))
            .sum()
    }

    /// Add a wildcard route to the link's remote node
    ///
    /// Newly added routes immediately pick up pending bundles they match.
    /// Returns true if a route was added.
    pub fn add_nexthop_route(&self, link: &LinkRef) -> bool {
        if !self.config.add_nexthop_routes || link.remote_eid().is_null() || link.is_deleted() {
            return false;
        }

        let pattern = link
            .remote_eid()
            .service_wildcard()
            .unwrap_or_else(|| EndpointIdPattern::exact(link.remote_eid()));

        if self.route_table.contains(&pattern, link) {
            return false;
        }

        debug!(link = %link.name(), %pattern, "adding next hop route");
        if let Err(e) = self
            .route_table
            .add_entry(RouteEntry::new(pattern, link.clone()))
        {
            warn!(error = %e, "next hop route refused");
            return false;
        }

        for bundle in self.pending.snapshot() {
            self.forward_to_matching(&bundle, Some(link));
        }
        true
    }

    /// Try every matching route for the bundle in policy order
    ///
    /// Returns the number of links the bundle was actually sent on.
    pub fn forward_to_matching(&self, bundle: &BundleRef, link_filter: Option<&LinkRef>) -> usize {
        let mut routes =
            self.route_table
                .get_matching(bundle.dest(), Some(bundle.source()), link_filter);
        self.policy.sort_routes(bundle, &mut routes);

        trace!(
            bundle_id = bundle.id().0,
            dest = %bundle.dest(),
            candidates = routes.len(),
            "forwarding to matching routes"
        );

        let mut count = 0;
        for route in &routes {
            if !self.policy.should_fwd(bundle, route) {
                continue;
            }
            if self.forward_to_nexthop(bundle, route) {
                count += 1;
            }
        }

        debug!(bundle_id = bundle.id().0, count, "forwarded bundle");
        count
    }

    /// Send on the route's link now, or mark the bundle pending for it
    ///
    /// A link that is available but closed is opened. Returns true only if
    /// the bundle was handed to the link.
    pub fn forward_to_nexthop(&self, bundle: &BundleRef, route: &RouteEntry) -> bool {
        let link = &route.link;

        if link.is_open() && !link.is_busy() {
            trace!(bundle_id = bundle.id().0, link = %link.name(), "sending on open link");
            return self
                .actions
                .send_bundle(bundle, link, route.action, route.custody_spec);
        }

        {
            let mut log = bundle.fwdlog();
            if log.latest_state(link.name()) != Some(ForwardingState::TransmitPending) {
                log.add_entry(
                    link.name(),
                    link.remote_eid().clone(),
                    route.action,
                    ForwardingState::TransmitPending,
                    route.custody_spec,
                );
            }
        }

        if link.is_available() && !link.is_open() && !link.is_opening() {
            debug!(link = %link.name(), "opening link for pending bundle");
            self.actions.open_link(link);
        }

        false
    }

    /// Send every bundle marked pending for this link, opening it if needed
    ///
    /// Returns the number of bundles sent.
    pub fn check_next_hop(&self, link: &LinkRef) -> usize {
        let mut sent = 0;

        for bundle in self.pending.snapshot() {
            if link.is_busy() {
                debug!(link = %link.name(), "link busy, deferring pending bundles");
                break;
            }

            let entry = bundle
                .fwdlog()
                .latest_entry(link.name())
                .filter(|e| e.state == ForwardingState::TransmitPending)
                .map(|e| (e.action, e.custody_spec));
            let Some((action, custody_spec)) = entry else {
                continue;
            };

            if !link.is_open() {
                if link.is_available() && !link.is_opening() {
                    debug!(link = %link.name(), "opening link for pending bundles");
                    self.actions.open_link(link);
                }
                break;
            }

            if self.actions.send_bundle(&bundle, link, action, custody_spec) {
                sent += 1;
            }
        }

        if sent > 0 {
            debug!(link = %link.name(), sent, "sent pending bundles");
        }
        sent
    }

    /// Human-readable router state
    pub fn dump(&self) -> String {
        let mut out = self.route_table.dump();
        out.push_str(&format!(
            "dupcache: {}/{} fingerprints, reroute timers: {}\n",
            self.dupcache.len(),
            self.dupcache.capacity(),
            self.reroute_timers.len()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ferry_core::{
        Bundle, BundleId, ClCall, EndpointId, EventSource, ForwardAction, Link, LinkParams,
        LinkState, ManualTimers, MockConvergenceLayer,
    };
    use ferry_storage::InMemoryBundleStore;

    use crate::actions::DaemonActions;
    use crate::config::ActionsConfig;

    struct Fixture {
        router: TableBasedRouter,
        events: EventQueue,
        timers: Arc<ManualTimers>,
        pending: Arc<BundleList>,
        clayer: Arc<MockConvergenceLayer>,
    }

    fn fixture(config: RouterConfig) -> Fixture {
        let events = EventQueue::new();
        let pending = Arc::new(BundleList::new("pending"));
        let timers = Arc::new(ManualTimers::new(events.clone()));
        let actions = Arc::new(DaemonActions::new(
            Arc::new(InMemoryBundleStore::new()),
            pending.clone(),
            ActionsConfig::default(),
        ));
        let clayer = Arc::new(MockConvergenceLayer::new().with_events(events.clone()));
        Fixture {
            router: TableBasedRouter::new(
                config,
                actions,
                pending.clone(),
                timers.clone(),
                events.clone(),
            ),
            events,
            timers,
            pending,
            clayer,
        }
    }

    fn link(f: &Fixture, name: &str, remote: &str) -> LinkRef {
        let link = Link::new(
            name,
            LinkType::OnDemand,
            f.clayer.clone(),
            "host",
            EndpointId::parse(remote).unwrap(),
            LinkParams::default().with_potential_downtime(Duration::from_secs(10)),
        );
        link.set_state(LinkState::Available).unwrap();
        link
    }

    fn open(link: &LinkRef) {
        link.open().unwrap();
        link.set_state(LinkState::Open).unwrap();
    }

    fn bundle(f: &Fixture, id: u32, dest: &str) -> BundleRef {
        let b = Bundle::new(
            BundleId(id),
            EndpointId::parse("dtn://src/app").unwrap(),
            EndpointId::parse(dest).unwrap(),
        )
        .into_ref();
        f.pending.push_back(b.clone());
        b
    }

    fn pattern(s: &str) -> EndpointIdPattern {
        EndpointIdPattern::parse(s).unwrap()
    }

    #[test]
    fn test_priority_order() {
        let f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        let l2 = link(&f, "l2", "dtn://n2");
        open(&l1);
        open(&l2);

        f.router
            .route_table()
            .add_entry(
                RouteEntry::new(pattern("dtn://host/*"), l1.clone())
                    .with_action(ForwardAction::Copy)
                    .with_priority(2),
            )
            .unwrap();
        f.router
            .route_table()
            .add_entry(
                RouteEntry::new(pattern("dtn://host/*"), l2.clone())
                    .with_action(ForwardAction::Copy)
                    .with_priority(5),
            )
            .unwrap();

        let b = bundle(&f, 1, "dtn://host/app");
        assert_eq!(f.router.forward_to_matching(&b, None), 2);

        let sends: Vec<_> = f
            .clayer
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ClCall::SendBundle { link, .. } => Some(link),
                _ => None,
            })
            .collect();
        assert_eq!(sends, vec!["l2".to_string(), "l1".to_string()]);
    }

    #[test]
    fn test_forward_once_across_links() {
        let f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        let l2 = link(&f, "l2", "dtn://n2");
        open(&l1);
        open(&l2);
        for (l, prio) in [(&l1, 2), (&l2, 5)] {
            f.router
                .route_table()
                .add_entry(RouteEntry::new(pattern("dtn://host/*"), l.clone()).with_priority(prio))
                .unwrap();
        }

        let b = bundle(&f, 1, "dtn://host/app");
        assert_eq!(f.router.forward_to_matching(&b, None), 1);
        assert_eq!(f.clayer.sent_on("l2"), vec![BundleId(1)]);
        assert!(f.clayer.sent_on("l1").is_empty());
    }

    #[test]
    fn test_closed_link_marks_pending_and_opens() {
        let mut f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        f.router
            .route_table()
            .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1.clone()))
            .unwrap();

        let b = bundle(&f, 1, "dtn://host/app");
        assert_eq!(f.router.forward_to_matching(&b, None), 0);
        assert_eq!(
            b.fwdlog().latest_state("l1"),
            Some(ForwardingState::TransmitPending)
        );
        assert_eq!(l1.state(), LinkState::Opening);

        // a second attempt does not add another pending entry
        f.router.forward_to_matching(&b, None);
        assert_eq!(b.fwdlog().len(), 1);

        l1.set_state(LinkState::Open).unwrap();
        let contact = l1.contact().unwrap();
        f.router.handle_event(&BundleEvent::ContactUp { contact });
        assert_eq!(f.clayer.sent_on("l1"), vec![BundleId(1)]);
        assert_eq!(b.fwdlog().latest_state("l1"), Some(ForwardingState::InFlight));
    }

    #[test]
    fn test_duplicate_received_not_needed() {
        let mut f = fixture(RouterConfig::static_routes());
        let created = chrono::Utc::now();
        let received = |id: u32| BundleEvent::BundleReceived {
            bundle: Bundle::new(
                BundleId(id),
                EndpointId::parse("dtn://src/app").unwrap(),
                EndpointId::parse("dtn://host/app").unwrap(),
            )
            .with_creation(created, 7)
            .into_ref(),
            source: EventSource::Peer,
            link_name: None,
        };

        f.router.handle_event(&received(1));
        assert!(f.events.is_empty());

        // same fingerprint under a new local id
        f.router.handle_event(&received(2));
        match f.events.try_next() {
            Some(BundleEvent::BundleNotNeeded { bundle }) => assert_eq!(bundle.id(), BundleId(2)),
            other => panic!("expected not needed, got {:?}", other),
        }
    }

    #[test]
    fn test_injected_bundle_recorded_as_seen() {
        let mut f = fixture(RouterConfig::static_routes());
        let created = chrono::Utc::now();
        let copy = |id: u32| {
            Bundle::new(
                BundleId(id),
                EndpointId::parse("dtn://me/app").unwrap(),
                EndpointId::parse("dtn://host/app").unwrap(),
            )
            .with_creation(created, 3)
            .into_ref()
        };

        f.router.handle_event(&BundleEvent::BundleInjected { bundle: copy(1) });
        assert!(f.events.is_empty());

        // a copy of our own bundle coming back from a peer
        f.router.handle_event(&BundleEvent::BundleReceived {
            bundle: copy(2),
            source: EventSource::Peer,
            link_name: None,
        });
        match f.events.try_next() {
            Some(BundleEvent::BundleNotNeeded { bundle }) => assert_eq!(bundle.id(), BundleId(2)),
            other => panic!("expected not needed, got {:?}", other),
        }
    }

    #[test]
    fn test_reroute_timer_cancels_queue() {
        let mut f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        f.router
            .route_table()
            .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1.clone()))
            .unwrap();
        open(&l1);

        let bundles: Vec<_> = (1..=3)
            .map(|i| bundle(&f, i, "dtn://host/app"))
            .collect();
        for b in &bundles {
            assert_eq!(f.router.forward_to_matching(b, None), 1);
        }
        assert_eq!(l1.queue().len(), 3);

        let contact = l1.contact().unwrap();
        l1.close().unwrap();
        l1.set_state(LinkState::Unavailable).unwrap();
        f.router.handle_event(&BundleEvent::ContactDown {
            contact,
            reason: ContactReason::Broken,
        });
        assert!(f.router.has_reroute_timer("l1"));

        assert_eq!(f.timers.advance(Duration::from_secs(10)), 1);
        let event = f.events.try_next().unwrap();
        f.router.handle_event(&event);

        assert_eq!(f.clayer.cancel_count(), 3);
        assert!(!f.router.has_reroute_timer("l1"));
        assert!(l1.queue().is_empty());
        for b in &bundles {
            assert_eq!(b.fwdlog().latest_state("l1"), Some(ForwardingState::Cancelled));
        }
    }

    #[test]
    fn test_reroute_timer_cancelled_on_contact_up() {
        let mut f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        f.router
            .route_table()
            .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1.clone()))
            .unwrap();
        open(&l1);
        let b = bundle(&f, 1, "dtn://host/app");
        f.router.forward_to_matching(&b, None);

        let contact = l1.contact().unwrap();
        l1.close().unwrap();
        l1.set_state(LinkState::Unavailable).unwrap();
        f.router.handle_event(&BundleEvent::ContactDown {
            contact,
            reason: ContactReason::Broken,
        });
        assert!(f.router.has_reroute_timer("l1"));

        l1.set_state(LinkState::Available).unwrap();
        open(&l1);
        let contact = l1.contact().unwrap();
        f.router.handle_event(&BundleEvent::ContactUp { contact });
        assert!(!f.router.has_reroute_timer("l1"));

        assert_eq!(f.timers.advance(Duration::from_secs(60)), 0);
        assert_eq!(f.clayer.cancel_count(), 0);
    }

    #[test]
    fn test_stale_reroute_timeout_ignored() {
        let mut f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        l1.queue().push_back(bundle(&f, 1, "dtn://host/app"));

        f.router.handle_event(&BundleEvent::RerouteTimeout {
            link: l1.clone(),
            generation: 42,
        });
        assert_eq!(f.clayer.cancel_count(), 0);
    }

    #[test]
    fn test_nexthop_route_picks_up_pending() {
        let mut f = fixture(RouterConfig::default());
        let b = bundle(&f, 1, "dtn://n1/app");
        let l1 = link(&f, "l1", "dtn://n1");
        open(&l1);

        f.router.handle_event(&BundleEvent::LinkCreated {
            link: l1.clone(),
            reason: ContactReason::User,
        });
        assert!(f.router.route_table().contains(&pattern("dtn://n1/*"), &l1));
        assert_eq!(f.clayer.sent_on("l1"), vec![BundleId(1)]);

        assert!(!f.router.add_nexthop_route(&l1));

        f.router.handle_event(&BundleEvent::LinkDeleted {
            link: l1.clone(),
            reason: ContactReason::User,
        });
        assert!(f.router.route_table().is_empty());
    }

    #[test]
    fn test_discovered_link_opened() {
        let mut f = fixture(RouterConfig::default());
        let l = Link::new(
            "opp",
            LinkType::Opportunistic,
            f.clayer.clone(),
            "host",
            EndpointId::parse("dtn://n9").unwrap(),
            LinkParams::default(),
        );
        l.set_state(LinkState::Available).unwrap();

        f.router.handle_event(&BundleEvent::LinkAvailable {
            link: l.clone(),
            reason: ContactReason::Discovery,
        });
        assert_eq!(l.state(), LinkState::Opening);
        assert!(f.clayer.calls().contains(&ClCall::OpenContact("opp".into())));
    }

    #[test]
    fn test_route_add_and_del_events() {
        let mut f = fixture(RouterConfig::static_routes());
        let l1 = link(&f, "l1", "dtn://n1");
        open(&l1);
        let b = bundle(&f, 1, "dtn://host/app");

        f.router.handle_event(&BundleEvent::RouteAdd {
            entry: RouteEntry::new(pattern("dtn://host/*"), l1.clone()),
        });
        assert_eq!(f.clayer.sent_on("l1"), vec![b.id()]);

        f.router.handle_event(&BundleEvent::RouteDel {
            dest: pattern("dtn://host/*"),
            link_name: None,
        });
        assert!(f.router.route_table().is_empty());
    }
}
