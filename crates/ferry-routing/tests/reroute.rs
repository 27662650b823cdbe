//! Reroute and duplicate suppression behavior through the public router API

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ferry_core::{
    Bundle, BundleEvent, BundleId, BundleList, BundleRef, ContactReason, EndpointId,
    EndpointIdPattern, EventQueue, EventSource, ForwardingState, Link, LinkParams, LinkRef,
    LinkState, LinkType, ManualTimers, MockConvergenceLayer, RouteEntry,
};
use ferry_routing::{ActionsConfig, DaemonActions, RouterConfig, TableBasedRouter};
use ferry_storage::InMemoryBundleStore;

struct Harness {
    router: TableBasedRouter,
    events: EventQueue,
    timers: Arc<ManualTimers>,
    pending: Arc<BundleList>,
    clayer: Arc<MockConvergenceLayer>,
}

impl Harness {
    fn new(config: RouterConfig) -> Self {
        let events = EventQueue::new();
        let pending = Arc::new(BundleList::new("pending"));
        let timers = Arc::new(ManualTimers::new(events.clone()));
        let actions = Arc::new(DaemonActions::new(
            Arc::new(InMemoryBundleStore::new()),
            pending.clone(),
            ActionsConfig::default(),
        ));
        let router = TableBasedRouter::new(
            config,
            actions,
            pending.clone(),
            timers.clone(),
            events.clone(),
        );

        Self {
            router,
            clayer: Arc::new(MockConvergenceLayer::new().with_events(events.clone())),
            events,
            timers,
            pending,
        }
    }

    fn open_link(&self, name: &str, downtime: Duration) -> LinkRef {
        let link = Link::new(
            name,
            LinkType::OnDemand,
            self.clayer.clone(),
            "10.0.0.1:4556",
            EndpointId::parse(format!("dtn://{}", name)).unwrap(),
            LinkParams::default().with_potential_downtime(downtime),
        );
        link.set_state(LinkState::Available).unwrap();
        link.open().unwrap();
        link.set_state(LinkState::Open).unwrap();
        link
    }

    fn pending_bundle(&self, id: u32) -> BundleRef {
        let bundle = Bundle::new(
            BundleId(id),
            EndpointId::parse("dtn://src/app").unwrap(),
            EndpointId::parse("dtn://host/app").unwrap(),
        )
        .into_ref();
        self.pending.push_back(bundle.clone());
        bundle
    }

    /// Feed queued events back into the router until the queue is empty
    fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_next() {
            self.router.handle_event(&event);
            handled += 1;
        }
        handled
    }
}

fn route(link: &LinkRef, priority: u32) -> RouteEntry {
    RouteEntry::new(EndpointIdPattern::parse("dtn://host/*").unwrap(), link.clone())
        .with_priority(priority)
}

#[test]
fn test_reroute_issues_one_cancel_per_queued_bundle() {
    for n in 1..=5u32 {
        let mut h = Harness::new(RouterConfig::static_routes());
        let link = h.open_link("l1", Duration::from_secs(30));
        h.router.route_table().add_entry(route(&link, 0)).unwrap();

        for id in 1..=n {
            let bundle = h.pending_bundle(id);
            assert_eq!(h.router.forward_to_matching(&bundle, None), 1);
        }
        assert_eq!(link.queue().len(), n as usize);

        let contact = link.contact().unwrap();
        link.close().unwrap();
        link.set_state(LinkState::Unavailable).unwrap();
        h.router.handle_event(&BundleEvent::ContactDown {
            contact,
            reason: ContactReason::Broken,
        });

        // not yet due
        assert_eq!(h.timers.advance(Duration::from_secs(29)), 0);
        assert_eq!(h.timers.advance(Duration::from_secs(1)), 1);
        h.drain();

        assert_eq!(h.clayer.cancel_count(), n as usize);
        assert!(!h.router.has_reroute_timer("l1"));
        assert_eq!(h.router.reroute_timer_count(), 0);
        assert_eq!(link.stats().bundles_cancelled, n as u64);
    }
}

#[test]
fn test_cancelled_bundles_move_to_alternate_link() {
    let mut h = Harness::new(RouterConfig::static_routes());
    let primary = h.open_link("primary", Duration::from_secs(5));
    h.router.route_table().add_entry(route(&primary, 10)).unwrap();

    let bundle = h.pending_bundle(1);
    assert_eq!(h.router.forward_to_matching(&bundle, None), 1);

    let contact = primary.contact().unwrap();
    primary.close().unwrap();
    primary.set_state(LinkState::Unavailable).unwrap();
    h.router.handle_event(&BundleEvent::ContactDown {
        contact,
        reason: ContactReason::Broken,
    });

    let backup = h.open_link("backup", Duration::from_secs(5));
    h.router.route_table().add_entry(route(&backup, 1)).unwrap();

    h.timers.advance(Duration::from_secs(5));
    h.drain();

    let log = bundle.fwdlog();
    assert_eq!(log.latest_state("primary"), Some(ForwardingState::Cancelled));
    assert_eq!(log.latest_state("backup"), Some(ForwardingState::InFlight));
    drop(log);
    assert_eq!(h.clayer.sent_on("backup"), vec![BundleId(1)]);
}

#[test]
fn test_dupcache_forwards_once() {
    let mut h = Harness::new(RouterConfig::static_routes());
    assert_eq!(h.router.config().dupcache_size, 1024);
    let link = h.open_link("l1", Duration::from_secs(30));
    h.router.route_table().add_entry(route(&link, 0)).unwrap();

    let created = Utc::now();
    for id in [1, 2] {
        let bundle = Bundle::new(
            BundleId(id),
            EndpointId::parse("dtn://src/app").unwrap(),
            EndpointId::parse("dtn://host/app").unwrap(),
        )
        .with_creation(created, 3)
        .into_ref();
        h.pending.push_back(bundle.clone());
        h.router.handle_event(&BundleEvent::BundleReceived {
            bundle,
            source: EventSource::Peer,
            link_name: None,
        });
    }

    assert_eq!(h.clayer.sent_on("l1"), vec![BundleId(1)]);
    let names = h.events.pending_names();
    assert_eq!(names, vec!["BUNDLE_NOT_NEEDED"]);
}
