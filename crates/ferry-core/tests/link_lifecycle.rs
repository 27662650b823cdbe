//! Link and contact lifecycle across repeated open/close cycles

use std::sync::Arc;
use std::time::Duration;

use ferry_core::{
    BundleEvent, ClCall, EndpointId, EventQueue, Link, LinkParams, LinkState, LinkType,
    ManualTimers, MockConvergenceLayer, TimerService,
};

fn on_demand(clayer: Arc<MockConvergenceLayer>) -> Arc<Link> {
    let link = Link::new(
        "ondemand",
        LinkType::OnDemand,
        clayer,
        "192.168.1.7:4556",
        EndpointId::parse("dtn://neighbor").unwrap(),
        LinkParams::default(),
    );
    link.set_state(LinkState::Available).unwrap();
    link
}

#[test]
fn test_repeated_cycles_keep_single_contact() {
    let events = EventQueue::new();
    let clayer = Arc::new(MockConvergenceLayer::new().with_auto_contact_up(events.clone()));
    let link = on_demand(clayer.clone());

    for cycle in 0..3 {
        link.open().unwrap();
        let contact = link.contact().unwrap();
        assert!(contact.has_cl_info(), "cycle {cycle}: info set after open");

        // the layer reported contact-up for this contact
        match events.try_next() {
            Some(BundleEvent::ContactUp { contact: up }) => {
                assert!(Arc::ptr_eq(&up, &contact));
            }
            other => panic!("expected contact up, got {:?}", other.map(|e| e.name())),
        }

        link.set_state(LinkState::Open).unwrap();
        assert!(link.is_open());

        link.close().unwrap();
        assert!(link.contact().is_none());
        assert!(!contact.has_cl_info(), "cycle {cycle}: info cleared after close");

        link.set_state(LinkState::Unavailable).unwrap();
        link.set_state(LinkState::Available).unwrap();
    }

    let opens = clayer
        .calls()
        .iter()
        .filter(|c| matches!(c, ClCall::OpenContact(_)))
        .count();
    assert_eq!(opens, 3);
    assert_eq!(link.stats().contact_attempts, 3);
}

#[test]
fn test_deleted_link_refuses_open() {
    let link = on_demand(Arc::new(MockConvergenceLayer::new()));
    link.set_deleted();
    assert!(link.open().is_err());
    assert_eq!(link.state(), LinkState::Available);
}

#[test]
fn test_manual_timers_post_reconnect() {
    let events = EventQueue::new();
    let timers = ManualTimers::new(events.clone());
    let link = on_demand(Arc::new(MockConvergenceLayer::new()));

    let retry = link.backoff_retry_interval();
    timers.schedule(
        retry,
        BundleEvent::LinkAvailable {
            link: link.clone(),
            reason: ferry_core::ContactReason::Reconnect,
        },
    );

    timers.advance(Duration::from_secs(4));
    assert!(events.is_empty());
    timers.advance(Duration::from_secs(1));
    assert_eq!(events.pending_names(), vec!["LINK_AVAILABLE"]);
    assert_eq!(link.retry_interval(), Duration::from_secs(10));
}
