//! Forwarding policy hooks
//!
//! The table-based router delegates two decisions to a [`RoutingPolicy`]:
//! whether a matching route should be used for a bundle, and in which order
//! candidate routes are tried.

use ferry_core::{Bundle, ForwardAction, ForwardingState, RouteEntry};
use tracing::trace;

/// Strategy plugged into the table-based router
pub trait RoutingPolicy: Send + Sync {
    /// Decide whether the bundle should be forwarded on this route
    fn should_fwd(&self, bundle: &Bundle, route: &RouteEntry) -> bool;

    /// Order candidate routes, first tried first
    fn sort_routes(&self, bundle: &Bundle, routes: &mut Vec<RouteEntry>);
}

/// Priority ordering with the standard forwarding checks
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl RoutingPolicy for DefaultPolicy {
    fn should_fwd(&self, bundle: &Bundle, route: &RouteEntry) -> bool {
        let link = &route.link;

        let remote = link.remote_eid();
        if !remote.is_null() && bundle.prevhop() == remote {
            trace!(bundle_id = bundle.id().0, link = %link.name(), "not forwarding back to previous hop");
            return false;
        }

        let log = bundle.fwdlog();

        if let Some(state) = log.latest_state(link.name())
            && matches!(state, ForwardingState::InFlight | ForwardingState::Transmitted)
        {
            trace!(bundle_id = bundle.id().0, link = %link.name(), %state, "already sent on link");
            return false;
        }

        if route.action == ForwardAction::Forward
            && log.get_count(
                &[ForwardingState::InFlight, ForwardingState::Transmitted],
                &[ForwardAction::Forward],
            ) > 0
        {
            trace!(bundle_id = bundle.id().0, link = %link.name(), "already forwarded elsewhere");
            return false;
        }

        true
    }

    fn sort_routes(&self, _bundle: &Bundle, routes: &mut Vec<RouteEntry>) {
        // stable, so equal priorities keep table order
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ferry_core::{
        BundleId, CustodyTimerSpec, EndpointId, EndpointIdPattern, Link, LinkParams, LinkRef,
        LinkType, MockConvergenceLayer,
    };

    fn link(name: &str, remote: &str) -> LinkRef {
        Link::new(
            name,
            LinkType::OnDemand,
            Arc::new(MockConvergenceLayer::new()),
            "host",
            EndpointId::parse(remote).unwrap(),
            LinkParams::default(),
        )
    }

    fn bundle() -> Bundle {
        Bundle::new(
            BundleId(1),
            EndpointId::parse("dtn://src/app").unwrap(),
            EndpointId::parse("dtn://dst/app").unwrap(),
        )
    }

    fn route(link: LinkRef, action: ForwardAction, priority: u32) -> RouteEntry {
        RouteEntry::new(EndpointIdPattern::wildcard(), link)
            .with_action(action)
            .with_priority(priority)
    }

    #[test]
    fn test_rejects_in_flight_on_same_link() {
        let b = bundle();
        let l1 = link("l1", "dtn://n1");
        let r = route(l1.clone(), ForwardAction::Copy, 0);
        assert!(DefaultPolicy.should_fwd(&b, &r));

        b.fwdlog().add_entry(
            "l1",
            l1.remote_eid().clone(),
            ForwardAction::Copy,
            ForwardingState::InFlight,
            CustodyTimerSpec::default(),
        );
        assert!(!DefaultPolicy.should_fwd(&b, &r));

        b.fwdlog().update("l1", ForwardingState::Cancelled);
        assert!(DefaultPolicy.should_fwd(&b, &r));
    }

    #[test]
    fn test_forward_only_once() {
        let b = bundle();
        b.fwdlog().add_entry(
            "l1",
            EndpointId::null(),
            ForwardAction::Forward,
            ForwardingState::Transmitted,
            CustodyTimerSpec::default(),
        );

        let l2 = link("l2", "dtn://n2");
        assert!(!DefaultPolicy.should_fwd(&b, &route(l2.clone(), ForwardAction::Forward, 0)));
        // copies are still allowed
        assert!(DefaultPolicy.should_fwd(&b, &route(l2, ForwardAction::Copy, 0)));
    }

    #[test]
    fn test_rejects_previous_hop() {
        let b = bundle().with_prevhop(EndpointId::parse("dtn://n1").unwrap());
        assert!(!DefaultPolicy.should_fwd(&b, &route(link("l1", "dtn://n1"), ForwardAction::Forward, 0)));
        assert!(DefaultPolicy.should_fwd(&b, &route(link("l2", "dtn://n2"), ForwardAction::Forward, 0)));
    }

    #[test]
    fn test_sort_descending_stable() {
        let b = bundle();
        let mut routes = vec![
            route(link("a", "dtn://a"), ForwardAction::Forward, 2),
            route(link("b", "dtn://b"), ForwardAction::Forward, 5),
            route(link("c", "dtn://c"), ForwardAction::Forward, 2),
        ];
        DefaultPolicy.sort_routes(&b, &mut routes);
        let names: Vec<_> = routes.iter().map(|r| r.link.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
