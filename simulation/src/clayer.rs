//! Simulated convergence layer
//!
//! Every node of a simulated topology attaches to one [`SimFabric`]. Sends
//! are held in transit until the fabric is flushed, so a link can be cut
//! while bundles are still on the wire. Flushing posts `BundleTransmitted`
//! to the sender and a fresh copy of the bundle to the receiver.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use ferry_core::{
    Bundle, BundleEvent, BundleId, BundleIdAllocator, BundleRef, ContactRef, ConvergenceLayer,
    ConvergenceLayerError, EndpointId, EventQueue, EventSource, LinkRef,
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

/// Receiving side of a node
#[derive(Clone)]
struct Inbox {
    eid: EndpointId,
    events: EventQueue,
    ids: Arc<BundleIdAllocator>,
}

/// A bundle handed to the fabric and not yet delivered
struct Transmission {
    from: String,
    to: String,
    link: LinkRef,
    bundle: BundleRef,
}

/// Shared medium connecting simulated nodes by name
#[derive(Default)]
pub struct SimFabric {
    inboxes: DashMap<String, Inbox>,
    /// Unordered node pairs that cannot reach each other
    cut: Mutex<HashSet<(String, String)>>,
    in_transit: Mutex<VecDeque<Transmission>>,
}

impl SimFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a node; received bundles get ids from `ids`
    pub fn attach(
        &self,
        node: impl Into<String>,
        eid: EndpointId,
        events: EventQueue,
        ids: Arc<BundleIdAllocator>,
    ) {
        self.inboxes.insert(node.into(), Inbox { eid, events, ids });
    }

    pub fn set_reachable(&self, a: &str, b: &str, reachable: bool) {
        let key = pair(a, b);
        let mut cut = self.cut.lock();
        if reachable {
            cut.remove(&key);
        } else {
            cut.insert(key);
        }
    }

    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        self.inboxes.contains_key(from)
            && self.inboxes.contains_key(to)
            && !self.cut.lock().contains(&pair(from, to))
    }

    pub fn in_transit(&self) -> usize {
        self.in_transit.lock().len()
    }

    /// Post an event to a node's queue
    pub fn post(&self, node: &str, event: BundleEvent) {
        match self.inboxes.get(node) {
            Some(inbox) => inbox.events.post(event),
            None => warn!(node, "event for unknown node dropped"),
        }
    }

    fn enqueue(&self, transmission: Transmission) {
        trace!(
            from = %transmission.from,
            to = %transmission.to,
            bundle_id = transmission.bundle.id().0,
            "bundle in transit"
        );
        self.in_transit.lock().push_back(transmission);
    }

    /// Drop transmissions on a link, returning how many were dropped
    fn drop_link(&self, from: &str, link_name: &str) -> usize {
        let mut in_transit = self.in_transit.lock();
        let before = in_transit.len();
        in_transit.retain(|t| !(t.from == from && t.link.name() == link_name));
        before - in_transit.len()
    }

    fn remove(&self, from: &str, link_name: &str, bundle: BundleId) -> bool {
        let mut in_transit = self.in_transit.lock();
        let before = in_transit.len();
        in_transit.retain(|t| {
            !(t.from == from && t.link.name() == link_name && t.bundle.id() == bundle)
        });
        before != in_transit.len()
    }

    /// Complete every transmission in transit
    ///
    /// Transmissions between nodes that are no longer reachable fail.
    /// Returns the number of bundles delivered.
    pub fn flush(&self) -> usize {
        let transmissions: Vec<_> = self.in_transit.lock().drain(..).collect();
        let mut delivered = 0;

        for t in transmissions {
            let (Some(sender), Some(receiver)) = (
                self.inboxes.get(&t.from).map(|i| i.clone()),
                self.inboxes.get(&t.to).map(|i| i.clone()),
            ) else {
                warn!(from = %t.from, to = %t.to, "transmission between unknown nodes dropped");
                continue;
            };

            if !self.is_reachable(&t.from, &t.to) {
                debug!(from = %t.from, to = %t.to, bundle_id = t.bundle.id().0, "transmission failed");
                sender.events.post(BundleEvent::BundleTransmitFailed {
                    bundle: t.bundle,
                    link: t.link,
                });
                continue;
            }

            let copy = Bundle::new(
                receiver.ids.next_id(),
                t.bundle.source().clone(),
                t.bundle.dest().clone(),
            )
            .with_creation(t.bundle.creation_time(), t.bundle.creation_seqno())
            .with_lifetime(t.bundle.lifetime())
            .with_payload(t.bundle.payload().clone())
            .with_prevhop(sender.eid.clone())
            .with_custody_requested(t.bundle.custody_requested())
            .into_ref();

            sender.events.post(BundleEvent::BundleTransmitted {
                bytes_sent: t.bundle.payload_len(),
                bundle: t.bundle,
                link: t.link,
            });
            receiver.events.post(BundleEvent::BundleReceived {
                bundle: copy,
                source: EventSource::Peer,
                link_name: None,
            });
            delivered += 1;
        }
        delivered
    }
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Per-contact session state
#[derive(Debug)]
pub struct SimSession {
    pub peer: String,
}

/// Convergence layer of one simulated node
///
/// A link's nexthop is the name of the peer node on the fabric.
pub struct SimConvergenceLayer {
    node: String,
    fabric: Arc<SimFabric>,
}

impl SimConvergenceLayer {
    pub fn new(node: impl Into<String>, fabric: Arc<SimFabric>) -> Self {
        Self {
            node: node.into(),
            fabric,
        }
    }
}

impl ConvergenceLayer for SimConvergenceLayer {
    fn name(&self) -> &str {
        "sim"
    }

    fn open_contact(&self, contact: &ContactRef) -> Result<(), ConvergenceLayerError> {
        let link = contact.link().ok_or(ConvergenceLayerError::OrphanContact)?;
        let peer = link.nexthop();

        if !self.fabric.is_reachable(&self.node, peer) {
            return Err(ConvergenceLayerError::SessionFailed(format!(
                "{} unreachable from {}",
                peer, self.node
            )));
        }

        contact
            .set_cl_info(Box::new(SimSession {
                peer: peer.to_string(),
            }))
            .map_err(|e| ConvergenceLayerError::SessionFailed(e.to_string()))?;

        debug!(node = %self.node, %peer, link = %link.name(), "session established");
        self.fabric.post(
            &self.node,
            BundleEvent::ContactUp {
                contact: contact.clone(),
            },
        );
        Ok(())
    }

    fn close_contact(&self, contact: &ContactRef) {
        let dropped = self.fabric.drop_link(&self.node, contact.link_name());
        if dropped > 0 {
            debug!(node = %self.node, link = %contact.link_name(), dropped, "session closed with bundles in transit");
        }
        if contact.has_cl_info() {
            let _ = contact.clear_cl_info();
        }
    }

    fn send_bundle(&self, contact: &ContactRef, bundle: &BundleRef) {
        let Some(link) = contact.link() else {
            warn!(node = %self.node, "send on contact without link");
            return;
        };

        self.fabric.enqueue(Transmission {
            from: self.node.clone(),
            to: link.nexthop().to_string(),
            link,
            bundle: bundle.clone(),
        });
    }

    fn send_bundle_on_down_link(&self, _link: &LinkRef, _bundle: &BundleRef) -> bool {
        false
    }

    fn cancel_bundle(&self, link: &LinkRef, bundle: &BundleRef) -> bool {
        self.fabric.remove(&self.node, link.name(), bundle.id());
        self.fabric.post(
            &self.node,
            BundleEvent::BundleSendCancelled {
                bundle: bundle.clone(),
                link: link.clone(),
            },
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{Link, LinkParams, LinkState, LinkType};

    fn attach(fabric: &SimFabric, name: &str) -> EventQueue {
        let events = EventQueue::new();
        fabric.attach(
            name,
            EndpointId::parse(format!("dtn://{}", name)).unwrap(),
            events.clone(),
            Arc::new(BundleIdAllocator::new()),
        );
        events
    }

    fn link_to(fabric: &Arc<SimFabric>, from: &str, to: &str) -> LinkRef {
        let link = Link::new(
            format!("to-{}", to),
            LinkType::OnDemand,
            Arc::new(SimConvergenceLayer::new(from, fabric.clone())),
            to,
            EndpointId::parse(format!("dtn://{}", to)).unwrap(),
            LinkParams::default(),
        );
        link.set_state(LinkState::Available).unwrap();
        link
    }

    fn open(link: &LinkRef) -> ContactRef {
        link.open().unwrap();
        link.contact().unwrap()
    }

    #[test]
    fn test_open_refused_when_unreachable() {
        let fabric = SimFabric::new();
        attach(&fabric, "a");
        attach(&fabric, "b");
        fabric.set_reachable("b", "a", false);
        assert!(!fabric.is_reachable("a", "b"));

        let link = link_to(&fabric, "a", "b");
        assert!(link.open().is_err());
        assert!(link.contact().is_none());
    }

    #[test]
    fn test_flush_delivers_copy() {
        let fabric = SimFabric::new();
        let a_events = attach(&fabric, "a");
        let b_events = attach(&fabric, "b");

        let link = link_to(&fabric, "a", "b");
        let contact = open(&link);
        assert_eq!(a_events.pending_names(), vec!["CONTACT_UP"]);
        while a_events.try_next().is_some() {}

        let bundle = Bundle::new(
            BundleId(9),
            EndpointId::parse("dtn://a/src").unwrap(),
            EndpointId::parse("dtn://b/app").unwrap(),
        )
        .with_payload(&b"hello"[..])
        .into_ref();
        link.clayer().send_bundle(&contact, &bundle);
        assert_eq!(fabric.in_transit(), 1);

        assert_eq!(fabric.flush(), 1);
        assert_eq!(a_events.pending_names(), vec!["BUNDLE_TRANSMITTED"]);
        match b_events.try_next() {
            Some(BundleEvent::BundleReceived { bundle: copy, .. }) => {
                assert_eq!(copy.id(), BundleId(0));
                assert_eq!(copy.fingerprint(), bundle.fingerprint());
                assert_eq!(copy.prevhop().as_str(), "dtn://a");
                assert_eq!(copy.payload().as_ref(), b"hello");
            }
            other => panic!("unexpected event {:?}", other),
        }

        link.close().unwrap();
        assert!(!contact.has_cl_info());
    }

    #[test]
    fn test_cut_fails_transmission_and_close_drops_it() {
        let fabric = SimFabric::new();
        let a_events = attach(&fabric, "a");
        attach(&fabric, "b");

        let link = link_to(&fabric, "a", "b");
        let contact = open(&link);
        while a_events.try_next().is_some() {}

        let bundle = Bundle::new(
            BundleId(1),
            EndpointId::parse("dtn://a/src").unwrap(),
            EndpointId::parse("dtn://b/app").unwrap(),
        )
        .into_ref();
        link.clayer().send_bundle(&contact, &bundle);
        fabric.set_reachable("a", "b", false);
        assert_eq!(fabric.flush(), 0);
        assert_eq!(a_events.pending_names(), vec!["BUNDLE_TRANSMIT_FAILED"]);

        link.clayer().send_bundle(&contact, &bundle);
        link.close().unwrap();
        assert_eq!(fabric.in_transit(), 0);
    }
}
