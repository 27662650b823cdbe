//! A topology of daemons sharing one simulated clock and fabric

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ferry_core::{
    BundleEvent, BundleId, BundleRef, ContactReason, DaemonNotification, DeletionReason,
    EndpointId, EndpointIdPattern, EventQueue, ForwardAction, LinkParams, LinkRef, LinkType,
    ManualTimers, RouteEntry,
};
use ferry_daemon::{Daemon, DaemonConfig};
use ferry_logging::{NodeContextGuard, NodeKind};
use ferry_storage::InMemoryBundleStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clayer::{SimConvergenceLayer, SimFabric};
use crate::error::{SimError, SimResult};

/// Upper bound on settle rounds before the topology is declared livelocked
const MAX_SETTLE_ROUNDS: usize = 10_000;

/// What a node has observed so far
#[derive(Debug, Clone, Default)]
pub struct NodeStats {
    /// (regid, bundle id) per local delivery
    pub delivered: Vec<(u32, BundleId)>,
    pub deleted: BTreeMap<DeletionReason, usize>,
}

impl NodeStats {
    pub fn deleted_for(&self, reason: DeletionReason) -> usize {
        self.deleted.get(&reason).copied().unwrap_or(0)
    }
}

/// One daemon in the topology
pub struct SimNode {
    name: String,
    daemon: Daemon,
    timers: Arc<ManualTimers>,
    clayer: Arc<SimConvergenceLayer>,
    notifications: broadcast::Receiver<DaemonNotification>,
    stats: NodeStats,
}

impl SimNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn link(&self, name: &str) -> Option<LinkRef> {
        self.daemon.contact_manager().find(name)
    }

    fn process(&mut self) -> usize {
        let _ctx = NodeContextGuard::new(&self.daemon.config().local_eid, NodeKind::Simulated);
        let handled = self.daemon.process_pending();
        self.drain_notifications();
        handled
    }

    fn drain_notifications(&mut self) {
        loop {
            match self.notifications.try_recv() {
                Ok(DaemonNotification::BundleDelivered {
                    bundle_id, regid, ..
                }) => self.stats.delivered.push((regid, bundle_id)),
                Ok(DaemonNotification::BundleDeleted { reason, .. }) => {
                    *self.stats.deleted.entry(reason).or_default() += 1;
                }
                Ok(DaemonNotification::LinkStateChanged { .. }) => {}
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(node = %self.name, missed, "notifications lost");
                }
                Err(_) => break,
            }
        }
    }
}

/// Daemons connected through a [`SimFabric`], driven by a manual clock
pub struct SimNetwork {
    fabric: Arc<SimFabric>,
    nodes: BTreeMap<String, SimNode>,
    elapsed: Duration,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            fabric: SimFabric::new(),
            nodes: BTreeMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Simulated time since the network was created
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn fabric(&self) -> &Arc<SimFabric> {
        &self.fabric
    }

    /// Add a node with endpoint id `dtn://<name>`
    pub fn add_node(&mut self, name: &str) -> SimResult<&SimNode> {
        self.add_node_with(name, |config| config)
    }

    /// Add a node, adjusting its configuration first
    pub fn add_node_with(
        &mut self,
        name: &str,
        configure: impl FnOnce(DaemonConfig) -> DaemonConfig,
    ) -> SimResult<&SimNode> {
        if self.nodes.contains_key(name) {
            return Err(SimError::DuplicateNode(name.to_string()));
        }

        let eid = node_eid(name)?;
        let events = EventQueue::new();
        let timers = Arc::new(ManualTimers::new(events.clone()));
        let config = configure(DaemonConfig::with_local_eid(eid.clone()));
        let daemon = Daemon::new(
            config,
            Arc::new(InMemoryBundleStore::new()),
            timers.clone(),
            events.clone(),
        );

        self.fabric.attach(name, eid, events, daemon.id_allocator());
        let node = SimNode {
            name: name.to_string(),
            clayer: Arc::new(SimConvergenceLayer::new(name, self.fabric.clone())),
            notifications: daemon.subscribe(),
            daemon,
            timers,
            stats: NodeStats::default(),
        };
        info!(node = name, "node added");

        Ok(&*self.nodes.entry(name.to_string()).or_insert(node))
    }

    pub fn node(&self, name: &str) -> SimResult<&SimNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    /// Create link `to-<to>` on `from`; its nexthop is the node `to`
    pub fn connect(
        &mut self,
        from: &str,
        to: &str,
        link_type: LinkType,
        params: LinkParams,
    ) -> SimResult<LinkRef> {
        self.node(to)?;
        let remote = node_eid(to)?;
        let node = self.node(from)?;
        let link = node.daemon.contact_manager().create_link(
            link_name(to),
            link_type,
            node.clayer.clone(),
            to,
            remote,
            params,
        )?;
        self.settle()?;
        Ok(link)
    }

    /// Route `dest` through the link from `node` to `via`
    pub fn add_route(&mut self, node: &str, dest: &str, via: &str, priority: u32) -> SimResult<()> {
        self.add_route_with(node, dest, via, priority, ForwardAction::Forward)
    }

    pub fn add_route_with(
        &mut self,
        node: &str,
        dest: &str,
        via: &str,
        priority: u32,
        action: ForwardAction,
    ) -> SimResult<()> {
        let pattern = EndpointIdPattern::parse(dest)?;
        let sim_node = self.node(node)?;
        let link = sim_node
            .link(&link_name(via))
            .ok_or_else(|| SimError::UnknownLink(format!("{}:{}", node, link_name(via))))?;

        sim_node.daemon.events().post(BundleEvent::RouteAdd {
            entry: RouteEntry::new(pattern, link)
                .with_priority(priority)
                .with_action(action),
        });
        self.settle()?;
        Ok(())
    }

    pub fn register(&mut self, node: &str, regid: u32, endpoint: &str) -> SimResult<()> {
        let endpoint = EndpointIdPattern::parse(endpoint)?;
        self.node(node)?
            .daemon
            .events()
            .post(BundleEvent::RegistrationAdded { regid, endpoint });
        self.settle()?;
        Ok(())
    }

    /// Inject a bundle from `dtn://<from>/app`
    ///
    /// Events are not processed until the next settle.
    pub fn send(&mut self, from: &str, dest: &str, payload: impl Into<Bytes>) -> SimResult<BundleRef> {
        let dest = EndpointId::parse(dest)?;
        let source = EndpointId::parse(format!("dtn://{}/app", from))?;
        Ok(self.node(from)?.daemon.inject(source, dest, payload))
    }

    /// Cut or restore reachability between two nodes
    ///
    /// Cutting breaks every open contact between them.
    pub fn set_reachable(&mut self, a: &str, b: &str, reachable: bool) -> SimResult<()> {
        self.node(a)?;
        self.node(b)?;
        info!(a, b, reachable, "reachability changed");
        self.fabric.set_reachable(a, b, reachable);

        if !reachable {
            for (node, peer) in [(a, b), (b, a)] {
                let sim_node = self.node(node)?;
                if let Some(contact) = sim_node.link(&link_name(peer)).and_then(|l| l.contact()) {
                    sim_node.daemon.events().post(BundleEvent::ContactDown {
                        contact,
                        reason: ContactReason::Broken,
                    });
                }
            }
        }
        Ok(())
    }

    /// Move every node's clock forward, then settle
    pub fn advance(&mut self, by: Duration) -> SimResult<usize> {
        self.elapsed += by;
        for node in self.nodes.values() {
            node.timers.advance(by);
        }
        self.settle()
    }

    /// Process events and flush the fabric until nothing is left to do
    ///
    /// Returns the number of events handled.
    pub fn settle(&mut self) -> SimResult<usize> {
        let mut handled = 0;
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut progress = 0;
            for node in self.nodes.values_mut() {
                progress += node.process();
            }
            progress += self.fabric.flush();

            if progress == 0 {
                debug!(handled, "network settled");
                return Ok(handled);
            }
            handled += progress;
        }
        Err(SimError::NoQuiescence(MAX_SETTLE_ROUNDS))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

pub fn link_name(peer: &str) -> String {
    format!("to-{}", peer)
}

fn node_eid(name: &str) -> SimResult<EndpointId> {
    Ok(EndpointId::parse(format!("dtn://{}", name))?)
}
