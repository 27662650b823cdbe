//! Node context injection for multi-node logging
//!
//! Several daemons can share one process (the simulator runs a whole
//! topology). A thread-local context records which node is currently
//! processing so that spans opened in that scope carry its endpoint id.

use std::cell::RefCell;

use ferry_core::EndpointId;
use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone)]
pub struct NodeContextData {
    /// Local endpoint id of the node
    pub node_eid: String,
    pub node_kind: NodeKind,
    /// Unique id for this node session
    pub instance_id: Uuid,
}

/// Where the node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Node driven by the simulator
    Simulated,
    /// Standalone daemon
    Daemon,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Simulated => write!(f, "simulated"),
            NodeKind::Daemon => write!(f, "daemon"),
        }
    }
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Sets the node context for the current thread and restores the previous
/// one when dropped.
///
/// ```ignore
/// let eid = EndpointId::parse("dtn://alpha")?;
/// let _guard = NodeContextGuard::new(&eid, NodeKind::Simulated);
/// tracing::info!("processing event");
/// ```
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    pub fn new(eid: &EndpointId, kind: NodeKind) -> Self {
        Self::with_instance_id(eid, kind, Uuid::new_v4())
    }

    /// Guard with a fixed instance id, kept stable across restarts
    pub fn with_instance_id(eid: &EndpointId, kind: NodeKind, instance_id: Uuid) -> Self {
        let data = NodeContextData {
            node_eid: eid.to_string(),
            node_kind: kind,
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node_eid() -> Option<String> {
        Self::current().map(|ctx| ctx.node_eid)
    }

    pub fn current_instance_id() -> Option<Uuid> {
        Self::current().map(|ctx| ctx.instance_id)
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Run a block with a node context set
///
/// ```ignore
/// with_node_context!(&eid, NodeKind::Daemon, {
///     tracing::info!("processing event");
/// });
/// ```
#[macro_export]
macro_rules! with_node_context {
    ($eid:expr, $kind:expr, $body:block) => {{
        let _guard = $crate::context::NodeContextGuard::new($eid, $kind);
        $body
    }};
}
