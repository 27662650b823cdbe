//! Collaborator interfaces consumed by the control plane

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::bundle::{Bundle, BundleId, BundleRef};
use crate::contact::ContactRef;
use crate::error::{ConvergenceLayerError, StoreError};
use crate::event::BundleEvent;
use crate::link::{Link, LinkRef};

/// A transport plugin moving bundles between nodes
///
/// Sessions run on their own workers and report back only by posting
/// events (contact up/down, bundle transmitted/received). Implementations
/// must not touch link state or forwarding logs directly.
pub trait ConvergenceLayer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Validate a newly created link
    fn init_link(&self, _link: &Link) -> Result<(), ConvergenceLayerError> {
        Ok(())
    }

    /// Release any per-link state when a link is deleted
    fn delete_link(&self, _link: &Link) {}

    /// Start establishing a session for the contact
    ///
    /// Success is signalled later with a contact-up event.
    fn open_contact(&self, contact: &ContactRef) -> Result<(), ConvergenceLayerError>;

    /// Tear down the session; must clear the contact's info slot
    fn close_contact(&self, contact: &ContactRef);

    /// Transmit on an open contact
    fn send_bundle(&self, contact: &ContactRef, bundle: &BundleRef);

    /// Queue on a link that is currently down
    ///
    /// Only called when [`has_persistent_link_queues`](Self::has_persistent_link_queues)
    /// is true.
    fn send_bundle_on_down_link(&self, link: &LinkRef, bundle: &BundleRef) -> bool;

    /// Best-effort cancellation of a queued or in-flight transmission
    fn cancel_bundle(&self, link: &LinkRef, bundle: &BundleRef) -> bool;

    /// Whether the layer keeps its own queue across link down/up
    fn has_persistent_link_queues(&self) -> bool {
        false
    }
}

/// Persistent bundle storage keyed by 32-bit id
pub trait BundleStore: Send + Sync {
    fn add(&self, bundle: &BundleRef) -> Result<(), StoreError>;

    fn get(&self, id: BundleId) -> Result<Option<BundleRef>, StoreError>;

    fn update(&self, bundle: &BundleRef) -> Result<(), StoreError>;

    fn del(&self, id: BundleId) -> Result<(), StoreError>;

    /// Every stored bundle, in id order
    fn bundles(&self) -> Result<Vec<BundleRef>, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Block kinds relevant to length computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Primary,
    Extension(u8),
    Payload,
}

/// One outgoing block and its encoded length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub kind: BlockKind,
    pub length: u64,
}

/// Produces the wire form of a bundle for a link
pub trait BlockEncoder: Send + Sync {
    fn prepare_blocks(&self, bundle: &Bundle, link: &Link) -> Vec<BlockInfo>;

    /// Finalize the blocks and return the total wire length
    fn generate_blocks(&self, bundle: &Bundle, blocks: &mut [BlockInfo], link: &Link) -> u64;
}

/// Length-only encoder
///
/// Models the primary block as a fixed overhead plus the endpoint strings,
/// and the payload block as a small header plus the payload.
#[derive(Debug, Clone)]
pub struct LengthEstimator {
    pub primary_overhead: u64,
    pub payload_header: u64,
}

impl Default for LengthEstimator {
    fn default() -> Self {
        Self {
            primary_overhead: 32,
            payload_header: 8,
        }
    }
}

impl BlockEncoder for LengthEstimator {
    fn prepare_blocks(&self, bundle: &Bundle, _link: &Link) -> Vec<BlockInfo> {
        let eids = bundle.source().as_str().len() + bundle.dest().as_str().len();
        vec![
            BlockInfo {
                kind: BlockKind::Primary,
                length: self.primary_overhead + eids as u64,
            },
            BlockInfo {
                kind: BlockKind::Payload,
                length: self.payload_header + bundle.payload_len(),
            },
        ]
    }

    fn generate_blocks(&self, _bundle: &Bundle, blocks: &mut [BlockInfo], _link: &Link) -> u64 {
        blocks.iter().map(|b| b.length).sum()
    }
}

/// Handle to a scheduled timer
///
/// Cancelling is idempotent. A cancelled timer never posts its event.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also abort the task driving the timer when cancelled
    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Shared flag checked by the timer driver before posting
    pub fn cancelled_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

/// Schedules one-shot events
///
/// Timers never mutate state inline; when they fire they post their event.
pub trait TimerService: Send + Sync {
    fn schedule(&self, delay: Duration, event: BundleEvent) -> TimerHandle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::EndpointId;
    use crate::link::{LinkParams, LinkType};
    use crate::mock_clayer::MockConvergenceLayer;

    #[test]
    fn test_length_estimator() {
        let link = Link::new(
            "l",
            LinkType::OnDemand,
            Arc::new(MockConvergenceLayer::new()),
            "host",
            EndpointId::null(),
            LinkParams::default(),
        );
        let bundle = Bundle::new(
            BundleId(1),
            EndpointId::parse("dtn://a").unwrap(),
            EndpointId::parse("dtn://b").unwrap(),
        )
        .with_payload(vec![0u8; 100]);

        let encoder = LengthEstimator::default();
        let mut blocks = encoder.prepare_blocks(&bundle, &link);
        assert_eq!(blocks.len(), 2);
        let total = encoder.generate_blocks(&bundle, &mut blocks, &link);
        assert_eq!(total, 32 + 14 + 8 + 100);
    }

    #[test]
    fn test_timer_handle_cancel() {
        let handle = TimerHandle::new();
        let flag = handle.cancelled_flag();
        let copy = handle.clone();

        assert!(!handle.is_cancelled());
        copy.cancel();
        assert!(handle.is_cancelled());
        assert!(flag.load(Ordering::Acquire));
    }
}
