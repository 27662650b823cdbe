//! The action gateway
//!
//! [`BundleActions`] is the only path from routing decisions to links,
//! convergence layers and the bundle store. A simulated environment can
//! substitute its own implementation without touching the router.
//!
//! Every operation reports failure by logging and returning `false` (or
//! nothing); errors never escape into event processing.

use std::sync::Arc;

use chrono::Utc;
use ferry_core::{
    BlockEncoder, Bundle, BundleList, BundleRef, BundleStore, ContactRef, CustodyTimerSpec,
    DaemonNotification, DeletionReason, ForwardAction, ForwardingState, LengthEstimator, LinkRef,
    LinkState, StoreError,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ActionsConfig;

/// Operations the router may perform on links, convergence layers and the store
pub trait BundleActions: Send + Sync {
    /// Open a link that is available and has no contact
    fn open_link(&self, link: &LinkRef);

    /// Close an open or opening link and mark it unavailable
    fn close_link(&self, link: &LinkRef);

    /// Queue or transmit a bundle on a link
    ///
    /// Returns false if the send was refused.
    fn send_bundle(
        &self,
        bundle: &BundleRef,
        link: &LinkRef,
        action: ForwardAction,
        custody_spec: CustodyTimerSpec,
    ) -> bool;

    /// Cancel a queued or in-flight transmission
    ///
    /// Returns false if the bundle was neither queued nor ever sent on the link.
    fn cancel_bundle(&self, bundle: &BundleRef, link: &LinkRef) -> bool;

    /// Add a locally generated bundle to the pending list and the store
    fn inject_bundle(&self, bundle: &BundleRef);

    /// Remove a bundle from the pending list and the store
    fn delete_bundle(&self, bundle: &BundleRef, reason: DeletionReason, log_on_error: bool)
    -> bool;

    fn store_add(&self, bundle: &BundleRef);

    fn store_update(&self, bundle: &BundleRef);

    fn store_del(&self, bundle: &Bundle);
}

/// Action gateway backed by real links and a bundle store
pub struct DaemonActions {
    store: Arc<dyn BundleStore>,
    pending: Arc<BundleList>,
    encoder: Arc<dyn BlockEncoder>,
    config: ActionsConfig,
    notifier: Option<broadcast::Sender<DaemonNotification>>,
}

impl DaemonActions {
    pub fn new(store: Arc<dyn BundleStore>, pending: Arc<BundleList>, config: ActionsConfig) -> Self {
        Self {
            store,
            pending,
            encoder: Arc::new(LengthEstimator::default()),
            config,
            notifier: None,
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn BlockEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Publish bundle deletions on this channel
    pub fn with_notifier(mut self, notifier: broadcast::Sender<DaemonNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn pending(&self) -> &Arc<BundleList> {
        &self.pending
    }

    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.store
    }

    pub fn config(&self) -> &ActionsConfig {
        &self.config
    }

    /// Encoded length of the bundle for this link
    pub fn wire_length(&self, bundle: &Bundle, link: &LinkRef) -> u64 {
        let mut blocks = self.encoder.prepare_blocks(bundle, link);
        self.encoder.generate_blocks(bundle, &mut blocks, link)
    }

    /// Hand every queued bundle not yet in flight to the convergence layer
    ///
    /// Called when a contact comes up on a link whose layer does not keep
    /// its own queue. Returns the number of bundles handed over.
    #[instrument(skip(self, link), fields(link = %link.name()))]
    pub fn resume_link_queue(&self, link: &LinkRef) -> usize {
        if link.clayer().has_persistent_link_queues() {
            return 0;
        }

        let Some(contact) = link.contact() else {
            warn!("cannot resume queue on link without a contact");
            return 0;
        };

        let mut sent = 0;
        for bundle in link.queue().snapshot() {
            if link.state() != LinkState::Open {
                debug!(state = %link.state(), "link no longer open, stopping queue flush");
                break;
            }
            if link.inflight().contains(&bundle) {
                continue;
            }
            self.hand_to_clayer(link, &contact, &bundle);
            sent += 1;
        }

        debug!(sent, queued = link.queue().len(), "resumed link queue");
        sent
    }

    /// Account for a transmission that finished on a link
    ///
    /// Removes the bundle from the link's queue and in-flight list and
    /// updates statistics. `bytes_sent` is `None` for a failed transmission.
    pub fn transmission_done(&self, bundle: &BundleRef, link: &LinkRef, bytes_sent: Option<u64>) {
        let len = self.wire_length(bundle, link);
        let was_queued = link.queue().erase(bundle);
        let was_inflight = link.inflight().erase(bundle);
        let persistent = link.clayer().has_persistent_link_queues();

        link.update_stats(|s| {
            if was_queued || persistent {
                s.bundles_queued = s.bundles_queued.saturating_sub(1);
                s.bytes_queued = s.bytes_queued.saturating_sub(len);
            }
            if was_inflight {
                s.bundles_inflight = s.bundles_inflight.saturating_sub(1);
                s.bytes_inflight = s.bytes_inflight.saturating_sub(len);
            }
            if let Some(bytes) = bytes_sent {
                s.bundles_transmitted += 1;
                s.bytes_transmitted += bytes;
            }
        });
    }

    /// Forget in-flight transmissions after a contact went down
    ///
    /// The bundles stay on the delayed-send queue.
    pub fn contact_lost(&self, link: &LinkRef) -> usize {
        let lost = link.inflight().snapshot();
        link.inflight().clear();

        link.update_stats(|s| {
            s.bundles_inflight = 0;
            s.bytes_inflight = 0;
        });

        if !lost.is_empty() {
            debug!(link = %link.name(), count = lost.len(), "in-flight bundles returned to queue");
        }
        lost.len()
    }

    fn hand_to_clayer(&self, link: &LinkRef, contact: &ContactRef, bundle: &BundleRef) {
        let len = self.wire_length(bundle, link);
        if !link.inflight().contains(bundle) {
            link.inflight().push_back(bundle.clone());
            link.update_stats(|s| {
                s.bundles_inflight += 1;
                s.bytes_inflight += len;
            });
        }
        link.clayer().send_bundle(contact, bundle);
    }

    fn notify_deleted(&self, bundle: &Bundle, reason: DeletionReason) {
        if let Some(notifier) = &self.notifier {
            let _ = notifier.send(DaemonNotification::BundleDeleted {
                bundle_id: bundle.id(),
                reason,
                timestamp: Utc::now(),
            });
        }
    }
}

impl BundleActions for DaemonActions {
    #[instrument(skip(self, link), fields(link = %link.name()))]
    fn open_link(&self, link: &LinkRef) {
        if link.is_deleted() {
            debug!("cannot open deleted link");
            return;
        }
        if link.is_open() || link.contact().is_some() {
            error!("not opening link since already open");
            return;
        }
        if !link.is_available() {
            error!("not opening link since not available");
            return;
        }

        debug!("opening link");
        if let Err(e) = link.open() {
            warn!(error = %e, "link open failed");
        }
    }

    #[instrument(skip(self, link), fields(link = %link.name()))]
    fn close_link(&self, link: &LinkRef) {
        if !link.is_open() && !link.is_opening() {
            error!(state = %link.state(), "not closing link since not open");
            return;
        }

        debug!("closing link");
        if let Err(e) = link.close() {
            error!(error = %e, "link close reported an error");
        }

        // UNAVAILABLE is reachable from every state
        let _ = link.set_state(LinkState::Unavailable);
    }

    #[instrument(skip(self, bundle, link, custody_spec), fields(bundle_id = bundle.id().0, link = %link.name()))]
    fn send_bundle(
        &self,
        bundle: &BundleRef,
        link: &LinkRef,
        action: ForwardAction,
        custody_spec: CustodyTimerSpec,
    ) -> bool {
        if link.is_deleted() {
            warn!("failed to send bundle on deleted link");
            return false;
        }

        if bundle.fwdlog().latest_state(link.name()) == Some(ForwardingState::InFlight) {
            error!("bundle already in flight on link");
            return false;
        }

        let total_len = self.wire_length(bundle, link);
        let persistent = link.clayer().has_persistent_link_queues();
        let mtu = link.params().mtu;
        let check_mtu = !persistent || self.config.enforce_mtu_on_persistent_queues;

        if check_mtu && mtu != 0 && total_len > mtu {
            error!(total_len, mtu, "bundle length exceeds link mtu");
            return false;
        }

        if !persistent && link.queue().contains(bundle) {
            debug!("bundle already on delayed-send queue");
            return false;
        }

        trace!(total_len, %action, state = %link.state(), "adding forwarding log entry");
        bundle.fwdlog().add_entry(
            link.name(),
            link.remote_eid().clone(),
            action,
            ForwardingState::InFlight,
            custody_spec,
        );
        link.update_stats(|s| {
            s.bundles_queued += 1;
            s.bytes_queued += total_len;
        });

        let contact = if link.state() == LinkState::Open {
            link.contact()
        } else {
            None
        };

        if persistent {
            match contact {
                Some(contact) => {
                    debug!("immediate send to convergence layer");
                    self.hand_to_clayer(link, &contact, bundle);
                }
                None => {
                    debug!(state = %link.state(), "queueing on down link");
                    if !link.clayer().send_bundle_on_down_link(link, bundle) {
                        warn!("convergence layer refused down-link queueing");
                    }
                }
            }
        } else {
            link.queue().push_back(bundle.clone());
            match contact {
                Some(contact) => {
                    debug!("immediate send of queued bundle");
                    self.hand_to_clayer(link, &contact, bundle);
                }
                None if link.state() == LinkState::Open => {
                    error!("open link has no contact, bundle left on queue");
                }
                None => {
                    debug!(state = %link.state(), "delayed send, bundle left on queue");
                }
            }
        }

        true
    }

    #[instrument(skip(self, bundle, link), fields(bundle_id = bundle.id().0, link = %link.name()))]
    fn cancel_bundle(&self, bundle: &BundleRef, link: &LinkRef) -> bool {
        if link.is_deleted() {
            debug!("cannot cancel bundle on deleted link");
            return false;
        }

        let len = self.wire_length(bundle, link);
        let was_queued = link.queue().erase(bundle);
        let was_inflight = link.inflight().erase(bundle);

        if was_queued {
            info!("removed bundle from delayed-send queue");
        }

        let previous = bundle.fwdlog().latest_state(link.name());
        let Some(previous) = previous else {
            return false;
        };
        if previous == ForwardingState::Cancelled && !was_queued {
            debug!("transmission already cancelled");
            return false;
        }

        bundle.fwdlog().update(link.name(), ForwardingState::Cancelled);
        link.update_stats(|s| {
            s.bundles_cancelled += 1;
            if previous == ForwardingState::InFlight {
                s.bundles_queued = s.bundles_queued.saturating_sub(1);
                s.bytes_queued = s.bytes_queued.saturating_sub(len);
            }
            if was_inflight {
                s.bundles_inflight = s.bundles_inflight.saturating_sub(1);
                s.bytes_inflight = s.bytes_inflight.saturating_sub(len);
            }
        });

        link.clayer().cancel_bundle(link, bundle)
    }

    #[instrument(skip(self, bundle), fields(bundle_id = bundle.id().0))]
    fn inject_bundle(&self, bundle: &BundleRef) {
        debug!("injecting bundle");
        if !self.pending.contains(bundle) {
            self.pending.push_back(bundle.clone());
        }
        self.store_add(bundle);
    }

    #[instrument(skip(self, bundle), fields(bundle_id = bundle.id().0, %reason))]
    fn delete_bundle(
        &self,
        bundle: &BundleRef,
        reason: DeletionReason,
        log_on_error: bool,
    ) -> bool {
        debug!("deleting bundle");

        let was_pending = self.pending.erase(bundle);
        let was_stored = match self.store.del(bundle.id()) {
            Ok(()) => true,
            Err(StoreError::NotFound(_)) => false,
            Err(e) => {
                error!(critical = true, error = %e, "error removing bundle from data store");
                false
            }
        };

        let deleted = was_pending || was_stored;
        if deleted {
            info!("bundle deleted");
            self.notify_deleted(bundle, reason);
        } else if log_on_error {
            error!("failed to delete bundle, not pending or stored");
        }
        deleted
    }

    fn store_add(&self, bundle: &BundleRef) {
        debug!(bundle_id = bundle.id().0, "adding bundle to data store");
        if let Err(e) = self.store.add(bundle) {
            error!(critical = true, bundle_id = bundle.id().0, error = %e, "error adding bundle to data store");
        }
    }

    fn store_update(&self, bundle: &BundleRef) {
        debug!(bundle_id = bundle.id().0, "updating bundle in data store");
        if let Err(e) = self.store.update(bundle) {
            error!(critical = true, bundle_id = bundle.id().0, error = %e, "error updating bundle in data store");
        }
    }

    fn store_del(&self, bundle: &Bundle) {
        debug!(bundle_id = bundle.id().0, "removing bundle from data store");
        if let Err(e) = self.store.del(bundle.id()) {
            error!(critical = true, bundle_id = bundle.id().0, error = %e, "error removing bundle from data store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{
        BundleId, ClCall, EndpointId, Link, LinkParams, LinkType, MockConvergenceLayer,
    };
    use ferry_storage::{FaultyBundleStore, InMemoryBundleStore, StoreOp};

    struct Fixture {
        actions: DaemonActions,
        store: Arc<InMemoryBundleStore>,
        clayer: Arc<MockConvergenceLayer>,
    }

    fn fixture(clayer: MockConvergenceLayer) -> Fixture {
        let store = Arc::new(InMemoryBundleStore::new());
        let pending = Arc::new(BundleList::new("pending"));
        Fixture {
            actions: DaemonActions::new(store.clone(), pending, ActionsConfig::default()),
            store,
            clayer: Arc::new(clayer),
        }
    }

    fn link(clayer: &Arc<MockConvergenceLayer>, params: LinkParams) -> LinkRef {
        Link::new(
            "l1",
            LinkType::OnDemand,
            clayer.clone(),
            "host:4556",
            EndpointId::parse("dtn://peer").unwrap(),
            params,
        )
    }

    fn open_link(link: &LinkRef) {
        link.set_state(LinkState::Available).unwrap();
        link.open().unwrap();
        link.set_state(LinkState::Open).unwrap();
    }

    fn bundle(id: u32, payload: usize) -> BundleRef {
        Bundle::new(
            BundleId(id),
            EndpointId::parse("dtn://src/app").unwrap(),
            EndpointId::parse("dtn://peer/app").unwrap(),
        )
        .with_payload(vec![0u8; payload])
        .into_ref()
    }

    #[test]
    fn test_send_on_open_link() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default());
        open_link(&l);
        let b = bundle(1, 10);

        assert!(f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert_eq!(b.fwdlog().latest_state("l1"), Some(ForwardingState::InFlight));
        assert_eq!(l.stats().bundles_queued, 1);
        assert_eq!(l.stats().bundles_inflight, 1);
        assert!(l.queue().contains(&b));
        assert_eq!(f.clayer.sent_on("l1"), vec![BundleId(1)]);
    }

    #[test]
    fn test_in_flight_send_refused_without_new_entry() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default());
        open_link(&l);
        let b = bundle(1, 10);

        assert!(f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert!(!f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert_eq!(b.fwdlog().len(), 1);
        assert_eq!(l.stats().bundles_queued, 1);
    }

    #[test]
    fn test_mtu_enforced() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default().with_mtu(64));
        open_link(&l);
        let b = bundle(1, 500);

        assert!(!f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert!(b.fwdlog().is_empty());
        assert!(f.clayer.sent_on("l1").is_empty());
    }

    #[test]
    fn test_mtu_skipped_for_persistent_queues_when_configured() {
        let store = Arc::new(InMemoryBundleStore::new());
        let actions = DaemonActions::new(
            store,
            Arc::new(BundleList::new("pending")),
            ActionsConfig::default().with_enforce_mtu_on_persistent_queues(false),
        );
        let clayer = Arc::new(MockConvergenceLayer::new().with_persistent_queues(true));
        let l = link(&clayer, LinkParams::default().with_mtu(64));
        l.set_state(LinkState::Available).unwrap();
        let b = bundle(1, 500);

        assert!(actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert_eq!(
            clayer.calls(),
            vec![ClCall::SendOnDownLink {
                link: "l1".into(),
                bundle: BundleId(1)
            }]
        );
        assert!(l.queue().is_empty());
    }

    #[test]
    fn test_persistent_queue_send_on_open_link() {
        let f = fixture(MockConvergenceLayer::new().with_persistent_queues(true));
        let l = link(&f.clayer, LinkParams::default());
        open_link(&l);
        let b = bundle(1, 10);

        assert!(f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert_eq!(f.clayer.sent_on("l1"), vec![BundleId(1)]);
        assert_eq!(b.fwdlog().latest_state("l1"), Some(ForwardingState::InFlight));
        assert!(l.queue().is_empty());
        assert!(l.inflight().contains(&b));
        assert_eq!(l.stats().bundles_queued, 1);
        assert_eq!(l.stats().bundles_inflight, 1);

        assert!(f.actions.cancel_bundle(&b, &l));
        assert_eq!(b.fwdlog().latest_state("l1"), Some(ForwardingState::Cancelled));
        assert!(!l.inflight().contains(&b));
        assert_eq!(l.stats().bundles_queued, 0);
        assert_eq!(l.stats().bytes_queued, 0);
        assert_eq!(l.stats().bundles_inflight, 0);
        assert_eq!(l.stats().bytes_inflight, 0);
        assert_eq!(l.stats().bundles_cancelled, 1);
    }

    #[test]
    fn test_delayed_send_on_closed_link() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default());
        l.set_state(LinkState::Available).unwrap();
        let b = bundle(1, 10);

        assert!(f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default()));
        assert!(l.queue().contains(&b));
        assert!(f.clayer.sent_on("l1").is_empty());

        l.open().unwrap();
        l.set_state(LinkState::Open).unwrap();
        assert_eq!(f.actions.resume_link_queue(&l), 1);
        assert_eq!(f.clayer.sent_on("l1"), vec![BundleId(1)]);
        assert_eq!(f.actions.resume_link_queue(&l), 0);
    }

    #[test]
    fn test_cancel_idempotence() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default());
        open_link(&l);
        let b = bundle(1, 10);

        assert!(!f.actions.cancel_bundle(&b, &l));
        assert!(!f.actions.cancel_bundle(&b, &l));
        assert_eq!(f.clayer.cancel_count(), 0);

        f.actions.send_bundle(&b, &l, ForwardAction::Forward, CustodyTimerSpec::default());
        assert!(f.actions.cancel_bundle(&b, &l));
        assert_eq!(b.fwdlog().latest_state("l1"), Some(ForwardingState::Cancelled));
        assert!(!l.queue().contains(&b));
        assert_eq!(l.stats().bundles_cancelled, 1);
        assert_eq!(l.stats().bundles_queued, 0);

        assert!(!f.actions.cancel_bundle(&b, &l));
        assert_eq!(l.stats().bundles_cancelled, 1);
        assert_eq!(f.clayer.cancel_count(), 1);
    }

    #[test]
    fn test_close_link_releases_contact() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default());
        open_link(&l);

        f.actions.close_link(&l);
        assert!(l.contact().is_none());
        assert_eq!(l.state(), LinkState::Unavailable);

        // closing again is refused silently
        f.actions.close_link(&l);
        assert_eq!(l.state(), LinkState::Unavailable);
    }

    #[test]
    fn test_open_link_refusals() {
        let f = fixture(MockConvergenceLayer::new());
        let l = link(&f.clayer, LinkParams::default());

        f.actions.open_link(&l);
        assert!(l.contact().is_none());

        l.set_state(LinkState::Available).unwrap();
        f.actions.open_link(&l);
        assert_eq!(l.state(), LinkState::Opening);

        f.actions.open_link(&l);
        assert_eq!(
            f.clayer
                .calls()
                .iter()
                .filter(|c| matches!(c, ClCall::OpenContact(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_inject_and_delete() {
        let f = fixture(MockConvergenceLayer::new());
        let (tx, mut rx) = broadcast::channel(8);
        let actions = DaemonActions::new(
            f.store.clone(),
            Arc::new(BundleList::new("pending")),
            ActionsConfig::default(),
        )
        .with_notifier(tx);
        let b = bundle(3, 1);

        actions.inject_bundle(&b);
        assert!(actions.pending().contains(&b));
        assert_eq!(f.store.len(), 1);

        assert!(actions.delete_bundle(&b, DeletionReason::Forwarded, true));
        assert!(!actions.pending().contains(&b));
        assert!(f.store.is_empty());
        assert!(!actions.delete_bundle(&b, DeletionReason::Forwarded, true));

        match rx.try_recv().unwrap() {
            DaemonNotification::BundleDeleted { bundle_id, reason, .. } => {
                assert_eq!(bundle_id, BundleId(3));
                assert_eq!(reason, DeletionReason::Forwarded);
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_store_failures_are_not_fatal() {
        let faulty = Arc::new(FaultyBundleStore::new(Arc::new(InMemoryBundleStore::new())));
        let actions = DaemonActions::new(
            faulty.clone(),
            Arc::new(BundleList::new("pending")),
            ActionsConfig::default(),
        );
        let b = bundle(1, 1);

        faulty.fail(StoreOp::Add);
        actions.inject_bundle(&b);
        assert!(actions.pending().contains(&b));
        assert_eq!(faulty.len(), 0);

        faulty.heal_all();
        faulty.fail(StoreOp::Update);
        actions.store_update(&b);

        // pending removal alone still counts as a deletion
        faulty.fail(StoreOp::Del);
        assert!(actions.delete_bundle(&b, DeletionReason::NoAdditionalInfo, true));
    }
}
