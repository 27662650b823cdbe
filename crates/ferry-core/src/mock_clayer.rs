//! Mock convergence layer for testing
//!
//! Records every call and optionally completes sessions and transmissions
//! by posting events to an [`EventQueue`], the way a real layer's session
//! workers would.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::bundle::{BundleId, BundleRef};
use crate::contact::ContactRef;
use crate::error::ConvergenceLayerError;
use crate::event::{BundleEvent, EventQueue};
use crate::link::LinkRef;
use crate::traits::ConvergenceLayer;

/// A recorded convergence-layer call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClCall {
    OpenContact(String),
    CloseContact(String),
    SendBundle { link: String, bundle: BundleId },
    SendOnDownLink { link: String, bundle: BundleId },
    CancelBundle { link: String, bundle: BundleId },
}

/// Session state stored in the contact's info slot
#[derive(Debug)]
pub struct MockSession {
    pub link_name: String,
}

/// In-memory convergence layer
pub struct MockConvergenceLayer {
    persistent_queues: bool,
    events: Option<EventQueue>,
    auto_contact_up: bool,
    auto_transmit: bool,
    fail_open: bool,
    leak_on_close: bool,
    cancel_result: AtomicBool,
    calls: Mutex<Vec<ClCall>>,
}

impl MockConvergenceLayer {
    pub fn new() -> Self {
        Self {
            persistent_queues: false,
            events: None,
            auto_contact_up: false,
            auto_transmit: false,
            fail_open: false,
            leak_on_close: false,
            cancel_result: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Report that the layer retains queued bundles across link down/up
    pub fn with_persistent_queues(mut self, persistent: bool) -> Self {
        self.persistent_queues = persistent;
        self
    }

    /// Post contact-up as soon as a contact is opened
    pub fn with_auto_contact_up(mut self, events: EventQueue) -> Self {
        self.auto_contact_up = true;
        self.events = Some(events);
        self
    }

    /// Post bundle-transmitted as soon as a bundle is sent
    pub fn with_auto_transmit(mut self, events: EventQueue) -> Self {
        self.auto_transmit = true;
        self.events = Some(events);
        self
    }

    /// Post bundle-send-cancelled when a cancel succeeds
    pub fn with_events(mut self, events: EventQueue) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_fail_open(mut self, fail: bool) -> Self {
        self.fail_open = fail;
        self
    }

    /// Leave the session state on the contact when closing
    pub fn with_leak_on_close(mut self, leak: bool) -> Self {
        self.leak_on_close = leak;
        self
    }

    pub fn set_cancel_result(&self, result: bool) {
        self.cancel_result.store(result, Ordering::Relaxed);
    }

    pub fn calls(&self) -> Vec<ClCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of cancel calls recorded
    pub fn cancel_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, ClCall::CancelBundle { .. }))
            .count()
    }

    /// Bundles sent on the named link, in order
    pub fn sent_on(&self, link_name: &str) -> Vec<BundleId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ClCall::SendBundle { link, bundle } if link == link_name => Some(*bundle),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ClCall) {
        self.calls.lock().push(call);
    }
}

impl Default for MockConvergenceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvergenceLayer for MockConvergenceLayer {
    fn name(&self) -> &str {
        "mock"
    }

    fn open_contact(&self, contact: &ContactRef) -> Result<(), ConvergenceLayerError> {
        self.record(ClCall::OpenContact(contact.link_name().to_string()));

        if self.fail_open {
            return Err(ConvergenceLayerError::SessionFailed(
                "mock open failure".into(),
            ));
        }

        contact
            .set_cl_info(Box::new(MockSession {
                link_name: contact.link_name().to_string(),
            }))
            .map_err(|e| ConvergenceLayerError::SessionFailed(e.to_string()))?;

        if self.auto_contact_up
            && let Some(events) = &self.events
        {
            events.post(BundleEvent::ContactUp {
                contact: contact.clone(),
            });
        }

        Ok(())
    }

    fn close_contact(&self, contact: &ContactRef) {
        self.record(ClCall::CloseContact(contact.link_name().to_string()));

        if !self.leak_on_close && contact.has_cl_info() {
            let _ = contact.clear_cl_info();
        }
    }

    fn send_bundle(&self, contact: &ContactRef, bundle: &BundleRef) {
        self.record(ClCall::SendBundle {
            link: contact.link_name().to_string(),
            bundle: bundle.id(),
        });

        if self.auto_transmit
            && let (Some(events), Some(link)) = (&self.events, contact.link())
        {
            events.post(BundleEvent::BundleTransmitted {
                bundle: bundle.clone(),
                link,
                bytes_sent: bundle.payload_len(),
            });
        }
    }

    fn send_bundle_on_down_link(&self, link: &LinkRef, bundle: &BundleRef) -> bool {
        self.record(ClCall::SendOnDownLink {
            link: link.name().to_string(),
            bundle: bundle.id(),
        });
        true
    }

    fn cancel_bundle(&self, link: &LinkRef, bundle: &BundleRef) -> bool {
        self.record(ClCall::CancelBundle {
            link: link.name().to_string(),
            bundle: bundle.id(),
        });

        let cancelled = self.cancel_result.load(Ordering::Relaxed);
        if cancelled && let Some(events) = &self.events {
            events.post(BundleEvent::BundleSendCancelled {
                bundle: bundle.clone(),
                link: link.clone(),
            });
        }
        cancelled
    }

    fn has_persistent_link_queues(&self) -> bool {
        self.persistent_queues
    }
}
