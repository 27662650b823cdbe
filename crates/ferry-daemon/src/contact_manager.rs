//! Link registry and factory
//!
//! Links are created here, keyed by their unique name. Each link type gets
//! its initial state and initial events at creation: always-on links ask to
//! be opened right away, on-demand links wait for traffic, scheduled links
//! wait for their schedule and opportunistic links announce themselves as
//! discovered.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ferry_core::{
    BundleEvent, ContactReason, ConvergenceLayer, EndpointId, EventQueue, LinkError, LinkParams,
    LinkRef, LinkState, LinkType,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::DaemonResult;

/// Registry of every link known to the daemon
pub struct ContactManager {
    links: DashMap<String, LinkRef>,
    /// Deleted links stay referenced so outstanding handles remain valid
    retired: Mutex<Vec<LinkRef>>,
    events: EventQueue,
}

impl ContactManager {
    pub fn new(events: EventQueue) -> Self {
        Self {
            links: DashMap::new(),
            retired: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Create and register a link
    ///
    /// Posts `LinkCreated` followed by the type-specific initial event.
    pub fn create_link(
        &self,
        name: impl Into<String>,
        link_type: LinkType,
        clayer: Arc<dyn ConvergenceLayer>,
        nexthop: impl Into<String>,
        remote_eid: EndpointId,
        params: LinkParams,
    ) -> DaemonResult<LinkRef> {
        let name = name.into();
        params.validate()?;

        if self.links.contains_key(&name) {
            warn!(link = %name, "link already exists");
            return Err(LinkError::Duplicate(name).into());
        }

        let link = ferry_core::Link::new(
            name.clone(),
            link_type,
            clayer,
            nexthop,
            remote_eid,
            params,
        );
        link.clayer().init_link(&link)?;

        // entry API so a concurrent create with the same name loses cleanly
        match self.links.entry(name.clone()) {
            Entry::Occupied(_) => return Err(LinkError::Duplicate(name).into()),
            Entry::Vacant(slot) => {
                slot.insert(link.clone());
            }
        }

        info!(link = %link, "link created");
        let reason = match link_type {
            LinkType::Opportunistic => ContactReason::Discovery,
            _ => ContactReason::User,
        };
        self.events.post(BundleEvent::LinkCreated {
            link: link.clone(),
            reason,
        });

        match link_type {
            LinkType::AlwaysOn => {
                link.set_state(LinkState::Available)?;
                self.events.post(BundleEvent::LinkStateChangeRequest {
                    link: link.clone(),
                    state: LinkState::Open,
                    reason: ContactReason::User,
                });
            }
            LinkType::OnDemand => {
                link.set_state(LinkState::Available)?;
                self.events.post(BundleEvent::LinkAvailable {
                    link: link.clone(),
                    reason: ContactReason::User,
                });
            }
            LinkType::Scheduled => {
                debug!(link = %link.name(), "scheduled link waits for its schedule");
            }
            LinkType::Opportunistic => {
                link.set_state(LinkState::Available)?;
                self.events.post(BundleEvent::LinkAvailable {
                    link: link.clone(),
                    reason: ContactReason::Discovery,
                });
            }
        }

        Ok(link)
    }

    /// Mark a link deleted and remove it from the registry
    ///
    /// An open contact is closed first. Posts `LinkDeleted`.
    pub fn delete_link(&self, name: &str) -> DaemonResult<LinkRef> {
        let Some((_, link)) = self.links.remove(name) else {
            return Err(LinkError::NotFound(name.to_string()).into());
        };

        link.set_deleted();
        if link.contact().is_some()
            && let Err(e) = link.close()
        {
            warn!(link = %name, error = %e, "error closing deleted link");
        }
        let _ = link.set_state(LinkState::Unavailable);
        link.clayer().delete_link(&link);

        info!(link = %name, "link deleted");
        self.retired.lock().push(link.clone());
        self.events.post(BundleEvent::LinkDeleted {
            link: link.clone(),
            reason: ContactReason::User,
        });

        Ok(link)
    }

    pub fn find(&self, name: &str) -> Option<LinkRef> {
        self.links.get(name).map(|l| l.value().clone())
    }

    /// Registered links sorted by name
    pub fn links(&self) -> Vec<LinkRef> {
        let mut links: Vec<_> = self.links.iter().map(|l| l.value().clone()).collect();
        links.sort_by(|a, b| a.name().cmp(b.name()));
        links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Number of deleted links still referenced by the registry
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Human-readable link listing with statistics
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for link in self.links() {
            out.push_str(&format!("{}\n\t{}\n", link, link.stats()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::MockConvergenceLayer;

    fn create(
        cm: &ContactManager,
        name: &str,
        link_type: LinkType,
    ) -> DaemonResult<LinkRef> {
        cm.create_link(
            name,
            link_type,
            Arc::new(MockConvergenceLayer::new()),
            "10.0.0.2:4556",
            EndpointId::parse("dtn://peer").unwrap(),
            LinkParams::default(),
        )
    }

    #[test]
    fn test_initial_state_per_type() {
        let events = EventQueue::new();
        let cm = ContactManager::new(events.clone());

        let always = create(&cm, "always", LinkType::AlwaysOn).unwrap();
        assert_eq!(always.state(), LinkState::Available);
        assert_eq!(
            events.pending_names(),
            vec!["LINK_CREATED", "LINK_STATE_CHANGE_REQUEST"]
        );
        while events.try_next().is_some() {}

        let ondemand = create(&cm, "ondemand", LinkType::OnDemand).unwrap();
        assert_eq!(ondemand.state(), LinkState::Available);
        assert_eq!(events.pending_names(), vec!["LINK_CREATED", "LINK_AVAILABLE"]);
        while events.try_next().is_some() {}

        let scheduled = create(&cm, "scheduled", LinkType::Scheduled).unwrap();
        assert_eq!(scheduled.state(), LinkState::Unavailable);
        assert_eq!(events.pending_names(), vec!["LINK_CREATED"]);
        while events.try_next().is_some() {}

        let opp = create(&cm, "opp", LinkType::Opportunistic).unwrap();
        assert_eq!(opp.state(), LinkState::Available);
        match events.try_next() {
            Some(BundleEvent::LinkCreated { reason, .. }) => {
                assert_eq!(reason, ContactReason::Discovery)
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(cm.len(), 4);
        let names: Vec<_> = cm.links().iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, vec!["always", "ondemand", "opp", "scheduled"]);
    }

    #[test]
    fn test_duplicate_and_invalid() {
        let cm = ContactManager::new(EventQueue::new());
        create(&cm, "l1", LinkType::OnDemand).unwrap();

        assert!(matches!(
            create(&cm, "l1", LinkType::OnDemand),
            Err(crate::DaemonError::Link(LinkError::Duplicate(_)))
        ));

        let bad = cm.create_link(
            "l2",
            LinkType::OnDemand,
            Arc::new(MockConvergenceLayer::new()),
            "host",
            EndpointId::null(),
            LinkParams::default().with_retry_intervals(
                std::time::Duration::ZERO,
                std::time::Duration::from_secs(1),
            ),
        );
        assert!(matches!(
            bad,
            Err(crate::DaemonError::Link(LinkError::InvalidParams(_)))
        ));
        assert_eq!(cm.len(), 1);
    }

    #[test]
    fn test_delete_closes_and_retires() {
        let events = EventQueue::new();
        let cm = ContactManager::new(events.clone());
        let link = create(&cm, "l1", LinkType::OnDemand).unwrap();
        link.open().unwrap();

        let deleted = cm.delete_link("l1").unwrap();
        assert!(deleted.is_deleted());
        assert!(deleted.contact().is_none());
        assert_eq!(deleted.state(), LinkState::Unavailable);
        assert!(cm.find("l1").is_none());
        assert_eq!(cm.retired_count(), 1);
        assert!(events.pending_names().contains(&"LINK_DELETED"));

        assert!(cm.delete_link("l1").is_err());
    }
}
