//! Local application registrations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ferry_core::{EndpointId, EndpointIdPattern};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{DaemonError, DaemonResult};

/// An application's interest in bundles for an endpoint pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub regid: u32,
    pub endpoint: EndpointIdPattern,
    pub created: DateTime<Utc>,
}

/// Registrations keyed by id
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: RwLock<BTreeMap<u32, Registration>>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, regid: u32, endpoint: EndpointIdPattern) -> DaemonResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&regid) {
            return Err(DaemonError::DuplicateRegistration(regid));
        }

        debug!(regid, %endpoint, "registration added");
        entries.insert(
            regid,
            Registration {
                regid,
                endpoint,
                created: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn remove(&self, regid: u32) -> Option<Registration> {
        let removed = self.entries.write().remove(&regid);
        if removed.is_some() {
            debug!(regid, "registration removed");
        }
        removed
    }

    pub fn get(&self, regid: u32) -> Option<Registration> {
        self.entries.read().get(&regid).cloned()
    }

    /// Ids of registrations whose pattern matches the endpoint, ascending
    pub fn matching(&self, eid: &EndpointId) -> Vec<u32> {
        self.entries
            .read()
            .values()
            .filter(|r| r.endpoint.matches(eid))
            .map(|r| r.regid)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> EndpointIdPattern {
        EndpointIdPattern::parse(s).unwrap()
    }

    #[test]
    fn test_add_match_remove() {
        let table = RegistrationTable::new();
        table.add(1, pattern("dtn://local/app")).unwrap();
        table.add(2, pattern("dtn://local/*")).unwrap();

        assert!(matches!(
            table.add(1, pattern("dtn://local/other")),
            Err(DaemonError::DuplicateRegistration(1))
        ));

        let eid = EndpointId::parse("dtn://local/app").unwrap();
        assert_eq!(table.matching(&eid), vec![1, 2]);

        assert!(table.remove(2).is_some());
        assert!(table.remove(2).is_none());
        assert_eq!(table.matching(&eid), vec![1]);
        assert_eq!(table.get(1).unwrap().endpoint, pattern("dtn://local/app"));
    }
}
