//! Route table
//!
//! Maps destination patterns to outgoing links. Only the router mutates the
//! table; listing and matching take the read lock.

use std::fmt::Write as _;

use ferry_core::{EndpointId, EndpointIdPattern, LinkRef, RouteEntry};
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{RouteError, RouteResult};

/// Ordered set of route entries
#[derive(Debug, Default)]
pub struct RouteTable {
    name: String,
    entries: RwLock<Vec<RouteEntry>>,
}

impl RouteTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an entry
    ///
    /// Refuses an entry identical in destination, source filter and link to
    /// one already present.
    pub fn add_entry(&self, entry: RouteEntry) -> RouteResult<()> {
        if entry.link.is_deleted() {
            return Err(RouteError::LinkDeleted(entry.link.name().to_string()));
        }

        let mut entries = self.entries.write();
        let duplicate = entries.iter().any(|e| {
            e.dest_pattern == entry.dest_pattern
                && e.source_pattern == entry.source_pattern
                && e.link.name() == entry.link.name()
        });
        if duplicate {
            return Err(RouteError::Duplicate {
                dest: entry.dest_pattern,
                link: entry.link.name().to_string(),
            });
        }

        debug!(table = %self.name, route = %entry, "adding route");
        entries.push(entry);
        Ok(())
    }

    /// Remove the entry for a destination through one link
    pub fn del_entry(&self, dest: &EndpointIdPattern, link_name: &str) -> RouteResult<()> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !(e.dest_pattern == *dest && e.link.name() == link_name));

        if entries.len() == before {
            return Err(RouteError::NotFound {
                dest: dest.clone(),
                link: link_name.to_string(),
            });
        }

        debug!(table = %self.name, dest = %dest, link = link_name, "removed route");
        Ok(())
    }

    /// Remove every entry for a destination, returning how many were removed
    pub fn del_entries(&self, dest: &EndpointIdPattern) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.dest_pattern != *dest);
        let removed = before - entries.len();

        debug!(table = %self.name, dest = %dest, removed, "removed routes for destination");
        removed
    }

    /// Remove every entry through a link, returning how many were removed
    pub fn del_entries_for_nexthop(&self, link: &LinkRef) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.link.name() != link.name());
        let removed = before - entries.len();

        debug!(table = %self.name, link = %link.name(), removed, "removed routes for link");
        removed
    }

    /// Entries matching a destination, in insertion order
    ///
    /// With `link_filter` set only entries through that link are returned.
    /// The source filter of an entry is applied when `source` is given.
    pub fn get_matching(
        &self,
        dest: &EndpointId,
        source: Option<&EndpointId>,
        link_filter: Option<&LinkRef>,
    ) -> Vec<RouteEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| link_filter.is_none_or(|l| e.link.name() == l.name()))
            .filter(|e| e.matches(dest, source))
            .cloned()
            .collect()
    }

    /// Whether an entry with exactly this pattern exists through the link
    pub fn contains(&self, dest: &EndpointIdPattern, link: &LinkRef) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.dest_pattern == *dest && e.link.name() == link.name())
    }

    /// Copy of all entries
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Human-readable table listing
    pub fn dump(&self) -> String {
        let entries = self.entries.read();
        let mut out = format!("route table {} ({} entries):\n", self.name, entries.len());
        for e in entries.iter() {
            let _ = writeln!(out, "\t{}", e);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ferry_core::{ForwardAction, Link, LinkParams, LinkType, MockConvergenceLayer};

    fn link(name: &str) -> LinkRef {
        Link::new(
            name,
            LinkType::OnDemand,
            Arc::new(MockConvergenceLayer::new()),
            "host",
            EndpointId::null(),
            LinkParams::default(),
        )
    }

    fn pattern(s: &str) -> EndpointIdPattern {
        EndpointIdPattern::parse(s).unwrap()
    }

    fn eid(s: &str) -> EndpointId {
        EndpointId::parse(s).unwrap()
    }

    #[test]
    fn test_add_and_match() {
        let table = RouteTable::new("test");
        let l1 = link("l1");
        let l2 = link("l2");

        table
            .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1.clone()))
            .unwrap();
        table
            .add_entry(
                RouteEntry::new(pattern("dtn://other/*"), l2.clone())
                    .with_action(ForwardAction::Copy),
            )
            .unwrap();

        let matches = table.get_matching(&eid("dtn://host/app"), None, None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].link.name(), "l1");

        assert!(table
            .get_matching(&eid("dtn://host/app"), None, Some(&l2))
            .is_empty());
    }

    #[test]
    fn test_duplicate_refused() {
        let table = RouteTable::new("test");
        let l1 = link("l1");
        table
            .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1.clone()))
            .unwrap();

        let err = table
            .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1.clone()).with_priority(9))
            .unwrap_err();
        assert!(matches!(err, RouteError::Duplicate { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_deleted_link_refused() {
        let table = RouteTable::new("test");
        let l1 = link("l1");
        l1.set_deleted();
        assert_eq!(
            table
                .add_entry(RouteEntry::new(pattern("dtn://host/*"), l1))
                .unwrap_err(),
            RouteError::LinkDeleted("l1".into())
        );
    }

    #[test]
    fn test_source_filter() {
        let table = RouteTable::new("test");
        table
            .add_entry(
                RouteEntry::new(pattern("dtn://host/*"), link("l1"))
                    .with_source_pattern(pattern("dtn://trusted/*")),
            )
            .unwrap();

        assert_eq!(
            table
                .get_matching(&eid("dtn://host/a"), Some(&eid("dtn://trusted/x")), None)
                .len(),
            1
        );
        assert!(table
            .get_matching(&eid("dtn://host/a"), Some(&eid("dtn://stranger/x")), None)
            .is_empty());
    }

    #[test]
    fn test_deletes() {
        let table = RouteTable::new("test");
        let l1 = link("l1");
        let l2 = link("l2");
        table
            .add_entry(RouteEntry::new(pattern("dtn://a/*"), l1.clone()))
            .unwrap();
        table
            .add_entry(RouteEntry::new(pattern("dtn://a/*"), l2.clone()))
            .unwrap();
        table
            .add_entry(RouteEntry::new(pattern("dtn://b/*"), l1.clone()))
            .unwrap();

        table.del_entry(&pattern("dtn://a/*"), "l2").unwrap();
        assert!(table.del_entry(&pattern("dtn://a/*"), "l2").is_err());
        assert_eq!(table.len(), 2);

        assert_eq!(table.del_entries_for_nexthop(&l1), 2);
        assert!(table.is_empty());

        table
            .add_entry(RouteEntry::new(pattern("dtn://a/*"), l2.clone()))
            .unwrap();
        assert_eq!(table.del_entries(&pattern("dtn://a/*")), 1);
    }

    #[test]
    fn test_dump() {
        let table = RouteTable::new("static");
        table
            .add_entry(RouteEntry::new(pattern("dtn://a/*"), link("l1")).with_priority(3))
            .unwrap();
        let dump = table.dump();
        assert!(dump.contains("route table static (1 entries)"));
        assert!(dump.contains("dtn://a/* -> l1"));
        assert!(dump.contains("priority 3"));
    }
}
