//! Route entries
//!
//! Entries are carried by route-add events and stored in the router's table.

use std::fmt;

use crate::eid::{EndpointId, EndpointIdPattern};
use crate::fwdlog::{CustodyTimerSpec, ForwardAction};
use crate::link::LinkRef;

/// A destination pattern bound to an outgoing link
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub dest_pattern: EndpointIdPattern,
    /// Only bundles whose source matches are routed, if set
    pub source_pattern: Option<EndpointIdPattern>,
    pub link: LinkRef,
    pub action: ForwardAction,
    /// Higher priority routes are tried first
    pub priority: u32,
    pub custody_spec: CustodyTimerSpec,
}

impl RouteEntry {
    /// A FORWARD route with priority 0 and default custody timers
    pub fn new(dest_pattern: EndpointIdPattern, link: LinkRef) -> Self {
        Self {
            dest_pattern,
            source_pattern: None,
            link,
            action: ForwardAction::Forward,
            priority: 0,
            custody_spec: CustodyTimerSpec::default(),
        }
    }

    pub fn with_source_pattern(mut self, pattern: EndpointIdPattern) -> Self {
        self.source_pattern = Some(pattern);
        self
    }

    pub fn with_action(mut self, action: ForwardAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_custody_spec(mut self, spec: CustodyTimerSpec) -> Self {
        self.custody_spec = spec;
        self
    }

    /// Check the destination and optional source filter
    pub fn matches(&self, dest: &EndpointId, source: Option<&EndpointId>) -> bool {
        if !self.dest_pattern.matches(dest) {
            return false;
        }
        match (&self.source_pattern, source) {
            (Some(pattern), Some(source)) => pattern.matches(source),
            _ => true,
        }
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}) [{}] priority {}",
            self.dest_pattern,
            self.link.name(),
            self.link.nexthop(),
            self.action,
            self.priority
        )?;
        if let Some(source) = &self.source_pattern {
            write!(f, " source {}", source)?;
        }
        Ok(())
    }
}
