//! Daemon configuration

use ferry_core::{EndpointId, LinkParams};
use ferry_routing::{ActionsConfig, ConfigWarning as RouterWarning, RouterConfig};

/// Configuration for a [`Daemon`](crate::Daemon)
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Endpoint id of this node
    pub local_eid: EndpointId,
    /// Capacity of the outward notification channel
    pub event_channel_capacity: usize,
    pub router: RouterConfig,
    pub actions: ActionsConfig,
    /// Parameters for links created without explicit parameters
    pub default_link_params: LinkParams,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            local_eid: EndpointId::parse("dtn://local").unwrap_or_default(),
            event_channel_capacity: 1024,
            router: RouterConfig::default(),
            actions: ActionsConfig::default(),
            default_link_params: LinkParams::default(),
        }
    }
}

impl DaemonConfig {
    /// Create a configuration for the given local endpoint
    pub fn with_local_eid(local_eid: EndpointId) -> Self {
        Self {
            local_eid,
            ..Self::default()
        }
    }

    /// Static routes only, no discovery-driven behavior
    pub fn static_routing(local_eid: EndpointId) -> Self {
        Self {
            local_eid,
            router: RouterConfig::static_routes(),
            ..Self::default()
        }
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_actions(mut self, actions: ActionsConfig) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_default_link_params(mut self, params: LinkParams) -> Self {
        self.default_link_params = params;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Validate configuration invariants
    ///
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.local_eid.is_null() {
            warnings.push(ConfigWarning::NullLocalEid);
        }
        if self.event_channel_capacity == 0 {
            warnings.push(ConfigWarning::ZeroChannelCapacity);
        }
        if let Err(e) = self.default_link_params.validate() {
            warnings.push(ConfigWarning::InvalidLinkParams(e.to_string()));
        }
        warnings.extend(self.router.validate().into_iter().map(ConfigWarning::Router));

        warnings
    }
}

/// Configuration warnings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Local endpoint is dtn:none, nothing will be delivered locally
    NullLocalEid,
    /// Notification channel capacity of 0 is raised to 1
    ZeroChannelCapacity,
    /// Default link parameters are rejected by link creation
    InvalidLinkParams(String),
    Router(RouterWarning),
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::NullLocalEid => write!(f, "local_eid is dtn:none"),
            ConfigWarning::ZeroChannelCapacity => {
                write!(f, "event_channel_capacity is 0, using 1")
            }
            ConfigWarning::InvalidLinkParams(msg) => {
                write!(f, "default_link_params invalid: {}", msg)
            }
            ConfigWarning::Router(w) => write!(f, "router: {}", w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_is_valid() {
        let config = DaemonConfig::default();
        assert_eq!(config.local_eid.as_str(), "dtn://local");
        assert_eq!(config.event_channel_capacity, 1024);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_static_routing_preset() {
        let config = DaemonConfig::static_routing(EndpointId::parse("dtn://n1").unwrap());
        assert!(!config.router.add_nexthop_routes);
        assert_eq!(config.local_eid.as_str(), "dtn://n1");
    }

    #[test]
    fn test_warnings() {
        let config = DaemonConfig::with_local_eid(EndpointId::null())
            .with_event_channel_capacity(0)
            .with_router(RouterConfig::default().with_dupcache_size(0))
            .with_default_link_params(LinkParams::default().with_retry_intervals(
                Duration::from_secs(10),
                Duration::from_secs(1),
            ));

        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.contains(&ConfigWarning::NullLocalEid));
        assert!(warnings.contains(&ConfigWarning::Router(RouterWarning::DupCacheDisabled)));
        assert!(warnings.iter().any(|w| w.to_string().contains("default_link_params")));
    }
}
