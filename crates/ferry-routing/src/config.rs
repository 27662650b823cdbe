//! Router and action gateway configuration

/// Configuration for the table-based router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Add a wildcard route to each link's remote endpoint
    pub add_nexthop_routes: bool,
    /// Open opportunistic links as soon as they are discovered
    pub open_discovered_links: bool,
    /// Fingerprints remembered for duplicate suppression, 0 disables it
    pub dupcache_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            add_nexthop_routes: true,
            open_discovered_links: true,
            dupcache_size: 1024,
        }
    }
}

impl RouterConfig {
    /// Static routing only: no synthesized routes, no eager opens
    pub fn static_routes() -> Self {
        Self {
            add_nexthop_routes: false,
            open_discovered_links: false,
            ..Self::default()
        }
    }

    pub fn with_add_nexthop_routes(mut self, enabled: bool) -> Self {
        self.add_nexthop_routes = enabled;
        self
    }

    pub fn with_open_discovered_links(mut self, enabled: bool) -> Self {
        self.open_discovered_links = enabled;
        self
    }

    pub fn with_dupcache_size(mut self, size: usize) -> Self {
        self.dupcache_size = size;
        self
    }

    /// Validate configuration invariants
    ///
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.dupcache_size == 0 {
            warnings.push(ConfigWarning::DupCacheDisabled);
        }
        if self.dupcache_size > 1_000_000 {
            warnings.push(ConfigWarning::LargeDupCache);
        }

        warnings
    }
}

/// Configuration for the action gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionsConfig {
    /// Apply the link MTU even when the convergence layer keeps its own queue
    pub enforce_mtu_on_persistent_queues: bool,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            enforce_mtu_on_persistent_queues: true,
        }
    }
}

impl ActionsConfig {
    pub fn with_enforce_mtu_on_persistent_queues(mut self, enforce: bool) -> Self {
        self.enforce_mtu_on_persistent_queues = enforce;
        self
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Duplicate suppression is off
    DupCacheDisabled,
    /// Duplicate cache is very large (> 1000000)
    LargeDupCache,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DupCacheDisabled => {
                write!(f, "dupcache_size is 0, duplicate suppression disabled")
            }
            ConfigWarning::LargeDupCache => {
                write!(f, "dupcache_size is very large (> 1000000)")
            }
        }
    }
}
