//! Endpoint identifiers and patterns
//!
//! Scheme-specific parsing lives outside the control plane. This module only
//! keeps the URI split (`scheme:ssp`), the null endpoint, and glob-style
//! pattern matching used by the route table and registrations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EndpointError;

/// Maximum length of the scheme or scheme-specific part
pub const MAX_EID_PART_LENGTH: usize = 1023;

const NULL_EID: &str = "dtn:none";
const WILDCARD_PATTERN: &str = "*:*";

/// A URI-like endpoint identifier naming a node or registration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    /// Parse an endpoint id of the form `scheme:ssp`
    pub fn parse(uri: impl Into<String>) -> Result<Self, EndpointError> {
        let uri = uri.into();
        let (scheme, ssp) = split_uri(&uri)?;

        if scheme.contains('*') || ssp.contains('*') {
            return Err(EndpointError::InvalidFormat(uri));
        }

        Ok(Self(uri))
    }

    /// The null endpoint (`dtn:none`)
    pub fn null() -> Self {
        Self(NULL_EID.to_string())
    }

    /// Check whether this is the null endpoint
    pub fn is_null(&self) -> bool {
        self.0 == NULL_EID
    }

    /// The URI scheme
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(s, _)| s).unwrap_or("")
    }

    /// The scheme-specific part
    pub fn ssp(&self) -> &str {
        self.0.split_once(':').map(|(_, s)| s).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a pattern that matches every service on this node
    ///
    /// `dtn://host/app` and `dtn://host` both become `dtn://host/*`.
    /// Returns `None` for schemes without a service component.
    pub fn service_wildcard(&self) -> Option<EndpointIdPattern> {
        if self.scheme() != "dtn" || self.is_null() {
            return None;
        }

        let host = self.ssp().strip_prefix("//")?;
        let host = host.split('/').next().filter(|h| !h.is_empty())?;
        Some(EndpointIdPattern(format!("dtn://{}/*", host)))
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EndpointId {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A pattern over endpoint ids
///
/// `*` matches any run of characters, including none. The pattern `*:*`
/// matches every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointIdPattern(String);

impl EndpointIdPattern {
    /// Parse a pattern of the form `scheme:ssp`, wildcards allowed
    pub fn parse(pattern: impl Into<String>) -> Result<Self, EndpointError> {
        let pattern = pattern.into();
        split_uri(&pattern)?;
        Ok(Self(pattern))
    }

    /// The pattern matching every endpoint
    pub fn wildcard() -> Self {
        Self(WILDCARD_PATTERN.to_string())
    }

    /// A pattern matching exactly one endpoint
    pub fn exact(eid: &EndpointId) -> Self {
        Self(eid.0.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the endpoint matches this pattern
    pub fn matches(&self, eid: &EndpointId) -> bool {
        glob_match(self.0.as_bytes(), eid.0.as_bytes())
    }
}

impl fmt::Display for EndpointIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EndpointIdPattern {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_uri(uri: &str) -> Result<(&str, &str), EndpointError> {
    let (scheme, ssp) = uri
        .split_once(':')
        .ok_or_else(|| EndpointError::InvalidFormat(uri.to_string()))?;

    if scheme.is_empty() || ssp.is_empty() {
        return Err(EndpointError::InvalidFormat(uri.to_string()));
    }

    for part in [scheme, ssp] {
        if part.len() > MAX_EID_PART_LENGTH {
            return Err(EndpointError::TooLong {
                len: part.len(),
                max: MAX_EID_PART_LENGTH,
            });
        }
    }

    Ok((scheme, ssp))
}

/// Iterative glob match with single-star backtracking
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }

    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> EndpointId {
        EndpointId::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_parts() {
        let e = eid("dtn://host/app");
        assert_eq!(e.scheme(), "dtn");
        assert_eq!(e.ssp(), "//host/app");
        assert!(!e.is_null());
        assert!(EndpointId::null().is_null());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(EndpointId::parse("nocolon").is_err());
        assert!(EndpointId::parse(":ssp").is_err());
        assert!(EndpointId::parse("dtn:").is_err());
        assert!(EndpointId::parse("dtn://host/*").is_err());
        assert!(EndpointIdPattern::parse("dtn://host/*").is_ok());
    }

    #[test]
    fn test_pattern_matching() {
        let p = EndpointIdPattern::parse("dtn://host/*").unwrap();
        assert!(p.matches(&eid("dtn://host/app")));
        assert!(p.matches(&eid("dtn://host/")));
        assert!(!p.matches(&eid("dtn://other/app")));
        assert!(!p.matches(&eid("dtn://host")));

        assert!(EndpointIdPattern::wildcard().matches(&eid("ipn:1.2")));
        assert!(EndpointIdPattern::exact(&eid("dtn://a/b")).matches(&eid("dtn://a/b")));
    }

    #[test]
    fn test_glob_backtracking() {
        let p = EndpointIdPattern::parse("dtn://*/inbox*").unwrap();
        assert!(p.matches(&eid("dtn://x/y/inbox")));
        assert!(p.matches(&eid("dtn://node/inbox-2")));
        assert!(!p.matches(&eid("dtn://node/outbox")));
    }

    #[test]
    fn test_service_wildcard() {
        assert_eq!(
            eid("dtn://host/app").service_wildcard().unwrap().as_str(),
            "dtn://host/*"
        );
        assert_eq!(
            eid("dtn://host").service_wildcard().unwrap().as_str(),
            "dtn://host/*"
        );
        assert!(eid("ipn:1.2").service_wildcard().is_none());
        assert!(EndpointId::null().service_wildcard().is_none());
    }
}
