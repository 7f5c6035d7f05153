use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::domain::DomainError;

/// Where a host sits relative to this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostScope {
    Loopback,
    LocalNetwork,
    Public,
}

/// A normalized remote catalog base URL.
///
/// Equivalent spellings (scheme/host case, default port, trailing slash,
/// fragment, query) normalize to the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    key: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| DomainError::InvalidEndpoint {
            url: trimmed.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("empty URL"));
        }

        let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let host = url.host_str().ok_or_else(|| invalid("no host"))?;

        // Url::parse already lowercases scheme and host and drops default ports.
        let mut key = format!("{}://{}", url.scheme(), host.to_ascii_lowercase());
        if let Some(port) = url.port() {
            key.push_str(&format!(":{}", port));
        }
        key.push_str(url.path().trim_end_matches('/'));

        Ok(Self { url, key })
    }

    /// Cache and request key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// URL of the model listing under this base.
    pub fn models_url(&self) -> String {
        format!("{}/models", self.key)
    }

    pub fn host_scope(&self) -> HostScope {
        match self.url.host() {
            Some(Host::Ipv4(ip)) => ipv4_scope(ip),
            Some(Host::Ipv6(ip)) => ipv6_scope(ip),
            Some(Host::Domain(domain)) => domain_scope(domain),
            None => HostScope::Public,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn ipv4_scope(ip: Ipv4Addr) -> HostScope {
    if ip.is_loopback() {
        HostScope::Loopback
    } else if ip.is_private() || ip.is_link_local() {
        HostScope::LocalNetwork
    } else {
        HostScope::Public
    }
}

fn ipv6_scope(ip: Ipv6Addr) -> HostScope {
    if ip.is_loopback() {
        return HostScope::Loopback;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return ipv4_scope(v4);
    }
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local
    if first & 0xfe00 == 0xfc00 || first & 0xffc0 == 0xfe80 {
        HostScope::LocalNetwork
    } else {
        HostScope::Public
    }
}

fn domain_scope(domain: &str) -> HostScope {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    if domain == "localhost" || domain.ends_with(".localhost") {
        HostScope::Loopback
    } else if domain.ends_with(".local") || domain.ends_with(".lan") || domain.ends_with(".internal")
    {
        HostScope::LocalNetwork
    } else {
        HostScope::Public
    }
}

/// Transport security policy for remote endpoints.
///
/// Enforced before any request is made.
#[derive(Debug, Clone, Copy)]
pub struct EndpointPolicy {
    /// Permit plain HTTP to private-network hosts. Loopback is always allowed.
    pub allow_local_network: bool,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            allow_local_network: true,
        }
    }
}

impl EndpointPolicy {
    pub fn check(&self, endpoint: &Endpoint) -> Result<(), DomainError> {
        if endpoint.is_https() {
            return Ok(());
        }
        match endpoint.host_scope() {
            HostScope::Loopback => Ok(()),
            HostScope::LocalNetwork if self.allow_local_network => Ok(()),
            _ => Err(DomainError::InsecureEndpoint {
                url: endpoint.key().to_string(),
            }),
        }
    }
}
