//! Probe targets and comparison services.

use serde::{Deserialize, Serialize};

use super::EngineError;
use crate::probe::Endpoint;

/// An endpoint to probe during one round.
///
/// Built through [`Target::new`], which rejects malformed data before any
/// probing starts. Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    address: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_name: Option<String>,
    name: String,
    description: String,
    is_baseline: bool,
    /// Dialed through an override address.
    #[serde(rename = "is_optimized")]
    via_override: bool,
}

impl Target {
    pub fn new(address: &str, port: u16) -> Result<Self, EngineError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(EngineError::InvalidTarget("address is empty".to_string()));
        }
        if address.chars().any(char::is_whitespace) {
            return Err(EngineError::InvalidTarget(format!(
                "address contains whitespace: {:?}",
                address
            )));
        }
        if port == 0 {
            return Err(EngineError::InvalidTarget(format!("port 0 for {}", address)));
        }

        Ok(Self {
            address: address.to_string(),
            port,
            server_name: None,
            name: address.to_string(),
            description: String::new(),
            is_baseline: false,
            via_override: false,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn as_baseline(mut self) -> Self {
        self.is_baseline = true;
        self
    }

    /// Dial `override_address` instead, keeping the current address as the
    /// handshake identity.
    pub fn via(mut self, override_address: &str) -> Result<Self, EngineError> {
        let dial = Target::new(override_address, self.port)?;
        let identity = std::mem::replace(&mut self.address, dial.address);
        self.server_name.get_or_insert(identity);
        self.via_override = true;
        Ok(self)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_baseline(&self) -> bool {
        self.is_baseline
    }

    /// Whether the target was routed through [`via`](Self::via), even when the
    /// override happens to equal its own address.
    pub fn is_optimized(&self) -> bool {
        self.via_override
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            address: self.address.clone(),
            port: self.port,
            server_name: self.server_name.clone(),
        }
    }
}

/// A named HTTPS service to compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonService {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

impl ComparisonService {
    pub fn new(name: &str, url: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            description: description.to_string(),
        }
    }

    /// Host and port from the service URL, defaulting to 443.
    pub fn host_port(&self) -> Result<(String, u16), EngineError> {
        let url = reqwest::Url::parse(self.url.trim())
            .map_err(|e| {
                EngineError::InvalidTarget(format!("bad service url {}: {}", self.url, e))
            })?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                EngineError::InvalidTarget(format!("service url has no host: {}", self.url))
            })?;
        Ok((host.to_string(), url.port_or_known_default().unwrap_or(443)))
    }

    /// Direct target for this service.
    pub fn target(&self) -> Result<Target, EngineError> {
        let (host, port) = self.host_port()?;
        Ok(Target::new(&host, port)?
            .named(self.name.as_str())
            .described(self.description.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rejects_malformed() {
        assert!(matches!(Target::new("", 443), Err(EngineError::InvalidTarget(_))));
        assert!(Target::new("   ", 443).is_err());
        assert!(Target::new("1.1.1.1", 0).is_err());
        assert!(Target::new("bad host", 443).is_err());
    }

    #[test]
    fn test_target_defaults() {
        let t = Target::new(" 1.1.1.1 ", 443).unwrap();
        assert_eq!(t.address(), "1.1.1.1");
        assert_eq!(t.name(), "1.1.1.1");
        assert!(!t.is_baseline());
        assert!(!t.is_optimized());
        assert_eq!(t.endpoint(), Endpoint::new("1.1.1.1", 443));
    }

    #[test]
    fn test_target_via_override() {
        let t = Target::new("proxy.example.com", 443)
            .unwrap()
            .via("104.21.52.82")
            .unwrap()
            .described("via 104.21.52.82");
        assert_eq!(t.address(), "104.21.52.82");
        assert_eq!(t.description(), "via 104.21.52.82");
        assert_eq!(t.server_name(), Some("proxy.example.com"));
        assert!(t.is_optimized());
        assert_eq!(t.endpoint().tls_name(), "proxy.example.com");

        let bad = Target::new("proxy.example.com", 443).unwrap().via("");
        assert!(bad.is_err());
    }

    #[test]
    fn test_via_own_address_is_still_optimized() {
        let t = Target::new("104.21.52.82", 443)
            .unwrap()
            .via("104.21.52.82")
            .unwrap();
        assert_eq!(t.address(), "104.21.52.82");
        assert!(t.is_optimized());
        assert_eq!(t.port(), 443);
    }

    #[test]
    fn test_service_host_port() {
        let svc = ComparisonService::new("Example", "https://api.example.com/v1", "");
        assert_eq!(svc.host_port().unwrap(), ("api.example.com".to_string(), 443));

        let custom = ComparisonService::new("Custom", "https://example.com:8443", "");
        assert_eq!(custom.host_port().unwrap().1, 8443);

        let target = svc.target().unwrap();
        assert_eq!(target.name(), "Example");

        assert!(ComparisonService::new("Bad", "not a url", "").target().is_err());
    }
}
