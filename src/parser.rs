//! Parsing of candidate lists, proxy subscriptions and service URLs.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Serialize;

use crate::db::Candidate;

/// Port assumed when an entry carries none.
pub const DEFAULT_PORT: u16 = 443;

/// Per-domain bound on subscription DNS lookups.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse one `IPv4[:port][#label]` entry.
pub fn parse_candidate(entry: &str) -> Option<Candidate> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(?P<ip>\d{1,3}(?:\.\d{1,3}){3})(?::(?P<port>\d+))?(?:#(?P<label>.*))?$")
            .unwrap()
    });

    let entry = entry.trim();
    let caps = re.captures(entry)?;

    let ip = caps.name("ip")?.as_str();
    ip.parse::<Ipv4Addr>().ok()?;

    let port = match caps.name("port") {
        Some(p) => p.as_str().parse::<u16>().ok().filter(|p| *p != 0)?,
        None => DEFAULT_PORT,
    };
    let label = caps
        .name("label")
        .map(|l| l.as_str().trim().to_string())
        .unwrap_or_default();

    Some(Candidate {
        id: 0,
        address: ip.to_string(),
        port,
        label,
    })
}

/// Parse a newline or comma separated list, skipping invalid entries.
pub fn parse_candidates(text: &str) -> Vec<Candidate> {
    text.split(|c| c == '\n' || c == ',')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parsed = parse_candidate(line);
            if parsed.is_none() {
                tracing::debug!("Skipping invalid candidate entry: {}", line);
            }
            parsed
        })
        .collect()
}

// ============================================================================
// Proxy subscriptions
// ============================================================================

/// Protocol of a subscription link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeProtocol {
    Vless,
    Trojan,
    Vmess,
}

impl NodeProtocol {
    fn of(link: &str) -> Option<Self> {
        if link.starts_with("vless://") {
            Some(NodeProtocol::Vless)
        } else if link.starts_with("trojan://") {
            Some(NodeProtocol::Trojan)
        } else if link.starts_with("vmess://") {
            Some(NodeProtocol::Vmess)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeProtocol::Vless => "vless",
            NodeProtocol::Trojan => "trojan",
            NodeProtocol::Vmess => "vmess",
        }
    }
}

/// Server entry taken from one subscription link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyNode {
    pub protocol: NodeProtocol,
    /// IPv4 literal or domain.
    pub address: String,
    pub port: u16,
    pub name: String,
    pub is_ip: bool,
}

impl ProxyNode {
    fn new(protocol: NodeProtocol, address: &str, port: u16, name: &str) -> Option<Self> {
        if address.is_empty() || port == 0 {
            return None;
        }
        let name = if name.is_empty() {
            format!("{}-{}", protocol.as_str(), address)
        } else {
            name.to_string()
        };
        Some(Self {
            protocol,
            address: address.to_string(),
            port,
            name,
            is_ip: address.parse::<Ipv4Addr>().is_ok(),
        })
    }
}

/// Parse `vless://`, `trojan://` and `vmess://` links, one per line. Other
/// lines are ignored; malformed links are logged and skipped.
pub fn parse_subscription(content: &str) -> Vec<ProxyNode> {
    let mut nodes = Vec::new();
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(protocol) = NodeProtocol::of(line) else {
            continue;
        };
        let node = match protocol {
            NodeProtocol::Vmess => parse_vmess(line),
            _ => parse_url_node(protocol, line),
        };
        match node {
            Some(node) => nodes.push(node),
            None => tracing::warn!(
                "Unparseable {} link: {}",
                protocol.as_str(),
                line.chars().take(50).collect::<String>()
            ),
        }
    }
    tracing::info!("Parsed {} proxy nodes from subscription", nodes.len());
    nodes
}

/// `scheme://credential@host:port?params#name`
fn parse_url_node(protocol: NodeProtocol, link: &str) -> Option<ProxyNode> {
    let url = reqwest::Url::parse(link).ok()?;
    let name = url
        .fragment()
        .map(|f| percent_decode_str(f).decode_utf8_lossy().into_owned())
        .unwrap_or_default();
    ProxyNode::new(protocol, url.host_str()?, url.port()?, name.trim())
}

/// `vmess://` followed by base64 JSON carrying `add`, `port` and `ps`.
fn parse_vmess(link: &str) -> Option<ProxyNode> {
    let encoded = link.strip_prefix("vmess://")?.trim().trim_end_matches('=');
    let decoded = general_purpose::STANDARD_NO_PAD
        .decode(encoded)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(encoded))
        .ok()?;
    let config: serde_json::Value = serde_json::from_slice(&decoded).ok()?;

    let address = config.get("add")?.as_str()?.trim();
    let port = match config.get("port")? {
        serde_json::Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let name = config.get("ps").and_then(|v| v.as_str()).unwrap_or_default();
    ProxyNode::new(NodeProtocol::Vmess, address, port, name.trim())
}

/// IPv4 addresses of `domain`, deduplicated. Empty on failure or timeout.
pub async fn resolve_ipv4(domain: &str, timeout: Duration) -> Vec<Ipv4Addr> {
    let lookup = tokio::net::lookup_host((domain, 0));
    let addrs = match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => {
            tracing::error!("DNS lookup failed for {}: {}", domain, e);
            return Vec::new();
        }
        Err(_) => {
            tracing::error!("DNS lookup timed out for {}", domain);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let ips: Vec<Ipv4Addr> = addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .filter(|ip| seen.insert(*ip))
        .collect();
    tracing::info!("DNS {} -> {:?}", domain, ips);
    ips
}

/// Turn subscription nodes into candidates on [`DEFAULT_PORT`], in node order
/// without duplicates. Domain nodes are resolved when `resolve_domains` is set
/// and dropped otherwise.
pub async fn subscription_candidates(
    nodes: &[ProxyNode],
    resolve_domains: bool,
    timeout: Duration,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for node in nodes {
        let addresses = if node.is_ip {
            vec![node.address.clone()]
        } else if resolve_domains {
            resolve_ipv4(&node.address, timeout)
                .await
                .iter()
                .map(Ipv4Addr::to_string)
                .collect()
        } else {
            continue;
        };

        for address in addresses {
            if seen.insert(address.clone()) {
                candidates.push(Candidate {
                    id: 0,
                    address,
                    port: DEFAULT_PORT,
                    label: node.name.clone(),
                });
            }
        }
    }
    candidates
}

// ============================================================================
// Services
// ============================================================================

pub fn format_candidate(candidate: &Candidate) -> String {
    format!("{}:{}", candidate.address, candidate.port)
}

/// Strip scheme and path from a URL or bare domain.
pub fn extract_domain(input: &str) -> String {
    let input = input.trim();
    if input.starts_with("http://") || input.starts_with("https://") {
        return reqwest::Url::parse(input)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
    }
    input.split('/').next().unwrap_or_default().to_string()
}

/// Whether `url` is an absolute `https://` URL with a host.
pub fn is_valid_https_url(url: &str) -> bool {
    match reqwest::Url::parse(url.trim()) {
        Ok(u) => u.scheme() == "https" && u.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}
