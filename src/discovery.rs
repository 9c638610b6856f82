//! Node discovery for the cluster observer.
//!
//! Discovery is a pure input to the poller: something turns configuration or
//! the environment into a list of [`NodeEndpoint`]s once per cycle. The
//! sidecar ships a static list and an environment-variable source; anything
//! smarter (in-cluster service discovery) plugs in through the same trait.

use crate::error::{LookoutError, Result};
use crate::types::NodeEndpoint;
use async_trait::async_trait;

/// Source of the configured node list.
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    /// Produce the current node list. Called once per poll cycle.
    async fn nodes(&self) -> Result<Vec<NodeEndpoint>>;
}

/// Fixed node list taken from configuration.
pub struct StaticDiscovery {
    endpoints: Vec<NodeEndpoint>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<NodeEndpoint>) -> Self {
        Self { endpoints }
    }

    /// Parse `host[:port]` entries, filling in the default port and deriving
    /// pod identities from stateful-set style hostnames.
    pub fn from_entries(
        entries: &[String],
        default_port: u16,
        namespace: Option<&str>,
    ) -> Result<Self> {
        let endpoints = entries
            .iter()
            .map(|entry| parse_endpoint(entry, default_port, namespace))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(endpoints))
    }
}

#[async_trait]
impl NodeDiscovery for StaticDiscovery {
    async fn nodes(&self) -> Result<Vec<NodeEndpoint>> {
        Ok(self.endpoints.clone())
    }
}

/// Node list read from an environment variable on every cycle, so a rolling
/// restart that rewrites the variable is picked up without a sidecar restart.
pub struct EnvDiscovery {
    var: String,
    default_port: u16,
    namespace: Option<String>,
}

impl EnvDiscovery {
    /// Environment variable holding the node list.
    pub const DEFAULT_VAR: &'static str = "LOOKOUT_NODES";

    pub fn new(var: impl Into<String>, default_port: u16, namespace: Option<String>) -> Self {
        Self {
            var: var.into(),
            default_port,
            namespace,
        }
    }
}

#[async_trait]
impl NodeDiscovery for EnvDiscovery {
    async fn nodes(&self) -> Result<Vec<NodeEndpoint>> {
        let raw = std::env::var(&self.var).map_err(|_| {
            LookoutError::Config(format!("Environment variable {} is not set", self.var))
        })?;

        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| parse_endpoint(entry, self.default_port, self.namespace.as_deref()))
            .collect()
    }
}

/// Parse a single `host[:port]` entry.
///
/// A hostname of the form `pod-0.service.namespace...` carries its pod name
/// as the first label; bare hostnames carry no pod identity and the
/// node-disk backend skips them.
fn parse_endpoint(entry: &str, default_port: u16, namespace: Option<&str>) -> Result<NodeEndpoint> {
    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().map_err(|_| {
                LookoutError::Config(format!("Invalid port in node entry '{}'", entry))
            })?;
            (host, port)
        }
        None => (entry, default_port),
    };

    if host.is_empty() {
        return Err(LookoutError::Config(format!(
            "Empty host in node entry '{}'",
            entry
        )));
    }

    let pod = host
        .split_once('.')
        .map(|(first, _)| first.to_string());

    Ok(NodeEndpoint {
        host: host.to_string(),
        port,
        namespace: namespace.map(str::to_string),
        pod,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_with_port() {
        let ep = parse_endpoint("db-0.db-headless.vector:6333", 1234, Some("vector")).unwrap();
        assert_eq!(ep.host, "db-0.db-headless.vector");
        assert_eq!(ep.port, 6333);
        assert_eq!(ep.pod.as_deref(), Some("db-0"));
        assert_eq!(ep.namespace.as_deref(), Some("vector"));
    }

    #[test]
    fn test_parse_host_without_port_uses_default() {
        let ep = parse_endpoint("localhost", 6333, None).unwrap();
        assert_eq!(ep.port, 6333);
        assert!(ep.pod.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(parse_endpoint("host:not-a-port", 6333, None).is_err());
        assert!(parse_endpoint(":6333", 6333, None).is_err());
    }

    #[tokio::test]
    async fn test_static_discovery_round_trip() {
        let discovery = StaticDiscovery::from_entries(
            &["a:1".to_string(), "b:2".to_string()],
            6333,
            None,
        )
        .unwrap();
        let nodes = discovery.nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].url(), "http://b:2");
    }

    #[tokio::test]
    async fn test_env_discovery_parses_list() {
        std::env::set_var("LOOKOUT_TEST_NODES", "db-0.svc:6333, db-1.svc:6333,");
        let discovery = EnvDiscovery::new("LOOKOUT_TEST_NODES", 6333, Some("vector".into()));
        let nodes = discovery.nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].pod.as_deref(), Some("db-0"));
        std::env::remove_var("LOOKOUT_TEST_NODES");
    }
}
