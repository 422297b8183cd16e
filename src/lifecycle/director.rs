//! The director API as seen from the lifecycle: a narrow client trait and
//! the transport description handed to whoever builds the client.

use crate::cpi::Cpi;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// How traffic reaches the director's network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Container addresses are routable from the host.
    Direct,
    /// Only forwarded localhost ports are reachable; traffic to the
    /// director network goes through the SSH tunnel at `host:port`.
    Tunnel { host: String, port: u16 },
}

/// Request-scoped connection settings for one director client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorConnection {
    /// Director API base URL.
    pub url: String,
    pub transport: Transport,
}

impl DirectorConnection {
    /// Derives the connection from a backend's reachability description.
    pub fn for_cpi(cpi: &dyn Cpi) -> Self {
        let transport = if cpi.has_direct_network_access() {
            Transport::Direct
        } else {
            Transport::Tunnel {
                host: Ipv4Addr::LOCALHOST.to_string(),
                port: cpi.ssh_port(),
            }
        };
        Self {
            url: cpi.director_url(),
            transport,
        }
    }

    /// Human-readable instructions for reaching the director.
    pub fn instructions(&self) -> Vec<String> {
        let mut lines = vec![format!("  Director URL: {}", self.url)];
        match &self.transport {
            Transport::Direct => {
                lines.push("  The director network is routed directly from this host.".to_string());
            }
            Transport::Tunnel { host, port } => {
                lines.push(format!("  SSH tunnel:   {}:{}", host, port));
                lines.push(
                    "  Deployed VMs are reachable only through the SSH tunnel.".to_string(),
                );
            }
        }
        lines
    }
}

/// A stemcell known to the director.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stemcell {
    pub name: String,
    pub version: String,
}

/// Stemcell to upload after start, unless the director already has it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StemcellSource {
    pub url: String,
    pub name: String,
    pub version: String,
}

impl StemcellSource {
    pub fn matches(&self, stemcell: &Stemcell) -> bool {
        self.name == stemcell.name && self.version == stemcell.version
    }
}

/// Operations the lifecycle performs against a ready director.
#[async_trait]
pub trait DirectorClient: Send + Sync {
    async fn update_cloud_config(&self, cloud_config: &[u8]) -> Result<()>;

    async fn stemcells(&self) -> Result<Vec<Stemcell>>;

    async fn upload_stemcell(&self, url: &str) -> Result<()>;
}

/// Builds a [`DirectorClient`] for a connection once the director is ready.
pub trait DirectorConnector: Send + Sync {
    fn connect(&self, connection: &DirectorConnection) -> Result<Arc<dyn DirectorClient>>;
}
