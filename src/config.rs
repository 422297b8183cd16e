//! Operator configuration: an optional JSON file layered under CLI flags.
//!
//! Every field has a default from [`crate::constants`], so an empty file
//! (or no file) yields a working Docker setup.

use crate::constants::{
    DEFAULT_CONTAINER_NAME, DEFAULT_IMAGE, DEFAULT_NETWORK_NAME, DEFAULT_READY_TIMEOUT,
    DEFAULT_SSH_FORWARD_PORT, DEFAULT_SUBNET, DIRECTOR_MANIFEST_PATH, DIRECTOR_PORT,
    INCUS_STORAGE_POOL, VOLUME_PREFIX, validate_container_name,
};
use crate::cpi::BackendConfig;
use crate::error::{Error, Result};
use crate::image::ImageReference;
use crate::lifecycle::{ReconcilerOptions, StemcellSource};
use crate::net::Ipv4Subnet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Container runtime backing the director.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Incus,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Docker => write!(f, "docker"),
            Self::Incus => write!(f, "incus"),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "incus" => Ok(Self::Incus),
            other => Err(Error::Config(format!(
                "unknown runtime '{}' (expected docker or incus)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub runtime: RuntimeKind,
    pub container_name: String,
    pub image: String,
    pub network_name: String,
    pub subnet: String,
    pub volume_prefix: String,
    /// Incus only.
    pub storage_pool: String,
    /// Docker only: host port forwarded to the container's sshd.
    pub ssh_port: u16,
    pub socket: Option<PathBuf>,
    pub ready_timeout_secs: u64,
    pub director_manifest_path: String,
    pub stemcell: Option<StemcellSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            network_name: DEFAULT_NETWORK_NAME.to_string(),
            subnet: DEFAULT_SUBNET.to_string(),
            volume_prefix: VOLUME_PREFIX.to_string(),
            storage_pool: INCUS_STORAGE_POOL.to_string(),
            ssh_port: DEFAULT_SSH_FORWARD_PORT,
            socket: None,
            ready_timeout_secs: DEFAULT_READY_TIMEOUT.as_secs(),
            director_manifest_path: DIRECTOR_MANIFEST_PATH.to_string(),
            stemcell: None,
        }
    }
}

impl Config {
    /// Reads a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_container_name(&self.container_name)?;
        self.image_reference()?;
        self.backend_config()?.director_ip()?;
        if self.ready_timeout_secs == 0 {
            return Err(Error::Config(
                "ready_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.ssh_port == DIRECTOR_PORT {
            return Err(Error::Config(format!(
                "ssh_port {} collides with the director port",
                self.ssh_port
            )));
        }
        Ok(())
    }

    pub fn image_reference(&self) -> Result<ImageReference> {
        ImageReference::parse(&self.image)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn backend_config(&self) -> Result<BackendConfig> {
        let mut backend = BackendConfig::new(self.image_reference()?);
        backend.container_name = self.container_name.clone();
        backend.network_name = self.network_name.clone();
        backend.subnet = self.subnet.parse::<Ipv4Subnet>()?;
        backend.volume_prefix = self.volume_prefix.clone();
        backend.storage_pool = self.storage_pool.clone();
        backend.ssh_port = self.ssh_port;
        backend.socket = self.socket.clone();
        Ok(backend)
    }

    pub fn reconciler_options(&self, colorize: bool) -> ReconcilerOptions {
        ReconcilerOptions {
            ready_timeout: self.ready_timeout(),
            stemcell: self.stemcell.clone(),
            colorize,
        }
    }
}
