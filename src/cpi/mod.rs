//! # Container Provider Interface
//!
//! One lifecycle contract for the director container, implemented by two
//! very different runtimes:
//!
//! | | Docker ([`docker::DockerCpi`]) | Incus ([`incus::IncusCpi`]) |
//! |---|---|---|
//! | API | Engine API (`bollard`) | REST over unix socket (`hyper`) |
//! | Image | pulled locally | OCI image source, pulled by Incus |
//! | Storage | named volumes | custom volumes in a pool |
//! | Logs | engine log stream | console transcript polling |
//! | Reachability | NAT-forwarded localhost ports | direct routing to instance IP |
//! | [`ImageManaged`] | yes | no |
//!
//! The reconciler is runtime-agnostic: it only sees `dyn Cpi`. Optional
//! capabilities are discovered through [`Cpi::image_managed`], never by
//! checking which backend is in use.
//!
//! ## Cancellation
//!
//! Long-running calls ([`Cpi::follow_logs`], [`Cpi::wait_for_ready`]) take a
//! [`CancellationToken`] and return [`Error::Cancelled`] promptly when it
//! fires; polling loops select on it every iteration.

pub mod cloud_config;
pub mod docker;
pub mod incus;
pub mod readiness;

use crate::constants::{
    DEFAULT_CONTAINER_NAME, DEFAULT_NETWORK_NAME, DEFAULT_SSH_FORWARD_PORT, DIRECTOR_HOST_INDEX,
    DIRECTOR_PORT, INCUS_STORAGE_POOL, VOLUME_MOUNTS, VOLUME_PREFIX, VOLUME_ROLES,
};
use crate::error::{Error, Result};
use crate::image::ImageReference;
use crate::net::Ipv4Subnet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use cloud_config::CloudConfig;
pub use docker::DockerCpi;
pub use incus::IncusCpi;
pub use readiness::{HttpInfoProbe, Liveness, ReadinessProbe, poll_until_ready};

/// Destination for log bytes; owned by the follower task.
pub type LogSink = Box<dyn Write + Send>;

// =============================================================================
// Observed State
// =============================================================================

/// Lifecycle state of the director container as seen by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No container.
    Absent,
    /// Container present but not running.
    Stopped,
    /// Container running.
    Running,
}

impl LifecycleState {
    /// Derives the state from the two CPI queries.
    pub fn from_flags(exists: bool, running: bool) -> Self {
        match (exists, running) {
            (_, true) => Self::Running,
            (true, false) => Self::Stopped,
            (false, false) => Self::Absent,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Snapshot of the container, taken per query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    /// Creation time as reported by the runtime.
    pub created: String,
    /// Network the container is attached to.
    pub network: String,
}

// =============================================================================
// Log Options
// =============================================================================

/// How much history to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTail {
    #[default]
    All,
    Lines(usize),
}

impl LogTail {
    /// Keeps the last lines of `text` according to this tail.
    pub fn apply<'a>(&self, text: &'a str) -> &'a str {
        let Self::Lines(n) = *self else {
            return text;
        };
        if n == 0 {
            return "";
        }
        let trimmed = text.strip_suffix('\n').unwrap_or(text);
        match trimmed.rmatch_indices('\n').nth(n - 1) {
            Some((i, _)) => &text[i + 1..],
            None => text,
        }
    }
}

impl fmt::Display for LogTail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Lines(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for LogTail {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse()
            .map(Self::Lines)
            .map_err(|_| Error::Config(format!("invalid tail '{}': expected 'all' or a line count", s)))
    }
}

/// Options for [`Cpi::follow_logs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FollowOptions {
    /// Keep streaming new output after the replay.
    pub follow: bool,
    /// History to replay first.
    pub tail: LogTail,
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Static description of the director container, shared by both backends.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub container_name: String,
    pub image: ImageReference,
    pub network_name: String,
    pub subnet: Ipv4Subnet,
    /// Localhost port forwarded to the director API (Docker only; Incus
    /// reaches the container port directly).
    pub director_port: u16,
    /// Localhost port forwarded to SSH (Docker only).
    pub ssh_port: u16,
    /// Prefix for volume names, suffixed with the role.
    pub volume_prefix: String,
    /// Incus storage pool for custom volumes.
    pub storage_pool: String,
    /// Runtime socket; backend default when `None`.
    pub socket: Option<PathBuf>,
}

impl BackendConfig {
    /// Defaults for the given image.
    pub fn new(image: ImageReference) -> Self {
        Self {
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            image,
            network_name: DEFAULT_NETWORK_NAME.to_string(),
            subnet: Ipv4Subnet::default(),
            director_port: DIRECTOR_PORT,
            ssh_port: DEFAULT_SSH_FORWARD_PORT,
            volume_prefix: VOLUME_PREFIX.to_string(),
            storage_pool: INCUS_STORAGE_POOL.to_string(),
            socket: None,
        }
    }

    /// Static address of the director inside the subnet.
    pub fn director_ip(&self) -> Result<Ipv4Addr> {
        self.subnet.nth_host(DIRECTOR_HOST_INDEX).ok_or_else(|| {
            Error::Config(format!(
                "subnet {} has no host #{} for the director",
                self.subnet, DIRECTOR_HOST_INDEX
            ))
        })
    }

    /// `(volume name, mount path)` pairs.
    pub fn volumes(&self) -> Vec<(String, &'static str)> {
        VOLUME_ROLES
            .iter()
            .zip(VOLUME_MOUNTS)
            .map(|(role, mount)| (format!("{}-{}", self.volume_prefix, role), mount))
            .collect()
    }
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Lifecycle contract for the director container.
///
/// `start`, `stop` and `destroy` are idempotent.
#[async_trait]
pub trait Cpi: Send + Sync {
    /// Backend name for messages ("docker", "incus").
    fn backend_name(&self) -> &'static str;

    /// Ensures the image is available, creates the container if absent,
    /// and starts it.
    async fn start(&self) -> Result<()>;

    /// Stops the container if it is running.
    async fn stop(&self) -> Result<()>;

    /// Removes the container, its volumes and its network.
    async fn destroy(&self) -> Result<()>;

    /// Creates missing volumes and the network.
    async fn ensure_prerequisites(&self) -> Result<()>;

    async fn is_running(&self) -> Result<bool>;

    /// True for stopped-but-present containers too.
    async fn exists(&self) -> Result<bool>;

    /// Snapshot of the container, or [`Error::ContainerNotFound`].
    async fn container_info(&self) -> Result<ContainerInfo>;

    /// Runs `cmd` inside `container` and returns its stdout.
    ///
    /// A non-zero exit surfaces as [`Error::ExecFailed`] with the exit code
    /// and stderr.
    async fn exec_command(&self, container: &str, cmd: &[String]) -> Result<String>;

    /// Historical logs as one string.
    async fn get_logs(&self, tail: LogTail) -> Result<String>;

    /// Replays history and, if `options.follow` is set, keeps streaming
    /// until `cancel` fires or the container exits. Cancellation is a
    /// normal return, not an error.
    async fn follow_logs(
        &self,
        cancel: CancellationToken,
        options: FollowOptions,
        stdout: LogSink,
        stderr: LogSink,
    ) -> Result<()>;

    /// Polls the director until it answers, the container exits
    /// ([`Error::ContainerExited`]), `max_wait` elapses
    /// ([`Error::ReadinessTimeout`]) or `cancel` fires ([`Error::Cancelled`]).
    async fn wait_for_ready(&self, cancel: &CancellationToken, max_wait: Duration) -> Result<()>;

    /// Cloud-config matching this backend's network layout.
    fn cloud_config_bytes(&self) -> Result<Vec<u8>>;

    fn container_name(&self) -> &str;

    /// Address of the container on its network.
    fn container_ip(&self) -> Ipv4Addr;

    fn director_port(&self) -> u16;

    fn ssh_port(&self) -> u16;

    /// True if the container IP is routable from the host.
    fn has_direct_network_access(&self) -> bool;

    /// Host callers should connect to.
    fn director_host(&self) -> String {
        if self.has_direct_network_access() {
            self.container_ip().to_string()
        } else {
            Ipv4Addr::LOCALHOST.to_string()
        }
    }

    fn director_url(&self) -> String {
        format!("https://{}:{}", self.director_host(), self.director_port())
    }

    /// Image drift detection and upgrade hooks, if this backend manages
    /// its image locally.
    fn image_managed(&self) -> Option<&dyn ImageManaged> {
        None
    }
}

/// Optional capability of backends that keep the director image locally.
#[async_trait]
pub trait ImageManaged: Send + Sync {
    /// True if the image is missing locally, has no recorded registry
    /// digest, or the recorded digest differs from the registry's.
    async fn check_for_image_update(&self) -> Result<bool>;

    /// Report of how the embedded director manifest changes between the
    /// running image and the configured one; empty if identical.
    async fn manifest_diff(&self) -> Result<String>;

    async fn pull_image(&self) -> Result<()>;

    /// Stops and removes the container only; volumes are kept.
    async fn remove_container(&self) -> Result<()>;
}
