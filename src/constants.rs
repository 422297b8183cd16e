//! # Defaults and Limits
//!
//! Single source of truth for timeouts, size bounds, and well-known names
//! used across the CPI backends, the image resolver, and the reconciler.
//!
//! ## Cross-References
//!
//! - [`crate::image`]: registry timeouts, layer and tag bounds
//! - [`crate::cpi`]: container names, ports, readiness polling
//! - [`crate::logs`]: ring buffer capacity
//! - [`crate::lifecycle`]: readiness budget and follower grace period

use std::time::Duration;

// =============================================================================
// Container Defaults
// =============================================================================

/// Default name of the director container.
pub const DEFAULT_CONTAINER_NAME: &str = "director";

/// Default director image.
pub const DEFAULT_IMAGE: &str = "ghcr.io/director-box/director:latest";

/// Default bridge network name (also used for the Incus managed network).
pub const DEFAULT_NETWORK_NAME: &str = "director-net";

/// Default subnet for the director network.
pub const DEFAULT_SUBNET: &str = "10.245.0.0/16";

/// Host index of the director inside [`DEFAULT_SUBNET`] (gateway is `.1`).
pub const DIRECTOR_HOST_INDEX: u32 = 10;

/// Director API port inside the container.
pub const DIRECTOR_PORT: u16 = 25555;

/// SSH port inside the container.
pub const SSH_PORT: u16 = 22;

/// Default localhost port forwarded to [`SSH_PORT`] where ports are NAT-forwarded.
pub const DEFAULT_SSH_FORWARD_PORT: u16 = 2222;

/// Name prefix for backing volumes; the suffix is the volume role.
pub const VOLUME_PREFIX: &str = "director";

/// Volume roles created for the director: persistent store and ephemeral data.
pub const VOLUME_ROLES: [&str; 2] = ["store", "data"];

/// Mount points of [`VOLUME_ROLES`] inside the container, index-aligned.
pub const VOLUME_MOUNTS: [&str; 2] = ["/var/vcap/store", "/var/vcap/data"];

/// Default Docker socket path.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Default Incus socket path.
pub const INCUS_SOCKET: &str = "/var/lib/incus/unix.socket";

/// Default Incus storage pool for custom volumes.
pub const INCUS_STORAGE_POOL: &str = "default";

/// Registry URL Incus uses for OCI image sources on Docker Hub.
pub const INCUS_DOCKER_HUB_SERVER: &str = "https://docker.io";

// =============================================================================
// Images
// =============================================================================

/// Path of the director manifest embedded in every director image.
pub const DIRECTOR_MANIFEST_PATH: &str = "/var/vcap/director/manifest.yml";

/// Default registry for references without an explicit host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag for references without tag or digest.
pub const DEFAULT_TAG: &str = "latest";

/// Tags matching this pattern are considered version tags.
pub const VERSION_TAG_PATTERN: &str = r"^v?\d+(\.\d+)*(-[A-Za-z0-9.]+)?$";

/// Maximum image reference length in bytes.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Characters allowed in image references.
pub const IMAGE_REF_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/:.-_@";

/// Maximum number of layers scanned when extracting a file.
pub const MAX_LAYERS: usize = 128;

/// Maximum number of tags whose manifests are fetched by tag lookups.
pub const MAX_TAG_SCAN: usize = 200;

/// Maximum size of a single file read out of a layer (64 MiB).
pub const MAX_EXTRACTED_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Timeout applied to each registry request.
pub const REGISTRY_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Lifecycle Timing
// =============================================================================

/// Default readiness budget for a freshly started director.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between readiness probes.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Timeout of a single readiness probe request.
pub const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for the log follower to finish after cancellation.
pub const LOG_FOLLOW_GRACE: Duration = Duration::from_secs(2);

/// Interval between console transcript polls (Incus).
pub const LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Graceful stop timeout handed to the runtime.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for Incus background operations.
pub const INCUS_OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

// =============================================================================
// Log Capture
// =============================================================================

/// Capacity of the diagnostic log ring buffer (lines).
pub const LOG_BUFFER_CAPACITY: usize = 100;

/// Component whose messages are shown while waiting for readiness.
pub const MAIN_LOG_COMPONENT: &str = "director";

// =============================================================================
// Validation
// =============================================================================

/// Maximum container name length.
pub const MAX_CONTAINER_NAME_LEN: usize = 63;

/// Validates a container/instance name.
///
/// Both Docker and Incus accept this subset: ASCII alphanumerics and `-`,
/// starting with a letter.
pub fn validate_container_name(name: &str) -> crate::error::Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_CONTAINER_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(crate::error::Error::Config(format!(
            "invalid container name '{}': use up to {} letters, digits or '-', starting with a letter",
            name, MAX_CONTAINER_NAME_LEN
        )))
    }
}
