//! # Docker Backend
//!
//! Drives the Docker Engine API through `bollard`.
//!
//! ## Layout
//!
//! ```text
//!   host 127.0.0.1:<director_port> ──NAT──► container :25555
//!   host 127.0.0.1:<ssh_port>      ──NAT──► container :22
//!
//!   bridge network <network_name> (<subnet>, gateway .1)
//!     └── director container, static IP host #10, privileged
//!           ├── volume <prefix>-store → /var/vcap/store
//!           └── volume <prefix>-data  → /var/vcap/data
//! ```
//!
//! The container IP is not routable from the host on every platform, so
//! [`DockerCpi::has_direct_network_access`] is false and callers go through
//! the forwarded localhost ports.
//!
//! This is the only backend that keeps its image locally, so it also
//! implements [`ImageManaged`] for drift detection and upgrades.

use super::cloud_config::CloudConfig;
use super::readiness::{HttpInfoProbe, Liveness, ReadinessProbe, poll_until_ready};
use super::{BackendConfig, ContainerInfo, Cpi, FollowOptions, ImageManaged, LogSink, LogTail};
use crate::constants::{DIRECTOR_PORT, DOCKER_SOCKET, SSH_PORT, STOP_TIMEOUT};
use crate::error::{Error, Result};
use crate::image::{ImageReference, ImageResolver};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, EndpointIpamConfig, EndpointSettings,
    HostConfig, ImageInspect, Ipam, IpamConfig, Mount, MountTypeEnum, NetworkCreateRequest,
    NetworkingConfig, PortBinding, VolumeCreateOptions,
};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, InspectContainerOptions, InspectNetworkOptions,
    LogsOptions, RemoveContainerOptions, RemoveVolumeOptions, StartContainerOptions,
    StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const BACKEND: &str = "docker";
const CONNECT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn is_not_found(e: &DockerError) -> bool {
    matches!(
        e,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn runtime_error(operation: &'static str, e: DockerError) -> Error {
    Error::Runtime {
        backend: BACKEND,
        operation,
        reason: e.to_string(),
    }
}

fn logs_error(container: &str, operation: &'static str, e: DockerError) -> Error {
    if is_not_found(&e) {
        Error::ContainerNotFound(container.to_string())
    } else {
        runtime_error(operation, e)
    }
}

/// Registry digests the engine recorded for `reference`'s repository.
fn recorded_digests(reference: &ImageReference, image: &ImageInspect) -> Vec<String> {
    let repository = reference.name();
    image
        .repo_digests
        .iter()
        .flatten()
        .filter_map(|entry| ImageReference::parse(entry).ok())
        .filter(|r| r.name() == repository)
        .filter_map(|r| r.digest)
        .collect()
}

/// Treats a 404 as success; deletes are idempotent.
fn ignore_not_found(
    result: std::result::Result<(), DockerError>,
) -> std::result::Result<(), DockerError> {
    match result {
        Err(e) if is_not_found(&e) => Ok(()),
        other => other,
    }
}

// =============================================================================
// DockerCpi
// =============================================================================

/// [`Cpi`] over the Docker Engine API.
pub struct DockerCpi {
    client: Docker,
    config: BackendConfig,
    resolver: ImageResolver,
    probe: Arc<dyn ReadinessProbe>,
}

impl DockerCpi {
    pub fn new(
        client: Docker,
        config: BackendConfig,
        resolver: ImageResolver,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            client,
            config,
            resolver,
            probe,
        }
    }

    /// Connects to the configured socket (default [`DOCKER_SOCKET`]) and
    /// probes the director through the forwarded localhost port.
    pub fn connect(config: BackendConfig, resolver: ImageResolver) -> Result<Self> {
        let socket = config
            .socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(DOCKER_SOCKET));
        let client = Docker::connect_with_unix(
            &socket.to_string_lossy(),
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| runtime_error("connect", e))?;

        let probe = HttpInfoProbe::new(&format!(
            "https://{}:{}",
            Ipv4Addr::LOCALHOST,
            config.director_port
        ))?;
        Ok(Self::new(client, config, resolver, Arc::new(probe)))
    }

    fn name(&self) -> &str {
        &self.config.container_name
    }

    /// Name the engine knows the configured image by.
    fn image_name(&self) -> String {
        self.config.image.registry_reference()
    }

    async fn inspect(&self) -> Result<Option<ContainerInspectResponse>> {
        match self
            .client
            .inspect_container(self.name(), None::<InspectContainerOptions>)
            .await
        {
            Ok(details) => Ok(Some(details)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(runtime_error("inspect container", e)),
        }
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageInspect>> {
        match self.client.inspect_image(image).await {
            Ok(details) => Ok(Some(details)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(runtime_error("inspect image", e)),
        }
    }

    async fn ensure_volume(&self, name: &str) -> Result<()> {
        match self.client.inspect_volume(name).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(runtime_error("inspect volume", e)),
        }

        info!("Creating volume {}", name);
        self.client
            .create_volume(VolumeCreateOptions {
                name: Some(name.to_string()),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::CreateFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn ensure_network(&self) -> Result<()> {
        let network = &self.config.network_name;
        match self
            .client
            .inspect_network(network, None::<InspectNetworkOptions>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(runtime_error("inspect network", e)),
        }

        let subnet = self.config.subnet;
        info!("Creating network {} ({})", network, subnet);
        let request = NetworkCreateRequest {
            name: network.clone(),
            driver: Some("bridge".to_string()),
            ipam: Some(Ipam {
                config: Some(vec![IpamConfig {
                    subnet: Some(subnet.to_string()),
                    gateway: Some(subnet.gateway().to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.client
            .create_network(request)
            .await
            .map_err(|e| Error::CreateFailed {
                name: network.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn pull(&self) -> Result<()> {
        let image = self.image_name();
        info!("Pulling {}", image);

        let options = CreateImageOptions {
            from_image: Some(image.clone()),
            ..Default::default()
        };
        let mut progress = self.client.create_image(Some(options), None, None);
        while let Some(update) = progress.next().await {
            update.map_err(|e| Error::Registry {
                operation: "pull image",
                reference: image.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn create_container(&self) -> Result<()> {
        let name = self.name().to_string();
        let ip = self.config.director_ip()?;

        let mut port_bindings = HashMap::new();
        for (container_port, host_port) in [
            (DIRECTOR_PORT, self.config.director_port),
            (SSH_PORT, self.config.ssh_port),
        ] {
            port_bindings.insert(
                format!("{}/tcp", container_port),
                Some(vec![PortBinding {
                    host_ip: Some(Ipv4Addr::LOCALHOST.to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let mounts = self
            .config
            .volumes()
            .into_iter()
            .map(|(volume, target)| Mount {
                source: Some(volume),
                target: Some(target.to_string()),
                typ: Some(MountTypeEnum::VOLUME),
                ..Default::default()
            })
            .collect();

        let mut endpoints = HashMap::new();
        endpoints.insert(
            self.config.network_name.clone(),
            EndpointSettings {
                ipam_config: Some(EndpointIpamConfig {
                    ipv4_address: Some(ip.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let body = ContainerCreateBody {
            image: Some(self.image_name()),
            hostname: Some(name.clone()),
            host_config: Some(HostConfig {
                privileged: Some(true),
                mounts: Some(mounts),
                port_bindings: Some(port_bindings),
                network_mode: Some(self.config.network_name.clone()),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: Some(endpoints),
            }),
            ..Default::default()
        };

        info!("Creating container {} ({}) at {}", name, self.image_name(), ip);
        self.client
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                body,
            )
            .await
            .map_err(|e| match &e {
                DockerError::DockerResponseServerError {
                    status_code: 404, ..
                } => Error::ImageNotFound(self.image_name()),
                _ => Error::CreateFailed {
                    name,
                    reason: e.to_string(),
                },
            })?;
        Ok(())
    }

    async fn start_created(&self) -> Result<()> {
        info!("Starting {}", self.name());
        self.client
            .start_container(self.name(), None::<StartContainerOptions>)
            .await
            .map_err(|e| Error::StartFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }

    async fn stop_container(&self) -> Result<()> {
        let options = StopContainerOptions {
            t: Some(STOP_TIMEOUT.as_secs() as i32),
            signal: None,
        };
        ignore_not_found(self.client.stop_container(self.name(), Some(options)).await).map_err(
            |e| Error::StopFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            },
        )
    }

    async fn remove_container_only(&self, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: false,
            ..Default::default()
        };
        ignore_not_found(self.client.remove_container(self.name(), Some(options)).await).map_err(
            |e| Error::DeleteFailed {
                resource: "container",
                name: self.name().to_string(),
                reason: e.to_string(),
            },
        )
    }

    async fn liveness(&self) -> Result<Liveness> {
        let Some(details) = self.inspect().await? else {
            return Ok(Liveness::Exited(None));
        };
        let state = details.state.unwrap_or_default();
        if state.running.unwrap_or(false) {
            Ok(Liveness::Running)
        } else {
            Ok(Liveness::Exited(state.exit_code))
        }
    }

    /// Pinned reference of the image the container was created from.
    async fn running_image(&self) -> Result<ImageReference> {
        let image_id = self
            .inspect()
            .await?
            .and_then(|details| details.image)
            .unwrap_or_else(|| self.image_name());

        let image = self
            .inspect_image(&image_id)
            .await?
            .ok_or_else(|| Error::ImageNotFound(image_id.clone()))?;

        let digest = recorded_digests(&self.config.image, &image)
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::ManifestDiff(format!("image {} has no recorded registry digest", image_id))
            })?;
        Ok(self.config.image.with_digest(digest))
    }
}

#[async_trait]
impl Cpi for DockerCpi {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn start(&self) -> Result<()> {
        if self.inspect_image(&self.image_name()).await?.is_none() {
            self.pull().await?;
        }

        let Some(details) = self.inspect().await? else {
            self.create_container().await?;
            return self.start_created().await;
        };
        if details.state.and_then(|s| s.running).unwrap_or(false) {
            debug!("{} already running", self.name());
            return Ok(());
        }
        self.start_created().await
    }

    async fn stop(&self) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        info!("Stopping {}", self.name());
        self.stop_container().await
    }

    async fn destroy(&self) -> Result<()> {
        info!("Destroying {} and its volumes", self.name());
        self.remove_container_only(true).await?;

        for (volume, _) in self.config.volumes() {
            ignore_not_found(
                self.client
                    .remove_volume(&volume, None::<RemoveVolumeOptions>)
                    .await,
            )
            .map_err(|e| Error::DeleteFailed {
                resource: "volume",
                name: volume.clone(),
                reason: e.to_string(),
            })?;
        }

        let network = &self.config.network_name;
        ignore_not_found(self.client.remove_network(network).await).map_err(|e| {
            Error::DeleteFailed {
                resource: "network",
                name: network.clone(),
                reason: e.to_string(),
            }
        })
    }

    async fn ensure_prerequisites(&self) -> Result<()> {
        for (volume, _) in self.config.volumes() {
            self.ensure_volume(&volume).await?;
        }
        self.ensure_network().await
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self
            .inspect()
            .await?
            .and_then(|d| d.state)
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.inspect().await?.is_some())
    }

    async fn container_info(&self) -> Result<ContainerInfo> {
        let details = self
            .inspect()
            .await?
            .ok_or_else(|| Error::ContainerNotFound(self.name().to_string()))?;

        let network = details
            .network_settings
            .and_then(|s| s.networks)
            .and_then(|nets| nets.into_keys().next())
            .unwrap_or_else(|| self.config.network_name.clone());

        Ok(ContainerInfo {
            name: details
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            created: details.created.map(|dt| dt.to_string()).unwrap_or_default(),
            network,
        })
    }

    async fn exec_command(&self, container: &str, cmd: &[String]) -> Result<String> {
        let exec_error = |exit_code, stderr: String| Error::ExecFailed {
            container: container.to_string(),
            exit_code,
            stderr,
        };

        let config = bollard::models::ExecConfig {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .client
            .create_exec(container, config)
            .await
            .map_err(|e| match &e {
                DockerError::DockerResponseServerError {
                    status_code: 404, ..
                } => Error::ContainerNotFound(container.to_string()),
                _ => exec_error(None, e.to_string()),
            })?;

        let started = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| exec_error(None, e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(item) = output.next().await {
                match item.map_err(|e| exec_error(None, e.to_string()))? {
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    other => stdout.extend_from_slice(&other.into_bytes()),
                }
            }
        }

        let inspected = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| runtime_error("inspect exec", e))?;
        match inspected.exit_code {
            Some(0) | None => Ok(String::from_utf8_lossy(&stdout).into_owned()),
            Some(code) => Err(exec_error(
                Some(code),
                String::from_utf8_lossy(&stderr).trim_end().to_string(),
            )),
        }
    }

    async fn get_logs(&self, tail: LogTail) -> Result<String> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            follow: false,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut output = Vec::new();
        let mut stream = self.client.logs(self.name(), Some(options));
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| logs_error(self.name(), "logs", e))?;
            output.extend_from_slice(&chunk.into_bytes());
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    async fn follow_logs(
        &self,
        cancel: CancellationToken,
        options: FollowOptions,
        mut stdout: LogSink,
        mut stderr: LogSink,
    ) -> Result<()> {
        let log_options = LogsOptions {
            stdout: true,
            stderr: true,
            follow: options.follow,
            tail: options.tail.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.logs(self.name(), Some(log_options));

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                item = stream.next() => item,
            };
            // The stream ends when the container exits.
            let Some(item) = item else { break };
            match item.map_err(|e| logs_error(self.name(), "follow logs", e))? {
                LogOutput::StdErr { message } => stderr.write_all(&message)?,
                other => stdout.write_all(&other.into_bytes())?,
            }
        }

        stdout.flush()?;
        stderr.flush()?;
        Ok(())
    }

    async fn wait_for_ready(&self, cancel: &CancellationToken, max_wait: Duration) -> Result<()> {
        poll_until_ready(self.name(), cancel, max_wait, self.probe.as_ref(), || {
            self.liveness()
        })
        .await
    }

    fn cloud_config_bytes(&self) -> Result<Vec<u8>> {
        CloudConfig::for_network(&self.config.subnet, &self.config.network_name)?.to_yaml_bytes()
    }

    fn container_name(&self) -> &str {
        self.name()
    }

    fn container_ip(&self) -> Ipv4Addr {
        self.config
            .director_ip()
            .unwrap_or(self.config.subnet.gateway())
    }

    fn director_port(&self) -> u16 {
        self.config.director_port
    }

    fn ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    fn has_direct_network_access(&self) -> bool {
        false
    }

    fn image_managed(&self) -> Option<&dyn ImageManaged> {
        Some(self)
    }
}

#[async_trait]
impl ImageManaged for DockerCpi {
    async fn check_for_image_update(&self) -> Result<bool> {
        let image = self.image_name();
        let Some(local) = self.inspect_image(&image).await? else {
            info!("{} is not present locally", image);
            return Ok(true);
        };

        let recorded = recorded_digests(&self.config.image, &local);
        if recorded.is_empty() {
            info!("{} has no recorded registry digest", image);
            return Ok(true);
        }

        let (_, remote) = self.resolver.resolve_image_ref(&self.config.image).await?;
        let outdated = !recorded.contains(&remote);
        debug!(
            "{}: local {:?}, registry {}, update: {}",
            image, recorded, remote, outdated
        );
        Ok(outdated)
    }

    async fn manifest_diff(&self) -> Result<String> {
        let current = self.running_image().await?;
        self.resolver
            .get_manifest_diff(&current, &self.config.image)
            .await
    }

    async fn pull_image(&self) -> Result<()> {
        self.pull().await
    }

    async fn remove_container(&self) -> Result<()> {
        self.stop_container().await?;
        self.remove_container_only(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str =
        "sha256:1111111111111111111111111111111111111111111111111111111111111111";
    const OTHER: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";

    fn inspect(repo_digests: &[&str]) -> ImageInspect {
        ImageInspect {
            repo_digests: Some(repo_digests.iter().map(|d| d.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_recorded_digests_filters_by_repository() {
        let reference = ImageReference::parse("ghcr.io/acme/director:latest").unwrap();
        let image = inspect(&[
            &format!("ghcr.io/acme/other@{}", OTHER),
            &format!("ghcr.io/acme/director@{}", CURRENT),
            "not a reference",
        ]);

        assert_eq!(recorded_digests(&reference, &image), vec![CURRENT.to_string()]);
    }

    #[test]
    fn test_recorded_digests_expands_docker_hub_names() {
        let reference = ImageReference::parse("acme/director").unwrap();
        let image = inspect(&[&format!("docker.io/acme/director@{}", CURRENT)]);

        assert_eq!(recorded_digests(&reference, &image), vec![CURRENT.to_string()]);
    }

    #[test]
    fn test_recorded_digests_empty_without_repo_digests() {
        let reference = ImageReference::parse("ghcr.io/acme/director:latest").unwrap();
        assert!(recorded_digests(&reference, &ImageInspect::default()).is_empty());
    }

    #[test]
    fn test_logs_not_found_maps_to_container_not_found() {
        let e = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: director".to_string(),
        };
        assert!(matches!(
            logs_error("director", "follow logs", e),
            Error::ContainerNotFound(name) if name == "director"
        ));
    }
}
