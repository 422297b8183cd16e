//! # Incus Backend
//!
//! Talks to the Incus REST API over its unix socket with a minimal `hyper`
//! HTTP/1 client; one connection per request.
//!
//! ## API Mapping
//!
//! | Operation | Request |
//! |-----------|---------|
//! | exists / info | `GET /1.0/instances/{name}` |
//! | state | `GET /1.0/instances/{name}/state` |
//! | create | `POST /1.0/instances` (OCI image source) |
//! | start / stop | `PUT /1.0/instances/{name}/state` |
//! | delete | `DELETE /1.0/instances/{name}` |
//! | exec | `POST /1.0/instances/{name}/exec` with `record-output` |
//! | logs | `GET /1.0/instances/{name}/console` (polled) |
//! | volumes | `/1.0/storage-pools/{pool}/volumes/custom[/{name}]` |
//! | network | `/1.0/networks[/{name}]` |
//!
//! Background operations (`"type": "async"`) are awaited through
//! `GET /1.0/operations/{id}/wait`.
//!
//! The instance gets a static address on a managed bridge and is routed
//! directly from the host, so no ports are forwarded and
//! [`IncusCpi::has_direct_network_access`] is true.

use super::cloud_config::CloudConfig;
use super::readiness::{HttpInfoProbe, Liveness, ReadinessProbe, poll_until_ready};
use super::{BackendConfig, ContainerInfo, Cpi, FollowOptions, LogSink, LogTail};
use crate::constants::{
    DEFAULT_REGISTRY, DIRECTOR_PORT, INCUS_DOCKER_HUB_SERVER, INCUS_OPERATION_TIMEOUT,
    INCUS_SOCKET, LOG_POLL_INTERVAL, SSH_PORT, STOP_TIMEOUT,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BACKEND: &str = "incus";

fn runtime_error(operation: &'static str, reason: impl ToString) -> Error {
    Error::Runtime {
        backend: BACKEND,
        operation,
        reason: reason.to_string(),
    }
}

// =============================================================================
// REST Client
// =============================================================================

/// Standard Incus response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error_code: u16,
    #[serde(default)]
    error: String,
    #[serde(default)]
    operation: String,
    #[serde(default)]
    metadata: Value,
}

struct IncusClient {
    socket: PathBuf,
}

impl IncusClient {
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, Bytes)> {
        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| runtime_error(operation, format!("{}: {}", self.socket.display(), e)))?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| runtime_error(operation, e))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("incus connection closed: {}", e);
            }
        });

        let payload = match body {
            Some(value) => Bytes::from(serde_json::to_vec(value)?),
            None => Bytes::new(),
        };
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "incus")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(|e| runtime_error(operation, e))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| runtime_error(operation, e))?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| runtime_error(operation, e))?
            .to_bytes();
        Ok((status, bytes))
    }

    /// JSON call; `None` when the object does not exist.
    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Envelope>> {
        let (status, bytes) = self.send(operation, method, path, body).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| {
            runtime_error(
                operation,
                format!("{} {}: {}", status, String::from_utf8_lossy(&bytes), e),
            )
        })?;
        match envelope.kind.as_str() {
            "error" if envelope.error_code == 404 => Ok(None),
            "error" => Err(runtime_error(operation, envelope.error)),
            "async" => self.wait(operation, &envelope.operation).await.map(Some),
            _ => Ok(Some(envelope)),
        }
    }

    /// Waits for a background operation; returns its metadata envelope.
    async fn wait(&self, operation: &'static str, op_path: &str) -> Result<Envelope> {
        let path = format!("{}/wait?timeout={}", op_path, INCUS_OPERATION_TIMEOUT.as_secs());
        let bound = INCUS_OPERATION_TIMEOUT + Duration::from_secs(10);
        let waited = tokio::time::timeout(bound, self.send(operation, Method::GET, &path, None))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("incus {}", operation),
                duration: bound,
            })??;

        let (_, bytes) = waited;
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if envelope.kind == "error" {
            return Err(runtime_error(operation, envelope.error));
        }

        let op = &envelope.metadata;
        if op["status"].as_str() != Some("Success") {
            let reason = op["err"].as_str().filter(|s| !s.is_empty()).unwrap_or("operation failed");
            return Err(runtime_error(operation, reason));
        }
        Ok(envelope)
    }

    /// Raw GET for non-JSON endpoints; `None` on 404.
    async fn get_raw(&self, operation: &'static str, path: &str) -> Result<Option<Bytes>> {
        let (status, bytes) = self.send(operation, Method::GET, path, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(runtime_error(
                operation,
                format!("{}: {}", status, String::from_utf8_lossy(&bytes)),
            ));
        }
        Ok(Some(bytes))
    }
}

// =============================================================================
// IncusCpi
// =============================================================================

/// [`Cpi`] over the Incus REST API.
pub struct IncusCpi {
    client: IncusClient,
    config: BackendConfig,
    probe: Arc<dyn ReadinessProbe>,
}

impl IncusCpi {
    pub fn new(config: BackendConfig, probe: Arc<dyn ReadinessProbe>) -> Self {
        let socket = config
            .socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(INCUS_SOCKET));
        Self {
            client: IncusClient { socket },
            config,
            probe,
        }
    }

    /// Uses the configured socket (default [`INCUS_SOCKET`]) and probes the
    /// director directly at its instance address.
    pub fn connect(config: BackendConfig) -> Result<Self> {
        let ip = config.director_ip()?;
        let probe = HttpInfoProbe::new(&format!("https://{}:{}", ip, DIRECTOR_PORT))?;
        Ok(Self::new(config, Arc::new(probe)))
    }

    fn name(&self) -> &str {
        &self.config.container_name
    }

    fn instance_path(&self) -> String {
        format!("/1.0/instances/{}", self.name())
    }

    fn volume_path(&self, volume: &str) -> String {
        format!(
            "/1.0/storage-pools/{}/volumes/custom/{}",
            self.config.storage_pool, volume
        )
    }

    async fn instance(&self) -> Result<Option<Envelope>> {
        self.client
            .call("get instance", Method::GET, &self.instance_path(), None)
            .await
    }

    async fn status(&self) -> Result<Option<String>> {
        let path = format!("{}/state", self.instance_path());
        Ok(self
            .client
            .call("get state", Method::GET, &path, None)
            .await?
            .map(|env| env.metadata["status"].as_str().unwrap_or_default().to_string()))
    }

    async fn change_state(&self, action: &'static str, force: bool) -> Result<()> {
        let path = format!("{}/state", self.instance_path());
        let body = json!({
            "action": action,
            "timeout": STOP_TIMEOUT.as_secs(),
            "force": force,
        });
        self.client
            .call("change state", Method::PUT, &path, Some(&body))
            .await?
            .ok_or_else(|| Error::ContainerNotFound(self.name().to_string()))?;
        Ok(())
    }

    /// OCI image source for the configured image.
    fn image_source(&self) -> Value {
        let image = &self.config.image;
        let server = if image.registry == DEFAULT_REGISTRY {
            INCUS_DOCKER_HUB_SERVER.to_string()
        } else {
            format!("https://{}", image.registry)
        };
        let alias = match &image.digest {
            Some(digest) => format!("{}@{}", image.repository, digest),
            None => format!("{}:{}", image.repository, image.tag),
        };
        json!({
            "type": "image",
            "mode": "pull",
            "protocol": "oci",
            "server": server,
            "alias": alias,
        })
    }

    fn instance_body(&self) -> Result<Value> {
        let ip = self.config.director_ip()?;
        let mut devices = serde_json::Map::new();
        devices.insert(
            "eth0".to_string(),
            json!({
                "type": "nic",
                "network": self.config.network_name,
                "ipv4.address": ip.to_string(),
            }),
        );
        for (volume, mount) in self.config.volumes() {
            devices.insert(
                volume.clone(),
                json!({
                    "type": "disk",
                    "pool": self.config.storage_pool,
                    "source": volume,
                    "path": mount,
                }),
            );
        }

        Ok(json!({
            "name": self.name(),
            "type": "container",
            "source": self.image_source(),
            "config": {
                "security.privileged": "true",
                "security.nesting": "true",
            },
            "devices": devices,
        }))
    }

    async fn console(&self) -> Result<Option<Bytes>> {
        let path = format!("{}/console", self.instance_path());
        self.client.get_raw("console log", &path).await
    }

    async fn liveness(&self) -> Result<Liveness> {
        match self.status().await?.as_deref() {
            Some("Running") => Ok(Liveness::Running),
            _ => Ok(Liveness::Exited(None)),
        }
    }

    async fn ensure_volume(&self, volume: &str) -> Result<()> {
        let path = self.volume_path(volume);
        if self
            .client
            .call("get volume", Method::GET, &path, None)
            .await?
            .is_some()
        {
            return Ok(());
        }

        info!("Creating storage volume {}/{}", self.config.storage_pool, volume);
        let create = format!(
            "/1.0/storage-pools/{}/volumes/custom",
            self.config.storage_pool
        );
        let body = json!({ "name": volume, "content_type": "filesystem", "config": {} });
        self.client
            .call("create volume", Method::POST, &create, Some(&body))
            .await
            .map_err(|e| Error::CreateFailed {
                name: volume.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn ensure_network(&self) -> Result<()> {
        let network = &self.config.network_name;
        let path = format!("/1.0/networks/{}", network);
        if self
            .client
            .call("get network", Method::GET, &path, None)
            .await?
            .is_some()
        {
            return Ok(());
        }

        info!("Creating network {} ({})", network, self.config.subnet);
        let body = json!({
            "name": network,
            "type": "bridge",
            "config": {
                "ipv4.address": self.config.subnet.gateway_cidr(),
                "ipv4.nat": "true",
                "ipv6.address": "none",
            },
        });
        self.client
            .call("create network", Method::POST, "/1.0/networks", Some(&body))
            .await
            .map_err(|e| Error::CreateFailed {
                name: network.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete(&self, resource: &'static str, name: &str, path: &str) -> Result<()> {
        self.client
            .call("delete", Method::DELETE, path, None)
            .await
            .map_err(|e| Error::DeleteFailed {
                resource,
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn read_output(&self, path: Option<&str>) -> Result<String> {
        let Some(path) = path else {
            return Ok(String::new());
        };
        let bytes = self
            .client
            .get_raw("exec output", path)
            .await?
            .unwrap_or_default();
        if let Err(e) = self.client.send("exec output", Method::DELETE, path, None).await {
            debug!("Leaving exec output {}: {}", path, e);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl Cpi for IncusCpi {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn start(&self) -> Result<()> {
        if self.instance().await?.is_none() {
            info!("Creating instance {} from {}", self.name(), self.config.image);
            let body = self.instance_body()?;
            self.client
                .call("create instance", Method::POST, "/1.0/instances", Some(&body))
                .await
                .map_err(|e| Error::CreateFailed {
                    name: self.name().to_string(),
                    reason: e.to_string(),
                })?;
        }

        if self.status().await?.as_deref() == Some("Running") {
            debug!("{} already running", self.name());
            return Ok(());
        }

        info!("Starting {}", self.name());
        self.change_state("start", false)
            .await
            .map_err(|e| Error::StartFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }

    async fn stop(&self) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        info!("Stopping {}", self.name());
        self.change_state("stop", false)
            .await
            .map_err(|e| Error::StopFailed {
                name: self.name().to_string(),
                reason: e.to_string(),
            })
    }

    async fn destroy(&self) -> Result<()> {
        info!("Destroying {} and its storage", self.name());
        if self.is_running().await? {
            self.change_state("stop", true).await?;
        }
        self.delete("instance", self.name(), &self.instance_path())
            .await?;

        for (volume, _) in self.config.volumes() {
            self.delete("volume", &volume, &self.volume_path(&volume))
                .await?;
        }

        let network = &self.config.network_name;
        self.delete("network", network, &format!("/1.0/networks/{}", network))
            .await
    }

    async fn ensure_prerequisites(&self) -> Result<()> {
        for (volume, _) in self.config.volumes() {
            self.ensure_volume(&volume).await?;
        }
        self.ensure_network().await
    }

    async fn is_running(&self) -> Result<bool> {
        Ok(self.status().await?.as_deref() == Some("Running"))
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.instance().await?.is_some())
    }

    async fn container_info(&self) -> Result<ContainerInfo> {
        let instance = self
            .instance()
            .await?
            .ok_or_else(|| Error::ContainerNotFound(self.name().to_string()))?;
        let meta = &instance.metadata;

        let network = meta["expanded_devices"]
            .as_object()
            .and_then(|devices| {
                devices
                    .values()
                    .find(|d| d["type"] == "nic")
                    .and_then(|d| d["network"].as_str())
            })
            .unwrap_or(&self.config.network_name)
            .to_string();

        Ok(ContainerInfo {
            name: meta["name"].as_str().unwrap_or(self.name()).to_string(),
            created: meta["created_at"].as_str().unwrap_or_default().to_string(),
            network,
        })
    }

    async fn exec_command(&self, container: &str, cmd: &[String]) -> Result<String> {
        let path = format!("/1.0/instances/{}/exec", container);
        let body = json!({
            "command": cmd,
            "environment": {},
            "interactive": false,
            "wait-for-websocket": false,
            "record-output": true,
        });

        let done = self
            .client
            .call("exec", Method::POST, &path, Some(&body))
            .await?
            .ok_or_else(|| Error::ContainerNotFound(container.to_string()))?;

        let result = &done.metadata["metadata"];
        let exit_code = result["return"].as_i64();
        let stdout = self.read_output(result["output"]["1"].as_str()).await?;
        let stderr = self.read_output(result["output"]["2"].as_str()).await?;

        match exit_code {
            Some(0) => Ok(stdout),
            code => Err(Error::ExecFailed {
                container: container.to_string(),
                exit_code: code,
                stderr: stderr.trim_end().to_string(),
            }),
        }
    }

    async fn get_logs(&self, tail: LogTail) -> Result<String> {
        let bytes = self
            .console()
            .await?
            .ok_or_else(|| Error::ContainerNotFound(self.name().to_string()))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(tail.apply(&text).to_string())
    }

    async fn follow_logs(
        &self,
        cancel: CancellationToken,
        options: FollowOptions,
        mut stdout: LogSink,
        _stderr: LogSink,
    ) -> Result<()> {
        let initial = self
            .console()
            .await?
            .ok_or_else(|| Error::ContainerNotFound(self.name().to_string()))?;
        stdout.write_all(options.tail.apply(&String::from_utf8_lossy(&initial)).as_bytes())?;
        let mut seen = initial.len();

        // The console transcript has no stream separation; all of it is stdout.
        while options.follow {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
            }

            let Some(transcript) = self.console().await? else {
                break;
            };
            if transcript.len() < seen {
                warn!("Console log of {} was reset", self.name());
                seen = 0;
            }
            if transcript.len() > seen {
                stdout.write_all(&transcript[seen..])?;
                seen = transcript.len();
            }

            if !self.is_running().await? {
                break;
            }
        }

        stdout.flush()?;
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
        DIRECTOR_PORT
    }

    fn ssh_port(&self) -> u16 {
        SSH_PORT
    }

    fn has_direct_network_access(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageReference;

    fn cpi(image: &str) -> IncusCpi {
        let config = BackendConfig::new(ImageReference::parse(image).unwrap());
        IncusCpi::new(config, Arc::new(HttpInfoProbe::new("https://127.0.0.1:1").unwrap()))
    }

    #[test]
    fn test_image_source_docker_hub() {
        let source = cpi("director-box/director:1.2").image_source();
        assert_eq!(source["server"], "https://docker.io");
        assert_eq!(source["alias"], "director-box/director:1.2");
        assert_eq!(source["protocol"], "oci");
    }

    #[test]
    fn test_image_source_private_registry() {
        let source = cpi("ghcr.io/org/director:v3").image_source();
        assert_eq!(source["server"], "https://ghcr.io");
        assert_eq!(source["alias"], "org/director:v3");
    }

    #[test]
    fn test_instance_body_devices() {
        let body = cpi("ghcr.io/org/director:v3").instance_body().unwrap();
        assert_eq!(body["devices"]["eth0"]["ipv4.address"], "10.245.0.10");
        assert_eq!(body["devices"]["director-store"]["path"], "/var/vcap/store");
        assert_eq!(body["devices"]["director-data"]["pool"], "default");
        assert_eq!(body["config"]["security.nesting"], "true");
    }

    #[test]
    fn test_reachability() {
        let cpi = cpi("ghcr.io/org/director:v3");
        assert!(cpi.has_direct_network_access());
        assert_eq!(cpi.director_url(), "https://10.245.0.10:25555");
        assert!(cpi.image_managed().is_none());
    }
}
