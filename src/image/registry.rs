//! # Registry Transport
//!
//! The image resolver talks to registries through the narrow
//! [`RegistryTransport`] trait: fetch a manifest, fetch a digest, list tags,
//! stream one blob. [`OciRegistry`] implements it on top of the
//! `oci-distribution` client; tests substitute an in-memory registry.
//!
//! ## Manifest Resolution
//!
//! For multi-platform images (Image Index) the platform-specific manifest
//! for `linux/<host arch>` is fetched, but the digest reported is the one of
//! the top-level manifest, matching what container engines record as the
//! repo digest.
//!
//! ## Timeouts
//!
//! Every request is bounded by [`REGISTRY_TIMEOUT`].

use super::reference::ImageReference;
use crate::constants::REGISTRY_TIMEOUT;
use crate::error::{Error, Result};
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciDescriptor, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use std::future::Future;
use tokio::io::AsyncWrite;
use tracing::debug;

/// Metadata about one image layer blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    /// Layer digest.
    pub digest: String,
    /// Compressed size in bytes.
    pub size: u64,
    /// Media type.
    pub media_type: String,
}

/// A platform-resolved image manifest.
#[derive(Debug, Clone)]
pub struct ImageManifest {
    /// Digest of the manifest the reference points at.
    pub digest: String,
    /// Layers bottom-to-top: `layers[0]` is the base layer.
    pub layers: Vec<LayerInfo>,
}

/// Registry operations the resolver depends on.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetches and platform-resolves the manifest for `reference`.
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<ImageManifest>;

    /// Fetches only the manifest digest for `reference`.
    async fn fetch_digest(&self, reference: &ImageReference) -> Result<String>;

    /// Lists all tags in the reference's repository.
    async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>>;

    /// Streams one blob into `out`.
    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        layer: &LayerInfo,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()>;
}

/// [`RegistryTransport`] backed by `oci-distribution`.
pub struct OciRegistry {
    client: Client,
    auth: RegistryAuth,
}

impl OciRegistry {
    /// Creates a client with anonymous auth over HTTPS.
    pub fn new() -> Self {
        Self::with_config(RegistryAuth::Anonymous, Vec::new())
    }

    /// Creates a client with basic auth.
    pub fn with_auth(username: &str, password: &str) -> Self {
        Self::with_config(
            RegistryAuth::Basic(username.to_string(), password.to_string()),
            Vec::new(),
        )
    }

    /// Creates a client, talking plain HTTP to `insecure_registries`.
    pub fn with_config(auth: RegistryAuth, insecure_registries: Vec<String>) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        Self {
            client: Client::new(ClientConfig {
                protocol,
                ..Default::default()
            }),
            auth,
        }
    }

    fn oci_reference(reference: &ImageReference) -> Result<Reference> {
        let raw = reference.registry_reference();
        raw.parse().map_err(|e| Error::InvalidImageReference {
            reference: raw.clone(),
            reason: format!("{}", e),
        })
    }

    /// Resolves an image index to the host platform's manifest.
    async fn resolve_manifest(
        &self,
        reference: &ImageReference,
        oci_ref: &Reference,
        manifest: OciManifest,
    ) -> Result<Vec<LayerInfo>> {
        match manifest {
            OciManifest::Image(img) => Ok(layers_of(img)),
            OciManifest::ImageIndex(index) => {
                let target_arch = host_arch();
                let matching = index.manifests.iter().find(|m| {
                    m.platform
                        .as_ref()
                        .is_some_and(|p| p.os == "linux" && p.architecture == target_arch)
                });

                let manifest_desc = matching.ok_or_else(|| {
                    let available: Vec<String> = index
                        .manifests
                        .iter()
                        .filter_map(|m| m.platform.as_ref())
                        .map(|p| format!("{}/{}", p.os, p.architecture))
                        .collect();
                    Error::Registry {
                        operation: "resolve platform manifest",
                        reference: reference.to_string(),
                        reason: format!(
                            "no manifest for linux/{}. Available: {}",
                            target_arch,
                            available.join(", ")
                        ),
                    }
                })?;

                let platform_ref = Self::oci_reference(&reference.with_digest(&manifest_desc.digest))?;
                let (platform_manifest, _) = bounded(
                    "pull platform manifest",
                    reference,
                    self.client.pull_manifest(&platform_ref, &self.auth),
                )
                .await?;

                match platform_manifest {
                    OciManifest::Image(img) => Ok(layers_of(img)),
                    OciManifest::ImageIndex(_) => Err(Error::Registry {
                        operation: "resolve platform manifest",
                        reference: oci_ref.to_string(),
                        reason: "nested image index not supported".to_string(),
                    }),
                }
            }
        }
    }
}

impl Default for OciRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistryTransport for OciRegistry {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<ImageManifest> {
        let oci_ref = Self::oci_reference(reference)?;
        debug!("Fetching manifest for {}", reference);

        let (manifest, digest) = bounded(
            "pull manifest",
            reference,
            self.client.pull_manifest(&oci_ref, &self.auth),
        )
        .await?;

        let layers = self.resolve_manifest(reference, &oci_ref, manifest).await?;
        Ok(ImageManifest { digest, layers })
    }

    async fn fetch_digest(&self, reference: &ImageReference) -> Result<String> {
        let oci_ref = Self::oci_reference(reference)?;
        bounded(
            "fetch digest",
            reference,
            self.client.fetch_manifest_digest(&oci_ref, &self.auth),
        )
        .await
    }

    async fn list_tags(&self, reference: &ImageReference) -> Result<Vec<String>> {
        let oci_ref = Self::oci_reference(reference)?;
        let response = bounded(
            "list tags",
            reference,
            self.client.list_tags(&oci_ref, &self.auth, None, None),
        )
        .await?;
        Ok(response.tags)
    }

    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        layer: &LayerInfo,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let oci_ref = Self::oci_reference(reference)?;
        let descriptor = OciDescriptor {
            digest: layer.digest.clone(),
            size: layer.size as i64,
            media_type: layer.media_type.clone(),
            urls: None,
            annotations: None,
        };

        debug!("Fetching blob {} ({} bytes)", layer.digest, layer.size);
        bounded(
            "pull blob",
            reference,
            self.client.pull_blob(&oci_ref, &descriptor, out),
        )
        .await
    }
}

fn layers_of(img: OciImageManifest) -> Vec<LayerInfo> {
    img.layers
        .into_iter()
        .map(|l| LayerInfo {
            digest: l.digest,
            size: l.size.max(0) as u64,
            media_type: l.media_type,
        })
        .collect()
}

/// OCI architecture name of the host.
fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "s390x" => "s390x",
        "powerpc64" => "ppc64le",
        _ => "amd64",
    }
}

/// Runs a registry call under [`REGISTRY_TIMEOUT`], mapping errors.
async fn bounded<T>(
    operation: &'static str,
    reference: &ImageReference,
    call: impl Future<Output = std::result::Result<T, OciDistributionError>>,
) -> Result<T> {
    tokio::time::timeout(REGISTRY_TIMEOUT, call)
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("{} for {}", operation, reference),
            duration: REGISTRY_TIMEOUT,
        })?
        .map_err(|e| match e {
            OciDistributionError::ImageManifestNotFoundError(_) => {
                Error::ImageNotFound(reference.to_string())
            }
            other => Error::Registry {
                operation,
                reference: reference.to_string(),
                reason: other.to_string(),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oci_reference_uses_digest_when_pinned() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let r = ImageReference::parse("ghcr.io/org/director:v1")
            .unwrap()
            .with_digest(&digest);
        let oci = OciRegistry::oci_reference(&r).unwrap();
        assert_eq!(oci.digest(), Some(digest.as_str()));
        assert_eq!(oci.registry(), "ghcr.io");
        assert_eq!(oci.repository(), "org/director");
    }

    #[test]
    fn test_host_arch_is_oci_name() {
        assert!(["amd64", "arm64", "arm", "s390x", "ppc64le"].contains(&host_arch()));
    }
}
