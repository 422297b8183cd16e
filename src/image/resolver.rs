//! # Registry-Direct Image Resolution
//!
//! Answers questions about remote images without pulling them:
//!
//! - which digest does a tag point at right now ([`ImageResolver::resolve_image_ref`])
//! - which other tags share that digest ([`ImageResolver::find_tags_for_digest`])
//! - what does one file inside the image contain ([`ImageResolver::extract_file_from_image`])
//! - how do the embedded director manifests of two images differ
//!   ([`ImageResolver::get_manifest_diff`])
//!
//! ## Layer Scanning
//!
//! ```text
//!   manifest.layers:   [ L0 ] [ L1 ] [ L2 ]
//!   scan order:                 ◄──────────  L2, L1, L0
//!   per layer:  fetch blob → spool file → gunzip? → tar scan → drop
//! ```
//!
//! Later layers override earlier ones, so the first layer (from the top)
//! that mentions the path decides the result. Only one blob is held at a
//! time, spooled to an anonymous temp file that is released before the next
//! layer is fetched.

use super::diff::diff_yaml;
use super::layer::{LayerLookup, normalize_path, scan_layer};
use super::reference::{ImageMetadata, ImageReference};
use super::registry::RegistryTransport;
use crate::constants::{DEFAULT_TAG, DIRECTOR_MANIFEST_PATH, MAX_LAYERS, MAX_TAG_SCAN, VERSION_TAG_PATTERN};
use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::io::{Seek, SeekFrom};
use std::sync::{Arc, LazyLock};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

static VERSION_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(VERSION_TAG_PATTERN).expect("version tag pattern is valid"));

/// Returns true if `tag` looks like a release version (`1.2.3`, `v2`, `1.0-rc.1`).
pub fn is_version_tag(tag: &str) -> bool {
    VERSION_TAG_RE.is_match(tag)
}

/// Sorts tags version-like first, then lexicographically within each group.
pub fn sort_tags(tags: &mut [String]) {
    tags.sort_by(|a, b| match (is_version_tag(a), is_version_tag(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(b),
    });
}

#[derive(Serialize)]
struct ImageHeader<'a> {
    image: ImageHeaderFields<'a>,
}

#[derive(Serialize)]
struct ImageHeaderFields<'a> {
    #[serde(rename = "ref")]
    reference: &'a str,
    digest: &'a str,
}

/// Resolves, inspects and diffs remote images through a [`RegistryTransport`].
#[derive(Clone)]
pub struct ImageResolver {
    transport: Arc<dyn RegistryTransport>,
    manifest_path: String,
}

impl ImageResolver {
    /// Creates a resolver diffing the default director manifest path.
    pub fn new(transport: Arc<dyn RegistryTransport>) -> Self {
        Self {
            transport,
            manifest_path: DIRECTOR_MANIFEST_PATH.to_string(),
        }
    }

    /// Overrides the path of the manifest compared by [`Self::get_manifest_diff`].
    pub fn with_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.manifest_path = path.into();
        self
    }

    /// Path of the manifest compared by [`Self::get_manifest_diff`].
    pub fn manifest_path(&self) -> &str {
        &self.manifest_path
    }

    /// Pins `reference` to a digest.
    ///
    /// A reference that already carries a digest is returned unchanged
    /// without contacting the registry. The tag of the returned reference is
    /// always the input tag.
    pub async fn resolve_image_ref(
        &self,
        reference: &ImageReference,
    ) -> Result<(ImageReference, String)> {
        if let Some(digest) = reference.digest.as_deref().filter(|d| !d.is_empty()) {
            return Ok((reference.clone(), digest.to_string()));
        }

        let digest = self.transport.fetch_digest(reference).await?;
        debug!("Resolved {} to {}", reference, digest);
        Ok((reference.with_digest(&digest), digest))
    }

    /// Resolves `reference` to full metadata.
    ///
    /// A `latest` tag is replaced by the first version tag sharing its
    /// digest when one exists; failing to list tags keeps `latest`.
    pub async fn resolve_metadata(&self, reference: &ImageReference) -> Result<ImageMetadata> {
        let (_, digest) = self.resolve_image_ref(reference).await?;

        let mut tag = reference.tag.clone();
        if tag == DEFAULT_TAG {
            match self.find_tags_for_digest(reference, &digest).await {
                Ok(tags) => {
                    if let Some(version) = tags.into_iter().find(|t| is_version_tag(t)) {
                        tag = version;
                    }
                }
                Err(e) => warn!("Could not look up version tag for {}: {}", reference, e),
            }
        }

        Ok(ImageMetadata {
            registry: reference.registry.clone(),
            repository: reference.repository.clone(),
            full_reference: format!("{}:{}@{}", reference.name(), tag, digest),
            tag,
            digest,
        })
    }

    /// Lists every tag in the repository whose manifest digest is `digest`.
    ///
    /// Costs one manifest request per tag; at most [`MAX_TAG_SCAN`] tags are
    /// inspected. Tags that disappear while scanning are skipped.
    pub async fn find_tags_for_digest(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<Vec<String>> {
        let mut tags = self.transport.list_tags(reference).await?;
        if tags.len() > MAX_TAG_SCAN {
            warn!(
                "{} has {} tags, only inspecting the first {}",
                reference.name(),
                tags.len(),
                MAX_TAG_SCAN
            );
            tags.truncate(MAX_TAG_SCAN);
        }

        let mut matching = Vec::new();
        for tag in tags {
            let candidate = reference.with_tag(&tag);
            match self.transport.fetch_digest(&candidate).await {
                Ok(d) if d == digest => matching.push(tag),
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!("Tag {} vanished while scanning", candidate),
                Err(e) => return Err(e),
            }
        }

        sort_tags(&mut matching);
        Ok(matching)
    }

    /// Reads one file out of an image without pulling it.
    ///
    /// Returns [`Error::FileNotFoundInImage`] if no layer contains the path
    /// (or an upper layer deletes it); never an empty success.
    pub async fn extract_file_from_image(
        &self,
        reference: &ImageReference,
        path: &str,
    ) -> Result<Vec<u8>> {
        let target = normalize_path(path);
        let manifest = self.transport.fetch_manifest(reference).await?;

        if manifest.layers.len() > MAX_LAYERS {
            return Err(Error::Registry {
                operation: "extract file",
                reference: reference.to_string(),
                reason: format!("too many layers: {} > {}", manifest.layers.len(), MAX_LAYERS),
            });
        }

        for layer in manifest.layers.iter().rev() {
            debug!("Scanning layer {} for {}", layer.digest, target);

            let spool = tempfile::tempfile()?;
            let mut blob = tokio::fs::File::from_std(spool);
            self.transport
                .fetch_blob(reference, layer, &mut blob)
                .await?;
            blob.flush().await?;
            let mut spool = blob.into_std().await;
            spool.seek(SeekFrom::Start(0))?;

            let digest = layer.digest.clone();
            let lookup_target = target.clone();
            // The spool file is moved into the scan and closed when it ends.
            let lookup = tokio::task::spawn_blocking(move || {
                scan_layer(spool, &digest, &lookup_target)
            })
            .await
            .map_err(|e| Error::LayerExtractionFailed {
                digest: layer.digest.clone(),
                reason: e.to_string(),
            })??;

            match lookup {
                LayerLookup::Found(content) => {
                    info!(
                        "Extracted {} ({} bytes) from layer {} of {}",
                        target,
                        content.len(),
                        layer.digest,
                        reference
                    );
                    return Ok(content);
                }
                LayerLookup::Deleted => {
                    debug!("{} deleted by layer {}", target, layer.digest);
                    break;
                }
                LayerLookup::Absent => {}
            }
        }

        Err(Error::FileNotFoundInImage {
            reference: reference.to_string(),
            path: target,
        })
    }

    /// Structural diff of the director manifests embedded in two images.
    ///
    /// Each manifest is preceded by an `image: {ref, digest}` document so a
    /// change of image identity shows up even when the manifests agree.
    /// Returns an empty string when nothing differs.
    pub async fn get_manifest_diff(
        &self,
        current: &ImageReference,
        new: &ImageReference,
    ) -> Result<String> {
        let current_doc = self.manifest_with_header(current).await?;
        let new_doc = self.manifest_with_header(new).await?;
        diff_yaml(&current_doc, &new_doc)
    }

    async fn manifest_with_header(&self, reference: &ImageReference) -> Result<String> {
        let (_, digest) = self.resolve_image_ref(reference).await?;
        let bytes = self
            .extract_file_from_image(reference, &self.manifest_path)
            .await?;
        let manifest = String::from_utf8(bytes).map_err(|e| {
            Error::ManifestDiff(format!("{} in {} is not UTF-8: {}", self.manifest_path, reference, e))
        })?;

        let display = reference.to_string();
        let header = serde_yaml::to_string(&ImageHeader {
            image: ImageHeaderFields {
                reference: &display,
                digest: &digest,
            },
        })?;
        let body = manifest.strip_prefix("---\n").unwrap_or(&manifest);
        Ok(format!("{}---\n{}", header, body))
    }
}
