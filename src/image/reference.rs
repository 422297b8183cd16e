//! Image references and resolved image metadata.

use crate::constants::{DEFAULT_REGISTRY, DEFAULT_TAG, IMAGE_REF_VALID_CHARS, MAX_IMAGE_REF_LEN};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed `[registry/]repository[:tag][@digest]` reference.
///
/// A reference carrying a digest is *pinned*: the digest is authoritative
/// and resolvers return it without contacting the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses and validates a reference string.
    ///
    /// Docker Hub shorthand is expanded (`alpine` becomes
    /// `docker.io/library/alpine:latest`).
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidImageReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("empty reference"));
        }
        if input.len() > MAX_IMAGE_REF_LEN {
            return Err(invalid(&format!("exceeds {} bytes", MAX_IMAGE_REF_LEN)));
        }
        if !input.chars().all(|c| IMAGE_REF_VALID_CHARS.contains(c)) {
            return Err(invalid("contains invalid characters"));
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !is_valid_digest(digest) {
                    return Err(invalid("malformed digest"));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are ports.
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };
        if tag == Some("") {
            return Err(invalid("empty tag"));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path component"));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
            digest,
        })
    }

    /// Returns true if the reference carries a digest.
    pub fn is_pinned(&self) -> bool {
        self.digest.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// `registry/repository`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// `registry/repository:tag`, ignoring any digest.
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.name(), self.tag)
    }

    /// `registry/repository@digest` for the given digest.
    pub fn pinned_to(&self, digest: &str) -> String {
        format!("{}@{}", self.name(), digest)
    }

    /// A copy of this reference pinned to `digest`, tag unchanged.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..self.clone()
        }
    }

    /// A copy of this reference with a different tag and no digest.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            digest: None,
            ..self.clone()
        }
    }

    /// Reference string used for registry calls: the digest form when
    /// pinned, the tagged form otherwise.
    pub fn registry_reference(&self) -> String {
        match &self.digest {
            Some(digest) if !digest.is_empty() => self.pinned_to(digest),
            _ => self.tagged(),
        }
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tagged())?;
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn is_valid_digest(digest: &str) -> bool {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return false;
    };
    let expected_len = match algorithm {
        "sha256" => 64,
        "sha384" => 96,
        "sha512" => 128,
        _ => return false,
    };
    hex.len() == expected_len && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Resolved identity of a concrete image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub registry: String,
    pub repository: String,
    /// Tag as requested, or the version tag sharing the digest when the
    /// request was for `latest`.
    pub tag: String,
    pub digest: String,
    /// `registry/repository:tag@digest`.
    pub full_reference: String,
}
