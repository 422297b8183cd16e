//! # Image Resolution Without Pulling
//!
//! Everything the reconciler needs to know about director images, answered
//! directly from the registry:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ImageResolver                            │
//! │  resolve_image_ref · find_tags_for_digest · resolve_metadata     │
//! │  extract_file_from_image · get_manifest_diff                     │
//! ├────────────────────┬──────────────────────┬──────────────────────┤
//! │ reference          │ layer                │ diff                 │
//! │ parse/display refs │ gzip/tar single-file │ structural YAML diff │
//! │                    │ scan with whiteouts  │                      │
//! ├────────────────────┴──────────────────────┴──────────────────────┤
//! │            RegistryTransport (OciRegistry / in-memory)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Limits
//!
//! | Limit | Value |
//! |-------|-------|
//! | Reference length | [`MAX_IMAGE_REF_LEN`](crate::constants::MAX_IMAGE_REF_LEN) |
//! | Layers scanned | [`MAX_LAYERS`](crate::constants::MAX_LAYERS) |
//! | Extracted file size | [`MAX_EXTRACTED_FILE_SIZE`](crate::constants::MAX_EXTRACTED_FILE_SIZE) |
//! | Tags inspected | [`MAX_TAG_SCAN`](crate::constants::MAX_TAG_SCAN) |
//! | Request timeout | [`REGISTRY_TIMEOUT`](crate::constants::REGISTRY_TIMEOUT) |

pub mod diff;
pub mod layer;
pub mod reference;
pub mod registry;
pub mod resolver;

pub use diff::{Change, DiffEntry, diff_documents, diff_yaml, render_report};
pub use layer::{clean_path, normalize_path};
pub use reference::{ImageMetadata, ImageReference};
pub use registry::{ImageManifest, LayerInfo, OciRegistry, RegistryTransport};
pub use resolver::{ImageResolver, is_version_tag, sort_tags};
