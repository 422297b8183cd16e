//! Single-file lookup inside one layer blob.
//!
//! A layer is a tar archive, usually gzip-compressed. The blob is sniffed
//! for the gzip magic; anything else is read as a plain tar stream. Entry
//! names are normalized (`./etc/x`, `etc/x` and `/etc//x` all become
//! `/etc/x`) before comparison.
//!
//! Whiteouts are honoured so a file deleted in an upper layer is not
//! resurrected from a lower one:
//! - `dir/.wh.name` deletes `dir/name`
//! - `dir/.wh..wh..opq` hides everything below `dir` in lower layers

use crate::constants::MAX_EXTRACTED_FILE_SIZE;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::io::{BufRead, BufReader, Read};
use tar::{Archive, EntryType};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Outcome of scanning one layer for a path.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LayerLookup {
    /// The layer contains the file.
    Found(Vec<u8>),
    /// The layer deletes the file; lower layers must not be consulted.
    Deleted,
    /// The layer does not mention the file.
    Absent,
}

/// Lexically cleans an absolute slash path: collapses repeated slashes,
/// drops `.` elements and resolves `..` without climbing above `/`.
pub fn clean_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Normalizes a tar entry name or a lookup target to a clean absolute path.
pub fn normalize_path(name: &str) -> String {
    let trimmed = name.strip_prefix("./").unwrap_or(name);
    clean_path(&format!("/{}", trimmed))
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

fn is_ancestor(dir: &str, path: &str) -> bool {
    dir == "/" || path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'))
}

/// Scans one layer blob for `target` (already normalized).
pub(crate) fn scan_layer<R: Read>(blob: R, digest: &str, target: &str) -> Result<LayerLookup> {
    let extraction_error = |reason: String| Error::LayerExtractionFailed {
        digest: digest.to_string(),
        reason,
    };

    let mut buffered = BufReader::new(blob);
    let is_gzip = buffered
        .fill_buf()
        .map_err(|e| extraction_error(e.to_string()))?
        .starts_with(&GZIP_MAGIC);

    if is_gzip {
        scan_tar(GzDecoder::new(buffered), digest, target)
    } else {
        scan_tar(buffered, digest, target)
    }
}

fn scan_tar<R: Read>(stream: R, digest: &str, target: &str) -> Result<LayerLookup> {
    let extraction_error = |reason: String| Error::LayerExtractionFailed {
        digest: digest.to_string(),
        reason,
    };
    let mut archive = Archive::new(stream);

    let (target_dir, target_name) = split_parent(target);
    let target_whiteout = format!("{}{}", WHITEOUT_PREFIX, target_name);
    let mut hidden_below = false;

    let entries = archive
        .entries()
        .map_err(|e| extraction_error(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| extraction_error(e.to_string()))?;
        let raw_path = entry
            .path()
            .map_err(|e| extraction_error(e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let path = normalize_path(&raw_path);
        let (dir, name) = split_parent(&path);

        if name == OPAQUE_WHITEOUT {
            if is_ancestor(dir, target) {
                hidden_below = true;
            }
            continue;
        }
        if dir == target_dir && name == target_whiteout {
            return Ok(LayerLookup::Deleted);
        }
        if path != target {
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => {}
            other => {
                return Err(extraction_error(format!(
                    "{} is not a regular file ({:?})",
                    target, other
                )));
            }
        }

        let size = entry.size();
        if size > MAX_EXTRACTED_FILE_SIZE {
            return Err(extraction_error(format!(
                "{} is {} bytes, limit is {}",
                target, size, MAX_EXTRACTED_FILE_SIZE
            )));
        }

        let mut content = Vec::with_capacity(size as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| extraction_error(e.to_string()))?;
        return Ok(LayerLookup::Found(content));
    }

    if hidden_below {
        Ok(LayerLookup::Deleted)
    } else {
        Ok(LayerLookup::Absent)
    }
}
