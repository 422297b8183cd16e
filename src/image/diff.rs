//! Structural diff of YAML document streams.
//!
//! Documents are compared as data, not text: key order and formatting do
//! not register as changes. Mappings are compared key by key. Sequences
//! whose items are all mappings with a unique string `name` (instance
//! groups, jobs, releases, variables) are matched by name, so reordering
//! is not a change; other sequences are compared by index.
//!
//! The rendered report has one entry per change:
//!
//! ```text
//! ~ image.digest: sha256:aaa -> sha256:bbb
//! + releases[name=uaa]:
//!     name: uaa
//!     version: '77'
//! - instance_groups[name=bosh].properties.director.workers: 4
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt::Write as _;

/// One structural difference.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Value),
    Removed(Value),
    Modified { old: Value, new: Value },
}

/// A change located at a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    /// Zero-based document index within the stream.
    pub document: usize,
    /// Path inside the document, e.g. `instance_groups[name=bosh].jobs[0]`.
    pub path: String,
    pub change: Change,
}

/// Parses a YAML stream into its documents.
pub fn parse_documents(source: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let value = Value::deserialize(document)?;
        documents.push(value);
    }
    Ok(documents)
}

/// Computes the structural differences between two YAML streams.
pub fn diff_documents(old: &str, new: &str) -> Result<Vec<DiffEntry>> {
    let old_docs = parse_documents(old).map_err(|e| Error::ManifestDiff(format!("current: {}", e)))?;
    let new_docs = parse_documents(new).map_err(|e| Error::ManifestDiff(format!("new: {}", e)))?;

    let mut entries = Vec::new();
    for index in 0..old_docs.len().max(new_docs.len()) {
        let mut changes = Vec::new();
        match (old_docs.get(index), new_docs.get(index)) {
            (Some(o), Some(n)) => diff_value(String::new(), o, n, &mut changes),
            (Some(o), None) => changes.push((String::new(), Change::Removed(o.clone()))),
            (None, Some(n)) => changes.push((String::new(), Change::Added(n.clone()))),
            (None, None) => {}
        }
        entries.extend(changes.into_iter().map(|(path, change)| DiffEntry {
            document: index,
            path,
            change,
        }));
    }
    Ok(entries)
}

/// Renders changes as a human-readable report; empty when there are none.
pub fn render_report(entries: &[DiffEntry]) -> String {
    let multi_document = entries.iter().any(|e| e.document > 0);
    let mut out = String::new();
    let mut current_document = None;

    for entry in entries {
        if multi_document && current_document != Some(entry.document) {
            let _ = writeln!(out, "--- document {}", entry.document + 1);
            current_document = Some(entry.document);
        }
        let path = if entry.path.is_empty() { "(root)" } else { &entry.path };
        match &entry.change {
            Change::Added(value) => write_entry(&mut out, '+', path, value),
            Change::Removed(value) => write_entry(&mut out, '-', path, value),
            Change::Modified { old, new } if is_scalar(old) && is_scalar(new) => {
                let _ = writeln!(out, "~ {}: {} -> {}", path, render_value(old), render_value(new));
            }
            Change::Modified { old, new } => {
                write_entry(&mut out, '-', path, old);
                write_entry(&mut out, '+', path, new);
            }
        }
    }
    out
}

/// Diffs two YAML streams and renders the report in one step.
pub fn diff_yaml(old: &str, new: &str) -> Result<String> {
    Ok(render_report(&diff_documents(old, new)?))
}

fn diff_value(path: String, old: &Value, new: &Value, out: &mut Vec<(String, Change)>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Mapping(o), Value::Mapping(n)) => diff_mapping(&path, o, n, out),
        (Value::Sequence(o), Value::Sequence(n)) => match (named_items(o), named_items(n)) {
            (Some(o_named), Some(n_named)) => diff_named(&path, &o_named, &n_named, out),
            _ => diff_indexed(&path, o, n, out),
        },
        (Value::Tagged(o), Value::Tagged(n)) if o.tag == n.tag => {
            diff_value(path, &o.value, &n.value, out)
        }
        _ => out.push((
            path,
            Change::Modified {
                old: old.clone(),
                new: new.clone(),
            },
        )),
    }
}

fn diff_mapping(path: &str, old: &Mapping, new: &Mapping, out: &mut Vec<(String, Change)>) {
    for (key, old_value) in old {
        let child = join_key(path, key);
        match new.get(key) {
            Some(new_value) => diff_value(child, old_value, new_value, out),
            None => out.push((child, Change::Removed(old_value.clone()))),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            out.push((join_key(path, key), Change::Added(new_value.clone())));
        }
    }
}

fn diff_named(
    path: &str,
    old: &[(String, &Value)],
    new: &[(String, &Value)],
    out: &mut Vec<(String, Change)>,
) {
    for (name, old_value) in old {
        let child = format!("{}[name={}]", path, name);
        match new.iter().find(|(n, _)| n == name) {
            Some((_, new_value)) => diff_value(child, old_value, new_value, out),
            None => out.push((child, Change::Removed((*old_value).clone()))),
        }
    }
    for (name, new_value) in new {
        if !old.iter().any(|(n, _)| n == name) {
            out.push((
                format!("{}[name={}]", path, name),
                Change::Added((*new_value).clone()),
            ));
        }
    }
}

fn diff_indexed(path: &str, old: &[Value], new: &[Value], out: &mut Vec<(String, Change)>) {
    for index in 0..old.len().max(new.len()) {
        let child = format!("{}[{}]", path, index);
        match (old.get(index), new.get(index)) {
            (Some(o), Some(n)) => diff_value(child, o, n, out),
            (Some(o), None) => out.push((child, Change::Removed(o.clone()))),
            (None, Some(n)) => out.push((child, Change::Added(n.clone()))),
            (None, None) => {}
        }
    }
}

/// Returns `(name, item)` pairs if every item is a mapping with a unique
/// string `name`.
fn named_items(items: &[Value]) -> Option<Vec<(String, &Value)>> {
    if items.is_empty() {
        return None;
    }
    let mut seen = HashSet::new();
    let mut named = Vec::with_capacity(items.len());
    for item in items {
        let name = item.as_mapping()?.get("name")?.as_str()?.to_string();
        if !seen.insert(name.clone()) {
            return None;
        }
        named.push((name, item));
    }
    Some(named)
}

fn join_key(path: &str, key: &Value) -> String {
    let key = match key {
        Value::String(s) => s.clone(),
        other => render_value(other),
    };
    if path.is_empty() {
        key
    } else {
        format!("{}.{}", path, key)
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(
        value,
        Value::Mapping(_) | Value::Sequence(_) | Value::Tagged(_)
    )
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) if !s.contains('\n') => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

fn write_entry(out: &mut String, marker: char, path: &str, value: &Value) {
    let rendered = render_value(value);
    if is_scalar(value) && !rendered.contains('\n') {
        let _ = writeln!(out, "{} {}: {}", marker, path, rendered);
        return;
    }
    let _ = writeln!(out, "{} {}:", marker, path);
    for line in rendered.lines() {
        let _ = writeln!(out, "    {}", line);
    }
}
