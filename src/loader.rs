//! Turn files on disk into document content for ingestion.
//!
//! A directory is walked recursively (walkdir), filtered by include and
//! exclude globs (globset) matched against the path relative to the root,
//! and visited in sorted order.
//!
//! | Extension | Documents produced |
//! |-----------|--------------------|
//! | `.json` object | one, the object itself |
//! | `.json` array | one per element |
//! | `.json` NVD CVE feed | one per CVE |
//! | `.json` STIX bundle (MITRE ATT&CK) | one per object with a description |
//! | `.txt`, `.md` | one `{title, text}` |
//!
//! Text files are titled after their file name; a Markdown file opening
//! with a `# ` heading takes its title from that heading.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::{json, Map, Value};
use walkdir::WalkDir;

use osint_harness_core::models::DocumentContent;

const DEFAULT_INCLUDES: [&str; 3] = ["**/*.json", "**/*.txt", "**/*.md"];
const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Content loaded from one file.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub documents: Vec<DocumentContent>,
}

/// Load a single file or every matching file under a directory.
///
/// Empty `include` means JSON, text, and Markdown files. Globs do not apply
/// when `path` is a file.
pub fn load_path(path: &Path, include: &[String], exclude: &[String]) -> Result<Vec<LoadedFile>> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }
    if path.is_file() {
        return Ok(vec![LoadedFile {
            path: path.to_path_buf(),
            documents: load_file(path)?,
        }]);
    }

    let include_set = if include.is_empty() {
        build_globset(DEFAULT_INCLUDES.iter().map(|s| s.to_string()))?
    } else {
        build_globset(include.iter().cloned())?
    };
    let exclude_set = build_globset(
        DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .chain(exclude.iter().cloned()),
    )?;

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.path();
        let relative = file.strip_prefix(path).unwrap_or(file);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match load_file(file) {
            Ok(documents) => files.push(LoadedFile {
                path: file.to_path_buf(),
                documents,
            }),
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "skipping file"),
        }
    }
    Ok(files)
}

/// Load the documents held in one file.
pub fn load_file(path: &Path) -> Result<Vec<DocumentContent>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match ext.as_str() {
        "json" => {
            let value: Value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?;
            Ok(json_documents(value))
        }
        "txt" | "md" => {
            let mut title = title_from_file_name(path);
            if ext == "md" {
                if let Some(heading) = raw.lines().next().and_then(|l| l.strip_prefix("# ")) {
                    title = heading.trim().to_string();
                }
            }
            Ok(vec![DocumentContent::titled(title, raw)])
        }
        other => bail!("Unsupported file type: .{}", other),
    }
}

/// `"apt29_report-2024"` → `"Apt29 Report 2024"`.
fn title_from_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn json_documents(value: Value) -> Vec<DocumentContent> {
    match value {
        Value::Array(items) => items.into_iter().map(DocumentContent::from_value).collect(),
        Value::Object(map) if is_nvd_feed(&map) => nvd_documents(&map),
        Value::Object(map) if is_stix_bundle(&map) => stix_documents(&map),
        other => vec![DocumentContent::from_value(other)],
    }
}

fn is_nvd_feed(map: &Map<String, Value>) -> bool {
    map.get("vulnerabilities").is_some_and(Value::is_array)
        && map
            .get("format")
            .and_then(Value::as_str)
            .is_some_and(|f| f.contains("NVD_CVE"))
}

fn is_stix_bundle(map: &Map<String, Value>) -> bool {
    map.get("type").and_then(Value::as_str) == Some("bundle")
        && map.get("objects").is_some_and(Value::is_array)
}

/// One document per CVE with an English description.
fn nvd_documents(feed: &Map<String, Value>) -> Vec<DocumentContent> {
    let Some(vulns) = feed.get("vulnerabilities").and_then(Value::as_array) else {
        return Vec::new();
    };
    vulns
        .iter()
        .filter_map(|v| {
            let cve = v.get("cve")?;
            let id = cve.get("id").and_then(Value::as_str)?;
            let description = cve
                .get("descriptions")
                .and_then(Value::as_array)?
                .iter()
                .find(|d| d.get("lang").and_then(Value::as_str) == Some("en"))
                .and_then(|d| d.get("value"))
                .and_then(Value::as_str)?;

            let mut content = DocumentContent::from_value(json!({
                "title": id,
                "description": description,
            }));
            content
                .extra
                .insert("cve_id".to_string(), Value::String(id.to_string()));
            if let Some(published) = cve.get("published").cloned() {
                content.extra.insert("date".to_string(), published);
            }
            content
                .extra
                .insert("source".to_string(), Value::String("NVD".to_string()));
            Some(content)
        })
        .collect()
}

/// One document per STIX object that carries a description.
fn stix_documents(bundle: &Map<String, Value>) -> Vec<DocumentContent> {
    let Some(objects) = bundle.get("objects").and_then(Value::as_array) else {
        return Vec::new();
    };
    objects
        .iter()
        .filter_map(|obj| {
            let description = obj.get("description").and_then(Value::as_str)?;
            if description.trim().is_empty() {
                return None;
            }
            let name = obj
                .get("name")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("Unknown Object");

            let mut content = DocumentContent::from_value(json!({
                "title": name,
                "description": description,
            }));
            if let Some(kind) = obj.get("type").cloned() {
                content.extra.insert("type".to_string(), kind);
            }
            let attack_id = obj
                .get("external_references")
                .and_then(Value::as_array)
                .and_then(|refs| {
                    refs.iter()
                        .find(|r| r.get("source_name").and_then(Value::as_str) == Some("mitre-attack"))
                })
                .and_then(|r| r.get("external_id"))
                .cloned();
            if let Some(id) = attack_id {
                content.extra.insert("attack_id".to_string(), id);
            }
            content
                .extra
                .insert("source".to_string(), Value::String("MITRE ATT&CK".to_string()));
            Some(content)
        })
        .collect()
}

fn build_globset(patterns: impl IntoIterator<Item = String>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(&pattern)?);
    }
    Ok(builder.build()?)
}
