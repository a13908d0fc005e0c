//! In-memory document store over a markdown tree.
//!
//! Scans the knowledge-base root recursively, splits each file into
//! sections on markdown headers, and holds the result as an immutable
//! snapshot. [`DocumentStore::reload`] swaps the snapshot atomically, so
//! rankers that started against the previous snapshot keep reading it
//! unchanged.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::KnowledgeBaseConfig;
use crate::models::DocumentUnit;

pub struct DocumentStore {
    root: std::path::PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    snapshot: RwLock<Arc<Vec<DocumentUnit>>>,
}

impl DocumentStore {
    /// Build a store for the configured root. Does not scan yet; call
    /// [`reload`](Self::reload) (or [`scan`](Self::scan)) to populate it.
    pub fn new(config: &KnowledgeBaseConfig) -> Result<Self> {
        if !config.root.exists() {
            bail!(
                "knowledge base root does not exist: {}",
                config.root.display()
            );
        }

        let include = build_globset(&config.include_globs)?;
        let exclude = build_globset(&config.exclude_globs)?;

        Ok(Self {
            root: config.root.clone(),
            include,
            exclude,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the tree and return all document units in deterministic order.
    ///
    /// Unreadable files are skipped with a warning; the scan itself only
    /// fails if the walk cannot proceed at all.
    pub fn scan(&self) -> Result<Vec<DocumentUnit>> {
        let mut units = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %rel_str, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let modified_at = file_modified_at(path);
            let folder_path = folder_of(&rel_str);

            for (header, body) in split_sections(&content) {
                units.push(DocumentUnit {
                    filename: rel_str.clone(),
                    folder_path: folder_path.clone(),
                    section_header: header,
                    content: body,
                    modified_at,
                });
            }
        }

        // Sort for deterministic ordering across rescans.
        units.sort_by(|a, b| {
            a.filename
                .cmp(&b.filename)
                .then_with(|| a.section_header.cmp(&b.section_header))
        });

        Ok(units)
    }

    /// Rescan and atomically replace the current snapshot. Returns the new
    /// unit count.
    pub fn reload(&self) -> Result<usize> {
        let units = self.scan()?;
        let count = units.len();
        debug!(units = count, root = %self.root.display(), "knowledge base reloaded");
        *self.snapshot.write().expect("store lock poisoned") = Arc::new(units);
        Ok(count)
    }

    /// The current snapshot. Cheap to clone; in-flight consumers keep
    /// whichever snapshot they grabbed even across a concurrent reload.
    pub fn snapshot(&self) -> Arc<Vec<DocumentUnit>> {
        self.snapshot.read().expect("store lock poisoned").clone()
    }

    /// Number of distinct files in the current snapshot.
    pub fn file_count(&self) -> usize {
        let snapshot = self.snapshot();
        let mut files: Vec<&str> = snapshot.iter().map(|u| u.filename.as_str()).collect();
        files.dedup();
        files.len()
    }
}

/// Split markdown content into `(header, body)` sections.
///
/// Every markdown header starts a new section; the header line itself is
/// stripped of `#` markers. A file with no headers yields exactly one
/// headerless section, and text before the first header is folded into that
/// header's section, so a file always yields one unit per header (or one
/// unit total when headerless).
pub fn split_sections(content: &str) -> Vec<(Option<String>, String)> {
    let mut sections: Vec<(Option<String>, Vec<&str>)> = Vec::new();
    let mut preamble: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            let header = line.trim().trim_start_matches('#').trim().to_string();
            sections.push((Some(header), Vec::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        } else {
            preamble.push(line);
        }
    }

    if sections.is_empty() {
        return vec![(None, content.trim().to_string())];
    }

    let mut out: Vec<(Option<String>, String)> = Vec::with_capacity(sections.len());
    for (i, (header, body)) in sections.into_iter().enumerate() {
        let mut text = body.join("\n").trim().to_string();
        if i == 0 && !preamble.is_empty() {
            let lead = preamble.join("\n").trim().to_string();
            if !lead.is_empty() {
                text = if text.is_empty() {
                    lead
                } else {
                    format!("{lead}\n{text}")
                };
            }
        }
        out.push((header, text));
    }
    out
}

fn folder_of(relative: &str) -> String {
    match relative.rsplit_once('/') {
        Some((folder, _)) => folder.to_string(),
        None => "root".to_string(),
    }
}

fn file_modified_at(path: &Path) -> DateTime<Utc> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeBaseConfig;
    use std::fs;
    use tempfile::TempDir;

    fn store_over(tmp: &TempDir) -> DocumentStore {
        let config = KnowledgeBaseConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        };
        DocumentStore::new(&config).unwrap()
    }

    #[test]
    fn split_headerless_file_is_one_section() {
        let sections = split_sections("plain text\nwith two lines");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].0, None);
        assert_eq!(sections[0].1, "plain text\nwith two lines");
    }

    #[test]
    fn split_one_section_per_header() {
        let content = "# Title\nintro text\n\n## Setup\ninstall steps\n\n## Usage\nrun it";
        let sections = split_sections(content);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].0.as_deref(), Some("Title"));
        assert_eq!(sections[1].0.as_deref(), Some("Setup"));
        assert_eq!(sections[1].1, "install steps");
        assert_eq!(sections[2].0.as_deref(), Some("Usage"));
    }

    #[test]
    fn split_folds_preamble_into_first_section() {
        let content = "lead-in line\n\n# First\nbody";
        let sections = split_sections(content);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].1.starts_with("lead-in line"));
        assert!(sections[0].1.ends_with("body"));
    }

    #[test]
    fn scan_unit_count_matches_header_count() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("general")).unwrap();
        fs::write(
            tmp.path().join("general/overview.md"),
            "# Overview\nhello\n\n## Setup\ninstall steps\n",
        )
        .unwrap();
        fs::write(tmp.path().join("notes.md"), "no headers here\n").unwrap();

        let store = store_over(&tmp);
        let units = store.scan().unwrap();

        let overview: Vec<_> = units
            .iter()
            .filter(|u| u.filename == "general/overview.md")
            .collect();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].folder_path, "general");

        let notes: Vec<_> = units.iter().filter(|u| u.filename == "notes.md").collect();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].folder_path, "root");
        assert_eq!(notes[0].section_header, None);
    }

    #[test]
    fn scan_skips_non_matching_files() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.md"), "# A\nx").unwrap();
        fs::write(tmp.path().join("skip.txt"), "plain").unwrap();

        let store = store_over(&tmp);
        let units = store.scan().unwrap();
        assert!(units.iter().all(|u| u.filename == "keep.md"));
    }

    #[test]
    fn reload_swaps_snapshot() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.md"), "# A\none").unwrap();

        let store = store_over(&tmp);
        assert_eq!(store.reload().unwrap(), 1);
        let before = store.snapshot();

        fs::write(tmp.path().join("b.md"), "# B\ntwo").unwrap();
        assert_eq!(store.reload().unwrap(), 2);

        // The old snapshot is untouched by the reload.
        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let config = KnowledgeBaseConfig {
            root: std::path::PathBuf::from("/nonexistent/kb"),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        };
        assert!(DocumentStore::new(&config).is_err());
    }
}
