//! Deterministic file-system query tools over the knowledge base.
//!
//! Each operation is total: it returns a result or a typed error, never a
//! panic across the boundary. The orchestrator pre-invokes these when a
//! question matches a file intent; they are also exposed standalone through
//! the HTTP surface and CLI.

use chrono::{DateTime, Utc};
use globset::Glob;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Metadata for one file (or directory) under the knowledge-base root.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub filename: String,
    /// Path relative to the knowledge-base root.
    pub path: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub is_dir: bool,
}

/// One file with the lines that matched a content search.
#[derive(Debug, Clone, Serialize)]
pub struct GrepMatch {
    pub file: FileInfo,
    pub lines: Vec<GrepLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrepLine {
    pub line_number: usize,
    pub text: String,
}

/// Sort key for [`FileTools::list_files`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Name,
    Size,
    Modified,
}

impl std::str::FromStr for SortBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            "modified" => Ok(Self::Modified),
            other => Err(Error::invalid_selection(format!(
                "unknown sort key '{other}', expected name, size, or modified"
            ))),
        }
    }
}

pub struct FileTools {
    root: PathBuf,
}

impl FileTools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The most recently modified file matching `pattern` under
    /// `directory` (searched recursively), or `NotFound`.
    pub fn find_latest(&self, directory: Option<&str>, pattern: &str) -> Result<FileInfo> {
        let base = self.resolve_dir(directory)?;
        let glob = Glob::new(pattern)
            .map_err(|e| Error::invalid_selection(format!("bad pattern '{pattern}': {e}")))?
            .compile_matcher();

        let mut latest: Option<FileInfo> = None;
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !glob.is_match(name.as_ref()) {
                continue;
            }
            let info = self.file_info(entry.path())?;
            if latest
                .as_ref()
                .map(|l| info.modified_at > l.modified_at)
                .unwrap_or(true)
            {
                latest = Some(info);
            }
        }

        latest.ok_or_else(|| {
            Error::not_found(format!(
                "no file matching '{}' in {}",
                pattern,
                directory.unwrap_or("knowledge base")
            ))
        })
    }

    /// One level of `directory`, files and subdirectories, ordered by the
    /// requested sort key.
    pub fn list_files(
        &self,
        directory: Option<&str>,
        sort_by: SortBy,
        reverse: bool,
    ) -> Result<Vec<FileInfo>> {
        let base = self.resolve_dir(directory)?;

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&base)? {
            let entry = entry?;
            entries.push(self.file_info(&entry.path())?);
        }

        entries.sort_by(|a, b| {
            let ord = match sort_by {
                SortBy::Name => a.filename.cmp(&b.filename),
                SortBy::Size => a.size_bytes.cmp(&b.size_bytes),
                SortBy::Modified => a.modified_at.cmp(&b.modified_at),
            };
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });

        Ok(entries)
    }

    /// Files whose name contains `query`, searched recursively, newest
    /// first.
    pub fn search_by_name(
        &self,
        query: &str,
        directory: Option<&str>,
        case_sensitive: bool,
    ) -> Result<Vec<FileInfo>> {
        let base = self.resolve_dir(directory)?;
        let needle = if case_sensitive {
            query.to_string()
        } else {
            query.to_lowercase()
        };

        let mut matches = Vec::new();
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let haystack = if case_sensitive {
                name.to_string()
            } else {
                name.to_lowercase()
            };
            if haystack.contains(&needle) {
                matches.push(self.file_info(entry.path())?);
            }
        }

        matches.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(matches)
    }

    /// Markdown files whose content contains `term`, with the matching
    /// lines and their line numbers. At most `max_results` files.
    pub fn grep_content(
        &self,
        term: &str,
        directory: Option<&str>,
        case_sensitive: bool,
        max_results: usize,
    ) -> Result<Vec<GrepMatch>> {
        let base = self.resolve_dir(directory)?;
        let needle = if case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        };

        let mut results = Vec::new();
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if results.len() >= max_results {
                break;
            }
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|e| e.to_str()) != Some("md")
            {
                continue;
            }

            let content = match std::fs::read_to_string(entry.path()) {
                Ok(c) => c,
                Err(_) => continue,
            };

            let lines: Vec<GrepLine> = content
                .lines()
                .enumerate()
                .filter(|(_, line)| {
                    if case_sensitive {
                        line.contains(&needle)
                    } else {
                        line.to_lowercase().contains(&needle)
                    }
                })
                .map(|(i, line)| GrepLine {
                    line_number: i + 1,
                    text: line.to_string(),
                })
                .collect();

            if !lines.is_empty() {
                results.push(GrepMatch {
                    file: self.file_info(entry.path())?,
                    lines,
                });
            }
        }

        Ok(results)
    }

    /// Full content of one file, or `NotFound`.
    pub fn get_content(&self, filename: &str, directory: Option<&str>) -> Result<String> {
        let path = self.resolve_file(filename, directory)?;
        Ok(std::fs::read_to_string(path)?)
    }

    /// Size, modification time, and path of one file, or `NotFound`.
    pub fn get_info(&self, filename: &str, directory: Option<&str>) -> Result<FileInfo> {
        let path = self.resolve_file(filename, directory)?;
        self.file_info(&path)
    }

    /// Top-level directory names, for scoping intent classification.
    pub fn top_level_directories(&self) -> Vec<String> {
        let mut dirs: Vec<String> = std::fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        dirs.sort();
        dirs
    }

    fn resolve_dir(&self, directory: Option<&str>) -> Result<PathBuf> {
        let base = match directory {
            None | Some("") => self.root.clone(),
            Some(dir) => {
                reject_traversal(dir)?;
                self.root.join(dir)
            }
        };
        if !base.is_dir() {
            return Err(Error::not_found(format!(
                "directory '{}'",
                directory.unwrap_or("")
            )));
        }
        Ok(base)
    }

    fn resolve_file(&self, filename: &str, directory: Option<&str>) -> Result<PathBuf> {
        reject_traversal(filename)?;
        let path = self.resolve_dir(directory)?.join(filename);
        if !path.is_file() {
            return Err(Error::not_found(format!("file '{filename}'")));
        }
        Ok(path)
    }

    fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        let secs = modified
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        Ok(FileInfo {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: relative,
            size_bytes: metadata.len(),
            modified_at: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            is_dir: metadata.is_dir(),
        })
    }
}

fn reject_traversal(path: &str) -> Result<()> {
    let p = Path::new(path);
    if p.is_absolute() || p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(Error::invalid_selection(format!(
            "path '{path}' escapes the knowledge base"
        )));
    }
    Ok(())
}
