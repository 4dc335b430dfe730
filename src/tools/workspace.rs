//! Workspace file operations shared by the tool dispatcher and the working
//! context engine.
//!
//! All paths handed to these functions are normalized to workspace-relative
//! form with `/` separators before use; absolute paths under the workspace
//! root are accepted and relativized. The walk helpers prune VCS and build
//! directories.

use std::path::{Path, PathBuf};

use regex::Regex;

use super::ToolError;

/// Directory names never descended into.
const PRUNED_DIRS: &[&str] = &[".git", "target", "node_modules", "coverage"];

/// Maximum grep matches reported.
const MAX_GREP_MATCHES: usize = 100;

/// Handle to the agent's own source checkout.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a workspace rooted at the given directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a path to workspace-relative form with `/` separators.
    ///
    /// Absolute paths beginning with the workspace root are relativized;
    /// everything else is taken as already relative.
    pub fn normalize(&self, path: &str) -> String {
        let unified = path.replace('\\', "/");
        let root = self.root.to_string_lossy().replace('\\', "/");
        let stripped = unified
            .strip_prefix(&format!("{root}/"))
            .or_else(|| unified.strip_prefix(&root))
            .unwrap_or(&unified);
        stripped.trim_start_matches('/').to_owned()
    }

    /// Absolute filesystem path for a (possibly relative) tool path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(self.normalize(path))
    }

    /// Read a file's full content.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if the file cannot be read.
    pub fn read_to_string(&self, path: &str) -> Result<String, ToolError> {
        std::fs::read_to_string(self.resolve(path))
            .map_err(|_| ToolError::NotFound(format!("file not found: {}", self.normalize(path))))
    }

    /// Read a line-numbered slice of a file.
    ///
    /// Without a start line, small files come back whole; otherwise the
    /// window is capped at `window` lines from the start line.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if the file cannot be read.
    pub fn read_slice(
        &self,
        path: &str,
        start: Option<usize>,
        end: Option<usize>,
        window: usize,
    ) -> Result<String, ToolError> {
        let content = self.read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();

        let start_line = start.unwrap_or(1).max(1);
        let end_line = match (start, end) {
            (None, None) if total <= window => total,
            (_, Some(end)) => end.min(total),
            (_, None) => start_line.saturating_add(window).saturating_sub(1).min(total),
        };

        if start_line > total {
            return Ok(format!(
                "(file has {total} lines; requested start {start_line} is past the end)"
            ));
        }

        let mut out = String::new();
        for (offset, line) in lines
            .iter()
            .enumerate()
            .skip(start_line.saturating_sub(1))
            .take(end_line.saturating_sub(start_line).saturating_add(1))
        {
            let line_no = offset.saturating_add(1);
            out.push_str(&format!("{line_no} | {line}\n"));
        }
        if end_line < total {
            out.push_str(&format!(
                "(showing lines {start_line}-{end_line} of {total})\n"
            ));
        }
        Ok(out)
    }

    /// Replace `old` with `new`; `old` must occur exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] for a missing file and
    /// [`ToolError::ExecutionFailed`] on zero or multiple matches.
    pub fn edit(&self, path: &str, old: &str, new: &str) -> Result<(), ToolError> {
        let content = self.read_to_string(path)?;
        let matches = content.matches(old).count();
        if matches == 0 {
            return Err(ToolError::ExecutionFailed(format!(
                "oldString not found in {}",
                self.normalize(path)
            )));
        }
        if matches > 1 {
            return Err(ToolError::ExecutionFailed(format!(
                "oldString matches {matches} times in {}; it must be unique",
                self.normalize(path)
            )));
        }
        let updated = content.replacen(old, new, 1);
        std::fs::write(self.resolve(path), updated)
            .map_err(|e| ToolError::ExecutionFailed(format!("write failed: {e}")))
    }

    /// Create a new file, making parent directories. Fails if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::ExecutionFailed`] if the target exists or the
    /// write fails.
    pub fn create(&self, path: &str, content: &str) -> Result<(), ToolError> {
        let target = self.resolve(path);
        if target.exists() {
            return Err(ToolError::ExecutionFailed(format!(
                "file already exists: {}",
                self.normalize(path)
            )));
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::ExecutionFailed(format!("mkdir failed: {e}")))?;
        }
        std::fs::write(target, content)
            .map_err(|e| ToolError::ExecutionFailed(format!("write failed: {e}")))
    }

    /// Delete a file.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if the file does not exist.
    pub fn delete(&self, path: &str) -> Result<(), ToolError> {
        let target = self.resolve(path);
        if !target.is_file() {
            return Err(ToolError::NotFound(format!(
                "file not found: {}",
                self.normalize(path)
            )));
        }
        std::fs::remove_file(target)
            .map_err(|e| ToolError::ExecutionFailed(format!("delete failed: {e}")))
    }

    /// Substring/regex scan over workspace files, capped at 100 matches.
    ///
    /// An invalid regex is retried as an escaped literal. `include` is an
    /// optional glob over relative paths.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidInput`] for an unusable include pattern.
    pub fn grep(&self, query: &str, include: Option<&str>) -> Result<String, ToolError> {
        let regex = Regex::new(query)
            .or_else(|_| Regex::new(&regex::escape(query)))
            .map_err(|e| ToolError::InvalidInput(format!("unusable query: {e}")))?;

        let include = include
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| ToolError::InvalidInput(format!("invalid glob: {e}")))
            })
            .transpose()?;

        let mut matches = Vec::new();
        'outer: for rel in self.walk() {
            if let Some(pattern) = &include {
                if !pattern.matches(&rel) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(self.root.join(&rel)) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{rel}:{}: {}", idx.saturating_add(1), line.trim_end()));
                    if matches.len() >= MAX_GREP_MATCHES {
                        break 'outer;
                    }
                }
            }
        }

        if matches.is_empty() {
            Ok(format!("No matches for {query:?}"))
        } else {
            Ok(matches.join("\n"))
        }
    }

    /// Glob match over relative paths in the file tree.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidInput`] for an invalid pattern.
    pub fn glob_search(&self, pattern: &str) -> Result<String, ToolError> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| ToolError::InvalidInput(format!("invalid glob: {e}")))?;
        let hits: Vec<String> = self
            .walk()
            .into_iter()
            .filter(|rel| pattern.matches(rel))
            .collect();
        if hits.is_empty() {
            Ok(format!("No files match {}", pattern.as_str()))
        } else {
            Ok(hits.join("\n"))
        }
    }

    /// List directory entries, directories suffixed with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NotFound`] if the path is not a directory.
    pub fn list_directory(&self, path: &str) -> Result<String, ToolError> {
        let target = self.resolve(path);
        let entries = std::fs::read_dir(&target).map_err(|_| {
            ToolError::NotFound(format!("directory not found: {}", self.normalize(path)))
        })?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                names.push(format!("{name}/"));
            } else {
                names.push(name);
            }
        }
        names.sort();
        Ok(names.join("\n"))
    }

    /// Sorted list of all workspace-relative file paths, pruned.
    pub fn walk(&self) -> Vec<String> {
        let mut files = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if path.is_dir() {
                    if !PRUNED_DIRS.contains(&name.as_str()) && !name.starts_with('.') {
                        stack.push(path);
                    }
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    files.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }

        files.sort();
        files
    }

    /// Sorted relative-path listing of the workspace for the system prompt.
    pub fn file_tree(&self) -> String {
        self.walk().join("\n")
    }
}
