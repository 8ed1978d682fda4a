//! Security policy shared by discovery and execution

use crate::error::{Result, ScriptDeckError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default maximum execution time (5 minutes)
pub const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(300);

/// Default number of output lines kept per session
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 10_000;

/// Extensions allowed when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["sh", "bash", "zsh", "py", "js", "mjs"];

/// Immutable policy. Share it as `Arc<SecurityPolicy>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    allowed_roots: Vec<PathBuf>,
    allowed_extensions: Vec<String>,
    max_execution_time: Duration,
    max_output_lines: usize,
    restricted_commands: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            restricted_commands: Vec::new(),
        }
    }
}

impl SecurityPolicy {
    /// Create a policy for the given roots. Roots are canonicalized and must
    /// be existing directories.
    pub fn new<P: AsRef<Path>>(roots: &[P]) -> Result<Self> {
        Self::default().with_roots(roots)
    }

    /// Replace the allowed roots
    pub fn with_roots<P: AsRef<Path>>(mut self, roots: &[P]) -> Result<Self> {
        let mut canonical = Vec::with_capacity(roots.len());
        for root in roots {
            let root = root.as_ref();
            let resolved = root.canonicalize().map_err(|e| {
                ScriptDeckError::InvalidConfig(format!(
                    "allowed root {} cannot be resolved: {}",
                    root.display(),
                    e
                ))
            })?;
            if !resolved.is_dir() {
                return Err(ScriptDeckError::NotADirectory(root.display().to_string()));
            }
            if !canonical.contains(&resolved) {
                canonical.push(resolved);
            }
        }
        self.allowed_roots = canonical;
        Ok(self)
    }

    /// Replace the allowed extensions. A leading dot is ignored.
    pub fn with_extensions<S: AsRef<str>>(mut self, extensions: &[S]) -> Self {
        self.allowed_extensions = extensions
            .iter()
            .map(|e| e.as_ref().trim().trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = limit;
        self
    }

    /// Set the per-session output cap (at least one line)
    pub fn with_max_output_lines(mut self, lines: usize) -> Self {
        self.max_output_lines = lines.max(1);
        self
    }

    pub fn with_restricted_commands<S: AsRef<str>>(mut self, commands: &[S]) -> Self {
        self.restricted_commands = commands.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn max_execution_time(&self) -> Duration {
        self.max_execution_time
    }

    pub fn max_output_lines(&self) -> usize {
        self.max_output_lines
    }

    pub fn restricted_commands(&self) -> &[String] {
        &self.restricted_commands
    }

    /// Exact extension match against the allow list
    pub fn allows_extension(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == ext)
    }

    /// Restricted commands mentioned in `content`. Advisory only: matches
    /// are reported, never enforced.
    pub fn restricted_hits(&self, content: &str) -> Vec<String> {
        self.restricted_commands
            .iter()
            .filter(|cmd| {
                content.lines().any(|line| {
                    let line = line.trim_start();
                    !line.starts_with('#')
                        && line
                            .split(|c: char| c.is_whitespace() || c == ';' || c == '|' || c == '&')
                            .any(|word| word == cmd.as_str())
                })
            })
            .cloned()
            .collect()
    }
}
