//! Core type definitions for ScriptDeck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Supported script kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Shell,
    Python,
    Node,
    Other,
}

/// Extension → script type table. Anything not listed maps to `Other`.
const EXTENSION_TABLE: &[(&str, ScriptType)] = &[
    ("sh", ScriptType::Shell),
    ("bash", ScriptType::Shell),
    ("zsh", ScriptType::Shell),
    ("py", ScriptType::Python),
    ("js", ScriptType::Node),
    ("mjs", ScriptType::Node),
    ("cjs", ScriptType::Node),
];

impl ScriptType {
    /// Get all script types
    pub fn all() -> &'static [ScriptType] {
        &[
            ScriptType::Shell,
            ScriptType::Python,
            ScriptType::Node,
            ScriptType::Other,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Shell => "shell",
            ScriptType::Python => "python",
            ScriptType::Node => "node",
            ScriptType::Other => "other",
        }
    }

    /// Classify by file extension (without the leading dot)
    pub fn from_extension(ext: &str) -> Self {
        EXTENSION_TABLE
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, t)| *t)
            .unwrap_or(ScriptType::Other)
    }

    /// Classify by the interpreter named in a shebang line
    pub fn from_interpreter(name: &str) -> Self {
        match name {
            "sh" | "bash" | "zsh" | "dash" | "ksh" => ScriptType::Shell,
            n if n.starts_with("python") => ScriptType::Python,
            "node" | "nodejs" => ScriptType::Node,
            _ => ScriptType::Other,
        }
    }

    /// Classify a path, refining `Other` with the shebang interpreter if known
    pub fn detect(path: &Path, interpreter: Option<&str>) -> Self {
        let by_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(ScriptType::from_extension)
            .unwrap_or(ScriptType::Other);

        match (by_ext, interpreter) {
            (ScriptType::Other, Some(name)) => ScriptType::from_interpreter(name),
            (t, _) => t,
        }
    }

    /// Interpreter programs to try, in order of preference.
    /// Empty means the file has to be executed directly.
    pub fn interpreter_candidates(&self) -> &'static [&'static str] {
        match self {
            ScriptType::Shell => &["bash", "sh"],
            ScriptType::Python => &["python3", "python"],
            ScriptType::Node => &["node", "nodejs"],
            ScriptType::Other => &[],
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata record for one discovered script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptDescriptor {
    /// Stable id derived from the canonical path
    pub id: String,
    pub name: String,
    /// Absolute canonical path; the descriptor's identity
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub script_type: ScriptType,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_executable: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Interpreter named by the shebang, if any
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub line_count: usize,
}

impl ScriptDescriptor {
    /// Deterministic id for a canonical path
    pub fn id_for(path: &Path) -> String {
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, path.as_os_str().as_encoded_bytes())
            .to_string()
    }

    /// Directory the script lives in
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Case-insensitive match against name, type, or any tag.
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.script_type.as_str().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_table() {
        assert_eq!(ScriptType::from_extension("sh"), ScriptType::Shell);
        assert_eq!(ScriptType::from_extension("py"), ScriptType::Python);
        assert_eq!(ScriptType::from_extension("mjs"), ScriptType::Node);
        assert_eq!(ScriptType::from_extension("rb"), ScriptType::Other);
    }

    #[test]
    fn test_detect_refines_other_with_shebang() {
        let path = Path::new("/tmp/tool.cmd");
        assert_eq!(ScriptType::detect(path, None), ScriptType::Other);
        assert_eq!(
            ScriptType::detect(path, Some("python3")),
            ScriptType::Python
        );
        // Extension wins when it is known
        assert_eq!(
            ScriptType::detect(Path::new("/tmp/a.sh"), Some("python3")),
            ScriptType::Shell
        );
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = ScriptDescriptor::id_for(Path::new("/srv/scripts/a.sh"));
        let b = ScriptDescriptor::id_for(Path::new("/srv/scripts/a.sh"));
        let c = ScriptDescriptor::id_for(Path::new("/srv/scripts/b.sh"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[cfg(unix)]
    #[test]
    fn test_id_for_keeps_non_utf8_paths_apart() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let a = Path::new(OsStr::from_bytes(b"/srv/caf\xe9.sh"));
        let b = Path::new(OsStr::from_bytes(b"/srv/caf\xe8.sh"));
        // Both render as the same lossy string
        assert_eq!(a.to_string_lossy(), b.to_string_lossy());
        assert_ne!(ScriptDescriptor::id_for(a), ScriptDescriptor::id_for(b));
        assert_eq!(ScriptDescriptor::id_for(a), ScriptDescriptor::id_for(a));
    }
}
