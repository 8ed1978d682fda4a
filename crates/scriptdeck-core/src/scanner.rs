//! Directory scanner: walks one allowed root and builds its script tree.
//!
//! Symlinks are not followed unless enabled. When they are, every link
//! target is canonicalized, re-checked against the allowed roots, and
//! directories already visited are skipped so link cycles terminate.

use crate::error::{Result, ScriptDeckError};
use crate::metadata::{MetadataExtractor, ScriptMetadata};
use crate::policy::SecurityPolicy;
use crate::tree::{NodeId, ScriptTree};
use crate::types::{ScriptDescriptor, ScriptType};
use crate::validator::PathValidator;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::{self, DirEntry, Metadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct DirectoryScanner {
    validator: PathValidator,
    extractor: Arc<dyn MetadataExtractor>,
    follow_symlinks: bool,
    include_hidden: bool,
}

impl DirectoryScanner {
    pub fn new(policy: Arc<SecurityPolicy>, extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self {
            validator: PathValidator::new(policy),
            extractor,
            follow_symlinks: false,
            include_hidden: false,
        }
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Include dot-files and dot-directories
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn validator(&self) -> &PathValidator {
        &self.validator
    }

    /// Walk `root` and build its tree.
    ///
    /// Cancellation is checked before every entry. Entries that cannot be
    /// inspected are skipped; only a root that cannot be read is an error.
    pub fn scan(&self, cancel: &CancellationToken, root: &Path) -> Result<ScriptTree> {
        let root = self.validator.validate_dir(root)?;
        if !fs::metadata(&root)?.is_dir() {
            return Err(ScriptDeckError::NotADirectory(root.display().to_string()));
        }

        info!("Scanning {}", root.display());
        let entries = fs::read_dir(&root)?;

        let mut tree = ScriptTree::new(root.clone());
        let mut visited = HashSet::from([root.clone()]);
        let top = tree.root();
        self.walk_entries(cancel, &mut tree, top, entries, &mut visited)?;

        info!(
            "Scanned {}: {} scripts in {} directories",
            root.display(),
            tree.script_count(),
            tree.len()
        );
        Ok(tree)
    }

    /// Build a descriptor for a single file that already passed validation
    pub fn describe(&self, path: &Path, metadata: &Metadata) -> ScriptDescriptor {
        build_descriptor(self.extractor.as_ref(), path, metadata)
    }

    fn walk(
        &self,
        cancel: &CancellationToken,
        tree: &mut ScriptTree,
        node: NodeId,
        dir: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                return Ok(());
            }
        };
        self.walk_entries(cancel, tree, node, entries, visited)
    }

    fn walk_entries(
        &self,
        cancel: &CancellationToken,
        tree: &mut ScriptTree,
        node: NodeId,
        entries: fs::ReadDir,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<()> {
        let mut entries: Vec<DirEntry> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if cancel.is_cancelled() {
                return Err(ScriptDeckError::Cancelled);
            }

            if !self.include_hidden && entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let path = entry.path();
            let Some((target, metadata)) = self.inspect(&path, &entry) else {
                continue;
            };

            if metadata.is_dir() {
                if !visited.insert(target.clone()) {
                    debug!("Skipping already visited directory {}", path.display());
                    continue;
                }
                let child = tree.add_child(node, path.clone());
                self.walk(cancel, tree, child, &path, visited)?;
            } else if metadata.is_file() {
                if self.validator.check_extension(&target).is_err() {
                    debug!("Unsupported file {}", path.display());
                    continue;
                }
                if let Err(e) = check_readable(&target) {
                    warn!("Skipping unreadable script {}: {}", path.display(), e);
                    continue;
                }
                tree.upsert_script(node, self.describe(&target, &metadata));
            }
        }

        Ok(())
    }

    /// Resolve an entry to the path and metadata to use, or `None` to skip it
    fn inspect(&self, path: &Path, entry: &DirEntry) -> Option<(PathBuf, Metadata)> {
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                debug!("Cannot stat {}: {}", path.display(), e);
                return None;
            }
        };

        if file_type.is_symlink() && !self.follow_symlinks {
            debug!("Not following symlink {}", path.display());
            return None;
        }

        if !self.follow_symlinks {
            return match entry.metadata() {
                Ok(metadata) => Some((path.to_path_buf(), metadata)),
                Err(e) => {
                    debug!("Cannot stat {}: {}", path.display(), e);
                    None
                }
            };
        }

        let target = match path.canonicalize() {
            Ok(target) => target,
            Err(e) => {
                debug!("Broken link or unreadable entry {}: {}", path.display(), e);
                return None;
            }
        };
        if !self.validator.is_within_roots(&target) {
            warn!("Symlink {} points outside the allowed roots", path.display());
            return None;
        }
        match fs::metadata(&target) {
            Ok(metadata) => Some((target, metadata)),
            Err(e) => {
                debug!("Cannot stat {}: {}", target.display(), e);
                None
            }
        }
    }
}

/// Stat-derived fields plus extractor output. Extraction failures leave the
/// descriptor without a description.
pub(crate) fn build_descriptor(
    extractor: &dyn MetadataExtractor,
    path: &Path,
    metadata: &Metadata,
) -> ScriptDescriptor {
    let guessed = ScriptType::detect(path, None);
    let extracted = extractor.extract(path, guessed).unwrap_or_else(|e| {
        debug!("Metadata extraction failed for {}: {}", path.display(), e);
        ScriptMetadata::default()
    });

    let modified: DateTime<Utc> = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .into();

    ScriptDescriptor {
        id: ScriptDescriptor::id_for(path),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        script_type: ScriptType::detect(path, extracted.interpreter.as_deref()),
        size: metadata.len(),
        modified,
        is_executable: is_executable(metadata),
        description: extracted.description,
        tags: extracted.tags,
        interpreter: extracted.interpreter,
        line_count: extracted.line_count,
    }
}

/// A script the current user cannot open is never listed or launched
pub(crate) fn check_readable(path: &Path) -> std::io::Result<()> {
    fs::File::open(path).map(|_| ())
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    false
}
