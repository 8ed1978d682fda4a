//! Script registry: multi-root scans, single script validation and search

use crate::error::{Result, ScriptDeckError};
use crate::metadata::MetadataExtractor;
use crate::policy::SecurityPolicy;
use crate::scanner::{self, DirectoryScanner};
use crate::tree::ScriptTree;
use crate::types::ScriptDescriptor;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A root that could not be scanned, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRoot {
    pub root: PathBuf,
    pub reason: String,
}

/// Result of a best-effort multi-root scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Trees for the roots that scanned successfully, in input order
    pub trees: Vec<ScriptTree>,
    pub skipped: Vec<SkippedRoot>,
}

impl ScanReport {
    pub fn script_count(&self) -> usize {
        self.trees.iter().map(|t| t.script_count()).sum()
    }

    /// Every descriptor from every tree, in tree order
    pub fn scripts(&self) -> Vec<ScriptDescriptor> {
        self.trees
            .iter()
            .flat_map(|t| t.scripts().into_iter().cloned())
            .collect()
    }
}

#[derive(Clone)]
pub struct ScriptRegistry {
    scanner: DirectoryScanner,
}

impl ScriptRegistry {
    pub fn new(policy: Arc<SecurityPolicy>, extractor: Arc<dyn MetadataExtractor>) -> Self {
        Self {
            scanner: DirectoryScanner::new(policy, extractor),
        }
    }

    /// Use a preconfigured scanner (symlink/hidden-file options)
    pub fn with_scanner(scanner: DirectoryScanner) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &DirectoryScanner {
        &self.scanner
    }

    /// Scan every root concurrently.
    ///
    /// A failing root is left out of the trees and listed in
    /// `ScanReport::skipped`. Cancellation aborts the whole call.
    pub async fn scan_directories(
        &self,
        cancel: &CancellationToken,
        roots: &[PathBuf],
    ) -> Result<ScanReport> {
        let tasks: Vec<_> = roots
            .iter()
            .map(|root| {
                let scanner = self.scanner.clone();
                let token = cancel.child_token();
                let root = root.clone();
                tokio::task::spawn_blocking(move || scanner.scan(&token, &root))
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        let mut report = ScanReport::default();
        for (root, joined) in roots.iter().zip(results) {
            let outcome = joined.unwrap_or_else(|e| {
                Err(ScriptDeckError::Io(std::io::Error::other(format!(
                    "scan task failed: {}",
                    e
                ))))
            });
            match outcome {
                Ok(tree) => report.trees.push(tree),
                Err(ScriptDeckError::Cancelled) => return Err(ScriptDeckError::Cancelled),
                Err(e) => {
                    warn!("Skipping root {}: {}", root.display(), e);
                    report.skipped.push(SkippedRoot {
                        root: root.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(ScriptDeckError::Cancelled);
        }

        info!(
            "Scanned {} roots: {} scripts, {} skipped",
            roots.len(),
            report.script_count(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Stat and validate a single script
    pub fn validate_script(&self, path: &Path) -> Result<ScriptDescriptor> {
        let resolved = self.scanner.validator().validate_file(path)?;
        let metadata = std::fs::metadata(&resolved).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ScriptDeckError::NotFound(path.display().to_string()),
            _ => ScriptDeckError::Io(e),
        })?;
        if !metadata.is_file() {
            return Err(ScriptDeckError::NotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        scanner::check_readable(&resolved)?;
        Ok(self.scanner.describe(&resolved, &metadata))
    }

    /// Re-stat a script and return a fresh descriptor
    pub fn refresh_script(&self, path: &Path) -> Result<ScriptDescriptor> {
        self.validate_script(path)
    }

    /// Refresh one script inside an existing tree: replace it, or drop it
    /// if the file is gone or no longer valid
    pub fn refresh_in_tree(&self, tree: &mut ScriptTree, path: &Path) -> Option<ScriptDescriptor> {
        match self.refresh_script(path) {
            Ok(script) => {
                let node = tree.find_dir(script.directory())?;
                tree.upsert_script(node, script.clone());
                Some(script)
            }
            Err(e) => {
                warn!("Dropping {} from tree: {}", path.display(), e);
                tree.remove_script(path);
                None
            }
        }
    }
}

/// Case-insensitive search over name, type and tags. An empty query returns
/// the input unchanged; order is preserved.
pub fn filter_scripts(scripts: &[ScriptDescriptor], query: &str) -> Vec<ScriptDescriptor> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return scripts.to_vec();
    }
    scripts
        .iter()
        .filter(|s| s.matches(&needle))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::CommentExtractor;
    use crate::types::ScriptType;
    use std::fs;

    fn registry_for(roots: &[&Path]) -> ScriptRegistry {
        let policy = SecurityPolicy::new(roots).unwrap();
        ScriptRegistry::new(Arc::new(policy), Arc::new(CommentExtractor::new()))
    }

    #[tokio::test]
    async fn test_scan_directories_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.sh"), "#!/bin/bash\necho hi\n").unwrap();
        fs::write(tmp.path().join("b.py"), "print('hi')\n").unwrap();
        fs::write(tmp.path().join("c.txt"), "nope\n").unwrap();

        let registry = registry_for(&[tmp.path()]);
        let report = registry
            .scan_directories(&CancellationToken::new(), &[tmp.path().to_path_buf()])
            .await
            .unwrap();

        assert_eq!(report.trees.len(), 1);
        assert!(report.skipped.is_empty());
        let tree = &report.trees[0];
        assert_eq!(tree.script_count(), 2);
        let kinds: Vec<_> = tree
            .scripts()
            .iter()
            .map(|s| (s.name.clone(), s.script_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("a.sh".to_string(), ScriptType::Shell),
                ("b.py".to_string(), ScriptType::Python)
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_root_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good");
        fs::create_dir_all(&good).unwrap();
        fs::write(good.join("a.sh"), "echo\n").unwrap();

        let registry = registry_for(&[&good]);
        let missing = good.join("missing");
        let outside = tmp.path().to_path_buf();
        let report = registry
            .scan_directories(
                &CancellationToken::new(),
                &[missing.clone(), good.clone(), outside.clone()],
            )
            .await
            .unwrap();

        assert_eq!(report.trees.len(), 1);
        assert_eq!(report.script_count(), 1);
        let skipped: Vec<_> = report.skipped.iter().map(|s| s.root.clone()).collect();
        assert_eq!(skipped, vec![missing, outside]);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_scan() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.sh"), "echo\n").unwrap();

        let registry = registry_for(&[tmp.path()]);
        let token = CancellationToken::new();
        token.cancel();
        let result = registry
            .scan_directories(&token, &[tmp.path().to_path_buf()])
            .await;
        assert!(matches!(result, Err(ScriptDeckError::Cancelled)));
    }

    #[test]
    fn test_validate_script_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.sh");
        fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();

        let registry = registry_for(&[tmp.path()]);
        let first = registry.validate_script(&path).unwrap();
        let second = registry.refresh_script(&path).unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(first.script_type, second.script_type);
        assert_eq!(first.path, second.path);
        assert_eq!(first.is_executable, second.is_executable);
    }

    #[test]
    fn test_validate_script_rejections() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("dir.sh")).unwrap();
        fs::write(tmp.path().join("notes.txt"), "x\n").unwrap();

        let registry = registry_for(&[tmp.path()]);
        assert!(matches!(
            registry.validate_script(&tmp.path().join("dir.sh")),
            Err(ScriptDeckError::NotFound(_))
        ));
        assert!(matches!(
            registry.validate_script(&tmp.path().join("missing.sh")),
            Err(ScriptDeckError::NotFound(_))
        ));
        assert!(matches!(
            registry.validate_script(&tmp.path().join("notes.txt")),
            Err(ScriptDeckError::Validation(_))
        ));
        assert!(matches!(
            registry.validate_script(Path::new("../../etc/passwd.sh")),
            Err(ScriptDeckError::Validation(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_validate_script_rejects_unreadable_file() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let locked = tmp.path().join("locked.sh");
        fs::write(&locked, "echo\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&locked).is_ok() {
            // Running as root: permission bits do not stop reads
            return;
        }

        let registry = registry_for(&[tmp.path()]);
        match registry.validate_script(&locked) {
            Err(ScriptDeckError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_refresh_in_tree_replaces_and_drops() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.sh");
        fs::write(&path, "echo\n").unwrap();

        let registry = registry_for(&[tmp.path()]);
        let mut tree = registry
            .scanner()
            .scan(&CancellationToken::new(), tmp.path())
            .unwrap();
        let canonical = path.canonicalize().unwrap();

        fs::write(&path, "echo one\necho two\n").unwrap();
        let refreshed = registry.refresh_in_tree(&mut tree, &canonical).unwrap();
        assert_eq!(refreshed.line_count, 2);
        assert_eq!(tree.find_script(&canonical).unwrap().line_count, 2);

        fs::remove_file(&path).unwrap();
        assert!(registry.refresh_in_tree(&mut tree, &canonical).is_none());
        assert_eq!(tree.script_count(), 0);
    }

    fn sample() -> Vec<ScriptDescriptor> {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("Deploy.sh"), "# tags: ops\necho\n").unwrap();
        fs::write(tmp.path().join("report.py"), "# tags: Finance\nprint(1)\n").unwrap();
        fs::write(tmp.path().join("sync.js"), "console.log(1)\n").unwrap();
        let registry = registry_for(&[tmp.path()]);
        ["Deploy.sh", "report.py", "sync.js"]
            .iter()
            .map(|n| registry.validate_script(&tmp.path().join(n)).unwrap())
            .collect()
    }

    #[test]
    fn test_filter_empty_query_is_identity() {
        let scripts = sample();
        assert_eq!(filter_scripts(&scripts, ""), scripts);
        assert_eq!(filter_scripts(&scripts, "   "), scripts);
    }

    #[test]
    fn test_filter_matches_name_type_and_tags() {
        let scripts = sample();

        let by_name: Vec<_> = filter_scripts(&scripts, "DEPLOY")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(by_name, vec!["Deploy.sh"]);

        let by_type: Vec<_> = filter_scripts(&scripts, "python")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(by_type, vec!["report.py"]);

        let by_tag: Vec<_> = filter_scripts(&scripts, "finance")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(by_tag, vec!["report.py"]);

        for query in ["o", "s", "zzz"] {
            let needle = query.to_lowercase();
            for found in filter_scripts(&scripts, query) {
                assert!(scripts.contains(&found));
                assert!(found.matches(&needle));
            }
        }
    }
}
