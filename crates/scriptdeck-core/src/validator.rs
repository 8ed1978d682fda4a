//! Path validation against the security policy.
//!
//! Keeps every discovered or executed path inside the allowed roots and
//! restricted to the allowed extensions.

use crate::error::ValidationError;
use crate::policy::SecurityPolicy;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// What the candidate is expected to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct PathValidator {
    policy: Arc<SecurityPolicy>,
}

impl PathValidator {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Validate `candidate` and return its resolved absolute path.
    ///
    /// Rules are applied in order: traversal, root containment, extension
    /// (files only). Existing paths are canonicalized before the containment
    /// check so a symlink cannot point outside the roots.
    pub fn validate(&self, candidate: &Path, kind: PathKind) -> Result<PathBuf, ValidationError> {
        let cleaned = clean_path(candidate)?;
        let resolved = resolve(&cleaned)?;

        let roots = self.policy.allowed_roots();
        if !roots.is_empty() && !roots.iter().any(|root| resolved.starts_with(root)) {
            return Err(ValidationError::OutsideRoots(display(candidate)));
        }

        if kind == PathKind::File {
            self.check_extension(&resolved)?;
        }

        Ok(resolved)
    }

    pub fn validate_file(&self, candidate: &Path) -> Result<PathBuf, ValidationError> {
        self.validate(candidate, PathKind::File)
    }

    pub fn validate_dir(&self, candidate: &Path) -> Result<PathBuf, ValidationError> {
        self.validate(candidate, PathKind::Directory)
    }

    /// Extension rule on its own, for walks that already start from a
    /// validated root
    pub fn check_extension(&self, path: &Path) -> Result<(), ValidationError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext.is_empty() || !self.policy.allows_extension(ext) {
            return Err(ValidationError::DisallowedExtension {
                path: display(path),
                extension: ext.to_string(),
            });
        }
        Ok(())
    }

    /// Root containment on its own
    pub fn is_within_roots(&self, path: &Path) -> bool {
        let roots = self.policy.allowed_roots();
        roots.is_empty() || roots.iter().any(|root| path.starts_with(root))
    }
}

/// Lexically clean a path: drop `.` segments and fold `name/..` pairs.
/// Any `..` left over, including one that would climb above the root of an
/// absolute path, is a traversal attempt.
pub fn clean_path(path: &Path) -> Result<PathBuf, ValidationError> {
    let raw = path.as_os_str();
    if raw.is_empty() {
        return Err(ValidationError::Malformed("empty path".to_string()));
    }
    if path.to_string_lossy().contains('\0') {
        return Err(ValidationError::Malformed(display(path)));
    }

    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => return Err(ValidationError::Traversal(display(path))),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Ok(PathBuf::from("."));
    }
    Ok(parts.iter().collect())
}

fn resolve(cleaned: &Path) -> Result<PathBuf, ValidationError> {
    let absolute = if cleaned.is_absolute() {
        cleaned.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|_| ValidationError::Malformed(display(cleaned)))?
            .join(cleaned)
    };
    Ok(absolute.canonicalize().unwrap_or(absolute))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn validator_for(root: &Path) -> PathValidator {
        let policy = SecurityPolicy::new(&[root]).unwrap().with_extensions(&["sh", "py"]);
        PathValidator::new(Arc::new(policy))
    }

    #[test]
    fn test_clean_path_folds_pairs() {
        assert_eq!(
            clean_path(Path::new("/srv/a/./b/../c.sh")).unwrap(),
            PathBuf::from("/srv/a/c.sh")
        );
        assert_eq!(clean_path(Path::new("a/..")).unwrap(), PathBuf::from("."));
    }

    #[test]
    fn test_surviving_parent_segment_is_traversal() {
        assert!(matches!(
            clean_path(Path::new("../etc/passwd")),
            Err(ValidationError::Traversal(_))
        ));
        assert!(matches!(
            clean_path(Path::new("/srv/../../etc/passwd")),
            Err(ValidationError::Traversal(_))
        ));
        assert!(matches!(
            clean_path(Path::new("")),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_accepts_file_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("a.sh");
        fs::write(&script, "echo hi\n").unwrap();

        let validator = validator_for(tmp.path());
        let resolved = validator.validate_file(&script).unwrap();
        assert_eq!(resolved, script.canonicalize().unwrap());

        // The root itself is allowed as a directory
        assert!(validator.validate_dir(tmp.path()).is_ok());
    }

    #[test]
    fn test_rejects_traversal_out_of_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(tmp.path().join("x.sh"), "echo\n").unwrap();

        let validator = validator_for(&root);
        let sneaky = root.join("sub/../../x.sh");
        assert!(matches!(
            validator.validate_file(&sneaky),
            Err(ValidationError::Traversal(_))
        ));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_outside() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("scripts");
        let evil = tmp.path().join("scripts-evil");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&evil).unwrap();
        fs::write(evil.join("a.sh"), "echo\n").unwrap();

        let validator = validator_for(&root);
        assert!(matches!(
            validator.validate_file(&evil.join("a.sh")),
            Err(ValidationError::OutsideRoots(_))
        ));
    }

    #[test]
    fn test_extension_must_match_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["c.txt", "d.SH", "noext"] {
            fs::write(tmp.path().join(name), "x\n").unwrap();
        }

        let validator = validator_for(tmp.path());
        for name in ["c.txt", "d.SH", "noext"] {
            assert!(matches!(
                validator.validate_file(&tmp.path().join(name)),
                Err(ValidationError::DisallowedExtension { .. })
            ));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let outside = tmp.path().join("outside.sh");
        fs::write(&outside, "echo\n").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link.sh")).unwrap();

        let validator = validator_for(&root);
        assert!(matches!(
            validator.validate_file(&root.join("link.sh")),
            Err(ValidationError::OutsideRoots(_))
        ));
    }

    #[test]
    fn test_error_does_not_leak_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let validator = validator_for(tmp.path());
        let err = validator.validate_file(Path::new("/definitely/elsewhere/a.sh")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/definitely/elsewhere/a.sh"));
        assert!(!message.contains(&tmp.path().display().to_string()));
    }
}
