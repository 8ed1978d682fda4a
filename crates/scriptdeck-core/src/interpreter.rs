//! Interpreter resolution for script execution

use crate::error::{Result, ScriptDeckError};
use crate::types::{ScriptDescriptor, ScriptType};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

/// Program and arguments used to launch a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

/// Decide how to launch `script`.
///
/// Order: the shebang interpreter if it is on PATH, then the candidates for
/// the script type, then running the file directly when it is executable.
pub fn resolve(script: &ScriptDescriptor) -> Result<LaunchPlan> {
    // A shebang naming a different language than the extension is ignored
    let hinted = script.interpreter.as_deref().filter(|name| {
        script.script_type == ScriptType::Other
            || ScriptType::from_interpreter(name) == script.script_type
    });

    let candidates = hinted
        .into_iter()
        .chain(script.script_type.interpreter_candidates().iter().copied());

    for name in candidates {
        if let Ok(program) = which::which(name) {
            debug!("Using {} for {}", program.display(), script.name);
            return Ok(LaunchPlan {
                program,
                args: vec![script.path.clone().into_os_string()],
            });
        }
    }

    if script.is_executable {
        return Ok(LaunchPlan {
            program: script.path.clone(),
            args: Vec::new(),
        });
    }

    Err(ScriptDeckError::Spawn(format!(
        "no interpreter found for {} script {}",
        script.script_type, script.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn descriptor(
        name: &str,
        script_type: ScriptType,
        interpreter: Option<&str>,
    ) -> ScriptDescriptor {
        let path = PathBuf::from("/srv/scripts").join(name);
        ScriptDescriptor {
            id: ScriptDescriptor::id_for(&path),
            name: name.to_string(),
            path,
            script_type,
            size: 0,
            modified: Utc::now(),
            is_executable: false,
            description: None,
            tags: vec![],
            interpreter: interpreter.map(|s| s.to_string()),
            line_count: 0,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_resolves_to_an_interpreter() {
        let plan = resolve(&descriptor("a.sh", ScriptType::Shell, None)).unwrap();
        let program = plan.program.file_name().unwrap().to_string_lossy().to_string();
        assert!(program == "bash" || program == "sh");
        assert_eq!(plan.args, vec![OsString::from("/srv/scripts/a.sh")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_shebang_hint_is_preferred() {
        let plan = resolve(&descriptor("a.sh", ScriptType::Shell, Some("sh"))).unwrap();
        assert_eq!(plan.program.file_name().unwrap(), "sh");
    }

    #[test]
    fn test_other_without_interpreter_or_exec_bit_fails() {
        let result = resolve(&descriptor(
            "tool.xyz",
            ScriptType::Other,
            Some("no-such-interp-xyz"),
        ));
        assert!(matches!(result, Err(ScriptDeckError::Spawn(_))));
    }

    #[test]
    fn test_executable_falls_back_to_direct_run() {
        let mut script = descriptor("tool.xyz", ScriptType::Other, None);
        script.is_executable = true;
        let plan = resolve(&script).unwrap();
        assert_eq!(plan.program, script.path);
        assert!(plan.args.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_passed_through() {
        use std::os::unix::ffi::OsStrExt;
        let mut script = descriptor("a.sh", ScriptType::Shell, None);
        script.path = PathBuf::from(std::ffi::OsStr::from_bytes(b"/srv/scripts/caf\xe9.sh"));
        let plan = resolve(&script).unwrap();
        assert_eq!(plan.args, vec![script.path.into_os_string()]);
    }
}
