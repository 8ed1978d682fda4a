//! Script metadata extraction.
//!
//! The scanner treats the extractor as a black box: it gets a path and a
//! script type and returns description/preview text. Failures are not fatal
//! to discovery.

use crate::error::Result;
use crate::types::ScriptType;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Number of leading lines inspected for the header comment
const HEADER_SCAN_LINES: usize = 50;

/// Default number of preview lines
const DEFAULT_PREVIEW_LINES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptMetadata {
    pub description: Option<String>,
    /// Program named by the shebang (`bash`, `python3`, ...)
    pub interpreter: Option<String>,
    pub preview: String,
    pub line_count: usize,
    pub tags: Vec<String>,
}

/// Collaborator that reads descriptive text out of a script
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path, script_type: ScriptType) -> Result<ScriptMetadata>;
}

/// Reads the shebang, the leading comment block (or Python docstring) and a
/// `tags:` line from the top of the file.
#[derive(Debug, Clone)]
pub struct CommentExtractor {
    preview_lines: usize,
}

impl Default for CommentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommentExtractor {
    pub fn new() -> Self {
        Self {
            preview_lines: DEFAULT_PREVIEW_LINES,
        }
    }

    pub fn with_preview_lines(mut self, lines: usize) -> Self {
        self.preview_lines = lines;
        self
    }
}

impl MetadataExtractor for CommentExtractor {
    fn extract(&self, path: &Path, script_type: ScriptType) -> Result<ScriptMetadata> {
        let reader = BufReader::new(File::open(path)?);

        let mut header = Vec::new();
        let mut preview = Vec::new();
        let mut line_count = 0;
        for line in reader.lines() {
            // Binary or non-UTF-8 content: keep what was read so far
            let Ok(line) = line else { break };
            if line_count < HEADER_SCAN_LINES {
                header.push(line.clone());
            }
            if preview.len() < self.preview_lines {
                preview.push(line);
            }
            line_count += 1;
        }

        let interpreter = header.first().and_then(|l| parse_shebang(l));
        let (description, tags) = parse_header(&header, script_type);

        Ok(ScriptMetadata {
            description,
            interpreter,
            preview: preview.join("\n"),
            line_count,
            tags,
        })
    }
}

/// Program name from a shebang line, looking through `env` and its flags
pub fn parse_shebang(line: &str) -> Option<String> {
    let rest = line.strip_prefix("#!")?.trim();
    let mut words = rest.split_whitespace();
    let program = words.next()?;
    let name = Path::new(program).file_name()?.to_string_lossy().to_string();

    if name == "env" {
        return words
            .find(|w| !w.starts_with('-') && !w.contains('='))
            .map(|w| w.to_string());
    }
    Some(name)
}

fn comment_body<'a>(line: &'a str, script_type: ScriptType) -> Option<&'a str> {
    let trimmed = line.trim_start();
    let body = match script_type {
        ScriptType::Node => trimmed
            .strip_prefix("//")
            .or_else(|| trimmed.strip_prefix("/*"))
            .or_else(|| trimmed.strip_prefix('*').filter(|_| !trimmed.starts_with("*/"))),
        _ => trimmed.strip_prefix('#'),
    }?;
    Some(body.trim_start_matches(['#', '/', '*']).trim())
}

fn is_noise(body: &str) -> bool {
    body.is_empty()
        || body.starts_with('!')
        || body.contains("-*-")
        || body.starts_with("shellcheck")
        || body.starts_with("eslint")
        || body == "*/"
}

fn parse_tags(body: &str) -> Option<Vec<String>> {
    let rest = ["@tags", "tags:"].into_iter().find_map(|prefix| {
        body.get(..prefix.len())
            .filter(|head| head.eq_ignore_ascii_case(prefix))
            .map(|_| &body[prefix.len()..])
    })?;
    Some(
        rest.trim_start_matches(':')
            .split([',', ' '])
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect(),
    )
}

fn parse_header(header: &[String], script_type: ScriptType) -> (Option<String>, Vec<String>) {
    let mut lines = header.iter().map(|l| l.as_str()).peekable();

    // Shebang and blank lines before the comment block
    while let Some(line) = lines.peek() {
        if line.starts_with("#!") || line.trim().is_empty() {
            lines.next();
        } else {
            break;
        }
    }

    if script_type == ScriptType::Python {
        let quote = lines.peek().and_then(|line| {
            let trimmed = line.trim_start();
            ["\"\"\"", "'''"]
                .into_iter()
                .find(|q| trimmed.starts_with(q))
        });
        if let Some(quote) = quote {
            return parse_docstring(&mut lines, quote);
        }
    }

    let mut description = Vec::new();
    let mut tags = Vec::new();
    for line in lines {
        let Some(body) = comment_body(line, script_type) else {
            break;
        };
        if let Some(found) = parse_tags(body) {
            tags.extend(found);
        } else if !is_noise(body) {
            description.push(body.to_string());
        }
    }

    (join_description(description), tags)
}

fn parse_docstring<'a, I>(lines: &mut I, quote: &str) -> (Option<String>, Vec<String>)
where
    I: Iterator<Item = &'a str>,
{
    let mut description = Vec::new();
    let mut tags = Vec::new();
    let mut first = true;

    for line in lines {
        let mut text = line.trim();
        if first {
            text = text.trim_start_matches(quote);
            first = false;
        }
        let closed = text.contains(quote);
        let text = text.split(quote).next().unwrap_or("").trim();

        if let Some(found) = parse_tags(text) {
            tags.extend(found);
        } else if !text.is_empty() {
            description.push(text.to_string());
        }
        if closed {
            break;
        }
    }

    (join_description(description), tags)
}

fn join_description(lines: Vec<String>) -> Option<String> {
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_shebang() {
        assert_eq!(parse_shebang("#!/bin/bash"), Some("bash".to_string()));
        assert_eq!(
            parse_shebang("#!/usr/bin/env python3"),
            Some("python3".to_string())
        );
        assert_eq!(
            parse_shebang("#!/usr/bin/env -S node --no-warnings"),
            Some("node".to_string())
        );
        assert_eq!(parse_shebang("echo hi"), None);
    }

    #[test]
    fn test_shell_header_comment() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deploy.sh");
        fs::write(
            &path,
            "#!/bin/bash\n# Deploy the site\n# to production.\n# tags: deploy, ops\n\necho go\n",
        )
        .unwrap();

        let meta = CommentExtractor::new()
            .extract(&path, ScriptType::Shell)
            .unwrap();
        assert_eq!(meta.interpreter.as_deref(), Some("bash"));
        assert_eq!(
            meta.description.as_deref(),
            Some("Deploy the site to production.")
        );
        assert_eq!(meta.tags, vec!["deploy".to_string(), "ops".to_string()]);
        assert_eq!(meta.line_count, 6);
    }

    #[test]
    fn test_python_docstring() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.py");
        let content = "#!/usr/bin/env python3\n\"\"\"Build the weekly report.\n\n\
                       @tags: reports\n\"\"\"\nprint('x')\n";
        fs::write(&path, content).unwrap();

        let meta = CommentExtractor::new()
            .extract(&path, ScriptType::Python)
            .unwrap();
        assert_eq!(meta.description.as_deref(), Some("Build the weekly report."));
        assert_eq!(meta.tags, vec!["reports".to_string()]);
    }

    #[test]
    fn test_node_line_comments_and_preview() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sync.js");
        fs::write(&path, "// Sync caches\nconsole.log(1)\nconsole.log(2)\n").unwrap();

        let meta = CommentExtractor::new()
            .with_preview_lines(2)
            .extract(&path, ScriptType::Node)
            .unwrap();
        assert_eq!(meta.description.as_deref(), Some("Sync caches"));
        assert_eq!(meta.preview, "// Sync caches\nconsole.log(1)");
        assert_eq!(meta.interpreter, None);
    }

    #[test]
    fn test_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result =
            CommentExtractor::new().extract(&tmp.path().join("nope.sh"), ScriptType::Shell);
        assert!(result.is_err());
    }
}
