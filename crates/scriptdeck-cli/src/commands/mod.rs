//! CLI subcommands and the settings plumbing they share

pub mod check;
pub mod run;
pub mod scan;
pub mod search;

use anyhow::{Context, Result};
use scriptdeck_core::{
    CommentExtractor, ConfigManager, DirectoryScanner, ScanReport, ScriptRegistry,
    SecurityPolicy, Settings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Settings from `--config`, the working directory, or the home directory.
/// Roots given on the command line replace the configured ones; with none
/// at all the working directory is used.
pub fn load_settings(config: Option<&Path>, roots: Vec<PathBuf>) -> Result<Settings> {
    let mut manager = ConfigManager::new();
    let cwd = std::env::current_dir()?;

    let mut settings = match config {
        Some(path) => manager
            .load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => manager.discover(&cwd)?,
    };

    if !roots.is_empty() {
        settings.roots = roots;
    }
    if settings.roots.is_empty() {
        debug!("No roots configured, using {}", cwd.display());
        settings.roots = vec![cwd];
    }

    for problem in settings.validate() {
        warn!("Settings: {}", problem);
    }
    Ok(settings)
}

pub fn build_policy(settings: &Settings) -> Result<Arc<SecurityPolicy>> {
    Ok(Arc::new(
        settings.to_policy().context("Invalid security policy")?,
    ))
}

pub fn build_scanner(settings: &Settings, policy: Arc<SecurityPolicy>) -> DirectoryScanner {
    DirectoryScanner::new(policy, Arc::new(CommentExtractor::new()))
        .with_follow_symlinks(settings.follow_symlinks)
        .with_hidden(settings.include_hidden)
}

pub fn build_registry(settings: &Settings) -> Result<ScriptRegistry> {
    let policy = build_policy(settings)?;
    Ok(ScriptRegistry::with_scanner(build_scanner(settings, policy)))
}

/// Scan the configured roots; Ctrl-C aborts the scan
pub async fn scan_roots(settings: &Settings) -> Result<ScanReport> {
    let registry = build_registry(settings)?;
    let cancel = CancellationToken::new();

    let scan = registry.scan_directories(&cancel, &settings.roots);
    tokio::pin!(scan);
    tokio::select! {
        res = &mut scan => return Ok(res?),
        _ = tokio::signal::ctrl_c() => cancel.cancel(),
    }
    Ok(scan.await?)
}
