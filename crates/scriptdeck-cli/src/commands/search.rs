//! Search command - filter scripts across all roots

use anyhow::Result;
use colored::Colorize;
use scriptdeck_core::filter_scripts;
use std::path::{Path, PathBuf};

pub async fn run(config: Option<&Path>, query: &str, roots: Vec<PathBuf>) -> Result<()> {
    let settings = super::load_settings(config, roots)?;
    let report = super::scan_roots(&settings).await?;

    let matches = filter_scripts(&report.scripts(), query);
    if matches.is_empty() {
        println!("{} '{}'", "No scripts match".yellow(), query);
        return Ok(());
    }

    for script in &matches {
        println!(
            "{}  {}",
            super::scan::script_line(script),
            script.directory().display().to_string().dimmed()
        );
    }
    println!();
    println!("{} matches", matches.len().to_string().green().bold());
    Ok(())
}
