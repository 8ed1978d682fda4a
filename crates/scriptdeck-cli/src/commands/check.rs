//! Check command - validate one script and show what would run

use anyhow::Result;
use colored::Colorize;
use scriptdeck_core::interpreter;
use std::path::Path;

pub fn run(config: Option<&Path>, path: &Path, json: bool) -> Result<()> {
    let settings = super::load_settings(config, Vec::new())?;
    let registry = super::build_registry(&settings)?;
    let script = registry.validate_script(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&script)?);
        return Ok(());
    }

    println!("{} {}", "✓".green(), script.name.bold());
    println!("   Path:        {}", script.path.display());
    println!("   Type:        {}", script.script_type);
    println!("   Size:        {} bytes, {} lines", script.size, script.line_count);
    println!("   Modified:    {}", script.modified.format("%Y-%m-%d %H:%M:%S"));
    println!("   Executable:  {}", if script.is_executable { "yes" } else { "no" });
    if let Some(description) = &script.description {
        println!("   Description: {}", description);
    }
    if !script.tags.is_empty() {
        println!("   Tags:        {}", script.tags.join(", "));
    }

    match interpreter::resolve(&script) {
        Ok(plan) => println!("   Runs with:   {}", plan.program.display()),
        Err(e) => println!("   {} {}", "✗".red(), e),
    }

    let content = std::fs::read_to_string(&script.path).unwrap_or_default();
    let hits = registry.scanner().validator().policy().restricted_hits(&content);
    if !hits.is_empty() {
        println!(
            "   {} uses restricted commands: {}",
            "⚠".yellow(),
            hits.join(", ").yellow()
        );
    }
    Ok(())
}
