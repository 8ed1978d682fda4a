//! Scan command - print the script tree of each root

use anyhow::Result;
use colored::Colorize;
use scriptdeck_core::{NodeId, ScriptDescriptor, ScriptTree};
use std::path::{Path, PathBuf};

pub async fn run(config: Option<&Path>, roots: Vec<PathBuf>) -> Result<()> {
    let settings = super::load_settings(config, roots)?;
    let report = super::scan_roots(&settings).await?;

    for tree in &report.trees {
        println!(
            "{} {}",
            tree.root_path().display().to_string().blue().bold(),
            format!("({} scripts)", tree.script_count()).dimmed()
        );
        print_node(tree, tree.root(), 1);
        println!();
    }

    for skipped in &report.skipped {
        println!(
            "{} {}: {}",
            "Skipped".yellow(),
            skipped.root.display(),
            skipped.reason.dimmed()
        );
    }

    println!(
        "{} scripts in {} roots",
        report.script_count().to_string().green().bold(),
        report.trees.len()
    );
    Ok(())
}

fn print_node(tree: &ScriptTree, id: NodeId, depth: usize) {
    let node = tree.node(id);
    let indent = "  ".repeat(depth);

    for child in node.children() {
        let dir = tree.node(*child);
        // Empty directories stay in the tree but are not worth a line
        if dir.script_count() == 0 {
            continue;
        }
        println!(
            "{}{}/ {}",
            indent,
            dir.name.cyan(),
            format!("({})", dir.script_count()).dimmed()
        );
        print_node(tree, *child, depth + 1);
    }

    for script in node.scripts() {
        println!("{}{}", indent, script_line(script));
    }
}

pub fn script_line(script: &ScriptDescriptor) -> String {
    let mut line = format!(
        "{} {}",
        script.name.green(),
        format!("[{}]", script.script_type).dimmed()
    );
    if let Some(description) = &script.description {
        line.push_str(&format!(" - {}", description));
    }
    if !script.tags.is_empty() {
        line.push_str(&format!(" {}", format!("#{}", script.tags.join(" #")).yellow()));
    }
    line
}
