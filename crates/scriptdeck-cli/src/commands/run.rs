//! Run command - execute a script and stream its output

use anyhow::Result;
use colored::Colorize;
use futures::StreamExt;
use scriptdeck_core::{OutputStream, SessionManager, SessionSnapshot, SessionStatus};
use std::path::Path;
use tracing::warn;

/// Exit code used when the time limit was hit, as with coreutils `timeout`
const EXIT_TIMED_OUT: i32 = 124;
/// Exit code used after Ctrl-C
const EXIT_CANCELLED: i32 = 130;

/// Returns the exit code the CLI should finish with
pub async fn execute(config: Option<&Path>, path: &Path, quiet: bool) -> Result<i32> {
    let settings = super::load_settings(config, Vec::new())?;
    let registry = super::build_registry(&settings)?;
    let script = registry.validate_script(path)?;

    let manager = SessionManager::new(super::build_policy(&settings)?)
        .with_grace_period(settings.grace_period())
        .with_history_limit(settings.history_limit);

    if !quiet {
        println!(
            "{} {} {}",
            "▶".cyan(),
            script.name.bold(),
            format!("[{}]", script.script_type).dimmed()
        );
    }

    let id = manager.execute_script(&script)?;
    let output = manager.stream_output(&id).await?;
    tokio::pin!(output);

    loop {
        tokio::select! {
            line = output.next() => match line {
                Some(line) => match line.stream {
                    OutputStream::Stdout => println!("{}", line.text),
                    OutputStream::Stderr => eprintln!("{}", line.text.red()),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if !quiet {
                    eprintln!("{}", "Cancelling...".yellow());
                }
                if let Err(e) = manager.cancel_execution(&id).await {
                    warn!("Cancel failed: {}", e);
                }
            }
        }
    }

    let snapshot = manager.wait_for_completion(&id).await?;
    if !quiet {
        print_summary(&snapshot);
    }
    Ok(exit_code(&snapshot))
}

fn print_summary(snapshot: &SessionSnapshot) {
    let elapsed = match (snapshot.started_at, snapshot.ended_at) {
        (Some(start), Some(end)) => {
            format!("{:.1}s", (end - start).num_milliseconds() as f64 / 1000.0)
        }
        _ => "-".to_string(),
    };
    let status = match snapshot.status {
        SessionStatus::Completed => snapshot.status.to_string().green(),
        SessionStatus::Cancelled | SessionStatus::TimedOut => snapshot.status.to_string().yellow(),
        _ => snapshot.status.to_string().red(),
    };

    eprintln!();
    eprintln!("{} {} in {}", "■".cyan(), status.bold(), elapsed);
    if let Some(error) = &snapshot.error {
        eprintln!("   {}", error.dimmed());
    }
    if snapshot.dropped_lines > 0 {
        eprintln!(
            "   {} older lines dropped from the buffer",
            snapshot.dropped_lines
        );
    }
}

fn exit_code(snapshot: &SessionSnapshot) -> i32 {
    match snapshot.status {
        SessionStatus::Completed => 0,
        SessionStatus::TimedOut => EXIT_TIMED_OUT,
        SessionStatus::Cancelled => EXIT_CANCELLED,
        _ => snapshot.exit_code.filter(|c| *c != 0).unwrap_or(1),
    }
}
