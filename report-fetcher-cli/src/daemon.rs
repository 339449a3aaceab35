//! Line-oriented control shell around a [`Scheduler`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use report_fetcher::{LogSink, RunTarget, ScheduleEntry, Scheduler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const INVALID_TIME: &str = "Please enter a valid time (HH:MM).";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Run,
    Schedule(String),
    Cancel,
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ShellCommand, String> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default().to_lowercase();
    let argument = words.next();
    match (command.as_str(), argument) {
        ("run" | "start", None) => Ok(ShellCommand::Run),
        ("schedule", Some(time)) => Ok(ShellCommand::Schedule(time.to_string())),
        ("schedule", None) => Err(INVALID_TIME.to_string()),
        ("cancel", None) => Ok(ShellCommand::Cancel),
        ("status", None) => Ok(ShellCommand::Status),
        ("help" | "?", None) => Ok(ShellCommand::Help),
        ("quit" | "exit", None) => Ok(ShellCommand::Quit),
        _ => Err(format!("Unknown command: {line} (type 'help')")),
    }
}

fn status_line(scheduler: &Scheduler) -> String {
    let state = if scheduler.is_running() { "running" } else { "idle" };
    match (scheduler.active_schedule(), scheduler.next_fire()) {
        (Some(entry), Some(next)) => format!(
            "Status: {state}. Daily run at {entry}, next on {}.",
            next.format("%d/%m/%Y %H:%M")
        ),
        _ => format!("Status: {state}. No active schedule."),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  run              start a run now");
    println!("  schedule HH:MM   run every day at HH:MM (replaces the current schedule)");
    println!("  cancel           remove the daily schedule");
    println!("  status           show whether a run is in progress and the next trigger");
    println!("  quit             leave, after the current run finishes");
}

/// Reads commands from stdin until `quit`, end of input or Ctrl-C.
pub async fn run(
    target: Arc<dyn RunTarget>,
    sink: LogSink,
    at: Option<ScheduleEntry>,
) -> Result<()> {
    let scheduler = Scheduler::new(target, sink.clone());
    if let Some(entry) = at {
        scheduler.schedule_daily(entry.hour(), entry.minute())?;
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(ShellCommand::Run) => {
                scheduler.start_run();
            }
            Ok(ShellCommand::Schedule(time)) => match time.parse::<ScheduleEntry>() {
                Ok(entry) => {
                    scheduler.schedule_daily(entry.hour(), entry.minute())?;
                }
                Err(_) => sink.error(INVALID_TIME),
            },
            Ok(ShellCommand::Cancel) => {
                scheduler.cancel_schedule();
            }
            Ok(ShellCommand::Status) => sink.log(status_line(&scheduler)),
            Ok(ShellCommand::Help) => print_help(),
            Ok(ShellCommand::Quit) => break,
            Err(message) => sink.error(message),
        }
    }

    scheduler.shutdown();
    if scheduler.is_running() {
        sink.log("Waiting for the current run to finish...");
        while scheduler.is_running() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
    info!("Shell closed");
    Ok(())
}
