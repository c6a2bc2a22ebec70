use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    BatchResult, InfoResult, ItemOutcome, ProgressEvent, ProgressSink, StatusResult,
};
use crate::remote::RemoteObject;
use crate::store::{LocalArtifact, Preview};
use crate::sync::{Annotated, SyncStatus};
use crate::warehouse::{QueryResult, WarehouseTable};

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable output: one pretty JSON document on stdout per command.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable output: tables on stdout, progress on stderr.
pub struct TextOutput;

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!(
                "{CYAN}»{RESET} {} ({} ms)",
                event.message,
                elapsed.as_millis()
            ),
            None => eprintln!("{CYAN}»{RESET} {}", event.message),
        }
    }
}

impl TextOutput {
    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        let rows = result
            .rows
            .iter()
            .map(|row| {
                let (label, color) = match row.status() {
                    SyncStatus::Synchronized => ("synchronized", GREEN),
                    SyncStatus::Stale => ("stale", YELLOW),
                    SyncStatus::NotDownloaded => ("-", ""),
                };
                vec![
                    row.dataset_identifier.to_string(),
                    text(&row.title),
                    text(&row.modified_ods),
                    text(&row.modified_local),
                    count(row.number_of_records_ods),
                    count(row.number_of_records_local),
                    format!("{color}{label}{RESET}"),
                ]
            })
            .collect::<Vec<_>>();
        print_table(
            &[
                "dataset_identifier",
                "title",
                "modified_ods",
                "modified_local",
                "records_ods",
                "records_local",
                "status",
            ],
            &rows,
        )
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "{CYAN}{}{RESET} ({:?})",
            result.dataset_identifier, result.status
        )?;
        for (key, value) in &result.catalog {
            writeln!(stdout, "  {key}: {}", json_text(value))?;
        }
        if let Some(ledger) = &result.ledger {
            writeln!(stdout, "{CYAN}ledger{RESET}")?;
            for (key, value) in ledger {
                writeln!(stdout, "  {key}: {}", json_text(value))?;
            }
        }
        if let Some(path) = &result.artifact_path {
            writeln!(stdout, "{CYAN}artifact{RESET} {path}")?;
        }
        Ok(())
    }

    pub fn print_batch(operation: &str, result: &BatchResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        for item in &result.items {
            let (icon, color) = match item.outcome {
                ItemOutcome::Succeeded => ("ok", GREEN),
                ItemOutcome::Skipped => ("skip", YELLOW),
                ItemOutcome::Failed => ("fail", RED),
            };
            writeln!(
                stdout,
                "{color}{icon:>4}{RESET} {} {}",
                item.dataset_identifier, item.detail
            )?;
        }
        writeln!(
            stdout,
            "{CYAN}{operation}{RESET}: {GREEN}{} succeeded{RESET}, {YELLOW}{} skipped{RESET}, {RED}{} failed{RESET}",
            result.summary.succeeded, result.summary.skipped, result.summary.failed
        )
    }

    pub fn print_local(items: &[Annotated<LocalArtifact>]) -> io::Result<()> {
        let rows = items
            .iter()
            .map(|row| {
                vec![
                    row.item.file_name.clone(),
                    text(&row.title),
                    text(&row.modified),
                ]
            })
            .collect::<Vec<_>>();
        print_table(&["file", "title", "modified"], &rows)
    }

    pub fn print_remote(items: &[Annotated<RemoteObject>]) -> io::Result<()> {
        let rows = items
            .iter()
            .map(|row| vec![row.item.name.clone(), text(&row.title), text(&row.modified)])
            .collect::<Vec<_>>();
        print_table(&["object", "title", "modified"], &rows)
    }

    pub fn print_tables(items: &[Annotated<WarehouseTable>]) -> io::Result<()> {
        let rows = items
            .iter()
            .map(|row| {
                vec![
                    row.item.table_name.clone(),
                    text(&row.title),
                    text(&row.modified),
                ]
            })
            .collect::<Vec<_>>();
        print_table(&["table", "title", "modified"], &rows)
    }

    pub fn print_preview(preview: &Preview) -> io::Result<()> {
        let headers = preview
            .columns
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>();
        print_table(&headers, &preview.rows)?;
        println!(
            "{CYAN}{} of {} rows{RESET}",
            preview.rows.len(),
            preview.total_rows
        );
        Ok(())
    }

    pub fn print_query(result: &QueryResult) -> io::Result<()> {
        println!("{}", result.rendered);
        println!("{CYAN}{} rows{RESET}", result.row_count);
        Ok(())
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

fn count(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

// Widths ignore ANSI escapes, which only appear in the last status column.
fn print_table(headers: &[&str], rows: &[Vec<String>]) -> io::Result<()> {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let mut stdout = io::stdout();
    let header = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(stdout, "{CYAN}{}{RESET}", header.trim_end())?;
    for row in rows {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join("  ");
        writeln!(stdout, "{}", line.trim_end())?;
    }
    Ok(())
}
