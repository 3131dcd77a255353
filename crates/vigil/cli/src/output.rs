//! Output formatting utilities

use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};

use vigil_pipeline::{BatchEntry, BatchSummary, BatchTotals, EntryStatus, RunOutcome};

use crate::error::CliResult;

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// One line of the `run` metrics table.
#[derive(Debug, Serialize, Tabled)]
pub struct RuleRow {
    #[tabled(rename = "Rule")]
    pub rule: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Stage")]
    pub stage: String,
    #[tabled(rename = "Precision")]
    pub precision: String,
    #[tabled(rename = "Recall")]
    pub recall: String,
    #[tabled(rename = "F1")]
    pub f1: String,
    #[tabled(rename = "Attempts")]
    pub attempts: usize,
    #[tabled(rename = "Detail")]
    pub detail: String,
}

impl From<&BatchEntry> for RuleRow {
    fn from(entry: &BatchEntry) -> Self {
        let metrics = entry.report.as_ref().and_then(|r| r.metrics());
        let fmt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into());

        let (stage, detail) = match entry.report.as_ref().map(|r| &r.outcome) {
            Some(RunOutcome::Rejected { stage, reason, .. }) => (stage.to_string(), reason.to_string()),
            Some(RunOutcome::Approved) => ("-".to_string(), String::new()),
            None => ("-".to_string(), String::new()),
        };
        let detail = entry.error.clone().unwrap_or(detail);

        Self {
            rule: entry.rule_id.to_string(),
            status: status_label(entry.status).to_string(),
            stage,
            precision: fmt(metrics.map(|m| m.precision)),
            recall: fmt(metrics.map(|m| m.recall)),
            f1: fmt(metrics.map(|m| m.f1)),
            attempts: entry.report.as_ref().map_or(0, |r| r.attempts.len()),
            detail,
        }
    }
}

/// One line of the `check` table.
#[derive(Debug, Serialize, Tabled)]
pub struct CheckRow {
    #[tabled(rename = "Rule")]
    pub rule: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Fields")]
    pub fields: usize,
    #[tabled(rename = "Issues")]
    pub issues: usize,
}

fn status_label(status: EntryStatus) -> &'static str {
    match status {
        EntryStatus::Approved => "approved",
        EntryStatus::Rejected => "rejected",
        EntryStatus::Faulted => "faulted",
    }
}

pub fn print_rows<T: Serialize + Tabled>(rows: Vec<T>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No rules".dimmed());
            } else {
                println!("{}", Table::new(rows));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&rows)?),
    }
    Ok(())
}

pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Yaml => print!("{}", serde_yaml::to_string(data)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    totals: BatchTotals,
    entries: &'a [BatchEntry],
}

/// Table plus totals for table output; totals and every report otherwise.
pub fn print_summary(summary: &BatchSummary, format: OutputFormat) -> CliResult<()> {
    let totals = summary.totals();
    if let OutputFormat::Table = format {
        let rows: Vec<RuleRow> = summary.entries.iter().map(RuleRow::from).collect();
        print_rows(rows, format)?;
        if totals.measured > 0 {
            println!(
                "{} {}  mean precision {:.2}  recall {:.2}  f1 {:.2}",
                "Totals".bold(),
                totals.matrix,
                totals.mean_precision,
                totals.mean_recall,
                totals.mean_f1
            );
        }
        let tally = format!(
            "{} approved, {} rejected, {} faulted",
            totals.approved, totals.rejected, totals.faulted
        );
        match summary.exit_code() {
            0 => print_success(&tally),
            1 => print_warning(&tally),
            _ => print_error(&tally),
        }
        Ok(())
    } else {
        let document = SummaryDocument {
            totals,
            entries: &summary.entries,
        };
        print_single(&document, format)
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}
