//! CSV report over a finished run. This is the only place the raw keys
//! are written out.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::adapters::{Protocol, VerificationStatus};
use crate::queue::{RunState, TargetConfig};

pub const CSV_HEADER: &str = "Key,Status,Latency (ms),Model,Protocol,BaseURL,Error";

/// One parsed report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow {
    pub key: String,
    pub status: VerificationStatus,
    pub latency_ms: u64,
    pub model: String,
    pub protocol: Protocol,
    pub base_url: String,
    pub error: String,
}

fn escape_field(field: &str) -> String {
    if field.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Render the report: header plus one row per result, in input order.
pub fn to_csv(state: &RunState, target: &TargetConfig) -> String {
    let base_url = target
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or("Default");

    let mut out = String::from(CSV_HEADER);
    for r in &state.results {
        let fields = [
            r.credential.expose().to_string(),
            r.status.to_string(),
            r.latency_ms.to_string(),
            r.model.clone(),
            target.protocol.to_string(),
            base_url.to_string(),
            r.error.clone().unwrap_or_default(),
        ];
        out.push('\n');
        out.push_str(
            &fields
                .iter()
                .map(|f| escape_field(f))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    out
}

/// Split CSV text into records, honouring quoted fields.
fn split_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        bail!("Unterminated quoted field");
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

/// Parse a report produced by `to_csv`.
pub fn parse_csv(text: &str) -> Result<Vec<ExportRow>> {
    let mut records = split_records(text)?.into_iter();
    match records.next() {
        Some(header) if header.join(",") == CSV_HEADER => {}
        _ => bail!("Missing or unexpected CSV header"),
    }

    records
        .enumerate()
        .map(|(i, rec)| -> Result<ExportRow> {
            let line = i + 2;
            if rec.len() != 7 {
                bail!("Line {}: expected 7 fields, got {}", line, rec.len());
            }
            Ok(ExportRow {
                status: VerificationStatus::parse(&rec[1])
                    .with_context(|| format!("Line {}: bad status '{}'", line, rec[1]))?,
                latency_ms: rec[2]
                    .parse()
                    .with_context(|| format!("Line {}: bad latency '{}'", line, rec[2]))?,
                protocol: Protocol::parse(&rec[4])
                    .with_context(|| format!("Line {}: bad protocol '{}'", line, rec[4]))?,
                key: rec[0].clone(),
                model: rec[3].clone(),
                base_url: rec[5].clone(),
                error: rec[6].clone(),
            })
        })
        .collect()
}

/// Report file name for a target: whitespace runs become `_`.
pub fn report_file_name(target_name: &str) -> String {
    let stem = target_name.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{}_results.csv", stem)
}

pub fn write_report(path: &Path, state: &RunState, target: &TargetConfig) -> Result<()> {
    std::fs::write(path, to_csv(state, target))
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
