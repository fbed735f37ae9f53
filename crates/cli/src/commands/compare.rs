use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cbtoolbox_core::model::CrashRecord;
use cbtoolbox_core::services::compare::compare_cores;
use chrono::Local;
use serde::Deserialize;

use crate::{
    canonicalize_or_current, comparison_report_name, report_timestamp, write_report, OutputFormat,
};

/// A saved report holds either one record or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum SavedRecords {
    One(Box<CrashRecord>),
    Many(Vec<CrashRecord>),
}

/// Load crash records from a `.json`, `.yaml` or `.yml` report file.
pub fn load_records(path: &Path) -> Result<Vec<CrashRecord>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read report {}", path.display()))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    let saved: SavedRecords = match ext {
        "json" => serde_json::from_str(&body)
            .with_context(|| format!("Failed to parse report JSON {}", path.display()))?,
        "yaml" | "yml" => serde_yaml::from_str(&body)
            .with_context(|| format!("Failed to parse report YAML {}", path.display()))?,
        other => {
            return Err(anyhow!(
                "Unsupported report extension '{}' for {} (expected json, yaml or yml)",
                other,
                path.display()
            ))
        }
    };
    Ok(match saved {
        SavedRecords::One(record) => vec![*record],
        SavedRecords::Many(records) => records,
    })
}

/// Re-run the comparison over previously saved analysis reports.
pub fn compare_command(reports: &[PathBuf], format: OutputFormat, output_dir: &str) -> Result<()> {
    let mut records = Vec::new();
    for path in reports {
        records.extend(load_records(path)?);
    }
    if records.is_empty() {
        return Err(anyhow!("No crash records found in the given reports"));
    }

    let comparison = compare_cores(&records);
    let dir = canonicalize_or_current(output_dir)?;
    let name = comparison_report_name(&report_timestamp(Local::now()), format);
    let path = write_report(&dir, &name, &comparison, format)?;

    println!("Compared {} cores", comparison.total_cores);
    for (signal, count) in &comparison.common_signals {
        println!("  {signal}: {count}");
    }
    for pattern in &comparison.crash_patterns {
        println!(
            "  - {} {} x{}: {}",
            pattern.id,
            pattern.signal,
            pattern.occurrence_count,
            pattern.stack_signature.join(" <- ")
        );
    }
    println!("Comparison saved to: {}", path.display());
    Ok(())
}
