use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use cbtoolbox_core::config::{load_config, AnalysisConfig, BuiltinScript, ScriptSource};
use cbtoolbox_core::services::analysis::{BatchReport, CoreAnalyzer};
use cbtoolbox_core::services::classifier::FileCommand;
use cbtoolbox_core::services::debugger::GdbDebugger;
use chrono::Local;
use tracing::warn;

use crate::{
    analysis_report_names, canonicalize_or_current, comparison_report_name, report_timestamp,
    write_report, OutputFormat,
};

/// Flags of `coreinfo`; `None` leaves the config file (or default) value alone.
#[derive(Debug, Clone)]
pub struct CoreinfoOptions {
    pub paths: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub binary: Option<PathBuf>,
    pub gdb_file: Option<PathBuf>,
    pub script: Option<BuiltinScript>,
    pub gdb: Option<String>,
    pub jobs: Option<usize>,
    pub timeout: Option<u64>,
    pub format: OutputFormat,
    pub output_dir: String,
    pub fail_on_error: bool,
    pub include_transcript: bool,
    pub no_compare: bool,
    pub summary: bool,
}

/// Fold command-line flags over the loaded configuration.
pub fn build_config(opts: &CoreinfoOptions) -> Result<AnalysisConfig> {
    let mut config = match &opts.config {
        Some(path) => load_config(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(binary) = &opts.binary {
        config.target_binary = Some(binary.clone());
    }
    if let Some(file) = &opts.gdb_file {
        config.debugger.script = ScriptSource::File(file.clone());
    } else if let Some(script) = opts.script {
        config.debugger.script = ScriptSource::Builtin(script);
    }
    if let Some(gdb) = &opts.gdb {
        config.debugger.program = gdb.clone();
    }
    if let Some(jobs) = opts.jobs {
        config.debugger.max_jobs = jobs;
    }
    if let Some(timeout) = opts.timeout {
        config.debugger.timeout_secs = Some(timeout);
    }
    if opts.fail_on_error {
        config.fail_on_file_error = true;
    }
    if opts.include_transcript {
        config.include_transcript = true;
    }
    Ok(config)
}

/// Analyze the given cores with gdb and write one report per core.
pub fn coreinfo_command(opts: &CoreinfoOptions) -> Result<()> {
    let config = build_config(opts)?;
    let identifier = FileCommand::new(&config.classifier.program);
    let debugger = GdbDebugger::from_config(&config.debugger);
    let analyzer = CoreAnalyzer { config: &config, identifier: &identifier, debugger: &debugger };

    let report = analyzer.run(&opts.paths).context("Core analysis failed")?;
    let output_dir = canonicalize_or_current(&opts.output_dir)?;
    emit_batch(&report, &output_dir, opts)?;

    if !report.is_success(config.fail_on_file_error) {
        return Err(anyhow!("{} core file(s) failed analysis", report.failures.len()));
    }
    Ok(())
}

fn emit_batch(report: &BatchReport, output_dir: &Path, opts: &CoreinfoOptions) -> Result<()> {
    let stamp = report_timestamp(Local::now());

    let core_files: Vec<&str> = report.records.iter().map(|r| r.core_file.as_str()).collect();
    let names = analysis_report_names(&stamp, &core_files, opts.format);
    for (record, name) in report.records.iter().zip(&names) {
        if opts.summary {
            println!("{}", record.summary());
        }
        let path = write_report(output_dir, name, record, opts.format)?;
        println!("Analysis saved to: {}", path.display());
    }

    for skipped in &report.skipped {
        println!("Skipped {}: {}", skipped.path, skipped.reason);
    }
    for failure in &report.failures {
        warn!(core_file = %failure.core_file, kind = %failure.kind, "{}", failure.message);
        println!("Failed {}: {}", failure.core_file, failure.message);
    }

    if opts.no_compare {
        return Ok(());
    }
    if let Some(comparison) = &report.comparison {
        let path = write_report(
            output_dir,
            &comparison_report_name(&stamp, opts.format),
            comparison,
            opts.format,
        )?;
        println!("Comparison saved to: {}", path.display());
        println!(
            "Compared {} cores: {} distinct signature(s), {} recurring pattern(s)",
            comparison.total_cores,
            comparison.distinct_signatures,
            comparison.crash_patterns.len()
        );
        for pattern in &comparison.crash_patterns {
            println!(
                "  - {} {} x{}: {}",
                pattern.id,
                pattern.signal,
                pattern.occurrence_count,
                pattern.stack_signature.join(" <- ")
            );
        }
    }
    Ok(())
}
