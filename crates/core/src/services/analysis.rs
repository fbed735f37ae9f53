use std::path::{Path, PathBuf};

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::model::{CoreComparison, CoreFileKind, CrashRecord, FileInfo};
use crate::services::classifier::{validate_core_files, FileIdentifier, SkippedPath};
use crate::services::compare::compare_cores;
use crate::services::debugger::Debugger;
use crate::services::threads::normalize_record;
use crate::services::transcript::build_crash_record;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no core files or directories provided")]
    NoCandidates,
    #[error("no valid core files provided")]
    NoValidCoreFiles,
    #[error("debugger unavailable: {0}")]
    DebuggerUnavailable(String),
    #[error("failed to run debugger on {file}: {status}: {stderr}")]
    DebuggerExecutionFailed { file: String, status: String, stderr: String },
    #[error("debugger timed out after {timeout_secs}s on {file}")]
    DebuggerTimeout { file: String, timeout_secs: u64 },
    #[error("failed to extract binary information from transcript of {file}")]
    MissingBinaryIdentity { file: String },
    #[error("failed to classify {path}: {reason}")]
    ClassifierFailed { path: String, reason: String },
    #[error("command script unavailable: {0}")]
    ScriptUnavailable(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AnalysisError {
    /// Stable snake_case label for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::NoCandidates => "no_candidates",
            AnalysisError::NoValidCoreFiles => "no_valid_core_files",
            AnalysisError::DebuggerUnavailable(_) => "debugger_unavailable",
            AnalysisError::DebuggerExecutionFailed { .. } => "debugger_execution_failed",
            AnalysisError::DebuggerTimeout { .. } => "debugger_timeout",
            AnalysisError::MissingBinaryIdentity { .. } => "missing_binary_identity",
            AnalysisError::ClassifierFailed { .. } => "classifier_failed",
            AnalysisError::ScriptUnavailable(_) => "script_unavailable",
            AnalysisError::Io(_) => "io",
            AnalysisError::Config(_) => "config",
        }
    }

    /// Failures scoped to a single core file; the batch carries on past them.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            AnalysisError::DebuggerExecutionFailed { .. }
                | AnalysisError::DebuggerTimeout { .. }
                | AnalysisError::MissingBinaryIdentity { .. }
        )
    }
}

/// A core file that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub core_file: String,
    pub kind: String,
    pub message: String,
}

impl FileFailure {
    fn new(core_file: &Path, err: &AnalysisError) -> Self {
        Self {
            core_file: core_file.display().to_string(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Everything a batch run produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub records: Vec<CrashRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<CoreComparison>,
}

impl BatchReport {
    pub fn is_success(&self, fail_on_file_error: bool) -> bool {
        !(fail_on_file_error && !self.failures.is_empty())
    }
}

/// Turn one transcript into a normalized record.
pub fn analyze_transcript(
    core_file: &Path,
    transcript: &str,
    file_info: FileInfo,
    keep_transcript: bool,
) -> Result<CrashRecord, AnalysisError> {
    let core = core_file.display().to_string();
    let mut record = build_crash_record(&core, transcript, file_info, Utc::now(), keep_transcript)?;
    normalize_record(&mut record);
    Ok(record)
}

/// Coordinator running classification, the debugger, parsing and comparison.
pub struct CoreAnalyzer<'a> {
    pub config: &'a AnalysisConfig,
    pub identifier: &'a dyn FileIdentifier,
    pub debugger: &'a dyn Debugger,
}

impl<'a> CoreAnalyzer<'a> {
    /// Analyze every core found under `paths`.
    ///
    /// Global precondition failures are returned as `Err` before any debugger
    /// run. Per-file failures land in [`BatchReport::failures`].
    pub fn run(&self, paths: &[PathBuf]) -> Result<BatchReport, AnalysisError> {
        if paths.is_empty() {
            return Err(AnalysisError::NoCandidates);
        }
        self.debugger.ensure_available()?;
        let validated = validate_core_files(paths, self.identifier, &self.config.classifier)?;
        info!(
            cores = validated.paths.len(),
            skipped = validated.skipped.len(),
            debugger = self.debugger.name(),
            "validated core files"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.debugger.max_jobs.max(1).min(validated.paths.len()))
            .build()
            .map_err(|e| AnalysisError::Io(format!("failed to build worker pool: {e}")))?;

        let outcomes: Vec<Result<CrashRecord, FileFailure>> = pool.install(|| {
            validated
                .paths
                .par_iter()
                .map(|core| {
                    let info = validated
                        .file_info
                        .get(core)
                        .cloned()
                        .unwrap_or_else(|| FileInfo::empty(CoreFileKind::CoreDump));
                    self.analyze_one(core, info).map_err(|err| {
                        warn!(core_file = %core.display(), error = %err, "core analysis failed");
                        FileFailure::new(core, &err)
                    })
                })
                .collect()
        });

        let mut report = BatchReport { skipped: validated.skipped, ..Default::default() };
        for outcome in outcomes {
            match outcome {
                Ok(record) => report.records.push(record),
                Err(failure) => report.failures.push(failure),
            }
        }
        if report.records.len() > 1 {
            report.comparison = Some(compare_cores(&report.records));
        }
        info!(
            records = report.records.len(),
            failures = report.failures.len(),
            "core analysis finished"
        );
        Ok(report)
    }

    fn analyze_one(&self, core: &Path, info: FileInfo) -> Result<CrashRecord, AnalysisError> {
        let binary = self.config.resolve_target_binary(Some(&info));
        let transcript = self.debugger.transcript(core, &binary)?;
        analyze_transcript(core, &transcript, info, self.config.include_transcript)
    }
}
