//! Core-file classification.
//!
//! Candidate paths are run through a file identification tool (`file` by
//! default) and kept when its output carries a core-dump marker. The same
//! output is mined for a best-effort [`FileInfo`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ClassifierConfig;
use crate::model::{CoreFileKind, FileInfo};
use crate::services::analysis::AnalysisError;

static PLATFORM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"platform: '([^']*)'").unwrap_or_else(|_| unreachable!()));
static REAL_UID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"real uid: (\d+)").unwrap_or_else(|_| unreachable!()));
static EFFECTIVE_UID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"effective uid: (\d+)").unwrap_or_else(|_| unreachable!()));
static REAL_GID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"real gid: (\d+)").unwrap_or_else(|_| unreachable!()));
static EFFECTIVE_GID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"effective gid: (\d+)").unwrap_or_else(|_| unreachable!()));
static EXECFN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"execfn: '([^']*)'").unwrap_or_else(|_| unreachable!()));
static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"from '([^']*)'").unwrap_or_else(|_| unreachable!()));

/// Something that can describe a file the way `file(1)` does.
pub trait FileIdentifier: Send + Sync {
    fn identify(&self, path: &Path) -> Result<String, String>;
}

/// Runs the configured identification tool in brief mode, `file -b <path>`.
pub struct FileCommand {
    pub program: PathBuf,
}

impl FileCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }
}

impl FileIdentifier for FileCommand {
    fn identify(&self, path: &Path) -> Result<String, String> {
        let output = Command::new(&self.program)
            .arg("-b")
            .arg(path)
            .output()
            .map_err(|e| format!("failed to spawn {}: {e}", self.program.display()))?;
        if !output.status.success() {
            return Err(format!("{} exited with {}", self.program.display(), output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// A path that was dropped during validation, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

/// Outcome of validating a batch of candidate paths.
#[derive(Debug, Clone, Default)]
pub struct ValidatedCores {
    /// Valid core files, in argument order (directory entries sorted by name).
    pub paths: Vec<PathBuf>,
    pub file_info: BTreeMap<PathBuf, FileInfo>,
    pub skipped: Vec<SkippedPath>,
}

impl ValidatedCores {
    fn accept(&mut self, path: PathBuf, info: FileInfo) {
        if self.file_info.contains_key(&path) {
            return;
        }
        self.file_info.insert(path.clone(), info);
        self.paths.push(path);
    }

    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        self.skipped.push(SkippedPath { path: path.display().to_string(), reason: reason.into() });
    }
}

/// Decide from identification output whether `path` is debuggable.
///
/// Only the description is inspected; a leading `<path>: ` echoed by the tool
/// is dropped first. Returns the extracted [`FileInfo`] for valid cores,
/// `None` otherwise.
pub fn classify_output(path: &Path, output: &str, config: &ClassifierConfig) -> Option<FileInfo> {
    let description = file_description(path, output);
    let kind = if description.contains("core file") {
        CoreFileKind::CoreDump
    } else if config.accept_generic_elf && description.contains("ELF") {
        CoreFileKind::ElfObject
    } else {
        return None;
    };
    Some(extract_file_info(description, kind))
}

/// `output` without the `<path>: ` prefix that `file` prints outside brief mode.
pub fn file_description<'a>(path: &Path, output: &'a str) -> &'a str {
    let shown = path.display().to_string();
    output
        .strip_prefix(shown.as_str())
        .and_then(|rest| rest.strip_prefix(':'))
        .map_or(output, str::trim_start)
}

/// Pull the labeled fields out of identification output; absent fields stay `None`.
pub fn extract_file_info(output: &str, kind: CoreFileKind) -> FileInfo {
    FileInfo {
        kind,
        platform: capture_text(&PLATFORM_RE, output),
        real_uid: capture_id(&REAL_UID_RE, output),
        effective_uid: capture_id(&EFFECTIVE_UID_RE, output),
        real_gid: capture_id(&REAL_GID_RE, output),
        effective_gid: capture_id(&EFFECTIVE_GID_RE, output),
        execfn: capture_text(&EXECFN_RE, output),
        generated_from: capture_text(&FROM_RE, output),
        file_output: output.trim_end().to_string(),
    }
}

fn capture_text(re: &Regex, output: &str) -> Option<String> {
    re.captures(output).map(|c| c[1].to_string())
}

fn capture_id(re: &Regex, output: &str) -> Option<u32> {
    re.captures(output).and_then(|c| c[1].parse().ok())
}

/// Classify a single regular file.
///
/// `Ok(None)` means the tool ran and the file is not a core.
pub fn classify_file(
    path: &Path,
    identifier: &dyn FileIdentifier,
    config: &ClassifierConfig,
) -> Result<Option<FileInfo>, AnalysisError> {
    let output = identifier.identify(path).map_err(|reason| AnalysisError::ClassifierFailed {
        path: path.display().to_string(),
        reason,
    })?;
    Ok(classify_output(path, &output, config))
}

/// Validate the given arguments (files and directories) into a core-file set.
pub fn validate_core_files(
    args: &[PathBuf],
    identifier: &dyn FileIdentifier,
    config: &ClassifierConfig,
) -> Result<ValidatedCores, AnalysisError> {
    if args.is_empty() {
        return Err(AnalysisError::NoCandidates);
    }

    let mut validated = ValidatedCores::default();
    for arg in args {
        let meta = match fs::metadata(arg) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %arg.display(), error = %e, "skipping inaccessible path");
                validated.skip(arg, format!("cannot access path: {e}"));
                continue;
            }
        };

        if meta.is_dir() {
            let entries = match directory_entries(arg, &mut validated) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %arg.display(), error = %e, "skipping unreadable directory");
                    validated.skip(arg, format!("cannot read directory: {e}"));
                    continue;
                }
            };
            for entry in entries {
                classify_into(&entry, identifier, config, &mut validated)?;
            }
        } else {
            classify_into(arg, identifier, config, &mut validated)?;
        }
    }

    if validated.paths.is_empty() {
        return Err(AnalysisError::NoValidCoreFiles);
    }
    Ok(validated)
}

/// Immediate regular-file entries of `dir`, sorted by path.
///
/// Entries that cannot be read are recorded as skipped.
fn directory_entries(dir: &Path, validated: &mut ValidatedCores) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                if path.is_file() {
                    entries.push(path);
                }
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping unreadable directory entry");
                validated.skip(dir, format!("cannot read directory entry: {e}"));
            }
        }
    }
    entries.sort();
    Ok(entries)
}

fn classify_into(
    path: &Path,
    identifier: &dyn FileIdentifier,
    config: &ClassifierConfig,
    validated: &mut ValidatedCores,
) -> Result<(), AnalysisError> {
    match classify_file(path, identifier, config) {
        Ok(Some(info)) => {
            debug!(path = %path.display(), kind = ?info.kind, "accepted core file");
            validated.accept(path.to_path_buf(), info);
        }
        Ok(None) => {
            debug!(path = %path.display(), "not a core file");
            validated.skip(path, "not a core file");
        }
        Err(err) if config.strict => return Err(err),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "file classification failed; skipping");
            validated.skip(path, err.to_string());
        }
    }
    Ok(())
}
