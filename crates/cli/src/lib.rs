use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

pub mod commands;

/// Serialization used for report files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }

    pub fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Json => {
                serde_json::to_string_pretty(value).context("Failed to serialize report as JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(value).context("Failed to serialize report as YAML")
            }
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Canonicalize the path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        return env::current_dir().context("Failed to get current directory");
    }
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(path))
        }
    }
}

/// `YYYYmmdd_HHMMSS` stamp shared by every report of one run.
pub fn report_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// `core_analysis_<stamp>_<core name>.<ext>`
pub fn analysis_report_name(stamp: &str, core_file: &str, format: OutputFormat) -> String {
    format!("core_analysis_{stamp}_{}.{}", core_name(core_file), format.extension())
}

/// Report names for every core of one batch, in order.
///
/// Cores that share a file name (`/data/seg0/core`, `/data/seg1/core`) get a
/// short digest of their full path appended, so no report replaces another.
pub fn analysis_report_names(
    stamp: &str,
    core_files: &[&str],
    format: OutputFormat,
) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for core_file in core_files {
        *seen.entry(core_name(core_file)).or_default() += 1;
    }
    core_files
        .iter()
        .map(|core_file| {
            let name = core_name(core_file);
            if seen.get(&name).copied().unwrap_or_default() < 2 {
                return analysis_report_name(stamp, core_file, format);
            }
            let digest = Sha256::digest(core_file.as_bytes());
            let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
            format!("core_analysis_{stamp}_{name}_{hex}.{}", format.extension())
        })
        .collect()
}

fn core_name(core_file: &str) -> String {
    Path::new(core_file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "core".to_string())
}

/// `core_comparison_<stamp>.<ext>`
pub fn comparison_report_name(stamp: &str, format: OutputFormat) -> String {
    format!("core_comparison_{stamp}.{}", format.extension())
}

/// Serialize `value` into `dir/name`, creating `dir` when needed.
pub fn write_report<T: Serialize>(
    dir: &Path,
    name: &str,
    value: &T,
    format: OutputFormat,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output dir: {}", dir.display()))?;
    let path = dir.join(name);
    fs::write(&path, format.render(value)?)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path)
}
