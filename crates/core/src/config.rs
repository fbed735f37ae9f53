//! Analysis configuration.
//!
//! Every pipeline stage takes an explicit [`AnalysisConfig`] (or the relevant
//! sub-section) instead of reading process-wide state. Frontends build one from
//! defaults, an optional JSON/YAML file, and their own flags.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::FileInfo;
use crate::services::analysis::AnalysisError;

/// Install prefix used when neither the config nor `GPHOME` names the binary.
pub const DEFAULT_INSTALL_DIR: &str = "/usr/local/cloudberry-db";

/// Server executable analyzed against each core, relative to the install dir.
pub const DEFAULT_SERVER_BINARY: &str = "bin/postgres";

/// Built-in gdb command scripts shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinScript {
    Basic,
    Detailed,
}

impl BuiltinScript {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinScript::Basic => "basic",
            BuiltinScript::Detailed => "detailed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "basic" => Some(BuiltinScript::Basic),
            "detailed" => Some(BuiltinScript::Detailed),
            _ => None,
        }
    }
}

/// Where the debugger command script comes from.
///
/// In config files this is either a built-in name (`basic`, `detailed`) or a
/// path to a command file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptSource {
    Builtin(BuiltinScript),
    File(PathBuf),
}

impl Default for ScriptSource {
    fn default() -> Self {
        ScriptSource::Builtin(BuiltinScript::Basic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Debugger executable; bare names are looked up on `PATH`.
    pub program: String,
    pub script: ScriptSource,
    /// Kill a debugger run after this many seconds.
    pub timeout_secs: Option<u64>,
    /// Upper bound on simultaneous debugger subprocesses.
    pub max_jobs: usize,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            program: env::var("CBT_GDB").unwrap_or_else(|_| "gdb".to_string()),
            script: ScriptSource::default(),
            timeout_secs: None,
            max_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// File identification tool.
    pub program: String,
    /// Accept paths the tool only reports as generic ELF objects.
    pub accept_generic_elf: bool,
    /// Treat a failure to run the identification tool as fatal for the batch.
    pub strict: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            program: env::var("CBT_FILE").unwrap_or_else(|_| "file".to_string()),
            accept_generic_elf: true,
            strict: false,
        }
    }
}

/// Top-level configuration threaded through the analysis pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Binary to load alongside every core. Resolved per core when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_binary: Option<PathBuf>,
    pub debugger: DebuggerConfig,
    pub classifier: ClassifierConfig,
    /// Keep the full debugger transcript on each record.
    pub include_transcript: bool,
    /// Treat any per-file failure as a failed batch.
    pub fail_on_file_error: bool,
}

impl AnalysisConfig {
    /// Binary to hand to the debugger for a given core.
    ///
    /// Precedence: configured `target_binary`, then the core's `execfn`, then
    /// `$GPHOME/bin/postgres`, then the default install prefix.
    pub fn resolve_target_binary(&self, file_info: Option<&FileInfo>) -> PathBuf {
        if let Some(explicit) = &self.target_binary {
            return explicit.clone();
        }
        if let Some(execfn) = file_info.and_then(|info| info.execfn.as_deref()) {
            if !execfn.is_empty() {
                return PathBuf::from(execfn);
            }
        }
        default_target_binary(env::var_os("GPHOME").map(PathBuf::from).as_deref())
    }
}

/// Server binary under `gphome`, or under the default install prefix.
pub fn default_target_binary(gphome: Option<&Path>) -> PathBuf {
    match gphome {
        Some(home) if !home.as_os_str().is_empty() => home.join(DEFAULT_SERVER_BINARY),
        _ => Path::new(DEFAULT_INSTALL_DIR).join(DEFAULT_SERVER_BINARY),
    }
}

/// Load an [`AnalysisConfig`] from a `.json`, `.yaml` or `.yml` file.
pub fn load_config(path: &Path) -> Result<AnalysisConfig, AnalysisError> {
    let body = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::Config(format!("failed to read config {}: {e}", path.display()))
    })?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        "json" => serde_json::from_str(&body).map_err(|e| {
            AnalysisError::Config(format!("failed to parse config JSON {}: {e}", path.display()))
        }),
        "yaml" | "yml" => serde_yaml::from_str(&body).map_err(|e| {
            AnalysisError::Config(format!("failed to parse config YAML {}: {e}", path.display()))
        }),
        other => Err(AnalysisError::Config(format!(
            "unsupported config extension '{other}' for {} (expected json, yaml or yml)",
            path.display()
        ))),
    }
}
