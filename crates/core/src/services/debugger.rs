//! gdb driver.
//!
//! Runs the debugger non-interactively against a binary and a core file with
//! a command script, and hands back everything it printed.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::{BuiltinScript, DebuggerConfig, ScriptSource};
use crate::services::analysis::AnalysisError;

const BASIC_SCRIPT: &str = include_str!("../../resources/gdb_commands_basic.txt");
const DETAILED_SCRIPT: &str = include_str!("../../resources/gdb_commands_detailed.txt");

/// Interval between exit checks while a deadline is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Text of a built-in command script.
pub fn builtin_script_text(script: BuiltinScript) -> &'static str {
    match script {
        BuiltinScript::Basic => BASIC_SCRIPT,
        BuiltinScript::Detailed => DETAILED_SCRIPT,
    }
}

/// Write a built-in script to `dest` so operators can tweak and reuse it.
pub fn extract_script(script: BuiltinScript, dest: &Path) -> Result<(), AnalysisError> {
    fs::write(dest, builtin_script_text(script)).map_err(|e| {
        AnalysisError::Io(format!(
            "failed to write {} script to {}: {e}",
            script.name(),
            dest.display()
        ))
    })
}

/// A command script on disk for the lifetime of this value.
///
/// Built-in scripts are backed by a temp file that is removed on drop.
#[derive(Debug)]
pub struct ScriptFile {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

impl ScriptFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Put the selected script somewhere the debugger can read it.
pub fn materialize_script(source: &ScriptSource) -> Result<ScriptFile, AnalysisError> {
    match source {
        ScriptSource::File(path) => {
            if !path.is_file() {
                return Err(AnalysisError::ScriptUnavailable(format!(
                    "command script not found at {}",
                    path.display()
                )));
            }
            Ok(ScriptFile { path: path.clone(), _temp: None })
        }
        ScriptSource::Builtin(script) => {
            let mut temp = tempfile::Builder::new()
                .prefix(&format!("gdb_commands_{}_", script.name()))
                .suffix(".txt")
                .tempfile()
                .map_err(|e| {
                    AnalysisError::ScriptUnavailable(format!(
                        "failed to create temp file for gdb commands: {e}"
                    ))
                })?;
            temp.write_all(builtin_script_text(*script).as_bytes())
                .and_then(|_| temp.flush())
                .map_err(|e| {
                    AnalysisError::ScriptUnavailable(format!(
                        "failed to write gdb commands to temp file: {e}"
                    ))
                })?;
            let path = temp.path().to_path_buf();
            Ok(ScriptFile { path, _temp: Some(temp) })
        }
    }
}

/// Resolve a debugger executable, searching `PATH` for bare names.
pub fn locate_debugger(program: &str) -> Result<PathBuf, AnalysisError> {
    find_executable(program).ok_or_else(|| {
        AnalysisError::DebuggerUnavailable(format!(
            "{program} is not installed or not available in PATH"
        ))
    })
}

/// Paths with a directory part must exist as given; bare names are looked up on `PATH`.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).map(|dir| dir.join(program)).find(|path| path.is_file())
    })
}

/// A debugger that can turn a core file into a transcript.
pub trait Debugger: Send + Sync {
    /// Checked once per batch, before any core is touched.
    fn ensure_available(&self) -> Result<(), AnalysisError>;

    /// Run the debugger for one core and return its combined output.
    fn transcript(&self, core_file: &Path, binary: &Path) -> Result<String, AnalysisError>;

    fn name(&self) -> &'static str;
}

/// gdb invoked as `gdb --quiet -x <script> <binary> <core>`.
pub struct GdbDebugger {
    pub program: PathBuf,
    pub script: ScriptSource,
    pub timeout: Option<Duration>,
}

impl GdbDebugger {
    pub fn from_config(config: &DebuggerConfig) -> Self {
        Self {
            program: PathBuf::from(&config.program),
            script: config.script.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Debugger for GdbDebugger {
    fn ensure_available(&self) -> Result<(), AnalysisError> {
        let resolved = locate_debugger(&self.program.to_string_lossy())?;
        debug!(debugger = %resolved.display(), "debugger located");
        if let ScriptSource::File(path) = &self.script {
            if !path.is_file() {
                return Err(AnalysisError::ScriptUnavailable(format!(
                    "command script not found at {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn transcript(&self, core_file: &Path, binary: &Path) -> Result<String, AnalysisError> {
        let script = materialize_script(&self.script)?;
        debug!(
            core_file = %core_file.display(),
            script = %script.path().display(),
            binary = %binary.display(),
            "running gdb"
        );

        let mut cmd = Command::new(&self.program);
        cmd.arg("--quiet")
            .arg("-x")
            .arg(script.path())
            .arg(binary)
            .arg(core_file)
            .stdin(Stdio::null());

        let file = core_file.display().to_string();
        let output = match self.timeout {
            Some(limit) => run_with_deadline(cmd, limit, &file)?,
            None => cmd.output().map_err(|e| AnalysisError::DebuggerExecutionFailed {
                file: file.clone(),
                status: "spawn failed".into(),
                stderr: e.to_string(),
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(core_file = %file, status = %output.status, "gdb exited unsuccessfully");
            return Err(AnalysisError::DebuggerExecutionFailed {
                file,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(combine_output(&output))
    }

    fn name(&self) -> &'static str {
        "gdb"
    }
}

/// Stdout followed by stderr, as one blob.
fn combine_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

/// Spawn `cmd` and wait at most `limit`; the child is killed on expiry.
fn run_with_deadline(mut cmd: Command, limit: Duration, file: &str) -> Result<Output, AnalysisError> {
    let spawn_err = |e: std::io::Error| AnalysisError::DebuggerExecutionFailed {
        file: file.to_string(),
        status: "spawn failed".into(),
        stderr: e.to_string(),
    };
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn().map_err(spawn_err)?;

    // Drain both pipes concurrently so a chatty child never blocks on a full pipe.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + limit;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill(&mut child, file);
                return Err(AnalysisError::DebuggerTimeout {
                    file: file.to_string(),
                    timeout_secs: limit.as_secs(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill(&mut child, file);
                return Err(AnalysisError::DebuggerExecutionFailed {
                    file: file.to_string(),
                    status: "wait failed".into(),
                    stderr: e.to_string(),
                });
            }
        }
    };

    Ok(Output { status, stdout: join_reader(stdout), stderr: join_reader(stderr) })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill(child: &mut Child, file: &str) {
    if let Err(e) = child.kill() {
        warn!(core_file = %file, error = %e, "failed to kill debugger");
    }
    let _ = child.wait();
}
