use std::path::Path;

use anyhow::{Context, Result};
use cbtoolbox_core::config::{BuiltinScript, ClassifierConfig, DebuggerConfig};
use cbtoolbox_core::services::debugger::{extract_script, find_executable, locate_debugger};

/// Write a built-in gdb command script to `output` for editing.
pub fn extract_script_command(script: BuiltinScript, output: &Path) -> Result<()> {
    extract_script(script, output)
        .with_context(|| format!("Failed to extract {} script", script.name()))?;
    println!("Wrote {} gdb commands to {}", script.name(), output.display());
    Ok(())
}

/// Verify that the external tools the analysis relies on can be found.
pub fn check_command(gdb: Option<String>) -> Result<()> {
    println!("cbtoolbox-core v{}", cbtoolbox_core::version());
    let program = gdb.unwrap_or_else(|| DebuggerConfig::default().program);
    let resolved = locate_debugger(&program).context("Prerequisite check failed")?;
    println!("- gdb: OK ({})", resolved.display());

    let file_tool = ClassifierConfig::default().program;
    match find_executable(&file_tool) {
        Some(path) => println!("- file: OK ({})", path.display()),
        None => println!("- file: MISSING ({file_tool}); core files cannot be classified"),
    }
    Ok(())
}
