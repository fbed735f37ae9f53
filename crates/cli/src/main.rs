use std::path::PathBuf;

use anyhow::Result;
use cbtoolbox::commands::{
    check_command, compare_command, coreinfo_command, extract_script_command, CoreinfoOptions,
};
use cbtoolbox::{init_logging, OutputFormat};
use cbtoolbox_core::config::BuiltinScript;
use clap::{Parser, Subcommand, ValueEnum};

/// Diagnostic toolbox for database installations.
///
/// This CLI is a thin wrapper around `cbtoolbox-core` (exposed in code as
/// `cbtoolbox_core`). All substantive logic lives in the library so it can be
/// tested without gdb installed and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "cbtoolbox",
    version,
    about = "Postmortem crash analysis for database core dumps",
    long_about = None
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScriptArg {
    Basic,
    Detailed,
}

impl From<ScriptArg> for BuiltinScript {
    fn from(arg: ScriptArg) -> Self {
        match arg {
            ScriptArg::Basic => BuiltinScript::Basic,
            ScriptArg::Detailed => BuiltinScript::Detailed,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze core files with gdb and write one report per core.
    ///
    /// Directories contribute every core file directly inside them. When more
    /// than one core is analyzed, a comparison report is written as well.
    Coreinfo {
        /// Core files and/or directories containing core files.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Server binary to load with each core. Defaults to the core's execfn,
        /// then $GPHOME/bin/postgres.
        #[arg(long)]
        binary: Option<PathBuf>,

        /// Custom gdb command file.
        #[arg(long, conflicts_with = "script")]
        gdb_file: Option<PathBuf>,

        /// Built-in gdb command script.
        #[arg(long, value_enum)]
        script: Option<ScriptArg>,

        /// gdb executable to run.
        #[arg(long)]
        gdb: Option<String>,

        /// Report serialization.
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Directory that receives report files.
        #[arg(long, default_value = ".")]
        output_dir: String,

        /// Maximum number of concurrent gdb processes.
        #[arg(long)]
        jobs: Option<usize>,

        /// Kill a gdb run after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// JSON or YAML analysis configuration.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Exit non-zero if any single core fails to analyze.
        #[arg(long, default_value_t = false)]
        fail_on_error: bool,

        /// Keep the full gdb transcript in each report.
        #[arg(long, default_value_t = false)]
        include_transcript: bool,

        /// Do not write a comparison report.
        #[arg(long, default_value_t = false)]
        no_compare: bool,

        /// Print a short summary of each core to stdout.
        #[arg(long, default_value_t = false)]
        summary: bool,
    },

    /// Compare previously saved analysis reports.
    Compare {
        /// Report files (JSON or YAML) holding one record or a list of records.
        #[arg(required = true)]
        reports: Vec<PathBuf>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        #[arg(long, default_value = ".")]
        output_dir: String,
    },

    /// Write a built-in gdb command script to a file.
    ExtractScript {
        #[arg(value_enum)]
        script: ScriptArg,

        /// Destination path.
        #[arg(long)]
        output: PathBuf,
    },

    /// Check that gdb and file are available.
    Check {
        /// gdb executable to look for.
        #[arg(long)]
        gdb: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Coreinfo {
            paths,
            binary,
            gdb_file,
            script,
            gdb,
            format,
            output_dir,
            jobs,
            timeout,
            config,
            fail_on_error,
            include_transcript,
            no_compare,
            summary,
        } => coreinfo_command(&CoreinfoOptions {
            paths,
            config,
            binary,
            gdb_file,
            script: script.map(Into::into),
            gdb,
            jobs,
            timeout,
            format,
            output_dir,
            fail_on_error,
            include_transcript,
            no_compare,
            summary,
        })?,
        Command::Compare { reports, format, output_dir } => {
            compare_command(&reports, format, &output_dir)?
        }
        Command::ExtractScript { script, output } => {
            extract_script_command(script.into(), &output)?
        }
        Command::Check { gdb } => check_command(gdb)?,
    }

    Ok(())
}
