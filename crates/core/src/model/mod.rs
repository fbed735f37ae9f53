//! Crash data model shared by every pipeline stage.
//!
//! Records are plain values: the parser creates them, the thread normalizer
//! mutates them once, and afterwards they are read-only inputs to the
//! comparison engine and whatever frontend persists them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Sentinel for textual fields the transcript did not provide.
pub const UNKNOWN: &str = "unknown";

/// Sentinel for address-like fields the transcript did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

/// How the identification tool described a validated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreFileKind {
    /// Output contained the explicit `core file` marker.
    CoreDump,
    /// Output only carried the generic ELF marker.
    ElfObject,
}

/// Metadata scraped from the `file` tool output for a validated core.
///
/// Every field is best-effort; a missing field is `None`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub kind: CoreFileKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_gid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gid: Option<u32>,
    /// Path of the executable that produced the core (`execfn: '...'`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execfn: Option<String>,
    /// Process title recorded by the kernel (`from '...'`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_from: Option<String>,
    /// Raw identification output, kept for operators.
    #[serde(default)]
    pub file_output: String,
}

impl FileInfo {
    /// An info block with no extracted fields.
    pub fn empty(kind: CoreFileKind) -> Self {
        Self {
            kind,
            platform: None,
            real_uid: None,
            effective_uid: None,
            real_gid: None,
            effective_gid: None,
            execfn: None,
            generated_from: None,
            file_output: String::new(),
        }
    }
}

/// Summary taken from the transcript header lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    /// Originating binary (first token of the generating command line).
    pub binary: String,
    /// Full command line the core was generated by.
    pub command_line: String,
    /// Raw signal text, e.g. `SIGSEGV (Segmentation fault)`.
    pub signal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_thread: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalInfo {
    pub name: String,
    pub description: String,
    pub fault_address: String,
    /// `si_code` from `$_siginfo`, when printed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl Default for SignalInfo {
    fn default() -> Self {
        Self {
            name: UNKNOWN.to_string(),
            description: UNKNOWN.to_string(),
            fault_address: NOT_AVAILABLE.to_string(),
            code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// One frame of a backtrace, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub index: u32,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    /// Shared object the frame was resolved from (`from /lib64/libc.so.6`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    /// Runtime-internal or signal-delivery frame; excluded from signatures.
    #[serde(default)]
    pub is_system: bool,
}

impl StackFrame {
    /// Build a frame with only a function name, classifying it as system or not.
    pub fn named(index: u32, function: impl Into<String>) -> Self {
        let function = function.into();
        let is_system = is_system_function(&function);
        Self { index, function, address: None, location: None, library: None, is_system }
    }
}

/// Semantic role of a thread, derived from its backtrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRole {
    Crashed,
    SignalHandling,
    Worker,
    Unknown,
}

impl ThreadRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadRole::Crashed => "crashed",
            ThreadRole::SignalHandling => "signal_handling",
            ThreadRole::Worker => "worker",
            ThreadRole::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lwp: Option<u32>,
    pub backtrace: Vec<StackFrame>,
    #[serde(default)]
    pub is_crashed: bool,
    pub role: ThreadRole,
    pub name: String,
    /// Ids of threads with an identical backtrace that were folded into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicate_ids: Vec<u32>,
}

impl ThreadRecord {
    /// A freshly parsed thread, before the normalizer assigns a role.
    pub fn new(id: u32, lwp: Option<u32>, backtrace: Vec<StackFrame>) -> Self {
        Self {
            id,
            lwp,
            backtrace,
            is_crashed: false,
            role: ThreadRole::Unknown,
            name: ThreadRole::Unknown.as_str().to_string(),
            duplicate_ids: Vec::new(),
        }
    }

    /// Ordered function names; the deduplication key.
    pub fn frame_names(&self) -> Vec<&str> {
        self.backtrace.iter().map(|f| f.function.as_str()).collect()
    }
}

/// Structured result of analyzing one core file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    pub core_file: String,
    /// RFC3339 capture time of the analysis.
    pub timestamp: String,
    pub file_info: FileInfo,
    pub basic_info: BasicInfo,
    pub signal_info: SignalInfo,
    pub threads: Vec<ThreadRecord>,
    /// Frames of the crashed (or primary) thread, used for signatures.
    pub stack_trace: Vec<StackFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl CrashRecord {
    pub fn crashed_thread(&self) -> Option<&ThreadRecord> {
        self.threads.iter().find(|t| t.is_crashed)
    }

    /// Human-readable header block printed ahead of detailed output.
    pub fn summary(&self) -> String {
        let thread = self
            .basic_info
            .current_thread
            .map(|id| id.to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let mut out = String::new();
        let _ = writeln!(out, "Core Dump Analysis Summary: {}", self.core_file);
        let _ = writeln!(out, "----------------------------------------");
        let _ = writeln!(out, "- Binary: {}", self.basic_info.binary);
        let _ = writeln!(out, "- Signal: {}", self.basic_info.signal);
        let _ = writeln!(out, "- Faulting Address: {}", self.signal_info.fault_address);
        let _ = writeln!(out, "- Thread ID: {thread}");
        let _ = writeln!(out, "- Process Args: {}", self.basic_info.command_line);
        let _ = writeln!(out, "- Threads: {}", self.threads.len());
        if let Some(crashed) = self.crashed_thread() {
            let _ = writeln!(out, "- Crashed Thread: {} ({})", crashed.id, crashed.name);
        }
        for frame in self.stack_trace.iter().filter(|f| !f.is_system).take(5) {
            let _ = writeln!(out, "    #{} {}", frame.index, frame.function);
        }
        out
    }
}

/// A cluster of records that share a crash signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashPattern {
    /// Stable short name derived from the signature.
    pub id: String,
    pub signal: String,
    pub stack_signature: Vec<String>,
    pub occurrence_count: usize,
    pub affected_core_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub first: String,
    pub last: String,
}

/// Aggregate view over a batch of crash records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoreComparison {
    pub total_cores: usize,
    pub common_signals: BTreeMap<String, usize>,
    pub common_functions: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    pub crash_patterns: Vec<CrashPattern>,
    /// Number of distinct signatures, singletons included.
    pub distinct_signatures: usize,
}

/// Runtime internals and signal-delivery frames that say nothing about the crash site.
const SYSTEM_FUNCTIONS: &[&str] = &[
    "<signal handler called>",
    "??",
    "raise",
    "abort",
    "__GI_raise",
    "__GI_abort",
    "__restore_rt",
    "__pthread_kill_implementation",
    "__pthread_kill_internal",
    "pthread_kill",
    "__libc_start_main",
    "__libc_start_call_main",
    "_start",
    "start_thread",
    "clone",
    "clone3",
    "__assert_fail",
    "__assert_fail_base",
];

/// Name fragments that mark the database's own fatal-signal handlers.
const SYSTEM_FUNCTION_FRAGMENTS: &[&str] = &["SigillSigsegvSigbus"];

/// Whether a frame function belongs to the runtime/signal-delivery set.
pub fn is_system_function(name: &str) -> bool {
    SYSTEM_FUNCTIONS.contains(&name)
        || SYSTEM_FUNCTION_FRAGMENTS.iter().any(|frag| name.contains(frag))
}
