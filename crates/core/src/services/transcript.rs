//! gdb transcript parsing.
//!
//! A transcript is the output of a fixed command script, so it is read as a
//! line-indexed view and mined by small independent extractors. Each extractor
//! returns `Option` and tolerates the others being absent; only the
//! "Core was generated by" line is mandatory.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{
    is_system_function, BasicInfo, CrashRecord, FileInfo, SignalInfo, SourceLocation, StackFrame,
    ThreadRecord, NOT_AVAILABLE, UNKNOWN,
};
use crate::services::analysis::AnalysisError;

static ORIGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Core was generated by [`'](.*)'\.?\s*$").unwrap_or_else(|_| unreachable!())
});
static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Program terminated with signal (\w+), (.+?)\.?\s*$")
        .unwrap_or_else(|_| unreachable!())
});
static FAULT_ADDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"si_addr = ([^,}\s]+)").unwrap_or_else(|_| unreachable!()));
static SIGNAL_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"si_code = (-?\d+)").unwrap_or_else(|_| unreachable!()));
static CURRENT_THREAD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Current thread is (\d+)").unwrap_or_else(|_| unreachable!()));
static THREAD_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Thread\s+(\d+)\s+\((.*)\)\s*:?\s*$").unwrap_or_else(|_| unreachable!())
});
static LWP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"LWP\s+(\d+)").unwrap_or_else(|_| unreachable!()));
static FRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(\d+)\s+(.*?)\s*$").unwrap_or_else(|_| unreachable!()));
static FRAME_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0x[0-9a-fA-F]+)\s+in\s+(.*)$").unwrap_or_else(|_| unreachable!())
});
static FRAME_AT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+at\s+(\S+):(\d+)$").unwrap_or_else(|_| unreachable!()));
static FRAME_FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+from\s+(\S+)$").unwrap_or_else(|_| unreachable!()));
static VALUE_HISTORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\d+ = ").unwrap_or_else(|_| unreachable!()));

/// Transcript lines with wrapped frame lines re-joined.
#[derive(Debug, Clone)]
pub struct TranscriptLines {
    lines: Vec<String>,
}

impl TranscriptLines {
    pub fn new(text: &str) -> Self {
        let mut lines: Vec<String> = Vec::new();
        for raw in text.lines() {
            let raw = raw.trim_end();
            if let Some(last) = lines.last_mut() {
                let continues = last.starts_with('#')
                    && paren_depth(last) > 0
                    && raw.starts_with(char::is_whitespace);
                if continues {
                    last.push(' ');
                    last.push_str(raw.trim_start());
                    continue;
                }
            }
            lines.push(raw.to_string());
        }
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// First value produced by `f` over the lines, in order.
    pub fn find_map<T>(&self, f: impl FnMut(&str) -> Option<T>) -> Option<T> {
        self.iter().find_map(f)
    }
}

fn paren_depth(line: &str) -> i32 {
    unquoted_parens(line).into_iter().fold(0, |depth, (_, c)| match c {
        '(' => depth + 1,
        _ => depth - 1,
    })
}

/// Byte offsets of the parentheses in `text` that sit outside quoted string
/// and char literals. gdb truncates long strings, so literals may hold
/// unbalanced parentheses.
fn unquoted_parens(text: &str) -> Vec<(usize, char)> {
    let mut parens = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '(' | ')' => parens.push((idx, c)),
                _ => {}
            },
        }
    }
    parens
}

/// Everything the parser could recover from one transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTranscript {
    pub basic_info: BasicInfo,
    pub signal_info: SignalInfo,
    /// Threads in transcript order, not yet deduplicated.
    pub threads: Vec<ThreadRecord>,
    /// Longest backtrace printed outside any thread block (the `bt` output).
    pub primary_backtrace: Vec<StackFrame>,
}

/// Parse a transcript; fails only when the binary identity line is missing.
pub fn parse_transcript(core_file: &str, transcript: &str) -> Result<ParsedTranscript, AnalysisError> {
    let view = TranscriptLines::new(transcript);

    let (binary, command_line) = extract_core_origin(&view)
        .ok_or_else(|| AnalysisError::MissingBinaryIdentity { file: core_file.to_string() })?;

    let signal_info = extract_signal_info(&view);
    let current_thread = extract_current_thread(&view);
    let signal = if signal_info.name == UNKNOWN {
        UNKNOWN.to_string()
    } else {
        format!("{} ({})", signal_info.name, signal_info.description)
    };

    let runs = extract_frame_runs(&view);
    let primary_backtrace = runs
        .loose
        .iter()
        .fold(None::<&Vec<StackFrame>>, |best, run| match best {
            Some(b) if b.len() >= run.len() => Some(b),
            _ => Some(run),
        })
        .cloned()
        .unwrap_or_default();

    let mut threads = runs.threads;
    if threads.is_empty() && !primary_backtrace.is_empty() {
        threads.push(ThreadRecord::new(current_thread.unwrap_or(1), None, primary_backtrace.clone()));
    }

    Ok(ParsedTranscript {
        basic_info: BasicInfo { binary, command_line, signal, current_thread },
        signal_info,
        threads,
        primary_backtrace,
    })
}

/// Parse a transcript into a (not yet normalized) [`CrashRecord`].
pub fn build_crash_record(
    core_file: &str,
    transcript: &str,
    file_info: FileInfo,
    captured_at: DateTime<Utc>,
    keep_transcript: bool,
) -> Result<CrashRecord, AnalysisError> {
    let parsed = parse_transcript(core_file, transcript)?;
    Ok(CrashRecord {
        core_file: core_file.to_string(),
        timestamp: captured_at.to_rfc3339(),
        file_info,
        basic_info: parsed.basic_info,
        signal_info: parsed.signal_info,
        threads: parsed.threads,
        stack_trace: parsed.primary_backtrace,
        transcript: keep_transcript.then(|| transcript.to_string()),
    })
}

/// Binary and full command line from ``Core was generated by `...'``.
pub fn extract_core_origin(view: &TranscriptLines) -> Option<(String, String)> {
    view.find_map(|line| ORIGIN_RE.captures(line).map(|c| c[1].trim().to_string())).map(
        |command_line| {
            let binary = command_line
                .split_whitespace()
                .next()
                .map(|token| token.trim_end_matches(':').to_string())
                .filter(|token| !token.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string());
            (binary, command_line)
        },
    )
}

/// Signal name, description, fault address and code, with sentinels for gaps.
pub fn extract_signal_info(view: &TranscriptLines) -> SignalInfo {
    let mut info = SignalInfo::default();
    if let Some((name, description)) = view.find_map(|line| {
        SIGNAL_RE.captures(line).map(|c| (normalize_signal_name(&c[1]), c[2].trim().to_string()))
    }) {
        info.name = name;
        info.description = description;
    }
    info.fault_address = extract_fault_address(view).unwrap_or_else(|| NOT_AVAILABLE.to_string());
    info.code = view
        .find_map(|line| SIGNAL_CODE_RE.captures(line).and_then(|c| c[1].parse::<i32>().ok()));
    info
}

pub fn extract_fault_address(view: &TranscriptLines) -> Option<String> {
    view.find_map(|line| FAULT_ADDR_RE.captures(line).map(|c| c[1].to_string()))
}

pub fn extract_current_thread(view: &TranscriptLines) -> Option<u32> {
    view.find_map(|line| CURRENT_THREAD_RE.captures(line).and_then(|c| c[1].parse().ok()))
}

/// Older gdb prints signal numbers; map the common ones to names.
fn normalize_signal_name(raw: &str) -> String {
    let Ok(number) = raw.parse::<u32>() else {
        return raw.to_string();
    };
    let name = match number {
        1 => "SIGHUP",
        2 => "SIGINT",
        3 => "SIGQUIT",
        4 => "SIGILL",
        5 => "SIGTRAP",
        6 => "SIGABRT",
        7 => "SIGBUS",
        8 => "SIGFPE",
        9 => "SIGKILL",
        11 => "SIGSEGV",
        13 => "SIGPIPE",
        15 => "SIGTERM",
        _ => return raw.to_string(),
    };
    name.to_string()
}

#[derive(Debug, Default)]
struct FrameRuns {
    threads: Vec<ThreadRecord>,
    loose: Vec<Vec<StackFrame>>,
}

enum Block {
    None,
    Thread { id: u32, lwp: Option<u32>, frames: Vec<StackFrame> },
    Loose(Vec<StackFrame>),
}

/// Split the transcript into thread blocks and loose backtrace runs.
///
/// A run ends at the next thread header, when frame numbering restarts, or at
/// `$N = ...` print output. Other lines (locals from `bt full`, gdb chatter)
/// are ignored.
fn extract_frame_runs(view: &TranscriptLines) -> FrameRuns {
    let mut runs = FrameRuns::default();
    let mut block = Block::None;

    for line in view.iter() {
        if let Some(caps) = THREAD_HEADER_RE.captures(line) {
            close_block(&mut runs, std::mem::replace(&mut block, Block::None));
            if let Ok(id) = caps[1].parse::<u32>() {
                let lwp = LWP_RE.captures(&caps[2]).and_then(|c| c[1].parse().ok());
                block = Block::Thread { id, lwp, frames: Vec::new() };
            }
            continue;
        }

        if VALUE_HISTORY_RE.is_match(line) {
            close_block(&mut runs, std::mem::replace(&mut block, Block::None));
            continue;
        }

        let Some(frame) = parse_frame_line(line) else {
            continue;
        };

        let restarts = match &block {
            Block::Thread { frames, .. } | Block::Loose(frames) => {
                frames.last().is_some_and(|last| frame.index <= last.index)
            }
            Block::None => false,
        };
        if restarts {
            close_block(&mut runs, std::mem::replace(&mut block, Block::None));
        }

        match &mut block {
            Block::Thread { frames, .. } | Block::Loose(frames) => frames.push(frame),
            Block::None => block = Block::Loose(vec![frame]),
        }
    }
    close_block(&mut runs, block);
    runs
}

fn close_block(runs: &mut FrameRuns, block: Block) {
    match block {
        Block::None => {}
        Block::Loose(frames) => {
            if !frames.is_empty() {
                runs.loose.push(frames);
            }
        }
        Block::Thread { id, lwp, frames } => {
            // `bt` and `bt full` passes can print the same thread twice; first wins.
            if !runs.threads.iter().any(|t| t.id == id) {
                runs.threads.push(ThreadRecord::new(id, lwp, frames));
            }
        }
    }
}

/// Parse `#N  [0xADDR in] func (args) [at file:line | from lib]`.
pub fn parse_frame_line(line: &str) -> Option<StackFrame> {
    let caps = FRAME_RE.captures(line)?;
    let index = caps[1].parse::<u32>().ok()?;
    let mut rest = caps[2].to_string();

    let mut address = None;
    if let Some((addr, call)) =
        FRAME_ADDR_RE.captures(&rest).map(|c| (c[1].to_string(), c[2].to_string()))
    {
        address = Some(addr);
        rest = call;
    }

    let mut library = None;
    if let Some((lib, start)) =
        FRAME_FROM_RE.captures(&rest).map(|c| (c[1].to_string(), match_start(&c)))
    {
        library = Some(lib);
        rest.truncate(start);
    }

    let mut location = None;
    if let Some((file, line_no, start)) = FRAME_AT_RE
        .captures(&rest)
        .map(|c| (c[1].to_string(), c[2].parse::<u32>().ok(), match_start(&c)))
    {
        location = line_no.map(|line| SourceLocation { file, line });
        rest.truncate(start);
    }

    let function = function_name(rest.trim());
    if function.is_empty() {
        return None;
    }
    let is_system = is_system_function(&function);
    Some(StackFrame { index, function, address, location, library, is_system })
}

fn match_start(caps: &regex::Captures<'_>) -> usize {
    caps.get(0).map_or(0, |m| m.start())
}

/// Strip the trailing argument list, honoring nested parentheses.
fn function_name(call: &str) -> String {
    if !call.ends_with(')') {
        return call.to_string();
    }
    let mut depth = 0;
    for (idx, c) in unquoted_parens(call).into_iter().rev() {
        if c == ')' {
            depth += 1;
            continue;
        }
        depth -= 1;
        if depth == 0 {
            let name = call[..idx].trim_end();
            return if name.is_empty() { call.to_string() } else { name.to_string() };
        }
    }
    call.to_string()
}
