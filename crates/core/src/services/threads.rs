//! Thread normalization: deduplication, crash detection and role labels.

use std::collections::HashMap;

use crate::model::{CrashRecord, StackFrame, ThreadRecord, ThreadRole};

/// Frame emitted by the kernel's signal trampoline.
pub const SIGNAL_TRAMPOLINE: &str = "<signal handler called>";

/// Fragments of the database's fatal-signal handler names.
const CRASH_MARKER_FRAGMENTS: &[&str] = &["SigillSigsegvSigbus"];

/// Handlers for non-fatal signals; a thread sitting in one is handling a signal.
///
/// Generic names such as `die` are left out since application code uses them
/// too; a thread inside such a handler still shows the trampoline frame.
const SIGNAL_HANDLERS: &[&str] = &[
    "StatementCancelHandler",
    "quickdie",
    "handle_sig_alarm",
    "SignalHandlerForConfigReload",
    "SignalHandlerForShutdownRequest",
    "procsignal_sigusr1_handler",
    "CdbProgramErrorHandler",
];

/// Process entry points and the label they give a thread.
const ROLE_TABLE: &[(&str, &str)] = &[
    ("PostmasterMain", "postmaster"),
    ("PostgresMain", "backend"),
    ("BackgroundWriterMain", "bgwriter"),
    ("CheckpointerMain", "checkpointer"),
    ("WalWriterMain", "walwriter"),
    ("WalReceiverMain", "walreceiver"),
    ("WalSndLoop", "walsender"),
    ("StartupProcessMain", "startup"),
    ("AutoVacLauncherMain", "autovacuum launcher"),
    ("AutoVacWorkerMain", "autovacuum worker"),
    ("PgArchiverMain", "archiver"),
    ("PgstatCollectorMain", "stats collector"),
    ("SysLoggerMain", "logger"),
    ("BackgroundWorkerMain", "background worker"),
    ("FtsProbeMain", "fts probe"),
    ("rxThreadFunc", "interconnect rx"),
    ("ic_proxy_server_main", "interconnect proxy"),
];

/// Whether a frame function is one of the fatal-signal delivery markers.
pub fn is_crash_marker(function: &str) -> bool {
    function == SIGNAL_TRAMPOLINE || CRASH_MARKER_FRAGMENTS.iter().any(|f| function.contains(f))
}

fn has_crash_marker(thread: &ThreadRecord) -> bool {
    thread.backtrace.iter().any(|f| is_crash_marker(&f.function))
}

fn has_signal_handler(thread: &ThreadRecord) -> bool {
    thread.backtrace.iter().any(|f| {
        is_crash_marker(&f.function) || SIGNAL_HANDLERS.contains(&f.function.as_str())
    })
}

/// Collapse threads whose ordered frame names are identical.
///
/// The first thread of each group is kept; the others' ids are recorded on it.
pub fn deduplicate_threads(threads: Vec<ThreadRecord>) -> Vec<ThreadRecord> {
    let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
    let mut out: Vec<ThreadRecord> = Vec::with_capacity(threads.len());
    for thread in threads {
        let key: Vec<String> = thread.frame_names().into_iter().map(str::to_string).collect();
        match seen.get(&key) {
            Some(&idx) => {
                let rep = &mut out[idx];
                if thread.id != rep.id && !rep.duplicate_ids.contains(&thread.id) {
                    rep.duplicate_ids.push(thread.id);
                }
                for id in thread.duplicate_ids {
                    if id != rep.id && !rep.duplicate_ids.contains(&id) {
                        rep.duplicate_ids.push(id);
                    }
                }
            }
            None => {
                seen.insert(key, out.len());
                out.push(thread);
            }
        }
    }
    out
}

/// Mark at most one thread as crashed.
///
/// Among threads carrying a crash marker the current thread wins, otherwise the
/// first one. Returns the index of the crashed thread, if any.
pub fn mark_crashed_thread(threads: &mut [ThreadRecord], current_thread: Option<u32>) -> Option<usize> {
    for thread in threads.iter_mut() {
        thread.is_crashed = false;
    }
    let candidates: Vec<usize> =
        threads.iter().enumerate().filter(|(_, t)| has_crash_marker(t)).map(|(i, _)| i).collect();
    let chosen = candidates
        .iter()
        .copied()
        .find(|&i| Some(threads[i].id) == current_thread)
        .or_else(|| candidates.first().copied())?;
    threads[chosen].is_crashed = true;
    Some(chosen)
}

/// Role of a thread once crash detection has run.
pub fn thread_role(thread: &ThreadRecord) -> ThreadRole {
    if thread.is_crashed {
        ThreadRole::Crashed
    } else if has_signal_handler(thread) {
        ThreadRole::SignalHandling
    } else if thread.backtrace.is_empty() {
        ThreadRole::Unknown
    } else {
        ThreadRole::Worker
    }
}

/// Label from the outermost recognizable entry point, else the role label.
pub fn thread_name(backtrace: &[StackFrame], role: ThreadRole) -> String {
    backtrace
        .iter()
        .rev()
        .filter(|f| !f.is_system)
        .find_map(|f| {
            ROLE_TABLE.iter().find(|(entry, _)| *entry == f.function).map(|(_, label)| *label)
        })
        .unwrap_or_else(|| role.as_str())
        .to_string()
}

/// Deduplicate, detect the crashed thread, and label every thread.
pub fn normalize_threads(threads: Vec<ThreadRecord>, current_thread: Option<u32>) -> Vec<ThreadRecord> {
    let mut threads = deduplicate_threads(threads);
    mark_crashed_thread(&mut threads, current_thread);
    for thread in &mut threads {
        thread.role = thread_role(thread);
        thread.name = thread_name(&thread.backtrace, thread.role);
    }
    threads
}

/// Normalize a record's threads in place and settle its signature stack.
///
/// The stack is the crashed thread's backtrace when one was found, otherwise
/// whatever the parser recovered from `bt`, the current thread, or the first
/// thread, in that order.
pub fn normalize_record(record: &mut CrashRecord) {
    let current = record.basic_info.current_thread;
    record.threads = normalize_threads(std::mem::take(&mut record.threads), current);

    if let Some(frames) = record.crashed_thread().map(|t| t.backtrace.clone()) {
        record.stack_trace = frames;
        return;
    }
    if !record.stack_trace.is_empty() {
        return;
    }
    let fallback = record
        .threads
        .iter()
        .find(|t| Some(t.id) == current)
        .or_else(|| record.threads.first())
        .map(|t| t.backtrace.clone());
    if let Some(frames) = fallback {
        record.stack_trace = frames;
    }
}
