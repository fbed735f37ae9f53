use std::path::Path;

use cbtoolbox_core::model::{CoreFileKind, FileInfo, StackFrame, ThreadRecord, ThreadRole};
use cbtoolbox_core::services::analysis::analyze_transcript;
use cbtoolbox_core::services::threads::{
    deduplicate_threads, is_crash_marker, mark_crashed_thread, normalize_threads, thread_name,
};

const SEGV: &str = include_str!("fixtures/gdb_segv.txt");
const ABORT: &str = include_str!("fixtures/gdb_abort.txt");

fn thread(id: u32, frames: &[&str]) -> ThreadRecord {
    let backtrace =
        frames.iter().enumerate().map(|(i, f)| StackFrame::named(i as u32, *f)).collect();
    ThreadRecord::new(id, None, backtrace)
}

#[test]
fn identical_backtraces_collapse_into_the_first_thread() {
    let threads = vec![
        thread(3, &["epoll_wait", "rxThreadFunc", "start_thread", "clone"]),
        thread(2, &["epoll_wait", "rxThreadFunc", "start_thread", "clone"]),
        thread(1, &["raise", "<signal handler called>", "ExecProcNode"]),
    ];
    let deduped = deduplicate_threads(threads);

    assert_eq!(deduped.len(), 2);
    assert_eq!(deduped[0].id, 3);
    assert_eq!(deduped[0].duplicate_ids, vec![2]);
    assert_eq!(deduped[1].id, 1);
    assert!(deduped[1].duplicate_ids.is_empty());
}

#[test]
fn deduplication_is_idempotent() {
    let threads = vec![
        thread(1, &["a", "b"]),
        thread(2, &["a", "b"]),
        thread(3, &["c"]),
        thread(4, &["a", "b"]),
    ];
    let once = deduplicate_threads(threads);
    let twice = deduplicate_threads(once.clone());
    assert_eq!(once, twice);
    assert_eq!(once[0].duplicate_ids, vec![2, 4]);
}

#[test]
fn current_thread_wins_among_crash_candidates() {
    let mut threads = vec![
        thread(1, &["raise", "<signal handler called>", "foo"]),
        thread(2, &["raise", "<signal handler called>", "bar"]),
    ];
    let chosen = mark_crashed_thread(&mut threads, Some(2));
    assert_eq!(chosen, Some(1));
    assert!(!threads[0].is_crashed);
    assert!(threads[1].is_crashed);
}

#[test]
fn first_candidate_wins_without_current_thread() {
    let mut threads = vec![
        thread(5, &["epoll_wait"]),
        thread(6, &["StandardHandlerForSigillSigsegvSigbus_OnMainThread", "foo"]),
        thread(7, &["<signal handler called>", "bar"]),
    ];
    let chosen = mark_crashed_thread(&mut threads, Some(5));
    assert_eq!(chosen, Some(1));
    assert_eq!(threads.iter().filter(|t| t.is_crashed).count(), 1);
}

#[test]
fn no_marker_means_no_crashed_thread() {
    let mut threads = vec![thread(1, &["abort", "ExceptionalCondition"]), thread(2, &["epoll_wait"])];
    assert_eq!(mark_crashed_thread(&mut threads, Some(1)), None);
    assert!(threads.iter().all(|t| !t.is_crashed));
}

#[test]
fn crash_markers_cover_trampoline_and_handler_fragment() {
    assert!(is_crash_marker("<signal handler called>"));
    assert!(is_crash_marker("StandardHandlerForSigillSigsegvSigbus_OnMainThread"));
    assert!(!is_crash_marker("StatementCancelHandler"));
    assert!(!is_crash_marker("raise"));
}

#[test]
fn roles_and_names_are_assigned() {
    let threads = vec![
        thread(1, &["raise", "<signal handler called>", "ExecProcNode", "PostgresMain", "main"]),
        thread(2, &["epoll_wait", "rxThreadFunc", "start_thread", "clone"]),
        thread(3, &["poll", "StatementCancelHandler", "WaitLatch"]),
        thread(4, &[]),
        thread(5, &["select", "helper"]),
    ];
    let normalized = normalize_threads(threads, Some(1));

    assert_eq!(normalized[0].role, ThreadRole::Crashed);
    assert_eq!(normalized[0].name, "backend");
    assert_eq!(normalized[1].role, ThreadRole::Worker);
    assert_eq!(normalized[1].name, "interconnect rx");
    assert_eq!(normalized[2].role, ThreadRole::SignalHandling);
    assert_eq!(normalized[2].name, "signal_handling");
    assert_eq!(normalized[3].role, ThreadRole::Unknown);
    assert_eq!(normalized[3].name, "unknown");
    assert_eq!(normalized[4].role, ThreadRole::Worker);
    assert_eq!(normalized[4].name, "worker");
}

#[test]
fn generic_die_frame_needs_the_trampoline_to_count_as_signal_handling() {
    let threads = vec![
        thread(1, &["raise", "<signal handler called>", "ExecProcNode", "PostgresMain"]),
        thread(2, &["die", "worker_loop", "start_thread"]),
        thread(3, &["die", "<signal handler called>", "WaitLatch", "PostgresMain"]),
    ];
    let normalized = normalize_threads(threads, Some(1));

    assert_eq!(normalized[0].role, ThreadRole::Crashed);
    assert_eq!(normalized[1].role, ThreadRole::Worker);
    assert_eq!(normalized[2].role, ThreadRole::SignalHandling);
}

#[test]
fn thread_name_prefers_outermost_entry_point() {
    let frames: Vec<StackFrame> = ["ExecProcNode", "PostgresMain", "ServerLoop", "PostmasterMain", "main"]
        .iter()
        .enumerate()
        .map(|(i, f)| StackFrame::named(i as u32, *f))
        .collect();
    assert_eq!(thread_name(&frames, ThreadRole::Worker), "postmaster");
}

#[test]
fn normalized_segv_record_uses_crashed_thread_stack() {
    let info = FileInfo::empty(CoreFileKind::CoreDump);
    let record = analyze_transcript(Path::new("/cores/core.4321"), SEGV, info, false).expect("record");

    assert_eq!(record.threads.len(), 2);
    assert_eq!(record.threads[0].id, 3);
    assert_eq!(record.threads[0].duplicate_ids, vec![2]);
    assert_eq!(record.threads[0].name, "interconnect rx");

    let crashed = record.crashed_thread().expect("crashed thread");
    assert_eq!(crashed.id, 1);
    assert_eq!(crashed.role, ThreadRole::Crashed);
    assert_eq!(record.stack_trace, crashed.backtrace);
    assert!(record.summary().contains("- Crashed Thread: 1"));
}

#[test]
fn normalized_abort_record_keeps_primary_stack_without_crashed_thread() {
    let info = FileInfo::empty(CoreFileKind::CoreDump);
    let record = analyze_transcript(Path::new("/cores/core.9001"), ABORT, info, false).expect("record");

    assert!(record.crashed_thread().is_none());
    assert_eq!(record.threads.len(), 1);
    assert_eq!(record.threads[0].role, ThreadRole::Worker);
    assert_eq!(record.stack_trace.len(), 6);
    assert_eq!(record.stack_trace[3].function, "GetSnapshotData");
}
