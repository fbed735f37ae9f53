//! Crash clustering across a batch of records.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::model::{CoreComparison, CrashPattern, CrashRecord, TimeRange, UNKNOWN};

/// Number of non-system frames that make up a signature.
pub const SIGNATURE_DEPTH: usize = 3;

pub const SIGNATURE_SEPARATOR: &str = "|";

/// Smallest bucket that is reported as a pattern.
pub const MIN_PATTERN_SIZE: usize = 2;

fn signal_name(record: &CrashRecord) -> &str {
    let name = record.signal_info.name.trim();
    if name.is_empty() {
        UNKNOWN
    } else {
        name
    }
}

/// First [`SIGNATURE_DEPTH`] non-system function names of the record's stack.
pub fn signature_frames(record: &CrashRecord) -> Vec<String> {
    record
        .stack_trace
        .iter()
        .filter(|f| !f.is_system)
        .take(SIGNATURE_DEPTH)
        .map(|f| f.function.clone())
        .collect()
}

/// `SIGNAL|f1|f2|f3` for a record.
pub fn crash_signature(record: &CrashRecord) -> String {
    let mut parts = vec![signal_name(record).to_string()];
    parts.extend(signature_frames(record));
    parts.join(SIGNATURE_SEPARATOR)
}

/// Short stable name for a signature, e.g. `pattern-1a2b3c4d`.
pub fn pattern_id(signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("pattern-{hex}")
}

struct Bucket {
    signal: String,
    frames: Vec<String>,
    core_files: Vec<String>,
}

/// Summarize a batch: signal/function distributions, time range, and patterns.
///
/// Patterns are buckets of at least [`MIN_PATTERN_SIZE`] records with the same
/// signature, ordered by descending count and then by first appearance.
pub fn compare_cores(records: &[CrashRecord]) -> CoreComparison {
    let mut comparison = CoreComparison { total_cores: records.len(), ..Default::default() };

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<Bucket> = Vec::new();
    let mut earliest: Option<(DateTime<FixedOffset>, &str)> = None;
    let mut latest: Option<(DateTime<FixedOffset>, &str)> = None;

    for record in records {
        match DateTime::parse_from_rfc3339(&record.timestamp) {
            Ok(ts) => {
                if earliest.map_or(true, |(first, _)| ts < first) {
                    earliest = Some((ts, record.timestamp.as_str()));
                }
                if latest.map_or(true, |(last, _)| ts > last) {
                    latest = Some((ts, record.timestamp.as_str()));
                }
            }
            Err(e) => {
                debug!(core_file = %record.core_file, timestamp = %record.timestamp, error = %e,
                    "ignoring unparseable timestamp");
            }
        }

        let signal = signal_name(record).to_string();
        *comparison.common_signals.entry(signal.clone()).or_insert(0) += 1;
        for frame in record.stack_trace.iter().filter(|f| !f.is_system) {
            *comparison.common_functions.entry(frame.function.clone()).or_insert(0) += 1;
        }

        let signature = crash_signature(record);
        let slot = *index.entry(signature).or_insert_with(|| {
            buckets.push(Bucket {
                signal,
                frames: signature_frames(record),
                core_files: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[slot].core_files.push(record.core_file.clone());
    }

    comparison.distinct_signatures = buckets.len();
    if let (Some((_, first)), Some((_, last))) = (earliest, latest) {
        comparison.time_range = Some(TimeRange { first: first.to_string(), last: last.to_string() });
    }

    let mut patterns: Vec<CrashPattern> = buckets
        .into_iter()
        .filter(|b| b.core_files.len() >= MIN_PATTERN_SIZE)
        .map(|b| {
            let mut signature = vec![b.signal.clone()];
            signature.extend(b.frames.iter().cloned());
            CrashPattern {
                id: pattern_id(&signature.join(SIGNATURE_SEPARATOR)),
                signal: b.signal,
                stack_signature: b.frames,
                occurrence_count: b.core_files.len(),
                affected_core_files: b.core_files,
            }
        })
        .collect();
    // Stable sort keeps first-seen order among equal counts.
    patterns.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
    comparison.crash_patterns = patterns;
    comparison
}
