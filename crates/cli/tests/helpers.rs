use std::path::Path;

use cbtoolbox::{
    analysis_report_name, analysis_report_names, canonicalize_or_current, comparison_report_name,
    write_report, OutputFormat,
};
use cbtoolbox_core::model::TimeRange;
use tempfile::tempdir;

#[test]
fn analysis_report_name_uses_core_file_name() {
    assert_eq!(
        analysis_report_name("20240301_123000", "/var/cores/core.postgres.4321", OutputFormat::Json),
        "core_analysis_20240301_123000_core.postgres.4321.json"
    );
    assert_eq!(
        analysis_report_name("20240301_123000", "core.1", OutputFormat::Yaml),
        "core_analysis_20240301_123000_core.1.yaml"
    );
}

#[test]
fn same_named_cores_in_different_directories_get_distinct_reports() {
    let names = analysis_report_names(
        "20240301_123000",
        &["/data/seg0/core", "/data/seg1/core", "/data/seg1/core.42"],
        OutputFormat::Json,
    );
    assert_eq!(names.len(), 3);
    assert_ne!(names[0], names[1]);
    for name in &names[..2] {
        assert!(name.starts_with("core_analysis_20240301_123000_core_"));
        assert!(name.ends_with(".json"));
    }
    assert_eq!(names[2], "core_analysis_20240301_123000_core.42.json");

    let again = analysis_report_names(
        "20240301_123000",
        &["/data/seg0/core", "/data/seg1/core"],
        OutputFormat::Json,
    );
    assert_eq!(again, names[..2]);
}

#[test]
fn comparison_report_name_has_stamp_and_extension() {
    assert_eq!(
        comparison_report_name("20240301_123000", OutputFormat::Yaml),
        "core_comparison_20240301_123000.yaml"
    );
}

#[test]
fn write_report_creates_directory_and_serializes() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("reports").join("nested");
    let range = TimeRange { first: "a".into(), last: "b".into() };

    let json = write_report(&out, "range.json", &range, OutputFormat::Json).expect("json");
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json).expect("read")).expect("parse");
    assert_eq!(parsed["first"], "a");

    let yaml = write_report(&out, "range.yaml", &range, OutputFormat::Yaml).expect("yaml");
    let body = std::fs::read_to_string(yaml).expect("read");
    assert!(body.contains("first: a"));
    assert!(body.contains("last: b"));
}

#[test]
fn canonicalize_or_current_keeps_missing_paths_relative_to_cwd() {
    let cwd = std::env::current_dir().expect("cwd");
    let result = canonicalize_or_current("cbtoolbox-no-such-output-dir").expect("resolve");
    assert_eq!(result, cwd.join("cbtoolbox-no-such-output-dir"));
}

#[test]
fn canonicalize_or_current_resolves_existing_paths() {
    let dir = tempdir().expect("tempdir");
    let result = canonicalize_or_current(&dir.path().to_string_lossy()).expect("resolve");
    assert_eq!(result, dir.path().canonicalize().expect("canon"));
    assert!(Path::new(&result).is_absolute());
}
