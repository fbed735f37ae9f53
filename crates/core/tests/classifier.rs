use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use cbtoolbox_core::config::ClassifierConfig;
use cbtoolbox_core::model::CoreFileKind;
use cbtoolbox_core::services::analysis::AnalysisError;
use cbtoolbox_core::services::classifier::{
    classify_output, extract_file_info, file_description, validate_core_files, FileIdentifier,
};
use tempfile::tempdir;

const CORE_OUTPUT: &str = "ELF 64-bit LSB core file, x86-64, version 1 (SYSV), SVR4-style, \
from 'postgres:  7000, gpadmin regression [local] con12 seg0 cmd5 SELECT', real uid: 1000, \
effective uid: 1001, real gid: 1002, effective gid: 1003, \
execfn: '/usr/local/cloudberry-db/bin/postgres', platform: 'x86_64'";
const ELF_OUTPUT: &str = "ELF 64-bit LSB executable, x86-64, dynamically linked";
const TEXT_OUTPUT: &str = "ASCII text";

/// Answers by file name; unknown names fail like a broken tool would.
struct FakeIdentifier {
    outputs: HashMap<String, Result<String, String>>,
}

impl FakeIdentifier {
    fn new(entries: &[(&str, Result<&str, &str>)]) -> Self {
        let outputs = entries
            .iter()
            .map(|(name, out)| {
                (name.to_string(), out.map(str::to_string).map_err(str::to_string))
            })
            .collect();
        Self { outputs }
    }
}

impl FileIdentifier for FakeIdentifier {
    fn identify(&self, path: &Path) -> Result<String, String> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.outputs.get(name).cloned().unwrap_or_else(|| Err(format!("no answer for {name}")))
    }
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"data").unwrap();
    path
}

fn lenient() -> ClassifierConfig {
    ClassifierConfig { program: "file".into(), accept_generic_elf: true, strict: false }
}

#[test]
fn core_file_output_is_accepted_with_metadata() {
    let info = classify_output(Path::new("core.4321"), CORE_OUTPUT, &lenient()).expect("core");
    assert_eq!(info.kind, CoreFileKind::CoreDump);
    assert_eq!(info.platform.as_deref(), Some("x86_64"));
    assert_eq!(info.real_uid, Some(1000));
    assert_eq!(info.effective_uid, Some(1001));
    assert_eq!(info.real_gid, Some(1002));
    assert_eq!(info.effective_gid, Some(1003));
    assert_eq!(info.execfn.as_deref(), Some("/usr/local/cloudberry-db/bin/postgres"));
    assert_eq!(
        info.generated_from.as_deref(),
        Some("postgres:  7000, gpadmin regression [local] con12 seg0 cmd5 SELECT")
    );
    assert_eq!(info.file_output, CORE_OUTPUT);
}

#[test]
fn generic_elf_depends_on_configuration() {
    let info = classify_output(Path::new("postgres"), ELF_OUTPUT, &lenient()).expect("elf accepted");
    assert_eq!(info.kind, CoreFileKind::ElfObject);

    let strict_elf = ClassifierConfig { accept_generic_elf: false, ..lenient() };
    assert!(classify_output(Path::new("postgres"), ELF_OUTPUT, &strict_elf).is_none());
    assert!(classify_output(Path::new("core.4321"), CORE_OUTPUT, &strict_elf).is_some());
}

#[test]
fn plain_text_is_not_a_core() {
    assert!(classify_output(Path::new("notes.txt"), TEXT_OUTPUT, &lenient()).is_none());
}

#[test]
fn path_text_does_not_decide_the_file_type() {
    let notes = Path::new("/tmp/my core file notes.txt");
    let output = "/tmp/my core file notes.txt: ASCII text\n";
    assert_eq!(file_description(notes, output), "ASCII text\n");
    assert!(classify_output(notes, output, &lenient()).is_none());

    let readme = Path::new("/srv/ELF-builds/readme.txt");
    assert!(classify_output(readme, "/srv/ELF-builds/readme.txt: ASCII text", &lenient()).is_none());

    let core = Path::new("/srv/ELF-builds/core.9");
    let info = classify_output(
        core,
        "/srv/ELF-builds/core.9: ELF 64-bit LSB core file, execfn: '/opt/bin/postgres'",
        &lenient(),
    )
    .expect("core");
    assert_eq!(info.kind, CoreFileKind::CoreDump);
    assert_eq!(info.execfn.as_deref(), Some("/opt/bin/postgres"));
    assert!(!info.file_output.contains("ELF-builds"));
}

#[test]
fn missing_fields_stay_empty() {
    let info = extract_file_info("ELF 64-bit LSB core file", CoreFileKind::CoreDump);
    assert!(info.platform.is_none());
    assert!(info.real_uid.is_none());
    assert!(info.execfn.is_none());
    assert!(info.generated_from.is_none());
}

#[test]
fn empty_arguments_are_rejected() {
    let identifier = FakeIdentifier::new(&[]);
    let err = validate_core_files(&[], &identifier, &lenient()).unwrap_err();
    assert!(matches!(err, AnalysisError::NoCandidates));
}

#[test]
fn no_valid_cores_is_an_error() {
    let dir = tempdir().unwrap();
    let notes = touch(dir.path(), "notes.txt");
    let identifier = FakeIdentifier::new(&[("notes.txt", Ok(TEXT_OUTPUT))]);

    let err = validate_core_files(&[notes], &identifier, &lenient()).unwrap_err();
    assert!(matches!(err, AnalysisError::NoValidCoreFiles));
}

#[test]
fn nonexistent_paths_are_skipped() {
    let dir = tempdir().unwrap();
    let core = touch(dir.path(), "core.1");
    let missing = dir.path().join("core.missing");
    let identifier = FakeIdentifier::new(&[("core.1", Ok(CORE_OUTPUT))]);

    let validated =
        validate_core_files(&[missing.clone(), core.clone()], &identifier, &lenient()).unwrap();
    assert_eq!(validated.paths, vec![core]);
    assert_eq!(validated.skipped.len(), 1);
    assert_eq!(validated.skipped[0].path, missing.display().to_string());
}

#[test]
fn directory_yields_the_union_of_its_sorted_cores() {
    let dir = tempdir().unwrap();
    let b = touch(dir.path(), "core.b");
    let a = touch(dir.path(), "core.a");
    touch(dir.path(), "readme.txt");
    fs::create_dir(dir.path().join("nested")).unwrap();
    touch(&dir.path().join("nested"), "core.c");
    let identifier = FakeIdentifier::new(&[
        ("core.a", Ok(CORE_OUTPUT)),
        ("core.b", Ok(CORE_OUTPUT)),
        ("core.c", Ok(CORE_OUTPUT)),
        ("readme.txt", Ok(TEXT_OUTPUT)),
    ]);

    let from_dir =
        validate_core_files(&[dir.path().to_path_buf()], &identifier, &lenient()).unwrap();
    assert_eq!(from_dir.paths, vec![a.clone(), b.clone()]);

    let from_files = validate_core_files(&[a, b], &identifier, &lenient()).unwrap();
    assert_eq!(from_dir.paths, from_files.paths);
}

#[test]
fn repeated_paths_are_validated_once() {
    let dir = tempdir().unwrap();
    let core = touch(dir.path(), "core.1");
    let identifier = FakeIdentifier::new(&[("core.1", Ok(CORE_OUTPUT))]);

    let validated = validate_core_files(
        &[core.clone(), dir.path().to_path_buf(), core.clone()],
        &identifier,
        &lenient(),
    )
    .unwrap();
    assert_eq!(validated.paths, vec![core.clone()]);
    assert!(validated.file_info.contains_key(&core));
}

#[test]
fn tool_failure_skips_unless_strict() {
    let dir = tempdir().unwrap();
    let good = touch(dir.path(), "core.good");
    let bad = touch(dir.path(), "core.bad");
    let identifier = FakeIdentifier::new(&[
        ("core.good", Ok(CORE_OUTPUT)),
        ("core.bad", Err("tool crashed")),
    ]);

    let validated =
        validate_core_files(&[bad.clone(), good.clone()], &identifier, &lenient()).unwrap();
    assert_eq!(validated.paths, vec![good.clone()]);
    assert!(validated.skipped[0].reason.contains("tool crashed"));

    let strict = ClassifierConfig { strict: true, ..lenient() };
    let err = validate_core_files(&[bad, good], &identifier, &strict).unwrap_err();
    assert!(matches!(err, AnalysisError::ClassifierFailed { .. }));
}

#[cfg(unix)]
#[test]
fn unreadable_directory_is_skipped_and_the_batch_proceeds() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    touch(&locked, "core.hidden");
    let core = touch(dir.path(), "core.1");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    let readable = fs::read_dir(&locked).is_ok();

    let identifier =
        FakeIdentifier::new(&[("core.1", Ok(CORE_OUTPUT)), ("core.hidden", Ok(CORE_OUTPUT))]);
    let result = validate_core_files(&[locked.clone(), core.clone()], &identifier, &lenient());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let validated = result.expect("batch continues past the directory");
    if readable {
        // Privileged users can list the directory anyway.
        return;
    }
    assert_eq!(validated.paths, vec![core]);
    assert_eq!(validated.skipped.len(), 1);
    assert_eq!(validated.skipped[0].path, locked.display().to_string());
    assert!(validated.skipped[0].reason.starts_with("cannot read directory"));
}

#[cfg(unix)]
#[test]
fn file_command_runs_the_configured_tool() {
    use cbtoolbox_core::services::classifier::FileCommand;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let tool = dir.path().join("fake-file");
    fs::write(&tool, "#!/bin/sh\n[ \"$1\" = -b ] || exit 2\necho \"ELF 64-bit LSB core file, x86-64, platform: 'x86_64'\"\n")
        .unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
    let core = touch(dir.path(), "core.7");

    let identifier = FileCommand::new(&tool);
    let output = identifier.identify(&core).unwrap();
    assert!(output.contains("core file"));

    let validated = validate_core_files(&[core.clone()], &identifier, &lenient()).unwrap();
    assert_eq!(validated.file_info[&core].platform.as_deref(), Some("x86_64"));
}

#[cfg(unix)]
#[test]
fn file_command_reports_missing_tool() {
    use cbtoolbox_core::services::classifier::FileCommand;

    let dir = tempdir().unwrap();
    let core = touch(dir.path(), "core.8");
    let identifier = FileCommand::new(dir.path().join("no-such-tool"));
    assert!(identifier.identify(&core).is_err());
}
