//! File tailing end to end: discovery, rotation, truncation, multiline,
//! and checkpoint resume against real files.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stanza_agent::database::{Database, StubDatabase};
use stanza_agent::entry::Entry;
use stanza_agent::operator::{BuildContext, Operator, OperatorRegistry};
use stanza_agent::pipeline::Params;
use stanza_agent::testutil::FakeOutput;

/// Builds a wired file_input with a fast poll interval.
fn build_file_input(
    database: Arc<dyn Database>,
    config_yaml: &str,
) -> (Arc<dyn Operator>, Arc<FakeOutput>) {
    let params: Params = serde_yaml::from_str(config_yaml).expect("valid file_input yaml");
    let registry = OperatorRegistry::with_builtins();
    let context = BuildContext::new(database);
    let operator = registry
        .build("file_input", params, &context)
        .expect("file_input builds");

    let fake = FakeOutput::new("$.fake");
    let candidates: Vec<Arc<dyn Operator>> = vec![fake.clone()];
    operator.set_outputs(&candidates).expect("wiring");
    (operator, fake)
}

fn record_text(entry: &Entry) -> String {
    entry
        .record
        .as_str()
        .expect("file entries carry string records")
        .to_string()
}

/// Collects `n` entries, failing the test if they do not arrive in time.
async fn collect(fake: &FakeOutput, n: usize) -> Vec<String> {
    let mut records = Vec::with_capacity(n);
    for _ in 0..n {
        let entry = fake.next_entry().await.expect("entry within timeout");
        records.push(record_text(&entry));
    }
    records
}

fn write_file(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write file");
}

fn append_file(path: &Path, contents: &str) {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(contents.as_bytes()).expect("append");
}

fn base_config(dir: &Path, extra: &str) -> String {
    format!(
        "{{id: $.file_input, type: file_input, include: ['{}/*.log'], poll_interval: 10ms{}}}",
        dir.display(),
        extra
    )
}

#[tokio::test]
async fn start_at_beginning_reads_existing_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(&dir.path().join("a.log"), "line1\nline2\n");

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: beginning"),
    );
    operator.start().await.expect("starts");

    assert_eq!(collect(&fake, 2).await, vec!["line1", "line2"]);
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn start_at_end_skips_existing_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.log");
    // A pre-existing file of several KiB must yield nothing until it grows.
    let preexisting: String = (0..500).map(|i| format!("old line {i}\n")).collect();
    write_file(&path, &preexisting);

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: end"),
    );
    operator.start().await.expect("starts");

    fake.expect_silence(Duration::from_millis(200)).await;

    append_file(&path, "fresh1\nfresh2\n");
    assert_eq!(collect(&fake, 2).await, vec!["fresh1", "fresh2"]);
    fake.expect_silence(Duration::from_millis(100)).await;
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn start_at_end_applies_only_to_the_first_scan() {
    let dir = tempfile::tempdir().expect("tempdir");

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: end"),
    );
    operator.start().await.expect("starts");

    // Give the first scan a moment to complete, then create the file:
    // later-discovered files always start at offset 0.
    tokio::time::sleep(Duration::from_millis(100)).await;
    write_file(&dir.path().join("late.log"), "late1\nlate2\n");

    assert_eq!(collect(&fake, 2).await, vec!["late1", "late2"]);
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn rotation_is_survived_without_duplication() {
    let dir = tempfile::tempdir().expect("tempdir");
    let original = dir.path().join("a.log");
    let rotated = dir.path().join("b.log");
    write_file(&original, "line1\nline2\n");

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: beginning"),
    );
    operator.start().await.expect("starts");
    assert_eq!(collect(&fake, 2).await, vec!["line1", "line2"]);

    // Rotate: rename the tailed file, append to it under its new name,
    // and create a replacement at the original path.
    std::fs::rename(&original, &rotated).expect("rename");
    append_file(&rotated, "line3\n");
    write_file(&original, "fresh1\n");

    let mut records = collect(&fake, 2).await;
    records.sort();
    assert_eq!(records, vec!["fresh1", "line3"]);
    fake.expect_silence(Duration::from_millis(100)).await;
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn truncation_resets_the_offset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.log");
    write_file(&path, "first generation line one\nfirst generation line two\n");

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: beginning"),
    );
    operator.start().await.expect("starts");
    assert_eq!(collect(&fake, 2).await.len(), 2);

    // Replace with shorter, different content: the fingerprint no longer
    // matches, so tailing restarts from offset zero.
    write_file(&path, "short\n");

    assert_eq!(collect(&fake, 1).await, vec!["short"]);
    fake.expect_silence(Duration::from_millis(100)).await;
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn multiline_line_start_frames_stack_traces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.log");
    write_file(
        &path,
        "\
2023-01-01 ERROR something broke
  at frame_one
  at frame_two
2023-01-02 INFO recovered
",
    );

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(
            dir.path(),
            r#", start_at: beginning, multiline: {line_start_pattern: '^\d{4}-\d{2}-\d{2}'}"#,
        ),
    );
    operator.start().await.expect("starts");

    let frame = collect(&fake, 1).await.remove(0);
    assert_eq!(
        frame,
        "2023-01-01 ERROR something broke\n  at frame_one\n  at frame_two"
    );
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn unterminated_final_line_is_emitted_once_growth_stops() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.log");
    write_file(&path, "complete\npartial without newline");

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: beginning"),
    );
    operator.start().await.expect("starts");

    // The terminated line arrives immediately; the trailing bytes arrive
    // once a later poll sees the file unchanged.
    assert_eq!(collect(&fake, 1).await, vec!["complete"]);
    assert_eq!(collect(&fake, 1).await, vec!["partial without newline"]);
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn checkpoints_resume_across_restarts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.log");
    write_file(&path, "line1\nline2\n");

    let database: Arc<dyn Database> = Arc::new(StubDatabase::new());

    let (operator, fake) = build_file_input(
        Arc::clone(&database),
        &base_config(dir.path(), ", start_at: beginning"),
    );
    operator.start().await.expect("starts");
    assert_eq!(collect(&fake, 2).await.len(), 2);
    operator.stop().await.expect("stops");

    append_file(&path, "line3\n");

    // A new instance over the same database and operator ID resumes from
    // the saved offset rather than re-reading the file.
    let (operator, fake) = build_file_input(
        Arc::clone(&database),
        &base_config(dir.path(), ", start_at: beginning"),
    );
    operator.start().await.expect("starts again");
    assert_eq!(collect(&fake, 1).await, vec!["line3"]);
    fake.expect_silence(Duration::from_millis(100)).await;
    operator.stop().await.expect("stops again");
}

#[tokio::test]
async fn excluded_files_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(&dir.path().join("keep.log"), "kept\n");
    write_file(&dir.path().join("skip.log"), "skipped\n");

    let config = format!(
        "{{id: $.file_input, type: file_input, include: ['{}/*.log'], exclude: ['{}/skip.log'], poll_interval: 10ms, start_at: beginning}}",
        dir.path().display(),
        dir.path().display(),
    );
    let (operator, fake) = build_file_input(Arc::new(StubDatabase::new()), &config);
    operator.start().await.expect("starts");

    assert_eq!(collect(&fake, 1).await, vec!["kept"]);
    fake.expect_silence(Duration::from_millis(100)).await;
    operator.stop().await.expect("stops");
}

#[tokio::test]
async fn file_name_label_is_attached() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_file(&dir.path().join("a.log"), "hello\n");

    let (operator, fake) = build_file_input(
        Arc::new(StubDatabase::new()),
        &base_config(dir.path(), ", start_at: beginning, include_file_path: true"),
    );
    operator.start().await.expect("starts");

    let entry = fake.next_entry().await.expect("entry");
    assert_eq!(entry.labels.get("file_name"), Some(&"a.log".to_string()));
    assert!(entry
        .labels
        .get("file_path")
        .expect("file_path label")
        .ends_with("a.log"));
    operator.stop().await.expect("stops");
}
