//! Binary-driving integration tests: init, ingest over generated PDFs,
//! sparse search, re-ingest skipping, and stats.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

fn lectern_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("lectern");
    path
}

/// Single-page PDF whose text layer carries a heading and a paragraph.
fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![50.into(), 700.into()]),
    ];
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            operations.push(Operation::new("Td", vec![0.into(), (-24).into()]));
        }
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize PDF");
    bytes
}

fn physics_pdf() -> Vec<u8> {
    pdf_with_lines(&[
        "Chapter 1 Energy",
        "Energy is conserved in every closed system, and it can change form",
        "between kinetic, potential, thermal, and chemical varieties.",
    ])
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data/physics")).unwrap();
    fs::write(root.join("data/physics/energy.pdf"), physics_pdf()).unwrap();

    let config_content = format!(
        r#"subjects = ["physics", "biology"]

[db]
path = "{}/store/lectern.sqlite"

[chunking]
min_chars = 40
max_chars = 400

[retrieval]
top_k = 5
"#,
        root.display()
    );

    let config_path = root.join("config/lectern.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_lectern(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = lectern_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run lectern binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_lectern(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_lectern(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_lectern(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_and_sparse_search() {
    let (tmp, config_path) = setup_test_env();
    let data_root = tmp.path().join("data");

    run_lectern(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_lectern(&config_path, &["ingest", data_root.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 1 ok"), "unexpected: {}", stdout);
    assert!(stdout.contains("0 unextractable"), "unexpected: {}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, stderr, success) = run_lectern(
        &config_path,
        &[
            "search",
            "conserved energy",
            "--subject",
            "physics",
            "--mode",
            "sparse",
        ],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Chapter 1 Energy"), "no citation in: {}", stdout);
    assert!(stdout.contains("id: "), "no chunk id in: {}", stdout);
}

#[test]
fn test_reingest_skips_unchanged_documents() {
    let (tmp, config_path) = setup_test_env();
    let data_root = tmp.path().join("data");
    let data_root = data_root.to_str().unwrap();

    run_lectern(&config_path, &["init"]);
    let (stdout1, _, _) = run_lectern(&config_path, &["ingest", data_root]);
    assert!(stdout1.contains("documents: 1 ok"));

    let (stdout2, _, _) = run_lectern(&config_path, &["ingest", data_root]);
    assert!(
        stdout2.contains("1 unchanged"),
        "second ingest should skip: {}",
        stdout2
    );

    // --full forces reprocessing without duplicating documents
    let (stdout3, _, _) = run_lectern(&config_path, &["ingest", data_root, "--full"]);
    assert!(stdout3.contains("documents: 1 ok"), "unexpected: {}", stdout3);

    let (stats, _, _) = run_lectern(&config_path, &["stats"]);
    assert!(stats.contains("Documents:   1"), "duplicates after --full: {}", stats);
}

#[test]
fn test_search_unknown_subject_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_lectern(&config_path, &["init"]);

    let (_, stderr, success) = run_lectern(
        &config_path,
        &["search", "anything", "--subject", "history"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown subject"), "stderr: {}", stderr);
}

#[test]
fn test_search_empty_subject_returns_no_results() {
    let (tmp, config_path) = setup_test_env();
    let data_root = tmp.path().join("data");

    run_lectern(&config_path, &["init"]);
    run_lectern(&config_path, &["ingest", data_root.to_str().unwrap()]);

    // biology is configured but has no documents
    let (stdout, _, success) = run_lectern(
        &config_path,
        &["search", "energy", "--subject", "biology", "--mode", "sparse"],
    );
    assert!(success);
    assert!(stdout.contains("No results."), "unexpected: {}", stdout);
}

#[test]
fn test_dry_run_counts_documents() {
    let (tmp, config_path) = setup_test_env();
    let data_root = tmp.path().join("data");

    run_lectern(&config_path, &["init"]);
    let (stdout, _, success) = run_lectern(
        &config_path,
        &["ingest", data_root.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("physics: 1 documents"), "unexpected: {}", stdout);
    assert!(stdout.contains("total: 1 documents"), "unexpected: {}", stdout);
}

#[test]
fn test_stats_reports_subject_breakdown() {
    let (tmp, config_path) = setup_test_env();
    let data_root = tmp.path().join("data");

    run_lectern(&config_path, &["init"]);
    run_lectern(&config_path, &["ingest", data_root.to_str().unwrap()]);

    let (stdout, stderr, success) = run_lectern(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("physics"), "no subject row: {}", stdout);
    assert!(stdout.contains("Documents:   1"), "unexpected: {}", stdout);
}

#[test]
fn test_get_unknown_id_reports_not_found() {
    let (_tmp, config_path) = setup_test_env();
    run_lectern(&config_path, &["init"]);

    let (stdout, _, success) = run_lectern(&config_path, &["get", "no-such-id"]);
    assert!(success);
    assert!(stdout.contains("Not found"));
}
