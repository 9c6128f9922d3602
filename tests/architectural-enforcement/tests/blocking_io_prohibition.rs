//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in the core and daemon MUST NOT block the
//! runtime thread.
//! **Required**: `tokio::fs`, `tokio::process`, `tokio::io`, never their
//! `std` counterparts inside an `async fn`.
//!
//! Blocking calls are fine in plain functions that run before the runtime
//! (config loading) and in test modules.

use parley_architectural_enforcement::{
    report, rust_files, FnKind, SourceFile, Violation, PRODUCTION_DIRS,
};

/// Patterns forbidden inside an `async fn`
const ASYNC_FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O in async fn"),
    ("std::io::stdin()", "Blocking stdin in async fn"),
    ("std::io::stdout()", "Blocking stdout in async fn"),
    (".blocking_lock()", "Blocking mutex acquisition in async fn"),
    (".blocking_recv()", "Blocking channel receive in async fn"),
    (".blocking_send(", "Blocking channel send in async fn"),
];

/// Patterns forbidden anywhere in production code
const ALWAYS_FORBIDDEN: &[(&str, &str)] = &[
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process spawn"),
    ("block_on(", "Nested runtime block_on"),
];

fn scan(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (idx, code) in file.production_code() {
        for (pattern, reason) in ALWAYS_FORBIDDEN {
            if code.contains(pattern) {
                violations.push(file.violation(idx, reason));
            }
        }
        if file.enclosing_fn(idx) != Some(FnKind::Async) {
            continue;
        }
        for (pattern, reason) in ASYNC_FORBIDDEN {
            if code.contains(pattern) {
                violations.push(file.violation(idx, reason));
            }
        }
    }
    violations
}

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations: Vec<Violation> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| rust_files(dir))
        .filter_map(|path| SourceFile::load(&path))
        .flat_map(|file| scan(&file))
        .collect();

    assert!(
        violations.is_empty(),
        "{}",
        report(
            "Blocking I/O found in async production code",
            &violations,
            &[
                "tokio::fs instead of std::fs",
                "tokio::process::Command instead of std::process::Command",
                "tokio::io::stdin()/stdout() instead of std::io",
                "move blocking setup into a plain fn that runs before the runtime",
            ],
        )
    );
}

#[test]
fn test_detector_flags_std_fs_in_async_fn() {
    let file = SourceFile::from_source(
        std::path::Path::new("bad.rs"),
        "pub async fn load() {\n    let s = std::fs::read_to_string(\"a\");\n}\n",
    );
    let violations = scan(&file);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].line, 2);
}

#[test]
fn test_detector_allows_std_fs_in_plain_fn() {
    let file = SourceFile::from_source(
        std::path::Path::new("ok.rs"),
        "pub fn load() {\n    let s = std::fs::read_to_string(\"a\");\n}\n",
    );
    assert!(scan(&file).is_empty());
}

#[test]
fn test_detector_ignores_test_module() {
    let file = SourceFile::from_source(
        std::path::Path::new("ok.rs"),
        "fn a() {}\n#[cfg(test)]\nmod tests {\n    async fn t() { std::process::Command::new(\"x\"); }\n}\n",
    );
    assert!(scan(&file).is_empty());
}
