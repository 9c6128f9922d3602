//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Nothing sleeps. Not production code, not unit tests, not
//! integration tests.
//!
//! Production code waits on channels, cancellation tokens and process I/O.
//! Tests drive time with `ManualClock` and wait for state with
//! `tokio::task::yield_now`, `Notify` gates or channel receives.

use parley_architectural_enforcement::{
    report, rust_files, SourceFile, Violation, PRODUCTION_DIRS, TEST_DIRS,
};

fn is_sleep(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

fn scan(file: &SourceFile) -> Vec<Violation> {
    file.all_code()
        .filter(|(_, code)| is_sleep(code))
        .map(|(idx, _)| file.violation(idx, "Sleep call"))
        .collect()
}

#[test]
fn test_no_sleep_anywhere() {
    let violations: Vec<Violation> = PRODUCTION_DIRS
        .iter()
        .chain(TEST_DIRS)
        .flat_map(|dir| rust_files(dir))
        .filter_map(|path| SourceFile::load(&path))
        .flat_map(|file| scan(&file))
        .collect();

    assert!(
        violations.is_empty(),
        "{}",
        report(
            "Sleep calls found",
            &violations,
            &[
                "advance a ManualClock instead of waiting for real time",
                "await the event itself (channel, Notify, CancellationToken)",
                "use tokio::time::interval for periodic work",
            ],
        )
    );
}

#[test]
fn test_detector_flags_tokio_and_thread_sleep() {
    assert!(is_sleep("tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep("std::thread::sleep(d);"));
    assert!(!is_sleep("clock.advance(Duration::from_secs(1));"));
}

#[test]
fn test_detector_ignores_comments() {
    let file = SourceFile::from_source(
        std::path::Path::new("ok.rs"),
        "// never tokio::time::sleep(d) here\nfn a() {}\n",
    );
    assert!(scan(&file).is_empty());
}
