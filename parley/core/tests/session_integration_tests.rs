//! Integration tests for the session manager
//!
//! These tests drive the public façade with a scripted generation service,
//! a recording sink and a hand-driven clock. They cover:
//! - The full sink transcript of a turn
//! - Error rendering and credential redaction
//! - Capacity and idle-timeout eviction
//! - Busy rejection and cancellation of in-flight turns
//! - Independent concurrent sessions
//! - Configuration feeding the manager

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use tokio::sync::Notify;

use parley_core::backend::{Script, ScriptedService};
use parley_core::config::load_config_from_path;
use parley_core::{
    sanitize, ManagerSettings, ManualClock, RecordingSink, SessionError, SessionId,
    SessionManager, SinkHandle, SinkOp, StreamFailure, StreamMessage, TurnOutcome,
    DEFAULT_SESSION_TIMEOUT,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    manager: SessionManager,
    sink: Arc<RecordingSink>,
    service: Arc<ScriptedService>,
    clock: ManualClock,
}

fn harness_with(settings: ManagerSettings, scripts: Vec<Script>) -> Harness {
    let clock = ManualClock::new();
    let sink = Arc::new(RecordingSink::new());
    let service = Arc::new(ScriptedService::new(scripts));
    let manager = SessionManager::with_settings(
        service.clone(),
        sink.clone(),
        settings,
        Arc::new(clock.clone()),
    );
    Harness {
        manager,
        sink,
        service,
        clock,
    }
}

fn harness(scripts: Vec<Script>) -> Harness {
    harness_with(ManagerSettings::default(), scripts)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Flatten sink operations into the line sequence they wrote, marking
/// overwrites the way a reader of the transcript would
fn transcript(ops: &[SinkOp]) -> Vec<String> {
    let mut out = Vec::new();
    for op in ops {
        match op {
            SinkOp::AppendLines { lines, .. } => out.extend(lines.iter().cloned()),
            SinkOp::OverwriteLastLine { line, .. } => out.push(format!("(overwrite){line}")),
        }
    }
    out
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Test 1: End-to-End Transcript
// =============================================================================

#[tokio::test]
async fn test_end_to_end_turn_transcript() {
    let h = harness(vec![Script::reply("Hello!", 15, 8)]);
    let id = h
        .manager
        .create_session(SinkHandle(1), Some("sonnet"))
        .unwrap();

    let report = h.manager.send(id, "Say hello").await.unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);

    assert_eq!(
        transcript(&h.sink.ops()),
        strings(&[
            "",
            "Claude is thinking...",
            "(overwrite)Claude:",
            "Hello!",
            "",
            "[Tokens used: 15 input, 8 output]",
            "",
            "---",
            "",
        ])
    );
    assert_eq!(
        h.sink.rendered(SinkHandle(1)),
        strings(&[
            "",
            "Claude:",
            "Hello!",
            "",
            "[Tokens used: 15 input, 8 output]",
            "",
            "---",
            "",
        ])
    );

    let requests = h.service.requests();
    assert_eq!(requests[0].model, "sonnet");
    assert_eq!(requests[0].prompt, "Say hello");
}

#[tokio::test]
async fn test_multi_line_fragments_rendered_verbatim() {
    let h = harness(vec![Script::items(vec![
        Ok(StreamMessage::assistant_text("fn main() {\n")),
        Ok(StreamMessage::assistant_text("    println!(\"hi\");\n\n}\n")),
        Ok(StreamMessage::result()),
    ])]);
    let id = h.manager.create_session(SinkHandle(2), None).unwrap();
    h.manager.send(id, "code please").await.unwrap();

    assert_eq!(
        h.sink.rendered(SinkHandle(2)),
        strings(&[
            "",
            "Claude:",
            "fn main() {",
            "    println!(\"hi\");",
            "",
            "}",
            "",
            "---",
            "",
        ])
    );
}

// =============================================================================
// Test 2: Error Path
// =============================================================================

#[tokio::test]
async fn test_stream_failure_rendered_without_credentials() {
    let raw = "401 Unauthorized: invalid API key, bearer token expired";
    let h = harness(vec![Script::items(vec![
        Ok(StreamMessage::assistant_text("Working on it")),
        Err(StreamFailure::service(raw)),
    ])]);
    let id = h.manager.create_session(SinkHandle(1), None).unwrap();

    let report = h.manager.send(id, "hi").await.unwrap();
    assert_eq!(report.outcome, TurnOutcome::Failed(sanitize(raw)));

    let rendered = h.sink.rendered(SinkHandle(1));
    let error_line = rendered
        .iter()
        .find(|l| l.starts_with("Error: "))
        .expect("error line rendered");
    for word in ["API key", "bearer", "token"] {
        assert!(!error_line.contains(word), "{word} leaked: {error_line}");
    }
    assert_eq!(rendered.last().map(String::as_str), Some(""));

    // Session survives and accepts another send
    assert!(h.manager.get_session_info(id).unwrap().active);
    assert!(!h.manager.get_session_info(id).unwrap().busy);
}

#[tokio::test]
async fn test_service_unavailable_rendered() {
    let h = harness(vec![Script::open_failure(StreamFailure::Spawn(
        "claude: command not found".to_string(),
    ))]);
    let id = h.manager.create_session(SinkHandle(1), None).unwrap();

    let report = h.manager.send(id, "hi").await.unwrap();
    assert!(matches!(report.outcome, TurnOutcome::Failed(_)));
    assert_eq!(
        transcript(&h.sink.ops()),
        strings(&[
            "",
            "Claude is thinking...",
            "(overwrite)",
            "Error: failed to start generation service: claude: command not found",
            "",
        ])
    );
}

// =============================================================================
// Test 3: Capacity and Eviction
// =============================================================================

#[tokio::test]
async fn test_capacity_holds_across_create_and_end() {
    let h = harness(Vec::new());
    let mut live: Vec<SessionId> = Vec::new();

    for round in 0u64..40 {
        if round % 3 == 2 {
            if let Some(id) = live.pop() {
                h.manager.end_session(id);
            }
        }
        match h.manager.create_session(SinkHandle(round), None) {
            Ok(id) => live.push(id),
            Err(err) => assert_eq!(err, SessionError::CapacityExceeded { max: 10 }),
        }
        assert!(h.manager.list_sessions().len() <= 10);
    }
    assert_eq!(h.manager.list_sessions().len(), 10);
}

#[tokio::test]
async fn test_idle_timeout_evicts_current_session() {
    let h = harness(Vec::new());
    let stale = h.manager.create_session(SinkHandle(1), None).unwrap();
    assert_eq!(h.manager.current_session(), Some(stale));

    h.clock
        .advance(DEFAULT_SESSION_TIMEOUT + Duration::from_secs(1));
    assert_eq!(h.manager.current_session(), Some(stale));

    let fresh = h.manager.create_session(SinkHandle(2), None).unwrap();
    assert!(h.manager.get_session_info(stale).is_none());
    assert_eq!(h.manager.current_session(), Some(fresh));
    assert_eq!(h.manager.list_sessions(), vec![fresh]);
}

#[tokio::test]
async fn test_evicted_current_leaves_no_current() {
    let h = harness(Vec::new());
    let a = h.manager.create_session(SinkHandle(1), None).unwrap();
    let b = h.manager.create_session(SinkHandle(2), None).unwrap();
    assert_eq!(h.manager.current_session(), Some(b));

    // Switching the model counts as activity on a; b stays untouched
    h.clock.advance(Duration::from_secs(20 * 60));
    h.manager.switch_model(a, "opus").await.unwrap();
    h.clock.advance(Duration::from_secs(15 * 60));

    assert_eq!(h.manager.evict_expired(), vec![b]);
    assert_eq!(h.manager.current_session(), None);
    assert!(h.manager.get_session_info(a).is_some());
}

#[tokio::test]
async fn test_full_store_recovers_after_timeout() {
    let settings = ManagerSettings {
        max_sessions: 2,
        ..ManagerSettings::default()
    };
    let h = harness_with(settings, Vec::new());
    h.manager.create_session(SinkHandle(1), None).unwrap();
    h.manager.create_session(SinkHandle(2), None).unwrap();
    assert_eq!(
        h.manager.create_session(SinkHandle(3), None),
        Err(SessionError::CapacityExceeded { max: 2 })
    );

    h.clock
        .advance(DEFAULT_SESSION_TIMEOUT + Duration::from_millis(1));
    assert!(h.manager.create_session(SinkHandle(3), None).is_ok());
    assert_eq!(h.manager.list_sessions().len(), 1);
}

// =============================================================================
// Test 4: Busy Rejection and Cancellation
// =============================================================================

#[tokio::test]
async fn test_second_send_rejected_while_streaming() {
    let gate = Arc::new(Notify::new());
    let h = harness(vec![
        Script::reply("first", 1, 1).gated(gate.clone()),
        Script::reply("second", 1, 1),
    ]);
    let id = h.manager.create_session(SinkHandle(1), None).unwrap();

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.send(id, "one").await });
    wait_until(|| h.manager.get_session_info(id).is_some_and(|s| s.busy)).await;

    assert_eq!(
        h.manager.send(id, "two").await.unwrap_err(),
        SessionError::Busy(id)
    );

    gate.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);
    assert_eq!(h.service.requests().len(), 1);

    // One complete turn, nothing from the rejected send
    let rendered = h.sink.rendered(SinkHandle(1));
    assert_eq!(rendered.iter().filter(|l| l.as_str() == "---").count(), 1);

    // The slot is free again
    let report = h.manager.send(id, "two").await.unwrap();
    assert_eq!(report.outcome, TurnOutcome::Completed);
}

#[tokio::test]
async fn test_switch_model_during_turn_skips_notice() {
    let gate = Arc::new(Notify::new());
    let h = harness(vec![
        Script::reply("first", 1, 1).gated(gate.clone()),
        Script::reply("second", 1, 1),
    ]);
    let id = h.manager.create_session(SinkHandle(1), None).unwrap();

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.send(id, "one").await });
    wait_until(|| h.manager.get_session_info(id).is_some_and(|s| s.busy)).await;

    h.manager.switch_model(id, "opus").await.unwrap();
    gate.notify_one();
    first.await.unwrap().unwrap();

    assert!(!h
        .sink
        .rendered(SinkHandle(1))
        .iter()
        .any(|l| l.starts_with("Switched to model")));

    h.manager.send(id, "two").await.unwrap();
    let models: Vec<String> = h.service.requests().into_iter().map(|r| r.model).collect();
    assert_eq!(models, strings(&["sonnet", "opus"]));
}

#[tokio::test]
async fn test_end_session_mid_turn_suppresses_writes() {
    let h = harness(vec![Script::items(vec![Ok(StreamMessage::assistant_text(
        "partial answer",
    ))])
    .held_open()]);
    let id = h.manager.create_session(SinkHandle(1), None).unwrap();

    let manager = h.manager.clone();
    let turn = tokio::spawn(async move { manager.send(id, "long question").await });
    wait_until(|| {
        h.manager
            .get_session_info(id)
            .is_some_and(|s| s.history.len() == 1)
    })
    .await;

    let before = h.sink.ops();
    assert!(h.manager.end_session(id));

    let report = turn.await.unwrap().unwrap();
    assert_eq!(report.outcome, TurnOutcome::Cancelled);
    assert_eq!(h.sink.ops(), before);
    assert_eq!(h.manager.current_session(), None);
    assert_eq!(
        h.manager.send(id, "again").await.unwrap_err(),
        SessionError::NotFound(id)
    );
}

// =============================================================================
// Test 5: Concurrent Sessions
// =============================================================================

#[tokio::test]
async fn test_two_sessions_stream_independently() {
    let gate_a = Arc::new(Notify::new());
    let gate_b = Arc::new(Notify::new());
    let h = harness(vec![
        Script::reply("from a", 1, 2).gated(gate_a.clone()),
        Script::reply("from b", 3, 4).gated(gate_b.clone()),
    ]);
    let a = h.manager.create_session(SinkHandle(10), None).unwrap();
    let b = h.manager.create_session(SinkHandle(20), Some("opus")).unwrap();

    let ma = h.manager.clone();
    let ta = tokio::spawn(async move { ma.send(a, "a?").await });
    wait_until(|| h.service.requests().len() == 1).await;
    let mb = h.manager.clone();
    let tb = tokio::spawn(async move { mb.send(b, "b?").await });
    wait_until(|| h.service.requests().len() == 2).await;

    // b finishes first even though a started first
    gate_b.notify_one();
    assert_eq!(tb.await.unwrap().unwrap().outcome, TurnOutcome::Completed);
    assert!(h.manager.get_session_info(a).unwrap().busy);

    gate_a.notify_one();
    assert_eq!(ta.await.unwrap().unwrap().outcome, TurnOutcome::Completed);

    assert_eq!(
        h.sink.rendered(SinkHandle(10)),
        strings(&["", "Claude:", "from a", "", "[Tokens used: 1 input, 2 output]", "", "---", ""])
    );
    assert_eq!(
        h.sink.rendered(SinkHandle(20)),
        strings(&["", "Claude:", "from b", "", "[Tokens used: 3 input, 4 output]", "", "---", ""])
    );
}

// =============================================================================
// Test 6: Configuration Feeds the Manager
// =============================================================================

#[tokio::test]
async fn test_config_file_limits_sessions() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[sessions]\nmax_sessions = 1\n\n[model]\ndefault = \"haiku\"").unwrap();
    file.flush().unwrap();

    let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
    let h = harness_with(config.manager_settings(), Vec::new());

    let id = h.manager.create_session(SinkHandle(1), None).unwrap();
    assert!(h.manager.create_session(SinkHandle(2), None).is_err());
    assert_eq!(
        h.manager.get_session_info(id).unwrap().model,
        config.default_model
    );
}
