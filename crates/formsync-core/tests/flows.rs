//! Request flows beyond plain value changes: keep-alives, all-events
//! refreshes, deferred submissions, expiry and broken connections

use formsync_control::EffectiveId;
use formsync_core::{demo, ClientEvent, DispatchError, Engine, EngineConfig, Request, ResponseKind, SubmissionRunner};
use formsync_diff::Instruction;
use formsync_session::{DeferredSubmission, DocumentKey};
use formsync_test_utils::{
    control_diffs, demo_engine, expect_success, open_demo, sample_definition, value_of, ClosedConnection,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

/// Submission runner that records bodies and optionally rejects them
#[derive(Debug, Default)]
struct Recorder {
    bodies: Mutex<Vec<String>>,
    reject: bool,
}

impl SubmissionRunner for Recorder {
    fn run(&self, _: &DocumentKey, submission: &DeferredSubmission) -> Result<(), DispatchError> {
        self.bodies.lock().unwrap().push(submission.body.clone());
        if self.reject {
            return Err(DispatchError::Submission {
                id: submission.id.clone(),
                reason: "target unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn set(target: &str, value: &str) -> ClientEvent {
    ClientEvent::ValueChanged {
        target: target.parse().unwrap(),
        value: value.to_string(),
    }
}

fn engine_with(runner: Arc<Recorder>) -> Engine {
    let engine = Engine::builder(EngineConfig::default())
        .with_dispatcher(Arc::new(demo::dispatcher()))
        .with_submission_runner(runner)
        .build();
    engine.register_form(demo::FORM_ID, sample_definition());
    engine
}

#[test]
fn heartbeat_skips_lock_and_sequence() {
    let engine = demo_engine(EngineConfig::default());
    let key = open_demo(&engine, "s1", "a", &["x"]);
    let slot = engine.registry().get(&key).unwrap();
    let _guard = slot.acquire(formsync_session::LockWait::Immediate).unwrap();

    let response = engine.handle(&Request::new(key.clone(), 99).with_event(ClientEvent::Heartbeat));
    assert_eq!(response.kind(), ResponseKind::Heartbeat);
    assert_eq!(response.body(), b"{}");

    let progress = Request::new(key, 99).with_event(ClientEvent::UploadProgress {
        target: EffectiveId::new(demo::NAME),
    });
    assert_eq!(engine.handle(&progress).kind(), ResponseKind::Heartbeat);
}

#[test]
fn heartbeat_for_unknown_document_reports_expiry() {
    let engine = demo_engine(EngineConfig::default());
    let response = engine.handle(&Request::new(DocumentKey::generate("s1"), 1).with_event(ClientEvent::Heartbeat));
    assert_eq!(response.kind(), ResponseKind::SessionExpired);
    assert_eq!(response.status(), 410);
}

#[test]
fn all_events_diffs_against_initial_snapshot() {
    let engine = demo_engine(EngineConfig::default());
    let key = open_demo(&engine, "s1", "a", &["x"]);
    expect_success(&engine, &Request::new(key.clone(), 1).with_event(set("c1", "b")));
    expect_success(&engine, &Request::new(key.clone(), 2).with_event(set("v·1", "w")));

    let response = expect_success(&engine, &Request::new(key, 3).with_all_events());
    assert_eq!(response.kind(), ResponseKind::AllEvents);
    let body = response.event_response().unwrap();
    let mut changed: Vec<(String, Option<String>)> = control_diffs(&body.control_values)
        .into_iter()
        .map(|diff| (diff.id.to_string(), diff.value.clone()))
        .collect();
    changed.sort();
    assert_eq!(
        changed,
        vec![
            ("c1".to_string(), Some("b".to_string())),
            ("v·1".to_string(), Some("w".to_string())),
        ]
    );
}

#[test]
fn deferred_submission_runs_after_no_op_answer() {
    let runner = Arc::new(Recorder::default());
    let engine = engine_with(Arc::clone(&runner));
    let key = open_demo(&engine, "s1", "a", &["x", "y"]);

    let save = Request::new(key.clone(), 1).with_event(ClientEvent::Activate {
        target: EffectiveId::new(demo::SAVE),
    });
    let body = expect_success(&engine, &save).event_response().unwrap();
    assert!(body.actions.server_events.iter().any(|event| event.name == "submission"));
    assert!(runner.bodies.lock().unwrap().is_empty());

    let pass = Request::new(key.clone(), 2)
        .with_server_event(ClientEvent::custom("submission"))
        .with_submission_pass();
    let response = expect_success(&engine, &pass);
    assert_eq!(response.kind(), ResponseKind::NoOp);
    assert_eq!(response.event_response().unwrap(), Default::default());
    assert_eq!(*runner.bodies.lock().unwrap(), vec!["x\ny".to_string()]);

    // Retransmitted second pass replays without submitting again
    assert_eq!(engine.handle(&pass).kind(), ResponseKind::Replay);
    assert_eq!(runner.bodies.lock().unwrap().len(), 1);
}

#[test]
fn failed_submission_is_reported_on_next_response() {
    let runner = Arc::new(Recorder {
        reject: true,
        ..Recorder::default()
    });
    let engine = engine_with(runner);
    let key = open_demo(&engine, "s1", "a", &["x"]);

    let save = Request::new(key.clone(), 1).with_event(ClientEvent::Activate {
        target: EffectiveId::new(demo::SAVE),
    });
    expect_success(&engine, &save);
    let pass = Request::new(key.clone(), 2).with_submission_pass();
    assert_eq!(expect_success(&engine, &pass).kind(), ResponseKind::NoOp);

    let body = expect_success(&engine, &Request::new(key, 3).with_event(set("c1", "b")))
        .event_response()
        .unwrap();
    assert_eq!(body.actions.errors.len(), 1);
    assert!(body.actions.errors[0].contains("target unavailable"));
}

#[test]
fn closed_document_reports_session_expired() {
    let engine = demo_engine(EngineConfig::default());
    let key = open_demo(&engine, "s1", "a", &["x"]);
    engine.close_document(&key);

    let response = engine.handle(&Request::new(key, 1).with_event(set("c1", "b")));
    assert_eq!(response.status(), 410);
    assert_eq!(response.error_document().unwrap().code, "session-expired");
}

#[test]
fn broken_connection_keeps_response_for_retry() {
    let engine = demo_engine(EngineConfig::default());
    let key = open_demo(&engine, "s1", "a", &["x"]);
    let request = Request::new(key.clone(), 1).with_event(set("c1", "b"));

    let mut connection = ClosedConnection::default();
    let sent = engine.serve(&request, &mut connection);
    assert_eq!(sent.kind(), ResponseKind::Incremental);
    assert!(connection.attempts > 0);
    assert_eq!(value_of(&engine, &key, "c1").as_deref(), Some("b"));

    let mut out = Vec::new();
    let retry = engine.serve(&request, &mut out);
    assert_eq!(retry.kind(), ResponseKind::Replay);
    assert_eq!(out, sent.body());
}

#[test]
fn structural_change_is_sent_as_full_update() {
    let engine = demo_engine(EngineConfig::default());
    let key = open_demo(&engine, "s1", "a", &["x", "y"]);

    let rename = ClientEvent::custom("rename-group").with_property("title", "Stock");
    let body = expect_success(&engine, &Request::new(key.clone(), 1).with_event(rename))
        .event_response()
        .unwrap();

    let html = body
        .control_values
        .iter()
        .find_map(|instruction| match instruction {
            Instruction::InnerHtml { id, html } if *id == EffectiveId::new(demo::GROUP) => Some(html.clone()),
            _ => None,
        })
        .unwrap();
    assert!(html.contains("Stock"));
    assert!(html.contains("add.png"));
    assert!(control_diffs(&body.control_values)
        .iter()
        .all(|diff| diff.id != EffectiveId::new(demo::TITLE)));

    // The flag is consumed: the next change is incremental again
    let body = expect_success(&engine, &Request::new(key, 2).with_event(set("title", "Stock 2")))
        .event_response()
        .unwrap();
    assert!(body
        .control_values
        .iter()
        .all(|instruction| !matches!(instruction, Instruction::InnerHtml { .. })));
}
