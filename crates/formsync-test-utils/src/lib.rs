//! Testing utilities for the formsync workspace
//!
//! Fixtures built on the demo form, plus helpers for picking apart
//! comparator output and simulating broken client connections.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use formsync_control::{ControlTree, FormDefinition};
use formsync_core::{demo, Engine, EngineConfig, Request, Response};
use formsync_diff::{ControlDiff, Instruction};
use formsync_session::DocumentKey;
use std::io::{self, Write};
use std::sync::Arc;

/// Demo form snapshot: name field `c1` and one `v` per item in repeat `r1`
pub fn sample_form(name: &str, items: &[&str]) -> ControlTree {
    demo::tree(name, items).expect("demo form has unique ids")
}

/// Demo form definition with its recorded markup
pub fn sample_definition() -> FormDefinition {
    demo::definition().expect("demo markup is well formed")
}

/// Control diffs in instruction order, skipping template and index operations
pub fn control_diffs(instructions: &[Instruction]) -> Vec<&ControlDiff> {
    instructions.iter().filter_map(Instruction::as_control).collect()
}

/// Engine with the demo form registered and its handlers installed
pub fn demo_engine(config: EngineConfig) -> Engine {
    let engine = Engine::builder(config)
        .with_dispatcher(Arc::new(demo::dispatcher()))
        .build();
    engine.register_form(demo::FORM_ID, sample_definition());
    engine
}

/// Open a demo document and return its key
pub fn open_demo(engine: &Engine, session: &str, name: &str, items: &[&str]) -> DocumentKey {
    engine
        .open_document(session, demo::FORM_ID, |b| demo::build(b, name, items))
        .expect("demo document opens")
}

/// Value of a control in the engine's current snapshot
pub fn value_of(engine: &Engine, key: &DocumentKey, id: &str) -> Option<String> {
    let snapshot = engine.snapshot(key).expect("document is live");
    let id = id.parse().expect("valid effective id");
    snapshot.find(&id).and_then(|node| node.core().value()).map(str::to_string)
}

/// Send a request and assert it was answered successfully
pub fn expect_success(engine: &Engine, request: &Request) -> Response {
    let response = engine.handle(request);
    assert!(
        response.is_success(),
        "request {} failed with {}: {}",
        request.sequence,
        response.status(),
        String::from_utf8_lossy(response.body())
    );
    response
}

/// Writer whose connection is already closed
#[derive(Debug, Default)]
pub struct ClosedConnection {
    pub attempts: usize,
}

impl Write for ClosedConnection {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        self.attempts += 1;
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
