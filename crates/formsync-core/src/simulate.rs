//! Seeded client simulation
//!
//! Drives the demo form from many simulated clients at once and checks the
//! protocol guarantees on every answer:
//! - a retransmitted request gets the byte-identical memoized response
//! - a retry or an out-of-window sequence never mutates the document
//! - of two racing requests exactly one is processed
//! - keep-alives never touch the document

use crate::config::EngineConfig;
use crate::demo;
use crate::engine::Engine;
use crate::request::{ClientEvent, Request};
use crate::response::{Response, ResponseKind};
use formsync_control::{ControlTree, EffectiveId};
use formsync_diff::Instruction;
use formsync_session::DocumentKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::sync::{Arc, Barrier};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Concurrently simulated documents
    pub documents: usize,
    /// Requests per document
    pub requests: u64,
    /// Probability that a client retransmits its previous request
    pub retry_rate: f64,
    /// Stop a document's run at its first violation
    pub stop_on_first_violation: bool,
    /// Engine settings
    pub engine: EngineConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            documents: 8,
            requests: 200,
            retry_rate: 0.1,
            stop_on_first_violation: false,
            engine: EngineConfig::default(),
        }
    }
}

/// A broken guarantee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Document could not be created
    Setup(String),
    /// Response of an unexpected shape
    UnexpectedResponse {
        /// Document key
        document: String,
        /// Request sequence number
        sequence: u64,
        /// What the client expected
        expected: &'static str,
        /// Kind received
        got: ResponseKind,
        /// Status received
        status: u16,
    },
    /// Replayed body differs from the original
    ReplayMismatch {
        /// Document key
        document: String,
        /// Request sequence number
        sequence: u64,
    },
    /// A request that must not mutate the document did
    UnexpectedMutation {
        /// Document key
        document: String,
        /// Request sequence number
        sequence: u64,
    },
    /// Two racing requests were both processed, or neither
    RaceOutcome {
        /// Document key
        document: String,
        /// Kinds received by the two requests
        kinds: [ResponseKind; 2],
    },
}

/// Simulation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Requests sent
    pub requests: u64,
    /// Requests processed and answered incrementally
    pub processed: u64,
    /// Memoized responses replayed
    pub replays: u64,
    /// Requests answered with the retry status
    pub busy: u64,
    /// Out-of-window sequence numbers rejected
    pub rejected_sequences: u64,
    /// Keep-alives answered
    pub heartbeats: u64,
    /// Full-update fragments received
    pub full_updates: u64,
    /// Replace-all submissions completed
    pub submissions: u64,
    /// Racing request pairs sent
    pub races: u64,
}

impl SimulatorStats {
    fn absorb(&mut self, other: &Self) {
        self.requests += other.requests;
        self.processed += other.processed;
        self.replays += other.replays;
        self.busy += other.busy;
        self.rejected_sequences += other.rejected_sequences;
        self.heartbeats += other.heartbeats;
        self.full_updates += other.full_updates;
        self.submissions += other.submissions;
        self.races += other.races;
    }
}

/// Simulation outcome
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Aggregated counters
    pub stats: SimulatorStats,
    /// Every broken guarantee
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether no guarantee was broken
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let stats = &self.stats;

        report.push_str("=== formsync Simulator Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Documents: {}", self.config.documents);
        let _ = writeln!(report, "Requests Sent: {}", stats.requests);
        let _ = writeln!(report, "Processed: {}", stats.processed);
        let _ = writeln!(report, "Replayed: {}", stats.replays);
        let _ = writeln!(report, "Busy (retry later): {}", stats.busy);
        let _ = writeln!(report, "Rejected Sequences: {}", stats.rejected_sequences);
        let _ = writeln!(report, "Heartbeats: {}", stats.heartbeats);
        let _ = writeln!(report, "Full Updates: {}", stats.full_updates);
        let _ = writeln!(report, "Submissions: {}", stats.submissions);
        let _ = writeln!(report, "Races: {}", stats.races);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, violation) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {violation:?}", i + 1);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

/// Run the simulation, one blocking task per document
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let engine = Arc::new(
        Engine::builder(config.engine.clone())
            .with_dispatcher(Arc::new(demo::dispatcher()))
            .build(),
    );
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();

    match demo::definition() {
        Ok(definition) => {
            engine.register_form(demo::FORM_ID, definition);
        }
        Err(err) => {
            violations.push(Violation::Setup(err.to_string()));
            return SimulatorReport {
                config,
                stats,
                violations,
            };
        }
    }

    let tasks: Vec<_> = (0..config.documents)
        .map(|index| {
            let engine = Arc::clone(&engine);
            let config = config.clone();
            tokio::task::spawn_blocking(move || {
                let mut client = Client::open(&engine, &config, index);
                client.run();
                (client.stats, client.violations)
            })
        })
        .collect();

    for task in tasks {
        match task.await {
            Ok((client_stats, client_violations)) => {
                stats.absorb(&client_stats);
                violations.extend(client_violations);
            }
            Err(err) => violations.push(Violation::Setup(format!("client task failed: {err}"))),
        }
    }

    tracing::info!(requests = stats.requests, violations = violations.len(), "Simulation finished");
    SimulatorReport {
        config,
        stats,
        violations,
    }
}

/// One simulated browser tab
struct Client<'a> {
    engine: &'a Engine,
    config: &'a SimulatorConfig,
    rng: StdRng,
    key: Option<DocumentKey>,
    sequence: u64,
    items: usize,
    last: Option<(Request, Response)>,
    stats: SimulatorStats,
    violations: Vec<Violation>,
}

impl<'a> Client<'a> {
    fn open(engine: &'a Engine, config: &'a SimulatorConfig, index: usize) -> Self {
        let mut client = Self {
            engine,
            config,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(index as u64)),
            key: None,
            sequence: 1,
            items: 2,
            last: None,
            stats: SimulatorStats::default(),
            violations: Vec::new(),
        };
        match engine.open_document(&format!("session-{index}"), demo::FORM_ID, |b| {
            demo::build(b, "", &["first", "second"])
        }) {
            Ok(key) => client.key = Some(key),
            Err(err) => client.violations.push(Violation::Setup(err.to_string())),
        }
        client
    }

    fn run(&mut self) {
        let Some(key) = self.key.clone() else {
            return;
        };
        for _ in 0..self.config.requests {
            if self.config.stop_on_first_violation && !self.violations.is_empty() {
                break;
            }
            let roll: f64 = self.rng.random();
            if roll < self.config.retry_rate && self.last.is_some() {
                self.retransmit(&key);
            } else if roll < self.config.retry_rate + 0.05 {
                self.out_of_window(&key);
            } else if roll < self.config.retry_rate + 0.10 {
                self.heartbeat(&key);
            } else if roll < self.config.retry_rate + 0.15 {
                self.race(&key);
            } else {
                let request = self.next_request(&key);
                self.send(request);
            }
        }
        self.engine.close_document(&key);
    }

    fn next_request(&mut self, key: &DocumentKey) -> Request {
        let event = match self.rng.random_range(0..10) {
            0..=3 if self.items > 0 => ClientEvent::ValueChanged {
                target: EffectiveId::with_iterations(
                    demo::ITEM,
                    &[self.rng.random_range(1..=u32::try_from(self.items).unwrap_or(u32::MAX))],
                ),
                value: format!("item-{}", self.rng.random::<u16>()),
            },
            0..=4 => ClientEvent::ValueChanged {
                target: EffectiveId::new(demo::NAME),
                value: format!("name-{}", self.rng.random::<u16>()),
            },
            5 | 6 => {
                self.items += 1;
                ClientEvent::custom("add-item").with_property("value", format!("new-{}", self.items))
            }
            7 => {
                self.items = self.items.saturating_sub(1);
                ClientEvent::custom("remove-item")
            }
            8 => ClientEvent::custom("rename-group").with_property("title", format!("Items {}", self.sequence)),
            _ => ClientEvent::Activate {
                target: EffectiveId::new(demo::SAVE),
            },
        };
        Request::new(key.clone(), self.sequence).with_event(event)
    }

    /// Send a request that must be processed, plus the submission pass it
    /// asks for
    fn send(&mut self, request: Request) {
        let response = self.engine.handle(&request);
        self.stats.requests += 1;
        if response.kind() != ResponseKind::Incremental {
            self.violation_unexpected(&request, "incremental", &response);
            return;
        }
        self.stats.processed += 1;
        self.sequence += 1;

        let submission_required = match response.event_response() {
            Ok(body) => {
                self.stats.full_updates += body
                    .control_values
                    .iter()
                    .filter(|instruction| matches!(instruction, Instruction::InnerHtml { .. }))
                    .count() as u64;
                body.actions.server_events.iter().any(|event| event.name == "submission")
            }
            Err(_) => {
                self.violation_unexpected(&request, "event response body", &response);
                false
            }
        };
        self.last = Some((request.clone(), response));

        if submission_required {
            let pass = Request::new(request.document.clone(), self.sequence)
                .with_server_event(ClientEvent::custom("submission"))
                .with_submission_pass();
            let response = self.engine.handle(&pass);
            self.stats.requests += 1;
            if response.kind() == ResponseKind::NoOp {
                self.stats.submissions += 1;
                self.sequence += 1;
                self.last = Some((pass, response));
            } else {
                self.violation_unexpected(&pass, "no-op", &response);
            }
        }
    }

    fn retransmit(&mut self, key: &DocumentKey) {
        let Some((request, original)) = self.last.clone() else {
            return;
        };
        let before = self.snapshot(key);
        let response = self.engine.handle(&request);
        self.stats.requests += 1;

        if response.kind() != ResponseKind::Replay {
            self.violation_unexpected(&request, "replay", &response);
            return;
        }
        self.stats.replays += 1;
        if response.body() != original.body() {
            self.violations.push(Violation::ReplayMismatch {
                document: key.to_string(),
                sequence: request.sequence,
            });
        }
        self.check_unchanged(key, before, request.sequence);
    }

    fn out_of_window(&mut self, key: &DocumentKey) {
        let before = self.snapshot(key);
        let request = Request::new(key.clone(), self.sequence + 5).with_event(ClientEvent::ValueChanged {
            target: EffectiveId::new(demo::NAME),
            value: "never applied".to_string(),
        });
        let response = self.engine.handle(&request);
        self.stats.requests += 1;

        if response.status() == 400 {
            self.stats.rejected_sequences += 1;
        } else {
            self.violation_unexpected(&request, "sequence violation", &response);
        }
        self.check_unchanged(key, before, request.sequence);
    }

    fn heartbeat(&mut self, key: &DocumentKey) {
        let before = self.snapshot(key);
        let request = Request::new(key.clone(), self.sequence).with_event(ClientEvent::Heartbeat);
        let response = self.engine.handle(&request);
        self.stats.requests += 1;

        if response.kind() == ResponseKind::Heartbeat {
            self.stats.heartbeats += 1;
        } else {
            self.violation_unexpected(&request, "heartbeat", &response);
        }
        self.check_unchanged(key, before, request.sequence);
    }

    /// Send the same request from two threads at once
    fn race(&mut self, key: &DocumentKey) {
        let request = Request::new(key.clone(), self.sequence).with_event(ClientEvent::ValueChanged {
            target: EffectiveId::new(demo::NAME),
            value: format!("race-{}", self.sequence),
        });
        let barrier = Barrier::new(2);
        let engine = self.engine;
        let (first, second) = std::thread::scope(|scope| {
            let first = scope.spawn(|| {
                barrier.wait();
                engine.handle(&request)
            });
            let second = scope.spawn(|| {
                barrier.wait();
                engine.handle(&request)
            });
            (first.join().ok(), second.join().ok())
        });
        self.stats.requests += 2;
        self.stats.races += 1;

        let kinds = [first, second].map(|response| response.map_or(ResponseKind::Error, |r| r.kind()));
        let processed = kinds.iter().filter(|kind| **kind == ResponseKind::Incremental).count();
        let other_ok = kinds
            .iter()
            .all(|kind| matches!(kind, ResponseKind::Incremental | ResponseKind::Retry | ResponseKind::Replay));
        if processed != 1 || !other_ok {
            self.violations.push(Violation::RaceOutcome {
                document: key.to_string(),
                kinds,
            });
            return;
        }
        self.stats.processed += 1;
        if kinds.contains(&ResponseKind::Retry) {
            self.stats.busy += 1;
        } else {
            self.stats.replays += 1;
        }
        self.sequence += 1;
        self.last = None;
    }

    fn snapshot(&self, key: &DocumentKey) -> Option<ControlTree> {
        self.engine.snapshot(key).ok()
    }

    fn check_unchanged(&mut self, key: &DocumentKey, before: Option<ControlTree>, sequence: u64) {
        if before != self.snapshot(key) {
            self.violations.push(Violation::UnexpectedMutation {
                document: key.to_string(),
                sequence,
            });
        }
    }

    fn violation_unexpected(&mut self, request: &Request, expected: &'static str, response: &Response) {
        tracing::warn!(
            document = %request.document,
            sequence = request.sequence,
            expected,
            got = ?response.kind(),
            "Unexpected response"
        );
        self.violations.push(Violation::UnexpectedResponse {
            document: request.document.to_string(),
            sequence: request.sequence,
            expected,
            got: response.kind(),
            status: response.status(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_simulation_passes() {
        let report = run_simulator(SimulatorConfig {
            documents: 3,
            requests: 60,
            ..SimulatorConfig::default()
        })
        .await;
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.processed > 0);
        assert!(report.generate_text().contains("Result: PASS"));
    }
}
