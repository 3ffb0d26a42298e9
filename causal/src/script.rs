//! Scripted event driver.
//!
//! A [`Script`] is an ordered list of send and receive steps that refer to
//! messages by label. [`ScriptRunner`] executes it one step at a time
//! against a [`DeliveryEngine`], binding each send's label to the id the
//! engine allocated.
//!
//! Scripts load from JSON, either as `{"name": .., "steps": [..]}` or as a
//! bare list of steps:
//!
//! ```json
//! [
//!   {"type": "send", "process": "P1", "msg_id": "m0", "content": "Hello, world!"},
//!   {"type": "receive", "process": "P2", "msg_id": "m0", "description": "P2 receives m0"}
//! ]
//! ```

use crate::engine::DeliveryEngine;
use crate::error::{CausalError, Result};
use crate::message::{Message, MessageId};
use crate::state::ReceiveOutcome;
use crate::tracing_ext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Names accepted by [`Script::builtin`].
pub const BUILTIN_SCRIPTS: [&str; 2] = ["showcase", "chat"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Send {
        process: String,
        #[serde(rename = "msg_id")]
        label: String,
        #[serde(default, alias = "content")]
        payload: Value,
    },
    Receive {
        process: String,
        #[serde(rename = "msg_id")]
        label: String,
    },
}

impl Command {
    pub fn send<P: Into<Value>>(process: &str, label: &str, payload: P) -> Self {
        Self::Send {
            process: process.to_string(),
            label: label.to_string(),
            payload: payload.into(),
        }
    }

    pub fn receive(process: &str, label: &str) -> Self {
        Self::Receive {
            process: process.to_string(),
            label: label.to_string(),
        }
    }

    pub fn process(&self) -> &str {
        match self {
            Self::Send { process, .. } | Self::Receive { process, .. } => process,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Send { label, .. } | Self::Receive { label, .. } => label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Step {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            description: None,
        }
    }

    pub fn describe<D: Into<String>>(mut self, description: D) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description for logs, falling back to a text payload or the command.
    pub fn summary(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.command {
            Command::Send {
                payload: Value::String(text),
                ..
            } => text.clone(),
            Command::Send { process, label, .. } => format!("{process} sends {label}"),
            Command::Receive { process, label } => format!("{process} receives {label}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    pub steps: Vec<Step>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptFile {
    Named(Script),
    Steps(Vec<Step>),
}

impl Script {
    pub fn new<N: Into<String>>(name: N, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Parse a script; a bare step list gets the name `custom`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(match serde_json::from_str(json)? {
            ScriptFile::Named(script) => script,
            ScriptFile::Steps(steps) => Self::new("custom", steps),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "showcase" => Some(Self::showcase()),
            "chat" => Some(Self::chat()),
            _ => None,
        }
    }

    /// Twenty steps over `P1`, `P2`, `P3` with out-of-order arrivals,
    /// concurrent sends and chains that only a drain resolves.
    pub fn showcase() -> Self {
        let send =
            |p: &str, l: &str, d: &str| Step::new(Command::send(p, l, Value::Null)).describe(d);
        let recv = |p: &str, l: &str, d: &str| Step::new(Command::receive(p, l)).describe(d);

        Self::new(
            "showcase",
            vec![
                send("P1", "m0", "P1 sends m0"),
                send("P1", "m1", "P1 sends m1"),
                recv("P2", "m1", "P2 receives m1 before m0 and buffers it"),
                recv("P2", "m0", "P2 receives m0, which releases m1"),
                recv("P3", "m0", "P3 receives m0"),
                send("P2", "m2", "P2 sends m2"),
                send("P1", "m3", "P1 sends m3"),
                recv("P3", "m3", "P3 receives m3"),
                recv("P3", "m2", "P3 receives m2"),
                recv("P1", "m2", "P1 receives m2"),
                recv("P2", "m3", "P2 receives m3"),
                send("P2", "m4", "P2 sends m4"),
                recv("P3", "m4", "P3 receives m4"),
                recv("P1", "m4", "P1 receives m4"),
                send("P3", "m5", "P3 sends m5"),
                recv("P1", "m5", "P1 receives m5"),
                recv("P2", "m5", "P2 receives m5"),
                send("P2", "m6", "P2 sends m6"),
                recv("P1", "m6", "P1 receives m6"),
                recv("P3", "m6", "P3 receives m6"),
            ],
        )
    }

    /// Chat exchange where P2 sees the second line first.
    pub fn chat() -> Self {
        Self::new(
            "chat",
            vec![
                Step::new(Command::send("P1", "m0", "Hello, world!")),
                Step::new(Command::send("P1", "m1", "How are you?")),
                Step::new(Command::receive("P2", "m1")).describe("P2 receives m1 and buffers it"),
                Step::new(Command::receive("P2", "m0"))
                    .describe("P2 receives m0, then the buffered m1"),
                Step::new(Command::receive("P3", "m0")).describe("P3 receives m0"),
            ],
        )
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of one executed step.
#[derive(Debug)]
pub enum StepOutcome {
    Sent(Message),
    Received(ReceiveOutcome),
    /// The step failed; the error was already reported to the observers.
    Failed(CausalError),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug)]
pub enum StepResult {
    Executed { index: usize, outcome: StepOutcome },
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub steps: usize,
    pub errors: usize,
}

/// Executes a [`Script`] step by step against an engine it owns.
pub struct ScriptRunner {
    engine: DeliveryEngine,
    script: Script,
    cursor: usize,
    labels: HashMap<String, MessageId>,
}

impl ScriptRunner {
    pub fn new(engine: DeliveryEngine, script: Script) -> Self {
        Self {
            engine,
            script,
            cursor: 0,
            labels: HashMap::new(),
        }
    }

    /// Execute the step under the cursor and advance, failed steps included.
    pub fn next_step(&mut self) -> StepResult {
        let Some(step) = self.script.steps.get(self.cursor).cloned() else {
            return StepResult::Complete;
        };
        let index = self.cursor;
        self.cursor += 1;

        let _span = tracing_ext::script_step_span(&self.script.name, index + 1).entered();
        tracing::debug!(step = index + 1, "{}", step.summary());

        let outcome = match step.command {
            Command::Send {
                process,
                label,
                payload,
            } => match self.engine.send(&process, payload) {
                Ok(message) => {
                    self.labels.insert(label, message.id());
                    StepOutcome::Sent(message)
                }
                Err(e) => StepOutcome::Failed(e),
            },
            Command::Receive { process, label } => match self.labels.get(&label) {
                Some(&id) => match self.engine.receive(&process, id) {
                    Ok(outcome) => StepOutcome::Received(outcome),
                    Err(e) => StepOutcome::Failed(e),
                },
                None => {
                    let err = CausalError::UnknownLabel(label);
                    self.engine.report_error(&err);
                    StepOutcome::Failed(err)
                }
            },
        };

        if self.is_complete() {
            tracing::info!(
                script = %self.script.name,
                steps = self.script.len(),
                "script complete"
            );
        }

        StepResult::Executed { index, outcome }
    }

    /// Run the remaining steps.
    pub fn run_to_end(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        while let StepResult::Executed { outcome, .. } = self.next_step() {
            summary.steps += 1;
            if outcome.is_failed() {
                summary.errors += 1;
            }
        }
        summary
    }

    /// Reset the engine, the labels and the cursor.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.labels.clear();
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.script.len()
    }

    /// Id bound to `label` by an executed send.
    pub fn message_id(&self, label: &str) -> Option<MessageId> {
        self.labels.get(label).copied()
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn engine(&self) -> &DeliveryEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DeliveryEngine {
        &mut self.engine
    }

    pub fn into_engine(self) -> DeliveryEngine {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockModel;

    #[test]
    fn test_parse_step_list() {
        let json = r#"[
            {"type": "send", "process": "P1", "msg_id": "m0", "content": "Hello, world!"},
            {"type": "receive", "process": "P2", "msg_id": "m0", "description": "P2 receives m0"}
        ]"#;

        let script = Script::from_json(json).unwrap();

        assert_eq!(script.name, "custom");
        assert_eq!(script.steps[0].command, Command::send("P1", "m0", "Hello, world!"));
        assert_eq!(script.steps[0].summary(), "Hello, world!");
        assert_eq!(script.steps[1].command.label(), "m0");
        assert_eq!(script.steps[1].summary(), "P2 receives m0");
    }

    #[test]
    fn test_json_round_trip_of_builtin() {
        let chat = Script::chat();
        let back = Script::from_json(&chat.to_json().unwrap()).unwrap();
        assert_eq!(back, chat);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Script::from_json(r#"[{"type": "teleport"}]"#),
            Err(CausalError::Serialization(_))
        ));
    }

    #[test]
    fn test_runner_steps_and_reset() {
        let engine = DeliveryEngine::with_model(ClockModel::Matrix).unwrap();
        let mut runner = ScriptRunner::new(engine, Script::chat());

        assert!(matches!(
            runner.next_step(),
            StepResult::Executed { index: 0, outcome: StepOutcome::Sent(_) }
        ));
        runner.next_step();
        assert!(matches!(
            runner.next_step(),
            StepResult::Executed {
                outcome: StepOutcome::Received(ReceiveOutcome::Buffered),
                ..
            }
        ));

        let summary = runner.run_to_end();
        assert_eq!(summary, RunSummary { steps: 2, errors: 0 });
        assert!(runner.is_complete());
        assert!(matches!(runner.next_step(), StepResult::Complete));

        runner.reset();
        assert_eq!(runner.cursor(), 0);
        assert!(runner.message_id("m0").is_none());
        assert_eq!(runner.run_to_end().steps, 5);
    }

    #[test]
    fn test_unknown_label_advances() {
        let script = Script::new(
            "broken",
            vec![
                Step::new(Command::receive("P2", "m9")),
                Step::new(Command::send("P1", "m0", Value::Null)),
            ],
        );
        let engine = DeliveryEngine::with_model(ClockModel::VectorPartial).unwrap();
        let mut runner = ScriptRunner::new(engine, script);

        match runner.next_step() {
            StepResult::Executed {
                outcome: StepOutcome::Failed(CausalError::UnknownLabel(label)),
                ..
            } => assert_eq!(label, "m9"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(runner.cursor(), 1);
        assert_eq!(runner.run_to_end(), RunSummary { steps: 1, errors: 0 });
        assert_eq!(runner.engine().stats().errors, 1);
    }
}
