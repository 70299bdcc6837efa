//! Pipeline event types for JSON output.
//!
//! When `fleet run --json` is used, one [`BuildEvent`] is written per line to
//! stdout as each target pipeline crosses a step boundary. Events from
//! different targets interleave; every event carries its target id.
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::core::result::BuildStatus;

/// One step of a target pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Resolve,
    Restore,
    Install,
    Persist,
    Configure,
    Build,
    Package,
    Verify,
    Publish,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Resolve => "resolve",
            Step::Restore => "restore",
            Step::Install => "install",
            Step::Persist => "persist",
            Step::Configure => "configure",
            Step::Build => "build",
            Step::Package => "package",
            Step::Verify => "verify",
            Step::Publish => "publish",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by a target pipeline.
///
/// Each event is serialized as a single JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    #[serde(rename = "target-started")]
    TargetStarted { target: String, display_name: String },

    #[serde(rename = "step-started")]
    StepStarted { target: String, step: Step },

    #[serde(rename = "step-finished")]
    StepFinished {
        target: String,
        step: Step,
        success: bool,
        duration_ms: u64,
    },

    /// A soft diagnostic that does not change the target's status.
    #[serde(rename = "warning")]
    Warning { target: String, message: String },

    #[serde(rename = "target-finished")]
    TargetFinished {
        target: String,
        status: BuildStatus,
        duration_ms: u64,
    },
}

impl BuildEvent {
    pub fn step_started(target: impl Into<String>, step: Step) -> Self {
        BuildEvent::StepStarted {
            target: target.into(),
            step,
        }
    }

    pub fn step_finished(
        target: impl Into<String>,
        step: Step,
        success: bool,
        duration_ms: u64,
    ) -> Self {
        BuildEvent::StepFinished {
            target: target.into(),
            step,
            success,
            duration_ms,
        }
    }

    pub fn warning(target: impl Into<String>, message: impl Into<String>) -> Self {
        BuildEvent::Warning {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Callback receiving pipeline events. Called from pipeline worker threads.
pub type EventSink = Arc<dyn Fn(&BuildEvent) + Send + Sync>;

/// Emits events for one target, if anyone is listening.
#[derive(Clone, Default)]
pub struct StepReporter {
    target: String,
    sink: Option<EventSink>,
}

impl StepReporter {
    pub fn new(target: impl Into<String>, sink: Option<EventSink>) -> Self {
        StepReporter {
            target: target.into(),
            sink,
        }
    }

    pub fn emit(&self, event: BuildEvent) {
        if let Some(sink) = &self.sink {
            sink(&event);
        }
    }

    pub fn started(&self, step: Step) {
        tracing::info!("{}", step);
        self.emit(BuildEvent::step_started(self.target.clone(), step));
    }

    pub fn finished(&self, step: Step, success: bool, duration: Duration) {
        self.emit(BuildEvent::step_finished(
            self.target.clone(),
            step,
            success,
            duration.as_millis() as u64,
        ));
    }

    /// Log a soft diagnostic and forward it as an event.
    pub fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
        self.emit(BuildEvent::warning(self.target.clone(), message));
    }
}
