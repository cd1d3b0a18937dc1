//! Step log for multi-step provisioning sequences
//!
//! A linked-resource operation runs one step per side. [`SagaLog`] records
//! what ran and how it ended so a partial failure can be reported with the
//! steps that did complete.

use serde::{Deserialize, Serialize};

/// Which half of a linked pair a step touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Destination,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// Type of step performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Create,
    Update,
    Delete,
    /// Undo of an earlier step after a later one failed
    Compensate,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Create => write!(f, "create"),
            StepKind::Update => write!(f, "update"),
            StepKind::Delete => write!(f, "delete"),
            StepKind::Compensate => write!(f, "compensate"),
        }
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub side: Side,
    pub kind: StepKind,
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

impl StepRecord {
    /// e.g. "destination create"
    pub fn label(&self) -> String {
        format!("{} {}", self.side, self.kind)
    }
}

/// Ordered log of the steps of one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaLog {
    pub operation: String,
    pub steps: Vec<StepRecord>,
}

impl SagaLog {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            steps: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.success)
    }

    pub fn add_success(&mut self, side: Side, kind: StepKind, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("[{}] {} {} succeeded: {}", self.operation, side, kind, message);
        self.steps.push(StepRecord {
            side,
            kind,
            success: true,
            message,
            error: None,
        });
    }

    pub fn add_failure(&mut self, side: Side, kind: StepKind, error: impl Into<String>) {
        let error = error.into();
        tracing::warn!("[{}] {} {} failed: {}", self.operation, side, kind, error);
        self.steps.push(StepRecord {
            side,
            kind,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.success)
    }

    /// Labels of the successful steps, comma separated
    pub fn completed_summary(&self) -> String {
        let labels: Vec<String> = self.succeeded().map(|s| s.label()).collect();
        if labels.is_empty() {
            "nothing".to_string()
        } else {
            labels.join(", ")
        }
    }
}
