//! Append-only record of the steps of one long-running operation
//!
//! A borrow is a sequence of phases (support checks, network requests,
//! persistence). Each phase is a [`TaskStep`]; the last failed step's code
//! and message is what callers show to the user.

use crate::error::{BorrowErrorCode, ErrorCause};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// How a step ended
#[derive(Clone, Debug)]
pub enum TaskStepResolution {
    /// The step has not finished
    InProgress,
    /// The step succeeded
    Succeeded {
        /// Final message
        message: String,
    },
    /// The step failed
    Failed {
        /// Why it failed
        message: String,
        /// Reserved code
        code: BorrowErrorCode,
        /// The underlying error
        cause: Option<ErrorCause>,
    },
}

/// One recorded step
#[derive(Clone, Debug)]
pub struct TaskStep {
    /// What the step does
    pub description: String,
    /// When it started
    pub started: DateTime<Utc>,
    /// How it ended
    pub resolution: TaskStepResolution,
}

impl TaskStep {
    /// True if the step failed
    pub fn is_failed(&self) -> bool {
        matches!(self.resolution, TaskStepResolution::Failed { .. })
    }

    /// The failure code, for failed steps
    pub fn failure_code(&self) -> Option<BorrowErrorCode> {
        match &self.resolution {
            TaskStepResolution::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Records steps and free-form attributes of one task
#[derive(Clone, Debug, Default)]
pub struct TaskRecorder {
    steps: Vec<TaskStep>,
    attributes: BTreeMap<String, String>,
}

impl TaskRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new step; an unresolved previous step is left in progress
    pub fn begin_new_step(&mut self, description: impl Into<String>) {
        let description = description.into();
        tracing::debug!(step = %description, "step started");
        self.steps.push(TaskStep {
            description,
            started: Utc::now(),
            resolution: TaskStepResolution::InProgress,
        });
    }

    /// Mark the current step as succeeded
    pub fn current_step_succeeded(&mut self, message: impl Into<String>) {
        let step = self.current_step();
        step.resolution = TaskStepResolution::Succeeded {
            message: message.into(),
        };
    }

    /// Mark the current step as failed
    pub fn current_step_failed(
        &mut self,
        message: impl Into<String>,
        code: BorrowErrorCode,
        cause: Option<ErrorCause>,
    ) {
        let step = self.current_step();
        step.resolution = TaskStepResolution::Failed {
            message: message.into(),
            code,
            cause,
        };
    }

    /// Attach a key/value attribute to the task
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Every step in order
    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    /// Every attribute
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// The most recent failed step
    pub fn last_failed_step(&self) -> Option<&TaskStep> {
        self.steps.iter().rev().find(|s| s.is_failed())
    }

    /// Hand over the recorded steps and attributes
    pub fn finish(self) -> (Vec<TaskStep>, BTreeMap<String, String>) {
        (self.steps, self.attributes)
    }

    fn current_step(&mut self) -> &mut TaskStep {
        if self.steps.is_empty() {
            self.begin_new_step("unnamed step");
        }
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }
}
