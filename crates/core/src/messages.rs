//! Messages written to the host workflow's visible log.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{StepAction, StepStatus};

/// Which external call a decision translated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Advance,
    Cancel,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Advance => f.write_str("advance"),
            Operation::Cancel => f.write_str("cancel"),
        }
    }
}

/// A visible-log message. [`Message::key`] is the stable identifier;
/// the `Display` text is for humans and may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Waiting,
    EventOccurred {
        execution_id: String,
        action: String,
        status: StepStatus,
    },
    WaitingApproval {
        action: StepAction,
        execution_id: String,
    },
    UnknownStepAction {
        action: String,
    },
    MissingBuildData,
    ExecutionAdvanced {
        execution_id: String,
    },
    ExecutionCancelled {
        execution_id: String,
    },
    ApiFailure {
        operation: Operation,
        program_id: String,
        pipeline_id: String,
        execution_id: String,
        error: String,
    },
    EndQuietly,
    Interrupted,
}

impl Message {
    pub fn key(&self) -> &'static str {
        match self {
            Message::Waiting => "info_waiting",
            Message::EventOccurred { .. } => "info_eventOccurred",
            Message::WaitingApproval { .. } => "prompt_waitingApproval",
            Message::UnknownStepAction { .. } => "error_unknownStepAction",
            Message::MissingBuildData => "error_missingBuildData",
            Message::ExecutionAdvanced { .. } => "info_executionAdvanced",
            Message::ExecutionCancelled { .. } => "info_executionCancelled",
            Message::ApiFailure { .. } => "error_apiFailure",
            Message::EndQuietly => "info_endQuietly",
            Message::Interrupted => "info_interrupted",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Waiting => f.write_str("Waiting for pipeline step events."),
            Message::EventOccurred {
                execution_id,
                action,
                status,
            } => write!(
                f,
                "Pipeline execution {execution_id}: step {action} is {status}."
            ),
            Message::WaitingApproval {
                action,
                execution_id,
            } => write!(
                f,
                "Pipeline execution {execution_id} is waiting on {action}. Proceed or cancel?"
            ),
            Message::UnknownStepAction { action } => write!(
                f,
                "Unknown pipeline step action {action:?}; still waiting."
            ),
            Message::MissingBuildData => f.write_str(
                "No pipeline build data found for this workflow. Was a pipeline started?",
            ),
            Message::ExecutionAdvanced { execution_id } => {
                write!(f, "Advanced pipeline execution {execution_id}.")
            }
            Message::ExecutionCancelled { execution_id } => {
                write!(f, "Cancelled pipeline execution {execution_id}.")
            }
            Message::ApiFailure {
                operation,
                program_id,
                pipeline_id,
                execution_id,
                error,
            } => write!(
                f,
                "Failed to {operation} execution {execution_id} (program {program_id}, pipeline {pipeline_id}): {error}"
            ),
            Message::EndQuietly => f.write_str("Pipeline step wait ended quietly."),
            Message::Interrupted => f.write_str("Pipeline step wait was interrupted."),
        }
    }
}
