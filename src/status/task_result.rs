//! Outcome of one task executed by the task execution context.

use crate::core::State;
use crate::error::StatusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::state_enum! {
    #[derive(Copy, Eq, Hash)]
    pub enum TaskResultCode {
        NotStarted,
        StillPending,
        Success,
        Failed,
        Cancelled,
        ErrorUnknown,
    }
    final: [Success, Failed, Cancelled, ErrorUnknown]
    error: [Failed, ErrorUnknown]
}

/// NotStarted -> StillPending -> {Success | Failed | Cancelled | ErrorUnknown}.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    code: TaskResultCode,
    started_at: Option<DateTime<Utc>>,
    terminated_at: Option<DateTime<Utc>>,
    explanation: String,
}

impl Default for TaskResult {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskResult {
    pub fn new() -> Self {
        Self {
            code: TaskResultCode::NotStarted,
            started_at: None,
            terminated_at: None,
            explanation: String::new(),
        }
    }

    pub fn code(&self) -> TaskResultCode {
        self.code
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn terminated_at(&self) -> Option<DateTime<Utc>> {
        self.terminated_at
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    pub fn is_terminal(&self) -> bool {
        self.code.is_final()
    }

    /// NotStarted -> StillPending, stamping the start time.
    pub fn start(&mut self) -> Result<(), StatusError> {
        if self.code != TaskResultCode::NotStarted {
            return Err(self.violation(TaskResultCode::StillPending));
        }
        self.code = TaskResultCode::StillPending;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// StillPending -> a terminal code.
    pub fn finish(
        &mut self,
        code: TaskResultCode,
        explanation: impl Into<String>,
    ) -> Result<(), StatusError> {
        if self.code != TaskResultCode::StillPending || !code.is_final() {
            return Err(self.violation(code));
        }
        self.code = code;
        self.terminated_at = Some(Utc::now());
        self.explanation = explanation.into();
        Ok(())
    }

    fn violation(&self, next: TaskResultCode) -> StatusError {
        StatusError::InvalidTransition {
            subject: "task result".to_string(),
            from: self.code.name().to_string(),
            to: next.name().to_string(),
        }
    }
}
