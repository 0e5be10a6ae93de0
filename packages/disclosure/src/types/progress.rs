//! Progress records consumed by the polling status API.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ProgressStatus {
    /// Rank for the no-regression rule: a stored status is never replaced by
    /// a lower-ranked one.
    pub fn rank(self) -> u8 {
        match self {
            ProgressStatus::Queued => 0,
            ProgressStatus::Running => 1,
            ProgressStatus::Completed => 2,
            ProgressStatus::Failed => 2,
        }
    }
}

/// Snapshot of an operation's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: ProgressStatus,

    /// Percentage in [0, 100]; monotonic non-decreasing unless `status`
    /// moves to `failed`.
    pub progress: u8,

    /// Human-readable description of the current step.
    pub step: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_section: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sections: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_sections: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressRecord {
    pub fn queued() -> Self {
        Self {
            status: ProgressStatus::Queued,
            progress: 0,
            step: "queued".to_string(),
            current_section: None,
            total_sections: None,
            completed_sections: None,
            error: None,
        }
    }

    pub fn running(progress: u8, step: impl Into<String>) -> Self {
        Self {
            status: ProgressStatus::Running,
            progress: progress.min(100),
            step: step.into(),
            current_section: None,
            total_sections: None,
            completed_sections: None,
            error: None,
        }
    }

    pub fn completed(step: impl Into<String>) -> Self {
        Self {
            status: ProgressStatus::Completed,
            progress: 100,
            step: step.into(),
            current_section: None,
            total_sections: None,
            completed_sections: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: ProgressStatus::Failed,
            progress: 0,
            step: "failed".to_string(),
            current_section: None,
            total_sections: None,
            completed_sections: None,
            error: Some(error),
        }
    }

    pub fn with_sections(
        mut self,
        current: Option<String>,
        completed: usize,
        total: usize,
    ) -> Self {
        self.current_section = current;
        self.completed_sections = Some(completed);
        self.total_sections = Some(total);
        self
    }
}
