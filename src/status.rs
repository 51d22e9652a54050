//! Per-document processing status and the `IN_PROGRESS` guard.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingStatus::NotStarted => "NOT_STARTED",
            ProcessingStatus::InProgress => "IN_PROGRESS",
            ProcessingStatus::Done => "DONE",
            ProcessingStatus::Failed => "FAILED",
        })
    }
}

/// The two guarded pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Split,
    Ocr,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Split => "split",
            Stage::Ocr => "ocr",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub split_status: ProcessingStatus,
    pub ocr_status: ProcessingStatus,
}

impl DocumentStatus {
    pub fn get(&self, stage: Stage) -> ProcessingStatus {
        match stage {
            Stage::Split => self.split_status,
            Stage::Ocr => self.ocr_status,
        }
    }

    fn slot(&mut self, stage: Stage) -> &mut ProcessingStatus {
        match stage {
            Stage::Split => &mut self.split_status,
            Stage::Ocr => &mut self.ocr_status,
        }
    }

    /// Check-and-set `stage` to `IN_PROGRESS`.
    ///
    /// Returns `false`, leaving the status untouched, when the stage is
    /// already in progress. Finished and failed stages may be re-entered.
    pub fn try_begin(&mut self, stage: Stage) -> bool {
        let slot = self.slot(stage);
        if *slot == ProcessingStatus::InProgress {
            return false;
        }
        *slot = ProcessingStatus::InProgress;
        true
    }

    pub fn finish(&mut self, stage: Stage, succeeded: bool) {
        *self.slot(stage) = if succeeded {
            ProcessingStatus::Done
        } else {
            ProcessingStatus::Failed
        };
    }
}
