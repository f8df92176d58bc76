//! Completion rollup from tasks to user stories to initiatives.

use chrono::{DateTime, Utc};

use crate::types::{StoryStatus, TaskStatus};

/// Status of a work item that tracks start and completion timestamps.
pub trait WorkStatus: Copy {
    fn is_started(self) -> bool;
    fn is_done(self) -> bool;
}

impl WorkStatus for TaskStatus {
    fn is_started(self) -> bool {
        matches!(self, Self::InProgress)
    }

    fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl WorkStatus for StoryStatus {
    fn is_started(self) -> bool {
        matches!(self, Self::InProgress)
    }

    fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// `started_at` / `completed_at` pair of a story or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusTimestamps {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusTimestamps {
    /// Applies a status change.
    ///
    /// `started_at` is stamped once on entering the started state and never
    /// cleared. `completed_at` is stamped once on entering done and cleared as
    /// soon as the status leaves done.
    pub fn apply<S: WorkStatus>(self, status: S, now: DateTime<Utc>) -> Self {
        let started_at = match self.started_at {
            None if status.is_started() => Some(now),
            existing => existing,
        };
        let completed_at = if status.is_done() {
            self.completed_at.or(Some(now))
        } else {
            None
        };
        Self {
            started_at,
            completed_at,
        }
    }
}

/// Story completion in percent, rounded to two decimals.
pub fn story_progress(done_tasks: usize, total_tasks: usize, story_status: StoryStatus) -> f64 {
    if total_tasks == 0 {
        return if story_status.is_done() { 100.0 } else { 0.0 };
    }
    round2(done_tasks as f64 / total_tasks as f64 * 100.0)
}

/// Initiative progress from its stories' percentages.
///
/// Returns `None` when the initiative has no stories, which leaves the stored
/// progress untouched.
pub fn initiative_progress(story_percentages: &[f64]) -> Option<u8> {
    if story_percentages.is_empty() {
        return None;
    }
    let average = story_percentages.iter().sum::<f64>() / story_percentages.len() as f64;
    Some(average.round().clamp(0.0, 100.0) as u8)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
