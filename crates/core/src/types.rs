use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a persisted or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an upper-case textual enum with `as_str`, `FromStr` and `Display`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Returns the canonical database representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum! {
    /// Broad grouping of initiative types.
    InitiativeCategory {
        Operational => "OPERATIONAL",
        Project => "PROJECT",
        Initiative => "INITIATIVE",
        Improvement => "IMPROVEMENT",
        Support => "SUPPORT",
    }
}

text_enum! {
    /// Lifecycle of an initiative.
    InitiativeStatus {
        Backlog => "BACKLOG",
        Planned => "PLANNED",
        InProgress => "IN_PROGRESS",
        Blocked => "BLOCKED",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

impl Default for InitiativeStatus {
    fn default() -> Self {
        Self::Backlog
    }
}

text_enum! {
    /// Priority shared by initiatives and user stories.
    Priority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    /// Ordinal used to sort highest priority first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

text_enum! {
    /// Recurrence of an operational task.
    Frequency {
        Daily => "DAILY",
        Weekly => "WEEKLY",
        Biweekly => "BIWEEKLY",
        Monthly => "MONTHLY",
        Quarterly => "QUARTERLY",
        Yearly => "YEARLY",
        OnDemand => "ON_DEMAND",
    }
}

text_enum! {
    /// Kind of note attached to an initiative.
    UpdateType {
        Progress => "PROGRESS",
        Blocker => "BLOCKER",
        Risk => "RISK",
        Achievement => "ACHIEVEMENT",
        Comment => "COMMENT",
    }
}

text_enum! {
    /// Kanban column of a user story.
    StoryStatus {
        Backlog => "BACKLOG",
        Ready => "READY",
        InProgress => "IN_PROGRESS",
        InReview => "IN_REVIEW",
        Testing => "TESTING",
        Done => "DONE",
        Cancelled => "CANCELLED",
    }
}

impl Default for StoryStatus {
    fn default() -> Self {
        Self::Backlog
    }
}

text_enum! {
    /// Kanban column of a task.
    TaskStatus {
        Todo => "TODO",
        InProgress => "IN_PROGRESS",
        InReview => "IN_REVIEW",
        Done => "DONE",
        Blocked => "BLOCKED",
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Todo
    }
}

text_enum! {
    TaskType {
        Development => "DEVELOPMENT",
        Testing => "TESTING",
        Design => "DESIGN",
        Research => "RESEARCH",
        Documentation => "DOCUMENTATION",
        Review => "REVIEW",
        Deployment => "DEPLOYMENT",
        Other => "OTHER",
    }
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Development
    }
}

/// Team member record. Account identity (username, names, email) lives on the row itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub employee_code: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub mobile: String,
    pub birth_date: NaiveDate,
    pub hire_date: NaiveDate,
    pub position: String,
    pub department: String,
    pub emergency_contact: String,
    pub emergency_phone: String,
    pub notes: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceType {
    pub id: String,
    pub name: String,
    pub code: String,
    pub requires_approval: bool,
    pub paid: bool,
    pub color: String,
}

/// A closed date range during which an employee is away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Absence {
    pub id: String,
    pub employee_id: String,
    pub absence_type_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Absence {
    pub fn duration_days(&self) -> i64 {
        crate::vacation::duration_days(self.start_date, self.end_date)
    }
}

/// Yearly vacation balance of one employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vacation {
    pub id: String,
    pub employee_id: String,
    pub year: i32,
    pub days_entitled: i64,
    pub days_taken: i64,
    pub days_pending: i64,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quarter {
    pub id: String,
    pub year: i32,
    pub quarter: u8,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{} {}", self.quarter, self.year)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeType {
    pub id: String,
    pub name: String,
    pub category: InitiativeCategory,
    pub description: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub title: String,
    pub description: String,
    pub initiative_type_id: String,
    pub owner_id: String,
    pub quarter_id: String,
    pub collaborator_ids: Vec<String>,
    pub status: InitiativeStatus,
    pub priority: Priority,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    pub progress: u8,
    pub is_operational: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Recurring schedule attached to an operational initiative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalTask {
    pub id: String,
    pub initiative_id: String,
    pub frequency: Frequency,
    pub day_of_week: Option<u8>,
    pub day_of_month: Option<u8>,
    pub time_of_day: Option<NaiveTime>,
    pub duration_hours: Option<f64>,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub name: String,
    pub quarter_id: String,
    pub sprint_number: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub goal: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeUpdate {
    pub id: String,
    pub initiative_id: String,
    pub update_type: UpdateType,
    pub title: String,
    pub description: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiativeMetric {
    pub id: String,
    pub initiative_id: String,
    pub metric_name: String,
    pub target_value: f64,
    pub current_value: f64,
    pub unit: String,
    pub measured_at: NaiveDate,
    pub achievement_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub id: String,
    pub initiative_id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub story_points: Option<u8>,
    pub priority: Priority,
    pub status: StoryStatus,
    pub assignee_id: Option<String>,
    pub sprint_id: Option<String>,
    pub progress_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_story_id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub assignee_id: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub blocked_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
