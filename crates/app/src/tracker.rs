use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use boss_core::error::{require_color, require_range, require_text};
use boss_core::progress::round2;
use boss_core::quarter::resolve_dates;
use boss_core::schedule::{next_execution, validate_schedule};
use boss_core::tracker::{achievement_percentage, resolution_timestamp, validate_progress, InitiativeDates};
use boss_core::types::{
    Frequency, Initiative, InitiativeCategory, InitiativeMetric, InitiativeStatus, InitiativeType,
    InitiativeUpdate, OperationalTask, Priority, Quarter, Sprint, UpdateType, UserStory,
};
use boss_core::ValidationError;
use boss_storage::{new_id, Database, InitiativeFilter, TrackerError, WorkItemError};

use crate::problem::ProblemResponse;
use crate::router::{ActionResponse, AppState, Clock};

const DEFAULT_TYPE_COLOR: &str = "#3498db";
const MAX_SPRINT_NUMBER: i64 = 999;

#[derive(Debug, Clone, Deserialize)]
pub struct QuarterRequest {
    pub year: i32,
    pub quarter: u8,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusTotal {
    pub status: InitiativeStatus,
    pub count: i64,
}

/// Progress overview of one quarter.
#[derive(Debug, Serialize)]
pub struct QuarterSummary {
    pub quarter: Quarter,
    pub label: String,
    pub total_initiatives: usize,
    pub average_progress: f64,
    pub status_counts: Vec<StatusTotal>,
    pub sprints: Vec<Sprint>,
    pub open_blockers: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiativeTypeRequest {
    pub name: String,
    pub category: InitiativeCategory,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_type_color")]
    pub color: String,
}

fn default_type_color() -> String {
    DEFAULT_TYPE_COLOR.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiativeRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub initiative_type_id: String,
    pub owner_id: String,
    pub quarter_id: String,
    #[serde(default)]
    pub collaborator_ids: Vec<String>,
    #[serde(default)]
    pub status: InitiativeStatus,
    #[serde(default)]
    pub priority: Priority,
    pub start_date: Option<NaiveDate>,
    pub target_date: Option<NaiveDate>,
    pub completion_date: Option<NaiveDate>,
    #[serde(default)]
    pub progress: i64,
}

/// Minimal payload filed straight into the active quarter.
#[derive(Debug, Clone, Deserialize)]
pub struct QuickInitiativeRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub initiative_type_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitiativeQuery {
    /// Quarter id; `all` disables the filter. Defaults to the active quarter.
    pub quarter: Option<String>,
    pub status: Option<InitiativeStatus>,
    pub priority: Option<Priority>,
    pub owner: Option<String>,
    #[serde(rename = "type")]
    pub initiative_type: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiativeStatusRequest {
    pub status: InitiativeStatus,
}

#[derive(Debug, Serialize)]
pub struct InitiativeStatusChange {
    pub id: String,
    pub status: InitiativeStatus,
    pub completion_date: Option<NaiveDate>,
}

/// Initiative with everything hanging off it.
#[derive(Debug, Serialize)]
pub struct InitiativeDetail {
    #[serde(flatten)]
    pub initiative: Initiative,
    pub quarter: String,
    pub operational_task: Option<OperationalTask>,
    pub updates: Vec<InitiativeUpdate>,
    pub metrics: Vec<InitiativeMetric>,
    pub user_stories: Vec<UserStory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationalRequest {
    pub frequency: Frequency,
    pub day_of_week: Option<u8>,
    pub day_of_month: Option<u8>,
    pub time_of_day: Option<NaiveTime>,
    pub duration_hours: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OperationalQuery {
    pub frequency: Option<Frequency>,
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecutionRecorded {
    pub id: String,
    pub last_execution: DateTime<Utc>,
    pub next_execution: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SprintRequest {
    pub name: String,
    pub quarter_id: String,
    pub sprint_number: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub is_active: bool,
}

impl SprintRequest {
    fn into_sprint(self, id: String) -> Result<Sprint, ValidationError> {
        require_text("name", &self.name)?;
        require_range("sprint_number", self.sprint_number, 1, MAX_SPRINT_NUMBER)?;
        if self.end_date <= self.start_date {
            return Err(ValidationError::EndNotAfterStart);
        }
        Ok(Sprint {
            id,
            name: self.name.trim().to_string(),
            quarter_id: self.quarter_id,
            sprint_number: self.sprint_number,
            start_date: self.start_date,
            end_date: self.end_date,
            goal: self.goal,
            is_active: self.is_active,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SprintQuery {
    pub quarter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub update_type: UpdateType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub author_id: String,
    #[serde(default)]
    pub is_resolved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEditRequest {
    pub update_type: UpdateType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_resolved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricRequest {
    pub metric_name: String,
    pub target_value: f64,
    pub current_value: f64,
    #[serde(default)]
    pub unit: String,
    pub measured_at: Option<NaiveDate>,
}

impl MetricRequest {
    fn into_metric(
        self,
        id: String,
        initiative_id: String,
        today: NaiveDate,
    ) -> Result<InitiativeMetric, ValidationError> {
        require_text("metric_name", &self.metric_name)?;
        if self.target_value < 0.0 {
            return Err(ValidationError::Negative {
                field: "target_value",
                value: self.target_value,
            });
        }
        Ok(InitiativeMetric {
            id,
            initiative_id,
            metric_name: self.metric_name.trim().to_string(),
            target_value: self.target_value,
            current_value: self.current_value,
            unit: self.unit,
            measured_at: self.measured_at.unwrap_or(today),
            achievement_percentage: achievement_percentage(self.current_value, self.target_value),
        })
    }
}

/// Quarters, initiatives and the records attached to them.
#[derive(Clone)]
pub struct TrackerService {
    database: Database,
    clock: Clock,
}

impl TrackerService {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    pub async fn create_quarter(&self, request: QuarterRequest) -> Result<Quarter, TrackerServiceError> {
        let (start_date, end_date) =
            resolve_dates(request.year, request.quarter, request.start_date, request.end_date)?;
        let quarter = Quarter {
            id: new_id(),
            year: request.year,
            quarter: request.quarter,
            start_date,
            end_date,
            is_active: false,
        };

        let repo = self.database.quarters();
        let mut tx = self.database.begin_write().await?;
        repo.insert(&mut tx, &quarter).await?;
        if request.is_active {
            repo.activate(&mut tx, &quarter.id).await?;
        }
        let stored = repo.fetch_in(&mut tx, &quarter.id).await?;
        tx.commit().await?;

        if stored.is_active {
            self.record_activation(&stored);
        }
        info!(stage = "tracker", quarter_id = %stored.id, label = %stored, "quarter created");
        Ok(stored)
    }

    pub async fn update_quarter(
        &self,
        id: &str,
        request: QuarterRequest,
    ) -> Result<Quarter, TrackerServiceError> {
        let (start_date, end_date) =
            resolve_dates(request.year, request.quarter, request.start_date, request.end_date)?;
        let repo = self.database.quarters();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let quarter = Quarter {
            year: request.year,
            quarter: request.quarter,
            start_date,
            end_date,
            ..existing.clone()
        };
        repo.update(&mut tx, &quarter).await?;
        match (existing.is_active, request.is_active) {
            (false, true) => repo.activate(&mut tx, id).await?,
            (true, false) => repo.deactivate(&mut tx, id).await?,
            _ => {}
        }
        let stored = repo.fetch_in(&mut tx, id).await?;
        tx.commit().await?;

        if stored.is_active && !existing.is_active {
            self.record_activation(&stored);
        }
        Ok(stored)
    }

    /// Makes the quarter the only active one.
    pub async fn activate_quarter(&self, id: &str) -> Result<Quarter, TrackerServiceError> {
        let repo = self.database.quarters();
        let mut tx = self.database.begin_write().await?;
        repo.activate(&mut tx, id).await?;
        let stored = repo.fetch_in(&mut tx, id).await?;
        tx.commit().await?;
        self.record_activation(&stored);
        Ok(stored)
    }

    fn record_activation(&self, quarter: &Quarter) {
        counter!("quarter_activations_total").increment(1);
        info!(stage = "tracker", quarter_id = %quarter.id, label = %quarter, "quarter activated");
    }

    pub async fn active_quarter(&self) -> Result<Option<Quarter>, TrackerServiceError> {
        Ok(self.database.quarters().active().await?)
    }

    pub async fn list_quarters(&self) -> Result<Vec<Quarter>, TrackerServiceError> {
        Ok(self.database.quarters().list().await?)
    }

    pub async fn delete_quarter(&self, id: &str) -> Result<(), TrackerServiceError> {
        let repo = self.database.quarters();
        let mut tx = self.database.begin_write().await?;
        let quarter = repo.fetch_in(&mut tx, id).await?;
        let initiatives = repo.initiative_count(&mut tx, id).await?;
        if initiatives > 0 {
            return Err(TrackerServiceError::Blocked(format!(
                "{quarter} still has {initiatives} initiative(s); move or delete them first"
            )));
        }
        repo.delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn quarter_summary(&self, id: &str) -> Result<QuarterSummary, TrackerServiceError> {
        let quarter = self.database.quarters().fetch(id).await?;
        let filter = InitiativeFilter {
            quarter_id: Some(quarter.id.clone()),
            ..InitiativeFilter::default()
        };
        let initiatives = self.database.initiatives().list(&filter).await?;
        let average_progress = if initiatives.is_empty() {
            0.0
        } else {
            let total: f64 = initiatives
                .iter()
                .map(|initiative| f64::from(initiative.progress))
                .sum();
            round2(total / initiatives.len() as f64)
        };
        let status_counts = self.status_totals(Some(quarter.id.as_str())).await?;
        let sprints = self.database.sprints().list(Some(quarter.id.as_str())).await?;
        let open_blockers = self.database.updates().open_blockers(&quarter.id).await?;

        Ok(QuarterSummary {
            label: quarter.to_string(),
            quarter,
            total_initiatives: initiatives.len(),
            average_progress,
            status_counts,
            sprints,
            open_blockers,
        })
    }

    /// Initiative counts per status, across all quarters when `quarter_id` is `None`.
    pub async fn status_totals(
        &self,
        quarter_id: Option<&str>,
    ) -> Result<Vec<StatusTotal>, TrackerServiceError> {
        Ok(self
            .database
            .initiatives()
            .status_counts(quarter_id)
            .await?
            .into_iter()
            .map(|row| StatusTotal {
                status: row.status,
                count: row.count,
            })
            .collect())
    }

    pub async fn create_initiative_type(
        &self,
        request: InitiativeTypeRequest,
    ) -> Result<InitiativeType, TrackerServiceError> {
        require_text("name", &request.name)?;
        require_color(&request.color)?;
        let kind = InitiativeType {
            id: new_id(),
            name: request.name.trim().to_string(),
            category: request.category,
            description: request.description,
            color: request.color,
        };
        let mut conn = self.database.pool().acquire().await?;
        self.database.initiative_types().insert(&mut conn, &kind).await?;
        Ok(kind)
    }

    pub async fn list_initiative_types(&self) -> Result<Vec<InitiativeType>, TrackerServiceError> {
        Ok(self.database.initiative_types().list().await?)
    }

    pub async fn delete_initiative_type(&self, id: &str) -> Result<(), TrackerServiceError> {
        let repo = self.database.initiative_types();
        let mut tx = self.database.begin_write().await?;
        let usage = repo.usage_count(&mut tx, id).await?;
        if usage > 0 {
            return Err(TrackerServiceError::Blocked(format!(
                "initiative type is used by {usage} initiative(s)"
            )));
        }
        repo.delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    fn build_initiative(
        &self,
        id: String,
        request: InitiativeRequest,
        created_at: DateTime<Utc>,
        is_operational: bool,
    ) -> Result<Initiative, TrackerServiceError> {
        require_text("title", &request.title)?;
        let progress = validate_progress(request.progress)?;
        let dates = InitiativeDates {
            start_date: request.start_date,
            target_date: request.target_date,
            completion_date: request.completion_date,
        }
        .normalize(request.status, self.today())?;

        let mut collaborator_ids = request.collaborator_ids;
        collaborator_ids.sort();
        collaborator_ids.dedup();

        Ok(Initiative {
            id,
            title: request.title.trim().to_string(),
            description: request.description,
            initiative_type_id: request.initiative_type_id,
            owner_id: request.owner_id,
            quarter_id: request.quarter_id,
            collaborator_ids,
            status: request.status,
            priority: request.priority,
            start_date: dates.start_date,
            target_date: dates.target_date,
            completion_date: dates.completion_date,
            progress,
            is_operational,
            created_at,
            updated_at: self.now(),
        })
    }

    pub async fn create_initiative(
        &self,
        request: InitiativeRequest,
    ) -> Result<Initiative, TrackerServiceError> {
        let initiative = self.build_initiative(new_id(), request, self.now(), false)?;
        let repo = self.database.initiatives();
        let mut tx = self.database.begin_write().await?;
        repo.insert(&mut tx, &initiative).await?;
        let stored = repo.fetch_in(&mut tx, &initiative.id).await?;
        tx.commit().await?;
        info!(stage = "tracker", initiative_id = %stored.id, quarter_id = %stored.quarter_id, "initiative created");
        Ok(stored)
    }

    /// Files an initiative into the active quarter with default status and priority.
    pub async fn quick_initiative(
        &self,
        request: QuickInitiativeRequest,
    ) -> Result<Initiative, TrackerServiceError> {
        let repo = self.database.initiatives();
        let mut tx = self.database.begin_write().await?;
        let quarter = self
            .database
            .quarters()
            .active_in(&mut tx)
            .await?
            .ok_or(ValidationError::NoActiveQuarter)?;
        let full = InitiativeRequest {
            title: request.title,
            description: request.description,
            initiative_type_id: request.initiative_type_id,
            owner_id: request.owner_id,
            quarter_id: quarter.id,
            collaborator_ids: Vec::new(),
            status: InitiativeStatus::default(),
            priority: request.priority,
            start_date: None,
            target_date: None,
            completion_date: None,
            progress: 0,
        };
        let initiative = self.build_initiative(new_id(), full, self.now(), false)?;
        repo.insert(&mut tx, &initiative).await?;
        let stored = repo.fetch_in(&mut tx, &initiative.id).await?;
        tx.commit().await?;
        info!(stage = "tracker", initiative_id = %stored.id, quarter_id = %stored.quarter_id, "initiative filed");
        Ok(stored)
    }

    pub async fn update_initiative(
        &self,
        id: &str,
        request: InitiativeRequest,
    ) -> Result<Initiative, TrackerServiceError> {
        let repo = self.database.initiatives();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let initiative =
            self.build_initiative(existing.id, request, existing.created_at, existing.is_operational)?;
        repo.update(&mut tx, &initiative).await?;
        let stored = repo.fetch_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    pub async fn set_initiative_status(
        &self,
        id: &str,
        status: InitiativeStatus,
    ) -> Result<InitiativeStatusChange, TrackerServiceError> {
        let repo = self.database.initiatives();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let dates = InitiativeDates {
            start_date: existing.start_date,
            target_date: existing.target_date,
            completion_date: existing.completion_date,
        }
        .normalize(status, self.today())?;
        repo.set_status(&mut tx, id, status, dates.completion_date, self.now())
            .await?;
        tx.commit().await?;
        info!(stage = "tracker", initiative_id = %id, from = %existing.status, to = %status, "initiative status changed");
        Ok(InitiativeStatusChange {
            id: existing.id,
            status,
            completion_date: dates.completion_date,
        })
    }

    pub async fn initiative_detail(&self, id: &str) -> Result<InitiativeDetail, TrackerServiceError> {
        let initiative = self.database.initiatives().fetch(id).await?;
        let quarter = self.database.quarters().fetch(&initiative.quarter_id).await?;
        let operational_task = {
            let mut conn = self.database.pool().acquire().await?;
            self.database
                .operational_tasks()
                .find_for_initiative(&mut conn, id)
                .await?
        };
        let updates = self.database.updates().list_for_initiative(id).await?;
        let metrics = self.database.metrics().list_for_initiative(id).await?;
        let user_stories = self.database.stories().list_for_initiative(id).await?;
        Ok(InitiativeDetail {
            initiative,
            quarter: quarter.to_string(),
            operational_task,
            updates,
            metrics,
            user_stories,
        })
    }

    pub async fn list_initiatives(
        &self,
        query: InitiativeQuery,
    ) -> Result<Vec<Initiative>, TrackerServiceError> {
        let quarter_id = match query.quarter {
            Some(quarter) if quarter == "all" => None,
            Some(quarter) => Some(quarter),
            None => self.active_quarter().await?.map(|quarter| quarter.id),
        };
        let filter = InitiativeFilter {
            quarter_id,
            status: query.status,
            priority: query.priority,
            owner_id: query.owner,
            initiative_type_id: query.initiative_type,
            search: query.search.filter(|value| !value.trim().is_empty()),
        };
        Ok(self.database.initiatives().list(&filter).await?)
    }

    pub async fn delete_initiative(&self, id: &str) -> Result<(), TrackerServiceError> {
        let mut tx = self.database.begin_write().await?;
        self.database.initiatives().delete(&mut tx, id).await?;
        tx.commit().await?;
        info!(stage = "tracker", initiative_id = %id, "initiative deleted");
        Ok(())
    }

    /// Creates or replaces the recurring schedule and flags the initiative operational.
    pub async fn upsert_operational(
        &self,
        initiative_id: &str,
        request: OperationalRequest,
    ) -> Result<OperationalTask, TrackerServiceError> {
        validate_schedule(request.day_of_week, request.day_of_month, request.duration_hours)?;
        let tasks = self.database.operational_tasks();
        let initiatives = self.database.initiatives();
        let mut tx = self.database.begin_write().await?;
        initiatives.fetch_in(&mut tx, initiative_id).await?;
        let existing = tasks.find_for_initiative(&mut tx, initiative_id).await?;
        let (id, last_execution) = match existing {
            Some(task) => (task.id, task.last_execution),
            None => (new_id(), None),
        };
        let task = OperationalTask {
            id,
            initiative_id: initiative_id.to_string(),
            frequency: request.frequency,
            day_of_week: request.day_of_week,
            day_of_month: request.day_of_month,
            time_of_day: request.time_of_day,
            duration_hours: request.duration_hours,
            last_execution,
            next_execution: next_execution(
                request.frequency,
                last_execution,
                request.time_of_day,
                self.now(),
            ),
        };
        tasks.upsert(&mut tx, &task).await?;
        initiatives.set_operational(&mut tx, initiative_id, true).await?;
        tx.commit().await?;
        Ok(task)
    }

    pub async fn list_operational(
        &self,
        query: OperationalQuery,
    ) -> Result<Vec<OperationalTask>, TrackerServiceError> {
        Ok(self
            .database
            .operational_tasks()
            .list(query.frequency, query.owner.as_deref())
            .await?)
    }

    /// Stamps an execution now and schedules the next one.
    pub async fn mark_executed(&self, id: &str) -> Result<ExecutionRecorded, TrackerServiceError> {
        let tasks = self.database.operational_tasks();
        let mut tx = self.database.begin_write().await?;
        let task = tasks.fetch_in(&mut tx, id).await?;
        let now = self.now();
        let next = next_execution(task.frequency, Some(now), task.time_of_day, now);
        tasks.mark_executed(&mut tx, id, now, next).await?;
        tx.commit().await?;
        info!(stage = "tracker", task_id = %id, frequency = %task.frequency, "operational task executed");
        Ok(ExecutionRecorded {
            id: task.id,
            last_execution: now,
            next_execution: next,
        })
    }

    pub async fn delete_operational(&self, id: &str) -> Result<(), TrackerServiceError> {
        let tasks = self.database.operational_tasks();
        let mut tx = self.database.begin_write().await?;
        let task = tasks.fetch_in(&mut tx, id).await?;
        tasks.delete(&mut tx, id).await?;
        self.database
            .initiatives()
            .set_operational(&mut tx, &task.initiative_id, false)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_sprint(&self, request: SprintRequest) -> Result<Sprint, TrackerServiceError> {
        let sprint = request.into_sprint(new_id())?;
        let mut conn = self.database.pool().acquire().await?;
        self.database.sprints().insert(&mut conn, &sprint).await?;
        Ok(sprint)
    }

    pub async fn update_sprint(
        &self,
        id: &str,
        request: SprintRequest,
    ) -> Result<Sprint, TrackerServiceError> {
        let sprint = request.into_sprint(id.to_string())?;
        let repo = self.database.sprints();
        let mut tx = self.database.begin_write().await?;
        repo.fetch_in(&mut tx, id).await?;
        repo.update(&mut tx, &sprint).await?;
        tx.commit().await?;
        Ok(sprint)
    }

    pub async fn list_sprints(&self, query: SprintQuery) -> Result<Vec<Sprint>, TrackerServiceError> {
        Ok(self.database.sprints().list(query.quarter.as_deref()).await?)
    }

    pub async fn delete_sprint(&self, id: &str) -> Result<(), TrackerServiceError> {
        let mut tx = self.database.begin_write().await?;
        self.database.sprints().delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_update(
        &self,
        initiative_id: &str,
        request: UpdateRequest,
    ) -> Result<InitiativeUpdate, TrackerServiceError> {
        require_text("title", &request.title)?;
        let now = self.now();
        let update = InitiativeUpdate {
            id: new_id(),
            initiative_id: initiative_id.to_string(),
            update_type: request.update_type,
            title: request.title.trim().to_string(),
            description: request.description,
            author_id: request.author_id,
            created_at: now,
            is_resolved: request.is_resolved,
            resolved_at: resolution_timestamp(request.is_resolved, None, now),
        };
        let mut tx = self.database.begin_write().await?;
        self.database.initiatives().fetch_in(&mut tx, initiative_id).await?;
        self.database.updates().insert(&mut tx, &update).await?;
        tx.commit().await?;
        Ok(update)
    }

    pub async fn edit_update(
        &self,
        id: &str,
        request: UpdateEditRequest,
    ) -> Result<InitiativeUpdate, TrackerServiceError> {
        require_text("title", &request.title)?;
        let repo = self.database.updates();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let update = InitiativeUpdate {
            update_type: request.update_type,
            title: request.title.trim().to_string(),
            description: request.description,
            is_resolved: request.is_resolved,
            resolved_at: resolution_timestamp(request.is_resolved, existing.resolved_at, self.now()),
            ..existing
        };
        repo.update(&mut tx, &update).await?;
        tx.commit().await?;
        Ok(update)
    }

    pub async fn delete_update(&self, id: &str) -> Result<(), TrackerServiceError> {
        let mut tx = self.database.begin_write().await?;
        self.database.updates().delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_metric(
        &self,
        initiative_id: &str,
        request: MetricRequest,
    ) -> Result<InitiativeMetric, TrackerServiceError> {
        let metric = request.into_metric(new_id(), initiative_id.to_string(), self.today())?;
        let mut tx = self.database.begin_write().await?;
        self.database.initiatives().fetch_in(&mut tx, initiative_id).await?;
        self.database.metrics().insert(&mut tx, &metric).await?;
        tx.commit().await?;
        Ok(metric)
    }

    pub async fn update_metric(
        &self,
        id: &str,
        request: MetricRequest,
    ) -> Result<InitiativeMetric, TrackerServiceError> {
        let repo = self.database.metrics();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let metric = request.into_metric(existing.id, existing.initiative_id, self.today())?;
        repo.update(&mut tx, &metric).await?;
        tx.commit().await?;
        Ok(metric)
    }

    pub async fn delete_metric(&self, id: &str) -> Result<(), TrackerServiceError> {
        let mut tx = self.database.begin_write().await?;
        self.database.metrics().delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TrackerServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Blocked(String),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    WorkItems(#[from] WorkItemError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<TrackerServiceError> for ProblemResponse {
    fn from(err: TrackerServiceError) -> Self {
        match err {
            TrackerServiceError::Validation(err) => err.into(),
            TrackerServiceError::Blocked(detail) => ProblemResponse::delete_blocked(detail),
            TrackerServiceError::Tracker(err) => err.into(),
            TrackerServiceError::WorkItems(err) => err.into(),
            TrackerServiceError::Database(err) => err.into(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/quarters", get(list_quarters).post(create_quarter))
        .route("/api/quarters/:id", put(update_quarter).delete(delete_quarter))
        .route("/api/quarters/:id/activate", post(activate_quarter))
        .route("/api/quarters/:id/summary", get(quarter_summary))
        .route(
            "/api/initiative-types",
            get(list_initiative_types).post(create_initiative_type),
        )
        .route("/api/initiative-types/:id", delete(delete_initiative_type))
        .route("/api/initiatives", get(list_initiatives).post(create_initiative))
        .route("/api/initiatives/quick", post(quick_initiative))
        .route(
            "/api/initiatives/:id",
            get(initiative_detail)
                .put(update_initiative)
                .delete(delete_initiative),
        )
        .route("/api/initiatives/:id/status", post(set_initiative_status))
        .route("/api/initiatives/:id/operational", put(upsert_operational))
        .route("/api/initiatives/:id/updates", post(create_update))
        .route("/api/initiatives/:id/metrics", post(create_metric))
        .route("/api/operational-tasks", get(list_operational))
        .route("/api/operational-tasks/:id", delete(delete_operational))
        .route("/api/operational-tasks/:id/executed", post(mark_executed))
        .route("/api/sprints", get(list_sprints).post(create_sprint))
        .route("/api/sprints/:id", put(update_sprint).delete(delete_sprint))
        .route("/api/updates/:id", put(edit_update).delete(delete_update))
        .route("/api/metrics/:id", put(update_metric).delete(delete_metric))
}

async fn create_quarter(
    State(state): State<AppState>,
    Json(request): Json<QuarterRequest>,
) -> Result<(StatusCode, Json<Quarter>), ProblemResponse> {
    let quarter = state.tracker().create_quarter(request).await?;
    Ok((StatusCode::CREATED, Json(quarter)))
}

async fn list_quarters(State(state): State<AppState>) -> Result<Json<Vec<Quarter>>, ProblemResponse> {
    Ok(Json(state.tracker().list_quarters().await?))
}

async fn update_quarter(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<QuarterRequest>,
) -> Result<Json<Quarter>, ProblemResponse> {
    Ok(Json(state.tracker().update_quarter(&id, request).await?))
}

async fn activate_quarter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse<Quarter>>, ProblemResponse> {
    let quarter = state.tracker().activate_quarter(&id).await?;
    Ok(ActionResponse::ok(format!("{quarter} is now the active quarter"), quarter))
}

async fn delete_quarter(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_quarter(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn quarter_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QuarterSummary>, ProblemResponse> {
    Ok(Json(state.tracker().quarter_summary(&id).await?))
}

async fn create_initiative_type(
    State(state): State<AppState>,
    Json(request): Json<InitiativeTypeRequest>,
) -> Result<(StatusCode, Json<InitiativeType>), ProblemResponse> {
    let kind = state.tracker().create_initiative_type(request).await?;
    Ok((StatusCode::CREATED, Json(kind)))
}

async fn list_initiative_types(
    State(state): State<AppState>,
) -> Result<Json<Vec<InitiativeType>>, ProblemResponse> {
    Ok(Json(state.tracker().list_initiative_types().await?))
}

async fn delete_initiative_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_initiative_type(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_initiative(
    State(state): State<AppState>,
    Json(request): Json<InitiativeRequest>,
) -> Result<(StatusCode, Json<Initiative>), ProblemResponse> {
    let initiative = state.tracker().create_initiative(request).await?;
    Ok((StatusCode::CREATED, Json(initiative)))
}

async fn quick_initiative(
    State(state): State<AppState>,
    Json(request): Json<QuickInitiativeRequest>,
) -> Result<(StatusCode, Json<Initiative>), ProblemResponse> {
    let initiative = state.tracker().quick_initiative(request).await?;
    Ok((StatusCode::CREATED, Json(initiative)))
}

async fn list_initiatives(
    State(state): State<AppState>,
    Query(query): Query<InitiativeQuery>,
) -> Result<Json<Vec<Initiative>>, ProblemResponse> {
    Ok(Json(state.tracker().list_initiatives(query).await?))
}

async fn initiative_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InitiativeDetail>, ProblemResponse> {
    Ok(Json(state.tracker().initiative_detail(&id).await?))
}

async fn update_initiative(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InitiativeRequest>,
) -> Result<Json<Initiative>, ProblemResponse> {
    Ok(Json(state.tracker().update_initiative(&id, request).await?))
}

async fn set_initiative_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<InitiativeStatusRequest>,
) -> Result<Json<ActionResponse<InitiativeStatusChange>>, ProblemResponse> {
    let change = state
        .tracker()
        .set_initiative_status(&id, request.status)
        .await?;
    Ok(ActionResponse::ok(format!("status changed to {}", change.status), change))
}

async fn delete_initiative(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_initiative(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_operational(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<OperationalRequest>,
) -> Result<Json<OperationalTask>, ProblemResponse> {
    Ok(Json(state.tracker().upsert_operational(&id, request).await?))
}

async fn list_operational(
    State(state): State<AppState>,
    Query(query): Query<OperationalQuery>,
) -> Result<Json<Vec<OperationalTask>>, ProblemResponse> {
    Ok(Json(state.tracker().list_operational(query).await?))
}

async fn mark_executed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse<ExecutionRecorded>>, ProblemResponse> {
    let recorded = state.tracker().mark_executed(&id).await?;
    Ok(ActionResponse::ok("execution recorded", recorded))
}

async fn delete_operational(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_operational(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_sprint(
    State(state): State<AppState>,
    Json(request): Json<SprintRequest>,
) -> Result<(StatusCode, Json<Sprint>), ProblemResponse> {
    let sprint = state.tracker().create_sprint(request).await?;
    Ok((StatusCode::CREATED, Json(sprint)))
}

async fn list_sprints(
    State(state): State<AppState>,
    Query(query): Query<SprintQuery>,
) -> Result<Json<Vec<Sprint>>, ProblemResponse> {
    Ok(Json(state.tracker().list_sprints(query).await?))
}

async fn update_sprint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SprintRequest>,
) -> Result<Json<Sprint>, ProblemResponse> {
    Ok(Json(state.tracker().update_sprint(&id, request).await?))
}

async fn delete_sprint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_sprint(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<(StatusCode, Json<InitiativeUpdate>), ProblemResponse> {
    let update = state.tracker().create_update(&id, request).await?;
    Ok((StatusCode::CREATED, Json(update)))
}

async fn edit_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateEditRequest>,
) -> Result<Json<InitiativeUpdate>, ProblemResponse> {
    Ok(Json(state.tracker().edit_update(&id, request).await?))
}

async fn delete_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_update(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MetricRequest>,
) -> Result<(StatusCode, Json<InitiativeMetric>), ProblemResponse> {
    let metric = state.tracker().create_metric(&id, request).await?;
    Ok((StatusCode::CREATED, Json(metric)))
}

async fn update_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MetricRequest>,
) -> Result<Json<InitiativeMetric>, ProblemResponse> {
    Ok(Json(state.tracker().update_metric(&id, request).await?))
}

async fn delete_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.tracker().delete_metric(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
