use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info};

use boss_core::error::require_text;
use boss_core::progress::{initiative_progress, story_progress, StatusTimestamps};
use boss_core::tracker::validate_story_points;
use boss_core::types::{Priority, StoryStatus, Task, TaskStatus, TaskType, UserStory};
use boss_core::ValidationError;
use boss_storage::{new_id, Database, TrackerError, WorkItemError};

use crate::problem::ProblemResponse;
use crate::router::{ActionResponse, AppState, Clock};

#[derive(Debug, Clone, Deserialize)]
pub struct StoryRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    pub story_points: Option<i64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: StoryStatus,
    pub assignee_id: Option<String>,
    pub sprint_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub status: TaskStatus,
    pub assignee_id: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    #[serde(default)]
    pub blocked_reason: String,
}

impl TaskRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("title", &self.title)?;
        for (field, hours) in [
            ("estimated_hours", self.estimated_hours),
            ("actual_hours", self.actual_hours),
        ] {
            if let Some(value) = hours.filter(|value| *value < 0.0) {
                return Err(ValidationError::Negative { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest<S> {
    pub status: S,
}

/// Story with its tasks.
#[derive(Debug, Serialize)]
pub struct StoryDetail {
    #[serde(flatten)]
    pub story: UserStory,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct StoryStatusChange {
    pub id: String,
    pub status: StoryStatus,
    pub progress_percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusChange {
    pub id: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub story_progress: f64,
}

/// What caused a progress rollup, recorded as a metric label.
#[derive(Debug, Clone, Copy)]
enum RollupTrigger {
    Story,
    Task,
}

impl RollupTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::Task => "task",
        }
    }
}

/// User stories and tasks, and the progress rollup they drive.
#[derive(Clone)]
pub struct WorkItemService {
    database: Database,
    clock: Clock,
}

impl WorkItemService {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Recomputes the story percentage from its tasks, then the initiative average.
    async fn rollup_story(
        &self,
        conn: &mut SqliteConnection,
        story_id: &str,
        trigger: RollupTrigger,
    ) -> Result<f64, WorkItemServiceError> {
        let stories = self.database.stories();
        let story = stories.fetch_in(conn, story_id).await?;
        let (done, total) = self.database.tasks().completion_counts(conn, story_id).await?;
        let percentage = story_progress(done, total, story.status);
        stories.set_progress(conn, story_id, percentage, self.now()).await?;
        self.rollup_initiative(conn, &story.initiative_id, trigger).await?;
        Ok(percentage)
    }

    async fn rollup_initiative(
        &self,
        conn: &mut SqliteConnection,
        initiative_id: &str,
        trigger: RollupTrigger,
    ) -> Result<(), WorkItemServiceError> {
        let percentages = self
            .database
            .stories()
            .percentages_for_initiative(conn, initiative_id)
            .await?;
        if let Some(progress) = initiative_progress(&percentages) {
            self.database
                .initiatives()
                .set_progress(conn, initiative_id, progress, self.now())
                .await?;
            debug!(stage = "rollup", initiative_id = %initiative_id, progress, stories = percentages.len(), "initiative progress updated");
        }
        counter!("progress_rollups_total", "trigger" => trigger.as_str()).increment(1);
        Ok(())
    }

    fn build_story(
        &self,
        request: StoryRequest,
        existing: Option<&UserStory>,
        initiative_id: String,
    ) -> Result<UserStory, ValidationError> {
        require_text("title", &request.title)?;
        let story_points = validate_story_points(request.story_points)?;
        let now = self.now();
        let timestamps = existing
            .map(|story| StatusTimestamps {
                started_at: story.started_at,
                completed_at: story.completed_at,
            })
            .unwrap_or_default()
            .apply(request.status, now);

        Ok(UserStory {
            id: existing.map_or_else(new_id, |story| story.id.clone()),
            initiative_id,
            title: request.title.trim().to_string(),
            description: request.description,
            acceptance_criteria: request.acceptance_criteria,
            story_points,
            priority: request.priority,
            status: request.status,
            assignee_id: request.assignee_id,
            sprint_id: request.sprint_id,
            progress_percentage: existing.map_or(0.0, |story| story.progress_percentage),
            created_at: existing.map_or(now, |story| story.created_at),
            updated_at: now,
            started_at: timestamps.started_at,
            completed_at: timestamps.completed_at,
        })
    }

    pub async fn create_story(
        &self,
        initiative_id: &str,
        request: StoryRequest,
    ) -> Result<UserStory, WorkItemServiceError> {
        let story = self.build_story(request, None, initiative_id.to_string())?;
        let stories = self.database.stories();
        let mut tx = self.database.begin_write().await?;
        self.database.initiatives().fetch_in(&mut tx, initiative_id).await?;
        stories.insert(&mut tx, &story).await?;
        self.rollup_story(&mut tx, &story.id, RollupTrigger::Story).await?;
        let stored = stories.fetch_in(&mut tx, &story.id).await?;
        tx.commit().await?;
        info!(stage = "work_items", story_id = %stored.id, initiative_id = %initiative_id, "user story created");
        Ok(stored)
    }

    pub async fn story_detail(&self, id: &str) -> Result<StoryDetail, WorkItemServiceError> {
        let story = self.database.stories().fetch(id).await?;
        let tasks = self.database.tasks().list_for_story(id).await?;
        Ok(StoryDetail { story, tasks })
    }

    pub async fn update_story(
        &self,
        id: &str,
        request: StoryRequest,
    ) -> Result<UserStory, WorkItemServiceError> {
        let stories = self.database.stories();
        let mut tx = self.database.begin_write().await?;
        let existing = stories.fetch_in(&mut tx, id).await?;
        let story = self.build_story(request, Some(&existing), existing.initiative_id.clone())?;
        stories.update(&mut tx, &story).await?;
        self.rollup_story(&mut tx, id, RollupTrigger::Story).await?;
        let stored = stories.fetch_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    pub async fn set_story_status(
        &self,
        id: &str,
        status: StoryStatus,
    ) -> Result<StoryStatusChange, WorkItemServiceError> {
        let stories = self.database.stories();
        let mut tx = self.database.begin_write().await?;
        let existing = stories.fetch_in(&mut tx, id).await?;
        let timestamps = StatusTimestamps {
            started_at: existing.started_at,
            completed_at: existing.completed_at,
        }
        .apply(status, self.now());
        let story = UserStory {
            status,
            started_at: timestamps.started_at,
            completed_at: timestamps.completed_at,
            updated_at: self.now(),
            ..existing
        };
        stories.update(&mut tx, &story).await?;
        let progress_percentage = self.rollup_story(&mut tx, id, RollupTrigger::Story).await?;
        tx.commit().await?;
        info!(stage = "work_items", story_id = %id, status = %status, "user story moved");
        Ok(StoryStatusChange {
            id: story.id,
            status,
            progress_percentage,
            started_at: story.started_at,
            completed_at: story.completed_at,
        })
    }

    pub async fn delete_story(&self, id: &str) -> Result<(), WorkItemServiceError> {
        let stories = self.database.stories();
        let mut tx = self.database.begin_write().await?;
        let story = stories.fetch_in(&mut tx, id).await?;
        stories.delete(&mut tx, id).await?;
        self.rollup_initiative(&mut tx, &story.initiative_id, RollupTrigger::Story)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    fn build_task(
        &self,
        request: TaskRequest,
        existing: Option<&Task>,
        story_id: String,
    ) -> Result<Task, ValidationError> {
        request.validate()?;
        let now = self.now();
        let timestamps = existing
            .map(|task| StatusTimestamps {
                started_at: task.started_at,
                completed_at: task.completed_at,
            })
            .unwrap_or_default()
            .apply(request.status, now);

        Ok(Task {
            id: existing.map_or_else(new_id, |task| task.id.clone()),
            user_story_id: story_id,
            title: request.title.trim().to_string(),
            description: request.description,
            task_type: request.task_type,
            status: request.status,
            assignee_id: request.assignee_id,
            estimated_hours: request.estimated_hours,
            actual_hours: request.actual_hours,
            blocked_reason: request.blocked_reason,
            created_at: existing.map_or(now, |task| task.created_at),
            updated_at: now,
            started_at: timestamps.started_at,
            completed_at: timestamps.completed_at,
        })
    }

    pub async fn create_task(
        &self,
        story_id: &str,
        request: TaskRequest,
    ) -> Result<Task, WorkItemServiceError> {
        let task = self.build_task(request, None, story_id.to_string())?;
        let tasks = self.database.tasks();
        let mut tx = self.database.begin_write().await?;
        self.database.stories().fetch_in(&mut tx, story_id).await?;
        tasks.insert(&mut tx, &task).await?;
        self.rollup_story(&mut tx, story_id, RollupTrigger::Task).await?;
        tx.commit().await?;
        info!(stage = "work_items", task_id = %task.id, story_id = %story_id, "task created");
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, WorkItemServiceError> {
        Ok(self.database.tasks().fetch(id).await?)
    }

    pub async fn update_task(&self, id: &str, request: TaskRequest) -> Result<Task, WorkItemServiceError> {
        let tasks = self.database.tasks();
        let mut tx = self.database.begin_write().await?;
        let existing = tasks.fetch_in(&mut tx, id).await?;
        let task = self.build_task(request, Some(&existing), existing.user_story_id.clone())?;
        tasks.update(&mut tx, &task).await?;
        self.rollup_story(&mut tx, &task.user_story_id, RollupTrigger::Task)
            .await?;
        tx.commit().await?;
        Ok(task)
    }

    pub async fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Result<TaskStatusChange, WorkItemServiceError> {
        let tasks = self.database.tasks();
        let mut tx = self.database.begin_write().await?;
        let existing = tasks.fetch_in(&mut tx, id).await?;
        let timestamps = StatusTimestamps {
            started_at: existing.started_at,
            completed_at: existing.completed_at,
        }
        .apply(status, self.now());
        let task = Task {
            status,
            started_at: timestamps.started_at,
            completed_at: timestamps.completed_at,
            updated_at: self.now(),
            ..existing
        };
        tasks.update(&mut tx, &task).await?;
        let story_progress = self
            .rollup_story(&mut tx, &task.user_story_id, RollupTrigger::Task)
            .await?;
        tx.commit().await?;
        info!(stage = "work_items", task_id = %id, status = %status, "task moved");
        Ok(TaskStatusChange {
            id: task.id,
            status,
            started_at: task.started_at,
            completed_at: task.completed_at,
            story_progress,
        })
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), WorkItemServiceError> {
        let tasks = self.database.tasks();
        let mut tx = self.database.begin_write().await?;
        let task = tasks.fetch_in(&mut tx, id).await?;
        tasks.delete(&mut tx, id).await?;
        self.rollup_story(&mut tx, &task.user_story_id, RollupTrigger::Task)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WorkItemServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    WorkItems(#[from] WorkItemError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<WorkItemServiceError> for ProblemResponse {
    fn from(err: WorkItemServiceError) -> Self {
        match err {
            WorkItemServiceError::Validation(err) => err.into(),
            WorkItemServiceError::WorkItems(err) => err.into(),
            WorkItemServiceError::Tracker(err) => err.into(),
            WorkItemServiceError::Database(err) => err.into(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/initiatives/:id/stories", post(create_story))
        .route(
            "/api/stories/:id",
            get(story_detail).put(update_story).delete(delete_story),
        )
        .route("/api/stories/:id/status", post(set_story_status))
        .route("/api/stories/:id/tasks", post(create_task))
        .route("/api/tasks/:id", get(get_task).put(update_task).delete(delete_task))
        .route("/api/tasks/:id/status", post(set_task_status))
}

async fn create_story(
    State(state): State<AppState>,
    Path(initiative_id): Path<String>,
    Json(request): Json<StoryRequest>,
) -> Result<(StatusCode, Json<UserStory>), ProblemResponse> {
    let story = state.work_items().create_story(&initiative_id, request).await?;
    Ok((StatusCode::CREATED, Json(story)))
}

async fn story_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoryDetail>, ProblemResponse> {
    Ok(Json(state.work_items().story_detail(&id).await?))
}

async fn update_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StoryRequest>,
) -> Result<Json<UserStory>, ProblemResponse> {
    Ok(Json(state.work_items().update_story(&id, request).await?))
}

async fn set_story_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest<StoryStatus>>,
) -> Result<Json<ActionResponse<StoryStatusChange>>, ProblemResponse> {
    let change = state.work_items().set_story_status(&id, request.status).await?;
    Ok(ActionResponse::ok(format!("story moved to {}", change.status), change))
}

async fn delete_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.work_items().delete_story(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_task(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Json(request): Json<TaskRequest>,
) -> Result<(StatusCode, Json<Task>), ProblemResponse> {
    let task = state.work_items().create_task(&story_id, request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ProblemResponse> {
    Ok(Json(state.work_items().get_task(&id).await?))
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<Task>, ProblemResponse> {
    Ok(Json(state.work_items().update_task(&id, request).await?))
}

async fn set_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StatusRequest<TaskStatus>>,
) -> Result<Json<ActionResponse<TaskStatusChange>>, ProblemResponse> {
    let change = state.work_items().set_task_status(&id, request.status).await?;
    Ok(ActionResponse::ok(format!("task moved to {}", change.status), change))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.work_items().delete_task(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};

    use crate::router::test_support::{
        create_active_quarter, create_employee, create_initiative, send, setup_app,
    };

    async fn initiative(app: &Router) -> String {
        let owner = create_employee(app, "E001", "1990-03-15").await;
        create_active_quarter(app).await;
        create_initiative(app, &owner).await
    }

    async fn create_story(app: &Router, initiative_id: &str, title: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            &format!("/api/initiatives/{initiative_id}/stories"),
            Some(json!({ "title": title, "story_points": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_task(app: &Router, story_id: &str, body: Value) -> Value {
        let (status, task) = send(app, Method::POST, &format!("/api/stories/{story_id}/tasks"), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{task}");
        task
    }

    async fn initiative_progress(app: &Router, id: &str) -> Value {
        let (_, detail) = send(app, Method::GET, &format!("/api/initiatives/{id}"), None).await;
        detail["progress"].clone()
    }

    #[tokio::test]
    async fn task_status_stamps_and_clears_timestamps() {
        let (_, app) = setup_app().await;
        let initiative_id = initiative(&app).await;
        let story = create_story(&app, &initiative_id, "Checkout form").await;
        let task = create_task(&app, &story, json!({ "title": "Build form" })).await;
        assert_eq!(task["status"], "TODO");
        assert_eq!(task["started_at"], Value::Null);
        let task_id = task["id"].as_str().unwrap();

        let (status, moved) = send(
            &app,
            Method::POST,
            &format!("/api/tasks/{task_id}/status"),
            Some(json!({ "status": "IN_PROGRESS" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["success"], true);
        assert_eq!(moved["started_at"], "2026-10-18T09:00:00Z");
        assert_eq!(moved["completed_at"], Value::Null);

        let (_, done) = send(
            &app,
            Method::POST,
            &format!("/api/tasks/{task_id}/status"),
            Some(json!({ "status": "DONE" })),
        )
        .await;
        assert_eq!(done["completed_at"], "2026-10-18T09:00:00Z");
        assert_eq!(done["story_progress"], 100.0);

        let (_, reopened) = send(
            &app,
            Method::POST,
            &format!("/api/tasks/{task_id}/status"),
            Some(json!({ "status": "IN_REVIEW" })),
        )
        .await;
        assert_eq!(reopened["completed_at"], Value::Null);
        assert_eq!(reopened["started_at"], "2026-10-18T09:00:00Z");
        assert_eq!(reopened["story_progress"], 0.0);
    }

    #[tokio::test]
    async fn progress_rolls_up_to_the_initiative() {
        let (_, app) = setup_app().await;
        let initiative_id = initiative(&app).await;
        let first = create_story(&app, &initiative_id, "Payment provider").await;
        let second = create_story(&app, &initiative_id, "Receipts").await;

        create_task(&app, &first, json!({ "title": "Integrate", "status": "DONE" })).await;
        create_task(&app, &second, json!({ "title": "Template", "status": "DONE" })).await;
        create_task(&app, &second, json!({ "title": "Mailer" })).await;

        let (_, detail) = send(&app, Method::GET, &format!("/api/stories/{second}"), None).await;
        assert_eq!(detail["progress_percentage"], 50.0);
        assert_eq!(detail["tasks"].as_array().unwrap().len(), 2);
        assert_eq!(initiative_progress(&app, &initiative_id).await, 75);

        let (status, _) = send(&app, Method::DELETE, &format!("/api/stories/{first}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(initiative_progress(&app, &initiative_id).await, 50);
    }

    #[tokio::test]
    async fn story_without_tasks_completes_through_its_status() {
        let (_, app) = setup_app().await;
        let initiative_id = initiative(&app).await;
        let story = create_story(&app, &initiative_id, "Copy review").await;

        let (status, moved) = send(
            &app,
            Method::POST,
            &format!("/api/stories/{story}/status"),
            Some(json!({ "status": "DONE" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["progress_percentage"], 100.0);
        assert_eq!(moved["completed_at"], "2026-10-18T09:00:00Z");
        assert_eq!(initiative_progress(&app, &initiative_id).await, 100);
    }

    #[tokio::test]
    async fn story_points_follow_the_fibonacci_scale() {
        let (_, app) = setup_app().await;
        let initiative_id = initiative(&app).await;
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/initiatives/{initiative_id}/stories"),
            Some(json!({ "title": "Odd estimate", "story_points": 4 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "validation_failed");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/initiatives/missing/stories",
            Some(json!({ "title": "Lost" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_an_assignee_unassigns_their_tasks() {
        let (_, app) = setup_app().await;
        let initiative_id = initiative(&app).await;
        let assignee = create_employee(&app, "E002", "1994-07-01").await;
        let story = create_story(&app, &initiative_id, "Search").await;
        let task = create_task(
            &app,
            &story,
            json!({ "title": "Index", "assignee_id": assignee, "estimated_hours": 4.5 }),
        )
        .await;
        let task_id = task["id"].as_str().unwrap();
        assert_eq!(task["assignee_id"], assignee.as_str());

        let (status, _) = send(&app, Method::DELETE, &format!("/api/employees/{assignee}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, task) = send(&app, Method::GET, &format!("/api/tasks/{task_id}"), None).await;
        assert_eq!(task["assignee_id"], Value::Null);
        assert_eq!(task["estimated_hours"], 4.5);
    }

    #[tokio::test]
    async fn negative_hours_are_rejected() {
        let (_, app) = setup_app().await;
        let initiative_id = initiative(&app).await;
        let story = create_story(&app, &initiative_id, "Audit").await;
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/stories/{story}/tasks"),
            Some(json!({ "title": "Log hours", "actual_hours": -1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["detail"], "actual_hours must not be negative (got -1)");
    }
}
