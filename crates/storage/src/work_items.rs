use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

use boss_core::types::{Task, UnknownVariant, UserStory};

use crate::{is_foreign_key_violation, to_rfc3339};

/// Repository for user stories.
#[derive(Clone)]
pub struct StoryRepository {
    pool: SqlitePool,
}

const STORY_COLUMNS: &str = "id, initiative_id, title, description, acceptance_criteria, story_points, \
     priority, status, assignee_id, sprint_id, progress_percentage, created_at, updated_at, \
     started_at, completed_at";

impl StoryRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        story: &UserStory,
    ) -> Result<(), WorkItemError> {
        sqlx::query(
            "INSERT INTO user_stories \
             (id, initiative_id, title, description, acceptance_criteria, story_points, priority, status, \
              assignee_id, sprint_id, progress_percentage, created_at, updated_at, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&story.id)
        .bind(&story.initiative_id)
        .bind(&story.title)
        .bind(&story.description)
        .bind(&story.acceptance_criteria)
        .bind(story.story_points.map(i64::from))
        .bind(story.priority.as_str())
        .bind(story.status.as_str())
        .bind(&story.assignee_id)
        .bind(&story.sprint_id)
        .bind(story.progress_percentage)
        .bind(to_rfc3339(story.created_at))
        .bind(to_rfc3339(story.updated_at))
        .bind(story.started_at.map(to_rfc3339))
        .bind(story.completed_at.map(to_rfc3339))
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        Ok(())
    }

    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        story: &UserStory,
    ) -> Result<(), WorkItemError> {
        let result = sqlx::query(
            "UPDATE user_stories SET title = ?, description = ?, acceptance_criteria = ?, story_points = ?, \
             priority = ?, status = ?, assignee_id = ?, sprint_id = ?, progress_percentage = ?, \
             updated_at = ?, started_at = ?, completed_at = ? WHERE id = ?",
        )
        .bind(&story.title)
        .bind(&story.description)
        .bind(&story.acceptance_criteria)
        .bind(story.story_points.map(i64::from))
        .bind(story.priority.as_str())
        .bind(story.status.as_str())
        .bind(&story.assignee_id)
        .bind(&story.sprint_id)
        .bind(story.progress_percentage)
        .bind(to_rfc3339(story.updated_at))
        .bind(story.started_at.map(to_rfc3339))
        .bind(story.completed_at.map(to_rfc3339))
        .bind(&story.id)
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        if result.rows_affected() == 0 {
            return Err(WorkItemError::NotFound("user story"));
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<UserStory, WorkItemError> {
        let row = sqlx::query_as::<_, StoryRow>(&format!(
            "SELECT {STORY_COLUMNS} FROM user_stories WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(WorkItemError::NotFound("user story"))?;
        row.into_domain()
    }

    pub async fn fetch(&self, id: &str) -> Result<UserStory, WorkItemError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch_in(&mut conn, id).await
    }

    /// Stories of an initiative, highest priority first.
    pub async fn list_for_initiative(
        &self,
        initiative_id: &str,
    ) -> Result<Vec<UserStory>, WorkItemError> {
        let rows = sqlx::query_as::<_, StoryRow>(&format!(
            "SELECT {STORY_COLUMNS} FROM user_stories WHERE initiative_id = ? \
             ORDER BY CASE priority WHEN 'CRITICAL' THEN 3 WHEN 'HIGH' THEN 2 \
             WHEN 'MEDIUM' THEN 1 ELSE 0 END DESC, created_at"
        ))
        .bind(initiative_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StoryRow::into_domain).collect()
    }

    /// Completion percentages of every story of an initiative.
    pub async fn percentages_for_initiative(
        &self,
        conn: &mut SqliteConnection,
        initiative_id: &str,
    ) -> Result<Vec<f64>, WorkItemError> {
        let rows: Vec<(f64,)> =
            sqlx::query_as("SELECT progress_percentage FROM user_stories WHERE initiative_id = ?")
                .bind(initiative_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(rows.into_iter().map(|(percentage,)| percentage).collect())
    }

    pub async fn set_progress(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        percentage: f64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), WorkItemError> {
        let result = sqlx::query(
            "UPDATE user_stories SET progress_percentage = ?, updated_at = ? WHERE id = ?",
        )
        .bind(percentage)
        .bind(to_rfc3339(updated_at))
        .bind(id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WorkItemError::NotFound("user story"));
        }
        Ok(())
    }

    /// Deletes the story; its tasks cascade.
    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), WorkItemError> {
        let result = sqlx::query("DELETE FROM user_stories WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WorkItemError::NotFound("user story"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StoryRow {
    id: String,
    initiative_id: String,
    title: String,
    description: String,
    acceptance_criteria: String,
    story_points: Option<i64>,
    priority: String,
    status: String,
    assignee_id: Option<String>,
    sprint_id: Option<String>,
    progress_percentage: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl StoryRow {
    fn into_domain(self) -> Result<UserStory, WorkItemError> {
        Ok(UserStory {
            id: self.id,
            initiative_id: self.initiative_id,
            title: self.title,
            description: self.description,
            acceptance_criteria: self.acceptance_criteria,
            story_points: self.story_points.map(|points| points as u8),
            priority: self.priority.parse()?,
            status: self.status.parse()?,
            assignee_id: self.assignee_id,
            sprint_id: self.sprint_id,
            progress_percentage: self.progress_percentage,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

/// Repository for tasks.
#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

const TASK_COLUMNS: &str = "id, user_story_id, title, description, task_type, status, assignee_id, \
     estimated_hours, actual_hours, blocked_reason, created_at, updated_at, started_at, completed_at";

impl TaskRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, task: &Task) -> Result<(), WorkItemError> {
        sqlx::query(
            "INSERT INTO tasks \
             (id, user_story_id, title, description, task_type, status, assignee_id, estimated_hours, \
              actual_hours, blocked_reason, created_at, updated_at, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.user_story_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.assignee_id)
        .bind(task.estimated_hours)
        .bind(task.actual_hours)
        .bind(&task.blocked_reason)
        .bind(to_rfc3339(task.created_at))
        .bind(to_rfc3339(task.updated_at))
        .bind(task.started_at.map(to_rfc3339))
        .bind(task.completed_at.map(to_rfc3339))
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        Ok(())
    }

    pub async fn update(&self, conn: &mut SqliteConnection, task: &Task) -> Result<(), WorkItemError> {
        let result = sqlx::query(
            "UPDATE tasks SET title = ?, description = ?, task_type = ?, status = ?, assignee_id = ?, \
             estimated_hours = ?, actual_hours = ?, blocked_reason = ?, updated_at = ?, started_at = ?, \
             completed_at = ? WHERE id = ?",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.assignee_id)
        .bind(task.estimated_hours)
        .bind(task.actual_hours)
        .bind(&task.blocked_reason)
        .bind(to_rfc3339(task.updated_at))
        .bind(task.started_at.map(to_rfc3339))
        .bind(task.completed_at.map(to_rfc3339))
        .bind(&task.id)
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        if result.rows_affected() == 0 {
            return Err(WorkItemError::NotFound("task"));
        }
        Ok(())
    }

    pub async fn fetch_in(&self, conn: &mut SqliteConnection, id: &str) -> Result<Task, WorkItemError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(WorkItemError::NotFound("task"))?;
        row.into_domain()
    }

    pub async fn fetch(&self, id: &str) -> Result<Task, WorkItemError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch_in(&mut conn, id).await
    }

    /// Tasks of a story in creation order.
    pub async fn list_for_story(&self, story_id: &str) -> Result<Vec<Task>, WorkItemError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_story_id = ? ORDER BY created_at, id"
        ))
        .bind(story_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TaskRow::into_domain).collect()
    }

    /// `(done, total)` task counts of a story.
    pub async fn completion_counts(
        &self,
        conn: &mut SqliteConnection,
        story_id: &str,
    ) -> Result<(usize, usize), WorkItemError> {
        let (done, total): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN status = 'DONE' THEN 1 ELSE 0 END), 0), COUNT(*) \
             FROM tasks WHERE user_story_id = ?",
        )
        .bind(story_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok((done.max(0) as usize, total.max(0) as usize))
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), WorkItemError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WorkItemError::NotFound("task"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: String,
    user_story_id: String,
    title: String,
    description: String,
    task_type: String,
    status: String,
    assignee_id: Option<String>,
    estimated_hours: Option<f64>,
    actual_hours: Option<f64>,
    blocked_reason: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    fn into_domain(self) -> Result<Task, WorkItemError> {
        Ok(Task {
            id: self.id,
            user_story_id: self.user_story_id,
            title: self.title,
            description: self.description,
            task_type: self.task_type.parse()?,
            status: self.status.parse()?,
            assignee_id: self.assignee_id,
            estimated_hours: self.estimated_hours,
            actual_hours: self.actual_hours,
            blocked_reason: self.blocked_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn map_reference(err: sqlx::Error) -> WorkItemError {
    if is_foreign_key_violation(&err) {
        WorkItemError::MissingReference
    } else {
        WorkItemError::Database(err)
    }
}

/// Errors raised by the story and task repositories.
#[derive(Debug, Error)]
pub enum WorkItemError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("referenced initiative, sprint, story or assignee does not exist")]
    MissingReference,
    #[error("stored value is invalid: {0}")]
    InvalidColumn(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
