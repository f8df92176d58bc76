use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;

use boss_core::types::{
    Frequency, Initiative, InitiativeCategory, InitiativeMetric, InitiativeStatus, InitiativeType,
    InitiativeUpdate, OperationalTask, Priority, Quarter, Sprint, UnknownVariant, UpdateType,
};

use crate::{is_foreign_key_violation, to_rfc3339, unique_violation};

/// Repository for planning quarters.
#[derive(Clone)]
pub struct QuarterRepository {
    pool: SqlitePool,
}

const QUARTER_COLUMNS: &str = "id, year, quarter, start_date, end_date, is_active";

impl QuarterRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the quarter as inactive. Use [`QuarterRepository::activate`] to make it current.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        quarter: &Quarter,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO quarters (id, year, quarter, start_date, end_date, is_active) \
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(&quarter.id)
        .bind(quarter.year)
        .bind(i64::from(quarter.quarter))
        .bind(quarter.start_date)
        .bind(quarter.end_date)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_quarter(err, quarter))?;
        Ok(())
    }

    /// Updates year, number and dates. The active flag is left alone.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        quarter: &Quarter,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE quarters SET year = ?, quarter = ?, start_date = ?, end_date = ? WHERE id = ?",
        )
        .bind(quarter.year)
        .bind(i64::from(quarter.quarter))
        .bind(quarter.start_date)
        .bind(quarter.end_date)
        .bind(&quarter.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_quarter(err, quarter))?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("quarter"));
        }
        Ok(())
    }

    /// Marks the quarter active and clears the flag on every other quarter.
    pub async fn activate(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        sqlx::query("UPDATE quarters SET is_active = 0 WHERE is_active = 1 AND id <> ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        let result = sqlx::query("UPDATE quarters SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("quarter"));
        }
        Ok(())
    }

    pub async fn deactivate(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        sqlx::query("UPDATE quarters SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Quarter, TrackerError> {
        let row = sqlx::query_as::<_, QuarterRow>(&format!(
            "SELECT {QUARTER_COLUMNS} FROM quarters WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TrackerError::NotFound("quarter"))?;
        Ok(row.into_domain())
    }

    pub async fn fetch(&self, id: &str) -> Result<Quarter, TrackerError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch_in(&mut conn, id).await
    }

    /// Quarters, latest first.
    pub async fn list(&self) -> Result<Vec<Quarter>, TrackerError> {
        let rows = sqlx::query_as::<_, QuarterRow>(&format!(
            "SELECT {QUARTER_COLUMNS} FROM quarters ORDER BY year DESC, quarter DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QuarterRow::into_domain).collect())
    }

    pub async fn active_in(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<Quarter>, TrackerError> {
        let row = sqlx::query_as::<_, QuarterRow>(&format!(
            "SELECT {QUARTER_COLUMNS} FROM quarters WHERE is_active = 1"
        ))
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(QuarterRow::into_domain))
    }

    pub async fn active(&self) -> Result<Option<Quarter>, TrackerError> {
        let mut conn = self.pool.acquire().await?;
        self.active_in(&mut conn).await
    }

    /// Number of initiatives planned in the quarter.
    pub async fn initiative_count(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<i64, TrackerError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM initiatives WHERE quarter_id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Deletes the quarter together with its sprints.
    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM quarters WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|err| map_in_use(err, "quarter"))?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("quarter"));
        }
        Ok(())
    }
}

fn map_quarter(err: sqlx::Error, quarter: &Quarter) -> TrackerError {
    match unique_violation(&err) {
        Some(columns) if columns.contains("quarters.year") => TrackerError::DuplicateQuarter {
            year: quarter.year,
            quarter: quarter.quarter,
        },
        _ => TrackerError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QuarterRow {
    id: String,
    year: i32,
    quarter: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    is_active: bool,
}

impl QuarterRow {
    fn into_domain(self) -> Quarter {
        Quarter {
            id: self.id,
            year: self.year,
            quarter: self.quarter as u8,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: self.is_active,
        }
    }
}

/// Repository for the initiative type catalogue.
#[derive(Clone)]
pub struct InitiativeTypeRepository {
    pool: SqlitePool,
}

impl InitiativeTypeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        kind: &InitiativeType,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO initiative_types (id, name, category, description, color) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&kind.id)
        .bind(&kind.name)
        .bind(kind.category.as_str())
        .bind(&kind.description)
        .bind(&kind.color)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<InitiativeType>, TrackerError> {
        let rows = sqlx::query_as::<_, InitiativeTypeRow>(
            "SELECT id, name, category, description, color FROM initiative_types ORDER BY category, name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InitiativeTypeRow::into_domain).collect()
    }

    pub async fn usage_count(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<i64, TrackerError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM initiatives WHERE initiative_type_id = ?")
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count)
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM initiative_types WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|err| map_in_use(err, "initiative type"))?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("initiative type"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InitiativeTypeRow {
    id: String,
    name: String,
    category: String,
    description: String,
    color: String,
}

impl InitiativeTypeRow {
    fn into_domain(self) -> Result<InitiativeType, TrackerError> {
        Ok(InitiativeType {
            id: self.id,
            name: self.name,
            category: self.category.parse::<InitiativeCategory>()?,
            description: self.description,
            color: self.color,
        })
    }
}

/// Repository for initiatives and their collaborator links.
#[derive(Clone)]
pub struct InitiativeRepository {
    pool: SqlitePool,
}

/// Optional filters applied when listing initiatives.
#[derive(Debug, Default, Clone)]
pub struct InitiativeFilter {
    pub quarter_id: Option<String>,
    pub status: Option<InitiativeStatus>,
    pub priority: Option<Priority>,
    pub owner_id: Option<String>,
    pub initiative_type_id: Option<String>,
    /// Matched against title and description.
    pub search: Option<String>,
}

/// Number of initiatives in one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCount {
    pub status: InitiativeStatus,
    pub count: i64,
}

const INITIATIVE_SELECT: &str = "SELECT i.id, i.title, i.description, i.initiative_type_id, i.owner_id, \
     i.quarter_id, i.status, i.priority, i.start_date, i.target_date, i.completion_date, i.progress, \
     i.is_operational, i.created_at, i.updated_at, \
     (SELECT GROUP_CONCAT(c.employee_id) FROM initiative_collaborators AS c \
       WHERE c.initiative_id = i.id) AS collaborator_ids \
     FROM initiatives AS i";

impl InitiativeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the initiative and its collaborator links.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        initiative: &Initiative,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO initiatives \
             (id, title, description, initiative_type_id, owner_id, quarter_id, status, priority, \
              start_date, target_date, completion_date, progress, is_operational, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&initiative.id)
        .bind(&initiative.title)
        .bind(&initiative.description)
        .bind(&initiative.initiative_type_id)
        .bind(&initiative.owner_id)
        .bind(&initiative.quarter_id)
        .bind(initiative.status.as_str())
        .bind(initiative.priority.as_str())
        .bind(initiative.start_date)
        .bind(initiative.target_date)
        .bind(initiative.completion_date)
        .bind(i64::from(initiative.progress))
        .bind(initiative.is_operational)
        .bind(to_rfc3339(initiative.created_at))
        .bind(to_rfc3339(initiative.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;

        self.replace_collaborators(conn, &initiative.id, &initiative.collaborator_ids)
            .await
    }

    /// Overwrites the initiative fields and its collaborator links.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        initiative: &Initiative,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE initiatives SET title = ?, description = ?, initiative_type_id = ?, owner_id = ?, \
             quarter_id = ?, status = ?, priority = ?, start_date = ?, target_date = ?, completion_date = ?, \
             progress = ?, is_operational = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&initiative.title)
        .bind(&initiative.description)
        .bind(&initiative.initiative_type_id)
        .bind(&initiative.owner_id)
        .bind(&initiative.quarter_id)
        .bind(initiative.status.as_str())
        .bind(initiative.priority.as_str())
        .bind(initiative.start_date)
        .bind(initiative.target_date)
        .bind(initiative.completion_date)
        .bind(i64::from(initiative.progress))
        .bind(initiative.is_operational)
        .bind(to_rfc3339(initiative.updated_at))
        .bind(&initiative.id)
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("initiative"));
        }

        self.replace_collaborators(conn, &initiative.id, &initiative.collaborator_ids)
            .await
    }

    async fn replace_collaborators(
        &self,
        conn: &mut SqliteConnection,
        initiative_id: &str,
        collaborator_ids: &[String],
    ) -> Result<(), TrackerError> {
        sqlx::query("DELETE FROM initiative_collaborators WHERE initiative_id = ?")
            .bind(initiative_id)
            .execute(&mut *conn)
            .await?;
        for employee_id in collaborator_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO initiative_collaborators (initiative_id, employee_id) VALUES (?, ?)",
            )
            .bind(initiative_id)
            .bind(employee_id)
            .execute(&mut *conn)
            .await
            .map_err(map_reference)?;
        }
        Ok(())
    }

    /// Persists a status change together with the aligned completion date.
    pub async fn set_status(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: InitiativeStatus,
        completion_date: Option<NaiveDate>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE initiatives SET status = ?, completion_date = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(completion_date)
        .bind(to_rfc3339(updated_at))
        .bind(id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("initiative"));
        }
        Ok(())
    }

    pub async fn set_progress(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        progress: u8,
        updated_at: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let result =
            sqlx::query("UPDATE initiatives SET progress = ?, updated_at = ? WHERE id = ?")
                .bind(i64::from(progress))
                .bind(to_rfc3339(updated_at))
                .bind(id)
                .execute(&mut *conn)
                .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("initiative"));
        }
        Ok(())
    }

    pub async fn set_operational(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        is_operational: bool,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query("UPDATE initiatives SET is_operational = ? WHERE id = ?")
            .bind(is_operational)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("initiative"));
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Initiative, TrackerError> {
        let row = sqlx::query_as::<_, InitiativeRow>(&format!("{INITIATIVE_SELECT} WHERE i.id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(TrackerError::NotFound("initiative"))?;
        row.into_domain()
    }

    pub async fn fetch(&self, id: &str) -> Result<Initiative, TrackerError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch_in(&mut conn, id).await
    }

    /// Lists initiatives, highest priority and newest first.
    pub async fn list(&self, filter: &InitiativeFilter) -> Result<Vec<Initiative>, TrackerError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("{INITIATIVE_SELECT} WHERE 1 = 1"));
        if let Some(quarter_id) = &filter.quarter_id {
            builder.push(" AND i.quarter_id = ");
            builder.push_bind(quarter_id.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND i.status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            builder.push(" AND i.priority = ");
            builder.push_bind(priority.as_str());
        }
        if let Some(owner_id) = &filter.owner_id {
            builder.push(" AND i.owner_id = ");
            builder.push_bind(owner_id.clone());
        }
        if let Some(type_id) = &filter.initiative_type_id {
            builder.push(" AND i.initiative_type_id = ");
            builder.push_bind(type_id.clone());
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            builder.push(" AND (LOWER(i.title) LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR LOWER(i.description) LIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
        builder.push(
            " ORDER BY CASE i.priority WHEN 'CRITICAL' THEN 3 WHEN 'HIGH' THEN 2 \
             WHEN 'MEDIUM' THEN 1 ELSE 0 END DESC, i.created_at DESC",
        );

        let rows = builder
            .build_query_as::<InitiativeRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(InitiativeRow::into_domain).collect()
    }

    /// Initiative counts per status, optionally limited to one quarter.
    pub async fn status_counts(
        &self,
        quarter_id: Option<&str>,
    ) -> Result<Vec<StatusCount>, TrackerError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM initiatives \
             WHERE (? IS NULL OR quarter_id = ?) GROUP BY status ORDER BY status",
        )
        .bind(quarter_id)
        .bind(quarter_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(status, count)| -> Result<StatusCount, TrackerError> {
                Ok(StatusCount {
                    status: status.parse()?,
                    count,
                })
            })
            .collect()
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM initiatives WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("initiative"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InitiativeRow {
    id: String,
    title: String,
    description: String,
    initiative_type_id: String,
    owner_id: String,
    quarter_id: String,
    status: String,
    priority: String,
    start_date: Option<NaiveDate>,
    target_date: Option<NaiveDate>,
    completion_date: Option<NaiveDate>,
    progress: i64,
    is_operational: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    collaborator_ids: Option<String>,
}

impl InitiativeRow {
    fn into_domain(self) -> Result<Initiative, TrackerError> {
        let mut collaborator_ids: Vec<String> = self
            .collaborator_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        collaborator_ids.sort();
        Ok(Initiative {
            id: self.id,
            title: self.title,
            description: self.description,
            initiative_type_id: self.initiative_type_id,
            owner_id: self.owner_id,
            quarter_id: self.quarter_id,
            collaborator_ids,
            status: self.status.parse()?,
            priority: self.priority.parse()?,
            start_date: self.start_date,
            target_date: self.target_date,
            completion_date: self.completion_date,
            progress: self.progress.clamp(0, 100) as u8,
            is_operational: self.is_operational,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for recurring operational schedules.
#[derive(Clone)]
pub struct OperationalTaskRepository {
    pool: SqlitePool,
}

const OPERATIONAL_COLUMNS: &str = "o.id, o.initiative_id, o.frequency, o.day_of_week, o.day_of_month, \
     o.time_of_day, o.duration_hours, o.last_execution, o.next_execution";

impl OperationalTaskRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates or replaces the schedule of an initiative.
    pub async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        task: &OperationalTask,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO operational_tasks \
             (id, initiative_id, frequency, day_of_week, day_of_month, time_of_day, duration_hours, \
              last_execution, next_execution) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(initiative_id) DO UPDATE SET \
               frequency = excluded.frequency, day_of_week = excluded.day_of_week, \
               day_of_month = excluded.day_of_month, time_of_day = excluded.time_of_day, \
               duration_hours = excluded.duration_hours, last_execution = excluded.last_execution, \
               next_execution = excluded.next_execution",
        )
        .bind(&task.id)
        .bind(&task.initiative_id)
        .bind(task.frequency.as_str())
        .bind(task.day_of_week.map(i64::from))
        .bind(task.day_of_month.map(i64::from))
        .bind(task.time_of_day)
        .bind(task.duration_hours)
        .bind(task.last_execution.map(to_rfc3339))
        .bind(task.next_execution.map(to_rfc3339))
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<OperationalTask, TrackerError> {
        let row = sqlx::query_as::<_, OperationalTaskRow>(&format!(
            "SELECT {OPERATIONAL_COLUMNS} FROM operational_tasks AS o WHERE o.id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TrackerError::NotFound("operational task"))?;
        row.into_domain()
    }

    pub async fn find_for_initiative(
        &self,
        conn: &mut SqliteConnection,
        initiative_id: &str,
    ) -> Result<Option<OperationalTask>, TrackerError> {
        let row = sqlx::query_as::<_, OperationalTaskRow>(&format!(
            "SELECT {OPERATIONAL_COLUMNS} FROM operational_tasks AS o WHERE o.initiative_id = ?"
        ))
        .bind(initiative_id)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(OperationalTaskRow::into_domain).transpose()
    }

    /// Schedules ordered by next execution, unscheduled last.
    pub async fn list(
        &self,
        frequency: Option<Frequency>,
        owner_id: Option<&str>,
    ) -> Result<Vec<OperationalTask>, TrackerError> {
        let rows = sqlx::query_as::<_, OperationalTaskRow>(&format!(
            "SELECT {OPERATIONAL_COLUMNS} FROM operational_tasks AS o \
               JOIN initiatives AS i ON i.id = o.initiative_id \
              WHERE (? IS NULL OR o.frequency = ?) AND (? IS NULL OR i.owner_id = ?) \
              ORDER BY o.next_execution IS NULL, o.next_execution"
        ))
        .bind(frequency.map(Frequency::as_str))
        .bind(frequency.map(Frequency::as_str))
        .bind(owner_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OperationalTaskRow::into_domain).collect()
    }

    pub async fn mark_executed(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        last_execution: DateTime<Utc>,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE operational_tasks SET last_execution = ?, next_execution = ? WHERE id = ?",
        )
        .bind(to_rfc3339(last_execution))
        .bind(next_execution.map(to_rfc3339))
        .bind(id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("operational task"));
        }
        Ok(())
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM operational_tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("operational task"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OperationalTaskRow {
    id: String,
    initiative_id: String,
    frequency: String,
    day_of_week: Option<i64>,
    day_of_month: Option<i64>,
    time_of_day: Option<NaiveTime>,
    duration_hours: Option<f64>,
    last_execution: Option<DateTime<Utc>>,
    next_execution: Option<DateTime<Utc>>,
}

impl OperationalTaskRow {
    fn into_domain(self) -> Result<OperationalTask, TrackerError> {
        Ok(OperationalTask {
            id: self.id,
            initiative_id: self.initiative_id,
            frequency: self.frequency.parse()?,
            day_of_week: self.day_of_week.map(|day| day as u8),
            day_of_month: self.day_of_month.map(|day| day as u8),
            time_of_day: self.time_of_day,
            duration_hours: self.duration_hours,
            last_execution: self.last_execution,
            next_execution: self.next_execution,
        })
    }
}

/// Repository for sprints.
#[derive(Clone)]
pub struct SprintRepository {
    pool: SqlitePool,
}

const SPRINT_COLUMNS: &str = "id, name, quarter_id, sprint_number, start_date, end_date, goal, is_active";

impl SprintRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, sprint: &Sprint) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO sprints (id, name, quarter_id, sprint_number, start_date, end_date, goal, is_active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&sprint.id)
        .bind(&sprint.name)
        .bind(&sprint.quarter_id)
        .bind(sprint.sprint_number)
        .bind(sprint.start_date)
        .bind(sprint.end_date)
        .bind(&sprint.goal)
        .bind(sprint.is_active)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_sprint(err, sprint))?;
        Ok(())
    }

    pub async fn update(&self, conn: &mut SqliteConnection, sprint: &Sprint) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE sprints SET name = ?, quarter_id = ?, sprint_number = ?, start_date = ?, end_date = ?, \
             goal = ?, is_active = ? WHERE id = ?",
        )
        .bind(&sprint.name)
        .bind(&sprint.quarter_id)
        .bind(sprint.sprint_number)
        .bind(sprint.start_date)
        .bind(sprint.end_date)
        .bind(&sprint.goal)
        .bind(sprint.is_active)
        .bind(&sprint.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_sprint(err, sprint))?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("sprint"));
        }
        Ok(())
    }

    pub async fn fetch_in(&self, conn: &mut SqliteConnection, id: &str) -> Result<Sprint, TrackerError> {
        let row = sqlx::query_as::<_, SprintRow>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TrackerError::NotFound("sprint"))?;
        Ok(row.into_domain())
    }

    /// Sprints ordered by start date, optionally limited to one quarter.
    pub async fn list(&self, quarter_id: Option<&str>) -> Result<Vec<Sprint>, TrackerError> {
        let rows = sqlx::query_as::<_, SprintRow>(&format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints WHERE (? IS NULL OR quarter_id = ?) \
             ORDER BY start_date, sprint_number"
        ))
        .bind(quarter_id)
        .bind(quarter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SprintRow::into_domain).collect())
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM sprints WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("sprint"));
        }
        Ok(())
    }
}

fn map_sprint(err: sqlx::Error, sprint: &Sprint) -> TrackerError {
    if unique_violation(&err).is_some() {
        return TrackerError::DuplicateSprint {
            sprint_number: sprint.sprint_number,
        };
    }
    map_reference(err)
}

#[derive(Debug, sqlx::FromRow)]
struct SprintRow {
    id: String,
    name: String,
    quarter_id: String,
    sprint_number: i64,
    start_date: NaiveDate,
    end_date: NaiveDate,
    goal: String,
    is_active: bool,
}

impl SprintRow {
    fn into_domain(self) -> Sprint {
        Sprint {
            id: self.id,
            name: self.name,
            quarter_id: self.quarter_id,
            sprint_number: self.sprint_number,
            start_date: self.start_date,
            end_date: self.end_date,
            goal: self.goal,
            is_active: self.is_active,
        }
    }
}

/// Repository for initiative updates.
#[derive(Clone)]
pub struct UpdateRepository {
    pool: SqlitePool,
}

const UPDATE_COLUMNS: &str =
    "id, initiative_id, update_type, title, description, author_id, created_at, is_resolved, resolved_at";

impl UpdateRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        update: &InitiativeUpdate,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO initiative_updates \
             (id, initiative_id, update_type, title, description, author_id, created_at, is_resolved, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&update.id)
        .bind(&update.initiative_id)
        .bind(update.update_type.as_str())
        .bind(&update.title)
        .bind(&update.description)
        .bind(&update.author_id)
        .bind(to_rfc3339(update.created_at))
        .bind(update.is_resolved)
        .bind(update.resolved_at.map(to_rfc3339))
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        Ok(())
    }

    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        update: &InitiativeUpdate,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE initiative_updates SET update_type = ?, title = ?, description = ?, \
             is_resolved = ?, resolved_at = ? WHERE id = ?",
        )
        .bind(update.update_type.as_str())
        .bind(&update.title)
        .bind(&update.description)
        .bind(update.is_resolved)
        .bind(update.resolved_at.map(to_rfc3339))
        .bind(&update.id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("update"));
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<InitiativeUpdate, TrackerError> {
        let row = sqlx::query_as::<_, UpdateRow>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM initiative_updates WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TrackerError::NotFound("update"))?;
        row.into_domain()
    }

    /// Updates of an initiative, newest first.
    pub async fn list_for_initiative(
        &self,
        initiative_id: &str,
    ) -> Result<Vec<InitiativeUpdate>, TrackerError> {
        let rows = sqlx::query_as::<_, UpdateRow>(&format!(
            "SELECT {UPDATE_COLUMNS} FROM initiative_updates WHERE initiative_id = ? ORDER BY created_at DESC"
        ))
        .bind(initiative_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(UpdateRow::into_domain).collect()
    }

    /// Unresolved blockers across the initiatives of a quarter.
    pub async fn open_blockers(&self, quarter_id: &str) -> Result<i64, TrackerError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM initiative_updates AS u \
               JOIN initiatives AS i ON i.id = u.initiative_id \
              WHERE i.quarter_id = ? AND u.update_type = 'BLOCKER' AND u.is_resolved = 0",
        )
        .bind(quarter_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM initiative_updates WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("update"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UpdateRow {
    id: String,
    initiative_id: String,
    update_type: String,
    title: String,
    description: String,
    author_id: String,
    created_at: DateTime<Utc>,
    is_resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
}

impl UpdateRow {
    fn into_domain(self) -> Result<InitiativeUpdate, TrackerError> {
        Ok(InitiativeUpdate {
            id: self.id,
            initiative_id: self.initiative_id,
            update_type: self.update_type.parse::<UpdateType>()?,
            title: self.title,
            description: self.description,
            author_id: self.author_id,
            created_at: self.created_at,
            is_resolved: self.is_resolved,
            resolved_at: self.resolved_at,
        })
    }
}

/// Repository for initiative metrics.
#[derive(Clone)]
pub struct MetricRepository {
    pool: SqlitePool,
}

const METRIC_COLUMNS: &str =
    "id, initiative_id, metric_name, target_value, current_value, unit, measured_at";

impl MetricRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        metric: &InitiativeMetric,
    ) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO initiative_metrics \
             (id, initiative_id, metric_name, target_value, current_value, unit, measured_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metric.id)
        .bind(&metric.initiative_id)
        .bind(&metric.metric_name)
        .bind(metric.target_value)
        .bind(metric.current_value)
        .bind(&metric.unit)
        .bind(metric.measured_at)
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        Ok(())
    }

    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        metric: &InitiativeMetric,
    ) -> Result<(), TrackerError> {
        let result = sqlx::query(
            "UPDATE initiative_metrics SET metric_name = ?, target_value = ?, current_value = ?, \
             unit = ?, measured_at = ? WHERE id = ?",
        )
        .bind(&metric.metric_name)
        .bind(metric.target_value)
        .bind(metric.current_value)
        .bind(&metric.unit)
        .bind(metric.measured_at)
        .bind(&metric.id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("metric"));
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<InitiativeMetric, TrackerError> {
        let row = sqlx::query_as::<_, MetricRow>(&format!(
            "SELECT {METRIC_COLUMNS} FROM initiative_metrics WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(TrackerError::NotFound("metric"))?;
        Ok(row.into_domain())
    }

    /// Metrics of an initiative, latest measurement first.
    pub async fn list_for_initiative(
        &self,
        initiative_id: &str,
    ) -> Result<Vec<InitiativeMetric>, TrackerError> {
        let rows = sqlx::query_as::<_, MetricRow>(&format!(
            "SELECT {METRIC_COLUMNS} FROM initiative_metrics WHERE initiative_id = ? \
             ORDER BY measured_at DESC, metric_name"
        ))
        .bind(initiative_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MetricRow::into_domain).collect())
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), TrackerError> {
        let result = sqlx::query("DELETE FROM initiative_metrics WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TrackerError::NotFound("metric"));
        }
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MetricRow {
    id: String,
    initiative_id: String,
    metric_name: String,
    target_value: f64,
    current_value: f64,
    unit: String,
    measured_at: NaiveDate,
}

impl MetricRow {
    fn into_domain(self) -> InitiativeMetric {
        InitiativeMetric {
            achievement_percentage: boss_core::tracker::achievement_percentage(
                self.current_value,
                self.target_value,
            ),
            id: self.id,
            initiative_id: self.initiative_id,
            metric_name: self.metric_name,
            target_value: self.target_value,
            current_value: self.current_value,
            unit: self.unit,
            measured_at: self.measured_at,
        }
    }
}

fn map_reference(err: sqlx::Error) -> TrackerError {
    if is_foreign_key_violation(&err) {
        TrackerError::MissingReference
    } else {
        TrackerError::Database(err)
    }
}

fn map_in_use(err: sqlx::Error, entity: &'static str) -> TrackerError {
    if is_foreign_key_violation(&err) {
        TrackerError::InUse(entity)
    } else {
        TrackerError::Database(err)
    }
}

/// Errors raised by the tracker repositories.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Q{quarter} {year} already exists")]
    DuplicateQuarter { year: i32, quarter: u8 },
    #[error("sprint number {sprint_number} already exists in this quarter")]
    DuplicateSprint { sprint_number: i64 },
    #[error("a referenced record does not exist")]
    MissingReference,
    #[error("{0} is still referenced by initiatives")]
    InUse(&'static str),
    #[error("stored value is invalid: {0}")]
    InvalidColumn(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
