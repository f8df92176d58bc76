mod directory;
mod ledger;
mod tracker;
mod work_items;

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;
use uuid::Uuid;

pub use directory::{DirectoryError, EmployeeFilter, EmployeeReferences, EmployeeRepository};
pub use ledger::{
    AbsenceFilter, AbsenceRepository, AbsenceTypeRepository, LedgerError, VacationRepository,
    VacationWithEmployee,
};
pub use tracker::{
    InitiativeFilter, InitiativeRepository, InitiativeTypeRepository, MetricRepository,
    OperationalTaskRepository, QuarterRepository, SprintRepository, StatusCount, TrackerError,
    UpdateRepository,
};
pub use work_items::{StoryRepository, TaskRepository, WorkItemError};

pub use sqlx::SqliteConnection;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Foreign keys, WAL journaling and the busy timeout are configured on every
    /// pooled connection.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        tracing::info!(stage = "storage", "database migrations applied");
        Ok(())
    }

    /// Begins a deferred SQLite transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Begins a transaction that already holds the write lock.
    ///
    /// A deferred transaction that reads before writing fails with
    /// `SQLITE_BUSY` when another writer commits in between, without waiting
    /// on the busy timeout. Issuing a no-op write first makes concurrent
    /// writers queue on the busy timeout instead.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE absence_types SET id = id WHERE 0")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    pub fn employees(&self) -> EmployeeRepository {
        EmployeeRepository::new(self.pool.clone())
    }

    pub fn absence_types(&self) -> AbsenceTypeRepository {
        AbsenceTypeRepository::new(self.pool.clone())
    }

    pub fn absences(&self) -> AbsenceRepository {
        AbsenceRepository::new(self.pool.clone())
    }

    pub fn vacations(&self) -> VacationRepository {
        VacationRepository::new(self.pool.clone())
    }

    pub fn quarters(&self) -> QuarterRepository {
        QuarterRepository::new(self.pool.clone())
    }

    pub fn initiative_types(&self) -> InitiativeTypeRepository {
        InitiativeTypeRepository::new(self.pool.clone())
    }

    pub fn initiatives(&self) -> InitiativeRepository {
        InitiativeRepository::new(self.pool.clone())
    }

    pub fn operational_tasks(&self) -> OperationalTaskRepository {
        OperationalTaskRepository::new(self.pool.clone())
    }

    pub fn sprints(&self) -> SprintRepository {
        SprintRepository::new(self.pool.clone())
    }

    pub fn updates(&self) -> UpdateRepository {
        UpdateRepository::new(self.pool.clone())
    }

    pub fn metrics(&self) -> MetricRepository {
        MetricRepository::new(self.pool.clone())
    }

    pub fn stories(&self) -> StoryRepository {
        StoryRepository::new(self.pool.clone())
    }

    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Generates a new primary key.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns the violated `table.column` list when `err` is a UNIQUE/PRIMARY KEY violation.
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    match db_err.code().as_deref() {
        Some("2067") | Some("1555") => Some(
            db_err
                .message()
                .trim_start_matches("UNIQUE constraint failed: ")
                .to_string(),
        ),
        _ => None,
    }
}

/// Matches foreign key failures: 787 on insert/update, 1811 when deleting a
/// parent row still held by an `ON DELETE RESTRICT` reference.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if matches!(db_err.code().as_deref(), Some("787") | Some("1811"))
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use boss_core::types::{
        Employee, Initiative, InitiativeCategory, InitiativeStatus, InitiativeType, Priority,
        Quarter,
    };

    use super::{new_id, Database};

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Whole-second instant, so values survive the millisecond text encoding.
    pub fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    pub async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    pub fn employee(code: &str) -> Employee {
        let now = fixed_now();
        Employee {
            id: new_id(),
            employee_code: code.to_string(),
            username: code.to_lowercase(),
            first_name: "Test".to_string(),
            last_name: code.to_string(),
            email: format!("{}@example.com", code.to_lowercase()),
            phone: String::new(),
            mobile: String::new(),
            birth_date: day(1990, 3, 15),
            hire_date: day(2020, 1, 15),
            position: "Engineer".to_string(),
            department: "Technology".to_string(),
            emergency_contact: String::new(),
            emergency_phone: String::new(),
            notes: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn insert_employee(db: &Database, code: &str) -> Employee {
        let employee = employee(code);
        let mut tx = db.begin().await.expect("begin");
        db.employees()
            .insert(&mut tx, &employee)
            .await
            .expect("insert employee");
        tx.commit().await.expect("commit");
        employee
    }

    pub async fn insert_quarter(db: &Database, year: i32, number: u8, active: bool) -> Quarter {
        let (start_date, end_date) =
            boss_core::quarter::quarter_bounds(year, number).expect("bounds");
        let quarter = Quarter {
            id: new_id(),
            year,
            quarter: number,
            start_date,
            end_date,
            is_active: false,
        };
        let mut tx = db.begin().await.expect("begin");
        let repo = db.quarters();
        repo.insert(&mut tx, &quarter).await.expect("insert quarter");
        if active {
            repo.activate(&mut tx, &quarter.id).await.expect("activate");
        }
        tx.commit().await.expect("commit");
        Quarter {
            is_active: active,
            ..quarter
        }
    }

    pub async fn insert_initiative(db: &Database, owner: &Employee, quarter: &Quarter) -> Initiative {
        let kind = InitiativeType {
            id: new_id(),
            name: "Feature".to_string(),
            category: InitiativeCategory::Project,
            description: String::new(),
            color: "#3498db".to_string(),
        };
        let now = fixed_now();
        let initiative = Initiative {
            id: new_id(),
            title: "Launch".to_string(),
            description: "Ship it".to_string(),
            initiative_type_id: kind.id.clone(),
            owner_id: owner.id.clone(),
            quarter_id: quarter.id.clone(),
            collaborator_ids: Vec::new(),
            status: InitiativeStatus::InProgress,
            priority: Priority::High,
            start_date: None,
            target_date: None,
            completion_date: None,
            progress: 0,
            is_operational: false,
            created_at: now,
            updated_at: now,
        };
        let mut tx = db.begin().await.expect("begin");
        db.initiative_types()
            .insert(&mut tx, &kind)
            .await
            .expect("insert type");
        db.initiatives()
            .insert(&mut tx, &initiative)
            .await
            .expect("insert initiative");
        tx.commit().await.expect("commit");
        initiative
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{insert_employee, insert_initiative, insert_quarter, setup_db};
    use super::*;

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
                .fetch_one(db.pool())
                .await
                .expect("fetch tables");
        assert!(tables.0 >= 14, "expected core tables to be created");
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = setup_db().await;
        let err = sqlx::query(
            "INSERT INTO absences (id, employee_id, absence_type_id, start_date, end_date, created_at, updated_at) \
             VALUES ('a-1', 'missing', 'missing', '2026-01-01', '2026-01-01', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await
        .unwrap_err();
        assert!(is_foreign_key_violation(&err));
    }

    #[tokio::test]
    async fn restricted_parent_delete_is_a_foreign_key_violation() {
        let db = setup_db().await;
        let owner = insert_employee(&db, "EMP001").await;
        let quarter = insert_quarter(&db, 2026, 4, true).await;
        insert_initiative(&db, &owner, &quarter).await;

        let err = sqlx::query("DELETE FROM quarters WHERE id = ?")
            .bind(&quarter.id)
            .execute(db.pool())
            .await
            .unwrap_err();
        assert!(is_foreign_key_violation(&err), "{err:?}");
    }

    #[tokio::test]
    async fn write_transactions_queue_instead_of_failing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("boss.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");

        let mut first = db.begin_write().await.expect("first tx");
        let _: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM absence_types")
            .fetch_one(&mut *first)
            .await
            .expect("read in first tx");

        let second_db = db.clone();
        let second = tokio::spawn(async move {
            let mut tx = second_db.begin_write().await?;
            let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM absence_types")
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO absence_types (id, name, code) VALUES ('t-2', 'Sick leave', 'sick')",
            )
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok::<i64, sqlx::Error>(count)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        sqlx::query(
            "INSERT INTO absence_types (id, name, code) VALUES ('t-1', 'Vacation', 'VAC')",
        )
        .execute(&mut *first)
        .await
        .expect("write in first tx");
        first.commit().await.expect("commit first");

        let seen = second.await.expect("join").expect("second tx");
        assert_eq!(seen, 1, "second writer should see the first commit");
    }

    #[tokio::test]
    async fn file_database_is_created_on_connect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("boss.db");
        let url = format!("sqlite://{}", path.display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        assert!(path.exists());
    }
}
