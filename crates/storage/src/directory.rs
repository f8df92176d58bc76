use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;

use boss_core::types::Employee;

use crate::{is_foreign_key_violation, to_rfc3339, unique_violation};

/// Repository for employee records.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

/// Optional filters applied when listing employees.
#[derive(Debug, Default, Clone)]
pub struct EmployeeFilter {
    /// Matched against names, username, email and employee code.
    pub search: Option<String>,
    pub department: Option<String>,
    pub is_active: Option<bool>,
}

/// Rows that keep an employee from being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmployeeReferences {
    pub owned_initiatives: i64,
    pub authored_updates: i64,
}

impl EmployeeReferences {
    pub fn is_blocking(&self) -> bool {
        self.owned_initiatives > 0 || self.authored_updates > 0
    }
}

const EMPLOYEE_COLUMNS: &str = "id, employee_code, username, first_name, last_name, email, phone, mobile, \
     birth_date, hire_date, position, department, emergency_contact, emergency_phone, notes, \
     is_active, created_at, updated_at";

impl EmployeeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new employee.
    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        employee: &Employee,
    ) -> Result<(), DirectoryError> {
        sqlx::query(
            "INSERT INTO employees \
             (id, employee_code, username, first_name, last_name, email, phone, mobile, birth_date, hire_date, \
              position, department, emergency_contact, emergency_phone, notes, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&employee.id)
        .bind(&employee.employee_code)
        .bind(&employee.username)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.phone)
        .bind(&employee.mobile)
        .bind(employee.birth_date)
        .bind(employee.hire_date)
        .bind(&employee.position)
        .bind(&employee.department)
        .bind(&employee.emergency_contact)
        .bind(&employee.emergency_phone)
        .bind(&employee.notes)
        .bind(employee.is_active)
        .bind(to_rfc3339(employee.created_at))
        .bind(to_rfc3339(employee.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(|err| map_unique(err, employee))?;
        Ok(())
    }

    /// Overwrites every editable field of an existing employee.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        employee: &Employee,
    ) -> Result<(), DirectoryError> {
        let result = sqlx::query(
            "UPDATE employees SET employee_code = ?, username = ?, first_name = ?, last_name = ?, email = ?, \
             phone = ?, mobile = ?, birth_date = ?, hire_date = ?, position = ?, department = ?, \
             emergency_contact = ?, emergency_phone = ?, notes = ?, is_active = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&employee.employee_code)
        .bind(&employee.username)
        .bind(&employee.first_name)
        .bind(&employee.last_name)
        .bind(&employee.email)
        .bind(&employee.phone)
        .bind(&employee.mobile)
        .bind(employee.birth_date)
        .bind(employee.hire_date)
        .bind(&employee.position)
        .bind(&employee.department)
        .bind(&employee.emergency_contact)
        .bind(&employee.emergency_phone)
        .bind(&employee.notes)
        .bind(employee.is_active)
        .bind(to_rfc3339(employee.updated_at))
        .bind(&employee.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_unique(err, employee))?;

        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound);
        }
        Ok(())
    }

    /// Fetches one employee through the given connection.
    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Employee, DirectoryError> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(DirectoryError::NotFound)?;
        Ok(row.into_domain())
    }

    pub async fn fetch(&self, id: &str) -> Result<Employee, DirectoryError> {
        let mut conn = self.pool.acquire().await?;
        self.fetch_in(&mut conn, id).await
    }

    /// Lists employees ordered by last and first name.
    pub async fn list(&self, filter: &EmployeeFilter) -> Result<Vec<Employee>, DirectoryError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE 1 = 1"));

        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            builder.push(" AND (");
            for (index, column) in [
                "first_name",
                "last_name",
                "username",
                "email",
                "employee_code",
            ]
            .iter()
            .enumerate()
            {
                if index > 0 {
                    builder.push(" OR ");
                }
                builder.push(format!("LOWER({column}) LIKE "));
                builder.push_bind(pattern.clone());
            }
            builder.push(")");
        }
        if let Some(department) = filter.department.as_deref().filter(|d| !d.is_empty()) {
            builder.push(" AND department = ");
            builder.push_bind(department.to_string());
        }
        if let Some(active) = filter.is_active {
            builder.push(" AND is_active = ");
            builder.push_bind(active);
        }
        builder.push(" ORDER BY last_name, first_name");

        let rows = builder
            .build_query_as::<EmployeeRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EmployeeRow::into_domain).collect())
    }

    /// Distinct departments of active employees.
    pub async fn departments(&self) -> Result<Vec<String>, DirectoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT department FROM employees \
             WHERE is_active = 1 AND department <> '' ORDER BY department",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(department,)| department).collect())
    }

    /// Counts the rows that restrict deletion of the employee.
    pub async fn references(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<EmployeeReferences, DirectoryError> {
        let (owned_initiatives, authored_updates): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM initiatives WHERE owner_id = ?), \
                    (SELECT COUNT(*) FROM initiative_updates WHERE author_id = ?)",
        )
        .bind(id)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(EmployeeReferences {
            owned_initiatives,
            authored_updates,
        })
    }

    /// Deletes the employee, clearing story and task assignments first.
    ///
    /// Collaborator links, absences and vacation balances cascade.
    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), DirectoryError> {
        sqlx::query("UPDATE user_stories SET assignee_id = NULL WHERE assignee_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE tasks SET assignee_id = NULL WHERE assignee_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM initiative_collaborators WHERE employee_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    DirectoryError::StillReferenced
                } else {
                    DirectoryError::Database(err)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound);
        }
        Ok(())
    }

    /// Number of active employees.
    pub async fn count_active(&self) -> Result<i64, DirectoryError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM employees WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn map_unique(err: sqlx::Error, employee: &Employee) -> DirectoryError {
    match unique_violation(&err) {
        Some(columns) if columns.contains("employees.username") => {
            DirectoryError::DuplicateUsername(employee.username.clone())
        }
        Some(columns) if columns.contains("employees.employee_code") => {
            DirectoryError::DuplicateCode(employee.employee_code.clone())
        }
        _ => DirectoryError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeRow {
    id: String,
    employee_code: String,
    username: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    mobile: String,
    birth_date: NaiveDate,
    hire_date: NaiveDate,
    position: String,
    department: String,
    emergency_contact: String,
    emergency_phone: String,
    notes: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EmployeeRow {
    fn into_domain(self) -> Employee {
        Employee {
            id: self.id,
            employee_code: self.employee_code,
            username: self.username,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            mobile: self.mobile,
            birth_date: self.birth_date,
            hire_date: self.hire_date,
            position: self.position,
            department: self.department,
            emergency_contact: self.emergency_contact,
            emergency_phone: self.emergency_phone,
            notes: self.notes,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Errors raised by the employee repository.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("employee not found")]
    NotFound,
    #[error("employee code {0} is already in use")]
    DuplicateCode(String),
    #[error("username {0} is already in use")]
    DuplicateUsername(String),
    #[error("employee still owns initiatives or authored updates")]
    StillReferenced,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{employee, insert_employee, insert_initiative, insert_quarter, setup_db};

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let db = setup_db().await;
        let stored = insert_employee(&db, "EMP001").await;

        let fetched = db.employees().fetch(&stored.id).await.expect("fetch");
        assert_eq!(fetched.employee_code, "EMP001");
        assert_eq!(fetched.birth_date, stored.birth_date);
        assert!(fetched.is_active);
    }

    #[tokio::test]
    async fn duplicate_code_and_username_are_reported() {
        let db = setup_db().await;
        insert_employee(&db, "EMP001").await;
        let repo = db.employees();

        let mut clash = employee("EMP001");
        clash.username = "someone-else".into();
        let mut tx = db.begin().await.unwrap();
        let err = repo.insert(&mut tx, &clash).await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateCode(code) if code == "EMP001"));
        drop(tx);

        let mut clash = employee("EMP002");
        clash.username = "emp001".into();
        let mut tx = db.begin().await.unwrap();
        let err = repo.insert(&mut tx, &clash).await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateUsername(name) if name == "emp001"));
    }

    #[tokio::test]
    async fn list_filters_by_search_department_and_status() {
        let db = setup_db().await;
        let ana = insert_employee(&db, "ANA").await;
        let mut bruno = employee("BRUNO");
        bruno.department = "Sales".into();
        bruno.is_active = false;
        let mut tx = db.begin().await.unwrap();
        db.employees().insert(&mut tx, &bruno).await.unwrap();
        tx.commit().await.unwrap();

        let repo = db.employees();
        let found = repo
            .list(&EmployeeFilter {
                search: Some("ana".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ana.id);

        let sales = repo
            .list(&EmployeeFilter {
                department: Some("Sales".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sales.len(), 1);

        let active = repo
            .list(&EmployeeFilter {
                is_active: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(repo.departments().await.unwrap(), vec!["Technology"]);
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn initiative_owner_is_reported_as_blocking() {
        let db = setup_db().await;
        let owner = insert_employee(&db, "OWNER").await;
        let quarter = insert_quarter(&db, 2026, 4, true).await;
        insert_initiative(&db, &owner, &quarter).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let refs = db.employees().references(&mut conn, &owner.id).await.unwrap();
        assert_eq!(refs.owned_initiatives, 1);
        assert!(refs.is_blocking());
    }

    #[tokio::test]
    async fn deleting_an_owner_reports_remaining_references() {
        let db = setup_db().await;
        let owner = insert_employee(&db, "OWNER").await;
        let quarter = insert_quarter(&db, 2026, 4, true).await;
        insert_initiative(&db, &owner, &quarter).await;

        let mut tx = db.begin().await.unwrap();
        let err = db.employees().delete(&mut tx, &owner.id).await.unwrap_err();
        assert!(matches!(err, DirectoryError::StillReferenced), "{err:?}");
    }

    #[tokio::test]
    async fn deleting_a_collaborator_drops_the_membership() {
        let db = setup_db().await;
        let owner = insert_employee(&db, "OWNER").await;
        let helper = insert_employee(&db, "HELPER").await;
        let quarter = insert_quarter(&db, 2026, 4, true).await;
        let mut initiative = insert_initiative(&db, &owner, &quarter).await;
        initiative.collaborator_ids = vec![helper.id.clone()];

        let mut tx = db.begin().await.unwrap();
        db.initiatives().update(&mut tx, &initiative).await.unwrap();
        db.employees().delete(&mut tx, &helper.id).await.unwrap();
        tx.commit().await.unwrap();

        let fetched = db.initiatives().fetch(&initiative.id).await.unwrap();
        assert!(fetched.collaborator_ids.is_empty());
        assert!(matches!(
            db.employees().fetch(&helper.id).await.unwrap_err(),
            DirectoryError::NotFound
        ));
    }

    #[tokio::test]
    async fn delete_missing_employee_is_not_found() {
        let db = setup_db().await;
        let mut tx = db.begin().await.unwrap();
        let err = db.employees().delete(&mut tx, "nobody").await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound));
    }
}
