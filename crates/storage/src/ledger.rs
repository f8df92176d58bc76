use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;

use boss_core::types::{Absence, AbsenceType, Vacation};
use boss_core::vacation::used_days;

use crate::{is_foreign_key_violation, to_rfc3339, unique_violation};

/// Repository for the absence type catalogue.
#[derive(Clone)]
pub struct AbsenceTypeRepository {
    pool: SqlitePool,
}

impl AbsenceTypeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        kind: &AbsenceType,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO absence_types (id, name, code, requires_approval, paid, color) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&kind.id)
        .bind(&kind.name)
        .bind(&kind.code)
        .bind(kind.requires_approval)
        .bind(kind.paid)
        .bind(&kind.color)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_type_code(err, &kind.code))?;
        Ok(())
    }

    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        kind: &AbsenceType,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE absence_types SET name = ?, code = ?, requires_approval = ?, paid = ?, color = ? \
             WHERE id = ?",
        )
        .bind(&kind.name)
        .bind(&kind.code)
        .bind(kind.requires_approval)
        .bind(kind.paid)
        .bind(&kind.color)
        .bind(&kind.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_type_code(err, &kind.code))?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AbsenceTypeNotFound);
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<AbsenceType, LedgerError> {
        let row = sqlx::query_as::<_, AbsenceTypeRow>(
            "SELECT id, name, code, requires_approval, paid, color FROM absence_types WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::AbsenceTypeNotFound)?;
        Ok(row.into_domain())
    }

    /// Looks up a type by its (upper-case) code.
    pub async fn find_by_code(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<AbsenceType>, LedgerError> {
        let row = sqlx::query_as::<_, AbsenceTypeRow>(
            "SELECT id, name, code, requires_approval, paid, color FROM absence_types WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(AbsenceTypeRow::into_domain))
    }

    pub async fn list(&self) -> Result<Vec<AbsenceType>, LedgerError> {
        let rows = sqlx::query_as::<_, AbsenceTypeRow>(
            "SELECT id, name, code, requires_approval, paid, color FROM absence_types ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AbsenceTypeRow::into_domain).collect())
    }

    /// Number of absences recorded with the type.
    pub async fn usage_count(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<i64, LedgerError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM absences WHERE absence_type_id = ?")
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count)
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM absence_types WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                if is_foreign_key_violation(&err) {
                    LedgerError::TypeInUse
                } else {
                    LedgerError::Database(err)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AbsenceTypeNotFound);
        }
        Ok(())
    }
}

fn map_type_code(err: sqlx::Error, code: &str) -> LedgerError {
    match unique_violation(&err) {
        Some(columns) if columns.contains("absence_types.code") => {
            LedgerError::DuplicateTypeCode(code.to_string())
        }
        _ => LedgerError::Database(err),
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AbsenceTypeRow {
    id: String,
    name: String,
    code: String,
    requires_approval: bool,
    paid: bool,
    color: String,
}

impl AbsenceTypeRow {
    fn into_domain(self) -> AbsenceType {
        AbsenceType {
            id: self.id,
            name: self.name,
            code: self.code,
            requires_approval: self.requires_approval,
            paid: self.paid,
            color: self.color,
        }
    }
}

/// Repository for absence date ranges.
#[derive(Clone)]
pub struct AbsenceRepository {
    pool: SqlitePool,
}

/// Optional filters applied when listing absences.
#[derive(Debug, Default, Clone)]
pub struct AbsenceFilter {
    pub employee_id: Option<String>,
    pub absence_type_id: Option<String>,
    /// Keeps absences starting on or after this date.
    pub date_from: Option<NaiveDate>,
    /// Keeps absences ending on or before this date.
    pub date_to: Option<NaiveDate>,
}

const ABSENCE_COLUMNS: &str =
    "id, employee_id, absence_type_id, start_date, end_date, reason, notes, created_at, updated_at";

impl AbsenceRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        absence: &Absence,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO absences \
             (id, employee_id, absence_type_id, start_date, end_date, reason, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&absence.id)
        .bind(&absence.employee_id)
        .bind(&absence.absence_type_id)
        .bind(absence.start_date)
        .bind(absence.end_date)
        .bind(&absence.reason)
        .bind(&absence.notes)
        .bind(to_rfc3339(absence.created_at))
        .bind(to_rfc3339(absence.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        Ok(())
    }

    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        absence: &Absence,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE absences SET employee_id = ?, absence_type_id = ?, start_date = ?, end_date = ?, \
             reason = ?, notes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&absence.employee_id)
        .bind(&absence.absence_type_id)
        .bind(absence.start_date)
        .bind(absence.end_date)
        .bind(&absence.reason)
        .bind(&absence.notes)
        .bind(to_rfc3339(absence.updated_at))
        .bind(&absence.id)
        .execute(&mut *conn)
        .await
        .map_err(map_reference)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AbsenceNotFound);
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Absence, LedgerError> {
        let row = sqlx::query_as::<_, AbsenceRow>(&format!(
            "SELECT {ABSENCE_COLUMNS} FROM absences WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::AbsenceNotFound)?;
        Ok(row.into_domain())
    }

    /// Lists absences, most recent start date first.
    pub async fn list(&self, filter: &AbsenceFilter) -> Result<Vec<Absence>, LedgerError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {ABSENCE_COLUMNS} FROM absences WHERE 1 = 1"));
        if let Some(employee_id) = &filter.employee_id {
            builder.push(" AND employee_id = ");
            builder.push_bind(employee_id.clone());
        }
        if let Some(type_id) = &filter.absence_type_id {
            builder.push(" AND absence_type_id = ");
            builder.push_bind(type_id.clone());
        }
        if let Some(from) = filter.date_from {
            builder.push(" AND start_date >= ");
            builder.push_bind(from);
        }
        if let Some(to) = filter.date_to {
            builder.push(" AND end_date <= ");
            builder.push_bind(to);
        }
        builder.push(" ORDER BY start_date DESC, created_at DESC");

        let rows = builder
            .build_query_as::<AbsenceRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AbsenceRow::into_domain).collect())
    }

    /// Absences of active employees that cover `today`.
    pub async fn current(&self, today: NaiveDate) -> Result<Vec<Absence>, LedgerError> {
        let rows = sqlx::query_as::<_, AbsenceRow>(
            "SELECT a.id, a.employee_id, a.absence_type_id, a.start_date, a.end_date, a.reason, a.notes, \
                    a.created_at, a.updated_at \
               FROM absences AS a \
               JOIN employees AS e ON e.id = a.employee_id \
              WHERE a.start_date <= ? AND a.end_date >= ? AND e.is_active = 1 \
              ORDER BY a.end_date",
        )
        .bind(today)
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AbsenceRow::into_domain).collect())
    }

    /// Days consumed by absences of `absence_type_id` starting in `year`.
    ///
    /// `exclude_id` leaves out the absence being edited.
    pub async fn days_used(
        &self,
        conn: &mut SqliteConnection,
        employee_id: &str,
        absence_type_id: &str,
        year: i32,
        exclude_id: Option<&str>,
    ) -> Result<i64, LedgerError> {
        let spans: Vec<(NaiveDate, NaiveDate)> = sqlx::query_as(
            "SELECT start_date, end_date FROM absences \
             WHERE employee_id = ? AND absence_type_id = ? \
               AND CAST(strftime('%Y', start_date) AS INTEGER) = ? \
               AND (? IS NULL OR id <> ?)",
        )
        .bind(employee_id)
        .bind(absence_type_id)
        .bind(year)
        .bind(exclude_id)
        .bind(exclude_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(used_days(spans))
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM absences WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AbsenceNotFound);
        }
        Ok(())
    }
}

fn map_reference(err: sqlx::Error) -> LedgerError {
    if is_foreign_key_violation(&err) {
        LedgerError::MissingReference
    } else {
        LedgerError::Database(err)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AbsenceRow {
    id: String,
    employee_id: String,
    absence_type_id: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    reason: String,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AbsenceRow {
    fn into_domain(self) -> Absence {
        Absence {
            id: self.id,
            employee_id: self.employee_id,
            absence_type_id: self.absence_type_id,
            start_date: self.start_date,
            end_date: self.end_date,
            reason: self.reason,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Repository for yearly vacation balances.
#[derive(Clone)]
pub struct VacationRepository {
    pool: SqlitePool,
}

/// Vacation balance joined with the employee's display name.
#[derive(Debug, Clone, PartialEq)]
pub struct VacationWithEmployee {
    pub vacation: Vacation,
    pub employee_name: String,
}

const VACATION_COLUMNS: &str =
    "id, employee_id, year, days_entitled, days_taken, days_pending, notes, created_at, updated_at";

impl VacationRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut SqliteConnection,
        vacation: &Vacation,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO vacations \
             (id, employee_id, year, days_entitled, days_taken, days_pending, notes, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&vacation.id)
        .bind(&vacation.employee_id)
        .bind(vacation.year)
        .bind(vacation.days_entitled)
        .bind(vacation.days_taken)
        .bind(vacation.days_pending)
        .bind(&vacation.notes)
        .bind(to_rfc3339(vacation.created_at))
        .bind(to_rfc3339(vacation.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(|err| map_vacation(err, vacation))?;
        Ok(())
    }

    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        vacation: &Vacation,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE vacations SET employee_id = ?, year = ?, days_entitled = ?, days_taken = ?, \
             days_pending = ?, notes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&vacation.employee_id)
        .bind(vacation.year)
        .bind(vacation.days_entitled)
        .bind(vacation.days_taken)
        .bind(vacation.days_pending)
        .bind(&vacation.notes)
        .bind(to_rfc3339(vacation.updated_at))
        .bind(&vacation.id)
        .execute(&mut *conn)
        .await
        .map_err(|err| map_vacation(err, vacation))?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::VacationNotFound);
        }
        Ok(())
    }

    pub async fn fetch_in(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Vacation, LedgerError> {
        let row = sqlx::query_as::<_, VacationRow>(&format!(
            "SELECT {VACATION_COLUMNS} FROM vacations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::VacationNotFound)?;
        Ok(row.into_domain())
    }

    /// Balance of `employee_id` for `year`, if one was recorded.
    pub async fn find_for_year(
        &self,
        conn: &mut SqliteConnection,
        employee_id: &str,
        year: i32,
    ) -> Result<Option<Vacation>, LedgerError> {
        let row = sqlx::query_as::<_, VacationRow>(&format!(
            "SELECT {VACATION_COLUMNS} FROM vacations WHERE employee_id = ? AND year = ?"
        ))
        .bind(employee_id)
        .bind(year)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(VacationRow::into_domain))
    }

    /// Balances of one employee, latest year first.
    pub async fn list_for_employee(&self, employee_id: &str) -> Result<Vec<Vacation>, LedgerError> {
        let rows = sqlx::query_as::<_, VacationRow>(&format!(
            "SELECT {VACATION_COLUMNS} FROM vacations WHERE employee_id = ? ORDER BY year DESC"
        ))
        .bind(employee_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(VacationRow::into_domain).collect())
    }

    /// Balances recorded for `year`, ordered by employee name.
    pub async fn list_for_year(&self, year: i32) -> Result<Vec<VacationWithEmployee>, LedgerError> {
        let rows = sqlx::query_as::<_, VacationSummaryRow>(
            "SELECT v.id, v.employee_id, v.year, v.days_entitled, v.days_taken, v.days_pending, v.notes, \
                    v.created_at, v.updated_at, e.first_name || ' ' || e.last_name AS employee_name \
               FROM vacations AS v \
               JOIN employees AS e ON e.id = v.employee_id \
              WHERE v.year = ? \
              ORDER BY e.last_name, e.first_name",
        )
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| VacationWithEmployee {
                employee_name: row.employee_name,
                vacation: row.vacation.into_domain(),
            })
            .collect())
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM vacations WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::VacationNotFound);
        }
        Ok(())
    }
}

fn map_vacation(err: sqlx::Error, vacation: &Vacation) -> LedgerError {
    if unique_violation(&err).is_some() {
        return LedgerError::DuplicateVacation {
            employee_id: vacation.employee_id.clone(),
            year: vacation.year,
        };
    }
    map_reference(err)
}

#[derive(Debug, sqlx::FromRow)]
struct VacationRow {
    id: String,
    employee_id: String,
    year: i32,
    days_entitled: i64,
    days_taken: i64,
    days_pending: i64,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VacationRow {
    fn into_domain(self) -> Vacation {
        Vacation {
            id: self.id,
            employee_id: self.employee_id,
            year: self.year,
            days_entitled: self.days_entitled,
            days_taken: self.days_taken,
            days_pending: self.days_pending,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VacationSummaryRow {
    #[sqlx(flatten)]
    vacation: VacationRow,
    employee_name: String,
}

/// Errors raised by the absence and vacation repositories.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("absence not found")]
    AbsenceNotFound,
    #[error("absence type not found")]
    AbsenceTypeNotFound,
    #[error("vacation balance not found")]
    VacationNotFound,
    #[error("absence type code {0} is already in use")]
    DuplicateTypeCode(String),
    #[error("employee {employee_id} already has a vacation balance for {year}")]
    DuplicateVacation { employee_id: String, year: i32 },
    #[error("referenced employee or absence type does not exist")]
    MissingReference,
    #[error("absence type is still used by absences")]
    TypeInUse,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_id;
    use crate::test_support::{day, fixed_now, insert_employee, setup_db};

    fn vacation_type() -> AbsenceType {
        AbsenceType {
            id: new_id(),
            name: "Vacation".into(),
            code: "VAC".into(),
            requires_approval: true,
            paid: true,
            color: "#2ecc71".into(),
        }
    }

    fn absence(employee_id: &str, type_id: &str, start: NaiveDate, end: NaiveDate) -> Absence {
        let now = fixed_now();
        Absence {
            id: new_id(),
            employee_id: employee_id.into(),
            absence_type_id: type_id.into(),
            start_date: start,
            end_date: end,
            reason: String::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_type_code_is_reported() {
        let db = setup_db().await;
        let repo = db.absence_types();
        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &vacation_type()).await.unwrap();
        let err = repo.insert(&mut tx, &vacation_type()).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTypeCode(code) if code == "VAC"));
    }

    #[tokio::test]
    async fn days_used_counts_same_year_and_skips_excluded() {
        let db = setup_db().await;
        let employee = insert_employee(&db, "EMP001").await;
        let kind = vacation_type();
        let first = absence(&employee.id, &kind.id, day(2025, 6, 2), day(2025, 6, 6));
        let second = absence(&employee.id, &kind.id, day(2025, 8, 1), day(2025, 8, 1));
        let other_year = absence(&employee.id, &kind.id, day(2024, 12, 30), day(2025, 1, 2));

        let mut tx = db.begin().await.unwrap();
        db.absence_types().insert(&mut tx, &kind).await.unwrap();
        let absences = db.absences();
        for record in [&first, &second, &other_year] {
            absences.insert(&mut tx, record).await.unwrap();
        }

        let used = absences
            .days_used(&mut tx, &employee.id, &kind.id, 2025, None)
            .await
            .unwrap();
        assert_eq!(used, 6);
        let used = absences
            .days_used(&mut tx, &employee.id, &kind.id, 2025, Some(&first.id))
            .await
            .unwrap();
        assert_eq!(used, 1);
        let used = absences
            .days_used(&mut tx, &employee.id, &kind.id, 2024, None)
            .await
            .unwrap();
        assert_eq!(used, 4);
        assert_eq!(absences.fetch_in(&mut tx, &first.id).await.unwrap(), first);
        assert_eq!(db.absence_types().usage_count(&mut tx, &kind.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_and_current_filter_by_dates() {
        let db = setup_db().await;
        let employee = insert_employee(&db, "EMP001").await;
        let kind = vacation_type();
        let past = absence(&employee.id, &kind.id, day(2026, 1, 5), day(2026, 1, 9));
        let ongoing = absence(&employee.id, &kind.id, day(2026, 10, 15), day(2026, 10, 20));

        let mut tx = db.begin().await.unwrap();
        db.absence_types().insert(&mut tx, &kind).await.unwrap();
        db.absences().insert(&mut tx, &past).await.unwrap();
        db.absences().insert(&mut tx, &ongoing).await.unwrap();
        tx.commit().await.unwrap();

        let current = db.absences().current(day(2026, 10, 18)).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, ongoing.id);

        let listed = db
            .absences()
            .list(&AbsenceFilter {
                date_to: Some(day(2026, 6, 30)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, past.id);

        let all = db.absences().list(&AbsenceFilter::default()).await.unwrap();
        assert_eq!(all[0].id, ongoing.id);
    }

    #[tokio::test]
    async fn absence_with_unknown_employee_is_rejected() {
        let db = setup_db().await;
        let kind = vacation_type();
        let mut tx = db.begin().await.unwrap();
        db.absence_types().insert(&mut tx, &kind).await.unwrap();
        let err = db
            .absences()
            .insert(&mut tx, &absence("ghost", &kind.id, day(2026, 1, 1), day(2026, 1, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingReference));
    }

    #[tokio::test]
    async fn absence_type_with_absences_cannot_be_deleted() {
        let db = setup_db().await;
        let employee = insert_employee(&db, "EMP001").await;
        let kind = vacation_type();
        let mut tx = db.begin().await.unwrap();
        db.absence_types().insert(&mut tx, &kind).await.unwrap();
        db.absences()
            .insert(&mut tx, &absence(&employee.id, &kind.id, day(2026, 3, 2), day(2026, 3, 3)))
            .await
            .unwrap();

        let err = db.absence_types().delete(&mut tx, &kind.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::TypeInUse), "{err:?}");
    }

    #[tokio::test]
    async fn one_vacation_row_per_employee_and_year() {
        let db = setup_db().await;
        let employee = insert_employee(&db, "EMP001").await;
        let now = fixed_now();
        let balance = Vacation {
            id: new_id(),
            employee_id: employee.id.clone(),
            year: 2026,
            days_entitled: 15,
            days_taken: 0,
            days_pending: 15,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        };
        let repo = db.vacations();
        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &balance).await.unwrap();
        let err = repo
            .insert(
                &mut tx,
                &Vacation {
                    id: new_id(),
                    ..balance.clone()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateVacation { year: 2026, .. }));
        tx.commit().await.unwrap();

        let summary = repo.list_for_year(2026).await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].employee_name, "Test EMP001");
        assert_eq!(summary[0].vacation, balance);
        assert_eq!(repo.list_for_employee(&employee.id).await.unwrap().len(), 1);
    }
}
