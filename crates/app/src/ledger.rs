use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use thiserror::Error;
use tracing::{debug, info};

use boss_core::error::{require_color, require_text};
use boss_core::types::{Absence, AbsenceType, Vacation};
use boss_core::vacation::{
    balance_year, check_availability, validate_manual_balance, validate_range, validate_year,
    Balance, VACATION_CODE,
};
use boss_core::ValidationError;
use boss_storage::{new_id, AbsenceFilter, Database, LedgerError};

use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};

const DEFAULT_TYPE_COLOR: &str = "#3498db";

#[derive(Debug, Clone, Deserialize)]
pub struct AbsenceTypeRequest {
    pub name: String,
    pub code: String,
    #[serde(default = "enabled_by_default")]
    pub requires_approval: bool,
    #[serde(default = "enabled_by_default")]
    pub paid: bool,
    #[serde(default = "default_type_color")]
    pub color: String,
}

fn enabled_by_default() -> bool {
    true
}

fn default_type_color() -> String {
    DEFAULT_TYPE_COLOR.to_string()
}

impl AbsenceTypeRequest {
    fn into_absence_type(self, id: String) -> Result<AbsenceType, ValidationError> {
        require_text("name", &self.name)?;
        require_text("code", &self.code)?;
        require_color(&self.color)?;
        Ok(AbsenceType {
            id,
            name: self.name.trim().to_string(),
            code: self.code.trim().to_uppercase(),
            requires_approval: self.requires_approval,
            paid: self.paid,
            color: self.color,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbsenceRequest {
    pub employee_id: String,
    pub absence_type_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: String,
}

impl AbsenceRequest {
    fn into_absence(
        self,
        id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Absence, ValidationError> {
        validate_range(self.start_date, self.end_date)?;
        Ok(Absence {
            id,
            employee_id: self.employee_id,
            absence_type_id: self.absence_type_id,
            start_date: self.start_date,
            end_date: self.end_date,
            reason: self.reason,
            notes: self.notes,
            created_at,
            updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AbsenceView {
    #[serde(flatten)]
    pub absence: Absence,
    pub duration_days: i64,
}

impl From<Absence> for AbsenceView {
    fn from(absence: Absence) -> Self {
        Self {
            duration_days: absence.duration_days(),
            absence,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AbsenceQuery {
    pub employee: Option<String>,
    #[serde(rename = "type")]
    pub absence_type: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VacationRequest {
    pub employee_id: String,
    pub year: i32,
    pub days_entitled: Option<i64>,
    #[serde(default)]
    pub days_taken: i64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VacationUpdateRequest {
    pub days_entitled: i64,
    pub days_taken: i64,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VacationQuery {
    pub year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct VacationBalanceRow {
    #[serde(flatten)]
    pub vacation: Vacation,
    pub employee_name: String,
}

/// Balances of one year with their totals.
#[derive(Debug, Serialize)]
pub struct VacationSummary {
    pub year: i32,
    pub total_entitled: i64,
    pub total_taken: i64,
    pub total_pending: i64,
    pub balances: Vec<VacationBalanceRow>,
}

/// Absence types, absences and the vacation balances they drive.
#[derive(Clone)]
pub struct LedgerService {
    database: Database,
    clock: Clock,
    default_entitlement: i64,
}

impl LedgerService {
    pub fn new(database: Database, clock: Clock, default_entitlement: i64) -> Self {
        Self {
            database,
            clock,
            default_entitlement,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn create_type(&self, request: AbsenceTypeRequest) -> Result<AbsenceType, LedgerServiceError> {
        let kind = request.into_absence_type(new_id())?;
        let mut conn = self.database.pool().acquire().await?;
        self.database.absence_types().insert(&mut conn, &kind).await?;
        info!(stage = "ledger", absence_type_id = %kind.id, code = %kind.code, "absence type created");
        Ok(kind)
    }

    pub async fn update_type(
        &self,
        id: &str,
        request: AbsenceTypeRequest,
    ) -> Result<AbsenceType, LedgerServiceError> {
        let repo = self.database.absence_types();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let kind = request.into_absence_type(existing.id)?;
        repo.update(&mut tx, &kind).await?;
        tx.commit().await?;
        Ok(kind)
    }

    pub async fn list_types(&self) -> Result<Vec<AbsenceType>, LedgerServiceError> {
        Ok(self.database.absence_types().list().await?)
    }

    pub async fn delete_type(&self, id: &str) -> Result<(), LedgerServiceError> {
        let repo = self.database.absence_types();
        let mut tx = self.database.begin_write().await?;
        let kind = repo.fetch_in(&mut tx, id).await?;
        let usage = repo.usage_count(&mut tx, id).await?;
        if usage > 0 {
            return Err(LedgerServiceError::Blocked(format!(
                "absence type {} is used by {} absence(s)",
                kind.code, usage
            )));
        }
        repo.delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_absence(&self, request: AbsenceRequest) -> Result<AbsenceView, LedgerServiceError> {
        let now = self.now();
        let absence = request.into_absence(new_id(), now, now)?;

        let mut tx = self.database.begin_write().await?;
        let vacation_type = self.vacation_type(&mut tx).await?;
        if let Some(vacation_type) = &vacation_type {
            self.ensure_available(&mut tx, vacation_type, &absence, None)
                .await?;
        }
        self.database.absences().insert(&mut tx, &absence).await?;
        if let Some(vacation_type) = &vacation_type {
            self.recompute_for(&mut tx, vacation_type, &[&absence]).await?;
        }
        tx.commit().await?;

        info!(stage = "ledger", absence_id = %absence.id, employee_id = %absence.employee_id, days = absence.duration_days(), "absence recorded");
        Ok(absence.into())
    }

    /// Rewrites an absence and recomputes the balances of both its old and new year.
    pub async fn update_absence(
        &self,
        id: &str,
        request: AbsenceRequest,
    ) -> Result<AbsenceView, LedgerServiceError> {
        let repo = self.database.absences();
        let mut tx = self.database.begin_write().await?;
        let previous = repo.fetch_in(&mut tx, id).await?;
        let absence = request.into_absence(previous.id.clone(), previous.created_at, self.now())?;

        let vacation_type = self.vacation_type(&mut tx).await?;
        if let Some(vacation_type) = &vacation_type {
            self.ensure_available(&mut tx, vacation_type, &absence, Some(id))
                .await?;
        }
        repo.update(&mut tx, &absence).await?;
        if let Some(vacation_type) = &vacation_type {
            self.recompute_for(&mut tx, vacation_type, &[&previous, &absence])
                .await?;
        }
        tx.commit().await?;
        Ok(absence.into())
    }

    pub async fn delete_absence(&self, id: &str) -> Result<(), LedgerServiceError> {
        let repo = self.database.absences();
        let mut tx = self.database.begin_write().await?;
        let absence = repo.fetch_in(&mut tx, id).await?;
        repo.delete(&mut tx, id).await?;
        if let Some(vacation_type) = self.vacation_type(&mut tx).await? {
            self.recompute_for(&mut tx, &vacation_type, &[&absence]).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_absences(&self, query: AbsenceQuery) -> Result<Vec<AbsenceView>, LedgerServiceError> {
        let filter = AbsenceFilter {
            employee_id: query.employee,
            absence_type_id: query.absence_type,
            date_from: query.date_from,
            date_to: query.date_to,
        };
        let absences = self.database.absences().list(&filter).await?;
        Ok(absences.into_iter().map(AbsenceView::from).collect())
    }

    pub async fn current_absences(&self) -> Result<Vec<AbsenceView>, LedgerServiceError> {
        let today = self.now().date_naive();
        let absences = self.database.absences().current(today).await?;
        Ok(absences.into_iter().map(AbsenceView::from).collect())
    }

    pub async fn vacation_summary(&self, year: Option<i32>) -> Result<VacationSummary, LedgerServiceError> {
        let year = year.unwrap_or_else(|| self.now().year());
        validate_year(year)?;
        let rows = self.database.vacations().list_for_year(year).await?;
        let mut summary = VacationSummary {
            year,
            total_entitled: 0,
            total_taken: 0,
            total_pending: 0,
            balances: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            summary.total_entitled += row.vacation.days_entitled;
            summary.total_taken += row.vacation.days_taken;
            summary.total_pending += row.vacation.days_pending;
            summary.balances.push(VacationBalanceRow {
                vacation: row.vacation,
                employee_name: row.employee_name,
            });
        }
        Ok(summary)
    }

    pub async fn create_vacation(&self, request: VacationRequest) -> Result<Vacation, LedgerServiceError> {
        validate_year(request.year)?;
        let entitled = request.days_entitled.unwrap_or(self.default_entitlement);
        let balance = validate_manual_balance(entitled, request.days_taken)?;
        let now = self.now();
        let vacation = Vacation {
            id: new_id(),
            employee_id: request.employee_id,
            year: request.year,
            days_entitled: balance.entitled,
            days_taken: balance.taken,
            days_pending: balance.pending,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };
        let mut conn = self.database.pool().acquire().await?;
        self.database.vacations().insert(&mut conn, &vacation).await?;
        Ok(vacation)
    }

    pub async fn update_vacation(
        &self,
        id: &str,
        request: VacationUpdateRequest,
    ) -> Result<Vacation, LedgerServiceError> {
        let balance = validate_manual_balance(request.days_entitled, request.days_taken)?;
        let repo = self.database.vacations();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let vacation = Vacation {
            days_entitled: balance.entitled,
            days_taken: balance.taken,
            days_pending: balance.pending,
            notes: request.notes,
            updated_at: self.now(),
            ..existing
        };
        repo.update(&mut tx, &vacation).await?;
        tx.commit().await?;
        Ok(vacation)
    }

    pub async fn delete_vacation(&self, id: &str) -> Result<(), LedgerServiceError> {
        let mut tx = self.database.begin_write().await?;
        self.database.vacations().delete(&mut tx, id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// The type carrying the reserved vacation code, if one is configured.
    async fn vacation_type(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<AbsenceType>, LedgerServiceError> {
        Ok(self
            .database
            .absence_types()
            .find_by_code(conn, VACATION_CODE)
            .await?)
    }

    /// Rejects a vacation absence that does not fit in the remaining balance.
    async fn ensure_available(
        &self,
        conn: &mut SqliteConnection,
        vacation_type: &AbsenceType,
        absence: &Absence,
        exclude_id: Option<&str>,
    ) -> Result<(), LedgerServiceError> {
        if absence.absence_type_id != vacation_type.id {
            return Ok(());
        }
        let year = balance_year(absence.start_date);
        validate_year(year)?;
        let entitled = self
            .database
            .vacations()
            .find_for_year(conn, &absence.employee_id, year)
            .await?
            .map(|vacation| vacation.days_entitled)
            .unwrap_or(self.default_entitlement);
        let used = self
            .database
            .absences()
            .days_used(conn, &absence.employee_id, &vacation_type.id, year, exclude_id)
            .await?;
        let remaining = check_availability(entitled, used, absence.start_date, absence.end_date)?;
        debug!(stage = "ledger", employee_id = %absence.employee_id, year, remaining, "vacation request fits balance");
        Ok(())
    }

    /// Recomputes every (employee, year) balance touched by the given vacation absences.
    async fn recompute_for(
        &self,
        conn: &mut SqliteConnection,
        vacation_type: &AbsenceType,
        absences: &[&Absence],
    ) -> Result<(), LedgerServiceError> {
        let mut affected: Vec<(&str, i32)> = Vec::new();
        for absence in absences {
            if absence.absence_type_id != vacation_type.id {
                continue;
            }
            let key = (absence.employee_id.as_str(), balance_year(absence.start_date));
            if !affected.contains(&key) {
                affected.push(key);
            }
        }
        for (employee_id, year) in affected {
            self.recompute_balance(conn, vacation_type, employee_id, year)
                .await?;
        }
        Ok(())
    }

    async fn recompute_balance(
        &self,
        conn: &mut SqliteConnection,
        vacation_type: &AbsenceType,
        employee_id: &str,
        year: i32,
    ) -> Result<(), LedgerServiceError> {
        let vacations = self.database.vacations();
        let taken = self
            .database
            .absences()
            .days_used(conn, employee_id, &vacation_type.id, year, None)
            .await?;
        let now = self.now();

        let balance = match vacations.find_for_year(conn, employee_id, year).await? {
            Some(existing) => {
                let balance = Balance::new(existing.days_entitled, taken);
                let vacation = Vacation {
                    days_taken: balance.taken,
                    days_pending: balance.pending,
                    updated_at: now,
                    ..existing
                };
                vacations.update(conn, &vacation).await?;
                balance
            }
            None => {
                let balance = Balance::new(self.default_entitlement, taken);
                let vacation = Vacation {
                    id: new_id(),
                    employee_id: employee_id.to_string(),
                    year,
                    days_entitled: balance.entitled,
                    days_taken: balance.taken,
                    days_pending: balance.pending,
                    notes: String::new(),
                    created_at: now,
                    updated_at: now,
                };
                vacations.insert(conn, &vacation).await?;
                balance
            }
        };

        counter!("vacation_recomputations_total").increment(1);
        info!(
            stage = "ledger",
            employee_id,
            year,
            taken = balance.taken,
            pending = balance.pending,
            "vacation balance recomputed"
        );
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LedgerServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Blocked(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<LedgerServiceError> for ProblemResponse {
    fn from(err: LedgerServiceError) -> Self {
        match err {
            LedgerServiceError::Validation(err) => err.into(),
            LedgerServiceError::Blocked(detail) => ProblemResponse::delete_blocked(detail),
            LedgerServiceError::Ledger(err) => err.into(),
            LedgerServiceError::Database(err) => err.into(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/absence-types", get(list_types).post(create_type))
        .route("/api/absence-types/:id", put(update_type).delete(delete_type))
        .route("/api/absences", get(list_absences).post(create_absence))
        .route("/api/absences/current", get(current_absences))
        .route("/api/absences/:id", put(update_absence).delete(delete_absence))
        .route("/api/vacations", get(vacation_summary).post(create_vacation))
        .route("/api/vacations/:id", put(update_vacation).delete(delete_vacation))
}

async fn create_type(
    State(state): State<AppState>,
    Json(request): Json<AbsenceTypeRequest>,
) -> Result<(StatusCode, Json<AbsenceType>), ProblemResponse> {
    let kind = state.ledger().create_type(request).await?;
    Ok((StatusCode::CREATED, Json(kind)))
}

async fn list_types(State(state): State<AppState>) -> Result<Json<Vec<AbsenceType>>, ProblemResponse> {
    Ok(Json(state.ledger().list_types().await?))
}

async fn update_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AbsenceTypeRequest>,
) -> Result<Json<AbsenceType>, ProblemResponse> {
    Ok(Json(state.ledger().update_type(&id, request).await?))
}

async fn delete_type(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.ledger().delete_type(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_absence(
    State(state): State<AppState>,
    Json(request): Json<AbsenceRequest>,
) -> Result<(StatusCode, Json<AbsenceView>), ProblemResponse> {
    let absence = state.ledger().create_absence(request).await?;
    Ok((StatusCode::CREATED, Json(absence)))
}

async fn list_absences(
    State(state): State<AppState>,
    Query(query): Query<AbsenceQuery>,
) -> Result<Json<Vec<AbsenceView>>, ProblemResponse> {
    Ok(Json(state.ledger().list_absences(query).await?))
}

async fn current_absences(
    State(state): State<AppState>,
) -> Result<Json<Vec<AbsenceView>>, ProblemResponse> {
    Ok(Json(state.ledger().current_absences().await?))
}

async fn update_absence(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AbsenceRequest>,
) -> Result<Json<AbsenceView>, ProblemResponse> {
    Ok(Json(state.ledger().update_absence(&id, request).await?))
}

async fn delete_absence(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.ledger().delete_absence(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn vacation_summary(
    State(state): State<AppState>,
    Query(query): Query<VacationQuery>,
) -> Result<Json<VacationSummary>, ProblemResponse> {
    Ok(Json(state.ledger().vacation_summary(query.year).await?))
}

async fn create_vacation(
    State(state): State<AppState>,
    Json(request): Json<VacationRequest>,
) -> Result<(StatusCode, Json<Vacation>), ProblemResponse> {
    let vacation = state.ledger().create_vacation(request).await?;
    Ok((StatusCode::CREATED, Json(vacation)))
}

async fn update_vacation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<VacationUpdateRequest>,
) -> Result<Json<Vacation>, ProblemResponse> {
    Ok(Json(state.ledger().update_vacation(&id, request).await?))
}

async fn delete_vacation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.ledger().delete_vacation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
