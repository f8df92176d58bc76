use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use boss_core::directory::{birthdays_in_month, upcoming_birthdays, validate_identity, BirthdayEntry};
use boss_core::error::{require_range, require_text};
use boss_core::types::{Employee, Vacation};
use boss_core::ValidationError;
use boss_storage::{new_id, Database, DirectoryError, EmployeeFilter, LedgerError};

use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};

const DEFAULT_BIRTHDAY_WINDOW_DAYS: i64 = 30;

/// Create and update payload of an employee.
#[derive(Debug, Clone, Deserialize)]
pub struct EmployeeRequest {
    pub employee_code: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub mobile: String,
    pub birth_date: NaiveDate,
    pub hire_date: NaiveDate,
    pub position: String,
    pub department: String,
    #[serde(default)]
    pub emergency_contact: String,
    #[serde(default)]
    pub emergency_phone: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl EmployeeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_identity(
            &self.employee_code,
            &self.username,
            &self.first_name,
            &self.last_name,
            &self.email,
        )?;
        require_text("position", &self.position)?;
        require_text("department", &self.department)
    }

    fn into_employee(
        self,
        id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Employee {
        Employee {
            id,
            employee_code: self.employee_code.trim().to_string(),
            username: self.username.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone,
            mobile: self.mobile,
            birth_date: self.birth_date,
            hire_date: self.hire_date,
            position: self.position.trim().to_string(),
            department: self.department.trim().to_string(),
            emergency_contact: self.emergency_contact,
            emergency_phone: self.emergency_phone,
            notes: self.notes,
            is_active: self.is_active,
            created_at,
            updated_at,
        }
    }
}

/// Employee with the values derived from today's date.
#[derive(Debug, Clone, Serialize)]
pub struct EmployeeView {
    #[serde(flatten)]
    pub employee: Employee,
    pub full_name: String,
    pub age: i32,
    pub years_of_service: i32,
}

impl EmployeeView {
    pub fn new(employee: Employee, today: NaiveDate) -> Self {
        Self {
            full_name: employee.full_name(),
            age: employee.age_on(today),
            years_of_service: employee.years_of_service(today),
            employee,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeQuery {
    pub search: Option<String>,
    pub department: Option<String>,
    /// `active` or `inactive`; anything else lists everyone.
    pub status: Option<String>,
}

impl EmployeeQuery {
    fn into_filter(self) -> EmployeeFilter {
        let is_active = match self.status.as_deref() {
            Some("active") => Some(true),
            Some("inactive") => Some(false),
            _ => None,
        };
        EmployeeFilter {
            search: self.search.filter(|value| !value.trim().is_empty()),
            department: self.department.filter(|value| !value.trim().is_empty()),
            is_active,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CalendarQuery {
    pub month: Option<u32>,
    pub year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct BirthdayCalendar {
    pub month: u32,
    pub year: i32,
    pub birthdays: Vec<BirthdayEntry>,
}

/// Employee records and the birthday views built on them.
#[derive(Clone)]
pub struct DirectoryService {
    database: Database,
    clock: Clock,
}

impl DirectoryService {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    fn today(&self) -> NaiveDate {
        (self.clock)().date_naive()
    }

    pub async fn create(&self, request: EmployeeRequest) -> Result<EmployeeView, DirectoryServiceError> {
        request.validate()?;
        let now = (self.clock)();
        let employee = request.into_employee(new_id(), now, now);

        let mut conn = self.database.pool().acquire().await?;
        self.database.employees().insert(&mut conn, &employee).await?;
        info!(stage = "directory", employee_id = %employee.id, code = %employee.employee_code, "employee created");
        Ok(EmployeeView::new(employee, self.today()))
    }

    pub async fn update(
        &self,
        id: &str,
        request: EmployeeRequest,
    ) -> Result<EmployeeView, DirectoryServiceError> {
        request.validate()?;
        let repo = self.database.employees();
        let mut tx = self.database.begin_write().await?;
        let existing = repo.fetch_in(&mut tx, id).await?;
        let employee = request.into_employee(existing.id, existing.created_at, (self.clock)());
        repo.update(&mut tx, &employee).await?;
        tx.commit().await?;
        Ok(EmployeeView::new(employee, self.today()))
    }

    pub async fn get(&self, id: &str) -> Result<EmployeeView, DirectoryServiceError> {
        let employee = self.database.employees().fetch(id).await?;
        Ok(EmployeeView::new(employee, self.today()))
    }

    pub async fn list(&self, query: EmployeeQuery) -> Result<Vec<EmployeeView>, DirectoryServiceError> {
        let today = self.today();
        let employees = self.database.employees().list(&query.into_filter()).await?;
        Ok(employees
            .into_iter()
            .map(|employee| EmployeeView::new(employee, today))
            .collect())
    }

    /// Number of active employees.
    pub async fn headcount(&self) -> Result<i64, DirectoryServiceError> {
        Ok(self.database.employees().count_active().await?)
    }

    pub async fn departments(&self) -> Result<Vec<String>, DirectoryServiceError> {
        Ok(self.database.employees().departments().await?)
    }

    /// Deletes an employee unless initiatives or updates still point at them.
    ///
    /// Story and task assignments and collaborator links are dropped with the row.
    pub async fn delete(&self, id: &str) -> Result<(), DirectoryServiceError> {
        let repo = self.database.employees();
        let mut tx = self.database.begin_write().await?;
        let employee = repo.fetch_in(&mut tx, id).await?;
        let references = repo.references(&mut tx, id).await?;
        if references.is_blocking() {
            return Err(DirectoryServiceError::Blocked(format!(
                "{} owns {} initiative(s) and authored {} update(s); reassign them before deleting",
                employee.full_name(),
                references.owned_initiatives,
                references.authored_updates
            )));
        }
        repo.delete(&mut tx, id).await?;
        tx.commit().await?;
        info!(stage = "directory", employee_id = %id, "employee deleted");
        Ok(())
    }

    pub async fn vacations(&self, id: &str) -> Result<Vec<Vacation>, DirectoryServiceError> {
        let employee = self.database.employees().fetch(id).await?;
        Ok(self.database.vacations().list_for_employee(&employee.id).await?)
    }

    pub async fn upcoming_birthdays(
        &self,
        days: Option<i64>,
    ) -> Result<Vec<BirthdayEntry>, DirectoryServiceError> {
        let days = days.unwrap_or(DEFAULT_BIRTHDAY_WINDOW_DAYS);
        require_range("days", days, 0, 366)?;
        let employees = self.active_employees().await?;
        Ok(upcoming_birthdays(&employees, self.today(), days))
    }

    pub async fn birthday_calendar(
        &self,
        query: CalendarQuery,
    ) -> Result<BirthdayCalendar, DirectoryServiceError> {
        let today = self.today();
        let month = query.month.unwrap_or_else(|| today.month());
        let year = query.year.unwrap_or_else(|| today.year());
        require_range("month", month.into(), 1, 12)?;
        let employees = self.active_employees().await?;
        Ok(BirthdayCalendar {
            month,
            year,
            birthdays: birthdays_in_month(&employees, month, year),
        })
    }

    async fn active_employees(&self) -> Result<Vec<Employee>, DirectoryServiceError> {
        let filter = EmployeeFilter {
            is_active: Some(true),
            ..EmployeeFilter::default()
        };
        Ok(self.database.employees().list(&filter).await?)
    }
}

#[derive(Debug, Error)]
pub enum DirectoryServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Blocked(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<DirectoryServiceError> for ProblemResponse {
    fn from(err: DirectoryServiceError) -> Self {
        match err {
            DirectoryServiceError::Validation(err) => err.into(),
            DirectoryServiceError::Blocked(detail) => ProblemResponse::delete_blocked(detail),
            DirectoryServiceError::Directory(err) => err.into(),
            DirectoryServiceError::Ledger(err) => err.into(),
            DirectoryServiceError::Database(err) => err.into(),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/employees", get(list_employees).post(create_employee))
        .route(
            "/api/employees/:id",
            get(get_employee).put(update_employee).delete(delete_employee),
        )
        .route("/api/employees/:id/vacations", get(employee_vacations))
        .route("/api/departments", get(departments))
        .route("/api/birthdays/upcoming", get(upcoming))
        .route("/api/birthdays/calendar", get(calendar))
}

async fn create_employee(
    State(state): State<AppState>,
    Json(request): Json<EmployeeRequest>,
) -> Result<(StatusCode, Json<EmployeeView>), ProblemResponse> {
    let view = state.directory().create(request).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_employees(
    State(state): State<AppState>,
    Query(query): Query<EmployeeQuery>,
) -> Result<Json<Vec<EmployeeView>>, ProblemResponse> {
    Ok(Json(state.directory().list(query).await?))
}

async fn get_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EmployeeView>, ProblemResponse> {
    Ok(Json(state.directory().get(&id).await?))
}

async fn update_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<EmployeeRequest>,
) -> Result<Json<EmployeeView>, ProblemResponse> {
    Ok(Json(state.directory().update(&id, request).await?))
}

async fn delete_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    state.directory().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn employee_vacations(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Vacation>>, ProblemResponse> {
    Ok(Json(state.directory().vacations(&id).await?))
}

async fn departments(State(state): State<AppState>) -> Result<Json<Vec<String>>, ProblemResponse> {
    Ok(Json(state.directory().departments().await?))
}

async fn upcoming(
    State(state): State<AppState>,
    Query(query): Query<UpcomingQuery>,
) -> Result<Json<Vec<BirthdayEntry>>, ProblemResponse> {
    Ok(Json(state.directory().upcoming_birthdays(query.days).await?))
}

async fn calendar(
    State(state): State<AppState>,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<BirthdayCalendar>, ProblemResponse> {
    Ok(Json(state.directory().birthday_calendar(query).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::router::test_support::{
        create_active_quarter, create_employee, create_initiative, create_initiative_type, send,
        setup_app,
    };

    #[tokio::test]
    async fn created_employee_reports_derived_fields() {
        let (_, app) = setup_app().await;
        let id = create_employee(&app, "E001", "1990-03-15").await;

        let (status, body) = send(&app, Method::GET, &format!("/api/employees/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["full_name"], "Test E001");
        assert_eq!(body["age"], 36);
        assert_eq!(body["years_of_service"], 5);
        assert_eq!(body["is_active"], true);
    }

    #[tokio::test]
    async fn duplicate_code_is_rejected() {
        let (_, app) = setup_app().await;
        create_employee(&app, "E001", "1990-03-15").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/employees",
            Some(json!({
                "employee_code": "E001",
                "username": "someone-else",
                "first_name": "Other",
                "last_name": "Person",
                "email": "other@example.com",
                "birth_date": "1991-01-01",
                "hire_date": "2022-01-01",
                "position": "Analyst",
                "department": "Finance"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "duplicate");
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let (_, app) = setup_app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/employees",
            Some(json!({
                "employee_code": "E009",
                "username": "e009",
                "first_name": "No",
                "last_name": "Mail",
                "email": "not-an-address",
                "birth_date": "1991-01-01",
                "hire_date": "2022-01-01",
                "position": "Analyst",
                "department": "Finance"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "validation_failed");
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (_, app) = setup_app().await;
        let id = create_employee(&app, "E001", "1990-03-15").await;
        create_employee(&app, "E002", "1985-06-01").await;

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/api/employees/{id}"),
            Some(json!({
                "employee_code": "E001",
                "username": "e001",
                "first_name": "Test",
                "last_name": "E001",
                "email": "e001@example.com",
                "birth_date": "1990-03-15",
                "hire_date": "2021-03-01",
                "position": "Engineer",
                "department": "Technology",
                "is_active": false
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (_, active) = send(&app, Method::GET, "/api/employees?status=active", None).await;
        let codes: Vec<_> = active
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["employee_code"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(codes, vec!["E002".to_string()]);

        let (_, everyone) = send(&app, Method::GET, "/api/employees", None).await;
        assert_eq!(everyone.as_array().unwrap().len(), 2);

        let (_, departments) = send(&app, Method::GET, "/api/departments", None).await;
        assert_eq!(departments, json!(["Technology"]));
    }

    #[tokio::test]
    async fn deleting_an_initiative_owner_is_blocked() {
        let (_, app) = setup_app().await;
        let owner = create_employee(&app, "E001", "1990-03-15").await;
        create_active_quarter(&app).await;
        create_initiative(&app, &owner).await;

        let (status, body) = send(&app, Method::DELETE, &format!("/api/employees/{owner}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "delete_blocked");
        assert!(body["detail"].as_str().unwrap().contains("1 initiative(s)"));

        let (status, _) = send(&app, Method::GET, &format!("/api/employees/{owner}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn deleting_a_collaborator_removes_them_from_initiatives() {
        let (_, app) = setup_app().await;
        let owner = create_employee(&app, "E001", "1990-03-15").await;
        let helper = create_employee(&app, "E002", "1985-06-01").await;
        let quarter = create_active_quarter(&app).await;
        let type_id = create_initiative_type(&app).await;

        let (status, initiative) = send(
            &app,
            Method::POST,
            "/api/initiatives",
            Some(json!({
                "title": "Payroll migration",
                "initiative_type_id": type_id,
                "owner_id": owner,
                "quarter_id": quarter,
                "collaborator_ids": [helper.clone()]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{initiative}");
        assert_eq!(initiative["collaborator_ids"], json!([helper.clone()]));
        let initiative_id = initiative["id"].as_str().unwrap();

        let (status, _) = send(&app, Method::DELETE, &format!("/api/employees/{helper}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &app,
            Method::GET,
            &format!("/api/initiatives/{initiative_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["collaborator_ids"], json!([]));
        assert_eq!(body["owner_id"], owner);
    }

    #[tokio::test]
    async fn unreferenced_employee_is_deleted() {
        let (_, app) = setup_app().await;
        let id = create_employee(&app, "E001", "1990-03-15").await;

        let (status, _) = send(&app, Method::DELETE, &format!("/api/employees/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, Method::GET, &format!("/api/employees/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["type"], "not_found");
    }

    #[tokio::test]
    async fn upcoming_birthdays_respect_the_window() {
        let (_, app) = setup_app().await;
        create_employee(&app, "E001", "1990-10-20").await;
        create_employee(&app, "E002", "1988-12-25").await;

        let (status, body) = send(&app, Method::GET, "/api/birthdays/upcoming", None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["full_name"], "Test E001");
        assert_eq!(rows[0]["birthday"], "2026-10-20");
        assert_eq!(rows[0]["age"], 36);

        let (_, wide) = send(&app, Method::GET, "/api/birthdays/upcoming?days=90", None).await;
        assert_eq!(wide.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn calendar_defaults_to_the_current_month() {
        let (_, app) = setup_app().await;
        create_employee(&app, "E001", "1990-10-02").await;
        create_employee(&app, "E002", "1988-12-25").await;

        let (_, body) = send(&app, Method::GET, "/api/birthdays/calendar", None).await;
        assert_eq!(body["month"], 10);
        assert_eq!(body["year"], 2026);
        assert_eq!(body["birthdays"].as_array().unwrap().len(), 1);

        let (status, body) = send(&app, Method::GET, "/api/birthdays/calendar?month=13", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["type"], "validation_failed");
    }
}
