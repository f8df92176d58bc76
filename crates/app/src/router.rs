use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tracing::warn;

use boss_storage::Database;

use crate::directory::DirectoryService;
use crate::ledger::LedgerService;
use crate::problem::ProblemResponse;
use crate::tracker::TrackerService;
use crate::work_items::WorkItemService;
use crate::{dashboard, directory, ledger, telemetry, tracker, work_items};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Clock,
    directory: DirectoryService,
    ledger: LedgerService,
    tracker: TrackerService,
    work_items: WorkItemService,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: Database, vacation_default_days: i64) -> Self {
        Self::with_clock(metrics, storage, Arc::new(Utc::now), vacation_default_days)
    }

    pub(crate) fn with_clock(
        metrics: PrometheusHandle,
        storage: Database,
        clock: Clock,
        vacation_default_days: i64,
    ) -> Self {
        Self {
            directory: DirectoryService::new(storage.clone(), clock.clone()),
            ledger: LedgerService::new(storage.clone(), clock.clone(), vacation_default_days),
            tracker: TrackerService::new(storage.clone(), clock.clone()),
            work_items: WorkItemService::new(storage.clone(), clock.clone()),
            metrics,
            storage,
            clock,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn directory(&self) -> &DirectoryService {
        &self.directory
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn tracker(&self) -> &TrackerService {
        &self.tracker
    }

    pub fn work_items(&self) -> &WorkItemService {
        &self.work_items
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/api/dashboard", get(dashboard::show))
        .merge(directory::routes())
        .merge(ledger::routes())
        .merge(tracker::routes())
        .merge(work_items::routes())
        .with_state(state)
}

/// Body of status toggles and other one-shot actions.
#[derive(Debug, Serialize)]
pub struct ActionResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ActionResponse<T> {
    pub fn ok<S: Into<String>>(message: S, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
        })
    }
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").execute(state.storage().pool()).await {
        Ok(_) => StatusCode::OK,
        Err(err) => {
            warn!(stage = "app", error = %err, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ProblemResponse> {
    let body = telemetry::render_metrics(state.metrics());
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .map_err(|err| ProblemResponse::internal(&err))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        Router,
    };
    use chrono::{DateTime, TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use boss_storage::Database;
    use boss_util::config::DEFAULT_VACATION_DAYS;

    use super::{app_router, AppState};
    use crate::telemetry;

    pub fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    pub async fn setup_state() -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        AppState::with_clock(metrics, database, Arc::new(fixed_now), DEFAULT_VACATION_DAYS)
    }

    pub async fn setup_app() -> (AppState, Router) {
        let state = setup_state().await;
        (state.clone(), app_router(state))
    }

    /// Sends a request with an optional JSON body and returns status and parsed body.
    pub async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .expect("handler should respond");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should read")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn create_employee(app: &Router, code: &str, birth_date: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/employees",
            Some(serde_json::json!({
                "employee_code": code,
                "username": code.to_lowercase(),
                "first_name": "Test",
                "last_name": code,
                "email": format!("{}@example.com", code.to_lowercase()),
                "birth_date": birth_date,
                "hire_date": "2021-03-01",
                "position": "Engineer",
                "department": "Technology"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().expect("employee id").to_string()
    }

    pub async fn create_active_quarter(app: &Router) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/quarters",
            Some(serde_json::json!({ "year": 2026, "quarter": 4, "is_active": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().expect("quarter id").to_string()
    }

    pub async fn create_initiative_type(app: &Router) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/initiative-types",
            Some(serde_json::json!({ "name": "Feature", "category": "PROJECT" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().expect("type id").to_string()
    }

    /// Creates an initiative in the active quarter owned by `owner_id`.
    pub async fn create_initiative(app: &Router, owner_id: &str) -> String {
        let type_id = create_initiative_type(app).await;
        let (status, body) = send(
            app,
            Method::POST,
            "/api/initiatives/quick",
            Some(serde_json::json!({
                "title": "Launch checkout",
                "initiative_type_id": type_id,
                "owner_id": owner_id,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().expect("initiative id").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{send, setup_app};
    use super::*;
    use axum::http::Method;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (_, app) = setup_app().await;
        let (status, _) = send(&app, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        use axum::http::Request;
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        let (_, app) = setup_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn action_response_flattens_payload() {
        #[derive(Serialize)]
        struct Payload {
            status: &'static str,
        }
        let Json(body) = ActionResponse::ok("done", Payload { status: "DONE" });
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "done");
        assert_eq!(json["status"], "DONE");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (_, app) = setup_app().await;
        let (status, _) = send(&app, Method::GET, "/api/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
