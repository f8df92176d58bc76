use axum::{extract::State, Json};
use chrono::NaiveDate;
use serde::Serialize;

use boss_core::directory::BirthdayEntry;
use boss_core::types::Quarter;

use crate::ledger::AbsenceView;
use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::tracker::StatusTotal;

const BIRTHDAY_WINDOW_DAYS: i64 = 7;

/// Landing page snapshot.
#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub today: NaiveDate,
    pub active_quarter: Option<Quarter>,
    pub headcount: i64,
    pub current_absences: Vec<AbsenceView>,
    pub initiative_counts: Vec<StatusTotal>,
    pub upcoming_birthdays: Vec<BirthdayEntry>,
}

pub async fn show(State(state): State<AppState>) -> Result<Json<Dashboard>, ProblemResponse> {
    let active_quarter = state.tracker().active_quarter().await?;
    let initiative_counts = match &active_quarter {
        Some(quarter) => state.tracker().status_totals(Some(quarter.id.as_str())).await?,
        None => Vec::new(),
    };

    Ok(Json(Dashboard {
        today: state.now().date_naive(),
        headcount: state.directory().headcount().await?,
        current_absences: state.ledger().current_absences().await?,
        upcoming_birthdays: state
            .directory()
            .upcoming_birthdays(Some(BIRTHDAY_WINDOW_DAYS))
            .await?,
        active_quarter,
        initiative_counts,
    }))
}
