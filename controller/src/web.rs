use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::host::{execute_engine_actions, monotonic_ms, AppState};

/// Upcoming occurrences shown by default in the alarm list.
const NUM_ALARMS_DISPLAY: usize = 10;

const DISPLAY_TIME_FORMAT: &str = "%I:%M:%S %p %A, %B %d, %Y";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct StatusView {
    state: String,
    relay: bool,
    buzzer: bool,
    lights: bool,
    #[serde(rename = "alarmCount")]
    alarm_count: usize,
    #[serde(rename = "nextAlarm")]
    next_alarm: Option<String>,
    now: String,
}

#[derive(Debug, Serialize)]
struct AlarmView {
    expression: String,
    buzzer: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AlarmsView {
    alarms: Vec<AlarmView>,
    upcoming: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlarmsUpdate {
    alarms: Vec<AlarmUpdate>,
}

/// One submitted alarm. The buzzer travels as its own field so comma
/// lists inside the expression are never mistaken for a suffix.
#[derive(Debug, Deserialize)]
struct AlarmUpdate {
    expression: String,
    #[serde(default)]
    buzzer: Option<bool>,
}

pub async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now = Local::now().naive_local();
    let view = {
        let engine = state.engine.lock().await;
        let outputs = engine.outputs();
        let next_alarm = engine
            .alarms()
            .next_fire(now, engine.config().alarm_buzzer)
            .ok()
            .map(|fire| fire.at.format(DISPLAY_TIME_FORMAT).to_string());
        StatusView {
            state: engine.state().as_str().to_string(),
            relay: outputs.relay,
            buzzer: outputs.buzzer,
            lights: outputs.lights,
            alarm_count: engine.alarms().len(),
            next_alarm,
            now: now.format(DISPLAY_TIME_FORMAT).to_string(),
        }
    };
    Json(view)
}

pub async fn handle_get_alarms(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let show = params
        .get("show")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|n| *n > 0 && *n <= 100)
        .unwrap_or(NUM_ALARMS_DISPLAY);

    let now = Local::now().naive_local();
    let view = {
        let engine = state.engine.lock().await;
        let alarms = engine
            .alarms()
            .alarms()
            .iter()
            .map(|alarm| AlarmView {
                expression: alarm.expression().to_string(),
                buzzer: alarm.buzzer_override(),
            })
            .collect();
        let upcoming = engine
            .alarms()
            .upcoming(show, now)
            .iter()
            .map(|at| at.format(DISPLAY_TIME_FORMAT).to_string())
            .collect();
        AlarmsView { alarms, upcoming }
    };
    Json(view)
}

/// Wholesale schedule replacement. A malformed expression rejects the
/// whole update and leaves the active set untouched; a persistence
/// failure is logged but the replacement stands, matching what the
/// running engine is actually using.
pub async fn handle_put_alarms(
    State(state): State<AppState>,
    Json(update): Json<AlarmsUpdate>,
) -> impl IntoResponse {
    let now = Local::now().naive_local();
    let now_ms = monotonic_ms();

    let lines: Vec<String> = update
        .alarms
        .iter()
        .map(|alarm| match alarm.buzzer {
            Some(buzzer) => format!("{} , {}", alarm.expression.trim(), u8::from(buzzer)),
            None => alarm.expression.trim().to_string(),
        })
        .collect();

    let result = {
        let mut engine = state.engine.lock().await;
        engine.replace_alarms(&lines, now, now_ms)
    };

    let actions = match result {
        Ok(actions) => actions,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };
    execute_engine_actions(&state, actions).await;
    info!("alarm schedule replaced ({} entries)", lines.len());

    let alarms = { state.engine.lock().await.alarms().clone() };
    if let Err(err) = state.store.save_alarms(&state.runtime, &alarms).await {
        warn!("failed to persist alarm schedule: {err:#}");
    }

    handle_get_alarms(State(state), Query(HashMap::new()))
        .await
        .into_response()
}

pub fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
