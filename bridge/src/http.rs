//! HTTP/JSON API over the same cached state and command queues, plus an
//! optional static UI.
//!
//! Every POST endpoint maps 1:1 onto the command batches the remote
//! protocol enqueues; the GET endpoints mirror the raw state tables.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tower_http::services::ServeDir;

use crate::device::Device;
use crate::{bands, kat500};

#[derive(Clone, Default)]
pub struct AppState {
    pub amplifier: Option<Arc<Device>>,
    pub tuner: Option<Arc<Device>>,
}

pub fn router(state: AppState, content_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route("/api/kpa_status", get(kpa_status))
        .route("/api/kat_status", get(kat_status))
        .route("/api/kpa/clear_fault", post(kpa_clear_fault))
        .route("/api/kpa/set_band", post(kpa_set_band))
        .route("/api/kpa/set_fan_speed", post(kpa_set_fan_speed))
        .route("/api/kpa/set_operate", post(kpa_set_operate))
        .route("/api/kpa/set_power", post(kpa_set_power))
        .route("/api/kpa/set_speaker_alarm", post(kpa_set_speaker_alarm))
        .route("/api/kat/clear_fault", post(kat_clear_fault))
        .route("/api/kat/set_mode", post(kat_set_mode))
        .route("/api/kat/set_antenna", post(kat_set_antenna))
        .route("/api/kat/set_ampi", post(kat_set_ampi))
        .route("/api/kat/set_attn", post(kat_set_attn))
        .route("/api/kat/set_bypass", post(kat_set_bypass))
        .route("/api/kat/set_power", post(kat_set_power))
        .route("/api/kat/start_tune", post(kat_start_tune))
        .route("/api/kat/cancel_tune", post(kat_cancel_tune))
        .with_state(state);

    match content_dir {
        Some(dir) => router
            .route("/", get(|| async { Redirect::temporary("/kpa500.html") }))
            .fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

fn ok() -> Response {
    (StatusCode::OK, "ok\r\n").into_response()
}

fn bad_parameter(what: &str) -> Response {
    (StatusCode::BAD_REQUEST, format!("bad {what} parameter\r\n")).into_response()
}

fn not_configured() -> Response {
    (StatusCode::NOT_FOUND, "device not configured\r\n").into_response()
}

#[derive(Deserialize)]
struct BandForm {
    band: String,
}

#[derive(Deserialize)]
struct SpeedForm {
    speed: String,
}

#[derive(Deserialize)]
struct StateForm {
    state: String,
}

#[derive(Deserialize)]
struct ModeForm {
    mode: String,
}

#[derive(Deserialize)]
struct AntennaForm {
    antenna: String,
}

/// `"0"` or `"1"`, anything else is rejected.
fn switch_state(value: &str) -> Option<&str> {
    matches!(value, "0" | "1").then_some(value)
}

async fn kpa_status(State(state): State<AppState>) -> Response {
    match state.amplifier {
        Some(device) => Json(serde_json::json!({ "kpa500_data": device.snapshot() })).into_response(),
        None => not_configured(),
    }
}

async fn kat_status(State(state): State<AppState>) -> Response {
    match state.tuner {
        Some(device) => {
            let data = device.snapshot();
            let fault_text = kat500::fault_text(&data[kat500::FAULT]).to_owned();
            Json(serde_json::json!({ "kat500_data": data, "fault_text": fault_text })).into_response()
        }
        None => not_configured(),
    }
}

async fn kpa_clear_fault(State(state): State<AppState>) -> Response {
    let Some(device) = state.amplifier else {
        return not_configured();
    };
    device.enqueue(vec![b"^FLC;".to_vec()]);
    ok()
}

async fn kpa_set_band(State(state): State<AppState>, Form(form): Form<BandForm>) -> Response {
    let Some(device) = state.amplifier else {
        return not_configured();
    };
    match bands::band_number(&form.band) {
        Some(number) => {
            device.enqueue(vec![format!("^BN{number:02};").into_bytes()]);
            ok()
        }
        None => bad_parameter("band name"),
    }
}

async fn kpa_set_fan_speed(State(state): State<AppState>, Form(form): Form<SpeedForm>) -> Response {
    let Some(device) = state.amplifier else {
        return not_configured();
    };
    match form.speed.parse::<u8>() {
        Ok(speed) if speed <= 6 => {
            device.enqueue(vec![format!("^FC{speed};^FC;").into_bytes()]);
            ok()
        }
        _ => bad_parameter("fan speed"),
    }
}

async fn kpa_set_operate(State(state): State<AppState>, Form(form): Form<StateForm>) -> Response {
    let Some(device) = state.amplifier else {
        return not_configured();
    };
    match switch_state(&form.state) {
        Some(value) => {
            device.enqueue(vec![format!("^OS{value};^OS;").into_bytes()]);
            ok()
        }
        None => bad_parameter("state"),
    }
}

async fn kpa_set_power(State(state): State<AppState>, Form(form): Form<StateForm>) -> Response {
    let Some(device) = state.amplifier else {
        return not_configured();
    };
    match switch_state(&form.state) {
        Some(value) => {
            device.enqueue(vec![format!("^ON{value};").into_bytes()]);
            ok()
        }
        None => bad_parameter("state"),
    }
}

async fn kpa_set_speaker_alarm(
    State(state): State<AppState>,
    Form(form): Form<StateForm>,
) -> Response {
    let Some(device) = state.amplifier else {
        return not_configured();
    };
    match switch_state(&form.state) {
        Some(value) => {
            device.enqueue(vec![format!("^SP{value};^SP;").into_bytes()]);
            ok()
        }
        None => bad_parameter("state"),
    }
}

async fn kat_clear_fault(State(state): State<AppState>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    device.enqueue(vec![b"FLTC;FLT;".to_vec()]);
    ok()
}

async fn kat_set_mode(State(state): State<AppState>, Form(form): Form<ModeForm>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    let command: &[u8] = match form.mode.as_str() {
        "Auto" => b"MDA;MD;",
        "Bypass" => b"MDB;MD;",
        "Manual" => b"MDM;MD;",
        _ => return bad_parameter("mode"),
    };
    device.enqueue(vec![command.to_vec()]);
    ok()
}

async fn kat_set_antenna(State(state): State<AppState>, Form(form): Form<AntennaForm>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    let number = match form.antenna.as_str() {
        "One" => 1,
        "Two" => 2,
        "Three" => 3,
        _ => return bad_parameter("antenna"),
    };
    device.enqueue(vec![format!("AN{number};AN;").into_bytes()]);
    ok()
}

async fn kat_set_ampi(State(state): State<AppState>, Form(form): Form<StateForm>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    match switch_state(&form.state) {
        Some(value) => {
            device.enqueue(vec![format!("AMPI{value};AMPI;").into_bytes()]);
            ok()
        }
        None => bad_parameter("state"),
    }
}

async fn kat_set_attn(State(state): State<AppState>, Form(form): Form<StateForm>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    match switch_state(&form.state) {
        Some(value) => {
            device.enqueue(vec![format!("ATTN{value};ATTN;").into_bytes()]);
            ok()
        }
        None => bad_parameter("state"),
    }
}

async fn kat_set_bypass(State(state): State<AppState>, Form(form): Form<StateForm>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    let command: &[u8] = match form.state.as_str() {
        "1" => b"BYPB;BYP;",
        "0" => b"BYPN;BYP;",
        _ => return bad_parameter("state"),
    };
    device.enqueue(vec![command.to_vec()]);
    ok()
}

async fn kat_set_power(State(state): State<AppState>, Form(form): Form<StateForm>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    match switch_state(&form.state) {
        Some(value) => {
            device.enqueue(vec![format!("PS{value};").into_bytes()]);
            ok()
        }
        None => bad_parameter("state"),
    }
}

async fn kat_start_tune(State(state): State<AppState>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    device.enqueue(vec![b"FT;TP;".to_vec()]);
    ok()
}

async fn kat_cancel_tune(State(state): State<AppState>) -> Response {
    let Some(device) = state.tuner else {
        return not_configured();
    };
    device.enqueue(vec![b"CT;TP;".to_vec()]);
    ok()
}
