use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{extract_seats, AircraftType};
use crate::services::assignment::{AssignmentError, GenerateSeatsRequest};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/check", post(check_flight))
        .route("/generate", post(generate_seats))
}

/* ---------- helpers ---------- */

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!("Invalid input: {}", msg),
        }),
    )
}

// Номер рейса: две заглавные латинские буквы + 1-4 цифры, например "JT692"
fn is_valid_flight_number(value: &str) -> bool {
    if !value.is_ascii() || value.len() < 3 || value.len() > 6 {
        return false;
    }
    let (prefix, digits) = value.split_at(2);
    prefix.chars().all(|c| c.is_ascii_uppercase())
        && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_valid_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%d-%m-%y").is_ok()
}

fn status_for(err: &AssignmentError) -> StatusCode {
    match err {
        AssignmentError::AlreadyExists | AssignmentError::NoMatchingAssignment => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/* ---------- DTO ---------- */

#[derive(Debug, Deserialize)]
struct CheckFlightRequest {
    #[serde(rename = "flightNumber")]
    flight_number: String,
    date: String,
}

#[derive(Debug, Serialize)]
struct CheckFlightResponse {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    #[serde(rename = "name")]
    crew_name: String,
    #[serde(rename = "id")]
    crew_id: String,
    #[serde(rename = "flightNumber")]
    flight_number: String,
    date: String,
    aircraft: String,
    #[serde(rename = "seatsToChange", default)]
    seats_to_change: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    success: bool,
    seats: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/* ---------- handlers ---------- */

// POST /api/check
async fn check_flight(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckFlightRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_flight_number(&req.flight_number) {
        return Err(bad_request("flightNumber must match AA0000 pattern"));
    }
    if !is_valid_date(&req.date) {
        return Err(bad_request("date must be in DD-MM-YY format"));
    }

    let exists = state
        .flights
        .check_flight_exists(&req.flight_number, &req.date)
        .await
        .map_err(|e| {
            tracing::error!("check_flight store error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to check flight".to_string(),
                }),
            )
        })?;

    Ok((StatusCode::OK, Json(CheckFlightResponse { exists })))
}

// POST /api/generate
async fn generate_seats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.crew_name.trim().is_empty() {
        return Err(bad_request("name is required"));
    }
    if req.crew_id.trim().is_empty() {
        return Err(bad_request("id is required"));
    }
    if !is_valid_flight_number(&req.flight_number) {
        return Err(bad_request("flightNumber must match AA0000 pattern"));
    }
    if !is_valid_date(&req.date) {
        return Err(bad_request("date must be in DD-MM-YY format"));
    }
    let aircraft = AircraftType::parse(&req.aircraft)
        .ok_or_else(|| bad_request("aircraft must be ATR, Airbus 320 or Boeing 737 Max"))?;

    let request = GenerateSeatsRequest {
        crew_name: req.crew_name,
        crew_id: req.crew_id,
        flight_number: req.flight_number,
        date: req.date,
        aircraft,
        seats_to_change: req.seats_to_change,
    };

    match state.flights.generate_and_assign(&request).await {
        Ok(assignment) => Ok((
            StatusCode::OK,
            Json(GenerateResponse {
                success: true,
                seats: extract_seats(&assignment.seat_assignments),
            }),
        )),
        Err(e) => {
            tracing::error!(
                "generate_seats failed for {} on {}: {}",
                request.flight_number,
                request.date,
                e
            );
            Err((
                status_for(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
