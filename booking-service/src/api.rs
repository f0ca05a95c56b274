use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::booking::BookingTransactor;
use crate::caller::{require_caller, Caller};
use crate::error::{BookingError, BookingResult};
use crate::payments::{PaymentConfirmation, PaymentConfirmationHandler};
use crate::sweeper::ReclamationSweeper;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

#[derive(Clone)]
pub struct AppState {
    pub transactor: Arc<BookingTransactor>,
    pub sweeper: Arc<ReclamationSweeper>,
    pub payments: Arc<PaymentConfirmationHandler>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSlotRequest {
    #[serde(default)]
    pub professional_id: String,
    #[serde(default)]
    pub slot_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSlotResponse {
    pub appointment_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailPaymentResponse {
    pub appointment_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimRequest {
    pub timeout_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclaimResponse {
    pub released_count: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/appointments", post(book_slot))
        .route("/appointments/:appointment_id/confirm-payment", post(confirm_payment))
        .route("/appointments/:appointment_id/fail-payment", post(fail_payment))
        .route("/internal/reclaim-holds", post(reclaim_holds))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Reads the identity the authenticating gateway forwards. No id header means
/// an anonymous request.
pub fn caller_from_headers(headers: &HeaderMap) -> BookingResult<Option<Caller>> {
    let id = headers
        .get(CALLER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let Some(id) = id else {
        return Ok(None);
    };

    let role = headers
        .get(CALLER_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("user")
        .parse()?;

    Ok(Some(Caller {
        id: id.to_string(),
        role,
    }))
}

fn parse_appointment_id(raw: &str) -> BookingResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| BookingError::invalid_argument("appointmentId must be a valid id"))
}

pub async fn book_slot(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BookSlotRequest>, JsonRejection>,
) -> Result<Json<BookSlotResponse>, BookingError> {
    let caller = caller_from_headers(&headers)?;
    require_caller(caller.as_ref())?;
    let Json(request) = payload.map_err(|rejection| {
        BookingError::invalid_argument(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let receipt = state
        .transactor
        .book_slot(caller.as_ref(), &request.professional_id, &request.slot_id)
        .await?;

    Ok(Json(BookSlotResponse {
        appointment_id: receipt.appointment_id,
    }))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
) -> Result<Json<PaymentConfirmation>, BookingError> {
    let caller = caller_from_headers(&headers)?;
    let appointment_id = parse_appointment_id(&appointment_id)?;
    let confirmation = state
        .payments
        .confirm_payment(caller.as_ref(), appointment_id)
        .await?;

    Ok(Json(confirmation))
}

pub async fn fail_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(appointment_id): Path<String>,
) -> Result<Json<FailPaymentResponse>, BookingError> {
    let caller = caller_from_headers(&headers)?;
    let appointment_id = parse_appointment_id(&appointment_id)?;
    let appointment_id = state.payments.fail_payment(caller.as_ref(), appointment_id).await?;

    Ok(Json(FailPaymentResponse { appointment_id }))
}

/// An empty body sweeps with the configured timeout. Overriding the timeout
/// releases other users' holds early, so only administrators may do it.
pub async fn reclaim_holds(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReclaimResponse>, BookingError> {
    let request = parse_reclaim_request(&body)?;
    if request.timeout_minutes.is_some() {
        let caller = caller_from_headers(&headers)?;
        if !require_caller(caller.as_ref())?.is_admin() {
            return Err(BookingError::permission_denied(
                "Only administrators can override timeoutMinutes",
            ));
        }
    }

    let report = state.sweeper.reclaim_expired_holds(request.timeout_minutes).await?;

    Ok(Json(ReclaimResponse {
        released_count: report.released_count,
    }))
}

fn parse_reclaim_request(body: &[u8]) -> BookingResult<ReclaimRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ReclaimRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| BookingError::invalid_argument(format!("Invalid request body: {}", e)))
}

pub async fn health_check() -> &'static str {
    "OK"
}
