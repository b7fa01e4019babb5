// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityResponse, BookSlotCommand, BookSlotRequest, CancelCommand, CancelRequest, Caller,
    RescheduleCommand, RescheduleRequest,
};
use crate::router::AppointmentState;

fn caller_from(user: &User) -> Result<Caller, AppError> {
    let user_id = user
        .user_id()
        .ok_or_else(|| AppError::Auth("Invalid user id in token".to_string()))?;
    Ok(Caller { user_id, is_admin: user.is_admin() })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<AppointmentState>>,
    Path((doctor_id, date)): Path<(String, String)>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let doctor_id = Uuid::parse_str(&doctor_id)
        .map_err(|_| AppError::ValidationError("Invalid Doctor ID format.".to_string()))?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| AppError::ValidationError("Invalid date format.".to_string()))?;

    debug!("Availability requested for doctor {} on {}", doctor_id, date);
    let response = state.resolver.resolve(doctor_id, date, Utc::now()).await?;
    Ok(Json(response))
}

// ==============================================================================
// BOOKING LIFECYCLE
// ==============================================================================

/// Books the authenticated caller into a slot.
#[axum::debug_handler]
pub async fn book_slot(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
    payload: Result<Json<BookSlotRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let caller = caller_from(&user)?;
    let request = body(payload)?;

    let command = BookSlotCommand {
        patient_id: caller.user_id,
        doctor_id: request.doctor_id,
        window_ref: request.window_ref,
        start: request.start,
        end: request.end,
        appointment_type: request.appointment_type,
        reason: request.reason,
    };
    let appointment = state.transactor.book_slot(command, Utc::now()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Appointment booked successfully!",
            "appointment": appointment
        })),
    ))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    payload: Result<Json<RescheduleRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_from(&user)?;
    let request = body(payload)?;

    let command = RescheduleCommand {
        appointment_id,
        window_ref: request.window_ref,
        start: request.start,
        end: request.end,
        caller,
    };
    let appointment = state.transactor.reschedule(command, Utc::now()).await?;

    Ok(Json(json!({
        "message": "Appointment rescheduled successfully",
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    payload: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_from(&user)?;
    // The body is optional; a bodiless POST cancels without a reason.
    let request = match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => CancelRequest::default(),
        other => body(other)?,
    };

    let command = CancelCommand {
        appointment_id,
        reason: request.reason,
        caller,
    };
    let appointment = state.transactor.cancel(command, Utc::now()).await?;

    Ok(Json(json!({
        "message": "Appointment cancelled successfully",
        "appointment": appointment
    })))
}

// ==============================================================================
// LOOKUPS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_from(&user)?;
    let appointment = state.transactor.get_appointment(appointment_id, &caller).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn my_appointments(
    State(state): State<Arc<AppointmentState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let caller = caller_from(&user)?;
    let appointments = state.transactor.patient_appointments(&caller).await?;

    Ok(Json(json!({
        "total": appointments.len(),
        "appointments": appointments
    })))
}
