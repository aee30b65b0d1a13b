// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    CancelAppointmentRequest, CreateRecurrenceRequest, RescheduleAppointmentRequest,
    UpdateRecurrenceRequest, UpdateStatusRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::recurrence::RecurrenceExpansionService;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct AppointmentQueryParams {
    pub patient_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckQuery {
    pub professional_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRuleQuery {
    pub cancel_future: Option<bool>,
}

fn map_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        AppointmentError::ProfessionalNotFound => {
            AppError::NotFound("Professional not found".to_string())
        }
        AppointmentError::RuleNotFound => {
            AppError::NotFound("Recurrence rule not found".to_string())
        }
        AppointmentError::ConflictDetected => {
            AppError::Conflict("Appointment slot conflicts with existing booking".to_string())
        }
        AppointmentError::InvalidStatusTransition { from, to } => {
            AppError::BadRequest(format!("Invalid status transition: {} -> {}", from, to))
        }
        AppointmentError::ValidationError(msg) => AppError::BadRequest(msg),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let appointment = booking_service
        .book_appointment(request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let appointment = booking_service
        .get_appointment(appointment_id, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppConfig>>,
    Query(params): Query<AppointmentQueryParams>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let query = AppointmentSearchQuery {
        patient_id: params.patient_id,
        professional_id: params.professional_id,
        status: params.status,
        from_date: params.from_date,
        to_date: params.to_date,
        limit: params.limit,
        offset: params.offset,
    };

    let appointments = booking_service
        .search_appointments(query, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "count": appointments.len(),
        "appointments": appointments
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let appointment = booking_service
        .cancel_appointment(appointment_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let response = booking_service
        .reschedule_appointment(appointment_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "original": response.original,
        "replacement": response.replacement,
        "message": "Appointment rescheduled successfully"
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let appointment = booking_service
        .update_status(appointment_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<ConflictCheckQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let booking_service = AppointmentBookingService::from_config(&state);

    let conflicting = booking_service
        .check_conflicts(
            query.professional_id,
            query.start_time,
            query.end_time,
            query.exclude_appointment_id,
            auth.token(),
        )
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "has_conflict": !conflicting.is_empty(),
        "conflicting_appointments": conflicting
    })))
}

// ==============================================================================
// RECURRENCE HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_recurrence_rule(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateRecurrenceRequest>,
) -> Result<Json<Value>, AppError> {
    let recurrence_service = RecurrenceExpansionService::from_config(&state);

    let (rule, outcome) = recurrence_service
        .create_rule(request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "rule": rule,
        "created": outcome.created,
        "skipped": outcome.skipped
    })))
}

#[axum::debug_handler]
pub async fn get_recurrence_rule(
    State(state): State<Arc<AppConfig>>,
    Path(rule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let recurrence_service = RecurrenceExpansionService::from_config(&state);

    let rule = recurrence_service
        .get_rule(rule_id, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!(rule)))
}

#[axum::debug_handler]
pub async fn regenerate_recurrence_rule(
    State(state): State<Arc<AppConfig>>,
    Path(rule_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpdateRecurrenceRequest>,
) -> Result<Json<Value>, AppError> {
    let recurrence_service = RecurrenceExpansionService::from_config(&state);

    let (rule, outcome) = recurrence_service
        .regenerate(rule_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "rule": rule,
        "created": outcome.created,
        "skipped": outcome.skipped
    })))
}

#[axum::debug_handler]
pub async fn deactivate_recurrence_rule(
    State(state): State<Arc<AppConfig>>,
    Path(rule_id): Path<Uuid>,
    Query(query): Query<DeactivateRuleQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let recurrence_service = RecurrenceExpansionService::from_config(&state);

    let rule = recurrence_service
        .deactivate(rule_id, query.cancel_future.unwrap_or(false), auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "rule": rule,
        "message": "Recurrence rule deactivated"
    })))
}
