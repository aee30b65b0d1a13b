// libs/professional-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{
    CreateTimeBlockRequest, CreateWindowRequest, MonthAvailabilityResponse, ProfessionalError,
    UpdateWindowRequest,
};
use crate::services::{AvailabilityService, ProfessionalService};

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub year: i32,
    pub month: u32,
}

fn map_error(e: ProfessionalError) -> AppError {
    match e {
        ProfessionalError::NotFound => AppError::NotFound("Professional not found".to_string()),
        ProfessionalError::WindowNotFound => {
            AppError::NotFound("Availability window not found".to_string())
        }
        ProfessionalError::WindowOverlap => {
            AppError::Conflict("Availability window conflicts with an existing schedule".to_string())
        }
        ProfessionalError::ValidationError(msg) => AppError::BadRequest(msg),
        ProfessionalError::DatabaseError(msg) => AppError::Database(msg),
    }
}

#[axum::debug_handler]
pub async fn get_professional(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let service = ProfessionalService::from_config(&state);

    let professional = service
        .get_professional(professional_id, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!(professional)))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let slots = service
        .available_slots(professional_id, query.date, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "professional_id": professional_id,
        "date": query.date,
        "slots": slots
    })))
}

#[axum::debug_handler]
pub async fn get_available_days(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    Query(query): Query<DaysQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<MonthAvailabilityResponse>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let available_days = service
        .available_days(professional_id, query.year, query.month, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(MonthAvailabilityResponse {
        professional_id,
        year: query.year,
        month: query.month,
        available_days,
    }))
}

#[axum::debug_handler]
pub async fn list_windows(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let windows = service
        .list_windows(professional_id, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({ "windows": windows })))
}

#[axum::debug_handler]
pub async fn create_window(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateWindowRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let window = service
        .create_window(professional_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "window": window
    })))
}

#[axum::debug_handler]
pub async fn update_window(
    State(state): State<Arc<AppConfig>>,
    Path(window_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<UpdateWindowRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let window = service
        .update_window(window_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "window": window
    })))
}

#[axum::debug_handler]
pub async fn deactivate_window(
    State(state): State<Arc<AppConfig>>,
    Path(window_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let window = service
        .deactivate_window(window_id, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "window": window
    })))
}

#[axum::debug_handler]
pub async fn create_time_block(
    State(state): State<Arc<AppConfig>>,
    Path(professional_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateTimeBlockRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::from_config(&state);

    let block = service
        .create_time_block(professional_id, request, auth.token())
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "success": true,
        "time_block": block
    })))
}
