// libs/professional-cell/src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    AvailabilityWindow, BookedInterval, CreateTimeBlockRequest, CreateWindowRequest,
    Professional, ProfessionalError, TimeBlock, UpdateWindowRequest,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfessionalDirectory: Send + Sync {
    async fn find_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Professional>, ProfessionalError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityWindowStore: Send + Sync {
    async fn find_windows(
        &self,
        professional_id: Uuid,
        day_of_week: Option<i32>,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityWindow>, ProfessionalError>;

    async fn find_window(
        &self,
        window_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<AvailabilityWindow>, ProfessionalError>;

    async fn create_window(
        &self,
        professional_id: Uuid,
        request: &CreateWindowRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError>;

    async fn update_window(
        &self,
        window_id: Uuid,
        request: &UpdateWindowRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeBlockStore: Send + Sync {
    async fn find_blocks_overlapping(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<TimeBlock>, ProfessionalError>;

    async fn create_block(
        &self,
        professional_id: Uuid,
        request: &CreateTimeBlockRequest,
        auth_token: &str,
    ) -> Result<TimeBlock, ProfessionalError>;
}

/// Read-only view of the appointments that currently hold slots. Only
/// binding statuses (requested/confirmed) surface here; the appointment
/// cell owns the full rows.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduledAppointmentsView: Send + Sync {
    async fn find_booked_intervals(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<BookedInterval>, ProfessionalError>;
}

// ==============================================================================
// SUPABASE-BACKED IMPLEMENTATION
// ==============================================================================

pub struct SupabaseProfessionalStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseProfessionalStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn get_rows(&self, path: &str, auth_token: &str) -> Result<Vec<Value>, ProfessionalError> {
        self.supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| ProfessionalError::DatabaseError(e.to_string()))
    }

    fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, ProfessionalError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| ProfessionalError::DatabaseError(format!("Failed to parse rows: {}", e)))
    }

    fn representation_headers() -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );
        headers
    }
}

#[async_trait]
impl ProfessionalDirectory for SupabaseProfessionalStore {
    async fn find_professional(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Professional>, ProfessionalError> {
        debug!("Fetching professional: {}", professional_id);

        let path = format!("/rest/v1/professionals?id=eq.{}", professional_id);
        let rows = self.get_rows(&path, auth_token).await?;

        let mut professionals: Vec<Professional> = Self::parse_rows(rows)?;
        Ok(professionals.pop())
    }
}

#[async_trait]
impl AvailabilityWindowStore for SupabaseProfessionalStore {
    async fn find_windows(
        &self,
        professional_id: Uuid,
        day_of_week: Option<i32>,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityWindow>, ProfessionalError> {
        let mut path = format!(
            "/rest/v1/availability_windows?professional_id=eq.{}&is_active=eq.true",
            professional_id
        );
        if let Some(day) = day_of_week {
            path.push_str(&format!("&day_of_week=eq.{}", day));
        }
        path.push_str("&order=day_of_week.asc,start_time.asc");

        let rows = self.get_rows(&path, auth_token).await?;
        Self::parse_rows(rows)
    }

    async fn find_window(
        &self,
        window_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<AvailabilityWindow>, ProfessionalError> {
        let path = format!("/rest/v1/availability_windows?id=eq.{}", window_id);
        let rows = self.get_rows(&path, auth_token).await?;

        let mut windows: Vec<AvailabilityWindow> = Self::parse_rows(rows)?;
        Ok(windows.pop())
    }

    async fn create_window(
        &self,
        professional_id: Uuid,
        request: &CreateWindowRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError> {
        debug!("Creating availability window for professional {}", professional_id);

        let window_data = json!({
            "professional_id": professional_id,
            "day_of_week": request.day_of_week,
            "start_time": request.start_time.format("%H:%M:%S").to_string(),
            "end_time": request.end_time.format("%H:%M:%S").to_string(),
            "is_active": true,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/availability_windows",
                Some(auth_token),
                Some(window_data),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| ProfessionalError::DatabaseError(e.to_string()))?;

        let mut windows: Vec<AvailabilityWindow> = Self::parse_rows(result)?;
        windows
            .pop()
            .ok_or_else(|| ProfessionalError::DatabaseError("Failed to create availability window".to_string()))
    }

    async fn update_window(
        &self,
        window_id: Uuid,
        request: &UpdateWindowRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError> {
        debug!("Updating availability window: {}", window_id);

        let mut update_data = serde_json::Map::new();
        if let Some(start_time) = request.start_time {
            update_data.insert(
                "start_time".to_string(),
                json!(start_time.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(end_time) = request.end_time {
            update_data.insert(
                "end_time".to_string(),
                json!(end_time.format("%H:%M:%S").to_string()),
            );
        }
        if let Some(is_active) = request.is_active {
            update_data.insert("is_active".to_string(), json!(is_active));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/availability_windows?id=eq.{}", window_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(Value::Object(update_data)),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| ProfessionalError::DatabaseError(e.to_string()))?;

        let mut windows: Vec<AvailabilityWindow> = Self::parse_rows(result)?;
        windows.pop().ok_or(ProfessionalError::WindowNotFound)
    }
}

#[async_trait]
impl TimeBlockStore for SupabaseProfessionalStore {
    async fn find_blocks_overlapping(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<TimeBlock>, ProfessionalError> {
        let path = format!(
            "/rest/v1/time_blocks?professional_id=eq.{}&start_time=lte.{}&end_time=gte.{}&order=start_time.asc",
            professional_id,
            urlencoding::encode(&end_time.to_rfc3339()),
            urlencoding::encode(&start_time.to_rfc3339()),
        );

        let rows = self.get_rows(&path, auth_token).await?;
        Self::parse_rows(rows)
    }

    async fn create_block(
        &self,
        professional_id: Uuid,
        request: &CreateTimeBlockRequest,
        auth_token: &str,
    ) -> Result<TimeBlock, ProfessionalError> {
        debug!("Creating time block for professional {}", professional_id);

        let block_data = json!({
            "professional_id": professional_id,
            "start_time": request.start_time.to_rfc3339(),
            "end_time": request.end_time.to_rfc3339(),
            "reason": request.reason,
            "created_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/time_blocks",
                Some(auth_token),
                Some(block_data),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| ProfessionalError::DatabaseError(e.to_string()))?;

        let mut blocks: Vec<TimeBlock> = Self::parse_rows(result)?;
        blocks
            .pop()
            .ok_or_else(|| ProfessionalError::DatabaseError("Failed to create time block".to_string()))
    }
}

#[async_trait]
impl ScheduledAppointmentsView for SupabaseProfessionalStore {
    async fn find_booked_intervals(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<BookedInterval>, ProfessionalError> {
        let path = format!(
            "/rest/v1/appointments?professional_id=eq.{}&start_time=lte.{}&end_time=gte.{}&status=in.(requested,confirmed)&select=start_time,end_time&order=start_time.asc",
            professional_id,
            urlencoding::encode(&end_time.to_rfc3339()),
            urlencoding::encode(&start_time.to_rfc3339()),
        );

        let rows = self.get_rows(&path, auth_token).await?;
        Self::parse_rows(rows)
    }
}
