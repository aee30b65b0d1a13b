use std::sync::Arc;
use chrono::{DateTime, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Canned PostgREST row payloads for wiremock-backed integration tests.
pub struct MockPostgrestResponses;

impl MockPostgrestResponses {
    pub fn professional_response(professional_id: &str, full_name: &str, default_duration: i32) -> serde_json::Value {
        json!({
            "id": professional_id,
            "full_name": full_name,
            "specialty": "General Practice",
            "default_appointment_duration_minutes": default_duration,
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn availability_window_response(
        professional_id: &str,
        day_of_week: i32,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "professional_id": professional_id,
            "day_of_week": day_of_week,
            "start_time": start_time.format("%H:%M:%S").to_string(),
            "end_time": end_time.format("%H:%M:%S").to_string(),
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn time_block_response(
        professional_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        reason: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "professional_id": professional_id,
            "start_time": start_time.to_rfc3339(),
            "end_time": end_time.to_rfc3339(),
            "reason": reason,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment_response(
        patient_id: &str,
        professional_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "patient_id": patient_id,
            "professional_id": professional_id,
            "appointment_type_id": Uuid::new_v4(),
            "start_time": start_time.to_rfc3339(),
            "end_time": end_time.to_rfc3339(),
            "status": status,
            "cancellation_reason": null,
            "modified_by": null,
            "recurrence_rule_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn recurrence_rule_response(
        patient_id: &str,
        professional_id: &str,
        first_start: DateTime<Utc>,
        first_end: DateTime<Utc>,
        pattern: &str,
    ) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "patient_id": patient_id,
            "professional_id": professional_id,
            "appointment_type_id": Uuid::new_v4(),
            "first_start_time": first_start.to_rfc3339(),
            "first_end_time": first_end.to_rfc3339(),
            "pattern": pattern,
            "recurrence_interval": 1,
            "weekdays": null,
            "day_of_month": null,
            "end_condition": "never",
            "occurrence_count": null,
            "end_date": null,
            "is_active": true,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }
}
