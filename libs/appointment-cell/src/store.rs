// libs/appointment-cell/src/store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, LifecycleEvent,
    NewAppointment, RecurringAppointmentRule, UpdateRecurrenceRequest,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn find_by_id(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Appointments for the professional whose span intersects
    /// `[start_time, end_time]`, regardless of status; the conflict
    /// detector applies the binding-status policy.
    async fn find_in_range(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn create(
        &self,
        appointment: &NewAppointment,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError>;

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        cancellation_reason: Option<String>,
        modified_by: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError>;

    async fn search(
        &self,
        query: &AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn find_future_for_rule(
        &self,
        rule_id: Uuid,
        after: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecurrenceRuleStore: Send + Sync {
    async fn create_rule(
        &self,
        rule: &RecurringAppointmentRule,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError>;

    async fn find_rule(
        &self,
        rule_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<RecurringAppointmentRule>, AppointmentError>;

    async fn update_rule(
        &self,
        rule_id: Uuid,
        request: &UpdateRecurrenceRequest,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError>;

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn patient_exists(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<bool, AppointmentError>;
}

/// Store-backed advisory lock serializing conflict-check-and-create per
/// professional, so two concurrent bookings cannot both pass the check.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchedulingLockStore: Send + Sync {
    async fn acquire_professional_lock(&self, professional_id: Uuid) -> Result<bool, AppointmentError>;

    async fn release_professional_lock(&self, professional_id: Uuid) -> Result<(), AppointmentError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LifecycleEventSink: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent, auth_token: &str) -> Result<(), AppointmentError>;
}

// ==============================================================================
// SUPABASE-BACKED IMPLEMENTATION
// ==============================================================================

const LOCK_TIMEOUT_SECONDS: i64 = 30;

pub struct SupabaseSchedulingStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSchedulingStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn get_rows(&self, path: &str, auth_token: &str) -> Result<Vec<Value>, AppointmentError> {
        self.supabase
            .request(Method::GET, path, Some(auth_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    fn parse_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, AppointmentError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse rows: {}", e)))
    }

    fn representation_headers() -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );
        headers
    }

    fn lock_key(professional_id: Uuid) -> String {
        format!("professional_{}", professional_id)
    }

    async fn try_insert_lock(&self, professional_id: Uuid) -> Result<bool, AppointmentError> {
        let lock_data = json!({
            "lock_key": Self::lock_key(professional_id),
            "professional_id": professional_id,
            "acquired_at": Utc::now().to_rfc3339(),
            "expires_at": (Utc::now() + chrono::Duration::seconds(LOCK_TIMEOUT_SECONDS)).to_rfc3339(),
            "process_id": format!("scheduler_{}", Uuid::new_v4())
        });

        // Insert fails on the unique lock_key when another request holds it
        match self
            .supabase
            .request::<Value>(Method::POST, "/rest/v1/scheduling_locks", None, Some(lock_data))
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    /// Drop the lock row if its expiry passed; returns whether anything
    /// was cleaned up and a retry makes sense.
    async fn cleanup_expired_lock(&self, professional_id: Uuid) -> Result<bool, AppointmentError> {
        let path = format!(
            "/rest/v1/scheduling_locks?lock_key=eq.{}&select=expires_at",
            Self::lock_key(professional_id)
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(format!("Lock check failed: {}", e)))?;

        if let Some(lock) = rows.first() {
            if let Some(expires_at_str) = lock.get("expires_at").and_then(|v| v.as_str()) {
                if let Ok(expires_at) = DateTime::parse_from_rfc3339(expires_at_str) {
                    if expires_at.with_timezone(&Utc) < Utc::now() {
                        self.release_professional_lock(professional_id).await?;
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }
}

#[async_trait]
impl AppointmentStore for SupabaseSchedulingStore {
    async fn find_by_id(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows = self.get_rows(&path, auth_token).await?;

        let mut appointments: Vec<Appointment> = Self::parse_rows(rows)?;
        Ok(appointments.pop())
    }

    async fn find_in_range(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("professional_id=eq.{}", professional_id),
            format!("start_time=lte.{}", urlencoding::encode(&end_time.to_rfc3339())),
            format!("end_time=gte.{}", urlencoding::encode(&start_time.to_rfc3339())),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let rows = self.get_rows(&path, auth_token).await?;
        Self::parse_rows(rows)
    }

    async fn create(
        &self,
        appointment: &NewAppointment,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!(
            "Creating appointment for patient {} with professional {}",
            appointment.patient_id, appointment.professional_id
        );

        let appointment_data = json!({
            "patient_id": appointment.patient_id,
            "professional_id": appointment.professional_id,
            "appointment_type_id": appointment.appointment_type_id,
            "start_time": appointment.start_time.to_rfc3339(),
            "end_time": appointment.end_time.to_rfc3339(),
            "status": appointment.status.to_string(),
            "recurrence_rule_id": appointment.recurrence_rule_id,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(auth_token),
                Some(appointment_data),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut appointments: Vec<Appointment> = Self::parse_rows(result)?;
        appointments
            .pop()
            .ok_or_else(|| AppointmentError::DatabaseError("Failed to create appointment".to_string()))
    }

    async fn update_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        cancellation_reason: Option<String>,
        modified_by: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Updating appointment {} to status {}", appointment_id, status);

        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(status.to_string()));
        if let Some(reason) = cancellation_reason {
            update_data.insert("cancellation_reason".to_string(), json!(reason));
        }
        if let Some(actor) = modified_by {
            update_data.insert("modified_by".to_string(), json!(actor));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
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
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut appointments: Vec<Appointment> = Self::parse_rows(result)?;
        appointments.pop().ok_or(AppointmentError::NotFound)
    }

    async fn search(
        &self,
        query: &AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = Vec::new();

        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(professional_id) = query.professional_id {
            query_parts.push(format!("professional_id=eq.{}", professional_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!(
                "start_time=gte.{}",
                urlencoding::encode(&from_date.to_rfc3339())
            ));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!(
                "start_time=lte.{}",
                urlencoding::encode(&to_date.to_rfc3339())
            ));
        }

        query_parts.push(format!("limit={}", query.limit.unwrap_or(50)));
        query_parts.push(format!("offset={}", query.offset.unwrap_or(0)));

        let path = format!(
            "/rest/v1/appointments?{}&order=start_time.asc",
            query_parts.join("&")
        );

        let rows = self.get_rows(&path, auth_token).await?;
        Self::parse_rows(rows)
    }

    async fn find_future_for_rule(
        &self,
        rule_id: Uuid,
        after: DateTime<Utc>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?recurrence_rule_id=eq.{}&start_time=gt.{}&order=start_time.asc",
            rule_id,
            urlencoding::encode(&after.to_rfc3339())
        );

        let rows = self.get_rows(&path, auth_token).await?;
        Self::parse_rows(rows)
    }
}

#[async_trait]
impl RecurrenceRuleStore for SupabaseSchedulingStore {
    async fn create_rule(
        &self,
        rule: &RecurringAppointmentRule,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError> {
        debug!(
            "Creating recurrence rule for patient {} with professional {}",
            rule.patient_id, rule.professional_id
        );

        let rule_data = serde_json::to_value(rule)
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to serialize rule: {}", e)))?;

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/recurring_appointment_rules",
                Some(auth_token),
                Some(rule_data),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut rules: Vec<RecurringAppointmentRule> = Self::parse_rows(result)?;
        rules
            .pop()
            .ok_or_else(|| AppointmentError::DatabaseError("Failed to create recurrence rule".to_string()))
    }

    async fn find_rule(
        &self,
        rule_id: Uuid,
        auth_token: &str,
    ) -> Result<Option<RecurringAppointmentRule>, AppointmentError> {
        let path = format!("/rest/v1/recurring_appointment_rules?id=eq.{}", rule_id);
        let rows = self.get_rows(&path, auth_token).await?;

        let mut rules: Vec<RecurringAppointmentRule> = Self::parse_rows(rows)?;
        Ok(rules.pop())
    }

    async fn update_rule(
        &self,
        rule_id: Uuid,
        request: &UpdateRecurrenceRequest,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError> {
        debug!("Updating recurrence rule: {}", rule_id);

        let mut update_data = serde_json::Map::new();
        if let Some(first_start_time) = request.first_start_time {
            update_data.insert("first_start_time".to_string(), json!(first_start_time.to_rfc3339()));
        }
        if let Some(first_end_time) = request.first_end_time {
            update_data.insert("first_end_time".to_string(), json!(first_end_time.to_rfc3339()));
        }
        if let Some(pattern) = request.pattern {
            update_data.insert("pattern".to_string(), json!(pattern.to_string()));
        }
        if let Some(interval) = request.recurrence_interval {
            update_data.insert("recurrence_interval".to_string(), json!(interval));
        }
        if let Some(ref weekdays) = request.weekdays {
            update_data.insert("weekdays".to_string(), json!(weekdays));
        }
        if let Some(day_of_month) = request.day_of_month {
            update_data.insert("day_of_month".to_string(), json!(day_of_month));
        }
        if let Some(end_condition) = request.end_condition {
            update_data.insert(
                "end_condition".to_string(),
                serde_json::to_value(end_condition)
                    .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?,
            );
        }
        if let Some(occurrence_count) = request.occurrence_count {
            update_data.insert("occurrence_count".to_string(), json!(occurrence_count));
        }
        if let Some(end_date) = request.end_date {
            update_data.insert("end_date".to_string(), json!(end_date.to_rfc3339()));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/recurring_appointment_rules?id=eq.{}", rule_id);
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
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut rules: Vec<RecurringAppointmentRule> = Self::parse_rows(result)?;
        rules.pop().ok_or(AppointmentError::RuleNotFound)
    }

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError> {
        let update_data = json!({
            "is_active": is_active,
            "updated_at": Utc::now().to_rfc3339()
        });

        let path = format!("/rest/v1/recurring_appointment_rules?id=eq.{}", rule_id);
        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(auth_token),
                Some(update_data),
                Some(Self::representation_headers()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut rules: Vec<RecurringAppointmentRule> = Self::parse_rows(result)?;
        rules.pop().ok_or(AppointmentError::RuleNotFound)
    }
}

#[async_trait]
impl PatientDirectory for SupabaseSchedulingStore {
    async fn patient_exists(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<bool, AppointmentError> {
        let path = format!("/rest/v1/patients?id=eq.{}&select=id", patient_id);
        let rows = self.get_rows(&path, auth_token).await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl SchedulingLockStore for SupabaseSchedulingStore {
    async fn acquire_professional_lock(&self, professional_id: Uuid) -> Result<bool, AppointmentError> {
        if self.try_insert_lock(professional_id).await? {
            debug!("Scheduling lock acquired for professional {}", professional_id);
            return Ok(true);
        }

        // Holder may have died; clean up an expired row and retry once
        if self.cleanup_expired_lock(professional_id).await? {
            return self.try_insert_lock(professional_id).await;
        }

        Ok(false)
    }

    async fn release_professional_lock(&self, professional_id: Uuid) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/scheduling_locks?lock_key=eq.{}",
            Self::lock_key(professional_id)
        );
        let _: Value = self
            .supabase
            .request(Method::DELETE, &path, None, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(format!("Lock release failed: {}", e)))?;

        debug!("Scheduling lock released for professional {}", professional_id);
        Ok(())
    }
}

#[async_trait]
impl LifecycleEventSink for SupabaseSchedulingStore {
    async fn publish(&self, event: &LifecycleEvent, auth_token: &str) -> Result<(), AppointmentError> {
        let event_data = json!({
            "appointment_id": event.appointment_id,
            "previous_status": event.previous_status.to_string(),
            "new_status": event.new_status.to_string(),
            "reason": event.reason,
            "actor": event.actor,
            "occurred_at": event.occurred_at.to_rfc3339()
        });

        let _: Value = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/appointment_events",
                Some(auth_token),
                Some(event_data),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(())
    }
}
