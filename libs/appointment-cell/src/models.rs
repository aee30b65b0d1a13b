// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub appointment_type_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub modified_by: Option<Uuid>,
    pub recurrence_rule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Requested,
    Confirmed,
    Completed,
    Cancelled,
    Rescheduled,
    NoShow,
}

impl AppointmentStatus {
    /// Binding statuses hold their slot and count toward conflict
    /// detection; cancelled and no-show appointments release it.
    pub fn is_binding(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// Still open for regeneration purposes: neither finished nor
    /// terminally closed.
    pub fn is_open(&self) -> bool {
        matches!(self, AppointmentStatus::Requested | AppointmentStatus::Confirmed)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Requested => write!(f, "requested"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

/// Row shape for inserting a new appointment; the store fills in the id
/// and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub appointment_type_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub recurrence_rule_id: Option<Uuid>,
}

// ==============================================================================
// RECURRENCE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    /// Unrecognized upstream patterns land here and step like `Daily`.
    Custom,
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrencePattern::Daily => write!(f, "daily"),
            RecurrencePattern::Weekly => write!(f, "weekly"),
            RecurrencePattern::Biweekly => write!(f, "biweekly"),
            RecurrencePattern::Monthly => write!(f, "monthly"),
            RecurrencePattern::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEndCondition {
    Never,
    AfterOccurrences,
    OnDate,
}

/// The authoritative template for a series of appointments. Generated
/// appointments are independent rows carrying a traceability pointer back
/// here; editing the rule never rewrites history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringAppointmentRule {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub appointment_type_id: Uuid,
    pub first_start_time: DateTime<Utc>,
    pub first_end_time: DateTime<Utc>,
    pub pattern: RecurrencePattern,
    pub recurrence_interval: i32,
    pub weekdays: Option<Vec<i32>>, // 0 = Sunday .. 6 = Saturday
    pub day_of_month: Option<u32>,
    pub end_condition: RecurrenceEndCondition,
    pub occurrence_count: Option<i32>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringAppointmentRule {
    /// Every occurrence reuses the duration of the first one.
    pub fn occurrence_duration(&self) -> Duration {
        self.first_end_time - self.first_start_time
    }

    pub fn validate(&self) -> Result<(), AppointmentError> {
        if self.first_start_time >= self.first_end_time {
            return Err(AppointmentError::ValidationError(
                "First occurrence start must be before its end".to_string(),
            ));
        }
        if self.recurrence_interval < 1 {
            return Err(AppointmentError::ValidationError(
                "Recurrence interval must be a positive integer".to_string(),
            ));
        }

        match self.pattern {
            RecurrencePattern::Weekly => {
                let weekdays = self.weekdays.as_deref().unwrap_or(&[]);
                if weekdays.is_empty() {
                    return Err(AppointmentError::ValidationError(
                        "Weekly recurrence requires at least one weekday".to_string(),
                    ));
                }
                if weekdays.iter().any(|d| *d < 0 || *d > 6) {
                    return Err(AppointmentError::ValidationError(
                        "Weekdays must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                    ));
                }
            }
            RecurrencePattern::Monthly => {
                match self.day_of_month {
                    Some(day) if (1..=31).contains(&day) => {}
                    Some(day) => {
                        return Err(AppointmentError::ValidationError(format!(
                            "Day of month must be between 1 and 31, got {}",
                            day
                        )));
                    }
                    None => {
                        return Err(AppointmentError::ValidationError(
                            "Monthly recurrence requires a day of month".to_string(),
                        ));
                    }
                }
            }
            _ => {}
        }

        match self.end_condition {
            RecurrenceEndCondition::AfterOccurrences => match self.occurrence_count {
                Some(count) if count >= 1 => {}
                _ => {
                    return Err(AppointmentError::ValidationError(
                        "End condition after-occurrences requires a positive count".to_string(),
                    ));
                }
            },
            RecurrenceEndCondition::OnDate => match self.end_date {
                Some(end) if end > self.first_start_time => {}
                Some(_) => {
                    return Err(AppointmentError::ValidationError(
                        "Recurrence end date must be after the first occurrence".to_string(),
                    ));
                }
                None => {
                    return Err(AppointmentError::ValidationError(
                        "End condition on-date requires an end date".to_string(),
                    ));
                }
            },
            RecurrenceEndCondition::Never => {}
        }

        Ok(())
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub appointment_type_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
    pub cancelled_by: CancelledBy,
    pub modified_by: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Professional,
    System,
}

impl fmt::Display for CancelledBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelledBy::Patient => write!(f, "patient"),
            CancelledBy::Professional => write!(f, "professional"),
            CancelledBy::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start_time: DateTime<Utc>,
    pub new_end_time: DateTime<Utc>,
    pub reason: Option<String>,
    pub modified_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleResponse {
    pub original: Appointment,
    pub replacement: Appointment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub new_status: AppointmentStatus,
    pub reason: Option<String>,
    pub modified_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub patient_id: Option<Uuid>,
    pub professional_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecurrenceRequest {
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub appointment_type_id: Uuid,
    pub first_start_time: DateTime<Utc>,
    pub first_end_time: DateTime<Utc>,
    pub pattern: RecurrencePattern,
    pub recurrence_interval: i32,
    pub weekdays: Option<Vec<i32>>,
    pub day_of_month: Option<u32>,
    pub end_condition: RecurrenceEndCondition,
    pub occurrence_count: Option<i32>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecurrenceRequest {
    pub first_start_time: Option<DateTime<Utc>>,
    pub first_end_time: Option<DateTime<Utc>>,
    pub pattern: Option<RecurrencePattern>,
    pub recurrence_interval: Option<i32>,
    pub weekdays: Option<Vec<i32>>,
    pub day_of_month: Option<u32>,
    pub end_condition: Option<RecurrenceEndCondition>,
    pub occurrence_count: Option<i32>,
    pub end_date: Option<DateTime<Utc>>,
}

// ==============================================================================
// EXPANSION OUTCOME MODELS
// ==============================================================================

/// A candidate window the expander rejected, kept so callers can see why
/// a batch came up short instead of diffing counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedOccurrence {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionOutcome {
    pub rule_id: Uuid,
    pub created: Vec<Appointment>,
    pub skipped: Vec<SkippedOccurrence>,
}

// ==============================================================================
// LIFECYCLE EVENT MODELS
// ==============================================================================

/// Emitted on every status transition and handed to the notification
/// collaborator; delivery failures are theirs to deal with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub appointment_id: Uuid,
    pub previous_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
    pub reason: Option<String>,
    pub actor: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Professional not found")]
    ProfessionalNotFound,

    #[error("Recurrence rule not found")]
    RuleNotFound,

    #[error("Appointment conflicts with existing booking")]
    ConflictDetected,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
