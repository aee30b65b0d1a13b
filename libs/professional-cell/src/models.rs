use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime, Datelike, Weekday};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Professional {
    pub id: Uuid,
    pub full_name: String,
    pub specialty: Option<String>,
    pub default_appointment_duration_minutes: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recurring weekly template describing when a professional is bookable.
/// Re-evaluated against every calendar date falling on `day_of_week`;
/// deactivated rather than deleted once referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub day_of_week: i32, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An absolute-dated exception that removes availability (vacation,
/// personal block).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: Uuid,
    pub professional_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl TimeBlock {
    /// A block spanning 00:00:00 through 23:59:59 of `date` counts as a
    /// full-day block and removes the day from month-level availability.
    pub fn covers_full_day(&self, date: NaiveDate) -> bool {
        let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = date.and_hms_opt(23, 59, 59).unwrap().and_utc();
        self.start_time <= day_start && self.end_time >= day_end
    }
}

/// Start/end of an appointment that currently holds a slot. Only the
/// interval matters to the resolver; the full appointment row lives in the
/// appointment cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookedInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWindowRequest {
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWindowRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimeBlockRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthAvailabilityResponse {
    pub professional_id: Uuid,
    pub year: i32,
    pub month: u32,
    pub available_days: Vec<u32>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProfessionalError {
    #[error("Professional not found")]
    NotFound,

    #[error("Availability window not found")]
    WindowNotFound,

    #[error("Availability window conflicts with an existing schedule")]
    WindowOverlap,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Clinic convention: 0 = Sunday .. 6 = Saturday.
pub fn day_of_week_index(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_of_week_index_follows_clinic_convention() {
        // 2025-03-10 is a Monday
        assert_eq!(day_of_week_index(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()), 1);
        assert_eq!(day_of_week_index(NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()), 0);
        assert_eq!(day_of_week_index(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()), 6);
    }

    #[test]
    fn full_day_block_detection() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let block = TimeBlock {
            id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            start_time: Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap(),
            reason: "vacation".to_string(),
            created_at: Utc::now(),
        };
        assert!(block.covers_full_day(date));

        let partial = TimeBlock {
            end_time: Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
            ..block.clone()
        };
        assert!(!partial.covers_full_day(date));

        // A multi-day span covers each day inside it
        let week = TimeBlock {
            start_time: Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 3, 14, 23, 59, 59).unwrap(),
            ..block
        };
        assert!(week.covers_full_day(date));
    }
}
