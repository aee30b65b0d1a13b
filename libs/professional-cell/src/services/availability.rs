use chrono::{Duration, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::interval::overlaps;
use crate::models::{
    AvailabilityWindow, AvailableSlot, CreateTimeBlockRequest, CreateWindowRequest,
    ProfessionalError, TimeBlock, UpdateWindowRequest, day_of_week_index,
};
use crate::store::{
    AvailabilityWindowStore, ProfessionalDirectory, ScheduledAppointmentsView,
    SupabaseProfessionalStore, TimeBlockStore,
};

/// Resolves a professional's weekly templates, time blocks and existing
/// bookings into concrete free slots.
pub struct AvailabilityService {
    directory: Arc<dyn ProfessionalDirectory>,
    windows: Arc<dyn AvailabilityWindowStore>,
    blocks: Arc<dyn TimeBlockStore>,
    appointments: Arc<dyn ScheduledAppointmentsView>,
}

impl AvailabilityService {
    pub fn new(
        directory: Arc<dyn ProfessionalDirectory>,
        windows: Arc<dyn AvailabilityWindowStore>,
        blocks: Arc<dyn TimeBlockStore>,
        appointments: Arc<dyn ScheduledAppointmentsView>,
    ) -> Self {
        Self { directory, windows, blocks, appointments }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let store = Arc::new(SupabaseProfessionalStore::new(Arc::new(SupabaseClient::new(config))));
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    /// Calculate the free slots for a professional on a specific date.
    ///
    /// Slots are cut from each active window at the professional's default
    /// appointment duration; a trailing remainder shorter than one slot is
    /// dropped. Slots overlapping a requested/confirmed appointment or a
    /// time block are removed.
    pub async fn available_slots(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<AvailableSlot>, ProfessionalError> {
        debug!("Calculating available slots for professional {} on {}", professional_id, date);

        let professional = self
            .directory
            .find_professional(professional_id, auth_token)
            .await?
            .ok_or(ProfessionalError::NotFound)?;

        let day_windows = self
            .windows
            .find_windows(professional_id, Some(day_of_week_index(date)), auth_token)
            .await?;

        if day_windows.is_empty() {
            return Ok(vec![]);
        }

        let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = date.and_hms_opt(23, 59, 59).unwrap().and_utc();

        let booked = self
            .appointments
            .find_booked_intervals(professional_id, day_start, day_end, auth_token)
            .await?;
        let blocks = self
            .blocks
            .find_blocks_overlapping(professional_id, day_start, day_end, auth_token)
            .await?;

        let duration = Duration::minutes(professional.default_appointment_duration_minutes as i64);
        let mut slots = Vec::new();

        for window in day_windows.iter().filter(|w| w.is_active) {
            let window_end = date.and_time(window.end_time).and_utc();
            let mut current = date.and_time(window.start_time).and_utc();

            while current + duration <= window_end {
                let slot_end = current + duration;

                let taken = booked
                    .iter()
                    .any(|apt| overlaps(current, slot_end, apt.start_time, apt.end_time));
                let blocked = blocks
                    .iter()
                    .any(|blk| overlaps(current, slot_end, blk.start_time, blk.end_time));

                if !taken && !blocked {
                    slots.push(AvailableSlot { start_time: current, end_time: slot_end });
                }

                current = slot_end;
            }
        }

        slots.sort_by(|a, b| a.start_time.cmp(&b.start_time));

        debug!("Found {} available slots", slots.len());
        Ok(slots)
    }

    /// Which days of a month have any availability at all: at least one
    /// active window on that weekday and no full-day block. Existing
    /// appointments are deliberately not consulted here - a fully booked
    /// day still reports as available at month granularity, trading
    /// precision for one cheap query per month.
    pub async fn available_days(
        &self,
        professional_id: Uuid,
        year: i32,
        month: u32,
        auth_token: &str,
    ) -> Result<Vec<u32>, ProfessionalError> {
        debug!("Calculating available days for professional {} in {}-{:02}", professional_id, year, month);

        self.directory
            .find_professional(professional_id, auth_token)
            .await?
            .ok_or(ProfessionalError::NotFound)?;

        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| ProfessionalError::ValidationError(format!("Invalid month: {}-{}", year, month)))?;

        let all_windows = self.windows.find_windows(professional_id, None, auth_token).await?;
        let active_weekdays: HashSet<i32> = all_windows
            .iter()
            .filter(|w| w.is_active)
            .map(|w| w.day_of_week)
            .collect();

        if active_weekdays.is_empty() {
            return Ok(vec![]);
        }

        let day_count = days_in_month(year, month);
        let month_start = first.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let month_end = NaiveDate::from_ymd_opt(year, month, day_count)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap()
            .and_utc();

        let blocks = self
            .blocks
            .find_blocks_overlapping(professional_id, month_start, month_end, auth_token)
            .await?;

        let mut days = Vec::new();
        for day in 1..=day_count {
            let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
            if !active_weekdays.contains(&day_of_week_index(date)) {
                continue;
            }
            if blocks.iter().any(|b| b.covers_full_day(date)) {
                continue;
            }
            days.push(day);
        }

        Ok(days)
    }

    pub async fn list_windows(
        &self,
        professional_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<AvailabilityWindow>, ProfessionalError> {
        self.directory
            .find_professional(professional_id, auth_token)
            .await?
            .ok_or(ProfessionalError::NotFound)?;

        self.windows.find_windows(professional_id, None, auth_token).await
    }

    pub async fn create_window(
        &self,
        professional_id: Uuid,
        request: CreateWindowRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError> {
        self.directory
            .find_professional(professional_id, auth_token)
            .await?
            .ok_or(ProfessionalError::NotFound)?;

        if request.day_of_week < 0 || request.day_of_week > 6 {
            return Err(ProfessionalError::ValidationError(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if request.start_time >= request.end_time {
            return Err(ProfessionalError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }

        let existing = self
            .windows
            .find_windows(professional_id, Some(request.day_of_week), auth_token)
            .await?;
        let collides = existing.iter().any(|w| {
            w.is_active && request.start_time < w.end_time && request.end_time > w.start_time
        });
        if collides {
            return Err(ProfessionalError::WindowOverlap);
        }

        self.windows.create_window(professional_id, &request, auth_token).await
    }

    pub async fn update_window(
        &self,
        window_id: Uuid,
        request: UpdateWindowRequest,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError> {
        let current = self
            .windows
            .find_window(window_id, auth_token)
            .await?
            .ok_or(ProfessionalError::WindowNotFound)?;

        let start = request.start_time.unwrap_or(current.start_time);
        let end = request.end_time.unwrap_or(current.end_time);
        if start >= end {
            return Err(ProfessionalError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }

        let siblings = self
            .windows
            .find_windows(current.professional_id, Some(current.day_of_week), auth_token)
            .await?;
        let collides = siblings.iter().any(|w| {
            w.id != window_id && w.is_active && start < w.end_time && end > w.start_time
        });
        if collides {
            return Err(ProfessionalError::WindowOverlap);
        }

        self.windows.update_window(window_id, &request, auth_token).await
    }

    /// Windows are soft-deactivated, never deleted, so historical
    /// appointments keep a valid template to point back at.
    pub async fn deactivate_window(
        &self,
        window_id: Uuid,
        auth_token: &str,
    ) -> Result<AvailabilityWindow, ProfessionalError> {
        self.windows
            .find_window(window_id, auth_token)
            .await?
            .ok_or(ProfessionalError::WindowNotFound)?;

        let request = UpdateWindowRequest {
            start_time: None,
            end_time: None,
            is_active: Some(false),
        };
        self.windows.update_window(window_id, &request, auth_token).await
    }

    pub async fn create_time_block(
        &self,
        professional_id: Uuid,
        request: CreateTimeBlockRequest,
        auth_token: &str,
    ) -> Result<TimeBlock, ProfessionalError> {
        self.directory
            .find_professional(professional_id, auth_token)
            .await?
            .ok_or(ProfessionalError::NotFound)?;

        if request.start_time >= request.end_time {
            return Err(ProfessionalError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }

        self.blocks.create_block(professional_id, &request, auth_token).await
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    (next - first).num_days() as u32
}
