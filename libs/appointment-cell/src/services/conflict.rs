use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use professional_cell::interval::overlaps;

use crate::models::{Appointment, AppointmentError};
use crate::store::AppointmentStore;

/// The single place overlap policy lives. Direct booking, rescheduling and
/// recurrence expansion all gate through this service so the definition of
/// "conflict" cannot drift between paths.
pub struct ConflictDetectionService {
    appointments: Arc<dyn AppointmentStore>,
}

impl ConflictDetectionService {
    pub fn new(appointments: Arc<dyn AppointmentStore>) -> Self {
        Self { appointments }
    }

    /// True iff any binding-status appointment for the professional
    /// overlaps `[start_time, end_time)`, excluding the given appointment
    /// when a caller checks an update against itself.
    pub async fn has_conflict(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<bool, AppointmentError> {
        let conflicting = self
            .conflicting_appointments(professional_id, start_time, end_time, exclude_appointment_id, auth_token)
            .await?;

        Ok(!conflicting.is_empty())
    }

    pub async fn conflicting_appointments(
        &self,
        professional_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        debug!(
            "Checking conflicts for professional {} from {} to {}",
            professional_id, start_time, end_time
        );

        let candidates = self
            .appointments
            .find_in_range(professional_id, start_time, end_time, exclude_appointment_id, auth_token)
            .await?;

        let conflicting: Vec<Appointment> = candidates
            .into_iter()
            .filter(|apt| {
                apt.status.is_binding()
                    && overlaps(start_time, end_time, apt.start_time, apt.end_time)
            })
            .collect();

        if !conflicting.is_empty() {
            warn!(
                "Conflict detected for professional {} - {} conflicting appointments",
                professional_id,
                conflicting.len()
            );
        }

        Ok(conflicting)
    }

    /// Overlap check against windows accepted earlier in the same
    /// expansion batch, which are not yet visible in the store.
    pub fn window_conflicts_with(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        accepted: &[(DateTime<Utc>, DateTime<Utc>)],
    ) -> bool {
        accepted
            .iter()
            .any(|(s, e)| overlaps(start_time, end_time, *s, *e))
    }
}
