// libs/appointment-cell/src/services/booking.rs
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use professional_cell::store::{ProfessionalDirectory, SupabaseProfessionalStore};

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus,
    BookAppointmentRequest, CancelAppointmentRequest, CancelledBy, NewAppointment,
    RescheduleAppointmentRequest, RescheduleResponse, UpdateStatusRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::store::{
    AppointmentStore, PatientDirectory, SchedulingLockStore, SupabaseSchedulingStore,
};

const MAX_LOCK_ATTEMPTS: u32 = 3;

pub struct AppointmentBookingService {
    appointments: Arc<dyn AppointmentStore>,
    patients: Arc<dyn PatientDirectory>,
    professionals: Arc<dyn ProfessionalDirectory>,
    locks: Arc<dyn SchedulingLockStore>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        patients: Arc<dyn PatientDirectory>,
        professionals: Arc<dyn ProfessionalDirectory>,
        locks: Arc<dyn SchedulingLockStore>,
        conflict_service: ConflictDetectionService,
        lifecycle_service: AppointmentLifecycleService,
    ) -> Self {
        Self {
            appointments,
            patients,
            professionals,
            locks,
            conflict_service,
            lifecycle_service,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let store = Arc::new(SupabaseSchedulingStore::new(Arc::clone(&supabase)));
        let professionals = Arc::new(SupabaseProfessionalStore::new(supabase));

        let conflict_service = ConflictDetectionService::new(store.clone());
        let lifecycle_service = AppointmentLifecycleService::new(store.clone(), store.clone());

        Self::new(
            store.clone(),
            store.clone(),
            professionals,
            store,
            conflict_service,
            lifecycle_service,
        )
    }

    /// Book a single appointment: validate, verify both parties exist,
    /// then conflict-check and insert under the professional's scheduling
    /// lock so a concurrent request cannot land in the same window.
    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!(
            "Booking appointment for patient {} with professional {}",
            request.patient_id, request.professional_id
        );

        if request.start_time >= request.end_time {
            return Err(AppointmentError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }
        if request.start_time <= Utc::now() {
            return Err(AppointmentError::ValidationError(
                "Appointment must be scheduled for a future time".to_string(),
            ));
        }

        if !self.patients.patient_exists(request.patient_id, auth_token).await? {
            return Err(AppointmentError::PatientNotFound);
        }
        self.professionals
            .find_professional(request.professional_id, auth_token)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?
            .ok_or(AppointmentError::ProfessionalNotFound)?;

        let new_appointment = NewAppointment {
            patient_id: request.patient_id,
            professional_id: request.professional_id,
            appointment_type_id: request.appointment_type_id,
            start_time: request.start_time,
            end_time: request.end_time,
            status: AppointmentStatus::Requested,
            recurrence_rule_id: None,
        };

        let appointment = self
            .create_guarded(request.professional_id, new_appointment, None, auth_token)
            .await?;

        info!("Appointment {} booked successfully", appointment.id);
        Ok(appointment)
    }

    /// Cancel an appointment. Patient-side cancellations with fewer than
    /// 24 hours of notice get a late-cancellation annotation on the
    /// recorded reason; the cancellation itself always goes through.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment: {}", appointment_id);

        let current = self
            .appointments
            .find_by_id(appointment_id, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let mut reason = format!("Cancelled by {}: {}", request.cancelled_by, request.reason);
        if request.cancelled_by == CancelledBy::Patient
            && AppointmentLifecycleService::is_late_cancellation(current.start_time, Utc::now())
        {
            reason.push_str(" (late cancellation: less than 24 hours notice)");
        }

        self.lifecycle_service
            .transition(
                appointment_id,
                AppointmentStatus::Cancelled,
                Some(reason),
                request.modified_by,
                auth_token,
            )
            .await
    }

    /// Reschedule as a new appointment: a fresh `Requested` row at the new
    /// time, conflict-gated against everything but the original, then the
    /// original flips to `Rescheduled` with a note naming its replacement.
    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
        auth_token: &str,
    ) -> Result<RescheduleResponse, AppointmentError> {
        debug!("Rescheduling appointment: {}", appointment_id);

        let current = self
            .appointments
            .find_by_id(appointment_id, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        if request.new_start_time >= request.new_end_time {
            return Err(AppointmentError::ValidationError(
                "Start time must be before end time".to_string(),
            ));
        }

        // Refuse early rather than leaving an orphaned replacement behind
        self.lifecycle_service
            .validate_status_transition(current.status, AppointmentStatus::Rescheduled)?;

        let new_appointment = NewAppointment {
            patient_id: current.patient_id,
            professional_id: current.professional_id,
            appointment_type_id: current.appointment_type_id,
            start_time: request.new_start_time,
            end_time: request.new_end_time,
            status: AppointmentStatus::Requested,
            recurrence_rule_id: None,
        };

        let replacement = self
            .create_guarded(current.professional_id, new_appointment, Some(current.id), auth_token)
            .await?;

        let note = match request.reason {
            Some(ref r) => format!("Rescheduled to appointment {}: {}", replacement.id, r),
            None => format!("Rescheduled to appointment {}", replacement.id),
        };
        let original = self
            .lifecycle_service
            .transition(
                appointment_id,
                AppointmentStatus::Rescheduled,
                Some(note),
                request.modified_by,
                auth_token,
            )
            .await?;

        Ok(RescheduleResponse { original, replacement })
    }

    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        request: UpdateStatusRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.lifecycle_service
            .transition(
                appointment_id,
                request.new_status,
                request.reason,
                request.modified_by,
                auth_token,
            )
            .await
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.appointments
            .find_by_id(appointment_id, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn search_appointments(
        &self,
        query: AppointmentSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.appointments.search(&query, auth_token).await
    }

    pub async fn check_conflicts(
        &self,
        professional_id: Uuid,
        start_time: chrono::DateTime<Utc>,
        end_time: chrono::DateTime<Utc>,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.conflict_service
            .conflicting_appointments(professional_id, start_time, end_time, exclude_appointment_id, auth_token)
            .await
    }

    /// Conflict-check-then-insert as one guarded sequence. The advisory
    /// lock is keyed on the professional; a busy lock is retried with
    /// backoff before giving up.
    async fn create_guarded(
        &self,
        professional_id: Uuid,
        new_appointment: NewAppointment,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            if !self.locks.acquire_professional_lock(professional_id).await? {
                debug!(
                    "Scheduling lock busy for professional {} (attempt {}/{})",
                    professional_id, attempt, MAX_LOCK_ATTEMPTS
                );
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                continue;
            }

            let result = self
                .checked_create(professional_id, &new_appointment, exclude_appointment_id, auth_token)
                .await;

            self.locks.release_professional_lock(professional_id).await?;
            return result;
        }

        Err(AppointmentError::DatabaseError(
            "Failed to acquire scheduling lock after multiple attempts".to_string(),
        ))
    }

    async fn checked_create(
        &self,
        professional_id: Uuid,
        new_appointment: &NewAppointment,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let has_conflict = self
            .conflict_service
            .has_conflict(
                professional_id,
                new_appointment.start_time,
                new_appointment.end_time,
                exclude_appointment_id,
                auth_token,
            )
            .await?;

        if has_conflict {
            return Err(AppointmentError::ConflictDetected);
        }

        self.appointments.create(new_appointment, auth_token).await
    }
}
