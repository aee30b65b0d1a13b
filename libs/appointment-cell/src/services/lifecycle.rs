// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Appointment, AppointmentError, AppointmentStatus, LifecycleEvent};
use crate::store::{AppointmentStore, LifecycleEventSink};

/// Hours of notice below which a patient-side cancellation is flagged as
/// late. The flag annotates the recorded reason; it never blocks.
pub const LATE_CANCELLATION_NOTICE_HOURS: i64 = 24;

pub struct AppointmentLifecycleService {
    appointments: Arc<dyn AppointmentStore>,
    events: Arc<dyn LifecycleEventSink>,
}

impl AppointmentLifecycleService {
    pub fn new(appointments: Arc<dyn AppointmentStore>, events: Arc<dyn LifecycleEventSink>) -> Self {
        Self { appointments, events }
    }

    /// Total over every (current, requested) pair:
    /// - cancelled appointments accept nothing (terminal);
    /// - completion requires a confirmed appointment;
    /// - a no-show cannot be confirmed after the fact;
    /// - everything else is permitted.
    pub fn validate_status_transition(
        &self,
        current: AppointmentStatus,
        requested: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        let allowed = match (current, requested) {
            (AppointmentStatus::Cancelled, _) => false,
            (AppointmentStatus::Confirmed, AppointmentStatus::Completed) => true,
            (_, AppointmentStatus::Completed) => false,
            (AppointmentStatus::NoShow, AppointmentStatus::Confirmed) => false,
            (_, _) => true,
        };

        if !allowed {
            warn!("Invalid status transition attempted: {} -> {}", current, requested);
            return Err(AppointmentError::InvalidStatusTransition {
                from: current,
                to: requested,
            });
        }

        Ok(())
    }

    /// Validate and persist a transition, then emit the lifecycle event.
    /// Event delivery is fire-and-forget: a sink failure is logged and the
    /// transition still stands.
    pub async fn transition(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        reason: Option<String>,
        actor: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Transitioning appointment {} to {}", appointment_id, new_status);

        let current = self
            .appointments
            .find_by_id(appointment_id, auth_token)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        self.validate_status_transition(current.status, new_status)?;

        let updated = self
            .appointments
            .update_status(appointment_id, new_status, reason.clone(), actor, auth_token)
            .await?;

        let event = LifecycleEvent {
            appointment_id,
            previous_status: current.status,
            new_status,
            reason,
            actor,
            occurred_at: Utc::now(),
        };
        if let Err(e) = self.events.publish(&event, auth_token).await {
            warn!("Failed to publish lifecycle event for appointment {}: {}", appointment_id, e);
        }

        Ok(updated)
    }

    /// Fewer than 24 hours of notice before the appointment starts.
    pub fn is_late_cancellation(start_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        start_time - now < Duration::hours(LATE_CANCELLATION_NOTICE_HOURS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use crate::store::{MockAppointmentStore, MockLifecycleEventSink};

    fn service() -> AppointmentLifecycleService {
        AppointmentLifecycleService::new(
            Arc::new(MockAppointmentStore::new()),
            Arc::new(MockLifecycleEventSink::new()),
        )
    }

    #[test]
    fn nothing_leaves_cancelled() {
        let service = service();
        for target in [
            AppointmentStatus::Requested,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Rescheduled,
            AppointmentStatus::NoShow,
            AppointmentStatus::Cancelled,
        ] {
            assert_matches!(
                service.validate_status_transition(AppointmentStatus::Cancelled, target),
                Err(AppointmentError::InvalidStatusTransition { .. })
            );
        }
    }

    #[test]
    fn completion_requires_confirmation() {
        let service = service();
        assert!(service
            .validate_status_transition(AppointmentStatus::Confirmed, AppointmentStatus::Completed)
            .is_ok());
        assert_matches!(
            service.validate_status_transition(AppointmentStatus::Requested, AppointmentStatus::Completed),
            Err(AppointmentError::InvalidStatusTransition { .. })
        );
        assert_matches!(
            service.validate_status_transition(AppointmentStatus::NoShow, AppointmentStatus::Completed),
            Err(AppointmentError::InvalidStatusTransition { .. })
        );
    }

    #[test]
    fn no_show_cannot_be_confirmed() {
        let service = service();
        assert_matches!(
            service.validate_status_transition(AppointmentStatus::NoShow, AppointmentStatus::Confirmed),
            Err(AppointmentError::InvalidStatusTransition { .. })
        );
    }

    #[test]
    fn ordinary_transitions_are_permitted() {
        let service = service();
        let allowed = [
            (AppointmentStatus::Requested, AppointmentStatus::Confirmed),
            (AppointmentStatus::Requested, AppointmentStatus::Cancelled),
            (AppointmentStatus::Confirmed, AppointmentStatus::Cancelled),
            (AppointmentStatus::Confirmed, AppointmentStatus::NoShow),
            (AppointmentStatus::Requested, AppointmentStatus::Rescheduled),
            (AppointmentStatus::Confirmed, AppointmentStatus::Rescheduled),
            (AppointmentStatus::NoShow, AppointmentStatus::Rescheduled),
        ];
        for (from, to) in allowed {
            assert!(service.validate_status_transition(from, to).is_ok(), "{} -> {}", from, to);
        }
    }

    #[test]
    fn late_cancellation_flag_tracks_the_24_hour_boundary() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();

        let two_hours_before = Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap();
        assert!(AppointmentLifecycleService::is_late_cancellation(start, two_hours_before));

        let two_days_before = Utc.with_ymd_and_hms(2025, 3, 8, 9, 0, 0).unwrap();
        assert!(!AppointmentLifecycleService::is_late_cancellation(start, two_days_before));

        // Exactly 24 hours of notice is not late
        let exactly = Utc.with_ymd_and_hms(2025, 3, 9, 9, 0, 0).unwrap();
        assert!(!AppointmentLifecycleService::is_late_cancellation(start, exactly));
    }

    #[tokio::test]
    async fn transition_fails_on_unknown_appointment() {
        let mut store = MockAppointmentStore::new();
        store.expect_find_by_id().returning(|_, _| Ok(None));

        let service = AppointmentLifecycleService::new(
            Arc::new(store),
            Arc::new(MockLifecycleEventSink::new()),
        );

        let result = service
            .transition(Uuid::new_v4(), AppointmentStatus::Confirmed, None, None, "token")
            .await;
        assert_matches!(result, Err(AppointmentError::NotFound));
    }

    #[tokio::test]
    async fn transition_persists_and_emits_event() {
        let appointment_id = Uuid::new_v4();

        let mut store = MockAppointmentStore::new();
        store.expect_find_by_id().returning(move |id, _| {
            Ok(Some(Appointment {
                id,
                patient_id: Uuid::new_v4(),
                professional_id: Uuid::new_v4(),
                appointment_type_id: Uuid::new_v4(),
                start_time: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                end_time: Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap(),
                status: AppointmentStatus::Requested,
                cancellation_reason: None,
                modified_by: None,
                recurrence_rule_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        });
        store
            .expect_update_status()
            .withf(|_, status, _, _, _| *status == AppointmentStatus::Confirmed)
            .returning(move |id, status, reason, actor, _| {
                Ok(Appointment {
                    id,
                    patient_id: Uuid::new_v4(),
                    professional_id: Uuid::new_v4(),
                    appointment_type_id: Uuid::new_v4(),
                    start_time: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                    end_time: Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap(),
                    status,
                    cancellation_reason: reason,
                    modified_by: actor,
                    recurrence_rule_id: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
            });

        let mut sink = MockLifecycleEventSink::new();
        sink.expect_publish()
            .withf(|event, _| {
                event.previous_status == AppointmentStatus::Requested
                    && event.new_status == AppointmentStatus::Confirmed
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let service = AppointmentLifecycleService::new(Arc::new(store), Arc::new(sink));
        let updated = service
            .transition(appointment_id, AppointmentStatus::Confirmed, None, None, "token")
            .await
            .unwrap();

        assert_eq!(updated.status, AppointmentStatus::Confirmed);
    }
}
