// libs/appointment-cell/src/services/recurrence.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use professional_cell::models::day_of_week_index;

use crate::models::{
    AppointmentError, AppointmentStatus, CreateRecurrenceRequest, ExpansionOutcome,
    NewAppointment, RecurrencePattern, RecurringAppointmentRule, RecurrenceEndCondition,
    SkippedOccurrence, UpdateRecurrenceRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::store::{
    AppointmentStore, RecurrenceRuleStore, SchedulingLockStore, SupabaseSchedulingStore,
};

/// Hard ceiling on candidates per expansion, whatever the rule says.
pub const MAX_GENERATED_OCCURRENCES: usize = 100;

/// Open-ended rules stop generating one year out from the first
/// occurrence; the rest of the series materializes on a later expansion.
pub const OPEN_ENDED_HORIZON_DAYS: i64 = 365;

const MAX_LOCK_ATTEMPTS: u32 = 3;

pub struct RecurrenceExpansionService {
    rules: Arc<dyn RecurrenceRuleStore>,
    appointments: Arc<dyn AppointmentStore>,
    locks: Arc<dyn SchedulingLockStore>,
    conflict_service: ConflictDetectionService,
    lifecycle_service: AppointmentLifecycleService,
}

/// The bounded, ordered candidate windows a rule describes, before any
/// conflict checking. Chronological by construction.
pub fn occurrence_windows(rule: &RecurringAppointmentRule) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let duration = rule.occurrence_duration();
    let interval = rule.recurrence_interval.max(1) as i64;

    let cap = match rule.end_condition {
        RecurrenceEndCondition::AfterOccurrences => rule
            .occurrence_count
            .map(|count| count.max(0) as usize)
            .unwrap_or(MAX_GENERATED_OCCURRENCES)
            .min(MAX_GENERATED_OCCURRENCES),
        _ => MAX_GENERATED_OCCURRENCES,
    };
    let horizon: Option<DateTime<Utc>> = match rule.end_condition {
        RecurrenceEndCondition::OnDate => rule.end_date,
        RecurrenceEndCondition::Never => {
            Some(rule.first_start_time + Duration::days(OPEN_ENDED_HORIZON_DAYS))
        }
        RecurrenceEndCondition::AfterOccurrences => None,
    };
    let beyond = |candidate: DateTime<Utc>| horizon.is_some_and(|h| candidate > h);

    let mut windows = Vec::new();

    match rule.pattern {
        // Unrecognized patterns fall back to daily stepping
        RecurrencePattern::Daily | RecurrencePattern::Custom => {
            let step = Duration::days(interval);
            let mut current = rule.first_start_time;
            while windows.len() < cap && !beyond(current) {
                windows.push((current, current + duration));
                current += step;
            }
        }
        RecurrencePattern::Weekly => {
            // Day-by-day walk accepting configured weekdays. The interval
            // multiplier is deliberately not applied in this mode: every
            // matching weekday of every week is used.
            let weekday_set: HashSet<i32> = rule
                .weekdays
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .copied()
                .collect();
            if weekday_set.is_empty() {
                return windows;
            }

            let mut current = rule.first_start_time;
            while windows.len() < cap && !beyond(current) {
                if weekday_set.contains(&day_of_week_index(current.date_naive())) {
                    windows.push((current, current + duration));
                }
                current += Duration::days(1);
            }
        }
        RecurrencePattern::Biweekly => {
            let step = Duration::weeks(2 * interval);
            let mut current = rule.first_start_time;
            while windows.len() < cap && !beyond(current) {
                windows.push((current, current + duration));
                current += step;
            }
        }
        RecurrencePattern::Monthly => {
            let pinned_day = rule.day_of_month.unwrap_or(rule.first_start_time.day());
            let time_of_day = rule.first_start_time.time();

            if cap == 0 || beyond(rule.first_start_time) {
                return windows;
            }
            windows.push((rule.first_start_time, rule.first_start_time + duration));

            let mut year = rule.first_start_time.year();
            let mut month = rule.first_start_time.month();
            while windows.len() < cap {
                let shifted = (month as i64 - 1) + interval;
                year += (shifted / 12) as i32;
                month = (shifted % 12 + 1) as u32;

                let month_start = NaiveDate::from_ymd_opt(year, month, 1)
                    .unwrap()
                    .and_time(time_of_day)
                    .and_utc();
                if beyond(month_start) {
                    break;
                }

                // Months without the pinned day are skipped outright -
                // a day-31 series never degrades to the 28th or 30th.
                if let Some(date) = NaiveDate::from_ymd_opt(year, month, pinned_day) {
                    let start = date.and_time(time_of_day).and_utc();
                    if beyond(start) {
                        break;
                    }
                    windows.push((start, start + duration));
                }
            }
        }
    }

    windows
}

impl RecurrenceExpansionService {
    pub fn new(
        rules: Arc<dyn RecurrenceRuleStore>,
        appointments: Arc<dyn AppointmentStore>,
        locks: Arc<dyn SchedulingLockStore>,
        conflict_service: ConflictDetectionService,
        lifecycle_service: AppointmentLifecycleService,
    ) -> Self {
        Self {
            rules,
            appointments,
            locks,
            conflict_service,
            lifecycle_service,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));
        let store = Arc::new(SupabaseSchedulingStore::new(supabase));

        let conflict_service = ConflictDetectionService::new(store.clone());
        let lifecycle_service = AppointmentLifecycleService::new(store.clone(), store.clone());

        Self::new(store.clone(), store.clone(), store, conflict_service, lifecycle_service)
    }

    pub async fn get_rule(
        &self,
        rule_id: Uuid,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError> {
        self.rules
            .find_rule(rule_id, auth_token)
            .await?
            .ok_or(AppointmentError::RuleNotFound)
    }

    /// Persist a new rule and expand it into its first batch of
    /// appointments. Validation runs before the rule row is written.
    pub async fn create_rule(
        &self,
        request: CreateRecurrenceRequest,
        auth_token: &str,
    ) -> Result<(RecurringAppointmentRule, ExpansionOutcome), AppointmentError> {
        let rule = RecurringAppointmentRule {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            professional_id: request.professional_id,
            appointment_type_id: request.appointment_type_id,
            first_start_time: request.first_start_time,
            first_end_time: request.first_end_time,
            pattern: request.pattern,
            recurrence_interval: request.recurrence_interval,
            weekdays: request.weekdays,
            day_of_month: request.day_of_month,
            end_condition: request.end_condition,
            occurrence_count: request.occurrence_count,
            end_date: request.end_date,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        rule.validate()?;

        let rule = self.rules.create_rule(&rule, auth_token).await?;
        let outcome = self.expand(&rule, auth_token).await?;
        Ok((rule, outcome))
    }

    /// Expand a rule into concrete appointments. Candidates are walked in
    /// chronological order under the professional's scheduling lock; a
    /// conflicting candidate is skipped and recorded, never fatal, and
    /// still counts toward the occurrence cap. Earlier acceptances in the
    /// same batch take part in conflict detection for later candidates.
    pub async fn expand(
        &self,
        rule: &RecurringAppointmentRule,
        auth_token: &str,
    ) -> Result<ExpansionOutcome, AppointmentError> {
        rule.validate()?;
        if !rule.is_active {
            return Err(AppointmentError::ValidationError(
                "Cannot expand an inactive recurrence rule".to_string(),
            ));
        }

        let candidates = occurrence_windows(rule);
        info!("Expanding recurrence rule {} into {} candidate windows", rule.id, candidates.len());

        if !self.acquire_lock_with_retry(rule.professional_id).await? {
            return Err(AppointmentError::DatabaseError(
                "Failed to acquire scheduling lock after multiple attempts".to_string(),
            ));
        }

        let result = self.expand_candidates(rule, candidates, auth_token).await;
        self.locks.release_professional_lock(rule.professional_id).await?;
        result
    }

    /// Rebuild a rule's future occurrences after an edit: cancel every
    /// open future appointment it generated, persist the changes, then
    /// expand the updated rule. Past appointments are never touched.
    pub async fn regenerate(
        &self,
        rule_id: Uuid,
        request: UpdateRecurrenceRequest,
        auth_token: &str,
    ) -> Result<(RecurringAppointmentRule, ExpansionOutcome), AppointmentError> {
        let current = self
            .rules
            .find_rule(rule_id, auth_token)
            .await?
            .ok_or(AppointmentError::RuleNotFound)?;

        // Reject a bad edit before cancelling anything
        apply_update(&current, &request).validate()?;

        self.cancel_future_occurrences(
            rule_id,
            "Cancelled by system: recurrence rule regenerated",
            auth_token,
        )
        .await?;

        let updated = self.rules.update_rule(rule_id, &request, auth_token).await?;
        let outcome = self.expand(&updated, auth_token).await?;
        Ok((updated, outcome))
    }

    /// Deactivating a rule stops future expansion; optionally its open
    /// future occurrences are cancelled too. Past ones stay as they are.
    pub async fn deactivate(
        &self,
        rule_id: Uuid,
        cancel_future: bool,
        auth_token: &str,
    ) -> Result<RecurringAppointmentRule, AppointmentError> {
        self.rules
            .find_rule(rule_id, auth_token)
            .await?
            .ok_or(AppointmentError::RuleNotFound)?;

        let rule = self.rules.set_rule_active(rule_id, false, auth_token).await?;

        if cancel_future {
            self.cancel_future_occurrences(
                rule_id,
                "Cancelled by system: recurrence rule deactivated",
                auth_token,
            )
            .await?;
        }

        Ok(rule)
    }

    async fn expand_candidates(
        &self,
        rule: &RecurringAppointmentRule,
        candidates: Vec<(DateTime<Utc>, DateTime<Utc>)>,
        auth_token: &str,
    ) -> Result<ExpansionOutcome, AppointmentError> {
        let mut created = Vec::new();
        let mut skipped = Vec::new();
        let mut accepted: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();

        for (start_time, end_time) in candidates {
            let store_conflict = self
                .conflict_service
                .has_conflict(rule.professional_id, start_time, end_time, None, auth_token)
                .await?;
            let sibling_conflict = !store_conflict
                && self
                    .conflict_service
                    .window_conflicts_with(start_time, end_time, &accepted);

            if store_conflict || sibling_conflict {
                debug!("Skipping occurrence {} - {} of rule {}: conflict", start_time, end_time, rule.id);
                let reason = if store_conflict {
                    "conflicts with an existing appointment"
                } else {
                    "conflicts with an earlier occurrence in this batch"
                };
                skipped.push(SkippedOccurrence {
                    start_time,
                    end_time,
                    reason: reason.to_string(),
                });
                continue;
            }

            let appointment = self
                .appointments
                .create(
                    &NewAppointment {
                        patient_id: rule.patient_id,
                        professional_id: rule.professional_id,
                        appointment_type_id: rule.appointment_type_id,
                        start_time,
                        end_time,
                        status: AppointmentStatus::Confirmed,
                        recurrence_rule_id: Some(rule.id),
                    },
                    auth_token,
                )
                .await?;

            accepted.push((start_time, end_time));
            created.push(appointment);
        }

        info!(
            "Expanded rule {}: {} appointments created, {} windows skipped",
            rule.id,
            created.len(),
            skipped.len()
        );

        Ok(ExpansionOutcome {
            rule_id: rule.id,
            created,
            skipped,
        })
    }

    async fn cancel_future_occurrences(
        &self,
        rule_id: Uuid,
        reason: &str,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let future = self
            .appointments
            .find_future_for_rule(rule_id, Utc::now(), auth_token)
            .await?;

        for appointment in future.into_iter().filter(|a| a.status.is_open()) {
            self.lifecycle_service
                .transition(
                    appointment.id,
                    AppointmentStatus::Cancelled,
                    Some(reason.to_string()),
                    None,
                    auth_token,
                )
                .await?;
        }

        Ok(())
    }

    async fn acquire_lock_with_retry(&self, professional_id: Uuid) -> Result<bool, AppointmentError> {
        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            if self.locks.acquire_professional_lock(professional_id).await? {
                return Ok(true);
            }
            debug!(
                "Scheduling lock busy for professional {} (attempt {}/{})",
                professional_id, attempt, MAX_LOCK_ATTEMPTS
            );
            tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
        }
        Ok(false)
    }
}

fn apply_update(
    rule: &RecurringAppointmentRule,
    request: &UpdateRecurrenceRequest,
) -> RecurringAppointmentRule {
    RecurringAppointmentRule {
        first_start_time: request.first_start_time.unwrap_or(rule.first_start_time),
        first_end_time: request.first_end_time.unwrap_or(rule.first_end_time),
        pattern: request.pattern.unwrap_or(rule.pattern),
        recurrence_interval: request.recurrence_interval.unwrap_or(rule.recurrence_interval),
        weekdays: request.weekdays.clone().or_else(|| rule.weekdays.clone()),
        day_of_month: request.day_of_month.or(rule.day_of_month),
        end_condition: request.end_condition.unwrap_or(rule.end_condition),
        occurrence_count: request.occurrence_count.or(rule.occurrence_count),
        end_date: request.end_date.or(rule.end_date),
        ..rule.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    use crate::models::Appointment;
    use crate::store::{
        MockAppointmentStore, MockLifecycleEventSink, MockRecurrenceRuleStore,
        MockSchedulingLockStore,
    };

    fn rule_starting_monday() -> RecurringAppointmentRule {
        RecurringAppointmentRule {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            professional_id: Uuid::new_v4(),
            appointment_type_id: Uuid::new_v4(),
            // 2025-03-10 is a Monday
            first_start_time: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
            first_end_time: Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap(),
            pattern: RecurrencePattern::Daily,
            recurrence_interval: 1,
            weekdays: None,
            day_of_month: None,
            end_condition: RecurrenceEndCondition::AfterOccurrences,
            occurrence_count: Some(3),
            end_date: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn daily_rule_steps_by_interval_days() {
        let rule = RecurringAppointmentRule {
            recurrence_interval: 2,
            occurrence_count: Some(4),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].0, Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0).unwrap());
        assert_eq!(windows[3].0, Utc.with_ymd_and_hms(2025, 3, 16, 9, 0, 0).unwrap());
        for (start, end) in &windows {
            assert_eq!(*end - *start, Duration::minutes(30));
        }
    }

    #[test]
    fn weekly_rule_hits_each_configured_weekday() {
        let rule = RecurringAppointmentRule {
            pattern: RecurrencePattern::Weekly,
            weekdays: Some(vec![1, 3]), // Monday and Wednesday
            occurrence_count: Some(3),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].0, Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()); // Mon
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0).unwrap()); // Wed
        assert_eq!(windows[2].0, Utc.with_ymd_and_hms(2025, 3, 17, 9, 0, 0).unwrap()); // next Mon
    }

    #[test]
    fn weekly_rule_ignores_the_interval_multiplier() {
        // interval=2 does not skip alternate weeks in weekday mode
        let rule = RecurringAppointmentRule {
            pattern: RecurrencePattern::Weekly,
            weekdays: Some(vec![1]),
            recurrence_interval: 2,
            occurrence_count: Some(3),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2025, 3, 17, 9, 0, 0).unwrap());
        assert_eq!(windows[2].0, Utc.with_ymd_and_hms(2025, 3, 24, 9, 0, 0).unwrap());
    }

    #[test]
    fn biweekly_rule_steps_by_two_weeks_times_interval() {
        let rule = RecurringAppointmentRule {
            pattern: RecurrencePattern::Biweekly,
            occurrence_count: Some(3),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2025, 3, 24, 9, 0, 0).unwrap());
        assert_eq!(windows[2].0, Utc.with_ymd_and_hms(2025, 4, 7, 9, 0, 0).unwrap());
    }

    #[test]
    fn monthly_day_31_skips_months_without_it() {
        let rule = RecurringAppointmentRule {
            pattern: RecurrencePattern::Monthly,
            day_of_month: Some(31),
            first_start_time: Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap(),
            first_end_time: Utc.with_ymd_and_hms(2025, 1, 31, 9, 30, 0).unwrap(),
            occurrence_count: Some(4),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        // February, April and June have no 31st and are skipped, never clamped
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].0, Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap());
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2025, 3, 31, 9, 0, 0).unwrap());
        assert_eq!(windows[2].0, Utc.with_ymd_and_hms(2025, 5, 31, 9, 0, 0).unwrap());
        assert_eq!(windows[3].0, Utc.with_ymd_and_hms(2025, 7, 31, 9, 0, 0).unwrap());
    }

    #[test]
    fn monthly_rule_crosses_year_boundaries() {
        let rule = RecurringAppointmentRule {
            pattern: RecurrencePattern::Monthly,
            day_of_month: Some(15),
            first_start_time: Utc.with_ymd_and_hms(2025, 11, 15, 9, 0, 0).unwrap(),
            first_end_time: Utc.with_ymd_and_hms(2025, 11, 15, 9, 30, 0).unwrap(),
            occurrence_count: Some(3),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].0, Utc.with_ymd_and_hms(2025, 12, 15, 9, 0, 0).unwrap());
        assert_eq!(windows[2].0, Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap());
    }

    #[test]
    fn open_ended_rules_stop_at_the_one_year_horizon() {
        let rule = RecurringAppointmentRule {
            pattern: RecurrencePattern::Weekly,
            weekdays: Some(vec![1]),
            end_condition: RecurrenceEndCondition::Never,
            occurrence_count: None,
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        // Mondays from 2025-03-10 through 2026-03-09 inclusive
        assert_eq!(windows.len(), 53);
        assert!(windows.last().unwrap().0 <= rule.first_start_time + Duration::days(OPEN_ENDED_HORIZON_DAYS));
    }

    #[test]
    fn hard_ceiling_binds_before_the_open_ended_horizon() {
        let rule = RecurringAppointmentRule {
            end_condition: RecurrenceEndCondition::Never,
            occurrence_count: None,
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        assert_eq!(windows.len(), MAX_GENERATED_OCCURRENCES);
    }

    #[test]
    fn on_date_bound_is_inclusive() {
        let rule = RecurringAppointmentRule {
            end_condition: RecurrenceEndCondition::OnDate,
            occurrence_count: None,
            end_date: Some(Utc.with_ymd_and_hms(2025, 3, 13, 9, 0, 0).unwrap()),
            ..rule_starting_monday()
        };
        let windows = occurrence_windows(&rule);

        // 10th through 13th, the end date itself still generates
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[3].0, Utc.with_ymd_and_hms(2025, 3, 13, 9, 0, 0).unwrap());
    }

    // ==========================================================================
    // EXPANSION SERVICE TESTS
    // ==========================================================================

    fn stored_appointment(new: &NewAppointment) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            professional_id: new.professional_id,
            appointment_type_id: new.appointment_type_id,
            start_time: new.start_time,
            end_time: new.end_time,
            status: new.status,
            cancellation_reason: None,
            modified_by: None,
            recurrence_rule_id: new.recurrence_rule_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn permissive_locks() -> MockSchedulingLockStore {
        let mut locks = MockSchedulingLockStore::new();
        locks.expect_acquire_professional_lock().returning(|_| Ok(true));
        locks.expect_release_professional_lock().returning(|_| Ok(()));
        locks
    }

    fn service_with(
        rules: MockRecurrenceRuleStore,
        appointments: MockAppointmentStore,
        conflict_store: MockAppointmentStore,
        locks: MockSchedulingLockStore,
    ) -> RecurrenceExpansionService {
        let appointments: Arc<dyn AppointmentStore> = Arc::new(appointments);
        RecurrenceExpansionService::new(
            Arc::new(rules),
            appointments.clone(),
            Arc::new(locks),
            ConflictDetectionService::new(Arc::new(conflict_store)),
            AppointmentLifecycleService::new(appointments, Arc::new(MockLifecycleEventSink::new())),
        )
    }

    #[tokio::test]
    async fn expansion_creates_confirmed_appointments_referencing_the_rule() {
        let rule = rule_starting_monday();
        let rule_id = rule.id;

        let mut appointments = MockAppointmentStore::new();
        appointments
            .expect_create()
            .times(3)
            .withf(move |new, _| {
                new.status == AppointmentStatus::Confirmed && new.recurrence_rule_id == Some(rule_id)
            })
            .returning(|new, _| Ok(stored_appointment(new)));

        let mut conflict_store = MockAppointmentStore::new();
        conflict_store.expect_find_in_range().returning(|_, _, _, _, _| Ok(vec![]));

        let service = service_with(
            MockRecurrenceRuleStore::new(),
            appointments,
            conflict_store,
            permissive_locks(),
        );
        let outcome = service.expand(&rule, "token").await.unwrap();

        assert_eq!(outcome.created.len(), 3);
        assert!(outcome.skipped.is_empty());
        // Strictly chronological
        for pair in outcome.created.windows(2) {
            assert!(pair[0].start_time < pair[1].start_time);
        }
    }

    #[tokio::test]
    async fn conflicting_candidate_is_skipped_and_still_counts_toward_the_cap() {
        let rule = rule_starting_monday(); // 3 daily candidates: 10th, 11th, 12th
        let conflicted_start = Utc.with_ymd_and_hms(2025, 3, 11, 9, 0, 0).unwrap();

        let mut appointments = MockAppointmentStore::new();
        appointments
            .expect_create()
            .times(2)
            .returning(|new, _| Ok(stored_appointment(new)));

        let mut conflict_store = MockAppointmentStore::new();
        conflict_store
            .expect_find_in_range()
            .returning(move |professional_id, start, _, _, _| {
                if start == conflicted_start {
                    Ok(vec![Appointment {
                        id: Uuid::new_v4(),
                        patient_id: Uuid::new_v4(),
                        professional_id,
                        appointment_type_id: Uuid::new_v4(),
                        start_time: conflicted_start,
                        end_time: conflicted_start + Duration::minutes(30),
                        status: AppointmentStatus::Confirmed,
                        cancellation_reason: None,
                        modified_by: None,
                        recurrence_rule_id: None,
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    }])
                } else {
                    Ok(vec![])
                }
            });

        let service = service_with(
            MockRecurrenceRuleStore::new(),
            appointments,
            conflict_store,
            permissive_locks(),
        );
        let outcome = service.expand(&rule, "token").await.unwrap();

        // The cap of 3 counts the skipped window; no fourth candidate is tried
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].start_time, conflicted_start);
        assert!(outcome.skipped[0].reason.contains("existing appointment"));
    }

    #[tokio::test]
    async fn siblings_accepted_earlier_in_the_batch_block_later_candidates() {
        // 48-hour occurrences of a daily rule overlap their neighbors
        let rule = RecurringAppointmentRule {
            first_end_time: Utc.with_ymd_and_hms(2025, 3, 12, 9, 0, 0).unwrap(),
            ..rule_starting_monday()
        };

        let mut appointments = MockAppointmentStore::new();
        appointments
            .expect_create()
            .times(2)
            .returning(|new, _| Ok(stored_appointment(new)));

        let mut conflict_store = MockAppointmentStore::new();
        conflict_store.expect_find_in_range().returning(|_, _, _, _, _| Ok(vec![]));

        let service = service_with(
            MockRecurrenceRuleStore::new(),
            appointments,
            conflict_store,
            permissive_locks(),
        );
        let outcome = service.expand(&rule, "token").await.unwrap();

        // Candidate 2 overlaps candidate 1; candidate 3 only touches its end
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.contains("earlier occurrence"));
    }

    #[tokio::test]
    async fn expansion_is_deterministic_for_a_fixed_store() {
        let rule = rule_starting_monday();

        let starts = |outcome: &ExpansionOutcome| -> Vec<DateTime<Utc>> {
            outcome.created.iter().map(|a| a.start_time).collect()
        };

        let mut first_run = None;
        for _ in 0..2 {
            let mut appointments = MockAppointmentStore::new();
            appointments.expect_create().returning(|new, _| Ok(stored_appointment(new)));
            let mut conflict_store = MockAppointmentStore::new();
            conflict_store.expect_find_in_range().returning(|_, _, _, _, _| Ok(vec![]));

            let service = service_with(
                MockRecurrenceRuleStore::new(),
                appointments,
                conflict_store,
                permissive_locks(),
            );
            let outcome = service.expand(&rule, "token").await.unwrap();

            match &first_run {
                None => first_run = Some(starts(&outcome)),
                Some(previous) => assert_eq!(previous, &starts(&outcome)),
            }
        }
    }

    #[tokio::test]
    async fn inactive_rules_refuse_to_expand() {
        let rule = RecurringAppointmentRule {
            is_active: false,
            ..rule_starting_monday()
        };

        let service = service_with(
            MockRecurrenceRuleStore::new(),
            MockAppointmentStore::new(),
            MockAppointmentStore::new(),
            MockSchedulingLockStore::new(),
        );
        let result = service.expand(&rule, "token").await;

        assert_matches!(result, Err(AppointmentError::ValidationError(_)));
    }

    #[tokio::test]
    async fn regenerate_cancels_open_future_occurrences_first() {
        let rule = rule_starting_monday();
        let rule_id = rule.id;
        let open_id = Uuid::new_v4();

        let future_start = Utc::now() + Duration::days(5);
        let mut appointments = MockAppointmentStore::new();
        appointments
            .expect_find_future_for_rule()
            .returning(move |searched_rule_id, _, _| {
                let open = Appointment {
                    id: open_id,
                    patient_id: Uuid::new_v4(),
                    professional_id: Uuid::new_v4(),
                    appointment_type_id: Uuid::new_v4(),
                    start_time: future_start,
                    end_time: future_start + Duration::minutes(30),
                    status: AppointmentStatus::Confirmed,
                    cancellation_reason: None,
                    modified_by: None,
                    recurrence_rule_id: Some(searched_rule_id),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                let finished = Appointment {
                    id: Uuid::new_v4(),
                    status: AppointmentStatus::Completed,
                    ..open.clone()
                };
                Ok(vec![open, finished])
            });
        appointments
            .expect_find_by_id()
            .withf(move |id, _| *id == open_id)
            .returning(move |id, _| {
                Ok(Some(Appointment {
                    id,
                    patient_id: Uuid::new_v4(),
                    professional_id: Uuid::new_v4(),
                    appointment_type_id: Uuid::new_v4(),
                    start_time: future_start,
                    end_time: future_start + Duration::minutes(30),
                    status: AppointmentStatus::Confirmed,
                    cancellation_reason: None,
                    modified_by: None,
                    recurrence_rule_id: Some(rule_id),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                }))
            });
        appointments
            .expect_update_status()
            .withf(move |id, status, reason, _, _| {
                *id == open_id
                    && *status == AppointmentStatus::Cancelled
                    && reason.as_deref().is_some_and(|r| r.contains("regenerated"))
            })
            .times(1)
            .returning(move |id, status, reason, actor, _| {
                Ok(Appointment {
                    id,
                    patient_id: Uuid::new_v4(),
                    professional_id: Uuid::new_v4(),
                    appointment_type_id: Uuid::new_v4(),
                    start_time: future_start,
                    end_time: future_start + Duration::minutes(30),
                    status,
                    cancellation_reason: reason,
                    modified_by: actor,
                    recurrence_rule_id: Some(rule_id),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                })
            });
        appointments.expect_create().returning(|new, _| Ok(stored_appointment(new)));

        let mut rules = MockRecurrenceRuleStore::new();
        let stored_rule = rule.clone();
        rules
            .expect_find_rule()
            .returning(move |_, _| Ok(Some(stored_rule.clone())));
        let updated_rule = RecurringAppointmentRule {
            occurrence_count: Some(2),
            ..rule.clone()
        };
        rules
            .expect_update_rule()
            .times(1)
            .returning(move |_, _, _| Ok(updated_rule.clone()));

        let mut conflict_store = MockAppointmentStore::new();
        conflict_store.expect_find_in_range().returning(|_, _, _, _, _| Ok(vec![]));

        let mut sink = MockLifecycleEventSink::new();
        sink.expect_publish().returning(|_, _| Ok(()));

        let appointments: Arc<dyn AppointmentStore> = Arc::new(appointments);
        let service = RecurrenceExpansionService::new(
            Arc::new(rules),
            appointments.clone(),
            Arc::new(permissive_locks()),
            ConflictDetectionService::new(Arc::new(conflict_store)),
            AppointmentLifecycleService::new(appointments, Arc::new(sink)),
        );

        let request = UpdateRecurrenceRequest {
            first_start_time: None,
            first_end_time: None,
            pattern: None,
            recurrence_interval: None,
            weekdays: None,
            day_of_month: None,
            end_condition: None,
            occurrence_count: Some(2),
            end_date: None,
        };
        let (updated, outcome) = service.regenerate(rule_id, request, "token").await.unwrap();

        assert_eq!(updated.occurrence_count, Some(2));
        assert_eq!(outcome.created.len(), 2);
    }
}
