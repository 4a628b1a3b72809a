use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::StepError;
use crate::models::{BookingContext, BookingStep, ContextField, ContextPatch};

/// A change of `next_booking_step` observed while applying patches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTransition {
    pub from: Option<BookingStep>,
    pub to: Option<BookingStep>,
    pub version: u64,
}

/// The only writer of a [`BookingContext`]. Built around one context for
/// the length of a turn; keeps an immutable snapshot per committed version
/// so any of them can be restored.
pub struct StepController<'a> {
    ctx: &'a mut BookingContext,
    history: BTreeMap<u64, Arc<BookingContext>>,
    transitions: Vec<StepTransition>,
}

impl<'a> StepController<'a> {
    pub fn new(ctx: &'a mut BookingContext) -> Self {
        let mut history = BTreeMap::new();
        history.insert(ctx.version, Arc::new(ctx.clone()));
        Self {
            ctx,
            history,
            transitions: Vec::new(),
        }
    }

    pub fn context(&self) -> &BookingContext {
        self.ctx
    }

    pub fn versions(&self) -> Vec<u64> {
        self.history.keys().copied().collect()
    }

    pub fn take_transitions(&mut self) -> Vec<StepTransition> {
        std::mem::take(&mut self.transitions)
    }

    /// Validate and commit `patch` as one new version. On error the context
    /// is left exactly as it was.
    pub fn apply_patch(
        &mut self,
        mut patch: ContextPatch,
        validate: bool,
        expected_version: Option<u64>,
    ) -> Result<(), StepError> {
        self.check_version(expected_version)?;

        if patch.strip_derived() {
            tracing::debug!(chat_id = %self.ctx.chat_id, "ignoring caller-supplied next_booking_step");
        }

        if patch.is_empty() {
            self.refresh_step();
            return Ok(());
        }

        let changed = patch.changed_fields(self.ctx);
        let written: Vec<ContextField> = changed
            .iter()
            .copied()
            .filter(|f| patch.writes_value(*f))
            .collect();

        let mut next = self.ctx.clone();
        if let Some(lowest) = changed.iter().filter_map(|f| f.rank()).min() {
            let downstream = ContextField::ALL
                .iter()
                .copied()
                .filter(|f| f.rank().is_some_and(|r| r > lowest));
            ContextPatch::clearing(downstream).write_into(&mut next);
        }
        patch.write_into(&mut next);

        if validate {
            check_prerequisites(&written, &next)?;
        }

        next.next_booking_step = next.derive_next_step();
        next.version = self.ctx.version + 1;
        self.commit(next);
        Ok(())
    }

    /// Restore the snapshot taken at `version` and forget everything
    /// committed after it.
    pub fn revert_to(&mut self, version: u64) -> Result<(), StepError> {
        let snapshot = self
            .history
            .get(&version)
            .cloned()
            .ok_or(StepError::UnknownVersion(version))?;

        self.history.split_off(&(version + 1));

        let from = self.ctx.next_booking_step;
        *self.ctx = (*snapshot).clone();
        self.record_transition(from);

        tracing::info!(chat_id = %self.ctx.chat_id, version, "reverted booking context");
        Ok(())
    }

    /// Empty every field owned by `step` and the steps after it. Skips
    /// prerequisite checks, which clearing can never violate.
    pub fn invalidate_downstream_fields(
        &mut self,
        step: BookingStep,
        expected_version: Option<u64>,
    ) -> Result<(), StepError> {
        self.apply_patch(ContextPatch::clearing_from(step), false, expected_version)
    }

    fn check_version(&self, expected: Option<u64>) -> Result<(), StepError> {
        match expected {
            Some(expected) if expected != self.ctx.version => {
                tracing::warn!(
                    chat_id = %self.ctx.chat_id,
                    expected,
                    actual = self.ctx.version,
                    "rejected patch against stale context version"
                );
                Err(StepError::VersionConflict {
                    expected,
                    actual: self.ctx.version,
                })
            }
            _ => Ok(()),
        }
    }

    fn refresh_step(&mut self) {
        let from = self.ctx.next_booking_step;
        self.ctx.next_booking_step = self.ctx.derive_next_step();
        self.record_transition(from);
    }

    fn commit(&mut self, next: BookingContext) {
        let from = self.ctx.next_booking_step;
        *self.ctx = next;
        self.history
            .insert(self.ctx.version, Arc::new(self.ctx.clone()));
        self.record_transition(from);
    }

    fn record_transition(&mut self, from: Option<BookingStep>) {
        let to = self.ctx.next_booking_step;
        if from == to {
            return;
        }
        tracing::info!(
            chat_id = %self.ctx.chat_id,
            from = ?from,
            to = ?to,
            version = self.ctx.version,
            "booking step transition"
        );
        self.transitions.push(StepTransition {
            from,
            to,
            version: self.ctx.version,
        });
    }
}

fn check_prerequisites(written: &[ContextField], next: &BookingContext) -> Result<(), StepError> {
    for &field in written {
        let Some(step) = field.step() else {
            continue;
        };

        for &missing in step.prerequisites() {
            if missing != field && !next.has(missing) {
                return Err(StepError::MissingPrerequisite { field, missing });
            }
        }

        match field {
            ContextField::AppointmentTime => {
                if let Some(time) = next.appointment_time.as_deref() {
                    if !next.times().is_empty() && !next.is_time_offered(time) {
                        return Err(StepError::TimeNotOffered {
                            time: time.to_string(),
                        });
                    }
                }
            }
            ContextField::EmployeePmSi => {
                if let Some(token) = next.employee_pm_si.as_deref() {
                    if !next.offered().is_empty() && next.offered_employee(token).is_none() {
                        return Err(StepError::EmployeeNotOffered {
                            token: token.to_string(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OfferedEmployee, TimeSlot};

    fn employee(pm_si: &str, name: &str) -> OfferedEmployee {
        OfferedEmployee {
            pm_si: pm_si.into(),
            name: name.into(),
            display: name.into(),
        }
    }

    fn full_context() -> BookingContext {
        let mut ctx = BookingContext {
            chat_id: "chat-1".into(),
            selected_services_pm_si: Some(vec!["svc".into()]),
            selected_services_data: Some(vec![]),
            appointment_date: Some("2025-08-20".into()),
            available_times: Some(vec![TimeSlot::new("10:00"), TimeSlot::new("11:00")]),
            appointment_time: Some("10:00".into()),
            offered_employees: Some(vec![employee("E1", "Dr. Sami"), employee("E2", "Dr. Lina")]),
            checkout_summary: Some(serde_json::Map::new()),
            total_price: Some(100.0),
            employee_pm_si: Some("E1".into()),
            employee_name: Some("Dr. Sami".into()),
            booking_in_progress: true,
            version: 4,
            ..BookingContext::default()
        };
        ctx.next_booking_step = ctx.derive_next_step();
        ctx
    }

    fn set_time(time: &str) -> ContextPatch {
        ContextPatch {
            appointment_time: Some(Some(time.into())),
            ..ContextPatch::default()
        }
    }

    #[test]
    fn test_version_increments_per_commit() {
        let mut ctx = BookingContext::new("chat-1", "Asia/Hebron");
        let mut ctl = StepController::new(&mut ctx);
        ctl.apply_patch(
            ContextPatch {
                selected_services_pm_si: Some(Some(vec!["svc".into()])),
                ..ContextPatch::default()
            },
            true,
            Some(0),
        )
        .unwrap();
        ctl.apply_patch(
            ContextPatch {
                user_name: Some(Some("Sara".into())),
                ..ContextPatch::default()
            },
            true,
            Some(1),
        )
        .unwrap();
        assert_eq!(ctl.context().version, 2);
        assert_eq!(ctl.versions(), vec![0, 1, 2]);
        assert_eq!(ctl.context().next_booking_step, Some(BookingStep::SelectDate));
    }

    #[test]
    fn test_stale_version_never_mutates() {
        let mut ctx = full_context();
        let before = ctx.clone();
        let mut ctl = StepController::new(&mut ctx);
        let err = ctl.apply_patch(set_time("11:00"), true, Some(3)).unwrap_err();
        assert_eq!(
            err,
            StepError::VersionConflict {
                expected: 3,
                actual: 4
            }
        );
        drop(ctl);
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_invalidation_table_per_step() {
        // (patch, fields that must be emptied, fields that must survive)
        let cases: Vec<(ContextPatch, Vec<ContextField>, Vec<ContextField>)> = vec![
            (
                ContextPatch {
                    selected_services_pm_si: Some(Some(vec!["other".into()])),
                    ..ContextPatch::default()
                },
                vec![
                    ContextField::SelectedServicesData,
                    ContextField::AppointmentDate,
                    ContextField::AvailableTimes,
                    ContextField::AppointmentTime,
                    ContextField::OfferedEmployees,
                    ContextField::EmployeePmSi,
                ],
                vec![],
            ),
            (
                ContextPatch {
                    appointment_date: Some(Some("2025-08-21".into())),
                    ..ContextPatch::default()
                },
                vec![
                    ContextField::AvailableTimes,
                    ContextField::AppointmentTime,
                    ContextField::OfferedEmployees,
                    ContextField::CheckoutSummary,
                    ContextField::TotalPrice,
                    ContextField::EmployeePmSi,
                    ContextField::EmployeeName,
                ],
                vec![ContextField::SelectedServicesPmSi],
            ),
            (
                set_time("11:00"),
                vec![
                    ContextField::OfferedEmployees,
                    ContextField::CheckoutSummary,
                    ContextField::TotalPrice,
                    ContextField::EmployeePmSi,
                    ContextField::EmployeeName,
                ],
                vec![ContextField::AppointmentDate, ContextField::AvailableTimes],
            ),
            (
                ContextPatch {
                    employee_pm_si: Some(Some("E2".into())),
                    ..ContextPatch::default()
                },
                vec![ContextField::EmployeeName],
                vec![
                    ContextField::AppointmentTime,
                    ContextField::OfferedEmployees,
                    ContextField::TotalPrice,
                ],
            ),
        ];

        for (patch, cleared, kept) in cases {
            let mut ctx = full_context();
            let mut ctl = StepController::new(&mut ctx);
            ctl.apply_patch(patch.clone(), false, None).unwrap();
            let after = ctl.context();
            for field in cleared {
                assert!(!after.has(field), "{field} should be cleared by {patch:?}");
            }
            for field in kept {
                assert!(after.has(field), "{field} should survive {patch:?}");
            }
        }
    }

    #[test]
    fn test_noop_time_write_keeps_offers() {
        let mut ctx = full_context();
        let mut ctl = StepController::new(&mut ctx);
        ctl.apply_patch(set_time("10:00"), true, Some(4)).unwrap();
        let after = ctl.context();
        assert_eq!(after.version, 5);
        assert_eq!(after.offered().len(), 2);
        assert!(after.checkout_summary.is_some());
        assert_eq!(after.employee_pm_si.as_deref(), Some("E1"));
    }

    #[test]
    fn test_new_date_and_times_in_one_patch() {
        let mut ctx = full_context();
        let mut ctl = StepController::new(&mut ctx);
        ctl.apply_patch(
            ContextPatch {
                appointment_date: Some(Some("2025-08-22".into())),
                available_times: Some(Some(vec![TimeSlot::new("09:00")])),
                ..ContextPatch::default()
            },
            true,
            None,
        )
        .unwrap();
        let after = ctl.context();
        assert_eq!(after.times(), &[TimeSlot::new("09:00")]);
        assert_eq!(after.appointment_time, None);
        assert_eq!(after.next_booking_step, Some(BookingStep::SelectTime));
    }

    #[test]
    fn test_missing_prerequisite_is_atomic() {
        let mut ctx = BookingContext::new("chat-1", "Asia/Hebron");
        let before = ctx.clone();
        let mut ctl = StepController::new(&mut ctx);
        let err = ctl
            .apply_patch(
                ContextPatch {
                    user_name: Some(Some("Sara".into())),
                    appointment_date: Some(Some("2025-08-20".into())),
                    ..ContextPatch::default()
                },
                true,
                None,
            )
            .unwrap_err();
        assert_eq!(
            err,
            StepError::MissingPrerequisite {
                field: ContextField::AppointmentDate,
                missing: ContextField::SelectedServicesPmSi,
            }
        );
        assert!(err.is_validation());
        drop(ctl);
        assert_eq!(ctx, before);
    }

    #[test]
    fn test_time_must_be_offered() {
        let mut ctx = full_context();
        let mut ctl = StepController::new(&mut ctx);
        let err = ctl.apply_patch(set_time("13:00"), true, None).unwrap_err();
        assert_eq!(
            err,
            StepError::TimeNotOffered {
                time: "13:00".into()
            }
        );
        // without validation the write goes through and the step falls back
        ctl.apply_patch(set_time("13:00"), false, None).unwrap();
        assert_eq!(ctl.context().next_booking_step, Some(BookingStep::SelectTime));
    }

    #[test]
    fn test_employee_must_be_offered() {
        let mut ctx = full_context();
        let mut ctl = StepController::new(&mut ctx);
        let err = ctl
            .apply_patch(
                ContextPatch {
                    employee_pm_si: Some(Some("GHOST".into())),
                    ..ContextPatch::default()
                },
                true,
                None,
            )
            .unwrap_err();
        assert_eq!(
            err,
            StepError::EmployeeNotOffered {
                token: "GHOST".into()
            }
        );
    }

    #[test]
    fn test_empty_patch_only_refreshes() {
        let mut ctx = full_context();
        ctx.next_booking_step = Some(BookingStep::SelectService);
        let mut ctl = StepController::new(&mut ctx);
        ctl.apply_patch(ContextPatch::default(), true, Some(4)).unwrap();
        assert_eq!(ctl.context().version, 4);
        assert_eq!(ctl.context().next_booking_step, None);
        let transitions = ctl.take_transitions();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, Some(BookingStep::SelectService));
    }

    #[test]
    fn test_caller_step_is_ignored() {
        let mut ctx = BookingContext::new("chat-1", "Asia/Hebron");
        let mut ctl = StepController::new(&mut ctx);
        ctl.apply_patch(
            ContextPatch {
                next_booking_step: Some(Some(BookingStep::SelectEmployee)),
                ..ContextPatch::default()
            },
            true,
            None,
        )
        .unwrap();
        assert_eq!(ctl.context().next_booking_step, Some(BookingStep::SelectService));
        assert_eq!(ctl.context().version, 0);
    }

    #[test]
    fn test_invalidate_then_revert() {
        let mut ctx = full_context();
        let mut ctl = StepController::new(&mut ctx);
        ctl.invalidate_downstream_fields(BookingStep::SelectTime, Some(4))
            .unwrap();
        assert_eq!(ctl.context().version, 5);
        assert_eq!(ctl.context().appointment_time, None);
        assert_eq!(ctl.context().offered_employees, None);
        assert_eq!(ctl.context().next_booking_step, Some(BookingStep::SelectTime));

        ctl.revert_to(4).unwrap();
        assert_eq!(ctl.context().version, 4);
        assert_eq!(ctl.context().employee_pm_si.as_deref(), Some("E1"));
        assert_eq!(ctl.versions(), vec![4]);
        assert_eq!(ctl.revert_to(5), Err(StepError::UnknownVersion(5)));
    }

    #[test]
    fn test_revert_truncates_forward_history() {
        let mut ctx = BookingContext::new("chat-1", "Asia/Hebron");
        let mut ctl = StepController::new(&mut ctx);
        for name in ["a", "b", "c"] {
            ctl.apply_patch(
                ContextPatch {
                    user_name: Some(Some(name.into())),
                    ..ContextPatch::default()
                },
                true,
                None,
            )
            .unwrap();
        }
        ctl.revert_to(1).unwrap();
        assert_eq!(ctl.versions(), vec![0, 1]);
        assert_eq!(ctl.context().user_name.as_deref(), Some("a"));
        ctl.revert_to(0).unwrap();
        assert_eq!(ctl.context().user_name, None);
    }
}
