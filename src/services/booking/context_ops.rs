use serde_json::{json, Value};

use super::create::{ambiguous_doctor, pick_employee, EmployeeMatch};
use super::{list_times, say, step_label, BookingTools};
use crate::errors::StepError;
use crate::models::{
    BookingContext, BookingContextUpdate, BookingStep, ContextField, ContextPatch, Language,
    ToolResult,
};
use crate::services::dates::{parse_date, parse_time, DateRejection};
use crate::services::step_controller::StepController;
use crate::services::text::{is_valid_name, normalize_phone};

const SUBJECT_FIELDS: [ContextField; 4] = [
    ContextField::SubjectName,
    ContextField::SubjectPhone,
    ContextField::SubjectGender,
    ContextField::SubjectRelation,
];

/// Commit `patch` onto a scratch copy of `ctx` with full validation.
fn simulate(ctx: &BookingContext, patch: &ContextPatch) -> Result<BookingContext, StepError> {
    let mut scratch = ctx.clone();
    StepController::new(&mut scratch).apply_patch(patch.clone(), true, None)?;
    Ok(scratch)
}

/// A patch carrying `to`'s value for each of `fields` that differs from `from`.
fn diff_patch(
    from: &BookingContext,
    to: &BookingContext,
    fields: impl IntoIterator<Item = ContextField>,
) -> ContextPatch {
    let mut patch = ContextPatch::default();
    for field in fields {
        let mut probe = ContextPatch::default();
        probe.capture(field, to);
        if !probe.changed_fields(from).is_empty() {
            patch.merge(probe);
        }
    }
    patch
}

fn field_value(ctx: &BookingContext, field: ContextField) -> Value {
    let mut probe = ContextPatch::default();
    probe.capture(field, ctx);
    serde_json::to_value(&probe)
        .ok()
        .and_then(|v| v.get(field.as_str()).cloned())
        .unwrap_or(Value::Null)
}

fn field_noun(field: ContextField, lang: Language) -> &'static str {
    match (field.step(), lang) {
        (Some(BookingStep::SelectService), Language::En) => "the service",
        (Some(BookingStep::SelectDate), Language::En) => "the date",
        (Some(BookingStep::SelectTime), Language::En) => "the time",
        (Some(BookingStep::SelectEmployee), Language::En) => "the doctor",
        (None, Language::En) => field.as_str(),
        (Some(BookingStep::SelectService), _) => "الخدمة",
        (Some(BookingStep::SelectDate), _) => "التاريخ",
        (Some(BookingStep::SelectTime), _) => "الوقت",
        (Some(BookingStep::SelectEmployee), _) => "الطبيب",
        (None, _) => field.as_str(),
    }
}

// Returns false when the number was unusable and has been dropped.
fn normalize_phone_slot(slot: &mut Option<Option<String>>) -> bool {
    let Some(Some(raw)) = slot.as_ref() else {
        return true;
    };
    match normalize_phone(raw) {
        Some(phone) => {
            *slot = Some(Some(phone));
            true
        }
        None => {
            *slot = None;
            false
        }
    }
}

fn validate_name_slot(slot: &mut Option<Option<String>>) -> bool {
    let Some(Some(raw)) = slot.as_ref() else {
        return true;
    };
    let trimmed = raw.trim().to_string();
    if is_valid_name(&trimmed) {
        *slot = Some(Some(trimmed));
        true
    } else {
        *slot = None;
        false
    }
}

impl BookingTools {
    pub fn reset_booking(&self, ctx: &BookingContext) -> ToolResult {
        let mut patch = ContextPatch::clearing_from(BookingStep::SelectService);
        for field in SUBJECT_FIELDS {
            patch.clear(field);
        }
        patch.booking_for_self = Some(true);
        patch.booking_in_progress = Some(false);

        tracing::info!(chat_id = %ctx.chat_id, "booking reset");
        ToolResult::with_patch(
            say(
                ctx.user_lang,
                "تم إلغاء الحجز الحالي. يمكننا البدء من جديد، ما الخدمة التي تريدها؟",
                "The current booking was cleared. Let's start again: which service would you like?",
            ),
            patch,
        )
    }

    /// Preview the invalidation on a scratch controller, roll the scratch
    /// back, and hand out the difference as the patch to commit.
    pub fn revert_to_step(&self, ctx: &BookingContext, step: &str) -> ToolResult {
        let lang = ctx.user_lang;
        let Some(step) = BookingStep::parse(step) else {
            return ToolResult::text(say(
                lang,
                "عذراً، لم أتعرف على هذه الخطوة.",
                "Sorry, I don't recognise that step.",
            ));
        };

        let mut scratch = ctx.clone();
        let base = scratch.version;
        let mut controller = StepController::new(&mut scratch);
        if let Err(e) = controller.invalidate_downstream_fields(step, Some(base)) {
            tracing::warn!(chat_id = %ctx.chat_id, error = %e, "revert preview failed");
            return ToolResult::text(say(
                lang,
                "عذراً، تعذر الرجوع إلى هذه الخطوة.",
                "Sorry, I couldn't go back to that step.",
            ));
        }
        let preview = controller.context().clone();
        if let Err(e) = controller.revert_to(base) {
            tracing::warn!(chat_id = %ctx.chat_id, error = %e, "revert preview rollback failed");
        }

        let patch = diff_patch(ctx, &preview, step.fields_from());
        let label = step_label(step, lang);
        if patch.is_empty() {
            return ToolResult::text(say(
                lang,
                &format!("نحن بالفعل في خطوة {label}."),
                &format!("We're already at {label}."),
            ));
        }

        // the step's primary field before and after the simulated revert
        let primary = step.primary_field();
        let mut previous = serde_json::Map::new();
        previous.insert(primary.as_str().to_string(), field_value(ctx, primary));
        let mut after = serde_json::Map::new();
        after.insert(primary.as_str().to_string(), field_value(&preview, primary));
        let private = json!({
            "cleared": patch.fields().iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            "previous": previous,
            "after": after,
            "next_booking_step": preview.next_booking_step,
        });
        ToolResult::with_patch(
            say(
                lang,
                &format!("حسناً، عدنا إلى خطوة {label}."),
                &format!("OK, we're back at {label}."),
            ),
            patch,
        )
        .private(private)
    }

    pub fn update_booking_context(&self, ctx: &BookingContext, updates: BookingContextUpdate) -> ToolResult {
        let mut updates = ContextPatch::from(updates);
        if updates.strip_derived() {
            tracing::debug!(chat_id = %ctx.chat_id, "dropping next_booking_step from update");
        }
        let lang = ctx.user_lang;
        let mut notes: Vec<String> = Vec::new();

        // services come in as free text or tokens
        updates.selected_services_data = None;
        match updates.selected_services_pm_si.take() {
            Some(Some(ids)) if !ids.is_empty() => {
                let preferred = updates.overlay(ctx).effective_gender();
                let resolution = self.catalog.resolve(&ids, Some(preferred));
                if !resolution.unresolved.is_empty() {
                    tracing::info!(chat_id = %ctx.chat_id, unresolved = ?resolution.unresolved, "unresolved service names");
                    let names = resolution.unresolved.join("، ");
                    notes.push(say(
                        lang,
                        &format!("لم أتعرف على الخدمة: {names}. اختر من قائمة الخدمات."),
                        &format!("I couldn't match the service: {names}. Please pick from the list."),
                    ));
                }
                if !resolution.tokens.is_empty() {
                    updates.selected_services_pm_si = Some(Some(resolution.tokens));
                    updates.selected_services_data = Some(Some(resolution.records));
                    updates.booking_in_progress = Some(true);
                }
            }
            Some(_) => {
                updates.clear(ContextField::SelectedServicesPmSi);
                updates.clear(ContextField::SelectedServicesData);
            }
            None => {}
        }

        if let Some(Some(raw)) = updates.appointment_date.take() {
            match parse_date(&raw, self.today()) {
                Ok(date) => updates.appointment_date = Some(Some(date.format("%Y-%m-%d").to_string())),
                Err(DateRejection::InPast(date)) => notes.push(say(
                    lang,
                    &format!("التاريخ {date} قد مضى، لم يتم حفظه."),
                    &format!("{date} has already passed, so it wasn't saved."),
                )),
                Err(DateRejection::Unrecognized) => notes.push(say(
                    lang,
                    &format!("لم أفهم التاريخ \"{raw}\"."),
                    &format!("I couldn't understand the date \"{raw}\"."),
                )),
            }
        } else if updates.appointment_date.is_some() {
            updates.clear(ContextField::AppointmentDate);
        }

        if let Some(Some(raw)) = updates.appointment_time.take() {
            match parse_time(&raw) {
                Some(time) => updates.appointment_time = Some(Some(time)),
                None => notes.push(say(
                    lang,
                    &format!("لم أفهم الوقت \"{raw}\"."),
                    &format!("I couldn't understand the time \"{raw}\"."),
                )),
            }
        } else if updates.appointment_time.is_some() {
            updates.clear(ContextField::AppointmentTime);
        }

        let phones_ok = [
            normalize_phone_slot(&mut updates.user_phone),
            normalize_phone_slot(&mut updates.subject_phone),
        ];
        if phones_ok.contains(&false) {
            notes.push(say(lang, "رقم الهاتف غير صالح.", "The phone number is not valid."));
        }
        let names_ok = [
            validate_name_slot(&mut updates.user_name),
            validate_name_slot(&mut updates.subject_name),
        ];
        if names_ok.contains(&false) {
            notes.push(say(
                lang,
                "الاسم غير صالح، يجب أن يحتوي على حروف فقط.",
                "The name is not valid; it should contain letters only.",
            ));
        }

        // doctors are matched against the offer after everything else lands
        let requested_token = updates.employee_pm_si.take();
        let requested_name = updates.employee_name.take();
        let requested_employee = requested_token
            .clone()
            .flatten()
            .or_else(|| requested_name.clone().flatten());
        if requested_employee.is_none()
            && (requested_token.is_some() || requested_name.is_some())
        {
            updates.clear(ContextField::EmployeePmSi);
            updates.clear(ContextField::EmployeeName);
        }

        let mut simulated = loop {
            match simulate(ctx, &updates) {
                Ok(sim) => break sim,
                Err(err) => {
                    let offending = match &err {
                        StepError::MissingPrerequisite { field, .. } => Some(*field),
                        StepError::TimeNotOffered { .. } => Some(ContextField::AppointmentTime),
                        StepError::EmployeeNotOffered { .. } => Some(ContextField::EmployeePmSi),
                        _ => None,
                    };
                    let Some(field) = offending.filter(|f| updates.contains(*f)) else {
                        tracing::warn!(chat_id = %ctx.chat_id, error = %err, "update rejected");
                        return ToolResult::text(say(
                            lang,
                            "عذراً، تعذر تحديث المعلومات.",
                            "Sorry, the details couldn't be updated.",
                        ));
                    };
                    notes.push(rejection_note(&err, &updates.overlay(ctx), lang));
                    updates.remove(field);
                }
            }
        };

        if let Some(wanted) = requested_employee {
            if simulated.appointment_time.is_none() {
                notes.push(say(
                    lang,
                    "اختر الوقت أولاً، ثم سأعرض الأطباء المتاحين.",
                    "Please pick a time first, then I'll list the available doctors.",
                ));
            } else if simulated.offered().is_empty() {
                notes.push(say(
                    lang,
                    "سأعرض الأطباء المتاحين لهذا الوقت أولاً، ثم يمكنك الاختيار.",
                    "I'll list the doctors available at that time first, then you can choose.",
                ));
            } else {
                let picked = match pick_employee(&simulated, Some(&wanted)) {
                    EmployeeMatch::Found(employee) => Ok(employee.clone()),
                    EmployeeMatch::Ambiguous(candidates) => Err(ambiguous_doctor(lang, &candidates)),
                    EmployeeMatch::NotFound => {
                        let names = simulated
                            .offered()
                            .iter()
                            .map(|e| e.name.as_str())
                            .collect::<Vec<_>>()
                            .join("، ");
                        Err(say(
                            lang,
                            &format!("لم أجد الطبيب \"{wanted}\". الأطباء المتاحون: {names}"),
                            &format!("I couldn't find \"{wanted}\". Available doctors: {names}"),
                        ))
                    }
                };
                match picked {
                    Ok(employee) => {
                        updates.employee_pm_si = Some(Some(employee.pm_si));
                        updates.employee_name = Some(Some(employee.name));
                        match simulate(ctx, &updates) {
                            Ok(sim) => simulated = sim,
                            Err(err) => {
                                notes.push(rejection_note(&err, &simulated, lang));
                                updates.remove(ContextField::EmployeePmSi);
                                updates.remove(ContextField::EmployeeName);
                            }
                        }
                    }
                    Err(note) => notes.push(note),
                }
            }
        } else if updates.contains(ContextField::EmployeePmSi) {
            if let Ok(sim) = simulate(ctx, &updates) {
                simulated = sim;
            }
        }

        if updates.is_empty() {
            if notes.is_empty() {
                return ToolResult::text(say(
                    lang,
                    "لم يتم تقديم أي تحديثات صالحة.",
                    "No valid updates were provided.",
                ));
            }
            return ToolResult::text(notes.join("\n"));
        }

        let changed = updates.changed_fields(ctx);
        if changed.is_empty() {
            notes.insert(0, say(lang, "المعلومات محدّثة مسبقاً.", "Those details are already up to date."));
            return ToolResult::text(notes.join("\n"));
        }

        // make the downstream invalidation explicit in the returned patch
        let folded = diff_patch(
            ctx,
            &simulated,
            ContextField::ALL
                .iter()
                .copied()
                .filter(|f| f.step().is_some() && !updates.contains(*f)),
        );
        updates.merge(folded);

        let mut lines = vec![say(
            lang,
            "تم تحديث المعلومات بنجاح.",
            "The details were updated.",
        )];
        let date_changed = changed.contains(&ContextField::AppointmentDate);
        if date_changed && (ctx.appointment_time.is_some() || ctx.employee_pm_si.is_some()) {
            lines.push(say(
                lang,
                "تم تحديث التاريخ، سنعيد اختيار الوقت والطبيب.",
                "The date changed, so we'll choose the time and doctor again.",
            ));
        }
        lines.extend(notes);

        let private = json!({
            "updated": changed.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            "next_booking_step": simulated.next_booking_step,
        });
        ToolResult::with_patch(lines.join("\n"), updates).private(private)
    }
}

fn rejection_note(err: &StepError, view: &BookingContext, lang: Language) -> String {
    match err {
        StepError::MissingPrerequisite { field, missing } => say(
            lang,
            &format!(
                "لا يمكن تحديد {} قبل تحديد {}.",
                field_noun(*field, lang),
                field_noun(*missing, lang)
            ),
            &format!(
                "I can't set {} before {} is chosen.",
                field_noun(*field, lang),
                field_noun(*missing, lang)
            ),
        ),
        StepError::TimeNotOffered { time } => say(
            lang,
            &format!("الوقت {time} غير متاح. الأوقات المتاحة: {}", list_times(view.times())),
            &format!("{time} isn't available. Open times: {}", list_times(view.times())),
        ),
        StepError::EmployeeNotOffered { .. } => say(
            lang,
            "الطبيب المختار غير متاح في هذا الوقت.",
            "That doctor isn't available at this time.",
        ),
        other => other.to_string(),
    }
}
