use serde_json::json;
use sha2::{Digest, Sha256};

use super::{list_times, say, BookingTools};
use crate::models::{
    BookingContext, BookingStep, ContextField, ContextPatch, Language, OfferedEmployee, ToolResult,
};
use crate::services::scheduling::{CreateBookingRequest, CustomerInfo, EmployeesQuery, TimesQuery};
use crate::services::text::normalize_arabic;

/// Stable key for one booking attempt. The same chat, slot, doctor and
/// service set always hash to the same key, whatever order the services
/// were picked in.
pub fn idempotency_key(
    chat_id: &str,
    date: &str,
    time: &str,
    employee_pm_si: &str,
    services: &[String],
) -> String {
    let mut svcs = services.to_vec();
    svcs.sort();
    let payload = json!({
        "chat": chat_id,
        "date": date,
        "emp": employee_pm_si,
        "svcs": svcs,
        "time": time,
    });
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome of matching a requested doctor against the offered list.
#[derive(Debug, PartialEq)]
pub(super) enum EmployeeMatch<'a> {
    Found(&'a OfferedEmployee),
    Ambiguous(Vec<&'a OfferedEmployee>),
    NotFound,
}

/// Match a requested doctor against the offered list by token, then by
/// name. A name must point at exactly one doctor; an exact name wins over
/// partial hits. Without a request, fall back to the stored pick or a lone
/// offer.
pub(super) fn pick_employee<'a>(ctx: &'a BookingContext, requested: Option<&str>) -> EmployeeMatch<'a> {
    let offered = ctx.offered();
    let Some(wanted) = requested.map(str::trim).filter(|r| !r.is_empty()) else {
        let stored = match ctx.employee_pm_si.as_deref() {
            Some(token) => ctx.offered_employee(token),
            None if offered.len() == 1 => offered.first(),
            None => None,
        };
        return stored.map_or(EmployeeMatch::NotFound, EmployeeMatch::Found);
    };

    if let Some(e) = offered.iter().find(|e| e.pm_si == wanted) {
        return EmployeeMatch::Found(e);
    }

    let needle = normalize_arabic(wanted);
    if !needle.chars().any(char::is_alphanumeric) {
        return EmployeeMatch::NotFound;
    }
    let hits: Vec<&OfferedEmployee> = offered
        .iter()
        .filter(|e| {
            let name = normalize_arabic(&e.name);
            let display = normalize_arabic(&e.display);
            name.contains(&needle)
                || display.contains(&needle)
                || (!name.is_empty() && needle.contains(&name))
        })
        .collect();

    match hits.len() {
        0 => EmployeeMatch::NotFound,
        1 => EmployeeMatch::Found(hits[0]),
        _ => match hits.iter().copied().find(|e| normalize_arabic(&e.name) == needle) {
            Some(exact) => EmployeeMatch::Found(exact),
            None => EmployeeMatch::Ambiguous(hits),
        },
    }
}

fn customer_info(ctx: &BookingContext) -> CustomerInfo {
    let subject = ctx.subject_info();
    let mut info = CustomerInfo {
        name: subject.name.map(str::to_string),
        phone: subject.phone.map(str::to_string),
        gender: Some(subject.gender.unwrap_or_else(|| ctx.effective_gender())),
        ..CustomerInfo::default()
    };
    if ctx.booking_for_self {
        info.customer_pm_si = ctx.customer_pm_si.clone();
    } else {
        info.booked_by = ctx.user_name.clone().or_else(|| ctx.user_phone.clone());
        info.relation = ctx.subject_relation.clone();
    }
    info
}

impl BookingTools {
    pub async fn create_booking(&self, ctx: &BookingContext, employee: Option<&str>) -> ToolResult {
        let lang = ctx.user_lang;

        if ctx.booking_confirmed {
            return ToolResult::text(say(
                lang,
                "تم تأكيد هذا الحجز مسبقاً.",
                "This booking is already confirmed.",
            ));
        }
        let ready = matches!(ctx.next_booking_step, Some(BookingStep::SelectEmployee) | None);
        let (Some(date), Some(time)) = (ctx.appointment_date.clone(), ctx.appointment_time.clone())
        else {
            return not_ready(lang);
        };
        if !ready || ctx.services().is_empty() {
            return not_ready(lang);
        }

        let target = match pick_employee(ctx, employee) {
            EmployeeMatch::Found(e) => e.clone(),
            EmployeeMatch::Ambiguous(candidates) => {
                return ToolResult::text(ambiguous_doctor(lang, &candidates));
            }
            EmployeeMatch::NotFound => {
                return ToolResult::text(say(
                    lang,
                    "رجاءً اختر الطبيب من الأسماء المعروضة قبل تأكيد الحجز.",
                    "Please choose a doctor from the listed names before confirming.",
                ));
            }
        };

        let customer = customer_info(ctx);
        if ctx.is_new_customer() || !ctx.booking_for_self {
            if let Some(prompt) = missing_identity(ctx, &customer) {
                return ToolResult::text(prompt);
            }
        }

        let section = self.section(ctx);
        let query = EmployeesQuery {
            date: date.clone(),
            time: time.clone(),
            services: ctx.services().to_vec(),
            section: section.clone(),
        };
        match self.api.available_employees(&query).await {
            Ok(offer) if offer.employees.iter().any(|e| e.pm_si == target.pm_si) => {}
            Ok(_) => {
                tracing::info!(chat_id = %ctx.chat_id, %date, %time, "slot taken before booking");
                return self.recover_slot_conflict(ctx, &date, &time).await;
            }
            Err(e) => {
                tracing::warn!(chat_id = %ctx.chat_id, error = %e, "pre-booking check failed");
                return self.recover_slot_conflict(ctx, &date, &time).await;
            }
        }

        let key = idempotency_key(&ctx.chat_id, &date, &time, &target.pm_si, ctx.services());
        let request = CreateBookingRequest {
            date: date.clone(),
            time: time.clone(),
            employee_pm_si: target.pm_si.clone(),
            services: ctx.services().to_vec(),
            section,
            customer,
        };
        match self.api.create_booking(&request, &key).await {
            Ok(outcome) if outcome.accepted => {}
            Ok(outcome) => {
                tracing::info!(
                    chat_id = %ctx.chat_id,
                    message = outcome.message.as_deref().unwrap_or(""),
                    "booking rejected by clinic"
                );
                return self.recover_slot_conflict(ctx, &date, &time).await;
            }
            Err(e) => {
                tracing::warn!(chat_id = %ctx.chat_id, error = %e, "booking request failed");
                return self.recover_slot_conflict(ctx, &date, &time).await;
            }
        }

        tracing::info!(chat_id = %ctx.chat_id, %date, %time, employee = %target.pm_si, "booking confirmed");

        let mut patch = ContextPatch {
            booking_confirmed: Some(true),
            booking_in_progress: Some(false),
            ..ContextPatch::default()
        };
        if ctx.employee_pm_si.as_deref() != Some(target.pm_si.as_str()) {
            patch.employee_pm_si = Some(Some(target.pm_si.clone()));
            patch.employee_name = Some(Some(target.name.clone()));
        }

        let titles = ctx
            .services()
            .iter()
            .filter_map(|t| self.catalog.find(t))
            .map(|s| match lang {
                Language::En => s.title_en.as_str(),
                _ => s.title.as_str(),
            })
            .collect::<Vec<_>>();
        let text = match (lang, ctx.booking_for_self) {
            (Language::En, true) => format!(
                "✅ Your booking for {} on {date} at {time} with {} is confirmed. Welcome!",
                titles.join(", "),
                target.name
            ),
            (Language::En, false) => format!(
                "✅ The booking for {} ({}) on {date} at {time} with {} is confirmed. Welcome!",
                ctx.subject_name.as_deref().unwrap_or_default(),
                titles.join(", "),
                target.name
            ),
            (_, true) => format!(
                "✅ تم تأكيد حجزك لـ{} يوم {date} الساعة {time} مع {}. أهلاً وسهلاً!",
                titles.join(" و"),
                target.name
            ),
            (_, false) => format!(
                "✅ تم تأكيد حجز {} لـ{} يوم {date} الساعة {time} مع {}. أهلاً وسهلاً!",
                ctx.subject_name.as_deref().unwrap_or_default(),
                titles.join(" و"),
                target.name
            ),
        };
        ToolResult::with_patch(text, patch).private(json!({"idempotency_key": key}))
    }

    /// The chosen slot was lost between listing and booking. Drop the time
    /// and doctor, refresh the day's times, and offer the rest.
    async fn recover_slot_conflict(&self, ctx: &BookingContext, date: &str, lost: &str) -> ToolResult {
        let lang = ctx.user_lang;
        let query = TimesQuery {
            date: date.to_string(),
            services: ctx.services().to_vec(),
            section: self.section(ctx),
        };
        let fresh = match self.api.available_times(&query).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(chat_id = %ctx.chat_id, error = %e, "time refresh failed");
                ctx.times().to_vec()
            }
        };
        let fresh: Vec<_> = fresh.into_iter().filter(|s| s.time != lost).collect();

        let mut patch = ContextPatch::clearing([
            ContextField::AppointmentTime,
            ContextField::OfferedEmployees,
            ContextField::CheckoutSummary,
            ContextField::TotalPrice,
            ContextField::EmployeePmSi,
            ContextField::EmployeeName,
        ]);

        if fresh.is_empty() {
            patch.available_times = Some(None);
            return ToolResult::with_patch(
                say(
                    lang,
                    &format!("عذراً، لم يعد الوقت المختار متاحاً ولا توجد أوقات أخرى في {date}. اختر تاريخاً آخر."),
                    &format!("Sorry, that time is no longer available and {date} has no other openings. Please pick another date."),
                ),
                patch,
            );
        }

        let text = say(
            lang,
            &format!("عذراً، لم يعد الوقت المختار متاحاً. الأوقات المتاحة الأخرى: {}", list_times(&fresh)),
            &format!("Sorry, that time is no longer available. Other open times: {}", list_times(&fresh)),
        );
        patch.available_times = Some(Some(fresh));
        ToolResult::with_patch(text, patch)
    }
}

fn not_ready(lang: Language) -> ToolResult {
    ToolResult::text(say(
        lang,
        "عذراً، يجب اختيار الخدمة والتاريخ والوقت قبل تأكيد الحجز.",
        "Please pick a service, date and time before confirming.",
    ))
}

pub(super) fn ambiguous_doctor(lang: Language, candidates: &[&OfferedEmployee]) -> String {
    let names = candidates
        .iter()
        .map(|e| e.name.as_str())
        .collect::<Vec<_>>()
        .join("، ");
    say(
        lang,
        &format!("يوجد أكثر من طبيب بهذا الاسم: {names}. أي طبيب تقصد؟"),
        &format!("More than one doctor matches: {names}. Which one do you mean?"),
    )
}

fn missing_identity(ctx: &BookingContext, customer: &CustomerInfo) -> Option<String> {
    let lang = ctx.user_lang;
    let for_other = !ctx.booking_for_self;
    if customer.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
        return Some(say(
            lang,
            if for_other {
                "ما هو الاسم الكامل للشخص الذي تحجز له؟"
            } else {
                "لإتمام الحجز، ما هو اسمك الكامل؟"
            },
            if for_other {
                "What is the full name of the person you are booking for?"
            } else {
                "To finish the booking, what is your full name?"
            },
        ));
    }
    if customer.phone.as_deref().map_or(true, |p| p.trim().is_empty()) {
        return Some(say(
            lang,
            if for_other {
                "ما هو رقم هاتف الشخص الذي تحجز له؟"
            } else {
                "لإتمام الحجز، ما هو رقم هاتفك؟"
            },
            if for_other {
                "What is the phone number of the person you are booking for?"
            } else {
                "To finish the booking, what is your phone number?"
            },
        ));
    }
    if for_other && ctx.subject_gender.is_none() {
        return Some(say(
            lang,
            "هل الحجز لذكر أم لأنثى؟",
            "Is the booking for a male or a female patient?",
        ));
    }
    None
}
