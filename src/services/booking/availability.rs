use serde_json::json;

use super::{list_times, say, BookingTools};
use crate::models::{BookingContext, BookingStep, ContextPatch, Language, ToolResult};
use crate::services::catalog::{currency_symbol, format_service_list};
use crate::services::dates::{parse_date, parse_time, DateRejection};
use crate::services::scheduling::{EmployeesQuery, TimesQuery};

impl BookingTools {
    pub fn suggest_services(&self, ctx: &BookingContext) -> ToolResult {
        let lang = ctx.user_lang;
        let services = self.catalog.services_for(ctx.effective_gender());
        if services.is_empty() {
            return ToolResult::text(say(
                lang,
                "عذراً، لا توجد خدمات متاحة لهذا القسم حالياً.",
                "Sorry, there are no services available for this section right now.",
            ));
        }

        let list = format_service_list(services, &self.currency);
        let private = json!(services
            .iter()
            .map(|s| json!({"pm_si": s.pm_si, "title": s.title, "title_en": s.title_en}))
            .collect::<Vec<_>>());

        // once a service is chosen the listing is read-only
        if !ctx.services().is_empty() {
            let header = say(
                lang,
                "هذه قائمة بالخدمات المتاحة:",
                "Here is the list of available services:",
            );
            return ToolResult::text(format!("{header}\n{list}")).private(private);
        }

        let patch = ContextPatch {
            selected_services_data: Some(Some(services.to_vec())),
            booking_in_progress: Some(true),
            ..ContextPatch::default()
        };
        ToolResult::with_patch(list, patch).private(private)
    }

    pub async fn check_availability(&self, ctx: &BookingContext, date: &str) -> ToolResult {
        let lang = ctx.user_lang;
        let step = ctx.next_booking_step;

        if ctx.services().is_empty() {
            return ToolResult::text(say(
                lang,
                "عذراً، يجب اختيار الخدمات أولاً.",
                "Please choose a service first.",
            ));
        }
        // a chosen but unconfirmed doctor (step None) may still move the date
        let eligible = match step {
            Some(BookingStep::SelectService) => false,
            Some(_) => true,
            None => !ctx.booking_confirmed,
        };
        if !eligible {
            return ToolResult::text(say(
                lang,
                "عذراً، لا يمكن فحص المواعيد في هذه المرحلة.",
                "Sorry, availability can't be checked at this stage.",
            ));
        }

        let gender = ctx.effective_gender();
        if ctx.services().iter().any(|t| self.catalog.find(t).is_none()) {
            return ToolResult::text(say(
                lang,
                "عذراً، بعض الخدمات المختارة غير معروفة. الرجاء اختيار الخدمة من القائمة.",
                "Sorry, some selected services are unknown. Please pick from the list.",
            ));
        }
        if ctx.services().iter().any(|t| !self.catalog.belongs_to(t, gender)) {
            return ToolResult::text(say(
                lang,
                "عذراً، الخدمة المختارة غير متاحة لهذا القسم.",
                "Sorry, the selected service isn't offered in this section.",
            ));
        }

        if date.trim().is_empty() {
            return ToolResult::text(say(
                lang,
                "عذراً، يجب تحديد التاريخ أولاً.",
                "Please tell me the date first.",
            ));
        }

        let parsed = match parse_date(date, self.today()) {
            Ok(d) => d.format("%Y-%m-%d").to_string(),
            Err(DateRejection::InPast(d)) => {
                let d = d.format("%Y-%m-%d");
                return ToolResult::text(say(
                    lang,
                    &format!("عذراً، التاريخ {d} قد مضى. اختر تاريخاً قادماً."),
                    &format!("Sorry, {d} has already passed. Please choose an upcoming date."),
                ));
            }
            Err(DateRejection::Unrecognized) => {
                return ToolResult::text(say(
                    lang,
                    "لو سمحت، أعطني تاريخاً محدداً (مثل 2025-08-21) أو يوم أسبوع واضح (مثل الاثنين القادم) لنكمل الحجز.",
                    "Please give me a specific date (like 2025-08-21) or a weekday (like next Monday) so we can continue.",
                ));
            }
        };

        let query = TimesQuery {
            date: parsed.clone(),
            services: ctx.services().to_vec(),
            section: self.section(ctx),
        };
        let slots = match self.api.available_times(&query).await {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(chat_id = %ctx.chat_id, error = %e, "availability lookup failed");
                return ToolResult::text(say(
                    lang,
                    "عذراً، تعذر فحص الأوقات المتاحة حالياً. حاول مرة أخرى بعد قليل.",
                    "Sorry, I couldn't check availability right now. Please try again shortly.",
                ));
            }
        };

        // re-checking from a later step means the user is changing the date
        let mut patch = match step {
            Some(BookingStep::SelectTime | BookingStep::SelectEmployee) | None => {
                ContextPatch::clearing_from(BookingStep::SelectTime)
            }
            _ => ContextPatch::default(),
        };

        if slots.is_empty() {
            patch.available_times = Some(None);
            return ToolResult::with_patch(
                say(
                    lang,
                    &format!("عذراً، لا توجد أوقات متاحة في تاريخ {parsed}. يمكنك اختيار تاريخ آخر."),
                    &format!("Sorry, there are no open times on {parsed}. You can pick another date."),
                ),
                patch,
            );
        }

        let text = say(
            lang,
            &format!("الأوقات المتاحة يوم {parsed}: {}", list_times(&slots)),
            &format!("Available times on {parsed}: {}", list_times(&slots)),
        );
        let private = json!({"date": parsed, "available_times": slots});
        patch.appointment_date = Some(Some(parsed));
        patch.available_times = Some(Some(slots));
        ToolResult::with_patch(text, patch).private(private)
    }

    pub async fn suggest_employees(&self, ctx: &BookingContext, time: &str) -> ToolResult {
        let lang = ctx.user_lang;

        if ctx.services().is_empty() {
            return ToolResult::text(say(
                lang,
                "عذراً، يجب اختيار الخدمات أولاً.",
                "Please choose a service first.",
            ));
        }
        let Some(date) = ctx.appointment_date.clone() else {
            return ToolResult::text(say(
                lang,
                "عذراً، يجب تحديد التاريخ أولاً.",
                "Please tell me the date first.",
            ));
        };
        let eligible = match ctx.next_booking_step {
            Some(BookingStep::SelectTime | BookingStep::SelectEmployee) => true,
            None => !ctx.booking_confirmed,
            _ => false,
        };
        if !eligible {
            return ToolResult::text(say(
                lang,
                "عذراً، لا يمكن عرض الأطباء في هذه المرحلة.",
                "Sorry, doctors can't be listed at this stage.",
            ));
        }
        if time.trim().is_empty() {
            return ToolResult::text(say(
                lang,
                "عذراً، يجب تحديد الوقت أولاً.",
                "Please tell me the time first.",
            ));
        }

        let wanted = parse_time(time).unwrap_or_else(|| time.trim().to_string());
        let chosen = match ctx
            .times()
            .iter()
            .find(|slot| slot.time == wanted || slot.time.starts_with(&wanted))
        {
            Some(slot) => slot.time.clone(),
            None if ctx.times().is_empty() => wanted,
            None => {
                return ToolResult::text(say(
                    lang,
                    &format!(
                        "عذراً، الوقت {wanted} غير متاح. الأوقات المتاحة: {}",
                        list_times(ctx.times())
                    ),
                    &format!(
                        "Sorry, {wanted} isn't available. Open times: {}",
                        list_times(ctx.times())
                    ),
                ));
            }
        };

        let query = EmployeesQuery {
            date: date.clone(),
            time: chosen.clone(),
            services: ctx.services().to_vec(),
            section: self.section(ctx),
        };
        let offer = match self.api.available_employees(&query).await {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!(chat_id = %ctx.chat_id, error = %e, "employee lookup failed");
                return ToolResult::text(say(
                    lang,
                    "عذراً، تعذر جلب الأطباء المتاحين حالياً. حاول مرة أخرى بعد قليل.",
                    "Sorry, I couldn't load the available doctors right now. Please try again shortly.",
                ));
            }
        };

        if offer.employees.is_empty() {
            let others = list_times(ctx.times().iter().filter(|s| s.time != chosen));
            let (ar, en) = if others.is_empty() {
                (
                    format!("عذراً، لا يوجد أطباء متاحون في {date} الساعة {chosen}. جرّب تاريخاً آخر."),
                    format!("Sorry, no doctors are available on {date} at {chosen}. Try another date."),
                )
            } else {
                (
                    format!("عذراً، لا يوجد أطباء متاحون في {date} الساعة {chosen}. الأوقات الأخرى المتاحة: {others}"),
                    format!("Sorry, no doctors are available on {date} at {chosen}. Other open times: {others}"),
                )
            };
            return ToolResult::text(say(lang, &ar, &en));
        }

        let price = offer
            .price()
            .unwrap_or_else(|| self.catalog.total_price(ctx.services()));

        let mut patch = ContextPatch {
            offered_employees: Some(Some(offer.employees.clone())),
            checkout_summary: Some(offer.checkout_summary.clone()),
            total_price: Some(Some(price)),
            ..ContextPatch::default()
        };
        if ctx.appointment_time.as_deref() != Some(chosen.as_str()) {
            patch.appointment_time = Some(Some(chosen.clone()));
        }
        // keep a prior pick that is still on offer
        if let Some(kept) = ctx
            .employee_pm_si
            .as_deref()
            .and_then(|token| offer.employees.iter().find(|e| e.pm_si == token))
        {
            patch.employee_pm_si = Some(Some(kept.pm_si.clone()));
            patch.employee_name = Some(Some(kept.name.clone()));
        }

        let names = offer
            .employees
            .iter()
            .map(|e| format!("• {}", e.display))
            .collect::<Vec<_>>()
            .join("\n");
        let symbol = currency_symbol(&self.currency);
        let text = match lang {
            Language::En => format!(
                "Doctors available on {date} at {chosen}:\n{names}\nTotal price: {price:.2} {symbol}"
            ),
            _ => format!(
                "الأطباء المتاحون يوم {date} الساعة {chosen}:\n{names}\nالسعر الإجمالي: {price:.2} {symbol}"
            ),
        };
        let private = json!({
            "employees": offer.employees,
            "checkout": offer.checkout_summary,
        });
        ToolResult::with_patch(text, patch).private(private)
    }
}
