//! Booking operations exposed to the agent runtime.
//!
//! Every handler reads the current context and returns a [`ToolResult`];
//! none of them writes to the context. The turn runner commits the returned
//! patch through the step controller.

mod availability;
mod context_ops;
mod create;

use std::sync::Arc;

use chrono::NaiveDate;

pub use create::idempotency_key;

use crate::models::{BookingContext, BookingStep, Language, TimeSlot, ToolCall, ToolResult};
use crate::services::catalog::ServiceCatalog;
use crate::services::dates::clinic_today;
use crate::services::scheduling::SchedulingApi;

/// How many alternative times a message lists at most.
const MAX_LISTED_TIMES: usize = 12;

pub struct BookingTools {
    api: Arc<dyn SchedulingApi>,
    catalog: Arc<ServiceCatalog>,
    currency: String,
    utc_offset_minutes: i32,
    fixed_today: Option<NaiveDate>,
}

impl BookingTools {
    pub fn new(
        api: Arc<dyn SchedulingApi>,
        catalog: Arc<ServiceCatalog>,
        currency: String,
        utc_offset_minutes: i32,
    ) -> Self {
        Self {
            api,
            catalog,
            currency,
            utc_offset_minutes,
            fixed_today: None,
        }
    }

    /// Pin "today" for date parsing.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.fixed_today = Some(today);
        self
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| clinic_today(self.utc_offset_minutes))
    }

    fn section(&self, ctx: &BookingContext) -> String {
        self.catalog.section_token(ctx.effective_gender()).to_string()
    }

    pub async fn dispatch(&self, ctx: &BookingContext, call: ToolCall) -> ToolResult {
        match call {
            ToolCall::SuggestServices => self.suggest_services(ctx),
            ToolCall::CheckAvailability { date } => self.check_availability(ctx, &date).await,
            ToolCall::SuggestEmployees { time } => self.suggest_employees(ctx, &time).await,
            ToolCall::CreateBooking { employee_pm_si } => {
                self.create_booking(ctx, employee_pm_si.as_deref()).await
            }
            ToolCall::ResetBooking => self.reset_booking(ctx),
            ToolCall::RevertToStep { step } => self.revert_to_step(ctx, &step),
            ToolCall::UpdateBookingContext { updates } => self.update_booking_context(ctx, updates),
        }
    }
}

fn say(lang: Language, ar: &str, en: &str) -> String {
    lang.pick(ar, en).to_string()
}

fn list_times<'a>(slots: impl IntoIterator<Item = &'a TimeSlot>) -> String {
    slots
        .into_iter()
        .take(MAX_LISTED_TIMES)
        .map(|s| s.time.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn step_label(step: BookingStep, lang: Language) -> &'static str {
    match (step, lang) {
        (BookingStep::SelectService, Language::En) => "choosing the service",
        (BookingStep::SelectDate, Language::En) => "choosing the date",
        (BookingStep::SelectTime, Language::En) => "choosing the time",
        (BookingStep::SelectEmployee, Language::En) => "choosing the doctor",
        (BookingStep::SelectService, _) => "اختيار الخدمة",
        (BookingStep::SelectDate, _) => "اختيار التاريخ",
        (BookingStep::SelectTime, _) => "اختيار الوقت",
        (BookingStep::SelectEmployee, _) => "اختيار الطبيب",
    }
}
