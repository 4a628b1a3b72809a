use std::fmt;

use serde::{Deserialize, Serialize};

use super::{OfferedEmployee, ServiceRecord, TimeSlot};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ar,
    En,
    #[default]
    Unknown,
}

impl Language {
    pub fn detect(text: &str) -> Self {
        if text.chars().any(|c| ('\u{0600}'..='\u{06FF}').contains(&c)) {
            Language::Ar
        } else if text.chars().any(|c| c.is_ascii_alphabetic()) {
            Language::En
        } else {
            Language::Unknown
        }
    }

    /// Pick the Arabic or English variant of a message. Arabic is the
    /// clinic's default, so `Unknown` speaks Arabic.
    pub fn pick<'a>(self, ar: &'a str, en: &'a str) -> &'a str {
        match self {
            Language::En => en,
            _ => ar,
        }
    }
}

/// Which gender-scoped catalog (clinic section) a booking belongs to.
/// Unrecognized input falls back to `Male`, the clinic's default section.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "female" | "women" | "woman" | "f" | "أنثى" | "انثى" | "نساء" | "نسائي" => {
                Gender::Female
            }
            _ => Gender::Male,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }
}

impl From<String> for Gender {
    fn from(s: String) -> Self {
        Gender::parse(&s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CustomerType {
    New,
    Existing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BookingStep {
    SelectService,
    SelectDate,
    SelectTime,
    SelectEmployee,
}

impl BookingStep {
    pub const ORDER: [BookingStep; 4] = [
        BookingStep::SelectService,
        BookingStep::SelectDate,
        BookingStep::SelectTime,
        BookingStep::SelectEmployee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStep::SelectService => "select_service",
            BookingStep::SelectDate => "select_date",
            BookingStep::SelectTime => "select_time",
            BookingStep::SelectEmployee => "select_employee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "select_service" | "service" => Some(BookingStep::SelectService),
            "select_date" | "date" => Some(BookingStep::SelectDate),
            "select_time" | "time" => Some(BookingStep::SelectTime),
            "select_employee" | "employee" | "doctor" => Some(BookingStep::SelectEmployee),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for BookingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name, phone and gender of the person who will be seen.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInfo<'a> {
    pub name: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub gender: Option<Gender>,
}

/// Per-conversation booking state. Mutated only through
/// [`StepController`](crate::services::step_controller::StepController).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BookingContext {
    pub chat_id: String,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub user_lang: Language,
    pub tz: String,
    pub gender: Option<Gender>,

    pub booking_for_self: bool,
    pub subject_name: Option<String>,
    pub subject_phone: Option<String>,
    pub subject_gender: Option<Gender>,
    pub subject_relation: Option<String>,

    pub patient_data: Option<serde_json::Value>,
    pub customer_pm_si: Option<String>,
    pub customer_type: Option<CustomerType>,

    pub selected_services_pm_si: Option<Vec<String>>,
    pub selected_services_data: Option<Vec<ServiceRecord>>,
    pub appointment_date: Option<String>,
    pub available_times: Option<Vec<TimeSlot>>,
    pub appointment_time: Option<String>,
    pub offered_employees: Option<Vec<OfferedEmployee>>,
    pub employee_pm_si: Option<String>,
    pub employee_name: Option<String>,
    pub checkout_summary: Option<serde_json::Map<String, serde_json::Value>>,
    pub total_price: Option<f64>,

    pub booking_confirmed: bool,
    pub booking_in_progress: bool,

    pub next_booking_step: Option<BookingStep>,
    pub version: u64,
}

impl Default for BookingContext {
    fn default() -> Self {
        Self {
            chat_id: String::new(),
            user_name: None,
            user_phone: None,
            user_lang: Language::Unknown,
            tz: "Asia/Hebron".to_string(),
            gender: None,
            booking_for_self: true,
            subject_name: None,
            subject_phone: None,
            subject_gender: None,
            subject_relation: None,
            patient_data: None,
            customer_pm_si: None,
            customer_type: None,
            selected_services_pm_si: None,
            selected_services_data: None,
            appointment_date: None,
            available_times: None,
            appointment_time: None,
            offered_employees: None,
            employee_pm_si: None,
            employee_name: None,
            checkout_summary: None,
            total_price: None,
            booking_confirmed: false,
            booking_in_progress: false,
            next_booking_step: None,
            version: 0,
        }
    }
}

impl BookingContext {
    pub fn new(chat_id: &str, tz: &str) -> Self {
        let mut ctx = Self {
            chat_id: chat_id.to_string(),
            tz: tz.to_string(),
            ..Self::default()
        };
        ctx.next_booking_step = ctx.derive_next_step();
        ctx
    }

    /// Gender that drives the catalog and the section token.
    pub fn effective_gender(&self) -> Gender {
        self.subject_gender.or(self.gender).unwrap_or_default()
    }

    pub fn subject_info(&self) -> SubjectInfo<'_> {
        if self.booking_for_self {
            SubjectInfo {
                name: self.user_name.as_deref(),
                phone: self.user_phone.as_deref(),
                gender: self.subject_gender.or(self.gender),
            }
        } else {
            SubjectInfo {
                name: self.subject_name.as_deref(),
                phone: self.subject_phone.as_deref(),
                gender: self.subject_gender,
            }
        }
    }

    pub fn is_new_customer(&self) -> bool {
        self.customer_type != Some(CustomerType::Existing)
            && self.customer_pm_si.is_none()
            && self.patient_data.is_none()
    }

    pub fn services(&self) -> &[String] {
        self.selected_services_pm_si.as_deref().unwrap_or_default()
    }

    pub fn times(&self) -> &[TimeSlot] {
        self.available_times.as_deref().unwrap_or_default()
    }

    pub fn offered(&self) -> &[OfferedEmployee] {
        self.offered_employees.as_deref().unwrap_or_default()
    }

    pub fn is_time_offered(&self, time: &str) -> bool {
        self.times().iter().any(|slot| slot.time == time)
    }

    pub fn offered_employee(&self, token: &str) -> Option<&OfferedEmployee> {
        self.offered().iter().find(|e| e.pm_si == token)
    }

    /// The step the flow is waiting on, computed purely from the fields.
    pub fn derive_next_step(&self) -> Option<BookingStep> {
        if self.services().is_empty() {
            return Some(BookingStep::SelectService);
        }
        if self.appointment_date.is_none() || self.times().is_empty() {
            return Some(BookingStep::SelectDate);
        }
        match self.appointment_time.as_deref() {
            Some(time) if self.is_time_offered(time) => {}
            _ => return Some(BookingStep::SelectTime),
        }
        if self.employee_pm_si.is_none() {
            return Some(BookingStep::SelectEmployee);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(times: &[&str]) -> Option<Vec<TimeSlot>> {
        Some(times.iter().map(|t| TimeSlot::new(t)).collect())
    }

    #[test]
    fn test_gender_fallback() {
        assert_eq!(Gender::parse("أنثى"), Gender::Female);
        assert_eq!(Gender::parse("Women"), Gender::Female);
        assert_eq!(Gender::parse("رجال"), Gender::Male);
        assert_eq!(Gender::parse("something else"), Gender::Male);
        let g: Gender = serde_json::from_str("\"نساء\"").unwrap();
        assert_eq!(g, Gender::Female);
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"female\"");
    }

    #[test]
    fn test_language_detect() {
        assert_eq!(Language::detect("مرحبا"), Language::Ar);
        assert_eq!(Language::detect("hello"), Language::En);
        assert_eq!(Language::detect("123"), Language::Unknown);
    }

    #[test]
    fn test_derive_next_step_progression() {
        let mut ctx = BookingContext::new("chat", "Asia/Hebron");
        assert_eq!(ctx.derive_next_step(), Some(BookingStep::SelectService));

        ctx.selected_services_pm_si = Some(vec!["svc".into()]);
        assert_eq!(ctx.derive_next_step(), Some(BookingStep::SelectDate));

        // a date without fetched times is still the date step
        ctx.appointment_date = Some("2025-08-20".into());
        assert_eq!(ctx.derive_next_step(), Some(BookingStep::SelectDate));

        ctx.available_times = slots(&["10:00", "10:30"]);
        assert_eq!(ctx.derive_next_step(), Some(BookingStep::SelectTime));

        ctx.appointment_time = Some("10:00".into());
        assert_eq!(ctx.derive_next_step(), Some(BookingStep::SelectEmployee));

        ctx.employee_pm_si = Some("emp".into());
        assert_eq!(ctx.derive_next_step(), None);
    }

    #[test]
    fn test_derive_next_step_time_not_offered() {
        let ctx = BookingContext {
            selected_services_pm_si: Some(vec!["svc".into()]),
            appointment_date: Some("2025-08-20".into()),
            available_times: slots(&["10:00"]),
            appointment_time: Some("11:00".into()),
            employee_pm_si: Some("emp".into()),
            ..BookingContext::default()
        };
        assert_eq!(ctx.derive_next_step(), Some(BookingStep::SelectTime));
    }

    #[test]
    fn test_subject_info_for_other_person() {
        let ctx = BookingContext {
            user_name: Some("Owner".into()),
            user_phone: Some("0599000000".into()),
            gender: Some(Gender::Male),
            booking_for_self: false,
            subject_name: Some("Wife".into()),
            subject_phone: Some("0591111111".into()),
            subject_gender: Some(Gender::Female),
            ..BookingContext::default()
        };
        let info = ctx.subject_info();
        assert_eq!(info.name, Some("Wife"));
        assert_eq!(info.gender, Some(Gender::Female));
        assert_eq!(ctx.effective_gender(), Gender::Female);
    }

    #[test]
    fn test_context_serializes_enums_as_strings() {
        let mut ctx = BookingContext::new("chat-1", "Asia/Hebron");
        ctx.user_lang = Language::Ar;
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["next_booking_step"], "select_service");
        assert_eq!(json["user_lang"], "ar");

        let back: BookingContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }
}
