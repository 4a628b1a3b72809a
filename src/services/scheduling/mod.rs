pub mod clinic;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ApiError;
use crate::models::{Gender, OfferedEmployee, TimeSlot};

#[derive(Debug, Clone, PartialEq)]
pub struct TimesQuery {
    pub date: String,
    pub services: Vec<String>,
    pub section: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmployeesQuery {
    pub date: String,
    pub time: String,
    pub services: Vec<String>,
    pub section: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmployeeOffer {
    pub employees: Vec<OfferedEmployee>,
    pub checkout_summary: Option<Map<String, Value>>,
}

impl EmployeeOffer {
    /// `checkout_summary.price` as a number, when the API sent one.
    pub fn price(&self) -> Option<f64> {
        let price = self.checkout_summary.as_ref()?.get("price")?;
        match price {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// The person being booked, as the clinic needs them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CustomerInfo {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<Gender>,
    pub customer_pm_si: Option<String>,
    pub booked_by: Option<String>,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateBookingRequest {
    pub date: String,
    pub time: String,
    pub employee_pm_si: String,
    pub services: Vec<String>,
    pub section: String,
    pub customer: CustomerInfo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateOutcome {
    pub accepted: bool,
    pub message: Option<String>,
    pub data: Option<Value>,
}

/// The three calls the booking flow makes against the clinic's scheduler.
#[async_trait]
pub trait SchedulingApi: Send + Sync {
    async fn available_times(&self, query: &TimesQuery) -> Result<Vec<TimeSlot>, ApiError>;

    async fn available_employees(&self, query: &EmployeesQuery)
        -> Result<EmployeeOffer, ApiError>;

    async fn create_booking(
        &self,
        request: &CreateBookingRequest,
        idempotency_key: &str,
    ) -> Result<CreateOutcome, ApiError>;
}

/// Accept bare strings or `{time}` objects; drop blanks and anything else.
pub fn normalize_time_slots(data: &Value) -> Vec<TimeSlot> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("time").and_then(Value::as_str),
            _ => None,
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(TimeSlot::new)
        .collect()
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Map employee records onto `{pm_si, name, display}`. Records without a
/// token are dropped; a missing name falls back to the display label.
pub fn normalize_employees(data: &Value) -> Vec<OfferedEmployee> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let pm_si = first_text(obj, &["pm_si", "id", "token"])?;
            let name = first_text(obj, &["name", "display", "title"]).unwrap_or_else(|| pm_si.clone());
            let display = first_text(obj, &["display", "title"]).unwrap_or_else(|| name.clone());
            Some(OfferedEmployee {
                pm_si,
                name,
                display,
            })
        })
        .collect()
}
