use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{BookingContextUpdate, ContextPatch};
use crate::errors::AppError;

/// A booking operation requested by the agent runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    SuggestServices,
    CheckAvailability { date: String },
    SuggestEmployees { time: String },
    CreateBooking { employee_pm_si: Option<String> },
    ResetBooking,
    RevertToStep { step: String },
    UpdateBookingContext { updates: BookingContextUpdate },
}

#[derive(Deserialize)]
struct DateArgs {
    date: String,
}

#[derive(Deserialize)]
struct TimeArgs {
    time: String,
}

#[derive(Deserialize, Default)]
struct CreateArgs {
    #[serde(default, alias = "employee_token", alias = "employee")]
    employee_pm_si: Option<String>,
}

#[derive(Deserialize)]
struct StepArgs {
    step: String,
}

#[derive(Deserialize)]
struct UpdateArgs {
    updates: BookingContextUpdate,
}

impl ToolCall {
    /// Build a call from the wire form `{tool, args}`. Argument-less tools
    /// ignore whatever `args` holds.
    pub fn parse(tool: &str, args: Value) -> Result<Self, AppError> {
        let call = match tool {
            "suggest_services" => ToolCall::SuggestServices,
            "check_availability" => {
                let a: DateArgs = serde_json::from_value(args)?;
                ToolCall::CheckAvailability { date: a.date }
            }
            "suggest_employees" => {
                let a: TimeArgs = serde_json::from_value(args)?;
                ToolCall::SuggestEmployees { time: a.time }
            }
            "create_booking" => {
                let a: CreateArgs = if args.is_null() {
                    CreateArgs::default()
                } else {
                    serde_json::from_value(args)?
                };
                ToolCall::CreateBooking {
                    employee_pm_si: a.employee_pm_si,
                }
            }
            "reset_booking" => ToolCall::ResetBooking,
            "revert_to_step" => {
                let a: StepArgs = serde_json::from_value(args)?;
                ToolCall::RevertToStep { step: a.step }
            }
            "update_booking_context" => {
                let a: UpdateArgs = serde_json::from_value(args)?;
                ToolCall::UpdateBookingContext { updates: a.updates }
            }
            other => return Err(AppError::BadRequest(format!("unknown tool '{other}'"))),
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SuggestServices => "suggest_services",
            ToolCall::CheckAvailability { .. } => "check_availability",
            ToolCall::SuggestEmployees { .. } => "suggest_employees",
            ToolCall::CreateBooking { .. } => "create_booking",
            ToolCall::ResetBooking => "reset_booking",
            ToolCall::RevertToStep { .. } => "revert_to_step",
            ToolCall::UpdateBookingContext { .. } => "update_booking_context",
        }
    }
}

/// What a handler hands back: text for the user, the patch to commit, and
/// optional data meant only for the agent.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ToolResult {
    pub public_text: String,
    pub ctx_patch: ContextPatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_data: Option<Value>,
}

impl ToolResult {
    pub fn text(public_text: impl Into<String>) -> Self {
        Self {
            public_text: public_text.into(),
            ..Self::default()
        }
    }

    pub fn with_patch(public_text: impl Into<String>, ctx_patch: ContextPatch) -> Self {
        Self {
            public_text: public_text.into(),
            ctx_patch,
            private_data: None,
        }
    }

    pub fn private(mut self, data: Value) -> Self {
        self.private_data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tools() {
        assert_eq!(
            ToolCall::parse("suggest_services", json!({})).unwrap(),
            ToolCall::SuggestServices
        );
        assert_eq!(
            ToolCall::parse("check_availability", json!({"date": "tomorrow"})).unwrap(),
            ToolCall::CheckAvailability {
                date: "tomorrow".into()
            }
        );
        assert_eq!(
            ToolCall::parse("create_booking", Value::Null).unwrap(),
            ToolCall::CreateBooking {
                employee_pm_si: None
            }
        );
        assert_eq!(
            ToolCall::parse("create_booking", json!({"employee_token": "E1"})).unwrap(),
            ToolCall::CreateBooking {
                employee_pm_si: Some("E1".into())
            }
        );
    }

    #[test]
    fn test_parse_unknown_tool() {
        let err = ToolCall::parse("book_everything", json!({})).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_parse_update_rejects_unknown_field() {
        let result = ToolCall::parse(
            "update_booking_context",
            json!({"updates": {"favourite_colour": "blue"}}),
        );
        assert!(matches!(result, Err(AppError::Serialization(_))));
    }

    #[test]
    fn test_parse_update_rejects_system_owned_fields() {
        for updates in [
            json!({"booking_confirmed": true}),
            json!({"booking_in_progress": false}),
            json!({"offered_employees": [{"pm_si": "FAKE", "name": "Dr. Fake"}]}),
            json!({"available_times": [{"time": "10:00"}]}),
            json!({"total_price": 1.0}),
            json!({"customer_pm_si": "CUS9"}),
            json!({"customer_type": "existing"}),
            json!({"patient_data": {"id": 1}}),
        ] {
            let result = ToolCall::parse("update_booking_context", json!({ "updates": updates.clone() }));
            assert!(
                matches!(result, Err(AppError::Serialization(_))),
                "accepted {updates}"
            );
        }
    }

    #[test]
    fn test_parse_update_keeps_explicit_null() {
        let call = ToolCall::parse(
            "update_booking_context",
            json!({"updates": {"appointment_time": null, "booking_for_self": false}}),
        )
        .unwrap();
        let ToolCall::UpdateBookingContext { updates } = call else {
            panic!("wrong tool");
        };
        assert_eq!(updates.appointment_time, Some(None));
        assert_eq!(updates.booking_for_self, Some(false));
        assert_eq!(updates.employee_pm_si, None);
    }
}
