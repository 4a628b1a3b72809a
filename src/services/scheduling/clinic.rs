use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    normalize_employees, normalize_time_slots, CreateBookingRequest, CreateOutcome, EmployeeOffer,
    EmployeesQuery, SchedulingApi, TimesQuery,
};
use crate::errors::ApiError;
use crate::models::TimeSlot;

/// reqwest client for the clinic's booking endpoints. All calls are
/// form-encoded POSTs.
pub struct ClinicApiClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl ClinicApiClient {
    pub fn new(base_url: String, token: String, timeout_secs: u64) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    async fn post(
        &self,
        endpoint: &str,
        form: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut req = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .form(form);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(endpoint, status = status.as_u16(), "scheduling API error");
            return Err(ApiError::Http(status.as_u16()));
        }

        let data: Value = resp.json().await?;
        if !data.is_object() {
            return Err(ApiError::Malformed(format!("{endpoint}: expected a JSON object")));
        }
        Ok(data)
    }
}

fn service_fields(services: &[String]) -> impl Iterator<Item = (&'static str, String)> + '_ {
    services.iter().map(|s| ("services_pm_si[]", s.clone()))
}

// Lookups signal failure with `result: false`; a missing flag is success.
fn ensure_result(endpoint: &str, data: &Value) -> Result<(), ApiError> {
    if data.get("result").and_then(Value::as_bool) == Some(false) {
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(endpoint)
            .to_string();
        return Err(ApiError::Rejected(message));
    }
    Ok(())
}

#[async_trait]
impl SchedulingApi for ClinicApiClient {
    async fn available_times(&self, query: &TimesQuery) -> Result<Vec<TimeSlot>, ApiError> {
        let mut form = vec![
            ("date", query.date.clone()),
            ("cus_sec_pm_si", query.section.clone()),
        ];
        form.extend(service_fields(&query.services));

        let data = self.post("BOKGTAVBLTIMS", &form, None).await?;
        ensure_result("BOKGTAVBLTIMS", &data)?;
        Ok(normalize_time_slots(&data["data"]))
    }

    async fn available_employees(&self, query: &EmployeesQuery) -> Result<EmployeeOffer, ApiError> {
        let mut form = vec![
            ("date", query.date.clone()),
            ("time", query.time.clone()),
            ("cus_sec_pm_si", query.section.clone()),
        ];
        form.extend(service_fields(&query.services));

        let data = self.post("BOKGTAVBLEMPLS", &form, None).await?;
        ensure_result("BOKGTAVBLEMPLS", &data)?;
        Ok(EmployeeOffer {
            employees: normalize_employees(&data["data"]),
            checkout_summary: data.get("checkout_summary").and_then(Value::as_object).cloned(),
        })
    }

    async fn create_booking(
        &self,
        request: &CreateBookingRequest,
        idempotency_key: &str,
    ) -> Result<CreateOutcome, ApiError> {
        let mut form = vec![
            ("date", request.date.clone()),
            ("time", request.time.clone()),
            ("employee_pm_si", request.employee_pm_si.clone()),
            ("cus_sec_pm_si", request.section.clone()),
        ];
        form.extend(service_fields(&request.services));

        let customer = &request.customer;
        if let Some(token) = &customer.customer_pm_si {
            form.push(("customer_pm_si", token.clone()));
        }
        if let Some(name) = &customer.name {
            form.push(("customer_name", name.clone()));
        }
        if let Some(phone) = &customer.phone {
            form.push(("customer_phone", phone.clone()));
        }
        if let Some(gender) = customer.gender {
            form.push(("customer_gender", gender.as_str().to_string()));
        }
        if customer.booked_by.is_some() || customer.relation.is_some() {
            let note = json!({
                "booked_by": customer.booked_by,
                "relation": customer.relation,
            });
            form.push(("note", note.to_string()));
        }

        let data = self
            .post("BOKINNEW", &form, Some(idempotency_key))
            .await?;

        Ok(CreateOutcome {
            accepted: data.get("result").and_then(Value::as_bool).unwrap_or(false),
            message: data.get("message").and_then(Value::as_str).map(str::to_string),
            data: data.get("data").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_result() {
        assert!(ensure_result("X", &json!({"data": []})).is_ok());
        assert!(ensure_result("X", &json!({"result": true})).is_ok());
        match ensure_result("X", &json!({"result": false, "message": "closed"})) {
            Err(ApiError::Rejected(msg)) => assert_eq!(msg, "closed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ClinicApiClient::new("https://clinic.example/".into(), String::new(), 5).unwrap();
        assert_eq!(client.base_url, "https://clinic.example");
    }

    #[test]
    fn test_service_fields_repeat_key() {
        let services = vec!["a".to_string(), "b".to_string()];
        let fields: Vec<_> = service_fields(&services).collect();
        assert_eq!(
            fields,
            vec![("services_pm_si[]", "a".to_string()), ("services_pm_si[]", "b".to_string())]
        );
    }
}
