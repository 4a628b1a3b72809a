use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub clinic_api_base: String,
    pub clinic_api_token: String,
    pub clinic_api_timeout_secs: u64,
    pub utc_offset_minutes: i32,
    pub timezone: String,
    pub price_currency: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "noor.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            clinic_api_base: env::var("CLINIC_API_BASE")
                .unwrap_or_else(|_| "https://www.bestclinic24.net".to_string()),
            clinic_api_token: env::var("CLINIC_API_TOKEN").unwrap_or_default(),
            clinic_api_timeout_secs: env::var("CLINIC_API_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            utc_offset_minutes: env::var("CLINIC_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(180),
            timezone: env::var("CLINIC_TIMEZONE").unwrap_or_else(|_| "Asia/Hebron".to_string()),
            price_currency: env::var("PRICE_CURRENCY").unwrap_or_else(|_| "NIS".to_string()),
        }
    }
}
