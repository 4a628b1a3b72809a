use serde::{Deserialize, Serialize};

/// One bookable catalog entry. Catalog data is static; records are cloned
/// into contexts, never shared mutably.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub title: String,
    pub title_en: String,
    pub duration: String,
    pub duration_minutes: u32,
    pub pm_si: String,
    pub price: String,
    pub price_numeric: f64,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub time: String,
}

impl TimeSlot {
    pub fn new(time: &str) -> Self {
        Self {
            time: time.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferedEmployee {
    pub pm_si: String,
    pub name: String,
    pub display: String,
}
