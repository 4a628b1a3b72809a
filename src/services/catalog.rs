use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Gender, ServiceRecord};

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*•?\s*(?P<title>.+?)\s+-\s+\d").unwrap());

const MEN_SECTION: &str = "Z2lSQ2ZFTEJBcFVXR2MrSUkra3pyN3l1N0NpV0dnS0tHVEJwZVdSTDlkY3k3Qm5RU2tFcEdFOXI1MnJiUWtsSTRjV2VsTmcvYlFIcjhDOUZ0dy94Ync9PQsdgn352FCSzv2414sdgn352FCSzv2414";
const WOMEN_SECTION: &str = "a25ZYU0yS21HQU43WUxBT3VHa3hyNUJzRHRzUGppdm5CM0RBR2twb1NHRFhrM1doT3BOcGlFZ3g5WkRBYWxkM0x4Ymo0RUl3MGRMNlgzaHBKekpTc2c9PQsdgn352FCSzv2414sdgn352FCSzv2414";

/// Alternate wordings for the women's section titles.
const WOMEN_SYNONYMS: &[(&str, &str)] = &[
    ("قسم النسائية", "قسم النسائية"),
    ("الصحة النسائية", "قسم النسائية"),
    ("النسائية", "قسم النسائية"),
    ("استشارة طبية - الصحة النسائية", "استشارة طبية - قسم النسائية"),
    ("استشارة - الصحة النسائية", "استشارة طبية - قسم النسائية"),
    ("استشارة نسائية", "استشارة طبية - قسم النسائية"),
];

/// Outcome of [`ServiceCatalog::resolve`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub tokens: Vec<String>,
    pub records: Vec<ServiceRecord>,
    pub unresolved: Vec<String>,
}

/// The two gender-scoped service lists. Immutable once built.
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    men: Vec<ServiceRecord>,
    women: Vec<ServiceRecord>,
    men_section: String,
    women_section: String,
}

#[allow(clippy::too_many_arguments)]
fn record(
    title: &str,
    title_en: &str,
    duration: &str,
    duration_minutes: u32,
    pm_si: &str,
    price: &str,
    price_numeric: f64,
    category: &str,
) -> ServiceRecord {
    ServiceRecord {
        title: title.to_string(),
        title_en: title_en.to_string(),
        duration: duration.to_string(),
        duration_minutes,
        pm_si: pm_si.to_string(),
        price: price.to_string(),
        price_numeric,
        category: category.to_string(),
    }
}

impl ServiceCatalog {
    pub fn new(
        men: Vec<ServiceRecord>,
        women: Vec<ServiceRecord>,
        men_section: impl Into<String>,
        women_section: impl Into<String>,
    ) -> Self {
        Self {
            men,
            women,
            men_section: men_section.into(),
            women_section: women_section.into(),
        }
    }

    /// The clinic's published catalog.
    pub fn clinic() -> Self {
        let men = vec![
            record(
                "استشارة طبية - ضعف الانتصاب وصحة الذكورة",
                "Medical Consultation - Erectile Dysfunction & Men's Health",
                "00:30",
                30,
                "a25ZYU0yS21HQU43WUxBT3VHa3hyMVl2d0JoTllWMjZzU2IzTVBHS2VLeVVBMW01MHBVWHFGWGxYY1FSWnExZAsdgn352FCSzv2414sdgn352FCSzv2414",
                "100.00",
                100.0,
                "consultation",
            ),
            record(
                "جلسة علاجية - موجات تصادمية خطية",
                "Therapeutic Session - Linear Shockwave Therapy",
                "00:40",
                40,
                "LzVmL2VhcUdldUU2WC8vTVJsL0toMU1KSU5MNkdzZEtxdFRTZE5HM1JqQ3Yxa3daVnQyU1dMTE9QQ3lLUTN3cwsdgn352FCSzv2414sdgn352FCSzv2414",
                "4800.00",
                4800.0,
                "therapy",
            ),
            record(
                "جلسة علاجية - حقن الفيلر",
                "Therapeutic Session - Filler Injection",
                "00:45",
                45,
                "RXpIc2h5WUV3TjFmNExBZVFaRFJLbkR5cFpOSWEwN3d2OFk5MGJIVU9MQU1nMGFPb01iT3NvekNRUWZGTGRBVwsdgn352FCSzv2414sdgn352FCSzv2414",
                "3500.00",
                3500.0,
                "therapy",
            ),
            record(
                "مراجعة دورية",
                "Regular Follow-up",
                "00:30",
                30,
                "VHJ0eTVlWDl6TjdvV2QrTG1NWk9INEJ5L2V6dU9pWkc2NVd4cWk2YmlWbVhQODZqYVpyb2NaK1BDaVp6eXpGWQsdgn352FCSzv2414sdgn352FCSzv2414",
                "50.00",
                50.0,
                "followup",
            ),
        ];

        let women = vec![
            record(
                "استشارة طبية - قسم النسائية",
                "Medical Consultation - Gynecology Department",
                "00:20",
                20,
                "VnI3YWEwdDA1cDdxRW5PVmhXQ2RaRElFSlF2ZFdMUXdWRVQ4ZG5jY2lnT1ZqNmF4NDRkZ29CQmVmV3QvdjNNSwsdgn352FCSzv2414sdgn352FCSzv2414",
                "100.00",
                100.0,
                "consultation",
            ),
            record(
                "مراجعة دورية",
                "Regular Follow-up",
                "00:30",
                30,
                "OVdLSXVsaTNnTVBJVGVvVkVUMnhIZXNqZ043NXlJMjlxeWRHV1FuUEhSMElKbFRaWDlPOGMwR1NheTNoQlNObwsdgn352FCSzv2414sdgn352FCSzv2414",
                "80.00",
                80.0,
                "followup",
            ),
        ];

        Self::new(men, women, MEN_SECTION, WOMEN_SECTION)
    }

    pub fn services_for(&self, gender: Gender) -> &[ServiceRecord] {
        match gender {
            Gender::Male => &self.men,
            Gender::Female => &self.women,
        }
    }

    /// Section token sent to the scheduling API as `cus_sec_pm_si`.
    pub fn section_token(&self, gender: Gender) -> &str {
        match gender {
            Gender::Male => &self.men_section,
            Gender::Female => &self.women_section,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &ServiceRecord> {
        self.men.iter().chain(self.women.iter())
    }

    pub fn find(&self, pm_si: &str) -> Option<&ServiceRecord> {
        self.all().find(|s| s.pm_si == pm_si)
    }

    pub fn belongs_to(&self, pm_si: &str, gender: Gender) -> bool {
        self.services_for(gender).iter().any(|s| s.pm_si == pm_si)
    }

    /// Sum of catalog prices for the given tokens; unknown tokens count as 0.
    pub fn total_price(&self, tokens: &[String]) -> f64 {
        tokens
            .iter()
            .filter_map(|t| self.find(t))
            .map(|s| s.price_numeric)
            .sum()
    }

    fn ordered(&self, preferred: Option<Gender>) -> [&[ServiceRecord]; 2] {
        match preferred {
            Some(Gender::Female) => [self.women.as_slice(), self.men.as_slice()],
            _ => [self.men.as_slice(), self.women.as_slice()],
        }
    }

    fn exact_title(&self, title: &str, preferred: Option<Gender>) -> Option<&ServiceRecord> {
        self.ordered(preferred)
            .into_iter()
            .flat_map(|catalog| catalog.iter())
            .find(|s| s.title == title || s.title_en == title)
    }

    fn containing(&self, text: &str, preferred: Option<Gender>) -> Option<&ServiceRecord> {
        if text.chars().count() < 3 {
            return None;
        }
        let needle = text.to_lowercase();
        self.ordered(preferred)
            .into_iter()
            .flat_map(|catalog| catalog.iter())
            .find(|s| {
                let title = s.title.as_str();
                let title_en = s.title_en.to_lowercase();
                title.contains(text)
                    || text.contains(title)
                    || title_en.contains(&needle)
                    || needle.contains(&title_en)
            })
    }

    fn match_one(&self, raw: &str, preferred: Option<Gender>) -> Option<&ServiceRecord> {
        if let Some(found) = self.find(raw) {
            return Some(found);
        }

        let text = synonym(raw);
        if let Some(found) = self.exact_title(text, preferred) {
            return Some(found);
        }

        let core = BULLET_RE
            .captures(text)
            .and_then(|c| c.name("title"))
            .map(|m| m.as_str().trim())
            .unwrap_or(text);
        let core = synonym(core.trim_start_matches(['•', ' ']));
        if let Some(found) = self.exact_title(core, preferred) {
            return Some(found);
        }

        self.containing(core, preferred)
    }

    /// Map free-form service identifiers (tokens, titles, bullet lines,
    /// synonyms) to catalog tokens. Order is preserved and duplicates
    /// collapse to their first occurrence.
    pub fn resolve(&self, identifiers: &[String], preferred: Option<Gender>) -> Resolution {
        let mut out = Resolution::default();
        for raw in identifiers {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                out.unresolved.push(raw.clone());
                continue;
            }
            match self.match_one(trimmed, preferred) {
                Some(found) => {
                    if !out.tokens.contains(&found.pm_si) {
                        out.tokens.push(found.pm_si.clone());
                        out.records.push(found.clone());
                    }
                }
                None => out.unresolved.push(trimmed.to_string()),
            }
        }
        out
    }
}

fn synonym(text: &str) -> &str {
    WOMEN_SYNONYMS
        .iter()
        .find(|(from, _)| *from == text)
        .map(|(_, to)| *to)
        .unwrap_or(text)
}

pub fn currency_symbol(code: &str) -> &'static str {
    match code.trim().to_uppercase().as_str() {
        "KWD" => "د.ك",
        "USD" => "$",
        "EUR" => "€",
        _ => "₪",
    }
}

/// One bullet line per service: `• title - price symbol (duration)`.
pub fn format_service_list(services: &[ServiceRecord], currency: &str) -> String {
    let symbol = currency_symbol(currency);
    services
        .iter()
        .map(|s| format!("• {} - {} {} ({})", s.title, s.price, symbol, s.duration))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_token_resolves_to_itself() {
        let catalog = ServiceCatalog::clinic();
        for gender in [Gender::Male, Gender::Female] {
            for svc in catalog.services_for(gender) {
                let res = catalog.resolve(&[svc.pm_si.clone()], Some(gender));
                assert_eq!(res.tokens, vec![svc.pm_si.clone()]);
                assert_eq!(res.records, vec![svc.clone()]);
                assert!(res.unresolved.is_empty());
            }
        }
    }

    #[test]
    fn test_bullet_line_resolves() {
        let catalog = ServiceCatalog::clinic();
        for gender in [Gender::Male, Gender::Female] {
            for svc in catalog.services_for(gender) {
                let line = format!("• {} - {} ₪ ({})", svc.title, svc.price, svc.duration);
                let res = catalog.resolve(&[line], Some(gender));
                assert_eq!(res.tokens, vec![svc.pm_si.clone()], "line for {}", svc.title);
            }
        }
    }

    #[test]
    fn test_shared_title_prefers_gender() {
        let catalog = ServiceCatalog::clinic();
        let women = catalog.resolve(&["مراجعة دورية".to_string()], Some(Gender::Female));
        assert_eq!(women.records[0].price, "80.00");
        let men = catalog.resolve(&["مراجعة دورية".to_string()], None);
        assert_eq!(men.records[0].price, "50.00");
    }

    #[test]
    fn test_synonym_and_english_title() {
        let catalog = ServiceCatalog::clinic();
        let res = catalog.resolve(
            &[
                "استشارة نسائية".to_string(),
                "Therapeutic Session - Filler Injection".to_string(),
            ],
            None,
        );
        assert_eq!(res.records[0].title, "استشارة طبية - قسم النسائية");
        assert_eq!(res.records[1].title, "جلسة علاجية - حقن الفيلر");
        assert!(res.unresolved.is_empty());
    }

    #[test]
    fn test_containment_match() {
        let catalog = ServiceCatalog::clinic();
        let res = catalog.resolve(&["موجات تصادمية".to_string()], None);
        assert_eq!(res.records[0].title_en, "Therapeutic Session - Linear Shockwave Therapy");
        let res = catalog.resolve(&["I want the filler injection please".to_string()], None);
        assert!(res.tokens.is_empty());
        let res = catalog.resolve(&["filler injection".to_string()], None);
        assert_eq!(res.records[0].category, "therapy");
    }

    #[test]
    fn test_unknown_identifier_stays_unresolved() {
        let catalog = ServiceCatalog::clinic();
        let res = catalog.resolve(&["تبييض أسنان".to_string(), "  ".to_string()], None);
        assert!(res.tokens.is_empty());
        assert!(res.records.is_empty());
        assert_eq!(res.unresolved, vec!["تبييض أسنان".to_string(), "  ".to_string()]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let catalog = ServiceCatalog::clinic();
        let token = catalog.services_for(Gender::Male)[0].pm_si.clone();
        let res = catalog.resolve(&[token.clone(), token.clone()], None);
        assert_eq!(res.tokens, vec![token]);
    }

    #[test]
    fn test_format_service_list_uses_symbol() {
        let catalog = ServiceCatalog::clinic();
        let text = format_service_list(catalog.services_for(Gender::Female), "kwd");
        assert_eq!(
            text,
            "• استشارة طبية - قسم النسائية - 100.00 د.ك (00:20)\n• مراجعة دورية - 80.00 د.ك (00:30)"
        );
        assert_eq!(currency_symbol("ILS"), "₪");
        assert_eq!(currency_symbol("???"), "₪");
    }

    #[test]
    fn test_total_price_and_membership() {
        let catalog = ServiceCatalog::clinic();
        let men = catalog.services_for(Gender::Male);
        let tokens = vec![men[0].pm_si.clone(), men[3].pm_si.clone()];
        assert_eq!(catalog.total_price(&tokens), 150.0);
        assert!(catalog.belongs_to(&men[0].pm_si, Gender::Male));
        assert!(!catalog.belongs_to(&men[0].pm_si, Gender::Female));
    }
}
