use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::{
    BookingContext, BookingStep, CustomerType, Gender, Language, OfferedEmployee, ServiceRecord,
    TimeSlot,
};

/// Whether a value counts as "provided" for prerequisite checks.
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl<T: Presence> Presence for Option<T> {
    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(Presence::is_present)
    }
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for bool {
    fn is_present(&self) -> bool {
        *self
    }
}

impl Presence for f64 {
    fn is_present(&self) -> bool {
        true
    }
}

impl Presence for Language {
    fn is_present(&self) -> bool {
        *self != Language::Unknown
    }
}

impl Presence for Gender {
    fn is_present(&self) -> bool {
        true
    }
}

impl Presence for CustomerType {
    fn is_present(&self) -> bool {
        true
    }
}

impl Presence for Value {
    fn is_present(&self) -> bool {
        !self.is_null()
    }
}

impl Presence for Map<String, Value> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

// Wraps whatever is in the JSON (including null) in `Some`, so an absent key
// and an explicit null stay distinguishable.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

macro_rules! context_fields {
    ($($variant:ident => $field:ident: $ty:ty),+ $(,)?) => {
        /// Every patchable field of [`BookingContext`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ContextField {
            $($variant),+
        }

        impl ContextField {
            pub const ALL: &'static [ContextField] = &[$(ContextField::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ContextField::$variant => stringify!($field)),+
                }
            }
        }

        /// A typed partial update. `None` means "leave alone"; for nullable
        /// fields `Some(None)` means "clear".
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct ContextPatch {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
                pub $field: Option<$ty>,
            )+
            /// Accepted from callers so it never fails parsing, then dropped.
            #[serde(default, skip_serializing, deserialize_with = "present")]
            pub next_booking_step: Option<Option<BookingStep>>,
        }

        impl ContextPatch {
            /// Fields this patch writes, in rank order of declaration.
            pub fn fields(&self) -> Vec<ContextField> {
                let mut out = Vec::new();
                $(
                    if self.$field.is_some() {
                        out.push(ContextField::$variant);
                    }
                )+
                out
            }

            /// Fields whose written value differs from the context's.
            pub fn changed_fields(&self, ctx: &BookingContext) -> Vec<ContextField> {
                let mut out = Vec::new();
                $(
                    if let Some(value) = &self.$field {
                        if *value != ctx.$field {
                            out.push(ContextField::$variant);
                        }
                    }
                )+
                out
            }

            pub fn contains(&self, field: ContextField) -> bool {
                match field {
                    $(ContextField::$variant => self.$field.is_some()),+
                }
            }

            /// True when the patch writes a non-empty value for `field`.
            pub fn writes_value(&self, field: ContextField) -> bool {
                match field {
                    $(ContextField::$variant => self.$field.as_ref().is_some_and(Presence::is_present)),+
                }
            }

            /// Set `field` to its empty value.
            pub fn clear(&mut self, field: ContextField) {
                match field {
                    $(ContextField::$variant => self.$field = Some(Default::default())),+
                }
            }

            /// Drop `field` from the patch entirely.
            pub fn remove(&mut self, field: ContextField) {
                match field {
                    $(ContextField::$variant => self.$field = None),+
                }
            }

            /// Later writes win.
            pub fn merge(&mut self, other: ContextPatch) {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )+
            }

            pub(crate) fn write_into(self, ctx: &mut BookingContext) {
                $(
                    if let Some(value) = self.$field {
                        ctx.$field = value;
                    }
                )+
            }

            /// Copy the context's current value of `field` into the patch.
            pub fn capture(&mut self, field: ContextField, ctx: &BookingContext) {
                match field {
                    $(ContextField::$variant => self.$field = Some(ctx.$field.clone())),+
                }
            }
        }

        impl BookingContext {
            pub fn has(&self, field: ContextField) -> bool {
                match field {
                    $(ContextField::$variant => self.$field.is_present()),+
                }
            }
        }
    };
}

context_fields! {
    UserName => user_name: Option<String>,
    UserPhone => user_phone: Option<String>,
    UserLang => user_lang: Language,
    Tz => tz: String,
    Gender => gender: Option<Gender>,
    BookingForSelf => booking_for_self: bool,
    SubjectName => subject_name: Option<String>,
    SubjectPhone => subject_phone: Option<String>,
    SubjectGender => subject_gender: Option<Gender>,
    SubjectRelation => subject_relation: Option<String>,
    PatientData => patient_data: Option<Value>,
    CustomerPmSi => customer_pm_si: Option<String>,
    CustomerType => customer_type: Option<CustomerType>,
    SelectedServicesPmSi => selected_services_pm_si: Option<Vec<String>>,
    SelectedServicesData => selected_services_data: Option<Vec<ServiceRecord>>,
    AppointmentDate => appointment_date: Option<String>,
    AvailableTimes => available_times: Option<Vec<TimeSlot>>,
    AppointmentTime => appointment_time: Option<String>,
    OfferedEmployees => offered_employees: Option<Vec<OfferedEmployee>>,
    CheckoutSummary => checkout_summary: Option<Map<String, Value>>,
    TotalPrice => total_price: Option<f64>,
    EmployeePmSi => employee_pm_si: Option<String>,
    EmployeeName => employee_name: Option<String>,
    BookingConfirmed => booking_confirmed: bool,
    BookingInProgress => booking_in_progress: bool,
}

impl ContextField {
    /// The flow step that owns this field, if any.
    pub fn step(&self) -> Option<BookingStep> {
        BookingStep::ORDER
            .into_iter()
            .find(|step| step.fields().contains(self))
    }

    pub fn is_primary(&self) -> bool {
        self.step().is_some_and(|step| step.primary_field() == *self)
    }

    /// Position in the invalidation order: step order first, primary before
    /// secondary. Identity fields have no rank.
    pub fn rank(&self) -> Option<usize> {
        self.step()
            .map(|step| step.index() * 2 + usize::from(!self.is_primary()))
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BookingStep {
    pub fn fields(&self) -> &'static [ContextField] {
        match self {
            BookingStep::SelectService => &[
                ContextField::SelectedServicesPmSi,
                ContextField::SelectedServicesData,
            ],
            BookingStep::SelectDate => &[ContextField::AppointmentDate, ContextField::AvailableTimes],
            BookingStep::SelectTime => &[
                ContextField::AppointmentTime,
                ContextField::OfferedEmployees,
                ContextField::CheckoutSummary,
                ContextField::TotalPrice,
            ],
            BookingStep::SelectEmployee => &[
                ContextField::EmployeePmSi,
                ContextField::EmployeeName,
                ContextField::BookingConfirmed,
            ],
        }
    }

    pub fn primary_field(&self) -> ContextField {
        self.fields()[0]
    }

    /// Fields that must already be provided before this step's primary
    /// field can be written.
    pub fn prerequisites(&self) -> &'static [ContextField] {
        match self {
            BookingStep::SelectService => &[],
            BookingStep::SelectDate => &[ContextField::SelectedServicesPmSi],
            BookingStep::SelectTime => &[
                ContextField::SelectedServicesPmSi,
                ContextField::AppointmentDate,
                ContextField::AvailableTimes,
            ],
            BookingStep::SelectEmployee => &[
                ContextField::SelectedServicesPmSi,
                ContextField::AppointmentDate,
                ContextField::AppointmentTime,
            ],
        }
    }

    /// Every step-owned field from this step to the end of the flow.
    pub fn fields_from(&self) -> impl Iterator<Item = ContextField> {
        BookingStep::ORDER
            .into_iter()
            .skip(self.index())
            .flat_map(|step| step.fields().iter().copied())
    }
}

impl ContextPatch {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// A patch that empties each of `fields`.
    pub fn clearing(fields: impl IntoIterator<Item = ContextField>) -> Self {
        let mut patch = ContextPatch::default();
        for field in fields {
            patch.clear(field);
        }
        patch
    }

    /// A patch that empties every field from `step` to the end of the flow.
    pub fn clearing_from(step: BookingStep) -> Self {
        Self::clearing(step.fields_from())
    }

    /// Remove a caller-supplied `next_booking_step`. Returns whether one was
    /// present.
    pub fn strip_derived(&mut self) -> bool {
        self.next_booking_step.take().is_some()
    }

    /// The context as it would look with this patch written on top.
    pub fn overlay(&self, ctx: &BookingContext) -> BookingContext {
        let mut combined = ctx.clone();
        self.clone().write_into(&mut combined);
        combined
    }
}

/// The fields a caller may set through the generic update tool. Offers,
/// prices, customer records and confirmation are written only by the tools
/// that talk to the scheduling API, so they are not accepted here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BookingContextUpdate {
    #[serde(default, deserialize_with = "present")]
    pub selected_services_pm_si: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "present")]
    pub appointment_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub appointment_time: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub employee_pm_si: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub employee_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub gender: Option<Option<Gender>>,
    #[serde(default, deserialize_with = "present")]
    pub user_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub user_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub subject_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub subject_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub subject_gender: Option<Option<Gender>>,
    #[serde(default, deserialize_with = "present")]
    pub subject_relation: Option<Option<String>>,
    #[serde(default)]
    pub booking_for_self: Option<bool>,
    /// Derived by the controller; accepted and ignored.
    #[serde(default, deserialize_with = "present")]
    pub next_booking_step: Option<Option<BookingStep>>,
}

impl From<BookingContextUpdate> for ContextPatch {
    fn from(update: BookingContextUpdate) -> Self {
        ContextPatch {
            selected_services_pm_si: update.selected_services_pm_si,
            appointment_date: update.appointment_date,
            appointment_time: update.appointment_time,
            employee_pm_si: update.employee_pm_si,
            employee_name: update.employee_name,
            gender: update.gender,
            user_name: update.user_name,
            user_phone: update.user_phone,
            subject_name: update.subject_name,
            subject_phone: update.subject_phone,
            subject_gender: update.subject_gender,
            subject_relation: update.subject_relation,
            booking_for_self: update.booking_for_self,
            next_booking_step: update.next_booking_step,
            ..ContextPatch::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order_follows_steps() {
        let ranked: Vec<(ContextField, usize)> = ContextField::ALL
            .iter()
            .filter_map(|f| f.rank().map(|r| (*f, r)))
            .collect();
        assert_eq!(ranked.len(), 11);
        assert_eq!(ContextField::SelectedServicesPmSi.rank(), Some(0));
        assert_eq!(ContextField::SelectedServicesData.rank(), Some(1));
        assert_eq!(ContextField::AppointmentDate.rank(), Some(2));
        assert_eq!(ContextField::AvailableTimes.rank(), Some(3));
        assert_eq!(ContextField::AppointmentTime.rank(), Some(4));
        assert_eq!(ContextField::OfferedEmployees.rank(), Some(5));
        assert_eq!(ContextField::EmployeePmSi.rank(), Some(6));
        assert_eq!(ContextField::BookingConfirmed.rank(), Some(7));
        assert_eq!(ContextField::UserName.rank(), None);
        assert_eq!(ContextField::BookingInProgress.rank(), None);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = serde_json::from_str::<ContextPatch>(r#"{"appointment_dat": "2025-08-20"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_null_distinct_from_absent() {
        let patch: ContextPatch =
            serde_json::from_str(r#"{"appointment_time": null, "user_name": "Sara"}"#).unwrap();
        assert_eq!(patch.appointment_time, Some(None));
        assert_eq!(patch.appointment_date, None);
        assert_eq!(patch.user_name, Some(Some("Sara".to_string())));
        assert_eq!(
            patch.fields(),
            vec![ContextField::UserName, ContextField::AppointmentTime]
        );
    }

    #[test]
    fn test_next_booking_step_parsed_then_stripped() {
        let mut patch: ContextPatch =
            serde_json::from_str(r#"{"next_booking_step": "select_time", "gender": "female"}"#)
                .unwrap();
        assert!(patch.strip_derived());
        assert!(!patch.strip_derived());
        assert_eq!(patch.gender, Some(Some(Gender::Female)));
        let json = serde_json::to_value(&patch).unwrap();
        assert!(json.get("next_booking_step").is_none());
    }

    #[test]
    fn test_clearing_from_time_step() {
        let patch = ContextPatch::clearing_from(BookingStep::SelectTime);
        assert_eq!(
            patch.fields(),
            vec![
                ContextField::AppointmentTime,
                ContextField::OfferedEmployees,
                ContextField::CheckoutSummary,
                ContextField::TotalPrice,
                ContextField::EmployeePmSi,
                ContextField::EmployeeName,
                ContextField::BookingConfirmed,
            ]
        );
        assert_eq!(patch.booking_confirmed, Some(false));
        assert_eq!(patch.appointment_time, Some(None));
    }

    #[test]
    fn test_changed_fields_skips_noop_writes() {
        let ctx = BookingContext {
            appointment_time: Some("10:00".into()),
            ..BookingContext::default()
        };
        let patch = ContextPatch {
            appointment_time: Some(Some("10:00".into())),
            employee_pm_si: Some(Some("emp".into())),
            ..ContextPatch::default()
        };
        assert_eq!(patch.changed_fields(&ctx), vec![ContextField::EmployeePmSi]);
    }

    #[test]
    fn test_writes_value_treats_empty_as_absent() {
        let patch = ContextPatch {
            selected_services_pm_si: Some(Some(vec![])),
            appointment_date: Some(Some("2025-08-20".into())),
            ..ContextPatch::default()
        };
        assert!(!patch.writes_value(ContextField::SelectedServicesPmSi));
        assert!(patch.writes_value(ContextField::AppointmentDate));
    }

    #[test]
    fn test_merge_later_wins() {
        let mut a = ContextPatch {
            appointment_date: Some(Some("2025-08-20".into())),
            ..ContextPatch::default()
        };
        a.merge(ContextPatch::clearing([ContextField::AppointmentDate, ContextField::AvailableTimes]));
        assert_eq!(a.appointment_date, Some(None));
        assert_eq!(a.available_times, Some(None));
    }
}
