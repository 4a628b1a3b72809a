use std::sync::LazyLock;

use chrono::{Datelike, Days, FixedOffset, NaiveDate, Offset, Utc};
use regex::Regex;

use super::text::{ascii_digits, normalize_arabic};

static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap());

static DMY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})(?:[/.\-](\d{4}))?$").unwrap());

static IN_DAYS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:بعد|in)\s+(\d{1,2})\s+(?:ايام|يوم|days?)").unwrap()
});

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})(?:[:.](\d{2})|(\d{2}))?(?::\d{2})?\s*(am|pm|a\.m\.|p\.m\.|ص|م)?$")
        .unwrap()
});

// Matched against normalized text, so hamza and taa-marbuta variants fold
// into these spellings.
const WEEKDAYS: &[(&str, u32)] = &[
    ("monday", 0),
    ("tuesday", 1),
    ("wednesday", 2),
    ("thursday", 3),
    ("friday", 4),
    ("saturday", 5),
    ("sunday", 6),
    ("الاثنين", 0),
    ("الثلاثاء", 1),
    ("الاربعاء", 2),
    ("الخميس", 3),
    ("الجمعه", 4),
    ("السبت", 5),
    ("الاحد", 6),
];

const NAMED_TIMES: &[(&str, &str)] = &[
    ("صباحا", "09:00"),
    ("الصباح", "09:00"),
    ("ظهرا", "12:00"),
    ("الظهر", "12:00"),
    ("عصرا", "15:00"),
    ("العصر", "15:00"),
    ("مساء", "18:00"),
    ("المساء", "18:00"),
    ("ليلا", "20:00"),
    ("الليل", "20:00"),
    ("morning", "09:00"),
    ("noon", "12:00"),
    ("afternoon", "15:00"),
    ("evening", "18:00"),
    ("night", "20:00"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRejection {
    Unrecognized,
    InPast(NaiveDate),
}

/// Today's date at the clinic, given its UTC offset in minutes.
pub fn clinic_today(utc_offset_minutes: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset).date_naive()
}

/// Parse a date expression relative to `today`. Explicit past dates are
/// rejected; weekday names always land on a future day.
pub fn parse_date(text: &str, today: NaiveDate) -> Result<NaiveDate, DateRejection> {
    let raw = ascii_digits(text.trim());
    let lowered = normalize_arabic(&raw);

    if let Some(caps) = ISO_RE.captures(&lowered) {
        let date = ymd(&caps[1], &caps[2], &caps[3]).ok_or(DateRejection::Unrecognized)?;
        return not_past(date, today);
    }

    if let Some(caps) = DMY_RE.captures(&lowered) {
        let (day, month) = (&caps[1], &caps[2]);
        return match caps.get(3) {
            Some(year) => {
                let date = ymd(year.as_str(), month, day).ok_or(DateRejection::Unrecognized)?;
                not_past(date, today)
            }
            None => {
                let this_year = today.year().to_string();
                let date = ymd(&this_year, month, day).ok_or(DateRejection::Unrecognized)?;
                if date < today {
                    let next_year = (today.year() + 1).to_string();
                    ymd(&next_year, month, day).ok_or(DateRejection::Unrecognized)
                } else {
                    Ok(date)
                }
            }
        };
    }

    if let Some(days) = relative_days(&lowered) {
        return today
            .checked_add_days(Days::new(days))
            .ok_or(DateRejection::Unrecognized);
    }

    weekday(&lowered, today).ok_or(DateRejection::Unrecognized)
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn not_past(date: NaiveDate, today: NaiveDate) -> Result<NaiveDate, DateRejection> {
    if date < today {
        Err(DateRejection::InPast(date))
    } else {
        Ok(date)
    }
}

fn relative_days(lowered: &str) -> Option<u64> {
    if let Some(caps) = IN_DAYS_RE.captures(lowered) {
        return caps[1].parse().ok();
    }
    let after_tomorrow = ["day after tomorrow", "بعد غد", "بعد بكره", "بعد بكرا", "بعد الغد"];
    if after_tomorrow.iter().any(|k| lowered.contains(k)) {
        return Some(2);
    }
    let tomorrow = ["tomorrow", "بكره", "بكرا", "غدا", "الغد"];
    if tomorrow.iter().any(|k| lowered.contains(k)) {
        return Some(1);
    }
    if lowered.contains("today") || lowered.contains("اليوم") {
        return Some(0);
    }
    None
}

fn weekday(lowered: &str, today: NaiveDate) -> Option<NaiveDate> {
    let (_, idx) = WEEKDAYS.iter().find(|(name, _)| lowered.contains(name))?;
    let current = today.weekday().num_days_from_monday();
    // "next"/"القادم" is ignored: "next thursday" on a Wednesday is
    // tomorrow, the same as a bare "thursday". Only today's own weekday is
    // pushed a week out.
    let mut days_ahead = (idx + 7 - current) % 7;
    if days_ahead == 0 {
        days_ahead = 7;
    }
    today.checked_add_days(Days::new(u64::from(days_ahead)))
}

/// Parse a time expression into `HH:MM`.
pub fn parse_time(text: &str) -> Option<String> {
    let lowered = normalize_arabic(&ascii_digits(text.trim()));

    if let Some((_, time)) = NAMED_TIMES.iter().find(|(name, _)| *name == lowered) {
        return Some(time.to_string());
    }

    let caps = TIME_RE.captures(&lowered)?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps
        .get(2)
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);

    match caps.get(4).map(|m| m.as_str()) {
        Some("pm" | "p.m." | "م") if hour < 12 => hour += 12,
        Some("am" | "a.m." | "ص") if hour == 12 => hour = 0,
        _ => {}
    }

    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}
