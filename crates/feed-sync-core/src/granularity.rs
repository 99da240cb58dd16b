//! Age-dependent date truncation.
//!
//! Recent timestamps keep day precision, older ones are coarsened to ISO
//! week, month and finally year. The encoded string parses back to the
//! start of its period, which is enough to render a relative label.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub fn for_age_days(days: i64) -> Self {
        match days {
            d if d < 7 => Granularity::Day,
            d if d < 30 => Granularity::Week,
            d if d < 365 => Granularity::Month,
            _ => Granularity::Year,
        }
    }
}

/// `YYYY-MM-DD`, the format every published date uses
pub fn day_string(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Truncate `at` to the precision its age relative to `now` allows
pub fn encode(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let date = at.date_naive();
    match Granularity::for_age_days((now - at).num_days()) {
        Granularity::Day => day_string(date),
        Granularity::Week => {
            let week = date.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        Granularity::Month => format!("{}-{:02}", date.year(), date.month()),
        Granularity::Year => format!("{}", date.year()),
    }
}

/// Parse an encoded string back to the first day of its period
pub fn decode(encoded: &str) -> Option<(NaiveDate, Granularity)> {
    let encoded = encoded.trim();
    if let Some((year, week)) = encoded.split_once("-W") {
        let date = NaiveDate::from_isoywd_opt(year.parse().ok()?, week.parse().ok()?, Weekday::Mon)?;
        return Some((date, Granularity::Week));
    }

    let parts: Vec<&str> = encoded.split('-').collect();
    match parts.as_slice() {
        [year] => Some((NaiveDate::from_ymd_opt(year.parse().ok()?, 1, 1)?, Granularity::Year)),
        [year, month] => Some((
            NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)?,
            Granularity::Month,
        )),
        [_, _, _] => Some((NaiveDate::parse_from_str(encoded, "%Y-%m-%d").ok()?, Granularity::Day)),
        _ => None,
    }
}

/// Human label such as `today`, `2d ago`, `3w ago`, `3mo ago` or `2y ago`
pub fn relative_label(encoded: &str, today: NaiveDate) -> Option<String> {
    let (date, granularity) = decode(encoded)?;
    let days = (today - date).num_days();
    if days <= 0 {
        return Some("today".to_string());
    }

    let label = match granularity {
        Granularity::Day if days < 7 => format!("{}d ago", days),
        Granularity::Day | Granularity::Week if days < 30 => format!("{}w ago", (days / 7).max(1)),
        Granularity::Year => format!("{}y ago", (today.year() - date.year()).max(1)),
        _ if days >= 365 => format!("{}y ago", days / 365),
        _ => {
            let months = (today.year() - date.year()) * 12 + today.month() as i32 - date.month() as i32;
            format!("{}mo ago", months.max(1))
        }
    };
    Some(label)
}
