//! Recognition and locale-aware formatting of `DD-MM-YYYY` dates.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::value::{Namespace, Value};

/// Pattern used when the `format` filter is called without arguments.
pub const DEFAULT_DATE_PATTERN: &str = "DD-MM-YYYY";

/// Tokens in match priority: longer tokens shadow their prefixes.
const TOKENS: [&str; 8] = ["YYYY", "YY", "MMMM", "MMM", "MM", "M", "DD", "D"];

const EN_LONG: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];
const EN_SHORT: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const NL_LONG: [&str; 12] = [
    "januari",
    "februari",
    "maart",
    "april",
    "mei",
    "juni",
    "juli",
    "augustus",
    "september",
    "oktober",
    "november",
    "december",
];
const NL_SHORT: [&str; 12] = [
    "jan", "feb", "mrt", "apr", "mei", "jun", "jul", "aug", "sep", "okt", "nov", "dec",
];

/// Month-name table used by [`format_date`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateLocale {
    #[default]
    En,
    Nl,
}

impl DateLocale {
    /// Maps a locale tag such as `nl`, `nl-BE` or `en-GB` onto a supported table.
    pub fn resolve(tag: Option<&str>) -> Self {
        match tag.map(str::to_ascii_lowercase) {
            Some(tag) if tag == "nl" || tag.starts_with("nl-") => Self::Nl,
            Some(_) | None => Self::En,
        }
    }

    const fn long_months(self) -> &'static [&'static str; 12] {
        match self {
            Self::En => &EN_LONG,
            Self::Nl => &NL_LONG,
        }
    }

    const fn short_months(self) -> &'static [&'static str; 12] {
        match self {
            Self::En => &EN_SHORT,
            Self::Nl => &NL_SHORT,
        }
    }
}

fn is_digits(part: &str, len: usize) -> bool {
    part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
}

/// Parses exactly `DD-MM-YYYY`, rejecting calendar rollover such as `31-02-2026`.
pub fn parse_fixed_format_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('-');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || !is_digits(day, 2) || !is_digits(month, 2) || !is_digits(year, 4)
    {
        return None;
    }

    let day: u32 = day.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    (date.day() == day && date.month() == month && date.year() == year).then_some(date)
}

fn render_token(token: &str, date: NaiveDate, locale: DateLocale) -> String {
    // month0() is always in 0..12
    let month_index = date.month0() as usize;
    match token {
        "YYYY" => format!("{:04}", date.year()),
        "YY" => format!("{:02}", date.year().rem_euclid(100)),
        "MMMM" => locale
            .long_months()
            .get(month_index)
            .copied()
            .unwrap_or_default()
            .to_owned(),
        "MMM" => locale
            .short_months()
            .get(month_index)
            .copied()
            .unwrap_or_default()
            .to_owned(),
        "MM" => format!("{:02}", date.month()),
        "M" => date.month().to_string(),
        "DD" => format!("{:02}", date.day()),
        "D" => date.day().to_string(),
        other => other.to_owned(),
    }
}

/// Formats `date` with `YYYY YY MMMM MMM MM M DD D` tokens; other characters pass through.
pub fn format_date(date: NaiveDate, pattern: &str, locale: DateLocale) -> String {
    let mut output = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while !rest.is_empty() {
        if let Some((token, after)) = TOKENS
            .iter()
            .find_map(|token| rest.strip_prefix(*token).map(|after| (*token, after)))
        {
            output.push_str(&render_token(token, date, locale));
            rest = after;
            continue;
        }

        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            output.push(ch);
        }
        rest = chars.as_str();
    }

    output
}

/// Formats dates and `DD-MM-YYYY` strings; anything else is stringified.
pub fn format_value(value: &Value, pattern: &str, locale: DateLocale) -> String {
    match value {
        Value::Date(date) => format_date(*date, pattern, locale),
        Value::String(text) => match parse_fixed_format_date(text) {
            Some(date) => format_date(date, pattern, locale),
            None => text.clone(),
        },
        other => other.to_string(),
    }
}

/// Returns a copy of `value` with every `DD-MM-YYYY` string leaf replaced by a date.
pub fn coerce_value(value: &Value) -> Value {
    match value {
        Value::String(text) => parse_fixed_format_date(text).map_or_else(|| value.clone(), Value::Date),
        Value::Seq(items) => Value::Seq(items.iter().map(coerce_value).collect()),
        Value::Map(entries) => Value::Map(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), coerce_value(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
        Value::Undefined
        | Value::Null
        | Value::Bool(_)
        | Value::Int(_)
        | Value::Float(_)
        | Value::Date(_) => value.clone(),
    }
}

pub fn coerce_namespace(namespace: &Namespace) -> Namespace {
    namespace
        .iter()
        .map(|(key, value)| (key.clone(), coerce_value(value)))
        .collect()
}
