//! Content-based value normalization
//!
//! Every cell is reduced to a [`CanonicalValue`]: a comparison-only string plus the
//! [`CanonicalKind`] that produced it. Classification looks at the value alone, never at
//! the column name, and tries the branches in a fixed order so exactly one fires:
//!
//! 1. null (including empty and whitespace-only strings)
//! 2. date-shaped strings and epoch timestamps
//! 3. numbers (currency, thousands separators and `%` aware)
//! 4. boolean tokens
//! 5. identifier / phone-like digit strings
//! 6. email addresses
//! 7. free text

use crate::dataset::CellValue;
use crate::error::{ReconError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime};
use num_bigint::BigInt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const NULL_TOKEN: &str = "NULL";
pub const TRUE_TOKEN: &str = "TRUE";
pub const FALSE_TOKEN: &str = "FALSE";

/// Case-insensitive literals treated as null
const NULL_LITERALS: &[&str] = &["nan", "null", "none", "na", "n/a", "nat", "<na>", "nil"];

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

/// Decimal places kept for non-integer numbers
const FLOAT_PRECISION: usize = 10;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap());
static ISO_DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(\d{4})-(\d{1,2})-(\d{1,2})[ T](\d{1,2}):(\d{2})",
        r"(?::(\d{2})(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?$",
    ))
    .unwrap()
});
static SLASH_YMD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})/(\d{1,2})/(\d{1,2})$").unwrap());
static DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})([-/.])(\d{1,2})([-/.])(\d{4})$").unwrap());
static COMPACT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap());
static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?$").unwrap());
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").unwrap());
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s\-+()]+$").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap());

/// Which normalization branch produced a canonical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalKind {
    Null,
    Date,
    Number,
    Boolean,
    Identifier,
    Email,
    Text,
}

/// Comparison-only form of a cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalValue {
    pub value: String,
    pub kind: CanonicalKind,
}

impl CanonicalValue {
    pub fn new<S: Into<String>>(value: S, kind: CanonicalKind) -> Self {
        Self {
            value: value.into(),
            kind,
        }
    }

    pub fn null() -> Self {
        Self::new(NULL_TOKEN, CanonicalKind::Null)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Missing, empty and whitespace-only cells all land here
    pub fn is_null_equivalent(&self) -> bool {
        self.kind == CanonicalKind::Null
    }

    /// Numeric reading of number and identifier values (percent sign ignored)
    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            CanonicalKind::Number | CanonicalKind::Identifier => {
                let body = self.value.strip_suffix('%').unwrap_or(&self.value);
                body.parse::<f64>().ok().filter(|v| v.is_finite())
            }
            _ => None,
        }
    }
}

/// Tunables for the normalizer
///
/// Epoch readings apply to any value whose canonical digits form an integer, so a
/// typed integer and its text rendering always normalize the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerOptions {
    /// Read integers of 1e11 and above as milli-, micro- or nanoseconds since the epoch
    pub epoch_timestamps: bool,
    /// Read integers in the 1e9..1e11 range as seconds since the epoch
    pub epoch_seconds: bool,
}

/// Total, deterministic value normalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    options: NormalizerOptions,
}

impl Normalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> NormalizerOptions {
        self.options
    }

    /// Normalize a cell; a missing cell is null
    ///
    /// Never fails: values that cannot be classified are logged and fall back to
    /// plain text normalization of their display form.
    pub fn normalize(&self, value: Option<&CellValue>) -> CanonicalValue {
        self.try_normalize(value).unwrap_or_else(|e| {
            let raw = value.map(|v| v.to_string()).unwrap_or_default();
            text_fallback(&e, &raw)
        })
    }

    /// Normalize a raw string value
    pub fn normalize_str(&self, raw: &str) -> CanonicalValue {
        self.classify_text(raw).unwrap_or_else(|e| text_fallback(&e, raw))
    }

    fn try_normalize(&self, value: Option<&CellValue>) -> Result<CanonicalValue> {
        let value = match value {
            None | Some(CellValue::Null) => return Ok(CanonicalValue::null()),
            Some(v) => v,
        };

        // Typed numbers go through their text rendering so they agree with CSV input
        match value {
            CellValue::Null => Ok(CanonicalValue::null()),
            CellValue::Bool(b) => Ok(boolean(*b)),
            CellValue::Int(i) => self.classify_text(&i.to_string()),
            CellValue::Float(v) => {
                if v.is_nan() {
                    return Ok(CanonicalValue::null());
                }
                let rendered = format_float(*v)
                    .ok_or_else(|| ReconError::normalization(v.to_string(), "non-finite number"))?;
                self.classify_text(&rendered)
            }
            CellValue::Text(s) => self.classify_text(s),
            CellValue::Date(d) => Ok(date_value(*d)),
            CellValue::DateTime(dt) => Ok(date_value(dt.date())),
        }
    }

    fn classify_text(&self, raw: &str) -> Result<CanonicalValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || is_null_literal(trimmed) {
            return Ok(CanonicalValue::null());
        }

        let mut date_shaped = false;
        if let Some(parsed) = parse_date(trimmed) {
            match parsed {
                Some(date) => return Ok(date_value(date)),
                // Date-shaped but not a real calendar date: skip the numeric and boolean branches
                None => date_shaped = true,
            }
        }

        if !date_shaped {
            if let Some(number) = canonical_number(trimmed) {
                return Ok(match self.digits_as_date(&number)? {
                    Some(date) => date_value(date),
                    None => CanonicalValue::new(number, CanonicalKind::Number),
                });
            }
            if let Some(b) = parse_boolean(trimmed) {
                return Ok(boolean(b));
            }
        }

        if let Some(digits) = canonical_identifier(trimmed) {
            return Ok(match self.digits_as_date(&digits)? {
                Some(date) => date_value(date),
                None => CanonicalValue::new(digits, CanonicalKind::Identifier),
            });
        }

        if EMAIL.is_match(trimmed) {
            return Ok(CanonicalValue::new(trimmed.to_lowercase(), CanonicalKind::Email));
        }

        Ok(CanonicalValue::new(normalize_text(trimmed), CanonicalKind::Text))
    }

    /// Date spelled by a canonical digit string: `YYYYMMDD`, or an enabled epoch reading
    ///
    /// Canonical output must re-normalize to itself, so digit strings produced by the
    /// number and identifier branches get the same date check as raw input.
    fn digits_as_date(&self, digits: &str) -> Result<Option<NaiveDate>> {
        if COMPACT_DATE.is_match(digits) {
            return Ok(parse_date(digits).flatten());
        }
        match digits.parse::<i64>() {
            Ok(value) => self.epoch_to_date(value),
            Err(_) => Ok(None),
        }
    }

    fn epoch_to_date(&self, value: i64) -> Result<Option<NaiveDate>> {
        let units_per_second: i64 = if value >= 100_000_000_000 {
            if !self.options.epoch_timestamps {
                return Ok(None);
            }
            if value >= 100_000_000_000_000_000 {
                1_000_000_000
            } else if value >= 100_000_000_000_000 {
                1_000_000
            } else {
                1_000
            }
        } else if self.options.epoch_seconds && value >= 1_000_000_000 {
            1
        } else {
            return Ok(None);
        };

        let seconds = value / units_per_second;
        let sub_second = value % units_per_second;
        let nanos = sub_second * (1_000_000_000 / units_per_second);
        DateTime::from_timestamp(seconds, nanos as u32)
            .map(|dt| Some(dt.date_naive()))
            .ok_or_else(|| {
                ReconError::normalization(value.to_string(), "epoch timestamp out of range")
            })
    }
}

/// Normalize a raw value with default options
pub fn normalize(value: Option<&CellValue>) -> CanonicalValue {
    Normalizer::default().normalize(value)
}

fn text_fallback(error: &ReconError, raw: &str) -> CanonicalValue {
    log::warn!("{error}; falling back to text normalization");
    CanonicalValue::new(normalize_text(raw), CanonicalKind::Text)
}

fn is_null_literal(trimmed: &str) -> bool {
    let lower = trimmed.to_lowercase();
    NULL_LITERALS.contains(&lower.as_str())
}

fn boolean(value: bool) -> CanonicalValue {
    let token = if value { TRUE_TOKEN } else { FALSE_TOKEN };
    CanonicalValue::new(token, CanonicalKind::Boolean)
}

fn date_value(date: NaiveDate) -> CanonicalValue {
    CanonicalValue::new(date.format("%Y-%m-%d").to_string(), CanonicalKind::Date)
}

/// `None` when the string is not date-shaped, `Some(None)` when it is but does not parse
fn parse_date(trimmed: &str) -> Option<Option<NaiveDate>> {
    if let Some(caps) = ISO_DATE.captures(trimmed) {
        return Some(ymd(&caps[1], &caps[2], &caps[3]));
    }
    if let Some(caps) = ISO_DATETIME.captures(trimmed) {
        let hour: u32 = caps[4].parse().ok()?;
        let minute: u32 = caps[5].parse().ok()?;
        let second: u32 = caps.get(6).map_or(Some(0), |m| m.as_str().parse().ok())?;
        if NaiveTime::from_hms_opt(hour, minute, second).is_none() {
            return Some(None);
        }
        return Some(ymd(&caps[1], &caps[2], &caps[3]));
    }
    if let Some(caps) = SLASH_YMD.captures(trimmed) {
        return Some(ymd(&caps[1], &caps[2], &caps[3]));
    }
    if let Some(caps) = DAY_MONTH_YEAR.captures(trimmed) {
        if caps[2] != caps[4] {
            return None;
        }
        let first: u32 = caps[1].parse().ok()?;
        let second: u32 = caps[3].parse().ok()?;
        let year: i32 = caps[5].parse().ok()?;
        // Day-first wins when both readings are valid
        let date = NaiveDate::from_ymd_opt(year, second, first)
            .or_else(|| NaiveDate::from_ymd_opt(year, first, second));
        return Some(date);
    }
    if let Some(caps) = COMPACT_DATE.captures(trimmed) {
        return Some(ymd(&caps[1], &caps[2], &caps[3]));
    }
    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Canonical decimal rendering, or `None` when the value is not numeric
fn canonical_number(trimmed: &str) -> Option<String> {
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();
    let (body, percent) = match cleaned.strip_suffix('%') {
        Some(body) => (body, true),
        None => (cleaned.as_str(), false),
    };
    if !NUMBER.is_match(body) {
        return None;
    }

    let rendered = if INTEGER.is_match(body) {
        let digits = body.strip_prefix('+').unwrap_or(body);
        BigInt::from_str(digits).ok()?.to_string()
    } else {
        format_float(body.parse::<f64>().ok()?)?
    };

    Some(if percent { format!("{rendered}%") } else { rendered })
}

/// Render a float without exponent, trailing zeros or a trailing `.0`
fn format_float(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 {
        if value.abs() < 1e18 {
            return Some((value as i64).to_string());
        }
        return Some(format!("{value:.0}"));
    }
    let fixed = format!("{value:.prec$}", prec = FLOAT_PRECISION);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    Some(match trimmed {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    })
}

fn parse_boolean(trimmed: &str) -> Option<bool> {
    match trimmed.to_lowercase().as_str() {
        "true" | "yes" | "1" | "t" | "y" => Some(true),
        "false" | "no" | "0" | "f" | "n" => Some(false),
        _ => None,
    }
}

/// Digits-only form of phone numbers, zero-padded codes and similar identifiers
fn canonical_identifier(trimmed: &str) -> Option<String> {
    if !IDENTIFIER.is_match(trimmed) {
        return None;
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let stripped = digits.trim_start_matches('0');
    Some(if stripped.is_empty() { "0".to_string() } else { stripped.to_string() })
}

/// Collapse whitespace runs, trim and lowercase
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
