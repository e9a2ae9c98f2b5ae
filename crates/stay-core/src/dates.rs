//! # Date/Range Utility
//!
//! Stay dates are civil dates, never instants. Everything here works on
//! `chrono::NaiveDate` so no timezone can shift a night across midnight.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, Result};

const CANONICAL: &str = "%Y-%m-%d";

/// A calendar day in canonical `YYYY-MM-DD` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(|| AppError::InvalidDate(format!("{year:04}-{month:02}-{day:02}")))
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(CANONICAL))
    }
}

impl FromStr for DateKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s)
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        normalize(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parses date-like input into a `DateKey`.
///
/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, naive ISO datetimes and RFC 3339
/// datetimes. For datetimes the calendar date is taken as written; the
/// offset is ignored rather than converted.
pub fn normalize(input: &str) -> Result<DateKey> {
    let raw = input.trim();

    for format in [CANONICAL, "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(DateKey(date));
        }
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(DateKey(instant.naive_local().date()));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(DateKey(naive.date()));
        }
    }

    Err(AppError::InvalidDate(input.to_string()))
}

/// Whole days from `start` to `end`.
pub fn days_between(start: DateKey, end: DateKey) -> Result<i64> {
    if end < start {
        return Err(AppError::InvalidRange(format!("{end} is before {start}")));
    }
    Ok((end.0 - start.0).num_days())
}

pub fn add_days(date: DateKey, n: i64) -> Result<DateKey> {
    Duration::try_days(n)
        .and_then(|delta| date.0.checked_add_signed(delta))
        .map(DateKey)
        .ok_or_else(|| AppError::InvalidDate(format!("{date} + {n} days")))
}

/// One `DateKey` per night, `check_in` inclusive, `check_out` exclusive.
pub fn enumerate_nights(check_in: DateKey, check_out: DateKey) -> Result<Nights> {
    days_between(check_in, check_out)?;
    Ok(Nights {
        next: check_in.0,
        end: check_out.0,
    })
}

/// Finite, restartable (via `Clone`) iterator over the nights of a stay.
#[derive(Debug, Clone)]
pub struct Nights {
    next: NaiveDate,
    end: NaiveDate,
}

impl Iterator for Nights {
    type Item = DateKey;

    fn next(&mut self) -> Option<DateKey> {
        if self.next >= self.end {
            return None;
        }
        let night = self.next;
        self.next = night.succ_opt()?;
        Some(DateKey(night))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next).num_days().max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Nights {}

/// A validated stay: `check_out` strictly after `check_in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StayRange {
    pub check_in: DateKey,
    pub check_out: DateKey,
}

impl StayRange {
    pub fn new(check_in: DateKey, check_out: DateKey) -> Result<Self> {
        if check_out <= check_in {
            return Err(AppError::InvalidRange(format!(
                "check-out {check_out} must be after check-in {check_in}"
            )));
        }
        Ok(Self { check_in, check_out })
    }

    pub fn nights(&self) -> Nights {
        Nights {
            next: self.check_in.0,
            end: self.check_out.0,
        }
    }

    pub fn len(&self) -> i64 {
        (self.check_out.0 - self.check_in.0).num_days()
    }

    /// Never true for a validated range; present for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, day: DateKey) -> bool {
        self.check_in <= day && day < self.check_out
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

impl fmt::Display for StayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.check_in, self.check_out)
    }
}
