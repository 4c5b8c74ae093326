//! Conversion between the concentrator's `asctime`-style timestamps and epochs.
//!
//! The status file prints dates like `Thu Oct  3 15:31:08 2013` in the local
//! time of the producing process, so [`to_epoch`] interprets them in the local
//! timezone. Stored epochs are rendered back with [`from_epoch`] in UTC.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::ParseError;

/// `<weekday> <month> <day> <hour>:<minute>:<second> <year>`, day space-padded.
pub const LOCALE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// An epoch paired with the exact text it was parsed from.
///
/// The text is kept verbatim for display and for the flat-file rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleTimestamp {
    pub epoch: i64,
    pub text: String,
}

impl LocaleTimestamp {
    /// Parses `text` with local-timezone interpretation.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Ok(Self {
            epoch: to_epoch(text)?,
            text: text.to_string(),
        })
    }

    /// Builds the pair from a stored epoch, rendering the text in UTC.
    pub fn from_stored_epoch(epoch: i64) -> Self {
        Self {
            epoch,
            text: from_epoch(epoch),
        }
    }
}

/// Converts a locale timestamp to whole-second Unix epoch in the local timezone.
pub fn to_epoch(text: &str) -> Result<i64, ParseError> {
    to_epoch_in(text, &Local)
}

/// Same as [`to_epoch`] against an explicit timezone.
///
/// Ambiguous wall-clock times (DST fall-back) resolve to the earlier instant;
/// times that do not exist in `tz` are rejected.
pub fn to_epoch_in<Tz: TimeZone>(text: &str, tz: &Tz) -> Result<i64, ParseError> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), LOCALE_FORMAT)
        .map_err(|_| ParseError::MalformedTimestamp(text.to_string()))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| ParseError::MalformedTimestamp(text.to_string()))
}

/// Renders an epoch in the locale layout, in UTC.
///
/// Out-of-range epochs fall back to the raw number.
pub fn from_epoch(epoch: i64) -> String {
    match DateTime::<Utc>::from_timestamp(epoch, 0) {
        Some(dt) => dt.format(LOCALE_FORMAT).to_string(),
        None => epoch.to_string(),
    }
}
