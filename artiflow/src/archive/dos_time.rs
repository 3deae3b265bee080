//! Packed 32-bit container timestamps.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! yyyyyyy mmmm ddddd hhhhh MMMMMM sssss
//! year-1980 month day  hour minute second/2
//! ```
//!
//! The packed value carries no time zone. Conversions to and from an
//! absolute instant treat the packed fields as UTC so that a round trip is
//! bit-identical regardless of the process locale.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE_YEAR: i32 = 1980;
const MAX_YEAR: i32 = BASE_YEAR + 127;

/// A packed date and time with two-second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DosTime(u32);

impl DosTime {
    /// 1980-01-01 00:00:00, the earliest representable value.
    pub const MIN: Self = Self(0x0021_0000);

    /// 2107-12-31 23:59:58, the latest representable value.
    pub const MAX: Self = Self::pack(MAX_YEAR, 12, 31, 23, 59, 58);

    /// Wraps a raw packed value.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Builds a value from its two 16-bit halves as stored in zip headers.
    #[must_use]
    pub const fn from_parts(date: u16, time: u16) -> Self {
        Self(((date as u32) << 16) | time as u32)
    }

    /// The raw packed value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The date half.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn date_part(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The time half.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn time_part(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    #[allow(clippy::cast_sign_loss)]
    const fn pack(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        Self(
            (((year - BASE_YEAR) as u32) << 25)
                | (month << 21)
                | (day << 16)
                | (hour << 11)
                | (minute << 5)
                | (second >> 1),
        )
    }

    /// Packs a calendar date and time. Dates before 1980 clamp to
    /// [`DosTime::MIN`], dates after 2107 clamp to [`DosTime::MAX`].
    #[must_use]
    pub fn from_naive(value: NaiveDateTime) -> Self {
        if value.year() < BASE_YEAR {
            return Self::MIN;
        }
        if value.year() > MAX_YEAR {
            return Self::MAX;
        }
        Self::pack(
            value.year(),
            value.month(),
            value.day(),
            value.hour(),
            value.minute(),
            value.second(),
        )
    }

    /// Unpacks the calendar date and time.
    ///
    /// Field combinations that do not form a valid date decode as
    /// [`DosTime::MIN`].
    #[must_use]
    pub fn to_naive(self) -> NaiveDateTime {
        self.try_to_naive()
            .or_else(|| Self::MIN.try_to_naive())
            .unwrap_or_default()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn try_to_naive(self) -> Option<NaiveDateTime> {
        let raw = self.0;
        let year = BASE_YEAR + ((raw >> 25) & 0x7F) as i32;
        let month = (raw >> 21) & 0x0F;
        let day = (raw >> 16) & 0x1F;
        let hour = (raw >> 11) & 0x1F;
        let minute = (raw >> 5) & 0x3F;
        let second = (raw & 0x1F) << 1;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }

    /// Packs an instant given in milliseconds since the Unix epoch.
    #[must_use]
    pub fn from_unix_millis(millis: i64) -> Self {
        DateTime::<Utc>::from_timestamp_millis(millis)
            .map_or(Self::MIN, |instant| Self::from_naive(instant.naive_utc()))
    }

    /// The instant in milliseconds since the Unix epoch.
    #[must_use]
    pub fn to_unix_millis(self) -> i64 {
        self.to_naive().and_utc().timestamp_millis()
    }
}

impl Default for DosTime {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for DosTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_naive().format("%Y-%m-%d %H:%M:%S"))
    }
}
