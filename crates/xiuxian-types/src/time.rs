//! The world clock: a monotonic month counter.
//!
//! [`MonthStamp`] is the single temporal currency of the simulation. One
//! tick of the engine advances the stamp by one month. Year and month are
//! always derived from the counter -- never stored independently.
//!
//! All temporal derivations use checked or saturating arithmetic (no
//! silent overflow).

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Number of months in one year.
pub const MONTHS_PER_YEAR: u64 = 12;

/// A calendar month, derived from a [`MonthStamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum Month {
    /// Month 1. January-only phases (derived-relation refresh, dead
    /// cleanup, phenomenon rotation, rankings) key off this variant.
    January,
    /// Month 2.
    February,
    /// Month 3.
    March,
    /// Month 4.
    April,
    /// Month 5.
    May,
    /// Month 6.
    June,
    /// Month 7.
    July,
    /// Month 8.
    August,
    /// Month 9.
    September,
    /// Month 10.
    October,
    /// Month 11.
    November,
    /// Month 12.
    December,
}

impl Month {
    /// Return the month number in 1..=12.
    pub const fn number(self) -> u64 {
        match self {
            Self::January => 1,
            Self::February => 2,
            Self::March => 3,
            Self::April => 4,
            Self::May => 5,
            Self::June => 6,
            Self::July => 7,
            Self::August => 8,
            Self::September => 9,
            Self::October => 10,
            Self::November => 11,
            Self::December => 12,
        }
    }

    /// Map a zero-based month offset (`stamp % 12`) to a month.
    const fn from_offset(offset: u64) -> Self {
        match offset {
            0 => Self::January,
            1 => Self::February,
            2 => Self::March,
            3 => Self::April,
            4 => Self::May,
            5 => Self::June,
            6 => Self::July,
            7 => Self::August,
            8 => Self::September,
            9 => Self::October,
            10 => Self::November,
            // 11 is the only remaining case (offset is taken mod 12).
            _ => Self::December,
        }
    }
}

/// A count of months since the world epoch.
///
/// Totally ordered; a fresh world starts in January of its configured
/// start year. The stamp only ever moves forward: the simulator advances
/// it once per completed tick.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export, export_to = "bindings/")]
#[serde(transparent)]
pub struct MonthStamp(pub u64);

impl MonthStamp {
    /// Build a stamp from a year and a month.
    pub const fn from_year_month(year: u64, month: Month) -> Self {
        // number() is in 1..=12, so the subtraction cannot underflow.
        Self(year * MONTHS_PER_YEAR + (month.number() - 1))
    }

    /// The year this stamp falls in.
    pub const fn year(self) -> u64 {
        self.0 / MONTHS_PER_YEAR
    }

    /// The calendar month this stamp falls in.
    pub const fn month(self) -> Month {
        Month::from_offset(self.0 % MONTHS_PER_YEAR)
    }

    /// The month number in 1..=12.
    pub const fn month_number(self) -> u64 {
        (self.0 % MONTHS_PER_YEAR) + 1
    }

    /// Advance by one month, saturating at the counter maximum.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Add a number of months, saturating at the counter maximum.
    pub const fn plus_months(self, months: u64) -> Self {
        Self(self.0.saturating_add(months))
    }

    /// Add a number of years, saturating at the counter maximum.
    pub const fn plus_years(self, years: u64) -> Self {
        self.plus_months(years.saturating_mul(MONTHS_PER_YEAR))
    }

    /// Whole months elapsed since an earlier stamp (0 if `earlier` is
    /// in the future).
    pub const fn months_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Whole years elapsed since an earlier stamp.
    pub const fn years_since(self, earlier: Self) -> u64 {
        self.months_since(earlier) / MONTHS_PER_YEAR
    }
}

impl core::fmt::Display for MonthStamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "year {} month {}", self.year(), self.month_number())
    }
}

impl From<u64> for MonthStamp {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stamp_decomposes_into_year_and_month() {
        let stamp = MonthStamp(0);
        assert_eq!(stamp.year(), 0);
        assert_eq!(stamp.month(), Month::January);
        assert_eq!(stamp.month_number(), 1);

        let stamp = MonthStamp(13);
        assert_eq!(stamp.year(), 1);
        assert_eq!(stamp.month(), Month::February);
        assert_eq!(stamp.month_number(), 2);
    }

    #[test]
    fn from_year_month_roundtrips() {
        let stamp = MonthStamp::from_year_month(100, Month::July);
        assert_eq!(stamp.year(), 100);
        assert_eq!(stamp.month(), Month::July);
    }

    #[test]
    fn next_wraps_year_at_december() {
        let dec = MonthStamp::from_year_month(5, Month::December);
        let jan = dec.next();
        assert_eq!(jan.year(), 6);
        assert_eq!(jan.month(), Month::January);
    }

    #[test]
    fn months_since_saturates() {
        let early = MonthStamp(10);
        let late = MonthStamp(34);
        assert_eq!(late.months_since(early), 24);
        assert_eq!(late.years_since(early), 2);
        assert_eq!(early.months_since(late), 0);
    }

    #[test]
    fn serde_is_a_plain_integer() {
        let stamp = MonthStamp(1234);
        let json = serde_json::to_string(&stamp).unwrap();
        assert_eq!(json, "1234");
        let back: MonthStamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stamp);
    }

    #[test]
    fn ordering_is_total() {
        assert!(MonthStamp(5) < MonthStamp(6));
        assert_eq!(MonthStamp(7).max(MonthStamp(3)), MonthStamp(7));
    }
}
