//! Game dates
//!
//! The server counts dates as days since 0000-01-01 on the proleptic
//! Gregorian calendar.

use std::fmt;

use serde::{Serialize, Serializer};

/// Days between 0000-01-01 and 1970-01-01
const DAYS_TO_UNIX_EPOCH: i64 = 719_528;

/// A date as carried on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameDate(pub u32);

impl GameDate {
    pub fn from_days(days: u32) -> Self {
        Self(days)
    }

    pub fn days(&self) -> u32 {
        self.0
    }

    /// Convert to a `(year, month, day)` triple
    pub fn ymd(&self) -> (i64, u32, u32) {
        // days-from-civil inverse, shifted so eras start on March 1st
        let z = self.0 as i64 - DAYS_TO_UNIX_EPOCH + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
        let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
        (year, month, day)
    }

    pub fn year(&self) -> i64 {
        self.ymd().0
    }
}

impl fmt::Display for GameDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (year, month, day) = self.ymd();
        write!(f, "{:04}-{:02}-{:02}", year, month, day)
    }
}

impl Serialize for GameDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch() {
        let date = GameDate::from_days(719_528);
        assert_eq!(date.ymd(), (1970, 1, 1));
        assert_eq!(date.to_string(), "1970-01-01");
    }

    #[test]
    fn test_year_zero() {
        assert_eq!(GameDate(0).ymd(), (0, 1, 1));
        // year 0 is a leap year
        assert_eq!(GameDate(59).ymd(), (0, 2, 29));
        assert_eq!(GameDate(366).ymd(), (1, 1, 1));
    }

    #[test]
    fn test_typical_start_date() {
        // 1950-01-01, the default scenario start
        let date = GameDate(719_528 - 7_305);
        assert_eq!(date.to_string(), "1950-01-01");
        assert_eq!(date.year(), 1950);
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&GameDate(719_528)).unwrap();
        assert_eq!(json, "\"1970-01-01\"");
    }
}
