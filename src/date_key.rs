use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

const FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Identity of a diary entry: one Gregorian calendar day, always written as
/// zero-padded `YYYY-MM-DD` regardless of locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey(Date);

impl DateKey {
    pub fn from_date(date: Date) -> Self {
        Self(date)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let date = Date::parse(raw.trim(), FORMAT)
            .with_context(|| format!("'{raw}' is not a YYYY-MM-DD date"))?;
        Ok(Self(date))
    }

    /// Today in the local calendar, falling back to UTC when the local
    /// offset cannot be determined.
    pub fn today() -> Self {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self(now.date())
    }

    pub fn date(&self) -> Date {
        self.0
    }
}

impl From<Date> for DateKey {
    fn from(date: Date) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(FORMAT).map_err(|_| fmt::Error)?;
        f.write_str(&formatted)
    }
}

impl FromStr for DateKey {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn formats_zero_padded() {
        assert_eq!(DateKey::from_date(date!(2024 - 03 - 01)).to_string(), "2024-03-01");
        assert_eq!(DateKey::from_date(date!(2024 - 11 - 05)).to_string(), "2024-11-05");
    }

    #[test]
    fn parse_is_strict() -> anyhow::Result<()> {
        assert_eq!(DateKey::parse("2024-01-01")?.date(), date!(2024 - 01 - 01));
        assert!(DateKey::parse("2024-1-1").is_err());
        assert!(DateKey::parse("01/01/2024").is_err());
        assert!(DateKey::parse("2023-02-29").is_err());
        Ok(())
    }

    #[test]
    fn ordering_follows_the_calendar() -> anyhow::Result<()> {
        let mut keys: Vec<DateKey> = ["2024-02-01", "2023-12-31", "2024-01-15"]
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<_>>()?;
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(DateKey::to_string).collect();
        assert_eq!(rendered, ["2023-12-31", "2024-01-15", "2024-02-01"]);
        Ok(())
    }
}
