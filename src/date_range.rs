use crate::error::Error;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use std::fmt;

/// Named ranges understood by the insights endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    /// All available history.
    Maximum,
}

impl DatePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePreset::Maximum => "maximum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateRange {
    /// Inclusive on both ends.
    Between { since: NaiveDate, until: NaiveDate },
    Preset(DatePreset),
}

impl DateRange {
    pub fn between(since: NaiveDate, until: NaiveDate) -> Result<Self, Error> {
        if since > until {
            return Err(Error::StartDateAfterEndDate {
                start_date: since.to_string(),
                end_date: until.to_string(),
            });
        }

        Ok(DateRange::Between { since, until })
    }

    /// Window ending yesterday and starting `days` before that.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let until = today.pred_opt().unwrap_or(today);
        let since = until
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);

        DateRange::Between { since, until }
    }

    pub fn all_history() -> Self {
        DateRange::Preset(DatePreset::Maximum)
    }

    /// Query parameters for the insights endpoint.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            DateRange::Between { since, until } => {
                let time_range = serde_json::json!({
                    "since": format_date(since),
                    "until": format_date(until),
                });
                vec![("time_range", time_range.to_string())]
            }
            DateRange::Preset(preset) => vec![("date_preset", preset.as_str().to_string())],
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateRange::Between { since, until } => {
                write!(f, "{} to {}", format_date(since), format_date(until))
            }
            DateRange::Preset(preset) => write!(f, "preset {}", preset.as_str()),
        }
    }
}

impl Serialize for DateRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            DateRange::Between { since, until } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("SINCE_DATE", &format_date(since))?;
                map.serialize_entry("UNTIL_DATE", &format_date(until))?;
                map.end()
            }
            DateRange::Preset(preset) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("DATE_PRESET", preset.as_str())?;
                map.end()
            }
        }
    }
}

/// Picks the range for a run from the optional selectors a caller supplied.
///
/// Explicit dates win, then the preset, then a `last_days` window; with no
/// selector the window is `default_days` long.
pub fn resolve_date_range(
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
    last_days: Option<u32>,
    all_history: bool,
    today: NaiveDate,
    default_days: u32,
) -> Result<DateRange, Error> {
    match (since, until) {
        (Some(since), Some(until)) => DateRange::between(since, until),
        (None, None) if all_history => Ok(DateRange::all_history()),
        (None, None) => Ok(DateRange::last_days(
            today,
            last_days.unwrap_or(default_days),
        )),
        _ => Err(Error::IncompleteDateRange),
    }
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses a strict `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, Error> {
    let invalid = || Error::InvalidDate {
        date: s.to_string(),
    };

    let parts = s
        .split('-')
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    match parts.as_slice() {
        &[year, month, day] if s.len() == 10 && month <= 12 && day <= 31 => {
            NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    #[test]
    fn test_between_rejects_reversed_range() {
        let result = DateRange::between(date("2025-10-19"), date("2025-10-01"));
        assert!(matches!(
            result.unwrap_err(),
            Error::StartDateAfterEndDate { start_date, end_date }
                if start_date == "2025-10-19" && end_date == "2025-10-01"
        ));
    }

    #[test]
    fn test_between_accepts_single_day() {
        let day = date("2025-10-01");
        assert!(DateRange::between(day, day).is_ok());
    }

    #[test]
    fn test_last_days_ends_yesterday() {
        let range = DateRange::last_days(date("2025-10-20"), 2);
        assert_eq!(
            range,
            DateRange::Between {
                since: date("2025-10-17"),
                until: date("2025-10-19"),
            }
        );
    }

    #[test]
    fn test_time_range_query_pair() {
        let range = DateRange::between(date("2025-10-01"), date("2025-10-19")).unwrap();
        let pairs = range.to_query_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "time_range");

        let value: serde_json::Value = serde_json::from_str(&pairs[0].1).unwrap();
        assert_eq!(value["since"], "2025-10-01");
        assert_eq!(value["until"], "2025-10-19");
    }

    #[test]
    fn test_preset_query_pair() {
        let pairs = DateRange::all_history().to_query_pairs();
        assert_eq!(pairs, vec![("date_preset", "maximum".to_string())]);
    }

    #[test]
    fn test_serializes_like_response_payload() {
        let range = DateRange::between(date("2025-10-01"), date("2025-10-19")).unwrap();
        let json = serde_json::to_value(&range).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "SINCE_DATE": "2025-10-01", "UNTIL_DATE": "2025-10-19" })
        );

        let json = serde_json::to_value(DateRange::all_history()).unwrap();
        assert_eq!(json, serde_json::json!({ "DATE_PRESET": "maximum" }));
    }

    #[test]
    fn test_resolve_prefers_explicit_dates() {
        let range = resolve_date_range(
            Some(date("2025-10-01")),
            Some(date("2025-10-19")),
            Some(7),
            true,
            date("2025-10-20"),
            2,
        )
        .unwrap();
        assert_eq!(
            range,
            DateRange::Between {
                since: date("2025-10-01"),
                until: date("2025-10-19"),
            }
        );
    }

    #[test]
    fn test_resolve_defaults() {
        let today = date("2025-10-20");
        assert_eq!(
            resolve_date_range(None, None, None, true, today, 2).unwrap(),
            DateRange::all_history()
        );
        assert_eq!(
            resolve_date_range(None, None, Some(6), false, today, 2).unwrap(),
            DateRange::last_days(today, 6)
        );
        assert_eq!(
            resolve_date_range(None, None, None, false, today, 2).unwrap(),
            DateRange::last_days(today, 2)
        );
    }

    #[test]
    fn test_resolve_rejects_half_range() {
        let result = resolve_date_range(
            Some(date("2025-10-01")),
            None,
            None,
            false,
            date("2025-10-20"),
            2,
        );
        assert!(matches!(result.unwrap_err(), Error::IncompleteDateRange));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2023-10-01").unwrap(), date("2023-10-01"));
    }

    #[test]
    fn test_parse_date_rejects_bad_input() {
        for input in ["2023-13-01", "2023-10-32", "2023-02-30", "yesterday", "2023-1-1"] {
            match parse_date(input) {
                Err(Error::InvalidDate { date: d }) => assert_eq!(d, input),
                other => panic!("Expected InvalidDate error for {input}, got {other:?}"),
            }
        }
    }
}
