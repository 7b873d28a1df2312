use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub timezone: String,
    pub working_hours: WorkingHours,
    pub deposit_forfeit_on_cancel: bool,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayHours {
    pub day: String,
    pub open: String,
    pub close: String,
}

/// Weekly bookable hours for a business, keyed by weekday. A day may appear
/// more than once (split shifts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHours {
    pub hours: Vec<DayHours>,
}

impl WorkingHours {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let hours: WorkingHours = serde_json::from_str(s)?;
        for entry in &hours.hours {
            parse_weekday(&entry.day)?;
            let open = parse_time(&entry.open)?;
            let close = parse_time(&entry.close)?;
            if open >= close {
                return Err(anyhow::anyhow!(
                    "open must be before close: {} {}-{}",
                    entry.day,
                    entry.open,
                    entry.close
                ));
            }
        }
        Ok(hours)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"hours":[]}"#.to_string())
    }

    /// Working intervals for a calendar day, sorted by opening time.
    pub fn intervals_on(&self, date: NaiveDate) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        let weekday = weekday_key(date);
        let mut intervals: Vec<(NaiveDateTime, NaiveDateTime)> = self
            .hours
            .iter()
            .filter(|entry| entry.day.to_lowercase() == weekday)
            .filter_map(|entry| {
                let open = parse_time(&entry.open).ok()?;
                let close = parse_time(&entry.close).ok()?;
                Some((date.and_time(open), date.and_time(close)))
            })
            .collect();
        intervals.sort_by_key(|(open, _)| *open);
        intervals
    }

    pub fn to_human_readable(&self) -> String {
        if self.hours.is_empty() {
            return String::new();
        }

        let day_order = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

        let mut sorted = self.hours.clone();
        sorted.sort_by(|a, b| {
            let a_idx = day_order
                .iter()
                .position(|d| *d == a.day.to_lowercase())
                .unwrap_or(7);
            let b_idx = day_order
                .iter()
                .position(|d| *d == b.day.to_lowercase())
                .unwrap_or(7);
            a_idx.cmp(&b_idx)
        });

        sorted
            .iter()
            .map(|h| {
                let day = capitalize(&h.day);
                format!("{day}: {}-{}", h.open, h.close)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub fn weekday_key(date: NaiveDate) -> &'static str {
    match date.weekday() {
        chrono::Weekday::Mon => "mon",
        chrono::Weekday::Tue => "tue",
        chrono::Weekday::Wed => "wed",
        chrono::Weekday::Thu => "thu",
        chrono::Weekday::Fri => "fri",
        chrono::Weekday::Sat => "sat",
        chrono::Weekday::Sun => "sun",
    }
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().to_string() + &c.as_str().to_lowercase(),
    }
}

fn parse_weekday(s: &str) -> anyhow::Result<()> {
    match s.to_lowercase().as_str() {
        "mon" | "tue" | "wed" | "thu" | "fri" | "sat" | "sun" => Ok(()),
        _ => Err(anyhow::anyhow!("invalid weekday: {s}")),
    }
}

fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| anyhow::anyhow!("invalid time format: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{"hours":[{"day":"mon","open":"09:00","close":"17:00"},{"day":"tue","open":"09:00","close":"17:00"}]}"#;
        let hours = WorkingHours::from_json(json).unwrap();
        assert_eq!(hours.hours.len(), 2);
        assert_eq!(hours.hours[0].day, "mon");
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(WorkingHours::from_json("not json").is_err());
    }

    #[test]
    fn test_parse_invalid_day() {
        let json = r#"{"hours":[{"day":"xyz","open":"09:00","close":"17:00"}]}"#;
        assert!(WorkingHours::from_json(json).is_err());
    }

    #[test]
    fn test_parse_invalid_time() {
        let json = r#"{"hours":[{"day":"mon","open":"25:00","close":"17:00"}]}"#;
        assert!(WorkingHours::from_json(json).is_err());
    }

    #[test]
    fn test_open_after_close_rejected() {
        let json = r#"{"hours":[{"day":"mon","open":"18:00","close":"09:00"}]}"#;
        assert!(WorkingHours::from_json(json).is_err());
    }

    #[test]
    fn test_intervals_on_matching_day() {
        let json = r#"{"hours":[{"day":"mon","open":"09:00","close":"17:00"}]}"#;
        let hours = WorkingHours::from_json(json).unwrap();
        // 2025-06-16 is a Monday
        let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        let intervals = hours.intervals_on(date);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].0.time(), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(intervals[0].1.time(), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
    }

    #[test]
    fn test_intervals_on_wrong_day() {
        let json = r#"{"hours":[{"day":"mon","open":"09:00","close":"17:00"}]}"#;
        let hours = WorkingHours::from_json(json).unwrap();
        // 2025-06-17 is a Tuesday
        let date = NaiveDate::from_ymd_opt(2025, 6, 17).unwrap();
        assert!(hours.intervals_on(date).is_empty());
    }

    #[test]
    fn test_split_shift_sorted() {
        let json = r#"{"hours":[{"day":"mon","open":"14:00","close":"18:00"},{"day":"mon","open":"09:00","close":"12:00"}]}"#;
        let hours = WorkingHours::from_json(json).unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();
        let intervals = hours.intervals_on(date);
        assert_eq!(intervals.len(), 2);
        assert!(intervals[0].0 < intervals[1].0);
    }

    #[test]
    fn test_to_human_readable() {
        let json = r#"{"hours":[{"day":"fri","open":"10:00","close":"16:00"},{"day":"mon","open":"09:00","close":"17:00"}]}"#;
        let hours = WorkingHours::from_json(json).unwrap();
        assert_eq!(hours.to_human_readable(), "Mon: 09:00-17:00, Fri: 10:00-16:00");
    }
}
