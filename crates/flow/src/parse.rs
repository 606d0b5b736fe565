//! Speech parsers for the turn-based flow
//!
//! Speech-recognition strings are messy: digits arrive as words, phone
//! numbers split across turns, and city names carry filler. Parsers here
//! are forgiving and table-driven.

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

/// Spoken digit vocabulary
const DIGIT_WORDS: [(&str, char); 11] = [
    ("zero", '0'),
    ("oh", '0'),
    ("one", '1'),
    ("two", '2'),
    ("three", '3'),
    ("four", '4'),
    ("five", '5'),
    ("six", '6'),
    ("seven", '7'),
    ("eight", '8'),
    ("nine", '9'),
];

/// Result of one phone-parsing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneParse {
    /// Normalized E.164 number
    Complete(String),
    /// Digits so far; keep collecting next turn
    Partial(String),
    /// Nothing usable in the input
    None,
}

/// Extract digits from a speech result, continuing from digits collected on
/// earlier turns. Ten digits complete as NANP E.164; eleven starting with 1
/// likewise.
pub fn parse_phone(speech: &str, carried: Option<&str>) -> PhoneParse {
    let mut digits: String = carried.unwrap_or_default().to_string();

    for token in speech.to_lowercase().split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
            digits.push_str(token);
            continue;
        }
        if let Some((_, digit)) = DIGIT_WORDS.iter().find(|(word, _)| *word == token) {
            digits.push(*digit);
        }
    }

    normalize_digits(&digits)
}

fn normalize_digits(digits: &str) -> PhoneParse {
    match digits.len() {
        0 => PhoneParse::None,
        10 => PhoneParse::Complete(format!("+1{digits}")),
        11 if digits.starts_with('1') => PhoneParse::Complete(format!("+{digits}")),
        n if n > 11 => PhoneParse::None,
        _ => PhoneParse::Partial(digits.to_string()),
    }
}

/// Fixed city → service-location lookup covering the service area
const CITY_LOCATIONS: [(&str, &str); 12] = [
    ("dallas", "DAL"),
    ("irving", "DAL"),
    ("garland", "DAL"),
    ("mesquite", "DAL"),
    ("fort worth", "FTW"),
    ("euless", "FTW"),
    ("arlington", "FTW"),
    ("bedford", "FTW"),
    ("hurst", "FTW"),
    ("plano", "PLA"),
    ("frisco", "PLA"),
    ("richardson", "PLA"),
];

/// Map a spoken city (possibly embedded in a sentence) to a location code
pub fn map_city_to_location(speech: &str) -> Option<&'static str> {
    let lower = speech.to_lowercase();
    CITY_LOCATIONS
        .iter()
        .find(|(city, _)| lower.contains(city))
        .map(|(_, code)| *code)
}

static EMERGENCY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"smell.{0,20}gas",
        r"gas.{0,10}leak",
        r"carbon\s+monoxide",
        r"\bco\s+(alarm|detector)",
        r"(smoke|sparks?|sparking|burning\s+smell)",
        r"\bfire\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("emergency pattern compiles"))
    .collect()
});

/// Emergency keywords short-circuit every state
pub fn contains_emergency(speech: &str) -> bool {
    let lower = speech.to_lowercase();
    EMERGENCY_PATTERNS.iter().any(|p| p.is_match(&lower))
}

/// Parse a spoken date relative to `today`
pub fn parse_spoken_date(speech: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = speech.to_lowercase();

    if let Ok(date) = NaiveDate::parse_from_str(lower.trim(), "%Y-%m-%d") {
        return Some(date);
    }
    if lower.contains("today") {
        return Some(today);
    }
    if lower.contains("tomorrow") {
        return Some(today + Duration::days(1));
    }

    let weekdays = [
        ("monday", Weekday::Mon),
        ("tuesday", Weekday::Tue),
        ("wednesday", Weekday::Wed),
        ("thursday", Weekday::Thu),
        ("friday", Weekday::Fri),
        ("saturday", Weekday::Sat),
        ("sunday", Weekday::Sun),
    ];
    for (name, weekday) in weekdays {
        if lower.contains(name) {
            let mut date = today + Duration::days(1);
            while date.weekday() != weekday {
                date += Duration::days(1);
            }
            return Some(date);
        }
    }
    None
}

/// Parse a spoken time of day
pub fn parse_spoken_time(speech: &str) -> Option<NaiveTime> {
    let lower = speech.to_lowercase();

    static CLOCK: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?").unwrap());
    if let Some(caps) = CLOCK.captures(&lower) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let meridiem = caps.get(3).map(|m| m.as_str());
        let hour = match meridiem {
            Some(m) if m.starts_with('p') && hour < 12 => hour + 12,
            Some(m) if m.starts_with('a') && hour == 12 => 0,
            None if hour < 8 => hour + 12, // "at 2" during business hours
            _ => hour,
        };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    for word in lower.split_whitespace() {
        if let Some((_, digit)) = DIGIT_WORDS.iter().find(|(w, _)| *w == word) {
            let hour = digit.to_digit(10)?;
            let hour = if lower.contains("morning") || hour >= 8 {
                hour
            } else {
                hour + 12
            };
            return NaiveTime::from_hms_opt(hour, 0, 0);
        }
    }

    if lower.contains("morning") {
        return NaiveTime::from_hms_opt(9, 0, 0);
    }
    if lower.contains("noon") || lower.contains("midday") {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    if lower.contains("afternoon") {
        return NaiveTime::from_hms_opt(14, 0, 0);
    }
    if lower.contains("evening") {
        return NaiveTime::from_hms_opt(17, 0, 0);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spoken_digits_complete_to_e164() {
        let result = parse_phone(
            "five five five one two three four five six seven",
            None,
        );
        assert_eq!(result, PhoneParse::Complete("+15551234567".to_string()));
    }

    #[test]
    fn numeric_digits_and_eleven_digit_forms_work() {
        assert_eq!(
            parse_phone("555 123 4567", None),
            PhoneParse::Complete("+15551234567".to_string())
        );
        assert_eq!(
            parse_phone("1 555 123 4567", None),
            PhoneParse::Complete("+15551234567".to_string())
        );
    }

    #[test]
    fn partial_digits_carry_across_turns() {
        let first = parse_phone("five five five", None);
        let PhoneParse::Partial(partial) = first else {
            panic!("expected partial");
        };
        assert_eq!(partial, "555");

        let second = parse_phone("one two three four five six seven", Some(&partial));
        assert_eq!(second, PhoneParse::Complete("+15551234567".to_string()));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(parse_phone("I don't know", None), PhoneParse::None);
    }

    #[test]
    fn euless_maps_to_ftw() {
        assert_eq!(map_city_to_location("Euless"), Some("FTW"));
        assert_eq!(map_city_to_location("I live in euless texas"), Some("FTW"));
        assert_eq!(map_city_to_location("dallas please"), Some("DAL"));
        assert_eq!(map_city_to_location("timbuktu"), None);
    }

    #[test]
    fn emergency_keywords_trigger() {
        assert!(contains_emergency("I smell gas in the kitchen"));
        assert!(contains_emergency("the carbon monoxide alarm went off"));
        assert!(contains_emergency("something is sparking"));
        assert!(!contains_emergency("my AC is just slow"));
    }

    #[test]
    fn spoken_dates_resolve_forward() {
        let today = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap(); // Monday
        assert_eq!(
            parse_spoken_date("tomorrow", today),
            Some(NaiveDate::from_ymd_opt(2025, 2, 11).unwrap())
        );
        assert_eq!(
            parse_spoken_date("next friday works", today),
            Some(NaiveDate::from_ymd_opt(2025, 2, 14).unwrap())
        );
        assert_eq!(
            parse_spoken_date("2025-03-01", today),
            Some(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
        );
        assert_eq!(parse_spoken_date("whenever", today), None);
    }

    #[test]
    fn spoken_times_resolve() {
        assert_eq!(
            parse_spoken_time("9 am"),
            Some(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
        );
        assert_eq!(
            parse_spoken_time("2:30 pm"),
            Some(NaiveTime::from_hms_opt(14, 30, 0).unwrap())
        );
        assert_eq!(
            parse_spoken_time("in the morning"),
            Some(NaiveTime::from_hms_opt(9, 0, 0).unwrap())
        );
        assert_eq!(
            parse_spoken_time("afternoon is fine"),
            Some(NaiveTime::from_hms_opt(14, 0, 0).unwrap())
        );
    }
}
