//! Google Calendar v3 resources, trimmed to the fields the tools read or
//! write.

use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListEntry {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
}

impl CalendarListEntry {
    pub fn display_name(&self) -> &str {
        self.summary.as_deref().unwrap_or(&self.id)
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
    #[serde(default)]
    pub hangout_link: Option<String>,
    #[serde(default)]
    pub conference_data: Option<ConferenceData>,
}

impl Event {
    pub fn title(&self) -> &str {
        self.summary.as_deref().unwrap_or("No Title")
    }

    pub fn start_display(&self) -> &str {
        self.start.as_ref().map(EventTime::display).unwrap_or_default()
    }

    pub fn end_display(&self) -> &str {
        self.end.as_ref().map(EventTime::display).unwrap_or_default()
    }

    /// Link to the Meet conference attached to this event, if any.
    pub fn meet_link(&self) -> Option<&str> {
        self.hangout_link.as_deref().or_else(|| {
            self.conference_data
                .as_ref()?
                .entry_points
                .iter()
                .find(|entry| entry.entry_point_type.as_deref() == Some("video"))
                .and_then(|entry| entry.uri.as_deref())
        })
    }
}

/// Either a timed (`dateTime`) or all-day (`date`) boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn utc(date_time: impl Into<String>) -> Self {
        Self {
            date_time: Some(date_time.into()),
            date: None,
            time_zone: Some("UTC".into()),
        }
    }

    pub fn display(&self) -> &str {
        self.date_time
            .as_deref()
            .or(self.date.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferenceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_request: Option<CreateConferenceRequest>,
    #[serde(default, skip_serializing)]
    pub entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConferenceRequest {
    pub request_id: String,
    pub conference_solution_key: ConferenceSolutionKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConferenceSolutionKey {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    #[serde(default)]
    pub entry_point_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// Request body for `events.insert`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendees: Option<Vec<Attendee>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conference_data: Option<ConferenceData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
}

impl NewEvent {
    pub fn attendee_count(&self) -> usize {
        self.attendees.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attendee {
    pub email: String,
}

/// Splits a comma-separated address list, dropping blanks.
pub fn parse_attendees(raw: &str) -> Vec<Attendee> {
    raw.split(',')
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(|email| Attendee {
            email: email.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    pub overrides: Vec<ReminderOverride>,
}

impl Reminders {
    /// Email and popup reminders, both `minutes` before the start.
    pub fn email_and_popup(minutes: i64) -> Self {
        Self {
            use_default: false,
            overrides: ["email", "popup"]
                .into_iter()
                .map(|method| ReminderOverride {
                    method: method.to_string(),
                    minutes,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderOverride {
    pub method: String,
    pub minutes: i64,
}

/// Parameters for `events.list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub calendar_id: String,
    pub time_min: String,
    pub time_max: Option<String>,
    pub max_results: Option<i64>,
}

/// Adds `delta` to an ISO-8601 timestamp and renders it back in the same
/// style: offsets stay offsets, naive stays naive, and a bare date becomes
/// a naive date-time at midnight.
pub fn shift_iso_timestamp(raw: &str, delta: Duration) -> Result<String> {
    let trimmed = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        let shifted = parsed + delta;
        return Ok(shifted.format(iso_format(shifted.nanosecond(), true)).to_string());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            let shifted = parsed + delta;
            return Ok(shifted.format(iso_format(shifted.nanosecond(), false)).to_string());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        return Ok((midnight + delta).format("%Y-%m-%dT%H:%M:%S").to_string());
    }

    Err(Error::InvalidInput(format!("Invalid isoformat string: '{raw}'")))
}

/// Fractions always render as microseconds and whole seconds omit them.
fn iso_format(nanosecond: u32, with_offset: bool) -> &'static str {
    match (nanosecond < 1_000, with_offset) {
        (true, false) => "%Y-%m-%dT%H:%M:%S",
        (false, false) => "%Y-%m-%dT%H:%M:%S%.6f",
        (true, true) => "%Y-%m-%dT%H:%M:%S%:z",
        (false, true) => "%Y-%m-%dT%H:%M:%S%.6f%:z",
    }
}
