use crate::{
    Config, GoogleCalendar,
    calendar::Session,
    types::{
        CalendarListEntry, ConferenceData, ConferenceSolutionKey, CreateConferenceRequest, Event,
        EventQuery, EventTime, NewEvent, Reminders, parse_attendees, shift_iso_timestamp,
    },
};
use chrono::{Duration, Utc};
use rmcp::{
    handler::server::{
        ServerHandler,
        tool::{Parameters, ToolRouter},
    },
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

type McpResult<T = (), E = rmcp::ErrorData> = core::result::Result<T, E>;

pub const SERVER_NAME: &str = "Google Calendar MCP";

const INSTRUCTIONS: &str = "A Google Calendar MCP server that provides tools to view, create, update, and manage calendar events. Each tool requires google_calendar_credentials parameter (JSON string) for authentication.";

#[derive(Clone)]
pub struct Server {
    calendar: Arc<GoogleCalendar>,
    tool_router: ToolRouter<Self>,
}

fn primary() -> String {
    "primary".to_string()
}

fn default_max_results() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_reminder() -> Option<i64> {
    Some(15)
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct ListCalendars {
    #[schemars(description = "JSON string containing Google Calendar credentials. Can be a bare access token, OAuth token JSON, or Service Account JSON.")]
    google_calendar_credentials: String,
    #[schemars(description = "Optional email for service account domain-wide delegation.")]
    impersonate_user: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct GetEvents {
    #[schemars(description = "JSON string containing Google Calendar credentials. Can be a bare access token, OAuth token JSON, or Service Account JSON.")]
    google_calendar_credentials: String,
    #[schemars(description = "Calendar ID (default: 'primary')")]
    #[serde(default = "primary")]
    calendar_id: String,
    #[schemars(description = "Maximum number of events to return (default: 10)")]
    #[serde(default = "default_max_results")]
    max_results: i64,
    #[schemars(description = "Start time in ISO format (default: now)")]
    time_min: Option<String>,
    #[schemars(description = "Optional email for service account domain-wide delegation.")]
    impersonate_user: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CreateEvent {
    #[schemars(
        description = "JSON string containing Google Calendar credentials. The organizer is taken from these credentials."
    )]
    google_calendar_credentials: String,
    #[schemars(description = "Event title")]
    summary: String,
    #[schemars(description = "Start time in ISO format (e.g., '2024-01-15T14:00:00')")]
    start_time: String,
    #[schemars(description = "End time in ISO format (defaults to 1 hour after start)")]
    end_time: Option<String>,
    #[schemars(description = "Event description")]
    description: Option<String>,
    #[schemars(description = "Event location")]
    location: Option<String>,
    #[schemars(
        description = "Comma-separated email addresses to invite (e.g., 'user1@example.com,user2@example.com')"
    )]
    attendees: Option<String>,
    #[schemars(description = "Send email notifications to attendees (default: true)")]
    #[serde(default = "default_true")]
    send_notifications: bool,
    #[schemars(description = "Add a Google Meet video conference link (default: false)")]
    #[serde(default)]
    add_google_meet: bool,
    #[schemars(
        description = "Minutes before the event to send email and popup reminders (default: 15, null disables)"
    )]
    #[serde(default = "default_reminder")]
    reminders_minutes: Option<i64>,
    #[schemars(description = "Calendar ID (default: 'primary')")]
    #[serde(default = "primary")]
    calendar_id: String,
    #[schemars(description = "Optional email for service account domain-wide delegation.")]
    impersonate_user: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct CheckAvailability {
    #[schemars(description = "JSON string containing Google Calendar credentials. Can be a bare access token, OAuth token JSON, or Service Account JSON.")]
    google_calendar_credentials: String,
    #[schemars(description = "Start time in ISO format")]
    time_min: String,
    #[schemars(description = "End time in ISO format")]
    time_max: String,
    #[schemars(description = "Calendar ID (default: 'primary')")]
    #[serde(default = "primary")]
    calendar_id: String,
    #[schemars(description = "Optional email for service account domain-wide delegation.")]
    impersonate_user: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct DeleteEvent {
    #[schemars(description = "JSON string containing Google Calendar credentials. Can be a bare access token, OAuth token JSON, or Service Account JSON.")]
    google_calendar_credentials: String,
    #[schemars(description = "Event ID to delete")]
    event_id: String,
    #[schemars(description = "Calendar ID (default: 'primary')")]
    #[serde(default = "primary")]
    calendar_id: String,
    #[schemars(description = "Optional email for service account domain-wide delegation.")]
    impersonate_user: Option<String>,
}

#[tool_router]
impl Server {
    pub fn new(config: &Config) -> crate::Result<Self> {
        let calendar = GoogleCalendar::new(config)?;
        Ok(Self {
            calendar: Arc::new(calendar),
            tool_router: Self::tool_router(),
        })
    }

    #[tool(description = "List all available calendars with their IDs")]
    async fn list_calendars(
        &self,
        Parameters(params): Parameters<ListCalendars>,
    ) -> McpResult<CallToolResult> {
        let result = self.calendars(&params).await;

        match result {
            Ok(calendars) if calendars.is_empty() => Ok(text("No calendars found.")),
            Ok(calendars) => {
                let lines: Vec<_> = calendars
                    .iter()
                    .map(|c| format!("- {} (ID: {})", c.display_name(), c.id))
                    .collect();
                Ok(text(lines.join("\n")))
            }
            Err(err) => Ok(failure("list_calendars", format!("Error listing calendars: {err}"))),
        }
    }

    #[tool(description = "Get upcoming calendar events with their titles and start times")]
    async fn get_events(
        &self,
        Parameters(params): Parameters<GetEvents>,
    ) -> McpResult<CallToolResult> {
        let time_min = params
            .time_min
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string());
        let query = EventQuery {
            calendar_id: params.calendar_id.clone(),
            time_min,
            time_max: None,
            max_results: Some(params.max_results),
        };

        let result = self
            .events(
                &params.google_calendar_credentials,
                params.impersonate_user.as_deref(),
                &query,
            )
            .await;

        match result {
            Ok(events) if events.is_empty() => Ok(text("No upcoming events found.")),
            Ok(events) => {
                let lines: Vec<_> = events
                    .iter()
                    .map(|e| format!("- {} ({})", e.title(), e.start_display()))
                    .collect();
                Ok(text(lines.join("\n")))
            }
            Err(err) => Ok(failure(
                "get_events",
                format!("Error getting events: {err}. Please check your credentials and try again."),
            )),
        }
    }

    #[tool(
        description = "Create a calendar event with optional attendees, notifications, Google Meet link and reminders. The organizer is determined from the credentials; only attendee emails need to be given."
    )]
    async fn create_event(
        &self,
        Parameters(params): Parameters<CreateEvent>,
    ) -> McpResult<CallToolResult> {
        let notify = params.send_notifications
            && params.attendees.as_deref().is_some_and(|a| !a.is_empty());

        let result = self.create(&params).await;

        match result {
            Ok((event, created)) => {
                let mut message = format!(
                    "Event created: {} (ID: {})",
                    created.summary.as_deref().unwrap_or(&event.summary),
                    created.id.as_deref().unwrap_or_default()
                );
                if let Some(link) = created.meet_link().filter(|_| params.add_google_meet) {
                    message.push_str(&format!("\nGoogle Meet link: {link}"));
                }
                if notify {
                    message.push_str(&format!(
                        "\nEmail notifications sent to {} attendee(s)",
                        event.attendee_count()
                    ));
                }
                tracing::info!(calendar_id = %params.calendar_id, "created event");
                Ok(text(message))
            }
            Err(err) => Ok(failure("create_event", format!("Error creating event: {err}"))),
        }
    }

    #[tool(description = "Check calendar availability for a time range, listing busy periods")]
    async fn check_availability(
        &self,
        Parameters(params): Parameters<CheckAvailability>,
    ) -> McpResult<CallToolResult> {
        let query = EventQuery {
            calendar_id: params.calendar_id.clone(),
            time_min: params.time_min.clone(),
            time_max: Some(params.time_max.clone()),
            max_results: None,
        };

        let result = self
            .events(
                &params.google_calendar_credentials,
                params.impersonate_user.as_deref(),
                &query,
            )
            .await;

        let (time_min, time_max) = (&params.time_min, &params.time_max);
        match result {
            Ok(events) if events.is_empty() => {
                Ok(text(format!("Available from {time_min} to {time_max}")))
            }
            Ok(events) => {
                let mut lines = vec![format!("Busy periods from {time_min} to {time_max}:")];
                lines.extend(events.iter().map(|e| {
                    format!("- {}: {} to {}", e.title(), e.start_display(), e.end_display())
                }));
                Ok(text(lines.join("\n")))
            }
            Err(err) => Ok(failure(
                "check_availability",
                format!("Error checking availability: {err}"),
            )),
        }
    }

    #[tool(description = "Delete a calendar event")]
    async fn delete_event(
        &self,
        Parameters(params): Parameters<DeleteEvent>,
    ) -> McpResult<CallToolResult> {
        let result = self.delete(&params).await;

        match result {
            Ok(()) => {
                tracing::info!(
                    calendar_id = %params.calendar_id,
                    event_id = %params.event_id,
                    "deleted event"
                );
                Ok(text(format!("Event {} deleted successfully", params.event_id)))
            }
            Err(err) => Ok(failure("delete_event", format!("Error deleting event: {err}"))),
        }
    }
}

impl Server {
    async fn connect(&self, credentials: &str, impersonate_user: Option<&str>) -> crate::Result<Session> {
        self.calendar.connect(credentials, impersonate_user).await
    }

    async fn calendars(&self, params: &ListCalendars) -> crate::Result<Vec<CalendarListEntry>> {
        let mut session = self
            .connect(
                &params.google_calendar_credentials,
                params.impersonate_user.as_deref(),
            )
            .await?;
        session.list_calendars().await
    }

    async fn events(
        &self,
        credentials: &str,
        impersonate_user: Option<&str>,
        query: &EventQuery,
    ) -> crate::Result<Vec<Event>> {
        let mut session = self.connect(credentials, impersonate_user).await?;
        session.list_events(query).await
    }

    /// Returns the submitted body alongside the event Google created.
    async fn create(&self, params: &CreateEvent) -> crate::Result<(NewEvent, Event)> {
        let mut session = self
            .connect(
                &params.google_calendar_credentials,
                params.impersonate_user.as_deref(),
            )
            .await?;
        let event = build_event(params)?;
        let created = session
            .insert_event(
                &params.calendar_id,
                &event,
                params.send_notifications,
                params.add_google_meet,
            )
            .await?;
        Ok((event, created))
    }

    async fn delete(&self, params: &DeleteEvent) -> crate::Result<()> {
        let mut session = self
            .connect(
                &params.google_calendar_credentials,
                params.impersonate_user.as_deref(),
            )
            .await?;
        session
            .delete_event(&params.calendar_id, &params.event_id)
            .await
    }
}

fn build_event(params: &CreateEvent) -> crate::Result<NewEvent> {
    let end_time = match params.end_time.as_deref().filter(|t| !t.is_empty()) {
        Some(end) => end.to_string(),
        None => shift_iso_timestamp(&params.start_time, Duration::hours(1))?,
    };

    let conference_data = params.add_google_meet.then(|| {
        let now = Utc::now();
        ConferenceData {
            create_request: Some(CreateConferenceRequest {
                request_id: format!("meet-{}.{:06}", now.timestamp(), now.timestamp_subsec_micros()),
                conference_solution_key: ConferenceSolutionKey {
                    kind: "hangoutsMeet".into(),
                },
            }),
            entry_points: Vec::new(),
        }
    });

    Ok(NewEvent {
        summary: params.summary.clone(),
        start: EventTime::utc(&params.start_time),
        end: EventTime::utc(end_time),
        description: params.description.clone().filter(|d| !d.is_empty()),
        location: params.location.clone().filter(|l| !l.is_empty()),
        attendees: params
            .attendees
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(parse_attendees),
        conference_data,
        reminders: params.reminders_minutes.map(Reminders::email_and_popup),
    })
}

fn text(message: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(message.into())])
}

fn failure(tool: &str, message: String) -> CallToolResult {
    tracing::error!(tool, "{message}");
    CallToolResult::error(vec![Content::text(message)])
}

#[tool_handler]
impl ServerHandler for Server {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: SERVER_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(INSTRUCTIONS.into()),
        }
    }
}
