use crate::{
    Authorizer, Config, Error, Result,
    credentials::Credentials,
    types::{CalendarListEntry, Event, EventQuery, NewEvent, Page},
};
use reqwest::{Method, RequestBuilder, Response};
use serde::{Deserialize, de::DeserializeOwned};
use url::Url;

/// Shared, credential-independent half of the Calendar client.
#[derive(Clone)]
pub struct GoogleCalendar {
    http: reqwest::Client,
    base: Url,
    authorizer: Authorizer,
}

/// A Calendar client bound to one caller's credentials.
pub struct Session {
    calendar: GoogleCalendar,
    credentials: Credentials,
    subject: Option<String>,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl GoogleCalendar {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut base = Url::parse(&config.api_base)?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "GOOGLE_CALENDAR_API_BASE is not a base URL: {}",
                config.api_base
            )));
        }
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop_if_empty();
        }

        let authorizer = Authorizer::new(http.clone(), config);
        Ok(Self {
            http,
            base,
            authorizer,
        })
    }

    /// Parses the raw credentials argument of a tool call and authorizes it.
    pub async fn connect(&self, credentials: &str, impersonate_user: Option<&str>) -> Result<Session> {
        let credentials: Credentials = credentials.parse()?;
        let subject = impersonate_user.filter(|s| !s.is_empty()).map(str::to_string);
        let token = self
            .authorizer
            .authorize(&credentials, subject.as_deref())
            .await?;

        Ok(Session {
            calendar: self.clone(),
            credentials,
            subject,
            token,
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, String)]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        url
    }
}

impl Session {
    pub async fn list_calendars(&mut self) -> Result<Vec<CalendarListEntry>> {
        self.collect_pages(&["users", "me", "calendarList"], Vec::new(), true)
            .await
    }

    /// Lists events ordered by start time. Without `max_results` every page
    /// is fetched.
    pub async fn list_events(&mut self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut params = vec![
            ("timeMin", query.time_min.clone()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(time_max) = &query.time_max {
            params.push(("timeMax", time_max.clone()));
        }
        if let Some(max_results) = query.max_results {
            params.push(("maxResults", max_results.to_string()));
        }

        self.collect_pages(
            &["calendars", query.calendar_id.as_str(), "events"],
            params,
            query.max_results.is_none(),
        )
        .await
    }

    pub async fn insert_event(
        &mut self,
        calendar_id: &str,
        event: &NewEvent,
        send_updates: bool,
        with_conference: bool,
    ) -> Result<Event> {
        let query = [
            ("sendUpdates", if send_updates { "all" } else { "none" }.to_string()),
            ("conferenceDataVersion", u8::from(with_conference).to_string()),
        ];
        let url = self
            .calendar
            .url(&["calendars", calendar_id, "events"], &query);

        let response = self
            .send(|http| http.request(Method::POST, url.clone()).json(event))
            .await?;
        Ok(response.json().await?)
    }

    pub async fn delete_event(&mut self, calendar_id: &str, event_id: &str) -> Result<()> {
        let url = self
            .calendar
            .url(&["calendars", calendar_id, "events", event_id], &[]);
        self.send(|http| http.request(Method::DELETE, url.clone()))
            .await?;
        Ok(())
    }

    async fn collect_pages<T: DeserializeOwned>(
        &mut self,
        segments: &[&str],
        params: Vec<(&str, String)>,
        follow: bool,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = params.clone();
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let url = self.calendar.url(segments, &query);

            let page: Page<T> = self
                .send(|http| http.request(Method::GET, url.clone()))
                .await?
                .json()
                .await?;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) if follow => page_token = Some(token),
                _ => break,
            }
        }

        Ok(items)
    }

    /// Sends an authorized request, renewing the token and retrying once if
    /// the API answers 401.
    async fn send(&mut self, build: impl Fn(&reqwest::Client) -> RequestBuilder) -> Result<Response> {
        let result = self.send_once(&build).await;

        match result {
            Err(err) if err.is_unauthorized() => {
                let renewed = self
                    .calendar
                    .authorizer
                    .reauthorize(&self.credentials, self.subject.as_deref())
                    .await?;
                let Some(token) = renewed else {
                    return Err(err);
                };
                tracing::debug!("retrying request with renewed token");
                self.token = token;
                self.send_once(&build).await
            }
            other => other,
        }
    }

    async fn send_once(&self, build: &impl Fn(&reqwest::Client) -> RequestBuilder) -> Result<Response> {
        let response = build(&self.calendar.http)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|body| body.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .map(str::to_string)
                    .unwrap_or(body)
            });

        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}
