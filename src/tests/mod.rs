//! End-to-end tests for the MCP tools.
//!
//! Google is replaced by an in-process axum server that records every request
//! it receives, and the MCP client talks to the server over a duplex pipe.


use crate::{Config, Server};
use axum::{
    Json, Router,
    body::Bytes,
    http::{HeaderMap, Method, StatusCode, Uri, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use rmcp::{
    RoleClient, ServiceError, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, ListToolsResult},
    service::RunningService,
};
use serde_json::{Value, json};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex},
};
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::CancellationToken;

pub const TOKEN: &str = "ya29.test-token";
pub const FRESH_TOKEN: &str = "ya29.fresh";
pub const MEET_LINK: &str = "https://meet.google.com/abc-defg-hij";

/// A request observed by the mock.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: Value,
    pub form: HashMap<String, String>,
}

#[derive(Default)]
struct MockState {
    requests: Vec<Recorded>,
    calendar_pages: Vec<Vec<Value>>,
    event_pages: Vec<Vec<Value>>,
    accepted_tokens: HashSet<String>,
    token_responses: VecDeque<(StatusCode, Value)>,
}

/// Stand-in for the Calendar API and the OAuth token endpoint.
#[derive(Clone, Default)]
pub struct MockGoogle {
    state: Arc<StdMutex<MockState>>,
}

impl MockGoogle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calendar list pages, linked through `nextPageToken`.
    pub fn with_calendars(self, pages: Vec<Vec<Value>>) -> Self {
        self.state.lock().unwrap().calendar_pages = pages;
        self
    }

    /// Event list pages, linked through `nextPageToken`.
    pub fn with_events(self, pages: Vec<Vec<Value>>) -> Self {
        self.state.lock().unwrap().event_pages = pages;
        self
    }

    /// Rejects any bearer token not listed here with a 401.
    pub fn accept_only(self, tokens: &[&str]) -> Self {
        self.state.lock().unwrap().accepted_tokens =
            tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Queues a response for the next call to the token endpoint. Once the
    /// queue is empty the endpoint grants `FRESH_TOKEN`.
    pub fn with_token_response(self, status: StatusCode, body: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .token_responses
            .push_back((status, body));
        self
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn api_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with("/calendar/v3"))
            .collect()
    }

    pub fn token_requests(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == "/token")
            .collect()
    }

    pub async fn start(self) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();

        let router = Router::new().fallback(handle).with_state(self.clone());
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(shutdown.cancelled_owned())
                    .await
                    .unwrap();
            }
        });

        MockServer {
            google: self,
            addr,
            _shutdown: shutdown.drop_guard(),
        }
    }

    fn record(&self, request: Recorded) {
        self.state.lock().unwrap().requests.push(request);
    }

    fn respond(&self, request: &Recorded) -> Response {
        let mut state = self.state.lock().unwrap();

        if request.path == "/token" {
            let (status, body) = state.token_responses.pop_front().unwrap_or_else(|| {
                (
                    StatusCode::OK,
                    json!({"access_token": FRESH_TOKEN, "expires_in": 3600, "token_type": "Bearer"}),
                )
            });
            return (status, Json(body)).into_response();
        }

        if !state.accepted_tokens.is_empty() {
            let bearer = request
                .authorization
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .unwrap_or_default();
            if !state.accepted_tokens.contains(bearer) {
                return api_error(
                    StatusCode::UNAUTHORIZED,
                    "Request had invalid authentication credentials.",
                );
            }
        }

        let Some(rest) = request.path.strip_prefix("/calendar/v3/") else {
            return StatusCode::NOT_FOUND.into_response();
        };
        let segments: Vec<&str> = rest.split('/').collect();

        match (&request.method, segments.as_slice()) {
            (&Method::GET, ["users", "me", "calendarList"]) => {
                page(&state.calendar_pages, request.query.get("pageToken"))
            }
            (&Method::GET, ["calendars", _, "events"]) => {
                page(&state.event_pages, request.query.get("pageToken"))
            }
            (&Method::POST, ["calendars", _, "events"]) => {
                let mut created = request.body.clone();
                created["id"] = json!("evt-1");
                if created.get("conferenceData").is_some() {
                    created["hangoutLink"] = json!(MEET_LINK);
                }
                Json(created).into_response()
            }
            (&Method::DELETE, ["calendars", _, "events", "missing"]) => {
                api_error(StatusCode::NOT_FOUND, "Not Found")
            }
            (&Method::DELETE, ["calendars", _, "events", _]) => {
                StatusCode::NO_CONTENT.into_response()
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

async fn handle(
    axum::extract::State(google): axum::extract::State<MockGoogle>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query: HashMap<String, String> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let form: HashMap<String, String> = if uri.path() == "/token" {
        url::form_urlencoded::parse(&body).into_owned().collect()
    } else {
        HashMap::new()
    };

    let request = Recorded {
        method,
        path: uri.path().to_string(),
        query,
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        form,
    };

    google.record(request.clone());
    google.respond(&request)
}

fn page(pages: &[Vec<Value>], token: Option<&String>) -> Response {
    let index = token
        .and_then(|t| t.strip_prefix("page-"))
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0);
    let items = pages.get(index).cloned().unwrap_or_default();

    let mut body = json!({"kind": "calendar#list", "items": items});
    if index + 1 < pages.len() {
        body["nextPageToken"] = json!(format!("page-{}", index + 1));
    }
    Json(body).into_response()
}

fn api_error(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": {
            "code": status.as_u16(),
            "message": message,
            "errors": [{"message": message, "domain": "global"}]
        }
    });
    (status, Json(body)).into_response()
}

/// A running mock. Dropping it stops the listener.
pub struct MockServer {
    pub google: MockGoogle,
    addr: SocketAddr,
    _shutdown: tokio_util::sync::DropGuard,
}

impl MockServer {
    pub fn token_uri(&self) -> String {
        format!("http://{}/token", self.addr)
    }

    pub fn config(&self) -> Config {
        Config::new()
            .with_api_base(format!("http://{}/calendar/v3", self.addr))
            .with_token_uri(self.token_uri())
    }
}

/// Manages communication with an MCP server
#[derive(Clone)]
pub struct Test {
    client: Arc<Mutex<RunningService<RoleClient, ()>>>,
}

impl Test {
    /// Starts a server pointed at `mock` and connects a client over a duplex pipe
    pub async fn start(mock: &MockServer) -> io::Result<Self> {
        let (client, stream) = tokio::io::duplex(1 << 17);

        let server = Server::new(&mock.config()).map_err(io::Error::other)?;

        tokio::spawn(async move {
            let server = server.serve(stream).await.unwrap();
            server.waiting().await.unwrap();
        });

        let client = ServiceExt::serve((), client).await.map_err(io::Error::other)?;
        let client = Arc::new(Mutex::new(client));

        Ok(Self { client })
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Vec<(&str, Value)>,
    ) -> Result<CallToolResult, ServiceError> {
        let arguments = arguments
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        self.client
            .lock()
            .await
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments),
            })
            .await
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult, ServiceError> {
        self.client.lock().await.list_tools(Default::default()).await
    }
}

pub trait CallToolResultExt {
    fn text(&self) -> &str;
    fn failed(&self) -> bool;
}

impl CallToolResultExt for CallToolResult {
    fn text(&self) -> &str {
        &self.content[0].as_text().unwrap().text
    }

    fn failed(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}
