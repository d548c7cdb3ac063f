/// Help text returned whenever the credentials string matches none of the
/// accepted shapes.
pub const CREDENTIALS_FORMAT_HELP: &str = "Invalid credentials format. Must be:\n\
1. Simple access token string: 'ya29.a0AfH6SMB...'\n\
2. JSON with access_token: {\"access_token\":\"...\"}\n\
3. Full OAuth JSON: {\"access_token\":\"...\",\"refresh_token\":\"...\",\"client_id\":\"...\",\"client_secret\":\"...\"}\n\
4. Service Account JSON: {\"type\":\"service_account\",...}";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{}", CREDENTIALS_FORMAT_HELP)]
    InvalidCredentials,

    #[error("Service Account authentication failed: {0}")]
    ServiceAccountAuth(String),

    #[error("OAuth token authentication failed: {0}")]
    OAuthAuth(String),

    #[error(
        "Failed to refresh expired token: {0}. Please provide a new access token or check your refresh_token, client_id, and client_secret."
    )]
    TokenRefresh(String),

    #[error("{0}")]
    InvalidInput(String),

    /// Non-success response from the Calendar API.
    #[error("Google Calendar API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("token endpoint returned {status}: {message}")]
    TokenEndpoint { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to access file system: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the Calendar API rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status == http::StatusCode::UNAUTHORIZED.as_u16())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
