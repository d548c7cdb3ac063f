use crate::{Error, Result};
use std::{str::FromStr, time::Duration};

/// OAuth scope requested for every credential type.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Streamable HTTP on `host:port` + `path`
    Http,
    /// JSON-RPC over stdin/stdout
    Stdio,
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "streamable-http" => Ok(Self::Http),
            "stdio" => Ok(Self::Stdio),
            other => Err(Error::Config(format!("unknown MCP_TRANSPORT {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to
    pub host: String,

    /// Port the HTTP listener binds to
    pub port: u16,

    /// Mount path of the MCP endpoint
    pub path: String,

    pub transport: Transport,

    /// Root of the Calendar v3 REST API
    pub api_base: String,

    /// Token endpoint used when credentials don't name one
    pub token_uri: String,

    /// Timeout applied to every outgoing HTTP request
    pub request_timeout: Duration,

    /// Maximum number of cached access tokens
    pub token_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            path: "/mcp".to_string(),
            transport: Transport::Http,
            api_base: DEFAULT_API_BASE.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            request_timeout: Duration::from_secs(30),
            token_cache_size: 256,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup, falling back
    /// to the defaults for anything unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse_var("PORT", &port)?;
        }
        if let Some(path) = lookup("MCP_PATH") {
            config = config.with_path(path);
        }
        if let Some(transport) = lookup("MCP_TRANSPORT") {
            config.transport = transport.parse()?;
        }
        if let Some(base) = lookup("GOOGLE_CALENDAR_API_BASE") {
            config.api_base = base;
        }
        if let Some(uri) = lookup("GOOGLE_TOKEN_URI") {
            config.token_uri = uri;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", &secs)?);
        }
        if let Some(size) = lookup("TOKEN_CACHE_SIZE") {
            config.token_cache_size = parse_var("TOKEN_CACHE_SIZE", &size)?;
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_token_uri(mut self, uri: impl Into<String>) -> Self {
        self.token_uri = uri.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_token_cache_size(mut self, size: usize) -> Self {
        self.token_cache_size = size;
        self
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a number, got {value:?}")))
}
