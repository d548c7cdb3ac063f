mod auth;
mod cache;
pub mod calendar;
mod config;
pub mod credentials;
mod error;
mod server;
#[cfg(test)]
mod tests;
pub mod transport;
pub mod types;

pub use auth::Authorizer;
pub use cache::Cache;
pub use calendar::{GoogleCalendar, Session};
pub use config::{CALENDAR_SCOPE, Config, Transport};
pub use error::{Error, Result};
pub use server::{SERVER_NAME, Server};
