pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod generator;
pub mod mailer;
pub mod oauth;
pub mod otp;
pub mod payment;
pub mod routes;
pub mod sandbox;
pub mod stress;
pub mod web_server;

use chrono::{DateTime, SecondsFormat, Utc};

pub fn create_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
