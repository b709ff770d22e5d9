//! Host process configuration
//!
//! ⚙️ The RPC transport and gateway are out of scope (spec §1), but any
//! process embedding the Coordinator still reads these environment
//! variables to decide where to bind and how long to budget for graceful
//! shutdown, so they're modeled here rather than left implicit.

use std::time::Duration;

/// Environment-variable-sourced host configuration (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub addr: String,
    pub port: u16,
    pub grpc_endpoint: String,
    pub span_exporter: String,
    pub shutdown_timeout: Duration,
    pub google_cloud_project: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            port: 8080,
            grpc_endpoint: "0.0.0.0:9090".to_string(),
            span_exporter: "local".to_string(),
            shutdown_timeout: Duration::from_secs(10),
            google_cloud_project: String::new(),
        }
    }
}

impl EnvConfig {
    /// Reads `ADDR`/`PORT`/`GRPC_ENDPOINT`/`SPAN_EXPORTER`/
    /// `SHUTDOWN_TIMEOUT`/`GOOGLE_CLOUD_PROJECT`, falling back to the
    /// documented defaults (spec §6) for anything unset or malformed.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let addr = std::env::var("ADDR").unwrap_or(defaults.addr);
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let grpc_endpoint = std::env::var("GRPC_ENDPOINT").unwrap_or(defaults.grpc_endpoint);
        let span_exporter = std::env::var("SPAN_EXPORTER").unwrap_or(defaults.span_exporter);
        let shutdown_timeout = std::env::var("SHUTDOWN_TIMEOUT")
            .ok()
            .and_then(|v| parse_duration_secs(&v))
            .unwrap_or(defaults.shutdown_timeout);
        let google_cloud_project = std::env::var("GOOGLE_CLOUD_PROJECT").unwrap_or(defaults.google_cloud_project);

        Self {
            addr,
            port,
            grpc_endpoint,
            span_exporter,
            shutdown_timeout,
            google_cloud_project,
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

/// Parses a Go-style duration string (`"10s"`, `"1m"`) down to whole
/// seconds; anything else (a bare integer, garbage) falls back to treating
/// the value as a plain second count, or is rejected by the caller's
/// `unwrap_or` default.
fn parse_duration_secs(value: &str) -> Option<Duration> {
    if let Some(secs) = value.strip_suffix('s') {
        return secs.parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = value.strip_suffix('m') {
        return mins.parse().ok().map(|m: u64| Duration::from_secs(m * 60));
    }
    value.parse().ok().map(Duration::from_secs)
}
