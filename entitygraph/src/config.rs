//! Connection configuration (SPEC_FULL §10).
//!
//! Grounded in the teacher's config-loading style (case-insensitive key
//! lookup over a flat map, validated once at construction) generalized from
//! the teacher's Redis connection fields to a GraphQL endpoint's.

use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};

/// Endpoint configuration for a `Transport` implementation to consume.
/// Fields are validated once, at construction, so a misconfigured endpoint
/// fails fast rather than on first request.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub logger: LoggerConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggerConfig {
    #[default]
    Standard,
    Verbose,
    Silent,
}

impl ConnectionConfig {
    /// Builds from a flat string map with case-insensitive keys: `scheme`,
    /// `host`, `port`, `api_key`, `logger` (any of `standard`/`verbose`/`silent`,
    /// case-insensitive).
    pub fn from_map(raw: &HashMap<String, String>) -> GraphResult<Self> {
        let lookup = |key: &str| -> Option<&String> {
            raw.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v)
        };

        let scheme = lookup("scheme").cloned().unwrap_or_else(|| "https".to_string());
        let host = lookup("host")
            .cloned()
            .ok_or_else(|| GraphError::InvalidRequest {
                message: "connection config missing required `host`".to_string(),
            })?;
        let port = match lookup("port") {
            Some(raw_port) => raw_port.parse::<u16>().map_err(|_| GraphError::InvalidRequest {
                message: format!("connection config `port` is not a valid port number: {raw_port}"),
            })?,
            None => if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 },
        };
        let api_key = lookup("api_key").cloned();
        let logger = match lookup("logger").map(|s| s.to_ascii_lowercase()) {
            None => LoggerConfig::default(),
            Some(ref s) if s == "standard" => LoggerConfig::Standard,
            Some(ref s) if s == "verbose" => LoggerConfig::Verbose,
            Some(ref s) if s == "silent" => LoggerConfig::Silent,
            Some(other) => {
                return Err(GraphError::InvalidRequest {
                    message: format!("connection config `logger` must be standard/verbose/silent, got `{other}`"),
                })
            }
        };

        if host.trim().is_empty() {
            return Err(GraphError::InvalidRequest {
                message: "connection config `host` must not be empty".to_string(),
            });
        }
        if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
            return Err(GraphError::InvalidRequest {
                message: format!("connection config `scheme` must be http or https, got `{scheme}`"),
            });
        }

        Ok(ConnectionConfig {
            scheme,
            host,
            port,
            api_key,
            logger,
        })
    }

    pub fn endpoint_url(&self) -> String {
        format!("{}://{}:{}/graphql", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_port_from_scheme() {
        let config = ConnectionConfig::from_map(&map(&[("Host", "stash.local")])).expect("valid");
        assert_eq!(config.port, 443);
        assert_eq!(config.endpoint_url(), "https://stash.local:443/graphql");
    }

    #[test]
    fn case_insensitive_keys() {
        let config = ConnectionConfig::from_map(&map(&[("HOST", "x"), ("PORT", "9999"), ("LOGGER", "Verbose")]))
            .expect("valid");
        assert_eq!(config.port, 9999);
        assert_eq!(config.logger, LoggerConfig::Verbose);
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(ConnectionConfig::from_map(&map(&[("port", "80")])).is_err());
    }

    #[test]
    fn invalid_logger_is_rejected() {
        assert!(ConnectionConfig::from_map(&map(&[("host", "x"), ("logger", "loud")])).is_err());
    }

    #[test]
    fn invalid_scheme_is_rejected() {
        assert!(ConnectionConfig::from_map(&map(&[("host", "x"), ("scheme", "ftp")])).is_err());
    }

    #[test]
    fn http_scheme_is_accepted_and_defaults_port_80() {
        let config = ConnectionConfig::from_map(&map(&[("host", "x"), ("scheme", "HTTP")])).expect("valid");
        assert_eq!(config.port, 80);
    }
}
