//! Configuration module - environment variable parsing

use std::env;
use std::net::IpAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// UDP port to bind for incoming game server log packets
    pub udp_port: u16,
    /// UDP bind address
    pub udp_bind_addr: IpAddr,
    /// Dev mode: auto-register unknown servers on first sight instead of dropping them
    pub skip_auth: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Whether bot connects/disconnects are included in info-level logs
    pub log_bots: bool,
    /// Maximum accepted UDP datagram size in bytes
    pub max_packet_size: usize,
    /// Per-source rate limit: packets per minute
    pub rate_limit_per_minute: u32,
    /// Per-source burst allowance
    pub rate_limit_burst: u32,
    /// Deadline for graceful shutdown drain, in seconds
    pub shutdown_deadline_secs: u64,

    /// Base URL of the REST-compatible storage backend
    pub storage_url: String,
    /// API key/service credential for the storage backend
    pub storage_api_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            udp_port: parse_env_or("UDP_PORT", 27500)?,
            udp_bind_addr: match env::var("UDP_BIND_ADDR") {
                Ok(s) => s.parse().map_err(|_| ConfigError::InvalidValue("UDP_BIND_ADDR"))?,
                Err(_) => IpAddr::from([0, 0, 0, 0]),
            },

            skip_auth: parse_bool_env("SKIP_AUTH", false)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_bots: parse_bool_env("LOG_BOTS", false)?,
            max_packet_size: parse_env_or("MAX_PACKET_SIZE", 8192usize)?,
            rate_limit_per_minute: parse_env_or("RATE_LIMIT_PER_MINUTE", 2000u32)?,
            rate_limit_burst: parse_env_or("RATE_LIMIT_BURST", 200u32)?,
            shutdown_deadline_secs: parse_env_or("SHUTDOWN_DEADLINE_SECS", 30u64)?,

            storage_url: env::var("STORAGE_URL")
                .map_err(|_| ConfigError::Missing("STORAGE_URL"))?,
            storage_api_key: env::var("STORAGE_API_KEY")
                .map_err(|_| ConfigError::Missing("STORAGE_API_KEY"))?,
        })
    }
}

fn parse_bool_env(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key)),
        },
        Err(_) => Ok(default),
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_or_falls_back_to_default() {
        std::env::remove_var("HLSTATS_TEST_UNSET");
        let v: u32 = parse_env_or("HLSTATS_TEST_UNSET", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn parse_bool_env_accepts_common_spellings() {
        std::env::set_var("HLSTATS_TEST_BOOL", "yes");
        assert!(parse_bool_env("HLSTATS_TEST_BOOL", false).unwrap());
        std::env::set_var("HLSTATS_TEST_BOOL", "0");
        assert!(!parse_bool_env("HLSTATS_TEST_BOOL", true).unwrap());
        std::env::remove_var("HLSTATS_TEST_BOOL");
    }
}
