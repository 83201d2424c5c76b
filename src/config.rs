//! Client configuration from environment variables.
//!
//! Everything has a default that works against a locally running
//! conversation server; a `.env` file is honored when present.

use std::env;
use std::time::Duration;

use log::warn;

pub const SERVER_URL_ENV: &str = "AVATAR_SERVER_URL";
pub const CONNECT_TIMEOUT_ENV: &str = "AVATAR_CONNECT_TIMEOUT_SECS";
pub const VOICE_OUTPUT_ENV: &str = "AVATAR_VOICE_OUTPUT";

const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Conversation server base URL, without a trailing slash.
    pub server_url: String,
    pub connect_timeout: Duration,
    /// Whether replies are spoken aloud at startup.
    pub voice_output: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            voice_output: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();
        Self {
            server_url: env::var(SERVER_URL_ENV)
                .ok()
                .map(|url| normalize_url(&url))
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.server_url),
            connect_timeout: env_parse(CONNECT_TIMEOUT_ENV)
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            voice_output: env_flag(VOICE_OUTPUT_ENV).unwrap_or(defaults.voice_output),
        }
    }
}

fn normalize_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

/// Parse a numeric env var, warning instead of failing on garbage.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

/// Boolean env var in the `true`/`false` convention, case-insensitive.
fn env_flag(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        other => {
            warn!("ignoring unparseable {name}={other}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests share process state; keep each one to a distinct
    // variable or run with defaults only.

    #[test]
    fn defaults_point_at_local_server() {
        let config = AppConfig::default();
        assert_eq!(config.server_url, "http://localhost:5000");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.voice_output);
    }

    #[test]
    fn server_url_is_trimmed_of_trailing_slash() {
        assert_eq!(
            normalize_url("http://avatar.example:5000/ "),
            "http://avatar.example:5000"
        );
        assert_eq!(normalize_url("http://a//"), "http://a");
    }

    #[test]
    fn flag_parsing_accepts_common_spellings() {
        env::set_var("AVATAR_TEST_FLAG", "TRUE");
        assert_eq!(env_flag("AVATAR_TEST_FLAG"), Some(true));
        env::set_var("AVATAR_TEST_FLAG", "off");
        assert_eq!(env_flag("AVATAR_TEST_FLAG"), Some(false));
        env::set_var("AVATAR_TEST_FLAG", "maybe");
        assert_eq!(env_flag("AVATAR_TEST_FLAG"), None);
        env::remove_var("AVATAR_TEST_FLAG");
    }

    #[test]
    fn numeric_parsing_ignores_garbage() {
        env::set_var("AVATAR_TEST_NUM", "12");
        assert_eq!(env_parse::<u64>("AVATAR_TEST_NUM"), Some(12));
        env::set_var("AVATAR_TEST_NUM", "soon");
        assert_eq!(env_parse::<u64>("AVATAR_TEST_NUM"), None);
        env::remove_var("AVATAR_TEST_NUM");
    }
}
