//! Process settings.
//!
//! Built once at startup, then shared read-only (`Arc<Settings>` or plain
//! clones) with the middleware that needs it. Nothing here is mutated after
//! construction, so concurrent requests read it without synchronisation.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `API_V1_STR` | `/api/v1` | Prefix the built-in routes are mounted under |
//! | `BACKEND_CORS_ORIGINS` | *(none)* | Comma-separated allowed origins, `*` for any |
//! | `LOG_LEVEL` | `INFO` | `critical`, `error`, `warning`, `info`, `debug`, `notset` |
//! | `REQUEST_TIMEOUT` | `5` | Whole-request timeout in seconds, applied by the server |
//! | `REQUEST_LOG_EXCLUDED_ENDPOINTS` | *(none)* | Comma-separated path fragments whose bodies are never captured |
//! | `HEALTH_CHECK_MARKER` | `health-check` | Paths containing this emit no request log line |
//! | `ACCESS_LOG_MARKER` | `/api/` | Access-log lines containing this are suppressed |

use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

/// Settings failed to load.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("REQUEST_TIMEOUT must be a whole number of seconds, got {value:?}")]
    InvalidTimeout {
        value: String,
        #[source]
        source: ParseIntError,
    },
}

/// Path fragments exempt from body capture and body logging.
///
/// Endpoints that receive files or other binary payloads belong here:
/// capturing them for a log line is unsafe and can stall the pipeline.
/// Excluded requests are still timed and their status is still logged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogExclusions(Vec<String>);

impl LogExclusions {
    pub fn new(fragments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(fragments.into_iter().map(Into::into).collect())
    }

    /// Substring containment against the request path.
    pub fn matches(&self, path: &str) -> bool {
        self.0.iter().any(|fragment| path.contains(fragment.as_str()))
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Immutable application settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub api_prefix: String,
    pub cors_origins: Vec<String>,
    pub log_level: String,
    pub request_timeout: Duration,
    pub log_exclusions: LogExclusions,
    pub health_check_marker: String,
    pub access_log_marker: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_prefix: "/api/v1".to_owned(),
            cors_origins: Vec::new(),
            log_level: "INFO".to_owned(),
            request_timeout: Duration::from_secs(5),
            log_exclusions: LogExclusions::default(),
            health_check_marker: "health-check".to_owned(),
            access_log_marker: "/api/".to_owned(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, falling back to defaults for
    /// anything it does not return.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(prefix) = lookup("API_V1_STR") {
            settings.api_prefix = prefix;
        }
        if let Some(origins) = lookup("BACKEND_CORS_ORIGINS") {
            settings.cors_origins = split_list(&origins);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            settings.log_level = level;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT") {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|source| ConfigError::InvalidTimeout { value: value.clone(), source })?;
            settings.request_timeout = Duration::from_secs(secs);
        }
        if let Some(excluded) = lookup("REQUEST_LOG_EXCLUDED_ENDPOINTS") {
            settings.log_exclusions = LogExclusions::new(split_list(&excluded));
        }
        if let Some(marker) = lookup("HEALTH_CHECK_MARKER") {
            settings.health_check_marker = marker;
        }
        if let Some(marker) = lookup("ACCESS_LOG_MARKER") {
            settings.access_log_marker = marker;
        }

        Ok(settings)
    }

    pub fn with_cors_origins(mut self, origins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cors_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_exclusions(mut self, exclusions: LogExclusions) -> Self {
        self.log_exclusions = exclusions;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}
