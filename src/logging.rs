//! Log subscriber setup and access-log filtering.
//!
//! Every log line in vestibule goes through `tracing`. [`init`] installs a
//! `fmt` subscriber whose level comes from [`Settings::log_level`] (or
//! `RUST_LOG`, when set) and whose access-log target is passed through an
//! [`EndpointLogFilter`].
//!
//! `tracing` has no level above ERROR, so `critical` is an ERROR event with a
//! `severity = "critical"` field. At `LOG_LEVEL=critical` a [`SeverityFilter`]
//! drops every event without that field.

use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Metadata};
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::{Context, Filter, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Settings;
use crate::error::Error;

/// Target of the server's per-request access-log lines.
pub const ACCESS_TARGET: &str = "vestibule::access";

/// Maps a level name to a filter. Case-insensitive; unknown names mean `info`.
///
/// | Name | Filter |
/// |---|---|
/// | `critical`, `error` | ERROR |
/// | `warning` | WARN |
/// | `info` | INFO |
/// | `debug` | DEBUG |
/// | `notset` | TRACE (everything) |
pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_ascii_lowercase().as_str() {
        "critical" | "error" => LevelFilter::ERROR,
        "warning" | "warn" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "notset" | "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(settings: &Settings) -> Result<(), Error> {
    let (env_filter, severity) = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => (env_filter, SeverityFilter::any()),
        Err(_) => (
            EnvFilter::default().add_directive(parse_level(&settings.log_level).into()),
            SeverityFilter::for_level(&settings.log_level),
        ),
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_filter(EndpointLogFilter::new(settings.access_log_marker.clone()))
        .with_filter(severity);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt)
        .try_init()?;
    Ok(())
}

// ── EndpointLogFilter ─────────────────────────────────────────────────────────

/// Drops access-log lines that mention a marker path, e.g. the health-check
/// routes an orchestrator polls every few seconds.
///
/// Only lines on [`ACCESS_TARGET`] are considered. The interceptor's own
/// request lines are governed separately by the health-check marker.
#[derive(Clone, Debug)]
pub struct EndpointLogFilter {
    marker: String,
}

impl EndpointLogFilter {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    /// `false` if `line` mentions the marker.
    pub fn allows(&self, line: &str) -> bool {
        !line.contains(self.marker.as_str())
    }
}

impl<S> Filter<S> for EndpointLogFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        if event.metadata().target() != ACCESS_TARGET {
            return true;
        }
        let mut message = MessageVisitor::default();
        event.record(&mut message);
        self.allows(&message.0)
    }
}

// ── SeverityFilter ────────────────────────────────────────────────────────────

/// Field marking an ERROR event as critical.
pub const SEVERITY_FIELD: &str = "severity";

/// Narrows ERROR to critical: when active, only events carrying
/// `severity = "critical"` get through.
#[derive(Clone, Copy, Debug)]
pub struct SeverityFilter {
    critical_only: bool,
}

impl SeverityFilter {
    /// Lets everything through.
    pub fn any() -> Self {
        Self { critical_only: false }
    }

    pub fn critical_only() -> Self {
        Self { critical_only: true }
    }

    /// Active for the level name `critical`, in any case.
    pub fn for_level(name: &str) -> Self {
        Self { critical_only: name.eq_ignore_ascii_case("critical") }
    }
}

impl<S> Filter<S> for SeverityFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        if !self.critical_only {
            return true;
        }
        let mut severity = SeverityVisitor::default();
        event.record(&mut severity);
        severity.0.as_deref() == Some("critical")
    }
}

#[derive(Default)]
struct SeverityVisitor(Option<String>);

impl Visit for SeverityVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == SEVERITY_FIELD {
            self.0 = Some(value.to_owned());
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.0 = value.to_owned();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("CRITICAL"), LevelFilter::ERROR);
        assert_eq!(parse_level("Warning"), LevelFilter::WARN);
        assert_eq!(parse_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_level("notset"), LevelFilter::TRACE);
        assert_eq!(parse_level("verbose"), LevelFilter::INFO);
    }

    #[test]
    fn allows_is_plain_containment() {
        let filter = EndpointLogFilter::new("/api/");
        assert!(!filter.allows(r#"127.0.0.1:5000 - "GET /api/v1/health-check HTTP/1.1" 200"#));
        assert!(filter.allows(r#"127.0.0.1:5000 - "GET /metrics HTTP/1.1" 200"#));
    }

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> Layer<S> for Lines {
        fn on_event(&self, event: &Event<'_>, _cx: Context<'_, S>) {
            let mut message = MessageVisitor::default();
            event.record(&mut message);
            self.0.lock().unwrap().push(message.0);
        }
    }

    #[test]
    fn filter_only_touches_the_access_target() {
        let lines = Lines::default();
        let subscriber = tracing_subscriber::registry()
            .with(lines.clone().with_filter(EndpointLogFilter::new("/api/")));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: ACCESS_TARGET, "peer - \"GET /api/v1/health-check HTTP/1.1\" 200");
            tracing::info!(target: ACCESS_TARGET, "peer - \"GET /static/app.js HTTP/1.1\" 200");
            tracing::info!("\"GET /api/v1/items\" 200 (0.001s)");
        });

        let lines = lines.0.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("/static/app.js"));
        assert!(lines[1].contains("/api/v1/items"));
    }

    #[test]
    fn critical_level_keeps_only_critical_errors() {
        let lines = Lines::default();
        let subscriber = tracing_subscriber::registry()
            .with(lines.clone().with_filter(SeverityFilter::for_level("CRITICAL")));

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("http://localhost:8000/: quantity must be positive");
            tracing::error!(severity = "critical", "database unavailable");
            tracing::warn!("slow request");
        });

        assert_eq!(*lines.0.lock().unwrap(), ["database unavailable"]);
    }

    #[test]
    fn other_levels_keep_every_error() {
        assert!(!SeverityFilter::for_level("error").critical_only);
        assert!(SeverityFilter::critical_only().critical_only);
        assert!(!SeverityFilter::any().critical_only);
    }
}
