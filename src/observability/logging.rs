//! Log subscriber setup and span macros
//!
//! The bridge logs through `tracing`. [`LogSettings`] gathers the knobs from
//! the environment and the command line:
//!
//! - `LOG_LEVEL`: `ERROR`..`TRACE`, default `INFO`; each `-v` raises it a step
//! - `LOG_FORMAT`: `json` (default), `pretty` or `compact`
//! - `LOG_SPANS`: `true` to log span open and close events
//! - `RUST_LOG`: full filter override
//!
//! Radio, MQTT and HTTP internals stay at warn unless `RUST_LOG` says
//! otherwise; the bridge's own decisions are what the logs are for.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, for log shipping
    Json,
    /// Multi-line with colors
    Pretty,
    /// Single line with colors
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

const QUIET_DEPENDENCIES: [&str; 5] = [
    "rumqttc=warn",
    "hyper=warn",
    "reqwest=warn",
    "rustls=warn",
    "tokio=warn",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    pub include_spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_spans: false,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            level: lookup("LOG_LEVEL")
                .and_then(|level| level.trim().parse().ok())
                .unwrap_or(defaults.level),
            format: lookup("LOG_FORMAT")
                .map(|format| LogFormat::parse(&format))
                .unwrap_or(defaults.format),
            include_spans: lookup("LOG_SPANS")
                .is_some_and(|spans| spans.trim().eq_ignore_ascii_case("true")),
        }
    }

    /// Raise the level one step per `-v`, never lowering it
    pub fn with_verbosity(mut self, verbose: u8) -> Self {
        let requested = match verbose {
            0 => return self,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // `Level` orders TRACE as the greatest
        if requested > self.level {
            self.level = requested;
        }
        self
    }

    fn filter(&self) -> EnvFilter {
        QUIET_DEPENDENCIES
            .iter()
            .filter_map(|directive| directive.parse().ok())
            .fold(EnvFilter::new(self.level.to_string()), EnvFilter::add_directive)
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, replaces the
/// level and dependency filters.
pub fn init_logging(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| settings.filter());

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match settings.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(settings.span_events())
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(settings.span_events())
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_span_events(settings.span_events())
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
}

/// Span for work on one valve: `device_span!(name, "reading")`
#[macro_export]
macro_rules! device_span {
    ($device:expr, $operation:expr $(, $($field:tt)*)?) => {
        tracing::info_span!("device", device = %$device, operation = $operation $(, $($field)*)?)
    };
}

/// Span for a broker session operation: `session_span!("connect", attempt)`
#[macro_export]
macro_rules! session_span {
    ($operation:expr $(, $($field:tt)*)?) => {
        tracing::info_span!("mqtt_session", operation = $operation $(, $($field)*)?)
    };
}

pub use {device_span, session_span};
