use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,wx=debug";

/// Log line format, chosen by `WX_LOG_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    /// `json` selects JSON lines; anything else is human-readable
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Human,
        }
    }
}

/// Initialize logging for a process
/// - RUST_LOG respected; default to "info,wx=debug"
/// - WX_LOG_FORMAT=json for JSON lines, human-readable otherwise
pub fn init(service_name: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let format = LogFormat::from_env_value(std::env::var("WX_LOG_FORMAT").ok().as_deref());

    let registry = tracing_subscriber::registry().with(EnvFilter::new(env_filter));
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Human => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    tracing::info!(service = %service_name, ?format, "Logging initialized");
}
