use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// `AMORA_LOG_FORMAT` wins; otherwise `AMORA_ENV=production` selects JSON.
    pub fn resolve(log_format: Option<&str>, env: Option<&str>) -> Self {
        match log_format.map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Self::Json,
            Some("pretty") => Self::Pretty,
            _ if env == Some("production") => Self::Json,
            _ => Self::Pretty,
        }
    }

    fn from_env() -> Self {
        let log_format = std::env::var("AMORA_LOG_FORMAT").ok();
        let env = std::env::var("AMORA_ENV").ok();
        Self::resolve(log_format.as_deref(), env.as_deref())
    }
}

/// Directives used when `RUST_LOG` is unset: the service and the core at
/// debug, everything else at info.
pub fn default_directives(service_name: &str) -> String {
    let crate_target = service_name.replace('-', "_");
    format!("info,{crate_target}=debug,amora_core=debug,amora_shared=info,tower_http=debug")
}

pub fn init_tracing(service_name: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(service_name)));
    let format = LogFormat::from_env();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
    }

    tracing::info!(service = service_name, format = ?format, "tracing initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_format_overrides_environment() {
        assert_eq!(LogFormat::resolve(Some("pretty"), Some("production")), LogFormat::Pretty);
        assert_eq!(LogFormat::resolve(Some("JSON"), None), LogFormat::Json);
    }

    #[test]
    fn production_defaults_to_json() {
        assert_eq!(LogFormat::resolve(None, Some("production")), LogFormat::Json);
        assert_eq!(LogFormat::resolve(None, Some("staging")), LogFormat::Pretty);
        assert_eq!(LogFormat::resolve(Some("xml"), None), LogFormat::Pretty);
    }

    #[test]
    fn directives_use_crate_target() {
        let d = default_directives("amora-server");
        assert!(d.contains("amora_server=debug"));
        assert!(d.contains("amora_core=debug"));
    }
}
