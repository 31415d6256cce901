// src/logging.rs
use crate::config::Config;

/// Install the global subscriber. `RUST_LOG` wins over the built-in filter;
/// `LOG_FORMAT=json` switches to JSON lines.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,conecta_chat=trace,reqwest=info,hyper=info,tungstenite=info".to_string()
        } else {
            "info,conecta_chat=info,reqwest=warn,hyper=warn,tungstenite=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!("🌸 Conecta Elas chat client starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log level: {}", log_level);
    Ok(())
}

/// One line summarizing where the client will talk to
pub fn log_configuration(config: &Config) {
    tracing::info!(
        api = %config.api_url,
        socket = %config.socket_url,
        session_file = %config.session_file.display(),
        "Configuration loaded"
    );
}
