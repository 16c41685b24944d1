use crate::config::ObservabilityConfig;
use crate::error::{AppError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `observability.log_level`. Fails if a subscriber is
/// already installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    result.map_err(|e| AppError::Internal(format!("failed to install tracing subscriber: {}", e)))
}

/// Filter directive used when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("comment_sentiment={},sentiment={}", level, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter("debug"), "comment_sentiment=debug,sentiment=debug");
        assert!(default_filter("info").parse::<EnvFilter>().is_ok());
    }
}
