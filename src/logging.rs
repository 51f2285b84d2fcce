//! Tracing setup and log redaction helpers.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `LOG_LEVEL`; calling
/// this twice is a no-op.
pub fn init_tracing() {
    let config = LoggingConfig::from_env().unwrap_or(LoggingConfig {
        level: "INFO".to_string(),
        format: LogFormat::Plain,
    });
    init_tracing_with(&config);
}

pub fn init_tracing_with(config: &LoggingConfig) {
    let level = config.level.to_lowercase();
    let default_directive = format!(
        "blinno_payments={level},tower_http=info,sqlx=warn",
        level = level
    );
    let filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let builder = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true);

    let _ = match config.format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Plain => builder.try_init(),
    };
}

/// `255712345678` -> `2557*****678`. Short inputs are fully masked.
pub fn mask_phone_number(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}
