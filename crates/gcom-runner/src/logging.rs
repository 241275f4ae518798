//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Filter directives to use: `RUST_LOG` if set, otherwise `configured`.
pub fn filter_directives(configured: &str) -> String {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => directives,
        _ => configured.to_string(),
    }
}

/// Install the global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed, in which case the
/// existing one is left in place.
pub fn init(configured: &str) -> bool {
    let directives = filter_directives(configured);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("invalid log filter {:?} ({}), using info", directives, e);
        EnvFilter::new("info")
    });
    match tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("keeping existing subscriber: {}", e);
            false
        }
    }
}
