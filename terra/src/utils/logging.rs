use tracing_subscriber::{fmt, EnvFilter};

/// Filter applied when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global tracing subscriber. The filter is read from
/// `RUST_LOG`, falling back to [`DEFAULT_FILTER`]. Calling this more than
/// once leaves the first subscriber in place.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
        tracing::info!("logging initialised");
    }
}
