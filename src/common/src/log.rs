use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOG_INIT: OnceCell<()> = OnceCell::new();

/// Install the process-wide tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Callers may race (tests do); only
/// the first call installs, the rest are no-ops.
pub fn init_tracing(default_filter: &str) {
    LOG_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_line_number(true)
            .try_init();
    });
}
