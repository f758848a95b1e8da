//! Tracing subscriber setup

use crate::config::LogFormat;
use crate::constants::DEFAULT_LOG_FILTER;
use crate::error::{DaemonError, DaemonResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the default filter; `verbose` raises the default to debug.
pub fn init_tracing(format: LogFormat, verbose: bool) -> DaemonResult<()> {
    let default_filter = if verbose {
        "flipper=debug,info"
    } else {
        DEFAULT_LOG_FILTER
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    result.map_err(|e| DaemonError::Telemetry {
        reason: e.to_string(),
    })
}
