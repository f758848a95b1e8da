//! Constants for the Flipper daemon

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Bearer token for the admin bridge
pub const ENV_BRIDGE_TOKEN: &str = "FLIPPER_BRIDGE_TOKEN";

/// Announcement webhook URL
pub const ENV_WEBHOOK_URL: &str = "FLIPPER_WEBHOOK_URL";

// ============================================================================
// LEDGER
// ============================================================================

pub const DEFAULT_LEDGER_PATH: &str = "./flipper-ledger";

/// Default LMDB map size in megabytes
pub const DEFAULT_LEDGER_MAX_SIZE_MB: usize = 256;

// ============================================================================
// ADMIN BRIDGE
// ============================================================================

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8750";

/// Per-request timeout for bridge calls in seconds
pub const DEFAULT_BRIDGE_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout for webhook deliveries in seconds
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// SCHEDULER
// ============================================================================

/// How often the timeout escalator runs (1 hour)
pub const DEFAULT_TIMEOUT_CHECK_INTERVAL_SECS: u64 = 3600;

// ============================================================================
// LOGGING
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "flipper=info,warn";
