//! Application-wide constants for phx-client.
//!
//! # Categories
//!
//! - **Timeouts**: network and reconnect timing
//! - **Endpoints**: default backend and socket paths
//! - **Files**: config directory layout

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for API calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect attempts the driver makes before giving up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between reconnect attempts, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

// ============================================================================
// Endpoints
// ============================================================================

/// Backend used when nothing is configured.
pub const DEFAULT_BACKEND_URL: &str = "https://anoma.genserver.be";

/// Path of the Phoenix socket endpoint, appended to the backend URL.
pub const SOCKET_PATH: &str = "/socket/websocket";

// ============================================================================
// Files
// ============================================================================

/// Directory name under the platform config dir.
pub const CONFIG_DIR_NAME: &str = "phx-client";

/// Config file inside the config dir.
pub const CONFIG_FILE: &str = "config.json";

/// Session store file inside the config dir.
pub const SESSION_FILE: &str = "session.json";
