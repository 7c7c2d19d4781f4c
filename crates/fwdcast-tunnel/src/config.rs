//! Configuration types for the relay server and the origin agent

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Default value functions for serde
// =============================================================================

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

const fn default_max_viewers() -> usize {
    3
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_sweep_interval() -> Duration {
    Duration::from_secs(10)
}

const fn default_auth_window() -> Duration {
    Duration::from_secs(30)
}

const fn default_auth_max_failures() -> u32 {
    5
}

const fn default_session_duration() -> Duration {
    Duration::from_secs(30 * 60)
}

const fn default_max_retries() -> u32 {
    10
}

const fn default_retry_delay() -> Duration {
    Duration::from_millis(500)
}

// =============================================================================
// Relay Configuration
// =============================================================================

/// Relay-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the HTTP server listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Public base URL used when generating share links.
    ///
    /// Falls back to the `PUBLIC_BASE_URL` environment variable, then to
    /// `http://{listen}`.
    #[serde(default)]
    pub public_base: Option<String>,

    /// Maximum concurrent viewers per session
    #[serde(default = "default_max_viewers")]
    pub max_viewers: usize,

    /// How long a viewer request may wait for the origin's response
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Expiry sweeper tick interval
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Window for counting failed password attempts
    #[serde(default = "default_auth_window", with = "humantime_serde")]
    pub auth_rate_window: Duration,

    /// Failed password attempts before rate limiting kicks in
    #[serde(default = "default_auth_max_failures")]
    pub auth_max_failures: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_base: None,
            max_viewers: default_max_viewers(),
            request_timeout: default_request_timeout(),
            sweep_interval: default_sweep_interval(),
            auth_rate_window: default_auth_window(),
            auth_max_failures: default_auth_max_failures(),
        }
    }
}

impl RelayConfig {
    /// Create a relay config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the public base URL for share links.
    ///
    /// Order: explicit config, `PUBLIC_BASE_URL` environment variable,
    /// `http://{listen}`.
    #[must_use]
    pub fn resolve_public_base(&self) -> String {
        self.public_base
            .clone()
            .or_else(|| std::env::var("PUBLIC_BASE_URL").ok())
            .unwrap_or_else(|| format!("http://{}", self.listen))
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error string if:
    /// - `max_viewers` is 0
    /// - `request_timeout` or `sweep_interval` is zero
    /// - `auth_max_failures` is 0
    /// - `public_base` is set but has no scheme
    pub fn validate(&self) -> Result<(), String> {
        if self.max_viewers == 0 {
            return Err("max_viewers must be > 0".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("request_timeout must be > 0".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".to_string());
        }

        if self.auth_max_failures == 0 {
            return Err("auth_max_failures must be > 0".to_string());
        }

        if let Some(base) = &self.public_base {
            if !base.starts_with("http://") && !base.starts_with("https://") {
                return Err("public_base must start with http:// or https://".to_string());
            }
        }

        Ok(())
    }
}

// =============================================================================
// Origin Configuration
// =============================================================================

/// Shortest share duration accepted by the origin
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(60);

/// Longest share duration accepted by the origin
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(120 * 60);

/// Origin-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Relay WebSocket URL (e.g. `wss://fwd.example.com/ws`)
    pub relay_url: String,

    /// Absolute path of the directory being shared
    pub root: PathBuf,

    /// Session lifetime (1 to 120 minutes)
    #[serde(default = "default_session_duration", with = "humantime_serde")]
    pub duration: Duration,

    /// Optional share password
    #[serde(default)]
    pub password: Option<String>,

    /// File name patterns excluded from listings and archives
    /// (exact name or `*.ext`)
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Connection attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between connection attempts
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Largest individual file served (None = unlimited)
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Largest total transfer per session (None = unlimited)
    #[serde(default)]
    pub max_total_size: Option<u64>,
}

impl OriginConfig {
    /// Create an origin config for the given relay URL and share root
    #[must_use]
    pub fn new(relay_url: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            relay_url: relay_url.into(),
            root: root.into(),
            duration: default_session_duration(),
            password: None,
            exclude: Vec::new(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            max_file_size: None,
            max_total_size: None,
        }
    }

    /// Set the session duration (builder pattern)
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the share password (builder pattern)
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add an exclude pattern (builder pattern)
    #[must_use]
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error string if:
    /// - `relay_url` is empty or doesn't start with `ws://` or `wss://`
    /// - `root` is not an absolute path
    /// - `duration` is outside 1-120 minutes
    /// - `password` is set but empty
    /// - `max_retries` is 0
    pub fn validate(&self) -> Result<(), String> {
        if self.relay_url.is_empty() {
            return Err("relay_url cannot be empty".to_string());
        }

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err("relay_url must start with ws:// or wss://".to_string());
        }

        if !self.root.is_absolute() {
            return Err(format!(
                "root must be an absolute path, got {}",
                self.root.display()
            ));
        }

        if self.duration < MIN_SESSION_DURATION || self.duration > MAX_SESSION_DURATION {
            return Err(format!(
                "duration must be between {MIN_SESSION_DURATION:?} and {MAX_SESSION_DURATION:?}, got {:?}",
                self.duration
            ));
        }

        if let Some(password) = &self.password {
            if password.is_empty() {
                return Err("password cannot be empty when set".to_string());
            }
        }

        if self.max_retries == 0 {
            return Err("max_retries must be > 0".to_string());
        }

        Ok(())
    }
}
