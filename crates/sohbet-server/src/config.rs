//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the relay can start with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sohbet_shared::constants::{
    DEFAULT_HTTP_PORT, HISTORY_LIMIT, HISTORY_TTL_SECS, MAILBOX_CAPACITY, MAX_FRAME_BYTES,
    MAX_UPLOAD_SIZE, PING_INTERVAL_SECS, READ_TIMEOUT_SECS, REPLAY_LIMIT, SEEN_WINDOW,
};
use sohbet_store::Retention;

/// Longest history time-to-live accepted from the environment (ten years).
const MAX_HISTORY_TTL_SECS: u64 = 10 * 365 * 86_400;

/// Where channel history is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryBackend {
    /// Process-local lists, lost on restart.
    Memory,
    /// SQLite database file.
    Sqlite(PathBuf),
    /// No history: replay requests return nothing.
    Off,
}

impl FromStr for HistoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "memory" => Ok(Self::Memory),
            "off" | "none" | "" => Ok(Self::Off),
            _ => match s.strip_prefix("sqlite:") {
                Some(path) if !path.is_empty() => Ok(Self::Sqlite(PathBuf::from(path))),
                Some(_) => Err("sqlite backend needs a path (sqlite:<path>)".into()),
                None => Err(format!("unknown history store '{s}'")),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`. Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Env: `HISTORY_STORE` (`memory`, `sqlite:<path>`, `off`). Default: `memory`
    pub history: HistoryBackend,

    /// Env: `HISTORY_LIMIT`, `HISTORY_TTL_SECS`
    pub retention: Retention,

    /// Messages delivered for one replay request.
    /// Env: `REPLAY_LIMIT`. Default: `50`
    pub replay_limit: usize,

    /// Outbound frames queued per connection before it counts as slow.
    /// Env: `MAILBOX_CAPACITY`. Default: `256`
    pub mailbox_capacity: usize,

    /// Largest inbound frame accepted; anything bigger disconnects.
    /// Env: `MAX_FRAME_BYTES`. Default: `1024`
    pub max_frame_bytes: usize,

    /// Env: `PING_INTERVAL_SECS`. Default: `54`
    pub ping_interval: Duration,

    /// Silence allowed on a socket before it is dropped.
    /// Env: `READ_TIMEOUT_SECS`. Default: `60`
    pub read_timeout: Duration,

    /// Upper bound for a single history operation.
    /// Env: `STORE_TIMEOUT_SECS`. Default: `5`
    pub store_timeout: Duration,

    /// Env: `UPLOAD_DIR`. Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Env: `STATIC_DIR`. Default: `./static`
    pub static_dir: PathBuf,

    /// Env: `MAX_UPLOAD_BYTES`. Default: 10 MiB
    pub max_upload_size: usize,

    /// Env: `NUMEROLOGY_URL`
    pub numerology_url: String,

    /// Sent upstream as `X-API-KEY` when set.
    /// Env: `NUMEROLOGY_API_KEY`
    pub numerology_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            history: HistoryBackend::Memory,
            retention: Retention {
                max_entries: HISTORY_LIMIT,
                ttl: Duration::from_secs(HISTORY_TTL_SECS),
                seen_window: SEEN_WINDOW,
            },
            replay_limit: REPLAY_LIMIT,
            mailbox_capacity: MAILBOX_CAPACITY,
            max_frame_bytes: MAX_FRAME_BYTES,
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            store_timeout: Duration::from_secs(5),
            upload_dir: PathBuf::from("./uploads"),
            static_dir: PathBuf::from("./static"),
            max_upload_size: MAX_UPLOAD_SIZE,
            numerology_url: "http://numerology-api:8000/numerology".to_string(),
            numerology_api_key: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Unparseable values
    /// are logged and the default kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);
        parse_into(&lookup, "HISTORY_STORE", &mut config.history);
        parse_into(&lookup, "HISTORY_LIMIT", &mut config.retention.max_entries);
        parse_into(&lookup, "REPLAY_LIMIT", &mut config.replay_limit);
        parse_into(&lookup, "MAILBOX_CAPACITY", &mut config.mailbox_capacity);
        parse_into(&lookup, "MAX_FRAME_BYTES", &mut config.max_frame_bytes);
        parse_into(&lookup, "MAX_UPLOAD_BYTES", &mut config.max_upload_size);

        secs_into(&lookup, "HISTORY_TTL_SECS", &mut config.retention.ttl, MAX_HISTORY_TTL_SECS);
        secs_into(&lookup, "PING_INTERVAL_SECS", &mut config.ping_interval, u64::MAX);
        secs_into(&lookup, "READ_TIMEOUT_SECS", &mut config.read_timeout, u64::MAX);
        secs_into(&lookup, "STORE_TIMEOUT_SECS", &mut config.store_timeout, u64::MAX);

        if let Some(dir) = lookup("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("NUMEROLOGY_URL") {
            config.numerology_url = url;
        }
        if let Some(key) = lookup("NUMEROLOGY_API_KEY") {
            if !key.is_empty() {
                config.numerology_api_key = Some(key);
            }
        }

        // tokio channels need a positive capacity.
        if config.mailbox_capacity == 0 {
            tracing::warn!("MAILBOX_CAPACITY must be positive, using default");
            config.mailbox_capacity = MAILBOX_CAPACITY;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.
        config
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return;
    };
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(e) => tracing::warn!(key, value = %value, error = %e, "Invalid setting, using default"),
    }
}

/// Read a whole number of seconds in `1..=max`; anything else keeps the
/// default.
fn secs_into(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration, max: u64) {
    let mut secs = slot.as_secs();
    parse_into(lookup, key, &mut secs);
    if secs == 0 || secs > max {
        tracing::warn!(key, secs, max, "Setting out of range, using default");
        return;
    }
    *slot = Duration::from_secs(secs);
}
