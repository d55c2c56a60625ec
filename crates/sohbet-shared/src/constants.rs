/// Room a message lands in when the client does not name one.
pub const DEFAULT_CHANNEL: &str = "genel";

/// Display name used for plain-text frames from a connection that never
/// asserted a username.
pub const ANONYMOUS_USERNAME: &str = "anonymous";

/// Message body that asks the server to replay a channel's backlog.
pub const REPLAY_SENTINEL: &str = "__GET_RECENT_MESSAGES__";

/// Prefix of the per-channel list key in the history store.
pub const HISTORY_KEY_PREFIX: &str = "sohbet:messages:";

/// Entries kept per channel log.
pub const HISTORY_LIMIT: usize = 100;

/// Time-to-live of a channel log, refreshed on every append (24 h).
pub const HISTORY_TTL_SECS: u64 = 24 * 60 * 60;

/// Messages delivered in answer to a replay request.
pub const REPLAY_LIMIT: usize = 50;

/// Newest entries scanned when matching a seen acknowledgement.
pub const SEEN_WINDOW: usize = 50;

/// Outbound frames queued per connection before it is dropped.
pub const MAILBOX_CAPACITY: usize = 256;

/// Maximum inbound WebSocket frame in bytes.
pub const MAX_FRAME_BYTES: usize = 1024;

/// Keepalive ping interval in seconds.
pub const PING_INTERVAL_SECS: u64 = 54;

/// Read inactivity deadline in seconds.
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Per-write deadline in seconds.
pub const WRITE_TIMEOUT_SECS: u64 = 10;

/// Maximum accepted upload size in bytes (10 MiB).
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
