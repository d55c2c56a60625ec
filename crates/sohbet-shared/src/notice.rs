use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Frames the hub synthesizes itself. They are fanned out to every
/// connection but never written to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// Number of connections currently registered with the hub.
    UserCount {
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// `username` has seen the message stamped `timestamp` in `channel`.
    Seen {
        channel: String,
        timestamp: DateTime<Utc>,
        username: String,
    },
}

impl Notice {
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_user_count_shape() {
        let notice = Notice::UserCount {
            count: 3,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let json: serde_json::Value = serde_json::from_str(&notice.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "user_count");
        assert_eq!(json["count"], 3);
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_seen_shape() {
        let notice = Notice::Seen {
            channel: "genel".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            username: "alice".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&notice.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "seen");
        assert_eq!(json["channel"], "genel");
        assert_eq!(json["username"], "alice");
        assert!(json.get("message").is_none());
    }
}
