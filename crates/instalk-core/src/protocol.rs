use crate::events::PushEvent;

/// Heartbeat literals exchanged outside the JSON framing.
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

impl PushEvent {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default() + "\n"
    }

    /// Parse a push frame. Returns `None` for heartbeat responses and
    /// frames of unknown type, which the client ignores.
    pub fn from_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == PONG {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}
