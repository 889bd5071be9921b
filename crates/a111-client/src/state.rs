//! 会话状态
//!
//! ```text
//! Disconnected ──connect──▶ Connected ──setup_session──▶ Configured
//!      ▲                                                  │    ▲
//!      │                                   start_streaming│    │stop_streaming
//!      │                                                  ▼    │
//!      └────────── disconnect / StreamLost ────────── Streaming
//! ```

use std::fmt;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connected,
    Configured,
    Streaming,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connected => "Connected",
            SessionState::Configured => "Configured",
            SessionState::Streaming => "Streaming",
        }
    }

    pub fn is_connected(self) -> bool {
        self != SessionState::Disconnected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert!(!SessionState::Disconnected.is_connected());
        assert!(SessionState::Streaming.is_connected());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Configured.to_string(), "Configured");
    }
}
