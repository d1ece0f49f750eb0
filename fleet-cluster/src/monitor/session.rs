use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SessionState {
    Init,
    Connecting,
    Connected,
    ConnectFailed,
    Reconnecting,
    Closed,
}

impl SessionState {
    /// A connect sequence is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Reconnecting)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Init => "INIT",
            SessionState::Connecting => "CONNECTING",
            SessionState::Connected => "CONNECTED",
            SessionState::ConnectFailed => "CONNECT_FAILED",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of the monitor's backend connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CoordinationSession {
    pub state: SessionState,
    /// Attempts made by the current reconnection sequence.
    pub retry_count: usize,
    pub session_timeout: Duration,
}

impl CoordinationSession {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            state: SessionState::Init,
            retry_count: 0,
            session_timeout,
        }
    }
}

impl Display for CoordinationSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CoordinationSession[{}, retry {}, timeout {:?}]", self.state, self.retry_count, self.session_timeout)
    }
}
