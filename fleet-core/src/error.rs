use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MonitorError {
    #[error("{0} is already connecting to the coordination backend")]
    AlreadyConnecting(String),
    #[error("{server_id} cannot connect to {backend} within {timeout:?}")]
    ConnectTimeout {
        server_id: String,
        backend: &'static str,
        timeout: Duration,
    },
    #[error("{server_id} connect to {backend} failed: {reason}")]
    ConnectFailed {
        server_id: String,
        backend: &'static str,
        reason: String,
    },
    #[error("{0} gave up reconnecting after {1} attempts")]
    ReconnectExhausted(String, usize),
    #[error("cluster monitor of {0} is closed")]
    Closed(String),
    #[error("{0} is not connected to the coordination backend")]
    NotConnected(String),
}
