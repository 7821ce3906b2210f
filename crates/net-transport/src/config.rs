//! Channel configuration

use std::time::Duration;

use shared_protocol::DEFAULT_MAX_MESSAGE_SIZE;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Time allowed for the whole handshake before it fails
    pub handshake_timeout: Duration,

    /// Largest application frame accepted or sent
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the maximum application message size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}
