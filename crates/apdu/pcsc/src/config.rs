//! Configuration options for PC/SC transport

use pcsc::{Protocols as PcscProtocols, ShareMode as PcscShareMode};

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Exclusive access to the card
    Exclusive,
    /// Shared access to the card (default)
    Shared,
}

impl From<ShareMode> for PcscShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Exclusive => Self::Exclusive,
            ShareMode::Shared => Self::Shared,
        }
    }
}

/// Strategy for picking a reader to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectStrategy {
    /// Connect to a specific reader by name
    Reader(String),

    /// Connect to the first reader holding a card
    AnyCard,

    /// Connect to the first reader, card or not
    FirstAvailable,
}

/// Configuration options for PC/SC transport
#[derive(Debug, Clone)]
pub struct PcscConfig {
    /// Sharing mode for card connections
    pub share_mode: ShareMode,

    /// Preferred protocols for card communication
    pub protocols: PcscProtocols,

    /// Automatically reconnect if the card is reset
    pub auto_reconnect: bool,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            protocols: PcscProtocols::ANY,
            auto_reconnect: true,
        }
    }
}

impl PcscConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sharing mode
    pub const fn with_share_mode(mut self, mode: ShareMode) -> Self {
        self.share_mode = mode;
        self
    }

    /// Set the preferred protocols
    pub const fn with_protocols(mut self, protocols: PcscProtocols) -> Self {
        self.protocols = protocols;
        self
    }

    /// Set whether to automatically reconnect
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }
}
