//! Session driver options.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::outcome::JobEvent;

/// Default time to wait for a status reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(2000);

/// Configuration for a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long to wait for a reply before counting it as lost.
    pub reply_timeout: Duration,

    /// Where progress events go. Events are dropped when `None`.
    pub events: Option<mpsc::UnboundedSender<JobEvent>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            events: None,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the reply timeout.
    ///
    /// # Panics
    /// Panics if the timeout is zero.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        assert!(!timeout.is_zero(), "Reply timeout must be non-zero");
        self.reply_timeout = timeout;
        self
    }

    /// Builder: forward progress events to a channel.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        self.events = Some(tx);
        self
    }
}
