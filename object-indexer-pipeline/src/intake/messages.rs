//! Message types for the intake channel.

use crate::intake::RawNotification;

/// Messages that flow from a notification source into the orchestrator.
#[derive(Debug)]
pub enum StreamMessage {
    /// A batch of raw notifications.
    Notifications(Vec<RawNotification>),
    /// Stream has ended.
    End,
    /// An error occurred in the source.
    Error(String),
}
