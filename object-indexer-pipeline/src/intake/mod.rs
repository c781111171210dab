//! Event intake for the object indexer pipeline.
//!
//! Turns bucket notifications into canonical work items and performs the
//! event-ID level deduplication.

mod dedup;
mod event_intake;
mod messages;
mod notification;

pub use dedup::EventDeduplicator;
pub use event_intake::{Admission, EventIntake, IntakeConfig};
pub use messages::StreamMessage;
pub use notification::{parse_bucket_notification, RawNotification};
