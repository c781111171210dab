//! Durable dead-letter sinks.

mod json_lines;

pub use json_lines::JsonLinesDeadLetterSink;
