//! Channel resolution.
//!
//! The request path is data, not routing: every request maps to exactly one
//! outbound broker channel, either fixed by configuration or derived from
//! the path.

pub mod topic;

pub use topic::{allocate_reply_channel, channel_for_path, resolve_channel};
