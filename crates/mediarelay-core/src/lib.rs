//! Foundational low-level utilities shared across mediarelay crates.
//!
//! Provides wall-clock helpers, the elapsed-time renderings used by job
//! progress reports, HTML escaping for message text, and the media kinds
//! shared by the store and platform crates.

pub mod duration_format;
pub mod html_text;
pub mod media_kind;
pub mod time_utils;

pub use duration_format::{format_clock, format_duration_hms};
pub use html_text::escape_html;
pub use media_kind::MediaKind;
pub use time_utils::{current_unix_timestamp_ms, unix_timestamp_ms};
