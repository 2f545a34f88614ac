//! Timestamp and text helpers shared by stages, adapters and run records.

pub mod timestamps;
mod text;

pub use text::{hashtag, slugify};
pub use timestamps::{iso_timestamp, run_stamp, Timestamp};
