//! Segmented, append-only commit log.
//!
//! Records are appended to a sequence of segments. Each segment pairs a
//! store file (length-prefixed payloads) with an index file (fixed-width
//! offset to position entries). See [`log::log::Log`] for the entry point.

pub mod error;
pub mod log;

pub use error::{LogError, Result};
pub use log::config::{Config, SegmentConfig};
pub use log::log::{Log, LogReader, SafeLog};
pub use log::segment::{Record, SegmentInfo};
