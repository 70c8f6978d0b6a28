//! rwinperf - Windows performance counter collection library.
//!
//! This library provides the acquisition engine used by:
//! - `rwinperfd` - daemon that samples counters on an interval

pub mod collector;
pub mod model;
pub mod util;
