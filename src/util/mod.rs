//! Utility modules for rwinperf.

pub mod os;
