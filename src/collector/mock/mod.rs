//! Mock native interfaces for testing.
//!
//! This module provides `MockPdh`, `MockPerfData` and pre-built scenarios for
//! testing collectors without a Windows host.

mod pdh;
mod perfdata;
mod scenarios;

pub use pdh::{CollectGate, MockCounter, MockItem, MockPdh};
pub use perfdata::{MockPerfData, ObjectBuilder, PerfDataBuilder, encode_name_table};
pub use scenarios::TYPICAL_NAMES;
