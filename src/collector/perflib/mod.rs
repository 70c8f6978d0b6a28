//! Fallback acquisition from raw performance data.
//!
//! Used where no live query is available. The block for one object is read from
//! a [`PerfDataSource`](crate::collector::traits::PerfDataSource), decoded by
//! [`layout`], and its numeric identifiers resolved through the [`names`] tables.

mod collector;
pub mod layout;
pub mod names;
#[cfg(windows)]
mod registry;

pub use collector::{COUNTER_TABLE, PerflibCollector, extract};
pub use layout::{DecodeError, PerfData, decode};
pub use names::{NameTable, NameTableError, NameTables};
#[cfg(windows)]
pub use registry::RegistryPerfData;
