//! Performance counter acquisition engine.
//!
//! Counters are read either live, through a query session bound against the PDH
//! interface, or from the raw performance data block as a fallback. Both paths
//! yield the same [`CounterValues`](crate::model::CounterValues) and both run
//! behind a [`Collector`] worker that serializes access to the native resources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │            Collector (worker thread, request queue)          │
//! │                             │                                │
//! │                    ┌────────▼────────┐                       │
//! │                    │  CounterSource  │ (trait)               │
//! │                    └────────┬────────┘                       │
//! │             ┌───────────────┴───────────────┐                │
//! │   ┌─────────▼─────────┐         ┌───────────▼───────────┐    │
//! │   │  pdh::Session     │         │ perflib::Perflib-     │    │
//! │   │  - bind / prime   │         │   Collector           │    │
//! │   │  - fetch loop     │         │  - layout decoder     │    │
//! │   │  - conversion     │         │  - name tables        │    │
//! │   └─────────┬─────────┘         └───────────┬───────────┘    │
//! │      ┌──────▼──────┐               ┌────────▼────────┐       │
//! │      │   PdhApi    │ (trait)       │ PerfDataSource  │ (trait)│
//! │      └──────┬──────┘               └────────┬────────┘       │
//! └─────────────┼───────────────────────────────┼────────────────┘
//!        ┌──────┴──────┐                 ┌──────┴───────┐
//!   NativePdh      MockPdh    RegistryPerfData    MockPerfData
//!   (Windows)     (Testing)      (Windows)         (Testing)
//! ```
//!
//! # Usage
//!
//! ## Production (Windows)
//!
//! ```ignore
//! use rwinperf::collector::{Collector, CounterSpec, QuerySpec, SessionOptions};
//!
//! let spec = QuerySpec::new("Processor")
//!     .instance("*")
//!     .counter(CounterSpec::new("% Processor Time"));
//! let collector = Collector::open(&spec, &SessionOptions::default())?.value;
//! let values = collector.collect()?;
//! ```
//!
//! ## Testing (with MockPdh)
//!
//! ```
//! use rwinperf::collector::{Collector, CounterSpec, MockPdh, QuerySpec, SessionOptions};
//!
//! let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));
//! let options = SessionOptions::default().os_build(19045);
//! let collector = Collector::bind(MockPdh::typical_system(), &spec, &options)
//!     .unwrap()
//!     .value;
//! let values = collector.collect().unwrap();
//! assert!(values["------"].contains_key("Available Bytes"));
//! ```

pub mod counter_types;
pub mod error;
pub mod mock;
pub mod pdh;
pub mod perflib;
mod schema;
pub mod query;
pub mod traits;
mod worker;

pub use error::{BindError, BindFailure, BindReport, CollectError};
pub use mock::{MockPdh, MockPerfData};
#[cfg(windows)]
pub use pdh::NativePdh;
pub use pdh::{Session, SessionOptions, ValueMode};
#[cfg(windows)]
pub use perflib::RegistryPerfData;
pub use perflib::{NameTables, PerflibCollector};
pub use schema::{RecordCollector, Schema};
pub use query::{CounterPath, CounterSpec, QuerySpec, group_paths};
pub use traits::{PdhApi, PerfDataSource};
pub use worker::{Collector, CounterSource};
