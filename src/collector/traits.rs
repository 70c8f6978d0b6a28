//! Abstractions over the native performance counter interfaces.
//!
//! [`PdhApi`] is the live query interface (`pdh.dll` on Windows) and
//! [`PerfDataSource`] is the raw registry performance data used by the fallback
//! decoder. Collectors are generic over both so they run against the in-memory
//! mocks in tests and on non-Windows hosts.

use std::io;

use crate::collector::pdh::fetch::NativeCall;
use crate::collector::pdh::status::PdhStatus;

/// Opaque native query handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(pub usize);

/// Opaque native counter handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterHandle(pub usize);

/// Counter metadata returned by the counter info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterInfo {
    pub counter_type: u32,
}

/// One record of a raw counter array.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub instance: String,
    pub status: PdhStatus,
    pub first: i64,
    pub second: i64,
}

/// One record of a formatted counter array.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedRecord {
    pub instance: String,
    pub status: PdhStatus,
    pub value: f64,
}

/// Live performance counter query interface.
///
/// Size-bounded calls (`counter_info`, `raw_counter_array`,
/// `formatted_counter_array`) write into the caller's buffer in an
/// implementation-defined layout; the matching `decode_*` method reads that layout
/// back from the same buffer. Decoders take no receiver so a call and its
/// decoder can be handed to [`fetch`](crate::collector::pdh::fetch::fetch) together.
///
/// Implementations are not required to tolerate concurrent use of one query handle.
pub trait PdhApi: Send + Sized {
    /// Opens a new query.
    fn open_query(&mut self) -> Result<QueryHandle, PdhStatus>;

    /// Registers a counter by its English counter path.
    fn add_counter(&mut self, query: QueryHandle, path: &str) -> Result<CounterHandle, PdhStatus>;

    /// Fetches counter metadata into `buf`.
    fn counter_info(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall;

    /// Reads metadata written by a successful `counter_info` call.
    fn decode_counter_info(buf: &[u8]) -> Option<CounterInfo>;

    /// Returns the time base (frequency) of an elapsed-time counter.
    fn counter_time_base(&mut self, counter: CounterHandle) -> Result<i64, PdhStatus>;

    /// Samples every counter of the query.
    fn collect_query_data(&mut self, query: QueryHandle) -> PdhStatus;

    /// Fetches the raw values of every instance of a counter into `buf`.
    fn raw_counter_array(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall;

    /// Reads `item_count` records written by a successful `raw_counter_array` call.
    fn decode_raw_items(buf: &[u8], item_count: usize) -> Vec<RawRecord>;

    /// Fetches computed values of every instance of a counter into `buf`.
    fn formatted_counter_array(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall;

    /// Reads `item_count` records written by a successful `formatted_counter_array` call.
    fn decode_formatted_items(buf: &[u8], item_count: usize) -> Vec<FormattedRecord>;

    /// Closes the query and every counter registered on it.
    fn close_query(&mut self, query: QueryHandle) -> PdhStatus;
}

/// Raw performance data, as exposed by the registry.
pub trait PerfDataSource: Send + Sync {
    /// Reads the performance data block for a query string: a space-separated list
    /// of object indices, or `"Global"`.
    fn query(&self, query: &str) -> io::Result<Vec<u8>>;

    /// Reads a raw name table (`REG_MULTI_SZ`, UTF-16LE) such as `"Counter"` or `"Help"`.
    fn name_table(&self, table: &str) -> io::Result<Vec<u8>>;
}
