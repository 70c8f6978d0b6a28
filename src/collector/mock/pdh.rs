//! In-memory mock of the PDH query interface.
//!
//! `MockPdh` answers counter registrations and array queries from counters added
//! with [`MockPdh::add_counter`]. Clones share state, so a test can keep a handle
//! for inspection and scripting after moving the mock into a collector.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::collector::pdh::fetch::NativeCall;
use crate::collector::pdh::status::PdhStatus;
use crate::collector::traits::{
    CounterHandle, CounterInfo, FormattedRecord, PdhApi, QueryHandle, RawRecord,
};

const RAW_RECORD_SIZE: usize = 28;
const FORMATTED_RECORD_SIZE: usize = 20;
const COUNTER_INFO_SIZE: usize = 8;

/// One instance reported by a mock counter.
#[derive(Debug, Clone, PartialEq)]
pub struct MockItem {
    pub name: String,
    pub status: PdhStatus,
    pub first: i64,
    pub second: i64,
    /// Added to `first` once per successful collection.
    pub step: i64,
}

impl MockItem {
    pub fn new(name: impl Into<String>, first: i64) -> Self {
        Self {
            name: name.into(),
            status: PdhStatus::CSTATUS_VALID_DATA,
            first,
            second: 0,
            step: 0,
        }
    }

    pub fn second(mut self, second: i64) -> Self {
        self.second = second;
        self
    }

    pub fn step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    pub fn status(mut self, status: PdhStatus) -> Self {
        self.status = status;
        self
    }
}

/// A registrable mock counter path.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCounter {
    pub counter_type: u32,
    pub frequency: i64,
    pub items: Vec<MockItem>,
}

impl MockCounter {
    pub fn new(counter_type: u32) -> Self {
        Self {
            counter_type,
            frequency: 0,
            items: Vec::new(),
        }
    }

    pub fn frequency(mut self, frequency: i64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn item(mut self, item: MockItem) -> Self {
        self.items.push(item);
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    counters: HashMap<String, MockCounter>,
    add_failures: HashMap<String, PdhStatus>,
    info_failures: HashMap<String, PdhStatus>,
    array_statuses: HashMap<String, PdhStatus>,
    handles: Vec<String>,
    open_queries: usize,
    next_query: usize,
    cycle: i64,
    collect_script: VecDeque<PdhStatus>,
    collect_calls: usize,
    array_calls: usize,
    misreport_size: bool,
    panics_pending: usize,
    collect_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    entered: bool,
    released: bool,
}

/// Holds the next `collect_query_data` call until released.
#[derive(Debug, Clone, Default)]
pub struct CollectGate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl CollectGate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a collection is held at the gate.
    pub fn wait_entered(&self) {
        let mut state = self.lock();
        while !state.entered {
            state = self
                .inner
                .1
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Lets the held collection continue.
    pub fn release(&self) {
        let mut state = self.lock();
        state.released = true;
        self.inner.1.notify_all();
    }

    fn pass(&self) {
        let mut state = self.lock();
        if !state.armed {
            return;
        }
        state.entered = true;
        self.inner.1.notify_all();
        while !state.released {
            state = self
                .inner
                .1
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.armed = false;
    }
}

/// In-memory [`PdhApi`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MockPdh {
    state: Arc<Mutex<MockState>>,
    gate: CollectGate,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockPdh {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `path` registrable.
    pub fn add_counter(&self, path: impl Into<String>, counter: MockCounter) -> &Self {
        self.state().counters.insert(path.into(), counter);
        self
    }

    /// Replaces the items reported for `path`.
    pub fn set_items(&self, path: &str, items: Vec<MockItem>) {
        if let Some(counter) = self.state().counters.get_mut(path) {
            counter.items = items;
        }
    }

    /// Makes registration of `path` fail with `status`.
    pub fn fail_add(&self, path: impl Into<String>, status: PdhStatus) -> &Self {
        self.state().add_failures.insert(path.into(), status);
        self
    }

    /// Makes the counter info query for `path` fail with `status`.
    pub fn fail_info(&self, path: impl Into<String>, status: PdhStatus) -> &Self {
        self.state().info_failures.insert(path.into(), status);
        self
    }

    /// Makes array queries for `path` return `status`.
    pub fn set_array_status(&self, path: impl Into<String>, status: PdhStatus) -> &Self {
        self.state().array_statuses.insert(path.into(), status);
        self
    }

    /// Queues statuses returned by the next `collect_query_data` calls.
    pub fn script_collect(&self, statuses: impl IntoIterator<Item = PdhStatus>) -> &Self {
        self.state().collect_script.extend(statuses);
        self
    }

    /// Array calls report `MORE_DATA` without growing the requirement.
    pub fn misreport_array_size(&self, enabled: bool) -> &Self {
        self.state().misreport_size = enabled;
        self
    }

    /// The next `collect_query_data` call panics.
    pub fn panic_on_next_collect(&self) -> &Self {
        self.state().panics_pending += 1;
        self
    }

    /// Every `collect_query_data` call sleeps for `delay`.
    pub fn collect_delay(&self, delay: Duration) -> &Self {
        self.state().collect_delay = Some(delay);
        self
    }

    /// Arms the gate that holds the next collection.
    pub fn hold_next_collect(&self) -> CollectGate {
        let mut state = self.gate.lock();
        *state = GateState {
            armed: true,
            ..GateState::default()
        };
        self.gate.clone()
    }

    pub fn collect_calls(&self) -> usize {
        self.state().collect_calls
    }

    pub fn array_calls(&self) -> usize {
        self.state().array_calls
    }

    pub fn open_queries(&self) -> usize {
        self.state().open_queries
    }

    /// Highest number of overlapping `collect_query_data` calls observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn path_of(&self, counter: CounterHandle) -> Option<String> {
        self.state().handles.get(counter.0).cloned()
    }

    fn current_items(&self, counter: CounterHandle) -> Result<Vec<MockItem>, PdhStatus> {
        let state = self.state();
        let path = state
            .handles
            .get(counter.0)
            .ok_or(PdhStatus::INVALID_HANDLE)?;
        if let Some(&status) = state.array_statuses.get(path) {
            return Err(status);
        }
        let counter = state
            .counters
            .get(path)
            .ok_or(PdhStatus::CSTATUS_NO_COUNTER)?;
        let cycle = state.cycle;
        Ok(counter
            .items
            .iter()
            .map(|item| MockItem {
                first: item.first + item.step * cycle,
                ..item.clone()
            })
            .collect())
    }

    fn array_call(
        &self,
        counter: CounterHandle,
        buf: &mut [u8],
        record_size: usize,
        write: impl Fn(&MockItem, &mut [u8]),
    ) -> NativeCall {
        let misreport = {
            let mut state = self.state();
            state.array_calls += 1;
            state.misreport_size
        };
        let items = match self.current_items(counter) {
            Ok(items) => items,
            Err(status) => return NativeCall::failed(status),
        };

        let names_len: usize = items.iter().map(|i| i.name.len()).sum();
        let required = record_size * items.len() + names_len;
        if misreport {
            return NativeCall::more_data(buf.len());
        }
        if buf.len() < required {
            return NativeCall::more_data(required);
        }

        let mut name_offset = record_size * items.len();
        for (i, item) in items.iter().enumerate() {
            let record = &mut buf[i * record_size..(i + 1) * record_size];
            write(item, record);
            let tail = record_size - 8;
            record[tail..tail + 4].copy_from_slice(&(name_offset as u32).to_le_bytes());
            record[tail + 4..].copy_from_slice(&(item.name.len() as u32).to_le_bytes());
            buf[name_offset..name_offset + item.name.len()].copy_from_slice(item.name.as_bytes());
            name_offset += item.name.len();
        }
        NativeCall::ok(required, items.len())
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_name(buf: &[u8], record: &[u8]) -> String {
    let tail = record.len() - 8;
    let offset = read_u32(record, tail) as usize;
    let len = read_u32(record, tail + 4) as usize;
    String::from_utf8_lossy(&buf[offset..offset + len]).into_owned()
}

impl PdhApi for MockPdh {
    fn open_query(&mut self) -> Result<QueryHandle, PdhStatus> {
        let mut state = self.state();
        state.open_queries += 1;
        state.next_query += 1;
        Ok(QueryHandle(state.next_query))
    }

    fn add_counter(&mut self, _query: QueryHandle, path: &str) -> Result<CounterHandle, PdhStatus> {
        let mut state = self.state();
        if let Some(&status) = state.add_failures.get(path) {
            return Err(status);
        }
        if !state.counters.contains_key(path) {
            return Err(PdhStatus::CSTATUS_NO_COUNTER);
        }
        state.handles.push(path.to_string());
        Ok(CounterHandle(state.handles.len() - 1))
    }

    fn counter_info(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall {
        let state = self.state();
        let Some(path) = state.handles.get(counter.0) else {
            return NativeCall::failed(PdhStatus::INVALID_HANDLE);
        };
        if let Some(&status) = state.info_failures.get(path) {
            return NativeCall::failed(status);
        }
        let Some(mock) = state.counters.get(path) else {
            return NativeCall::failed(PdhStatus::CSTATUS_NO_COUNTER);
        };
        if buf.len() < COUNTER_INFO_SIZE {
            return NativeCall::more_data(COUNTER_INFO_SIZE);
        }
        buf[..4].copy_from_slice(&mock.counter_type.to_le_bytes());
        buf[4..8].fill(0);
        NativeCall::ok(COUNTER_INFO_SIZE, 1)
    }

    fn decode_counter_info(buf: &[u8]) -> Option<CounterInfo> {
        (buf.len() >= COUNTER_INFO_SIZE).then(|| CounterInfo {
            counter_type: read_u32(buf, 0),
        })
    }

    fn counter_time_base(&mut self, counter: CounterHandle) -> Result<i64, PdhStatus> {
        let path = self.path_of(counter).ok_or(PdhStatus::INVALID_HANDLE)?;
        let state = self.state();
        match state.counters.get(&path) {
            Some(mock) if mock.frequency > 0 => Ok(mock.frequency),
            Some(_) => Err(PdhStatus::CSTATUS_INVALID_DATA),
            None => Err(PdhStatus::CSTATUS_NO_COUNTER),
        }
    }

    fn collect_query_data(&mut self, _query: QueryHandle) -> PdhStatus {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        self.gate.pass();

        let (delay, panic_now) = {
            let mut state = self.state();
            state.collect_calls += 1;
            let panic_now = state.panics_pending > 0;
            if panic_now {
                state.panics_pending -= 1;
            }
            (state.collect_delay, panic_now)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if panic_now {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            panic!("injected collection fault");
        }

        let status = {
            let mut state = self.state();
            let status = state
                .collect_script
                .pop_front()
                .unwrap_or(PdhStatus::SUCCESS);
            if status.is_success() {
                state.cycle += 1;
            }
            status
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        status
    }

    fn raw_counter_array(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall {
        self.array_call(counter, buf, RAW_RECORD_SIZE, |item, record| {
            record[0..4].copy_from_slice(&item.status.0.to_le_bytes());
            record[4..12].copy_from_slice(&item.first.to_le_bytes());
            record[12..20].copy_from_slice(&item.second.to_le_bytes());
        })
    }

    fn decode_raw_items(buf: &[u8], item_count: usize) -> Vec<RawRecord> {
        (0..item_count)
            .map(|i| {
                let record = &buf[i * RAW_RECORD_SIZE..(i + 1) * RAW_RECORD_SIZE];
                RawRecord {
                    instance: read_name(buf, record),
                    status: PdhStatus(read_u32(record, 0)),
                    first: read_u64(record, 4) as i64,
                    second: read_u64(record, 12) as i64,
                }
            })
            .collect()
    }

    fn formatted_counter_array(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall {
        self.array_call(counter, buf, FORMATTED_RECORD_SIZE, |item, record| {
            record[0..4].copy_from_slice(&item.status.0.to_le_bytes());
            record[4..12].copy_from_slice(&(item.first as f64).to_le_bytes());
        })
    }

    fn decode_formatted_items(buf: &[u8], item_count: usize) -> Vec<FormattedRecord> {
        (0..item_count)
            .map(|i| {
                let record = &buf[i * FORMATTED_RECORD_SIZE..(i + 1) * FORMATTED_RECORD_SIZE];
                FormattedRecord {
                    instance: read_name(buf, record),
                    status: PdhStatus(read_u32(record, 0)),
                    value: f64::from_bits(read_u64(record, 4)),
                }
            })
            .collect()
    }

    fn close_query(&mut self, _query: QueryHandle) -> PdhStatus {
        let mut state = self.state();
        state.open_queries = state.open_queries.saturating_sub(1);
        PdhStatus::SUCCESS
    }
}
