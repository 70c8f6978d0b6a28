//! Query session binding and the live collection cycle.
//!
//! A [`Session`] owns one native query handle and every counter handle registered
//! on it. Binding registers each counter of a [`QuerySpec`] for each requested
//! instance and resolves the counter's native type once, from the first instance
//! that registered. The type is long-lived metadata and is never re-read from
//! later samples.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::collector::counter_types::{PERF_ELAPSED_TIME, convert, type_name};
use crate::collector::error::{BindError, BindFailure, BindReport, CollectError};
use crate::collector::pdh::fetch::{FetchError, Fetched, fetch};
use crate::collector::pdh::status::{PdhError, PdhStatus};
use crate::collector::query::{
    CounterSpec, INSTANCE_TOTAL, InstanceNames, QuerySpec, format_counter_path,
    normalize_instance,
};
use crate::collector::traits::{CounterHandle, PdhApi, QueryHandle};
use crate::collector::worker::CounterSource;
use crate::model::{CounterValue, CounterValues};
use crate::util::os;

/// Initial capacity of the reusable fetch buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Which native array a session reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueMode {
    /// Raw first/second values, converted per counter type.
    #[default]
    Raw,
    /// Values computed by the native layer; always gauges.
    Formatted,
}

/// Options applied when binding a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// OS build compared against [`CounterSpec::min_build`].
    pub os_build: u32,
    pub value_mode: ValueMode,
    pub initial_buffer_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            os_build: os::build_number(),
            value_mode: ValueMode::Raw,
            initial_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl SessionOptions {
    pub fn os_build(mut self, build: u32) -> Self {
        self.os_build = build;
        self
    }

    pub fn value_mode(mut self, mode: ValueMode) -> Self {
        self.value_mode = mode;
        self
    }
}

/// A counter registered for one or more instances.
#[derive(Debug, Clone)]
pub struct Counter {
    pub name: String,
    pub instances: BTreeMap<String, CounterHandle>,
    pub native_type: u32,
    /// Time base; only meaningful for elapsed-time counters.
    pub frequency: i64,
    pub second_value: bool,
}

/// A bound native query.
#[derive(Debug)]
pub struct Session<P: PdhApi> {
    api: P,
    query: Option<QueryHandle>,
    object: String,
    counters: BTreeMap<String, Counter>,
    total_requested: bool,
    mode: ValueMode,
    buffer: Vec<u8>,
}

impl<P: PdhApi> Session<P> {
    /// Opens a query and registers every counter of `spec`.
    ///
    /// Registration failures are collected in the report. Binding only fails when
    /// the query cannot be opened or no counter registered at all. A priming
    /// collection runs before returning so rate counters have a first sample.
    pub fn bind(
        mut api: P,
        spec: &QuerySpec,
        options: &SessionOptions,
    ) -> Result<BindReport<Self>, BindError> {
        let query = api
            .open_query()
            .map_err(|status| BindError::OpenQuery(PdhError::new(status)))?;

        let mut session = Session {
            api,
            query: Some(query),
            object: spec.object.clone(),
            counters: BTreeMap::new(),
            total_requested: spec.total_requested(),
            mode: options.value_mode,
            buffer: Vec::with_capacity(options.initial_buffer_size),
        };

        let instances = spec.effective_instances();
        let mut failures = Vec::new();
        for counter_spec in &spec.counters {
            if let Some(counter) =
                session.register(query, counter_spec, &instances, options.os_build, &mut failures)
            {
                session.counters.insert(counter.name.clone(), counter);
            }
        }

        if session.counters.is_empty() {
            session.close();
            return Err(BindError::NoCounters {
                object: spec.object.clone(),
                failures,
            });
        }

        match session.collect() {
            Ok(_) => {}
            Err(CollectError::NoData) => {
                debug!(object = %session.object, "priming collection returned no data");
            }
            Err(e) => failures.push(BindFailure::Prime(e)),
        }

        info!(
            object = %session.object,
            counters = session.counters.len(),
            failures = failures.len(),
            "query bound"
        );
        Ok(BindReport {
            value: session,
            failures,
        })
    }

    fn register(
        &mut self,
        query: QueryHandle,
        spec: &CounterSpec,
        instances: &[String],
        os_build: u32,
        failures: &mut Vec<BindFailure>,
    ) -> Option<Counter> {
        let mut resolved: Option<(u32, i64)> = None;
        let mut handles = BTreeMap::new();

        for instance in instances {
            let path = format_counter_path(&self.object, instance, &spec.name);
            let handle = match self.api.add_counter(query, &path) {
                Ok(handle) => handle,
                Err(status)
                    if status == PdhStatus::CSTATUS_NO_COUNTER
                        && spec.min_build.is_some_and(|build| os_build < build) =>
                {
                    debug!(path = %path, os_build, min_build = ?spec.min_build, "counter not available on this build");
                    continue;
                }
                Err(status) => {
                    warn!(path = %path, error = %status, "failed to add counter");
                    failures.push(BindFailure::Register {
                        path,
                        error: PdhError::new(status),
                    });
                    continue;
                }
            };

            if resolved.is_none() {
                match self.resolve_type(handle, &path) {
                    Ok(type_and_frequency) => resolved = Some(type_and_frequency),
                    Err(failure) => {
                        warn!(counter = %spec.name, error = %failure, "dropping counter");
                        failures.push(failure);
                        return None;
                    }
                }
            }
            handles.insert(instance.clone(), handle);
        }

        let (native_type, frequency) = resolved?;
        debug!(
            object = %self.object,
            counter = %spec.name,
            native_type = type_name(native_type),
            instances = handles.len(),
            "counter registered"
        );
        Some(Counter {
            name: spec.name.clone(),
            instances: handles,
            native_type,
            frequency,
            second_value: spec.second_value,
        })
    }

    fn resolve_type(&mut self, handle: CounterHandle, path: &str) -> Result<(u32, i64), BindFailure> {
        let api = &mut self.api;
        let info = match fetch(
            &mut self.buffer,
            |buf| api.counter_info(handle, buf),
            |buf, _| P::decode_counter_info(buf),
        ) {
            Ok(Fetched::Items(Some(info))) => info,
            Ok(Fetched::Items(None)) => {
                return Err(BindFailure::MetadataUnreadable {
                    path: path.to_string(),
                });
            }
            Ok(Fetched::Skipped(status)) => {
                return Err(BindFailure::Metadata {
                    path: path.to_string(),
                    error: FetchError::Status(status),
                });
            }
            Err(error) => {
                return Err(BindFailure::Metadata {
                    path: path.to_string(),
                    error,
                });
            }
        };

        let frequency = if info.counter_type == PERF_ELAPSED_TIME {
            self.api
                .counter_time_base(handle)
                .map_err(|status| BindFailure::TimeBase {
                    path: path.to_string(),
                    error: PdhError::new(status),
                })?
        } else {
            0
        };
        Ok((info.counter_type, frequency))
    }

    /// Samples the query and returns the values of every counter and instance.
    pub fn collect(&mut self) -> Result<CounterValues, CollectError> {
        let query = self.query.ok_or(CollectError::NotInitialized)?;

        let status = self.api.collect_query_data(query);
        if status == PdhStatus::NO_DATA {
            return Err(CollectError::NoData);
        }
        PdhError::check(status).map_err(CollectError::Query)?;

        let mut values = CounterValues::new();
        for counter in self.counters.values() {
            for (instance, &handle) in &counter.instances {
                let records = read_counter(&mut self.api, &mut self.buffer, handle, counter, self.mode)
                    .map_err(|error| CollectError::Fetch {
                        path: format_counter_path(&self.object, instance, &counter.name),
                        error,
                    })?;
                insert_records(&mut values, &counter.name, records, self.total_requested);
            }
        }

        if values.is_empty() {
            return Err(CollectError::NoData);
        }
        Ok(values)
    }

    /// Closes the native query. Later collections fail with `NotInitialized`.
    pub fn close(&mut self) {
        if let Some(query) = self.query.take() {
            let status = self.api.close_query(query);
            if !status.is_success() {
                warn!(object = %self.object, error = %status, "failed to close query");
            }
            self.counters.clear();
            debug!(object = %self.object, "query closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.query.is_some()
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn counter(&self, name: &str) -> Option<&Counter> {
        self.counters.get(name)
    }

    pub fn counters(&self) -> impl Iterator<Item = &Counter> {
        self.counters.values()
    }
}

impl<P: PdhApi> Drop for Session<P> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: PdhApi> CounterSource for Session<P> {
    fn name(&self) -> &str {
        &self.object
    }

    fn collect(&mut self) -> Result<CounterValues, CollectError> {
        Session::collect(self)
    }

    fn reset(&mut self) {
        self.buffer = Vec::new();
    }

    fn close(&mut self) {
        Session::close(self)
    }
}

/// Records of one counter handle, converted, paired with their raw status.
type Converted = Vec<(String, PdhStatus, CounterValue)>;

fn read_counter<P: PdhApi>(
    api: &mut P,
    buffer: &mut Vec<u8>,
    handle: CounterHandle,
    counter: &Counter,
    mode: ValueMode,
) -> Result<Converted, FetchError> {
    let fetched = match mode {
        ValueMode::Raw => fetch(
            buffer,
            |buf| api.raw_counter_array(handle, buf),
            |buf, count| {
                P::decode_raw_items(buf, count)
                    .into_iter()
                    .map(|r| {
                        let value = convert(
                            counter.native_type,
                            r.first,
                            r.second,
                            counter.frequency,
                            counter.second_value,
                        );
                        (r.instance, r.status, value)
                    })
                    .collect::<Converted>()
            },
        )?,
        ValueMode::Formatted => fetch(
            buffer,
            |buf| api.formatted_counter_array(handle, buf),
            |buf, count| {
                P::decode_formatted_items(buf, count)
                    .into_iter()
                    .map(|r| (r.instance, r.status, CounterValue::gauge(r.value)))
                    .collect::<Converted>()
            },
        )?,
    };

    match fetched {
        Fetched::Items(records) => Ok(records),
        Fetched::Skipped(status) => {
            debug!(counter = %counter.name, status = %status, "counter array skipped");
            Ok(Vec::new())
        }
    }
}

fn insert_records(
    values: &mut CounterValues,
    counter: &str,
    records: Converted,
    total_requested: bool,
) {
    let mut names = InstanceNames::new();
    for (instance, status, value) in records {
        let instance = normalize_instance(&instance);
        let instance = names.unique(instance);
        if !status.is_valid_data() {
            debug!(counter, instance = %instance, status = %status, "skipping record");
            continue;
        }
        if instance.ends_with(INSTANCE_TOTAL) && !total_requested {
            continue;
        }
        values
            .entry(instance)
            .or_default()
            .insert(counter.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::counter_types::{
        PERF_100NSEC_TIMER, PERF_AVERAGE_BULK, PERF_COUNTER_COUNTER, PERF_COUNTER_LARGE_RAWCOUNT,
    };
    use crate::collector::mock::{MockCounter, MockItem, MockPdh};
    use crate::model::CounterKind;

    fn options() -> SessionOptions {
        SessionOptions::default().os_build(19045)
    }

    fn memory_mock() -> MockPdh {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\Memory\\Available Bytes",
            MockCounter::new(PERF_COUNTER_LARGE_RAWCOUNT).item(MockItem::new("", 4096)),
        );
        pdh.add_counter(
            "\\Memory\\Page Faults/sec",
            MockCounter::new(PERF_COUNTER_COUNTER).item(MockItem::new("", 100).step(10)),
        );
        pdh
    }

    #[test]
    fn test_bind_and_collect_single_instance_object() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory")
            .counter(CounterSpec::new("Available Bytes"))
            .counter(CounterSpec::new("Page Faults/sec"));

        let report = Session::bind(pdh.clone(), &spec, &options()).unwrap();
        assert!(report.is_clean());
        let mut session = report.value;
        assert_eq!(pdh.collect_calls(), 1, "bind primes the query once");

        let values = session.collect().unwrap();
        let available = &values["------"]["Available Bytes"];
        assert_eq!(available.kind, CounterKind::Gauge);
        assert_eq!(available.first, 4096.0);
        let faults = &values["------"]["Page Faults/sec"];
        assert_eq!(faults.kind, CounterKind::Counter);
        assert_eq!(faults.first, 120.0);
    }

    #[test]
    fn test_min_build_suppresses_not_found() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory")
            .counter(CounterSpec::new("Available Bytes"))
            .counter(CounterSpec::new("Page Faults/sec"))
            .counter(CounterSpec::new("Modified Page List Bytes").since_build(99999));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.value.counters().count(), 2);
    }

    #[test]
    fn test_not_found_without_tag_is_accumulated() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory")
            .counter(CounterSpec::new("Available Bytes"))
            .counter(CounterSpec::new("Page Faults/sec"))
            .counter(CounterSpec::new("Modified Page List Bytes"));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert_eq!(report.value.counters().count(), 2);
        assert_eq!(report.failures.len(), 1);
        match &report.failures[0] {
            BindFailure::Register { path, error } => {
                assert_eq!(path, "\\Memory\\Modified Page List Bytes");
                assert_eq!(error.status, PdhStatus::CSTATUS_NO_COUNTER);
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_min_build_reached_still_reports_not_found() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory")
            .counter(CounterSpec::new("Available Bytes"))
            .counter(CounterSpec::new("Modified Page List Bytes").since_build(10000));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_no_counters_is_fatal_and_closes_query() {
        let pdh = MockPdh::new();
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));

        let err = Session::bind(pdh.clone(), &spec, &options()).unwrap_err();
        match err {
            BindError::NoCounters { object, failures } => {
                assert_eq!(object, "Memory");
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(pdh.open_queries(), 0);
    }

    #[test]
    fn test_metadata_failure_drops_counter() {
        let pdh = memory_mock();
        pdh.fail_info("\\Memory\\Page Faults/sec", PdhStatus::INVALID_HANDLE);
        let spec = QuerySpec::new("Memory")
            .counter(CounterSpec::new("Available Bytes"))
            .counter(CounterSpec::new("Page Faults/sec"));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert!(report.value.counter("Page Faults/sec").is_none());
        assert!(matches!(
            report.failures[0],
            BindFailure::Metadata { .. }
        ));
    }

    #[test]
    fn test_type_resolved_from_first_instance_only() {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\Processor(0)\\% Processor Time",
            MockCounter::new(PERF_100NSEC_TIMER).item(MockItem::new("0", 10_000_000)),
        );
        pdh.add_counter(
            "\\Processor(1)\\% Processor Time",
            MockCounter::new(PERF_100NSEC_TIMER).item(MockItem::new("1", 20_000_000)),
        );
        pdh.fail_info("\\Processor(1)\\% Processor Time", PdhStatus::INVALID_HANDLE);
        let spec = QuerySpec::new("Processor")
            .instance("0")
            .instance("1")
            .counter(CounterSpec::new("% Processor Time"));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert!(report.is_clean());
        let mut session = report.value;
        let counter = session.counter("% Processor Time").unwrap();
        assert_eq!(counter.native_type, PERF_100NSEC_TIMER);
        assert_eq!(counter.instances.len(), 2);

        let values = session.collect().unwrap();
        assert!((values["0"]["% Processor Time"].first - 1.0).abs() < 1e-9);
        assert!((values["1"]["% Processor Time"].first - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_elapsed_time_uses_time_base() {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\System\\System Up Time",
            MockCounter::new(PERF_ELAPSED_TIME)
                .frequency(10_000_000)
                .item(MockItem::new("", 1_000_000_000).second(1_500_000_000)),
        );
        let spec = QuerySpec::new("System").counter(CounterSpec::new("System Up Time"));

        let mut session = Session::bind(pdh, &spec, &options()).unwrap().value;
        assert_eq!(session.counter("System Up Time").unwrap().frequency, 10_000_000);
        let values = session.collect().unwrap();
        assert_eq!(values["------"]["System Up Time"].first, 50.0);
    }

    #[test]
    fn test_elapsed_time_without_time_base_drops_counter() {
        let pdh = memory_mock();
        pdh.add_counter(
            "\\Memory\\Up",
            MockCounter::new(PERF_ELAPSED_TIME).item(MockItem::new("", 1)),
        );
        let spec = QuerySpec::new("Memory")
            .counter(CounterSpec::new("Available Bytes"))
            .counter(CounterSpec::new("Up"));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert!(report.value.counter("Up").is_none());
        assert!(matches!(report.failures[0], BindFailure::TimeBase { .. }));
    }

    fn processor_mock() -> MockPdh {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\Processor(*)\\Interrupts/sec",
            MockCounter::new(PERF_COUNTER_COUNTER)
                .item(MockItem::new("0", 10))
                .item(MockItem::new("1", 20))
                .item(MockItem::new("_Total", 30)),
        );
        pdh
    }

    #[test]
    fn test_total_filtered_unless_requested() {
        let spec = QuerySpec::new("Processor")
            .instance("*")
            .counter(CounterSpec::new("Interrupts/sec"));
        let mut session = Session::bind(processor_mock(), &spec, &options())
            .unwrap()
            .value;
        let values = session.collect().unwrap();
        let instances: Vec<_> = values.keys().cloned().collect();
        assert_eq!(instances, vec!["0", "1"]);

        let pdh = processor_mock();
        pdh.add_counter(
            "\\Processor(_Total)\\Interrupts/sec",
            MockCounter::new(PERF_COUNTER_COUNTER).item(MockItem::new("_Total", 30)),
        );
        let spec = QuerySpec::new("Processor")
            .instance("*")
            .instance("_Total")
            .counter(CounterSpec::new("Interrupts/sec"));
        let mut session = Session::bind(pdh, &spec, &options()).unwrap().value;
        let values = session.collect().unwrap();
        assert_eq!(values["_Total"]["Interrupts/sec"].first, 30.0);
    }

    #[test]
    fn test_duplicate_and_invalid_records() {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\Process(*)\\Handle Count",
            MockCounter::new(PERF_COUNTER_LARGE_RAWCOUNT)
                .item(MockItem::new("svchost", 1))
                .item(MockItem::new("svchost", 2))
                .item(MockItem::new("idle", 3).status(PdhStatus::CSTATUS_INVALID_DATA)),
        );
        let spec = QuerySpec::new("Process")
            .instance("*")
            .counter(CounterSpec::new("Handle Count"));
        let mut session = Session::bind(pdh, &spec, &options()).unwrap().value;

        let values = session.collect().unwrap();
        assert_eq!(values["svchost"]["Handle Count"].first, 1.0);
        assert_eq!(values["svchost#1"]["Handle Count"].first, 2.0);
        assert!(!values.contains_key("idle"));
    }

    #[test]
    fn test_second_value_passthrough() {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\LogicalDisk(C:)\\Avg. Disk Bytes/Read",
            MockCounter::new(PERF_AVERAGE_BULK).item(MockItem::new("C:", 4096).second(8)),
        );
        pdh.add_counter(
            "\\LogicalDisk(C:)\\Disk Reads/sec",
            MockCounter::new(PERF_COUNTER_COUNTER).item(MockItem::new("C:", 5).second(9)),
        );
        let spec = QuerySpec::new("LogicalDisk")
            .instance("C:")
            .counter(CounterSpec::new("Avg. Disk Bytes/Read"))
            .counter(CounterSpec::new("Disk Reads/sec"));
        let mut session = Session::bind(pdh, &spec, &options()).unwrap().value;
        let values = session.collect().unwrap();

        let bulk = &values["C:"]["Avg. Disk Bytes/Read"];
        assert_eq!((bulk.first, bulk.second), (4096.0, 8.0));
        assert_eq!(values["C:"]["Disk Reads/sec"].second, 0.0);
    }

    #[test]
    fn test_priming_no_data_is_not_a_failure() {
        let pdh = memory_mock();
        pdh.script_collect([PdhStatus::NO_DATA]);
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));

        let report = Session::bind(pdh.clone(), &spec, &options()).unwrap();
        assert!(report.is_clean());

        pdh.script_collect([PdhStatus::NO_DATA]);
        let mut session = report.value;
        assert!(session.collect().unwrap_err().is_no_data());
    }

    #[test]
    fn test_priming_hard_error_is_reported() {
        let pdh = memory_mock();
        pdh.script_collect([PdhStatus::INVALID_HANDLE]);
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));

        let report = Session::bind(pdh, &spec, &options()).unwrap();
        assert!(matches!(report.failures[0], BindFailure::Prime(CollectError::Query(_))));
    }

    #[test]
    fn test_size_misreport_fails_cycle() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));
        let mut session = Session::bind(pdh.clone(), &spec, &options()).unwrap().value;

        pdh.misreport_array_size(true);
        match session.collect().unwrap_err() {
            CollectError::Fetch { path, error } => {
                assert_eq!(path, "\\Memory\\Available Bytes");
                assert!(matches!(error, FetchError::SizeMismatch { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_benign_array_status_yields_no_data() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));
        let mut session = Session::bind(pdh.clone(), &spec, &options()).unwrap().value;

        pdh.set_array_status("\\Memory\\Available Bytes", PdhStatus::CSTATUS_NO_INSTANCE);
        assert!(session.collect().unwrap_err().is_no_data());

        pdh.set_array_status("\\Memory\\Available Bytes", PdhStatus::INVALID_HANDLE);
        assert!(matches!(
            session.collect().unwrap_err(),
            CollectError::Fetch { .. }
        ));
    }

    #[test]
    fn test_formatted_mode() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Page Faults/sec"));
        let opts = options().value_mode(ValueMode::Formatted);
        let mut session = Session::bind(pdh, &spec, &opts).unwrap().value;

        let value = &session.collect().unwrap()["------"]["Page Faults/sec"];
        assert_eq!(value.kind, CounterKind::Gauge);
        assert_eq!(value.first, 120.0);
    }

    #[test]
    fn test_formatted_mode_filters_total_and_invalid_records() {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\Processor(*)\\% Processor Time",
            MockCounter::new(PERF_COUNTER_COUNTER)
                .item(MockItem::new("0", 12))
                .item(MockItem::new("1", 40).status(PdhStatus::CSTATUS_INVALID_DATA))
                .item(MockItem::new("_Total", 26)),
        );
        let spec = QuerySpec::new("Processor")
            .instance("*")
            .counter(CounterSpec::new("% Processor Time"));
        let opts = options().value_mode(ValueMode::Formatted);
        let mut session = Session::bind(pdh, &spec, &opts).unwrap().value;

        let values = session.collect().unwrap();
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["0"]);
        let value = &values["0"]["% Processor Time"];
        assert_eq!(value.kind, CounterKind::Gauge);
        assert_eq!(value.first, 12.0);
        assert_eq!(value.second, 0.0);
    }

    #[test]
    fn test_close_invalidates_session() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));
        let mut session = Session::bind(pdh.clone(), &spec, &options()).unwrap().value;
        assert_eq!(pdh.open_queries(), 1);

        session.close();
        assert!(!session.is_open());
        assert_eq!(pdh.open_queries(), 0);
        assert!(matches!(
            session.collect().unwrap_err(),
            CollectError::NotInitialized
        ));
    }

    #[test]
    fn test_drop_closes_query() {
        let pdh = memory_mock();
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));
        drop(Session::bind(pdh.clone(), &spec, &options()).unwrap());
        assert_eq!(pdh.open_queries(), 0);
    }
}
