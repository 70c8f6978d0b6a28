//! Counter collection from raw performance data, without a live query.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::collector::counter_types::{convert, is_base};
use crate::collector::error::CollectError;
use crate::collector::perflib::layout::{self, PerfData, PerfObject};
use crate::collector::perflib::names::{NameTable, NameTables};
use crate::collector::query::{
    CounterSpec, INSTANCE_TOTAL, InstanceNames, QuerySpec, normalize_instance,
};
use crate::collector::traits::PerfDataSource;
use crate::collector::worker::CounterSource;
use crate::model::CounterValues;

/// Name table holding object and counter names.
pub const COUNTER_TABLE: &str = "Counter";

/// Reads one object from raw performance data and converts it like a live session.
pub struct PerflibCollector<S: PerfDataSource> {
    source: S,
    tables: Arc<NameTables>,
    spec: QuerySpec,
}

impl<S: PerfDataSource> PerflibCollector<S> {
    pub fn new(source: S, spec: QuerySpec) -> Self {
        Self {
            source,
            tables: NameTables::global(),
            spec,
        }
    }

    /// Uses a private name table cache instead of the process-wide one.
    pub fn with_name_tables(mut self, tables: Arc<NameTables>) -> Self {
        self.tables = tables;
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn collect(&self) -> Result<CounterValues, CollectError> {
        let names = self.tables.table(&self.source, COUNTER_TABLE)?;
        let index = names
            .index(&self.spec.object)
            .ok_or_else(|| CollectError::UnknownObject(self.spec.object.clone()))?;

        let raw = self.source.query(&index.to_string())?;
        let data = layout::decode(&raw)?;
        debug!(
            object = %self.spec.object,
            index,
            bytes = raw.len(),
            objects = data.objects.len(),
            "decoded performance data"
        );

        let values = extract(&data, &names, &self.spec);
        if values.is_empty() {
            return Err(CollectError::NoData);
        }
        Ok(values)
    }
}

impl<S: PerfDataSource> CounterSource for PerflibCollector<S> {
    fn name(&self) -> &str {
        &self.spec.object
    }

    fn collect(&mut self) -> Result<CounterValues, CollectError> {
        PerflibCollector::collect(self)
    }

    fn reset(&mut self) {}

    fn close(&mut self) {}
}

/// Converts the requested object's counters from a decoded block.
///
/// Objects whose name does not match are skipped; so are base counters and the
/// `_Total` instance unless the spec asks for it.
pub fn extract(data: &PerfData, names: &NameTable, spec: &QuerySpec) -> CounterValues {
    let total_requested = spec.total_requested();
    let mut values = CounterValues::new();

    for object in &data.objects {
        if names.name(object.header.object_name_title_index) != Some(spec.object.as_str()) {
            continue;
        }

        let wanted = resolve_counters(object, names, spec);
        let mut instance_names = InstanceNames::new();
        for instance in &object.instances {
            let name = normalize_instance(instance.name.as_deref().unwrap_or_default());
            let name = instance_names.unique(name);
            if name.ends_with(INSTANCE_TOTAL) && !total_requested {
                continue;
            }
            if !spec.selects(&name) {
                continue;
            }

            for &(counter, index) in &wanted {
                let (first, second) = object.sample(instance, index);
                let value = convert(
                    object.counters[index].counter_type,
                    first,
                    second,
                    object.header.perf_freq,
                    counter.second_value,
                );
                values
                    .entry(name.clone())
                    .or_default()
                    .insert(counter.name.clone(), value);
            }
        }
    }
    values
}

fn resolve_counters<'a>(
    object: &PerfObject,
    names: &NameTable,
    spec: &'a QuerySpec,
) -> Vec<(&'a CounterSpec, usize)> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (index, def) in object.counters.iter().enumerate() {
        if is_base(def.counter_type) {
            continue;
        }
        if let Some(name) = names.name(def.counter_name_title_index) {
            by_name.entry(name).or_insert(index);
        }
    }

    spec.counters
        .iter()
        .filter_map(|counter| match by_name.get(counter.name.as_str()) {
            Some(&index) => Some((counter, index)),
            None => {
                warn!(object = %spec.object, counter = %counter.name, "counter not found in performance data");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::counter_types::{
        PERF_100NSEC_TIMER, PERF_AVERAGE_BASE, PERF_AVERAGE_TIMER, PERF_COUNTER_COUNTER,
        PERF_ELAPSED_TIME,
    };
    use crate::collector::mock::{MockPerfData, ObjectBuilder, PerfDataBuilder};
    use crate::model::CounterKind;

    const NAMES: &[(u32, &str)] = &[
        (2, "System"),
        (6, "% Processor Time"),
        (148, "Interrupts/sec"),
        (208, "Avg. Disk sec/Read"),
        (209, "Avg. Disk sec/Read"),
        (236, "LogicalDisk"),
        (238, "Processor"),
        (674, "System Up Time"),
    ];

    fn processor_block() -> Vec<u8> {
        PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(238)
                    .counter(6, PERF_100NSEC_TIMER)
                    .counter(148, PERF_COUNTER_COUNTER)
                    .instance("0", &[20_000_000, 10])
                    .instance("1", &[40_000_000, 20])
                    .instance("_Total", &[60_000_000, 30]),
            )
            .build()
    }

    fn collector(spec: QuerySpec) -> PerflibCollector<MockPerfData> {
        let source = MockPerfData::new()
            .with_table(COUNTER_TABLE, NAMES)
            .with_block("238", processor_block());
        PerflibCollector::new(source, spec).with_name_tables(Arc::new(NameTables::new()))
    }

    #[test]
    fn test_collect_converts_and_filters_total() {
        let spec = QuerySpec::new("Processor")
            .instance("*")
            .counter(CounterSpec::new("% Processor Time"))
            .counter(CounterSpec::new("Interrupts/sec"));
        let values = collector(spec).collect().unwrap();

        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["0", "1"]);
        let cpu = &values["1"]["% Processor Time"];
        assert!((cpu.first - 4.0).abs() < 1e-9);
        assert_eq!(cpu.kind, CounterKind::Counter);
        assert_eq!(values["0"]["Interrupts/sec"].first, 10.0);
    }

    #[test]
    fn test_collect_total_when_requested() {
        let spec = QuerySpec::new("Processor")
            .instance("_Total")
            .counter(CounterSpec::new("Interrupts/sec"));
        let values = collector(spec).collect().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values["_Total"]["Interrupts/sec"].first, 30.0);
    }

    #[test]
    fn test_collect_unknown_object() {
        let spec = QuerySpec::new("Nope").counter(CounterSpec::new("Interrupts/sec"));
        assert!(matches!(
            collector(spec).collect(),
            Err(CollectError::UnknownObject(_))
        ));
    }

    #[test]
    fn test_collect_missing_counter_is_no_data() {
        let spec = QuerySpec::new("Processor").counter(CounterSpec::new("System Up Time"));
        assert!(collector(spec).collect().unwrap_err().is_no_data());
    }

    #[test]
    fn test_collect_corrupt_block_is_decode_error() {
        let mut block = processor_block();
        block.truncate(block.len() - 1);
        let source = MockPerfData::new()
            .with_table(COUNTER_TABLE, NAMES)
            .with_block("238", block);
        let spec = QuerySpec::new("Processor").counter(CounterSpec::new("Interrupts/sec"));
        let collector =
            PerflibCollector::new(source, spec).with_name_tables(Arc::new(NameTables::new()));
        assert!(matches!(collector.collect(), Err(CollectError::Decode(_))));
    }

    #[test]
    fn test_collect_missing_name_table() {
        let source = MockPerfData::new().with_block("238", processor_block());
        let spec = QuerySpec::new("Processor").counter(CounterSpec::new("Interrupts/sec"));
        let collector =
            PerflibCollector::new(source, spec).with_name_tables(Arc::new(NameTables::new()));
        assert!(matches!(collector.collect(), Err(CollectError::NameTable(_))));
    }

    #[test]
    fn test_extract_base_pairing_and_elapsed_time() {
        let block = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(236)
                    .perf_time(50_000_000, 10_000_000)
                    .counter(208, PERF_AVERAGE_TIMER)
                    .counter(209, PERF_AVERAGE_BASE)
                    .instance("C:", &[1_200, 4]),
            )
            .object(
                ObjectBuilder::new(2)
                    .perf_time(50_000_000, 10_000_000)
                    .counter(674, PERF_ELAPSED_TIME)
                    .single(&[10_000_000]),
            )
            .build();
        let data = layout::decode(&block).unwrap();
        let names = NameTable::parse(&crate::collector::mock::encode_name_table(NAMES)).unwrap();

        let disk = QuerySpec::new("LogicalDisk")
            .instance("*")
            .counter(CounterSpec::new("Avg. Disk sec/Read").with_second_value());
        let values = extract(&data, &names, &disk);
        let read = &values["C:"]["Avg. Disk sec/Read"];
        assert_eq!((read.first, read.second), (1_200.0, 4.0));

        let system = QuerySpec::new("System").counter(CounterSpec::new("System Up Time"));
        let values = extract(&data, &names, &system);
        assert_eq!(values["------"]["System Up Time"].first, 4.0);
    }
}
