//! Typed record schemas.
//!
//! A [`Schema`] maps counters of one object onto fields of a record type. It
//! produces the [`QuerySpec`] to bind and turns each cycle's [`CounterValues`] into
//! one record per instance.
//!
//! ```
//! use rwinperf::collector::Schema;
//!
//! #[derive(Default)]
//! struct Disk {
//!     name: String,
//!     reads: f64,
//!     read_time: f64,
//!     read_base: f64,
//! }
//!
//! let schema = Schema::<Disk>::new("LogicalDisk")
//!     .instance("*")
//!     .instance_name(|d, name| d.name = name.to_string())
//!     .counter("Disk Reads/sec", |d, v| d.reads = v)
//!     .counter("Avg. Disk sec/Read", |d, v| d.read_time = v)
//!     .second_value("Avg. Disk sec/Read", |d, v| d.read_base = v);
//! assert_eq!(schema.query_spec().counters.len(), 2);
//! ```

use std::io;

use crate::collector::error::{BindError, BindReport, CollectError};
use crate::collector::pdh::SessionOptions;
use crate::collector::query::{CounterSpec, QuerySpec, SpecError};
use crate::collector::traits::{PdhApi, PerfDataSource};
use crate::collector::worker::Collector;
use crate::model::CounterValues;

struct Field<T> {
    counter: CounterSpec,
    set: fn(&mut T, f64),
}

/// Field mapping for record type `T`.
pub struct Schema<T> {
    object: String,
    instances: Vec<String>,
    instance_name: Option<fn(&mut T, &str)>,
    fields: Vec<Field<T>>,
}

impl<T: Default> Schema<T> {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            instances: Vec::new(),
            instance_name: None,
            fields: Vec::new(),
        }
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instances.push(instance.into());
        self
    }

    /// Field receiving the instance name of each record.
    pub fn instance_name(mut self, set: fn(&mut T, &str)) -> Self {
        self.instance_name = Some(set);
        self
    }

    /// Field receiving the counter's first value.
    pub fn counter(self, name: &str, set: fn(&mut T, f64)) -> Self {
        self.field(CounterSpec::new(name), set)
    }

    /// Field receiving the counter's second value.
    pub fn second_value(self, name: &str, set: fn(&mut T, f64)) -> Self {
        self.field(CounterSpec::new(name).with_second_value(), set)
    }

    /// Field for a counter that only exists from `build` on.
    pub fn since_build(self, name: &str, build: u32, set: fn(&mut T, f64)) -> Self {
        self.field(CounterSpec::new(name).since_build(build), set)
    }

    /// Field declared by a tag of the form `"<Counter Name>[,secondvalue]"`.
    pub fn tagged(self, tag: &str, set: fn(&mut T, f64)) -> Result<Self, SpecError> {
        Ok(self.field(CounterSpec::from_tag(tag)?, set))
    }

    fn field(mut self, counter: CounterSpec, set: fn(&mut T, f64)) -> Self {
        self.fields.push(Field { counter, set });
        self
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Query covering every field; fields of the same counter share one registration.
    pub fn query_spec(&self) -> QuerySpec {
        let mut spec = QuerySpec::new(self.object.clone());
        spec.instances = self.instances.clone();
        for field in &self.fields {
            spec.add_counter(field.counter.clone());
        }
        spec
    }

    /// Builds one record per instance, ordered by instance name.
    pub fn populate(&self, values: &CounterValues) -> Vec<T> {
        values
            .iter()
            .map(|(instance, counters)| {
                let mut record = T::default();
                if let Some(set) = self.instance_name {
                    set(&mut record, instance);
                }
                for field in &self.fields {
                    if let Some(value) = counters.get(&field.counter.name) {
                        let v = if field.counter.second_value {
                            value.second
                        } else {
                            value.first
                        };
                        (field.set)(&mut record, v);
                    }
                }
                record
            })
            .collect()
    }
}

/// A [`Collector`] that yields typed records.
pub struct RecordCollector<T> {
    schema: Schema<T>,
    collector: Collector,
}

impl<T: Default> RecordCollector<T> {
    pub fn bind<P: PdhApi + 'static>(
        api: P,
        schema: Schema<T>,
        options: &SessionOptions,
    ) -> Result<BindReport<Self>, BindError> {
        let report = Collector::bind(api, &schema.query_spec(), options)?;
        Ok(report.map(|collector| Self { schema, collector }))
    }

    pub fn perflib<S: PerfDataSource + 'static>(source: S, schema: Schema<T>) -> io::Result<Self> {
        let collector = Collector::perflib(source, schema.query_spec())?;
        Ok(Self { schema, collector })
    }

    /// Replaces `dest` with this cycle's records. `dest` is left untouched on error.
    pub fn collect(&self, dest: &mut Vec<T>) -> Result<(), CollectError> {
        let values = self.collector.collect()?;
        *dest = self.schema.populate(&values);
        Ok(())
    }

    pub fn close(&self) {
        self.collector.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::{MockPdh, MockPerfData};
    use crate::model::CounterValue;

    #[derive(Debug, Default, PartialEq)]
    struct Disk {
        name: String,
        read_time: f64,
        read_base: f64,
        free: f64,
        free_base: f64,
    }

    fn disk_schema() -> Schema<Disk> {
        Schema::<Disk>::new("LogicalDisk")
            .instance("*")
            .instance_name(|d, name| d.name = name.to_string())
            .counter("Avg. Disk sec/Read", |d, v| d.read_time = v)
            .second_value("Avg. Disk sec/Read", |d, v| d.read_base = v)
            .tagged("% Free Space", |d, v| d.free = v)
            .unwrap()
            .tagged("% Free Space,secondvalue", |d, v| d.free_base = v)
            .unwrap()
    }

    #[test]
    fn test_query_spec_merges_fields() {
        let spec = disk_schema().query_spec();
        assert_eq!(spec.object, "LogicalDisk");
        assert_eq!(spec.instances, vec!["*"]);
        assert_eq!(spec.counters.len(), 2);
        assert!(spec.counters.iter().all(|c| c.second_value));
    }

    #[test]
    fn test_populate_routes_first_and_second() {
        let mut values = CounterValues::new();
        let c = values.entry("C:".to_string()).or_default();
        c.insert(
            "Avg. Disk sec/Read".to_string(),
            CounterValue {
                second: 40.0,
                ..CounterValue::counter(120.0)
            },
        );
        values
            .entry("D:".to_string())
            .or_default()
            .insert("% Free Space".to_string(), CounterValue::gauge(5.0));

        let records = disk_schema().populate(&values);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "C:");
        assert_eq!((records[0].read_time, records[0].read_base), (120.0, 40.0));
        assert_eq!(records[1].name, "D:");
        assert_eq!(records[1].free, 5.0);
        assert_eq!(records[1].read_time, 0.0);
    }

    #[test]
    fn test_tagged_rejects_unknown_option() {
        let result = Schema::<Disk>::new("LogicalDisk").tagged("% Free Space,bogus", |d, v| d.free = v);
        assert!(result.is_err());
    }

    #[test]
    fn test_record_collector_live() {
        let options = SessionOptions::default().os_build(19045);
        let collector = RecordCollector::bind(MockPdh::typical_system(), disk_schema(), &options)
            .unwrap()
            .value;

        let mut disks = vec![Disk::default()];
        collector.collect(&mut disks).unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].name, "C:");
        assert_eq!(disks[0].read_base, 40.0);
        assert_eq!((disks[0].free, disks[0].free_base), (51_200.0, 102_400.0));
    }

    #[test]
    fn test_record_collector_perflib_matches_live() {
        let collector = RecordCollector::perflib(
            MockPerfData::typical_system(),
            disk_schema(),
        )
        .unwrap();
        let mut disks = Vec::new();
        collector.collect(&mut disks).unwrap();

        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].name, "C:");
        assert_eq!((disks[0].read_time, disks[0].read_base), (120_000.0, 40.0));
        assert_eq!((disks[0].free, disks[0].free_base), (51_200.0, 102_400.0));
        collector.close();
    }
}
