//! Synthetic raw performance data for the perflib decoder.
//!
//! [`PerfDataBuilder`] encodes objects, counter definitions and instances into the
//! same binary layout the registry returns, and [`MockPerfData`] serves such blocks
//! together with name tables through [`PerfDataSource`].

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::collector::counter_types::{PERF_SIZE_LARGE, PERF_SIZE_MASK, PERF_SIZE_ZERO};
use crate::collector::perflib::layout::{
    PERF_COUNTER_DEFINITION_SIZE, PERF_DATA_BLOCK_SIZE, PERF_INSTANCE_DEFINITION_SIZE,
    PERF_NO_INSTANCES, PERF_OBJECT_TYPE_SIZE, SIGNATURE,
};
use crate::collector::traits::PerfDataSource;

fn utf16z(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

fn pad8(buf: &mut Vec<u8>) {
    buf.resize(buf.len().next_multiple_of(8), 0);
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn counter_size(counter_type: u32) -> u32 {
    match counter_type & PERF_SIZE_MASK {
        PERF_SIZE_LARGE => 8,
        PERF_SIZE_ZERO => 0,
        _ => 4,
    }
}

/// Encodes a `REG_MULTI_SZ` name table from `(index, name)` pairs.
pub fn encode_name_table(entries: &[(u32, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, name) in entries {
        out.extend(utf16z(&index.to_string()));
        out.extend(utf16z(name));
    }
    out.extend([0, 0]);
    out
}

/// One performance object of a synthetic block.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    name_index: u32,
    perf_time: i64,
    perf_freq: i64,
    counters: Vec<(u32, u32)>,
    instances: Vec<(String, Vec<u64>)>,
    single: Option<Vec<u64>>,
}

impl ObjectBuilder {
    pub fn new(name_index: u32) -> Self {
        Self {
            name_index,
            perf_time: 0,
            perf_freq: 0,
            counters: Vec::new(),
            instances: Vec::new(),
            single: None,
        }
    }

    pub fn perf_time(mut self, time: i64, freq: i64) -> Self {
        self.perf_time = time;
        self.perf_freq = freq;
        self
    }

    /// Adds a counter definition; values are given per instance in this order.
    pub fn counter(mut self, name_index: u32, counter_type: u32) -> Self {
        self.counters.push((name_index, counter_type));
        self
    }

    pub fn instance(mut self, name: &str, values: &[u64]) -> Self {
        self.instances.push((name.to_string(), values.to_vec()));
        self
    }

    /// Makes this an object without instances.
    pub fn single(mut self, values: &[u64]) -> Self {
        self.single = Some(values.to_vec());
        self
    }

    fn counter_block(&self, values: &[u64]) -> (Vec<u8>, Vec<u32>) {
        let mut block = vec![0u8; 8];
        let mut offsets = Vec::with_capacity(self.counters.len());
        for (i, &(_, counter_type)) in self.counters.iter().enumerate() {
            let size = counter_size(counter_type) as usize;
            if size == 8 {
                pad8(&mut block);
            }
            offsets.push(block.len() as u32);
            let value = values.get(i).copied().unwrap_or(0);
            block.extend_from_slice(&value.to_le_bytes()[..size]);
        }
        pad8(&mut block);
        let len = block.len() as u32;
        put_u32(&mut block, 0, len);
        (block, offsets)
    }

    fn encode(&self) -> Vec<u8> {
        let template: Vec<u64> = vec![0; self.counters.len()];
        let (_, offsets) = self.counter_block(&template);

        let mut body = Vec::new();
        let num_instances = match &self.single {
            Some(values) => {
                body.extend(self.counter_block(values).0);
                PERF_NO_INSTANCES
            }
            None => {
                for (name, values) in &self.instances {
                    let name_bytes = utf16z(name);
                    let mut definition = vec![0u8; PERF_INSTANCE_DEFINITION_SIZE];
                    definition.extend(&name_bytes);
                    pad8(&mut definition);
                    let len = definition.len() as u32;
                    put_u32(&mut definition, 0, len);
                    put_u32(&mut definition, 12, u32::MAX);
                    put_u32(&mut definition, 16, PERF_INSTANCE_DEFINITION_SIZE as u32);
                    put_u32(&mut definition, 20, name_bytes.len() as u32);
                    body.extend(definition);
                    body.extend(self.counter_block(values).0);
                }
                self.instances.len() as i32
            }
        };

        let definition_length =
            PERF_OBJECT_TYPE_SIZE + PERF_COUNTER_DEFINITION_SIZE * self.counters.len();
        let total = definition_length + body.len();

        let mut out = vec![0u8; PERF_OBJECT_TYPE_SIZE];
        put_u32(&mut out, 0, total as u32);
        put_u32(&mut out, 4, definition_length as u32);
        put_u32(&mut out, 8, PERF_OBJECT_TYPE_SIZE as u32);
        put_u32(&mut out, 12, self.name_index);
        put_u32(&mut out, 20, self.name_index + 1);
        put_u32(&mut out, 28, 100);
        put_u32(&mut out, 32, self.counters.len() as u32);
        out[40..44].copy_from_slice(&num_instances.to_le_bytes());
        out[48..56].copy_from_slice(&self.perf_time.to_le_bytes());
        out[56..64].copy_from_slice(&self.perf_freq.to_le_bytes());

        for (&(name_index, counter_type), offset) in self.counters.iter().zip(offsets) {
            let mut def = vec![0u8; PERF_COUNTER_DEFINITION_SIZE];
            put_u32(&mut def, 0, PERF_COUNTER_DEFINITION_SIZE as u32);
            put_u32(&mut def, 4, name_index);
            put_u32(&mut def, 12, name_index + 1);
            put_u32(&mut def, 24, 100);
            put_u32(&mut def, 28, counter_type);
            put_u32(&mut def, 32, counter_size(counter_type));
            put_u32(&mut def, 36, offset);
            out.extend(def);
        }
        out.extend(body);
        out
    }
}

/// Encodes a complete `PERF_DATA_BLOCK`.
#[derive(Debug, Clone, Default)]
pub struct PerfDataBuilder {
    system_name: Option<String>,
    perf_time: i64,
    perf_freq: i64,
    objects: Vec<ObjectBuilder>,
}

impl PerfDataBuilder {
    pub fn new() -> Self {
        Self {
            perf_freq: 10_000_000,
            ..Self::default()
        }
    }

    pub fn system_name(mut self, name: &str) -> Self {
        self.system_name = Some(name.to_string());
        self
    }

    pub fn object(mut self, object: ObjectBuilder) -> Self {
        self.objects.push(object);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; PERF_DATA_BLOCK_SIZE];
        out[..8].copy_from_slice(&SIGNATURE);
        put_u32(&mut out, 8, 1);
        put_u32(&mut out, 12, 1);
        put_u32(&mut out, 16, 1);
        put_u32(&mut out, 28, self.objects.len() as u32);
        out[32..36].copy_from_slice(&(-1i32).to_le_bytes());
        out[56..64].copy_from_slice(&self.perf_time.to_le_bytes());
        out[64..72].copy_from_slice(&self.perf_freq.to_le_bytes());

        if let Some(name) = &self.system_name {
            let name = utf16z(name);
            put_u32(&mut out, 80, name.len() as u32);
            put_u32(&mut out, 84, PERF_DATA_BLOCK_SIZE as u32);
            out.extend(name);
        }
        pad8(&mut out);
        let header_length = out.len() as u32;
        put_u32(&mut out, 24, header_length);

        for object in &self.objects {
            out.extend(object.encode());
        }
        let total = out.len() as u32;
        put_u32(&mut out, 20, total);
        out
    }
}

/// In-memory [`PerfDataSource`].
#[derive(Debug, Clone, Default)]
pub struct MockPerfData {
    blocks: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    tables: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    table_reads: Arc<AtomicUsize>,
    query_reads: Arc<AtomicUsize>,
}

impl MockPerfData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `block` for the given query string (usually an object index).
    pub fn with_block(self, query: &str, block: Vec<u8>) -> Self {
        self.set_block(query, block);
        self
    }

    pub fn set_block(&self, query: &str, block: Vec<u8>) {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query.to_string(), block);
    }

    pub fn with_table(self, table: &str, entries: &[(u32, &str)]) -> Self {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), encode_name_table(entries));
        self
    }

    pub fn with_raw_table(self, table: &str, raw: Vec<u8>) -> Self {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), raw);
        self
    }

    pub fn table_reads(&self) -> usize {
        self.table_reads.load(Ordering::SeqCst)
    }

    pub fn query_reads(&self) -> usize {
        self.query_reads.load(Ordering::SeqCst)
    }
}

impl PerfDataSource for MockPerfData {
    fn query(&self, query: &str) -> io::Result<Vec<u8>> {
        self.query_reads.fetch_add(1, Ordering::SeqCst);
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(query)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no performance data for query {:?}", query),
                )
            })
    }

    fn name_table(&self, table: &str) -> io::Result<Vec<u8>> {
        self.table_reads.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("name table {:?} not found", table),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_table_encoding() {
        let raw = encode_name_table(&[(2, "System")]);
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        let expected: Vec<u16> = "2\0System\0\0".encode_utf16().collect();
        assert_eq!(units, expected);
    }

    #[test]
    fn test_block_lengths_are_consistent() {
        let block = PerfDataBuilder::new()
            .object(ObjectBuilder::new(4).counter(24, 0x0001_0100).single(&[1]))
            .build();
        let total = u32::from_le_bytes([block[20], block[21], block[22], block[23]]);
        assert_eq!(total as usize, block.len());
        assert_eq!(block.len() % 8, 0);
    }

    #[test]
    fn test_missing_block_is_not_found() {
        let source = MockPerfData::new();
        let err = source.query("238").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(source.query_reads(), 1);
    }
}
