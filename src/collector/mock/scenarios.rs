//! Pre-built mock scenarios for testing.
//!
//! These provide realistic counter sets for a small Windows host: two CPUs, one
//! logical disk and the single-instance Memory and System objects.

use super::pdh::{MockCounter, MockItem, MockPdh};
use super::perfdata::{MockPerfData, ObjectBuilder, PerfDataBuilder};
use crate::collector::counter_types::{
    PERF_100NSEC_TIMER, PERF_100NSEC_TIMER_INV, PERF_AVERAGE_BASE, PERF_AVERAGE_TIMER,
    PERF_COUNTER_COUNTER, PERF_COUNTER_LARGE_RAWCOUNT, PERF_ELAPSED_TIME, PERF_RAW_BASE,
    PERF_RAW_FRACTION,
};
use crate::collector::perflib::COUNTER_TABLE;

/// 100ns ticks per second.
const TICKS: i64 = 10_000_000;

/// English counter names of the typical system, as stored in the registry.
pub const TYPICAL_NAMES: &[(u32, &str)] = &[
    (2, "System"),
    (4, "Memory"),
    (6, "% Processor Time"),
    (142, "% User Time"),
    (148, "Interrupts/sec"),
    (208, "Avg. Disk sec/Read"),
    (209, "Avg. Disk sec/Read"),
    (236, "LogicalDisk"),
    (238, "Processor"),
    (410, "% Free Space"),
    (411, "% Free Space"),
    (674, "System Up Time"),
    (1380, "Available Bytes"),
];

#[allow(dead_code)]
impl MockPdh {
    /// Creates a typical system.
    ///
    /// Rate counters advance every collection so consecutive samples differ.
    pub fn typical_system() -> Self {
        let pdh = Self::new();

        let cpus = [("0", 7), ("1", 9), ("_Total", 16)];
        let mut processor_time = MockCounter::new(PERF_100NSEC_TIMER_INV);
        let mut user_time = MockCounter::new(PERF_100NSEC_TIMER);
        let mut interrupts = MockCounter::new(PERF_COUNTER_COUNTER);
        for (name, load) in cpus {
            processor_time = processor_time.item(MockItem::new(name, 1_000 * TICKS).step(load * TICKS / 10));
            user_time = user_time.item(MockItem::new(name, 400 * TICKS).step(load * TICKS / 20));
            interrupts = interrupts.item(MockItem::new(name, 50_000).step(load * 100));
        }
        pdh.add_counter("\\Processor(*)\\% Processor Time", processor_time);
        pdh.add_counter("\\Processor(*)\\% User Time", user_time);
        pdh.add_counter("\\Processor(*)\\Interrupts/sec", interrupts);

        pdh.add_counter(
            "\\Memory\\Available Bytes",
            MockCounter::new(PERF_COUNTER_LARGE_RAWCOUNT)
                .item(MockItem::new("", 6 << 30).step(-(1 << 20))),
        );
        pdh.add_counter(
            "\\System\\System Up Time",
            MockCounter::new(PERF_ELAPSED_TIME)
                .frequency(TICKS)
                .item(MockItem::new("", 0).second(3_600 * TICKS)),
        );
        pdh.add_counter(
            "\\LogicalDisk(*)\\Avg. Disk sec/Read",
            MockCounter::new(PERF_AVERAGE_TIMER)
                .item(MockItem::new("C:", 120_000).second(40).step(3_000))
                .item(MockItem::new("_Total", 120_000).second(40).step(3_000)),
        );
        pdh.add_counter(
            "\\LogicalDisk(*)\\% Free Space",
            MockCounter::new(PERF_RAW_FRACTION)
                .item(MockItem::new("C:", 51_200).second(102_400))
                .item(MockItem::new("_Total", 51_200).second(102_400)),
        );
        pdh
    }
}

#[allow(dead_code)]
impl MockPerfData {
    /// Creates the raw-data view of [`MockPdh::typical_system`].
    ///
    /// Blocks are keyed by object index and the `Counter` name table holds
    /// [`TYPICAL_NAMES`].
    pub fn typical_system() -> Self {
        let processor = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(238)
                    .perf_time(5_000 * TICKS, TICKS)
                    .counter(6, PERF_100NSEC_TIMER_INV)
                    .counter(142, PERF_100NSEC_TIMER)
                    .counter(148, PERF_COUNTER_COUNTER)
                    .instance("0", &[1_000 * TICKS as u64, 400 * TICKS as u64, 50_000])
                    .instance("1", &[1_100 * TICKS as u64, 420 * TICKS as u64, 60_000])
                    .instance("_Total", &[2_100 * TICKS as u64, 820 * TICKS as u64, 110_000]),
            )
            .build();
        let memory = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(4)
                    .counter(1380, PERF_COUNTER_LARGE_RAWCOUNT)
                    .single(&[6 << 30]),
            )
            .build();
        let system = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(2)
                    .perf_time(5_000 * TICKS, TICKS)
                    .counter(674, PERF_ELAPSED_TIME)
                    .single(&[1_400 * TICKS as u64]),
            )
            .build();
        let disk = PerfDataBuilder::new()
            .object(
                ObjectBuilder::new(236)
                    .perf_time(5_000 * TICKS, TICKS)
                    .counter(208, PERF_AVERAGE_TIMER)
                    .counter(209, PERF_AVERAGE_BASE)
                    .counter(410, PERF_RAW_FRACTION)
                    .counter(411, PERF_RAW_BASE)
                    .instance("C:", &[120_000, 40, 51_200, 102_400])
                    .instance("_Total", &[120_000, 40, 51_200, 102_400]),
            )
            .build();

        Self::new()
            .with_table(COUNTER_TABLE, TYPICAL_NAMES)
            .with_block("238", processor)
            .with_block("4", memory)
            .with_block("2", system)
            .with_block("236", disk)
    }
}
