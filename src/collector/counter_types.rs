//! Performance counter type codes and value conversion rules.
//!
//! Type codes are the `CounterType` values from `winperf.h`. Conversion is a pure
//! function of the type code, the two raw values of a sample and (for elapsed-time
//! counters) the counter frequency.

use crate::model::{CounterKind, CounterValue};

pub const PERF_COUNTER_RAWCOUNT_HEX: u32 = 0x0000_0000;
pub const PERF_COUNTER_LARGE_RAWCOUNT_HEX: u32 = 0x0000_0100;
pub const PERF_COUNTER_TEXT: u32 = 0x0000_0B00;
pub const PERF_COUNTER_RAWCOUNT: u32 = 0x0001_0000;
pub const PERF_COUNTER_LARGE_RAWCOUNT: u32 = 0x0001_0100;
pub const PERF_COUNTER_DELTA: u32 = 0x0040_0400;
pub const PERF_COUNTER_LARGE_DELTA: u32 = 0x0040_0500;
pub const PERF_SAMPLE_COUNTER: u32 = 0x0041_0400;
pub const PERF_COUNTER_QUEUELEN_TYPE: u32 = 0x0045_0400;
pub const PERF_COUNTER_LARGE_QUEUELEN_TYPE: u32 = 0x0045_0500;
pub const PERF_COUNTER_100NS_QUEUELEN_TYPE: u32 = 0x0055_0500;
pub const PERF_COUNTER_OBJ_TIME_QUEUELEN_TYPE: u32 = 0x0065_0500;
pub const PERF_COUNTER_COUNTER: u32 = 0x1041_0400;
pub const PERF_COUNTER_BULK_COUNT: u32 = 0x1041_0500;
pub const PERF_RAW_FRACTION: u32 = 0x2002_0400;
pub const PERF_LARGE_RAW_FRACTION: u32 = 0x2002_0500;
pub const PERF_COUNTER_TIMER: u32 = 0x2041_0500;
pub const PERF_PRECISION_SYSTEM_TIMER: u32 = 0x2047_0500;
pub const PERF_100NSEC_TIMER: u32 = 0x2051_0500;
pub const PERF_PRECISION_100NS_TIMER: u32 = 0x2057_0500;
pub const PERF_OBJ_TIME_TIMER: u32 = 0x2061_0500;
pub const PERF_PRECISION_OBJECT_TIMER: u32 = 0x2067_0500;
pub const PERF_SAMPLE_FRACTION: u32 = 0x20C2_0400;
pub const PERF_COUNTER_TIMER_INV: u32 = 0x2141_0500;
pub const PERF_100NSEC_TIMER_INV: u32 = 0x2151_0500;
pub const PERF_COUNTER_MULTI_TIMER: u32 = 0x2241_0500;
pub const PERF_100NSEC_MULTI_TIMER: u32 = 0x2251_0500;
pub const PERF_COUNTER_MULTI_TIMER_INV: u32 = 0x2341_0500;
pub const PERF_100NSEC_MULTI_TIMER_INV: u32 = 0x2351_0500;
pub const PERF_AVERAGE_TIMER: u32 = 0x3002_0400;
pub const PERF_ELAPSED_TIME: u32 = 0x3024_0500;
pub const PERF_COUNTER_NODATA: u32 = 0x4000_0200;
pub const PERF_AVERAGE_BULK: u32 = 0x4002_0500;
pub const PERF_SAMPLE_BASE: u32 = 0x4003_0401;
pub const PERF_AVERAGE_BASE: u32 = 0x4003_0402;
pub const PERF_RAW_BASE: u32 = 0x4003_0403;
pub const PERF_LARGE_RAW_BASE: u32 = 0x4003_0503;
pub const PERF_COUNTER_MULTI_BASE: u32 = 0x4203_0500;

/// Bits identifying a base (denominator) counter.
pub const PERF_COUNTER_BASE: u32 = 0x0003_0000;
/// Size field of the type code.
pub const PERF_SIZE_MASK: u32 = 0x0000_0300;
pub const PERF_SIZE_DWORD: u32 = 0x0000_0000;
pub const PERF_SIZE_LARGE: u32 = 0x0000_0100;
pub const PERF_SIZE_ZERO: u32 = 0x0000_0200;
pub const PERF_SIZE_VARIABLE_LEN: u32 = 0x0000_0300;

/// Scale from 100ns ticks to seconds.
pub const HUNDRED_NS_TO_SECONDS: f64 = 1e-7;

/// Returns the sample kind for a native counter type. Unknown types are gauges.
pub fn kind_of(counter_type: u32) -> CounterKind {
    match counter_type {
        PERF_COUNTER_DELTA
        | PERF_COUNTER_LARGE_DELTA
        | PERF_COUNTER_COUNTER
        | PERF_COUNTER_BULK_COUNT
        | PERF_SAMPLE_COUNTER
        | PERF_COUNTER_QUEUELEN_TYPE
        | PERF_COUNTER_LARGE_QUEUELEN_TYPE
        | PERF_COUNTER_100NS_QUEUELEN_TYPE
        | PERF_COUNTER_OBJ_TIME_QUEUELEN_TYPE
        | PERF_COUNTER_TIMER
        | PERF_COUNTER_TIMER_INV
        | PERF_COUNTER_MULTI_TIMER
        | PERF_COUNTER_MULTI_TIMER_INV
        | PERF_PRECISION_SYSTEM_TIMER
        | PERF_PRECISION_100NS_TIMER
        | PERF_PRECISION_OBJECT_TIMER
        | PERF_100NSEC_TIMER
        | PERF_100NSEC_TIMER_INV
        | PERF_100NSEC_MULTI_TIMER
        | PERF_100NSEC_MULTI_TIMER_INV
        | PERF_OBJ_TIME_TIMER
        | PERF_AVERAGE_BULK
        | PERF_AVERAGE_TIMER => CounterKind::Counter,
        _ => CounterKind::Gauge,
    }
}

/// Returns `true` for denominator counters that only feed another counter.
pub fn is_base(counter_type: u32) -> bool {
    counter_type & PERF_COUNTER_BASE == PERF_COUNTER_BASE
}

/// Returns `true` for types whose value is paired with a base counter.
pub fn needs_base(counter_type: u32) -> bool {
    matches!(
        counter_type,
        PERF_RAW_FRACTION
            | PERF_LARGE_RAW_FRACTION
            | PERF_SAMPLE_FRACTION
            | PERF_AVERAGE_BULK
            | PERF_AVERAGE_TIMER
            | PERF_COUNTER_MULTI_TIMER
            | PERF_COUNTER_MULTI_TIMER_INV
            | PERF_100NSEC_MULTI_TIMER
            | PERF_100NSEC_MULTI_TIMER_INV
    )
}

/// Converts one raw sample into its final value.
///
/// * elapsed time: `(second - first) / frequency`
/// * 100ns timers: `first * 1e-7`
/// * average bulk / raw fraction: both values, unscaled
/// * everything else: `first`, plus `second` when `second_requested`
pub fn convert(
    counter_type: u32,
    first: i64,
    second: i64,
    frequency: i64,
    second_requested: bool,
) -> CounterValue {
    let kind = kind_of(counter_type);
    let passthrough_second = if second_requested { second as f64 } else { 0.0 };

    let (first, second) = match counter_type {
        PERF_ELAPSED_TIME => {
            let elapsed = if frequency > 0 {
                second.wrapping_sub(first) as f64 / frequency as f64
            } else {
                0.0
            };
            (elapsed, passthrough_second)
        }
        PERF_100NSEC_TIMER | PERF_PRECISION_100NS_TIMER => {
            (first as f64 * HUNDRED_NS_TO_SECONDS, passthrough_second)
        }
        PERF_AVERAGE_BULK | PERF_RAW_FRACTION => (first as f64, second as f64),
        _ => (first as f64, passthrough_second),
    };

    CounterValue {
        kind,
        first,
        second,
    }
}

/// Human-readable name of a type code, for logs.
pub fn type_name(counter_type: u32) -> &'static str {
    match counter_type {
        PERF_COUNTER_RAWCOUNT_HEX => "PERF_COUNTER_RAWCOUNT_HEX",
        PERF_COUNTER_LARGE_RAWCOUNT_HEX => "PERF_COUNTER_LARGE_RAWCOUNT_HEX",
        PERF_COUNTER_TEXT => "PERF_COUNTER_TEXT",
        PERF_COUNTER_RAWCOUNT => "PERF_COUNTER_RAWCOUNT",
        PERF_COUNTER_LARGE_RAWCOUNT => "PERF_COUNTER_LARGE_RAWCOUNT",
        PERF_COUNTER_DELTA => "PERF_COUNTER_DELTA",
        PERF_COUNTER_LARGE_DELTA => "PERF_COUNTER_LARGE_DELTA",
        PERF_COUNTER_COUNTER => "PERF_COUNTER_COUNTER",
        PERF_COUNTER_BULK_COUNT => "PERF_COUNTER_BULK_COUNT",
        PERF_RAW_FRACTION => "PERF_RAW_FRACTION",
        PERF_LARGE_RAW_FRACTION => "PERF_LARGE_RAW_FRACTION",
        PERF_COUNTER_TIMER => "PERF_COUNTER_TIMER",
        PERF_100NSEC_TIMER => "PERF_100NSEC_TIMER",
        PERF_100NSEC_TIMER_INV => "PERF_100NSEC_TIMER_INV",
        PERF_PRECISION_100NS_TIMER => "PERF_PRECISION_100NS_TIMER",
        PERF_ELAPSED_TIME => "PERF_ELAPSED_TIME",
        PERF_AVERAGE_BULK => "PERF_AVERAGE_BULK",
        PERF_AVERAGE_TIMER => "PERF_AVERAGE_TIMER",
        PERF_RAW_BASE => "PERF_RAW_BASE",
        PERF_AVERAGE_BASE => "PERF_AVERAGE_BASE",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_time_divides_by_frequency() {
        let v = convert(PERF_ELAPSED_TIME, 1_000, 51_000, 10_000, false);
        assert_eq!(v.first, 5.0);
        assert_eq!(v.kind, CounterKind::Gauge);
    }

    #[test]
    fn test_elapsed_time_zero_frequency() {
        let v = convert(PERF_ELAPSED_TIME, 1_000, 51_000, 0, false);
        assert_eq!(v.first, 0.0);
    }

    #[test]
    fn test_100ns_timers_scale_to_seconds() {
        for ty in [PERF_100NSEC_TIMER, PERF_PRECISION_100NS_TIMER] {
            let v = convert(ty, 25_000_000, 99, 0, false);
            assert_eq!(v.first, 25_000_000.0 * 1e-7);
            assert_eq!(v.second, 0.0);
            assert_eq!(v.kind, CounterKind::Counter);
        }
    }

    #[test]
    fn test_fraction_types_keep_both_values() {
        let v = convert(PERF_RAW_FRACTION, 40, 200, 0, false);
        assert_eq!((v.first, v.second), (40.0, 200.0));
        assert_eq!(v.kind, CounterKind::Gauge);

        let v = convert(PERF_AVERAGE_BULK, 7, 3, 0, false);
        assert_eq!((v.first, v.second), (7.0, 3.0));
        assert_eq!(v.kind, CounterKind::Counter);
    }

    #[test]
    fn test_second_value_only_when_requested() {
        let v = convert(PERF_COUNTER_BULK_COUNT, 10, 20, 0, false);
        assert_eq!((v.first, v.second), (10.0, 0.0));

        let v = convert(PERF_COUNTER_BULK_COUNT, 10, 20, 0, true);
        assert_eq!((v.first, v.second), (10.0, 20.0));
    }

    #[test]
    fn test_kind_table() {
        assert_eq!(kind_of(PERF_COUNTER_RAWCOUNT), CounterKind::Gauge);
        assert_eq!(kind_of(PERF_COUNTER_LARGE_RAWCOUNT), CounterKind::Gauge);
        assert_eq!(kind_of(PERF_COUNTER_COUNTER), CounterKind::Counter);
        assert_eq!(kind_of(PERF_100NSEC_TIMER_INV), CounterKind::Counter);
        assert_eq!(kind_of(0xDEAD_BEEF), CounterKind::Gauge);
    }

    #[test]
    fn test_base_detection() {
        assert!(is_base(PERF_RAW_BASE));
        assert!(is_base(PERF_AVERAGE_BASE));
        assert!(!is_base(PERF_RAW_FRACTION));
        assert!(needs_base(PERF_RAW_FRACTION));
        assert!(!needs_base(PERF_COUNTER_RAWCOUNT));
    }
}
