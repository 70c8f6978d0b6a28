//! Data model for collected counter samples.
//!
//! A collection cycle produces a [`CounterValues`] map: instance name → counter name →
//! [`CounterValue`]. Each cycle builds a fresh map; callers replace their previous
//! result wholesale instead of updating it in place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a sample should be interpreted by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterKind {
    /// Monotonically increasing value; consumers compute rates.
    Counter,
    /// Point-in-time value.
    Gauge,
}

/// A single converted sample for one counter of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterValue {
    pub kind: CounterKind,
    /// Primary value (already scaled by the counter type rules).
    pub first: f64,
    /// Secondary value (base / denominator), `0.0` unless the type or caller needs it.
    pub second: f64,
}

impl CounterValue {
    pub fn gauge(first: f64) -> Self {
        Self {
            kind: CounterKind::Gauge,
            first,
            second: 0.0,
        }
    }

    pub fn counter(first: f64) -> Self {
        Self {
            kind: CounterKind::Counter,
            first,
            second: 0.0,
        }
    }
}

/// Counter name → value, for one instance.
pub type InstanceValues = BTreeMap<String, CounterValue>;

/// Instance name → counters, for one object.
pub type CounterValues = BTreeMap<String, InstanceValues>;
