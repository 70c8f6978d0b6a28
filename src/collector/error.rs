//! Error types for binding and collecting counters.

use std::fmt;
use std::io;

use crate::collector::pdh::fetch::FetchError;
use crate::collector::pdh::status::PdhError;
use crate::collector::perflib::layout::DecodeError;
use crate::collector::perflib::names::NameTableError;

/// A non-fatal problem found while binding a query.
#[derive(Debug)]
pub enum BindFailure {
    /// A counter path could not be registered.
    Register { path: String, error: PdhError },
    /// Counter metadata query failed; the whole counter was dropped.
    Metadata { path: String, error: FetchError },
    /// Counter metadata could not be read back from the native buffer.
    MetadataUnreadable { path: String },
    /// Elapsed-time counter without a time base; the whole counter was dropped.
    TimeBase { path: String, error: PdhError },
    /// The priming collection failed with something other than "no data".
    Prime(CollectError),
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindFailure::Register { path, error } => {
                write!(f, "failed to add counter {}: {}", path, error)
            }
            BindFailure::Metadata { path, error } => {
                write!(f, "failed to query counter info for {}: {}", path, error)
            }
            BindFailure::MetadataUnreadable { path } => {
                write!(f, "unreadable counter info for {}", path)
            }
            BindFailure::TimeBase { path, error } => {
                write!(f, "failed to query time base for {}: {}", path, error)
            }
            BindFailure::Prime(e) => write!(f, "initial collection failed: {}", e),
        }
    }
}

impl std::error::Error for BindFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BindFailure::Register { error, .. } | BindFailure::TimeBase { error, .. } => {
                Some(error)
            }
            BindFailure::Metadata { error, .. } => Some(error),
            BindFailure::MetadataUnreadable { .. } => None,
            BindFailure::Prime(e) => Some(e),
        }
    }
}

/// Binding failed outright.
#[derive(Debug)]
pub enum BindError {
    /// The native query could not be opened.
    OpenQuery(PdhError),
    /// Not a single counter could be registered.
    NoCounters {
        object: String,
        failures: Vec<BindFailure>,
    },
    /// The collection worker thread could not be started.
    Spawn(io::Error),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::OpenQuery(e) => write!(f, "failed to open query: {}", e),
            BindError::NoCounters { object, failures } => {
                write!(f, "no counters configured for {}", object)?;
                for failure in failures {
                    write!(f, "; {}", failure)?;
                }
                Ok(())
            }
            BindError::Spawn(e) => write!(f, "failed to start collection worker: {}", e),
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BindError::OpenQuery(e) => Some(e),
            BindError::NoCounters { .. } => None,
            BindError::Spawn(e) => Some(e),
        }
    }
}

/// Result of a successful bind together with the non-fatal failures it accumulated.
#[derive(Debug)]
pub struct BindReport<T> {
    pub value: T,
    pub failures: Vec<BindFailure>,
}

impl<T> BindReport<T> {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> BindReport<U> {
        BindReport {
            value: f(self.value),
            failures: self.failures,
        }
    }

    pub fn into_parts(self) -> (T, Vec<BindFailure>) {
        (self.value, self.failures)
    }
}

/// A collection cycle failed.
#[derive(Debug)]
pub enum CollectError {
    /// The collector is closed or was never opened.
    NotInitialized,
    /// The cycle produced no usable records.
    NoData,
    /// Sampling the query failed.
    Query(PdhError),
    /// Fetching a counter array failed.
    Fetch { path: String, error: FetchError },
    /// Processing the request faulted; the worker recovered and keeps serving.
    WorkerFault(String),
    /// Reading raw performance data failed.
    Io(io::Error),
    /// The raw performance data block is malformed.
    Decode(DecodeError),
    /// The name table could not be built.
    NameTable(NameTableError),
    /// The requested object is not in the name table.
    UnknownObject(String),
}

impl CollectError {
    pub fn is_no_data(&self) -> bool {
        matches!(self, CollectError::NoData)
    }
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::NotInitialized => write!(f, "performance counter not initialized"),
            CollectError::NoData => write!(f, "no data collected"),
            CollectError::Query(e) => write!(f, "failed to collect query data: {}", e),
            CollectError::Fetch { path, error } => {
                write!(f, "failed to fetch counter array for {}: {}", path, error)
            }
            CollectError::WorkerFault(msg) => write!(f, "collection worker fault: {}", msg),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Decode(e) => write!(f, "{}", e),
            CollectError::NameTable(e) => write!(f, "{}", e),
            CollectError::UnknownObject(name) => {
                write!(f, "performance object {:?} not found in name table", name)
            }
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Query(e) => Some(e),
            CollectError::Fetch { error, .. } => Some(error),
            CollectError::Io(e) => Some(e),
            CollectError::Decode(e) => Some(e),
            CollectError::NameTable(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectError {
    fn from(e: io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<DecodeError> for CollectError {
    fn from(e: DecodeError) -> Self {
        CollectError::Decode(e)
    }
}

impl From<NameTableError> for CollectError {
    fn from(e: NameTableError) -> Self {
        CollectError::NameTable(e)
    }
}
