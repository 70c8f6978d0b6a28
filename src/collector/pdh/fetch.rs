//! Buffer negotiation against size-bounded native calls.
//!
//! Native "get array" calls fill a caller buffer and either succeed, report that a
//! larger buffer of a given size is needed, or fail. The caller keeps its buffer
//! between cycles so steady-state collection does not allocate.

use std::fmt;

use crate::collector::pdh::status::PdhStatus;

/// Outcome of one size-bounded native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCall {
    pub status: PdhStatus,
    /// Buffer size the call needs (meaningful with `MORE_DATA`) or used.
    pub required: usize,
    /// Number of records written (meaningful on success).
    pub item_count: usize,
}

impl NativeCall {
    pub fn ok(used: usize, item_count: usize) -> Self {
        Self {
            status: PdhStatus::SUCCESS,
            required: used,
            item_count,
        }
    }

    pub fn more_data(required: usize) -> Self {
        Self {
            status: PdhStatus::MORE_DATA,
            required,
            item_count: 0,
        }
    }

    pub fn failed(status: PdhStatus) -> Self {
        Self {
            status,
            required: 0,
            item_count: 0,
        }
    }
}

/// Successful negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<R> {
    /// Call succeeded; decoded records.
    Items(R),
    /// Call reported a known benign counter-data condition; nothing to decode.
    Skipped(PdhStatus),
}

/// Negotiation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The call asked for more room without asking for more than it already had.
    SizeMismatch { required: usize, current: usize },
    /// Any status outside the benign set.
    Status(PdhStatus),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::SizeMismatch { required, current } => write!(
                f,
                "buffer size mismatch: native call requested {} bytes with a {} byte buffer",
                required, current
            ),
            FetchError::Status(status) => write!(f, "{}", status),
        }
    }
}

impl std::error::Error for FetchError {}

/// Runs a size-bounded native call until it fits in `buf`, then decodes the result.
///
/// `buf` is grown to exactly the reported requirement on every `MORE_DATA`; the loop
/// ends after at most one retry per growth signal because each signal must strictly
/// increase the size.
pub fn fetch<R>(
    buf: &mut Vec<u8>,
    mut call: impl FnMut(&mut [u8]) -> NativeCall,
    decode: impl FnOnce(&[u8], usize) -> R,
) -> Result<Fetched<R>, FetchError> {
    loop {
        let result = call(buf.as_mut_slice());

        if result.status.is_success() {
            return Ok(Fetched::Items(decode(buf.as_slice(), result.item_count)));
        }

        if result.status == PdhStatus::MORE_DATA {
            if result.required <= buf.len() {
                return Err(FetchError::SizeMismatch {
                    required: result.required,
                    current: buf.len(),
                });
            }
            buf.resize(result.required, 0);
            continue;
        }

        if result.status.is_benign() {
            return Ok(Fetched::Skipped(result.status));
        }

        return Err(FetchError::Status(result.status));
    }
}
