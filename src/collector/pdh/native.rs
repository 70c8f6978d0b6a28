//! `pdh.dll` binding.

use std::iter;
use std::mem;
use std::ptr;

use winapi::shared::minwindef::{DWORD, FILETIME};
use winapi::um::winnt::{HANDLE, LPCWSTR, LPWSTR};

use crate::collector::pdh::fetch::NativeCall;
use crate::collector::pdh::status::PdhStatus;
use crate::collector::traits::{
    CounterHandle, CounterInfo, FormattedRecord, PdhApi, QueryHandle, RawRecord,
};

type PdhHandle = HANDLE;

const PDH_FMT_DOUBLE: DWORD = 0x0000_0200;
const PDH_FMT_NOCAP100: DWORD = 0x0000_8000;

#[repr(C)]
#[derive(Clone, Copy)]
struct PdhRawCounter {
    c_status: DWORD,
    time_stamp: FILETIME,
    first_value: i64,
    second_value: i64,
    multi_count: DWORD,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PdhRawCounterItem {
    name: LPWSTR,
    raw_value: PdhRawCounter,
}

/// `PDH_FMT_COUNTERVALUE` with the union read as a double.
#[repr(C)]
#[derive(Clone, Copy)]
struct PdhFmtCounterValue {
    c_status: DWORD,
    double_value: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PdhFmtCounterValueItem {
    name: LPWSTR,
    fmt_value: PdhFmtCounterValue,
}

/// Leading fields of `PDH_COUNTER_INFO_W`.
#[repr(C)]
#[derive(Clone, Copy)]
struct PdhCounterInfoHead {
    length: DWORD,
    counter_type: DWORD,
}

#[link(name = "pdh")]
unsafe extern "system" {
    fn PdhOpenQueryW(data_source: LPCWSTR, user_data: usize, query: *mut PdhHandle) -> i32;
    fn PdhAddEnglishCounterW(
        query: PdhHandle,
        path: LPCWSTR,
        user_data: usize,
        counter: *mut PdhHandle,
    ) -> i32;
    fn PdhGetCounterInfoW(
        counter: PdhHandle,
        retrieve_explain_text: u8,
        buffer_size: *mut DWORD,
        buffer: *mut u8,
    ) -> i32;
    fn PdhGetCounterTimeBase(counter: PdhHandle, time_base: *mut i64) -> i32;
    fn PdhCollectQueryData(query: PdhHandle) -> i32;
    fn PdhGetRawCounterArrayW(
        counter: PdhHandle,
        buffer_size: *mut DWORD,
        item_count: *mut DWORD,
        items: *mut u8,
    ) -> i32;
    fn PdhGetFormattedCounterArrayW(
        counter: PdhHandle,
        format: DWORD,
        buffer_size: *mut DWORD,
        item_count: *mut DWORD,
        items: *mut u8,
    ) -> i32;
    fn PdhCloseQuery(query: PdhHandle) -> i32;
}

fn status(code: i32) -> PdhStatus {
    PdhStatus(code as u32)
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(iter::once(0)).collect()
}

/// Reads a NUL-terminated UTF-16 string that lives inside `buf`.
///
/// Names in PDH arrays point into the same buffer as the records; pointers
/// outside it are treated as empty names.
fn name_in(buf: &[u8], name: LPWSTR) -> String {
    let start = buf.as_ptr() as usize;
    let end = start + buf.len();
    let mut at = name as usize;
    if name.is_null() || at < start || at >= end {
        return String::new();
    }

    let mut units = Vec::new();
    while at + 2 <= end {
        let offset = at - start;
        let unit = u16::from_le_bytes([buf[offset], buf[offset + 1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
        at += 2;
    }
    String::from_utf16_lossy(&units)
}

/// Reads record `index` of a packed PDH array in `buf`.
fn record<T: Copy>(buf: &[u8], index: usize) -> Option<T> {
    let size = mem::size_of::<T>();
    let start = index.checked_mul(size)?;
    let bytes = buf.get(start..start.checked_add(size)?)?;
    // SAFETY: `bytes` holds `size_of::<T>()` initialized bytes; `T` is a plain
    // `repr(C)` record and the buffer carries no alignment guarantee.
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// The PDH library.
///
/// Handles are stored as integers so the value can move to the collection worker
/// thread. Every handle is only ever used by the thread that owns this value.
#[derive(Debug, Default)]
pub struct NativePdh {
    _private: (),
}

impl NativePdh {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PdhApi for NativePdh {
    fn open_query(&mut self) -> Result<QueryHandle, PdhStatus> {
        let mut query: PdhHandle = ptr::null_mut();
        // SAFETY: `query` is a valid out-pointer; a null data source means live data.
        let code = unsafe { PdhOpenQueryW(ptr::null(), 0, &mut query) };
        match status(code) {
            PdhStatus::SUCCESS => Ok(QueryHandle(query as usize)),
            other => Err(other),
        }
    }

    fn add_counter(&mut self, query: QueryHandle, path: &str) -> Result<CounterHandle, PdhStatus> {
        let path = wide(path);
        let mut counter: PdhHandle = ptr::null_mut();
        // SAFETY: `path` is NUL-terminated and outlives the call; `query` came from
        // `open_query` and has not been closed.
        let code = unsafe {
            PdhAddEnglishCounterW(query.0 as PdhHandle, path.as_ptr(), 0, &mut counter)
        };
        match status(code) {
            PdhStatus::SUCCESS => Ok(CounterHandle(counter as usize)),
            other => Err(other),
        }
    }

    fn counter_info(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall {
        let mut size = buf.len() as DWORD;
        let data = if buf.is_empty() {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr()
        };
        // SAFETY: `data` is null or valid for `size` bytes.
        let code = unsafe { PdhGetCounterInfoW(counter.0 as PdhHandle, 0, &mut size, data) };
        match status(code) {
            PdhStatus::SUCCESS => NativeCall::ok(size as usize, 1),
            PdhStatus::MORE_DATA => NativeCall::more_data(size as usize),
            other => NativeCall::failed(other),
        }
    }

    fn decode_counter_info(buf: &[u8]) -> Option<CounterInfo> {
        record::<PdhCounterInfoHead>(buf, 0)
            .filter(|head| head.length as usize >= mem::size_of::<PdhCounterInfoHead>())
            .map(|head| CounterInfo {
                counter_type: head.counter_type,
            })
    }

    fn counter_time_base(&mut self, counter: CounterHandle) -> Result<i64, PdhStatus> {
        let mut time_base = 0i64;
        // SAFETY: `time_base` is a valid out-pointer.
        let code = unsafe { PdhGetCounterTimeBase(counter.0 as PdhHandle, &mut time_base) };
        match status(code) {
            PdhStatus::SUCCESS => Ok(time_base),
            other => Err(other),
        }
    }

    fn collect_query_data(&mut self, query: QueryHandle) -> PdhStatus {
        // SAFETY: `query` came from `open_query` and has not been closed.
        status(unsafe { PdhCollectQueryData(query.0 as PdhHandle) })
    }

    fn raw_counter_array(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall {
        let mut size = buf.len() as DWORD;
        let mut count: DWORD = 0;
        let data = if buf.is_empty() {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr()
        };
        // SAFETY: `data` is null or valid for `size` bytes.
        let code = unsafe {
            PdhGetRawCounterArrayW(counter.0 as PdhHandle, &mut size, &mut count, data)
        };
        match status(code) {
            PdhStatus::SUCCESS => NativeCall::ok(size as usize, count as usize),
            PdhStatus::MORE_DATA => NativeCall::more_data(size as usize),
            other => NativeCall::failed(other),
        }
    }

    fn decode_raw_items(buf: &[u8], item_count: usize) -> Vec<RawRecord> {
        (0..item_count)
            .map_while(|i| record::<PdhRawCounterItem>(buf, i))
            .map(|item| RawRecord {
                instance: name_in(buf, item.name),
                status: PdhStatus(item.raw_value.c_status),
                first: item.raw_value.first_value,
                second: item.raw_value.second_value,
            })
            .collect()
    }

    fn formatted_counter_array(&mut self, counter: CounterHandle, buf: &mut [u8]) -> NativeCall {
        let mut size = buf.len() as DWORD;
        let mut count: DWORD = 0;
        let data = if buf.is_empty() {
            ptr::null_mut()
        } else {
            buf.as_mut_ptr()
        };
        // SAFETY: `data` is null or valid for `size` bytes.
        let code = unsafe {
            PdhGetFormattedCounterArrayW(
                counter.0 as PdhHandle,
                PDH_FMT_DOUBLE | PDH_FMT_NOCAP100,
                &mut size,
                &mut count,
                data,
            )
        };
        match status(code) {
            PdhStatus::SUCCESS => NativeCall::ok(size as usize, count as usize),
            PdhStatus::MORE_DATA => NativeCall::more_data(size as usize),
            other => NativeCall::failed(other),
        }
    }

    fn decode_formatted_items(buf: &[u8], item_count: usize) -> Vec<FormattedRecord> {
        (0..item_count)
            .map_while(|i| record::<PdhFmtCounterValueItem>(buf, i))
            .map(|item| FormattedRecord {
                instance: name_in(buf, item.name),
                status: PdhStatus(item.fmt_value.c_status),
                value: item.fmt_value.double_value,
            })
            .collect()
    }

    fn close_query(&mut self, query: QueryHandle) -> PdhStatus {
        // SAFETY: `query` came from `open_query`; the caller never uses it again.
        status(unsafe { PdhCloseQuery(query.0 as PdhHandle) })
    }
}
