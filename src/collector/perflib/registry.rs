//! Raw performance data from the Windows registry.

use std::io;
use std::iter;
use std::ptr;

use tracing::debug;
use winapi::shared::minwindef::DWORD;
use winapi::shared::winerror::{ERROR_MORE_DATA, ERROR_SUCCESS};
use winapi::um::winreg::{HKEY_PERFORMANCE_DATA, RegCloseKey, RegQueryValueExW};
use winreg::RegKey;
use winreg::enums::HKEY_LOCAL_MACHINE;

use crate::collector::traits::PerfDataSource;

/// English (language id 009) name tables.
const PERFLIB_ENGLISH: &str = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\Perflib\\009";

const INITIAL_BUFFER_SIZE: usize = 64 * 1024;
const MAX_BUFFER_SIZE: usize = 256 * 1024 * 1024;

/// Reads `HKEY_PERFORMANCE_DATA` and the Perflib name tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryPerfData;

impl RegistryPerfData {
    pub fn new() -> Self {
        Self
    }
}

/// Keeps the predefined performance key's provider handles for one read and
/// releases them on every exit path.
struct PerformanceKey;

impl Drop for PerformanceKey {
    fn drop(&mut self) {
        // SAFETY: closing the predefined performance key releases the provider
        // handles opened by queries against it; the key itself stays usable.
        unsafe { RegCloseKey(HKEY_PERFORMANCE_DATA) };
    }
}

/// Repeats `call` with a doubling buffer until it stops asking for more room.
///
/// `call` receives the buffer and returns the registry status and the number of
/// bytes written.
fn read_growing(
    query: &str,
    mut call: impl FnMut(&mut [u8]) -> (DWORD, usize),
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; INITIAL_BUFFER_SIZE];

    // The registry does not report the size of performance data, so grow until it fits.
    loop {
        match call(&mut buf) {
            (ERROR_SUCCESS, written) => {
                buf.truncate(written.min(buf.len()));
                return Ok(buf);
            }
            (ERROR_MORE_DATA, _) if buf.len() < MAX_BUFFER_SIZE => {
                debug!(query, size = buf.len() * 2, "growing performance data buffer");
                buf.resize(buf.len() * 2, 0);
            }
            (ERROR_MORE_DATA, _) => {
                return Err(io::Error::other(format!(
                    "performance data for {:?} exceeds {} bytes",
                    query, MAX_BUFFER_SIZE
                )));
            }
            (code, _) => return Err(io::Error::from_raw_os_error(code as i32)),
        }
    }
}

impl PerfDataSource for RegistryPerfData {
    fn query(&self, query: &str) -> io::Result<Vec<u8>> {
        let name: Vec<u16> = query.encode_utf16().chain(iter::once(0)).collect();
        let _key = PerformanceKey;

        read_growing(query, |buf| {
            let mut size = buf.len() as DWORD;
            // SAFETY: `name` is NUL-terminated and outlives the call; `buf` is valid for
            // `size` bytes and `size` is updated to the number of bytes written.
            let status = unsafe {
                RegQueryValueExW(
                    HKEY_PERFORMANCE_DATA,
                    name.as_ptr(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    buf.as_mut_ptr(),
                    &mut size,
                )
            } as DWORD;
            (status, size as usize)
        })
    }

    fn name_table(&self, table: &str) -> io::Result<Vec<u8>> {
        let key = RegKey::predef(HKEY_LOCAL_MACHINE).open_subkey(PERFLIB_ENGLISH)?;
        Ok(key.get_raw_value(table)?.bytes)
    }
}
