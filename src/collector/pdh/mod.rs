//! Live acquisition through the performance data helper (PDH) query interface.

pub mod fetch;
#[cfg(windows)]
mod native;
mod session;
pub mod status;

pub use fetch::{FetchError, Fetched, NativeCall, fetch};
#[cfg(windows)]
pub use native::NativePdh;
pub use session::{Counter, DEFAULT_BUFFER_SIZE, Session, SessionOptions, ValueMode};
pub use status::{PdhError, PdhStatus};
