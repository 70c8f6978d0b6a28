//! PDH status codes (`pdhmsg.h`) and their classification.

use std::fmt;

/// Raw status returned by a PDH call or attached to a counter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdhStatus(pub u32);

impl PdhStatus {
    pub const SUCCESS: PdhStatus = PdhStatus(0x0000_0000);
    pub const CSTATUS_VALID_DATA: PdhStatus = PdhStatus(0x0000_0000);
    pub const CSTATUS_NEW_DATA: PdhStatus = PdhStatus(0x0000_0001);
    pub const CSTATUS_NO_MACHINE: PdhStatus = PdhStatus(0x8000_07D0);
    pub const CSTATUS_NO_INSTANCE: PdhStatus = PdhStatus(0x8000_07D1);
    pub const MORE_DATA: PdhStatus = PdhStatus(0x8000_07D2);
    pub const CSTATUS_ITEM_NOT_VALIDATED: PdhStatus = PdhStatus(0x8000_07D3);
    pub const RETRY: PdhStatus = PdhStatus(0x8000_07D4);
    pub const NO_DATA: PdhStatus = PdhStatus(0x8000_07D5);
    pub const CALC_NEGATIVE_DENOMINATOR: PdhStatus = PdhStatus(0x8000_07D6);
    pub const CALC_NEGATIVE_TIMEBASE: PdhStatus = PdhStatus(0x8000_07D7);
    pub const CALC_NEGATIVE_VALUE: PdhStatus = PdhStatus(0x8000_07D8);
    pub const CSTATUS_NO_OBJECT: PdhStatus = PdhStatus(0xC000_0BB8);
    pub const CSTATUS_NO_COUNTER: PdhStatus = PdhStatus(0xC000_0BB9);
    pub const CSTATUS_INVALID_DATA: PdhStatus = PdhStatus(0xC000_0BBA);
    pub const MEMORY_ALLOCATION_FAILURE: PdhStatus = PdhStatus(0xC000_0BBB);
    pub const INVALID_HANDLE: PdhStatus = PdhStatus(0xC000_0BBC);
    pub const INVALID_ARGUMENT: PdhStatus = PdhStatus(0xC000_0BBD);
    pub const FUNCTION_NOT_FOUND: PdhStatus = PdhStatus(0xC000_0BBE);
    pub const CSTATUS_NO_COUNTERNAME: PdhStatus = PdhStatus(0xC000_0BBF);
    pub const CSTATUS_BAD_COUNTERNAME: PdhStatus = PdhStatus(0xC000_0BC0);
    pub const INVALID_BUFFER: PdhStatus = PdhStatus(0xC000_0BC1);
    pub const INSUFFICIENT_BUFFER: PdhStatus = PdhStatus(0xC000_0BC2);
    pub const CANNOT_CONNECT_MACHINE: PdhStatus = PdhStatus(0xC000_0BC3);
    pub const INVALID_PATH: PdhStatus = PdhStatus(0xC000_0BC4);
    pub const INVALID_INSTANCE: PdhStatus = PdhStatus(0xC000_0BC5);
    pub const INVALID_DATA: PdhStatus = PdhStatus(0xC000_0BC6);
    pub const CANNOT_READ_NAME_STRINGS: PdhStatus = PdhStatus(0xC000_0BC8);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Record status that carries a usable value.
    pub fn is_valid_data(self) -> bool {
        self == Self::CSTATUS_VALID_DATA || self == Self::CSTATUS_NEW_DATA
    }

    /// Known counter-data conditions that skip a record instead of failing the cycle.
    pub fn is_benign(self) -> bool {
        matches!(
            self,
            Self::CSTATUS_INVALID_DATA
                | Self::CALC_NEGATIVE_DENOMINATOR
                | Self::CALC_NEGATIVE_VALUE
                | Self::CSTATUS_NO_INSTANCE
                | Self::NO_DATA
        )
    }

    /// Symbolic name, if known.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "PDH_CSTATUS_VALID_DATA",
            Self::CSTATUS_NEW_DATA => "PDH_CSTATUS_NEW_DATA",
            Self::CSTATUS_NO_MACHINE => "PDH_CSTATUS_NO_MACHINE",
            Self::CSTATUS_NO_INSTANCE => "PDH_CSTATUS_NO_INSTANCE",
            Self::MORE_DATA => "PDH_MORE_DATA",
            Self::CSTATUS_ITEM_NOT_VALIDATED => "PDH_CSTATUS_ITEM_NOT_VALIDATED",
            Self::RETRY => "PDH_RETRY",
            Self::NO_DATA => "PDH_NO_DATA",
            Self::CALC_NEGATIVE_DENOMINATOR => "PDH_CALC_NEGATIVE_DENOMINATOR",
            Self::CALC_NEGATIVE_TIMEBASE => "PDH_CALC_NEGATIVE_TIMEBASE",
            Self::CALC_NEGATIVE_VALUE => "PDH_CALC_NEGATIVE_VALUE",
            Self::CSTATUS_NO_OBJECT => "PDH_CSTATUS_NO_OBJECT",
            Self::CSTATUS_NO_COUNTER => "PDH_CSTATUS_NO_COUNTER",
            Self::CSTATUS_INVALID_DATA => "PDH_CSTATUS_INVALID_DATA",
            Self::MEMORY_ALLOCATION_FAILURE => "PDH_MEMORY_ALLOCATION_FAILURE",
            Self::INVALID_HANDLE => "PDH_INVALID_HANDLE",
            Self::INVALID_ARGUMENT => "PDH_INVALID_ARGUMENT",
            Self::FUNCTION_NOT_FOUND => "PDH_FUNCTION_NOT_FOUND",
            Self::CSTATUS_NO_COUNTERNAME => "PDH_CSTATUS_NO_COUNTERNAME",
            Self::CSTATUS_BAD_COUNTERNAME => "PDH_CSTATUS_BAD_COUNTERNAME",
            Self::INVALID_BUFFER => "PDH_INVALID_BUFFER",
            Self::INSUFFICIENT_BUFFER => "PDH_INSUFFICIENT_BUFFER",
            Self::CANNOT_CONNECT_MACHINE => "PDH_CANNOT_CONNECT_MACHINE",
            Self::INVALID_PATH => "PDH_INVALID_PATH",
            Self::INVALID_INSTANCE => "PDH_INVALID_INSTANCE",
            Self::INVALID_DATA => "PDH_INVALID_DATA",
            Self::CANNOT_READ_NAME_STRINGS => "PDH_CANNOT_READ_NAME_STRINGS",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for PdhStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "PDH status 0x{:08X}", self.0),
        }
    }
}

/// A failed PDH call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdhError {
    pub status: PdhStatus,
}

impl PdhError {
    pub fn new(status: PdhStatus) -> Self {
        Self { status }
    }

    /// Converts a call status into a result.
    pub fn check(status: PdhStatus) -> Result<(), PdhError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Self::new(status))
        }
    }
}

impl fmt::Display for PdhError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)
    }
}

impl std::error::Error for PdhError {}

impl From<PdhStatus> for PdhError {
    fn from(status: PdhStatus) -> Self {
        Self::new(status)
    }
}
