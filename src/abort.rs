//! SDO 중단(abort) 코드
//!
//! 전송을 끝내는 모든 경로는 32비트 코드 하나로 표현됨

use std::fmt;

/// 32비트 중단 사유 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortCode(pub u32);

impl AbortCode {
    pub const TOGGLE_NOT_ALTERNATED: Self = Self(0x0503_0000);
    pub const TIMED_OUT: Self = Self(0x0504_0000);
    pub const INVALID_COMMAND_SPECIFIER: Self = Self(0x0504_0001);
    pub const INVALID_BLOCK_SIZE: Self = Self(0x0504_0002);
    pub const INVALID_SEQUENCE_NUMBER: Self = Self(0x0504_0003);
    pub const CRC_ERROR: Self = Self(0x0504_0004);
    pub const OUT_OF_MEMORY: Self = Self(0x0504_0005);
    pub const UNSUPPORTED_ACCESS: Self = Self(0x0601_0000);
    pub const READ_WRITE_ONLY: Self = Self(0x0601_0001);
    pub const WRITE_READ_ONLY: Self = Self(0x0601_0002);
    pub const OBJECT_DOES_NOT_EXIST: Self = Self(0x0602_0000);
    pub const TYPE_MISMATCH: Self = Self(0x0607_0010);
    pub const LENGTH_TOO_HIGH: Self = Self(0x0607_0012);
    pub const LENGTH_TOO_LOW: Self = Self(0x0607_0013);
    pub const SUBINDEX_DOES_NOT_EXIST: Self = Self(0x0609_0011);
    pub const INVALID_VALUE: Self = Self(0x0609_0030);
    pub const RESOURCE_NOT_AVAILABLE: Self = Self(0x060A_0023);
    pub const GENERAL_ERROR: Self = Self(0x0800_0000);
    pub const STORE_APPLICATION_FAILURE: Self = Self(0x0800_0020);
    pub const NO_DATA_AVAILABLE: Self = Self(0x0800_0024);

    /// 원시 코드 값
    pub fn code(self) -> u32 {
        self.0
    }

    /// 사람이 읽을 수 있는 설명
    pub fn description(self) -> &'static str {
        match self {
            Self::TOGGLE_NOT_ALTERNATED => "Toggle bit not alternated",
            Self::TIMED_OUT => "SDO protocol timed out",
            Self::INVALID_COMMAND_SPECIFIER => "Client/server command specifier not valid or unknown",
            Self::INVALID_BLOCK_SIZE => "Invalid block size",
            Self::INVALID_SEQUENCE_NUMBER => "Invalid sequence number",
            Self::CRC_ERROR => "CRC error",
            Self::OUT_OF_MEMORY => "Out of memory",
            Self::UNSUPPORTED_ACCESS => "Unsupported access to an object",
            Self::READ_WRITE_ONLY => "Attempt to read a write only object",
            Self::WRITE_READ_ONLY => "Attempt to write a read only object",
            Self::OBJECT_DOES_NOT_EXIST => "Object does not exist in the object dictionary",
            Self::TYPE_MISMATCH => "Data type does not match, length of service parameter does not match",
            Self::LENGTH_TOO_HIGH => "Data type does not match, length of service parameter too high",
            Self::LENGTH_TOO_LOW => "Data type does not match, length of service parameter too low",
            Self::SUBINDEX_DOES_NOT_EXIST => "Sub-index does not exist",
            Self::INVALID_VALUE => "Invalid value for parameter",
            Self::RESOURCE_NOT_AVAILABLE => "Resource not available",
            Self::GENERAL_ERROR => "General error",
            Self::STORE_APPLICATION_FAILURE => "Data cannot be transferred or stored to the application",
            Self::NO_DATA_AVAILABLE => "No data available",
            _ => "unknown abort code",
        }
    }
}

impl Default for AbortCode {
    fn default() -> Self {
        Self::GENERAL_ERROR
    }
}

impl From<u32> for AbortCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} ({})", self.0, self.description())
    }
}
