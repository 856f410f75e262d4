//! CoE SDO abort codes.
//!
//! Defined in ETG1000.6 Table 41. These are the 32 bit codes carried in the
//! payload of an `ABORT` SDO response, used by both the requestor (to
//! surface [`crate::error::MailboxError::Aborted`]) and the responder (to
//! build the abort reply itself).

use core::fmt;

/// A 32 bit SDO abort code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CoeAbortCode {
    ToggleBitNotAlternated,
    SdoProtocolTimeout,
    CommandSpecifierInvalid,
    InvalidBlockSize,
    InvalidSequenceNumber,
    CrcError,
    OutOfMemory,
    UnsupportedAccess,
    ReadWriteOnlyAccess,
    WriteReadOnlyAccess,
    Subindex0CannotBeWritten,
    CompleteAccessUnsupported,
    ObjectTooBig,
    ObjectMapped,
    ObjectDoesNotExist,
    ObjectCannotBeMapped,
    PdoLengthExceeded,
    ParameterIncompatibility,
    InternalIncompatibility,
    HardwareError,
    DataTypeLengthMismatch,
    DataTypeLengthTooHigh,
    DataTypeLengthTooLow,
    SubindexDoesNotExist,
    ValueRangeExceeded,
    ValueTooHigh,
    ValueTooLow,
    ModuleListMismatch,
    MaxLessThanMin,
    ResourceUnavailable,
    GeneralError,
    TransferAbortedGeneric,
    TransferAbortedLocalControl,
    TransferAbortedEsmState,
    DictionaryGenerationFailure,
    NoDataAvailable,
    /// A code this crate doesn't name, kept verbatim.
    Unknown(u32),
}

impl CoeAbortCode {
    pub const fn code(self) -> u32 {
        match self {
            Self::ToggleBitNotAlternated => 0x0503_0000,
            Self::SdoProtocolTimeout => 0x0504_0000,
            Self::CommandSpecifierInvalid => 0x0504_0001,
            Self::InvalidBlockSize => 0x0504_0002,
            Self::InvalidSequenceNumber => 0x0504_0003,
            Self::CrcError => 0x0504_0004,
            Self::OutOfMemory => 0x0504_0005,
            Self::UnsupportedAccess => 0x0601_0000,
            Self::ReadWriteOnlyAccess => 0x0601_0001,
            Self::WriteReadOnlyAccess => 0x0601_0002,
            Self::Subindex0CannotBeWritten => 0x0601_0003,
            Self::CompleteAccessUnsupported => 0x0601_0004,
            Self::ObjectTooBig => 0x0601_0005,
            Self::ObjectMapped => 0x0601_0006,
            Self::ObjectDoesNotExist => 0x0602_0000,
            Self::ObjectCannotBeMapped => 0x0604_0041,
            Self::PdoLengthExceeded => 0x0604_0042,
            Self::ParameterIncompatibility => 0x0604_0043,
            Self::InternalIncompatibility => 0x0604_0047,
            Self::HardwareError => 0x0606_0000,
            Self::DataTypeLengthMismatch => 0x0607_0010,
            Self::DataTypeLengthTooHigh => 0x0607_0012,
            Self::DataTypeLengthTooLow => 0x0607_0013,
            Self::SubindexDoesNotExist => 0x0609_0011,
            Self::ValueRangeExceeded => 0x0609_0030,
            Self::ValueTooHigh => 0x0609_0031,
            Self::ValueTooLow => 0x0609_0032,
            Self::ModuleListMismatch => 0x0609_0033,
            Self::MaxLessThanMin => 0x0609_0036,
            Self::ResourceUnavailable => 0x060A_0023,
            Self::GeneralError => 0x0800_0000,
            Self::TransferAbortedGeneric => 0x0800_0020,
            Self::TransferAbortedLocalControl => 0x0800_0021,
            Self::TransferAbortedEsmState => 0x0800_0022,
            Self::DictionaryGenerationFailure => 0x0800_0023,
            Self::NoDataAvailable => 0x0800_0024,
            Self::Unknown(v) => v,
        }
    }
}

impl From<u32> for CoeAbortCode {
    fn from(value: u32) -> Self {
        match value {
            0x0503_0000 => Self::ToggleBitNotAlternated,
            0x0504_0000 => Self::SdoProtocolTimeout,
            0x0504_0001 => Self::CommandSpecifierInvalid,
            0x0504_0002 => Self::InvalidBlockSize,
            0x0504_0003 => Self::InvalidSequenceNumber,
            0x0504_0004 => Self::CrcError,
            0x0504_0005 => Self::OutOfMemory,
            0x0601_0000 => Self::UnsupportedAccess,
            0x0601_0001 => Self::ReadWriteOnlyAccess,
            0x0601_0002 => Self::WriteReadOnlyAccess,
            0x0601_0003 => Self::Subindex0CannotBeWritten,
            0x0601_0004 => Self::CompleteAccessUnsupported,
            0x0601_0005 => Self::ObjectTooBig,
            0x0601_0006 => Self::ObjectMapped,
            0x0602_0000 => Self::ObjectDoesNotExist,
            0x0604_0041 => Self::ObjectCannotBeMapped,
            0x0604_0042 => Self::PdoLengthExceeded,
            0x0604_0043 => Self::ParameterIncompatibility,
            0x0604_0047 => Self::InternalIncompatibility,
            0x0606_0000 => Self::HardwareError,
            0x0607_0010 => Self::DataTypeLengthMismatch,
            0x0607_0012 => Self::DataTypeLengthTooHigh,
            0x0607_0013 => Self::DataTypeLengthTooLow,
            0x0609_0011 => Self::SubindexDoesNotExist,
            0x0609_0030 => Self::ValueRangeExceeded,
            0x0609_0031 => Self::ValueTooHigh,
            0x0609_0032 => Self::ValueTooLow,
            0x0609_0033 => Self::ModuleListMismatch,
            0x0609_0036 => Self::MaxLessThanMin,
            0x060A_0023 => Self::ResourceUnavailable,
            0x0800_0000 => Self::GeneralError,
            0x0800_0020 => Self::TransferAbortedGeneric,
            0x0800_0021 => Self::TransferAbortedLocalControl,
            0x0800_0022 => Self::TransferAbortedEsmState,
            0x0800_0023 => Self::DictionaryGenerationFailure,
            0x0800_0024 => Self::NoDataAvailable,
            other => Self::Unknown(other),
        }
    }
}

impl From<CoeAbortCode> for u32 {
    fn from(value: CoeAbortCode) -> Self {
        value.code()
    }
}

impl fmt::Display for CoeAbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToggleBitNotAlternated => "Toggle bit not alternated",
            Self::SdoProtocolTimeout => "SDO protocol timeout",
            Self::CommandSpecifierInvalid => "Client/server command specifier not valid or unknown",
            Self::InvalidBlockSize => "Invalid block size",
            Self::InvalidSequenceNumber => "Invalid sequence number",
            Self::CrcError => "CRC error",
            Self::OutOfMemory => "Out of memory",
            Self::UnsupportedAccess => "Unsupported access to an object",
            Self::ReadWriteOnlyAccess => "Attempt to read a write only object",
            Self::WriteReadOnlyAccess => "Attempt to write a read only object",
            Self::Subindex0CannotBeWritten => "Subindex cannot be written, SI0 must be 0 for write access",
            Self::CompleteAccessUnsupported => "Complete access not supported for variable length objects",
            Self::ObjectTooBig => "Object length exceeds mailbox size",
            Self::ObjectMapped => "Object mapped to RxPDO, SDO download blocked",
            Self::ObjectDoesNotExist => "The object does not exist in the object dictionary",
            Self::ObjectCannotBeMapped => "The object cannot be mapped into the PDO",
            Self::PdoLengthExceeded => "The number and length of the objects to be mapped would exceed the PDO length",
            Self::ParameterIncompatibility => "General parameter incompatibility reason",
            Self::InternalIncompatibility => "General internal incompatibility in the device",
            Self::HardwareError => "Access failed due to a hardware error",
            Self::DataTypeLengthMismatch => "Data type does not match, length of service parameter does not match",
            Self::DataTypeLengthTooHigh => "Data type does not match, length of service parameter too high",
            Self::DataTypeLengthTooLow => "Data type does not match, length of service parameter too low",
            Self::SubindexDoesNotExist => "Subindex does not exist",
            Self::ValueRangeExceeded => "Value range of parameter exceeded",
            Self::ValueTooHigh => "Value of parameter written too high",
            Self::ValueTooLow => "Value of parameter written too low",
            Self::ModuleListMismatch => "Module list mismatch",
            Self::MaxLessThanMin => "Maximum value is less than minimum value",
            Self::ResourceUnavailable => "Resource not available",
            Self::GeneralError => "General error",
            Self::TransferAbortedGeneric => "Data cannot be transferred or stored to the application",
            Self::TransferAbortedLocalControl => "Data cannot be transferred because of local control",
            Self::TransferAbortedEsmState => "Data cannot be transferred because of the present device state",
            Self::DictionaryGenerationFailure => "Object dictionary dynamic generation fails or no object dictionary is present",
            Self::NoDataAvailable => "No data available",
            Self::Unknown(_) => "Unknown abort code",
        };
        write!(f, "{:#010x}: {name}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        assert_eq!(CoeAbortCode::from(0x0602_0000), CoeAbortCode::ObjectDoesNotExist);
        assert_eq!(u32::from(CoeAbortCode::ObjectDoesNotExist), 0x0602_0000);
    }

    #[test]
    fn unknown_preserved() {
        assert_eq!(CoeAbortCode::from(0x1234_5678), CoeAbortCode::Unknown(0x1234_5678));
    }
}
