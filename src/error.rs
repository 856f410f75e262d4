//! Error types shared by both the master (bus/mailbox requestor) and slave
//! (ESM/mailbox responder) halves of this crate.

use crate::al_status_code::AlStatusCode;
use crate::coe::abort_code::CoeAbortCode;
use core::fmt;
use core::num::TryFromIntError;

/// Top level error type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Error {
    /// A low level error occurred when producing or consuming a datagram.
    Pdu(PduError),
    /// A working counter (WKC) did not match what was expected.
    WorkingCounter {
        /// The expected working counter value.
        expected: u16,
        /// The value actually received.
        received: u16,
    },
    /// An operation did not complete within its configured timeout.
    Timeout,
    /// A fixed size buffer was not large enough to hold a given item.
    Capacity(Item),
    /// A mailbox error was encountered.
    Mailbox(MailboxError),
    /// An item could not be found.
    NotFound {
        /// Item kind.
        item: Item,
        /// Index that was searched for, if applicable.
        index: Option<u16>,
    },
    /// A subdevice reported an AL status error while waiting for a state
    /// transition.
    SubDevice(AlStatusCode),
    /// A distributed clock error was encountered.
    DistributedClock(DistributedClockError),
    /// A requested EtherCAT state transition was rejected by the state
    /// machine (slave side).
    StateTransitionRejected {
        /// State that was requested.
        requested: u8,
        /// AL status code that accompanied the rejection.
        code: AlStatusCode,
    },
    /// A sync manager or mailbox configuration could not be validated.
    InvalidConfiguration,
    /// The SII (EEPROM) image failed to parse or validate.
    Sii(SiiError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdu(e) => write!(f, "PDU error: {e}"),
            Self::WorkingCounter { expected, received } => write!(
                f,
                "working counter mismatch: expected {expected}, received {received}"
            ),
            Self::Timeout => f.write_str("operation timed out"),
            Self::Capacity(item) => write!(f, "insufficient capacity for {item}"),
            Self::Mailbox(e) => write!(f, "mailbox error: {e}"),
            Self::NotFound { item, index } => match index {
                Some(index) => write!(f, "{item} not found at index {index}"),
                None => write!(f, "{item} not found"),
            },
            Self::SubDevice(code) => write!(f, "subdevice AL status error: {code}"),
            Self::DistributedClock(e) => write!(f, "distributed clock error: {e}"),
            Self::StateTransitionRejected { requested, code } => write!(
                f,
                "state transition to {requested:#04x} rejected: {code}"
            ),
            Self::InvalidConfiguration => f.write_str("invalid sync manager or mailbox configuration"),
            Self::Sii(e) => write!(f, "SII error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<PduError> for Error {
    fn from(e: PduError) -> Self {
        Self::Pdu(e)
    }
}

impl From<MailboxError> for Error {
    fn from(e: MailboxError) -> Self {
        Self::Mailbox(e)
    }
}

impl From<DistributedClockError> for Error {
    fn from(e: DistributedClockError) -> Self {
        Self::DistributedClock(e)
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Self {
        Self::Capacity(Item::Value)
    }
}

impl From<SiiError> for Error {
    fn from(e: SiiError) -> Self {
        Self::Sii(e)
    }
}

/// Kind of item involved in a [`Error::Capacity`] or [`Error::NotFound`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Item {
    /// A datagram slot.
    Datagram,
    /// A slave device.
    Slave,
    /// An object dictionary entry.
    Object,
    /// A raw value that didn't fit where it needed to.
    Value,
    /// A mailbox message.
    Mailbox,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Datagram => "datagram",
            Self::Slave => "slave",
            Self::Object => "object dictionary entry",
            Self::Value => "value",
            Self::Mailbox => "mailbox message",
        };
        f.write_str(s)
    }
}

/// Errors that occur while building, sending or parsing a single datagram.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PduError {
    /// The datagram was too large to fit in the frame.
    TooLong,
    /// A received frame's command did not match what was sent.
    CommandMismatch {
        /// Command that was sent.
        sent: u8,
        /// Command found in the response.
        received: u8,
    },
    /// A received frame's index did not match what was sent.
    IndexMismatch {
        /// Index that was sent.
        sent: u8,
        /// Index found in the response.
        received: u8,
    },
    /// Failed to decode a fixed-layout structure from a byte slice.
    Decode,
    /// The link layer reported a transport failure.
    Ethernet,
}

impl fmt::Display for PduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong => f.write_str("datagram too long for frame"),
            Self::CommandMismatch { sent, received } => {
                write!(f, "command mismatch: sent {sent:#04x}, received {received:#04x}")
            }
            Self::IndexMismatch { sent, received } => {
                write!(f, "index mismatch: sent {sent:#04x}, received {received:#04x}")
            }
            Self::Decode => f.write_str("failed to decode datagram"),
            Self::Ethernet => f.write_str("link layer transport error"),
        }
    }
}

/// Errors from the CoE SDO requestor or responder.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum MailboxError {
    /// The peer aborted the SDO transfer.
    Aborted {
        /// Abort code reported by the peer.
        code: CoeAbortCode,
        /// Object index the transfer targeted.
        index: u16,
        /// Object subindex the transfer targeted.
        subindex: u8,
    },
    /// A response or request did not fit in the mailbox's configured size.
    TooLong {
        /// Object index the transfer targeted.
        index: u16,
        /// Object subindex the transfer targeted.
        subindex: u8,
    },
    /// The slave has no mailbox sync managers configured.
    NoMailbox,
    /// A response to an SDO request was malformed.
    SdoResponseInvalid {
        /// Object index the transfer targeted.
        index: u16,
        /// Object subindex the transfer targeted.
        subindex: u8,
    },
    /// A segmented transfer's toggle bit didn't alternate as expected.
    BadToggleBit,
    /// The responder's outgoing queue has no room for another message.
    Overflow,
    /// An emergency message was received.
    Emergency {
        /// Error code carried by the message.
        error_code: u16,
        /// Error register carried by the message.
        error_register: u8,
    },
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted { code, index, subindex } => {
                write!(f, "SDO {index:#06x}:{subindex} aborted: {code}")
            }
            Self::TooLong { index, subindex } => {
                write!(f, "SDO {index:#06x}:{subindex} too long for mailbox")
            }
            Self::NoMailbox => f.write_str("slave has no mailbox configured"),
            Self::SdoResponseInvalid { index, subindex } => {
                write!(f, "invalid SDO response for {index:#06x}:{subindex}")
            }
            Self::BadToggleBit => f.write_str("segmented transfer toggle bit not alternated"),
            Self::Overflow => f.write_str("mailbox outgoing queue is full"),
            Self::Emergency { error_code, error_register } => write!(
                f,
                "emergency message: error code {error_code:#06x}, register {error_register:#04x}"
            ),
        }
    }
}

/// Errors from the distributed clock propagation delay computation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DistributedClockError {
    /// No slave on the network supports distributed clocks.
    NoReference,
    /// The slave topology could not be walked without risk of an infinite
    /// loop (a cycle was detected in the parent map).
    TopologyCycle,
}

impl fmt::Display for DistributedClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoReference => f.write_str("no distributed clock reference slave found"),
            Self::TopologyCycle => f.write_str("slave topology contains a cycle"),
        }
    }
}

/// Errors from reading or validating the SII (EEPROM) image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SiiError {
    /// The header checksum (CRC-8/MAXIM over words 0x00-0x06) didn't match
    /// the checksum byte stored at word 0x07.
    ChecksumMismatch {
        /// Checksum computed over the header words actually read.
        computed: u8,
        /// Checksum byte found at word 0x07.
        stored: u8,
    },
}

impl fmt::Display for SiiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChecksumMismatch { computed, stored } => write!(
                f,
                "SII header checksum mismatch: computed {computed:#04x}, stored {stored:#04x}"
            ),
        }
    }
}
