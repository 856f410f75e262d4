//! Mailbox subsystem: both the requestor (master) and responder (slave)
//! sides of CoE SDO, built on the wire layouts in [`crate::coe`].
//!
//! Grounded in `lib/include/kickcat/Mailbox.h` and
//! `lib/src/CoE/mailbox/request.cc` / `response.cc`.

pub mod request;
pub mod response;

use crate::coe::{CoeHeader, MailboxHeader, MailboxType};
use crate::wire::{PduRead, PduWrite};

/// Outcome of offering a raw mailbox message to an in-flight state machine,
/// or of driving one forward without new input.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Not for this message; try the next handler.
    Noop,
    /// Handled; more rounds are needed (a follow-up request/response was
    /// queued). Stays in `to_process`.
    Continue,
    /// Handled; the exchange is complete. Remove from `to_process`.
    Finalize,
    /// Handled, but keep around for further unsolicited messages (used by
    /// the emergency watcher).
    FinalizeAndKeep,
}

/// Mailbox-level error reply codes (ETG1000.6 mailbox error service,
/// `mailbox::Error` in `protocol.h`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MailboxErrorCode {
    Syntax,
    UnsupportedProtocol,
    InvalidChannel,
    ServiceNotSupported,
    InvalidHeader,
    SizeTooShort,
    NoMoreMemory,
    InvalidSize,
    ServiceInWork,
}

impl MailboxErrorCode {
    pub const fn code(self) -> u16 {
        match self {
            Self::Syntax => 0x01,
            Self::UnsupportedProtocol => 0x02,
            Self::InvalidChannel => 0x03,
            Self::ServiceNotSupported => 0x04,
            Self::InvalidHeader => 0x05,
            Self::SizeTooShort => 0x06,
            Self::NoMoreMemory => 0x07,
            Self::InvalidSize => 0x08,
            Self::ServiceInWork => 0x09,
        }
    }
}

/// Build an `ERR` mailbox reply: a mailbox header (type `Err`) followed by
/// `{type: 0x0001, detail: code}`.
pub fn build_error_reply(counter: u8, code: MailboxErrorCode) -> Vec<u8> {
    let header = MailboxHeader {
        length: 4,
        address: 0x0000,
        priority: crate::coe::Priority::Lowest,
        mailbox_type: MailboxType::Err,
        counter,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + 4];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    1u16.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + 2]);
    code.code()
        .pack_to_slice(&mut buf[MailboxHeader::LEN + 2..MailboxHeader::LEN + 4]);
    buf
}

/// Parse just enough of a raw mailbox message to route it: its header and,
/// if present, the CoE service selector.
pub fn peek_mailbox_type(raw: &[u8]) -> Option<MailboxType> {
    Some(MailboxHeader::unpack_from_slice(raw)?.mailbox_type)
}

pub fn peek_coe_header(raw: &[u8]) -> Option<CoeHeader> {
    if raw.len() < MailboxHeader::LEN + CoeHeader::LEN {
        return None;
    }
    CoeHeader::unpack_from_slice(&raw[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_shape() {
        let reply = build_error_reply(1, MailboxErrorCode::InvalidHeader);
        assert_eq!(reply.len(), MailboxHeader::LEN + 4);
        let header = MailboxHeader::unpack_from_slice(&reply).unwrap();
        assert_eq!(header.mailbox_type, MailboxType::Err);
        assert_eq!(header.length, 4);
    }

    #[test]
    fn peek_mailbox_type_rejects_short_buffer() {
        assert_eq!(peek_mailbox_type(&[0u8; 2]), None);
    }
}
