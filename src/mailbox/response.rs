//! Responder (slave) side of the CoE mailbox: dispatches an incoming SDO
//! request against an [`crate::od::Dictionary`] and builds the reply.
//!
//! Grounded in `lib/src/CoE/mailbox/response.cc`'s `SDOMessage::process`,
//! `upload`/`uploadComplete`/`download`/`downloadComplete` and
//! `isUploadAuthorized`/`isDownloadAuthorized`.

use crate::coe::abort_code::CoeAbortCode;
use crate::coe::{CoeHeader, CoeService, InitSdoFlags, InitSdoHeader, MailboxHeader, MailboxType, Priority};
use crate::od::{Access, Dictionary, Entry, Object};
use crate::wire::{PduRead, PduWrite};

fn header_offset() -> usize {
    MailboxHeader::LEN + CoeHeader::LEN
}

/// Which ESM state the responding device is currently in, for the purposes
/// of access gating. `esm::State` converts into this once that module
/// exists; kept separate so the mailbox responder has no hard dependency on
/// the state machine module.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceState {
    PreOp,
    SafeOp,
    Op,
}

impl DeviceState {
    fn read_bit(self) -> Access {
        match self {
            Self::PreOp => Access::READ_PREOP,
            Self::SafeOp => Access::READ_SAFEOP,
            Self::Op => Access::READ_OP,
        }
    }

    fn write_bit(self) -> Access {
        match self {
            Self::PreOp => Access::WRITE_PREOP,
            Self::SafeOp => Access::WRITE_SAFEOP,
            Self::Op => Access::WRITE_OP,
        }
    }
}

fn is_upload_authorized(access: Access, state: DeviceState) -> bool {
    access.readable_in(state.read_bit())
}

fn is_download_authorized(access: Access, state: DeviceState) -> bool {
    access.writable_in(state.write_bit())
}

/// Handle one incoming CoE SDO request frame against `dictionary`, at the
/// device's current ESM state, returning the reply frame to send back (or
/// `None` if the frame wasn't addressed to CoE SDO at all).
pub fn handle_request(raw: &[u8], dictionary: &mut Dictionary, state: DeviceState) -> Option<Vec<u8>> {
    let header = MailboxHeader::unpack_from_slice(raw)?;
    if header.mailbox_type != MailboxType::Coe {
        return None;
    }
    let coe = CoeHeader::unpack_from_slice(&raw[MailboxHeader::LEN..])?;
    if coe.service != CoeService::SdoRequest {
        return None;
    }

    let offset = header_offset();
    if raw.len() < offset + InitSdoHeader::LEN {
        return Some(super::build_error_reply(header.counter, super::MailboxErrorCode::SizeTooShort));
    }
    let sdo = InitSdoHeader::unpack_from_slice(&raw[offset..])?;

    if dictionary.find(sdo.index).is_none() {
        return Some(abort(header.counter, sdo.index, sdo.sub_index, CoeAbortCode::ObjectDoesNotExist));
    }

    if sdo.flags.complete_access {
        if sdo.sub_index > 1 {
            return Some(abort(header.counter, sdo.index, sdo.sub_index, CoeAbortCode::UnsupportedAccess));
        }
        let object = dictionary.find_mut(sdo.index).expect("checked above");
        return Some(match sdo.flags.command {
            InitSdoFlags::UPLOAD => upload_complete(header.counter, sdo.index, sdo.sub_index, object, state),
            InitSdoFlags::DOWNLOAD => {
                let payload = &raw[offset + InitSdoHeader::LEN..].to_vec();
                download_complete(header.counter, sdo.index, object, state, payload)
            }
            _ => abort(header.counter, sdo.index, sdo.sub_index, CoeAbortCode::CommandSpecifierInvalid),
        });
    }

    match sdo.flags.command {
        InitSdoFlags::UPLOAD => {
            let object = dictionary.find(sdo.index).expect("checked above");
            let Some(entry) = object.entry(sdo.sub_index) else {
                return Some(abort(header.counter, sdo.index, sdo.sub_index, CoeAbortCode::SubindexDoesNotExist));
            };
            Some(upload(header.counter, sdo.index, sdo.sub_index, entry, state))
        }
        InitSdoFlags::DOWNLOAD => {
            let payload = raw[offset + InitSdoHeader::LEN..].to_vec();
            let object = dictionary.find_mut(sdo.index).expect("checked above");
            let Some(entry) = object.entry_mut(sdo.sub_index) else {
                return Some(abort(header.counter, sdo.index, sdo.sub_index, CoeAbortCode::SubindexDoesNotExist));
            };
            Some(download(header.counter, sdo.index, sdo.sub_index, entry, state, &sdo.flags, &payload))
        }
        _ => Some(abort(header.counter, sdo.index, sdo.sub_index, CoeAbortCode::CommandSpecifierInvalid)),
    }
}

fn abort(counter: u8, index: u16, sub_index: u8, code: CoeAbortCode) -> Vec<u8> {
    let header = MailboxHeader {
        length: (CoeHeader::LEN + InitSdoHeader::LEN + 4) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };
    let coe = CoeHeader {
        number: 0,
        service: CoeService::SdoResponse,
    };
    let sdo = InitSdoHeader {
        flags: InitSdoFlags {
            size_indicator: false,
            expedited_transfer: false,
            size: 0,
            complete_access: false,
            command: InitSdoFlags::ABORT,
        },
        index,
        sub_index,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN + 4];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN]);
    let payload_start = MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN;
    buf[payload_start..payload_start + 4].copy_from_slice(&code.code().to_le_bytes());
    buf
}

fn upload(counter: u8, index: u16, sub_index: u8, entry: &Entry, state: DeviceState) -> Vec<u8> {
    if !is_upload_authorized(entry.access, state) {
        return abort(counter, index, sub_index, CoeAbortCode::WriteReadOnlyAccess);
    }

    let bytes = entry.data.to_le_bytes();
    let expedited = bytes.len() <= 4;

    let flags = InitSdoFlags {
        size_indicator: true,
        expedited_transfer: expedited,
        size: if expedited { (4 - bytes.len()) as u8 } else { 0 },
        complete_access: false,
        command: InitSdoFlags::RESPONSE_UPLOAD,
    };

    let payload_len = if expedited { 4 } else { 4 + bytes.len() };
    let header = MailboxHeader {
        length: (CoeHeader::LEN + InitSdoHeader::LEN + payload_len) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };
    let coe = CoeHeader {
        number: 0,
        service: CoeService::SdoResponse,
    };
    let sdo = InitSdoHeader { flags, index, sub_index };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN + payload_len];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    let sdo_start = MailboxHeader::LEN + CoeHeader::LEN;
    sdo.pack_to_slice(&mut buf[sdo_start..sdo_start + InitSdoHeader::LEN]);
    let payload_start = sdo_start + InitSdoHeader::LEN;
    if expedited {
        buf[payload_start..payload_start + bytes.len()].copy_from_slice(&bytes);
    } else {
        buf[payload_start..payload_start + 4].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        buf[payload_start + 4..payload_start + 4 + bytes.len()].copy_from_slice(&bytes);
    }
    buf
}

fn upload_complete(counter: u8, index: u16, sub_index: u8, object: &Object, state: DeviceState) -> Vec<u8> {
    let Some(count_entry) = object.entry(0) else {
        return abort(counter, index, sub_index, CoeAbortCode::SubindexDoesNotExist);
    };
    let number_of_entries = count_entry.data.to_le_bytes()[0];

    let mut payload = std::vec![0u8; 4]; // size prefix, filled in below.

    // Subindex 0 (the entry count) is read like any other entry, so a
    // request starting at subindex 0 naturally gets the count first,
    // mirroring the original's `uploadComplete`.
    for i in sub_index..=number_of_entries {
        let Some(entry) = object.entry(i) else {
            return abort(counter, index, i, CoeAbortCode::SubindexDoesNotExist);
        };
        if !is_upload_authorized(entry.access, state) {
            return abort(counter, index, i, CoeAbortCode::WriteReadOnlyAccess);
        }
        payload.extend_from_slice(&entry.data.to_le_bytes());
    }

    let total = (payload.len() - 4) as u32;
    payload[0..4].copy_from_slice(&total.to_le_bytes());

    let header = MailboxHeader {
        length: (CoeHeader::LEN + InitSdoHeader::LEN + payload.len()) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };
    let coe = CoeHeader {
        number: 0,
        service: CoeService::SdoResponse,
    };
    let sdo = InitSdoHeader {
        flags: InitSdoFlags {
            size_indicator: false,
            expedited_transfer: false,
            size: 0,
            complete_access: true,
            command: InitSdoFlags::RESPONSE_UPLOAD_SEGMENTED,
        },
        index,
        sub_index: 1,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN + payload.len()];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    let sdo_start = MailboxHeader::LEN + CoeHeader::LEN;
    sdo.pack_to_slice(&mut buf[sdo_start..sdo_start + InitSdoHeader::LEN]);
    buf[sdo_start + InitSdoHeader::LEN..].copy_from_slice(&payload);
    buf
}

fn download(
    counter: u8,
    index: u16,
    sub_index: u8,
    entry: &mut Entry,
    state: DeviceState,
    flags: &InitSdoFlags,
    payload: &[u8],
) -> Vec<u8> {
    if !is_download_authorized(entry.access, state) {
        return abort(counter, index, sub_index, CoeAbortCode::ReadWriteOnlyAccess);
    }

    let data = if flags.expedited_transfer {
        let size = (4 - flags.size) as usize;
        &payload[..size.min(payload.len())]
    } else {
        if payload.len() < 4 {
            return abort(counter, index, sub_index, CoeAbortCode::DataTypeLengthMismatch);
        }
        let size = u32::unpack_from_slice(&payload[0..4]).unwrap_or(0) as usize;
        &payload[4..(4 + size).min(payload.len())]
    };

    if data.len() != entry.data.byte_len() {
        return abort(counter, index, sub_index, CoeAbortCode::DataTypeLengthMismatch);
    }

    if !entry.data.write_le_bytes(data) {
        return abort(counter, index, sub_index, CoeAbortCode::DataTypeLengthMismatch);
    }

    let header = MailboxHeader {
        length: (CoeHeader::LEN + InitSdoHeader::LEN) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };
    let coe = CoeHeader {
        number: 0,
        service: CoeService::SdoResponse,
    };
    let sdo = InitSdoHeader {
        flags: InitSdoFlags {
            size_indicator: false,
            expedited_transfer: false,
            size: 0,
            complete_access: false,
            command: InitSdoFlags::RESPONSE_DOWNLOAD,
        },
        index,
        sub_index,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..]);
    buf
}

fn download_complete(counter: u8, index: u16, object: &mut Object, state: DeviceState, payload: &[u8]) -> Vec<u8> {
    if payload.len() < 4 {
        return abort(counter, index, 1, CoeAbortCode::DataTypeLengthMismatch);
    }
    let msg_size = u32::unpack_from_slice(&payload[0..4]).unwrap_or(0) as usize;
    let mut cursor = 4usize;

    for entry in object.entries.iter_mut().skip(1) {
        if !is_download_authorized(entry.access, state) {
            return abort(counter, index, 0, CoeAbortCode::ReadWriteOnlyAccess);
        }
        let len = entry.data.byte_len();
        if cursor - 4 >= msg_size || cursor + len > payload.len() {
            break;
        }
        if !entry.data.write_le_bytes(&payload[cursor..cursor + len]) {
            return abort(counter, index, 0, CoeAbortCode::DataTypeLengthMismatch);
        }
        cursor += len;
    }

    let header = MailboxHeader {
        length: (CoeHeader::LEN + InitSdoHeader::LEN) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };
    let coe = CoeHeader {
        number: 0,
        service: CoeService::SdoResponse,
    };
    let sdo = InitSdoHeader {
        flags: InitSdoFlags {
            size_indicator: false,
            expedited_transfer: false,
            size: 0,
            complete_access: true,
            command: InitSdoFlags::RESPONSE_DOWNLOAD_SEGMENTED,
        },
        index,
        sub_index: 1,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::od::{DataType, EntryData, ObjectCode};

    fn device_id_dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        let mut object = Object::new(0x1018, ObjectCode::Record, "Identity");
        object.entries.push(Entry::new(0, 8, Access::READ, DataType::Unsigned8, "count", EntryData::U8(1)));
        object.entries.push(Entry::new(1, 32, Access::READ, DataType::Unsigned32, "vendor id", EntryData::U32(0xDEAD_BEEF)));
        dict.insert(object);
        dict
    }

    fn build_upload_request(index: u16, sub_index: u8, complete_access: bool) -> Vec<u8> {
        let header = MailboxHeader {
            length: (CoeHeader::LEN + InitSdoHeader::LEN) as u16,
            address: 0,
            priority: Priority::Lowest,
            mailbox_type: MailboxType::Coe,
            counter: 1,
        };
        let coe = CoeHeader {
            number: 0,
            service: CoeService::SdoRequest,
        };
        let sdo = InitSdoHeader {
            flags: InitSdoFlags {
                size_indicator: false,
                expedited_transfer: false,
                size: 0,
                complete_access,
                command: InitSdoFlags::UPLOAD,
            },
            index,
            sub_index,
        };
        let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN];
        header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
        coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
        sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..]);
        buf
    }

    #[test]
    fn upload_existing_entry_returns_expedited_response() {
        let mut dict = device_id_dictionary();
        let request = build_upload_request(0x1018, 1, false);
        let reply = handle_request(&request, &mut dict, DeviceState::Op).unwrap();

        let header = MailboxHeader::unpack_from_slice(&reply).unwrap();
        assert_eq!(header.mailbox_type, MailboxType::Coe);
        let sdo = InitSdoHeader::unpack_from_slice(&reply[header_offset()..]).unwrap();
        assert_eq!(sdo.flags.command, InitSdoFlags::RESPONSE_UPLOAD);
        assert!(sdo.flags.expedited_transfer);
    }

    #[test]
    fn upload_missing_object_aborts_with_object_does_not_exist() {
        let mut dict = device_id_dictionary();
        let request = build_upload_request(0x2000, 1, false);
        let reply = handle_request(&request, &mut dict, DeviceState::Op).unwrap();

        let sdo = InitSdoHeader::unpack_from_slice(&reply[header_offset()..]).unwrap();
        assert_eq!(sdo.flags.command, InitSdoFlags::ABORT);
        let payload_start = header_offset() + InitSdoHeader::LEN;
        let code = u32::unpack_from_slice(&reply[payload_start..payload_start + 4]).unwrap();
        assert_eq!(CoeAbortCode::from(code), CoeAbortCode::ObjectDoesNotExist);
    }

    fn complete_access_identity_dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        let mut object = Object::new(0x1018, ObjectCode::Record, "Identity");
        object.entries.push(Entry::new(0, 8, Access::READ, DataType::Unsigned8, "count", EntryData::U8(4)));
        object.entries.push(Entry::new(1, 32, Access::READ, DataType::Unsigned32, "vendor id", EntryData::U32(0x0000_06A5)));
        object.entries.push(Entry::new(2, 32, Access::READ, DataType::Unsigned32, "product code", EntryData::U32(0x00B0_CAD0)));
        object.entries.push(Entry::new(3, 32, Access::READ, DataType::Unsigned32, "revision", EntryData::U32(0x0000_0000)));
        object.entries.push(Entry::new(4, 32, Access::READ, DataType::Unsigned32, "serial number", EntryData::U32(0xCAFE_DECA)));
        dict.insert(object);
        dict
    }

    #[test]
    fn upload_complete_access_returns_count_then_entries_in_order() {
        let mut dict = complete_access_identity_dictionary();
        let request = build_upload_request(0x1018, 0, true);
        let reply = handle_request(&request, &mut dict, DeviceState::Op).unwrap();

        let header = MailboxHeader::unpack_from_slice(&reply).unwrap();
        assert_eq!(header.length, 27);

        let sdo_start = header_offset();
        let sdo = InitSdoHeader::unpack_from_slice(&reply[sdo_start..]).unwrap();
        assert_eq!(sdo.flags.command, InitSdoFlags::RESPONSE_UPLOAD_SEGMENTED);
        assert!(sdo.flags.complete_access);

        let payload = &reply[sdo_start + InitSdoHeader::LEN..];
        let size = u32::unpack_from_slice(&payload[0..4]).unwrap();
        assert_eq!(size, 17);
        assert_eq!(payload[4], 4, "first data byte must be the entry count");

        let values: Vec<u32> = payload[5..21]
            .chunks_exact(4)
            .map(|chunk| u32::unpack_from_slice(chunk).unwrap())
            .collect();
        assert_eq!(values, std::vec![0x0000_06A5, 0x00B0_CAD0, 0x0000_0000, 0xCAFE_DECA]);
    }

    #[test]
    fn upload_without_read_access_aborts_write_read_only() {
        let mut dict = Dictionary::new();
        let mut object = Object::new(0x2001, ObjectCode::Var, "write only");
        object.entries.push(Entry::new(0, 8, Access::WRITE, DataType::Unsigned8, "count", EntryData::U8(0)));
        object.entries.push(Entry::new(1, 8, Access::WRITE, DataType::Unsigned8, "value", EntryData::U8(0)));
        dict.insert(object);

        let request = build_upload_request(0x2001, 1, false);
        let reply = handle_request(&request, &mut dict, DeviceState::Op).unwrap();
        let sdo = InitSdoHeader::unpack_from_slice(&reply[header_offset()..]).unwrap();
        assert_eq!(sdo.flags.command, InitSdoFlags::ABORT);
        let payload_start = header_offset() + InitSdoHeader::LEN;
        let code = u32::unpack_from_slice(&reply[payload_start..payload_start + 4]).unwrap();
        assert_eq!(CoeAbortCode::from(code), CoeAbortCode::WriteReadOnlyAccess);
    }
}
