//! Requestor (master) side of the CoE mailbox: SDO upload/download state
//! machines and the emergency message watcher.
//!
//! Grounded in `lib/src/CoE/mailbox/request.cc`'s `SDOMessage::process` /
//! `processUpload` / `processUploadSegmented` / `processDownload` and
//! `EmergencyMessage::process`.

use crate::coe::{
    CoeHeader, CoeService, Emergency, InitSdoFlags, InitSdoHeader, MailboxHeader, MailboxType,
    Priority, SegmentSdoHeader, SubIndex,
};
use crate::error::{Error, MailboxError};
use crate::wire::{PduRead, PduWrite};

use super::ProcessingResult;

use smallvec::SmallVec;

/// Largest payload this crate will place in a single mailbox message.
/// Chosen to fit comfortably inside the smallest commonly configured
/// mailbox window (128 bytes) once headers are accounted for.
pub const MAX_EXPEDITED_LEN: usize = 4;

/// Inline capacity for an upload's reassembly buffer: most SDO entries
/// (scalars, short strings) fit without spilling to the heap; a complete-access
/// or long VISIBLE_STRING upload spills transparently.
const UPLOAD_INLINE_LEN: usize = 32;

fn header_offset() -> usize {
    MailboxHeader::LEN + CoeHeader::LEN
}

/// A client-side SDO upload (read) in progress.
#[derive(Debug, Clone)]
pub struct SdoUpload {
    counter: u8,
    index: u16,
    subindex: u8,
    complete_access: bool,
    /// Toggle bit for the next segmented upload request; flips each round.
    toggle: bool,
    buffer: SmallVec<[u8; UPLOAD_INLINE_LEN]>,
    segmented: bool,
    result: Option<Result<(), Error>>,
}

impl SdoUpload {
    pub fn new(counter: u8, index: u16, subindex: impl Into<SubIndex>, complete_access: bool) -> Self {
        let subindex = if complete_access {
            SubIndex::Complete
        } else {
            subindex.into()
        };
        Self {
            counter,
            index,
            subindex: subindex.wire_sub_index(),
            complete_access,
            toggle: false,
            buffer: SmallVec::new(),
            segmented: false,
            result: None,
        }
    }

    /// Encode the next request this transfer needs sent.
    pub fn request_bytes(&self) -> Vec<u8> {
        if !self.segmented {
            build_init_request(
                self.counter,
                self.index,
                self.subindex,
                self.complete_access,
                InitSdoFlags::UPLOAD,
            )
        } else {
            build_segment_request(self.counter, self.toggle, SegmentSdoHeader::UPLOAD_SEGMENT_REQUEST)
        }
    }

    /// Whether this transfer has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }

    /// Consume the transfer, yielding the uploaded bytes or the error.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        match self.result {
            Some(Ok(())) => Ok(self.buffer.into_vec()),
            Some(Err(e)) => Err(e),
            None => Err(Error::Timeout),
        }
    }

    /// Offer a raw mailbox reply to this transfer.
    pub fn process(&mut self, raw: &[u8]) -> ProcessingResult {
        let Some(header) = MailboxHeader::unpack_from_slice(raw) else {
            return ProcessingResult::Noop;
        };
        if header.mailbox_type != MailboxType::Coe {
            return ProcessingResult::Noop;
        }
        let Some(coe) = CoeHeader::unpack_from_slice(&raw[MailboxHeader::LEN..]) else {
            return ProcessingResult::Noop;
        };
        if !matches!(coe.service, CoeService::SdoRequest | CoeService::SdoResponse) {
            return ProcessingResult::Noop;
        }

        let offset = header_offset();

        if !self.segmented {
            let Some(sdo) = InitSdoHeader::unpack_from_slice(&raw[offset..]) else {
                return ProcessingResult::Noop;
            };
            if sdo.index != self.index || sdo.sub_index != self.subindex {
                return ProcessingResult::Noop;
            }

            if sdo.flags.command == InitSdoFlags::ABORT {
                return self.finalize_abort(raw, offset + InitSdoHeader::LEN);
            }

            if sdo.flags.command != InitSdoFlags::RESPONSE_UPLOAD {
                self.result = Some(Err(MailboxError::SdoResponseInvalid {
                    index: self.index,
                    subindex: self.subindex,
                }
                .into()));
                return ProcessingResult::Finalize;
            }

            let payload = &raw[offset + InitSdoHeader::LEN..header.length as usize + MailboxHeader::LEN];

            if sdo.flags.expedited_transfer {
                let size = (4 - sdo.flags.size) as usize;
                self.buffer.extend_from_slice(&payload[..size.min(payload.len())]);
                self.result = Some(Ok(()));
                return ProcessingResult::Finalize;
            }

            // Normal transfer: first 4 bytes are the complete size.
            if payload.len() < 4 {
                self.result = Some(Err(MailboxError::SdoResponseInvalid {
                    index: self.index,
                    subindex: self.subindex,
                }
                .into()));
                return ProcessingResult::Finalize;
            }
            let complete_size = u32::unpack_from_slice(&payload[0..4]).unwrap_or(0) as usize;
            let rest = &payload[4..];

            if rest.len() >= complete_size {
                self.buffer.extend_from_slice(&rest[..complete_size]);
                self.result = Some(Ok(()));
                return ProcessingResult::Finalize;
            }

            // Segmented: this frame carries the first chunk.
            self.buffer.extend_from_slice(rest);
            self.segmented = true;
            self.toggle = false;
            ProcessingResult::Continue
        } else {
            let Some(sdo) = SegmentSdoHeader::unpack_from_slice(&raw[offset..]) else {
                return ProcessingResult::Noop;
            };

            if sdo.command != SegmentSdoHeader::UPLOAD_SEGMENT_RESPONSE {
                self.result = Some(Err(MailboxError::SdoResponseInvalid {
                    index: self.index,
                    subindex: self.subindex,
                }
                .into()));
                return ProcessingResult::Finalize;
            }

            if sdo.toggle != self.toggle {
                self.result = Some(Err(MailboxError::BadToggleBit.into()));
                return ProcessingResult::Finalize;
            }

            let segment_payload_start = offset + SegmentSdoHeader::LEN;
            let size = if header.length == 10 {
                (7 - (sdo.segment_data_size | ((sdo.is_last_segment as u8) << 2))) as usize
            } else {
                u32::unpack_from_slice(&raw[segment_payload_start..segment_payload_start + 4]).unwrap_or(0) as usize
            };
            let data_start = if header.length == 10 {
                segment_payload_start
            } else {
                segment_payload_start + 4
            };

            self.buffer.extend_from_slice(&raw[data_start..data_start + size]);

            let more_follows = !sdo.is_last_segment;
            if !more_follows {
                self.result = Some(Ok(()));
                return ProcessingResult::Finalize;
            }

            self.toggle = !self.toggle;
            ProcessingResult::Continue
        }
    }

    fn finalize_abort(&mut self, raw: &[u8], payload_offset: usize) -> ProcessingResult {
        let code = u32::unpack_from_slice(&raw[payload_offset..payload_offset + 4]).unwrap_or(0);
        self.result = Some(Err(MailboxError::Aborted {
            code: code.into(),
            index: self.index,
            subindex: self.subindex,
        }
        .into()));
        ProcessingResult::Finalize
    }
}

/// A client-side SDO download (write) in progress. Only expedited (<= 4
/// byte) transfers are supported; larger writes are rejected up front,
/// mirroring the original's unimplemented segmented download path.
#[derive(Debug, Clone)]
pub struct SdoDownload {
    counter: u8,
    index: u16,
    subindex: u8,
    complete_access: bool,
    data: [u8; 4],
    len: u8,
    result: Option<Result<(), Error>>,
}

impl SdoDownload {
    pub fn new(
        counter: u8,
        index: u16,
        subindex: impl Into<SubIndex>,
        complete_access: bool,
        data: &[u8],
    ) -> Result<Self, Error> {
        if data.len() > MAX_EXPEDITED_LEN {
            return Err(Error::Capacity(crate::error::Item::Value));
        }
        let subindex = if complete_access {
            SubIndex::Complete
        } else {
            subindex.into()
        };
        let mut buf = [0u8; 4];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            counter,
            index,
            subindex: subindex.wire_sub_index(),
            complete_access,
            data: buf,
            len: data.len() as u8,
            result: None,
        })
    }

    pub fn request_bytes(&self) -> Vec<u8> {
        let mut base = build_init_request(
            self.counter,
            self.index,
            self.subindex,
            self.complete_access,
            InitSdoFlags::DOWNLOAD,
        );
        // Patch the flags byte to carry expedited transfer + size.
        let flags = InitSdoFlags {
            size_indicator: true,
            expedited_transfer: true,
            size: 4 - self.len,
            complete_access: self.complete_access,
            command: InitSdoFlags::DOWNLOAD,
        };
        flags.pack_to_slice(&mut base[header_offset()..header_offset() + 1]);
        base.extend_from_slice(&self.data);
        base[0..2].copy_from_slice(&(base.len() as u16 - 6).to_le_bytes());
        base
    }

    pub fn is_done(&self) -> bool {
        self.result.is_some()
    }

    pub fn finish(self) -> Result<(), Error> {
        self.result.unwrap_or(Err(Error::Timeout))
    }

    pub fn process(&mut self, raw: &[u8]) -> ProcessingResult {
        let Some(header) = MailboxHeader::unpack_from_slice(raw) else {
            return ProcessingResult::Noop;
        };
        if header.mailbox_type != MailboxType::Coe {
            return ProcessingResult::Noop;
        }
        let Some(coe) = CoeHeader::unpack_from_slice(&raw[MailboxHeader::LEN..]) else {
            return ProcessingResult::Noop;
        };
        if !matches!(coe.service, CoeService::SdoRequest | CoeService::SdoResponse) {
            return ProcessingResult::Noop;
        }

        let offset = header_offset();
        let Some(sdo) = InitSdoHeader::unpack_from_slice(&raw[offset..]) else {
            return ProcessingResult::Noop;
        };
        if sdo.index != self.index || sdo.sub_index != self.subindex {
            return ProcessingResult::Noop;
        }

        if sdo.flags.command == InitSdoFlags::ABORT {
            let payload_offset = offset + InitSdoHeader::LEN;
            let code = u32::unpack_from_slice(&raw[payload_offset..payload_offset + 4]).unwrap_or(0);
            self.result = Some(Err(MailboxError::Aborted {
                code: code.into(),
                index: self.index,
                subindex: self.subindex,
            }
            .into()));
            return ProcessingResult::Finalize;
        }

        if sdo.flags.command != InitSdoFlags::RESPONSE_DOWNLOAD {
            self.result = Some(Err(MailboxError::SdoResponseInvalid {
                index: self.index,
                subindex: self.subindex,
            }
            .into()));
            return ProcessingResult::Finalize;
        }

        self.result = Some(Ok(()));
        ProcessingResult::Finalize
    }
}

fn build_init_request(
    counter: u8,
    index: u16,
    subindex: u8,
    complete_access: bool,
    command: u8,
) -> Vec<u8> {
    let header = MailboxHeader {
        length: (CoeHeader::LEN + InitSdoHeader::LEN) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
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
            command,
        },
        index,
        sub_index: subindex,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..]);
    buf
}

fn build_segment_request(counter: u8, toggle: bool, command: u8) -> Vec<u8> {
    let header = MailboxHeader {
        length: (CoeHeader::LEN + SegmentSdoHeader::LEN) as u16,
        address: 0x0000,
        priority: Priority::Lowest,
        mailbox_type: MailboxType::Coe,
        counter,
    };
    let coe = CoeHeader {
        number: 0,
        service: CoeService::SdoRequest,
    };
    let sdo = SegmentSdoHeader {
        is_last_segment: false,
        segment_data_size: 0,
        toggle,
        command,
    };

    let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + SegmentSdoHeader::LEN];
    header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
    coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
    sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..]);
    buf
}

/// Watches for unsolicited CoE emergency messages and accumulates them.
/// Never finalizes: it is re-offered every receive, matching the original's
/// `FINALIZE_AND_KEEP` handling.
#[derive(Debug, Default)]
pub struct EmergencyWatcher {
    emergencies: Vec<Emergency>,
}

impl EmergencyWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, raw: &[u8]) -> ProcessingResult {
        let Some(header) = MailboxHeader::unpack_from_slice(raw) else {
            return ProcessingResult::Noop;
        };
        if header.mailbox_type != MailboxType::Coe {
            return ProcessingResult::Noop;
        }
        let Some(coe) = CoeHeader::unpack_from_slice(&raw[MailboxHeader::LEN..]) else {
            return ProcessingResult::Noop;
        };
        if coe.service != CoeService::Emergency {
            return ProcessingResult::Noop;
        }

        let offset = header_offset();
        if let Some(emergency) = Emergency::unpack_from_slice(&raw[offset..]) {
            self.emergencies.push(emergency);
        }
        ProcessingResult::FinalizeAndKeep
    }

    pub fn drain(&mut self) -> Vec<Emergency> {
        core::mem::take(&mut self.emergencies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coe::abort_code::CoeAbortCode;

    fn build_expedited_upload_response(index: u16, subindex: u8, data: &[u8]) -> Vec<u8> {
        let header = MailboxHeader {
            length: 10,
            address: 0x0000,
            priority: Priority::Lowest,
            mailbox_type: MailboxType::Coe,
            counter: 1,
        };
        let coe = CoeHeader {
            number: 0,
            service: CoeService::SdoResponse,
        };
        let sdo = InitSdoHeader {
            flags: InitSdoFlags {
                size_indicator: true,
                expedited_transfer: true,
                size: (4 - data.len()) as u8,
                complete_access: false,
                command: InitSdoFlags::RESPONSE_UPLOAD,
            },
            index,
            sub_index: subindex,
        };
        let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN + 4];
        header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
        coe.pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
        sdo.pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN]);
        let payload_start = MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN;
        buf[payload_start..payload_start + data.len()].copy_from_slice(data);
        buf
    }

    #[test]
    fn expedited_upload_finalizes_with_payload() {
        let mut upload = SdoUpload::new(1, 0x1018, 1u8, false);
        let reply = build_expedited_upload_response(0x1018, 1, &[0x42, 0x00]);
        assert_eq!(upload.process(&reply), ProcessingResult::Finalize);
        assert_eq!(upload.finish().unwrap(), vec![0x42, 0x00]);
    }

    #[test]
    fn abort_reply_surfaces_code() {
        let mut upload = SdoUpload::new(1, 0x1018, 1u8, false);
        let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN + 4];
        let header = MailboxHeader {
            length: 10,
            address: 0,
            priority: Priority::Lowest,
            mailbox_type: MailboxType::Coe,
            counter: 1,
        };
        header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
        CoeHeader {
            number: 0,
            service: CoeService::SdoResponse,
        }
        .pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
        InitSdoHeader {
            flags: InitSdoFlags {
                size_indicator: false,
                expedited_transfer: false,
                size: 0,
                complete_access: false,
                command: InitSdoFlags::ABORT,
            },
            index: 0x1018,
            sub_index: 1,
        }
        .pack_to_slice(&mut buf[MailboxHeader::LEN + CoeHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN]);
        let payload_start = MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN;
        buf[payload_start..payload_start + 4].copy_from_slice(&0x0602_0000u32.to_le_bytes());

        assert_eq!(upload.process(&buf), ProcessingResult::Finalize);
        match upload.finish() {
            Err(Error::Mailbox(MailboxError::Aborted { code, .. })) => {
                assert_eq!(code, CoeAbortCode::ObjectDoesNotExist);
            }
            other => panic!("expected aborted error, got {other:?}"),
        }
    }

    #[test]
    fn download_too_large_rejected_up_front() {
        let result = SdoDownload::new(1, 0x1018, 1u8, false, &[0, 1, 2, 3, 4]);
        assert!(result.is_err());
    }

    #[test]
    fn emergency_watcher_accumulates_and_never_finalizes() {
        let mut watcher = EmergencyWatcher::new();
        let header = MailboxHeader {
            length: 8,
            address: 0,
            priority: Priority::Lowest,
            mailbox_type: MailboxType::Coe,
            counter: 1,
        };
        let mut buf = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + 8];
        header.pack_to_slice(&mut buf[0..MailboxHeader::LEN]);
        CoeHeader {
            number: 0,
            service: CoeService::Emergency,
        }
        .pack_to_slice(&mut buf[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);

        assert_eq!(watcher.process(&buf), ProcessingResult::FinalizeAndKeep);
        assert_eq!(watcher.drain().len(), 1);
        assert_eq!(watcher.drain().len(), 0);
    }
}
