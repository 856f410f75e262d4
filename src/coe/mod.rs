//! CAN application protocol over EtherCAT (CoE).
//!
//! Wire layouts defined in ETG1000.6 section 5.6. These replace the
//! teacher's `ethercrab_wire`-derived structs with hand written
//! [`crate::wire::PduRead`]/[`crate::wire::PduWrite`] impls built on the
//! same bit-packing helpers used by [`crate::register::SupportFlags`].

pub mod abort_code;

use crate::wire::{get_bits, set_bits, PduRead, PduWrite};

/// Mailbox message priority (ETG1000.6 Table 29).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub enum Priority {
    #[default]
    Lowest = 0x00,
    Low = 0x01,
    High = 0x02,
    Highest = 0x03,
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0x00 => Self::Lowest,
            0x01 => Self::Low,
            0x02 => Self::High,
            _ => Self::Highest,
        }
    }
}

/// Mailbox protocol carried in a [`MailboxHeader`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub enum MailboxType {
    /// Error reply (no protocol payload, just an error code).
    Err,
    /// ADS over EtherCAT.
    Aoe,
    /// Ethernet over EtherCAT.
    Eoe,
    /// CAN application protocol over EtherCAT.
    Coe,
    /// File access over EtherCAT.
    Foe,
    /// Servo profile over EtherCAT.
    Soe,
    /// Vendor specific, or any reserved value this crate doesn't name.
    VendorSpecific(u8),
}

impl MailboxType {
    pub const fn code(self) -> u8 {
        match self {
            Self::Err => 0x00,
            Self::Aoe => 0x01,
            Self::Eoe => 0x02,
            Self::Coe => 0x03,
            Self::Foe => 0x04,
            Self::Soe => 0x05,
            Self::VendorSpecific(v) => v,
        }
    }
}

impl From<u8> for MailboxType {
    fn from(value: u8) -> Self {
        match value & 0x0f {
            0x00 => Self::Err,
            0x01 => Self::Aoe,
            0x02 => Self::Eoe,
            0x03 => Self::Coe,
            0x04 => Self::Foe,
            0x05 => Self::Soe,
            other => Self::VendorSpecific(other),
        }
    }
}

/// Mailbox header, common to every mailbox-in/mailbox-out message.
///
/// Defined in ETG1000.6 under `TMBXHEADER`, 6 bytes on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub struct MailboxHeader {
    /// Length of the mailbox service data that follows this header.
    pub length: u16,
    pub address: u16,
    pub priority: Priority,
    pub mailbox_type: MailboxType,
    /// Mailbox counter, 1 to 7 inclusive. 0 is reserved; wraps 7 -> 1.
    pub counter: u8,
}

impl PduRead for MailboxHeader {
    const LEN: usize = 6;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }

        let length = u16::unpack_from_slice(&buf[0..2])?;
        let address = u16::unpack_from_slice(&buf[2..4])?;
        let flags = buf[5] as u32;

        Some(Self {
            length,
            address,
            priority: Priority::from(get_bits(flags, 0, 2) as u8),
            mailbox_type: MailboxType::from(get_bits(flags, 2, 4) as u8),
            counter: get_bits(flags, 6, 3) as u8,
        })
    }
}

impl PduWrite for MailboxHeader {
    fn pack_to_slice(&self, buf: &mut [u8]) {
        self.length.pack_to_slice(&mut buf[0..2]);
        self.address.pack_to_slice(&mut buf[2..4]);
        buf[4] = 0;

        let mut flags = 0u32;
        flags = set_bits(flags, 0, 2, self.priority as u32);
        flags = set_bits(flags, 2, 4, u32::from(self.mailbox_type.code()));
        flags = set_bits(flags, 6, 3, u32::from(self.counter));
        buf[5] = flags as u8;
    }
}

impl MailboxHeader {
    /// Advance the counter, wrapping from 7 back to 1. 0 is never emitted.
    pub fn next_counter(counter: u8) -> u8 {
        if counter >= 7 {
            1
        } else {
            counter + 1
        }
    }
}

/// CoE service identifier, carried in the low nibble of a [`CoeHeader`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoeService {
    Emergency,
    SdoRequest,
    SdoResponse,
    TxPdo,
    RxPdo,
    TxPdoRemoteRequest,
    RxPdoRemoteRequest,
    SdoInformation,
}

impl CoeService {
    pub const fn code(self) -> u8 {
        match self {
            Self::Emergency => 0x01,
            Self::SdoRequest => 0x02,
            Self::SdoResponse => 0x03,
            Self::TxPdo => 0x04,
            Self::RxPdo => 0x05,
            Self::TxPdoRemoteRequest => 0x06,
            Self::RxPdoRemoteRequest => 0x07,
            Self::SdoInformation => 0x08,
        }
    }
}

impl TryFrom<u8> for CoeService {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => Self::Emergency,
            0x02 => Self::SdoRequest,
            0x03 => Self::SdoResponse,
            0x04 => Self::TxPdo,
            0x05 => Self::RxPdo,
            0x06 => Self::TxPdoRemoteRequest,
            0x07 => Self::RxPdoRemoteRequest,
            0x08 => Self::SdoInformation,
            _ => return Err(()),
        })
    }
}

/// CoE header: a 9 bit rolling counter and a 4 bit service selector.
///
/// Defined in ETG1000.6 section 5.6.1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CoeHeader {
    pub number: u16,
    pub service: CoeService,
}

impl PduRead for CoeHeader {
    const LEN: usize = 2;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        let raw = u16::unpack_from_slice(buf)? as u32;
        let number = get_bits(raw, 0, 9) as u16;
        let service = CoeService::try_from(get_bits(raw, 12, 4) as u8).ok()?;
        Some(Self { number, service })
    }
}

impl PduWrite for CoeHeader {
    fn pack_to_slice(&self, buf: &mut [u8]) {
        let mut raw = 0u32;
        raw = set_bits(raw, 0, 9, u32::from(self.number));
        raw = set_bits(raw, 12, 4, u32::from(self.service.code()));
        (raw as u16).pack_to_slice(buf);
    }
}

/// SDO flags byte shared by expedited/normal (non-segmented) requests and
/// responses. Defined in ETG1000.6 section 5.6.2.1.1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(arbitrary::Arbitrary))]
pub struct InitSdoFlags {
    pub size_indicator: bool,
    pub expedited_transfer: bool,
    /// For an expedited transfer, `4 - size` is the payload length.
    pub size: u8,
    pub complete_access: bool,
    pub command: u8,
}

impl InitSdoFlags {
    pub const DOWNLOAD_SEGMENTED: u8 = 0x00;
    pub const DOWNLOAD: u8 = 0x01;
    pub const UPLOAD: u8 = 0x02;
    pub const UPLOAD_SEGMENTED: u8 = 0x03;
    pub const ABORT: u8 = 0x04;

    pub const RESPONSE_UPLOAD_SEGMENTED: u8 = 0x00;
    pub const RESPONSE_DOWNLOAD_SEGMENTED: u8 = 0x01;
    pub const RESPONSE_UPLOAD: u8 = 0x02;
    pub const RESPONSE_DOWNLOAD: u8 = 0x03;
}

impl PduRead for InitSdoFlags {
    const LEN: usize = 1;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        let raw = *buf.first()? as u32;
        Some(Self {
            size_indicator: get_bits(raw, 0, 1) != 0,
            expedited_transfer: get_bits(raw, 1, 1) != 0,
            size: get_bits(raw, 2, 2) as u8,
            complete_access: get_bits(raw, 4, 1) != 0,
            command: get_bits(raw, 5, 3) as u8,
        })
    }
}

impl PduWrite for InitSdoFlags {
    fn pack_to_slice(&self, buf: &mut [u8]) {
        let mut raw = 0u32;
        raw = set_bits(raw, 0, 1, self.size_indicator as u32);
        raw = set_bits(raw, 1, 1, self.expedited_transfer as u32);
        raw = set_bits(raw, 2, 2, u32::from(self.size));
        raw = set_bits(raw, 4, 1, self.complete_access as u32);
        raw = set_bits(raw, 5, 3, u32::from(self.command));
        buf[0] = raw as u8;
    }
}

/// 4 byte SDO header used by expedited and normal (non-segmented) transfers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InitSdoHeader {
    pub flags: InitSdoFlags,
    pub index: u16,
    pub sub_index: u8,
}

impl PduRead for InitSdoHeader {
    const LEN: usize = 4;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        Some(Self {
            flags: InitSdoFlags::unpack_from_slice(&buf[0..1])?,
            index: u16::unpack_from_slice(&buf[1..3])?,
            sub_index: buf[3],
        })
    }
}

impl PduWrite for InitSdoHeader {
    fn pack_to_slice(&self, buf: &mut [u8]) {
        self.flags.pack_to_slice(&mut buf[0..1]);
        self.index.pack_to_slice(&mut buf[1..3]);
        buf[3] = self.sub_index;
    }
}

/// 1 byte header used by segmented upload/download requests and responses.
/// Defined in ETG1000.6 section 5.6.2.3.1/5.6.2.4.1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SegmentSdoHeader {
    pub is_last_segment: bool,
    /// Segment data size, `0x00` to `0x07`; `0` means all 7 bytes used.
    pub segment_data_size: u8,
    pub toggle: bool,
    pub command: u8,
}

impl SegmentSdoHeader {
    pub const DOWNLOAD_SEGMENT_REQUEST: u8 = 0x00;
    pub const DOWNLOAD_SEGMENT_RESPONSE: u8 = 0x01;
    pub const UPLOAD_SEGMENT_REQUEST: u8 = 0x03;
    pub const UPLOAD_SEGMENT_RESPONSE: u8 = 0x00;
}

impl PduRead for SegmentSdoHeader {
    const LEN: usize = 1;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        let raw = *buf.first()? as u32;
        Some(Self {
            is_last_segment: get_bits(raw, 0, 1) != 0,
            segment_data_size: get_bits(raw, 1, 3) as u8,
            toggle: get_bits(raw, 4, 1) != 0,
            command: get_bits(raw, 5, 3) as u8,
        })
    }
}

impl PduWrite for SegmentSdoHeader {
    fn pack_to_slice(&self, buf: &mut [u8]) {
        let mut raw = 0u32;
        raw = set_bits(raw, 0, 1, self.is_last_segment as u32);
        raw = set_bits(raw, 1, 3, u32::from(self.segment_data_size));
        raw = set_bits(raw, 4, 1, self.toggle as u32);
        raw = set_bits(raw, 5, 3, u32::from(self.command));
        buf[0] = raw as u8;
    }
}

/// CoE emergency payload. Defined in ETG1000.6 section 5.6.4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Emergency {
    pub error_code: u16,
    pub error_register: u8,
    pub data: [u8; 5],
}

impl PduRead for Emergency {
    const LEN: usize = 8;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let mut data = [0u8; 5];
        data.copy_from_slice(&buf[3..8]);
        Some(Self {
            error_code: u16::unpack_from_slice(&buf[0..2])?,
            error_register: buf[2],
            data,
        })
    }
}

/// Which subindex(es) an SDO transfer targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubIndex {
    /// Complete access: the whole object, subindex 0 onward.
    Complete,
    /// A single subindex.
    Index(u8),
}

impl SubIndex {
    pub fn complete_access(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// The subindex placed on the wire: complete access starts from 1, not 0
    /// (subindex 0 on the wire holds the entry count for complete access).
    pub fn wire_sub_index(&self) -> u8 {
        match self {
            Self::Complete => 1,
            Self::Index(i) => *i,
        }
    }
}

impl From<u8> for SubIndex {
    fn from(value: u8) -> Self {
        Self::Index(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_header_roundtrip() {
        let header = MailboxHeader {
            length: 10,
            address: 0x0000,
            priority: Priority::Lowest,
            mailbox_type: MailboxType::Coe,
            counter: 3,
        };
        let mut buf = [0u8; 6];
        header.pack_to_slice(&mut buf);
        assert_eq!(buf, [0x0a, 0x00, 0x00, 0x00, 0x00, 0x33]);
        assert_eq!(MailboxHeader::unpack_from_slice(&buf).unwrap(), header);
    }

    #[test]
    fn coe_header_roundtrip() {
        let header = CoeHeader {
            number: 0,
            service: CoeService::SdoRequest,
        };
        let mut buf = [0u8; 2];
        header.pack_to_slice(&mut buf);
        assert_eq!(buf, [0x00, 0x20]);
        assert_eq!(CoeHeader::unpack_from_slice(&buf).unwrap(), header);
    }

    /// Feeds a handful of pseudo-random byte streams through `arbitrary` to
    /// build `MailboxHeader` values and checks the pack/unpack round trip
    /// holds for every one of them, the way the teacher's `Arbitrary`
    /// derives back property tests for its own bit-packed wire structs.
    /// `counter` is masked to its real 3 bit wire range before comparing --
    /// `Arbitrary` doesn't know the field is sub-byte.
    #[test]
    fn mailbox_header_roundtrips_for_arbitrary_inputs() {
        use arbitrary::{Arbitrary, Unstructured};

        for seed in 0u8..20 {
            let bytes: Vec<u8> = (0..64).map(|i| seed.wrapping_mul(31).wrapping_add(i)).collect();
            let mut u = Unstructured::new(&bytes);
            let Ok(mut header) = MailboxHeader::arbitrary(&mut u) else {
                continue;
            };
            header.counter &= 0b111;
            // The wire field is 4 bits wide; clamp any generated
            // `VendorSpecific` code into the range that doesn't alias a
            // named variant (0..=5 are reserved), same constraint
            // `MailboxType::from` enforces on the decode side.
            if let MailboxType::VendorSpecific(code) = header.mailbox_type {
                header.mailbox_type = MailboxType::VendorSpecific(6 + code % 10);
            }

            let mut buf = [0u8; 6];
            header.pack_to_slice(&mut buf);
            assert_eq!(MailboxHeader::unpack_from_slice(&buf).unwrap(), header);
        }
    }

    /// Same treatment for the other sub-byte bit layout in this module:
    /// `size` and `command` only occupy 2 and 3 bits respectively.
    #[test]
    fn init_sdo_flags_roundtrips_for_arbitrary_inputs() {
        use arbitrary::{Arbitrary, Unstructured};

        for seed in 0u8..20 {
            let bytes: Vec<u8> = (0..8).map(|i| seed.wrapping_mul(17).wrapping_add(i)).collect();
            let mut u = Unstructured::new(&bytes);
            let Ok(mut flags) = InitSdoFlags::arbitrary(&mut u) else {
                continue;
            };
            flags.size &= 0b11;
            flags.command &= 0b111;

            let mut buf = [0u8; 1];
            flags.pack_to_slice(&mut buf);
            assert_eq!(InitSdoFlags::unpack_from_slice(&buf).unwrap(), flags);
        }
    }

    #[test]
    fn counter_wraps_from_seven_to_one() {
        assert_eq!(MailboxHeader::next_counter(7), 1);
        assert_eq!(MailboxHeader::next_counter(3), 4);
    }

    #[test]
    fn expedited_download_flags() {
        let flags = InitSdoFlags {
            size_indicator: true,
            expedited_transfer: true,
            size: 2,
            complete_access: false,
            command: InitSdoFlags::DOWNLOAD,
        };
        let mut buf = [0u8; 1];
        flags.pack_to_slice(&mut buf);
        assert_eq!(InitSdoFlags::unpack_from_slice(&buf).unwrap(), flags);
    }

    #[test]
    fn complete_access_subindex() {
        assert_eq!(SubIndex::Complete.wire_sub_index(), 1);
        assert_eq!(SubIndex::Index(4).wire_sub_index(), 4);
        assert!(SubIndex::Complete.complete_access());
        assert!(!SubIndex::Index(0).complete_access());
    }
}
