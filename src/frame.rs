//! Ethernet + EtherCAT frame composition (the Frame Builder, spec §4.1).
//!
//! A [`Frame`] is a fixed-capacity byte buffer with the Ethernet and
//! EtherCAT sub-headers pre-populated; [`Frame::add_datagram`] appends one
//! datagram at a time, [`Frame::finalize`] pads and returns the wire view.
//!
//! Grounded in `src/pdu_loop/frame_element/mod.rs` and `src/command/mod.rs`
//! (teacher) for the builder-style API surface, and
//! `lib/include/kickcat/protocol.h` (KickCAT) for the exact header layout
//! and MTU constants.

use crate::command::{Address, Command};
use crate::error::{Error, Item, PduError};
use crate::wire::{get_bits, set_bits, PduRead, PduWrite};

/// Maximum Ethernet frame size this crate builds or parses.
pub const ETH_MAX_SIZE: usize = 1518;
/// Minimum Ethernet frame size; frames are zero-padded up to this.
pub const ETH_MIN_SIZE: usize = 60;
/// At most 15 datagrams fit in one frame (the `more_follows` bit chain).
pub const MAX_ETHERCAT_DATAGRAMS: usize = 15;

/// `PRIMARY_IF_MAC`, the destination address every built frame carries.
pub const PRIMARY_IF_MAC: [u8; 6] = [0xCA, 0xDE, 0xCA, 0xDE, 0xDE, 0xFF];
/// `SECONDARY_IF_MAC`, the source address every built frame carries.
pub const SECONDARY_IF_MAC: [u8; 6] = [0x03, 0x02, 0x02, 0x02, 0xFF, 0xFF];

const ETHERCAT_ETHERTYPE: u16 = 0x88A4;

const ETH_HEADER_LEN: usize = 14;
const ECAT_HEADER_LEN: usize = 2;
const DATAGRAM_HEADER_LEN: usize = 10;
const WKC_LEN: usize = 2;
const ECAT_HEADER_OFFSET: usize = ETH_HEADER_LEN;

/// EtherCAT sub-header subtype, carried in the high nibble of the 16 bit
/// `{len:11, reserved:1, type:4}` sub-header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum EthercatSubType {
    Dlpdu = 1,
    Mailbox = 5,
}

fn command_address_words(command: &Command) -> (u16, u16) {
    match command.address() {
        Some(Address::Device { address, register }) => (address, register),
        Some(Address::Logical(address)) => ((address >> 16) as u16, address as u16),
        None => (0, 0),
    }
}

/// A reassembled view into one datagram of a received frame: its command
/// (reconstructed from the raw command byte and address words), the index
/// that was sent, its payload, and the trailing working counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDatagram<'a> {
    pub command: Option<Command>,
    pub index: u8,
    pub data: &'a [u8],
    pub wkc: u16,
    pub circulating: bool,
}

/// Iterator over the datagrams of an already-received (echoed) frame,
/// terminating when a datagram's `more_follows` bit is clear.
///
/// Grounded in the `peek_datagram`/`next_datagram<T>` iteration described
/// in spec §4.1.
pub struct DatagramIter<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> DatagramIter<'a> {
    /// Decode the next datagram's payload as `T`, consuming it from the
    /// iterator. Returns `None` once the iterator is exhausted, or if the
    /// payload doesn't decode as `T`.
    pub fn next_datagram<T: PduRead>(&mut self) -> Option<(ParsedDatagram<'a>, T)> {
        let datagram = self.next()?;
        let value = T::unpack_from_slice(datagram.data)?;
        Some((datagram, value))
    }
}

impl<'a> Iterator for DatagramIter<'a> {
    type Item = ParsedDatagram<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + DATAGRAM_HEADER_LEN > self.buf.len() {
            self.done = true;
            return None;
        }

        let header = &self.buf[self.offset..self.offset + DATAGRAM_HEADER_LEN];
        let code = header[0];
        let index = header[1];
        let pos = u16::unpack_from_slice(&header[2..4])?;
        let reg = u16::unpack_from_slice(&header[4..6])?;
        let flags = u32::from(u16::unpack_from_slice(&header[6..8])?);
        let length = get_bits(flags, 0, 11) as usize;
        let circulating = get_bits(flags, 14, 1) != 0;
        let more_follows = get_bits(flags, 15, 1) != 0;

        let data_start = self.offset + DATAGRAM_HEADER_LEN;
        let data_end = data_start + length;
        let wkc_end = data_end + WKC_LEN;
        if wkc_end > self.buf.len() {
            self.done = true;
            return None;
        }

        let data = &self.buf[data_start..data_end];
        let wkc = u16::unpack_from_slice(&self.buf[data_end..wkc_end])?;
        let command = Command::from_code(code, pos, reg);

        self.offset = wkc_end;
        if !more_follows {
            self.done = true;
        }

        Some(ParsedDatagram { command, index, data, wkc, circulating })
    }
}

/// Parse the datagrams out of a received frame, in wire order.
pub fn datagrams(buf: &[u8]) -> DatagramIter<'_> {
    DatagramIter {
        buf,
        offset: ETH_HEADER_LEN + ECAT_HEADER_LEN,
        done: buf.len() < ETH_HEADER_LEN + ECAT_HEADER_LEN,
    }
}

/// The first datagram of a received frame, without consuming the rest.
pub fn peek_datagram(buf: &[u8]) -> Option<ParsedDatagram<'_>> {
    datagrams(buf).next()
}

/// A single Ethernet frame under construction: Ethernet header, EtherCAT
/// sub-header, and up to [`MAX_ETHERCAT_DATAGRAMS`] datagrams.
pub struct Frame {
    buf: heapless::Vec<u8, ETH_MAX_SIZE>,
    datagram_count: u8,
    payload_len: u16,
    last_flags_offset: Option<usize>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    pub fn new() -> Self {
        let mut buf = heapless::Vec::new();
        buf.extend_from_slice(&PRIMARY_IF_MAC).expect("fits: fixed header");
        buf.extend_from_slice(&SECONDARY_IF_MAC).expect("fits: fixed header");
        buf.extend_from_slice(&ETHERCAT_ETHERTYPE.to_be_bytes()).expect("fits: fixed header");
        buf.extend_from_slice(&[0u8, 0u8]).expect("fits: fixed header");

        Self { buf, datagram_count: 0, payload_len: 0, last_flags_offset: None }
    }

    pub fn datagram_count(&self) -> u8 {
        self.datagram_count
    }

    /// Append a datagram carrying `command`'s address and `data` as its
    /// payload, tagged with `index`. Sets the previous datagram's
    /// `more_follows` bit. Fails once 15 datagrams have been added, or if
    /// there isn't room for `data.len() + 12` more bytes.
    pub fn add_datagram(&mut self, index: u8, command: Command, data: &[u8]) -> Result<(), Error> {
        if self.datagram_count as usize >= MAX_ETHERCAT_DATAGRAMS {
            return Err(Error::Capacity(Item::Datagram));
        }

        let required = data.len() + DATAGRAM_HEADER_LEN + WKC_LEN;
        let remaining = ETH_MAX_SIZE.saturating_sub(self.buf.len());
        if required > remaining {
            return Err(Error::Pdu(PduError::TooLong));
        }

        if let Some(offset) = self.last_flags_offset {
            let mut flags = u32::from(u16::unpack_from_slice(&self.buf[offset..offset + 2]).unwrap_or(0));
            flags = set_bits(flags, 15, 1, 1);
            (flags as u16).pack_to_slice(&mut self.buf[offset..offset + 2]);
        }

        let (pos, reg) = command_address_words(&command);
        let mut header = [0u8; DATAGRAM_HEADER_LEN];
        header[0] = command.code();
        header[1] = index;
        pos.pack_to_slice(&mut header[2..4]);
        reg.pack_to_slice(&mut header[4..6]);

        let mut flags = 0u32;
        flags = set_bits(flags, 0, 11, data.len() as u32);
        (flags as u16).pack_to_slice(&mut header[6..8]);

        self.last_flags_offset = Some(self.buf.len() + 6);
        self.buf.extend_from_slice(&header).map_err(|_| Error::Capacity(Item::Datagram))?;
        self.buf.extend_from_slice(data).map_err(|_| Error::Capacity(Item::Datagram))?;
        self.buf.extend_from_slice(&[0u8, 0u8]).map_err(|_| Error::Capacity(Item::Datagram))?;

        self.datagram_count += 1;
        self.payload_len += required as u16;
        Ok(())
    }

    /// Pad to [`ETH_MIN_SIZE`], clear the last datagram's `more_follows`
    /// bit and write the total payload length into the EtherCAT
    /// sub-header, and return the finished wire view.
    pub fn finalize(&mut self) -> &[u8] {
        if let Some(offset) = self.last_flags_offset {
            let mut flags = u32::from(u16::unpack_from_slice(&self.buf[offset..offset + 2]).unwrap_or(0));
            flags = set_bits(flags, 15, 1, 0);
            (flags as u16).pack_to_slice(&mut self.buf[offset..offset + 2]);
        }

        let mut ecat = 0u32;
        ecat = set_bits(ecat, 0, 11, u32::from(self.payload_len));
        ecat = set_bits(ecat, 12, 4, EthercatSubType::Dlpdu as u32);
        (ecat as u16).pack_to_slice(&mut self.buf[ECAT_HEADER_OFFSET..ECAT_HEADER_OFFSET + 2]);

        while self.buf.len() < ETH_MIN_SIZE {
            let _ = self.buf.push(0);
        }

        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.datagram_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_datagram_round_trips() {
        let mut frame = Frame::new();
        frame.add_datagram(0, Command::brd(0x0130), &[0u8; 2]).unwrap();
        let wire = frame.finalize();

        assert_eq!(wire.len(), ETH_MIN_SIZE);
        assert_eq!(&wire[0..6], &PRIMARY_IF_MAC);
        assert_eq!(&wire[6..12], &SECONDARY_IF_MAC);
        assert_eq!(u16::from_be_bytes([wire[12], wire[13]]), 0x88A4);

        let datagram = peek_datagram(wire).unwrap();
        assert_eq!(datagram.command, Some(Command::brd(0x0130)));
        assert_eq!(datagram.data, &[0u8; 2]);
        assert_eq!(datagram.wkc, 0);
    }

    #[test]
    fn multiple_datagrams_chain_more_follows_bit() {
        let mut frame = Frame::new();
        frame.add_datagram(0, Command::fprd(0x1000, 0x0130), &[0u8; 2]).unwrap();
        frame.add_datagram(1, Command::fprd(0x1001, 0x0130), &[0u8; 2]).unwrap();
        let wire = frame.finalize();

        let parsed: Vec<_> = datagrams(wire).collect();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].index, 0);
        assert_eq!(parsed[1].index, 1);
    }

    #[test]
    fn rejects_sixteenth_datagram() {
        let mut frame = Frame::new();
        for i in 0..MAX_ETHERCAT_DATAGRAMS as u8 {
            frame.add_datagram(i, Command::brd(0x0130), &[]).unwrap();
        }
        let err = frame.add_datagram(15, Command::brd(0x0130), &[]).unwrap_err();
        assert!(matches!(err, Error::Capacity(Item::Datagram)));
    }

    #[test]
    fn logical_address_round_trips_through_command_reconstruction() {
        let mut frame = Frame::new();
        frame.add_datagram(3, Command::lwr(0xDEAD_BEEF), &[1, 2, 3, 4]).unwrap();
        let wire = frame.finalize();

        let datagram = peek_datagram(wire).unwrap();
        assert_eq!(datagram.command, Some(Command::lwr(0xDEAD_BEEF)));
    }

    #[test]
    fn next_datagram_decodes_payload_type() {
        let mut frame = Frame::new();
        frame.add_datagram(0, Command::brd(0x0130), &0x1234u16.to_le_bytes()).unwrap();
        let wire = frame.finalize();

        let (datagram, value) = datagrams(wire).next_datagram::<u16>().unwrap();
        assert_eq!(datagram.index, 0);
        assert_eq!(value, 0x1234);
    }
}
