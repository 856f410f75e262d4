//! Master-side datagram engine and bus lifecycle (spec §4.3).
//!
//! [`Bus`] owns the link and turns single EtherCAT operations (one register
//! access, one SDO exchange, one process-data cycle) into single frame round
//! trips. Multi-datagram framing (`Frame` can carry up to 15 datagrams) is
//! available to callers through [`Frame`] directly; `Bus` itself only ever
//! builds one-datagram frames, which keeps every method here a simple
//! request/response call with a single working counter to check.
//!
//! Grounded in `src/maindevice.rs` (teacher) for the owning-struct shape and
//! `src/Bus.cc` (KickCAT) for `init`/`requestState`/`waitForState`/
//! `getCurrentState`/`readSDO`/`writeSDO`/`enableDC` sequencing. One
//! deliberate divergence from `Bus.cc`: mailbox and process-data sync
//! managers are never written by `Bus` itself. [`crate::esm::StateMachine`]
//! (the slave side already implemented in this crate) activates its own
//! `mailbox_sms`/`pdo_sms` on state entry, so `Bus` only *discovers* where
//! those sync managers ended up (`mailbox_geometry`) rather than assigning
//! them -- the master configures FMMUs (its own resource) and leaves sync
//! manager ownership with the device.

use crate::command::Command;
use crate::dc::{self, DcSlave};
use crate::error::{DistributedClockError, Error, Item, MailboxError, PduError};
use crate::esm::State;
use crate::frame::{self, Frame};
use crate::link::Link;
use crate::mailbox::request::{SdoDownload, SdoUpload};
use crate::mailbox::ProcessingResult;
use crate::pdo::{self, FmmuConfig, PdoLayout, SlavePdoConfig};
use crate::register::{RegisterAddress, SupportFlags};
use crate::wire::{PduRead, PduWrite};

/// First configured station address handed out by [`Bus::init`]; subsequent
/// slaves get consecutive addresses in discovery order.
const BASE_STATION_ADDRESS: u16 = 0x1000;

/// SII word offsets of the fixed identity fields (`eeprom::VENDOR_ID` etc in
/// KickCAT's `protocol.h`).
const SII_VENDOR_ID_WORD: u16 = 0x08;
const SII_PRODUCT_CODE_WORD: u16 = 0x0A;
const SII_REVISION_NUMBER_WORD: u16 = 0x0C;
const SII_SERIAL_NUMBER_WORD: u16 = 0x0E;

const SII_CONTROL_READ: u16 = 0x0100;
const SII_CONTROL_BUSY: u16 = 0x8000;

/// `AL_STATUS`'s error indicator bit (ETG1000.4 Table 35): set alongside the
/// state nibble whenever `AL_STATUS_CODE` carries a reason worth reading.
const AL_STATUS_ERROR_INDICATOR: u16 = 0x10;

/// Bounds on poll-style loops that would otherwise spin forever waiting on
/// silicon or a slow responder: AL_STATUS convergence, SII busy bit,
/// mailbox replies. Replaces `Bus.cc`'s mix of hardcoded retry counts,
/// per the open question recorded in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Attempts while polling `AL_STATUS` for a requested state change.
    pub state_change: u32,
    /// Attempts while polling a mailbox for a response, or an SII word for
    /// the busy bit to clear.
    pub mailbox: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { state_change: 1000, mailbox: 1000 }
    }
}

/// One slave as discovered and addressed by [`Bus::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveInfo {
    /// Position in the physical ring, in auto-increment discovery order.
    pub position: usize,
    pub configured_address: u16,
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision_number: u32,
    pub serial_number: u32,
    pub dc_supported: bool,
    /// Bitmap of open ports (bit `n` set = port `n` linked), from `DL_STATUS`.
    pub active_ports: u8,
    pub state: State,
}

/// Where a slave's mailbox sync managers ended up, learned by reading SM0/
/// SM1 back after the device has configured and activated them itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxGeometry {
    pub out_address: u16,
    pub out_length: u16,
    pub in_address: u16,
    pub in_length: u16,
}

/// The master-side datagram engine: one [`Link`], a wrapping datagram index,
/// a mailbox session counter, and the slaves discovered by [`Bus::init`].
pub struct Bus<L> {
    link: L,
    index: u8,
    mailbox_counter: u8,
    timeouts: Timeouts,
    slaves: Vec<SlaveInfo>,
}

impl<L> Bus<L> {
    pub fn slaves(&self) -> &[SlaveInfo] {
        &self.slaves
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}

impl<L: Link> Bus<L> {
    pub fn new(link: L) -> Self {
        Self::with_timeouts(link, Timeouts::default())
    }

    pub fn with_timeouts(link: L, timeouts: Timeouts) -> Self {
        Self { link, index: 0, mailbox_counter: 0, timeouts, slaves: Vec::new() }
    }

    pub fn open(&mut self, interface: &str) -> Result<(), Error> {
        self.link.open(interface)
    }

    pub fn close(&mut self) {
        self.link.close();
    }

    fn next_index(&mut self) -> u8 {
        self.index = self.index.wrapping_add(1);
        self.index
    }

    /// Build a one-datagram frame, send it, and return the echoed datagram's
    /// payload and working counter. Every other method on `Bus` is built on
    /// top of this.
    fn exchange(&mut self, command: Command, data: &[u8]) -> Result<(Vec<u8>, u16), Error> {
        let index = self.next_index();
        let mut frame = Frame::new();
        frame.add_datagram(index, command, data)?;
        let wire = frame.finalize().to_vec();

        self.link.write(&wire)?;
        let mut buf = [0u8; frame::ETH_MAX_SIZE];
        let n = self.link.read(&mut buf)?;
        let datagram = frame::peek_datagram(&buf[..n]).ok_or(Error::Pdu(PduError::Decode))?;

        if datagram.index != index {
            return Err(Error::Pdu(PduError::IndexMismatch { sent: index, received: datagram.index }));
        }

        Ok((datagram.data.to_vec(), datagram.wkc))
    }

    pub fn broadcast_read<T: PduRead>(&mut self, register: RegisterAddress) -> Result<(T, u16), Error> {
        let (data, wkc) = self.exchange(Command::brd(register.into()), &vec![0u8; T::LEN])?;
        Ok((T::unpack_from_slice(&data).ok_or(Error::Pdu(PduError::Decode))?, wkc))
    }

    pub fn broadcast_write<T: PduRead + PduWrite>(&mut self, register: RegisterAddress, value: &T) -> Result<u16, Error> {
        let mut buf = vec![0u8; T::LEN];
        value.pack_to_slice(&mut buf);
        let (_, wkc) = self.exchange(Command::bwr(register.into()), &buf)?;
        Ok(wkc)
    }

    pub fn fprd<T: PduRead>(&mut self, configured_address: u16, register: RegisterAddress) -> Result<(T, u16), Error> {
        let (data, wkc) = self.exchange(Command::fprd(configured_address, register.into()), &vec![0u8; T::LEN])?;
        Ok((T::unpack_from_slice(&data).ok_or(Error::Pdu(PduError::Decode))?, wkc))
    }

    pub fn fpwr<T: PduRead + PduWrite>(&mut self, configured_address: u16, register: RegisterAddress, value: &T) -> Result<u16, Error> {
        let mut buf = vec![0u8; T::LEN];
        value.pack_to_slice(&mut buf);
        let (_, wkc) = self.exchange(Command::fpwr(configured_address, register.into()), &buf)?;
        Ok(wkc)
    }

    pub fn fprd_raw(&mut self, configured_address: u16, address: u16, len: usize) -> Result<(Vec<u8>, u16), Error> {
        self.exchange(Command::fprd(configured_address, address), &vec![0u8; len])
    }

    pub fn fpwr_raw(&mut self, configured_address: u16, address: u16, data: &[u8]) -> Result<u16, Error> {
        let (_, wkc) = self.exchange(Command::fpwr(configured_address, address), data)?;
        Ok(wkc)
    }

    fn read_sii_word(&mut self, configured_address: u16, word_addr: u16) -> Result<u16, Error> {
        self.fpwr(configured_address, RegisterAddress::SiiAddress, &u32::from(word_addr))?;
        self.fpwr(configured_address, RegisterAddress::SiiControl, &SII_CONTROL_READ)?;

        for _ in 0..self.timeouts.mailbox {
            let (status, _): (u16, u16) = self.fprd(configured_address, RegisterAddress::SiiControl)?;
            if status & SII_CONTROL_BUSY == 0 {
                let (raw, _) = self.fprd_raw(configured_address, RegisterAddress::SiiData.into(), 4)?;
                return u16::unpack_from_slice(&raw[0..2]).ok_or(Error::Pdu(PduError::Decode));
            }
        }

        Err(Error::Timeout)
    }

    fn read_sii_u32(&mut self, configured_address: u16, word_addr: u16) -> Result<u32, Error> {
        let low = self.read_sii_word(configured_address, word_addr)?;
        let high = self.read_sii_word(configured_address, word_addr + 1)?;
        Ok(u32::from(low) | (u32::from(high) << 16))
    }

    /// Step 1 of [`Bus::init`]: every slave answers a broadcast read, so its
    /// working counter is the slave count (`Bus::checkSlaveCount`).
    fn detect_slave_count(&mut self) -> Result<usize, Error> {
        let (_type, wkc): (u8, u16) = self.broadcast_read(RegisterAddress::Type)?;
        Ok(wkc as usize)
    }

    /// Step 2: force every slave back to INIT regardless of its prior state,
    /// so enumeration starts from a known baseline (`Bus::resetSlaves`).
    fn reset_slaves(&mut self) -> Result<(), Error> {
        self.broadcast_write(RegisterAddress::AlControl, &(State::Init.nibble() as u16))?;
        Ok(())
    }

    /// Step 3: walk the ring with auto-increment addressing, handing every
    /// slave a unique configured station address (`Bus::setAddresses`).
    fn assign_station_addresses(&mut self, count: usize) -> Result<Vec<u16>, Error> {
        let mut addresses = Vec::with_capacity(count);
        for position in 0..count {
            let configured = BASE_STATION_ADDRESS.wrapping_add(position as u16);
            let position_word = 0u16.wrapping_sub(position as u16);
            let (_, wkc) = self.exchange(
                Command::apwr(position_word, RegisterAddress::ConfiguredStationAddress.into()),
                &configured.to_le_bytes(),
            )?;
            if wkc == 0 {
                return Err(Error::NotFound { item: Item::Slave, index: None });
            }
            addresses.push(configured);
        }
        Ok(addresses)
    }

    /// Step 4: identity and DC capability, read from the SII and
    /// `SUPPORT_FLAGS` (`Bus::fetchEeprom`/`areEepromReady`, simplified to
    /// the fields this crate's `SiiCategories` equivalent needs up front;
    /// full category parsing is `sii::SiiReader`'s job for a locally
    /// attached ESC, not this wire-level identity probe).
    fn fetch_identity(&mut self, configured_address: u16) -> Result<(u32, u32, u32, u32, bool), Error> {
        let vendor_id = self.read_sii_u32(configured_address, SII_VENDOR_ID_WORD)?;
        let product_code = self.read_sii_u32(configured_address, SII_PRODUCT_CODE_WORD)?;
        let revision_number = self.read_sii_u32(configured_address, SII_REVISION_NUMBER_WORD)?;
        let serial_number = self.read_sii_u32(configured_address, SII_SERIAL_NUMBER_WORD)?;
        let (support, _): (SupportFlags, u16) = self.fprd(configured_address, RegisterAddress::SupportFlags)?;
        Ok((vendor_id, product_code, revision_number, serial_number, support.dc_supported))
    }

    fn active_ports_from_dl_status(status: u16) -> u8 {
        let mut mask = 0u8;
        for port in 0..4u8 {
            if status & (1 << (4 + 2 * port)) != 0 {
                mask |= 1 << port;
            }
        }
        mask
    }

    fn detect_ports(&mut self, configured_address: u16) -> Result<u8, Error> {
        let (status, _): (u16, u16) = self.fprd(configured_address, RegisterAddress::DlStatus)?;
        Ok(Self::active_ports_from_dl_status(status))
    }

    /// Request a state transition by writing `AL_CONTROL`; does not wait for
    /// it to take effect (`Bus::requestState`).
    pub fn request_state(&mut self, configured_address: u16, state: State) -> Result<(), Error> {
        let wkc = self.fpwr(configured_address, RegisterAddress::AlControl, &(state.nibble() as u16))?;
        if wkc == 0 {
            return Err(Error::NotFound { item: Item::Slave, index: None });
        }
        Ok(())
    }

    pub fn current_state(&mut self, configured_address: u16) -> Result<State, Error> {
        let (status, _): (u16, u16) = self.fprd(configured_address, RegisterAddress::AlStatus)?;
        Ok(State::from_nibble(status as u8))
    }

    /// Poll `AL_STATUS` until it reports `state`, bounded by
    /// `timeouts.state_change`. The error indicator bit short-circuits the
    /// wait: a slave that rejects the transition won't ever reach the
    /// requested state, so there's no point spinning out the clock
    /// (`Bus::waitForState`).
    pub fn wait_for_state(&mut self, configured_address: u16, state: State) -> Result<(), Error> {
        for _ in 0..self.timeouts.state_change {
            let (status, _): (u16, u16) = self.fprd(configured_address, RegisterAddress::AlStatus)?;
            if status & AL_STATUS_ERROR_INDICATOR != 0 {
                let (code, _): (u16, u16) = self.fprd(configured_address, RegisterAddress::AlStatusCode)?;
                log::warn!("slave {configured_address:#06x} rejected state request: {code:#06x}");
                return Err(Error::SubDevice(code.into()));
            }
            if State::from_nibble(status as u8) == state {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Discovers one slave's mailbox geometry by reading back SM0/SM1,
    /// which the slave's own `esm::StateMachine` has already configured and
    /// activated on its PRE_OP entry.
    pub fn mailbox_geometry(&mut self, configured_address: u16) -> Result<MailboxGeometry, Error> {
        let (sm0, _) = self.fprd_raw(configured_address, RegisterAddress::Sm0.into(), 8)?;
        let (sm1, _) = self.fprd_raw(configured_address, RegisterAddress::Sm1.into(), 8)?;
        Ok(MailboxGeometry {
            out_address: u16::unpack_from_slice(&sm0[0..2]).unwrap_or_default(),
            out_length: u16::unpack_from_slice(&sm0[2..4]).unwrap_or_default(),
            in_address: u16::unpack_from_slice(&sm1[0..2]).unwrap_or_default(),
            in_length: u16::unpack_from_slice(&sm1[2..4]).unwrap_or_default(),
        })
    }

    fn next_mailbox_counter(&mut self) -> u8 {
        self.mailbox_counter = crate::coe::MailboxHeader::next_counter(self.mailbox_counter);
        self.mailbox_counter
    }

    fn write_mailbox(&mut self, configured_address: u16, address: u16, data: &[u8]) -> Result<u16, Error> {
        self.fpwr_raw(configured_address, address, data)
    }

    fn read_mailbox(&mut self, configured_address: u16, address: u16, len: usize) -> Result<(Vec<u8>, u16), Error> {
        self.fprd_raw(configured_address, address, len)
    }

    /// Read one object's value via CoE SDO upload, driving [`SdoUpload`]
    /// through as many mailbox round trips as a segmented transfer needs
    /// (`Bus::readSDO`).
    pub fn read_sdo(&mut self, configured_address: u16, index: u16, subindex: u8, complete_access: bool) -> Result<Vec<u8>, Error> {
        let geometry = self.mailbox_geometry(configured_address)?;
        let mut upload = SdoUpload::new(self.next_mailbox_counter(), index, subindex, complete_access);

        for _ in 0..self.timeouts.mailbox {
            let request = upload.request_bytes();
            self.write_mailbox(configured_address, geometry.out_address, &request)?;

            let response = self.poll_mailbox(configured_address, geometry.in_address, geometry.in_length as usize)?;

            match upload.process(&response) {
                ProcessingResult::Finalize => return upload.finish(),
                ProcessingResult::Continue => continue,
                ProcessingResult::Noop | ProcessingResult::FinalizeAndKeep => {
                    return Err(Error::Mailbox(MailboxError::SdoResponseInvalid { index, subindex }));
                }
            }
        }

        Err(Error::Timeout)
    }

    /// Write one object's value via CoE SDO download (`Bus::writeSDO`).
    /// Only expedited (<= 4 byte) transfers are supported, matching
    /// [`SdoDownload`]'s own limit.
    pub fn write_sdo(&mut self, configured_address: u16, index: u16, subindex: u8, complete_access: bool, data: &[u8]) -> Result<(), Error> {
        let geometry = self.mailbox_geometry(configured_address)?;
        let mut download = SdoDownload::new(self.next_mailbox_counter(), index, subindex, complete_access, data)?;

        for _ in 0..self.timeouts.mailbox {
            let request = download.request_bytes();
            self.write_mailbox(configured_address, geometry.out_address, &request)?;

            let response = self.poll_mailbox(configured_address, geometry.in_address, geometry.in_length as usize)?;

            match download.process(&response) {
                ProcessingResult::Finalize => return download.finish(),
                ProcessingResult::Continue => continue,
                ProcessingResult::Noop | ProcessingResult::FinalizeAndKeep => {
                    return Err(Error::Mailbox(MailboxError::SdoResponseInvalid { index, subindex }));
                }
            }
        }

        Err(Error::Timeout)
    }

    /// Poll a mailbox-in window until a reply lands (a nonzero working
    /// counter), bounded by `timeouts.mailbox`.
    fn poll_mailbox(&mut self, configured_address: u16, address: u16, len: usize) -> Result<Vec<u8>, Error> {
        for _ in 0..self.timeouts.mailbox {
            let (data, wkc) = self.read_mailbox(configured_address, address, len)?;
            if wkc > 0 {
                return Ok(data);
            }
        }
        Err(Error::Timeout)
    }

    /// Assigns every slave's process-data image a logical address slice and
    /// writes the matching FMMU records (`Bus::createMapping` +
    /// `configureFMMUs`). The sync manager window each FMMU targets is
    /// looked up by convention (`default_sm_physical_address`) since this
    /// crate's SII reader doesn't carry full sync-manager category parsing
    /// (`sii::SiiCategories` only counts them) -- matching the common
    /// single-mailbox-profile ESC memory layout most simple devices ship
    /// with.
    pub fn configure_process_data(&mut self, slaves: &[SlavePdoConfig<'_>]) -> Result<PdoLayout, Error> {
        let layout = pdo::assign_logical_addresses(slaves);

        let mut next_fmmu: std::collections::HashMap<u16, u8> = std::collections::HashMap::new();
        for mapping in layout.inputs.iter().chain(layout.outputs.iter()) {
            let physical_address = default_sm_physical_address(mapping.sync_manager);
            let fmmu = FmmuConfig::for_mapping(mapping, physical_address);
            let index = next_fmmu.entry(mapping.configured_address).or_insert(0);
            self.fpwr_raw(mapping.configured_address, RegisterAddress::fmmu(*index).into(), &fmmu.to_bytes())?;
            *index += 1;
        }

        Ok(layout)
    }

    /// Exchanges the input half of the process-data image with one `LRD`
    /// (`Bus::processDataRead`).
    pub fn process_data_read(&mut self, layout: &PdoLayout, image: &mut [u8]) -> Result<u16, Error> {
        let len = layout.input_bytes as usize;
        let (data, wkc) = self.exchange(Command::lrd(0), &vec![0u8; len])?;
        let copy_len = len.min(image.len()).min(data.len());
        image[..copy_len].copy_from_slice(&data[..copy_len]);
        Ok(wkc)
    }

    /// Exchanges the output half of the process-data image with one `LWR`
    /// (`Bus::processDataWrite`).
    pub fn process_data_write(&mut self, layout: &PdoLayout, image: &[u8]) -> Result<u16, Error> {
        let len = layout.output_bytes as usize;
        let (_, wkc) = self.exchange(Command::lwr(0), &image[..len.min(image.len())])?;
        Ok(wkc)
    }

    /// Measures propagation delay for every DC-capable slave and activates
    /// SYNC0 (`Bus::enableDC`). Must run after [`Bus::init`] has populated
    /// `self.slaves()`.
    pub fn enable_dc(&mut self, cycle_time_ns: i64, shift_ns: i64, start_delay_ns: i64) -> Result<(), Error> {
        if self.slaves.is_empty() {
            return Err(Error::DistributedClock(DistributedClockError::NoReference));
        }

        let active_ports: Vec<u8> = self.slaves.iter().map(|s| s.active_ports).collect();
        let parents = dc::topology_from_port_counts(&active_ports);

        let mut dc_slaves = Vec::with_capacity(self.slaves.len());
        for (i, slave) in self.slaves.iter().enumerate() {
            let mut received_time = [0i64; 4];
            for port in 0..4u8 {
                if slave.active_ports & (1 << port) != 0 {
                    let (t, _): (u32, u16) = self.fprd(slave.configured_address, dc_time_port_register(port))?;
                    received_time[port as usize] = i64::from(t);
                }
            }
            let (ecat_time, _): (u32, u16) = self.fprd(slave.configured_address, RegisterAddress::DcReceiveTime)?;

            dc_slaves.push(DcSlave {
                address: slave.configured_address,
                dc_supported: slave.dc_supported,
                active_ports: slave.active_ports,
                received_time,
                ecat_received_time: i64::from(ecat_time),
                parent: parents[i],
                delay: 0,
                time_offset: 0,
            });
        }

        let reference = dc::pick_reference(&dc_slaves).ok_or(Error::DistributedClock(DistributedClockError::NoReference))?;
        let master_time = dc_slaves[reference].ecat_received_time;
        dc::compute_propagation_delays(&mut dc_slaves, reference, master_time)?;

        for slave in &dc_slaves {
            if !slave.dc_supported {
                continue;
            }
            self.fpwr(slave.address, RegisterAddress::DcSystemTimeTransmissionDelay, &(slave.delay as u32))?;
            self.fpwr(slave.address, RegisterAddress::DcSystemTimeOffset, &(slave.time_offset as u32))?;
        }

        let start = dc::start_time(master_time, cycle_time_ns, shift_ns, start_delay_ns);
        self.broadcast_write(RegisterAddress::DcSyncStartTime, &(start as u32))?;
        self.broadcast_write(RegisterAddress::DcSync0CycleTime, &(cycle_time_ns as u32))?;
        self.broadcast_write(RegisterAddress::DcSyncActive, &1u8)?;

        log::debug!("DC enabled: reference slave index {reference}, start time {start}");
        Ok(())
    }

    /// Full enumeration: count slaves, reset them, assign station addresses,
    /// fetch identity, then request and wait for PRE_OP across the whole
    /// segment (`Bus::init`). Leaves `self.slaves()` populated for
    /// [`Bus::enable_dc`] and process-data configuration to build on.
    pub fn init(&mut self) -> Result<&[SlaveInfo], Error> {
        let count = self.detect_slave_count()?;
        log::debug!("detected {count} slave(s)");
        self.reset_slaves()?;
        let addresses = self.assign_station_addresses(count)?;

        let mut slaves = Vec::with_capacity(count);
        for (position, configured_address) in addresses.into_iter().enumerate() {
            let (vendor_id, product_code, revision_number, serial_number, dc_supported) =
                self.fetch_identity(configured_address)?;
            let active_ports = self.detect_ports(configured_address)?;
            slaves.push(SlaveInfo {
                position,
                configured_address,
                vendor_id,
                product_code,
                revision_number,
                serial_number,
                dc_supported,
                active_ports,
                state: State::Init,
            });
        }

        for slave in &slaves {
            self.request_state(slave.configured_address, State::PreOp)?;
        }
        for slave in &mut slaves {
            self.wait_for_state(slave.configured_address, State::PreOp)?;
            slave.state = State::PreOp;
        }

        self.slaves = slaves;
        Ok(&self.slaves)
    }
}

fn dc_time_port_register(port: u8) -> RegisterAddress {
    match port {
        0 => RegisterAddress::DcTimePort0,
        1 => RegisterAddress::DcTimePort1,
        2 => RegisterAddress::DcTimePort2,
        _ => RegisterAddress::DcTimePort3,
    }
}

/// Conventional ESC memory map for a simple single-mailbox-profile device:
/// SM0/SM1 for mailbox out/in, SM2/SM3 for process-data out/in. Devices that
/// deviate from this (multi-mailbox profiles, EEPROM-driven relocation) need
/// their own layout supplied out of band; that negotiation is out of scope
/// here, matching the EEPROM-image non-goal.
fn default_sm_physical_address(sync_manager: u8) -> u16 {
    match sync_manager {
        0 => 0x1000,
        1 => 0x1080,
        2 => 0x1100,
        3 => 0x1180,
        other => 0x1000 + u16::from(other) * 0x80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esc::EscDevice;
    use crate::link::LoopbackLink;
    use crate::od::{Access, DataType, Dictionary, Entry, EntryData, Object, ObjectCode};

    fn sm_record(start_address: u16, length: u16, control: u8) -> [u8; 8] {
        let mut record = [0u8; 8];
        record[0..2].copy_from_slice(&start_address.to_le_bytes());
        record[2..4].copy_from_slice(&length.to_le_bytes());
        record[4] = control;
        record[6] = 1; // activate bit set, as the device's own firmware would do.
        record
    }

    #[test]
    fn detect_slave_count_matches_population() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        link.add_slave();
        link.add_slave();
        let mut bus = Bus::new(link);

        assert_eq!(bus.detect_slave_count().unwrap(), 3);
    }

    #[test]
    fn assign_station_addresses_walks_ring_positions() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        link.add_slave();
        let mut bus = Bus::new(link);

        let addresses = bus.assign_station_addresses(2).unwrap();
        assert_eq!(addresses, vec![0x1000, 0x1001]);
    }

    #[test]
    fn fprd_fpwr_round_trip_a_fixed_slave() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        link.slave(0).poke(RegisterAddress::ConfiguredStationAddress.into(), &0x1000u16.to_le_bytes());
        let mut bus = Bus::new(link);

        bus.fpwr(0x1000, RegisterAddress::AlControl, &0x0002u16).unwrap();
        let (value, wkc): (u16, u16) = bus.fprd(0x1000, RegisterAddress::AlControl).unwrap();
        assert_eq!(value, 0x0002);
        assert_eq!(wkc, 1);
    }

    #[test]
    fn wait_for_state_succeeds_once_al_status_matches() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        link.slave(0).poke(RegisterAddress::ConfiguredStationAddress.into(), &0x1000u16.to_le_bytes());
        link.slave(0).poke(RegisterAddress::AlStatus.into(), &(State::PreOp.nibble() as u16).to_le_bytes());
        let mut bus = Bus::new(link);

        bus.wait_for_state(0x1000, State::PreOp).unwrap();
    }

    #[test]
    fn wait_for_state_surfaces_error_indicator() {
        use crate::al_status_code::AlStatusCode;

        let mut link = LoopbackLink::new();
        link.add_slave();
        link.slave(0).poke(RegisterAddress::ConfiguredStationAddress.into(), &0x1000u16.to_le_bytes());
        link.slave(0).poke(RegisterAddress::AlStatus.into(), &0x0010u16.to_le_bytes());
        link.slave(0).poke(
            RegisterAddress::AlStatusCode.into(),
            &AlStatusCode::InvalidMailboxConfiguration2.code().to_le_bytes(),
        );
        let mut bus = Bus::new(link);

        let err = bus.wait_for_state(0x1000, State::PreOp).unwrap_err();
        assert!(matches!(err, Error::SubDevice(AlStatusCode::InvalidMailboxConfiguration2)));
    }

    #[test]
    fn mailbox_geometry_reads_back_sm_records() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        link.slave(0).poke(RegisterAddress::ConfiguredStationAddress.into(), &0x1000u16.to_le_bytes());
        link.slave(0).poke(RegisterAddress::Sm0.into(), &sm_record(0x1000, 128, 0x06));
        link.slave(0).poke(RegisterAddress::Sm1.into(), &sm_record(0x1080, 128, 0x02));
        let mut bus = Bus::new(link);

        let geometry = bus.mailbox_geometry(0x1000).unwrap();
        assert_eq!(geometry.out_address, 0x1000);
        assert_eq!(geometry.out_length, 128);
        assert_eq!(geometry.in_address, 0x1080);
        assert_eq!(geometry.in_length, 128);
    }

    #[test]
    fn read_sdo_round_trips_an_expedited_upload() {
        use crate::coe::{CoeHeader, CoeService, InitSdoFlags, InitSdoHeader, MailboxHeader, MailboxType, Priority};

        let mut link = LoopbackLink::new();
        link.add_slave();
        link.slave(0).poke(RegisterAddress::ConfiguredStationAddress.into(), &0x1000u16.to_le_bytes());
        link.slave(0).poke(RegisterAddress::Sm0.into(), &sm_record(0x1000, 128, 0x06));
        link.slave(0).poke(RegisterAddress::Sm1.into(), &sm_record(0x1080, 128, 0x02));

        let header = MailboxHeader { length: 10, address: 0, priority: Priority::Lowest, mailbox_type: MailboxType::Coe, counter: 1 };
        let coe = CoeHeader { number: 0, service: CoeService::SdoResponse };
        let sdo = InitSdoHeader {
            flags: InitSdoFlags { size_indicator: true, expedited_transfer: true, size: 2, complete_access: false, command: InitSdoFlags::RESPONSE_UPLOAD },
            index: 0x1018,
            sub_index: 1,
        };
        let mut reply = vec![0u8; MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN + 4];
        header.pack_to_slice(&mut reply[0..MailboxHeader::LEN]);
        coe.pack_to_slice(&mut reply[MailboxHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN]);
        sdo.pack_to_slice(&mut reply[MailboxHeader::LEN + CoeHeader::LEN..MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN]);
        let payload_start = MailboxHeader::LEN + CoeHeader::LEN + InitSdoHeader::LEN;
        reply[payload_start..payload_start + 2].copy_from_slice(&0x00CAu16.to_le_bytes());
        link.slave(0).poke(0x1080, &reply);

        let mut bus = Bus::new(link);
        let value = bus.read_sdo(0x1000, 0x1018, 1, false).unwrap();
        assert_eq!(value, vec![0xCA, 0x00]);
    }

    #[test]
    fn process_data_read_copies_into_image() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        let mut bus = Bus::new(link);

        let layout = pdo::assign_logical_addresses(&[]);
        let mut image = [0u8; 4];
        // No FMMU mapping in LoopbackLink, so input_bytes is 0 with no
        // slaves configured; this exercises the zero-length path.
        let wkc = bus.process_data_read(&layout, &mut image).unwrap();
        assert_eq!(wkc, 0);
    }

    #[test]
    fn configure_process_data_writes_fmmu_records() {
        let mut link = LoopbackLink::new();
        link.add_slave();
        link.slave(0).poke(RegisterAddress::ConfiguredStationAddress.into(), &0x1000u16.to_le_bytes());
        let mut bus = Bus::new(link);

        let mut dict = Dictionary::new();
        let mut object = Object::new(0x6000, ObjectCode::Record, "Inputs");
        object.entries.push(Entry::new(1, 16, Access::READ_OP | Access::TXPDO_MAPPABLE, DataType::Unsigned16, "value", EntryData::U16(0)));
        dict.insert(object);

        let slaves = [SlavePdoConfig { configured_address: 0x1000, input_sm: Some(3), output_sm: None, dictionary: &dict }];
        let layout = bus.configure_process_data(&slaves).unwrap();
        assert_eq!(layout.input_bytes, 2);

        let mut record = [0u8; 16];
        bus_slave_read(&mut bus, 0x1000, RegisterAddress::Fmmu0.into(), &mut record);
        assert_eq!(record[12] & 0b01, 1, "FMMU read-enable bit set for an input mapping");
    }

    fn bus_slave_read(bus: &mut Bus<LoopbackLink>, configured_address: u16, address: u16, out: &mut [u8]) {
        let (data, _) = bus.fprd_raw(configured_address, address, out.len()).unwrap();
        out.copy_from_slice(&data);
    }
}
