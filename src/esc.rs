//! Slave-side ESC (EtherCAT Slave Controller) register contract.
//!
//! Application code on the slave side never touches silicon registers
//! directly: it drives an [`EscDevice`], so the same `esm`/`slave` logic
//! runs unchanged against real hardware or [`MemoryEsc`], the in-memory
//! test double below.
//!
//! Grounded in `lib/slave/include/kickcat/AbstractESC.h`.

use crate::error::Error;
use crate::register::RegisterAddress;
use crate::wire::{PduRead, PduWrite};
use std::collections::HashMap;

/// Direction/role of a sync manager, `AbstractESC.h`'s `SyncManagerType`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncManagerType {
    MailboxOut,
    MailboxIn,
    Input,
    Output,
}

/// One sync manager channel's configuration, as written by the slave
/// application to its ESC during PRE_OP/SAFE_OP entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SyncManagerConfig {
    pub index: u8,
    pub start_address: u16,
    pub length: u16,
    pub control: u8,
    pub kind: SyncManagerType,
}

impl SyncManagerConfig {
    /// Process-data input sync manager (slave to master, buffered, 3-buffer).
    pub const fn pi_in(index: u8, start_address: u16, length: u16) -> Self {
        Self { index, start_address, length, control: 0x20, kind: SyncManagerType::Input }
    }

    /// Process-data output sync manager (master to slave, buffered).
    pub const fn pi_out(index: u8, start_address: u16, length: u16) -> Self {
        Self { index, start_address, length, control: 0x64, kind: SyncManagerType::Output }
    }

    /// Mailbox-in sync manager (slave to master, mailbox mode).
    pub const fn mbx_in(index: u8, start_address: u16, length: u16) -> Self {
        Self { index, start_address, length, control: 0x02, kind: SyncManagerType::MailboxIn }
    }

    /// Mailbox-out sync manager (master to slave, mailbox mode).
    pub const fn mbx_out(index: u8, start_address: u16, length: u16) -> Self {
        Self { index, start_address, length, control: 0x06, kind: SyncManagerType::MailboxOut }
    }

    fn register(self) -> RegisterAddress {
        RegisterAddress::sync_manager(self.index)
    }
}

/// Bit 0 of the sync manager `activate` byte: SM RAM window is enabled.
pub const SM_ACTIVATE_ENABLE: u8 = 1 << 0;

/// Offset of `pdi_control` from the start of an 8-byte sync manager record
/// (`control`, `status`, `activate`, `pdi_control`, each one byte, preceded
/// by `start_address: u16` and `length: u16`).
const SM_PDI_CONTROL_OFFSET: u16 = 7;
const SM_CONTROL_OFFSET: u16 = 4;
const SM_STATUS_OFFSET: u16 = 5;
const SM_ACTIVATE_OFFSET: u16 = 6;

/// A flat 16 bit register+RAM address space, read/written a few bytes at a
/// time. All higher layers (ESM, mailbox responder, PDO) are agnostic of
/// whatever transport backs this -- real silicon, an SPI bridge, or
/// [`MemoryEsc`] in tests.
pub trait EscDevice {
    fn init(&mut self) -> Result<(), Error>;
    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<usize, Error>;
    fn write(&mut self, address: u16, data: &[u8]) -> Result<usize, Error>;

    fn read_register<T: PduRead>(&mut self, register: RegisterAddress) -> Result<T, Error> {
        let mut buf = std::vec![0u8; T::LEN];
        self.read(register.into(), &mut buf)?;
        T::unpack_from_slice(&buf).ok_or(Error::Pdu(crate::error::PduError::Decode))
    }

    fn write_register<T: PduRead + PduWrite>(&mut self, register: RegisterAddress, value: &T) -> Result<(), Error> {
        let mut buf = std::vec![0u8; T::LEN];
        value.pack_to_slice(&mut buf);
        self.write(register.into(), &buf)?;
        Ok(())
    }

    /// Locate the first sync manager whose `control` byte matches
    /// `control_mode`, returning its index and raw 8-byte record.
    fn find_sm(&mut self, control_mode: u8) -> Result<Option<(u8, [u8; 8])>, Error> {
        for index in 0..16u8 {
            let mut raw = [0u8; 8];
            self.read(RegisterAddress::sync_manager(index).into(), &mut raw)?;
            if raw[SM_CONTROL_OFFSET as usize] == control_mode {
                return Ok(Some((index, raw)));
            }
        }
        Ok(None)
    }

    /// Write a sync manager's configuration and enable it (`activate`
    /// bit 0 set).
    fn sm_activate(&mut self, sm: &SyncManagerConfig) -> Result<(), Error> {
        let mut record = [0u8; 8];
        sm.start_address.pack_to_slice(&mut record[0..2]);
        sm.length.pack_to_slice(&mut record[2..4]);
        record[SM_CONTROL_OFFSET as usize] = sm.control;
        record[SM_ACTIVATE_OFFSET as usize] = SM_ACTIVATE_ENABLE;
        self.write(sm.register().into(), &record)?;
        Ok(())
    }

    /// Disable a sync manager without clearing its configured window.
    fn sm_deactivate(&mut self, sm: &SyncManagerConfig) -> Result<(), Error> {
        self.write(u16::from(sm.register()) + SM_ACTIVATE_OFFSET, &[0u8])?;
        Ok(())
    }

    /// `SM-valid` predicate (spec §4.4): the configured window and enable
    /// bit still match what was programmed.
    fn is_valid_sm(&mut self, sm: &SyncManagerConfig) -> Result<bool, Error> {
        let mut record = [0u8; 8];
        self.read(sm.register().into(), &mut record)?;
        let start_address = u16::unpack_from_slice(&record[0..2]).unwrap_or_default();
        let length = u16::unpack_from_slice(&record[2..4]).unwrap_or_default();
        let control = record[SM_CONTROL_OFFSET as usize];
        let activate = record[SM_ACTIVATE_OFFSET as usize];
        Ok(start_address == sm.start_address
            && length == sm.length
            && control == sm.control
            && activate & SM_ACTIVATE_ENABLE != 0)
    }

    /// Bulk enable/disable, used when a whole mailbox or PDO group needs to
    /// move together (ESM state entry/exit).
    fn set_sm_activate(&mut self, sync_managers: &[SyncManagerConfig], is_activated: bool) -> Result<(), Error> {
        for sm in sync_managers {
            if is_activated {
                self.sm_activate(sm)?;
            } else {
                self.sm_deactivate(sm)?;
            }
        }
        Ok(())
    }

    /// Poll a sync manager's `pdi_control` bit 0 until it reports the
    /// requested level, bounded by `attempts` 1ms-equivalent iterations
    /// (the caller's `Clock`/scheduler drives actual pacing; this trait has
    /// no notion of real time, matching the §9 decision to bound what would
    /// otherwise be an unbounded poll loop).
    fn wait_pdi_control(&mut self, sm_index: u8, want_disabled: bool, attempts: u32) -> Result<(), Error> {
        let address = u16::from(RegisterAddress::sync_manager(sm_index)) + SM_PDI_CONTROL_OFFSET;
        for _ in 0..attempts.max(1) {
            let mut byte = [0u8];
            self.read(address, &mut byte)?;
            if (byte[0] & 1 != 0) == want_disabled {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }
}

/// In-memory [`EscDevice`] backed by a sparse byte map, for unit tests and
/// the `LoopbackLink`-based end-to-end scenarios.
#[derive(Debug, Default)]
pub struct MemoryEsc {
    bytes: HashMap<u16, u8>,
}

impl MemoryEsc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a register or RAM address directly, bypassing `write`.
    pub fn poke(&mut self, address: u16, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.bytes.insert(address + i as u16, *byte);
        }
    }
}

impl EscDevice for MemoryEsc {
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn read(&mut self, address: u16, buf: &mut [u8]) -> Result<usize, Error> {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = *self.bytes.get(&(address + i as u16)).unwrap_or(&0);
        }
        Ok(buf.len())
    }

    fn write(&mut self, address: u16, data: &[u8]) -> Result<usize, Error> {
        self.poke(address, data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sm_activate_then_is_valid() {
        let mut esc = MemoryEsc::new();
        let sm = SyncManagerConfig::mbx_out(0, 0x1000, 128);
        esc.sm_activate(&sm).unwrap();
        assert!(esc.is_valid_sm(&sm).unwrap());
    }

    #[test]
    fn sm_deactivate_clears_enable_bit() {
        let mut esc = MemoryEsc::new();
        let sm = SyncManagerConfig::mbx_in(1, 0x1100, 128);
        esc.sm_activate(&sm).unwrap();
        esc.sm_deactivate(&sm).unwrap();
        assert!(!esc.is_valid_sm(&sm).unwrap());
    }

    #[test]
    fn find_sm_matches_control_byte() {
        let mut esc = MemoryEsc::new();
        let sm = SyncManagerConfig::pi_out(2, 0x1200, 64);
        esc.sm_activate(&sm).unwrap();
        let (index, record) = esc.find_sm(0x64).unwrap().expect("sm present");
        assert_eq!(index, 2);
        assert_eq!(record[SM_CONTROL_OFFSET as usize], 0x64);
    }

    #[test]
    fn wait_pdi_control_times_out_when_never_reached() {
        let mut esc = MemoryEsc::new();
        let err = esc.wait_pdi_control(0, true, 3).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn set_sm_activate_bulk() {
        let mut esc = MemoryEsc::new();
        let sms = [SyncManagerConfig::mbx_out(0, 0x1000, 128), SyncManagerConfig::mbx_in(1, 0x1100, 128)];
        esc.set_sm_activate(&sms, true).unwrap();
        assert!(esc.is_valid_sm(&sms[0]).unwrap());
        assert!(esc.is_valid_sm(&sms[1]).unwrap());
        esc.set_sm_activate(&sms, false).unwrap();
        assert!(!esc.is_valid_sm(&sms[0]).unwrap());
    }
}
