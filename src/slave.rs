//! Slave-side device runtime: ties [`crate::esm::StateMachine`], the CoE
//! mailbox responder ([`crate::mailbox::response`]) and an
//! [`crate::od::Dictionary`] together into the one object a host
//! application drives once per cooperative scheduling tick.
//!
//! KickCAT's own slave runtime doesn't have a single equivalent struct --
//! `ESM`, `Mailbox` and `OD` are composed ad hoc by whatever application
//! embeds them (`lib/slave/include/kickcat/Slave.h`-adjacent code never
//! survived the retrieval pack's filtering). This module's shape instead
//! follows `other_examples/285793d4_daidanretsu-ethercat__src-slave.rs.rs`'s
//! `Slave` struct -- a single owning type bundling AL state, sync manager
//! configuration and mailbox bookkeeping -- adapted to this crate's
//! `EscDevice`/`StateMachine`/`Dictionary` types.

use crate::esc::{EscDevice, SyncManagerConfig};
use crate::esm::StateMachine;
use crate::error::Error;
use crate::mailbox::response::{handle_request, DeviceState};
use crate::mailbox::{self, MailboxErrorCode};
use crate::od::Dictionary;
use crate::wire::PduRead;
use std::collections::VecDeque;

/// Bit 3 of a sync manager's status byte: a message is waiting to be read
/// (mailbox-out, master to slave) or the previous one hasn't been consumed
/// yet (mailbox-in, slave to master). Grounded on
/// `ethercrab`'s `sync_manager_channel::Status::mailbox_full` bit position
/// (ETG1000.4 6.7.2).
const MAILBOX_FULL_BIT: u8 = 1 << 3;

/// A slave device: one ESC, its ESM, its mailbox sync managers and object
/// dictionary, and the small queue of replies awaiting transmission on
/// mailbox-in.
///
/// `poll()` is the whole cooperative-scheduling contract: call it faster
/// than the configured watchdog divider allows (spec §5), same as
/// `StateMachine::play` alone.
pub struct Device<E> {
    esm: StateMachine<E>,
    mailbox_out: SyncManagerConfig,
    mailbox_in: SyncManagerConfig,
    dictionary: Dictionary,
    to_send: VecDeque<Vec<u8>>,
}

impl<E: EscDevice> Device<E> {
    /// `pdo_sms` are passed straight through to the state machine for
    /// SAFE_OP/OP validity gating; this type doesn't drive cyclic process
    /// data itself (that's `bus`/host-application territory on the master
    /// side -- see `pdo::PdoLayout`).
    pub fn new(
        esc: E,
        mailbox_out: SyncManagerConfig,
        mailbox_in: SyncManagerConfig,
        pdo_sms: Vec<SyncManagerConfig>,
        dictionary: Dictionary,
    ) -> Self {
        let mailbox_sms = std::vec![mailbox_out, mailbox_in];
        Self {
            esm: StateMachine::new(esc, mailbox_sms, pdo_sms),
            mailbox_out,
            mailbox_in,
            dictionary,
            to_send: VecDeque::new(),
        }
    }

    pub fn state(&self) -> crate::esm::State {
        self.esm.state()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    pub fn set_output_data_valid(&mut self, valid: bool) {
        self.esm.set_output_data_valid(valid);
    }

    /// One scheduling tick: run the ESM, then service the mailbox (receive
    /// one request, send one queued reply), per spec §4.5's receive/send
    /// paths. Mailbox I/O only runs once the mailbox sync managers are
    /// active, i.e. from `PRE_OP` onward.
    pub fn poll(&mut self) -> Result<(), Error> {
        self.esm.play()?;

        if matches!(self.esm.state(), crate::esm::State::Init) {
            return Ok(());
        }

        self.receive()?;
        self.send()?;
        Ok(())
    }

    fn sm_status(&mut self, sm: &SyncManagerConfig) -> Result<u8, Error> {
        let address = crate::register::RegisterAddress::sync_manager_status(sm.index);
        let mut byte = [0u8];
        self.esm.esc_mut().read(address, &mut byte)?;
        Ok(byte[0])
    }

    /// Receive path (spec §4.5): poll `mailbox_out`'s status bit; if set,
    /// read the message, reject malformed headers up front, otherwise hand
    /// it to the CoE responder and queue whatever reply it produces.
    fn receive(&mut self) -> Result<(), Error> {
        if self.sm_status(&self.mailbox_out)? & MAILBOX_FULL_BIT == 0 {
            return Ok(());
        }

        let mut raw = std::vec![0u8; self.mailbox_out.length as usize];
        self.esm.esc_mut().read(self.mailbox_out.start_address, &mut raw)?;

        let Some(header) = crate::coe::MailboxHeader::unpack_from_slice(&raw) else {
            log::warn!("mailbox: undecodable header, replying INVALID_HEADER");
            self.to_send.push_back(mailbox::build_error_reply(1, MailboxErrorCode::InvalidHeader));
            return Ok(());
        };
        if header.mailbox_type == crate::coe::MailboxType::Err || header.length == 0 {
            log::warn!("mailbox: rejecting {:?} length {} request", header.mailbox_type, header.length);
            self.to_send
                .push_back(mailbox::build_error_reply(header.counter, MailboxErrorCode::InvalidHeader));
            return Ok(());
        }

        let state: DeviceState = self.esm.state().into();
        match handle_request(&raw, &mut self.dictionary, state) {
            Some(reply) => self.to_send.push_back(reply),
            None => self
                .to_send
                .push_back(mailbox::build_error_reply(header.counter, MailboxErrorCode::UnsupportedProtocol)),
        }

        Ok(())
    }

    /// Send path: if `mailbox_in` isn't still holding an unconsumed reply,
    /// write the head of `to_send`.
    fn send(&mut self) -> Result<(), Error> {
        if self.sm_status(&self.mailbox_in)? & MAILBOX_FULL_BIT != 0 {
            return Ok(());
        }
        let Some(reply) = self.to_send.pop_front() else {
            return Ok(());
        };
        self.esm.esc_mut().write(self.mailbox_in.start_address, &reply)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esc::MemoryEsc;
    use crate::od::{Access, DataType, Entry, EntryData, Object, ObjectCode};
    use crate::register::RegisterAddress;
    use crate::wire::PduWrite;

    fn identity_dictionary() -> Dictionary {
        let mut dict = Dictionary::new();
        let mut object = Object::new(0x1018, ObjectCode::Record, "Identity");
        object.entries.push(Entry::new(
            1,
            32,
            Access::READ_PREOP | Access::READ_SAFEOP | Access::READ_OP,
            DataType::Unsigned32,
            "Vendor ID",
            EntryData::U32(0x6A5),
        ));
        dict.insert(object);
        dict
    }

    fn device() -> Device<MemoryEsc> {
        let mailbox_out = SyncManagerConfig::mbx_out(0, 0x1000, 128);
        let mailbox_in = SyncManagerConfig::mbx_in(1, 0x1100, 128);
        Device::new(MemoryEsc::new(), mailbox_out, mailbox_in, Vec::new(), identity_dictionary())
    }

    fn write_control(dev: &mut Device<MemoryEsc>, value: u16) {
        dev.esm.esc_mut().write_register(RegisterAddress::AlControl, &value).unwrap();
    }

    #[test]
    fn mailbox_inert_while_init() {
        let mut dev = device();
        dev.poll().unwrap();
        assert!(dev.to_send.is_empty());
    }

    #[test]
    fn services_sdo_upload_once_in_preop() {
        let mut dev = device();
        write_control(&mut dev, crate::esm::State::PreOp.nibble() as u16);
        dev.poll().unwrap();
        assert_eq!(dev.state(), crate::esm::State::PreOp);

        let header = crate::coe::MailboxHeader {
            length: (crate::coe::CoeHeader::LEN + crate::coe::InitSdoHeader::LEN) as u16,
            address: 0,
            priority: crate::coe::Priority::Lowest,
            mailbox_type: crate::coe::MailboxType::Coe,
            counter: 1,
        };
        let coe = crate::coe::CoeHeader { number: 0, service: crate::coe::CoeService::SdoRequest };
        let sdo = crate::coe::InitSdoHeader {
            flags: crate::coe::InitSdoFlags {
                size_indicator: false,
                expedited_transfer: false,
                size: 0,
                complete_access: false,
                command: crate::coe::InitSdoFlags::UPLOAD,
            },
            index: 0x1018,
            sub_index: 1,
        };
        let mut raw = std::vec![0u8; crate::coe::MailboxHeader::LEN + crate::coe::CoeHeader::LEN + crate::coe::InitSdoHeader::LEN];
        header.pack_to_slice(&mut raw[0..crate::coe::MailboxHeader::LEN]);
        coe.pack_to_slice(
            &mut raw[crate::coe::MailboxHeader::LEN..crate::coe::MailboxHeader::LEN + crate::coe::CoeHeader::LEN],
        );
        sdo.pack_to_slice(&mut raw[crate::coe::MailboxHeader::LEN + crate::coe::CoeHeader::LEN..]);

        dev.esm.esc_mut().write(dev.mailbox_out.start_address, &raw).unwrap();
        let status_address = RegisterAddress::sync_manager_status(dev.mailbox_out.index);
        dev.esm.esc_mut().write(status_address, &[MAILBOX_FULL_BIT]).unwrap();

        dev.poll().unwrap();
        assert_eq!(dev.to_send.len(), 1);
    }
}
