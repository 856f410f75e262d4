//! PDO (Process Data Object) discovery and logical addressing (spec §2,
//! §4.3's `process_data_read`/`process_data_write` table row), supplemented.
//!
//! The distilled specification names PDO discovery as one of the core
//! bullet points but leaves its mapping mechanics undetailed; the
//! distributed-clock-free parts of `lib/master/src/Bus.cc`'s
//! `createMapping`/`configureMailbox` neighbourhood don't survive the
//! retrieval pack's filtering, so this module's shape is grounded in
//! ETG1000.4 Table 57 (the FMMU configuration record) directly plus the
//! slave-side [`crate::od`] access flags (`RXPDO_MAPPABLE`/
//! `TXPDO_MAPPABLE`) that drive which entries a slave offers for mapping.
//!
//! A `PdoLayout` assigns every discovered slave a contiguous slice of the
//! bus's logical address space (inputs first, then outputs), one slice per
//! direction, sized from the sum of its dictionary's mappable entries. Each
//! slice becomes one FMMU record the master writes during `PRE_OP` ->
//! `SAFE_OP` configuration, and one `LRD`/`LWR` range `bus::Bus` later
//! drives every process-data cycle.

use crate::od::{Access, Dictionary};

/// Direction of one mapped process-data slice, from the master's
/// perspective: `Input` is data the slave produces (`TXPDO_MAPPABLE`
/// entries, read with `LRD`); `Output` is data the master produces
/// (`RXPDO_MAPPABLE` entries, written with `LWR`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PdoDirection {
    Input,
    Output,
}

/// Sum of every dictionary entry's byte length that is mappable in the
/// given direction, rounded up to a whole byte per entry (sub-byte bit
/// packing across entries is out of scope; each entry occupies its own
/// byte-aligned slot, matching the common "byte-aligned PDO" convention
/// most device profiles use in practice).
pub fn mappable_byte_len(dictionary: &Dictionary, direction: PdoDirection) -> u16 {
    let flag = match direction {
        PdoDirection::Input => Access::TXPDO_MAPPABLE,
        PdoDirection::Output => Access::RXPDO_MAPPABLE,
    };

    dictionary
        .iter()
        .flat_map(|object| object.entries.iter())
        .filter(|entry| entry.access.contains(flag))
        .map(|entry| entry.bit_len.div_ceil(8))
        .sum()
}

/// One slave's mapped process-data slice: where it sits in the bus's
/// logical address space, and which sync manager on the slave backs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoMapping {
    pub configured_address: u16,
    pub direction: PdoDirection,
    pub sync_manager: u8,
    pub logical_address: u32,
    pub byte_len: u16,
}

/// The whole bus's process-data image: every slave's input and output
/// slice, plus the total byte length of each half (what `process_data_read`
/// / `process_data_write` exchange every cycle).
#[derive(Debug, Clone, Default)]
pub struct PdoLayout {
    pub inputs: Vec<PdoMapping>,
    pub outputs: Vec<PdoMapping>,
    pub input_bytes: u32,
    pub output_bytes: u32,
}

/// One slave's process-data participation: its configured station address,
/// the sync manager indices its input/output images live behind (assigned
/// during mailbox/PDO sync manager configuration), and its dictionary.
pub struct SlavePdoConfig<'a> {
    pub configured_address: u16,
    pub input_sm: Option<u8>,
    pub output_sm: Option<u8>,
    pub dictionary: &'a Dictionary,
}

/// Assigns every slave a contiguous logical address slice, inputs first
/// (starting at logical address 0) then outputs (starting immediately
/// after the last input byte), in slave-list order. This mirrors
/// `ethercrab`'s "groups get consecutive PDIs" approach (`maindevice.rs`,
/// `PdiOffset`) simplified to a single bus-wide image rather than
/// per-group images, since this crate doesn't model SubDeviceGroups.
pub fn assign_logical_addresses(slaves: &[SlavePdoConfig<'_>]) -> PdoLayout {
    let mut layout = PdoLayout::default();
    let mut input_cursor: u32 = 0;
    let mut output_cursor: u32 = 0;

    for slave in slaves {
        if let Some(sm) = slave.input_sm {
            let len = mappable_byte_len(slave.dictionary, PdoDirection::Input);
            if len > 0 {
                layout.inputs.push(PdoMapping {
                    configured_address: slave.configured_address,
                    direction: PdoDirection::Input,
                    sync_manager: sm,
                    logical_address: input_cursor,
                    byte_len: len,
                });
                input_cursor += u32::from(len);
            }
        }

        if let Some(sm) = slave.output_sm {
            let len = mappable_byte_len(slave.dictionary, PdoDirection::Output);
            if len > 0 {
                layout.outputs.push(PdoMapping {
                    configured_address: slave.configured_address,
                    direction: PdoDirection::Output,
                    sync_manager: sm,
                    logical_address: output_cursor,
                    byte_len: len,
                });
                output_cursor += u32::from(len);
            }
        }
    }

    layout.input_bytes = input_cursor;
    layout.output_bytes = output_cursor;
    layout
}

/// One FMMU configuration record (ETG1000.4 Table 57), 16 bytes on the
/// wire. Maps a slice of the bus's logical address space onto a slave's
/// physical sync-manager RAM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmmuConfig {
    pub logical_address: u32,
    pub length: u16,
    pub physical_address: u16,
    /// `true` for an `Input` mapping (slave writes, master reads).
    pub read_enable: bool,
    /// `true` for an `Output` mapping (master writes, slave reads).
    pub write_enable: bool,
}

impl FmmuConfig {
    pub fn for_mapping(mapping: &PdoMapping, physical_address: u16) -> Self {
        Self {
            logical_address: mapping.logical_address,
            length: mapping.byte_len,
            physical_address,
            read_enable: matches!(mapping.direction, PdoDirection::Input),
            write_enable: matches!(mapping.direction, PdoDirection::Output),
        }
    }

    /// Pack into the 16 byte FMMU record layout: logical start address
    /// (u32), length (u16), logical start bit (u8, always 0 here -- no
    /// sub-byte bit mapping), logical stop bit (u8, `length*8 - 1`),
    /// physical start address (u16), physical start bit (u8, 0), type
    /// byte (bit0 read, bit1 write), activate byte (bit0 enable).
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..4].copy_from_slice(&self.logical_address.to_le_bytes());
        buf[4..6].copy_from_slice(&self.length.to_le_bytes());
        buf[6] = 0;
        buf[7] = (self.length.saturating_mul(8)).saturating_sub(1) as u8;
        buf[8..10].copy_from_slice(&self.physical_address.to_le_bytes());
        buf[10] = 0;
        buf[12] = (self.read_enable as u8) | ((self.write_enable as u8) << 1);
        buf[15] = 1;
        buf
    }
}
