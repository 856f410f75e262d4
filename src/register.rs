//! Slave device register address abstraction.
//!
//! This enum makes it easier to work with raw EtherCAT addresses by giving
//! them nice names.
//!
//! Defined in ETG1000.4, Table 31.

use crate::wire::{get_bits, PduRead};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum RegisterAddress {
    /// Type, `u8`.
    Type = 0x0000u16,
    /// EtherCAT revision.
    Revision = 0x0001,
    /// Slave build.
    Build = 0x0002,
    /// Number of supported FMMU entities.
    FmmuCount = 0x0004,
    /// Number of supported sync manager channels.
    SyncManagerChannels = 0x0005,
    /// RAM size in kilo-octets (1024 octets)
    RamSize = 0x0006,
    /// EtherCAT port descriptors 0-3, `u8`.
    PortDescriptors = 0x0007,
    /// Different EtherCAT features supported by the slave, `u16`.
    SupportFlags = 0x0008,
    /// The slave's configured station address, `u16`.
    ConfiguredStationAddress = 0x0010,
    /// The slave's address alias, `u16`.
    ConfiguredStationAlias = 0x0012,

    /// Defined in ETG1000.4 Table 34 - DL status, `u16`.
    DlStatus = 0x0110,

    /// Application Layer (AL) control register. See ETG1000.4 Table 35.
    AlControl = 0x0120,
    /// Application Layer (AL) status register. See ETG1000.4 Table 35.
    AlStatus = 0x0130,
    /// Application Layer (AL) status code register.
    AlStatusCode = 0x0134,

    /// Watchdog divider, `u16`. See ETG1000.4 section 6.3 Watchdogs.
    WatchdogDivider = 0x0400,
    /// PDI watchdog timeout, `u16`.
    PdiWatchdog = 0x0410,
    /// Sync manager watchdog timeout, `u16`.
    SyncManagerWatchdog = 0x0420,
    /// Sync manager watchdog status (1 bit), `u16`.
    SyncManagerWatchdogStatus = 0x0440,
    /// Sync manager watchdog counter, `u8`.
    SyncManagerWatchdogCounter = 0x0442,
    /// PDI watchdog counter, `u8`.
    PdiWatchdogCounter = 0x0443,

    /// EEPROM (SII) config register, `u16`.
    SiiConfig = 0x0500,
    /// EEPROM (SII) control register, `u16`.
    SiiControl = 0x0502,
    /// EEPROM (SII) control address, `u16`.
    SiiAddress = 0x0504,
    /// Start of 4 bytes (read) or 2 bytes (write) of the EEPROM interface.
    SiiData = 0x0508,

    /// Fieldbus Memory Management Unit (FMMU) 0. Defined in ETG1000.4 Table 57.
    Fmmu0 = 0x0600,
    Fmmu1 = 0x0610,
    Fmmu2 = 0x0620,
    Fmmu3 = 0x0630,
    Fmmu4 = 0x0640,
    Fmmu5 = 0x0650,
    Fmmu6 = 0x0660,
    Fmmu7 = 0x0670,
    Fmmu8 = 0x0680,
    Fmmu9 = 0x0690,
    Fmmu10 = 0x06A0,
    Fmmu11 = 0x06B0,
    Fmmu12 = 0x06C0,
    Fmmu13 = 0x06D0,
    Fmmu14 = 0x06E0,
    Fmmu15 = 0x06F0,

    /// Sync Manager (SM) 0. Defined in ETG1000.4 Table 59.
    Sm0 = 0x0800,
    Sm1 = 0x0808,
    Sm2 = 0x0810,
    Sm3 = 0x0818,
    Sm4 = 0x0820,
    Sm5 = 0x0828,
    Sm6 = 0x0830,
    Sm7 = 0x0838,
    Sm8 = 0x0840,
    Sm9 = 0x0848,
    Sm10 = 0x0850,
    Sm11 = 0x0858,
    Sm12 = 0x0860,
    Sm13 = 0x0868,
    Sm14 = 0x0870,
    Sm15 = 0x0878,

    /// Distributed clock (DC) port 0 receive time in ns.
    ///
    /// Writing one byte here also triggers the ESC to latch the current
    /// receive time into all four port registers (used by the propagation
    /// delay measurement broadcast in `dc`).
    DcTimePort0 = 0x0900,
    DcTimePort1 = 0x0904,
    DcTimePort2 = 0x0908,
    DcTimePort3 = 0x090c,
    /// DC system time, as measured by the processing unit.
    DcSystemTime = 0x0910,
    /// DC system receive time (ECAT frame processing unit).
    DcReceiveTime = 0x0918,
    /// DC system time offset, `u64`.
    DcSystemTimeOffset = 0x0920,
    /// Transmission (propagation) delay, `u32`.
    DcSystemTimeTransmissionDelay = 0x0928,
    /// DC system time difference, `u32`.
    DcSystemTimeDifference = 0x092C,

    /// DC control loop parameter 1 ("speed counter start"), `u16`.
    DcControlLoopParam1 = 0x0930,
    DcControlLoopParam2 = 0x0932,
    DcControlLoopParam3 = 0x0934,

    /// ETG1000.6 Table 27 sync parameter, `u8`. AKA ETG1000.4 Table 61 DC user P1.
    DcSyncActive = 0x0981,
    /// AKA ETG1000.4 Table 61 DC user P4.
    DcSyncStartTime = 0x0990,
    /// AKA ETG1000.4 Table 61 DC user P5.
    DcSync0CycleTime = 0x09A0,
}

impl From<RegisterAddress> for u16 {
    fn from(reg: RegisterAddress) -> Self {
        reg as u16
    }
}

impl RegisterAddress {
    /// FMMU by index.
    pub fn fmmu(index: u8) -> Self {
        match index {
            0 => Self::Fmmu0,
            1 => Self::Fmmu1,
            2 => Self::Fmmu2,
            3 => Self::Fmmu3,
            4 => Self::Fmmu4,
            5 => Self::Fmmu5,
            6 => Self::Fmmu6,
            7 => Self::Fmmu7,
            8 => Self::Fmmu8,
            9 => Self::Fmmu9,
            10 => Self::Fmmu10,
            11 => Self::Fmmu11,
            12 => Self::Fmmu12,
            13 => Self::Fmmu13,
            14 => Self::Fmmu14,
            15 => Self::Fmmu15,
            index => unreachable!("bad FMMU index {index}"),
        }
    }

    /// Sync manager by index.
    pub fn sync_manager(index: u8) -> Self {
        match index {
            0 => Self::Sm0,
            1 => Self::Sm1,
            2 => Self::Sm2,
            3 => Self::Sm3,
            4 => Self::Sm4,
            5 => Self::Sm5,
            6 => Self::Sm6,
            7 => Self::Sm7,
            8 => Self::Sm8,
            9 => Self::Sm9,
            10 => Self::Sm10,
            11 => Self::Sm11,
            12 => Self::Sm12,
            13 => Self::Sm13,
            14 => Self::Sm14,
            15 => Self::Sm15,
            index => unreachable!("bad SM index {index}"),
        }
    }

    /// Sync manager status register by SM index: the 5th byte after the
    /// start of the SM (control, status, activate, pdi_control).
    pub fn sync_manager_status(index: u8) -> u16 {
        u16::from(Self::sync_manager(index)) + 5
    }
}

/// Physical port media type, read from the port descriptors register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortType {
    NotImplemented = 0x00,
    NotConfigured = 0x01,
    Ebus = 0x02,
    Mii = 0x03,
}

impl From<u8> for PortType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0x00 => Self::NotImplemented,
            0x01 => Self::NotConfigured,
            0x02 => Self::Ebus,
            _ => Self::Mii,
        }
    }
}

/// Feature support flags read from [`RegisterAddress::SupportFlags`].
///
/// Bit layout per ETG1000.4 Table 32.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupportFlags {
    pub fmmu_supports_bit_ops: bool,
    pub reserved_register_support: bool,
    pub dc_supported: bool,
    pub has_64bit_dc: bool,
    pub low_jitter: bool,
    pub ebus_enhanced_link_detection: bool,
    pub mii_enhanced_link_detection: bool,
    pub separate_fcs_error_handling: bool,
    pub enhanced_dc_sync: bool,
    pub lrw_supported: bool,
    pub brw_aprw_fprw_supported: bool,
    pub special_fmmu: bool,
}

impl PduRead for SupportFlags {
    const LEN: usize = 2;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        let raw = u16::unpack_from_slice(buf)? as u32;
        Some(Self {
            fmmu_supports_bit_ops: get_bits(raw, 0, 1) != 0,
            reserved_register_support: get_bits(raw, 1, 1) != 0,
            dc_supported: get_bits(raw, 2, 1) != 0,
            has_64bit_dc: get_bits(raw, 3, 1) != 0,
            low_jitter: get_bits(raw, 4, 1) != 0,
            ebus_enhanced_link_detection: get_bits(raw, 5, 1) != 0,
            mii_enhanced_link_detection: get_bits(raw, 6, 1) != 0,
            separate_fcs_error_handling: get_bits(raw, 7, 1) != 0,
            enhanced_dc_sync: get_bits(raw, 8, 1) != 0,
            lrw_supported: get_bits(raw, 9, 1) != 0,
            brw_aprw_fprw_supported: get_bits(raw, 10, 1) != 0,
            special_fmmu: get_bits(raw, 11, 1) != 0,
        })
    }
}

impl core::fmt::Display for SupportFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("DC: ")?;

        if self.dc_supported {
            f.write_str("yes")?;
            if self.has_64bit_dc {
                f.write_str(" (64 bit)")?;
            } else {
                f.write_str(" (32 bit)")?;
            }
        } else {
            f.write_str("no")?;
        }

        if self.enhanced_dc_sync {
            f.write_str(", enhanced sync")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_manager_status_offset() {
        assert_eq!(
            RegisterAddress::sync_manager_status(0),
            u16::from(RegisterAddress::Sm0) + 5
        );
    }

    #[test]
    fn support_flags_unpack() {
        // dc_supported + lrw_supported
        let raw: u16 = (1 << 2) | (1 << 9);
        let flags = SupportFlags::unpack_from_slice(&raw.to_le_bytes()).unwrap();
        assert!(flags.dc_supported);
        assert!(flags.lrw_supported);
        assert!(!flags.has_64bit_dc);
    }
}
