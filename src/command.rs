//! Raw EtherCAT commands (`LRW`, `BRD`, `APWR`, and so on).
//!
//! All 15 commands defined by the protocol are represented here, including
//! the combined read/write variants (`APRW`/`FPRW`/`BRW`) and `ARMW`, which
//! the wider Rust ecosystem's EtherCAT libraries tend to omit because
//! master stacks rarely issue them.

use core::fmt;

const NOP: u8 = 0x00;
const APRD: u8 = 0x01;
const APWR: u8 = 0x02;
const APRW: u8 = 0x03;
const FPRD: u8 = 0x04;
const FPWR: u8 = 0x05;
const FPRW: u8 = 0x06;
const BRD: u8 = 0x07;
const BWR: u8 = 0x08;
const BRW: u8 = 0x09;
const LRD: u8 = 0x0A;
const LWR: u8 = 0x0B;
const LRW: u8 = 0x0C;
const ARMW: u8 = 0x0D;
const FRMW: u8 = 0x0E;

/// Addressing mode carried by a command: either a 16 bit address plus a
/// register, or a single 32 bit logical address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Address {
    /// Slave (auto-increment or configured station) address plus a register
    /// offset. Used by AP*/FP*/BRD/BWR/BRW/ARMW/FRMW.
    Device { address: u16, register: u16 },
    /// Logical address used by LRD/LWR/LRW.
    Logical(u32),
}

/// A single EtherCAT command, addressing one of the 15 command codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Command {
    /// No operation.
    #[default]
    Nop,
    /// Auto Increment Physical Read.
    Aprd { address: u16, register: u16 },
    /// Auto Increment Physical Write.
    Apwr { address: u16, register: u16 },
    /// Auto Increment Physical Read/Write.
    Aprw { address: u16, register: u16 },
    /// Configured address Physical Read.
    Fprd { address: u16, register: u16 },
    /// Configured address Physical Write.
    Fpwr { address: u16, register: u16 },
    /// Configured address Physical Read/Write.
    Fprw { address: u16, register: u16 },
    /// Broadcast Read.
    Brd { address: u16, register: u16 },
    /// Broadcast Write.
    Bwr { address: u16, register: u16 },
    /// Broadcast Read/Write (diagnostic use only; working counter is meaningless).
    Brw { address: u16, register: u16 },
    /// Logical Read.
    Lrd { address: u32 },
    /// Logical Write.
    Lwr { address: u32 },
    /// Logical Read/Write.
    Lrw { address: u32 },
    /// Auto Increment Physical Read Multiple Write (distributed clock drift
    /// compensation).
    Armw { address: u16, register: u16 },
    /// Configured address Physical Read Multiple Write (distributed clock
    /// latch/read-back).
    Frmw { address: u16, register: u16 },
}

impl Command {
    pub fn aprd(address: u16, register: u16) -> Self {
        Self::Aprd { address, register }
    }
    pub fn apwr(address: u16, register: u16) -> Self {
        Self::Apwr { address, register }
    }
    pub fn aprw(address: u16, register: u16) -> Self {
        Self::Aprw { address, register }
    }
    pub fn fprd(address: u16, register: u16) -> Self {
        Self::Fprd { address, register }
    }
    pub fn fpwr(address: u16, register: u16) -> Self {
        Self::Fpwr { address, register }
    }
    pub fn fprw(address: u16, register: u16) -> Self {
        Self::Fprw { address, register }
    }
    pub fn brd(register: u16) -> Self {
        Self::Brd { address: 0, register }
    }
    pub fn bwr(register: u16) -> Self {
        Self::Bwr { address: 0, register }
    }
    pub fn brw(register: u16) -> Self {
        Self::Brw { address: 0, register }
    }
    pub fn lrd(address: u32) -> Self {
        Self::Lrd { address }
    }
    pub fn lwr(address: u32) -> Self {
        Self::Lwr { address }
    }
    pub fn lrw(address: u32) -> Self {
        Self::Lrw { address }
    }
    pub fn armw(address: u16, register: u16) -> Self {
        Self::Armw { address, register }
    }
    pub fn frmw(address: u16, register: u16) -> Self {
        Self::Frmw { address, register }
    }

    /// Raw command byte, as it appears on the wire.
    pub fn code(&self) -> u8 {
        match self {
            Self::Nop => NOP,
            Self::Aprd { .. } => APRD,
            Self::Apwr { .. } => APWR,
            Self::Aprw { .. } => APRW,
            Self::Fprd { .. } => FPRD,
            Self::Fpwr { .. } => FPWR,
            Self::Fprw { .. } => FPRW,
            Self::Brd { .. } => BRD,
            Self::Bwr { .. } => BWR,
            Self::Brw { .. } => BRW,
            Self::Lrd { .. } => LRD,
            Self::Lwr { .. } => LWR,
            Self::Lrw { .. } => LRW,
            Self::Armw { .. } => ARMW,
            Self::Frmw { .. } => FRMW,
        }
    }

    /// Whether the slave side is expected to write a reply payload back
    /// (i.e. this is a read-class command as far as the responder ESC is
    /// concerned).
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::Aprd { .. }
                | Self::Aprw { .. }
                | Self::Fprd { .. }
                | Self::Fprw { .. }
                | Self::Brd { .. }
                | Self::Brw { .. }
                | Self::Lrd { .. }
                | Self::Lrw { .. }
                | Self::Armw { .. }
                | Self::Frmw { .. }
        )
    }

    /// Whether the master side payload bytes are meaningful input (i.e.
    /// this is a write-class command).
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Apwr { .. }
                | Self::Aprw { .. }
                | Self::Fpwr { .. }
                | Self::Fprw { .. }
                | Self::Bwr { .. }
                | Self::Brw { .. }
                | Self::Lwr { .. }
                | Self::Lrw { .. }
        )
    }

    /// Decode the address carried by this command, if any (`Nop` has none).
    pub fn address(&self) -> Option<Address> {
        match *self {
            Self::Nop => None,
            Self::Aprd { address, register }
            | Self::Apwr { address, register }
            | Self::Aprw { address, register }
            | Self::Fprd { address, register }
            | Self::Fpwr { address, register }
            | Self::Fprw { address, register }
            | Self::Brd { address, register }
            | Self::Bwr { address, register }
            | Self::Brw { address, register }
            | Self::Armw { address, register }
            | Self::Frmw { address, register } => Some(Address::Device { address, register }),
            Self::Lrd { address } | Self::Lwr { address } | Self::Lrw { address } => {
                Some(Address::Logical(address))
            }
        }
    }

    /// Decode a command from its raw byte, slave address and register, for
    /// use on the responder side when parsing an incoming datagram.
    pub fn from_code(code: u8, address: u16, register: u16) -> Option<Self> {
        Some(match code {
            NOP => Self::Nop,
            APRD => Self::Aprd { address, register },
            APWR => Self::Apwr { address, register },
            APRW => Self::Aprw { address, register },
            FPRD => Self::Fprd { address, register },
            FPWR => Self::Fpwr { address, register },
            FPRW => Self::Fprw { address, register },
            BRD => Self::Brd { address, register },
            BWR => Self::Bwr { address, register },
            BRW => Self::Brw { address, register },
            LRD => Self::Lrd { address: u32::from(address) << 16 | u32::from(register) },
            LWR => Self::Lwr { address: u32::from(address) << 16 | u32::from(register) },
            LRW => Self::Lrw { address: u32::from(address) << 16 | u32::from(register) },
            ARMW => Self::Armw { address, register },
            FRMW => Self::Frmw { address, register },
            _ => return None,
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "NOP"),
            Self::Aprd { address, register } => write!(f, "APRD(addr {address:#06x}, reg {register:#06x})"),
            Self::Apwr { address, register } => write!(f, "APWR(addr {address:#06x}, reg {register:#06x})"),
            Self::Aprw { address, register } => write!(f, "APRW(addr {address:#06x}, reg {register:#06x})"),
            Self::Fprd { address, register } => write!(f, "FPRD(addr {address:#06x}, reg {register:#06x})"),
            Self::Fpwr { address, register } => write!(f, "FPWR(addr {address:#06x}, reg {register:#06x})"),
            Self::Fprw { address, register } => write!(f, "FPRW(addr {address:#06x}, reg {register:#06x})"),
            Self::Brd { register, .. } => write!(f, "BRD(reg {register:#06x})"),
            Self::Bwr { register, .. } => write!(f, "BWR(reg {register:#06x})"),
            Self::Brw { register, .. } => write!(f, "BRW(reg {register:#06x})"),
            Self::Lrd { address } => write!(f, "LRD(addr {address:#010x})"),
            Self::Lwr { address } => write!(f, "LWR(addr {address:#010x})"),
            Self::Lrw { address } => write!(f, "LRW(addr {address:#010x})"),
            Self::Armw { address, register } => write!(f, "ARMW(addr {address:#06x}, reg {register:#06x})"),
            Self::Frmw { address, register } => write!(f, "FRMW(addr {address:#06x}, reg {register:#06x})"),
        }
    }
}
