//! Slave-side CoE Object Dictionary.
//!
//! This is the in-memory backing store the responder-side CoE module reads
//! and writes when servicing SDO requests. Populated by the host
//! application; EEPROM persistence and ESI-driven generation are out of
//! scope here, just the runtime shape and lookup.
//!
//! Grounded in `lib/include/kickcat/CoE/OD.h`.

/// Object classification, ETG1000.5 chapter 5.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectCode {
    /// An object with no data fields.
    Nil = 0x00,
    Domain = 0x02,
    DefType = 0x05,
    DefStruct = 0x06,
    Var = 0x07,
    Array = 0x08,
    Record = 0x09,
}

/// CoE data type, ETG1000.5 chapter 5 / ETG1020 base data types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum DataType {
    /// Custom: a type this stack doesn't otherwise model.
    Unknown = 0x0000,
    Boolean = 0x0001,
    Byte = 0x001E,
    Word = 0x001F,
    Dword = 0x0020,
    Bit2 = 0x0031,
    Bit3 = 0x0032,
    Bit4 = 0x0033,
    Bit5 = 0x0034,
    Bit6 = 0x0035,
    Bit7 = 0x0036,
    Bit8 = 0x0037,
    Bit9 = 0x0038,
    Bit10 = 0x0039,
    Bit11 = 0x003A,
    Bit12 = 0x003B,
    Bit13 = 0x003C,
    Bit14 = 0x003D,
    Bit15 = 0x003E,
    Bit16 = 0x003F,
    BitArr8 = 0x002D,
    BitArr16 = 0x002E,
    BitArr32 = 0x002F,
    TimeOfDay = 0x000C,
    TimeDifference = 0x000D,
    Real32 = 0x0008,
    Real64 = 0x0011,
    Integer8 = 0x0002,
    Integer16 = 0x0003,
    Integer24 = 0x0010,
    Integer32 = 0x0004,
    Integer40 = 0x0012,
    Integer48 = 0x0013,
    Integer56 = 0x0014,
    Integer64 = 0x0015,
    Unsigned8 = 0x0005,
    Unsigned16 = 0x0006,
    Unsigned24 = 0x0016,
    Unsigned32 = 0x0007,
    Unsigned40 = 0x0018,
    Unsigned48 = 0x0019,
    Unsigned56 = 0x001A,
    Unsigned64 = 0x001B,
    Guid = 0x001D,
    VisibleString = 0x0009,
    OctetString = 0x000A,
    UnicodeString = 0x000B,
    ArrayOfInt = 0x0260,
    ArrayOfSint = 0x0261,
    ArrayOfDint = 0x0262,
    ArrayOfUdint = 0x0263,
    PdoMapping = 0x0021,
    SdoParameter = 0x0022,
    Identity = 0x0023,
    CommandPar = 0x0025,
    PdoParameter = 0x0027,
    Enum = 0x0028,
    SmSynchronisation = 0x0029,
    Record = 0x002A,
    BackupParameter = 0x002B,
    ModularDeviceProfile = 0x002C,
    ErrorSetting = 0x0281,
    DiagnosisHistory = 0x0282,
    ExternalSyncStatus = 0x0283,
    ExternalSyncSettings = 0x0284,
    DeftypeFsoeFrame = 0x0285,
    DeftypeFsoeCommPar = 0x0286,
}

impl DataType {
    /// Whether this is one of the base fixed-width scalar types, as opposed
    /// to a structured or variable-length type.
    pub const fn is_basic(self) -> bool {
        matches!(
            self,
            Self::Integer8
                | Self::Integer16
                | Self::Integer32
                | Self::Integer64
                | Self::Unsigned8
                | Self::Unsigned16
                | Self::Unsigned32
                | Self::Unsigned64
                | Self::Real32
                | Self::Real64
                | Self::Boolean
                | Self::Byte
        )
    }
}

bitflags::bitflags! {
    /// Per-entry access rights, ETG1000.5 6.1.4.2.1 / ETG1000.6 5.6.3.6.2.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u16 {
        const READ_PREOP = 1 << 0;
        const READ_SAFEOP = 1 << 1;
        const READ_OP = 1 << 2;
        const WRITE_PREOP = 1 << 3;
        const WRITE_SAFEOP = 1 << 4;
        const WRITE_OP = 1 << 5;
        const RXPDO_MAPPABLE = 1 << 6;
        const TXPDO_MAPPABLE = 1 << 7;
        const BACKUP = 1 << 8;
        const SETTING = 1 << 9;
    }
}

impl Access {
    pub const READ: Self = Self::READ_PREOP.union(Self::READ_SAFEOP).union(Self::READ_OP);
    pub const WRITE: Self = Self::WRITE_PREOP.union(Self::WRITE_SAFEOP).union(Self::WRITE_OP);
    pub const MAPPABLE: Self = Self::RXPDO_MAPPABLE.union(Self::TXPDO_MAPPABLE);

    /// Whether read access is granted in the given AL state, identified by
    /// the matching per-state bit (`READ_PREOP`/`READ_SAFEOP`/`READ_OP`).
    pub const fn readable_in(self, state_bit: Self) -> bool {
        self.intersects(state_bit)
    }

    /// Whether write access is granted in the given AL state, identified by
    /// the matching per-state bit (`WRITE_PREOP`/`WRITE_SAFEOP`/`WRITE_OP`).
    pub const fn writable_in(self, state_bit: Self) -> bool {
        self.intersects(state_bit)
    }
}

/// An entry's runtime value, owned exclusively by its [`Entry`].
///
/// Stands in for the original's `void*`: every variant owns its bytes, so
/// there is no aliasing between entries or shared mutable state.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryData {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Strings, records, and anything else represented as raw bytes.
    Bytes(Vec<u8>),
}

impl EntryData {
    /// Size of this value in bytes, as it would appear in an SDO payload.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Bool(_) | Self::I8(_) | Self::U8(_) => 1,
            Self::I16(_) | Self::U16(_) => 2,
            Self::I32(_) | Self::U32(_) | Self::F32(_) => 4,
            Self::I64(_) | Self::U64(_) | Self::F64(_) => 8,
            Self::Bytes(b) => b.len(),
        }
    }

    /// Serialize this value as little-endian bytes, as placed in an SDO
    /// upload response payload.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bool(v) => std::vec![u8::from(*v)],
            Self::I8(v) => std::vec![*v as u8],
            Self::U8(v) => std::vec![*v],
            Self::I16(v) => v.to_le_bytes().to_vec(),
            Self::U16(v) => v.to_le_bytes().to_vec(),
            Self::I32(v) => v.to_le_bytes().to_vec(),
            Self::U32(v) => v.to_le_bytes().to_vec(),
            Self::I64(v) => v.to_le_bytes().to_vec(),
            Self::U64(v) => v.to_le_bytes().to_vec(),
            Self::F32(v) => v.to_le_bytes().to_vec(),
            Self::F64(v) => v.to_le_bytes().to_vec(),
            Self::Bytes(b) => b.clone(),
        }
    }

    /// Overwrite this value in place from little-endian bytes, as received
    /// in an SDO download request payload. Fails if `bytes` doesn't match
    /// this entry's fixed width (variable-length `Bytes` always succeeds).
    pub fn write_le_bytes(&mut self, bytes: &[u8]) -> bool {
        match self {
            Self::Bool(v) => match bytes.first() {
                Some(b) => {
                    *v = *b != 0;
                    true
                }
                None => false,
            },
            Self::I8(v) => match bytes.first() {
                Some(b) => {
                    *v = *b as i8;
                    true
                }
                None => false,
            },
            Self::U8(v) => match bytes.first() {
                Some(b) => {
                    *v = *b;
                    true
                }
                None => false,
            },
            Self::I16(v) => try_assign(bytes, |a| *v = i16::from_le_bytes(a)),
            Self::U16(v) => try_assign(bytes, |a| *v = u16::from_le_bytes(a)),
            Self::I32(v) => try_assign(bytes, |a| *v = i32::from_le_bytes(a)),
            Self::U32(v) => try_assign(bytes, |a| *v = u32::from_le_bytes(a)),
            Self::I64(v) => try_assign(bytes, |a| *v = i64::from_le_bytes(a)),
            Self::U64(v) => try_assign(bytes, |a| *v = u64::from_le_bytes(a)),
            Self::F32(v) => try_assign(bytes, |a| *v = f32::from_le_bytes(a)),
            Self::F64(v) => try_assign(bytes, |a| *v = f64::from_le_bytes(a)),
            Self::Bytes(b) => {
                *b = bytes.to_vec();
                true
            }
        }
    }
}

fn try_assign<const N: usize>(bytes: &[u8], mut assign: impl FnMut([u8; N])) -> bool {
    let Ok(array) = <[u8; N]>::try_from(bytes) else {
        return false;
    };
    assign(array);
    true
}

/// A single sub-index of an [`Object`]. ETG1000.5 6.1.4.2.1.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub subindex: u8,
    /// Bit length; for a PDO-mappable entry this must stay below 11888 bits.
    pub bit_len: u16,
    pub access: Access,
    pub data_type: DataType,
    pub description: String,
    pub data: EntryData,
}

impl Entry {
    pub fn new(
        subindex: u8,
        bit_len: u16,
        access: Access,
        data_type: DataType,
        description: impl Into<String>,
        data: EntryData,
    ) -> Self {
        Self {
            subindex,
            bit_len,
            access,
            data_type,
            description: description.into(),
            data,
        }
    }
}

/// An object: a named, indexed group of entries. ETG1000.5 6.1.4.2.1.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub index: u16,
    pub code: ObjectCode,
    pub name: String,
    pub entries: Vec<Entry>,
}

impl Object {
    pub fn new(index: u16, code: ObjectCode, name: impl Into<String>) -> Self {
        Self {
            index,
            code,
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn entry(&self, subindex: u8) -> Option<&Entry> {
        self.entries.iter().find(|e| e.subindex == subindex)
    }

    pub fn entry_mut(&mut self, subindex: u8) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.subindex == subindex)
    }
}

/// An ordered collection of objects, index-keyed for lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    objects: Vec<Object>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: Object) {
        match self.objects.binary_search_by_key(&object.index, |o| o.index) {
            Ok(existing) => self.objects[existing] = object,
            Err(at) => self.objects.insert(at, object),
        }
    }

    pub fn find(&self, index: u16) -> Option<&Object> {
        self.objects.iter().find(|o| o.index == index)
    }

    pub fn find_mut(&mut self, index: u16) -> Option<&mut Object> {
        self.objects.iter_mut().find(|o| o.index == index)
    }

    /// Locate both the object and one of its entries in a single lookup,
    /// mirroring the original's `findObject`.
    pub fn find_entry(&self, index: u16, subindex: u8) -> Option<(&Object, &Entry)> {
        let object = self.find(index)?;
        let entry = object.entry(subindex)?;
        Some((object, entry))
    }

    pub fn find_entry_mut(&mut self, index: u16, subindex: u8) -> Option<(&Object, &mut Entry)> {
        let object = self.objects.iter_mut().find(|o| o.index == index)?;
        let entry = object.entries.iter_mut().find(|e| e.subindex == subindex)?;
        Some((&*object, entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Object> {
        self.objects.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_object() -> Object {
        let mut object = Object::new(0x6000, ObjectCode::Record, "Inputs");
        object.entries.push(Entry::new(
            0,
            8,
            Access::READ_OP,
            DataType::Unsigned8,
            "number of entries",
            EntryData::U8(1),
        ));
        object.entries.push(Entry::new(
            1,
            16,
            Access::READ_OP | Access::TXPDO_MAPPABLE,
            DataType::Unsigned16,
            "raw value",
            EntryData::U16(0),
        ));
        object
    }

    #[test]
    fn find_entry_by_index_and_subindex() {
        let mut dict = Dictionary::new();
        dict.insert(sample_object());

        let (object, entry) = dict.find_entry(0x6000, 1).unwrap();
        assert_eq!(object.name, "Inputs");
        assert_eq!(entry.data, EntryData::U16(0));
    }

    #[test]
    fn missing_object_or_entry_is_none() {
        let dict = Dictionary::new();
        assert!(dict.find_entry(0x6000, 0).is_none());

        let mut dict = Dictionary::new();
        dict.insert(sample_object());
        assert!(dict.find_entry(0x6000, 99).is_none());
    }

    #[test]
    fn write_le_bytes_respects_width() {
        let mut data = EntryData::U16(0);
        assert!(data.write_le_bytes(&[0x34, 0x12]));
        assert_eq!(data, EntryData::U16(0x1234));
        assert!(!data.write_le_bytes(&[0x01]));
    }

    #[test]
    fn access_state_gating() {
        let access = Access::READ_OP | Access::WRITE_PREOP;
        assert!(access.readable_in(Access::READ_OP));
        assert!(!access.readable_in(Access::READ_SAFEOP));
        assert!(access.writable_in(Access::WRITE_PREOP));
    }
}
