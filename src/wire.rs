//! Small hand-written helpers for packing and unpacking the fixed-layout
//! little-endian structures used on the wire (datagram headers, mailbox
//! headers, CoE service data, register values).
//!
//! EtherCAT is little-endian on the wire regardless of host byte order, so
//! every helper here is explicit about it rather than relying on `repr(C)`
//! layout matching.

/// Anything that can be read out of a little-endian byte slice.
pub trait PduRead: Sized {
    /// Encoded length in bytes.
    const LEN: usize;

    /// Decode `Self` from the front of `buf`.
    ///
    /// Returns `None` if `buf` is shorter than [`PduRead::LEN`].
    fn unpack_from_slice(buf: &[u8]) -> Option<Self>;
}

/// Anything that can be written into a little-endian byte slice.
pub trait PduWrite: Sized {
    /// Encode `self` into the front of `buf`.
    ///
    /// Panics if `buf` is shorter than the encoded length. Callers are
    /// expected to size buffers ahead of time; this mirrors how frame
    /// construction is driven by fixed, known lengths throughout this crate.
    fn pack_to_slice(&self, buf: &mut [u8]);
}

macro_rules! impl_pdu_int {
    ($ty:ty) => {
        impl PduRead for $ty {
            const LEN: usize = core::mem::size_of::<$ty>();

            fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
                let bytes = buf.get(0..Self::LEN)?;
                let mut arr = [0u8; core::mem::size_of::<$ty>()];
                arr.copy_from_slice(bytes);
                Some(<$ty>::from_le_bytes(arr))
            }
        }

        impl PduWrite for $ty {
            fn pack_to_slice(&self, buf: &mut [u8]) {
                buf[0..Self::LEN].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_pdu_int!(u8);
impl_pdu_int!(u16);
impl_pdu_int!(u32);
impl_pdu_int!(u64);
impl_pdu_int!(i8);
impl_pdu_int!(i16);
impl_pdu_int!(i32);
impl_pdu_int!(i64);

impl PduRead for bool {
    const LEN: usize = 1;

    fn unpack_from_slice(buf: &[u8]) -> Option<Self> {
        Some(*buf.first()? != 0)
    }
}

impl PduWrite for bool {
    fn pack_to_slice(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }
}

/// Read a bitfield of `width` bits starting at bit offset `offset` in `value`.
pub const fn get_bits(value: u32, offset: u32, width: u32) -> u32 {
    let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    (value >> offset) & mask
}

/// Write a bitfield of `width` bits at bit offset `offset` into `value`.
pub const fn set_bits(value: u32, offset: u32, width: u32, field: u32) -> u32 {
    let mask = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    (value & !(mask << offset)) | ((field & mask) << offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_u16() {
        let mut buf = [0u8; 2];
        0x1234u16.pack_to_slice(&mut buf);
        assert_eq!(buf, [0x34, 0x12]);
        assert_eq!(u16::unpack_from_slice(&buf), Some(0x1234));
    }

    #[test]
    fn short_buffer_rejected() {
        assert_eq!(u32::unpack_from_slice(&[0, 0]), None);
    }

    #[test]
    fn bitfield_roundtrip() {
        let packed = set_bits(0, 0, 11, 0x123);
        let packed = set_bits(packed, 12, 1, 1);
        assert_eq!(get_bits(packed, 0, 11), 0x123);
        assert_eq!(get_bits(packed, 12, 1), 1);
    }
}
