//! # Endian-aware structure codec
//!
//! Converts typed payloads to and from their wire bytes. A payload is laid out
//! field by field in declaration order (packed, no padding), each field in host
//! byte order; afterwards the byte range of every field whose declared
//! endianness differs from the host is reversed. Decoding runs the same
//! reversal first and then reads the fields back.
//!
//! Fields without an endianness declaration stay in host order. Every
//! multi-byte field that has to be portable must therefore be annotated.
//!
//! The field layout is a compile-time table of [`FieldLayout`] descriptors,
//! normally generated by [`byte_structure!`](crate::byte_structure):
//!
//! ```rust
//! use voltage_modbus_session::byte_structure;
//! use voltage_modbus_session::structure::{decode, encode};
//!
//! byte_structure! {
//!     #[derive(Debug, Clone, Copy, PartialEq)]
//!     pub struct ReadRegisters {
//!         #[endian(big)]
//!         pub start_address: u16,
//!         #[endian(big)]
//!         pub quantity: u16,
//!     }
//! }
//!
//! let request = ReadRegisters { start_address: 0x006B, quantity: 3 };
//! let bytes = encode(&request);
//! assert_eq!(bytes, [0x00, 0x6B, 0x00, 0x03]);
//! assert_eq!(decode::<ReadRegisters>(&bytes).unwrap(), request);
//! ```
//!
//! Arrays of primitives are reversed element by element, so
//! `#[endian(big)] registers: [u16; 3]` puts three big-endian registers on the
//! wire.

use crate::error::{ModbusError, ModbusResult};

/// Wire byte order of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness {
    /// Most significant byte first (Modbus register order)
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

impl Endianness {
    /// Byte order of the host this crate was compiled for.
    pub const NATIVE: Endianness = if cfg!(target_endian = "big") {
        Endianness::BigEndian
    } else {
        Endianness::LittleEndian
    };

    /// Returns `true` if values in this order need no reversal on this host.
    #[inline]
    pub const fn is_native(self) -> bool {
        matches!(
            (self, Self::NATIVE),
            (Endianness::BigEndian, Endianness::BigEndian)
                | (Endianness::LittleEndian, Endianness::LittleEndian)
        )
    }
}

/// Position and byte order of one field inside an encoded structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Byte offset from the start of the structure
    pub offset: usize,
    /// Total bytes occupied by the field
    pub size: usize,
    /// Size of the unit that is reversed (element size for arrays)
    pub unit: usize,
    /// Declared wire order, `None` keeps host order
    pub endianness: Option<Endianness>,
}

impl FieldLayout {
    pub const fn new(
        offset: usize,
        size: usize,
        unit: usize,
        endianness: Option<Endianness>,
    ) -> Self {
        Self {
            offset,
            size,
            unit,
            endianness,
        }
    }

    /// Returns `true` if the field has to be byte-reversed on this host.
    #[inline]
    pub fn needs_reversal(&self) -> bool {
        match self.endianness {
            Some(endianness) => !endianness.is_native() && self.unit > 1,
            None => false,
        }
    }
}

/// A fixed-size value that can be a field of a [`ByteStructure`].
pub trait Field: Sized {
    /// Encoded size in bytes
    const SIZE: usize;
    /// Size of the unit reversed for a non-native byte order
    const UNIT: usize = Self::SIZE;

    /// Write the value in host byte order into `out[..Self::SIZE]`.
    fn write_native(&self, out: &mut [u8]);

    /// Read a value in host byte order from `bytes[..Self::SIZE]`.
    fn read_native(bytes: &[u8]) -> Self;
}

macro_rules! impl_primitive_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Field for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn write_native(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
                }

                #[inline]
                fn read_native(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_primitive_field!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl<F: Field, const N: usize> Field for [F; N] {
    const SIZE: usize = F::SIZE * N;
    const UNIT: usize = F::UNIT;

    fn write_native(&self, out: &mut [u8]) {
        for (index, item) in self.iter().enumerate() {
            item.write_native(&mut out[index * F::SIZE..]);
        }
    }

    fn read_native(bytes: &[u8]) -> Self {
        std::array::from_fn(|index| F::read_native(&bytes[index * F::SIZE..]))
    }
}

/// A payload type with a static field layout.
///
/// Usually implemented through [`byte_structure!`](crate::byte_structure).
/// Hand-written implementations must keep every [`FieldLayout`] inside
/// `0..SIZE`; a descriptor outside the buffer is a programming error and
/// panics during encoding or decoding.
pub trait ByteStructure: Sized {
    /// Encoded size in bytes
    const SIZE: usize;
    /// Field descriptors in declaration order
    const LAYOUT: &'static [FieldLayout];

    /// Write all fields in host byte order into `out[..Self::SIZE]`.
    fn write_fields(&self, out: &mut [u8]);

    /// Read all fields in host byte order from `bytes[..Self::SIZE]`.
    fn read_fields(bytes: &[u8]) -> Self;
}

/// Empty payload.
impl ByteStructure for () {
    const SIZE: usize = 0;
    const LAYOUT: &'static [FieldLayout] = &[];

    fn write_fields(&self, _out: &mut [u8]) {}

    fn read_fields(_bytes: &[u8]) -> Self {}
}

/// Opaque bytes, copied as-is.
impl<const N: usize> ByteStructure for [u8; N] {
    const SIZE: usize = N;
    const LAYOUT: &'static [FieldLayout] = &[];

    fn write_fields(&self, out: &mut [u8]) {
        out[..N].copy_from_slice(self);
    }

    fn read_fields(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(&bytes[..N]);
        raw
    }
}

/// Reverse every field of `layout` whose declared order is not the host's.
///
/// # Panics
///
/// Panics if a descriptor lies outside `bytes`.
pub fn respect_endianness(layout: &[FieldLayout], bytes: &mut [u8]) {
    for field in layout {
        let end = field.offset + field.size;
        assert!(
            end <= bytes.len(),
            "field range {}..{} lies outside a {}-byte buffer",
            field.offset,
            end,
            bytes.len()
        );

        if !field.needs_reversal() {
            continue;
        }

        for unit in bytes[field.offset..end].chunks_exact_mut(field.unit) {
            unit.reverse();
        }
    }
}

/// Encode `value` into its wire bytes.
pub fn encode<T: ByteStructure>(value: &T) -> Vec<u8> {
    let mut bytes = vec![0u8; T::SIZE];
    value.write_fields(&mut bytes);
    respect_endianness(T::LAYOUT, &mut bytes);
    bytes
}

/// Decode a value from exactly `T::SIZE` wire bytes.
pub fn decode<T: ByteStructure>(bytes: &[u8]) -> ModbusResult<T> {
    if bytes.len() != T::SIZE {
        return Err(ModbusError::invalid_data(format!(
            "Expected {} bytes to decode, got {}",
            T::SIZE,
            bytes.len()
        )));
    }

    let mut raw = bytes.to_vec();
    respect_endianness(T::LAYOUT, &mut raw);
    Ok(T::read_fields(&raw))
}

/// Declare a struct together with its [`ByteStructure`] implementation.
///
/// Fields are encoded in declaration order without padding. Mark a field with
/// `#[endian(big)]` or `#[endian(little)]` to fix its wire order; unmarked
/// fields stay in host order. Field types must implement
/// [`Field`](crate::structure::Field) (integers, floats and arrays of them).
#[macro_export]
macro_rules! byte_structure {
    (@endian big) => {
        ::core::option::Option::Some($crate::structure::Endianness::BigEndian)
    };
    (@endian little) => {
        ::core::option::Option::Some($crate::structure::Endianness::LittleEndian)
    };
    (@endian) => {
        ::core::option::Option::None
    };

    (@layout ($offset:expr) [$($out:expr,)*]) => {
        &[$($out,)*]
    };
    (@layout ($offset:expr) [$($out:expr,)*] ($($endian:ident)?) $ty:ty, $($rest:tt)*) => {
        $crate::byte_structure!(
            @layout ($offset + <$ty as $crate::structure::Field>::SIZE)
            [
                $($out,)*
                $crate::structure::FieldLayout::new(
                    $offset,
                    <$ty as $crate::structure::Field>::SIZE,
                    <$ty as $crate::structure::Field>::UNIT,
                    $crate::byte_structure!(@endian $($endian)?),
                ),
            ]
            $($rest)*
        )
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[endian($endian:ident)])?
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $($field_vis $field: $ty,)*
        }

        impl $crate::structure::ByteStructure for $name {
            const SIZE: usize = 0usize $(+ <$ty as $crate::structure::Field>::SIZE)*;
            const LAYOUT: &'static [$crate::structure::FieldLayout] =
                $crate::byte_structure!(@layout (0usize) [] $(($($endian)?) $ty,)*);

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn write_fields(&self, out: &mut [u8]) {
                let mut offset = 0usize;
                $(
                    <$ty as $crate::structure::Field>::write_native(
                        &self.$field,
                        &mut out[offset..],
                    );
                    offset += <$ty as $crate::structure::Field>::SIZE;
                )*
            }

            #[allow(unused_assignments, unused_mut, unused_variables)]
            fn read_fields(bytes: &[u8]) -> Self {
                let mut offset = 0usize;
                $(
                    let $field = <$ty as $crate::structure::Field>::read_native(&bytes[offset..]);
                    offset += <$ty as $crate::structure::Field>::SIZE;
                )*
                Self { $($field,)* }
            }
        }
    };
}
