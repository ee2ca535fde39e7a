//! Bitfield primitive
//!
//! Every hardware word of the model (page-table entries, EPTP, CR3, VMCS component encodings) is
//! described as a [`Layout`]: an ordered list of [`BitField`]s covering the whole word. Fields are
//! declared as constants, so an offset or width that does not fit the word is rejected at compile
//! time. Writing a value that does not fit its field is never masked, it fails with
//! [`ArchError::FieldOverflow`].

use core::fmt;

use crate::errors::{ArchError, Result};

/// Returns a mask covering the `width` low bits.
#[inline]
pub const fn low_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

/// Returns the `width` bits of `word` starting at `offset`, shifted down to bit 0.
///
/// Bits beyond the end of the word read as zero.
#[inline]
pub const fn extract(word: u64, offset: u32, width: u32) -> u64 {
    match word.checked_shr(offset) {
        Some(shifted) => shifted & low_mask(width),
        None => 0,
    }
}

/// Shifts `value` into the `[offset, offset + width)` range, ready to be OR-ed with the other
/// fields of the word.
pub fn pack(value: u64, offset: u32, width: u32) -> Result<u64> {
    pack_field("anonymous", value, offset, width)
}

fn pack_field(field: &'static str, value: u64, offset: u32, width: u32) -> Result<u64> {
    let overflow = ArchError::FieldOverflow {
        field,
        value,
        width,
    };
    let out_of_word = offset.checked_add(width).map_or(true, |end| end > 64);
    if out_of_word || value > low_mask(width) {
        return Err(overflow);
    }
    Ok(value << offset)
}

// ———————————————————————————————— Fields ————————————————————————————————— //

/// A named range of bits inside a hardware word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BitField {
    name: &'static str,
    offset: u32,
    width: u32,
}

impl BitField {
    /// Declares a field.
    ///
    /// Meant to be used in constant context: a range that does not fit a 64 bits word fails the
    /// build.
    pub const fn new(name: &'static str, offset: u32, width: u32) -> Self {
        assert!(width > 0, "empty bit field");
        assert!(offset + width <= 64, "bit field exceeds 64 bits");
        Self {
            name,
            offset,
            width,
        }
    }

    /// Declares a single bit.
    pub const fn bit(name: &'static str, offset: u32) -> Self {
        Self::new(name, offset, 1)
    }

    #[inline]
    pub const fn name(self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    #[inline]
    pub const fn width(self) -> u32 {
        self.width
    }

    /// First bit past the field.
    #[inline]
    pub const fn end(self) -> u32 {
        self.offset + self.width
    }

    /// Mask of the field, in place.
    #[inline]
    pub const fn mask(self) -> u64 {
        low_mask(self.width) << self.offset
    }

    /// Largest value the field can hold.
    #[inline]
    pub const fn max(self) -> u64 {
        low_mask(self.width)
    }

    /// Reads the field out of `word`.
    #[inline]
    pub const fn get(self, word: u64) -> u64 {
        extract(word, self.offset, self.width)
    }

    /// Returns true if any bit of the field is set in `word`.
    #[inline]
    pub const fn is_set(self, word: u64) -> bool {
        word & self.mask() != 0
    }

    /// Returns `value` shifted into position.
    pub fn pack(self, value: u64) -> Result<u64> {
        pack_field(self.name, value, self.offset, self.width)
    }

    /// Replaces the field inside `word` with `value`.
    pub fn set(self, word: u64, value: u64) -> Result<u64> {
        Ok((word & !self.mask()) | self.pack(value)?)
    }

    /// Returns the bits of the field set in `word` at or above bit `from`, in place.
    ///
    /// Used to find address bits beyond MAXPHYADDR.
    #[inline]
    pub const fn set_bits_from(self, word: u64, from: u32) -> u64 {
        if from >= 64 {
            return 0;
        }
        word & self.mask() & !low_mask(from)
    }

    /// Whether this field carries no architectural meaning (ignored or reserved bits).
    pub const fn is_filler(self) -> bool {
        is_prefix(b"ignored", self.name.as_bytes()) || is_prefix(b"reserved", self.name.as_bytes())
    }

    /// Whether this field must be zero.
    pub const fn is_reserved(self) -> bool {
        is_prefix(b"reserved", self.name.as_bytes())
    }
}

const fn is_prefix(prefix: &[u8], name: &[u8]) -> bool {
    if name.len() < prefix.len() {
        return false;
    }
    let mut i = 0;
    while i < prefix.len() {
        if prefix[i] != name[i] {
            return false;
        }
        i += 1;
    }
    true
}

// ———————————————————————————————— Layouts ———————————————————————————————— //

/// The complete description of a hardware word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Layout {
    name: &'static str,
    bits: u32,
    fields: &'static [BitField],
}

impl Layout {
    pub const fn new(name: &'static str, bits: u32, fields: &'static [BitField]) -> Self {
        Self { name, bits, fields }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Width of the described word, 16, 32 or 64.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub const fn fields(&self) -> &'static [BitField] {
        self.fields
    }

    /// Checks the schema: fields sit inside the word, do not overlap, and their widths add up to
    /// the word width.
    pub const fn is_well_formed(&self) -> bool {
        if self.bits == 0 || self.bits > 64 {
            return false;
        }
        let mut covered: u64 = 0;
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            let field = self.fields[i];
            if field.end() > self.bits || covered & field.mask() != 0 {
                return false;
            }
            covered |= field.mask();
            total += field.width;
            i += 1;
        }
        total == self.bits && covered == low_mask(self.bits)
    }

    /// Looks a field up by name.
    pub fn field(&self, name: &str) -> Option<BitField> {
        self.fields.iter().copied().find(|f| f.name == name)
    }

    /// Union of all must-be-zero fields.
    pub const fn reserved_mask(&self) -> u64 {
        let mut mask = 0;
        let mut i = 0;
        while i < self.fields.len() {
            if self.fields[i].is_reserved() {
                mask |= self.fields[i].mask();
            }
            i += 1;
        }
        mask
    }

    /// Iterates over the meaningful fields of `word` with their values.
    pub fn values(&self, word: u64) -> impl Iterator<Item = (&'static str, u64)> {
        self.fields
            .iter()
            .filter(|f| !f.is_filler())
            .map(move |f| (f.name, f.get(word)))
    }

    /// Builds a word from named values, every other bit being zero.
    ///
    /// An unknown name is reported as an overflow of a zero-width field.
    pub fn compose(&self, values: &[(&str, u64)]) -> Result<u64> {
        let mut word = 0;
        for (name, value) in values {
            let field = self.field(name).ok_or(ArchError::FieldOverflow {
                field: self.name,
                value: *value,
                width: 0,
            })?;
            word |= field.pack(*value)?;
        }
        Ok(word)
    }

    /// Returns a [`fmt::Debug`] adaptor printing `word` field by field.
    pub fn display(&self, word: u64) -> LayoutDisplay {
        LayoutDisplay { layout: *self, word }
    }
}

/// See [`Layout::display`].
pub struct LayoutDisplay {
    layout: Layout,
    word: u64,
}

impl fmt::Debug for LayoutDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.layout.name);
        for (name, value) in self.layout.values(self.word) {
            s.field(name, &format_args!("{:#x}", value));
        }
        s.finish()
    }
}

// ——————————————————————————————— Typed Words ——————————————————————————————— //

/// A typed view over a raw hardware word.
///
/// The structured accessors and the raw integer always describe the same bits: the raw value is
/// the only storage, accessors are computed from it.
pub trait BitWord: Copy {
    /// Storage integer, `u16`, `u32` or `u64`.
    type Raw: Copy + Into<u64>;

    const LAYOUT: Layout;

    fn from_raw(raw: Self::Raw) -> Self;
    fn raw(self) -> Self::Raw;

    /// Reads a field of this word.
    fn get(self, field: BitField) -> u64 {
        field.get(self.raw().into())
    }

    /// Returns the reserved bits that are set, if any.
    fn reserved_bits(self) -> u64 {
        self.raw().into() & Self::LAYOUT.reserved_mask()
    }
}

/// Declares a typed hardware word: a transparent newtype over its raw integer, with its layout
/// and the [`BitWord`] plumbing. The layout is checked at compile time.
#[macro_export]
macro_rules! bit_word {
    ($(#[$attr:meta])* $name:ident($raw:ty) = $layout:expr) => {
        $(#[$attr])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name($raw);

        impl $name {
            pub const LAYOUT: $crate::Layout = $layout;

            /// Reinterprets a raw word, without validation.
            #[inline]
            pub const fn from_raw(raw: $raw) -> Self {
                Self(raw)
            }

            /// Returns the raw word.
            #[inline]
            pub const fn raw(self) -> $raw {
                self.0
            }

            #[inline]
            #[allow(dead_code)]
            const fn flag(self, field: $crate::BitField) -> bool {
                field.is_set(self.0 as u64)
            }

            #[inline]
            #[allow(dead_code)]
            const fn field(self, field: $crate::BitField) -> u64 {
                field.get(self.0 as u64)
            }
        }

        impl $crate::bits::BitWord for $name {
            type Raw = $raw;
            const LAYOUT: $crate::Layout = $layout;

            fn from_raw(raw: $raw) -> Self {
                Self(raw)
            }

            fn raw(self) -> $raw {
                self.0
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Debug::fmt(&Self::LAYOUT.display(self.0 as u64), f)
            }
        }

        const _: () = assert!($name::LAYOUT.is_well_formed());
    };
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    const WORD_FIELDS: &[BitField] = &[
        BitField::bit("flag", 0),
        BitField::new("low", 1, 7),
        BitField::new("reserved", 8, 4),
        BitField::new("high", 12, 4),
    ];
    const WORD: Layout = Layout::new("word", 16, WORD_FIELDS);

    bit_word!(
        /// A 16 bits test word.
        TestWord(u16) = WORD
    );

    #[test]
    fn extract_and_pack_round_trip() {
        let words = [0u64, u64::MAX, 0xdead_beef_cafe_f00d, 0x8000_0000_0000_0001];
        for word in words {
            for offset in 0..64 {
                for width in 1..=(64 - offset) {
                    let value = extract(word, offset, width);
                    let packed = pack(value, offset, width).unwrap();
                    let mask = low_mask(width) << offset;
                    assert_eq!(packed, word & mask, "offset {} width {}", offset, width);
                }
            }
        }
    }

    #[test]
    fn pack_rejects_overflow() {
        assert_eq!(
            pack(0b100, 4, 2),
            Err(ArchError::FieldOverflow {
                field: "anonymous",
                value: 0b100,
                width: 2
            })
        );
        assert!(pack(1, 63, 2).is_err());
        assert!(pack(0, 64, 1).is_err());
        assert_eq!(
            pack(1, u32::MAX, 2),
            Err(ArchError::FieldOverflow {
                field: "anonymous",
                value: 1,
                width: 2
            })
        );
        assert!(pack(1, 1, u32::MAX).is_err());
        assert_eq!(pack(0b11, 4, 2), Ok(0b11_0000));
    }

    #[test]
    fn field_set_replaces_bits() {
        let field = BitField::new("mid", 8, 8);
        assert_eq!(field.set(0xffff_ffff, 0x12), Ok(0xffff_12ff));
        assert!(field.set(0, 0x100).is_err());
        assert_eq!(field.max(), 0xff);
        assert_eq!(field.end(), 16);
        assert_eq!(field.set_bits_from(0xffff_ffff, 12), 0xf000);
        assert_eq!(field.set_bits_from(0xffff_ffff, 64), 0);
    }

    #[test]
    fn layout_schema() {
        assert!(WORD.is_well_formed());
        assert_eq!(WORD.reserved_mask(), 0x0f00);
        assert_eq!(WORD.field("high"), Some(BitField::new("high", 12, 4)));
        assert_eq!(WORD.field("missing"), None);

        const OVERLAP: &[BitField] = &[BitField::new("a", 0, 5), BitField::new("b", 4, 4)];
        const SHORT: &[BitField] = &[BitField::new("a", 0, 7)];
        const WIDE: &[BitField] = &[BitField::new("a", 0, 9)];
        assert!(!Layout::new("overlap", 8, OVERLAP).is_well_formed());
        assert!(!Layout::new("short", 8, SHORT).is_well_formed());
        assert!(!Layout::new("wide", 8, WIDE).is_well_formed());
    }

    #[test]
    fn layout_compose_and_values() {
        let word = WORD.compose(&[("flag", 1), ("high", 0xa)]).unwrap();
        assert_eq!(word, 0xa001);
        assert!(WORD.compose(&[("low", 0x80)]).is_err());
        assert!(WORD.compose(&[("nope", 1)]).is_err());

        let values: Vec<_> = WORD.values(word).collect();
        assert_eq!(values, vec![("flag", 1), ("low", 0), ("high", 0xa)]);
    }

    #[test]
    fn typed_word() {
        let word = TestWord::from_raw(0x0301);
        assert_eq!(word.raw(), 0x0301);
        assert!(word.flag(BitField::bit("flag", 0)));
        assert_eq!(BitWord::reserved_bits(word), 0x0300);
        assert_eq!(format!("{:?}", word), "word { flag: 0x1, low: 0x0, high: 0x0 }");
    }
}
