//! Errors
//!
//! Every failure of the model is a local, deterministic validation failure discoverable from the
//! input alone. Each one corresponds to a condition real hardware reports as a fault (reserved-bit
//! page fault, EPT misconfiguration, VMREAD/VMWRITE to an unsupported component, ...), so they
//! are always returned to the caller and never recovered silently.

use core::fmt;

pub type Result<T> = core::result::Result<T, ArchError>;

/// An error of the architectural data model.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArchError {
    /// A value does not fit the width of the field it is written to.
    FieldOverflow {
        field: &'static str,
        value: u64,
        width: u32,
    },

    /// A reserved (must-be-zero) bit is set, or a large-page bit is set at a level that does not
    /// map pages. `bit` is the lowest offending bit.
    MalformedEntry {
        entry: &'static str,
        raw: u64,
        bit: u8,
    },

    /// The entry would cause an EPT misconfiguration VM exit.
    MisconfiguredEptEntry { raw: u64, reason: EptMisconfig },

    /// The value is not a valid VMCS component encoding.
    InvalidComponentEncoding { raw: u32, reason: ComponentFault },

    /// The configuration does not support the requested translation.
    UnsupportedTranslationMode(Unsupported),

    /// The address does not fit the translation: non-canonical linear address, or an input
    /// address wider than the hierarchy translates.
    AddressOutOfRange { addr: u64, width: u32 },

    /// The paging-structure snapshot does not hold the entry at this physical address.
    UnreadableEntry { addr: u64 },
}

/// The EPT misconfiguration conditions.
///
/// See Intel SDM Vol. 3C Section 29.3.3.1.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EptMisconfig {
    /// Write access granted without read access.
    WriteWithoutRead,
    /// Execute-only entry while the processor does not support them.
    ExecuteOnlyUnsupported,
    /// The memory type field holds one of the reserved encodings.
    ReservedMemoryType(u8),
}

/// Why a VMCS component encoding is invalid.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ComponentFault {
    /// A "high" access was requested for a field that is not 64 bits wide.
    HighAccessOnNarrowField,
    /// One of the reserved bits (12, or 15 and above) is set.
    ReservedBit(u8),
}

/// Translation features the configuration may lack.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Unsupported {
    /// 1 GB pages.
    GiantPages,
    /// 2 MB EPT pages.
    HugePages,
    /// 4 MB pages of 32-bit paging with CR4.PSE clear.
    LargePages32,
    /// EPT page-walk length other than 4.
    WalkLength(u8),
    /// EPTP memory type other than UC or WB.
    EptpMemoryType(u8),
    /// EPT accessed and dirty flags.
    AccessedDirty,
    /// PAE paging outside of long mode.
    PaePaging,
    /// 5-level paging.
    FiveLevelPaging,
    /// A page size the translation mode does not have.
    PageSize,
    /// MAXPHYADDR outside of 32..=52.
    PhysAddrWidth(u8),
    /// A nested memory type needs a guest paging translation and an EPT translation.
    NestedTranslation,
}

impl fmt::Display for ArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchError::FieldOverflow {
                field,
                value,
                width,
            } => write!(f, "value {:#x} overflows the {} bits of `{}`", value, width, field),
            ArchError::MalformedEntry { entry, raw, bit } => {
                write!(f, "malformed {} {:#x}: bit {} must be zero", entry, raw, bit)
            }
            ArchError::MisconfiguredEptEntry { raw, reason } => {
                write!(f, "misconfigured EPT entry {:#x}: {:?}", raw, reason)
            }
            ArchError::InvalidComponentEncoding { raw, reason } => {
                write!(f, "invalid VMCS component encoding {:#x}: {:?}", raw, reason)
            }
            ArchError::UnsupportedTranslationMode(what) => {
                write!(f, "unsupported translation: {:?}", what)
            }
            ArchError::AddressOutOfRange { addr, width } => {
                write!(f, "address {:#x} does not fit {} bits", addr, width)
            }
            ArchError::UnreadableEntry { addr } => {
                write!(f, "no paging-structure entry at {:#x}", addr)
            }
        }
    }
}

impl ArchError {
    /// Reports the lowest reserved bit of `bits` as a malformed entry.
    ///
    /// Returns `Ok` if `bits` is zero.
    pub fn check_reserved(entry: &'static str, raw: u64, bits: u64) -> Result<()> {
        if bits == 0 {
            return Ok(());
        }
        log::warn!("{} {:#x}: reserved bits {:#x} set", entry, raw, bits);
        Err(ArchError::MalformedEntry {
            entry,
            raw,
            bit: bits.trailing_zeros() as u8,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_reports_lowest_bit() {
        assert_eq!(ArchError::check_reserved("pte", 0x1, 0), Ok(()));
        assert_eq!(
            ArchError::check_reserved("pml4e", 0x81, 0x180),
            Err(ArchError::MalformedEntry {
                entry: "pml4e",
                raw: 0x81,
                bit: 7
            })
        );
    }

    #[test]
    fn display() {
        let err = ArchError::FieldOverflow {
            field: "index",
            value: 0x200,
            width: 9,
        };
        assert_eq!(err.to_string(), "value 0x200 overflows the 9 bits of `index`");
        let err = ArchError::MalformedEntry {
            entry: "pml4e",
            raw: 0x81,
            bit: 7,
        };
        assert_eq!(err.to_string(), "malformed pml4e 0x81: bit 7 must be zero");
    }
}
