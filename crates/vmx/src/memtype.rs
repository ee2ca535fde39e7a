//! Memory types
//!
//! Cacheability of a translated access. The effective type of an access combines CR0.CD, the PAT
//! entry selected by the guest paging structures and, under EPT, the memory type of the terminal
//! EPT entry (which takes the role the MTRRs have without EPT).
//!
//! See Intel SDM Vol. 3A Section 13.5 and Vol. 3C Section 29.3.7.

use utils::{ArchError, EptMisconfig, Result};

/// A memory type, as encoded in the PAT, the MTRRs and EPT entries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum MemoryType {
    /// Uncacheable (UC).
    Uncacheable = 0,
    /// Write combining (WC).
    WriteCombining = 1,
    /// Write through (WT).
    WriteThrough = 4,
    /// Write protected (WP).
    WriteProtected = 5,
    /// Write back (WB).
    WriteBack = 6,
    /// Uncached (UC-), UC that a WC range may override.
    UncachedMinus = 7,
}

impl MemoryType {
    /// All legal encodings.
    pub const ALL: [MemoryType; 6] = [
        MemoryType::Uncacheable,
        MemoryType::WriteCombining,
        MemoryType::WriteThrough,
        MemoryType::WriteProtected,
        MemoryType::WriteBack,
        MemoryType::UncachedMinus,
    ];

    /// Decodes a 3 bits memory type, returns `None` for the reserved encodings 2 and 3, or values
    /// that do not fit 3 bits.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Uncacheable),
            1 => Some(Self::WriteCombining),
            4 => Some(Self::WriteThrough),
            5 => Some(Self::WriteProtected),
            6 => Some(Self::WriteBack),
            7 => Some(Self::UncachedMinus),
            _ => None,
        }
    }

    /// Decodes the memory-type field of an EPT entry.
    pub fn from_ept(raw: u8) -> Result<Self> {
        if raw > 0b111 {
            return Err(ArchError::FieldOverflow {
                field: "memory_type",
                value: raw as u64,
                width: 3,
            });
        }
        Self::from_raw(raw).ok_or_else(|| {
            log::warn!("EPT memory type {} is reserved", raw);
            ArchError::MisconfiguredEptEntry {
                raw: raw as u64,
                reason: EptMisconfig::ReservedMemoryType(raw),
            }
        })
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Short architectural name.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Uncacheable => "UC",
            Self::WriteCombining => "WC",
            Self::WriteThrough => "WT",
            Self::WriteProtected => "WP",
            Self::WriteBack => "WB",
            Self::UncachedMinus => "UC-",
        }
    }

    const fn is_uncacheable(self) -> bool {
        matches!(self, Self::Uncacheable | Self::UncachedMinus)
    }

    /// Rank among the cacheable types, lower is more restrictive.
    const fn rank(self) -> u8 {
        match self {
            Self::Uncacheable | Self::UncachedMinus => 0,
            Self::WriteCombining => 1,
            Self::WriteThrough => 2,
            Self::WriteProtected => 3,
            Self::WriteBack => 4,
        }
    }
}

// —————————————————————————————— Combination ——————————————————————————————— //

/// Combines the EPT memory type with the PAT type selected by the guest paging structures.
///
/// UC on either side wins. WC of the PAT wins over the range type, WC of the range is kept with a
/// WB page and degrades to UC otherwise. Among WT, WP and WB the most restrictive one is kept.
pub const fn combine(range: MemoryType, pat: MemoryType) -> MemoryType {
    use MemoryType::*;

    if matches!(range, Uncacheable | UncachedMinus) || matches!(pat, Uncacheable) {
        return Uncacheable;
    }
    match (range, pat) {
        (_, WriteCombining) => WriteCombining,
        // UC- gives way to a WC or WP range, and is UC otherwise.
        (WriteCombining | WriteProtected, UncachedMinus) => WriteCombining,
        (_, UncachedMinus) => Uncacheable,
        (WriteCombining, WriteBack) => WriteCombining,
        (WriteCombining, _) => Uncacheable,
        (range, pat) => {
            if range.rank() <= pat.rank() {
                range
            } else {
                pat
            }
        }
    }
}

/// Resolves the effective memory type of an access.
///
/// - Without EPT, the PAT type is the effective type (MTRRs are not modeled, see
///   [`resolve_legacy`] to combine with a known MTRR type).
/// - With CR0.CD set, the access is uncacheable.
/// - With EPT and the "ignore PAT" bit set, the EPT memory type is used as is.
/// - With EPT otherwise, the EPT type and the PAT type are [`combine`]d.
///
/// An EPT memory type holding a reserved encoding is reported as
/// [`ArchError::MisconfiguredEptEntry`], even when CR0.CD would make the access uncacheable.
pub fn resolve(
    cr0_cd: bool,
    pat_type: MemoryType,
    ept_type: u8,
    ept_ignore_pat: bool,
    translation_uses_ept: bool,
) -> Result<MemoryType> {
    let ept_type = if translation_uses_ept {
        Some(MemoryType::from_ept(ept_type)?)
    } else {
        None
    };

    let effective = match ept_type {
        _ if cr0_cd => MemoryType::Uncacheable,
        None => pat_type,
        Some(ept_type) if ept_ignore_pat => ept_type,
        Some(ept_type) => combine(ept_type, pat_type),
    };
    log::trace!(
        "memory type: cd={} pat={} ept={:?} ignore_pat={} -> {}",
        cr0_cd,
        pat_type.mnemonic(),
        ept_type.map(MemoryType::mnemonic),
        ept_ignore_pat,
        effective.mnemonic()
    );
    Ok(effective)
}

/// Combines the MTRR type of the physical range with the PAT type, following the effective
/// page-level memory types of Intel SDM Vol. 3A Table 12-7.
///
/// A WC page stays WC whatever the range. A UC- page is WC in a WC or WP range and UC otherwise.
/// A WP page is WP in a WT, WP or WB range. UC- is not an MTRR type and is read as UC.
pub const fn combine_legacy(mtrr: MemoryType, pat: MemoryType) -> MemoryType {
    use MemoryType::*;

    match (mtrr, pat) {
        (_, Uncacheable) => Uncacheable,
        (_, WriteCombining) => WriteCombining,
        (WriteCombining | WriteProtected, UncachedMinus) => WriteCombining,
        (_, UncachedMinus) => Uncacheable,
        (Uncacheable | UncachedMinus, _) => Uncacheable,
        (WriteCombining, WriteBack) => WriteCombining,
        (WriteCombining, _) => Uncacheable,
        (WriteProtected, WriteThrough) => WriteThrough,
        (_, WriteProtected) => WriteProtected,
        (WriteThrough, _) => WriteThrough,
        (WriteProtected, WriteBack) => WriteProtected,
        (_, pat) => pat,
    }
}

/// Resolves the effective memory type of an access without EPT, from the type the MTRRs assign
/// to the physical range.
pub const fn resolve_legacy(cr0_cd: bool, mtrr_type: MemoryType, pat_type: MemoryType) -> MemoryType {
    if cr0_cd {
        return MemoryType::Uncacheable;
    }
    combine_legacy(mtrr_type, pat_type)
}

// ——————————————————————————————————— PAT ——————————————————————————————————— //

/// Index into the PAT, built from the PAT, PCD and PWT bits of the terminal paging entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct PatIndex(u8);

impl PatIndex {
    pub const fn new(pat: bool, pcd: bool, pwt: bool) -> Self {
        Self(((pat as u8) << 2) | ((pcd as u8) << 1) | (pwt as u8))
    }

    pub fn from_raw(raw: u8) -> Result<Self> {
        if raw > 0b111 {
            return Err(ArchError::FieldOverflow {
                field: "pat_index",
                value: raw as u64,
                width: 3,
            });
        }
        Ok(Self(raw))
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// The value of the IA32_PAT MSR: eight memory types, one per byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Pat(u64);

impl Pat {
    /// Value of IA32_PAT after reset: WB, WT, UC-, UC, twice.
    pub const POWER_ON: Pat = Pat(0x0007_0406_0007_0406);

    pub const fn from_msr(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns the memory type of a PAT entry.
    ///
    /// Bits 7:3 of each entry are reserved, and 2 and 3 are not valid PAT types.
    pub fn memory_type(self, index: PatIndex) -> Result<MemoryType> {
        let shift = index.raw() as u32 * 8;
        let entry = ((self.0 >> shift) & 0xff) as u8;
        ArchError::check_reserved("IA32_PAT", self.0, ((entry & !0b111) as u64) << shift)?;
        match MemoryType::from_raw(entry) {
            Some(tpe) => Ok(tpe),
            None => Err(ArchError::MalformedEntry {
                entry: "IA32_PAT",
                raw: self.0,
                bit: (shift + 1) as u8,
            }),
        }
    }

    /// Returns a copy of this PAT with one entry replaced.
    pub const fn with_entry(self, index: PatIndex, tpe: MemoryType) -> Self {
        let shift = index.raw() as u32 * 8;
        Self((self.0 & !(0xff << shift)) | ((tpe.raw() as u64) << shift))
    }
}

impl Default for Pat {
    fn default() -> Self {
        Self::POWER_ON
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use MemoryType::*;

    #[test]
    fn resolve_is_total() {
        for cr0_cd in [false, true] {
            for ept_type in MemoryType::ALL {
                for ignore_pat in [false, true] {
                    for uses_ept in [false, true] {
                        for pat in MemoryType::ALL {
                            let res = resolve(cr0_cd, pat, ept_type.raw(), ignore_pat, uses_ept);
                            assert!(res.is_ok(), "{:?}", (cr0_cd, ept_type, ignore_pat, uses_ept));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn resolve_rules() {
        // CD forces UC under EPT.
        assert_eq!(resolve(true, WriteBack, 6, true, true), Ok(Uncacheable));
        // Ignore PAT takes the EPT type as is.
        assert_eq!(resolve(false, Uncacheable, 6, true, true), Ok(WriteBack));
        assert_eq!(resolve(false, WriteBack, 4, true, true), Ok(WriteThrough));
        // Combination.
        assert_eq!(resolve(false, WriteBack, 6, false, true), Ok(WriteBack));
        assert_eq!(resolve(false, Uncacheable, 6, false, true), Ok(Uncacheable));
        assert_eq!(resolve(false, WriteBack, 0, false, true), Ok(Uncacheable));
        assert_eq!(resolve(false, WriteThrough, 6, false, true), Ok(WriteThrough));
        assert_eq!(resolve(false, WriteBack, 5, false, true), Ok(WriteProtected));
        // Without EPT the PAT type is used and the EPT type ignored, even if reserved.
        assert_eq!(resolve(false, WriteCombining, 2, false, false), Ok(WriteCombining));
        assert_eq!(resolve(true, WriteBack, 0, false, false), Ok(Uncacheable));
    }

    #[test]
    fn reserved_ept_type_is_misconfiguration() {
        for raw in [2, 3] {
            for cr0_cd in [false, true] {
                assert_eq!(
                    resolve(cr0_cd, WriteBack, raw, false, true),
                    Err(ArchError::MisconfiguredEptEntry {
                        raw: raw as u64,
                        reason: EptMisconfig::ReservedMemoryType(raw)
                    })
                );
            }
        }
        assert!(matches!(
            resolve(false, WriteBack, 8, false, true),
            Err(ArchError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn combination_table() {
        for tpe in MemoryType::ALL {
            assert_eq!(combine(Uncacheable, tpe), Uncacheable);
            assert_eq!(combine(tpe, Uncacheable), Uncacheable);
            assert_eq!(combine(UncachedMinus, tpe), Uncacheable);
        }
        assert_eq!(combine(WriteBack, WriteCombining), WriteCombining);
        assert_eq!(combine(WriteThrough, WriteCombining), WriteCombining);
        assert_eq!(combine(WriteCombining, WriteBack), WriteCombining);
        assert_eq!(combine(WriteCombining, WriteThrough), Uncacheable);
        assert_eq!(combine(WriteCombining, UncachedMinus), WriteCombining);
        assert_eq!(combine(WriteBack, UncachedMinus), Uncacheable);
        assert_eq!(combine(WriteThrough, WriteProtected), WriteThrough);
        assert_eq!(combine(WriteProtected, WriteThrough), WriteThrough);
        assert_eq!(combine(WriteProtected, WriteBack), WriteProtected);
        assert_eq!(combine(WriteBack, WriteBack), WriteBack);
    }

    #[test]
    fn legacy() {
        assert_eq!(resolve_legacy(false, WriteBack, WriteThrough), WriteThrough);
        assert_eq!(resolve_legacy(true, WriteBack, WriteBack), Uncacheable);
        assert_eq!(resolve_legacy(false, Uncacheable, WriteCombining), WriteCombining);
        assert_eq!(resolve_legacy(false, WriteThrough, WriteProtected), WriteProtected);
    }

    #[test]
    fn legacy_table() {
        // Rows are MTRR types, columns PAT types: UC, UC-, WC, WT, WB, WP.
        let columns = [
            Uncacheable,
            UncachedMinus,
            WriteCombining,
            WriteThrough,
            WriteBack,
            WriteProtected,
        ];
        let table = [
            (Uncacheable, [Uncacheable, Uncacheable, WriteCombining, Uncacheable, Uncacheable, Uncacheable]),
            (WriteCombining, [Uncacheable, WriteCombining, WriteCombining, Uncacheable, WriteCombining, Uncacheable]),
            (WriteThrough, [Uncacheable, Uncacheable, WriteCombining, WriteThrough, WriteThrough, WriteProtected]),
            (WriteBack, [Uncacheable, Uncacheable, WriteCombining, WriteThrough, WriteBack, WriteProtected]),
            (WriteProtected, [Uncacheable, WriteCombining, WriteCombining, WriteThrough, WriteProtected, WriteProtected]),
        ];
        for (mtrr, row) in table {
            for (pat, expected) in columns.iter().zip(row) {
                assert_eq!(
                    combine_legacy(mtrr, *pat),
                    expected,
                    "MTRR {} PAT {}",
                    mtrr.mnemonic(),
                    pat.mnemonic()
                );
            }
        }
    }

    #[test]
    fn pat_entries() {
        let pat = Pat::default();
        assert_eq!(pat.memory_type(PatIndex::new(false, false, false)), Ok(WriteBack));
        assert_eq!(pat.memory_type(PatIndex::new(false, false, true)), Ok(WriteThrough));
        assert_eq!(pat.memory_type(PatIndex::new(false, true, false)), Ok(UncachedMinus));
        assert_eq!(pat.memory_type(PatIndex::new(false, true, true)), Ok(Uncacheable));
        assert_eq!(pat.memory_type(PatIndex::new(true, false, false)), Ok(WriteBack));

        let index = PatIndex::from_raw(5).unwrap();
        let pat = pat.with_entry(index, WriteCombining);
        assert_eq!(pat.memory_type(index), Ok(WriteCombining));
        assert!(PatIndex::from_raw(8).is_err());
    }

    #[test]
    fn malformed_pat() {
        let index = PatIndex::from_raw(1).unwrap();
        let pat = Pat::from_msr(0x0000_0000_0000_0206);
        assert_eq!(
            pat.memory_type(index),
            Err(ArchError::MalformedEntry {
                entry: "IA32_PAT",
                raw: 0x206,
                bit: 9
            })
        );
        let pat = Pat::from_msr(0x0000_0000_0000_1006);
        assert_eq!(
            pat.memory_type(index),
            Err(ArchError::MalformedEntry {
                entry: "IA32_PAT",
                raw: 0x1006,
                bit: 12
            })
        );
        assert_eq!(pat.memory_type(PatIndex::default()), Ok(WriteBack));
    }
}
