//! 4-level paging
//!
//! Entries of the four paging structures translating 48-bit linear addresses, and CR3. See
//! Intel SDM Vol. 3A Section 4.5.

use bitflags::bitflags;
use utils::{bit_word, ArchError, BitField, GuestPhysAddr, Layout, Result, Unsupported, PAGE_SHIFT};

use crate::config::TranslationConfig;
use crate::entry::{
    build, ACCESSED, CACHE_DISABLE, DIRTY, GLOBAL, PAGE_SIZE, PAT_4K, PAT_LARGE, PRESENT, USER,
    WRITABLE, WRITE_THROUGH,
};

bitflags! {
    /// Flags used to build 4-level paging entries.
    pub struct PtFlag: u64 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
        const PAGE_WRITE_THROUGH = 1 << 3;
        const PAGE_CACHE_DISABLE = 1 << 4;
        const ACCESS = 1 << 5;
        const DIRTY = 1 << 6;
        /// Page size at PDPTE and PDE levels, PAT at PTE level.
        const PSIZE = 1 << 7;
        const GLOBAL = 1 << 8;
        const EXEC_DISABLE = 1 << 63;
    }
}

/// Bit 63 is the execute-disable bit once IA32_EFER.NXE is set, it is reserved otherwise.
const EXECUTE_DISABLE: BitField = BitField::bit("execute_disable", 63);
const TABLE_ADDRESS: BitField = BitField::new("address", 12, 40);
const HUGE_ADDRESS: BitField = BitField::new("address", 21, 31);
const GIANT_ADDRESS: BitField = BitField::new("address", 30, 22);
const PROTECTION_KEY: BitField = BitField::new("protection_key", 59, 4);

const PML4E_FIELDS: &[BitField] = &[
    PRESENT,
    WRITABLE,
    USER,
    WRITE_THROUGH,
    CACHE_DISABLE,
    ACCESSED,
    BitField::bit("ignored", 6),
    BitField::bit("reserved", 7),
    BitField::new("ignored", 8, 4),
    TABLE_ADDRESS,
    BitField::new("ignored", 52, 11),
    EXECUTE_DISABLE,
];

const TABLE_FIELDS: &[BitField] = &[
    PRESENT,
    WRITABLE,
    USER,
    WRITE_THROUGH,
    CACHE_DISABLE,
    ACCESSED,
    BitField::bit("ignored", 6),
    PAGE_SIZE,
    BitField::new("ignored", 8, 4),
    TABLE_ADDRESS,
    BitField::new("ignored", 52, 11),
    EXECUTE_DISABLE,
];

const GIANT_FIELDS: &[BitField] = &[
    PRESENT,
    WRITABLE,
    USER,
    WRITE_THROUGH,
    CACHE_DISABLE,
    ACCESSED,
    DIRTY,
    PAGE_SIZE,
    GLOBAL,
    BitField::new("ignored", 9, 3),
    PAT_LARGE,
    BitField::new("reserved", 13, 17),
    GIANT_ADDRESS,
    BitField::new("ignored", 52, 7),
    PROTECTION_KEY,
    EXECUTE_DISABLE,
];

const HUGE_FIELDS: &[BitField] = &[
    PRESENT,
    WRITABLE,
    USER,
    WRITE_THROUGH,
    CACHE_DISABLE,
    ACCESSED,
    DIRTY,
    PAGE_SIZE,
    GLOBAL,
    BitField::new("ignored", 9, 3),
    PAT_LARGE,
    BitField::new("reserved", 13, 8),
    HUGE_ADDRESS,
    BitField::new("ignored", 52, 7),
    PROTECTION_KEY,
    EXECUTE_DISABLE,
];

const PTE_FIELDS: &[BitField] = &[
    PRESENT,
    WRITABLE,
    USER,
    WRITE_THROUGH,
    CACHE_DISABLE,
    ACCESSED,
    DIRTY,
    PAT_4K,
    GLOBAL,
    BitField::new("ignored", 9, 3),
    TABLE_ADDRESS,
    BitField::new("ignored", 52, 7),
    PROTECTION_KEY,
    EXECUTE_DISABLE,
];

const CR3_FIELDS: &[BitField] = &[
    BitField::new("ignored", 0, 3),
    WRITE_THROUGH,
    CACHE_DISABLE,
    BitField::new("ignored", 5, 7),
    TABLE_ADDRESS,
    BitField::new("reserved", 52, 12),
];

/// Checks a present entry: reserved bits, address bits beyond MAXPHYADDR, and the
/// execute-disable bit without IA32_EFER.NXE.
fn check(layout: &Layout, address: BitField, raw: u64, config: &TranslationConfig) -> Result<()> {
    ArchError::check_reserved(layout.name(), raw, raw & layout.reserved_mask())?;
    ArchError::check_reserved(
        layout.name(),
        raw,
        address.set_bits_from(raw, config.max_phys_addr()),
    )?;
    if !config.nxe() {
        ArchError::check_reserved(layout.name(), raw, raw & EXECUTE_DISABLE.mask())?;
    }
    Ok(())
}

/// Accessors of 4-level entries.
macro_rules! entry64 {
    ($name:ident, $address:expr) => {
        paging_entry!($name, $address);

        impl $name {
            /// XD: instruction fetches are not allowed.
            #[inline]
            pub const fn is_execute_disabled(self) -> bool {
                self.flag(EXECUTE_DISABLE)
            }
        }
    };
}

/// Accessors of entries referencing a paging structure.
macro_rules! table64 {
    ($name:ident) => {
        entry64!($name, TABLE_ADDRESS);

        impl $name {
            /// Builds an entry referencing the table in frame `frame`. `PSIZE` is rejected, large
            /// pages have their own entry types.
            pub fn new(frame: u64, flags: PtFlag) -> Result<Self> {
                let bits = flags.bits();
                ArchError::check_reserved(Self::LAYOUT.name(), bits, bits & PAGE_SIZE.mask())?;
                build(&Self::LAYOUT, Self::ADDRESS, frame, bits).map(Self)
            }

            /// Physical address of the next paging structure.
            #[inline]
            pub const fn next_table(self) -> GuestPhysAddr {
                GuestPhysAddr::new(self.frame_number() << PAGE_SHIFT)
            }

            /// Validates a raw entry. Returns `None` if the entry is not present.
            ///
            /// An entry with the page-size bit set maps a page rather than a table and is
            /// reported as malformed, decode it through the level enum instead.
            pub fn decode(raw: u64, config: &TranslationConfig) -> Result<Option<Self>> {
                if !PRESENT.is_set(raw) {
                    return Ok(None);
                }
                ArchError::check_reserved(Self::LAYOUT.name(), raw, raw & PAGE_SIZE.mask())?;
                check(&Self::LAYOUT, Self::ADDRESS, raw, config)?;
                Ok(Some(Self(raw)))
            }
        }
    };
}

/// Accessors of entries mapping a page.
macro_rules! page64 {
    ($name:ident, $address:expr, $pat:expr, $large:expr) => {
        entry64!($name, $address);
        paging_page!($name, $pat, $large);

        impl $name {
            /// Builds an entry mapping the page in frame `frame` (in units of the page size).
            pub fn new(frame: u64, flags: PtFlag) -> Result<Self> {
                let mut flags = flags.bits();
                if $large {
                    flags |= PAGE_SIZE.mask();
                }
                build(&Self::LAYOUT, Self::ADDRESS, frame, flags).map(Self)
            }

            /// Physical address of the page.
            #[inline]
            pub const fn page_base(self) -> GuestPhysAddr {
                GuestPhysAddr::new(self.0 & Self::ADDRESS.mask())
            }

            /// Protection key of the page, used when CR4.PKE is set.
            #[inline]
            pub const fn protection_key(self) -> u8 {
                self.field(PROTECTION_KEY) as u8
            }

            fn check(raw: u64, config: &TranslationConfig) -> Result<Self> {
                check(&Self::LAYOUT, Self::ADDRESS, raw, config)?;
                Ok(Self(raw))
            }
        }
    };
}

bit_word!(
    /// The CR3 register with 4-level paging.
    Cr3(u64) = Layout::new("CR3", 64, CR3_FIELDS)
);

bit_word!(
    /// PML4 entry, references a page-directory-pointer table.
    Pml4e(u64) = Layout::new("PML4E", 64, PML4E_FIELDS)
);

bit_word!(
    /// Page-directory-pointer-table entry that references a page directory.
    Pdpte(u64) = Layout::new("PDPTE", 64, TABLE_FIELDS)
);

bit_word!(
    /// Page-directory-pointer-table entry that maps a 1 GB page.
    Pdpte1G(u64) = Layout::new("PDPTE (1GB)", 64, GIANT_FIELDS)
);

bit_word!(
    /// Page-directory entry that references a page table.
    Pde(u64) = Layout::new("PDE", 64, TABLE_FIELDS)
);

bit_word!(
    /// Page-directory entry that maps a 2 MB page.
    Pde2M(u64) = Layout::new("PDE (2MB)", 64, HUGE_FIELDS)
);

bit_word!(
    /// Page-table entry, maps a 4 KB page.
    Pte(u64) = Layout::new("PTE", 64, PTE_FIELDS)
);

table64!(Pml4e);
table64!(Pdpte);
table64!(Pde);
page64!(Pdpte1G, GIANT_ADDRESS, PAT_LARGE, true);
page64!(Pde2M, HUGE_ADDRESS, PAT_LARGE, true);
page64!(Pte, TABLE_ADDRESS, PAT_4K, false);

impl Pdpte {
    /// Whether the page-size bit is set. Never true for an entry built by `new` or `decode`,
    /// 1 GB mappings decode to [`L3Entry::GiantPage`].
    #[inline]
    pub const fn is_large_page(self) -> bool {
        self.flag(PAGE_SIZE)
    }
}

impl Pde {
    /// Whether the page-size bit is set. Never true for an entry built by `new` or `decode`,
    /// 2 MB mappings decode to [`L2Entry::HugePage`].
    #[inline]
    pub const fn is_large_page(self) -> bool {
        self.flag(PAGE_SIZE)
    }
}

impl Pte {
    /// Validates a raw PTE. Returns `None` if the entry is not present.
    pub fn decode(raw: u64, config: &TranslationConfig) -> Result<Option<Self>> {
        if !PRESENT.is_set(raw) {
            return Ok(None);
        }
        Self::check(raw, config).map(Some)
    }
}

/// A decoded page-directory-pointer-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum L3Entry {
    NotPresent,
    Table(Pdpte),
    GiantPage(Pdpte1G),
}

/// A decoded page-directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum L2Entry {
    NotPresent,
    Table(Pde),
    HugePage(Pde2M),
}

impl L3Entry {
    /// Decodes a raw PDPTE, selecting the variant with the page-size bit.
    pub fn decode(raw: u64, config: &TranslationConfig) -> Result<Self> {
        if !PRESENT.is_set(raw) {
            return Ok(Self::NotPresent);
        }
        if !PAGE_SIZE.is_set(raw) {
            return Pdpte::decode(raw, config).map(|e| e.map_or(Self::NotPresent, Self::Table));
        }
        if !config.giant_pages() {
            return Err(ArchError::UnsupportedTranslationMode(Unsupported::GiantPages));
        }
        Pdpte1G::check(raw, config).map(Self::GiantPage)
    }
}

impl L2Entry {
    /// Decodes a raw PDE, selecting the variant with the page-size bit.
    pub fn decode(raw: u64, config: &TranslationConfig) -> Result<Self> {
        if !PRESENT.is_set(raw) {
            return Ok(Self::NotPresent);
        }
        if !PAGE_SIZE.is_set(raw) {
            return Pde::decode(raw, config).map(|e| e.map_or(Self::NotPresent, Self::Table));
        }
        Pde2M::check(raw, config).map(Self::HugePage)
    }
}

impl Cr3 {
    /// Builds CR3 for the PML4 table in frame `pml4_frame`.
    pub fn new(pml4_frame: u64, write_through: bool, cache_disable: bool) -> Result<Self> {
        let raw = TABLE_ADDRESS.pack(pml4_frame)?
            | WRITE_THROUGH.pack(write_through as u64)?
            | CACHE_DISABLE.pack(cache_disable as u64)?;
        Ok(Self(raw))
    }

    #[inline]
    pub const fn pml4_frame(self) -> u64 {
        self.field(TABLE_ADDRESS)
    }

    /// Physical address of the PML4 table.
    #[inline]
    pub const fn root(self) -> GuestPhysAddr {
        GuestPhysAddr::new(self.pml4_frame() << PAGE_SHIFT)
    }

    #[inline]
    pub const fn write_through(self) -> bool {
        self.flag(WRITE_THROUGH)
    }

    #[inline]
    pub const fn cache_disable(self) -> bool {
        self.flag(CACHE_DISABLE)
    }

    /// Process-context identifier. With CR4.PCIDE set bits 11:0 hold the PCID instead of PWT
    /// and PCD.
    #[inline]
    pub const fn pcid(self) -> u16 {
        (self.0 & 0xfff) as u16
    }

    /// Checks reserved bits and address bits beyond MAXPHYADDR.
    pub fn validate(self, config: &TranslationConfig) -> Result<Self> {
        ArchError::check_reserved("CR3", self.0, self.0 & Self::LAYOUT.reserved_mask())?;
        ArchError::check_reserved(
            "CR3",
            self.0,
            TABLE_ADDRESS.set_bits_from(self.0, config.max_phys_addr()),
        )?;
        Ok(self)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
