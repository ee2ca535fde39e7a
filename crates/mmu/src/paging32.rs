//! 32-bit paging
//!
//! Two levels of 32-bit entries translating 32-bit linear addresses, with 4 MB pages when
//! CR4.PSE is set. See Intel SDM Vol. 3A Section 4.3.

use utils::{bit_word, ArchError, BitField, GuestPhysAddr, Layout, Result, PAGE_SHIFT};

use crate::config::TranslationConfig;
use crate::entry::{
    build, ACCESSED, CACHE_DISABLE, DIRTY, GLOBAL, PAGE_SIZE, PAT_4K, PAT_LARGE, PRESENT, USER,
    WRITABLE, WRITE_THROUGH,
};

const ADDRESS: BitField = BitField::new("address", 12, 20);
/// Bits 31:22 of a 4 MB page.
const LARGE_ADDRESS: BitField = BitField::new("address", 22, 10);
/// Bits 39:32 of a 4 MB page, with PSE-36.
const LARGE_ADDRESS_HIGH: BitField = BitField::new("address_high", 13, 8);

const PDE_FIELDS: &[BitField] = &[
    PRESENT,
    WRITABLE,
    USER,
    WRITE_THROUGH,
    CACHE_DISABLE,
    ACCESSED,
    BitField::bit("ignored", 6),
    PAGE_SIZE,
    BitField::new("ignored", 8, 4),
    ADDRESS,
];

const PDE_4M_FIELDS: &[BitField] = &[
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
    LARGE_ADDRESS_HIGH,
    BitField::bit("reserved", 21),
    LARGE_ADDRESS,
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
    ADDRESS,
];

const CR3_FIELDS: &[BitField] = &[
    BitField::new("ignored", 0, 3),
    WRITE_THROUGH,
    CACHE_DISABLE,
    BitField::new("ignored", 5, 7),
    ADDRESS,
];

/// 32-bit entries have no execute-disable bit.
macro_rules! entry32 {
    ($name:ident, $address:expr) => {
        paging_entry!($name, $address);

        impl $name {
            #[inline]
            pub const fn is_execute_disabled(self) -> bool {
                false
            }
        }
    };
}

bit_word!(
    /// The CR3 register with 32-bit paging.
    Cr3_32(u32) = Layout::new("CR3 (32-bit)", 32, CR3_FIELDS)
);

bit_word!(
    /// 32-bit page-directory entry that references a page table.
    Pde32(u32) = Layout::new("PDE (32-bit)", 32, PDE_FIELDS)
);

bit_word!(
    /// 32-bit page-directory entry that maps a 4 MB page.
    Pde4M(u32) = Layout::new("PDE (4MB)", 32, PDE_4M_FIELDS)
);

bit_word!(
    /// 32-bit page-table entry, maps a 4 KB page.
    Pte32(u32) = Layout::new("PTE (32-bit)", 32, PTE_FIELDS)
);

entry32!(Pde32, ADDRESS);
entry32!(Pde4M, LARGE_ADDRESS);
entry32!(Pte32, ADDRESS);
paging_page!(Pde4M, PAT_LARGE, true);
paging_page!(Pte32, PAT_4K, false);

impl Cr3_32 {
    pub fn new(pd_frame: u64, write_through: bool, cache_disable: bool) -> Result<Self> {
        let raw = ADDRESS.pack(pd_frame)?
            | WRITE_THROUGH.pack(write_through as u64)?
            | CACHE_DISABLE.pack(cache_disable as u64)?;
        Ok(Self(raw as u32))
    }

    #[inline]
    pub const fn pd_frame(self) -> u64 {
        self.field(ADDRESS)
    }

    /// Physical address of the page directory.
    #[inline]
    pub const fn root(self) -> GuestPhysAddr {
        GuestPhysAddr::new(self.pd_frame() << PAGE_SHIFT)
    }

    #[inline]
    pub const fn write_through(self) -> bool {
        self.flag(WRITE_THROUGH)
    }

    #[inline]
    pub const fn cache_disable(self) -> bool {
        self.flag(CACHE_DISABLE)
    }
}

impl Pde32 {
    pub fn new(frame: u64, flags: u32) -> Result<Self> {
        build(&Self::LAYOUT, ADDRESS, frame, flags as u64).map(|raw| Self(raw as u32))
    }

    /// Physical address of the page table.
    #[inline]
    pub const fn next_table(self) -> GuestPhysAddr {
        GuestPhysAddr::new(self.frame_number() << PAGE_SHIFT)
    }

    /// Whether the page-size bit is set. It selects a 4 MB page only when CR4.PSE is set, see
    /// [`Pde32Entry`].
    #[inline]
    pub const fn is_large_page(self) -> bool {
        self.flag(PAGE_SIZE)
    }
}

impl Pde4M {
    /// Builds an entry mapping the 4 MB page at `base`.
    pub fn new(base: u64, flags: u32) -> Result<Self> {
        if base & (LARGE_PAGE_SIZE - 1) != 0 {
            return Err(ArchError::FieldOverflow {
                field: "address",
                value: base,
                width: 40,
            });
        }
        let raw = LARGE_ADDRESS.pack((base >> 22) & LARGE_ADDRESS.max())?
            | LARGE_ADDRESS_HIGH.pack(base >> 32)?
            | PAGE_SIZE.mask()
            | flags as u64;
        ArchError::check_reserved(Self::LAYOUT.name(), raw, raw & Self::LAYOUT.reserved_mask())?;
        Ok(Self(raw as u32))
    }

    /// Physical address of the page, bits 39:32 come from the PSE-36 field.
    #[inline]
    pub const fn page_base(self) -> GuestPhysAddr {
        GuestPhysAddr::new(
            (self.field(LARGE_ADDRESS) << 22) | (self.field(LARGE_ADDRESS_HIGH) << 32),
        )
    }

    /// Frame number in units of 4 MB, including the PSE-36 bits.
    #[inline]
    pub const fn large_frame_number(self) -> u64 {
        self.page_base().as_u64() >> 22
    }

    fn check(raw: u32, config: &TranslationConfig) -> Result<Self> {
        let word = raw as u64;
        ArchError::check_reserved(Self::LAYOUT.name(), word, word & Self::LAYOUT.reserved_mask())?;
        // Address bits 39:32 beyond the PSE-36 width are reserved.
        let width = config.pse36_width();
        ArchError::check_reserved(
            Self::LAYOUT.name(),
            word,
            LARGE_ADDRESS_HIGH.set_bits_from(word, LARGE_ADDRESS_HIGH.offset() + width - 32),
        )?;
        Ok(Self(raw))
    }
}

impl Pte32 {
    pub fn new(frame: u64, flags: u32) -> Result<Self> {
        build(&Self::LAYOUT, ADDRESS, frame, flags as u64).map(|raw| Self(raw as u32))
    }

    /// Physical address of the page.
    #[inline]
    pub const fn page_base(self) -> GuestPhysAddr {
        GuestPhysAddr::new(self.frame_number() << PAGE_SHIFT)
    }

    /// Returns `None` if the entry is not present. 32-bit PTEs have no reserved bits.
    pub fn decode(raw: u32) -> Option<Self> {
        if PRESENT.is_set(raw as u64) {
            Some(Self(raw))
        } else {
            None
        }
    }
}

/// Size of the pages mapped by [`Pde4M`].
pub const LARGE_PAGE_SIZE: u64 = 1 << 22;

/// A decoded 32-bit page-directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Pde32Entry {
    NotPresent,
    Table(Pde32),
    LargePage(Pde4M),
}

impl Pde32Entry {
    /// Decodes a raw PDE. With CR4.PSE clear the page-size bit is ignored and the entry always
    /// references a page table.
    pub fn decode(raw: u32, config: &TranslationConfig) -> Result<Self> {
        let word = raw as u64;
        if !PRESENT.is_set(word) {
            return Ok(Self::NotPresent);
        }
        if config.pse() && PAGE_SIZE.is_set(word) {
            return Pde4M::check(raw, config).map(Self::LargePage);
        }
        Ok(Self::Table(Pde32(raw)))
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> TranslationConfig {
        TranslationConfig::default()
    }

    #[test]
    fn layouts_are_well_formed() {
        for layout in [Cr3_32::LAYOUT, Pde32::LAYOUT, Pde4M::LAYOUT, Pte32::LAYOUT] {
            assert!(layout.is_well_formed(), "{}", layout.name());
            assert_eq!(layout.bits(), 32);
        }
    }

    #[test]
    fn table_and_page() {
        let pde = match Pde32Entry::decode(0x0040_3007, &config()).unwrap() {
            Pde32Entry::Table(pde) => pde,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(pde.next_table(), GuestPhysAddr::new(0x0040_3000));
        assert!(pde.is_user_accessible() && pde.is_writable());
        assert!(!pde.is_large_page());

        let pte = Pte32::decode(0x1234_5061).unwrap();
        assert_eq!(pte.frame_number(), 0x12345);
        assert_eq!(pte.page_base(), GuestPhysAddr::new(0x1234_5000));
        assert!(pte.is_dirty() && pte.is_accessed() && !pte.is_writable());
        assert!(pte.rights().execute_supervisor);
        assert_eq!(Pte32::decode(0x1234_5000), None);
        assert_eq!(Pte32::new(0x12345, 0x61).unwrap().raw(), 0x1234_5061);
    }

    #[test]
    fn large_pages() {
        let cfg = config();
        let page = match Pde32Entry::decode(0x0cc0_0083, &cfg).unwrap() {
            Pde32Entry::LargePage(page) => page,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(page.page_base(), GuestPhysAddr::new(0x0cc0_0000));
        assert_eq!(page.large_frame_number(), 0x33);

        // PSE clear: the page-size bit is ignored.
        assert!(matches!(
            Pde32Entry::decode(0x0cc0_0083, &cfg.with_pse(false)),
            Ok(Pde32Entry::Table(_))
        ));

        // Bit 21 is reserved.
        assert_eq!(
            Pde32Entry::decode(0x0ce0_0083, &cfg),
            Err(ArchError::MalformedEntry {
                entry: "PDE (4MB)",
                raw: 0x0ce0_0083,
                bit: 21
            })
        );
    }

    #[test]
    fn pse36() {
        let page = Pde4M::new(0x12_0040_0000, 0x3).unwrap();
        assert_eq!(page.raw(), 0x0042_4083);
        assert_eq!(page.page_base(), GuestPhysAddr::new(0x12_0040_0000));

        let cfg = config().with_max_phys_addr(36).unwrap();
        assert_eq!(
            Pde32Entry::decode(page.raw(), &cfg),
            Err(ArchError::MalformedEntry {
                entry: "PDE (4MB)",
                raw: 0x0042_4083,
                bit: 17
            })
        );
        assert!(Pde32Entry::decode(page.raw(), &config()).is_ok());
        assert!(Pde32Entry::decode(page.raw(), &config().with_pse36(false)).is_err());
        assert!(Pde4M::new(0x1000, 0x3).is_err());
    }

    #[test]
    fn cr3() {
        let cr3 = Cr3_32::new(0x403, false, true).unwrap();
        assert_eq!(cr3.raw(), 0x0040_3010);
        assert_eq!(cr3.root(), GuestPhysAddr::new(0x0040_3000));
        assert!(cr3.cache_disable());
        assert!(Cr3_32::new(1 << 20, false, false).is_err());
    }
}
