//! Extended Page Table
//!
//! Typed views over the six kinds of EPT paging-structure entries and over the EPT pointer. Entries
//! are plain values decoded from a raw `u64`, they never own or reference the paging structures.
//!
//! See Intel SDM Vol. 3C Section 29.3.

use utils::{
    bit_word, ArchError, BitField, EptMisconfig, HostPhysAddr, Layout, Result, Unsupported,
    PAGE_SHIFT,
};

use crate::bitmaps::{EptCapability, EptEntryFlags, SecondaryControls};
use crate::memtype::MemoryType;

pub const GIANT_PAGE_SIZE: u64 = 1 << 30;
pub const HUGE_PAGE_SIZE: u64 = 1 << 21;
pub const PAGE_SIZE: u64 = 1 << 12;

/// Number of entries per EPT paging structure.
pub const NB_ENTRIES: usize = 512;

// ———————————————————————————— Configuration ————————————————————————————— //

/// What the processor and the VMM enable, which changes how EPT entries decode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EptConfig {
    /// Capabilities from IA32_VMX_EPT_VPID_CAP.
    pub capabilities: EptCapability,
    /// Secondary processor-based VM-execution controls of the VMCS.
    pub controls: SecondaryControls,
    /// Physical-address width (MAXPHYADDR).
    pub max_phys_addr: u8,
}

impl EptConfig {
    pub const fn new(capabilities: EptCapability, controls: SecondaryControls, max_phys_addr: u8) -> Self {
        Self {
            capabilities,
            controls,
            max_phys_addr,
        }
    }

    /// Whether bit 10 of EPT entries controls user-mode execution.
    #[inline]
    pub fn mode_based_execute(&self) -> bool {
        self.controls.contains(SecondaryControls::MODE_BASED_EPT)
    }
}

impl Default for EptConfig {
    fn default() -> Self {
        Self {
            capabilities: EptCapability::EXECUTE_ONLY
                | EptCapability::PAGE_WALK_4
                | EptCapability::UNCACHEABLE
                | EptCapability::WRITE_BACK
                | EptCapability::PAGE_2MB
                | EptCapability::PAGE_1GB
                | EptCapability::ACCESS_DIRTY,
            controls: SecondaryControls::ENABLE_EPT,
            max_phys_addr: 48,
        }
    }
}

// ———————————————————————————————— Rights ————————————————————————————————— //

/// The access rights granted by one or several EPT entries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EptRights {
    pub read: bool,
    pub write: bool,
    /// Bit 2, execution of supervisor-mode linear addresses. Governs all fetches when mode-based
    /// execute control is off.
    pub supervisor_execute: bool,
    /// Bit 10, execution of user-mode linear addresses under mode-based execute control.
    pub user_execute: bool,
}

impl EptRights {
    pub const ALL: EptRights = EptRights {
        read: true,
        write: true,
        supervisor_execute: true,
        user_execute: true,
    };

    /// Whether instruction fetches are allowed, for a fetch from a user-mode linear address if
    /// `user_mode`.
    pub const fn execute(self, mode_based_execute: bool, user_mode: bool) -> bool {
        if mode_based_execute && user_mode {
            self.user_execute
        } else {
            self.supervisor_execute
        }
    }

    /// Rights granted by two successive levels.
    pub const fn intersect(self, other: EptRights) -> EptRights {
        EptRights {
            read: self.read && other.read,
            write: self.write && other.write,
            supervisor_execute: self.supervisor_execute && other.supervisor_execute,
            user_execute: self.user_execute && other.user_execute,
        }
    }
}

// ———————————————————————————————— Fields ————————————————————————————————— //

const READ: BitField = BitField::bit("read", 0);
const WRITE: BitField = BitField::bit("write", 1);
const EXECUTE: BitField = BitField::bit("execute", 2);
const MEMORY_TYPE: BitField = BitField::new("memory_type", 3, 3);
const IGNORE_PAT: BitField = BitField::bit("ignore_pat", 6);
const LARGE_PAGE: BitField = BitField::bit("page_size", 7);
const ACCESSED: BitField = BitField::bit("accessed", 8);
const DIRTY: BitField = BitField::bit("dirty", 9);
const USER_EXECUTE: BitField = BitField::bit("user_execute", 10);
const TABLE_ADDRESS: BitField = BitField::new("address", 12, 40);
const HUGE_ADDRESS: BitField = BitField::new("address", 21, 31);
const GIANT_ADDRESS: BitField = BitField::new("address", 30, 22);
const VERIFY_GUEST_PAGING: BitField = BitField::bit("verify_guest_paging", 57);
const PAGING_WRITE_ACCESS: BitField = BitField::bit("paging_write_access", 58);
const SHADOW_STACK: BitField = BitField::bit("supervisor_shadow_stack", 60);
const SUB_PAGE_WRITE: BitField = BitField::bit("sub_page_write", 61);
const SUPPRESS_VE: BitField = BitField::bit("suppress_ve", 63);

const PML4E_FIELDS: &[BitField] = &[
    READ,
    WRITE,
    EXECUTE,
    // Bit 7 is the page-size bit at lower levels, a PML4E can not map a page.
    BitField::new("reserved", 3, 5),
    ACCESSED,
    BitField::bit("ignored", 9),
    USER_EXECUTE,
    BitField::bit("ignored", 11),
    TABLE_ADDRESS,
    BitField::new("ignored", 52, 12),
];

const TABLE_FIELDS: &[BitField] = &[
    READ,
    WRITE,
    EXECUTE,
    BitField::new("reserved", 3, 4),
    LARGE_PAGE,
    ACCESSED,
    BitField::bit("ignored", 9),
    USER_EXECUTE,
    BitField::bit("ignored", 11),
    TABLE_ADDRESS,
    BitField::new("ignored", 52, 12),
];

const GIANT_FIELDS: &[BitField] = &[
    READ,
    WRITE,
    EXECUTE,
    MEMORY_TYPE,
    IGNORE_PAT,
    LARGE_PAGE,
    ACCESSED,
    DIRTY,
    USER_EXECUTE,
    BitField::bit("ignored", 11),
    BitField::new("reserved", 12, 18),
    GIANT_ADDRESS,
    BitField::new("ignored", 52, 5),
    VERIFY_GUEST_PAGING,
    PAGING_WRITE_ACCESS,
    BitField::bit("ignored", 59),
    SHADOW_STACK,
    BitField::new("ignored", 61, 2),
    SUPPRESS_VE,
];

const HUGE_FIELDS: &[BitField] = &[
    READ,
    WRITE,
    EXECUTE,
    MEMORY_TYPE,
    IGNORE_PAT,
    LARGE_PAGE,
    ACCESSED,
    DIRTY,
    USER_EXECUTE,
    BitField::bit("ignored", 11),
    BitField::new("reserved", 12, 9),
    HUGE_ADDRESS,
    BitField::new("ignored", 52, 5),
    VERIFY_GUEST_PAGING,
    PAGING_WRITE_ACCESS,
    BitField::bit("ignored", 59),
    SHADOW_STACK,
    BitField::new("ignored", 61, 2),
    SUPPRESS_VE,
];

const PTE_FIELDS: &[BitField] = &[
    READ,
    WRITE,
    EXECUTE,
    MEMORY_TYPE,
    IGNORE_PAT,
    BitField::bit("ignored", 7),
    ACCESSED,
    DIRTY,
    USER_EXECUTE,
    BitField::bit("ignored", 11),
    TABLE_ADDRESS,
    BitField::new("ignored", 52, 5),
    VERIFY_GUEST_PAGING,
    PAGING_WRITE_ACCESS,
    BitField::bit("ignored", 59),
    SHADOW_STACK,
    SUB_PAGE_WRITE,
    BitField::bit("ignored", 62),
    SUPPRESS_VE,
];

const EPTP_MEMORY_TYPE: BitField = BitField::new("memory_type", 0, 3);
const EPTP_WALK_LENGTH: BitField = BitField::new("walk_length", 3, 3);
const EPTP_ACCESSED_DIRTY: BitField = BitField::bit("accessed_dirty", 6);
const EPTP_SHADOW_STACK: BitField = BitField::bit("supervisor_shadow_stack", 7);

const EPTP_FIELDS: &[BitField] = &[
    EPTP_MEMORY_TYPE,
    EPTP_WALK_LENGTH,
    EPTP_ACCESSED_DIRTY,
    EPTP_SHADOW_STACK,
    BitField::new("reserved", 8, 4),
    TABLE_ADDRESS,
    BitField::new("reserved", 52, 12),
];

// ————————————————————————————— Entry Checks —————————————————————————————— //

fn misconfigured(raw: u64, reason: EptMisconfig) -> ArchError {
    log::warn!("EPT entry {:#x} misconfigured: {:?}", raw, reason);
    ArchError::MisconfiguredEptEntry { raw, reason }
}

/// Whether the entry is present, bit 10 counts when mode-based execute control is on.
fn is_present(raw: u64, config: &EptConfig) -> bool {
    raw & 0b111 != 0 || (config.mode_based_execute() && USER_EXECUTE.is_set(raw))
}

/// Checks the conditions shared by all levels of a present entry: permission combinations,
/// reserved bits and address bits beyond MAXPHYADDR.
fn check_entry(layout: &Layout, address: BitField, raw: u64, config: &EptConfig) -> Result<()> {
    let read = READ.is_set(raw);
    let write = WRITE.is_set(raw);
    let execute =
        EXECUTE.is_set(raw) || (config.mode_based_execute() && USER_EXECUTE.is_set(raw));
    if write && !read {
        return Err(misconfigured(raw, EptMisconfig::WriteWithoutRead));
    }
    if execute
        && !read
        && !config
            .capabilities
            .contains(EptCapability::EXECUTE_ONLY)
    {
        return Err(misconfigured(raw, EptMisconfig::ExecuteOnlyUnsupported));
    }
    ArchError::check_reserved(layout.name(), raw, raw & layout.reserved_mask())?;
    ArchError::check_reserved(
        layout.name(),
        raw,
        address.set_bits_from(raw, config.max_phys_addr as u32),
    )
}

fn check_memory_type(raw: u64) -> Result<MemoryType> {
    let tpe = MEMORY_TYPE.get(raw) as u8;
    MemoryType::from_raw(tpe).ok_or_else(|| misconfigured(raw, EptMisconfig::ReservedMemoryType(tpe)))
}

/// Builds an entry from a frame number and flags, rejecting flags that are reserved at that
/// level.
fn build(layout: &Layout, address: BitField, frame: u64, flags: EptEntryFlags) -> Result<u64> {
    let raw = address.pack(frame)? | flags.bits();
    ArchError::check_reserved(layout.name(), raw, raw & layout.reserved_mask())?;
    Ok(raw)
}

/// Accessors shared by all EPT entries.
macro_rules! ept_entry_common {
    ($name:ident) => {
        impl $name {
            /// Whether any of the read, write and execute bits is set, or bit 10 under
            /// mode-based execute control.
            #[inline]
            pub fn is_present(self, config: &EptConfig) -> bool {
                is_present(self.0, config)
            }

            #[inline]
            pub const fn is_readable(self) -> bool {
                self.flag(READ)
            }

            #[inline]
            pub const fn is_writable(self) -> bool {
                self.flag(WRITE)
            }

            /// Bit 2: execute access, for supervisor-mode linear addresses only when mode-based
            /// execute control is on.
            #[inline]
            pub const fn is_executable(self) -> bool {
                self.flag(EXECUTE)
            }

            /// Bit 10: execute access for user-mode linear addresses, under mode-based execute
            /// control.
            #[inline]
            pub const fn is_user_executable(self) -> bool {
                self.flag(USER_EXECUTE)
            }

            /// Accessed flag, meaningful when the EPTP enables accessed and dirty flags.
            #[inline]
            pub const fn is_accessed(self) -> bool {
                self.flag(ACCESSED)
            }

            pub const fn rights(self) -> EptRights {
                EptRights {
                    read: self.is_readable(),
                    write: self.is_writable(),
                    supervisor_execute: self.is_executable(),
                    user_execute: self.is_user_executable(),
                }
            }

            /// The single-bit flags of the entry.
            pub fn flags(self) -> EptEntryFlags {
                EptEntryFlags::from_bits_truncate(self.0)
            }

            /// Returns the number of the frame mapped, or referenced, by this entry.
            #[inline]
            pub const fn frame_number(self) -> u64 {
                self.field(Self::ADDRESS)
            }
        }
    };
}

/// Accessors of entries that reference another paging structure.
macro_rules! ept_table_entry {
    ($name:ident) => {
        ept_entry_common!($name);

        impl $name {
            const ADDRESS: BitField = TABLE_ADDRESS;

            /// Builds an entry referencing the table in frame `frame`. [`EptEntryFlags::PAGE`] is
            /// rejected, large pages have their own entry types.
            pub fn new(frame: u64, flags: EptEntryFlags) -> Result<Self> {
                let bits = flags.bits();
                ArchError::check_reserved(Self::LAYOUT.name(), bits, bits & LARGE_PAGE.mask())?;
                build(&Self::LAYOUT, Self::ADDRESS, frame, flags).map(Self)
            }

            /// Physical address of the next paging structure.
            #[inline]
            pub const fn next_table(self) -> HostPhysAddr {
                HostPhysAddr::new(self.frame_number() << PAGE_SHIFT)
            }

            /// Validates a raw entry. Returns `None` if the entry is not present.
            ///
            /// An entry with the page-size bit set maps a page and is reported as malformed,
            /// decode it through the level enum instead.
            pub fn decode(raw: u64, config: &EptConfig) -> Result<Option<Self>> {
                if !is_present(raw, config) {
                    return Ok(None);
                }
                ArchError::check_reserved(Self::LAYOUT.name(), raw, raw & LARGE_PAGE.mask())?;
                check_entry(&Self::LAYOUT, Self::ADDRESS, raw, config)?;
                Ok(Some(Self(raw)))
            }
        }
    };
}

/// Accessors of entries that map a page.
macro_rules! ept_page_entry {
    ($name:ident, $address:expr, $size:expr, $large:expr) => {
        ept_entry_common!($name);

        impl $name {
            const ADDRESS: BitField = $address;
            const LARGE: bool = $large;

            /// Size of the page mapped by this entry.
            pub const PAGE_SIZE: u64 = $size;

            /// Builds an entry mapping the page in frame `frame` (in units of the page size).
            pub fn new(frame: u64, flags: EptEntryFlags, memory_type: MemoryType) -> Result<Self> {
                let mut raw = build(&Self::LAYOUT, Self::ADDRESS, frame, flags)?;
                if Self::LARGE {
                    raw |= LARGE_PAGE.mask();
                }
                Ok(Self(raw | MEMORY_TYPE.pack(memory_type.raw() as u64)?))
            }

            /// Whether the entry maps a page larger than 4 KB.
            #[inline]
            pub const fn is_large_page(self) -> bool {
                Self::LARGE
            }

            /// Physical address of the page.
            #[inline]
            pub const fn page_base(self) -> HostPhysAddr {
                HostPhysAddr::new(self.0 & Self::ADDRESS.mask())
            }

            /// The raw memory-type field.
            #[inline]
            pub const fn memory_type_raw(self) -> u8 {
                self.field(MEMORY_TYPE) as u8
            }

            /// The memory type of the page, reserved encodings are a misconfiguration.
            pub fn memory_type(self) -> Result<MemoryType> {
                check_memory_type(self.0)
            }

            /// Whether the memory type is used without combining it with the PAT.
            #[inline]
            pub const fn ignores_pat(self) -> bool {
                self.flag(IGNORE_PAT)
            }

            /// Dirty flag, meaningful when the EPTP enables accessed and dirty flags.
            #[inline]
            pub const fn is_dirty(self) -> bool {
                self.flag(DIRTY)
            }

            #[inline]
            pub const fn suppresses_ve(self) -> bool {
                self.flag(SUPPRESS_VE)
            }

            #[inline]
            pub const fn verifies_guest_paging(self) -> bool {
                self.flag(VERIFY_GUEST_PAGING)
            }

            #[inline]
            pub const fn allows_paging_write(self) -> bool {
                self.flag(PAGING_WRITE_ACCESS)
            }

            #[inline]
            pub const fn is_supervisor_shadow_stack(self) -> bool {
                self.flag(SHADOW_STACK)
            }

            fn check(raw: u64, config: &EptConfig) -> Result<Self> {
                check_entry(&Self::LAYOUT, Self::ADDRESS, raw, config)?;
                check_memory_type(raw)?;
                Ok(Self(raw))
            }
        }
    };
}

// ———————————————————————————————— Entries ———————————————————————————————— //

bit_word!(
    /// EPT PML4 entry, references an EPT page-directory-pointer table.
    EptPml4e(u64) = Layout::new("EPT PML4E", 64, PML4E_FIELDS)
);

bit_word!(
    /// EPT page-directory-pointer-table entry that references an EPT page directory.
    EptPdpte(u64) = Layout::new("EPT PDPTE", 64, TABLE_FIELDS)
);

bit_word!(
    /// EPT page-directory-pointer-table entry that maps a 1 GB page.
    EptPdpte1G(u64) = Layout::new("EPT PDPTE (1GB)", 64, GIANT_FIELDS)
);

bit_word!(
    /// EPT page-directory entry that references an EPT page table.
    EptPde(u64) = Layout::new("EPT PDE", 64, TABLE_FIELDS)
);

bit_word!(
    /// EPT page-directory entry that maps a 2 MB page.
    EptPde2M(u64) = Layout::new("EPT PDE (2MB)", 64, HUGE_FIELDS)
);

bit_word!(
    /// EPT page-table entry, maps a 4 KB page.
    EptPte(u64) = Layout::new("EPT PTE", 64, PTE_FIELDS)
);

ept_table_entry!(EptPml4e);
ept_table_entry!(EptPdpte);
ept_table_entry!(EptPde);
ept_page_entry!(EptPdpte1G, GIANT_ADDRESS, GIANT_PAGE_SIZE, true);
ept_page_entry!(EptPde2M, HUGE_ADDRESS, HUGE_PAGE_SIZE, true);
ept_page_entry!(EptPte, TABLE_ADDRESS, PAGE_SIZE, false);

impl EptPte {
    /// Whether writes are allowed with sub-page granularity.
    #[inline]
    pub const fn has_sub_page_write(self) -> bool {
        self.flag(SUB_PAGE_WRITE)
    }

    /// Validates a raw EPT PTE. Returns `None` if the entry is not present.
    pub fn decode(raw: u64, config: &EptConfig) -> Result<Option<Self>> {
        if !is_present(raw, config) {
            return Ok(None);
        }
        Self::check(raw, config).map(Some)
    }
}

/// A decoded EPT page-directory-pointer-table entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EptL3 {
    NotPresent,
    Table(EptPdpte),
    GiantPage(EptPdpte1G),
}

/// A decoded EPT page-directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EptL2 {
    NotPresent,
    Table(EptPde),
    HugePage(EptPde2M),
}

impl EptL3 {
    /// Decodes a raw PDPTE, selecting the variant with the page-size bit.
    pub fn decode(raw: u64, config: &EptConfig) -> Result<Self> {
        if !is_present(raw, config) {
            return Ok(Self::NotPresent);
        }
        if !LARGE_PAGE.is_set(raw) {
            return EptPdpte::decode(raw, config).map(|e| e.map_or(Self::NotPresent, Self::Table));
        }
        if !config.capabilities.contains(EptCapability::PAGE_1GB) {
            return Err(ArchError::UnsupportedTranslationMode(Unsupported::GiantPages));
        }
        EptPdpte1G::check(raw, config).map(Self::GiantPage)
    }
}

impl EptL2 {
    /// Decodes a raw PDE, selecting the variant with the page-size bit.
    pub fn decode(raw: u64, config: &EptConfig) -> Result<Self> {
        if !is_present(raw, config) {
            return Ok(Self::NotPresent);
        }
        if !LARGE_PAGE.is_set(raw) {
            return EptPde::decode(raw, config).map(|e| e.map_or(Self::NotPresent, Self::Table));
        }
        if !config.capabilities.contains(EptCapability::PAGE_2MB) {
            return Err(ArchError::UnsupportedTranslationMode(Unsupported::HugePages));
        }
        EptPde2M::check(raw, config).map(Self::HugePage)
    }
}

impl EptPdpte {
    /// Whether the page-size bit is set. Never true for an entry built by `new` or `decode`,
    /// 1 GB mappings decode to [`EptL3::GiantPage`].
    #[inline]
    pub const fn is_large_page(self) -> bool {
        self.flag(LARGE_PAGE)
    }
}

impl EptPde {
    /// Whether the page-size bit is set. Never true for an entry built by `new` or `decode`,
    /// 2 MB mappings decode to [`EptL2::HugePage`].
    #[inline]
    pub const fn is_large_page(self) -> bool {
        self.flag(LARGE_PAGE)
    }
}

// ——————————————————————————————— EPT Pointer ——————————————————————————————— //

bit_word!(
    /// The EPT pointer (EPTP), root of an EPT hierarchy and its configuration.
    ///
    /// Unlike entries, the EPTP settings (memory type of the paging structures, walk length,
    /// accessed and dirty flags) apply to the whole hierarchy.
    ///
    /// See Intel SDM Vol. 3C Section 25.6.11.
    Eptp(u64) = Layout::new("EPTP", 64, EPTP_FIELDS)
);

impl Eptp {
    /// The only supported page-walk length.
    pub const WALK_LENGTH: u8 = 4;

    /// Builds an EPTP for a 4-level hierarchy rooted in frame `pml4_frame`.
    pub fn new(pml4_frame: u64, memory_type: MemoryType, accessed_dirty: bool) -> Result<Self> {
        let raw = TABLE_ADDRESS.pack(pml4_frame)?
            | EPTP_MEMORY_TYPE.pack(memory_type.raw() as u64)?
            | EPTP_WALK_LENGTH.pack(Self::WALK_LENGTH as u64 - 1)?
            | EPTP_ACCESSED_DIRTY.pack(accessed_dirty as u64)?;
        Ok(Self(raw))
    }

    /// Memory type used to access the EPT paging structures, raw.
    #[inline]
    pub const fn memory_type_raw(self) -> u8 {
        self.field(EPTP_MEMORY_TYPE) as u8
    }

    #[inline]
    pub const fn walk_length(self) -> u8 {
        self.field(EPTP_WALK_LENGTH) as u8 + 1
    }

    #[inline]
    pub const fn accessed_dirty_enabled(self) -> bool {
        self.flag(EPTP_ACCESSED_DIRTY)
    }

    #[inline]
    pub const fn supervisor_shadow_stack_enabled(self) -> bool {
        self.flag(EPTP_SHADOW_STACK)
    }

    #[inline]
    pub const fn pml4_frame(self) -> u64 {
        self.field(TABLE_ADDRESS)
    }

    /// Physical address of the EPT PML4 table.
    #[inline]
    pub const fn root(self) -> HostPhysAddr {
        HostPhysAddr::new(self.pml4_frame() << PAGE_SHIFT)
    }

    /// Checks the EPTP against what the processor supports, as VM entry would.
    pub fn validate(self, config: &EptConfig) -> Result<Self> {
        let caps = config.capabilities;
        let memory_type = self.memory_type_raw();
        let type_supported = match MemoryType::from_raw(memory_type) {
            Some(MemoryType::Uncacheable) => caps.contains(EptCapability::UNCACHEABLE),
            Some(MemoryType::WriteBack) => caps.contains(EptCapability::WRITE_BACK),
            _ => false,
        };
        if !type_supported {
            return Err(ArchError::UnsupportedTranslationMode(
                Unsupported::EptpMemoryType(memory_type),
            ));
        }
        let walk_length = self.walk_length();
        if walk_length != Self::WALK_LENGTH || !caps.contains(EptCapability::PAGE_WALK_4) {
            return Err(ArchError::UnsupportedTranslationMode(
                Unsupported::WalkLength(walk_length),
            ));
        }
        if self.accessed_dirty_enabled() && !caps.contains(EptCapability::ACCESS_DIRTY) {
            return Err(ArchError::UnsupportedTranslationMode(
                Unsupported::AccessedDirty,
            ));
        }
        ArchError::check_reserved("EPTP", self.0, self.0 & Self::LAYOUT.reserved_mask())?;
        ArchError::check_reserved(
            "EPTP",
            self.0,
            TABLE_ADDRESS.set_bits_from(self.0, config.max_phys_addr as u32),
        )?;
        Ok(self)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;
    use crate::bitmaps::EPT_RWX;

    const RWX: u64 = 0b111;

    fn config() -> EptConfig {
        EptConfig::default()
    }

    #[test]
    fn layouts_are_well_formed() {
        for layout in [
            EptPml4e::LAYOUT,
            EptPdpte::LAYOUT,
            EptPdpte1G::LAYOUT,
            EptPde::LAYOUT,
            EptPde2M::LAYOUT,
            EptPte::LAYOUT,
            Eptp::LAYOUT,
        ] {
            assert!(layout.is_well_formed(), "{}", layout.name());
            assert_eq!(layout.bits(), 64);
            let total: u32 = layout.fields().iter().map(|f| f.width()).sum();
            assert_eq!(total, 64, "{}", layout.name());
        }
    }

    #[test]
    fn pml4e_large_page_bit_is_malformed() {
        let raw = 0x1000 | RWX | (1 << 7);
        assert_eq!(
            EptPml4e::decode(raw, &config()),
            Err(ArchError::MalformedEntry {
                entry: "EPT PML4E",
                raw,
                bit: 7
            })
        );
    }

    #[test]
    fn table_entries() {
        let entry = EptPml4e::decode(0x0000_0001_2345_6000 | RWX, &config())
            .unwrap()
            .unwrap();
        assert_eq!(entry.frame_number(), 0x1_2345_6);
        assert_eq!(entry.next_table(), HostPhysAddr::new(0x1_2345_6000));
        assert!(entry.is_readable() && entry.is_writable() && entry.is_executable());
        assert!(!entry.is_user_executable());
        assert_eq!(EptPml4e::decode(0x1000, &config()), Ok(None));

        let built = EptPdpte::new(0x42, crate::bitmaps::EPT_TABLE_FLAGS).unwrap();
        assert_eq!(built.raw(), 0x42_000 | 0x407);
        assert!(EptPdpte::new(1 << 40, EptEntryFlags::READ).is_err());
        assert!(EptPdpte::new(1, EptEntryFlags::IGNORE_PAT).is_err());

        let page = EptPde2M::new(3, EPT_RWX, MemoryType::WriteBack).unwrap();
        assert_eq!(page.raw(), 0x60_0000 | 0x80 | (6 << 3) | 0b111);
        assert!(page.is_large_page());
        assert_eq!(EptL2::decode(page.raw(), &config()), Ok(EptL2::HugePage(page)));
    }

    #[test]
    fn table_entries_reject_page_size() {
        let raw = 0x4000_0000 | RWX | (6 << 3) | (1 << 7);
        assert_eq!(
            EptPdpte::decode(raw, &config()),
            Err(ArchError::MalformedEntry {
                entry: EptPdpte::LAYOUT.name(),
                raw,
                bit: 7
            })
        );
        assert!(matches!(EptL3::decode(raw, &config()), Ok(EptL3::GiantPage(_))));

        let raw = 0x20_0000 | RWX | (6 << 3) | (1 << 7);
        assert!(matches!(
            EptPde::decode(raw, &config()),
            Err(ArchError::MalformedEntry { bit: 7, .. })
        ));
        assert!(matches!(EptL2::decode(raw, &config()), Ok(EptL2::HugePage(_))));

        assert!(EptPdpte::new(1, EPT_RWX | EptEntryFlags::PAGE).is_err());
        assert!(EptPde::new(1, EPT_RWX | EptEntryFlags::PAGE).is_err());
    }

    #[test]
    fn decode_levels() {
        let cfg = config();
        match EptL3::decode(0x4000_0000 | RWX | (6 << 3) | (1 << 7), &cfg).unwrap() {
            EptL3::GiantPage(page) => {
                assert_eq!(page.frame_number(), 1);
                assert_eq!(page.page_base(), HostPhysAddr::new(0x4000_0000));
                assert_eq!(page.memory_type(), Ok(MemoryType::WriteBack));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            EptL3::decode(0x5000 | RWX, &cfg),
            Ok(EptL3::Table(_))
        ));
        assert_eq!(EptL2::decode(0, &cfg), Ok(EptL2::NotPresent));

        // Low address bits of a 2MB page are reserved.
        let raw = 0x20_1000 | RWX | (6 << 3) | (1 << 7);
        assert_eq!(
            EptL2::decode(raw, &cfg),
            Err(ArchError::MalformedEntry {
                entry: "EPT PDE (2MB)",
                raw,
                bit: 12
            })
        );
    }

    #[test]
    fn reserved_memory_type_on_2mb_page() {
        for tpe in [2u64, 3] {
            let raw = 0x20_0000 | RWX | (tpe << 3) | (1 << 7);
            assert_eq!(
                EptL2::decode(raw, &config()),
                Err(ArchError::MisconfiguredEptEntry {
                    raw,
                    reason: EptMisconfig::ReservedMemoryType(tpe as u8)
                })
            );
            let entry = EptPde2M::from_raw(raw);
            assert_eq!(entry.memory_type_raw(), tpe as u8);
            assert!(entry.memory_type().is_err());
        }
    }

    #[test]
    fn permission_misconfigurations() {
        let mut cfg = config();
        assert_eq!(
            EptPte::decode(0x1000 | 0b010 | (6 << 3), &cfg),
            Err(ArchError::MisconfiguredEptEntry {
                raw: 0x1000 | 0b010 | (6 << 3),
                reason: EptMisconfig::WriteWithoutRead
            })
        );
        assert!(EptPte::decode(0x1000 | 0b100 | (6 << 3), &cfg).is_ok());
        cfg.capabilities.remove(EptCapability::EXECUTE_ONLY);
        assert_eq!(
            EptPte::decode(0x1000 | 0b100 | (6 << 3), &cfg),
            Err(ArchError::MisconfiguredEptEntry {
                raw: 0x1000 | 0b100 | (6 << 3),
                reason: EptMisconfig::ExecuteOnlyUnsupported
            })
        );
    }

    #[test]
    fn mode_based_execute() {
        let raw = 0x1000 | (1 << 10) | 0b001 | (6 << 3);
        let pte = EptPte::decode(raw, &config()).unwrap().unwrap();
        let rights = pte.rights();
        assert!(!rights.execute(false, true));
        assert!(!rights.execute(false, false));
        assert!(rights.execute(true, true));
        assert!(!rights.execute(true, false));

        // Bit 10 alone makes the entry present only under mode-based execute control.
        let user_only = 0x1000 | (1 << 10) | (6 << 3);
        assert_eq!(EptPte::decode(user_only, &config()), Ok(None));
        let mut cfg = config();
        cfg.controls.insert(SecondaryControls::MODE_BASED_EPT);
        let pte = EptPte::decode(user_only, &cfg).unwrap().unwrap();
        assert!(pte.is_present(&cfg));
        assert!(!pte.is_present(&config()));
        assert!(EptPte::decode(raw, &config()).unwrap().unwrap().is_present(&config()));
    }

    #[test]
    fn max_phys_addr() {
        let mut cfg = config();
        cfg.max_phys_addr = 39;
        let raw = (1 << 40) | RWX | (6 << 3);
        assert_eq!(
            EptPte::decode(raw, &cfg),
            Err(ArchError::MalformedEntry {
                entry: "EPT PTE",
                raw,
                bit: 40
            })
        );
        cfg.max_phys_addr = 52;
        assert!(EptPte::decode(raw, &cfg).is_ok());
    }

    #[test]
    fn unsupported_page_sizes() {
        let mut cfg = config();
        cfg.capabilities.remove(EptCapability::PAGE_1GB | EptCapability::PAGE_2MB);
        assert_eq!(
            EptL3::decode(RWX | (1 << 7), &cfg),
            Err(ArchError::UnsupportedTranslationMode(Unsupported::GiantPages))
        );
        assert_eq!(
            EptL2::decode(RWX | (1 << 7), &cfg),
            Err(ArchError::UnsupportedTranslationMode(Unsupported::HugePages))
        );
    }

    #[test]
    fn eptp() {
        let cfg = config();
        let eptp = Eptp::new(0x1234, MemoryType::WriteBack, true).unwrap();
        assert_eq!(eptp.raw(), 0x123_4000 | 6 | (3 << 3) | (1 << 6));
        assert_eq!(eptp.walk_length(), 4);
        assert!(eptp.accessed_dirty_enabled());
        assert_eq!(eptp.root(), HostPhysAddr::new(0x123_4000));
        assert_eq!(eptp.validate(&cfg), Ok(eptp));

        let wc = Eptp::new(0x1234, MemoryType::WriteCombining, false).unwrap();
        assert_eq!(
            wc.validate(&cfg),
            Err(ArchError::UnsupportedTranslationMode(
                Unsupported::EptpMemoryType(1)
            ))
        );
        let five_levels = Eptp::from_raw((eptp.raw() & !(0b111 << 3)) | (4 << 3));
        assert_eq!(
            five_levels.validate(&cfg),
            Err(ArchError::UnsupportedTranslationMode(Unsupported::WalkLength(5)))
        );
        let reserved = Eptp::from_raw(eptp.raw() | (1 << 9));
        assert!(matches!(
            reserved.validate(&cfg),
            Err(ArchError::MalformedEntry { bit: 9, .. })
        ));

        let mut no_ad = cfg;
        no_ad.capabilities.remove(EptCapability::ACCESS_DIRTY);
        assert_eq!(
            eptp.validate(&no_ad),
            Err(ArchError::UnsupportedTranslationMode(Unsupported::AccessedDirty))
        );
    }
}
