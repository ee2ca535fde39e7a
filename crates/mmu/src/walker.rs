//! Page-table walker
//!
//! Address decomposition and composition, and the walk translating an address through one of
//! the hierarchies. The paging structures are never owned: each entry on the walk is requested
//! from a [`Walker`], which reads it out of a caller-provided snapshot.

use utils::{ArchError, BitField, GuestVirtAddr, Result, Unsupported, MAX_PHYS_ADDR_BITS, PAGE_SHIFT};
use vmx::ept::{EptL2, EptL3, EptPml4e, EptPte};
use vmx::{memtype, Eptp, MemoryType, Pat, PatIndex};

use crate::access::{Access, AccessKind, AccessRights};
use crate::config::{TranslationConfig, TranslationMode};
use crate::paging32::{Cr3_32, Pde32Entry, Pte32};
use crate::paging64::{Cr3, L2Entry, L3Entry, Pml4e, Pte};

// —————————————————————————————— Page Levels ——————————————————————————————— //

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    L4,
    L3,
    L2,
    L1,
}

impl Level {
    /// Returns the next level (i.e. the level of pages pointed by the entries of the current
    /// level)
    pub fn next(self) -> Option<Self> {
        match self {
            Level::L4 => Some(Level::L3),
            Level::L3 => Some(Level::L2),
            Level::L2 => Some(Level::L1),
            Level::L1 => None,
        }
    }

    const fn depth(self) -> u32 {
        match self {
            Level::L4 => 3,
            Level::L3 => 2,
            Level::L2 => 1,
            Level::L1 => 0,
        }
    }

    /// Position of this level's index within the address.
    pub const fn index_shift(self, mode: TranslationMode) -> u32 {
        PAGE_SHIFT + self.depth() * mode.index_width()
    }

    /// Returns the size of the memory region controlled by each entry of this level.
    pub const fn area_size(self, mode: TranslationMode) -> u64 {
        1 << self.index_shift(mode)
    }

    /// Mask keeping the address bits above the region controlled by an entry of this level.
    pub const fn mask(self, mode: TranslationMode) -> u64 {
        !(self.area_size(mode) - 1)
    }
}

/// Sizes of the pages a translation can end on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSize {
    Size4K,
    Size2M,
    /// 32-bit paging only.
    Size4M,
    Size1G,
}

impl PageSize {
    pub const fn shift(self) -> u32 {
        match self {
            PageSize::Size4K => 12,
            PageSize::Size2M => 21,
            PageSize::Size4M => 22,
            PageSize::Size1G => 30,
        }
    }

    pub const fn bytes(self) -> u64 {
        1 << self.shift()
    }

    /// Size of the pages mapped at `level`, if the mode has pages there.
    pub fn at(level: Level, mode: TranslationMode) -> Result<Self> {
        match (mode, level) {
            (_, Level::L1) => Ok(PageSize::Size4K),
            (TranslationMode::Paging32, Level::L2) => Ok(PageSize::Size4M),
            (TranslationMode::Paging4Level | TranslationMode::Ept, Level::L2) => Ok(PageSize::Size2M),
            (TranslationMode::Paging4Level | TranslationMode::Ept, Level::L3) => Ok(PageSize::Size1G),
            _ => Err(ArchError::UnsupportedTranslationMode(Unsupported::PageSize)),
        }
    }
}

// —————————————————————————— Decomposition —————————————————————————————— //

/// An address split into per-level indices and the offset within a 4 KB page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decomposition {
    mode: TranslationMode,
    address: u64,
    indices: [u16; 4],
}

impl Decomposition {
    pub fn mode(&self) -> TranslationMode {
        self.mode
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// The (level, index) pairs, root first.
    pub fn iter(&self) -> impl Iterator<Item = (Level, u16)> + '_ {
        self.mode
            .levels()
            .iter()
            .zip(self.indices.iter())
            .map(|(level, index)| (*level, *index))
    }

    /// Index selecting the entry at `level`, `None` if the mode has no such level.
    pub fn index(&self, level: Level) -> Option<u16> {
        self.iter().find(|(l, _)| *l == level).map(|(_, index)| index)
    }

    /// Offset within a 4 KB page.
    pub fn offset(&self) -> u64 {
        self.offset_in(PageSize::Size4K)
    }

    /// Offset within the page of size `size` containing the address.
    pub fn offset_in(&self, size: PageSize) -> u64 {
        self.address & (size.bytes() - 1)
    }
}

/// Splits an address into the indices selecting an entry at each level and the page offset.
///
/// 32-bit addresses for 32-bit paging, canonical 48-bit linear addresses for 4-level paging, and
/// guest-physical addresses below 2^48 for EPT.
pub fn decompose(address: u64, mode: TranslationMode) -> Result<Decomposition> {
    let width = mode.address_width();
    let in_range = match mode {
        TranslationMode::Paging4Level => GuestVirtAddr::new(address).is_canonical(width),
        TranslationMode::Paging32 | TranslationMode::Ept => address >> width == 0,
    };
    if !in_range {
        return Err(ArchError::AddressOutOfRange {
            addr: address,
            width,
        });
    }

    let mut indices = [0; 4];
    for (slot, level) in indices.iter_mut().zip(mode.levels()) {
        *slot = utils::bits::extract(address, level.index_shift(mode), mode.index_width()) as u16;
    }
    Ok(Decomposition {
        mode,
        address,
        indices,
    })
}

/// Concatenates a frame number, in units of `size`, and an offset within the page.
pub fn compose(frame_number: u64, offset: u64, size: PageSize) -> Result<u64> {
    let shift = size.shift();
    let offset = BitField::new("offset", 0, shift).pack(offset)?;
    let frame = BitField::new("frame_number", shift, MAX_PHYS_ADDR_BITS - shift).pack(frame_number)?;
    Ok(frame | offset)
}

// ————————————————————————————— Translations —————————————————————————————— //

/// Root of a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Paging32(Cr3_32),
    Paging4Level(Cr3),
    Ept(Eptp),
}

impl Root {
    pub const fn mode(self) -> TranslationMode {
        match self {
            Root::Paging32(_) => TranslationMode::Paging32,
            Root::Paging4Level(_) => TranslationMode::Paging4Level,
            Root::Ept(_) => TranslationMode::Ept,
        }
    }

    /// Validates the root and returns the physical address of the top-level table.
    pub fn table(self, config: &TranslationConfig) -> Result<u64> {
        match self {
            Root::Paging32(cr3) => Ok(cr3.root().as_u64()),
            Root::Paging4Level(cr3) => Ok(cr3.validate(config)?.root().as_u64()),
            Root::Ept(eptp) => Ok(eptp.validate(&config.ept_config())?.root().as_u64()),
        }
    }
}

/// Memory-type information carried by the terminal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryHint {
    /// Paging entries select an IA32_PAT entry.
    Pat(PatIndex),
    /// EPT entries hold a memory type.
    Ept {
        memory_type: MemoryType,
        ignore_pat: bool,
    },
}

/// The result of a successful walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub mode: TranslationMode,
    /// Translated address.
    pub input: u64,
    /// Physical address the input translates to, guest-physical for 32-bit and 4-level paging
    /// of a guest, host-physical for EPT.
    pub output: u64,
    pub page_size: PageSize,
    /// Frame number of the page, in units of the page size.
    pub frame_number: u64,
    /// Rights accumulated over all levels.
    pub rights: AccessRights,
    pub memory: MemoryHint,
    /// Protection key of user-mode pages when CR4.PKE is set.
    pub protection_key: Option<u8>,
    /// CR0.WP at the time of the walk.
    pub write_protect: bool,
}

impl Translation {
    /// Whether the translation allows `access`. Supervisor writes ignore read-only pages when
    /// CR0.WP is clear.
    pub fn permits(&self, access: Access) -> bool {
        if !self.write_protect && !access.user && access.kind == AccessKind::Write {
            return true;
        }
        self.rights.permits(access)
    }

    /// Effective memory type of a translation used on its own. An EPT translation without guest
    /// paging uses WB as its PAT type.
    pub fn memory_type(&self, pat: &Pat, cr0_cd: bool) -> Result<MemoryType> {
        match self.memory {
            MemoryHint::Pat(index) => memtype::resolve(cr0_cd, pat.memory_type(index)?, 0, false, false),
            MemoryHint::Ept {
                memory_type,
                ignore_pat,
            } => memtype::resolve(
                cr0_cd,
                MemoryType::WriteBack,
                memory_type.raw(),
                ignore_pat,
                true,
            ),
        }
    }
}

/// Effective memory type of a guest-linear access translated by guest paging then by EPT.
pub fn nested_memory_type(
    guest: &Translation,
    ept: &Translation,
    pat: &Pat,
    cr0_cd: bool,
) -> Result<MemoryType> {
    match (guest.memory, ept.memory) {
        (
            MemoryHint::Pat(index),
            MemoryHint::Ept {
                memory_type,
                ignore_pat,
            },
        ) => memtype::resolve(
            cr0_cd,
            pat.memory_type(index)?,
            memory_type.raw(),
            ignore_pat,
            true,
        ),
        _ => Err(ArchError::UnsupportedTranslationMode(
            Unsupported::NestedTranslation,
        )),
    }
}

// ————————————————————————————————— Walker ————————————————————————————————— //

/// Where an entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub level: Level,
    /// Physical address of the paging structure.
    pub table: u64,
    pub index: u16,
    /// Physical address of the entry.
    pub addr: u64,
    /// Size of the entry in bytes, 4 or 8.
    pub size: u8,
}

/// An entry visited by a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStep {
    pub location: EntryLocation,
    pub raw: u64,
}

/// How to continue the walk.
pub enum WalkNext {
    /// Continue to the next level.
    Continue,
    /// Abort the walk.
    Abort,
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// The address is mapped.
    Mapped(Translation),
    /// The entry at this level is not present.
    NotPresent(Level),
    /// The callback aborted the walk after visiting the entry at this level.
    Aborted(Level),
}

impl WalkOutcome {
    /// The translation, if the walk reached a page.
    pub fn translation(self) -> Option<Translation> {
        match self {
            WalkOutcome::Mapped(translation) => Some(translation),
            WalkOutcome::NotPresent(_) | WalkOutcome::Aborted(_) => None,
        }
    }
}

/// What an entry says about the rest of the walk.
enum Step {
    NotPresent,
    Table {
        next: u64,
        rights: AccessRights,
    },
    Page {
        base: u64,
        size: PageSize,
        rights: AccessRights,
        memory: MemoryHint,
        protection_key: u8,
    },
}

pub trait Walker {
    /// Returns the root of the hierarchy.
    fn root(&self) -> Root;

    fn config(&self) -> &TranslationConfig;

    /// Reads the raw entry at `entry`.
    fn fetch(&mut self, entry: &EntryLocation) -> Result<u64>;

    /// Walk the paging structures controlling given address' mapping.
    ///
    /// The callback sees every entry before it is decoded and may abort the walk there.
    fn walk<F>(&mut self, address: u64, callback: &mut F) -> Result<WalkOutcome>
    where
        F: FnMut(&WalkStep) -> WalkNext,
    {
        let root = self.root();
        let config = *self.config();
        let mode = root.mode();
        let decomposition = decompose(address, mode)?;
        let mut table = root.table(&config)?;
        let mut rights = AccessRights::ALL;

        for (level, index) in decomposition.iter() {
            let location = EntryLocation {
                level,
                table,
                index,
                addr: table + index as u64 * mode.entry_size(),
                size: mode.entry_size() as u8,
            };
            let raw = self.fetch(&location)?;
            log::trace!("{:?} {:?}[{}] @ {:#x} = {:#x}", mode, level, index, location.addr, raw);
            if let WalkNext::Abort = callback(&WalkStep { location, raw }) {
                log::debug!("{:#x}: walk aborted at {:?}", address, level);
                return Ok(WalkOutcome::Aborted(level));
            }

            let step = match mode {
                TranslationMode::Paging32 => step_32(level, raw as u32, &config)?,
                TranslationMode::Paging4Level => step_64(level, raw, &config)?,
                TranslationMode::Ept => step_ept(level, raw, &config)?,
            };
            match step {
                Step::NotPresent => {
                    log::debug!("{:#x}: {:?} entry not present", address, level);
                    return Ok(WalkOutcome::NotPresent(level));
                }
                Step::Table { next, rights: r } => {
                    rights = rights.intersect(r);
                    table = next;
                }
                Step::Page {
                    base,
                    size,
                    rights: r,
                    memory,
                    protection_key,
                } => {
                    rights = rights.intersect(r);
                    let frame_number = base >> size.shift();
                    let output = compose(frame_number, decomposition.offset_in(size), size)?;
                    log::debug!("{:#x} -> {:#x} ({:?})", address, output, size);
                    let uses_keys = mode == TranslationMode::Paging4Level && config.pke() && rights.user;
                    return Ok(WalkOutcome::Mapped(Translation {
                        mode,
                        input: address,
                        output,
                        page_size: size,
                        frame_number,
                        rights,
                        memory,
                        protection_key: if uses_keys { Some(protection_key) } else { None },
                        write_protect: mode == TranslationMode::Ept || config.write_protect(),
                    }));
                }
            }
        }

        // L1 entries always end the walk.
        Ok(WalkOutcome::NotPresent(Level::L1))
    }

    /// Translates an address, `None` if it is not mapped.
    fn translate(&mut self, address: u64) -> Result<Option<Translation>> {
        self.walk(address, &mut |_| WalkNext::Continue)
            .map(WalkOutcome::translation)
    }
}

fn step_32(level: Level, raw: u32, config: &TranslationConfig) -> Result<Step> {
    let step = match level {
        Level::L1 => match Pte32::decode(raw) {
            None => Step::NotPresent,
            Some(pte) => Step::Page {
                base: pte.page_base().as_u64(),
                size: PageSize::Size4K,
                rights: pte.rights(),
                memory: MemoryHint::Pat(pte.pat_index()),
                protection_key: 0,
            },
        },
        _ => match Pde32Entry::decode(raw, config)? {
            Pde32Entry::NotPresent => Step::NotPresent,
            Pde32Entry::Table(pde) => Step::Table {
                next: pde.next_table().as_u64(),
                rights: pde.rights(),
            },
            Pde32Entry::LargePage(pde) => Step::Page {
                base: pde.page_base().as_u64(),
                size: PageSize::Size4M,
                rights: pde.rights(),
                memory: MemoryHint::Pat(pde.pat_index()),
                protection_key: 0,
            },
        },
    };
    Ok(step)
}

fn step_64(level: Level, raw: u64, config: &TranslationConfig) -> Result<Step> {
    macro_rules! table {
        ($entry:expr) => {
            Step::Table {
                next: $entry.next_table().as_u64(),
                rights: $entry.rights(),
            }
        };
    }
    macro_rules! page {
        ($entry:expr, $size:expr) => {
            Step::Page {
                base: $entry.page_base().as_u64(),
                size: $size,
                rights: $entry.rights(),
                memory: MemoryHint::Pat($entry.pat_index()),
                protection_key: $entry.protection_key(),
            }
        };
    }

    let step = match level {
        Level::L4 => match Pml4e::decode(raw, config)? {
            None => Step::NotPresent,
            Some(entry) => table!(entry),
        },
        Level::L3 => match L3Entry::decode(raw, config)? {
            L3Entry::NotPresent => Step::NotPresent,
            L3Entry::Table(entry) => table!(entry),
            L3Entry::GiantPage(entry) => page!(entry, PageSize::Size1G),
        },
        Level::L2 => match L2Entry::decode(raw, config)? {
            L2Entry::NotPresent => Step::NotPresent,
            L2Entry::Table(entry) => table!(entry),
            L2Entry::HugePage(entry) => page!(entry, PageSize::Size2M),
        },
        Level::L1 => match Pte::decode(raw, config)? {
            None => Step::NotPresent,
            Some(entry) => page!(entry, PageSize::Size4K),
        },
    };
    Ok(step)
}

fn step_ept(level: Level, raw: u64, config: &TranslationConfig) -> Result<Step> {
    let ept = config.ept_config();
    let mode_based = ept.mode_based_execute();
    macro_rules! table {
        ($entry:expr) => {
            Step::Table {
                next: $entry.next_table().as_u64(),
                rights: AccessRights::ept($entry.rights(), mode_based),
            }
        };
    }
    macro_rules! page {
        ($entry:expr, $size:expr) => {
            Step::Page {
                base: $entry.page_base().as_u64(),
                size: $size,
                rights: AccessRights::ept($entry.rights(), mode_based),
                memory: MemoryHint::Ept {
                    memory_type: $entry.memory_type()?,
                    ignore_pat: $entry.ignores_pat(),
                },
                protection_key: 0,
            }
        };
    }

    let step = match level {
        Level::L4 => match EptPml4e::decode(raw, &ept)? {
            None => Step::NotPresent,
            Some(entry) => table!(entry),
        },
        Level::L3 => match EptL3::decode(raw, &ept)? {
            EptL3::NotPresent => Step::NotPresent,
            EptL3::Table(entry) => table!(entry),
            EptL3::GiantPage(entry) => page!(entry, PageSize::Size1G),
        },
        Level::L2 => match EptL2::decode(raw, &ept)? {
            EptL2::NotPresent => Step::NotPresent,
            EptL2::Table(entry) => table!(entry),
            EptL2::HugePage(entry) => page!(entry, PageSize::Size2M),
        },
        Level::L1 => match EptPte::decode(raw, &ept)? {
            None => Step::NotPresent,
            Some(entry) => page!(entry, PageSize::Size4K),
        },
    };
    Ok(step)
}

// ———————————————————————————————— Snapshots ——————————————————————————————— //

/// A read-only copy of the physical memory holding paging structures.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotMemory<'a> {
    /// Physical address of the first byte.
    base: u64,
    bytes: &'a [u8],
}

impl<'a> SnapshotMemory<'a> {
    pub const fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    /// Reads the little-endian entry described by `entry`.
    pub fn read(&self, entry: &EntryLocation) -> Result<u64> {
        let unreadable = ArchError::UnreadableEntry { addr: entry.addr };
        let start = entry.addr.checked_sub(self.base).ok_or(unreadable)? as usize;
        let end = start.checked_add(entry.size as usize).ok_or(unreadable)?;
        let bytes = self.bytes.get(start..end).ok_or(unreadable)?;
        match entry.size {
            4 => Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| unreadable)?) as u64),
            8 => Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| unreadable)?)),
            _ => Err(unreadable),
        }
    }
}

/// Walks paging structures held in a [`SnapshotMemory`].
pub struct SnapshotWalker<'a> {
    root: Root,
    config: TranslationConfig,
    memory: SnapshotMemory<'a>,
}

impl<'a> SnapshotWalker<'a> {
    pub fn new(root: Root, config: TranslationConfig, memory: SnapshotMemory<'a>) -> Self {
        Self {
            root,
            config,
            memory,
        }
    }
}

impl<'a> Walker for SnapshotWalker<'a> {
    fn root(&self) -> Root {
        self.root
    }

    fn config(&self) -> &TranslationConfig {
        &self.config
    }

    fn fetch(&mut self, entry: &EntryLocation) -> Result<u64> {
        self.memory.read(entry)
    }
}

/// Walks with entries supplied by a callback.
pub struct FnWalker<F> {
    root: Root,
    config: TranslationConfig,
    fetch: F,
}

impl<F> FnWalker<F>
where
    F: FnMut(&EntryLocation) -> Result<u64>,
{
    pub fn new(root: Root, config: TranslationConfig, fetch: F) -> Self {
        Self {
            root,
            config,
            fetch,
        }
    }
}

impl<F> Walker for FnWalker<F>
where
    F: FnMut(&EntryLocation) -> Result<u64>,
{
    fn root(&self) -> Root {
        self.root
    }

    fn config(&self) -> &TranslationConfig {
        &self.config
    }

    fn fetch(&mut self, entry: &EntryLocation) -> Result<u64> {
        (self.fetch)(entry)
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //
