//! Bits shared by 32-bit and 4-level paging entries.

use utils::{ArchError, BitField, Layout, Result};

pub(crate) const PRESENT: BitField = BitField::bit("present", 0);
pub(crate) const WRITABLE: BitField = BitField::bit("writable", 1);
pub(crate) const USER: BitField = BitField::bit("user", 2);
pub(crate) const WRITE_THROUGH: BitField = BitField::bit("write_through", 3);
pub(crate) const CACHE_DISABLE: BitField = BitField::bit("cache_disable", 4);
pub(crate) const ACCESSED: BitField = BitField::bit("accessed", 5);
pub(crate) const DIRTY: BitField = BitField::bit("dirty", 6);
pub(crate) const PAGE_SIZE: BitField = BitField::bit("page_size", 7);
pub(crate) const GLOBAL: BitField = BitField::bit("global", 8);
/// PAT bit of entries mapping 4 KB pages.
pub(crate) const PAT_4K: BitField = BitField::bit("pat", 7);
/// PAT bit of entries mapping large pages.
pub(crate) const PAT_LARGE: BitField = BitField::bit("pat", 12);

/// Builds an entry from a frame number and raw flags, rejecting flags that are reserved at that
/// level.
pub(crate) fn build(layout: &Layout, address: BitField, frame: u64, flags: u64) -> Result<u64> {
    let raw = address.pack(frame)? | flags;
    ArchError::check_reserved(layout.name(), raw, raw & layout.reserved_mask())?;
    Ok(raw)
}

/// Accessors shared by every paging entry.
macro_rules! paging_entry {
    ($name:ident, $address:expr) => {
        impl $name {
            const ADDRESS: utils::BitField = $address;

            #[inline]
            pub const fn is_present(self) -> bool {
                self.flag($crate::entry::PRESENT)
            }

            /// R/W: writes are allowed.
            #[inline]
            pub const fn is_writable(self) -> bool {
                self.flag($crate::entry::WRITABLE)
            }

            /// U/S: user-mode accesses are allowed.
            #[inline]
            pub const fn is_user_accessible(self) -> bool {
                self.flag($crate::entry::USER)
            }

            /// PWT.
            #[inline]
            pub const fn write_through(self) -> bool {
                self.flag($crate::entry::WRITE_THROUGH)
            }

            /// PCD.
            #[inline]
            pub const fn cache_disable(self) -> bool {
                self.flag($crate::entry::CACHE_DISABLE)
            }

            #[inline]
            pub const fn is_accessed(self) -> bool {
                self.flag($crate::entry::ACCESSED)
            }

            /// Number of the frame referenced by the entry, in units of the page size for
            /// entries mapping pages.
            #[inline]
            pub const fn frame_number(self) -> u64 {
                self.field(Self::ADDRESS)
            }

            pub const fn rights(self) -> $crate::access::AccessRights {
                $crate::access::AccessRights::paging(
                    self.is_writable(),
                    self.is_user_accessible(),
                    self.is_execute_disabled(),
                )
            }
        }
    };
}

/// Accessors of entries that map a page.
macro_rules! paging_page {
    ($name:ident, $pat:expr, $large:expr) => {
        impl $name {
            #[inline]
            pub const fn is_dirty(self) -> bool {
                self.flag($crate::entry::DIRTY)
            }

            /// Global translation, kept across address-space switches when CR4.PGE is set.
            #[inline]
            pub const fn is_global(self) -> bool {
                self.flag($crate::entry::GLOBAL)
            }

            /// Whether the entry maps a page larger than 4 KB.
            #[inline]
            pub const fn is_large_page(self) -> bool {
                $large
            }

            /// Selects the IA32_PAT entry with the PAT, PCD and PWT bits.
            pub const fn pat_index(self) -> vmx::PatIndex {
                vmx::PatIndex::new(self.flag($pat), self.cache_disable(), self.write_through())
            }
        }
    };
}
