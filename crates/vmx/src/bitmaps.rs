//! VMX bitmaps.
//!
//! Flag sets consumed by the EPT model: the EPT-related secondary processor-based controls, the
//! EPT capabilities reported by IA32_VMX_EPT_VPID_CAP and the single-bit flags of EPT entries.

use bitflags::bitflags;

bitflags! {
    /// The secondary processor-based VM-execution controls that change how EPT entries are
    /// interpreted.
    ///
    /// See Intel SDM, Volume 3C, Section 25.6.2.
    pub struct SecondaryControls: u32 {
        /// Enable EPT.
        const ENABLE_EPT = 1 << 1;
        /// Enable VPID.
        const ENABLE_VPID = 1 << 5;
        /// Unrestricted guest.
        const UNRESTRICTED_GUEST = 1 << 7;
        /// Enable PML.
        const ENABLE_PML = 1 << 17;
        /// EPT-violation #VE.
        const EPT_VIOLATION_VE = 1 << 18;
        /// Mode-based execute control for EPT: bit 2 of EPT entries controls supervisor-mode
        /// fetches and bit 10 user-mode fetches.
        const MODE_BASED_EPT = 1 << 22;
        /// Sub-page write permissions for EPT.
        const SUB_PAGE_EPT = 1 << 23;
    }

    /// EPT and VPID capabilities.
    ///
    /// See Intel SDM, Volume 3D, Appendix A.10.
    pub struct EptCapability: u64 {
        /// Support execute-only entries.
        const EXECUTE_ONLY             = 1 << 0;
        /// Support page walk of length 4.
        const PAGE_WALK_4              = 1 << 6;
        /// Support page walk of length 5.
        const PAGE_WALK_5              = 1 << 7;
        /// Support uncacheable EPTP.
        const UNCACHEABLE              = 1 << 8;
        /// Support write-back EPTP.
        const WRITE_BACK               = 1 << 14;
        /// Support 2Mb pages.
        const PAGE_2MB                 = 1 << 16;
        /// Support 1Gb pages.
        const PAGE_1GB                 = 1 << 17;
        /// Support INVEPT instruction.
        const INVEPT                   = 1 << 20;
        /// Support accessed and dirty flags for EPT.
        const ACCESS_DIRTY             = 1 << 21;
        /// Support advanced VM exit information on EPT violation.
        const ADVANCED_VMEXIT          = 1 << 22;
        /// Support supervisor shadow-stack control.
        const SUPERVISOR_SHADOW_STACK  = 1 << 23;
        /// Support single-context INVEPT.
        const SINGLE_CTX_INVEPT        = 1 << 25;
        /// Support all-context INVEPT.
        const ALL_CTX_INVEPT           = 1 << 26;
        /// Support INVVPID.
        const INVVPID                  = 1 << 32;
        /// Support individual-address INVVPID.
        const INDIVIDUAL_ADDR_INVVPID  = 1 << 40;
        /// Support single-context INVVPID.
        const SINGLE_CTX_INVVPID       = 1 << 41;
        /// Support all-context INVVPID.
        const ALL_CTX_INVVPID          = 1 << 42;
        /// Support single-context-retaining-globals INVVPID.
        const SINGLE_CTX_GLOBAL_INVVPID = 1 << 43;
    }

    /// Single-bit flags of EPT paging-structure entries.
    ///
    /// Not every flag is meaningful at every level, see the typed entries of [`crate::ept`].
    pub struct EptEntryFlags: u64 {
        /// Enable read accesses.
        const READ = 1 << 0;
        /// Enable write accesses.
        const WRITE = 1 << 1;
        /// Enable supervisor-mode execution. If mode-based execute control bit is 0, also control
        /// user-mode execution.
        const SUPERVISOR_EXECUTE = 1 << 2;
        /// Use the EPT memory type as is, without combining it with the PAT.
        const IGNORE_PAT = 1 << 6;
        /// If 1, points to a data page instead of a page table.
        const PAGE = 1 << 7;
        /// If bit 6 of EPTP is 1, accessed bit flag.
        const ACCESSED = 1 << 8;
        /// If bit 6 of EPTP is 1, dirty bit flag.
        const DIRTY = 1 << 9;
        /// Enable user-mode execution, when mode-based execute control is 1.
        const USER_EXECUTE = 1 << 10;
        /// Verify guest paging.
        const VERIFY_GUEST_PAGING = 1 << 57;
        /// Paging-write access.
        const PAGING_WRITE_ACCESS = 1 << 58;
        /// Supervisor shadow stack.
        const SUPERVISOR_SHADOW_STACK = 1 << 60;
        /// Sub-page write permissions, last level only.
        const SUB_PAGE_WRITE = 1 << 61;
        /// Suppress EPT-violation faults (#VE).
        const SUPPRESS_VE = 1 << 63;
    }
}

/// Read, write and execute permissions.
pub const EPT_RWX: EptEntryFlags = EptEntryFlags::READ
    .union(EptEntryFlags::WRITE)
    .union(EptEntryFlags::SUPERVISOR_EXECUTE);

/// Permissions granted to intermediate entries, so that the terminal entries alone decide.
pub const EPT_TABLE_FLAGS: EptEntryFlags = EPT_RWX.union(EptEntryFlags::USER_EXECUTE);

impl EptCapability {
    /// Decodes the raw value of IA32_VMX_EPT_VPID_CAP.
    pub fn from_msr(raw: u64) -> Self {
        Self::from_bits_truncate(raw)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capability_from_msr() {
        // Typical value reported by recent Intel cores.
        let cap = EptCapability::from_msr(0x0f01_0633_4141);
        assert!(cap.contains(EptCapability::EXECUTE_ONLY));
        assert!(cap.contains(EptCapability::PAGE_WALK_4));
        assert!(cap.contains(EptCapability::WRITE_BACK));
        assert!(cap.contains(EptCapability::PAGE_2MB));
        assert!(cap.contains(EptCapability::PAGE_1GB));
        assert!(cap.contains(EptCapability::ACCESS_DIRTY));
    }

    #[test]
    fn table_flags() {
        assert_eq!(EPT_RWX.bits(), 0b111);
        assert_eq!(EPT_TABLE_FLAGS.bits(), 0b100_0000_0111);
    }
}
