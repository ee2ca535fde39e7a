//! Translation configuration
//!
//! Processor features and control-register settings that change how paging structures decode.
//! The data model never reads them from the hardware: callers build a [`TranslationConfig`] from
//! CPUID and MSR values, or from a snapshot of the control registers.

use utils::{ArchError, Result, Unsupported, MAX_PHYS_ADDR_BITS};
use vmx::{EptCapability, EptConfig, SecondaryControls};

use crate::registers::{Cr0, Cr4, Efer};
use crate::walker::Level;

/// The address-translation hierarchies of the model.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TranslationMode {
    /// 32-bit paging, two levels translating 32-bit linear addresses.
    Paging32,
    /// 4-level paging, translating 48-bit canonical linear addresses.
    Paging4Level,
    /// Extended Page Tables, translating guest-physical addresses.
    Ept,
}

impl TranslationMode {
    /// Selects the paging mode from the control registers, `None` if paging is disabled.
    ///
    /// PAE paging outside of long mode and 5-level paging are not part of the model.
    pub fn from_registers(cr0: Cr0, cr4: Cr4, efer: Efer) -> Result<Option<Self>> {
        if !cr0.contains(Cr0::PG) {
            return Ok(None);
        }
        if !cr4.contains(Cr4::PAE) {
            return Ok(Some(TranslationMode::Paging32));
        }
        if !efer.contains(Efer::LME) {
            return Err(ArchError::UnsupportedTranslationMode(Unsupported::PaePaging));
        }
        if cr4.contains(Cr4::LA57) {
            return Err(ArchError::UnsupportedTranslationMode(
                Unsupported::FiveLevelPaging,
            ));
        }
        Ok(Some(TranslationMode::Paging4Level))
    }

    /// The levels walked, root first.
    pub const fn levels(self) -> &'static [Level] {
        match self {
            TranslationMode::Paging32 => &[Level::L2, Level::L1],
            TranslationMode::Paging4Level | TranslationMode::Ept => {
                &[Level::L4, Level::L3, Level::L2, Level::L1]
            }
        }
    }

    /// Width of the translated addresses.
    pub const fn address_width(self) -> u32 {
        match self {
            TranslationMode::Paging32 => 32,
            TranslationMode::Paging4Level | TranslationMode::Ept => 48,
        }
    }

    /// Width of the index selecting an entry within a table.
    pub const fn index_width(self) -> u32 {
        match self {
            TranslationMode::Paging32 => 10,
            TranslationMode::Paging4Level | TranslationMode::Ept => 9,
        }
    }

    /// Size of an entry in bytes.
    pub const fn entry_size(self) -> u64 {
        match self {
            TranslationMode::Paging32 => 4,
            TranslationMode::Paging4Level | TranslationMode::Ept => 8,
        }
    }
}

/// Processor features and settings used to decode paging structures.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TranslationConfig {
    max_phys_addr: u8,
    pse: bool,
    pse36: bool,
    nxe: bool,
    giant_pages: bool,
    pke: bool,
    write_protect: bool,
    ept_capabilities: EptCapability,
    mode_based_execute: bool,
}

impl Default for TranslationConfig {
    /// A recent 64-bit processor in long mode with execute-disable enabled.
    fn default() -> Self {
        Self {
            max_phys_addr: 48,
            pse: true,
            pse36: true,
            nxe: true,
            giant_pages: true,
            pke: false,
            write_protect: true,
            ept_capabilities: EptConfig::default().capabilities,
            mode_based_execute: false,
        }
    }
}

impl TranslationConfig {
    /// Takes the paging settings out of the control registers, processor features keep their
    /// default.
    pub fn from_registers(cr0: Cr0, cr4: Cr4, efer: Efer) -> Self {
        Self {
            pse: cr4.contains(Cr4::PSE),
            nxe: efer.contains(Efer::NXE),
            pke: cr4.contains(Cr4::PKE),
            write_protect: cr0.contains(Cr0::WP),
            ..Self::default()
        }
    }

    /// Sets MAXPHYADDR, as reported by CPUID leaf 0x80000008.
    pub fn with_max_phys_addr(self, bits: u8) -> Result<Self> {
        if !(32..=MAX_PHYS_ADDR_BITS as u8).contains(&bits) {
            return Err(ArchError::UnsupportedTranslationMode(
                Unsupported::PhysAddrWidth(bits),
            ));
        }
        Ok(Self {
            max_phys_addr: bits,
            ..self
        })
    }

    /// CR4.PSE, enables 4 MB pages with 32-bit paging.
    pub fn with_pse(self, pse: bool) -> Self {
        Self { pse, ..self }
    }

    /// PSE-36 support, 4 MB pages above 4 GB.
    pub fn with_pse36(self, pse36: bool) -> Self {
        Self { pse36, ..self }
    }

    /// IA32_EFER.NXE, makes bit 63 of 4-level entries the execute-disable bit.
    pub fn with_nxe(self, nxe: bool) -> Self {
        Self { nxe, ..self }
    }

    /// Support for 1 GB pages, CPUID.80000001H:EDX.Page1GB.
    pub fn with_giant_pages(self, giant_pages: bool) -> Self {
        Self {
            giant_pages,
            ..self
        }
    }

    /// CR4.PKE, enables protection keys of user-mode pages.
    pub fn with_pke(self, pke: bool) -> Self {
        Self { pke, ..self }
    }

    /// CR0.WP, supervisor-mode writes honor read-only pages.
    pub fn with_write_protect(self, write_protect: bool) -> Self {
        Self {
            write_protect,
            ..self
        }
    }

    /// EPT capabilities, from IA32_VMX_EPT_VPID_CAP.
    pub fn with_ept_capabilities(self, ept_capabilities: EptCapability) -> Self {
        Self {
            ept_capabilities,
            ..self
        }
    }

    /// Mode-based execute control for EPT.
    pub fn with_mode_based_execute(self, mode_based_execute: bool) -> Self {
        Self {
            mode_based_execute,
            ..self
        }
    }

    #[inline]
    pub const fn max_phys_addr(&self) -> u32 {
        self.max_phys_addr as u32
    }

    #[inline]
    pub const fn pse(&self) -> bool {
        self.pse
    }

    #[inline]
    pub const fn pse36(&self) -> bool {
        self.pse36
    }

    #[inline]
    pub const fn nxe(&self) -> bool {
        self.nxe
    }

    #[inline]
    pub const fn giant_pages(&self) -> bool {
        self.giant_pages
    }

    #[inline]
    pub const fn pke(&self) -> bool {
        self.pke
    }

    #[inline]
    pub const fn write_protect(&self) -> bool {
        self.write_protect
    }

    #[inline]
    pub const fn ept_capabilities(&self) -> EptCapability {
        self.ept_capabilities
    }

    #[inline]
    pub const fn mode_based_execute(&self) -> bool {
        self.mode_based_execute
    }

    /// Physical-address width reachable by 4 MB pages of 32-bit paging: 40 bits at most with
    /// PSE-36, 32 bits without.
    pub fn pse36_width(&self) -> u32 {
        if self.pse36 {
            self.max_phys_addr().min(40)
        } else {
            32
        }
    }

    /// The part of the configuration that decodes EPT entries.
    pub fn ept_config(&self) -> EptConfig {
        let mut controls = SecondaryControls::ENABLE_EPT;
        if self.mode_based_execute {
            controls |= SecondaryControls::MODE_BASED_EPT;
        }
        EptConfig::new(self.ept_capabilities, controls, self.max_phys_addr)
    }
}
