//! Intel 64 and IA-32 address translation
//!
//! Typed views of the paging and EPT structures, translation walks over snapshots of them, the
//! effective memory type of an access, and the VMCS component encodings.

#![no_std]

pub use mmu;
pub use utils;
pub use vmx;

pub use mmu::{
    compose, decompose, nested_memory_type, Access, AccessKind, AccessRights, Level, PageSize,
    Root, SnapshotMemory, SnapshotWalker, Translation, TranslationConfig, TranslationMode, Walker,
};
pub use utils::{ArchError, GuestPhysAddr, GuestVirtAddr, HostPhysAddr, Result};
pub use vmx::memtype::resolve;
pub use vmx::{Eptp, MemoryType, Pat, PatIndex, VmcsComponent, VmcsField};
