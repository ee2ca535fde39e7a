//! Memory Management Unit
//!
//! 32-bit and 4-level paging entries, the control registers selecting the translation mode, and a
//! walker translating addresses through paging or EPT hierarchies held in memory snapshots.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod entry;

pub mod access;
pub mod config;
pub mod paging32;
pub mod paging64;
pub mod registers;
pub mod walker;

pub use access::{Access, AccessKind, AccessRights};
pub use config::{TranslationConfig, TranslationMode};
pub use paging32::{Cr3_32, Pde32, Pde32Entry, Pde4M, Pte32};
pub use paging64::{Cr3, L2Entry, L3Entry, Pde, Pde2M, Pdpte, Pdpte1G, Pml4e, PtFlag, Pte};
pub use registers::{Cr0, Cr4, Efer};
pub use walker::{
    compose, decompose, nested_memory_type, Decomposition, EntryLocation, FnWalker, Level,
    MemoryHint, PageSize, Root, SnapshotMemory, SnapshotWalker, Translation, WalkNext,
    WalkOutcome, WalkStep, Walker,
};
