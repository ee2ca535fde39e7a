//! Shared building blocks for the architectural data model.
//!
//! Address newtypes, the bitfield primitive every hardware word is described with, and the error
//! taxonomy shared by the `vmx` and `mmu` crates.

#![cfg_attr(not(test), no_std)]

mod address;
pub mod bits;
pub mod errors;

pub use address::{GuestPhysAddr, GuestVirtAddr, HostPhysAddr};
pub use bits::{BitField, Layout};
pub use errors::{ArchError, ComponentFault, EptMisconfig, Result, Unsupported};

/// Size of the smallest page, and alignment of every paging structure.
pub const PAGE_SIZE: u64 = 0x1000;

/// Width of the offset inside a 4 KB page.
pub const PAGE_SHIFT: u32 = 12;

/// Architectural upper bound of MAXPHYADDR.
pub const MAX_PHYS_ADDR_BITS: u32 = 52;
