//! VMX data model
//!
//! Extended Page Table entries and pointer, memory types, and the VMCS component encoding.
//! Everything here is a plain value type: nothing executes VMX instructions or touches the
//! hardware.
#![cfg_attr(not(test), no_std)]

pub mod bitmaps;
pub mod ept;
pub mod fields;
pub mod memtype;

pub use bitmaps::{EptCapability, EptEntryFlags, SecondaryControls};
pub use ept::{
    EptConfig, EptL2, EptL3, EptPde, EptPde2M, EptPdpte, EptPdpte1G, EptPml4e, EptPte,
    EptRights, Eptp,
};
pub use fields::{VmcsAccessType, VmcsComponent, VmcsField, VmcsFieldType, VmcsFieldWidth};
pub use memtype::{MemoryType, Pat, PatIndex};
pub use utils::{ArchError, GuestPhysAddr, GuestVirtAddr, HostPhysAddr, Result};
