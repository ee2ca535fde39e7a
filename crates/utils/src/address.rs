//! Address representation
//!
//! Addresses of every mode are held in 64 bits, the widest physical address (52 bits) fits.
use core::fmt;
use core::ops::Add;

/// A macro for implementing addresses types.
///
/// An address is just a wrapper around an `u64`, with getter and alignment helpers.
macro_rules! addr_impl {
    ($name:ident) => {
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            #[inline]
            pub const fn zero() -> Self {
                Self(0)
            }

            /// Aligns address downwards.
            #[inline]
            pub const fn align_down(self, align: u64) -> Self {
                assert!(align.is_power_of_two(), "`align` must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns address upwards, returns `None` on overflow.
            #[inline]
            pub const fn align_up(self, align: u64) -> Option<Self> {
                assert!(align.is_power_of_two(), "`align` must be a power of two");
                let align_mask = align - 1;
                if self.0 & align_mask == 0 {
                    return Some(self); // already aligned
                }
                match (self.0 | align_mask).checked_add(1) {
                    Some(aligned) => Some(Self(aligned)),
                    None => None,
                }
            }

            #[inline]
            pub const fn is_aligned(self, align: u64) -> bool {
                self.0 & (align - 1) == 0
            }

            /// Returns the offset of this address inside a naturally aligned block of `align`
            /// bytes.
            #[inline]
            pub const fn offset_in(self, align: u64) -> u64 {
                self.0 & (align - 1)
            }

            /// Adds an offset to the current address.
            #[inline]
            pub const fn checked_add(self, offset: u64) -> Option<Self> {
                match self.0.checked_add(offset) {
                    Some(addr) => Some(Self(addr)),
                    None => None,
                }
            }
        }

        impl Add<u64> for $name {
            type Output = Self;
            fn add(self, other: u64) -> Self {
                Self(self.0 + other)
            }
        }

        impl From<$name> for u64 {
            fn from(addr: $name) -> u64 {
                addr.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

addr_impl!(GuestVirtAddr);
addr_impl!(GuestPhysAddr);
addr_impl!(HostPhysAddr);

impl GuestVirtAddr {
    /// Whether bits 63:`width` are copies of bit `width - 1`.
    pub const fn is_canonical(self, width: u32) -> bool {
        let shift = 64 - width;
        (((self.0 << shift) as i64) >> shift) as u64 == self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alignment() {
        let addr = GuestPhysAddr::new(0x1234);
        assert_eq!(addr.align_down(0x1000), GuestPhysAddr::new(0x1000));
        assert_eq!(addr.align_up(0x1000), Some(GuestPhysAddr::new(0x2000)));
        assert_eq!(addr.offset_in(0x1000), 0x234);
        assert!(!addr.is_aligned(0x1000));
        assert_eq!(HostPhysAddr::new(u64::MAX).align_up(0x1000), None);
        assert_eq!(HostPhysAddr::new(0x2000).align_up(0x1000), Some(HostPhysAddr::new(0x2000)));
    }

    #[test]
    fn canonical() {
        assert!(GuestVirtAddr::new(0x0000_7fff_ffff_f000).is_canonical(48));
        assert!(GuestVirtAddr::new(0xffff_8000_0000_0000).is_canonical(48));
        assert!(!GuestVirtAddr::new(0x0000_8000_0000_0000).is_canonical(48));
        assert!(!GuestVirtAddr::new(0xfff0_0000_0000_0000).is_canonical(48));
    }

    #[test]
    fn formatting() {
        let addr = HostPhysAddr::new(0xabcde000);
        assert_eq!(format!("{:?}", addr), "HostPhysAddr(0xabcde000)");
        assert_eq!(format!("{:x}", addr), "abcde000");
    }
}
