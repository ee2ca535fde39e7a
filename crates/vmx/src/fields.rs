//! VMCS component encoding
//!
//! VMREAD and VMWRITE name a VMCS field with a 16 bits component encoding made of an access type,
//! an index, a type and a width. See Intel SDM Vol. 3C Section 25.11.2 and table 25-21.

use utils::{bit_word, ArchError, BitField, ComponentFault, Layout, Result};

// ———————————————————————————————— Encoding ———————————————————————————————— //

const ACCESS_TYPE: BitField = BitField::bit("access_type", 0);
const INDEX: BitField = BitField::new("index", 1, 9);
const TYPE: BitField = BitField::new("type", 10, 2);
const WIDTH: BitField = BitField::new("width", 13, 2);

const ENCODING_FIELDS: &[BitField] = &[
    ACCESS_TYPE,
    INDEX,
    TYPE,
    BitField::bit("reserved", 12),
    WIDTH,
    BitField::bit("reserved", 15),
];

bit_word!(
    /// A raw component encoding, as passed to VMREAD and VMWRITE.
    VmcsEncoding(u16) = Layout::new("VMCS component encoding", 16, ENCODING_FIELDS)
);

/// Valid VmcsAccessType as encoded in a VMCS.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum VmcsAccessType {
    Full = 0,
    /// Upper 32 bits of a 64 bits field.
    High = 1,
}

/// Valid VmcsFieldWidth as encoded in a VMCS.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum VmcsFieldWidth {
    Width16 = 0,
    Width64 = 1,
    Width32 = 2,
    WidthNat = 3,
}

/// Types of VMCS fields.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum VmcsFieldType {
    Control = 0,
    VmExitInformation = 1,
    GuestState = 2,
    HostState = 3,
}

impl VmcsAccessType {
    pub const fn from_raw(v: u8) -> Option<Self> {
        match v {
            0 => Some(VmcsAccessType::Full),
            1 => Some(VmcsAccessType::High),
            _ => None,
        }
    }
}

impl VmcsFieldWidth {
    pub const fn from_raw(v: u8) -> Option<Self> {
        match v {
            0 => Some(VmcsFieldWidth::Width16),
            1 => Some(VmcsFieldWidth::Width64),
            2 => Some(VmcsFieldWidth::Width32),
            3 => Some(VmcsFieldWidth::WidthNat),
            _ => None,
        }
    }

    /// Size in bits, `None` for natural width which depends on the processor mode.
    pub const fn bits(self) -> Option<u32> {
        match self {
            VmcsFieldWidth::Width16 => Some(16),
            VmcsFieldWidth::Width32 => Some(32),
            VmcsFieldWidth::Width64 => Some(64),
            VmcsFieldWidth::WidthNat => None,
        }
    }
}

impl VmcsFieldType {
    pub const fn from_raw(v: u8) -> Option<Self> {
        match v {
            0 => Some(VmcsFieldType::Control),
            1 => Some(VmcsFieldType::VmExitInformation),
            2 => Some(VmcsFieldType::GuestState),
            3 => Some(VmcsFieldType::HostState),
            _ => None,
        }
    }

    /// VM-exit information fields are read-only.
    pub const fn is_vmwritable(self) -> bool {
        !matches!(self, VmcsFieldType::VmExitInformation)
    }
}

// Both fields are two bits wide, every value names a variant.
const fn type_from_bits(bits: u64) -> VmcsFieldType {
    match bits & 0b11 {
        0 => VmcsFieldType::Control,
        1 => VmcsFieldType::VmExitInformation,
        2 => VmcsFieldType::GuestState,
        _ => VmcsFieldType::HostState,
    }
}

const fn width_from_bits(bits: u64) -> VmcsFieldWidth {
    match bits & 0b11 {
        0 => VmcsFieldWidth::Width16,
        1 => VmcsFieldWidth::Width64,
        2 => VmcsFieldWidth::Width32,
        _ => VmcsFieldWidth::WidthNat,
    }
}

/// A decoded component encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct VmcsComponent {
    pub access: VmcsAccessType,
    pub index: u16,
    pub tpe: VmcsFieldType,
    pub width: VmcsFieldWidth,
}

impl VmcsComponent {
    pub const fn new(
        access: VmcsAccessType,
        index: u16,
        tpe: VmcsFieldType,
        width: VmcsFieldWidth,
    ) -> Self {
        Self {
            access,
            index,
            tpe,
            width,
        }
    }

    /// Encoding of a full access, for use in constant context: an index that does not fit fails
    /// the build.
    pub const fn full(tpe: VmcsFieldType, width: VmcsFieldWidth, index: u16) -> u16 {
        assert!(index as u64 <= INDEX.max(), "VMCS index overflows 9 bits");
        (index << INDEX.offset())
            | ((tpe as u16) << TYPE.offset())
            | ((width as u16) << WIDTH.offset())
    }

    /// Returns the 16 bits encoding of the component.
    ///
    /// The "high" access type exists only for 64 bits fields.
    pub fn encode(self) -> Result<u16> {
        let raw = ACCESS_TYPE.pack(self.access as u64)?
            | INDEX.pack(self.index as u64)?
            | TYPE.pack(self.tpe as u64)?
            | WIDTH.pack(self.width as u64)?;
        if self.access == VmcsAccessType::High && self.width != VmcsFieldWidth::Width64 {
            log::warn!("high access to a narrow VMCS field: {:?}", self);
            return Err(ArchError::InvalidComponentEncoding {
                raw: raw as u32,
                reason: ComponentFault::HighAccessOnNarrowField,
            });
        }
        Ok(raw as u16)
    }

    /// Decodes a component encoding, rejecting reserved bits and "high" accesses to fields that
    /// are not 64 bits wide.
    pub fn decode(raw: u16) -> Result<Self> {
        let encoding = VmcsEncoding::from_raw(raw);
        let reserved = utils::bits::BitWord::reserved_bits(encoding);
        if reserved != 0 {
            return Err(ArchError::InvalidComponentEncoding {
                raw: raw as u32,
                reason: ComponentFault::ReservedBit(reserved.trailing_zeros() as u8),
            });
        }

        let access = if encoding.flag(ACCESS_TYPE) {
            VmcsAccessType::High
        } else {
            VmcsAccessType::Full
        };
        let tpe = type_from_bits(encoding.field(TYPE));
        let width = width_from_bits(encoding.field(WIDTH));
        let component = Self::new(access, encoding.field(INDEX) as u16, tpe, width);
        if access == VmcsAccessType::High && width != VmcsFieldWidth::Width64 {
            return Err(ArchError::InvalidComponentEncoding {
                raw: raw as u32,
                reason: ComponentFault::HighAccessOnNarrowField,
            });
        }
        Ok(component)
    }
}

// ——————————————————————————————— Field Catalogue ——————————————————————————————— //

macro_rules! vmcs_fields {
    ($($name:ident = ($tpe:ident, $width:ident, $index:expr),)*) => {
        /// VMCS fields, full access encodings.
        ///
        /// The upper half of 64 bits fields on 32 bits hosts is reached through
        /// [`VmcsField::high`].
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[repr(u16)]
        pub enum VmcsField {
            $(
                $name = VmcsComponent::full(VmcsFieldType::$tpe, VmcsFieldWidth::$width, $index),
            )*
        }

        impl VmcsField {
            /// Every field of the catalogue.
            pub const ALL: &'static [VmcsField] = &[$(VmcsField::$name,)*];
        }
    };
}

vmcs_fields! {
    VirtualProcessorId = (Control, Width16, 0),
    PostedIntrNv = (Control, Width16, 1),
    LastPidPointerIndex = (Control, Width16, 4),
    GuestEsSelector = (GuestState, Width16, 0),
    GuestCsSelector = (GuestState, Width16, 1),
    GuestSsSelector = (GuestState, Width16, 2),
    GuestDsSelector = (GuestState, Width16, 3),
    GuestFsSelector = (GuestState, Width16, 4),
    GuestGsSelector = (GuestState, Width16, 5),
    GuestLdtrSelector = (GuestState, Width16, 6),
    GuestTrSelector = (GuestState, Width16, 7),
    GuestIntrStatus = (GuestState, Width16, 8),
    GuestPmlIndex = (GuestState, Width16, 9),
    HostEsSelector = (HostState, Width16, 0),
    HostCsSelector = (HostState, Width16, 1),
    HostSsSelector = (HostState, Width16, 2),
    HostDsSelector = (HostState, Width16, 3),
    HostFsSelector = (HostState, Width16, 4),
    HostGsSelector = (HostState, Width16, 5),
    HostTrSelector = (HostState, Width16, 6),
    IoBitmapA = (Control, Width64, 0),
    IoBitmapB = (Control, Width64, 1),
    MsrBitmap = (Control, Width64, 2),
    VmExitMsrStoreAddr = (Control, Width64, 3),
    VmExitMsrLoadAddr = (Control, Width64, 4),
    VmEntryMsrLoadAddr = (Control, Width64, 5),
    PmlAddress = (Control, Width64, 7),
    TscOffset = (Control, Width64, 8),
    VirtualApicPageAddr = (Control, Width64, 9),
    ApicAccessAddr = (Control, Width64, 10),
    PostedIntrDescAddr = (Control, Width64, 11),
    VmFunctionControl = (Control, Width64, 12),
    EptPointer = (Control, Width64, 13),
    EoiExitBitmap0 = (Control, Width64, 14),
    EoiExitBitmap1 = (Control, Width64, 15),
    EoiExitBitmap2 = (Control, Width64, 16),
    EoiExitBitmap3 = (Control, Width64, 17),
    EptpListAddress = (Control, Width64, 18),
    VmreadBitmap = (Control, Width64, 19),
    VmwriteBitmap = (Control, Width64, 20),
    XssExitBitmap = (Control, Width64, 22),
    EnclsExitingBitmap = (Control, Width64, 23),
    TscMultiplier = (Control, Width64, 25),
    TertiaryVmExecControl = (Control, Width64, 26),
    PidPointerTable = (Control, Width64, 33),
    GuestPhysicalAddress = (VmExitInformation, Width64, 0),
    VmcsLinkPointer = (GuestState, Width64, 0),
    GuestIa32Debugctl = (GuestState, Width64, 1),
    GuestIa32Pat = (GuestState, Width64, 2),
    GuestIa32Efer = (GuestState, Width64, 3),
    GuestIa32PerfGlobalCtrl = (GuestState, Width64, 4),
    GuestPdptr0 = (GuestState, Width64, 5),
    GuestPdptr1 = (GuestState, Width64, 6),
    GuestPdptr2 = (GuestState, Width64, 7),
    GuestPdptr3 = (GuestState, Width64, 8),
    GuestBndcfgs = (GuestState, Width64, 9),
    GuestIa32RtitCtl = (GuestState, Width64, 10),
    HostIa32Pat = (HostState, Width64, 0),
    HostIa32Efer = (HostState, Width64, 1),
    HostIa32PerfGlobalCtrl = (HostState, Width64, 2),
    PinBasedVmExecControl = (Control, Width32, 0),
    CpuBasedVmExecControl = (Control, Width32, 1),
    ExceptionBitmap = (Control, Width32, 2),
    PageFaultErrorCodeMask = (Control, Width32, 3),
    PageFaultErrorCodeMatch = (Control, Width32, 4),
    Cr3TargetCount = (Control, Width32, 5),
    VmExitControls = (Control, Width32, 6),
    VmExitMsrStoreCount = (Control, Width32, 7),
    VmExitMsrLoadCount = (Control, Width32, 8),
    VmEntryControls = (Control, Width32, 9),
    VmEntryMsrLoadCount = (Control, Width32, 10),
    VmEntryIntrInfoField = (Control, Width32, 11),
    VmEntryExceptionErrorCode = (Control, Width32, 12),
    VmEntryInstructionLen = (Control, Width32, 13),
    TprThreshold = (Control, Width32, 14),
    SecondaryVmExecControl = (Control, Width32, 15),
    PleGap = (Control, Width32, 16),
    PleWindow = (Control, Width32, 17),
    NotifyWindow = (Control, Width32, 18),
    VmInstructionError = (VmExitInformation, Width32, 0),
    VmExitReason = (VmExitInformation, Width32, 1),
    VmExitIntrInfo = (VmExitInformation, Width32, 2),
    VmExitIntrErrorCode = (VmExitInformation, Width32, 3),
    IdtVectoringInfoField = (VmExitInformation, Width32, 4),
    IdtVectoringErrorCode = (VmExitInformation, Width32, 5),
    VmExitInstructionLen = (VmExitInformation, Width32, 6),
    VmxInstructionInfo = (VmExitInformation, Width32, 7),
    GuestEsLimit = (GuestState, Width32, 0),
    GuestCsLimit = (GuestState, Width32, 1),
    GuestSsLimit = (GuestState, Width32, 2),
    GuestDsLimit = (GuestState, Width32, 3),
    GuestFsLimit = (GuestState, Width32, 4),
    GuestGsLimit = (GuestState, Width32, 5),
    GuestLdtrLimit = (GuestState, Width32, 6),
    GuestTrLimit = (GuestState, Width32, 7),
    GuestGdtrLimit = (GuestState, Width32, 8),
    GuestIdtrLimit = (GuestState, Width32, 9),
    GuestEsArBytes = (GuestState, Width32, 10),
    GuestCsArBytes = (GuestState, Width32, 11),
    GuestSsArBytes = (GuestState, Width32, 12),
    GuestDsArBytes = (GuestState, Width32, 13),
    GuestFsArBytes = (GuestState, Width32, 14),
    GuestGsArBytes = (GuestState, Width32, 15),
    GuestLdtrArBytes = (GuestState, Width32, 16),
    GuestTrArBytes = (GuestState, Width32, 17),
    GuestInterruptibilityInfo = (GuestState, Width32, 18),
    GuestActivityState = (GuestState, Width32, 19),
    GuestSysenterCs = (GuestState, Width32, 21),
    VmxPreemptionTimerValue = (GuestState, Width32, 23),
    HostIa32SysenterCs = (HostState, Width32, 0),
    Cr0GuestHostMask = (Control, WidthNat, 0),
    Cr4GuestHostMask = (Control, WidthNat, 1),
    Cr0ReadShadow = (Control, WidthNat, 2),
    Cr4ReadShadow = (Control, WidthNat, 3),
    Cr3TargetValue0 = (Control, WidthNat, 4),
    Cr3TargetValue1 = (Control, WidthNat, 5),
    Cr3TargetValue2 = (Control, WidthNat, 6),
    Cr3TargetValue3 = (Control, WidthNat, 7),
    ExitQualification = (VmExitInformation, WidthNat, 0),
    GuestLinearAddress = (VmExitInformation, WidthNat, 5),
    GuestCr0 = (GuestState, WidthNat, 0),
    GuestCr3 = (GuestState, WidthNat, 1),
    GuestCr4 = (GuestState, WidthNat, 2),
    GuestEsBase = (GuestState, WidthNat, 3),
    GuestCsBase = (GuestState, WidthNat, 4),
    GuestSsBase = (GuestState, WidthNat, 5),
    GuestDsBase = (GuestState, WidthNat, 6),
    GuestFsBase = (GuestState, WidthNat, 7),
    GuestGsBase = (GuestState, WidthNat, 8),
    GuestLdtrBase = (GuestState, WidthNat, 9),
    GuestTrBase = (GuestState, WidthNat, 10),
    GuestGdtrBase = (GuestState, WidthNat, 11),
    GuestIdtrBase = (GuestState, WidthNat, 12),
    GuestDr7 = (GuestState, WidthNat, 13),
    GuestRsp = (GuestState, WidthNat, 14),
    GuestRip = (GuestState, WidthNat, 15),
    GuestRflags = (GuestState, WidthNat, 16),
    GuestPendingDbgExceptions = (GuestState, WidthNat, 17),
    GuestSysenterEsp = (GuestState, WidthNat, 18),
    GuestSysenterEip = (GuestState, WidthNat, 19),
    HostCr0 = (HostState, WidthNat, 0),
    HostCr3 = (HostState, WidthNat, 1),
    HostCr4 = (HostState, WidthNat, 2),
    HostFsBase = (HostState, WidthNat, 3),
    HostGsBase = (HostState, WidthNat, 4),
    HostTrBase = (HostState, WidthNat, 5),
    HostGdtrBase = (HostState, WidthNat, 6),
    HostIdtrBase = (HostState, WidthNat, 7),
    HostIa32SysenterEsp = (HostState, WidthNat, 8),
    HostIa32SysenterEip = (HostState, WidthNat, 9),
    HostRsp = (HostState, WidthNat, 10),
    HostRip = (HostState, WidthNat, 11),
}

impl VmcsField {
    /// Converts a full access encoding into a VmcsField.
    /// Returns `None` for encodings outside of the catalogue, including "high" accesses.
    pub fn from_raw(raw: u16) -> Option<VmcsField> {
        Self::ALL.iter().copied().find(|field| field.raw() == raw)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self as u16
    }

    /// The component encoding of the field, to be passed to VMREAD and VMWRITE.
    #[inline]
    pub const fn encoding(self) -> u16 {
        self.raw()
    }

    pub const fn width(self) -> VmcsFieldWidth {
        width_from_bits(WIDTH.get(self.raw() as u64))
    }

    pub const fn tpe(self) -> VmcsFieldType {
        type_from_bits(TYPE.get(self.raw() as u64))
    }

    pub const fn index(self) -> u16 {
        INDEX.get(self.raw() as u64) as u16
    }

    pub const fn component(self) -> VmcsComponent {
        VmcsComponent::new(VmcsAccessType::Full, self.index(), self.tpe(), self.width())
    }

    /// Whether the field can be written with VMWRITE.
    pub const fn is_writable(self) -> bool {
        self.tpe().is_vmwritable()
    }

    /// Encoding of the upper 32 bits of a 64 bits field.
    pub fn high(self) -> Result<u16> {
        VmcsComponent {
            access: VmcsAccessType::High,
            ..self.component()
        }
        .encode()
    }

    pub const fn is_guest_cr(self) -> bool {
        matches!(
            self,
            VmcsField::GuestCr0 | VmcsField::GuestCr3 | VmcsField::GuestCr4
        )
    }
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_encodings() {
        assert_eq!(VmcsField::GuestCr0.encoding(), 0x6800);
        assert_eq!(VmcsField::EptPointer.encoding(), 0x201a);
        assert_eq!(VmcsField::EptPointer.high(), Ok(0x201b));
        assert_eq!(VmcsField::VmExitReason.encoding(), 0x4402);
        assert_eq!(VmcsField::HostRip.encoding(), 0x6c16);
        assert_eq!(VmcsField::VirtualProcessorId.encoding(), 0x0000);
        assert_eq!(VmcsField::GuestIa32Pat.encoding(), 0x2804);
    }

    #[test]
    fn field_attributes() {
        assert_eq!(VmcsField::GuestCr0.width(), VmcsFieldWidth::WidthNat);
        assert_eq!(VmcsField::GuestCr0.tpe(), VmcsFieldType::GuestState);
        assert_eq!(VmcsField::EptPointer.width(), VmcsFieldWidth::Width64);
        assert_eq!(VmcsField::EptPointer.tpe(), VmcsFieldType::Control);
        assert_eq!(VmcsField::EptPointer.index(), 13);
        assert_eq!(VmcsField::VmExitReason.width(), VmcsFieldWidth::Width32);
        assert!(!VmcsField::VmExitReason.is_writable());
        assert!(!VmcsField::ExitQualification.is_writable());
        assert!(VmcsField::HostCr3.is_writable());
        assert!(VmcsField::GuestCr4.is_guest_cr());
    }

    #[test]
    fn catalogue_lookup() {
        for field in VmcsField::ALL {
            assert_eq!(VmcsField::from_raw(field.encoding()), Some(*field));
            assert_eq!(VmcsComponent::decode(field.encoding()), Ok(field.component()));
        }
        assert_eq!(VmcsField::from_raw(0x201b), None);
        assert_eq!(VmcsField::from_raw(0x7ffe), None);
    }

    #[test]
    fn high_requires_64_bits() {
        assert_eq!(
            VmcsField::GuestCr0.high(),
            Err(ArchError::InvalidComponentEncoding {
                raw: 0x6801,
                reason: ComponentFault::HighAccessOnNarrowField
            })
        );
        assert!(VmcsField::VmExitReason.high().is_err());
        assert!(VmcsField::GuestEsSelector.high().is_err());
        assert!(VmcsComponent::decode(0x6801).is_err());
        assert_eq!(
            VmcsComponent::decode(0x201b),
            Ok(VmcsComponent::new(
                VmcsAccessType::High,
                13,
                VmcsFieldType::Control,
                VmcsFieldWidth::Width64
            ))
        );
    }

    #[test]
    fn encoding_is_invertible() {
        let types = [
            VmcsFieldType::Control,
            VmcsFieldType::VmExitInformation,
            VmcsFieldType::GuestState,
            VmcsFieldType::HostState,
        ];
        let widths = [
            VmcsFieldWidth::Width16,
            VmcsFieldWidth::Width64,
            VmcsFieldWidth::Width32,
            VmcsFieldWidth::WidthNat,
        ];
        for tpe in types {
            for width in widths {
                for index in [0, 1, 13, 255, 511] {
                    let full = VmcsComponent::new(VmcsAccessType::Full, index, tpe, width);
                    let raw = full.encode().unwrap();
                    assert_eq!(raw, VmcsComponent::full(tpe, width, index));
                    assert_eq!(VmcsComponent::decode(raw), Ok(full));
                }
            }
        }
    }

    #[test]
    fn rejects_malformed_components() {
        let overflow = VmcsComponent::new(
            VmcsAccessType::Full,
            512,
            VmcsFieldType::Control,
            VmcsFieldWidth::Width16,
        );
        assert!(matches!(
            overflow.encode(),
            Err(ArchError::FieldOverflow { field: "index", .. })
        ));
        assert_eq!(
            VmcsComponent::decode(0x1000),
            Err(ArchError::InvalidComponentEncoding {
                raw: 0x1000,
                reason: ComponentFault::ReservedBit(12)
            })
        );
        assert_eq!(
            VmcsComponent::decode(0xe800),
            Err(ArchError::InvalidComponentEncoding {
                raw: 0xe800,
                reason: ComponentFault::ReservedBit(15)
            })
        );
    }
}
