use ia32_arch::utils::ComponentFault;
use ia32_arch::vmx::{VmcsAccessType, VmcsFieldType, VmcsFieldWidth};
use ia32_arch::*;

#[test]
fn every_valid_encoding_round_trips() {
    let mut valid = 0;
    for raw in 0..=u16::MAX {
        if let Ok(component) = VmcsComponent::decode(raw) {
            valid += 1;
            assert_eq!(component.encode(), Ok(raw));
        }
    }
    // 512 indices, 4 types, 3 widths with a full access and 64-bit fields with both.
    assert_eq!(valid, 512 * 4 * 5);
}

#[test]
fn catalogue_matches_the_codec() {
    for field in VmcsField::ALL.iter().copied() {
        let component = VmcsComponent::decode(field.encoding()).unwrap();
        assert_eq!(component, field.component());
        assert_eq!(component.access, VmcsAccessType::Full);
        assert_eq!(VmcsField::from_raw(field.encoding()), Some(field));
        assert_eq!(
            field.is_writable(),
            field.tpe() != VmcsFieldType::VmExitInformation
        );
        match field.width() {
            VmcsFieldWidth::Width64 => assert_eq!(field.high(), Ok(field.encoding() | 1)),
            _ => assert!(field.high().is_err()),
        }
    }
}

#[test]
fn high_access_needs_a_64_bit_field() {
    let component = VmcsComponent::new(
        VmcsAccessType::High,
        0,
        VmcsFieldType::GuestState,
        VmcsFieldWidth::Width32,
    );
    assert_eq!(
        component.encode(),
        Err(ArchError::InvalidComponentEncoding {
            raw: 0x4801,
            reason: ComponentFault::HighAccessOnNarrowField
        })
    );
    assert_eq!(
        VmcsComponent::decode(0x4801),
        Err(ArchError::InvalidComponentEncoding {
            raw: 0x4801,
            reason: ComponentFault::HighAccessOnNarrowField
        })
    );
    assert_eq!(VmcsField::EptPointer.high(), Ok(0x201b));
}
