//! Tests for the architecture adapter's pure (non-kernel) pieces:
//! trap splicing, instruction classification, register accessors, and the
//! floating point mirror layout.

use quarry_core::arch::{DebugArch, FpRegisters, GpRegisters, Native};

fn window(bytes: &[u8]) -> u64
{
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

#[test]
fn test_instruction_pointer_accessors()
{
    let mut regs = GpRegisters::default();
    assert_eq!(regs.instruction_pointer(), 0);
    regs.set_instruction_pointer(0xdead_beef);
    assert_eq!(regs.instruction_pointer(), 0xdead_beef);
}

#[cfg(target_arch = "x86_64")]
mod x86_64
{
    use super::*;
    use quarry_core::arch::x86_64::XSAVE_FLAVOR;

    #[test]
    fn test_trap_splices_low_byte()
    {
        let word = 0x1122_3344_5566_7788u64;
        let patched = Native::patch_software_trap(word);
        assert_eq!(patched, 0x1122_3344_5566_77cc);
        assert!(Native::is_software_trap(patched));
        assert!(!Native::is_software_trap(word));
    }

    #[test]
    fn test_call_recognition()
    {
        // E8 rel32
        assert!(Native::is_call(window(&[0xe8, 0x10, 0x00, 0x00, 0x00])));
        // FF /2: call rax (modrm 0xd0)
        assert!(Native::is_call(window(&[0xff, 0xd0])));
        // FF /3: far call
        assert!(Native::is_call(window(&[0xff, 0x1d, 0x00, 0x00, 0x00, 0x00])));
        // FF /4 is jmp, not call
        assert!(!Native::is_call(window(&[0xff, 0xe0])));
        // unrecognized windows count as non-calls
        assert!(!Native::is_call(window(&[0x90, 0x90])));
        assert!(!Native::is_call(window(&[0x48, 0x89, 0xe5])));
    }

    #[test]
    fn test_ret_recognition()
    {
        assert!(Native::is_ret(window(&[0xc3])));
        assert!(Native::is_ret(window(&[0xc2, 0x08, 0x00])));
        assert!(Native::is_ret(window(&[0xcb])));
        assert!(Native::is_ret(window(&[0xca, 0x08, 0x00])));
        assert!(!Native::is_ret(window(&[0xc9]))); // leave
        assert!(!Native::is_ret(window(&[0xe8, 0x00, 0x00, 0x00, 0x00])));
    }

    #[test]
    fn test_fp_mirror_size_matches_flavor()
    {
        let expected = match XSAVE_FLAVOR {
            0 => 520,
            1 => 904,
            2 => 2704,
            flavor => panic!("unknown XSTATE flavor {flavor}"),
        };
        assert_eq!(std::mem::size_of::<FpRegisters>(), expected);
    }

    #[test]
    fn test_fp_mirror_default_records_flavor()
    {
        let fp = FpRegisters::default();
        assert_eq!(fp.flavor, XSAVE_FLAVOR);
    }

    #[test]
    fn test_stack_pointer_accessor()
    {
        let mut regs = GpRegisters::default();
        regs.rsp = 0x7fff_0000_1000;
        assert_eq!(regs.stack_pointer(), 0x7fff_0000_1000);
    }
}

#[cfg(target_arch = "aarch64")]
mod aarch64
{
    use super::*;

    #[test]
    fn test_trap_splices_low_word()
    {
        let word = 0x1122_3344_5566_7788u64;
        let patched = Native::patch_software_trap(word);
        assert_eq!(patched, 0x1122_3344_d420_0000);
        assert!(Native::is_software_trap(patched));
        assert!(!Native::is_software_trap(word));
    }

    #[test]
    fn test_call_recognition()
    {
        // BL #16
        assert!(Native::is_call(window(&0x9400_0004u32.to_le_bytes())));
        // BLR x3
        assert!(Native::is_call(window(&0xd63f_0060u32.to_le_bytes())));
        // B (unconditional branch) is not a call
        assert!(!Native::is_call(window(&0x1400_0004u32.to_le_bytes())));
        // BR x3 is not a call
        assert!(!Native::is_call(window(&0xd61f_0060u32.to_le_bytes())));
    }

    #[test]
    fn test_ret_recognition()
    {
        // RET (x30)
        assert!(Native::is_ret(window(&0xd65f_03c0u32.to_le_bytes())));
        // RET x1
        assert!(Native::is_ret(window(&0xd65f_0020u32.to_le_bytes())));
        // BLR is not a return
        assert!(!Native::is_ret(window(&0xd63f_0060u32.to_le_bytes())));
    }

    #[test]
    fn test_fp_mirror_layout()
    {
        assert_eq!(std::mem::size_of::<FpRegisters>(), 528);
    }

    #[test]
    fn test_syscall_override_is_sticky()
    {
        let mut regs = GpRegisters::default();
        assert_eq!(regs.override_syscall_number, 0);
        regs.set_syscall_number(64);
        assert_eq!(regs.regs[8], 64);
        assert_ne!(regs.override_syscall_number, 0);
    }

    #[test]
    fn test_stack_pointer_accessor()
    {
        let mut regs = GpRegisters::default();
        regs.sp = 0x7fff_0000_1000;
        assert_eq!(regs.stack_pointer(), 0x7fff_0000_1000);
    }
}
