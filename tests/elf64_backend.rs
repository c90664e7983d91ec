//! Scenario coverage for the ELF64 back-end (`-backend elf64`): checks
//! the fixed header fields and layout invariants from §4.7/§6 without
//! attempting to run a linker or loader (the test harness has neither).

use tapec::ir::Node;
use tapec::middle::PipelineOptions;

fn optimize(source: &str, level: u8, no_check: bool) -> Vec<Node> {
    let tree = tapec::front::parse(source.as_bytes()).unwrap();
    tapec::middle::run(tree, PipelineOptions::new(level, no_check))
}

#[test]
fn header_identifies_a_static_little_endian_x86_64_executable() {
    let program = optimize("+.", 3, false);
    let bytes = tapec::back::elf::build(&program).unwrap();

    assert_eq!(&bytes[0..4], &[0x7f, b'E', b'L', b'F']);
    assert_eq!(bytes[4], 2); // ELFCLASS64
    assert_eq!(bytes[5], 1); // ELFDATA2LSB
    assert_eq!(bytes[7], 0); // ELFOSABI_SYSV
    assert_eq!(u16::from_le_bytes(bytes[16..18].try_into().unwrap()), 2); // ET_EXEC
    assert_eq!(u16::from_le_bytes(bytes[18..20].try_into().unwrap()), 0x3e); // EM_X86_64
}

#[test]
fn entry_point_sits_inside_the_text_segment_base() {
    let program = optimize("+.", 3, false);
    let bytes = tapec::back::elf::build(&program).unwrap();
    let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
    assert!(entry >= 0x400000);
}

#[test]
fn needs_the_documented_dynamic_linker_and_libc_soname() {
    let program = optimize("+.", 3, false);
    let bytes = tapec::back::elf::build(&program).unwrap();

    let haystack = &bytes[..];
    let needle = b"/lib64/ld-linux-x86-64.so.2\0";
    assert!(haystack.windows(needle.len()).any(|w| w == needle));

    let needle = b"libc.so.6\0";
    assert!(haystack.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn an_empty_program_still_produces_a_well_formed_image() {
    let bytes = tapec::back::elf::build(&[]).unwrap();
    assert_eq!(&bytes[0..4], &[0x7f, b'E', b'L', b'F']);
}

#[test]
fn unbounded_right_walk_pulls_in_the_fail_too_far_right_message() {
    let program = optimize("+[>+]", 3, false);
    let bytes = tapec::back::elf::build(&program).unwrap();
    let needle = "Error: memory position out of bounds (overflow - too far right)\n".as_bytes();
    assert!(bytes.windows(needle.len()).any(|w| w == needle));
}
