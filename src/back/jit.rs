//! The JIT back-end (§4.8): a reduced variant of the ELF64 back-end that
//! produces no ELF metadata at all, just a callable function living in an
//! anonymous mapping in this process.
//!
//! Layout is the same six "sections" as the ELF64 back-end minus anything
//! the dynamic linker would otherwise do for us, packed into one mapping:
//! `PLT, TEXT, RODATA, GOT, DATA, BSS`, with `GOT` pushed to the next page
//! boundary so the later R+X/R+W permission split falls on a page edge.
//! Since the generated `main` function runs inside this very process —
//! already past its own C runtime startup — there is no `_start` and no
//! `__libc_start_main` handoff here; the back-end lowers and emits `main`
//! (and whichever helpers it pulls in) directly, and hands back a pointer
//! to it callable with the plain SysV `extern "C" fn() -> i32` signature
//! `generate_main` already produces.
//!
//! PLT entries are filled with pointers to this process's own libc
//! (`fgetc`, `putc`, ... as taken directly from the `libc` crate, the
//! "closed switch on the extern enum" the spec calls for — no `dlsym`, no
//! symbol table walk). Data symbols (`stdin`/`stdout`/`stderr`) are
//! likewise read once, at build time, out of this process's own libc
//! globals and copied into their GOT slot.

use std::ffi::c_void;

use crate::back::encoder::EncodedFunction;
use crate::back::lowering::{live_externs, lower_program, Function};
use crate::back::symbols::{message_text, EncoderContext, ExternSymbol, LocalSymbol, ALL_EXTERN_SYMBOLS};
use crate::common::{JitError, Result, TAPE_SIZE};
use crate::ir::Node;

const PLT_ENTRY_SIZE: u64 = 8;
const TEXT_ALIGN: u64 = 16;
const RODATA_ALIGN: u64 = 4;
const DATA_ALIGN: u64 = 8;
const BSS_ALIGN: u64 = 16;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ExternUse {
    Unused,
    Function,
    Data,
}

fn page_size() -> u64 {
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as u64
    } else {
        4096
    }
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        offset
    } else {
        (offset + alignment - 1) & !(alignment - 1)
    }
}

fn classify_externs(live: &[ExternSymbol]) -> Vec<ExternUse> {
    ALL_EXTERN_SYMBOLS
        .iter()
        .map(|s| {
            if !live.contains(s) {
                ExternUse::Unused
            } else if s.is_function() {
                ExternUse::Function
            } else {
                ExternUse::Data
            }
        })
        .collect()
}

fn function_references_local(functions: &[Function], symbol: LocalSymbol) -> bool {
    functions.iter().any(|f| {
        f.instrs.iter().any(|instr| {
            [instr.dst_operand(), instr.src_operand()]
                .into_iter()
                .flatten()
                .any(|op| matches!(op, crate::back::isa::Operand::Mem64Local(s) | crate::back::isa::Operand::Local(s) if *s == symbol))
        })
    })
}

/// The current value of a host libc data symbol, read once at build time
/// and copied into the JIT's own GOT slot (the same effect an
/// `R_X86_64_COPY` relocation has in the ELF64 back-end, done here by the
/// compiler itself instead of the dynamic linker).
fn host_data_value(symbol: ExternSymbol) -> u64 {
    match symbol {
        ExternSymbol::Stdin => unsafe { libc::stdin as u64 },
        ExternSymbol::Stdout => unsafe { libc::stdout as u64 },
        ExternSymbol::Stderr => unsafe { libc::stderr as u64 },
        other => unreachable!("{other} is not a data symbol"),
    }
}

/// The address of a host libc function, named in a closed `match` on the
/// extern enum — never resolved by name at run time.
fn host_function_address(symbol: ExternSymbol) -> u64 {
    match symbol {
        ExternSymbol::Exit => libc::exit as usize as u64,
        ExternSymbol::Ferror => libc::ferror as usize as u64,
        ExternSymbol::Fgetc => libc::fgetc as usize as u64,
        ExternSymbol::Fprintf => libc::fprintf as usize as u64,
        ExternSymbol::Perror => libc::perror as usize as u64,
        ExternSymbol::Putc => libc::putc as usize as u64,
        ExternSymbol::LibcStartMain => unreachable!("the jit back-end never lowers _start"),
        other => unreachable!("{other} is not a function symbol"),
    }
}

struct Layout {
    plt: u64,
    plt_size: u64,
    text: u64,
    text_size: u64,
    rodata: u64,
    rodata_size: u64,
    got: u64,
    got_size: u64,
    data: u64,
    bss: u64,
    bss_size: u64,
    total: u64,
}

/// Compute every section's offset relative to an assumed base of zero;
/// the real mapping address is added uniformly once `mmap` returns it.
fn plan(functions: &[Function], live_functions: &[ExternSymbol]) -> Result<Layout> {
    let plt = 0u64;
    let plt_size = live_functions.len() as u64 * PLT_ENTRY_SIZE;

    let text = align_up(plt + plt_size, TEXT_ALIGN);
    let ctx = EncoderContext::new();
    let mut text_size = 0u64;
    for func in functions {
        let encoded = EncodedFunction::new(&func.instrs, text + text_size)?;
        text_size += encoded.measure(&ctx)?;
    }

    let rodata = align_up(text + text_size, RODATA_ALIGN);
    let rodata_size: u64 = [LocalSymbol::MsgEoi, LocalSymbol::MsgFerr, LocalSymbol::MsgLeft, LocalSymbol::MsgRight]
        .iter()
        .filter(|sym| function_references_local(functions, **sym))
        .map(|sym| message_text(*sym).len() as u64)
        .sum();

    let got = align_up(rodata + rodata_size, page_size());
    let got_size = live_externs_count(functions) * 8;

    let data = align_up(got + got_size, DATA_ALIGN);
    let data_size = 8u64;

    let bss = align_up(data + data_size, BSS_ALIGN);
    let bss_size = TAPE_SIZE as u64;

    let total = bss + bss_size;

    Ok(Layout { plt, plt_size, text, text_size, rodata, rodata_size, got, got_size, data, bss, bss_size, total })
}

fn live_externs_count(functions: &[Function]) -> u64 {
    live_externs(functions).len() as u64
}

fn build_encoder_context(layout: &Layout, base: u64, functions: &[Function], extern_use: &[ExternUse]) -> EncoderContext {
    let mut ctx = EncoderContext::new();

    let plt_addr = base + layout.plt;
    let got_addr = base + layout.got;
    let mut plt_offset = 0u64;
    let mut got_index = 0u64;

    for s in ALL_EXTERN_SYMBOLS {
        match extern_use[s.index()] {
            ExternUse::Function => {
                ctx.set_extern(s, plt_addr + plt_offset);
                plt_offset += PLT_ENTRY_SIZE;
                got_index += 1;
            }
            ExternUse::Data => {
                ctx.set_extern(s, got_addr + got_index * 8);
                got_index += 1;
            }
            ExternUse::Unused => {}
        }
    }

    let mut addr = base + layout.text;
    for func in functions {
        ctx.set_local(func.symbol, addr);
        let encoded = EncodedFunction::new(&func.instrs, addr).expect("already measured above");
        addr += encoded.measure(&EncoderContext::new()).expect("already measured above");
    }

    let rodata_addr = base + layout.rodata;
    let mut rodata_offset = 0u64;
    for sym in [LocalSymbol::MsgEoi, LocalSymbol::MsgFerr, LocalSymbol::MsgLeft, LocalSymbol::MsgRight] {
        if function_references_local(functions, sym) {
            ctx.set_local(sym, rodata_addr + rodata_offset);
            rodata_offset += message_text(sym).len() as u64;
        }
    }

    ctx.set_local(LocalSymbol::M, base + layout.data);

    ctx
}

fn jmp_mem64_rel(bytes: &mut Vec<u8>, at: u64, target: u64) {
    bytes.push(0xff);
    bytes.push(0x25);
    let next = at + 6;
    bytes.extend_from_slice(&((target as i64 - next as i64) as u32).to_le_bytes());
}

/// Live function symbols occupy the GOT's leading slots, one per entry in
/// `live_functions` (itself `ALL_EXTERN_SYMBOLS`-ordered, per
/// `lowering::live_externs`), so the i-th PLT stub always jumps through
/// the i-th GOT slot. Data symbols, which never get a PLT stub, follow
/// immediately after in the same enumeration order — see
/// `build_encoder_context` and `write_got`.
fn write_plt(bytes: &mut Vec<u8>, layout: &Layout, base: u64, live_functions: &[ExternSymbol]) {
    let plt_addr = base + layout.plt;
    let got_addr = base + layout.got;
    let start = bytes.len();
    for (i, _) in live_functions.iter().enumerate() {
        let entry_at = plt_addr + (i as u64) * PLT_ENTRY_SIZE;
        jmp_mem64_rel(bytes, entry_at, got_addr + (i as u64) * 8);
        bytes.push(0x90);
        bytes.push(0x90);
    }
    debug_assert_eq!((bytes.len() - start) as u64, layout.plt_size);
}

fn write_got(bytes: &mut Vec<u8>, extern_use: &[ExternUse]) {
    for s in ALL_EXTERN_SYMBOLS {
        match extern_use[s.index()] {
            ExternUse::Function => bytes.extend_from_slice(&host_function_address(s).to_le_bytes()),
            ExternUse::Data => bytes.extend_from_slice(&host_data_value(s).to_le_bytes()),
            ExternUse::Unused => {}
        }
    }
}

/// A JIT-compiled program: a callable handle into an anonymous mapping
/// this process owns. Dropping it unmaps the image.
pub struct JitProgram {
    base: *mut c_void,
    len: usize,
    main: extern "C" fn() -> i32,
}

// The mapping is read-only executable code plus a private tape this
// handle exclusively owns; nothing else in the process can reach it.
unsafe impl Send for JitProgram {}

impl JitProgram {
    /// Call the generated program's `main`. Returns its exit code.
    pub fn run(&self) -> i32 {
        (self.main)()
    }
}

impl Drop for JitProgram {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.len);
        }
    }
}

/// Build a JIT-compiled, immediately callable image for `program` (already
/// optimized). Grounded in §4.8: one anonymous R/W mapping, written, then
/// the `[base, rodata.end)` prefix flipped to R+X.
pub fn build(program: &[Node]) -> Result<JitProgram> {
    let all_functions = lower_program(program)?;
    let functions: Vec<Function> = all_functions.into_iter().filter(|f| f.symbol != LocalSymbol::Start).collect();

    let live = live_externs(&functions);
    let extern_use = classify_externs(&live);
    let live_functions: Vec<ExternSymbol> = live.iter().copied().filter(|s| s.is_function()).collect();

    let layout = plan(&functions, &live_functions)?;
    let map_len = align_up(layout.total, page_size()) as usize;

    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(JitError::Mmap.into());
    }
    let base_addr = base as u64;

    let ctx = build_encoder_context(&layout, base_addr, &functions, &extern_use);

    let mut image = Vec::with_capacity(layout.total as usize);
    write_plt(&mut image, &layout, base_addr, &live_functions);
    while (image.len() as u64) < layout.text {
        image.push(0);
    }
    let mut addr = base_addr + layout.text;
    for func in &functions {
        let encoded = EncodedFunction::new(&func.instrs, addr)?;
        let before = image.len() as u64;
        encoded.encode_into(&ctx, &mut image)?;
        addr += image.len() as u64 - before;
    }
    while (image.len() as u64) < layout.rodata {
        image.push(0);
    }
    for sym in [LocalSymbol::MsgEoi, LocalSymbol::MsgFerr, LocalSymbol::MsgLeft, LocalSymbol::MsgRight] {
        if function_references_local(&functions, sym) {
            image.extend_from_slice(message_text(sym).as_bytes());
        }
    }
    while (image.len() as u64) < layout.got {
        image.push(0);
    }
    write_got(&mut image, &extern_use);
    while (image.len() as u64) < layout.data {
        image.push(0);
    }
    image.extend_from_slice(&(base_addr + layout.bss).to_le_bytes());
    while (image.len() as u64) < layout.total {
        image.push(0);
    }

    unsafe {
        std::ptr::copy_nonoverlapping(image.as_ptr(), base as *mut u8, image.len());
    }

    let exec_len = layout.got as usize;
    let rc = unsafe { libc::mprotect(base, exec_len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        unsafe {
            libc::munmap(base, map_len);
        }
        return Err(JitError::Mprotect.into());
    }

    let main_addr = ctx.get_local(LocalSymbol::Main).expect("main is always lowered");
    let main: extern "C" fn() -> i32 = unsafe { std::mem::transmute::<u64, extern "C" fn() -> i32>(main_addr) };

    Ok(JitProgram { base, len: map_len, main })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_runs_and_exits_zero() {
        let program: Vec<Node> = vec![];
        let jit = build(&program).unwrap();
        assert_eq!(jit.run(), 0);
    }

    #[test]
    fn a_run_of_adds_leaves_the_tape_untouched_from_the_caller_s_perspective() {
        // Nothing observable without `Out`, but this exercises the Add
        // lowering/encoding/GOT-less path end to end.
        let program = vec![Node::Add { n: 5, offset: 0 }];
        let jit = build(&program).unwrap();
        assert_eq!(jit.run(), 0);
    }

    #[test]
    fn out_node_pulls_in_putc_and_still_runs() {
        let program = vec![Node::Out { offset: 0 }];
        let jit = build(&program).unwrap();
        assert_eq!(jit.run(), 0);
    }
}
