//! The closed sets of extern and local symbols the code generator may
//! reference, and the encoder context that maps each live symbol to a
//! concrete address in whichever image is being produced.
//!
//! Mirrors the teacher's convention of process-wide read-only constant
//! tables (register names, in `back/asm.rs`) for a enum-to-name mapping
//! the encoder and every back-end share.

use derive_more::Display;

/// Library functions and data objects the generated program calls into or
/// reads. Closed set; adding a member means updating every table below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[allow(missing_docs)]
pub enum ExternSymbol {
    #[display("exit")]
    Exit,
    #[display("ferror")]
    Ferror,
    #[display("fgetc")]
    Fgetc,
    #[display("fprintf")]
    Fprintf,
    #[display("__libc_start_main")]
    LibcStartMain,
    #[display("perror")]
    Perror,
    #[display("putc")]
    Putc,
    #[display("stderr")]
    Stderr,
    #[display("stdin")]
    Stdin,
    #[display("stdout")]
    Stdout,
}

pub const NUM_EXTERN_SYMBOLS: usize = 10;

pub const ALL_EXTERN_SYMBOLS: [ExternSymbol; NUM_EXTERN_SYMBOLS] = {
    use ExternSymbol::*;
    [Exit, Ferror, Fgetc, Fprintf, LibcStartMain, Perror, Putc, Stderr, Stdin, Stdout]
};

impl ExternSymbol {
    pub fn index(self) -> usize {
        self as usize
    }

    /// Is this symbol a callable function (as opposed to a data object like
    /// `stdin`)? Functions get PLT stubs and `R_X86_64_JUMP_SLOT`
    /// relocations; data objects get `R_X86_64_COPY` relocations instead.
    pub fn is_function(self) -> bool {
        !matches!(self, ExternSymbol::Stderr | ExternSymbol::Stdin | ExternSymbol::Stdout)
    }
}

/// Functions synthesised by the code generator itself, referenced by
/// `call`/`lea`/`jmp` within the generated program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[allow(missing_docs)]
pub enum LocalSymbol {
    #[display("check_input")]
    CheckInput,
    #[display("fail_too_far_left")]
    FailTooFarLeft,
    #[display("fail_too_far_right")]
    FailTooFarRight,
    #[display("m")]
    M,
    #[display("main")]
    Main,
    #[display("msg_eoi")]
    MsgEoi,
    #[display("msg_ferr")]
    MsgFerr,
    #[display("msg_left")]
    MsgLeft,
    #[display("msg_right")]
    MsgRight,
    #[display("_start")]
    Start,
}

pub const NUM_LOCAL_SYMBOLS: usize = 10;

pub const ALL_LOCAL_SYMBOLS: [LocalSymbol; NUM_LOCAL_SYMBOLS] = {
    use LocalSymbol::*;
    [CheckInput, FailTooFarLeft, FailTooFarRight, M, Main, MsgEoi, MsgFerr, MsgLeft, MsgRight, Start]
};

impl LocalSymbol {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// The text for each fatal-error message, shared between the ELF/JIT
/// data sections and the C back-end so all three report byte-identical
/// wording (§6).
pub fn message_text(symbol: LocalSymbol) -> &'static str {
    match symbol {
        LocalSymbol::MsgEoi => "Error: reached end of input\n",
        LocalSymbol::MsgFerr => "Error when reading input",
        LocalSymbol::MsgLeft => "Error: memory position out of bounds (underflow - too far left)\n",
        LocalSymbol::MsgRight => "Error: memory position out of bounds (overflow - too far right)\n",
        other => panic!("local symbol {other} does not carry message text"),
    }
}

/// The address oracle the encoder consults to resolve `extern`/`local`
/// operands. Two dense arrays keyed by symbol index, filled by the
/// back-end before encoding; `None` means "not live in this image" and
/// encoding such an operand is an internal error.
#[derive(Clone, Debug, Default)]
pub struct EncoderContext {
    externs: [Option<u64>; NUM_EXTERN_SYMBOLS],
    locals: [Option<u64>; NUM_LOCAL_SYMBOLS],
}

impl EncoderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_extern(&mut self, symbol: ExternSymbol, address: u64) {
        self.externs[symbol.index()] = Some(address);
    }

    pub fn set_local(&mut self, symbol: LocalSymbol, address: u64) {
        self.locals[symbol.index()] = Some(address);
    }

    pub fn get_extern(&self, symbol: ExternSymbol) -> Option<u64> {
        self.externs[symbol.index()]
    }

    pub fn get_local(&self, symbol: LocalSymbol) -> Option<u64> {
        self.locals[symbol.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extern_symbol_index_round_trips_through_the_all_array() {
        for (i, symbol) in ALL_EXTERN_SYMBOLS.iter().enumerate() {
            assert_eq!(symbol.index(), i);
        }
    }

    #[test]
    fn local_symbol_index_round_trips_through_the_all_array() {
        for (i, symbol) in ALL_LOCAL_SYMBOLS.iter().enumerate() {
            assert_eq!(symbol.index(), i);
        }
    }

    #[test]
    fn data_externs_are_not_functions() {
        assert!(!ExternSymbol::Stdin.is_function());
        assert!(ExternSymbol::Fgetc.is_function());
    }

    #[test]
    fn context_round_trips_addresses() {
        let mut ctx = EncoderContext::new();
        ctx.set_extern(ExternSymbol::Fgetc, 0x1000);
        ctx.set_local(LocalSymbol::Main, 0x2000);
        assert_eq!(ctx.get_extern(ExternSymbol::Fgetc), Some(0x1000));
        assert_eq!(ctx.get_local(LocalSymbol::Main), Some(0x2000));
        assert_eq!(ctx.get_extern(ExternSymbol::Exit), None);
    }
}
