//! The tree-walking interpreter (`-tree`): runs the optimization
//! pipeline's output directly, without lowering to any instruction set.
//!
//! Grounded in `original_source/src/interpreter/tree.c`. One behavioural
//! correction from that source: one revision's bound-check handling for
//! `NODE_CHECK_RIGHT` falls through into the `NODE_CHECK_LEFT` arm (a
//! missing `break`), so every right-check also ran a left-check against
//! the *same* offset. Rust's `match` cannot fall through by accident, so
//! that bug cannot reappear here — `CheckRight` and `CheckLeft` are
//! handled as fully independent arms, matching the intended semantics in
//! §4.5. The boundary itself is also aligned with the x86 lowering's
//! `cmp ...; jl` encoding (fail when `ptr + offset >= TAPE_SIZE`) rather
//! than the original C's `> MEMORY_SIZE`, so this interpreter's notion of
//! "out of bounds" agrees with what the ELF64/JIT back-ends actually
//! enforce (see DESIGN.md).

use std::io::{Read, Write};

use crate::common::{Result, RuntimeError, TAPE_SIZE};
use crate::ir::Node;

struct State {
    ptr: i64,
    memory: Vec<u8>,
}

impl State {
    fn new() -> Self {
        State { ptr: 0, memory: vec![0u8; TAPE_SIZE] }
    }

    /// Resolve `ptr + offset` to a tape index, or fail with the same
    /// wording the generated helpers use.
    fn cell(&self, offset: i32) -> Result<usize> {
        let pos = self.ptr + offset as i64;
        if pos < 0 {
            return Err(RuntimeError::TooFarLeft.into());
        }
        if pos >= TAPE_SIZE as i64 {
            return Err(RuntimeError::TooFarRight.into());
        }
        Ok(pos as usize)
    }

    fn get(&self, offset: i32) -> Result<u8> {
        let idx = self.cell(offset)?;
        Ok(self.memory[idx])
    }

    fn set(&mut self, offset: i32, value: u8) -> Result<()> {
        let idx = self.cell(offset)?;
        self.memory[idx] = value;
        Ok(())
    }
}

fn read_input_byte(mut stdin: impl Read) -> Result<u8> {
    let mut byte = [0u8; 1];
    match stdin.read(&mut byte) {
        Ok(0) => Err(RuntimeError::EndOfInput.into()),
        Ok(_) => Ok(byte[0]),
        Err(e) => Err(RuntimeError::ReadError(e).into()),
    }
}

fn run_body(nodes: &[Node], state: &mut State, stdin: &mut impl Read, stdout: &mut impl Write) -> Result<()> {
    for node in nodes {
        match node {
            Node::Add { n, offset } => {
                let cur = state.get(*offset)? as i32;
                state.set(*offset, cur.wrapping_add(*n).rem_euclid(256) as u8)?;
            }
            Node::Add2 { dst_offset, src_offset } => {
                let src = state.get(*src_offset)?;
                let dst = state.get(*dst_offset)?;
                state.set(*dst_offset, dst.wrapping_add(src))?;
            }
            Node::Set { value, offset } => {
                state.set(*offset, value.rem_euclid(256) as u8)?;
            }
            Node::Right { n } => state.ptr += *n as i64,
            Node::In { offset } => {
                let byte = read_input_byte(&mut *stdin)?;
                state.set(*offset, byte)?;
            }
            Node::Out { offset } => {
                let byte = state.get(*offset)?;
                stdout.write_all(&[byte])?;
            }
            Node::Loop { body, offset } | Node::StaticLoop { body, offset } => {
                while state.get(*offset)? != 0 {
                    run_body(body, state, stdin, stdout)?;
                }
            }
            Node::CheckRight { offset } => {
                if state.ptr + *offset as i64 >= TAPE_SIZE as i64 {
                    return Err(RuntimeError::TooFarRight.into());
                }
            }
            Node::CheckLeft { offset } => {
                if state.ptr + *offset as i64 < 0 {
                    return Err(RuntimeError::TooFarLeft.into());
                }
            }
        }
    }
    Ok(())
}

/// Run an already-optimized IR tree to completion against `stdin`/`stdout`.
pub fn run(program: &[Node], mut stdin: impl Read, mut stdout: impl Write) -> Result<()> {
    let mut state = State::new();
    run_body(program, &mut state, &mut stdin, &mut stdout)
}
