//! Turns a byte stream into a pre-optimisation IR tree.
//!
//! Only the eight meaningful characters are recognised; every other byte
//! is skipped. 1-based line and column are tracked for error reporting.
//! The pre-optimisation tree uses `Add(±1, 0)`, `Right(±1)`, `In(0)`,
//! `Out(0)` and `Loop(body, offset=0)` exclusively — no later-pass node
//! kind appears here.

use std::io::Read;

use crate::common::SyntaxError;
use crate::ir::{Builder, Node};

struct Position {
    line: u32,
    column: u32,
}

struct State<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> State<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        State { bytes, pos: 0, line: 1, column: 1 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn position(&self) -> Position {
        Position { line: self.line, column: self.column }
    }

    fn consume(&mut self) {
        if let Some(b) = self.peek() {
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.pos += 1;
        }
    }
}

fn parse_instructions(state: &mut State, loop_level: u32, loop_start: Option<Position>) -> Result<Vec<Node>, SyntaxError> {
    let mut builder = Builder::new();

    while let Some(byte) = state.peek() {
        match byte {
            b'+' => {
                builder.push(Node::Add { n: 1, offset: 0 });
                state.consume();
            }
            b'-' => {
                builder.push(Node::Add { n: -1, offset: 0 });
                state.consume();
            }
            b'>' => {
                builder.push(Node::Right { n: 1 });
                state.consume();
            }
            b'<' => {
                builder.push(Node::Right { n: -1 });
                state.consume();
            }
            b'.' => {
                builder.push(Node::Out { offset: 0 });
                state.consume();
            }
            b',' => {
                builder.push(Node::In { offset: 0 });
                state.consume();
            }
            b'[' => {
                let nested_start = state.position();
                state.consume();
                let body = parse_instructions(state, loop_level + 1, Some(nested_start))?;
                builder.push(Node::Loop { body, offset: 0 });
            }
            b']' => {
                if loop_level == 0 {
                    let position = state.position();
                    return Err(SyntaxError { ch: ']', line: position.line, column: position.column });
                }
                state.consume();
                return Ok(builder.finish());
            }
            _ => state.consume(),
        }
    }

    if loop_level != 0 {
        let start = loop_start.expect("nonzero loop_level always carries a start position");
        return Err(SyntaxError { ch: '[', line: start.line, column: start.column });
    }

    Ok(builder.finish())
}

/// Parse a whole source byte stream into an IR tree.
pub fn parse(bytes: &[u8]) -> Result<Vec<Node>, SyntaxError> {
    let mut state = State::new(bytes);
    parse_instructions(&mut state, 0, None)
}

/// Parse a whole source from a reader, for callers that have a `Read` and
/// not an in-memory buffer (the non-`-slow` entry points).
pub fn parse_reader<R: Read>(mut reader: R) -> std::io::Result<Result<Vec<Node>, SyntaxError>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(parse(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_non_instruction_bytes() {
        let tree = parse(b"hello + world").unwrap();
        assert_eq!(tree, vec![Node::Add { n: 1, offset: 0 }]);
    }

    #[test]
    fn nests_loops() {
        let tree = parse(b"+[-]").unwrap();
        assert_eq!(
            tree,
            vec![
                Node::Add { n: 1, offset: 0 },
                Node::Loop { body: vec![Node::Add { n: -1, offset: 0 }], offset: 0 },
            ]
        );
    }

    #[test]
    fn unmatched_close_bracket_reports_position() {
        let err = parse(b"+]").unwrap_err();
        assert_eq!(err.ch, ']');
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 2);
    }

    #[test]
    fn unmatched_open_bracket_reports_the_opening_position() {
        let err = parse(b"ab\n[+").unwrap_err();
        assert_eq!(err.ch, '[');
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn only_noise_produces_an_empty_tree() {
        assert_eq!(parse(b"this is a comment").unwrap(), Vec::<Node>::new());
    }
}
