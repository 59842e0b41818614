//! Branch-target side table.
//!
//! One pass over a function body maps every structured-block start to the
//! position just past its matching `end`, and every `if` start to the
//! position just past its `else`. Failure to build the table is non-fatal:
//! the bytecode tier falls back to scanning forward on demand with the same
//! skip logic, so both discover identical positions.

use coral_asm::{op, skip_instruction, BytecodeReader, TrapKind};
use hashbrown::HashMap;

type Result<T> = core::result::Result<T, TrapKind>;

/// Side table keyed by the byte offset of the opening opcode.
#[derive(Debug, Default, Clone)]
pub struct BranchTable {
    /// block/loop/if/try_table start -> position after the matching `end`.
    end_of: HashMap<usize, usize>,
    /// `if` start -> position after the matching `else`.
    else_of: HashMap<usize, usize>,
}

impl BranchTable {
    /// Position after the `end` matching the construct opened at `start`.
    pub fn end_of(&self, start: usize) -> Option<usize> {
        self.end_of.get(&start).copied()
    }

    /// Position after the `else` of the `if` opened at `start`.
    pub fn else_of(&self, start: usize) -> Option<usize> {
        self.else_of.get(&start).copied()
    }

    /// Build the table for a whole function body in a single pass, tracking
    /// nesting with a scratch stack.
    pub fn build(body: &[u8]) -> Result<Self> {
        let mut table = BranchTable::default();
        let mut reader = BytecodeReader::new(body);
        // Opener offsets; usize::MAX marks the function body itself.
        let mut stack: Vec<usize> = vec![usize::MAX];

        while !reader.is_at_end() {
            let at = reader.pos();
            let opcode = reader.read_u8()?;
            match opcode {
                op::BLOCK | op::LOOP | op::IF | op::TRY_TABLE => {
                    skip_instruction(&mut reader, opcode)?;
                    stack.push(at);
                }
                op::ELSE => {
                    let start = *stack.last().ok_or(TrapKind::InvalidBytecode)?;
                    if start != usize::MAX {
                        table.else_of.insert(start, reader.pos());
                    }
                }
                op::END => {
                    let start = stack.pop().ok_or(TrapKind::InvalidBytecode)?;
                    if start == usize::MAX {
                        // Function-level end: the body is done.
                        break;
                    }
                    table.end_of.insert(start, reader.pos());
                }
                _ => skip_instruction(&mut reader, opcode)?,
            }
        }

        Ok(table)
    }
}

/// On-demand fallback: scan forward from just past the opener at `start`
/// (immediates already consumed) for the matching `end`, returning
/// `(after_else, after_end)`.
pub fn scan_forward(body: &[u8], resume: usize) -> Result<(Option<usize>, usize)> {
    let mut reader = BytecodeReader::new_at(body, resume);
    let mut depth = 0usize;
    let mut after_else = None;

    loop {
        let opcode = reader.read_u8()?;
        match opcode {
            op::BLOCK | op::LOOP | op::IF | op::TRY_TABLE => {
                skip_instruction(&mut reader, opcode)?;
                depth += 1;
            }
            op::ELSE => {
                if depth == 0 {
                    after_else = Some(reader.pos());
                }
            }
            op::END => {
                if depth == 0 {
                    return Ok((after_else, reader.pos()));
                }
                depth -= 1;
            }
            _ => skip_instruction(&mut reader, opcode)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // (block (i32.const 1) drop) (if (else)) end
    fn body() -> Vec<u8> {
        vec![
            op::BLOCK, 0x40, // 0: block
            op::I32_CONST, 0x01, // 2
            op::DROP, // 4
            op::END, // 5: end of block -> 6
            op::I32_CONST, 0x00, // 6
            op::IF, 0x40, // 8: if
            op::NOP, // 10
            op::ELSE, // 11: else -> 12
            op::NOP, // 12
            op::END, // 13: end of if -> 14
            op::END, // 14: end of body
        ]
    }

    #[test]
    fn one_pass_table_matches_forward_scan() {
        let body = body();
        let table = BranchTable::build(&body).unwrap();

        assert_eq!(table.end_of(0), Some(6));
        assert_eq!(table.end_of(8), Some(14));
        assert_eq!(table.else_of(8), Some(12));

        // The fallback discovers the same positions.
        let (els, end) = scan_forward(&body, 2).unwrap();
        assert_eq!((els, end), (None, 6));
        let (els, end) = scan_forward(&body, 10).unwrap();
        assert_eq!((els, end), (Some(12), 14));
    }
}
