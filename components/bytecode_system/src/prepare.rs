//! Preparation pass
//!
//! A single forward scan over the instruction stream that validates every
//! instruction and caches what execution needs: absolute jump targets and
//! parsed function templates. Nested function bodies are scanned in place;
//! each body is its own jump scope.

use std::collections::{HashMap, HashSet};

use core_types::{VmError, VmResult};
use tracing::debug;

use crate::function::{CodeRange, FunctionTemplate};
use crate::instruction::decode;
use crate::opcode::Opcode;
use crate::value::ConstValue;

/// Deepest nesting of function bodies accepted
pub const MAX_FUNCTION_NESTING: usize = 64;

/// Result of a successful preparation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedImage {
    /// Instructions scanned, nested bodies included
    pub instruction_count: usize,
    /// Offset where the top-level scan stopped (the `End` marker or the
    /// buffer length)
    pub end_offset: usize,
    /// Absolute target per jump instruction offset
    pub jump_targets: HashMap<usize, usize>,
    /// Function template per `DefineFunction` instruction offset
    pub functions: HashMap<usize, FunctionTemplate>,
}

impl PreparedImage {
    /// The top-level body
    pub fn top_level(&self) -> CodeRange {
        CodeRange::new(0, self.end_offset)
    }

    /// Cached jump target for the jump at `offset`
    pub fn jump_target(&self, offset: usize) -> Option<usize> {
        self.jump_targets.get(&offset).copied()
    }

    /// Cached template for the `DefineFunction` at `offset`
    pub fn function(&self, offset: usize) -> Option<&FunctionTemplate> {
        self.functions.get(&offset)
    }
}

struct Scanner<'a> {
    code: &'a [u8],
    constants: &'a [ConstValue],
    prepared: PreparedImage,
}

/// Validate `code` against `constants` and build the cached preparation
pub fn prepare(code: &[u8], constants: &[ConstValue]) -> VmResult<PreparedImage> {
    let mut scanner = Scanner {
        code,
        constants,
        prepared: PreparedImage::default(),
    };
    let end = scanner.scan_body(CodeRange::new(0, code.len()), 0)?;
    scanner.prepared.end_offset = end;

    debug!(
        instructions = scanner.prepared.instruction_count,
        functions = scanner.prepared.functions.len(),
        bytes = code.len(),
        "prepared image"
    );
    Ok(scanner.prepared)
}

impl<'a> Scanner<'a> {
    /// Scan one body, returning the offset where scanning stopped
    fn scan_body(&mut self, range: CodeRange, depth: usize) -> VmResult<usize> {
        let nested = depth > 0;
        let mut boundaries = HashSet::new();
        let mut jumps = Vec::new();
        let mut pc = range.start;

        while pc < range.end {
            let instruction = decode(self.code, pc)?;
            if instruction.next > range.end {
                return Err(VmError::validation(format!(
                    "{} straddles the end of its function body",
                    instruction.opcode.mnemonic()
                ))
                .at(pc));
            }
            instruction.check_fixed_len()?;
            boundaries.insert(pc);
            self.prepared.instruction_count += 1;
            let mut next = instruction.next;

            match instruction.opcode {
                Opcode::End => {
                    if nested {
                        return Err(
                            VmError::validation("End marker inside function body").at(pc)
                        );
                    }
                    self.check_jumps(&jumps, &boundaries, CodeRange::new(range.start, pc))?;
                    return Ok(pc);
                }
                Opcode::PushConstant => {
                    if instruction.operands.is_empty() || instruction.operands.len() % 2 != 0 {
                        return Err(VmError::validation(format!(
                            "PushConstant operand length {} is not a positive multiple of 2",
                            instruction.operands.len()
                        ))
                        .at(pc));
                    }
                    for index in instruction.constant_indices() {
                        if index as usize >= self.constants.len() {
                            return Err(VmError::validation(format!(
                                "constant index {} out of range ({} constants)",
                                index,
                                self.constants.len()
                            ))
                            .at(pc));
                        }
                    }
                }
                Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                    let target = instruction.jump_target()?;
                    self.prepared.jump_targets.insert(pc, target);
                    jumps.push((pc, target));
                }
                Opcode::DefineFunction => {
                    if depth + 1 > MAX_FUNCTION_NESTING {
                        return Err(VmError::exhausted(format!(
                            "function nesting deeper than {}",
                            MAX_FUNCTION_NESTING
                        ))
                        .at(pc));
                    }
                    let template = FunctionTemplate::parse(&instruction, self.constants)?;
                    if template.body.end > range.end {
                        return Err(VmError::validation(format!(
                            "function body of {} bytes runs past its enclosing body",
                            template.body.len()
                        ))
                        .at(pc));
                    }
                    self.scan_body(template.body, depth + 1)?;
                    next = template.body.end;
                    self.prepared.functions.insert(pc, template);
                }
                Opcode::PushRegister
                | Opcode::StoreRegister
                | Opcode::CallFunction
                | Opcode::CallMethod
                | Opcode::InitObject => {}
                Opcode::Return
                | Opcode::PushUndefined
                | Opcode::PushTrue
                | Opcode::PushFalse
                | Opcode::Pop
                | Opcode::Dup
                | Opcode::Swap
                | Opcode::Add
                | Opcode::Subtract
                | Opcode::Multiply
                | Opcode::Divide
                | Opcode::Modulo
                | Opcode::Negate
                | Opcode::Not
                | Opcode::Equals
                | Opcode::StrictEquals
                | Opcode::Less
                | Opcode::Greater
                | Opcode::Concat
                | Opcode::TypeOf
                | Opcode::GetVariable
                | Opcode::SetVariable
                | Opcode::DefineLocal
                | Opcode::GetMember
                | Opcode::SetMember
                | Opcode::DeleteMember
                | Opcode::NewObject
                | Opcode::PushWith
                | Opcode::PopWith
                | Opcode::Trace
                | Opcode::Increment
                | Opcode::Decrement
                | Opcode::ToNumber
                | Opcode::ToString => {}
            }

            pc = next;
        }

        self.check_jumps(&jumps, &boundaries, CodeRange::new(range.start, pc))?;
        Ok(pc)
    }

    fn check_jumps(
        &self,
        jumps: &[(usize, usize)],
        boundaries: &HashSet<usize>,
        body: CodeRange,
    ) -> VmResult<()> {
        for &(offset, target) in jumps {
            if !boundaries.contains(&target) && target != body.end {
                return Err(VmError::validation(format!(
                    "jump target {} is not an instruction boundary of its body",
                    target
                ))
                .at(offset));
            }
        }
        Ok(())
    }
}
