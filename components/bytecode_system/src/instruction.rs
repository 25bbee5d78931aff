//! Instruction decoding
//!
//! The decode rule shared by the prepare pass, the dispatcher and the
//! disassembler: one opcode byte, then for operand opcodes a little-endian
//! `u16` operand length followed by that many operand bytes.

use core_types::{VmError, VmResult};

use crate::opcode::Opcode;

/// Bytes of the operand length prefix
pub const LENGTH_PREFIX: usize = 2;

/// A decoded instruction borrowing its operand span from the code buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    /// Offset of the opcode byte
    pub offset: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Operand data (empty for single-byte opcodes)
    pub operands: &'a [u8],
    /// Offset of the following instruction
    pub next: usize,
}

/// Values consumed and produced by one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Values popped from the operand stack
    pub pops: usize,
    /// Values pushed onto the operand stack
    pub pushes: usize,
}

impl StackEffect {
    const fn new(pops: usize, pushes: usize) -> Self {
        Self { pops, pushes }
    }
}

/// Decode the instruction at `offset`
///
/// # Examples
///
/// ```
/// use bytecode_system::{decode, Opcode};
///
/// let code = [0x81, 0x01, 0x00, 0x02, 0x01];
/// let instruction = decode(&code, 0).unwrap();
/// assert_eq!(instruction.opcode, Opcode::PushRegister);
/// assert_eq!(instruction.operands, &[0x02]);
/// assert_eq!(instruction.next, 4);
/// ```
pub fn decode(code: &[u8], offset: usize) -> VmResult<Instruction<'_>> {
    let byte = *code
        .get(offset)
        .ok_or_else(|| VmError::validation("instruction offset past end of code").at(offset))?;
    let opcode = Opcode::from_byte(byte)
        .ok_or_else(|| VmError::validation(format!("unknown opcode 0x{:02X}", byte)).at(offset))?;

    if !opcode.has_operands() {
        return Ok(Instruction {
            offset,
            opcode,
            operands: &[],
            next: offset + 1,
        });
    }

    let start = offset + 1 + LENGTH_PREFIX;
    let prefix = code
        .get(offset + 1..start)
        .ok_or_else(|| VmError::validation("truncated operand length").at(offset))?;
    let len = u16::from_le_bytes([prefix[0], prefix[1]]) as usize;
    let operands = code.get(start..start + len).ok_or_else(|| {
        VmError::validation(format!(
            "{} operands run past end of code",
            opcode.mnemonic()
        ))
        .at(offset)
    })?;

    Ok(Instruction {
        offset,
        opcode,
        operands,
        next: start + len,
    })
}

impl<'a> Instruction<'a> {
    /// Read a `u8` operand at `index`
    pub fn u8_at(&self, index: usize) -> VmResult<u8> {
        self.operands
            .get(index)
            .copied()
            .ok_or_else(|| self.truncated())
    }

    /// Read a little-endian `u16` operand at `index`
    pub fn u16_at(&self, index: usize) -> VmResult<u16> {
        match self.operands.get(index..index + 2) {
            Some(raw) => Ok(u16::from_le_bytes([raw[0], raw[1]])),
            None => Err(self.truncated()),
        }
    }

    /// Read a little-endian `i16` operand at `index`
    pub fn i16_at(&self, index: usize) -> VmResult<i16> {
        self.u16_at(index).map(|raw| raw as i16)
    }

    /// Check the operand span against the opcode's fixed layout
    pub fn check_fixed_len(&self) -> VmResult<()> {
        match self.opcode.fixed_operand_len() {
            Some(expected) if expected != self.operands.len() => Err(VmError::validation(format!(
                "{} expects {} operand bytes, found {}",
                self.opcode.mnemonic(),
                expected,
                self.operands.len()
            ))
            .at(self.offset)),
            _ => Ok(()),
        }
    }

    /// Constant indices of a `PushConstant`
    pub fn constant_indices(&self) -> impl Iterator<Item = u16> + 'a {
        self.operands
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Absolute target of a relative jump
    pub fn jump_target(&self) -> VmResult<usize> {
        let relative = self.i16_at(0)? as isize;
        let target = self.next as isize + relative;
        if target < 0 {
            return Err(VmError::validation(format!(
                "jump target {} is before the start of code",
                target
            ))
            .at(self.offset));
        }
        Ok(target as usize)
    }

    /// Declared stack effect of this instruction
    pub fn stack_effect(&self) -> VmResult<StackEffect> {
        let effect = match self.opcode {
            Opcode::End | Opcode::Return => StackEffect::new(0, 0),
            Opcode::PushUndefined | Opcode::PushTrue | Opcode::PushFalse => StackEffect::new(0, 1),
            Opcode::NewObject => StackEffect::new(0, 1),
            Opcode::Pop | Opcode::PushWith | Opcode::Trace => StackEffect::new(1, 0),
            Opcode::PopWith => StackEffect::new(0, 0),
            Opcode::Dup => StackEffect::new(1, 2),
            Opcode::Swap => StackEffect::new(2, 2),
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Modulo
            | Opcode::Equals
            | Opcode::StrictEquals
            | Opcode::Less
            | Opcode::Greater
            | Opcode::Concat
            | Opcode::GetMember
            | Opcode::DeleteMember => StackEffect::new(2, 1),
            Opcode::Negate
            | Opcode::Not
            | Opcode::TypeOf
            | Opcode::GetVariable
            | Opcode::Increment
            | Opcode::Decrement
            | Opcode::ToNumber
            | Opcode::ToString => StackEffect::new(1, 1),
            Opcode::SetVariable | Opcode::DefineLocal => StackEffect::new(2, 0),
            Opcode::SetMember => StackEffect::new(3, 0),
            Opcode::PushConstant => StackEffect::new(0, self.operands.len() / 2),
            Opcode::PushRegister => StackEffect::new(0, 1),
            Opcode::StoreRegister => StackEffect::new(1, 0),
            Opcode::Jump => StackEffect::new(0, 0),
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => StackEffect::new(1, 0),
            Opcode::DefineFunction => {
                let anonymous = self.u16_at(0)? == crate::function::ANONYMOUS;
                StackEffect::new(0, usize::from(anonymous))
            }
            Opcode::CallFunction | Opcode::CallMethod => {
                StackEffect::new(2 + self.u8_at(0)? as usize, 1)
            }
            Opcode::InitObject => StackEffect::new(2 * self.u16_at(0)? as usize, 1),
        };
        Ok(effect)
    }

    fn truncated(&self) -> VmError {
        VmError::validation(format!("truncated {} operands", self.opcode.mnemonic()))
            .at(self.offset)
    }
}
