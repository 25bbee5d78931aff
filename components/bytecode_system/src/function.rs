//! Function definitions embedded in an image
//!
//! A `DefineFunction` instruction carries a header describing the closure to
//! build; its body is the byte range that immediately follows the
//! instruction.

use std::fmt;

use bitflags::bitflags;
use core_types::{VmError, VmResult};

use crate::instruction::Instruction;
use crate::value::ConstValue;

/// Name constant index marking an anonymous function
pub const ANONYMOUS: u16 = 0xFFFF;

bitflags! {
    /// How a call sets up the callee's registers and implicit locals.
    ///
    /// Preload flags claim registers in declaration order starting at
    /// register 1; suppress flags skip binding the implicit local.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PreloadFlags: u16 {
        /// Copy `this` into a register
        const PRELOAD_THIS       = 0x001;
        /// Do not bind the `this` local
        const SUPPRESS_THIS      = 0x002;
        /// Do not bind the `arguments` local
        const SUPPRESS_ARGUMENTS = 0x004;
        /// Copy the arguments object into a register
        const PRELOAD_ARGUMENTS  = 0x008;
        /// Do not bind the `super` local
        const SUPPRESS_SUPER     = 0x010;
        /// Copy `super` into a register
        const PRELOAD_SUPER      = 0x020;
        /// Copy the host root into a register
        const PRELOAD_ROOT       = 0x040;
        /// Copy the host parent into a register
        const PRELOAD_PARENT     = 0x080;
        /// Copy the global object into a register
        const PRELOAD_GLOBAL     = 0x100;
    }
}

impl fmt::Display for PreloadFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        for (i, (name, _)) in self.iter_names().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// Half-open byte range `[start, end)` of the code buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CodeRange {
    /// First byte
    pub start: usize,
    /// One past the last byte
    pub end: usize,
}

impl CodeRange {
    /// Create a range
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `offset` lies inside the range
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// A declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Target register, or 0 for a frame-local variable
    pub register: u8,
}

/// Cached description of a `DefineFunction`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionTemplate {
    /// Function name, `None` for anonymous functions
    pub name: Option<String>,
    /// Registers allocated per call (register 0 is never preloaded)
    pub register_count: u8,
    /// Preload and suppress flags
    pub flags: PreloadFlags,
    /// Declared parameters in order
    pub params: Vec<Parameter>,
    /// Body byte range
    pub body: CodeRange,
}

impl FunctionTemplate {
    /// Parse and validate the header of a `DefineFunction` instruction.
    ///
    /// Header layout: `u16` name constant, `u8` register count, `u16` flags,
    /// `u8` parameter count, per parameter `u8` register + `u16` name
    /// constant, then `u16` body length.
    pub fn parse(instruction: &Instruction<'_>, constants: &[ConstValue]) -> VmResult<Self> {
        let at = instruction.offset;
        let name_index = instruction.u16_at(0)?;
        let register_count = instruction.u8_at(2)?;
        let raw_flags = instruction.u16_at(3)?;
        let param_count = instruction.u8_at(5)? as usize;

        let flags = PreloadFlags::from_bits(raw_flags).ok_or_else(|| {
            VmError::validation(format!("unknown preload flag bits 0x{:03X}", raw_flags)).at(at)
        })?;

        let name = if name_index == ANONYMOUS {
            None
        } else {
            Some(string_constant(constants, name_index, at)?)
        };

        let mut params = Vec::with_capacity(param_count);
        for i in 0..param_count {
            let base = 6 + i * 3;
            let register = instruction.u8_at(base)?;
            let name_index = instruction.u16_at(base + 1)?;
            if register != 0 && register >= register_count {
                return Err(VmError::validation(format!(
                    "parameter register {} outside {} registers",
                    register, register_count
                ))
                .at(at));
            }
            params.push(Parameter {
                name: string_constant(constants, name_index, at)?,
                register,
            });
        }

        let len_index = 6 + param_count * 3;
        let body_len = instruction.u16_at(len_index)? as usize;
        if instruction.operands.len() != len_index + 2 {
            return Err(VmError::validation(format!(
                "function header is {} bytes, expected {}",
                instruction.operands.len(),
                len_index + 2
            ))
            .at(at));
        }

        Ok(Self {
            name,
            register_count,
            flags,
            params,
            body: CodeRange::new(instruction.next, instruction.next + body_len),
        })
    }
}

fn string_constant(constants: &[ConstValue], index: u16, at: usize) -> VmResult<String> {
    match constants.get(index as usize) {
        Some(ConstValue::String(s)) => Ok(s.clone()),
        Some(_) => Err(VmError::validation(format!("constant {} is not a string", index)).at(at)),
        None => Err(VmError::validation(format!("constant index {} out of range", index)).at(at)),
    }
}
