//! Image assembler
//!
//! [`ImageBuilder`] emits encoded instructions, resolves labels to relative
//! jump offsets and lays out nested function bodies. It is how tests, tools
//! and fixtures produce images without a compiler.

use std::collections::HashMap;

use core_types::{VmError, VmResult};

use crate::function::{PreloadFlags, ANONYMOUS};
use crate::image::BytecodeImage;
use crate::instruction::LENGTH_PREFIX;
use crate::opcode::Opcode;
use crate::value::ConstValue;

/// A jump destination inside the image being built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug)]
struct Patch {
    /// Position of the `i16` operand
    at: usize,
    /// Offset of the instruction after the jump
    next: usize,
    label: Label,
}

/// Assembler for [`BytecodeImage`]s
///
/// # Examples
///
/// ```
/// use bytecode_system::{ImageBuilder, Opcode};
///
/// let mut builder = ImageBuilder::new();
/// let done = builder.new_label();
/// builder.push_bool(true);
/// builder.jump_if_true(done);
/// builder.push_number(1.0);
/// builder.op(Opcode::Trace);
/// builder.bind(done);
/// builder.op(Opcode::End);
///
/// let image = builder.build().unwrap();
/// assert!(image.prepare().is_ok());
/// ```
#[derive(Debug, Default)]
pub struct ImageBuilder {
    code: Vec<u8>,
    constants: Vec<ConstValue>,
    strings: HashMap<String, u16>,
    labels: Vec<Option<usize>>,
    patches: Vec<Patch>,
    error: Option<VmError>,
}

impl ImageBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code offset
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Add a constant, reusing an existing index for equal strings
    pub fn constant(&mut self, value: ConstValue) -> u16 {
        if let ConstValue::String(s) = &value {
            if let Some(&index) = self.strings.get(s) {
                return index;
            }
        }
        let index = self.constants.len();
        if index >= ANONYMOUS as usize {
            self.fail(VmError::exhausted("constant pool is full"));
            return 0;
        }
        let index = index as u16;
        if let ConstValue::String(s) = &value {
            self.strings.insert(s.clone(), index);
        }
        self.constants.push(value);
        index
    }

    /// Add a string constant
    pub fn string(&mut self, s: &str) -> u16 {
        self.constant(ConstValue::from(s))
    }

    /// Emit a single-byte opcode, or an operand opcode with no operands
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.emit(opcode, &[])
    }

    /// Emit an instruction with raw operand bytes
    pub fn emit(&mut self, opcode: Opcode, operands: &[u8]) -> &mut Self {
        self.code.push(opcode.byte());
        if opcode.has_operands() {
            match u16::try_from(operands.len()) {
                Ok(len) => self.code.extend_from_slice(&len.to_le_bytes()),
                Err(_) => {
                    self.fail(VmError::exhausted(format!(
                        "{} operands exceed 65535 bytes",
                        opcode.mnemonic()
                    )));
                    return self;
                }
            }
            self.code.extend_from_slice(operands);
        }
        self
    }

    /// Push one or more constants with a single instruction
    pub fn push_constants(&mut self, indices: &[u16]) -> &mut Self {
        let operands: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        self.emit(Opcode::PushConstant, &operands)
    }

    /// Push a constant value
    pub fn push_const(&mut self, value: ConstValue) -> &mut Self {
        let index = self.constant(value);
        self.push_constants(&[index])
    }

    /// Push a number constant
    pub fn push_number(&mut self, n: f64) -> &mut Self {
        self.push_const(ConstValue::Number(n))
    }

    /// Push a string constant
    pub fn push_string(&mut self, s: &str) -> &mut Self {
        self.push_const(ConstValue::from(s))
    }

    /// Push a boolean literal
    pub fn push_bool(&mut self, b: bool) -> &mut Self {
        self.op(if b { Opcode::PushTrue } else { Opcode::PushFalse })
    }

    /// Push the value of a variable
    pub fn get_variable(&mut self, name: &str) -> &mut Self {
        self.push_string(name).op(Opcode::GetVariable)
    }

    /// Push a register
    pub fn push_register(&mut self, register: u8) -> &mut Self {
        self.emit(Opcode::PushRegister, &[register])
    }

    /// Pop into a register
    pub fn store_register(&mut self, register: u8) -> &mut Self {
        self.emit(Opcode::StoreRegister, &[register])
    }

    /// Allocate an unbound label
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let offset = self.code.len();
        match self.labels.get(label.0).copied() {
            Some(None) => self.labels[label.0] = Some(offset),
            Some(Some(_)) => self.fail(VmError::invalid_state(format!(
                "label {} bound twice",
                label.0
            ))),
            None => self.fail(VmError::invalid_state(format!("unknown label {}", label.0))),
        }
        self
    }

    /// Unconditional jump to `label`
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit_jump(Opcode::Jump, label)
    }

    /// Pop and jump to `label` if truthy
    pub fn jump_if_true(&mut self, label: Label) -> &mut Self {
        self.emit_jump(Opcode::JumpIfTrue, label)
    }

    /// Pop and jump to `label` if falsy
    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.emit_jump(Opcode::JumpIfFalse, label)
    }

    /// Call `[func, this, args..]`
    pub fn call_function(&mut self, argc: u8) -> &mut Self {
        self.emit(Opcode::CallFunction, &[argc])
    }

    /// Call `object.name(args..)` from `[object, name, args..]`
    pub fn call_method(&mut self, argc: u8) -> &mut Self {
        self.emit(Opcode::CallMethod, &[argc])
    }

    /// Build an object from `pairs` `[name, value]` stack pairs
    pub fn init_object(&mut self, pairs: u16) -> &mut Self {
        self.emit(Opcode::InitObject, &pairs.to_le_bytes())
    }

    /// Emit a `DefineFunction` whose body is produced by `body`.
    ///
    /// `params` maps each parameter name to its register (0 keeps it a
    /// frame-local variable).
    pub fn define_function<F>(
        &mut self,
        name: Option<&str>,
        register_count: u8,
        flags: PreloadFlags,
        params: &[(&str, u8)],
        body: F,
    ) -> &mut Self
    where
        F: FnOnce(&mut ImageBuilder),
    {
        let name_index = match name {
            Some(name) => self.string(name),
            None => ANONYMOUS,
        };
        let mut operands = Vec::with_capacity(8 + params.len() * 3);
        operands.extend_from_slice(&name_index.to_le_bytes());
        operands.push(register_count);
        operands.extend_from_slice(&flags.bits().to_le_bytes());
        operands.push(params.len() as u8);
        for (param, register) in params {
            let index = self.string(param);
            operands.push(*register);
            operands.extend_from_slice(&index.to_le_bytes());
        }
        operands.extend_from_slice(&0u16.to_le_bytes());

        self.emit(Opcode::DefineFunction, &operands);
        let len_at = self.code.len() - LENGTH_PREFIX;
        let body_start = self.code.len();

        body(self);

        match u16::try_from(self.code.len() - body_start) {
            Ok(len) => self.code[len_at..len_at + 2].copy_from_slice(&len.to_le_bytes()),
            Err(_) => self.fail(VmError::exhausted("function body exceeds 65535 bytes")),
        }
        self
    }

    /// Resolve labels and produce an unprepared image
    pub fn build(mut self) -> VmResult<BytecodeImage> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        for patch in &self.patches {
            let target = self.labels[patch.label.0].ok_or_else(|| {
                VmError::invalid_state(format!("label {} was never bound", patch.label.0))
            })?;
            let relative = target as isize - patch.next as isize;
            let relative = i16::try_from(relative).map_err(|_| {
                VmError::exhausted(format!("jump distance {} does not fit in i16", relative))
            })?;
            self.code[patch.at..patch.at + 2].copy_from_slice(&relative.to_le_bytes());
        }
        Ok(BytecodeImage::new(self.code, self.constants))
    }

    fn emit_jump(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        self.emit(opcode, &[0, 0]);
        let next = self.code.len();
        self.patches.push(Patch {
            at: next - 2,
            next,
            label,
        });
        self
    }

    fn fail(&mut self, error: VmError) {
        self.error.get_or_insert(error);
    }
}
