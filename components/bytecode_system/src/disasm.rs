//! Human-readable listing of an image

use std::fmt::Write;

use crate::function::{CodeRange, FunctionTemplate};
use crate::image::BytecodeImage;
use crate::instruction::{decode, Instruction};
use crate::opcode::Opcode;

/// Render one line per instruction, nested function bodies indented.
///
/// Decoding stops at the first malformed instruction, which is reported on
/// its own line.
///
/// # Examples
///
/// ```
/// use bytecode_system::{disassemble, ImageBuilder, Opcode};
///
/// let mut builder = ImageBuilder::new();
/// builder.push_number(7.0).op(Opcode::Return);
/// let image = builder.build().unwrap();
///
/// assert_eq!(
///     disassemble(&image),
///     "0000 PushConstant #0 7\n0005 Return\n"
/// );
/// ```
pub fn disassemble(image: &BytecodeImage) -> String {
    let mut out = String::new();
    listing(image, CodeRange::new(0, image.code().len()), 0, &mut out);
    out
}

fn listing(image: &BytecodeImage, range: CodeRange, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let mut pc = range.start;

    while pc < range.end {
        let instruction = match decode(image.code(), pc) {
            Ok(instruction) => instruction,
            Err(error) => {
                let _ = writeln!(out, "{:04} {}!! {}", pc, indent, error.message);
                return;
            }
        };

        let operands = describe_operands(image, &instruction);
        if operands.is_empty() {
            let _ = writeln!(out, "{:04} {}{}", pc, indent, instruction.opcode.mnemonic());
        } else {
            let _ = writeln!(
                out,
                "{:04} {}{} {}",
                pc,
                indent,
                instruction.opcode.mnemonic(),
                operands
            );
        }

        pc = instruction.next;
        match instruction.opcode {
            Opcode::DefineFunction => {
                if let Ok(template) = FunctionTemplate::parse(&instruction, image.constants()) {
                    let body = CodeRange::new(template.body.start, template.body.end.min(range.end));
                    listing(image, body, depth + 1, out);
                    pc = body.end;
                }
            }
            Opcode::End if depth == 0 => return,
            _ => {}
        }
    }
}

fn describe_operands(image: &BytecodeImage, instruction: &Instruction<'_>) -> String {
    match instruction.opcode {
        Opcode::PushConstant => instruction
            .constant_indices()
            .map(|index| match image.constant(index as usize) {
                Some(value) => format!("#{} {}", index, value),
                None => format!("#{} ?", index),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Opcode::PushRegister | Opcode::StoreRegister => match instruction.u8_at(0) {
            Ok(register) => format!("r{}", register),
            Err(_) => "?".to_string(),
        },
        Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
            match (instruction.i16_at(0), instruction.jump_target()) {
                (Ok(relative), Ok(target)) => format!("{:+} -> {:04}", relative, target),
                _ => "?".to_string(),
            }
        }
        Opcode::CallFunction | Opcode::CallMethod => match instruction.u8_at(0) {
            Ok(argc) => format!("argc {}", argc),
            Err(_) => "?".to_string(),
        },
        Opcode::InitObject => match instruction.u16_at(0) {
            Ok(pairs) => format!("pairs {}", pairs),
            Err(_) => "?".to_string(),
        },
        Opcode::DefineFunction => match FunctionTemplate::parse(instruction, image.constants()) {
            Ok(template) => {
                let params = template
                    .params
                    .iter()
                    .map(|p| match p.register {
                        0 => format!("{}:local", p.name),
                        r => format!("{}:r{}", p.name, r),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "{} regs {} flags {} params [{}] body {}",
                    template.name.as_deref().unwrap_or("<anonymous>"),
                    template.register_count,
                    template.flags,
                    params,
                    template.body.len()
                )
            }
            Err(error) => format!("!! {}", error.message),
        },
        _ => String::new(),
    }
}
