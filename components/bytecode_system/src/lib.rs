//! Bytecode images for the Ember script VM
//!
//! This crate provides the instruction set, the image container with its
//! two-phase lifecycle (prepare once, execute many times), the persisted
//! image format, an assembler and a disassembler.
//!
//! # Features
//!
//! - Variable-length encoding: one opcode byte, plus a length-prefixed
//!   operand span when the opcode's high bit is set
//! - Validating preparation pass with cached jump targets and function
//!   templates
//! - Binary serialization support
//! - Label-resolving assembler for tests and tools
//!
//! # Example
//!
//! ```
//! use bytecode_system::{BytecodeImage, ImageBuilder, Opcode};
//!
//! let mut builder = ImageBuilder::new();
//! builder.push_number(40.0).push_number(2.0).op(Opcode::Add).op(Opcode::Return);
//! let image = builder.build().unwrap();
//!
//! // Prepare once; later calls return the cached result
//! let prepared = image.prepare().unwrap();
//! assert_eq!(prepared.instruction_count, 4);
//!
//! // Serialize
//! let bytes = image.to_bytes();
//! let restored = BytecodeImage::from_bytes(&bytes).unwrap();
//! assert_eq!(restored.code(), image.code());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod disasm;
pub mod function;
pub mod image;
pub mod instruction;
pub mod opcode;
pub mod prepare;
pub mod value;

// Re-export main types at crate root
pub use builder::{ImageBuilder, Label};
pub use disasm::disassemble;
pub use function::{CodeRange, FunctionTemplate, Parameter, PreloadFlags, ANONYMOUS};
pub use image::BytecodeImage;
pub use instruction::{decode, Instruction, StackEffect};
pub use opcode::Opcode;
pub use prepare::PreparedImage;
pub use value::ConstValue;
