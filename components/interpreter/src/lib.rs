//! Bytecode interpreter for the Ember script VM
//!
//! This crate runs prepared [`bytecode_system::BytecodeImage`]s:
//! - A pooled operand stack shared by every frame of a call chain, with
//!   RAII checkpoints restoring its depth
//! - Execution frames resolving names through registers, locals, `with`
//!   objects, captured variables and the global object
//! - Closures with a flag-driven call protocol (register preloads,
//!   implicit locals, named and overflow arguments)
//! - A dispatcher that resolves script-level errors to `undefined`
//! - A [`Context`] tying symbols, objects, host bindings, frame listeners
//!   and the cycle collector together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytecode_system::{ImageBuilder, Opcode};
//! use core_types::Value;
//! use interpreter::Context;
//!
//! let mut builder = ImageBuilder::new();
//! builder.push_string("answer").push_number(42.0).op(Opcode::SetVariable);
//! builder.get_variable("answer").op(Opcode::Return);
//! let image = Arc::new(builder.build().unwrap());
//!
//! let mut ctx = Context::default();
//! assert_eq!(ctx.run_image(image).unwrap(), Value::Number(42.0));
//!
//! let answer = ctx.get_symbol("answer");
//! assert_eq!(ctx.global().get(answer), Value::Number(42.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod closure;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod frame;
pub mod native;
pub mod stack;

// Re-export main types at crate root
pub use closure::{CallOptions, Closure};
pub use config::VmConfig;
pub use context::{Context, FrameListener, WellKnownSymbols};
pub use dispatch::{Dispatcher, ExecutionState};
pub use frame::{ExecutionFrame, MAX_WITH_DEPTH};
pub use native::{NativeFn, NativeFunction};
pub use stack::{StackCheckpoint, ValueStack};
